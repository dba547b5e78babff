//! Vouch daemon
//!
//! Drives the periodic jobs of the verification engine (latency probes,
//! quality probes, peer-review cycles), each on its own task so a slow cycle
//! never delays another job. Cycle failures are logged and the next tick
//! tries again.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vouch_core::error::OrchestrationError;
use vouch_core::sim::sim_agent;
use vouch_core::{
    EngineConfig, HttpAgentClient, PeerReviewOrchestrator, ProbeScheduler, SecretScanner, SledStore,
    VerificationEngine, VouchError, VouchResult,
};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vouch-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "vouch daemon failed to start");
        std::process::exit(1);
    }
}

async fn run() -> VouchResult<()> {
    let config = Arc::new(EngineConfig::load()?);
    let store = Arc::new(SledStore::open(Some(&config.store_path))?);
    let scanner = Arc::new(match &config.secrets.extra_patterns_path {
        Some(path) => SecretScanner::with_extra_patterns(Path::new(path))?,
        None => SecretScanner::builtin(),
    });
    let client = Arc::new(HttpAgentClient::new());

    let engine = VerificationEngine::new(store.clone(), scanner.clone(), config.clone());
    register_sim_fleet(&engine)?;

    let scheduler = ProbeScheduler::new(engine.clone(), client.clone());
    let reviews = PeerReviewOrchestrator::new(engine.clone(), client, scanner);

    let sched = &config.scheduler;
    tracing::info!(
        store_path = %config.store_path,
        latency_interval_secs = sched.latency_interval_secs,
        quality_interval_secs = sched.quality_interval_secs,
        review_interval_secs = sched.review_interval_secs,
        pool_size = sched.pool_size,
        "vouch daemon started"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let latency = {
        let scheduler = scheduler.clone();
        spawn_job("latency", sched.latency_interval_secs, shutdown_tx.subscribe(), move || {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.run_latency_cycle(Utc::now()).await {
                    tracing::warn!(target: "vouch::scheduler", error = %e, "latency cycle failed");
                }
            }
        })
    };
    let quality = spawn_job("quality", sched.quality_interval_secs, shutdown_tx.subscribe(), move || {
        let scheduler = scheduler.clone();
        async move {
            if let Err(e) = scheduler.run_quality_cycle(Utc::now()).await {
                tracing::warn!(target: "vouch::scheduler", error = %e, "quality cycle failed");
            }
        }
    });
    let review = spawn_job("review", sched.review_interval_secs, shutdown_tx.subscribe(), move || {
        let reviews = reviews.clone();
        async move {
            match reviews.run_cycle(Utc::now()).await {
                Ok(_) => {}
                Err(VouchError::Orchestration(e @ (OrchestrationError::NoReviewer | OrchestrationError::NoWorker))) => {
                    tracing::debug!(target: "vouch::review", reason = %e, "review cycle skipped");
                }
                Err(e) => tracing::warn!(target: "vouch::review", error = %e, "review cycle aborted"),
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for CTRL-C; shutting down");
    } else {
        tracing::info!("CTRL-C received; shutting down vouch daemon");
    }
    let _ = shutdown_tx.send(());
    for (job, handle) in [("latency", latency), ("quality", quality), ("review", review)] {
        if let Err(e) = handle.await {
            tracing::error!(job, error = %e, "job task panicked");
        }
    }

    store.flush()?;
    Ok(())
}

/// Run `job` every `interval_secs` on its own task until shutdown is
/// signalled. A cycle already in flight finishes before the task exits.
fn spawn_job<F, Fut>(name: &'static str, interval_secs: u64, mut shutdown: broadcast::Receiver<()>, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = tick.tick() => job().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(job = name, "job stopped");
    })
}

/// `VOUCH_SIM_FLEET=name=http://host/path,...` registers simulated agents with
/// deterministic pubkeys. Already-registered names are left alone.
fn register_sim_fleet(engine: &VerificationEngine) -> VouchResult<()> {
    let Ok(fleet) = std::env::var("VOUCH_SIM_FLEET") else {
        return Ok(());
    };
    for entry in fleet.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, endpoint)) = entry.split_once('=') else {
            tracing::warn!(entry, "ignoring VOUCH_SIM_FLEET entry without '='");
            continue;
        };
        match engine.register_agent(sim_agent(name.trim(), endpoint.trim()), Utc::now()) {
            Ok(agent) => tracing::info!(name = %agent.name, pubkey = %agent.pubkey, "simulated agent registered"),
            Err(VouchError::DuplicateAgent(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
