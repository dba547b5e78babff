//! Periodic probe batches.
//!
//! Each cycle purges expired probes, picks the agents whose cooldown has run
//! out, and probes them through a bounded pool. Requests to the same host are
//! spaced by a courtesy delay.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

use crate::corpus::random_article;
use crate::engine::{ProbeRecord, VerificationEngine};
use crate::error::VouchResult;
use crate::model::{Agent, HonestyStatus, ProbeResult, ProbeType};
use crate::probe::{AgentClient, LatencyProber, QualityProber};

/// Spaces requests per host: each call reserves the next free slot for its
/// host and sleeps until then.
#[derive(Clone)]
pub struct HostPacer {
    delay: Duration,
    next_slot: Arc<DashMap<String, Instant>>,
}

impl HostPacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Arc::new(DashMap::new()),
        }
    }

    pub fn host_of(endpoint: &str) -> String {
        reqwest::Url::parse(endpoint)
            .ok()
            .and_then(|u| u.host_str().map(|h| match u.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            }))
            .unwrap_or_else(|| endpoint.to_string())
    }

    pub async fn wait(&self, endpoint: &str) {
        if self.delay.is_zero() {
            return;
        }
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.entry(Self::host_of(endpoint)).or_insert(now);
            let slot = (*next).max(now);
            *next = slot + self.delay;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

/// Counts for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub purged: usize,
    pub probed: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub violations: usize,
    pub graduated: usize,
    pub rank_changes: usize,
    pub store_errors: usize,
}

impl CycleSummary {
    fn absorb(&mut self, record: &ProbeRecord) {
        self.probed += 1;
        match record.probe.result {
            ProbeResult::Pass => self.passed += 1,
            ProbeResult::Fail => self.failed += 1,
            ProbeResult::Timeout => self.timed_out += 1,
            ProbeResult::Error => self.errored += 1,
        }
        if record.probe.data.honesty == Some(HonestyStatus::Violation) {
            self.violations += 1;
        }
        if record.streak.map(|s| s.graduated).unwrap_or(false) {
            self.graduated += 1;
        }
        if record.rank_change.is_some() {
            self.rank_changes += 1;
        }
    }
}

#[derive(Clone)]
pub struct ProbeScheduler {
    engine: VerificationEngine,
    latency: LatencyProber,
    quality: QualityProber,
    pacer: HostPacer,
}

impl ProbeScheduler {
    pub fn new(engine: VerificationEngine, client: Arc<dyn AgentClient>) -> Self {
        let cfg = engine.config();
        let latency = LatencyProber::new(client.clone(), cfg.probe_timeout(), cfg.honesty.clone());
        let quality = QualityProber::new(client, cfg.probe_timeout());
        let pacer = HostPacer::new(cfg.host_delay());
        Self {
            engine,
            latency,
            quality,
            pacer,
        }
    }

    pub async fn run_latency_cycle(&self, now: DateTime<Utc>) -> VouchResult<CycleSummary> {
        let cooldown = self.engine.config().latency_cooldown();
        self.run_cycle(ProbeType::Latency, cooldown, now).await
    }

    pub async fn run_quality_cycle(&self, now: DateTime<Utc>) -> VouchResult<CycleSummary> {
        let cooldown = self.engine.config().quality_cooldown();
        self.run_cycle(ProbeType::Quality, cooldown, now).await
    }

    async fn run_cycle(
        &self,
        probe_type: ProbeType,
        cooldown: chrono::Duration,
        now: DateTime<Utc>,
    ) -> VouchResult<CycleSummary> {
        let purged = self.engine.purge_expired(now)?;
        let due = self.engine.store().eligible_agents(probe_type, cooldown, now)?;
        let pool = self.engine.config().scheduler.pool_size.max(1);

        let results: Vec<VouchResult<ProbeRecord>> = stream::iter(due)
            .map(|agent| self.probe_one(probe_type, agent, now))
            .buffer_unordered(pool)
            .collect()
            .await;

        let mut summary = CycleSummary {
            purged,
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(record) => summary.absorb(&record),
                Err(e) => {
                    summary.store_errors += 1;
                    error!(target: "vouch::scheduler", error = %e, "failed to record probe");
                }
            }
        }
        info!(
            target: "vouch::scheduler",
            probe_type = probe_type.as_str(),
            probed = summary.probed,
            passed = summary.passed,
            violations = summary.violations,
            graduated = summary.graduated,
            purged = summary.purged,
            "probe cycle complete"
        );
        Ok(summary)
    }

    async fn probe_one(&self, probe_type: ProbeType, agent: Agent, now: DateTime<Utc>) -> VouchResult<ProbeRecord> {
        self.pacer.wait(&agent.endpoint).await;
        let probe = match probe_type {
            ProbeType::Quality => {
                let article = random_article(&mut StdRng::from_entropy());
                self.quality.probe(&agent, article, now).await
            }
            _ => self.latency.probe(&agent, now).await,
        };
        self.engine.record_probe(probe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_keeps_explicit_port() {
        assert_eq!(HostPacer::host_of("http://10.0.0.5:8080/agent"), "10.0.0.5:8080");
        assert_eq!(HostPacer::host_of("https://agents.example.org/a"), "agents.example.org");
        assert_eq!(HostPacer::host_of("not a url"), "not a url");
    }

    #[tokio::test(start_paused = true)]
    async fn same_host_requests_are_spaced() {
        let pacer = HostPacer::new(Duration::from_millis(250));
        let start = Instant::now();
        pacer.wait("http://a.test/x").await;
        pacer.wait("http://a.test/y").await;
        pacer.wait("http://a.test/z").await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn different_hosts_do_not_wait() {
        let pacer = HostPacer::new(Duration::from_millis(250));
        let start = Instant::now();
        pacer.wait("http://a.test/x").await;
        pacer.wait("http://b.test/x").await;
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
