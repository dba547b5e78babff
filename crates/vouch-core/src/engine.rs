//! The verification engine: turns probe results into ledger entries and drives
//! the incubation and rank state machines.
//!
//! Read-modify-write of one agent's derived fields (streak, incubation, rank)
//! runs under that agent's lock, so concurrent probes and review cycles touching
//! the same agent apply one after the other. Different agents never contend.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::{EngineConfig, KarmaDeltas};
use crate::error::{VouchError, VouchResult};
use crate::incubation::{IncubationMachine, StreakUpdate};
use crate::ledger::{KarmaAudit, KarmaLedger};
use crate::model::{
    validate_pubkey, Agent, HonestyStatus, KarmaLedgerEntry, KarmaReason, NewAgent, Probe, ProbeResult,
    ProbeType, QualityGrade,
};
use crate::rank::{RankChange, RankMachine};
use crate::security::PublishGate;
use crate::store::VerificationStore;

/// Per-agent async locks keyed by pubkey.
#[derive(Default, Clone)]
pub struct AgentLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLocks {
    pub async fn lock(&self, pubkey: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(pubkey.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

/// Everything one recorded probe changed.
#[derive(Debug, Clone)]
pub struct ProbeRecord {
    pub probe: Probe,
    pub entries: Vec<KarmaLedgerEntry>,
    pub streak: Option<StreakUpdate>,
    pub rank_change: Option<RankChange>,
}

/// Rolling per-agent numbers over the probes still retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub pubkey: String,
    pub karma: i64,
    pub probes: usize,
    pub passes: usize,
    pub pass_rate: f64,
    pub honesty_violations: usize,
    pub review_accuracy: f64,
}

#[derive(Clone)]
pub struct VerificationEngine {
    store: Arc<dyn VerificationStore>,
    ledger: KarmaLedger,
    incubation: IncubationMachine,
    ranks: RankMachine,
    locks: AgentLocks,
    config: Arc<EngineConfig>,
}

impl VerificationEngine {
    pub fn new(store: Arc<dyn VerificationStore>, gate: Arc<dyn PublishGate>, config: Arc<EngineConfig>) -> Self {
        let ledger = KarmaLedger::new(store.clone(), gate);
        let incubation = IncubationMachine::new(store.clone(), ledger.clone(), config.incubation.clone(), &config.karma);
        let ranks = RankMachine::new(store.clone(), ledger.clone(), config.rank.clone());
        Self {
            store,
            ledger,
            incubation,
            ranks,
            locks: AgentLocks::default(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VerificationStore> {
        &self.store
    }

    pub fn ledger(&self) -> &KarmaLedger {
        &self.ledger
    }

    pub(crate) fn incubation(&self) -> &IncubationMachine {
        &self.incubation
    }

    pub(crate) fn ranks(&self) -> &RankMachine {
        &self.ranks
    }

    pub async fn lock_agent(&self, pubkey: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(pubkey).await
    }

    pub fn agent(&self, pubkey: &str) -> VouchResult<Agent> {
        self.store
            .get_agent(pubkey)?
            .ok_or_else(|| VouchError::UnknownAgent(pubkey.to_string()))
    }

    /// Admit a new agent into incubation.
    pub fn register_agent(&self, new: NewAgent, now: DateTime<Utc>) -> VouchResult<Agent> {
        validate_pubkey(&new.pubkey)?;
        let agent = new.into_agent(now);
        self.store.insert_agent(&agent)?;
        info!(
            target: "vouch::ledger",
            agent = %agent.pubkey,
            name = %agent.name,
            compute_type = ?agent.compute_type,
            declared_latency_ms = ?agent.declared_latency_ms,
            "agent registered; incubation started"
        );
        Ok(agent)
    }

    pub async fn set_active(&self, pubkey: &str, active: bool) -> VouchResult<Agent> {
        let _guard = self.lock_agent(pubkey).await;
        self.store.patch_agent(pubkey, &|a| a.is_active = active)
    }

    /// Persist a latency or quality probe and apply all of its consequences:
    /// karma entries, the pass streak, graduation and rank.
    pub async fn record_probe(&self, probe: Probe) -> VouchResult<ProbeRecord> {
        let _guard = self.lock_agent(&probe.agent).await;
        let now = probe.created_at;
        self.store.insert_probe(&probe)?;
        if probe.agent_replied() {
            self.store.patch_agent(&probe.agent, &|a| a.last_seen_at = Some(now))?;
        }

        let mut entries = Vec::new();
        for (delta, reason, detail) in karma_events(&probe, &self.config.karma) {
            entries.push(self.ledger.record(&probe.agent, delta, reason, detail, Some(probe.id), now)?);
        }

        let streak = match probe.probe_type {
            ProbeType::Latency | ProbeType::Quality => {
                Some(self.incubation.observe(&probe.agent, probe.is_clean_pass(), now)?)
            }
            ProbeType::PeerReview => None,
        };
        let rank_change = self.ranks.recompute(&probe.agent, now)?;

        if probe.data.honesty == Some(HonestyStatus::Violation) {
            warn!(
                target: "vouch::probe",
                agent = %probe.agent,
                latency_ms = ?probe.data.latency_ms,
                claimed_ms = ?probe.data.claimed_ms,
                "honesty violation recorded"
            );
        }
        Ok(ProbeRecord {
            probe,
            entries,
            streak,
            rank_change,
        })
    }

    /// Re-run the rank function for one agent (no-op when nothing changed).
    pub async fn recompute_rank(&self, pubkey: &str, now: DateTime<Utc>) -> VouchResult<Option<RankChange>> {
        let _guard = self.lock_agent(pubkey).await;
        self.ranks.recompute(pubkey, now)
    }

    /// Delete probes older than the retention window.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> VouchResult<usize> {
        let cutoff = now - self.config.retention();
        let removed = self.store.purge_probes_before(cutoff)?;
        if removed > 0 {
            info!(target: "vouch::scheduler", removed, cutoff = %cutoff, "expired probes purged");
        }
        Ok(removed)
    }

    pub fn audit_karma(&self, pubkey: &str) -> VouchResult<KarmaAudit> {
        self.ledger.audit(pubkey)
    }

    /// Graduated agents by karma, highest first.
    pub fn leaderboard(&self, limit: usize) -> VouchResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .store
            .list_agents()?
            .into_iter()
            .filter(|a| !a.is_incubating)
            .collect();
        agents.sort_by(|a, b| b.karma.cmp(&a.karma).then_with(|| a.pubkey.cmp(&b.pubkey)));
        agents.truncate(limit);
        Ok(agents)
    }

    pub fn stats(&self, pubkey: &str, now: DateTime<Utc>) -> VouchResult<AgentStats> {
        let agent = self.agent(pubkey)?;
        let probes = self.store.probes_for(pubkey, now - self.config.retention())?;
        let passes = probes.iter().filter(|p| p.result == ProbeResult::Pass).count();
        let violations = probes
            .iter()
            .filter(|p| p.data.honesty == Some(HonestyStatus::Violation))
            .count();
        Ok(AgentStats {
            pubkey: agent.pubkey.clone(),
            karma: agent.karma,
            probes: probes.len(),
            passes,
            pass_rate: if probes.is_empty() {
                0.0
            } else {
                passes as f64 / probes.len() as f64
            },
            honesty_violations: violations,
            review_accuracy: agent.review_accuracy(),
        })
    }
}

/// Ledger events for a latency or quality probe, in the order they are written.
fn karma_events(probe: &Probe, k: &KarmaDeltas) -> Vec<(i64, KarmaReason, String)> {
    let mut out = Vec::new();
    let kind = probe.probe_type.as_str();
    match probe.result {
        ProbeResult::Timeout => out.push((k.probe_timeout, KarmaReason::ProbeTimeout, format!("{kind} probe timed out"))),
        ProbeResult::Error => out.push((k.probe_error, KarmaReason::ProbeError, format!("{kind} probe transport error"))),
        ProbeResult::Fail => match probe.data.grade {
            Some(_) => out.push((k.quality_fail, KarmaReason::QualityFail, "summary graded bad".to_string())),
            None => {
                let status = probe
                    .data
                    .http_status
                    .map(|s| format!(" (HTTP {s})"))
                    .unwrap_or_default();
                out.push((k.probe_fail, KarmaReason::ProbeFail, format!("{kind} probe failed{status}")));
            }
        },
        ProbeResult::Pass => match probe.probe_type {
            ProbeType::Quality => match probe.data.grade {
                Some(QualityGrade::Partial) => {
                    out.push((k.quality_partial, KarmaReason::QualityPartial, "summary graded partial".to_string()))
                }
                _ => out.push((k.quality_pass, KarmaReason::QualityPass, "summary graded good".to_string())),
            },
            _ => {
                let latency = probe.data.latency_ms.unwrap_or_default();
                out.push((k.probe_pass, KarmaReason::ProbePass, format!("{kind} probe pass in {latency}ms")));
                if let Some(status) = probe.data.honesty {
                    let claim = probe
                        .data
                        .claimed_ms
                        .map(|c| format!(" against claim {c}ms"))
                        .unwrap_or_default();
                    let (delta, reason, word) = match status {
                        HonestyStatus::Verified => (k.honesty_verified, KarmaReason::HonestyVerified, "verified"),
                        HonestyStatus::Warning => (k.honesty_warning, KarmaReason::HonestyWarning, "warning"),
                        HonestyStatus::Violation => (k.honesty_violation, KarmaReason::HonestyViolation, "violation"),
                    };
                    out.push((delta, reason, format!("honesty {word}: {latency}ms{claim}")));
                }
            }
        },
    }
    out
}
