//! Incubation / graduation state machine.
//!
//! New agents start incubating. Every latency or quality probe either extends
//! the pass streak or resets it; graduation needs the incubation period to
//! have elapsed AND the streak to reach the configured length.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::{IncubationConfig, KarmaDeltas};
use crate::error::VouchResult;
use crate::ledger::KarmaLedger;
use crate::model::{Agent, KarmaReason};
use crate::store::VerificationStore;

/// Whether an incubating agent meets both graduation conditions.
pub fn ready_to_graduate(agent: &Agent, now: DateTime<Utc>, cfg: &IncubationConfig) -> bool {
    let elapsed = now.signed_duration_since(agent.incubation_started_at);
    agent.is_incubating
        && elapsed >= chrono::Duration::hours(cfg.duration_hours)
        && agent.consecutive_passes >= cfg.required_passes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub consecutive_passes: u32,
    pub graduated: bool,
}

#[derive(Clone)]
pub struct IncubationMachine {
    store: Arc<dyn VerificationStore>,
    ledger: KarmaLedger,
    cfg: IncubationConfig,
    graduation_bonus: i64,
}

impl IncubationMachine {
    pub fn new(
        store: Arc<dyn VerificationStore>,
        ledger: KarmaLedger,
        cfg: IncubationConfig,
        deltas: &KarmaDeltas,
    ) -> Self {
        Self {
            store,
            ledger,
            cfg,
            graduation_bonus: deltas.graduation_bonus,
        }
    }

    /// Apply one probe outcome to the pass streak, then graduate if eligible.
    /// `clean_pass` is a `pass` whose honesty status was not a violation.
    pub fn observe(&self, pubkey: &str, clean_pass: bool, now: DateTime<Utc>) -> VouchResult<StreakUpdate> {
        let agent = self.store.patch_agent(pubkey, &|a| {
            if clean_pass {
                a.consecutive_passes = a.consecutive_passes.saturating_add(1);
            } else {
                a.consecutive_passes = 0;
            }
        })?;

        let graduated = if ready_to_graduate(&agent, now, &self.cfg) {
            self.graduate(pubkey, &agent, now)?;
            true
        } else {
            false
        };
        Ok(StreakUpdate {
            consecutive_passes: agent.consecutive_passes,
            graduated,
        })
    }

    fn graduate(&self, pubkey: &str, agent: &Agent, now: DateTime<Utc>) -> VouchResult<()> {
        self.store.patch_agent(pubkey, &|a| a.is_incubating = false)?;
        let days = now.signed_duration_since(agent.incubation_started_at).num_hours() as f64 / 24.0;
        self.ledger.record(
            pubkey,
            self.graduation_bonus,
            KarmaReason::GraduationBonus,
            format!(
                "graduated from incubation after {:.1} days and {} consecutive passes",
                days, agent.consecutive_passes
            ),
            None,
            now,
        )?;
        info!(
            target: "vouch::rank",
            agent = pubkey,
            consecutive_passes = agent.consecutive_passes,
            "agent graduated from incubation"
        );
        Ok(())
    }

    /// Send an agent back to incubation: streak cleared, clock restarted.
    pub fn reincubate(&self, pubkey: &str, now: DateTime<Utc>) -> VouchResult<Agent> {
        self.store.patch_agent(pubkey, &|a| {
            a.is_incubating = true;
            a.incubation_started_at = now;
            a.consecutive_passes = 0;
        })
    }
}
