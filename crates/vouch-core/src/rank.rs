//! Rank promotion state machine.
//!
//! Rank is never set by hand: [`compute_rank`] derives it from karma, review
//! accuracy, age and incubation, and [`RankMachine::recompute`] persists the
//! result together with a zero-delta audit entry whenever it changes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::RankConfig;
use crate::error::{VouchError, VouchResult};
use crate::ledger::KarmaLedger;
use crate::model::{Agent, KarmaReason, Rank};
use crate::store::VerificationStore;

/// Rank an agent should hold given its current state.
pub fn compute_rank(agent: &Agent, now: DateTime<Utc>, cfg: &RankConfig) -> Rank {
    if agent.is_incubating {
        return Rank::Shadow;
    }
    let age_days = agent.age(now).num_days();
    if agent.karma >= cfg.jedi_karma
        && agent.review_accuracy() >= cfg.jedi_accuracy
        && age_days >= cfg.jedi_min_age_days
    {
        Rank::Jedi
    } else if agent.karma >= cfg.master_karma {
        Rank::Master
    } else {
        Rank::Agent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankChange {
    pub from: Rank,
    pub to: Rank,
}

#[derive(Clone)]
pub struct RankMachine {
    store: Arc<dyn VerificationStore>,
    ledger: KarmaLedger,
    cfg: RankConfig,
}

impl RankMachine {
    pub fn new(store: Arc<dyn VerificationStore>, ledger: KarmaLedger, cfg: RankConfig) -> Self {
        Self { store, ledger, cfg }
    }

    /// Recompute and persist the agent's rank. Returns `None` (and writes
    /// nothing) when the rank is unchanged.
    pub fn recompute(&self, pubkey: &str, now: DateTime<Utc>) -> VouchResult<Option<RankChange>> {
        let agent = self
            .store
            .get_agent(pubkey)?
            .ok_or_else(|| VouchError::UnknownAgent(pubkey.to_string()))?;
        let target = compute_rank(&agent, now, &self.cfg);
        if target == agent.rank {
            return Ok(None);
        }

        let change = RankChange {
            from: agent.rank,
            to: target,
        };
        self.store.patch_agent(pubkey, &|a| a.rank = target)?;
        let reason = if target > change.from {
            KarmaReason::RankPromotion
        } else {
            KarmaReason::RankDemotion
        };
        self.ledger.record(
            pubkey,
            0,
            reason,
            format!("rank {} -> {} at karma {}", change.from, change.to, agent.karma),
            None,
            now,
        )?;
        info!(
            target: "vouch::rank",
            agent = pubkey,
            from = %change.from,
            to = %change.to,
            karma = agent.karma,
            "rank changed"
        );
        Ok(Some(change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComputeType, NewAgent};

    fn graduated(karma: i64, age_days: i64, total: u32, correct: u32) -> (Agent, DateTime<Utc>) {
        let now = Utc::now();
        let mut a = NewAgent {
            pubkey: "11".repeat(32),
            name: "r".into(),
            endpoint: "http://x".into(),
            compute_type: ComputeType::Api,
            declared_latency_ms: None,
            hardware: None,
        }
        .into_agent(now - chrono::Duration::days(age_days));
        a.is_incubating = false;
        a.karma = karma;
        a.total_reviews = total;
        a.correct_reviews = correct;
        (a, now)
    }

    #[test]
    fn incubating_agents_stay_shadow() {
        let (mut a, now) = graduated(10_000, 365, 100, 100);
        a.is_incubating = true;
        assert_eq!(compute_rank(&a, now, &RankConfig::default()), Rank::Shadow);
    }

    #[test]
    fn master_threshold_is_inclusive() {
        let cfg = RankConfig::default();
        let (a, now) = graduated(499, 1, 0, 0);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Agent);
        let (a, now) = graduated(500, 1, 0, 0);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Master);
    }

    #[test]
    fn jedi_needs_karma_accuracy_and_age() {
        let cfg = RankConfig::default();
        let (a, now) = graduated(5000, 60, 100, 99);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Jedi);
        let (a, now) = graduated(5000, 59, 100, 99);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Master);
        let (a, now) = graduated(5000, 90, 100, 98);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Master);
        // no reviews means accuracy 0
        let (a, now) = graduated(9000, 90, 0, 0);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Master);
    }

    #[test]
    fn karma_loss_demotes() {
        let cfg = RankConfig::default();
        let (a, now) = graduated(-40, 10, 0, 0);
        assert_eq!(compute_rank(&a, now, &cfg), Rank::Agent);
    }
}
