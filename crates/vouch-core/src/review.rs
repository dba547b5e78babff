//! Peer review: one senior agent grades another agent's work, and is itself
//! occasionally graded through trap tasks.
//!
//! A cycle is split into a synchronous [`PeerReviewOrchestrator::plan`] (all the
//! random choices) and an async [`PeerReviewOrchestrator::execute`] (network
//! calls, then writes). Any failure before the writes aborts the cycle with an
//! [`OrchestrationError`] and leaves the store untouched.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::KarmaDeltas;
use crate::corpus::{random_article, Article};
use crate::engine::VerificationEngine;
use crate::error::{OrchestrationError, VouchError, VouchResult};
use crate::model::{Agent, KarmaLedgerEntry, KarmaReason, PeerReview, Probe, ProbeData, ProbeResult, ProbeType, Rank};
use crate::probe::{AgentClient, QualityProber, ReviewVerdict};
use crate::rank::RankChange;
use crate::security::SecretScanner;
use crate::trap::{TrapGenerator, TrapTask};

/// Lowest non-trap score that counts as a passing peer-review probe.
const PASSING_SCORE: u8 = 4;

/// What the reviewer will be shown.
#[derive(Debug, Clone)]
pub enum ReviewTask {
    Genuine { worker: Agent, article: &'static Article },
    Trap { trap: &'static TrapTask },
}

/// The random half of a review cycle. For a genuine task the worker lives in
/// the task; a trap has no worker.
#[derive(Debug, Clone)]
pub struct ReviewPlan {
    pub reviewer: Agent,
    pub task: ReviewTask,
}

impl ReviewPlan {
    pub fn is_trap(&self) -> bool {
        matches!(self.task, ReviewTask::Trap { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    Genuine,
    TrapCaught,
    TrapFailed,
}

/// Everything a completed cycle wrote.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub kind: ReviewKind,
    pub reviewer: String,
    pub worker: Option<String>,
    pub score: u8,
    pub probe: Probe,
    pub entries: Vec<KarmaLedgerEntry>,
    pub rank_changes: Vec<(String, RankChange)>,
}

/// Worker karma for a genuine review score.
pub fn worker_delta(score: u8, k: &KarmaDeltas) -> (i64, KarmaReason) {
    match score {
        8..=u8::MAX => (k.peer_review_excellent, KarmaReason::PeerReviewExcellent),
        6..=7 => (k.peer_review_good, KarmaReason::PeerReviewGood),
        4..=5 => (k.peer_review_fair, KarmaReason::PeerReviewFair),
        2..=3 => (k.peer_review_poor, KarmaReason::PeerReviewPoor),
        _ => (k.peer_review_failed, KarmaReason::PeerReviewFailed),
    }
}

#[derive(Clone)]
pub struct PeerReviewOrchestrator {
    engine: VerificationEngine,
    client: Arc<dyn AgentClient>,
    work: QualityProber,
    traps: TrapGenerator,
    scanner: Arc<SecretScanner>,
}

impl PeerReviewOrchestrator {
    pub fn new(engine: VerificationEngine, client: Arc<dyn AgentClient>, scanner: Arc<SecretScanner>) -> Self {
        let timeout = engine.config().probe_timeout();
        let traps = TrapGenerator::new(engine.config().review.trap_probability);
        Self {
            work: QualityProber::new(client.clone(), timeout),
            engine,
            client,
            traps,
            scanner,
        }
    }

    /// Designated senior reviewer if usable, otherwise the highest-karma
    /// graduated agent at master rank or above the karma floor.
    pub fn select_reviewer(&self, agents: &[Agent]) -> Option<Agent> {
        let usable = |a: &&Agent| a.is_active && !a.is_incubating;
        if let Some(senior) = &self.engine.config().review.senior_reviewer {
            if let Some(agent) = agents.iter().filter(usable).find(|a| &a.pubkey == senior) {
                return Some(agent.clone());
            }
        }
        let min_karma = self.engine.config().review.reviewer_min_karma;
        agents
            .iter()
            .filter(usable)
            .filter(|a| a.rank >= Rank::Master || a.karma >= min_karma)
            .max_by(|a, b| a.karma.cmp(&b.karma).then_with(|| b.pubkey.cmp(&a.pubkey)))
            .cloned()
    }

    /// Choose reviewer, worker and task.
    pub fn plan<R: Rng>(&self, rng: &mut R) -> VouchResult<ReviewPlan> {
        let agents = self.engine.store().list_agents()?;
        let reviewer = self.select_reviewer(&agents).ok_or(OrchestrationError::NoReviewer)?;
        let candidates: Vec<&Agent> = agents
            .iter()
            .filter(|a| a.is_active && a.pubkey != reviewer.pubkey)
            .collect();
        // A trap cycle still needs a second active agent in the fleet.
        let worker = candidates
            .choose(rng)
            .map(|a| (*a).clone())
            .ok_or(OrchestrationError::NoWorker)?;

        let task = if self.traps.should_substitute(rng) {
            ReviewTask::Trap {
                trap: self.traps.pick(rng),
            }
        } else {
            ReviewTask::Genuine {
                worker,
                article: random_article(rng),
            }
        };
        Ok(ReviewPlan { reviewer, task })
    }

    /// Run one full cycle with fresh randomness.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> VouchResult<ReviewOutcome> {
        let plan = {
            let mut rng = StdRng::from_entropy();
            self.plan(&mut rng)?
        };
        self.execute(plan, now).await
    }

    pub async fn execute(&self, plan: ReviewPlan, now: DateTime<Utc>) -> VouchResult<ReviewOutcome> {
        if let ReviewTask::Genuine { worker, .. } = &plan.task {
            if worker.pubkey == plan.reviewer.pubkey {
                return Err(OrchestrationError::SelfReview(worker.pubkey.clone()).into());
            }
        }

        let (article, summary) = match &plan.task {
            ReviewTask::Genuine { worker, article } => {
                let (output, _) = self.work.request_work(worker, article).await.map_err(|e| {
                    OrchestrationError::WorkerUnavailable {
                        worker: worker.pubkey.clone(),
                        reason: e.to_string(),
                    }
                })?;
                (*article, output.summary)
            }
            ReviewTask::Trap { trap } => {
                let article = trap
                    .article()
                    .ok_or_else(|| VouchError::Config(format!("trap {} references an unknown article", trap.id)))?;
                (article, trap.bad_summary.to_string())
            }
        };

        let started = Instant::now();
        let verdict = self.request_review(&plan.reviewer, article, &summary).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.record(&plan, article, summary, verdict, duration_ms, now).await
    }

    async fn request_review(&self, reviewer: &Agent, article: &Article, summary: &str) -> VouchResult<ReviewVerdict> {
        let payload = json!({
            "task": "review",
            "article": article.text,
            "summary": summary,
        });
        let unavailable = |reason: String| OrchestrationError::ReviewerUnavailable {
            reviewer: reviewer.pubkey.clone(),
            reason,
        };
        let reply = self
            .client
            .post_json(&reviewer.endpoint, &payload, self.engine.config().probe_timeout())
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !reply.is_success() {
            return Err(unavailable(format!("HTTP {}", reply.status)).into());
        }
        Ok(ReviewVerdict::from_body(reply.body.as_ref())?)
    }

    async fn record(
        &self,
        plan: &ReviewPlan,
        article: &Article,
        summary: String,
        verdict: ReviewVerdict,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> VouchResult<ReviewOutcome> {
        let reviewer = plan.reviewer.pubkey.as_str();
        let trap = match &plan.task {
            ReviewTask::Trap { trap } => Some(*trap),
            ReviewTask::Genuine { .. } => None,
        };
        let worker = match &plan.task {
            ReviewTask::Genuine { worker, .. } => Some(worker.pubkey.as_str()),
            ReviewTask::Trap { .. } => None,
        };

        // Sorted acquisition so a concurrent cycle with the roles swapped cannot deadlock.
        let mut keys: Vec<&str> = std::iter::once(reviewer).chain(worker).collect();
        keys.sort_unstable();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.engine.lock_agent(key).await);
        }

        let trap_failed = trap.map(|t| t.is_failed_by(verdict.score));
        let kind = match trap_failed {
            None => ReviewKind::Genuine,
            Some(true) => ReviewKind::TrapFailed,
            Some(false) => ReviewKind::TrapCaught,
        };
        let result = match kind {
            ReviewKind::Genuine if verdict.score >= PASSING_SCORE => ProbeResult::Pass,
            ReviewKind::TrapCaught => ProbeResult::Pass,
            _ => ProbeResult::Fail,
        };

        let review = PeerReview {
            worker: worker.map(str::to_string),
            reviewer: reviewer.to_string(),
            article_id: article.id.to_string(),
            summary: self.scanner.redact(&summary),
            score: verdict.score,
            justification: self.scanner.redact(&verdict.justification),
            flags: verdict.flags,
            is_trap: trap.is_some(),
            trap_failed,
        };
        let probe = Probe::new(
            worker.unwrap_or(reviewer),
            ProbeType::PeerReview,
            result,
            ProbeData {
                latency_ms: Some(duration_ms),
                review: Some(review),
                ..Default::default()
            },
            duration_ms,
            now,
        );
        self.engine.store().insert_probe(&probe)?;

        let k = &self.engine.config().karma;
        let ledger = self.engine.ledger();
        let mut entries = Vec::new();
        match (trap, worker) {
            (Some(t), _) if kind == ReviewKind::TrapFailed => {
                entries.push(ledger.record(
                    reviewer,
                    k.trap_failed,
                    KarmaReason::TrapFailed,
                    format!("scored trap {} at {} (threshold {})", t.id, verdict.score, t.fail_threshold),
                    Some(probe.id),
                    now,
                )?);
                self.engine.incubation().reincubate(reviewer, now)?;
            }
            (Some(t), _) => {
                entries.push(ledger.record(
                    reviewer,
                    k.trap_correct,
                    KarmaReason::TrapCorrect,
                    format!("caught trap {} with score {}", t.id, verdict.score),
                    Some(probe.id),
                    now,
                )?);
            }
            (None, Some(w)) => {
                let (delta, reason) = worker_delta(verdict.score, k);
                entries.push(ledger.record(
                    w,
                    delta,
                    reason,
                    format!("peer review score {} on {}", verdict.score, article.id),
                    Some(probe.id),
                    now,
                )?);
                entries.push(ledger.record(
                    reviewer,
                    k.review_provided,
                    KarmaReason::ReviewProvided,
                    format!("reviewed work on {}", article.id),
                    Some(probe.id),
                    now,
                )?);
            }
            (None, None) => {}
        }

        let correct = trap_failed != Some(true);
        self.engine.store().patch_agent(reviewer, &|a| {
            a.total_reviews = a.total_reviews.saturating_add(1);
            if correct {
                a.correct_reviews = a.correct_reviews.saturating_add(1);
            }
            a.last_seen_at = Some(now);
        })?;
        if let Some(worker) = worker {
            self.engine.store().patch_agent(worker, &|a| a.last_seen_at = Some(now))?;
        }

        let mut rank_changes = Vec::new();
        for pubkey in std::iter::once(reviewer).chain(worker) {
            if let Some(change) = self.engine.ranks().recompute(pubkey, now)? {
                rank_changes.push((pubkey.to_string(), change));
            }
        }

        match kind {
            ReviewKind::TrapFailed => warn!(
                target: "vouch::review",
                reviewer,
                score = verdict.score,
                "reviewer failed a trap task; sent back to incubation"
            ),
            _ => info!(
                target: "vouch::review",
                reviewer,
                worker = ?worker,
                kind = ?kind,
                score = verdict.score,
                "review cycle recorded"
            ),
        }

        Ok(ReviewOutcome {
            kind,
            reviewer: reviewer.to_string(),
            worker: worker.map(str::to_string),
            score: verdict.score,
            probe,
            entries,
            rank_changes,
        })
    }
}
