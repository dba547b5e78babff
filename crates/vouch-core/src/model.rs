//! Shared records: agents, probes and karma ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{VouchError, VouchResult};

/// Length of an agent fingerprint in hex characters.
pub const PUBKEY_HEX_LEN: usize = 64;

/// Check that `pubkey` is a 64-char lowercase hex fingerprint.
pub fn validate_pubkey(pubkey: &str) -> VouchResult<()> {
    let ok = pubkey.len() == PUBKEY_HEX_LEN
        && pubkey.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        Err(VouchError::InvalidPubkey(pubkey.to_string()))
    }
}

/// How an agent says it computes its answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeType {
    Local,
    Api,
    Hybrid,
}

/// Trust tier. Ordered: `Shadow < Agent < Master < Jedi`.
///
/// `Agent` is the baseline tier every graduated agent holds; the older labels
/// `trusted` and `verified` deserialize to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Shadow,
    #[serde(alias = "trusted", alias = "verified")]
    Agent,
    Master,
    Jedi,
}

impl Rank {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Shadow => "shadow",
            Rank::Agent => "agent",
            Rank::Master => "master",
            Rank::Jedi => "jedi",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered network participant and its verification state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub pubkey: String,
    pub name: String,
    pub endpoint: String,
    pub compute_type: ComputeType,
    /// Declared maximum round-trip latency; drives the claim-based honesty check.
    #[serde(default)]
    pub declared_latency_ms: Option<u64>,
    #[serde(default)]
    pub hardware: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,

    /// Cached sum of ledger deltas; only the ledger writes it.
    pub karma: i64,
    pub rank: Rank,
    pub is_incubating: bool,
    pub incubation_started_at: DateTime<Utc>,
    pub consecutive_passes: u32,
    pub total_reviews: u32,
    pub correct_reviews: u32,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Fraction of reviews judged correct; 0 with no reviews.
    pub fn review_accuracy(&self) -> f64 {
        if self.total_reviews == 0 {
            0.0
        } else {
            self.correct_reviews as f64 / self.total_reviews as f64
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// Registration payload; verification fields start at their incubation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub pubkey: String,
    pub name: String,
    pub endpoint: String,
    pub compute_type: ComputeType,
    #[serde(default)]
    pub declared_latency_ms: Option<u64>,
    #[serde(default)]
    pub hardware: Option<String>,
}

impl NewAgent {
    pub fn into_agent(self, now: DateTime<Utc>) -> Agent {
        Agent {
            pubkey: self.pubkey,
            name: self.name,
            endpoint: self.endpoint,
            compute_type: self.compute_type,
            declared_latency_ms: self.declared_latency_ms,
            hardware: self.hardware,
            is_active: true,
            created_at: now,
            karma: 0,
            rank: Rank::Shadow,
            is_incubating: true,
            incubation_started_at: now,
            consecutive_passes: 0,
            total_reviews: 0,
            correct_reviews: 0,
            last_seen_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeType {
    Latency,
    Quality,
    PeerReview,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Latency => "latency",
            ProbeType::Quality => "quality",
            ProbeType::PeerReview => "peer_review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Pass,
    Fail,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HonestyStatus {
    Verified,
    Warning,
    Violation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Good,
    Partial,
    Bad,
}

/// Structured payload attached to a probe. Fields irrelevant to the probe type stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub honesty: Option<HonestyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<QualityGrade>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<PeerReview>,
}

/// Peer-review payload stored with a `peer_review` probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReview {
    pub worker: Option<String>,
    pub reviewer: String,
    pub article_id: String,
    pub summary: String,
    pub score: u8,
    pub justification: String,
    #[serde(default)]
    pub flags: Vec<String>,
    pub is_trap: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap_failed: Option<bool>,
}

/// One immutable verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    pub id: Uuid,
    pub agent: String,
    pub probe_type: ProbeType,
    pub result: ProbeResult,
    pub data: ProbeData,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Probe {
    pub fn new(
        agent: &str,
        probe_type: ProbeType,
        result: ProbeResult,
        data: ProbeData,
        duration_ms: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.to_string(),
            probe_type,
            result,
            data,
            duration_ms,
            created_at,
        }
    }

    /// Counts toward the graduation streak: a pass that was not a claim violation.
    pub fn is_clean_pass(&self) -> bool {
        self.result == ProbeResult::Pass && self.data.honesty != Some(HonestyStatus::Violation)
    }

    /// The agent answered, whatever the verdict. Timeouts and transport
    /// errors are the only outcomes without a reply.
    pub fn agent_replied(&self) -> bool {
        matches!(self.result, ProbeResult::Pass | ProbeResult::Fail)
    }
}

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KarmaReason {
    ProbePass,
    ProbeFail,
    ProbeTimeout,
    ProbeError,
    HonestyVerified,
    HonestyWarning,
    HonestyViolation,
    QualityPass,
    QualityPartial,
    QualityFail,
    ReviewProvided,
    PeerReviewExcellent,
    PeerReviewGood,
    PeerReviewFair,
    PeerReviewPoor,
    PeerReviewFailed,
    TrapCorrect,
    TrapFailed,
    GraduationBonus,
    RankPromotion,
    RankDemotion,
}

/// One signed reputation event. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KarmaLedgerEntry {
    pub id: Uuid,
    pub agent: String,
    pub delta: i64,
    pub reason: KarmaReason,
    pub detail: String,
    #[serde(default)]
    pub probe: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl KarmaLedgerEntry {
    pub fn new(
        agent: &str,
        delta: i64,
        reason: KarmaReason,
        detail: impl Into<String>,
        probe: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent: agent.to_string(),
            delta,
            reason,
            detail: detail.into(),
            probe,
            created_at,
        }
    }
}
