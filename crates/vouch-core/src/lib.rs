//! vouch-core: verification & reputation engine for remote agents.
//!
//! Agents are probed for availability, latency honesty and work quality; every
//! outcome lands in an append-only karma ledger that drives incubation and rank.
//! Senior agents peer-review others and are themselves tested with trap tasks.

pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod honesty;
pub mod incubation;
pub mod ledger;
pub mod model;
pub mod probe;
pub mod rank;
pub mod review;
pub mod scheduler;
pub mod security;
pub mod sim;
pub mod store;
pub mod trap;

pub use config::{
    EngineConfig, HonestyConfig, IncubationConfig, KarmaDeltas, ProbeConfig, RankConfig, ReviewConfig,
    SchedulerConfig, SecretsConfig,
};
pub use engine::{AgentStats, ProbeRecord, VerificationEngine};
pub use error::{OrchestrationError, TransportError, VouchError, VouchResult};
pub use ledger::{KarmaAudit, KarmaLedger};
pub use model::{
    Agent, ComputeType, HonestyStatus, KarmaLedgerEntry, KarmaReason, NewAgent, PeerReview, Probe, ProbeData,
    ProbeResult, ProbeType, QualityGrade, Rank,
};
pub use probe::{AgentClient, AgentReply, HttpAgentClient, LatencyProber, QualityProber};
pub use review::{PeerReviewOrchestrator, ReviewKind, ReviewOutcome, ReviewPlan, ReviewTask};
pub use scheduler::{CycleSummary, HostPacer, ProbeScheduler};
pub use security::{PublishGate, SecretScanner};
pub use store::{SledStore, VerificationStore};
pub use trap::{TrapGenerator, TrapTask, TRAPS};
