//! Claim-based honesty detector.
//!
//! An agent that advertises a latency it cannot deliver is lying about its
//! hardware or backend. A per-agent claim always wins; compute-type heuristics
//! only apply when no claim was declared.
//!
//! | Input | verified | warning | violation |
//! |-------|----------|---------|-----------|
//! | claim `c` | `t <= 2c` | `2c < t <= 3c` | `t > 3c` |
//! | `local` (limit `L`) | `t <= L` | `L < t <= 2L` | `t > 2L` |
//! | `api` (floor `A`) | `t >= A` | `t < A` | never |
//! | `hybrid` | always | never | never |

use serde::{Deserialize, Serialize};

use crate::config::HonestyConfig;
use crate::model::{ComputeType, HonestyStatus};

/// Classification of one latency observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HonestyVerdict {
    pub status: HonestyStatus,
    /// The declared claim that was checked, if any.
    pub claimed_ms: Option<u64>,
}

/// Classify an observed round-trip `observed_ms` against the agent's claims.
pub fn classify(
    compute_type: ComputeType,
    declared_ms: Option<u64>,
    observed_ms: u64,
    cfg: &HonestyConfig,
) -> HonestyVerdict {
    if let Some(claim) = declared_ms {
        let status = if observed_ms > claim.saturating_mul(3) {
            HonestyStatus::Violation
        } else if observed_ms > claim.saturating_mul(2) {
            HonestyStatus::Warning
        } else {
            HonestyStatus::Verified
        };
        return HonestyVerdict {
            status,
            claimed_ms: Some(claim),
        };
    }

    let status = match compute_type {
        ComputeType::Local => {
            let limit = cfg.local_max_ms;
            if observed_ms > limit.saturating_mul(2) {
                HonestyStatus::Violation
            } else if observed_ms > limit {
                HonestyStatus::Warning
            } else {
                HonestyStatus::Verified
            }
        }
        ComputeType::Api => {
            if observed_ms < cfg.api_min_ms {
                HonestyStatus::Warning
            } else {
                HonestyStatus::Verified
            }
        }
        ComputeType::Hybrid => HonestyStatus::Verified,
    };
    HonestyVerdict {
        status,
        claimed_ms: None,
    }
}
