//! Engine configuration.
//!
//! Built once at process start and handed to each component constructor. Every
//! threshold, window and karma delta the engine uses lives here so operators can
//! retune the reputation economy without a rebuild.
//!
//! Precedence: built-in defaults < TOML file (`VOUCH_CONFIG`, default
//! `config/vouch.toml`) < environment (`VOUCH__<SECTION>__<FIELD>`, e.g.
//! `VOUCH__REVIEW__TRAP_PROBABILITY=0.2`).

use crate::error::{VouchError, VouchResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/vouch.toml";

/// Top-level configuration for the verification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory of the embedded sled database.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub honesty: HonestyConfig,
    #[serde(default)]
    pub incubation: IncubationConfig,
    #[serde(default)]
    pub rank: RankConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub karma: KarmaDeltas,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

fn default_store_path() -> String {
    "./data/vouch".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            probe: ProbeConfig::default(),
            honesty: HonestyConfig::default(),
            incubation: IncubationConfig::default(),
            rank: RankConfig::default(),
            review: ReviewConfig::default(),
            scheduler: SchedulerConfig::default(),
            karma: KarmaDeltas::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Hard deadline for any outbound call to an agent.
    pub timeout_secs: u64,
    /// Minimum gap between two latency probes of the same agent.
    pub latency_cooldown_secs: u64,
    /// Minimum gap between two quality probes of the same agent.
    pub quality_cooldown_secs: u64,
    /// Probes older than this are purged by the cleanup sweep.
    pub retention_days: i64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            latency_cooldown_secs: 3600,
            quality_cooldown_secs: 6 * 3600,
            retention_days: 7,
        }
    }
}

/// Compute-type fallbacks used when an agent declares no latency claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HonestyConfig {
    /// `local` agents must answer within this many ms (warning up to 2x, violation beyond).
    pub local_max_ms: u64,
    /// `api` agents answering faster than this are implausible.
    pub api_min_ms: u64,
}

impl Default for HonestyConfig {
    fn default() -> Self {
        Self {
            local_max_ms: 2000,
            api_min_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncubationConfig {
    pub duration_hours: i64,
    pub required_passes: u32,
}

impl Default for IncubationConfig {
    fn default() -> Self {
        Self {
            duration_hours: 48,
            required_passes: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub master_karma: i64,
    pub jedi_karma: i64,
    pub jedi_accuracy: f64,
    pub jedi_min_age_days: i64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            master_karma: 500,
            jedi_karma: 5000,
            jedi_accuracy: 0.99,
            jedi_min_age_days: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Chance that a review cycle substitutes a trap task for real work.
    pub trap_probability: f64,
    /// Pubkey of a designated senior reviewer, preferred over karma-based selection.
    pub senior_reviewer: Option<String>,
    /// Karma at which a non-master agent may review.
    pub reviewer_min_karma: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            trap_probability: 0.10,
            senior_reviewer: None,
            reviewer_min_karma: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub latency_interval_secs: u64,
    pub quality_interval_secs: u64,
    pub review_interval_secs: u64,
    /// Concurrent probes in flight per cycle.
    pub pool_size: usize,
    /// Courtesy gap between two requests to the same host.
    pub host_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            latency_interval_secs: 300,
            quality_interval_secs: 1800,
            review_interval_secs: 900,
            pool_size: 8,
            host_delay_ms: 250,
        }
    }
}

/// Karma delta per ledger reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KarmaDeltas {
    pub probe_pass: i64,
    pub probe_fail: i64,
    pub probe_timeout: i64,
    pub probe_error: i64,
    pub honesty_verified: i64,
    pub honesty_warning: i64,
    pub honesty_violation: i64,
    pub quality_pass: i64,
    pub quality_partial: i64,
    pub quality_fail: i64,
    pub review_provided: i64,
    pub peer_review_excellent: i64,
    pub peer_review_good: i64,
    pub peer_review_fair: i64,
    pub peer_review_poor: i64,
    pub peer_review_failed: i64,
    pub trap_correct: i64,
    pub trap_failed: i64,
    pub graduation_bonus: i64,
}

impl Default for KarmaDeltas {
    fn default() -> Self {
        Self {
            probe_pass: 1,
            probe_fail: -5,
            probe_timeout: -2,
            probe_error: -5,
            honesty_verified: 1,
            honesty_warning: -10,
            honesty_violation: -100,
            quality_pass: 5,
            quality_partial: 1,
            quality_fail: -5,
            review_provided: 2,
            peer_review_excellent: 10,
            peer_review_good: 5,
            peer_review_fair: 2,
            peer_review_poor: -5,
            peer_review_failed: -15,
            trap_correct: 20,
            trap_failed: -200,
            graduation_bonus: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecretsConfig {
    /// Optional file with extra secret regexes (one per line, `#` comments).
    pub extra_patterns_path: Option<String>,
}

impl EngineConfig {
    /// Load config from defaults, the optional TOML file and the environment.
    pub fn load() -> VouchResult<Self> {
        let path = std::env::var("VOUCH_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Same as [`EngineConfig::load`] with an explicit file path (skipped when absent).
    pub fn load_from(path: &Path) -> VouchResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?);

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("VOUCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: EngineConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would break the engine's invariants.
    pub fn validate(&self) -> VouchResult<()> {
        if self.probe.timeout_secs == 0 {
            return Err(VouchError::Config("probe.timeout_secs must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.review.trap_probability) {
            return Err(VouchError::Config(format!(
                "review.trap_probability must be within [0, 1], got {}",
                self.review.trap_probability
            )));
        }
        if !(0.0..=1.0).contains(&self.rank.jedi_accuracy) {
            return Err(VouchError::Config("rank.jedi_accuracy must be within [0, 1]".into()));
        }
        if self.scheduler.pool_size == 0 {
            return Err(VouchError::Config("scheduler.pool_size must be > 0".into()));
        }
        if self.probe.retention_days <= 0 {
            return Err(VouchError::Config("probe.retention_days must be > 0".into()));
        }
        if self.rank.master_karma > self.rank.jedi_karma {
            return Err(VouchError::Config("rank.master_karma exceeds rank.jedi_karma".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    pub fn latency_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.probe.latency_cooldown_secs as i64)
    }

    pub fn quality_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.probe.quality_cooldown_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.probe.retention_days)
    }

    pub fn incubation_period(&self) -> chrono::Duration {
        chrono::Duration::hours(self.incubation.duration_hours)
    }

    pub fn host_delay(&self) -> Duration {
        Duration::from_millis(self.scheduler.host_delay_ms)
    }
}
