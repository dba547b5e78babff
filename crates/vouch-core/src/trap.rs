//! Trap tasks: pre-authored bad summaries of real corpus articles.
//!
//! A reviewer that scores one of these above its threshold is rubber-stamping.
//! Traps reuse the same articles and envelope as genuine work so a reviewer
//! cannot tell them apart.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::corpus::{find_article, Article};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapType {
    TooShort,
    HallucinatedName,
    FillerPhrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapTask {
    pub id: &'static str,
    pub article_id: &'static str,
    pub bad_summary: &'static str,
    pub trap_type: TrapType,
    /// Highest score an honest reviewer could plausibly give.
    pub fail_threshold: u8,
}

impl TrapTask {
    /// A reviewer fails the trap by scoring above the threshold.
    pub fn is_failed_by(&self, score: u8) -> bool {
        score > self.fail_threshold
    }

    pub fn article(&self) -> Option<&'static Article> {
        find_article(self.article_id)
    }
}

pub const TRAPS: &[TrapTask] = &[
    TrapTask {
        id: "trap-too-short-bees",
        article_id: "urban-beekeeping",
        bad_summary: "Bees are in the city.",
        trap_type: TrapType::TooShort,
        fail_threshold: 4,
    },
    TrapTask {
        id: "trap-hallucinated-librarian",
        article_id: "library-robots",
        bad_summary: "Chief librarian Margaret Ellison personally built the shelf-scanning robots, which \
recovered the original manuscript of Hamlet in their first week.",
        trap_type: TrapType::HallucinatedName,
        fail_threshold: 4,
    },
    TrapTask {
        id: "trap-filler-tidal",
        article_id: "tidal-energy",
        bad_summary: "In today's fast-paced world, it is important to note that energy is a topic of great \
significance. At the end of the day, this article discusses many interesting things that really matter.",
        trap_type: TrapType::FillerPhrase,
        fail_threshold: 4,
    },
];

#[derive(Debug, Clone)]
pub struct TrapGenerator {
    probability: f64,
}

impl TrapGenerator {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    /// Roll whether this review cycle gets a trap instead of real work.
    pub fn should_substitute<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.probability)
    }

    pub fn pick<R: Rng>(&self, rng: &mut R) -> &'static TrapTask {
        TRAPS.choose(rng).unwrap_or(&TRAPS[0])
    }
}
