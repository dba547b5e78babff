//! Quality prober: asks an agent to summarize an article and grades the
//! answer with fixed, explainable rules instead of a model judge.
//!
//! Grading ladder, first match wins:
//! 1. compression > 0.5 → bad (too long)
//! 2. compression < 0.05 → bad (too short)
//! 3. more than 3 sentences → partial
//! 4. fewer than 1 sentence → bad
//! 5. key-term recall: ≥3 → good, 2 → partial, otherwise bad

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{AgentClient, WorkOutput};
use crate::corpus::Article;
use crate::error::TransportError;
use crate::model::{Agent, Probe, ProbeData, ProbeResult, ProbeType, QualityGrade};

pub const KEY_TERM_COUNT: usize = 5;
pub const MAX_SENTENCES: usize = 2;

const MAX_COMPRESSION: f64 = 0.5;
const MIN_COMPRESSION: f64 = 0.05;
const SENTENCE_LIMIT: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "because", "been", "before", "being", "both", "cannot", "could", "does", "each",
    "even", "every", "from", "have", "here", "instead", "into", "just", "like", "made", "make", "many", "more",
    "most", "much", "only", "other", "over", "rather", "said", "says", "should", "some", "such", "than", "that",
    "their", "them", "then", "there", "these", "they", "this", "those", "very", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "your",
];

/// Explainable breakdown of one grading decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub grade: QualityGrade,
    pub compression: f64,
    pub sentences: usize,
    pub key_terms: Vec<String>,
    pub matched: Vec<String>,
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// The `k` most frequent non-stopword terms longer than 3 chars; ties go to
/// the term seen first.
pub fn key_terms(text: &str, k: usize) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, word) in tokens(text).enumerate() {
        if word.chars().count() <= 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        counts.entry(word).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(k).map(|(w, _)| w).collect()
}

pub fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
}

/// Grade `summary` as a summary of `source`.
pub fn grade_summary(source: &str, summary: &str) -> QualityReport {
    let input_words = source.split_whitespace().count();
    let output_words = summary.split_whitespace().count();
    let compression = if input_words == 0 {
        0.0
    } else {
        output_words as f64 / input_words as f64
    };
    let sentences = sentence_count(summary);
    let key = key_terms(source, KEY_TERM_COUNT);
    let summary_terms: HashSet<String> = tokens(summary).collect();
    let matched: Vec<String> = key.iter().filter(|t| summary_terms.contains(*t)).cloned().collect();

    let grade = if compression > MAX_COMPRESSION || compression < MIN_COMPRESSION {
        QualityGrade::Bad
    } else if sentences > SENTENCE_LIMIT {
        QualityGrade::Partial
    } else if sentences < 1 {
        QualityGrade::Bad
    } else {
        match matched.len() {
            n if n >= 3 => QualityGrade::Good,
            2 => QualityGrade::Partial,
            _ => QualityGrade::Bad,
        }
    };

    QualityReport {
        grade,
        compression,
        sentences,
        key_terms: key,
        matched,
    }
}

/// Why a work request produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkFailure {
    Transport(TransportError),
    Status(u16),
}

impl std::fmt::Display for WorkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkFailure::Transport(e) => write!(f, "{}", e),
            WorkFailure::Status(s) => write!(f, "HTTP {}", s),
        }
    }
}

#[derive(Clone)]
pub struct QualityProber {
    client: Arc<dyn AgentClient>,
    timeout: Duration,
}

impl QualityProber {
    pub fn new(client: Arc<dyn AgentClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Ask `agent` to summarize `article`. Shared with peer review so workers
    /// see the same envelope either way.
    pub async fn request_work(&self, agent: &Agent, article: &Article) -> Result<(WorkOutput, u64), WorkFailure> {
        let payload = json!({
            "task": "summarize",
            "content": article.text,
            "max_sentences": MAX_SENTENCES,
        });
        let reply = self
            .client
            .post_json(&agent.endpoint, &payload, self.timeout)
            .await
            .map_err(WorkFailure::Transport)?;
        if !reply.is_success() {
            return Err(WorkFailure::Status(reply.status));
        }
        Ok((WorkOutput::from_body(reply.body.as_ref()), reply.elapsed_ms()))
    }

    /// Run one graded quality probe. The caller persists the probe.
    pub async fn probe(&self, agent: &Agent, article: &Article, now: DateTime<Utc>) -> Probe {
        let (result, data, duration_ms) = match self.request_work(agent, article).await {
            Err(WorkFailure::Transport(TransportError::Timeout)) => (
                ProbeResult::Timeout,
                ProbeData {
                    error: Some("summarize task timed out".into()),
                    ..Default::default()
                },
                self.timeout.as_millis() as u64,
            ),
            Err(WorkFailure::Transport(TransportError::Other(msg))) => (
                ProbeResult::Error,
                ProbeData {
                    error: Some(msg),
                    ..Default::default()
                },
                0,
            ),
            Err(WorkFailure::Status(status)) => (
                ProbeResult::Fail,
                ProbeData {
                    http_status: Some(status),
                    ..Default::default()
                },
                0,
            ),
            Ok((output, elapsed)) => {
                let report = grade_summary(article.text, &output.summary);
                let result = match report.grade {
                    QualityGrade::Good | QualityGrade::Partial => ProbeResult::Pass,
                    QualityGrade::Bad => ProbeResult::Fail,
                };
                (
                    result,
                    ProbeData {
                        latency_ms: Some(elapsed),
                        grade: Some(report.grade),
                        ..Default::default()
                    },
                    elapsed,
                )
            }
        };

        debug!(
            target: "vouch::probe",
            agent = %agent.pubkey,
            article = article.id,
            result = ?result,
            grade = ?data.grade,
            "quality probe finished"
        );
        Probe::new(&agent.pubkey, ProbeType::Quality, result, data, duration_ms, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::find_article;

    fn tidal() -> &'static str {
        find_article("tidal-energy").unwrap().text
    }

    #[test]
    fn key_terms_skip_short_words_and_stopwords() {
        let terms = key_terms("the cat sat with that robot; robot robot, engine engine", 3);
        assert_eq!(terms, vec!["robot".to_string(), "engine".to_string()]);
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        assert_eq!(sentence_count("One. Two! Three? "), 3);
        assert_eq!(sentence_count("..."), 0);
        assert_eq!(sentence_count("no terminal punctuation"), 1);
    }

    #[test]
    fn faithful_summary_is_good() {
        let summary = "Engineers in Scotland ran a tidal energy array of four turbines for a year, powering \
about four thousand homes with predictable output. Maintenance is the main challenge, so they will test \
new blade coatings next year.";
        let r = grade_summary(tidal(), summary);
        assert_eq!(r.grade, QualityGrade::Good, "{r:?}");
        assert_eq!(r.sentences, 2);
    }

    #[test]
    fn too_short_is_bad() {
        let r = grade_summary(tidal(), "Tidal power works.");
        assert!(r.compression < 0.05);
        assert_eq!(r.grade, QualityGrade::Bad);
    }

    #[test]
    fn copying_the_article_is_bad() {
        let r = grade_summary(tidal(), tidal());
        assert_eq!(r.grade, QualityGrade::Bad);
    }

    #[test]
    fn rambling_summary_is_partial() {
        let summary = "Tidal turbines work. Engineers like them. Energy is steady. Year one went fine. \
Costs remain.";
        let r = grade_summary(tidal(), summary);
        assert!(r.sentences > 3);
        assert_eq!(r.grade, QualityGrade::Partial);
    }

    #[test]
    fn two_key_terms_is_partial() {
        let summary = "The turbines worked well this year. Output stayed steady near the islands.";
        let r = grade_summary(tidal(), summary);
        assert_eq!(r.sentences, 2);
        assert_eq!(r.matched, vec!["year".to_string(), "turbines".to_string()]);
        assert_eq!(r.grade, QualityGrade::Partial);
    }

    #[test]
    fn no_sentences_is_bad() {
        let summary = vec!["--"; 20].join(" ");
        let r = grade_summary(tidal(), &summary);
        assert!(r.compression >= 0.05 && r.compression <= 0.5, "{r:?}");
        assert_eq!(r.sentences, 0);
        assert_eq!(r.grade, QualityGrade::Bad);
    }

    #[test]
    fn off_topic_summary_is_bad() {
        let summary = "A bakery opened downtown and sells sourdough bread with seeds every morning to commuters.";
        let r = grade_summary(tidal(), summary);
        assert!(r.matched.is_empty());
        assert_eq!(r.grade, QualityGrade::Bad);
    }

    #[test]
    fn empty_output_is_bad() {
        assert_eq!(grade_summary(tidal(), "").grade, QualityGrade::Bad);
    }
}
