//! Outbound probes and the wire envelopes agents answer with.
//!
//! All traffic to agent endpoints goes through [`AgentClient`]. Response bodies
//! are decoded once, here at the boundary, into a single canonical shape
//! ([`WorkOutput`], [`ReviewVerdict`]); nothing past this module inspects raw
//! JSON.

pub mod latency;
pub mod quality;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{OrchestrationError, TransportError};

pub use latency::LatencyProber;
pub use quality::{grade_summary, QualityProber, QualityReport};

/// What came back from one POST to an agent.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub status: u16,
    /// Wall-clock time of the network exchange only.
    pub elapsed: Duration,
    /// Parsed JSON body; `None` when absent or not JSON.
    pub body: Option<Value>,
}

impl AgentReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed.as_millis().min(u64::MAX as u128) as u64
    }
}

/// Transport to agent endpoints.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn post_json(&self, endpoint: &str, body: &Value, timeout: Duration) -> Result<AgentReply, TransportError>;
}

/// reqwest-backed [`AgentClient`].
#[derive(Clone, Default)]
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

fn classify_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn post_json(&self, endpoint: &str, body: &Value, timeout: Duration) -> Result<AgentReply, TransportError> {
        let request = self.client.post(endpoint).json(body).timeout(timeout);

        let started = Instant::now();
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(classify_reqwest)?;
        let elapsed = started.elapsed();

        let status = response.status().as_u16();
        let remaining = timeout.saturating_sub(elapsed);
        // Body decoding is outside the timed window; a body that never finishes
        // still counts against the hard deadline.
        let body = match tokio::time::timeout(remaining, response.bytes()).await {
            Err(_) => return Err(TransportError::Timeout),
            Ok(Err(e)) => return Err(classify_reqwest(e)),
            Ok(Ok(bytes)) => serde_json::from_slice::<Value>(&bytes).ok(),
        };
        Ok(AgentReply { status, elapsed, body })
    }
}

/// Canonical result of a work request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOutput {
    pub summary: String,
}

#[derive(Deserialize)]
struct NestedSummary {
    summary: String,
}

/// Shapes agents are known to answer a summarize task with.
#[derive(Deserialize)]
#[serde(untagged)]
enum WorkReplyWire {
    Flat { summary: String },
    Nested { result: NestedSummary },
    Response { response: String },
}

impl WorkOutput {
    /// Normalize any known reply shape; anything else is empty output.
    pub fn from_body(body: Option<&Value>) -> Self {
        let summary = body
            .and_then(|v| serde_json::from_value::<WorkReplyWire>(v.clone()).ok())
            .map(|wire| match wire {
                WorkReplyWire::Flat { summary } => summary,
                WorkReplyWire::Nested { result } => result.summary,
                WorkReplyWire::Response { response } => response,
            })
            .unwrap_or_default();
        Self { summary }
    }
}

/// Canonical reviewer verdict. `score` is always within 0–10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub score: u8,
    pub justification: String,
    pub flags: Vec<String>,
}

#[derive(Deserialize)]
struct ReviewBody {
    score: Option<Value>,
    #[serde(default)]
    justification: Option<String>,
    #[serde(default)]
    flags: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReviewReplyWire {
    Nested { review: ReviewBody },
    Flat(ReviewBody),
}

pub const MAX_REVIEW_SCORE: u8 = 10;

impl ReviewVerdict {
    /// Decode a reviewer reply. A missing, fractional or out-of-range score is
    /// rejected, never clamped.
    pub fn from_body(body: Option<&Value>) -> Result<Self, OrchestrationError> {
        let body = body.ok_or_else(|| OrchestrationError::MalformedReview("empty body".into()))?;
        let wire: ReviewReplyWire = serde_json::from_value(body.clone())
            .map_err(|e| OrchestrationError::MalformedReview(e.to_string()))?;
        let inner = match wire {
            ReviewReplyWire::Nested { review } => review,
            ReviewReplyWire::Flat(b) => b,
        };
        let raw = inner
            .score
            .ok_or_else(|| OrchestrationError::MalformedReview("missing score".into()))?;
        let score = raw
            .as_f64()
            .filter(|s| s.is_finite() && s.fract() == 0.0 && (0.0..=MAX_REVIEW_SCORE as f64).contains(s))
            .ok_or_else(|| OrchestrationError::MalformedReview(format!("score {} outside 0-10", raw)))?;
        Ok(Self {
            score: score as u8,
            justification: inner.justification.unwrap_or_default(),
            flags: inner.flags.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn work_output_normalizes_known_shapes() {
        let flat = json!({"summary": "a"});
        let nested = json!({"result": {"summary": "b"}});
        let response = json!({"response": "c"});
        assert_eq!(WorkOutput::from_body(Some(&flat)).summary, "a");
        assert_eq!(WorkOutput::from_body(Some(&nested)).summary, "b");
        assert_eq!(WorkOutput::from_body(Some(&response)).summary, "c");
    }

    #[test]
    fn missing_summary_is_empty_output() {
        assert_eq!(WorkOutput::from_body(Some(&json!({"ok": true}))).summary, "");
        assert_eq!(WorkOutput::from_body(None).summary, "");
    }

    #[test]
    fn review_verdict_accepts_flat_and_nested() {
        let v = ReviewVerdict::from_body(Some(&json!({"score": 7, "justification": "fine", "flags": ["x"]}))).unwrap();
        assert_eq!(v.score, 7);
        assert_eq!(v.flags, vec!["x".to_string()]);
        let v = ReviewVerdict::from_body(Some(&json!({"review": {"score": 0}}))).unwrap();
        assert_eq!(v.score, 0);
        assert_eq!(v.justification, "");
    }

    #[test]
    fn review_verdict_rejects_bad_scores() {
        for body in [
            json!({"justification": "no score"}),
            json!({"score": 11}),
            json!({"score": -1}),
            json!({"score": 6.5}),
            json!({"score": "8"}),
        ] {
            assert!(
                matches!(ReviewVerdict::from_body(Some(&body)), Err(OrchestrationError::MalformedReview(_))),
                "{body}"
            );
        }
        assert!(ReviewVerdict::from_body(None).is_err());
    }
}
