//! Latency & availability prober.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::AgentClient;
use crate::config::HonestyConfig;
use crate::error::TransportError;
use crate::honesty;
use crate::model::{Agent, Probe, ProbeData, ProbeResult, ProbeType};

#[derive(Clone)]
pub struct LatencyProber {
    client: Arc<dyn AgentClient>,
    timeout: Duration,
    honesty: HonestyConfig,
}

impl LatencyProber {
    pub fn new(client: Arc<dyn AgentClient>, timeout: Duration, honesty: HonestyConfig) -> Self {
        Self {
            client,
            timeout,
            honesty,
        }
    }

    /// Ping the agent once and classify the outcome. Never fails: transport
    /// problems become `timeout`/`error` probes. The caller persists the probe.
    pub async fn probe(&self, agent: &Agent, now: DateTime<Utc>) -> Probe {
        let payload = json!({
            "probe": true,
            "message": "ping",
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        let (result, data, duration_ms) = match self.client.post_json(&agent.endpoint, &payload, self.timeout).await {
            Err(TransportError::Timeout) => (
                ProbeResult::Timeout,
                ProbeData {
                    error: Some(format!("no response within {}ms", self.timeout.as_millis())),
                    ..Default::default()
                },
                self.timeout.as_millis() as u64,
            ),
            Err(TransportError::Other(msg)) => (
                ProbeResult::Error,
                ProbeData {
                    error: Some(msg),
                    ..Default::default()
                },
                0,
            ),
            Ok(reply) if !reply.is_success() => (
                ProbeResult::Fail,
                ProbeData {
                    latency_ms: Some(reply.elapsed_ms()),
                    http_status: Some(reply.status),
                    ..Default::default()
                },
                reply.elapsed_ms(),
            ),
            Ok(reply) => {
                let t = reply.elapsed_ms();
                let verdict = honesty::classify(agent.compute_type, agent.declared_latency_ms, t, &self.honesty);
                (
                    ProbeResult::Pass,
                    ProbeData {
                        latency_ms: Some(t),
                        claimed_ms: verdict.claimed_ms,
                        honesty: Some(verdict.status),
                        http_status: Some(reply.status),
                        ..Default::default()
                    },
                    t,
                )
            }
        };

        debug!(
            target: "vouch::probe",
            agent = %agent.pubkey,
            result = ?result,
            latency_ms = ?data.latency_ms,
            honesty = ?data.honesty,
            "latency probe finished"
        );
        Probe::new(&agent.pubkey, ProbeType::Latency, result, data, duration_ms, now)
    }
}
