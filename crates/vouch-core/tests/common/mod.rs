//! Shared fixtures: an in-process agent network and a throwaway engine.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vouch_core::{
    AgentClient, AgentReply, ComputeType, EngineConfig, KarmaReason, NewAgent, SecretScanner, SledStore,
    TransportError, VerificationEngine, VerificationStore,
};

type Handler = Arc<dyn Fn(&Value) -> Result<AgentReply, TransportError> + Send + Sync>;

/// Scripted [`AgentClient`]: every endpoint answers through a closure, and
/// every request is recorded.
#[derive(Default)]
pub struct ScriptedClient {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedClient {
    pub fn on<F>(&self, endpoint: &str, f: F)
    where
        F: Fn(&Value) -> Result<AgentReply, TransportError> + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().insert(endpoint.to_string(), Arc::new(f));
    }

    /// Answer 200 with `body` after `elapsed_ms`.
    pub fn respond(&self, endpoint: &str, elapsed_ms: u64, body: Value) {
        self.on(endpoint, move |_| Ok(reply(200, elapsed_ms, Some(body.clone()))));
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

pub fn reply(status: u16, elapsed_ms: u64, body: Option<Value>) -> AgentReply {
    AgentReply {
        status,
        elapsed: Duration::from_millis(elapsed_ms),
        body,
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn post_json(&self, endpoint: &str, body: &Value, _timeout: Duration) -> Result<AgentReply, TransportError> {
        self.calls.lock().unwrap().push((endpoint.to_string(), body.clone()));
        let handler = self.handlers.lock().unwrap().get(endpoint).cloned();
        match handler {
            Some(h) => h(body),
            None => Err(TransportError::Other(format!("connection refused: {endpoint}"))),
        }
    }
}

pub struct Harness {
    pub store: Arc<SledStore>,
    pub engine: VerificationEngine,
    pub client: Arc<ScriptedClient>,
    pub scanner: Arc<SecretScanner>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.host_delay_ms = 0;
        tweak(&mut cfg);
        let store = Arc::new(SledStore::temporary().unwrap());
        let scanner = Arc::new(SecretScanner::builtin());
        let engine = VerificationEngine::new(store.clone(), scanner.clone(), Arc::new(cfg));
        Self {
            store,
            engine,
            client: Arc::new(ScriptedClient::default()),
            scanner,
        }
    }

    /// Register an agent keyed by a repeated hex byte, e.g. `"a1"`.
    pub fn register(&self, byte: &str, compute_type: ComputeType, claim: Option<u64>, at: DateTime<Utc>) -> String {
        let pubkey = byte.repeat(32);
        self.engine
            .register_agent(
                NewAgent {
                    pubkey: pubkey.clone(),
                    name: format!("agent-{byte}"),
                    endpoint: endpoint(byte),
                    compute_type,
                    declared_latency_ms: claim,
                    hardware: None,
                },
                at,
            )
            .unwrap();
        pubkey
    }

    /// Register an agent that has already graduated with `karma` on its ledger.
    pub async fn register_graduated(&self, byte: &str, karma: i64, at: DateTime<Utc>) -> String {
        let pubkey = self.register(byte, ComputeType::Hybrid, None, at);
        self.store.patch_agent(&pubkey, &|a| a.is_incubating = false).unwrap();
        if karma != 0 {
            self.engine
                .ledger()
                .record(&pubkey, karma, KarmaReason::QualityPass, "seed", None, at)
                .unwrap();
        }
        self.engine.recompute_rank(&pubkey, at).await.unwrap();
        pubkey
    }

    pub fn karma(&self, pubkey: &str) -> i64 {
        self.store.get_agent(pubkey).unwrap().unwrap().karma
    }

    pub fn reasons(&self, pubkey: &str) -> Vec<KarmaReason> {
        self.store.ledger_for(pubkey).unwrap().iter().map(|e| e.reason).collect()
    }
}

pub fn endpoint(byte: &str) -> String {
    format!("http://agent-{byte}.test/rpc")
}

pub fn summary_body(summary: &str) -> Value {
    json!({ "summary": summary })
}

pub fn review_body(score: Value) -> Value {
    json!({ "score": score, "justification": "checked against the article", "flags": [] })
}

pub const GOOD_TIDAL_SUMMARY: &str = "Engineers in Scotland ran a tidal energy array of four turbines for a year, \
powering about four thousand homes with predictable output. Maintenance is the main challenge, so they will test \
new blade coatings next year.";
