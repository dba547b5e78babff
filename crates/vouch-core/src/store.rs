//! Persistence for agents, probes and the karma ledger.
//!
//! The [`VerificationStore`] trait is the storage seam; [`SledStore`] is the
//! embedded default. Layout (one sled tree each):
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `agents` | `{pubkey}` | `Agent` JSON |
//! | `probes` | `{pubkey}/{created_ms:020}/{probe_id}` | `Probe` JSON |
//! | `probes_by_time` | `{created_ms:020}/{pubkey}/{probe_id}` | primary key |
//! | `ledger` | `{pubkey}/{seq:020}` | `KarmaLedgerEntry` JSON |
//!
//! Ledger rows are only ever inserted. The agent's cached `karma` is bumped in
//! the same transaction as the insert so it cannot drift from the ledger.

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;

use crate::error::{VouchError, VouchResult};
use crate::model::{Agent, KarmaLedgerEntry, Probe, ProbeType};

/// Operations the engine needs from its persistent store.
pub trait VerificationStore: Send + Sync {
    fn get_agent(&self, pubkey: &str) -> VouchResult<Option<Agent>>;

    /// Insert a new agent; fails with `DuplicateAgent` if the key exists.
    fn insert_agent(&self, agent: &Agent) -> VouchResult<()>;

    /// Read-modify-write of an agent's verification fields. `karma` is owned by
    /// the ledger and any change the closure makes to it is discarded.
    fn patch_agent(&self, pubkey: &str, patch: &dyn Fn(&mut Agent)) -> VouchResult<Agent>;

    fn list_agents(&self) -> VouchResult<Vec<Agent>>;

    /// Atomically append `entry` and add its delta to the agent's cached karma.
    /// Returns the agent's new karma.
    fn append_ledger(&self, entry: &KarmaLedgerEntry) -> VouchResult<i64>;

    /// All ledger entries of an agent, oldest first.
    fn ledger_for(&self, pubkey: &str) -> VouchResult<Vec<KarmaLedgerEntry>>;

    /// Overwrite the cached karma counter (used only by ledger rebuild).
    fn set_cached_karma(&self, pubkey: &str, karma: i64) -> VouchResult<()>;

    fn insert_probe(&self, probe: &Probe) -> VouchResult<()>;

    /// Probes of one agent created at or after `since`, oldest first.
    fn probes_for(&self, pubkey: &str, since: DateTime<Utc>) -> VouchResult<Vec<Probe>>;

    /// Most recent probe of the given type for an agent.
    fn last_probe(&self, pubkey: &str, probe_type: ProbeType) -> VouchResult<Option<Probe>>;

    /// Delete every probe created before `cutoff`; returns how many were removed.
    fn purge_probes_before(&self, cutoff: DateTime<Utc>) -> VouchResult<usize>;

    /// Active agents with no `probe_type` probe newer than `now - cooldown`.
    fn eligible_agents(
        &self,
        probe_type: ProbeType,
        cooldown: chrono::Duration,
        now: DateTime<Utc>,
    ) -> VouchResult<Vec<Agent>> {
        let cutoff = now - cooldown;
        let mut out = Vec::new();
        for agent in self.list_agents()? {
            if !agent.is_active {
                continue;
            }
            let due = match self.last_probe(&agent.pubkey, probe_type)? {
                Some(p) => p.created_at <= cutoff,
                None => true,
            };
            if due {
                out.push(agent);
            }
        }
        Ok(out)
    }
}

const DEFAULT_PATH: &str = "./data/vouch";

/// Sled-backed [`VerificationStore`].
pub struct SledStore {
    db: sled::Db,
    agents: sled::Tree,
    probes: sled::Tree,
    probes_by_time: sled::Tree,
    ledger: sled::Tree,
}

impl SledStore {
    /// Open (or create) the store at `path`; `None` uses `./data/vouch`.
    pub fn open(path: Option<impl AsRef<Path>>) -> VouchResult<Self> {
        let p = path
            .map(|x| x.as_ref().to_path_buf())
            .unwrap_or_else(|| Path::new(DEFAULT_PATH).to_path_buf());
        Self::from_db(sled::open(p)?)
    }

    /// Throwaway store removed on drop. For tests and simulations.
    pub fn temporary() -> VouchResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> VouchResult<Self> {
        Ok(Self {
            agents: db.open_tree("agents")?,
            probes: db.open_tree("probes")?,
            probes_by_time: db.open_tree("probes_by_time")?,
            ledger: db.open_tree("ledger")?,
            db,
        })
    }

    pub fn flush(&self) -> VouchResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn probe_key(pubkey: &str, at: DateTime<Utc>, id: &uuid::Uuid) -> String {
    format!("{}/{:020}/{}", pubkey, at.timestamp_millis().max(0), id)
}

fn time_key(pubkey: &str, at: DateTime<Utc>, id: &uuid::Uuid) -> String {
    format!("{:020}/{}/{}", at.timestamp_millis().max(0), pubkey, id)
}

fn agent_prefix(pubkey: &str) -> String {
    format!("{}/", pubkey)
}

fn abort<E: Into<VouchError>>(err: E) -> ConflictableTransactionError<VouchError> {
    ConflictableTransactionError::Abort(err.into())
}

fn unwrap_tx(err: TransactionError<VouchError>) -> VouchError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => VouchError::Store(e),
    }
}

impl VerificationStore for SledStore {
    fn get_agent(&self, pubkey: &str) -> VouchResult<Option<Agent>> {
        match self.agents.get(pubkey.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_agent(&self, agent: &Agent) -> VouchResult<()> {
        let bytes = serde_json::to_vec(agent)?;
        let swapped = self
            .agents
            .compare_and_swap(agent.pubkey.as_bytes(), None as Option<&[u8]>, Some(bytes))?;
        swapped.map_err(|_| VouchError::DuplicateAgent(agent.pubkey.clone()))
    }

    fn patch_agent(&self, pubkey: &str, patch: &dyn Fn(&mut Agent)) -> VouchResult<Agent> {
        self.agents
            .transaction(|tx| {
                let bytes = tx
                    .get(pubkey.as_bytes())?
                    .ok_or_else(|| abort(VouchError::UnknownAgent(pubkey.to_string())))?;
                let mut agent: Agent = serde_json::from_slice(&bytes).map_err(abort)?;
                let karma = agent.karma;
                patch(&mut agent);
                agent.karma = karma;
                let out = serde_json::to_vec(&agent).map_err(abort)?;
                tx.insert(pubkey.as_bytes(), out)?;
                Ok(agent)
            })
            .map_err(unwrap_tx)
    }

    fn list_agents(&self) -> VouchResult<Vec<Agent>> {
        let mut out = Vec::new();
        for item in self.agents.iter() {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn append_ledger(&self, entry: &KarmaLedgerEntry) -> VouchResult<i64> {
        let value = serde_json::to_vec(entry)?;
        (&self.agents, &self.ledger)
            .transaction(|(agents, ledger)| {
                let bytes = agents
                    .get(entry.agent.as_bytes())?
                    .ok_or_else(|| abort(VouchError::UnknownAgent(entry.agent.clone())))?;
                let mut agent: Agent = serde_json::from_slice(&bytes).map_err(abort)?;
                agent.karma += entry.delta;
                let seq = ledger.generate_id()?;
                let key = format!("{}/{:020}", entry.agent, seq);
                ledger.insert(key.as_bytes(), value.clone())?;
                let out = serde_json::to_vec(&agent).map_err(abort)?;
                agents.insert(entry.agent.as_bytes(), out)?;
                Ok(agent.karma)
            })
            .map_err(unwrap_tx)
    }

    fn ledger_for(&self, pubkey: &str) -> VouchResult<Vec<KarmaLedgerEntry>> {
        let mut out = Vec::new();
        for item in self.ledger.scan_prefix(agent_prefix(pubkey).as_bytes()) {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn set_cached_karma(&self, pubkey: &str, karma: i64) -> VouchResult<()> {
        self.agents
            .transaction(|tx| {
                let bytes = tx
                    .get(pubkey.as_bytes())?
                    .ok_or_else(|| abort(VouchError::UnknownAgent(pubkey.to_string())))?;
                let mut agent: Agent = serde_json::from_slice(&bytes).map_err(abort)?;
                agent.karma = karma;
                let out = serde_json::to_vec(&agent).map_err(abort)?;
                tx.insert(pubkey.as_bytes(), out)?;
                Ok(())
            })
            .map_err(unwrap_tx)
    }

    fn insert_probe(&self, probe: &Probe) -> VouchResult<()> {
        let key = probe_key(&probe.agent, probe.created_at, &probe.id);
        let tkey = time_key(&probe.agent, probe.created_at, &probe.id);
        let value = serde_json::to_vec(probe)?;
        (&self.probes, &self.probes_by_time)
            .transaction(|(probes, by_time)| {
                probes.insert(key.as_bytes(), value.clone())?;
                by_time.insert(tkey.as_bytes(), key.as_bytes())?;
                Ok(())
            })
            .map_err(|e: TransactionError<VouchError>| unwrap_tx(e))
    }

    fn probes_for(&self, pubkey: &str, since: DateTime<Utc>) -> VouchResult<Vec<Probe>> {
        let start = format!("{}/{:020}", pubkey, since.timestamp_millis().max(0));
        let end = format!("{}0", pubkey); // '0' sorts right after '/'
        let mut out = Vec::new();
        for item in self.probes.range(start.as_bytes()..end.as_bytes()) {
            let (_, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn last_probe(&self, pubkey: &str, probe_type: ProbeType) -> VouchResult<Option<Probe>> {
        for item in self.probes.scan_prefix(agent_prefix(pubkey).as_bytes()).rev() {
            let (_, v) = item?;
            let probe: Probe = serde_json::from_slice(&v)?;
            if probe.probe_type == probe_type {
                return Ok(Some(probe));
            }
        }
        Ok(None)
    }

    fn purge_probes_before(&self, cutoff: DateTime<Utc>) -> VouchResult<usize> {
        let end = format!("{:020}", cutoff.timestamp_millis().max(0));
        let mut removed = 0;
        for item in self.probes_by_time.range(..end.as_bytes()) {
            let (tkey, primary) = item?;
            self.probes.remove(&primary)?;
            self.probes_by_time.remove(&tkey)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComputeType, KarmaReason, NewAgent, ProbeData, ProbeResult};

    fn agent(pubkey: &str) -> Agent {
        NewAgent {
            pubkey: pubkey.to_string(),
            name: "probe-target".into(),
            endpoint: "http://127.0.0.1:9/agent".into(),
            compute_type: ComputeType::Api,
            declared_latency_ms: None,
            hardware: None,
        }
        .into_agent(Utc::now())
    }

    #[test]
    fn duplicate_registration_rejected() {
        let store = SledStore::temporary().unwrap();
        let a = agent(&"ab".repeat(32));
        store.insert_agent(&a).unwrap();
        assert!(matches!(store.insert_agent(&a), Err(VouchError::DuplicateAgent(_))));
    }

    #[test]
    fn ledger_append_updates_cached_karma() {
        let store = SledStore::temporary().unwrap();
        let key = "cd".repeat(32);
        store.insert_agent(&agent(&key)).unwrap();
        let now = Utc::now();
        for delta in [5, -2, 10] {
            store
                .append_ledger(&KarmaLedgerEntry::new(&key, delta, KarmaReason::ProbePass, "t", None, now))
                .unwrap();
        }
        assert_eq!(store.get_agent(&key).unwrap().unwrap().karma, 13);
        let deltas: Vec<i64> = store.ledger_for(&key).unwrap().iter().map(|e| e.delta).collect();
        assert_eq!(deltas, vec![5, -2, 10]);
    }

    #[test]
    fn patch_cannot_touch_karma() {
        let store = SledStore::temporary().unwrap();
        let key = "ef".repeat(32);
        store.insert_agent(&agent(&key)).unwrap();
        let patched = store
            .patch_agent(&key, &|a| {
                a.karma = 9999;
                a.consecutive_passes = 3;
            })
            .unwrap();
        assert_eq!(patched.karma, 0);
        assert_eq!(patched.consecutive_passes, 3);
    }

    #[test]
    fn ledger_append_for_unknown_agent_fails() {
        let store = SledStore::temporary().unwrap();
        let entry = KarmaLedgerEntry::new("nobody", 1, KarmaReason::ProbePass, "t", None, Utc::now());
        assert!(matches!(store.append_ledger(&entry), Err(VouchError::UnknownAgent(_))));
    }

    #[test]
    fn purge_removes_only_expired_probes() {
        let store = SledStore::temporary().unwrap();
        let key = "01".repeat(32);
        let now = Utc::now();
        let old = Probe::new(&key, ProbeType::Latency, ProbeResult::Pass, ProbeData::default(), 5, now - chrono::Duration::days(8));
        let fresh = Probe::new(&key, ProbeType::Latency, ProbeResult::Pass, ProbeData::default(), 5, now);
        store.insert_probe(&old).unwrap();
        store.insert_probe(&fresh).unwrap();

        let removed = store.purge_probes_before(now - chrono::Duration::days(7)).unwrap();
        assert_eq!(removed, 1);
        let left = store.probes_for(&key, now - chrono::Duration::days(30)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, fresh.id);
    }

    #[test]
    fn last_probe_filters_by_type() {
        let store = SledStore::temporary().unwrap();
        let key = "23".repeat(32);
        let now = Utc::now();
        let lat = Probe::new(&key, ProbeType::Latency, ProbeResult::Pass, ProbeData::default(), 5, now - chrono::Duration::minutes(5));
        let qual = Probe::new(&key, ProbeType::Quality, ProbeResult::Fail, ProbeData::default(), 5, now);
        store.insert_probe(&lat).unwrap();
        store.insert_probe(&qual).unwrap();
        assert_eq!(store.last_probe(&key, ProbeType::Latency).unwrap().unwrap().id, lat.id);
        assert_eq!(store.last_probe(&key, ProbeType::Quality).unwrap().unwrap().id, qual.id);
        assert!(store.last_probe(&key, ProbeType::PeerReview).unwrap().is_none());
    }

    #[test]
    fn cooldown_eligibility() {
        let store = SledStore::temporary().unwrap();
        let now = Utc::now();
        let recent = "45".repeat(32);
        let stale = "67".repeat(32);
        let never = "89".repeat(32);
        let inactive = "0a".repeat(32);
        for k in [&recent, &stale, &never, &inactive] {
            store.insert_agent(&agent(k)).unwrap();
        }
        store.patch_agent(&inactive, &|a| a.is_active = false).unwrap();
        store
            .insert_probe(&Probe::new(&recent, ProbeType::Latency, ProbeResult::Pass, ProbeData::default(), 5, now - chrono::Duration::minutes(10)))
            .unwrap();
        store
            .insert_probe(&Probe::new(&stale, ProbeType::Latency, ProbeResult::Pass, ProbeData::default(), 5, now - chrono::Duration::hours(2)))
            .unwrap();

        let mut eligible: Vec<String> = store
            .eligible_agents(ProbeType::Latency, chrono::Duration::hours(1), now)
            .unwrap()
            .into_iter()
            .map(|a| a.pubkey)
            .collect();
        eligible.sort();
        let mut expected = vec![stale, never];
        expected.sort();
        assert_eq!(eligible, expected);
    }
}
