mod common;

use chrono::{Duration, Utc};
use common::{endpoint, reply, summary_body, Harness, GOOD_TIDAL_SUMMARY};
use serde_json::json;
use vouch_core::{ComputeType, ProbeScheduler, ProbeType, QualityGrade, VerificationStore};

fn scheduler(h: &Harness) -> ProbeScheduler {
    ProbeScheduler::new(h.engine.clone(), h.client.clone())
}

#[tokio::test]
async fn latency_cycle_respects_cooldown() {
    let h = Harness::new();
    let now = Utc::now();
    h.register("a1", ComputeType::Hybrid, None, now);
    h.register("a2", ComputeType::Local, Some(10), now);
    h.client.on(&endpoint("a1"), |_| Ok(reply(200, 15, None)));
    h.client.on(&endpoint("a2"), |_| Ok(reply(200, 90, None)));
    let s = scheduler(&h);

    let first = s.run_latency_cycle(now).await.unwrap();
    assert_eq!(first.probed, 2);
    assert_eq!(first.passed, 2);
    assert_eq!(first.violations, 1);

    let again = s.run_latency_cycle(now + Duration::minutes(30)).await.unwrap();
    assert_eq!(again.probed, 0);

    let later = s.run_latency_cycle(now + Duration::minutes(61)).await.unwrap();
    assert_eq!(later.probed, 2);

    let pings = h.client.calls_to(&endpoint("a1"));
    assert_eq!(pings.len(), 2);
    assert_eq!(pings[0]["probe"], true);
    assert_eq!(pings[0]["message"], "ping");
    assert!(pings[0]["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn latency_and_quality_cooldowns_are_independent() {
    let h = Harness::new();
    let now = Utc::now();
    let key = h.register("b1", ComputeType::Hybrid, None, now);
    h.client.on(&endpoint("b1"), |body| {
        if body["task"] == "summarize" {
            Ok(reply(200, 300, Some(summary_body(GOOD_TIDAL_SUMMARY))))
        } else {
            Ok(reply(200, 15, Some(json!({"ok": true}))))
        }
    });
    let s = scheduler(&h);

    assert_eq!(s.run_latency_cycle(now).await.unwrap().probed, 1);
    let quality = s.run_quality_cycle(now).await.unwrap();
    assert_eq!(quality.probed, 1);

    let last = h.store.last_probe(&key, ProbeType::Quality).unwrap().unwrap();
    assert!(last.data.grade.is_some());
    let work = h
        .client
        .calls_to(&endpoint("b1"))
        .into_iter()
        .find(|c| c["task"] == "summarize")
        .unwrap();
    assert_eq!(work["max_sentences"], 2);
    assert!(!work["content"].as_str().unwrap().is_empty());

    // Quality stays on its own, longer cooldown.
    assert_eq!(s.run_quality_cycle(now + Duration::hours(2)).await.unwrap().probed, 0);
    assert_eq!(s.run_latency_cycle(now + Duration::hours(2)).await.unwrap().probed, 1);
}

#[tokio::test]
async fn quality_probe_of_bad_summary_fails() {
    let h = Harness::new();
    let now = Utc::now();
    let key = h.register("b2", ComputeType::Api, None, now);
    h.client.on(&endpoint("b2"), |_| Ok(reply(200, 300, Some(summary_body("Ok.")))));

    let summary = scheduler(&h).run_quality_cycle(now).await.unwrap();
    assert_eq!(summary.failed, 1);
    let probe = h.store.last_probe(&key, ProbeType::Quality).unwrap().unwrap();
    assert_eq!(probe.data.grade, Some(QualityGrade::Bad));
    assert_eq!(h.karma(&key), -5);
    assert_eq!(h.engine.agent(&key).unwrap().consecutive_passes, 0);
}

#[tokio::test]
async fn cycle_purges_probes_past_retention() {
    let h = Harness::new();
    let t0 = Utc::now() - Duration::days(10);
    let key = h.register("c1", ComputeType::Hybrid, None, t0);
    h.client.on(&endpoint("c1"), |_| Ok(reply(200, 15, None)));
    let s = scheduler(&h);

    s.run_latency_cycle(t0).await.unwrap();
    s.run_latency_cycle(t0 + Duration::days(1)).await.unwrap();
    assert_eq!(h.store.probes_for(&key, t0 - Duration::days(1)).unwrap().len(), 2);

    // Retention is 7 days: at t0 + 7d12h only the t0 probe has expired.
    let summary = s.run_latency_cycle(t0 + Duration::days(7) + Duration::hours(12)).await.unwrap();
    assert_eq!(summary.purged, 1);
    assert_eq!(summary.probed, 1);
    let remaining = h.store.probes_for(&key, t0 - Duration::days(1)).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|p| p.created_at > t0));

    // Purging never touches the ledger.
    assert_eq!(h.store.ledger_for(&key).unwrap().len(), 6);
    assert!(h.engine.audit_karma(&key).unwrap().is_consistent());
}

#[tokio::test]
async fn unreachable_agents_are_recorded_not_skipped() {
    let h = Harness::new();
    let now = Utc::now();
    let key = h.register("d1", ComputeType::Hybrid, None, now);

    let summary = scheduler(&h).run_latency_cycle(now).await.unwrap();
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.store_errors, 0);
    assert_eq!(h.karma(&key), -5);
}
