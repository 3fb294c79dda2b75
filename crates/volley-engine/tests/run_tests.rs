use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use volley_chain::{Chain, Scenario};
use volley_core::{Feeder, Session};
use volley_engine::{Engine, EngineConfig, StopReason, StopSignal, Termination};
use volley_test_utils::{records, CountingEffect};

fn feeding(feeder: Feeder) -> Scenario {
    Scenario::new("feed", Chain::new().feed(feeder.shared())).unwrap()
}

#[tokio::test]
async fn test_queue_feeder_fails_exactly_one_extra_user() {
    const M: u64 = 25;
    let scenario = feeding(Feeder::new("ids", records(25)).unwrap());
    let engine = Engine::new(EngineConfig::new().at_once(M + 1)).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    assert_eq!(summary.users_started, M + 1);
    assert_eq!(summary.failed, 1);
    assert!(!summary.passed());

    let ids: BTreeSet<u64> = summary
        .outcomes
        .iter()
        .filter(|o| !o.is_failed())
        .map(|o| o.session.get_as::<u64>("id").unwrap())
        .collect();
    assert_eq!(ids, (0..M).collect());
}

#[tokio::test]
async fn test_circular_feeder_never_exhausts() {
    let scenario = feeding(Feeder::new("ids", records(3)).unwrap().circular());
    let engine = Engine::new(EngineConfig::new().at_once(10)).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.completed, 10);
    assert!(summary.passed());
}

#[tokio::test]
async fn test_feeder_records_overwrite_attributes() {
    let chain = Chain::new()
        .exec(|s| s.set("id", "stale").set("kept", true))
        .feed(Feeder::new("ids", records(1)).unwrap().shared());
    let scenario = Scenario::new("overwrite", chain).unwrap();
    let engine = Engine::new(EngineConfig::new()).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    let session = &summary.outcomes[0].session;
    assert_eq!(session.get("id"), Some(&json!(0)));
    assert_eq!(session.get("kept"), Some(&json!(true)));
}

#[tokio::test(start_paused = true)]
async fn test_stop_injector_halts_all_users() {
    let after = CountingEffect::new("after");
    let chain = Chain::new()
        .exec(|s: Session| {
            let leader = s.user_id().0 == 0;
            s.set("leader", leader)
        })
        .do_if("#{leader}")
        .then(Chain::new().stop_injector("#{scenario_label} aborted"))
        .pause(Duration::from_secs(10))
        .exec_effect(after.effect());
    let scenario = Scenario::new("abort", chain).unwrap();
    let engine = Engine::new(EngineConfig::new().at_once(5)).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    assert_eq!(after.count(), 0);
    assert_eq!(summary.stopped, 5);
    // the message failed to resolve but the stop still happened
    assert!(matches!(summary.stop_reason, Some(StopReason::Injector(_))));
    assert!(!summary.passed());
    assert!(summary.generate_text().contains("Run stopped early"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_injector_message_is_recorded() {
    let chain = Chain::new()
        .exec(|s| s.set("reason", "bad data"))
        .stop_injector("#{reason}");
    let scenario = Scenario::new("abort", chain).unwrap();
    let engine = Engine::new(EngineConfig::new()).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    assert_eq!(
        summary.stop_reason,
        Some(StopReason::Injector("bad data".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn test_external_stop_halts_injection() {
    let scenario = Scenario::new(
        "slow",
        Chain::new().pause(Duration::from_secs(60)),
    )
    .unwrap();
    let engine = Engine::new(EngineConfig::new().ramp(10, 100)).unwrap();
    let stop = StopSignal::new();

    let trigger = stop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.stop(StopReason::External("operator".into()));
    });

    let summary = engine.run_with_signal(&scenario, stop).await.unwrap();
    // users start every 10s, so three were injected before the stop at 25s
    assert_eq!(summary.users_started, 3);
    assert_eq!(summary.users_planned, 10);
    assert!(summary
        .outcomes
        .iter()
        .all(|o| o.termination == Termination::Stopped));
    assert!(summary.passed());
}

#[tokio::test]
async fn test_config_file_drives_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volley.toml");
    std::fs::write(
        &path,
        "seed = 7\n\n[injection]\ntype = \"at_once\"\nusers = 4\n",
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    let scenario = Scenario::new("from-file", Chain::new().exec(|s| s.set("ok", true))).unwrap();
    let summary = Engine::new(config).unwrap().run(&scenario).await.unwrap();

    assert_eq!(summary.users_started, 4);
    assert_eq!(summary.completed, 4);
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["scenario"], "from-file");
}

fn picking_scenario() -> Scenario {
    let pick = |letter: &'static str| {
        Chain::new().exec(move |s: Session| {
            let picks = s.get_as::<String>("picks").unwrap_or_default();
            s.set("picks", format!("{picks}{letter}"))
        })
    };
    let body = Chain::new()
        .uniform_random_switch()
        .on([pick("a"), pick("b"), pick("c")])
        .unwrap();
    Scenario::new("picks", Chain::new().repeat(20u64).on(body).unwrap()).unwrap()
}

async fn pick_sequences(seed: u64) -> Vec<String> {
    let engine = Engine::new(EngineConfig::new().at_once(4).with_seed(seed)).unwrap();
    let summary = engine.run(&picking_scenario()).await.unwrap();
    summary
        .outcomes
        .iter()
        .map(|o| o.session.get_as::<String>("picks").unwrap())
        .collect()
}

#[tokio::test]
async fn test_users_sharing_a_seed_draw_independently() {
    let sequences = pick_sequences(7).await;
    assert_eq!(sequences.len(), 4);
    let distinct: HashSet<&String> = sequences.iter().collect();
    assert_eq!(distinct.len(), 4, "users repeated each other: {sequences:?}");

    // and the same seed replays the same per-user draws
    assert_eq!(pick_sequences(7).await, sequences);
}

#[tokio::test(start_paused = true)]
async fn test_unrepresentable_pause_fails_only_that_user() {
    let chain = Chain::new()
        .exec(|s: Session| {
            let secs = if s.user_id().0 == 0 { 1e30 } else { 1.0 };
            s.set("wait", secs)
        })
        .pause("#{wait}")
        .exec(|s| s.set("after", true));
    let scenario = Scenario::new("huge-pause", chain).unwrap();
    let engine = Engine::new(EngineConfig::new().at_once(3)).unwrap();

    let summary = engine.run(&scenario).await.unwrap();
    assert_eq!(summary.panicked, 0);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 1);
    assert!(summary.outcomes[0].is_failed());
    assert!(summary.outcomes.iter().all(|o| o.session.contains("after")));
}
