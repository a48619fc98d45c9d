//! End-to-end controller scenarios against the scripted MAC engine.

use lorawan_node::{
    Callbacks, ChannelPlan, ControllerConfig, DataRate, LoraController, LoraError,
    MemorySessionStore, MockMacEngine, MockScript, MockState, OutboundMessage, RadioIdentity,
    RadioSession, SessionManager, SessionStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_config() -> ControllerConfig {
    ControllerConfig {
        join_budget: Duration::from_secs(5),
        join_tier_base: Duration::from_millis(100),
        join_tier_max: Duration::from_millis(400),
        join_jitter: (Duration::from_millis(1), Duration::from_millis(2)),
        send_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(1),
        sync_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

fn memory_sessions() -> SessionManager {
    SessionManager::new(Box::new(MemorySessionStore::new()))
}

async fn start_with(
    script: MockScript,
    sessions: SessionManager,
    slept_secs: u32,
    callbacks: Callbacks,
) -> (LoraController, Arc<Mutex<MockState>>) {
    let engine = MockMacEngine::new(script);
    let state = engine.state_handle();
    let controller = LoraController::start(
        RadioIdentity::new([0x26, 0x01, 0x14, 0xAF, 0, 0, 0, 1], [0x2B; 16]),
        ChannelPlan::eu868(),
        Box::new(engine),
        sessions,
        test_config(),
        callbacks,
        slept_secs,
    )
    .await
    .expect("controller start");
    (controller, state)
}

#[tokio::test]
async fn fresh_device_joins_on_third_escalation_tier() {
    let script = MockScript {
        join_outcomes: vec![false, false, true],
        device_address: 0x2601_0042,
        ..Default::default()
    };
    let (controller, state) = start_with(script, memory_sessions(), 0, Callbacks::new()).await;

    controller.join().await.expect("join");
    // Give the background task a pass to apply the link-check request.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(controller.has_joined());
    assert_eq!(controller.device_address().unwrap(), 0x2601_0042);

    let state = state.lock().unwrap();
    assert_eq!(
        state.join_starts,
        vec![DataRate::SF7, DataRate::SF8, DataRate::SF9]
    );
    // Never regresses to a faster tier within one campaign.
    for pair in state.join_starts.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
    assert!(state.link_check);
}

#[tokio::test]
async fn join_budget_exhaustion_reports_timeout_and_stays_retryable() {
    let script = MockScript {
        join_outcomes: vec![],
        ..Default::default()
    };
    let mut config = test_config();
    config.join_budget = Duration::from_millis(120);
    config.join_tier_base = Duration::from_millis(30);

    let engine = MockMacEngine::new(script);
    let state = engine.state_handle();
    let controller = LoraController::start(
        RadioIdentity::new([1; 8], [2; 16]),
        ChannelPlan::eu868(),
        Box::new(engine),
        memory_sessions(),
        config,
        Callbacks::new(),
        0,
    )
    .await
    .unwrap();

    assert!(matches!(
        controller.join().await,
        Err(LoraError::JoinTimeout)
    ));
    assert!(!controller.has_joined());

    // A later campaign may succeed; the failure is not terminal.
    let attempts_so_far = state.lock().unwrap().join_starts.len();
    state.lock().unwrap().script.join_outcomes = vec![true; attempts_so_far + 1];
    controller.join().await.expect("second campaign");
    assert!(controller.has_joined());
}

#[tokio::test]
async fn restored_session_joins_immediately_without_radio_handshake() {
    let store = MemorySessionStore::new();
    let snapshot = RadioSession {
        joined: true,
        device_address: 0x2601_0099,
        frame_counter_up: 17,
        per_band_availability: [62_500, 125_000, 0, 31_250],
        global_duty_availability: 250_000,
        link_check_enabled: true,
    };
    store
        .save(&serde_json::to_vec(&snapshot).unwrap())
        .unwrap();
    let sessions = SessionManager::new(Box::new(store));

    // Slept long past every availability timestamp.
    let (controller, state) = start_with(MockScript::default(), sessions, 3600, Callbacks::new()).await;

    controller.join().await.expect("resume");

    assert!(controller.has_joined());
    assert_eq!(controller.device_address().unwrap(), 0x2601_0099);
    let session = controller.session();
    assert_eq!(session.frame_counter_up, 17);
    assert_eq!(session.per_band_availability, [0, 0, 0, 0]);
    assert_eq!(session.global_duty_availability, 0);

    let state = state.lock().unwrap();
    assert!(state.join_starts.is_empty());
    assert!(state.link_check);
    assert_eq!(state.applied_sessions.len(), 1);
}

#[tokio::test]
async fn each_send_consumes_exactly_one_frame_counter() {
    let (controller, state) = start_with(MockScript::default(), memory_sessions(), 0, Callbacks::new()).await;
    controller.join().await.unwrap();

    for _ in 0..3 {
        let message = OutboundMessage::new(1, vec![0xA0, 0x17]).unwrap();
        controller
            .send(message, Duration::from_millis(500))
            .await
            .expect("send");
    }

    assert_eq!(controller.session().frame_counter_up, 3);
    let state = state.lock().unwrap();
    assert_eq!(state.tx_log.len(), 3);
    assert_eq!(state.frame_counter(), 3);
}

#[tokio::test]
async fn snapshot_reflects_post_increment_counter_across_a_power_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let sessions = SessionManager::new(Box::new(lorawan_node::FileSessionStore::new(&path)));
    let (controller, _state) = start_with(MockScript::default(), sessions, 0, Callbacks::new()).await;
    controller.join().await.unwrap();
    controller
        .send(
            OutboundMessage::new(5, vec![1, 2, 3]).unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
    controller.prepare_for_sleep(0).await.unwrap();
    controller.shutdown().await;

    // Next boot.
    let sessions = SessionManager::new(Box::new(lorawan_node::FileSessionStore::new(&path)));
    let restored = sessions.restore(0).expect("session survives");
    assert!(restored.joined);
    assert_eq!(restored.frame_counter_up, 1);
}

#[tokio::test]
async fn send_while_pending_is_refused_immediately_and_stale_completion_is_discarded() {
    let script = MockScript {
        auto_complete_tx: false,
        ..Default::default()
    };
    let (controller, state) = start_with(script, memory_sessions(), 0, Callbacks::new()).await;
    controller.join().await.unwrap();

    // First send is never confirmed and times out; the message is abandoned.
    let first = controller
        .send(
            OutboundMessage::new(1, vec![0x01]).unwrap(),
            Duration::from_millis(80),
        )
        .await;
    assert!(matches!(first, Err(LoraError::SendTimeout(_))));

    // The engine still reports the transmission pending: busy, not blocking.
    let busy = controller
        .send(
            OutboundMessage::new(1, vec![0x02]).unwrap(),
            Duration::from_millis(80),
        )
        .await;
    assert!(matches!(busy, Err(LoraError::ChannelBusy)));

    // Engine finally completes the abandoned send with nobody waiting.
    state.lock().unwrap().complete_tx();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The stale completion must not satisfy the next send: with the engine
    // again holding the confirmation, a fresh send times out instead of
    // consuming the orphaned flag.
    let third = controller
        .send(
            OutboundMessage::new(1, vec![0x03]).unwrap(),
            Duration::from_millis(80),
        )
        .await;
    assert!(matches!(third, Err(LoraError::SendTimeout(_))));
    state.lock().unwrap().complete_tx();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Normal service resumes once the engine confirms promptly.
    state.lock().unwrap().script.auto_complete_tx = true;
    controller
        .send(
            OutboundMessage::new(1, vec![0x04]).unwrap(),
            Duration::from_millis(500),
        )
        .await
        .expect("send after recovery");

    assert_eq!(state.lock().unwrap().tx_log.len(), 3);
}

#[tokio::test]
async fn queue_is_a_single_slot_and_drain_sends_the_latest_once() {
    let (controller, state) = start_with(MockScript::default(), memory_sessions(), 0, Callbacks::new()).await;
    controller.join().await.unwrap();

    controller.queue(2, vec![0x01, 0x01]).unwrap();
    controller.queue(2, vec![0x02, 0x02]).unwrap();
    controller.drain().await;
    controller.drain().await;

    let state = state.lock().unwrap();
    assert_eq!(state.tx_log, vec![(2, vec![0x02, 0x02])]);
}

#[tokio::test]
async fn empty_queue_discards_without_sending() {
    let (controller, state) = start_with(MockScript::default(), memory_sessions(), 0, Callbacks::new()).await;
    controller.queue(2, vec![0xFF]).unwrap();
    controller.empty_queue();
    controller.drain().await;
    assert!(state.lock().unwrap().tx_log.is_empty());
}

#[tokio::test]
async fn misconfigured_messages_never_reach_the_engine() {
    let (controller, state) = start_with(MockScript::default(), memory_sessions(), 0, Callbacks::new()).await;

    assert!(matches!(
        OutboundMessage::new(1, vec![0u8; 70]),
        Err(LoraError::PayloadTooLarge { len: 70, max: 64 })
    ));
    assert!(matches!(
        controller.queue(0, vec![1]),
        Err(LoraError::InvalidPort(0))
    ));
    controller.drain().await;

    assert!(state.lock().unwrap().tx_log.is_empty());
}

#[tokio::test]
async fn downlinks_are_forwarded_verbatim_to_the_application() {
    let script = MockScript {
        downlink_after_tx: Some((42, vec![0xDE, 0xAD])),
        ..Default::default()
    };
    let received: Arc<Mutex<Vec<(u8, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let callbacks = Callbacks::new().with_downlink(move |port, payload| {
        sink.lock().unwrap().push((port, payload.to_vec()));
    });

    let (controller, _state) = start_with(script, memory_sessions(), 0, callbacks).await;
    controller.join().await.unwrap();
    controller
        .send(
            OutboundMessage::new(1, vec![0x00]).unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(&*received.lock().unwrap(), &[(42, vec![0xDE, 0xAD])]);
}

#[tokio::test]
async fn network_time_is_corrected_and_reported_through_the_callback() {
    let script = MockScript {
        time_answer: Some(Some(1_700_000_000)),
        ..Default::default()
    };
    let corrected: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&corrected);
    let callbacks = Callbacks::new().with_time_corrected(move |epoch| {
        *sink.lock().unwrap() = Some(epoch);
    });

    let (controller, _state) = start_with(script, memory_sessions(), 0, callbacks).await;
    controller.request_network_time().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let epoch = corrected.lock().unwrap().expect("time corrected");
    assert!(epoch >= 1_700_000_000);
}

#[tokio::test]
async fn unusable_time_answer_reports_failure_and_frees_the_request_slot() {
    // The network answers, but without a usable time reference.
    let script = MockScript {
        time_answer: Some(None),
        ..Default::default()
    };
    let failures: Arc<Mutex<Vec<LoraError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let callbacks = Callbacks::new().with_time_failed(move |e| {
        sink.lock().unwrap().push(e);
    });

    let (controller, state) = start_with(script, memory_sessions(), 0, callbacks).await;
    controller.request_network_time().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(matches!(
        failures.lock().unwrap().as_slice(),
        [LoraError::TimeSyncUnavailable]
    ));

    // The answered request no longer counts as outstanding, so a later
    // request reaches the engine again.
    controller.request_network_time().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(state.lock().unwrap().time_requests, 2);
}

#[tokio::test]
async fn only_one_time_request_is_outstanding_at_a_time() {
    // The network never answers, so the first request stays outstanding.
    let script = MockScript {
        time_answer: None,
        ..Default::default()
    };
    let (controller, state) = start_with(script, memory_sessions(), 0, Callbacks::new()).await;

    controller.request_network_time().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.request_network_time().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(state.lock().unwrap().time_requests, 1);
}

#[tokio::test]
async fn factory_reset_is_the_only_path_that_destroys_a_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let sessions = SessionManager::new(Box::new(lorawan_node::FileSessionStore::new(&path)));

    let (controller, state) = start_with(MockScript::default(), sessions, 0, Callbacks::new()).await;
    controller.join().await.unwrap();
    controller
        .send(
            OutboundMessage::new(1, vec![1]).unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();
    controller.prepare_for_sleep(0).await.unwrap();

    controller.factory_reset().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!controller.has_joined());
    assert!(state.lock().unwrap().resets >= 1);
    let sessions = SessionManager::new(Box::new(lorawan_node::FileSessionStore::new(&path)));
    assert!(sessions.restore(0).is_none());
}

#[tokio::test]
async fn set_joined_overrides_the_in_memory_state_only() {
    let (controller, state) = start_with(MockScript::default(), memory_sessions(), 0, Callbacks::new()).await;
    assert!(!controller.has_joined());

    controller.set_joined(true);
    assert!(controller.has_joined());

    controller.set_joined(false);
    assert!(!controller.has_joined());
    assert!(matches!(
        controller.device_address(),
        Err(LoraError::NoSession)
    ));
    assert!(state.lock().unwrap().join_starts.is_empty());
}
