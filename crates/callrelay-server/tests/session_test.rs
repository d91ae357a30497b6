mod common;

use callrelay_server::dispatcher::RETRIEVAL_FALLBACK;
use callrelay_knowledge::RetryPolicy;
use callrelay_server::error::CallError;
use callrelay_transfer::TransferStore;
use callrelay_types::{DrainReason, TransferDecision};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn missing_project_rejects_call_without_engine() {
    let mut call = Setup::new().start();
    call.send(start_frame(json!({"api_key": "k"}))).await;

    // The telephony leg is closed without any frame.
    assert_eq!(call.caller_frame().await, None);

    let result = call.handle.await.unwrap();
    assert!(matches!(result, Err(CallError::Configuration(_))), "{:?}", result);
    assert!(call.engines.try_recv().is_err());
    assert_eq!(
        call.store.get(SESSION_ID).await.unwrap(),
        Some(TransferDecision::None)
    );
}

#[tokio::test]
async fn missing_credential_rejects_call() {
    let mut setup = Setup::new();
    setup.settings.default_api_key = None;
    let call = setup.start();
    call.send(start_frame(json!({"project_id": "4242"}))).await;

    let result = call.outcome().await;
    assert!(matches!(result, Err(CallError::Configuration(_))), "{:?}", result);
}

#[tokio::test]
async fn media_before_start_is_not_forwarded() {
    let mut call = Setup::new().start();
    call.send(media("AAAA")).await;
    call.send(media("AAAA")).await;
    call.send(default_start()).await;
    call.send(media("/w==")).await;

    let mut engine = call.engine().await;
    let update = expect_event(&mut engine, "session.update").await;
    assert_eq!(update["session"]["input_audio_format"], "g711_ulaw");
    let append = expect_event(&mut engine, "input_audio_buffer.append").await;
    assert_eq!(append["audio"], "/w==");

    call.send(stop()).await;
    expect_event(&mut engine, "response.cancel").await;
    assert!(recv_json(&mut engine.rx).await.is_none());

    let store = call.store.clone();
    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.reason, DrainReason::CallerHangup);
    assert_eq!(outcome.decision, TransferDecision::None);
    assert_eq!(store.get(SESSION_ID).await.unwrap(), Some(TransferDecision::None));
}

#[tokio::test]
async fn introduction_is_requested_after_session_update() {
    let mut call = Setup::new().start();
    call.send(start_frame(json!({
        "project_id": "4242",
        "api_key": "k",
        "introduction": "Thanks for calling Acme."
    })))
    .await;

    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;
    let greeting = expect_event(&mut engine, "conversation.item.create").await;
    assert_eq!(greeting["item"]["type"], "message");
    assert_eq!(greeting["item"]["role"], "user");
    let text = greeting["item"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("Thanks for calling Acme."), "{}", text);
    expect_event(&mut engine, "response.create").await;

    call.send(stop()).await;
    assert_eq!(call.outcome().await.unwrap().reason, DrainReason::CallerHangup);
}

#[tokio::test]
async fn engine_audio_reaches_the_caller() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(&engine, audio_delta("resp_1", "AAAA")).await;
    let frame = call.caller_frame().await.unwrap();
    assert_eq!(
        frame,
        json!({"event": "media", "streamSid": STREAM_SID, "media": {"payload": "AAAA"}})
    );

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn barge_in_clears_caller_audio_and_cancels_response() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(&engine, audio_delta("resp_1", "AAAA")).await;
    assert_eq!(call.caller_frame().await.unwrap()["event"], "media");

    engine_send(&engine, speech_started()).await;
    assert_eq!(
        call.caller_frame().await.unwrap(),
        json!({"event": "clear", "streamSid": STREAM_SID})
    );
    expect_event(&mut engine, "response.cancel").await;

    // Trailing audio of the cancelled response is dropped.
    engine_send(&engine, audio_delta("resp_1", "AAAA")).await;
    engine_send(&engine, audio_delta("resp_2", "/w==")).await;
    let next = call.caller_frame().await.unwrap();
    assert_eq!(next["media"]["payload"], "/w==");

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn speech_without_playback_sends_nothing() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(&engine, speech_started()).await;
    engine_send(&engine, audio_delta("resp_1", "AAAA")).await;
    assert_eq!(call.caller_frame().await.unwrap()["event"], "media");

    call.send(stop()).await;
    // Only the teardown cancel follows.
    expect_event(&mut engine, "response.cancel").await;
    assert!(recv_json(&mut engine.rx).await.is_none());
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn keypad_zero_requests_transfer() {
    let mut call = Setup::new().start();
    call.send(start_frame(json!({
        "project_id": "4242",
        "api_key": "k",
        "phone_number": "+15550100"
    })))
    .await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    call.send(dtmf("5")).await;
    call.send(dtmf("0")).await;
    // Speech still in flight from the engine is not played after the digit.
    let _ = engine.tx.send(audio_delta("resp_1", "/w==").to_string()).await;

    assert_eq!(call.caller_frame().await, None);
    let store = call.store.clone();
    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.reason, DrainReason::TransferRequested);
    assert_eq!(outcome.decision, TransferDecision::TransferToHuman);
    assert_eq!(
        store.get(SESSION_ID).await.unwrap(),
        Some(TransferDecision::TransferToHuman)
    );
}

#[tokio::test]
async fn knowledge_result_precedes_response_create() {
    let mut setup = Setup::new();
    setup.knowledge = FakeKnowledge::answering(&[Some("We open at nine.")]);
    let mut call = setup.start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("get_additional_context", "call_1", r#"{"query":"opening hours"}"#),
    )
    .await;

    let output = expect_event(&mut engine, "conversation.item.create").await;
    assert_eq!(output["item"]["type"], "function_call_output");
    assert_eq!(output["item"]["call_id"], "call_1");
    assert_eq!(output["item"]["output"], "We open at nine.");
    expect_event(&mut engine, "response.create").await;

    {
        let seen = call.knowledge.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.project_id, "4242");
        assert_eq!(seen[0].0.session_id, SESSION_ID);
        assert_eq!(seen[0].0.api_key, "cgpt-key");
        assert_eq!(seen[0].1, "opening hours");
    }

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn default_credential_is_used_when_call_has_none() {
    let mut setup = Setup::new();
    setup.settings.default_api_key = Some("configured-key".to_string());
    setup.knowledge = FakeKnowledge::answering(&[Some("answer")]);
    let mut call = setup.start();
    call.send(start_frame(json!({"project_id": "4242"}))).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("get_additional_context", "call_1", r#"{"query":"q"}"#),
    )
    .await;
    expect_event(&mut engine, "conversation.item.create").await;

    assert_eq!(
        call.knowledge.seen.lock().unwrap()[0].0.api_key,
        "configured-key"
    );
    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn failed_retrieval_answers_with_fallback() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("get_additional_context", "call_9", r#"{"query":"refund policy"}"#),
    )
    .await;

    let output = expect_event(&mut engine, "conversation.item.create").await;
    assert_eq!(output["item"]["call_id"], "call_9");
    assert_eq!(output["item"]["output"], RETRIEVAL_FALLBACK);
    expect_event(&mut engine, "response.create").await;
    assert_eq!(call.knowledge.queries().len(), 3);

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn unknown_function_is_answered() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(&engine, function_call("book_flight", "call_2", "{}")).await;
    let output = expect_event(&mut engine, "conversation.item.create").await;
    assert_eq!(output["item"]["call_id"], "call_2");
    assert!(output["item"]["output"]
        .as_str()
        .unwrap()
        .contains("not available"));
    expect_event(&mut engine, "response.create").await;
    assert!(call.knowledge.queries().is_empty());

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn handoff_function_transfers_the_call() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("request_handoff", "call_3", r#"{"reason":"caller asked for a person"}"#),
    )
    .await;

    // No function result; only the teardown cancel.
    expect_event(&mut engine, "response.cancel").await;
    let store = call.store.clone();
    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.reason, DrainReason::TransferRequested);
    assert_eq!(
        store.get(SESSION_ID).await.unwrap(),
        Some(TransferDecision::TransferToHuman)
    );
}

#[tokio::test]
async fn filler_plays_while_retrieval_runs() {
    let mut setup = Setup::new();
    setup.settings.filler_frames = Arc::from(vec!["AAAA".to_string(), "AAAA".to_string()]);
    setup.knowledge = FakeKnowledge::answering(&[Some("answer")]);
    let mut call = setup.start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("get_additional_context", "call_1", r#"{"query":"q"}"#),
    )
    .await;

    assert_eq!(call.caller_frame().await.unwrap()["event"], "media");
    assert_eq!(call.caller_frame().await.unwrap()["event"], "media");
    assert_eq!(call.caller_frame().await.unwrap()["event"], "clear");
    expect_event(&mut engine, "conversation.item.create").await;
    expect_event(&mut engine, "response.create").await;

    call.send(stop()).await;
    call.outcome().await.unwrap();
}

#[tokio::test]
async fn engine_disconnect_closes_the_caller_leg() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    drop(engine);
    assert_eq!(call.caller_frame().await, None);

    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.reason, DrainReason::EngineDisconnect);
    assert_eq!(outcome.decision, TransferDecision::None);
}

#[tokio::test]
async fn unreachable_engine_fails_the_call() {
    let mut setup = Setup::new();
    setup.engine_fails = true;
    let call = setup.start();
    call.send(default_start()).await;

    let store = call.store.clone();
    let result = call.outcome().await;
    assert!(matches!(result, Err(CallError::UpstreamDisconnect(_))), "{:?}", result);
    assert_eq!(store.get(SESSION_ID).await.unwrap(), Some(TransferDecision::None));
}

#[tokio::test]
async fn caller_socket_close_is_a_hangup() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    let (tx, _rx) = tokio::sync::mpsc::channel(1);
    drop(std::mem::replace(&mut call.caller.tx, tx));

    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.reason, DrainReason::CallerHangup);
}

#[tokio::test]
async fn racing_triggers_record_one_decision() {
    let mut call = Setup::new().start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    call.send(dtmf("0")).await;
    call.send(stop()).await;
    drop(engine);

    let store = call.store.clone();
    let outcome = call.outcome().await.unwrap();
    assert_eq!(outcome.decision, TransferDecision::TransferToHuman);
    assert_eq!(store.len(), 1);
    assert_eq!(
        store.take(SESSION_ID).await.unwrap(),
        Some(TransferDecision::TransferToHuman)
    );
}

#[tokio::test(start_paused = true)]
async fn silent_call_drains_on_idle_timeout() {
    let mut setup = Setup::new();
    setup.settings.idle_timeout = Duration::from_secs(2);
    setup.settings.watchdog_poll = Duration::from_millis(500);
    let mut call = setup.start();
    call.send(default_start()).await;
    let mut engine = call.engine().await;
    expect_event(&mut engine, "session.update").await;

    let outcome = call.handle.await.unwrap().unwrap();
    assert_eq!(outcome.reason, DrainReason::IdleTimeout);
    assert_eq!(outcome.decision, TransferDecision::None);
    expect_event(&mut engine, "response.cancel").await;
}

#[tokio::test(start_paused = true)]
async fn stream_that_never_starts_times_out() {
    let mut setup = Setup::new();
    setup.settings.idle_timeout = Duration::from_secs(2);
    let mut call = setup.start();
    call.send(media("AAAA")).await;

    let outcome = call.handle.await.unwrap().unwrap();
    assert_eq!(outcome.reason, DrainReason::IdleTimeout);
    assert!(call.engines.try_recv().is_err());
    assert_eq!(
        call.store.get(SESSION_ID).await.unwrap(),
        Some(TransferDecision::None)
    );
}

#[tokio::test(start_paused = true)]
async fn slow_lookup_does_not_idle_out_the_call() {
    let mut setup = Setup::new();
    setup.settings.idle_timeout = Duration::from_secs(60);
    setup.settings.watchdog_poll = Duration::from_secs(1);
    setup.settings.retry = RetryPolicy::new(2, Duration::from_millis(500));
    setup.knowledge = FakeKnowledge::default().slow(Duration::from_secs(20));
    let mut call = setup.start();
    call.send(default_start()).await;
    let mut engine = call.engines.recv().await.unwrap();
    expect_event(&mut engine, "session.update").await;

    engine_send(
        &engine,
        function_call("get_additional_context", "call_slow", r#"{"query":"warranty terms"}"#),
    )
    .await;
    // The caller keeps talking while all three attempts run for 61 seconds.
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        engine_send(&engine, speech_started()).await;
    }

    let output: serde_json::Value =
        serde_json::from_str(&engine.rx.recv().await.unwrap()).unwrap();
    assert_eq!(output["type"], "conversation.item.create");
    assert_eq!(output["item"]["output"], RETRIEVAL_FALLBACK);
    let next: serde_json::Value = serde_json::from_str(&engine.rx.recv().await.unwrap()).unwrap();
    assert_eq!(next["type"], "response.create");
    assert_eq!(call.knowledge.queries().len(), 3);

    // The fallback gets its turn instead of being cancelled by an idle drain.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(engine.rx.try_recv().is_err());
    assert!(!call.handle.is_finished());

    call.send(stop()).await;
    let outcome = call.handle.await.unwrap().unwrap();
    assert_eq!(outcome.reason, DrainReason::CallerHangup);
}
