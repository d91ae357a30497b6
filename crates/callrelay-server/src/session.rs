//! Call Session orchestrator.
//!
//! [`run_call`] owns both legs of one call. It waits for the telephony
//! stream to start, resolves the call's context, opens the engine leg and
//! then runs two pumps side by side:
//!
//! - inbound: telephony frames to engine audio, keypad handoff, hangup
//! - outbound: engine audio to telephony, barge-in, function calls
//!
//! Whichever of the pumps or the idle watchdog finishes first starts the
//! drain; the other pump is dropped at its next suspension point, the
//! transfer decision is stored, and both legs are closed.

use crate::config::Config;
use crate::dispatcher::{DispatchOutcome, FunctionDispatcher};
use crate::error::CallError;
use crate::state::SessionState;
use crate::telephony::{OutboundFrame, TelephonyFrame};
use crate::watchdog;
use callrelay_knowledge::{KnowledgeClient, RetrievalContext, RetryPolicy};
use callrelay_transfer::TransferStore;
use callrelay_types::{CallParameters, CallPhase, DrainReason, TransferDecision, HANDOFF_DIGIT};
use callrelay_voice::{
    AudioFormat, ClientEvent, EngineConnector, Link, MediaCodec, ServerEvent, SessionSettings,
    VoiceError, KNOWLEDGE_TOOL,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-process settings every call session starts from.
#[derive(Clone)]
pub struct CallSettings {
    /// Sent to the engine as `session.update` when the call starts.
    pub engine_session: SessionSettings,
    /// Knowledge credential for calls that do not carry their own.
    pub default_api_key: Option<String>,
    pub persona: Option<String>,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
    pub watchdog_poll: Duration,
    pub max_retrieval_failures: u32,
    /// Pre-framed filler audio; empty when no filler is configured.
    pub filler_frames: Arc<[String]>,
}

impl CallSettings {
    /// Builds settings from configuration, reading the filler audio file if one is set.
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let format = AudioFormat::G711Ulaw;
        let filler_frames: Vec<String> = match &config.session.filler_audio_path {
            Some(path) => MediaCodec::new(format).frames(&std::fs::read(path)?),
            None => Vec::new(),
        };

        Ok(Self {
            engine_session: SessionSettings::from_config(&config.realtime, format),
            default_api_key: config
                .knowledge
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            persona: config.knowledge.persona.clone(),
            retry: RetryPolicy::new(
                config.knowledge.max_retries,
                Duration::from_millis(config.knowledge.retry_backoff_ms),
            ),
            idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
            watchdog_poll: Duration::from_millis(config.session.watchdog_poll_ms),
            max_retrieval_failures: config.session.max_retrieval_failures,
            filler_frames: filler_frames.into(),
        })
    }
}

impl fmt::Debug for CallSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSettings")
            .field("default_api_key", &self.default_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("persona", &self.persona)
            .field("retry", &self.retry)
            .field("idle_timeout", &self.idle_timeout)
            .field("watchdog_poll", &self.watchdog_poll)
            .field("max_retrieval_failures", &self.max_retrieval_failures)
            .field("filler_frames", &self.filler_frames.len())
            .finish()
    }
}

/// Collaborators shared by all sessions.
#[derive(Clone)]
pub struct SessionServices {
    pub engine: Arc<dyn EngineConnector>,
    pub knowledge: Arc<dyn KnowledgeClient>,
    pub transfers: Arc<dyn TransferStore>,
    pub settings: Arc<CallSettings>,
}

/// Everything known about a call once its stream has started.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: String,
    pub stream_sid: String,
    pub call_sid: Option<String>,
    pub transfer_number: Option<String>,
    pub introduction: Option<String>,
    pub caller: Option<String>,
    /// Knowledge-service identity bound to this call.
    pub retrieval: RetrievalContext,
}

impl CallContext {
    /// Resolves the start frame's parameters against the configured defaults.
    ///
    /// A call without a project id, or without a knowledge credential from
    /// either the parameters or the configuration, is rejected.
    pub fn resolve(
        session_id: &str,
        stream_sid: String,
        call_sid: Option<String>,
        params: &CallParameters,
        settings: &CallSettings,
    ) -> Result<Self, CallError> {
        let params = params.normalized();
        let project_id = params
            .project_id
            .ok_or_else(|| CallError::Configuration("missing project_id".to_string()))?;
        let api_key = params
            .api_key
            .or_else(|| settings.default_api_key.clone())
            .ok_or_else(|| {
                CallError::Configuration(
                    "no knowledge api key in the call parameters or configuration".to_string(),
                )
            })?;

        Ok(Self {
            session_id: session_id.to_string(),
            stream_sid,
            call_sid,
            transfer_number: params.phone_number,
            introduction: params.introduction,
            caller: params.caller,
            retrieval: RetrievalContext {
                project_id,
                session_id: session_id.to_string(),
                api_key,
                persona: settings.persona.clone(),
            },
        })
    }
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub session_id: String,
    pub reason: DrainReason,
    pub decision: TransferDecision,
}

enum Bootstrap {
    Started {
        stream_sid: String,
        call_sid: Option<String>,
        parameters: CallParameters,
    },
    Ended(DrainReason),
}

/// Runs one call from the telephony leg's first frame to teardown.
///
/// Returns an error only when the call could not be relayed at all: bad
/// call parameters or an unreachable engine. In every case the transfer
/// decision is recorded and both legs are closed before returning.
pub async fn run_call(
    session_id: impl Into<String>,
    telephony: Link,
    services: SessionServices,
) -> Result<CallOutcome, CallError> {
    let state = SessionState::new(session_id);
    let settings = services.settings.clone();
    let transfers = services.transfers.as_ref();
    let (telephony_tx, mut telephony_rx) = telephony.split();

    let bootstrap = match tokio::time::timeout(
        settings.idle_timeout,
        await_start(&state, &mut telephony_rx),
    )
    .await
    {
        Ok(bootstrap) => bootstrap,
        Err(_) => {
            warn!(session_id = %state.session_id(), "no stream start before the idle threshold");
            Bootstrap::Ended(DrainReason::IdleTimeout)
        }
    };

    let (stream_sid, call_sid, parameters) = match bootstrap {
        Bootstrap::Started {
            stream_sid,
            call_sid,
            parameters,
        } => (stream_sid, call_sid, parameters),
        Bootstrap::Ended(reason) => {
            state.begin_drain(reason);
            return Ok(teardown(&state, transfers, telephony_tx, None, None).await);
        }
    };

    state.set_stream_sid(stream_sid.as_str());
    let ctx = match CallContext::resolve(state.session_id(), stream_sid, call_sid, &parameters, &settings) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(session_id = %state.session_id(), error = %e, "rejecting call");
            state.begin_drain(DrainReason::Rejected);
            teardown(&state, transfers, telephony_tx, None, None).await;
            return Err(e);
        }
    };
    info!(
        session_id = %ctx.session_id,
        stream_sid = %ctx.stream_sid,
        call_sid = ?ctx.call_sid,
        project_id = %ctx.retrieval.project_id,
        caller = ?ctx.caller,
        transfer_available = ctx.transfer_number.is_some(),
        "stream started"
    );

    let engine = match services.engine.connect().await {
        Ok(link) => link,
        Err(e) => {
            let err = match CallError::from(e) {
                CallError::UpstreamDisconnect(msg) => CallError::UpstreamDisconnect(msg),
                other => CallError::UpstreamDisconnect(other.to_string()),
            };
            error!(session_id = %ctx.session_id, error = %err, "could not reach the speech engine");
            state.begin_drain(DrainReason::EngineDisconnect);
            teardown(&state, transfers, telephony_tx, None, None).await;
            return Err(err);
        }
    };
    let (engine_tx, mut engine_rx) = engine.split();

    if let Err(e) = configure_engine(&engine_tx, &settings, &ctx).await {
        warn!(session_id = %ctx.session_id, error = %e, "engine closed during setup");
        state.begin_drain(DrainReason::EngineDisconnect);
        return Ok(teardown(&state, transfers, telephony_tx, Some(engine_tx), None).await);
    }

    state.advance(CallPhase::Active);
    state.touch();
    let drain = state.subscribe_drain();
    let watchdog = watchdog::spawn(state.clone(), settings.idle_timeout, settings.watchdog_poll);

    let relay = Relay {
        state: &state,
        ctx: &ctx,
        codec: MediaCodec::new(AudioFormat::G711Ulaw),
        dispatcher: FunctionDispatcher::new(
            services.knowledge.clone(),
            settings.retry,
            settings.max_retrieval_failures,
        ),
        telephony: &telephony_tx,
        engine: &engine_tx,
        filler: &settings.filler_frames,
    };

    let reason = tokio::select! {
        biased;
        reason = drained(drain) => reason,
        reason = relay.pump_inbound(&mut telephony_rx) => reason,
        reason = relay.pump_outbound(&mut engine_rx) => reason,
    };
    state.begin_drain(reason);
    drop(relay);
    drop(telephony_rx);
    drop(engine_rx);

    Ok(teardown(&state, transfers, telephony_tx, Some(engine_tx), Some(watchdog)).await)
}

/// Reads telephony frames until the stream starts or the caller leaves.
async fn await_start(state: &SessionState, rx: &mut mpsc::Receiver<String>) -> Bootstrap {
    let mut rejected: u32 = 0;
    loop {
        let Some(text) = rx.recv().await else {
            return Bootstrap::Ended(DrainReason::CallerHangup);
        };
        match TelephonyFrame::decode(&text) {
            Ok(TelephonyFrame::Start {
                stream_sid,
                call_sid,
                parameters,
            }) => {
                if rejected > 0 {
                    debug!(session_id = %state.session_id(), rejected, "media frames arrived before stream start");
                }
                return Bootstrap::Started {
                    stream_sid,
                    call_sid,
                    parameters,
                };
            }
            Ok(TelephonyFrame::Media { .. }) => {
                rejected += 1;
                debug!(session_id = %state.session_id(), rejected, "rejecting media before stream start");
            }
            Ok(TelephonyFrame::Stop) => {
                info!(session_id = %state.session_id(), "caller left before the stream started");
                return Bootstrap::Ended(DrainReason::CallerHangup);
            }
            Ok(other) => {
                debug!(session_id = %state.session_id(), frame = ?other, "ignoring frame before stream start");
            }
            Err(e) => {
                warn!(session_id = %state.session_id(), error = %e, "dropping telephony frame");
            }
        }
    }
}

/// Sends the initial session configuration and the optional greeting.
async fn configure_engine(
    engine: &mpsc::Sender<String>,
    settings: &CallSettings,
    ctx: &CallContext,
) -> Result<(), VoiceError> {
    let mut events = vec![ClientEvent::SessionUpdate {
        session: settings.engine_session.clone(),
    }];
    if let Some(introduction) = &ctx.introduction {
        events.push(ClientEvent::user_text(format!(
            "Greet the caller with this introduction: '{}'",
            introduction
        )));
        events.push(ClientEvent::ResponseCreate);
    }
    for event in events {
        engine
            .send(event.to_json()?)
            .await
            .map_err(|_| VoiceError::LinkClosed)?;
    }
    debug!(session_id = %ctx.session_id, "engine session configured");
    Ok(())
}

/// Resolves with the drain reason once any trigger starts draining.
async fn drained(mut rx: watch::Receiver<Option<DrainReason>>) -> DrainReason {
    loop {
        if let Some(reason) = *rx.borrow_and_update() {
            return reason;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Stores the decision, then closes the engine leg, the telephony leg and the watchdog.
async fn teardown(
    state: &SessionState,
    transfers: &dyn TransferStore,
    telephony: mpsc::Sender<String>,
    engine: Option<mpsc::Sender<String>>,
    watchdog: Option<JoinHandle<()>>,
) -> CallOutcome {
    let decision = state.decision();
    if let Err(e) = transfers.record(state.session_id(), decision).await {
        error!(session_id = %state.session_id(), error = %e, "failed to store transfer decision");
    }

    if let Some(engine) = engine {
        match ClientEvent::ResponseCancel.to_json() {
            Ok(cancel) => {
                if let Err(e) = engine.try_send(cancel) {
                    debug!(session_id = %state.session_id(), error = %e, "engine cancel not delivered");
                }
            }
            Err(e) => debug!(error = %e, "could not encode cancel"),
        }
        drop(engine);
    }
    drop(telephony);

    if let Some(handle) = watchdog {
        handle.abort();
    }
    state.advance(CallPhase::Closed);

    let reason = state.drain_reason().unwrap_or(DrainReason::CallerHangup);
    info!(
        session_id = %state.session_id(),
        stream_sid = ?state.stream_sid(),
        %reason,
        decision = %decision,
        "session closed"
    );
    CallOutcome {
        session_id: state.session_id().to_string(),
        reason,
        decision,
    }
}

/// Speech emitted towards the caller, tracked for barge-in.
#[derive(Debug, Default)]
struct Playback {
    /// Audio was forwarded since the last flush.
    audio_sent: bool,
    /// The engine is still generating the current response.
    responding: bool,
    response_id: Option<String>,
    /// Response cancelled by the last barge-in; its trailing deltas are dropped.
    cancelled: Option<String>,
}

struct Relay<'a> {
    state: &'a SessionState,
    ctx: &'a CallContext,
    codec: MediaCodec,
    dispatcher: FunctionDispatcher,
    telephony: &'a mpsc::Sender<String>,
    engine: &'a mpsc::Sender<String>,
    filler: &'a [String],
}

impl Relay<'_> {
    async fn send_engine(&self, event: &ClientEvent) -> Result<(), VoiceError> {
        let text = event.to_json()?;
        self.engine.send(text).await.map_err(|_| VoiceError::LinkClosed)
    }

    async fn send_caller(&self, frame: OutboundFrame<'_>) -> bool {
        self.telephony.send(frame.to_json()).await.is_ok()
    }

    async fn pump_inbound(&self, rx: &mut mpsc::Receiver<String>) -> DrainReason {
        let session_id = self.ctx.session_id.as_str();
        loop {
            let Some(text) = rx.recv().await else {
                info!(session_id, "telephony leg closed");
                return DrainReason::CallerHangup;
            };
            let frame = match TelephonyFrame::decode(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(session_id, error = %e, "dropping telephony frame");
                    continue;
                }
            };

            match frame {
                TelephonyFrame::Media { payload } => {
                    let audio = match self.codec.to_engine(&payload) {
                        Ok(audio) => audio,
                        Err(e) => {
                            debug!(session_id, error = %e, "dropping media payload");
                            continue;
                        }
                    };
                    if self
                        .send_engine(&ClientEvent::InputAudioAppend { audio })
                        .await
                        .is_err()
                    {
                        return DrainReason::EngineDisconnect;
                    }
                }
                TelephonyFrame::Dtmf { digit } => {
                    self.state.touch();
                    info!(session_id, %digit, "keypad digit");
                    if digit == HANDOFF_DIGIT {
                        self.state.request_transfer();
                        return DrainReason::TransferRequested;
                    }
                }
                TelephonyFrame::Stop => {
                    info!(session_id, "caller hung up");
                    return DrainReason::CallerHangup;
                }
                TelephonyFrame::Start { stream_sid, .. } => {
                    warn!(session_id, %stream_sid, "ignoring repeated stream start");
                }
                TelephonyFrame::Mark { name } => {
                    debug!(session_id, mark = ?name, "playback mark");
                }
                TelephonyFrame::Connected => {}
                TelephonyFrame::Other { kind } => {
                    debug!(session_id, %kind, "ignoring telephony event");
                }
            }
        }
    }

    async fn pump_outbound(&self, rx: &mut mpsc::Receiver<String>) -> DrainReason {
        let session_id = self.ctx.session_id.as_str();
        let mut playback = Playback::default();
        loop {
            let Some(text) = rx.recv().await else {
                warn!(session_id, "engine leg closed");
                return DrainReason::EngineDisconnect;
            };
            let event = match ServerEvent::decode(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!(session_id, error = %e, "dropping engine event");
                    continue;
                }
            };
            if event.is_logged() {
                info!(session_id, kind = event.kind(), "engine event");
            } else {
                debug!(session_id, kind = event.kind(), "engine event");
            }

            match event {
                ServerEvent::SpeechStarted { .. } => {
                    self.state.touch();
                    if let Some(reason) = self.barge_in(&mut playback).await {
                        return reason;
                    }
                }
                ServerEvent::AudioDelta { response_id, delta } => {
                    if response_id.is_some() && response_id == playback.cancelled {
                        debug!(session_id, "dropping audio from a cancelled response");
                        continue;
                    }
                    let payload = match self.codec.to_telephony(&delta) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(session_id, error = %e, "dropping speech delta");
                            continue;
                        }
                    };
                    if !self
                        .send_caller(OutboundFrame::media(&self.ctx.stream_sid, &payload))
                        .await
                    {
                        return DrainReason::CallerHangup;
                    }
                    self.state.touch();
                    playback.audio_sent = true;
                    playback.responding = true;
                    playback.response_id = response_id;
                }
                ServerEvent::ResponseDone { response_id } => {
                    if playback.response_id.is_none() || playback.response_id == response_id {
                        playback.responding = false;
                    }
                }
                ServerEvent::FunctionCallRequested {
                    name,
                    call_id,
                    arguments,
                } => {
                    if let Some(reason) = self.run_function(&name, &call_id, &arguments).await {
                        return reason;
                    }
                }
                ServerEvent::Error { message } => {
                    warn!(session_id, %message, "engine reported an error");
                }
                ServerEvent::SessionAcknowledged { .. } | ServerEvent::Informational { .. } => {}
            }
        }
    }

    /// Flushes queued caller audio and cancels the engine's response.
    async fn barge_in(&self, playback: &mut Playback) -> Option<DrainReason> {
        if !playback.audio_sent && !playback.responding {
            return None;
        }
        info!(
            session_id = %self.ctx.session_id,
            response_id = ?playback.response_id,
            "caller interrupted playback"
        );
        if playback.audio_sent {
            if !self.send_caller(OutboundFrame::clear(&self.ctx.stream_sid)).await {
                return Some(DrainReason::CallerHangup);
            }
            playback.audio_sent = false;
        }
        if playback.responding {
            if self.send_engine(&ClientEvent::ResponseCancel).await.is_err() {
                return Some(DrainReason::EngineDisconnect);
            }
            playback.cancelled = playback.response_id.take();
            playback.responding = false;
        }
        None
    }

    /// Dispatches one function call and answers it.
    ///
    /// The function result is sent strictly before the `response.create`
    /// that continues the turn. The outbound pump is parked here until the
    /// dispatch returns: engine events queue up behind it, so a barge-in
    /// during a lookup is handled only afterwards, and the filler cue has
    /// already been handed to the telephony leg by then. The dispatch guard
    /// keeps the watchdog from counting that time as idle.
    async fn run_function(&self, name: &str, call_id: &str, arguments: &str) -> Option<DrainReason> {
        let session_id = self.ctx.session_id.as_str();
        info!(session_id, call_id, function = name, "function call requested");
        let _pending = self.state.begin_dispatch();

        let dispatch = self.dispatcher.dispatch(name, arguments, self.ctx, self.state);
        let outcome = if name == KNOWLEDGE_TOOL && !self.filler.is_empty() {
            let (outcome, played) = tokio::join!(dispatch, self.play_filler());
            if played && !self.send_caller(OutboundFrame::clear(&self.ctx.stream_sid)).await {
                return Some(DrainReason::CallerHangup);
            }
            outcome
        } else {
            dispatch.await
        };

        match outcome {
            DispatchOutcome::Output(output) => {
                let answered = self
                    .send_engine(&ClientEvent::function_output(call_id, output))
                    .await;
                if answered.is_err() || self.send_engine(&ClientEvent::ResponseCreate).await.is_err() {
                    return Some(DrainReason::EngineDisconnect);
                }
                debug!(session_id, call_id, "function result sent");
                None
            }
            DispatchOutcome::Handoff { .. } => {
                self.state.request_transfer();
                Some(DrainReason::TransferRequested)
            }
        }
    }

    /// Queues the filler cue on the telephony leg. Returns whether any frame was sent.
    async fn play_filler(&self) -> bool {
        let mut sent = false;
        for frame in self.filler {
            if !self
                .send_caller(OutboundFrame::media(&self.ctx.stream_sid, frame))
                .await
            {
                break;
            }
            sent = true;
        }
        sent
    }
}
