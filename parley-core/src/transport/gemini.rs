//! Gemini Live API transport over a websocket.
//!
//! Wire flow:
//!
//! ```text
//! connect ──► {"setup": {...}} ──► server {"setupComplete": {}} ──► on_open
//! frames  ──► {"realtimeInput": {"mediaChunks": [{"mimeType", "data"}]}}
//! server  ──► {"serverContent": {"modelTurn": {"parts": [{"inlineData"}|{"text"}]},
//!                                "interrupted": bool, "turnComplete": bool}}
//! ```
//!
//! One tokio task owns the socket and multiplexes the outbound queue with the
//! inbound stream. The queue is bounded: when the socket falls behind, new
//! frames are rejected with a transport error instead of piling up.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::{
    ConnectConfig, InlineAudio, ServerMessage, Transport, TransportCallbacks, TransportSession,
};
use crate::{
    codec::EncodedFrame,
    error::{ParleyError, Result},
};

/// Outbound frames buffered ahead of the socket (about 16 s at 4096/16 kHz).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveTransport {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Transport for GeminiLiveTransport {
    fn connect(
        &self,
        config: &ConnectConfig,
        callbacks: TransportCallbacks,
    ) -> Result<Arc<dyn TransportSession>> {
        if self.api_key.trim().is_empty() {
            return Err(ParleyError::Transport("no API key configured".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ParleyError::Transport("connect requires a tokio runtime".into()))?;

        let setup = serde_json::to_string(&setup_message(config))
            .map_err(|e| ParleyError::Transport(format!("serialize setup: {e}")))?;
        let url = format!("{}?key={}", self.endpoint, self.api_key.trim());

        let (session, outbound_rx) = GeminiLiveSession::new(OUTBOUND_QUEUE_CAPACITY);

        info!(model = %config.model, "connecting to Gemini Live");
        runtime.spawn(run_connection(
            url,
            setup,
            outbound_rx,
            callbacks,
            Arc::clone(&session.closed),
            Arc::clone(&session.close_signal),
        ));

        Ok(Arc::new(session))
    }
}

struct GeminiLiveSession {
    outbound: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl GeminiLiveSession {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            outbound,
            closed: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
        };
        (session, outbound_rx)
    }
}

impl TransportSession for GeminiLiveSession {
    fn send_realtime_input(&self, frame: &EncodedFrame) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ParleyError::NotConnected);
        }
        let json = serde_json::to_string(&RealtimeInputMessage::from_frame(frame))
            .map_err(|e| ParleyError::Transport(format!("serialize realtime input: {e}")))?;
        self.outbound.try_send(json).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ParleyError::Transport("outbound queue full; frame dropped".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ParleyError::Transport("connection task has exited".into())
            }
        })
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Stores a permit, so the task sees it even when not yet waiting.
        self.close_signal.notify_one();
        Ok(())
    }
}

async fn run_connection(
    url: String,
    setup: String,
    mut outbound: mpsc::Receiver<String>,
    callbacks: TransportCallbacks,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            closed.store(true, Ordering::Release);
            callbacks.on_error(format!("websocket connect failed: {e}"));
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink.send(Message::Text(setup.into())).await {
        closed.store(true, Ordering::Release);
        callbacks.on_error(format!("failed to send setup: {e}"));
        return;
    }
    debug!("setup sent, waiting for setupComplete");

    loop {
        tokio::select! {
            _ = close_signal.notified() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                debug!("websocket closed locally");
                break;
            }
            out = outbound.recv() => match out {
                Some(json) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        if !closed.swap(true, Ordering::AcqRel) {
                            error!("websocket send failed: {e}");
                            callbacks.on_error(format!("send failed: {e}"));
                        }
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    debug!("outbound queue dropped; websocket closed");
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), &callbacks),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(text, &callbacks),
                    Err(e) => warn!("non-UTF-8 binary frame ignored: {e}"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        warn!("failed to send pong: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    info!(reason = reason.as_deref().unwrap_or(""), "websocket closed by server");
                    if !closed.swap(true, Ordering::AcqRel) {
                        callbacks.on_close(reason);
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if !closed.swap(true, Ordering::AcqRel) {
                        error!("websocket error: {e}");
                        callbacks.on_error(e.to_string());
                    }
                    break;
                }
                None => {
                    if !closed.swap(true, Ordering::AcqRel) {
                        callbacks.on_close(None);
                    }
                    break;
                }
            },
        }
    }
}

fn dispatch(raw: &str, callbacks: &TransportCallbacks) {
    match parse_server_frame(raw) {
        Ok(ServerFrame::SetupComplete) => callbacks.on_open(),
        Ok(ServerFrame::Content(message)) => callbacks.on_message(message),
        Ok(ServerFrame::Ignored) => debug!("unhandled server frame"),
        Ok(ServerFrame::Empty) => debug!("server content without payload"),
        Err(e) => warn!("{e}"),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ServerFrame {
    SetupComplete,
    Content(ServerMessage),
    /// `serverContent` with nothing the session acts on.
    Empty,
    Ignored,
}

fn parse_server_frame(raw: &str) -> Result<ServerFrame> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ParleyError::Transport(format!("unparseable server frame: {e}")))?;

    if value.get("setupComplete").is_some() {
        return Ok(ServerFrame::SetupComplete);
    }
    let Some(content) = value.get("serverContent") else {
        return Ok(ServerFrame::Ignored);
    };

    let mut message = ServerMessage {
        interrupted: content
            .get("interrupted")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        turn_complete: content
            .get("turnComplete")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        ..ServerMessage::default()
    };

    let parts = content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array);
    let mut text = String::new();
    for part in parts.into_iter().flatten() {
        if let Some(inline) = part.get("inlineData") {
            if message.audio.is_none() {
                if let Some(data) = inline.get("data").and_then(Value::as_str) {
                    message.audio = Some(InlineAudio {
                        data: data.to_string(),
                        mime_type: inline
                            .get("mimeType")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
            } else {
                warn!("server message carried more than one audio part; extra parts ignored");
            }
        }
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }
    }
    if let Some(t) = content
        .get("outputTranscription")
        .and_then(|o| o.get("text"))
        .and_then(Value::as_str)
    {
        text.push_str(t);
    }
    if !text.is_empty() {
        message.text = Some(text);
    }

    if message.is_empty() {
        return Ok(ServerFrame::Empty);
    }
    Ok(ServerFrame::Content(message))
}

fn setup_message(config: &ConnectConfig) -> Value {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let mut generation_config = json!({ "responseModalities": ["AUDIO"] });
    if let Some(voice) = config.voice.as_deref().filter(|v| !v.is_empty()) {
        generation_config["speechConfig"] = json!({
            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
        });
    }

    let mut setup = json!({
        "model": model,
        "generationConfig": generation_config,
    });
    if let Some(instruction) = config
        .system_instruction
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        setup["systemInstruction"] = json!({ "parts": [{ "text": instruction }] });
    }

    json!({ "setup": setup })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    media_chunks: [&'a EncodedFrame; 1],
}

impl<'a> RealtimeInputMessage<'a> {
    fn from_frame(frame: &'a EncodedFrame) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: [frame],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectConfig {
        ConnectConfig {
            model: "gemini-2.0-flash-exp".into(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            system_instruction: Some("Be brief.".into()),
            voice: Some("Puck".into()),
        }
    }

    #[test]
    fn setup_message_shape() {
        let v = setup_message(&config());
        assert_eq!(v["setup"]["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(v["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            v["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(v["setup"]["systemInstruction"]["parts"][0]["text"], "Be brief.");
    }

    #[test]
    fn setup_omits_empty_optionals() {
        let mut c = config();
        c.voice = None;
        c.system_instruction = Some("  ".into());
        let v = setup_message(&c);
        assert!(v["setup"]["generationConfig"].get("speechConfig").is_none());
        assert!(v["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn realtime_input_shape() {
        let frame = EncodedFrame {
            data: "AAA=".into(),
            mime_type: "audio/pcm;rate=16000".into(),
        };
        let v: Value =
            serde_json::to_value(RealtimeInputMessage::from_frame(&frame)).expect("serialize");
        assert_eq!(v["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(v["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");
    }

    #[test]
    fn parses_setup_complete() {
        assert_eq!(
            parse_server_frame(r#"{"setupComplete":{}}"#).unwrap(),
            ServerFrame::SetupComplete
        );
    }

    #[test]
    fn parses_audio_and_text_parts() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
            {"text":"hel"},{"text":"lo"}]}}}"#;
        let ServerFrame::Content(m) = parse_server_frame(raw).unwrap() else {
            panic!("expected content");
        };
        let audio = m.audio.expect("audio");
        assert_eq!(audio.data, "AAAA");
        assert_eq!(audio.mime_type, "audio/pcm;rate=24000");
        assert_eq!(m.text.as_deref(), Some("hello"));
        assert!(!m.interrupted);
    }

    #[test]
    fn parses_interrupted_and_turn_complete() {
        let ServerFrame::Content(m) =
            parse_server_frame(r#"{"serverContent":{"interrupted":true}}"#).unwrap()
        else {
            panic!("expected content");
        };
        assert!(m.interrupted);
        assert!(m.audio.is_none());

        let ServerFrame::Content(m) =
            parse_server_frame(r#"{"serverContent":{"turnComplete":true}}"#).unwrap()
        else {
            panic!("expected content");
        };
        assert!(m.turn_complete);
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(
            parse_server_frame(r#"{"usageMetadata":{}}"#).unwrap(),
            ServerFrame::Ignored
        );
        assert!(matches!(
            parse_server_frame("{not json"),
            Err(ParleyError::Transport(_))
        ));
    }

    #[test]
    fn content_without_payload_is_empty() {
        assert_eq!(
            parse_server_frame(r#"{"serverContent":{"modelTurn":{"parts":[]}}}"#).unwrap(),
            ServerFrame::Empty
        );
        assert_eq!(
            parse_server_frame(r#"{"serverContent":{"turnComplete":false}}"#).unwrap(),
            ServerFrame::Empty
        );
    }

    fn frame() -> EncodedFrame {
        EncodedFrame {
            data: "AAA=".into(),
            mime_type: "audio/pcm;rate=16000".into(),
        }
    }

    #[test]
    fn full_outbound_queue_rejects_frames() {
        let (session, mut rx) = GeminiLiveSession::new(2);
        session.send_realtime_input(&frame()).expect("first");
        session.send_realtime_input(&frame()).expect("second");
        let err = session.send_realtime_input(&frame()).unwrap_err();
        assert!(matches!(err, ParleyError::Transport(ref m) if m.contains("full")), "{err}");

        // Draining one slot makes room again.
        assert!(rx.try_recv().is_ok());
        session.send_realtime_input(&frame()).expect("after drain");
    }

    #[test]
    fn send_after_task_exit_is_a_transport_error() {
        let (session, rx) = GeminiLiveSession::new(4);
        drop(rx);
        assert!(matches!(
            session.send_realtime_input(&frame()),
            Err(ParleyError::Transport(_))
        ));
    }

    #[test]
    fn close_is_idempotent_after_task_exit() {
        let (session, rx) = GeminiLiveSession::new(4);
        drop(rx);
        session.close().expect("first close");
        session.close().expect("second close");
        assert!(matches!(
            session.send_realtime_input(&frame()),
            Err(ParleyError::NotConnected)
        ));
    }

    #[test]
    fn connect_without_key_is_rejected() {
        let (callbacks, _rx) = TransportCallbacks::channel();
        let err = GeminiLiveTransport::new("  ")
            .connect(&config(), callbacks)
            .err()
            .expect("must fail");
        assert!(matches!(err, ParleyError::Transport(_)));
    }
}
