//! Websocket client for the streaming ASR backend.
//!
//! One `AsrConnection` owns one bidirectional websocket session. A spawned
//! I/O task pins the socket: outgoing frames arrive over a channel, incoming
//! text frames are parsed and queued for `receive`. Two usage modes are
//! built on the same primitives: continuous two-pass streaming (interleaved
//! `send_audio` + `receive` polling) and whole-buffer offline recognition
//! (`recognize_offline`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{Connector, connect_async_tls_with_config, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::config::AsrConfig;

use super::AsrError;
use super::clean_transcript;
use super::messages::{AsrMode, ControlFrame, RecognitionEvent, TranscriptFrame};

/// Fixed frame size for offline recognition, matching the backend's
/// reference client framing.
pub const BATCH_FRAME_BYTES: usize = 960;

/// Poll interval while waiting for offline recognition results.
const BATCH_POLL: Duration = Duration::from_secs(5);

/// Hard bound on one offline recognition pass.
const BATCH_DEADLINE: Duration = Duration::from_secs(60);

/// Connection state for the ASR backend session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrConnectionState {
    /// Not connected
    Disconnected,
    /// Transport is up, no config sent yet
    Connected,
    /// Config frame sent, audio may flow
    Streaming,
    /// Terminal: transport failed or was closed
    Closed,
}

/// Per-segment progress update during offline recognition.
#[derive(Debug, Clone)]
pub struct SegmentUpdate {
    /// The newly recognized fragment, cleaned for display.
    pub text: String,
    /// All fragments recognized so far, cleaned and joined.
    pub accumulated: String,
}

/// Callback invoked for each recognized segment during offline recognition.
pub type SegmentProgress =
    Arc<dyn Fn(SegmentUpdate) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One streaming session to the ASR backend.
pub struct AsrConnection {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<mpsc::UnboundedReceiver<TranscriptFrame>>,
    state: Arc<RwLock<AsrConnectionState>>,
    alive: Arc<AtomicBool>,
    configured: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl AsrConnection {
    /// Open a websocket to the backend described by `config`.
    ///
    /// With TLS enabled, certificate validation follows `config.tls_verify`:
    /// when false the handshake accepts any certificate.
    pub async fn connect(config: &AsrConfig) -> Result<Self, AsrError> {
        let url = config.url();

        let connector = if config.use_tls && !config.tls_verify {
            info!("Connecting to ASR over TLS with certificate verification disabled");
            Some(Connector::Rustls(Arc::new(insecure_client_config())))
        } else {
            None
        };

        let (ws_stream, _) = connect_async_tls_with_config(url.as_str(), None, false, connector)
            .await
            .map_err(|e| AsrError::ConnectionFailed(format!("{url}: {e}")))?;

        info!("Connected to ASR backend at {}", url);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TranscriptFrame>();
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);

        let state = Arc::new(RwLock::new(AsrConnectionState::Connected));
        let alive = Arc::new(AtomicBool::new(true));

        let task_state = state.clone();
        let task_alive = alive.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        match outgoing {
                            Some(message) => {
                                if let Err(e) = ws_sink.send(message).await {
                                    error!("Failed to send frame to ASR backend: {}", e);
                                    break;
                                }
                            }
                            None => break,
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<TranscriptFrame>(&text) {
                                    Ok(frame) => {
                                        if in_tx.send(frame).is_err() {
                                            break;
                                        }
                                    }
                                    // Malformed frames are dropped, non-fatal
                                    Err(e) => warn!("Dropping malformed ASR frame: {}", e),
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                debug!("Ignoring {} byte binary frame from ASR backend", data.len());
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("ASR backend closed the connection: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong handled by the websocket library
                            }
                            Some(Err(e)) => {
                                error!("ASR websocket error: {}", e);
                                break;
                            }
                            None => {
                                info!("ASR websocket stream ended");
                                break;
                            }
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            task_alive.store(false, Ordering::SeqCst);
            *task_state.write().await = AsrConnectionState::Closed;
            debug!("ASR connection task finished");
        });

        Ok(Self {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            state,
            alive,
            configured: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Send one JSON control frame.
    pub async fn send_config(&self, frame: &ControlFrame) -> Result<(), AsrError> {
        if !self.is_connected() {
            return Err(AsrError::NotConnected);
        }

        let json = serde_json::to_string(frame)
            .map_err(|e| AsrError::ConfigurationError(e.to_string()))?;
        debug!("Sending ASR control frame: {}", json);

        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|e| AsrError::SendFailed(e.to_string()))?;

        self.configured.store(true, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if *state == AsrConnectionState::Connected {
            *state = AsrConnectionState::Streaming;
        }
        Ok(())
    }

    /// Send one binary frame of raw PCM. Valid only after a config frame.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<(), AsrError> {
        if !self.is_connected() {
            return Err(AsrError::NotConnected);
        }
        if !self.configured.load(Ordering::SeqCst) {
            return Err(AsrError::ConfigurationError(
                "audio sent before config frame".to_string(),
            ));
        }

        self.outbound
            .send(Message::Binary(pcm.to_vec().into()))
            .map_err(|e| AsrError::SendFailed(e.to_string()))?;
        Ok(())
    }

    /// Wait up to `wait` for the next recognition event.
    ///
    /// An elapsed timeout is a liveness poll, not an error: it returns
    /// `NoEvent`. Once the transport is closed every call returns `NoEvent`.
    pub async fn receive(&self, wait: Duration) -> RecognitionEvent {
        match self.receive_frame(wait).await {
            Some(frame) => frame.event(),
            None => RecognitionEvent::NoEvent,
        }
    }

    /// Like `receive`, but yields the raw frame so callers can see the
    /// backend's explicit end-of-recognition flag.
    pub async fn receive_frame(&self, wait: Duration) -> Option<TranscriptFrame> {
        if !self.is_connected() {
            return None;
        }

        let mut inbound = self.inbound.lock().await;
        match timeout(wait, inbound.recv()).await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                // I/O task is gone; transport is closed
                self.alive.store(false, Ordering::SeqCst);
                None
            }
            Err(_) => None,
        }
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
            info!("Disconnected from ASR backend");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> AsrConnectionState {
        self.state.read().await.clone()
    }

    /// Recognize a complete PCM buffer in offline mode.
    ///
    /// Opens a dedicated connection, streams the buffer in fixed
    /// `BATCH_FRAME_BYTES` frames, signals end of speech, and accumulates
    /// final-pass fragments until the backend flags completion or the
    /// overall deadline passes. Returns the cleaned, space-joined text;
    /// on deadline the accumulated best effort.
    pub async fn recognize_offline(
        config: &AsrConfig,
        pcm: &[u8],
        sample_rate: u32,
        progress: Option<SegmentProgress>,
    ) -> Result<String, AsrError> {
        let conn = Self::connect(config).await?;
        let result = conn.run_offline(pcm, sample_rate, progress).await;
        conn.disconnect();
        result
    }

    async fn run_offline(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        progress: Option<SegmentProgress>,
    ) -> Result<String, AsrError> {
        self.send_config(&ControlFrame::pcm_start(
            &AsrMode::offline(),
            sample_rate,
            "uploaded_audio",
        ))
        .await?;

        let mut frame_count = 0usize;
        for chunk in pcm.chunks(BATCH_FRAME_BYTES) {
            self.send_audio(chunk).await?;
            frame_count += 1;
        }
        self.send_config(&ControlFrame::end_of_speech()).await?;
        info!(
            "Sent {} bytes of PCM in {} frames, waiting for recognition",
            pcm.len(),
            frame_count
        );

        let deadline = tokio::time::Instant::now() + BATCH_DEADLINE;
        let mut accumulated = String::new();

        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!("Offline recognition hit the {}s deadline", BATCH_DEADLINE.as_secs());
                break;
            }

            let frame = match self.receive_frame(BATCH_POLL.min(deadline - now)).await {
                Some(frame) => frame,
                None => {
                    if !self.is_connected() {
                        warn!("ASR connection closed before recognition completed");
                        break;
                    }
                    continue;
                }
            };

            if frame.is_final_pass() && !frame.text.trim().is_empty() {
                accumulated.push_str(frame.text.trim());
                accumulated.push(' ');
                debug!(
                    "Recognized segment '{}' ({} chars accumulated)",
                    frame.text.trim(),
                    accumulated.len()
                );

                if let Some(callback) = &progress {
                    callback(SegmentUpdate {
                        text: clean_transcript(&frame.text),
                        accumulated: clean_transcript(accumulated.trim()),
                    })
                    .await;
                }
            }

            if frame.is_final {
                debug!("Backend flagged end of recognition");
                break;
            }
        }

        Ok(clean_transcript(accumulated.trim()))
    }
}

impl Drop for AsrConnection {
    fn drop(&mut self) {
        if self.alive.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }
}

/// Certificate verifier that accepts anything. Used only when
/// `tls_verify = false` is configured for the backend.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn insecure_client_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_frame_size_matches_reference_client() {
        assert_eq!(BATCH_FRAME_BYTES, 960);
    }

    #[tokio::test]
    async fn test_connect_refused_maps_to_connection_failed() {
        // Port 9 (discard) is unbound in the test environment
        let config = AsrConfig {
            host: "127.0.0.1".to_string(),
            port: 9,
            use_tls: false,
            tls_verify: false,
        };

        let result = AsrConnection::connect(&config).await;
        assert!(matches!(result, Err(AsrError::ConnectionFailed(_))));
    }
}
