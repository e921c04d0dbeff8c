//! Shared test fixtures: an in-process websocket server speaking the ASR
//! backend framing.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message};

use voxrelay::config::AsrConfig;

/// Scripted stand-in for the recognition backend.
///
/// Every connected client receives whatever JSON frames are broadcast on
/// `frames_tx`. When a client sends an `is_speaking: false` control frame,
/// the server replies with `offline_script` frames in order, which lets
/// tests drive the batch recognition flow request-response style.
pub struct MockAsrServer {
    pub addr: SocketAddr,
    pub frames_tx: broadcast::Sender<String>,
}

impl MockAsrServer {
    pub fn config(&self) -> AsrConfig {
        AsrConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            use_tls: false,
            tls_verify: false,
        }
    }

    /// Push one recognition frame to every connected client.
    pub fn send_frame(&self, json: &str) {
        let _ = self.frames_tx.send(json.to_string());
    }
}

pub async fn spawn_mock_asr(offline_script: Vec<String>) -> MockAsrServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, _) = broadcast::channel::<String>(64);

    let accept_tx = frames_tx.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let mut frames_rx = accept_tx.subscribe();
            let script = offline_script.clone();

            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();

                loop {
                    tokio::select! {
                        broadcasted = frames_rx.recv() => {
                            match broadcasted {
                                Ok(frame) => {
                                    if sink.send(Message::Text(frame.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                        incoming = stream.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    if text.contains("\"is_speaking\":false") {
                                        for frame in &script {
                                            if sink
                                                .send(Message::Text(frame.clone().into()))
                                                .await
                                                .is_err()
                                            {
                                                return;
                                            }
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(_)) => break,
                            }
                        }
                    }
                }
            });
        }
    });

    MockAsrServer { addr, frames_tx }
}

/// An endpoint nothing listens on, for connection-failure paths.
pub fn unreachable_asr_config() -> AsrConfig {
    AsrConfig {
        host: "127.0.0.1".to_string(),
        port: 9,
        use_tls: false,
        tls_verify: false,
    }
}
