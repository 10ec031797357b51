//! WebSocket transport over tokio-tungstenite.
//!
//! A background task owns the socket: it dials the Central System with
//! the `ocpp1.6` subprotocol, reconnects with a fixed backoff, answers
//! pings, and relays frames into a mailbox the synchronous core drains
//! from `step()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{Transport, TransportEvent};

/// Delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct WsTransport {
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl WsTransport {
    /// Spawn the socket task on the current tokio runtime.
    ///
    /// `url` already contains the charge box id path segment, e.g.
    /// `ws://cs.example.com/ocpp/CP001`.
    pub fn spawn(url: String, ping_interval: Duration) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(socket_task(
            url,
            ping_interval,
            connected.clone(),
            event_tx,
            out_rx,
        ));
        Self {
            connected,
            events: event_rx,
            outgoing: out_tx,
        }
    }
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.outgoing.send(text.to_string()).is_ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }
}

async fn socket_task(
    url: String,
    ping_interval: Duration,
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let mut request = match url.as_str().into_client_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(url = %url, error = %e, "invalid backend URL, transport halted");
                return;
            }
        };
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("ocpp1.6"),
        );

        let stream = match connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                debug!(url = %url, error = %e, "connect failed, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!(url = %url, "websocket connected");
        connected.store(true, Ordering::Relaxed);
        if events.send(TransportEvent::Connected).is_err() {
            return;
        }

        let (mut sink, mut source) = stream.split();
        let mut ping = tokio::time::interval(ping_interval.max(Duration::from_secs(1)));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outbound = outgoing.recv() => {
                    let Some(text) = outbound else { return };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                inbound = source.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            let _ = events.send(TransportEvent::Text(text));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            let _ = events.send(TransportEvent::Binary(bytes));
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = events.send(TransportEvent::Ping);
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            let _ = events.send(TransportEvent::Pong);
                        }
                        Some(Ok(Message::Frame(_))) => {
                            let _ = events.send(TransportEvent::Fragment);
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    }
                }
            }
        }

        connected.store(false, Ordering::Relaxed);
        if events.send(TransportEvent::Disconnected).is_err() {
            return;
        }
        warn!(url = %url, "websocket lost, reconnecting");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
