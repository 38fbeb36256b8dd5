//! WebSocket transport on tokio-tungstenite.
//!
//! `send` only queues; a background task owns the socket, drains the queue
//! while connected and reports [`TransportEvent`]s back over a channel.
//! After a drop it waits a fixed delay and dials again.
//!
//! The server ignores everything a connection sends before `init`, so on
//! every new socket queued frames are held back until an `init` frame has
//! been written.

use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use switchyard_client::{Transport, TransportError, TransportEvent};
use switchyard_protocol::{Envelope, Frame, CMD_INIT};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Outbound {
    text: String,
    init: bool,
}

pub struct WsTransport {
    url: String,
    retry_delay: Duration,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(
        url: String,
        retry_delay: Duration,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url,
            retry_delay,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            events_tx,
            task: None,
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return Ok(());
        };
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.task = Some(handle.spawn(run_socket(
            self.url.clone(),
            self.retry_delay,
            outbound_rx,
            self.events_tx.clone(),
        )));
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = serde_json::to_string(envelope)?;
        let init = envelope.channel.is_none() && envelope.command() == Some(CMD_INIT);
        self.outbound_tx
            .send(Outbound { text, init })
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    retry_delay: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut held: VecDeque<String> = VecDeque::new();
    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                info!(
                    component = "ws_transport",
                    event = "ws.connected",
                    url = %url,
                    held = held.len(),
                    "Connected"
                );
                if events.send(TransportEvent::Connected).is_err() {
                    return;
                }

                let (mut write, mut read) = stream.split();
                let mut initialized = false;
                loop {
                    tokio::select! {
                        Some(frame) = outbound.recv() => {
                            if !initialized && !frame.init {
                                held.push_back(frame.text);
                                continue;
                            }
                            initialized = true;
                            held.push_front(frame.text);
                            if let Err(e) = flush(&mut write, &mut held).await {
                                warn!(
                                    component = "ws_transport",
                                    event = "ws.send.failed",
                                    error = %e,
                                    "Send failed, reconnecting"
                                );
                                break;
                            }
                        }
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let frame = Frame::Text(text.as_str().to_owned());
                                if events.send(TransportEvent::Message(frame)).is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if write.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(
                                    component = "ws_transport",
                                    event = "ws.closed",
                                    url = %url,
                                );
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(
                                    component = "ws_transport",
                                    event = "ws.read.failed",
                                    error = %e,
                                    "Read failed, reconnecting"
                                );
                                break;
                            }
                        },
                    }
                }

                if events.send(TransportEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(
                    component = "ws_transport",
                    event = "ws.connect.failed",
                    url = %url,
                    error = %e,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "Connect failed"
                );
            }
        }

        tokio::time::sleep(retry_delay).await;
    }
}

/// Write `held` front to back; a frame leaves the queue only once written.
async fn flush<S>(write: &mut S, held: &mut VecDeque<String>) -> Result<(), S::Error>
where
    S: futures::Sink<Message> + Unpin,
{
    while let Some(text) = held.front() {
        write.send(Message::Text(text.clone().into())).await?;
        held.pop_front();
    }
    Ok(())
}
