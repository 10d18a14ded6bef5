//! JSON-over-WebSocket transport to a coordinator bridge process.
//!
//! The bridge owns the coordinator's native handshake; this side exchanges
//! `type`-tagged JSON text frames with it.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use inspect_core::{CoordinatorItemInfo, Fingerprint};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::transport::{
    CoordinatorEvent, CoordinatorTransport, Credentials, EventSender, InspectRequest,
    TransportError,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    LogOn {
        username: &'a str,
        password: &'a str,
    },
    Inspect {
        fingerprint: &'a Fingerprint,
        reference: &'a str,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    LoggedOn,
    LogOnRejected { reason: String },
    ItemInfo { iteminfo: CoordinatorItemInfo },
    Fatal { reason: String },
}

impl From<InboundFrame> for CoordinatorEvent {
    fn from(frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::LoggedOn => CoordinatorEvent::LoggedOn,
            InboundFrame::LogOnRejected { reason } => CoordinatorEvent::LogOnRejected { reason },
            InboundFrame::ItemInfo { iteminfo } => CoordinatorEvent::ItemInfo(iteminfo),
            InboundFrame::Fatal { reason } => CoordinatorEvent::FatalProtocolError { reason },
        }
    }
}

pub struct WsBridgeTransport {
    url: String,
    events: EventSender,
    sink: Arc<Mutex<Option<WsSink>>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WsBridgeTransport {
    pub fn new(url: impl Into<String>, events: EventSender) -> Self {
        Self {
            url: url.into(),
            events,
            sink: Arc::new(Mutex::new(None)),
            reader: parking_lot::Mutex::new(None),
        }
    }

    async fn send_frame(&self, frame: &OutboundFrame<'_>) -> Result<(), TransportError> {
        let payload = serde_json::to_string(frame)?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(payload.into()))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn report(&self, event: CoordinatorEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl CoordinatorTransport for WsBridgeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        debug!(url = %self.url, "connecting to coordinator bridge");
        let stream = match timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                return self
                    .report(CoordinatorEvent::ConnectFailed {
                        reason: err.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                return self
                    .report(CoordinatorEvent::ConnectFailed {
                        reason: format!("connect timed out after {CONNECT_TIMEOUT:?}"),
                    })
                    .await;
            }
        };

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);
        info!(url = %self.url, "coordinator bridge connected");
        // Connected must precede any inbound frame on the event channel.
        self.report(CoordinatorEvent::Connected).await?;

        let reader = tokio::spawn(read_frames(
            stream,
            self.events.clone(),
            Arc::clone(&self.sink),
        ));
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
        Ok(())
    }

    async fn log_on(&self, credentials: &Credentials) -> Result<(), TransportError> {
        self.send_frame(&OutboundFrame::LogOn {
            username: credentials.username(),
            password: credentials.password(),
        })
        .await
    }

    async fn send_inspect(&self, request: &InspectRequest) -> Result<(), TransportError> {
        self.send_frame(&OutboundFrame::Inspect {
            fingerprint: &request.fingerprint,
            reference: &request.reference,
        })
        .await
    }
}

impl Drop for WsBridgeTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_frames(
    mut stream: SplitStream<WsStream>,
    events: EventSender,
    sink: Arc<Mutex<Option<WsSink>>>,
) {
    let reason = loop {
        let event = match stream.next().await {
            Some(Ok(Message::Text(text))) => decode_frame(serde_json::from_str(&text)),
            Some(Ok(Message::Binary(bytes))) => decode_frame(serde_json::from_slice(&bytes)),
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.as_str().to_owned())
                    .unwrap_or_else(|| "closed by bridge".to_string());
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => break err.to_string(),
            None => break "stream ended".to_string(),
        };
        if events.send(event).await.is_err() {
            return;
        }
    };

    sink.lock().await.take();
    warn!(%reason, "coordinator bridge disconnected");
    let _ = events.send(CoordinatorEvent::Disconnected { reason }).await;
}

fn decode_frame(decoded: Result<InboundFrame, serde_json::Error>) -> CoordinatorEvent {
    match decoded {
        Ok(frame) => frame.into(),
        Err(err) => CoordinatorEvent::Malformed {
            detail: err.to_string(),
        },
    }
}
