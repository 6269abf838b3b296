// Streaming-socket transport.
//
// The channel state machine talks to these traits; the WebSocket
// implementation lives below and test doubles implement the same pair.
// Connections split into independent send/receive halves so the send loop
// never waits on inbound traffic.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::CaptureError;

/// Write half of one connection to the transcription service.
#[async_trait]
pub trait TransportTx: Send {
    async fn send_text(&mut self, text: String) -> Result<(), CaptureError>;

    /// Transport-level keep-alive.
    async fn ping(&mut self) -> Result<(), CaptureError>;

    async fn close(&mut self);
}

/// Read half; yields raw JSON payloads.
#[async_trait]
pub trait TransportRx: Send {
    /// Next inbound text payload. `None` means the connection closed.
    async fn next_text(&mut self) -> Option<Result<String, CaptureError>>;
}

/// Opens connections to the transcription service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        api_key: &str,
    ) -> Result<(Box<dyn TransportTx>, Box<dyn TransportRx>), CaptureError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector with bearer-token auth.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        api_key: &str,
    ) -> Result<(Box<dyn TransportTx>, Box<dyn TransportRx>), CaptureError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| CaptureError::NetworkFailure(e.to_string()))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| CaptureError::NetworkFailure(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| CaptureError::NetworkFailure(e.to_string()))?;

        debug!("websocket connected to {}", url);

        let (sink, stream) = stream.split();
        Ok((Box::new(WsTx { sink }), Box::new(WsRx { stream })))
    }
}

struct WsTx {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportTx for WsTx {
    async fn send_text(&mut self, text: String) -> Result<(), CaptureError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| CaptureError::NetworkFailure(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), CaptureError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| CaptureError::NetworkFailure(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

struct WsRx {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportRx for WsRx {
    async fn next_text(&mut self) -> Option<Result<String, CaptureError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Pongs and any stray binary payloads carry no events
                Ok(_) => continue,
                Err(e) => return Some(Err(CaptureError::NetworkFailure(e.to_string()))),
            }
        }
    }
}
