use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const DEVICE_ID_HEADER: &str = "x-gatecast-device-id";

/// A scripted device connection for driving the gateway's WebSocket endpoint.
pub struct TestDevice {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub id: String,
}

impl TestDevice {
    /// Connect to `url`, identifying as `id` via the handshake header.
    pub async fn connect(url: &str, id: &str) -> Result<Self, WsError> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            DEVICE_ID_HEADER,
            HeaderValue::from_str(id).expect("device id should be a valid header value"),
        );
        let (ws, _response) = connect_async(request).await?;
        Ok(Self {
            ws,
            id: id.to_string(),
        })
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("text frame should send");
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws
            .send(Message::Binary(data))
            .await
            .expect("binary frame should send");
    }

    /// Wait for the gateway to close this connection, returning the close
    /// reason if one was sent. Panics if nothing arrives within `timeout`.
    pub async fn await_close(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .expect("gateway should close the connection in time");
            match frame {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| f.reason.to_string());
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
