use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Identity header the gateway reads during the WebSocket handshake.
const DEVICE_ID_HEADER: &str = "x-gatecast-device-id";

/// One simulated device connection.
pub struct DeviceConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// Result of a connect attempt, timed whether it succeeded or not.
pub struct ConnectOutcome {
    pub duration: Duration,
    pub connection: Option<DeviceConnection>,
    pub error: Option<String>,
}

impl ConnectOutcome {
    fn failed(start: Instant, error: String) -> Self {
        Self {
            duration: start.elapsed(),
            connection: None,
            error: Some(error),
        }
    }
}

impl DeviceConnection {
    /// Open a connection identifying as `device_id`.
    pub async fn connect(url: &str, device_id: &str) -> ConnectOutcome {
        let start = Instant::now();

        let mut request = match url.into_client_request() {
            Ok(request) => request,
            Err(e) => return ConnectOutcome::failed(start, e.to_string()),
        };
        let id_value = match HeaderValue::from_str(device_id) {
            Ok(value) => value,
            Err(e) => return ConnectOutcome::failed(start, e.to_string()),
        };
        request.headers_mut().insert(DEVICE_ID_HEADER, id_value);

        match connect_async(request).await {
            Ok((ws, _response)) => ConnectOutcome {
                duration: start.elapsed(),
                connection: Some(DeviceConnection { ws }),
                error: None,
            },
            Err(e) => ConnectOutcome::failed(start, e.to_string()),
        }
    }

    /// Send one binary frame.
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        self.ws.send(Message::Binary(payload)).await?;
        Ok(())
    }

    /// Drain frames the gateway pushed down since the last send. Reading is
    /// what lets tungstenite answer pings, so this runs between sends.
    /// Returns false once the gateway closed the connection.
    pub async fn drain(&mut self) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_millis(1), self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return false,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) => return false,
                Err(_) => return true,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Gateway-side counters scraped from the control server.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    pub devices_connected: u64,
    pub outbound_submitted: u64,
    pub outbound_delivered: u64,
    pub outbound_shed: u64,
    pub outbound_dropped: u64,
}

impl GatewayMetrics {
    fn parse(text: &str) -> Self {
        let parsed = parse_prometheus(text);
        let get = |name: &str| parsed.get(name).copied().unwrap_or(0);

        Self {
            devices_connected: get("gatecast_devices_connected_total"),
            outbound_submitted: get("gatecast_outbound_submitted_total"),
            outbound_delivered: get("gatecast_outbound_delivered_total"),
            outbound_shed: get("gatecast_outbound_shed_total"),
            outbound_dropped: get("gatecast_outbound_dropped_total"),
        }
    }
}

/// Pull `name value` pairs out of Prometheus text exposition.
fn parse_prometheus(text: &str) -> HashMap<String, u64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let value = parts.next()?.parse::<u64>().ok()?;
            Some((name.to_string(), value))
        })
        .collect()
}

/// HTTP client for the control server's metrics endpoint.
pub struct ControlClient {
    client: reqwest::Client,
    base_url: String,
}

impl ControlClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_metrics(&self) -> Result<GatewayMetrics> {
        let url = format!("{}/metrics", self.base_url);
        let response = self.client.get(&url).send().await?;
        let text = response.text().await?;
        Ok(GatewayMetrics::parse(&text))
    }
}
