use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use gatecast_core::{DeliveryEnvelope, EventKind};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type Received = Arc<Mutex<Vec<DeliveryEnvelope>>>;

/// An HTTP sink that records every envelope the gateway delivers to it.
pub struct DeliverySink {
    addr: SocketAddr,
    received: Received,
    task: JoinHandle<()>,
}

impl DeliverySink {
    pub async fn start() -> Self {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/events", post(record))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("sink should bind");
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            received,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/events", self.addr)
    }

    /// Envelopes received so far, in arrival order.
    pub fn received(&self) -> Vec<DeliveryEnvelope> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_of(&self, kind: EventKind) -> Vec<DeliveryEnvelope> {
        self.received()
            .into_iter()
            .filter(|e| e.event == kind)
            .collect()
    }

    /// Wait until at least `n` envelopes have arrived, returning them.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<DeliveryEnvelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= n {
                return received;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "sink saw {} envelopes, wanted {} within {:?}",
                    received.len(),
                    n,
                    timeout
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for DeliverySink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn record(State(received): State<Received>, Json(envelope): Json<DeliveryEnvelope>) {
    received.lock().unwrap().push(envelope);
}
