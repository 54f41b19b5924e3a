use crate::error::{FleetError, FleetResult};
use crate::monitor::MembershipSource;
use crate::ring::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registration document for one gateway node. Kept fresh by re-registering
/// on every heartbeat; the discovery service expires records it stops seeing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: NodeId,
    /// Address devices should connect to on this node.
    pub device_addr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodesResponse {
    nodes: Vec<NodeId>,
}

/// HTTP client for the fleet discovery service.
#[derive(Debug)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    base_url: String,
    record: NodeRecord,
}

impl HttpDiscovery {
    pub fn new(base_url: impl Into<String>, record: NodeRecord) -> FleetResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if record.node_id.is_empty() {
            return Err(FleetError::Config("node id must not be empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(CLIENT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            record,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.record.node_id
    }

    /// Register (or re-register) this node's record.
    pub async fn register(&self) -> FleetResult<()> {
        let url = format!("{}/nodes/{}", self.base_url, self.record.node_id);
        let response = self.client.put(&url).json(&self.record).send().await?;
        if !response.status().is_success() {
            return Err(FleetError::Status(response.status()));
        }
        tracing::debug!(node_id = %self.record.node_id, "registered with discovery");
        Ok(())
    }

    /// Remove this node's record. Called once at shutdown so peers rebalance
    /// promptly instead of waiting for the record to expire.
    pub async fn deregister(&self) -> FleetResult<()> {
        let url = format!("{}/nodes/{}", self.base_url, self.record.node_id);
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(FleetError::Status(response.status()));
        }
        tracing::info!(node_id = %self.record.node_id, "deregistered from discovery");
        Ok(())
    }

    /// Fetch the current live node list.
    pub async fn fetch_nodes(&self) -> FleetResult<Vec<NodeId>> {
        let url = format!("{}/nodes", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FleetError::Status(response.status()));
        }
        let body: NodesResponse = response
            .json()
            .await
            .map_err(|e| FleetError::InvalidResponse(e.to_string()))?;
        Ok(body.nodes)
    }
}

#[async_trait::async_trait]
impl MembershipSource for HttpDiscovery {
    async fn fetch(&self) -> FleetResult<Vec<NodeId>> {
        self.fetch_nodes().await
    }

    async fn heartbeat(&self) -> FleetResult<()> {
        self.register().await
    }
}
