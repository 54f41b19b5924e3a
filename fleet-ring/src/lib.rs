//! Fleet coordination for the gatecast gateway tier.
//!
//! Every gateway node registers with a shared discovery service and polls it
//! for the live node list. Each node builds the same consistent-hash ring
//! from that list and keeps only the device connections the ring assigns to
//! it; devices that hash elsewhere are disconnected so they reconnect to
//! their owner.
//!
//! The moving parts:
//!
//! - [`HttpDiscovery`]: registration, heartbeat, and node listing against the
//!   discovery service.
//! - [`Monitor`]: polls a [`MembershipSource`] and publishes deduplicated
//!   [`MembershipSnapshot`]s on a watch channel. Consumers only ever see the
//!   newest snapshot.
//! - [`OwnershipRing`]: the consistent-hash ring itself, rebuilt per snapshot.
//! - [`Rehasher`]: consumes snapshots and force-disconnects devices this node
//!   no longer owns, abandoning a pass whenever a newer snapshot arrives.
//!
//! # Example
//!
//! ```rust,ignore
//! let discovery = Arc::new(HttpDiscovery::new(&discovery_url, record)?);
//! discovery.register().await?;
//!
//! let monitor = Monitor::spawn(discovery.clone(), poll_interval, cancel.clone());
//! let rehasher = Rehasher::spawn(node_id, registry, monitor.subscribe(), cancel.clone());
//!
//! // The accept path can ask the newest ring about any device:
//! let handle = rehasher.handle();
//! if !handle.owns(device_id.as_str()) {
//!     // this device belongs to another node
//! }
//! ```
//!
//! Fail-safe: when discovery misbehaves (an empty node list, or a list that
//! no longer includes this node), the rehasher keeps every connection instead
//! of flushing the whole node.

pub mod discovery;
pub mod error;
pub mod monitor;
pub mod rehasher;
pub mod ring;

pub use discovery::{HttpDiscovery, NodeRecord};
pub use error::{FleetError, FleetResult};
pub use monitor::{MembershipSource, Monitor, DEFAULT_POLL_INTERVAL};
pub use rehasher::{RehashHandle, Rehasher, REHASH_REASON};
pub use ring::{MembershipSnapshot, NodeId, OwnershipRing, VNODES_PER_NODE};
