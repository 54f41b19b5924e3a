use siphasher::sip::SipHasher24;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Virtual nodes per fleet member. More vnodes smooth the device distribution
/// at the cost of ring-build time.
pub const VNODES_PER_NODE: usize = 211;

/// Identifier of one gateway node, as registered with discovery.
pub type NodeId = String;

/// A point-in-time view of fleet membership. Sorted and deduplicated on
/// construction so two snapshots with the same members compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSnapshot {
    nodes: Vec<NodeId>,
}

impl MembershipSnapshot {
    pub fn new(mut nodes: Vec<NodeId>) -> Self {
        nodes.sort();
        nodes.dedup();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Consistent-hash ring mapping device ids to owning nodes.
///
/// Built fresh for each membership snapshot; never mutated in place. Each
/// member lands on the ring at [`VNODES_PER_NODE`] points, and a device
/// belongs to the first vnode at or clockwise after its own hash, wrapping
/// at the top of the key space. Every node that builds a ring from the same
/// snapshot gets the same assignment.
#[derive(Debug, Clone, Default)]
pub struct OwnershipRing {
    ring: BTreeMap<u64, NodeId>,
    members: usize,
}

impl OwnershipRing {
    pub fn build(snapshot: &MembershipSnapshot) -> Self {
        Self::with_vnodes(snapshot, VNODES_PER_NODE)
    }

    pub fn with_vnodes(snapshot: &MembershipSnapshot, vnodes: usize) -> Self {
        let mut ring = BTreeMap::new();
        for node in snapshot.nodes() {
            for i in 0..vnodes {
                let point = format!("{}:{}", node, i);
                ring.insert(hash_key(&point), node.clone());
            }
        }
        Self {
            ring,
            members: snapshot.len(),
        }
    }

    /// The node that owns `key`, or `None` when the ring is empty.
    pub fn owner_of(&self, key: &str) -> Option<&NodeId> {
        if self.ring.is_empty() {
            return None;
        }

        let hash = hash_key(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
    }

    /// Whether `node` owns `key` under this ring. An empty ring owns nothing.
    pub fn is_owned_by(&self, key: &str, node: &str) -> bool {
        self.owner_of(key).map(|owner| owner == node).unwrap_or(false)
    }

    pub fn member_count(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = SipHasher24::new();
    key.hash(&mut hasher);
    hasher.finish()
}
