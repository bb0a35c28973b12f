//! Node data model
//!
//! A `Node` is the in-memory record of one simulated computer: identity,
//! fault configuration, the most recent accepted delivery, and an audit
//! history of transmission attempts. A node server owns exactly one record
//! behind a mutex; nothing else mutates it.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::protocol::{FaultFlags, FaultKind, LastMessage};

/// Terminal status of a transmission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Delivered,
    Dropped,
    Error,
}

/// Audit record of one transmission attempt.
///
/// Appended to the receiving node's history once the terminal status is
/// known; never mutated afterwards. `crc_valid` stays `None` when the frame
/// was dropped or rejected before the check ran.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: u16,
    pub receiver: u16,
    pub message: Option<String>,
    pub frame_bits: String,
    pub poly: String,
    pub status: PacketStatus,
    pub delay_secs: Option<f64>,
    pub crc_valid: Option<bool>,
}

/// One simulated computer.
#[derive(Debug)]
pub struct Node {
    id: u16,
    port: u16,
    faults: FaultFlags,
    last_received: Option<LastMessage>,
    history: Vec<Packet>,
}

impl Node {
    pub fn new(id: u16, base_port: u16) -> Self {
        Self {
            id,
            port: base_port + id,
            faults: FaultFlags::default(),
            last_received: None,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn faults(&self) -> FaultFlags {
        self.faults
    }

    /// Replace the fault set with exactly `kinds`; anything unnamed is off.
    pub fn set_faults(&mut self, kinds: &[FaultKind]) -> FaultFlags {
        self.faults = FaultFlags::from_kinds(kinds);
        self.faults
    }

    /// Clear all faults.
    pub fn repair(&mut self) -> FaultFlags {
        self.faults.clear();
        self.faults
    }

    pub fn last_received(&self) -> Option<&LastMessage> {
        self.last_received.as_ref()
    }

    /// Overwrite the last-received snapshot; called only for deliveries that
    /// survived the drop check and parsed cleanly.
    pub fn record_delivery(&mut self, snapshot: LastMessage) {
        self.last_received = Some(snapshot);
    }

    pub fn push_history(&mut self, packet: Packet) {
        self.history.push(packet);
    }

    pub fn history(&self) -> &[Packet] {
        &self.history
    }
}

/// Shared handle used by a node's connection handlers; the mutex serializes
/// every read-and-update of the mutable fields.
pub type SharedNode = Arc<Mutex<Node>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_clean() {
        let node = Node::new(4, 12000);
        assert_eq!(node.id(), 4);
        assert_eq!(node.port(), 12004);
        assert!(!node.faults().any());
        assert!(node.last_received().is_none());
        assert!(node.history().is_empty());
    }

    #[test]
    fn test_set_faults_replaces_whole_set() {
        let mut node = Node::new(0, 12000);
        node.set_faults(&[FaultKind::BitFlip, FaultKind::DelayPacket]);
        assert!(node.faults().bit_flip);
        assert!(node.faults().delay_packet);

        // A later set_errors without BIT_FLIP disables it.
        node.set_faults(&[FaultKind::DropPacket]);
        assert!(!node.faults().bit_flip);
        assert!(!node.faults().delay_packet);
        assert!(node.faults().drop_packet);
    }

    #[test]
    fn test_repair_clears_everything() {
        let mut node = Node::new(0, 12000);
        node.set_faults(&[
            FaultKind::BitFlip,
            FaultKind::DropPacket,
            FaultKind::DelayPacket,
        ]);
        let flags = node.repair();
        assert!(!flags.any());
        // Repairing an already-clean node stays clean.
        assert!(!node.repair().any());
    }

    #[test]
    fn test_history_is_append_only() {
        let mut node = Node::new(1, 12000);
        node.push_history(Packet {
            sender: 0,
            receiver: 1,
            message: Some("hi".into()),
            frame_bits: "0110100101101001".into(),
            poly: "1011".into(),
            status: PacketStatus::Dropped,
            delay_secs: None,
            crc_valid: None,
        });
        assert_eq!(node.history().len(), 1);
        assert_eq!(node.history()[0].status, PacketStatus::Dropped);
        assert!(node.last_received().is_none());
    }
}
