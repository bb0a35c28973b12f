//! Protocol message definitions
//!
//! Defines the request and response shapes exchanged between a driver and a
//! node server. Requests are tagged by `type`, control commands by `cmd`,
//! responses by `status`; the JSON spellings are part of the wire contract.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Transmission fault kinds a node can have enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    /// Sender-side: one random bit of the outgoing frame is inverted.
    BitFlip,
    /// Receiver-side: the incoming frame is discarded before any CRC work.
    DropPacket,
    /// Receiver-side: handling blocks for a random interval before the CRC check.
    DelayPacket,
}

impl FaultKind {
    pub const ALL: [FaultKind; 3] = [
        FaultKind::BitFlip,
        FaultKind::DropPacket,
        FaultKind::DelayPacket,
    ];
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::BitFlip => "BIT_FLIP",
            FaultKind::DropPacket => "DROP_PACKET",
            FaultKind::DelayPacket => "DELAY_PACKET",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("unknown fault kind {0:?} (expected BIT_FLIP, DROP_PACKET or DELAY_PACKET)")]
pub struct ParseFaultKindError(String);

impl std::str::FromStr for FaultKind {
    type Err = ParseFaultKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BIT_FLIP" => Ok(FaultKind::BitFlip),
            "DROP_PACKET" => Ok(FaultKind::DropPacket),
            "DELAY_PACKET" => Ok(FaultKind::DelayPacket),
            other => Err(ParseFaultKindError(other.to_string())),
        }
    }
}

/// Per-node fault configuration, serialized as the `errors` object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultFlags {
    #[serde(rename = "BIT_FLIP")]
    pub bit_flip: bool,
    #[serde(rename = "DROP_PACKET")]
    pub drop_packet: bool,
    #[serde(rename = "DELAY_PACKET")]
    pub delay_packet: bool,
}

impl FaultFlags {
    /// Build flags with exactly the named kinds enabled.
    pub fn from_kinds(kinds: &[FaultKind]) -> Self {
        let mut flags = Self::default();
        for kind in kinds {
            flags.set(*kind, true);
        }
        flags
    }

    pub fn set(&mut self, kind: FaultKind, enabled: bool) {
        match kind {
            FaultKind::BitFlip => self.bit_flip = enabled,
            FaultKind::DropPacket => self.drop_packet = enabled,
            FaultKind::DelayPacket => self.delay_packet = enabled,
        }
    }

    pub fn is_enabled(&self, kind: FaultKind) -> bool {
        match kind {
            FaultKind::BitFlip => self.bit_flip,
            FaultKind::DropPacket => self.drop_packet,
            FaultKind::DelayPacket => self.delay_packet,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn enabled_kinds(&self) -> Vec<FaultKind> {
        FaultKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    pub fn any(&self) -> bool {
        self.bit_flip || self.drop_packet || self.delay_packet
    }
}

/// Snapshot of the most recent delivery a node accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    /// Sender node id.
    pub from: u16,
    /// Receiver-side CRC verdict.
    pub crc_ok: bool,
    /// Length of the frame in bits.
    pub frame_len: usize,
    /// The frame exactly as it arrived.
    pub frame_bits: String,
    /// Original message text, when the sender included it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Control-plane commands, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Replace the node's fault set with exactly the named kinds.
    SetErrors { errors: Vec<FaultKind> },
    /// Clear all faults.
    Repair,
    /// Read-only query of flags and last received message.
    GetStatus,
}

/// All requests a node server accepts, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Configure or query the node's fault state.
    Control(ControlCommand),
    /// Deliver a CRC-framed payload.
    Message {
        /// Sender node id.
        from: u16,
        /// Payload bits followed by checksum bits.
        frame_bits: String,
        /// Generator polynomial the receiver must verify against.
        crc_poly: String,
        /// Original text, for diagnostics only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// All responses a node server emits, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Control command acknowledged.
    Ok {
        errors: FaultFlags,
        /// Outer `None`: field absent (set_errors/repair). `Some(None)`:
        /// field present but null (get_status before any delivery).
        #[serde(
            default,
            deserialize_with = "double_option",
            skip_serializing_if = "Option::is_none"
        )]
        last_message: Option<Option<LastMessage>>,
    },
    /// Frame processed; `crc_ok` is the receiver's own verdict.
    Received {
        node: u16,
        from: u16,
        crc_ok: bool,
        frame_len: usize,
        /// Realized DELAY_PACKET sleep in seconds, when the fault fired.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<f64>,
    },
    /// Frame discarded by the DROP_PACKET fault.
    Dropped { node: u16 },
    /// Malformed input, protocol violation, or transport failure.
    Error { reason: String },
}

impl Response {
    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error {
            reason: reason.into(),
        }
    }
}

/// Keeps "field present but null" distinguishable from "field absent".
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_flags_from_kinds() {
        let flags = FaultFlags::from_kinds(&[FaultKind::BitFlip, FaultKind::DelayPacket]);
        assert!(flags.bit_flip);
        assert!(!flags.drop_packet);
        assert!(flags.delay_packet);
        assert_eq!(
            flags.enabled_kinds(),
            vec![FaultKind::BitFlip, FaultKind::DelayPacket]
        );
    }

    #[test]
    fn test_fault_kind_parse() {
        assert_eq!("BIT_FLIP".parse::<FaultKind>().unwrap(), FaultKind::BitFlip);
        assert_eq!(
            " DELAY_PACKET ".parse::<FaultKind>().unwrap(),
            FaultKind::DelayPacket
        );
        assert!("bit_flip".parse::<FaultKind>().is_err());
    }

    #[test]
    fn test_control_request_wire_shape() {
        let req = Request::Control(ControlCommand::SetErrors {
            errors: vec![FaultKind::BitFlip, FaultKind::DropPacket],
        });
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"type":"control","cmd":"set_errors","errors":["BIT_FLIP","DROP_PACKET"]}"#
        );

        let repair: Request =
            serde_json::from_str(r#"{"type":"control","cmd":"repair"}"#).unwrap();
        assert_eq!(repair, Request::Control(ControlCommand::Repair));
    }

    #[test]
    fn test_message_request_wire_shape() {
        let raw = r#"{"type":"message","from":3,"frame_bits":"0100100001101001110","crc_poly":"1010","message":"Hi"}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        match req {
            Request::Message {
                from,
                frame_bits,
                crc_poly,
                message,
            } => {
                assert_eq!(from, 3);
                assert_eq!(frame_bits.len(), 19);
                assert_eq!(crc_poly, "1010");
                assert_eq!(message.as_deref(), Some("Hi"));
            }
            other => panic!("wrong request variant: {:?}", other),
        }
    }

    #[test]
    fn test_response_wire_shapes() {
        let ok = Response::Ok {
            errors: FaultFlags::from_kinds(&[FaultKind::DropPacket]),
            last_message: None,
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"status":"ok","errors":{"BIT_FLIP":false,"DROP_PACKET":true,"DELAY_PACKET":false}}"#
        );

        let status = Response::Ok {
            errors: FaultFlags::default(),
            last_message: Some(None),
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"status":"ok","errors":{"BIT_FLIP":false,"DROP_PACKET":false,"DELAY_PACKET":false},"last_message":null}"#
        );

        let received = Response::Received {
            node: 5,
            from: 3,
            crc_ok: true,
            frame_len: 43,
            delay: Some(1.07),
        };
        assert_eq!(
            serde_json::to_string(&received).unwrap(),
            r#"{"status":"received","node":5,"from":3,"crc_ok":true,"frame_len":43,"delay":1.07}"#
        );

        let dropped: Response = serde_json::from_str(r#"{"status":"dropped","node":5}"#).unwrap();
        assert_eq!(dropped, Response::Dropped { node: 5 });
    }

    #[test]
    fn test_null_last_message_stays_present() {
        let raw = r#"{"status":"ok","errors":{"BIT_FLIP":false,"DROP_PACKET":false,"DELAY_PACKET":false},"last_message":null}"#;
        let parsed: Response = serde_json::from_str(raw).unwrap();
        match parsed {
            Response::Ok { last_message, .. } => assert_eq!(last_message, Some(None)),
            other => panic!("wrong response variant: {:?}", other),
        }
    }
}
