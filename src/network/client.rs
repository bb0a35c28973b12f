//! Driver client
//!
//! The driver side of the control/data plane: open a connection to one node,
//! write a single request line, read the single response line, close.
//! Transport failures never propagate as crashes; they come back as
//! synthetic `status:error` responses, which is what the original
//! visualization expected from its socket helpers.
//!
//! The BIT_FLIP fault lives here, not in the server: corruption is the
//! sender's doing and is applied to the frame after encoding, immediately
//! before transmission. Drop and delay stay on the receiving node.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use super::NetworkConfig;
use crate::crc::{self, CrcError};
use crate::protocol::{
    read_json_line, write_json_line, CodecError, ControlCommand, FaultFlags, Request, Response,
};

/// Client errors raised before anything touches the wire.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot send a message from node {0} to itself")]
    SelfSend(u16),

    #[error("CRC error: {0}")]
    Crc(#[from] CrcError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// What the driver actually put on the wire for one send.
#[derive(Debug, Clone)]
pub struct SendReport {
    /// Frame as transmitted, after any sender-side corruption.
    pub frame_bits: String,
    /// Checksum portion of the clean frame.
    pub checksum_bits: String,
    /// Bit position flipped by the sender's BIT_FLIP fault, if any.
    pub flipped_bit: Option<usize>,
}

/// One-shot driver client for the node network.
pub struct NodeClient {
    config: NetworkConfig,
}

impl NodeClient {
    pub fn new(config: NetworkConfig) -> Self {
        Self { config }
    }

    /// Issue a control command to a node.
    pub async fn control(&self, node_id: u16, cmd: ControlCommand) -> Response {
        self.request(node_id, &Request::Control(cmd)).await
    }

    /// One-shot request/response exchange with `node_id`. Connection
    /// failures and timeouts are folded into a synthetic error response.
    pub async fn request(&self, node_id: u16, request: &Request) -> Response {
        match self.try_request(node_id, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("node {} unreachable: {}", node_id, e);
                Response::error(e.to_string())
            }
        }
    }

    /// Encode `text`, apply the sender's BIT_FLIP fault, and deliver the
    /// frame to `to`. `crc_ok` in the response is the receiver's verdict;
    /// the client never computes one.
    pub async fn send_message(
        &self,
        from: u16,
        to: u16,
        text: &str,
        poly: &str,
    ) -> ClientResult<(Response, SendReport)> {
        if from == to {
            return Err(ClientError::SelfSend(from));
        }

        let clean = crc::encode(text, poly)?;
        let checksum_bits = clean[clean.len() - crc::degree(poly)..].to_string();

        let mut frame_bits = clean;
        let mut flipped_bit = None;
        if let Some(faults) = self.sender_faults(from).await {
            if faults.bit_flip && !frame_bits.is_empty() {
                let pos = rand::thread_rng().gen_range(0..frame_bits.len());
                frame_bits = flip_bit(&frame_bits, pos);
                flipped_bit = Some(pos);
                tracing::info!("sender {}: BIT_FLIP corrupted bit {}", from, pos);
            }
        }

        let request = Request::Message {
            from,
            frame_bits: frame_bits.clone(),
            crc_poly: poly.to_string(),
            message: Some(text.to_string()),
        };
        let response = self.request(to, &request).await;

        Ok((
            response,
            SendReport {
                frame_bits,
                checksum_bits,
                flipped_bit,
            },
        ))
    }

    /// The sender's current fault flags, if its node answers. An unreachable
    /// sender simply transmits clean; its faults cannot be evaluated.
    async fn sender_faults(&self, node_id: u16) -> Option<FaultFlags> {
        match self.control(node_id, ControlCommand::GetStatus).await {
            Response::Ok { errors, .. } => Some(errors),
            _ => None,
        }
    }

    async fn try_request(&self, node_id: u16, request: &Request) -> Result<Response, CodecError> {
        let addr = self.config.node_addr(node_id);

        let connect = TcpStream::connect(&addr);
        let stream = tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect,
        )
        .await
        .map_err(|_| timeout_error(format!("connect to {} timed out", addr)))??;

        let (read_half, mut write_half) = stream.into_split();
        write_json_line(&mut write_half, request).await?;

        let mut reader = BufReader::new(read_half);
        tokio::time::timeout(
            Duration::from_millis(self.config.read_timeout_ms),
            read_json_line(&mut reader),
        )
        .await
        .map_err(|_| timeout_error(format!("no response from {}", addr)))?
    }
}

fn timeout_error(message: String) -> CodecError {
    CodecError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, message))
}

/// Copy of `bits` with the character at `pos` inverted.
fn flip_bit(bits: &str, pos: usize) -> String {
    bits.char_indices()
        .map(|(i, c)| if i == pos { if c == '0' { '1' } else { '0' } } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeServer;
    use crate::protocol::FaultKind;
    use tokio::net::TcpListener;

    /// Reserve `count` consecutive loopback ports. The listeners are dropped
    /// before the servers rebind, which is racy in principle but fine for a
    /// test process.
    async fn reserve_ports(count: u16) -> u16 {
        'outer: loop {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = probe.local_addr().unwrap().port();
            if base > u16::MAX - count {
                continue;
            }
            let mut held = vec![probe];
            for offset in 1..count {
                match TcpListener::bind(("127.0.0.1", base + offset)).await {
                    Ok(listener) => held.push(listener),
                    Err(_) => continue 'outer,
                }
            }
            return base;
        }
    }

    async fn start_node(base_port: u16, id: u16) -> NodeServer {
        let mut server = NodeServer::new(NetworkConfig::new(base_port), id);
        server.start().await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_self_send_is_refused() {
        let client = NodeClient::new(NetworkConfig::default());
        let result = client.send_message(3, 3, "hi", "1011").await;
        assert!(matches!(result, Err(ClientError::SelfSend(3))));
    }

    #[tokio::test]
    async fn test_bad_polynomial_is_a_local_error() {
        let client = NodeClient::new(NetworkConfig::default());
        let result = client.send_message(0, 1, "hi", "0x1").await;
        assert!(matches!(result, Err(ClientError::Crc(_))));
    }

    #[tokio::test]
    async fn test_unreachable_node_yields_synthetic_error() {
        let base = reserve_ports(1).await;
        // Nothing listens on the reserved port once the probe is dropped.
        let mut config = NetworkConfig::new(base);
        config.connect_timeout_ms = 300;
        config.read_timeout_ms = 300;
        let client = NodeClient::new(config);

        let response = client.control(0, ControlCommand::GetStatus).await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_clean_send_delivers_and_verifies() {
        let base = reserve_ports(2).await;
        let _sender = start_node(base, 0).await;
        let _receiver = start_node(base, 1).await;

        let client = NodeClient::new(NetworkConfig::new(base));
        let (response, report) = client.send_message(0, 1, "Hello", "1010").await.unwrap();

        assert_eq!(report.checksum_bits.len(), 3);
        assert_eq!(report.flipped_bit, None);
        assert_eq!(
            response,
            Response::Received {
                node: 1,
                from: 0,
                crc_ok: true,
                frame_len: 43,
                delay: None,
            }
        );
    }

    #[tokio::test]
    async fn test_sender_bit_flip_corrupts_before_transmission() {
        let base = reserve_ports(2).await;
        let _sender = start_node(base, 0).await;
        let _receiver = start_node(base, 1).await;

        let client = NodeClient::new(NetworkConfig::new(base));
        client
            .control(
                0,
                ControlCommand::SetErrors {
                    errors: vec![FaultKind::BitFlip],
                },
            )
            .await;

        let (response, report) = client.send_message(0, 1, "Hello", "1011").await.unwrap();

        let pos = report.flipped_bit.expect("BIT_FLIP must corrupt the frame");
        assert!(pos < report.frame_bits.len());
        // Single-bit corruption against a generator ending in '1' is always
        // caught by the receiver.
        match response {
            Response::Received { crc_ok, .. } => assert!(!crc_ok),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
