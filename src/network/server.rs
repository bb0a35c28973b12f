//! Node server
//!
//! One server per simulated node. The accept loop spawns a handler task per
//! inbound connection; each connection carries exactly one newline-terminated
//! JSON request and receives exactly one response before the server closes
//! it. All handlers share the node record behind a mutex held across the
//! whole fault-evaluation and verification sequence of a delivery, so a
//! concurrent repair cannot interleave with an in-flight message.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use super::NetworkConfig;
use crate::crc;
use crate::node::{Node, Packet, PacketStatus, SharedNode};
use crate::protocol::{
    read_json_line, write_json_line, CodecError, ControlCommand, LastMessage, Request, Response,
};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server not running")]
    NotRunning,

    #[error("bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// A node's TCP server.
pub struct NodeServer {
    /// Network settings (port mapping, delay bounds)
    config: NetworkConfig,
    /// The node record all handlers share
    node: SharedNode,
    /// Node identifier, duplicated out of the record for logging without a lock
    node_id: u16,
    /// Shutdown signal for the accept loop
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl NodeServer {
    pub fn new(config: NetworkConfig, node_id: u16) -> Self {
        let node = Node::new(node_id, config.base_port);
        Self {
            config,
            node: Arc::new(Mutex::new(node)),
            node_id,
            shutdown_tx: None,
        }
    }

    /// Shared handle to the node record, for tests and supervisors.
    pub fn node(&self) -> SharedNode {
        self.node.clone()
    }

    /// Bind the node's port and spawn the accept loop.
    ///
    /// Returns the bound address, which matters when the configured base
    /// port is 0 and the OS picks one.
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.shutdown_tx.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = self.config.node_addr(self.node_id);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("failed to bind {}: {}", bind_addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!("node {} listening on {}", self.node_id, local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let node = self.node.clone();
        let node_id = self.node_id;
        let delay_range = self.config.delay_range_ms;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                tracing::debug!("node {}: connection from {}", node_id, peer);
                                let node = node.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, node, delay_range).await {
                                        tracing::warn!("node {}: connection handler failed: {}", node_id, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("node {}: accept error: {}", node_id, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("node {}: shutdown requested", node_id);
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Signal the accept loop to stop. In-flight handlers run to completion.
    pub async fn stop(&mut self) -> ServerResult<()> {
        match self.shutdown_tx.take() {
            Some(tx) => {
                let _ = tx.send(()).await;
                Ok(())
            }
            None => Err(ServerError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}

/// Serve one connection: read the single request line, dispatch, write the
/// single response line. A request that fails to parse is answered with
/// `status:error`, never silently discarded.
async fn handle_connection(
    stream: TcpStream,
    node: SharedNode,
    delay_range: (u64, u64),
) -> Result<(), CodecError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let response = match read_json_line::<_, Request>(&mut reader).await {
        Ok(request) => dispatch(request, &node, delay_range).await,
        // Nothing arrived at all; there is no peer left to answer.
        Err(CodecError::Io(e)) => return Err(CodecError::Io(e)),
        Err(e) => Response::error(e.to_string()),
    };

    write_json_line(&mut write_half, &response).await
}

async fn dispatch(request: Request, node: &SharedNode, delay_range: (u64, u64)) -> Response {
    match request {
        Request::Control(cmd) => handle_control(cmd, node).await,
        Request::Message {
            from,
            frame_bits,
            crc_poly,
            message,
        } => handle_message(from, frame_bits, crc_poly, message, node, delay_range).await,
    }
}

async fn handle_control(cmd: ControlCommand, node: &SharedNode) -> Response {
    let mut node = node.lock().await;
    match cmd {
        ControlCommand::SetErrors { errors } => {
            let flags = node.set_faults(&errors);
            tracing::info!("node {}: faults set to {:?}", node.id(), errors);
            Response::Ok {
                errors: flags,
                last_message: None,
            }
        }
        ControlCommand::Repair => {
            let flags = node.repair();
            tracing::info!("node {}: repaired", node.id());
            Response::Ok {
                errors: flags,
                last_message: None,
            }
        }
        ControlCommand::GetStatus => Response::Ok {
            errors: node.faults(),
            last_message: Some(node.last_received().cloned()),
        },
    }
}

/// Data-plane delivery. The lock guard lives for the whole body: drop check,
/// delay, verification and the snapshot update are one atomic sequence with
/// respect to other connections.
async fn handle_message(
    from: u16,
    frame_bits: String,
    crc_poly: String,
    message: Option<String>,
    node: &SharedNode,
    delay_range: (u64, u64),
) -> Response {
    let mut node = node.lock().await;
    let node_id = node.id();

    // Drop wins over every other fault: no delay, no CRC, no state change.
    if node.faults().drop_packet {
        tracing::info!("node {}: dropped frame from {}", node_id, from);
        node.push_history(Packet {
            sender: from,
            receiver: node_id,
            message,
            frame_bits,
            poly: crc_poly,
            status: PacketStatus::Dropped,
            delay_secs: None,
            crc_valid: None,
        });
        return Response::Dropped { node: node_id };
    }

    let mut delay_secs = None;
    if node.faults().delay_packet {
        let (lo, hi) = delay_range;
        let millis = if lo >= hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        };
        tracing::debug!("node {}: delaying frame from {} by {}ms", node_id, from, millis);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        delay_secs = Some((millis as f64 / 1000.0 * 100.0).round() / 100.0);
    }

    let crc_ok = match crc::verify(&frame_bits, &crc_poly) {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("node {}: rejected frame from {}: {}", node_id, from, e);
            node.push_history(Packet {
                sender: from,
                receiver: node_id,
                message,
                frame_bits,
                poly: crc_poly,
                status: PacketStatus::Error,
                delay_secs,
                crc_valid: None,
            });
            return Response::error(e.to_string());
        }
    };

    let frame_len = frame_bits.len();
    node.record_delivery(LastMessage {
        from,
        crc_ok,
        frame_len,
        frame_bits: frame_bits.clone(),
        message: message.clone(),
    });
    node.push_history(Packet {
        sender: from,
        receiver: node_id,
        message,
        frame_bits,
        poly: crc_poly,
        status: PacketStatus::Delivered,
        delay_secs,
        crc_valid: Some(crc_ok),
    });
    tracing::info!(
        "node {}: received {} bits from {}, crc_ok={}",
        node_id,
        frame_len,
        from,
        crc_ok
    );

    Response::Received {
        node: node_id,
        from,
        crc_ok,
        frame_len,
        delay: delay_secs,
    }
}
