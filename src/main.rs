//! bitlink - CRC network fault simulator
//!
//! A fixed-size network of simulated computers exchanging CRC-protected
//! messages over loopback TCP, with injectable transmission faults.

mod config;
mod crc;
mod network;
mod node;
mod protocol;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{NodeClient, NodeServer};
use protocol::{ControlCommand, FaultKind, Response};

/// bitlink - CRC-protected message exchange between simulated nodes
#[derive(Parser)]
#[command(name = "bitlink")]
#[command(author = "Bitlink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Simulate a node network with CRC framing and fault injection", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the whole network (one child process per node)
    Run {
        /// Number of nodes
        #[arg(short, long)]
        nodes: Option<u16>,

        /// First node's port
        #[arg(short, long)]
        base_port: Option<u16>,
    },

    /// Run a single node server
    Node {
        /// Node identifier (also selects the port)
        #[arg(short, long)]
        id: u16,

        /// First node's port
        #[arg(short, long)]
        base_port: Option<u16>,
    },

    /// Send a CRC-framed message from one node to another
    Send {
        /// Sender node id
        #[arg(short, long)]
        from: u16,

        /// Receiver node id
        #[arg(short, long)]
        to: u16,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// Generator polynomial, e.g. 1011
        #[arg(short, long, default_value = "1010")]
        poly: String,
    },

    /// Replace a node's fault set
    Fault {
        /// Target node id
        #[arg(short, long)]
        node: u16,

        /// Comma-separated kinds: BIT_FLIP, DROP_PACKET, DELAY_PACKET.
        /// An empty list disables everything.
        #[arg(short, long, value_delimiter = ',')]
        set: Vec<FaultKind>,
    },

    /// Clear all faults on a node
    Repair {
        /// Target node id
        #[arg(short, long)]
        node: u16,
    },

    /// Show a node's fault flags and last received message
    Status {
        /// Target node id
        #[arg(short, long)]
        node: u16,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Run { nodes, base_port } => {
            run_network(config, nodes, base_port, cli.config.as_deref(), cli.verbose).await?;
        }
        Commands::Node { id, base_port } => {
            run_node(config, id, base_port).await?;
        }
        Commands::Send {
            from,
            to,
            message,
            poly,
        } => {
            run_send(config, from, to, &message, &poly).await?;
        }
        Commands::Fault { node, set } => {
            run_control(config, node, ControlCommand::SetErrors { errors: set }).await;
        }
        Commands::Repair { node } => {
            run_control(config, node, ControlCommand::Repair).await;
        }
        Commands::Status { node } => {
            run_control(config, node, ControlCommand::GetStatus).await;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Supervisor: one child OS process per node, torn down on Ctrl+C. Nodes
/// share nothing; each child owns its record outright.
async fn run_network(
    config: Config,
    nodes: Option<u16>,
    base_port: Option<u16>,
    config_path: Option<&std::path::Path>,
    verbose: bool,
) -> anyhow::Result<()> {
    let num_nodes = nodes.unwrap_or(config.network.num_nodes);
    let base_port = base_port.unwrap_or(config.network.base_port);
    let exe = std::env::current_exe()?;

    let mut children = Vec::with_capacity(num_nodes as usize);
    for id in 0..num_nodes {
        let mut command = std::process::Command::new(&exe);
        command
            .arg("node")
            .arg("--id")
            .arg(id.to_string())
            .arg("--base-port")
            .arg(base_port.to_string());
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        if verbose {
            command.arg("--verbose");
        }
        let child = command.spawn()?;
        tracing::info!("spawned node {} (pid {})", id, child.id());
        children.push(child);
    }

    println!("\n========================================");
    println!("  bitlink network running");
    println!("========================================");
    println!("  Nodes: {}", num_nodes);
    println!(
        "  Ports: {}..{}",
        base_port,
        base_port + num_nodes.saturating_sub(1)
    );
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;

    println!("\nShutting down...");
    for mut child in children {
        let _ = child.kill();
        let _ = child.wait();
    }
    tracing::info!("all node processes stopped");

    Ok(())
}

/// Run a single node server until Ctrl+C.
async fn run_node(config: Config, id: u16, base_port: Option<u16>) -> anyhow::Result<()> {
    let mut net = config.net();
    if let Some(port) = base_port {
        net.base_port = port;
    }

    let mut server = NodeServer::new(net, id);
    let addr = server.start().await?;

    println!("node {} listening on {} (Ctrl+C to stop)", id, addr);
    tokio::signal::ctrl_c().await?;

    server.stop().await?;
    tracing::info!("node {} stopped", id);

    Ok(())
}

/// Encode, apply the sender-side fault, deliver, report.
async fn run_send(
    config: Config,
    from: u16,
    to: u16,
    message: &str,
    poly: &str,
) -> anyhow::Result<()> {
    let client = NodeClient::new(config.net());
    let (response, report) = client.send_message(from, to, message, poly).await?;

    println!(
        "{} -> {} | '{}' | checksum {}",
        from, to, message, report.checksum_bits
    );
    if let Some(pos) = report.flipped_bit {
        println!("sender fault corrupted bit {}", pos);
    }
    print_response(&response);

    Ok(())
}

async fn run_control(config: Config, node: u16, cmd: ControlCommand) {
    let client = NodeClient::new(config.net());
    let response = client.control(node, cmd).await;
    print_response(&response);
}

fn print_response(response: &Response) {
    match response {
        Response::Ok {
            errors,
            last_message,
        } => {
            println!(
                "faults: BIT_FLIP={} DROP_PACKET={} DELAY_PACKET={}",
                errors.bit_flip, errors.drop_packet, errors.delay_packet
            );
            if let Some(last) = last_message {
                match last {
                    Some(m) => println!(
                        "last message: from {} crc_ok={} frame_len={}",
                        m.from, m.crc_ok, m.frame_len
                    ),
                    None => println!("last message: none"),
                }
            }
        }
        Response::Received {
            node,
            from,
            crc_ok,
            frame_len,
            delay,
        } => {
            let verdict = if *crc_ok { "OK" } else { "FAILED" };
            match delay {
                Some(d) => println!(
                    "node {} received {} bits from {}: CRC {} (delayed {:.2}s)",
                    node, frame_len, from, verdict, d
                ),
                None => println!(
                    "node {} received {} bits from {}: CRC {}",
                    node, frame_len, from, verdict
                ),
            }
        }
        Response::Dropped { node } => println!("node {} dropped the packet", node),
        Response::Error { reason } => println!("error: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["bitlink", "status", "--node", "3"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_fault_list_parsing() {
        let cli = Cli::try_parse_from([
            "bitlink",
            "fault",
            "--node",
            "2",
            "--set",
            "BIT_FLIP,DELAY_PACKET",
        ])
        .unwrap();
        match cli.command {
            Commands::Fault { node, set } => {
                assert_eq!(node, 2);
                assert_eq!(set, vec![FaultKind::BitFlip, FaultKind::DelayPacket]);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_send_defaults_poly() {
        let cli = Cli::try_parse_from([
            "bitlink", "send", "--from", "0", "--to", "1", "--message", "Hello",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { poly, .. } => assert_eq!(poly, "1010"),
            _ => panic!("wrong subcommand"),
        }
    }
}
