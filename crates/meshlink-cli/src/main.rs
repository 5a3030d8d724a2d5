//! meshlink command-line interface
//!
//! Tools for working with mesh frames without a radio:
//! - Decoding captured frames (header, envelope, application payload)
//! - Encoding text messages into ready-to-send frames
//! - Simulating a line of nodes flooding messages to each other
//! - Showing the effective node configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshlink_core::config::NodeConfig;
use meshlink_core::mesh::{
    ApplicationPayload, BuildOptions, ChannelKey, Envelope, MeshFrame, MeshNode, MeshStats, NodeId, NodeRecord,
    PortRegistry, SharedMedium, Simulation,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "meshlink")]
#[command(author, version, about = "Packet-radio mesh node tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Node configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a captured frame
    Decode {
        /// Frame bytes as hex
        #[arg(long)]
        hex: String,

        /// Channel PSK (base64), overrides the config
        #[arg(long)]
        psk: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Build a text message frame
    Encode {
        /// Message text
        #[arg(short, long)]
        text: String,

        /// Sender address (!xxxxxxxx or hex)
        #[arg(long)]
        from: String,

        /// Destination address, broadcast when omitted
        #[arg(long)]
        to: Option<String>,

        /// Channel PSK (base64), overrides the config
        #[arg(long)]
        psk: Option<String>,

        /// Hop limit, overrides the config
        #[arg(long)]
        hop_limit: Option<u8>,
    },

    /// Simulate a line of nodes exchanging texts
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Number of text messages to originate
        #[arg(short, long, default_value = "3")]
        messages: usize,

        /// Cycles to run after the messages are queued
        #[arg(long, default_value = "20")]
        cycles: u64,

        /// Print per-node results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective node configuration
    Info,

    /// List node records held in the configured store
    Nodes {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: &Option<PathBuf>) -> Result<NodeConfig> {
    match path {
        Some(p) => NodeConfig::load(p).with_context(|| format!("Failed to load config {}", p.display())),
        None => Ok(NodeConfig::default()),
    }
}

fn parse_node_id(s: &str) -> Result<NodeId> {
    s.parse::<NodeId>()
        .with_context(|| format!("Invalid node address: {}", s))
}

fn channel_key(config: &NodeConfig, psk: &Option<String>) -> Result<ChannelKey> {
    let psk = psk.as_deref().unwrap_or(&config.psk);
    ChannelKey::from_base64(psk).with_context(|| "Invalid channel PSK")
}

#[derive(Serialize)]
struct DecodeReport {
    dest: String,
    sender: String,
    packet_id: String,
    hop_limit: u8,
    hop_start: u8,
    want_ack: bool,
    via_mqtt: bool,
    channel_hash: u8,
    next_hop: u8,
    relay_node: u8,
    ciphertext: String,
    plaintext: String,
    port: Option<i32>,
    port_name: Option<String>,
    payload: Option<String>,
    application: Option<String>,
}

fn describe_payload(payload: &ApplicationPayload) -> String {
    match payload {
        ApplicationPayload::TextMessage(_) => format!("text {:?}", payload.text().unwrap_or_default()),
        ApplicationPayload::Position { latitude, longitude, altitude } => format!(
            "position lat={} lon={} alt={}",
            latitude.map(|v| format!("{:.7}", v)).unwrap_or_else(|| "-".into()),
            longitude.map(|v| format!("{:.7}", v)).unwrap_or_else(|| "-".into()),
            altitude.map(|v| format!("{}m", v)).unwrap_or_else(|| "-".into()),
        ),
        ApplicationPayload::NodeInfo(user) => format!(
            "nodeinfo id={} long={:?} short={:?} hw={} mac={} pubkey={}B",
            user.id,
            user.long_name,
            user.short_name,
            user.hardware_model,
            hex::encode(&user.mac_address),
            user.public_key.len()
        ),
    }
}

fn cmd_decode(config: &NodeConfig, frame_hex: String, psk: Option<String>, json: bool) -> Result<()> {
    let cleaned: String = frame_hex.trim().trim_start_matches("0x").split_whitespace().collect();
    let bytes = hex::decode(&cleaned).context("Frame is not valid hex")?;
    let key = channel_key(config, &psk)?;

    let frame = MeshFrame::parse(&bytes, &key).context("Failed to parse frame")?;
    let registry = PortRegistry::standard();
    let application = frame.envelope.as_ref().and_then(|e| registry.decode_application(e));

    let h = &frame.header;
    let report = DecodeReport {
        dest: h.dest.to_string(),
        sender: h.sender.to_string(),
        packet_id: h.packet_id.to_string(),
        hop_limit: h.flags.hop_limit(),
        hop_start: h.flags.hop_start(),
        want_ack: h.flags.want_ack(),
        via_mqtt: h.flags.via_mqtt(),
        channel_hash: h.channel_hash,
        next_hop: h.next_hop,
        relay_node: h.relay_node,
        ciphertext: hex::encode(&frame.encrypted_payload),
        plaintext: hex::encode(&frame.plaintext),
        port: frame.envelope.as_ref().map(|e| e.port),
        port_name: frame
            .envelope
            .as_ref()
            .map(|e| e.port_num().map(|p| p.label().to_string()).unwrap_or_else(|| "unregistered".into())),
        payload: frame.envelope.as_ref().map(|e| hex::encode(&e.payload)),
        application: application.as_ref().map(describe_payload),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== Mesh Frame ===");
    println!();
    println!("Dest:          {}", report.dest);
    println!("Sender:        {}", report.sender);
    println!("Packet ID:     {}", report.packet_id);
    println!(
        "Flags:         0x{:02x} (hop_limit={} hop_start={} want_ack={} via_mqtt={})",
        h.flags.as_byte(),
        report.hop_limit,
        report.hop_start,
        report.want_ack,
        report.via_mqtt
    );
    println!("Channel Hash:  0x{:02x}", report.channel_hash);
    println!("Next Hop:      0x{:02x}", report.next_hop);
    println!("Relay Node:    0x{:02x}", report.relay_node);
    println!("Ciphertext:    {} ({} bytes)", report.ciphertext, frame.encrypted_payload.len());
    println!("Plaintext:     {}", report.plaintext);
    println!();

    match &frame.envelope {
        Some(envelope) => {
            println!("Envelope:");
            println!("  Port:          {} ({})", envelope.port, report.port_name.as_deref().unwrap_or("-"));
            println!("  Payload:       {} bytes", envelope.payload.len());
            println!("  Want Response: {}", envelope.want_response);
            if let Some(bitfield) = envelope.bitfield {
                println!("  Bitfield:      0x{:02x}", bitfield);
            }
            println!();
            match &report.application {
                Some(app) => println!("Application:   {}", app),
                None => println!("Application:   (not decoded)"),
            }
        }
        None => println!("Envelope:      (absent - wrong key or not a mesh frame)"),
    }

    Ok(())
}

fn cmd_encode(
    config: &NodeConfig,
    text: String,
    from: String,
    to: Option<String>,
    psk: Option<String>,
    hop_limit: Option<u8>,
) -> Result<()> {
    let sender = parse_node_id(&from)?;
    let dest = match &to {
        Some(s) if s.eq_ignore_ascii_case("broadcast") => NodeId::BROADCAST,
        Some(s) => parse_node_id(s)?,
        None => NodeId::BROADCAST,
    };
    let key = channel_key(config, &psk)?;
    let hop_limit = hop_limit.unwrap_or(config.timing.hop_limit);
    if hop_limit > 7 {
        anyhow::bail!("Hop limit {} does not fit in 3 bits", hop_limit);
    }

    let options = BuildOptions {
        hop_limit,
        channel_hash: key.channel_hash(&config.channel_name),
        ..Default::default()
    };
    let out = MeshFrame::build(dest, sender, &Envelope::text(&text), &key, &options);
    info!(packet_id = %out.packet_id, len = out.bytes.len(), "frame built");

    println!("{}", hex::encode(&out.bytes));
    Ok(())
}

#[derive(Serialize)]
struct NodeSummary {
    address: String,
    name: String,
    known_nodes: usize,
    messages_heard: usize,
    stats: MeshStats,
}

fn cmd_simulate(config: &NodeConfig, nodes: usize, messages: usize, cycles: u64, json: bool) -> Result<()> {
    if nodes < 2 {
        anyhow::bail!("Need at least 2 nodes, got {}", nodes);
    }

    let mut sim = Simulation::with_medium(SharedMedium::line(nodes), nodes, config)
        .context("Failed to create simulation")?;

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    if !json {
        println!("=== Mesh Flood Simulation ===");
        println!();
        println!("Nodes:    {} (line topology)", nodes);
        println!("Messages: {}", messages);
        println!("Cycles:   {}", cycles);
        println!();
    }

    for i in 0..messages {
        let from = i % nodes;
        let text = format!("Message {}", i);
        if let Some(id) = sim.send_text(from, &text) {
            info!(node = from, packet_id = %id, "queued '{}'", text);
        }
        sim.step()?;
    }

    for _ in 0..cycles {
        if !running.load(Ordering::SeqCst) {
            warn!("Interrupted after {} cycles", sim.step_count());
            break;
        }
        sim.step()?;
    }

    let summaries: Vec<NodeSummary> = sim
        .nodes()
        .iter()
        .map(|node| {
            let me = node.address();
            NodeSummary {
                address: me.to_string(),
                name: node.identity().long_name.clone(),
                known_nodes: node.directory().len(),
                messages_heard: node
                    .directory()
                    .iter()
                    .filter(|n| n.address() != me)
                    .map(|n| n.messages.len())
                    .sum(),
                stats: node.stats(),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("Per-Node Statistics:");
    println!(
        "{:<11} {:<6} {:<6} {:<6} {:<6} {:<6} {:<6} {:<6}",
        "Node", "Known", "Msgs", "RX", "TX", "Fwd", "Dup", "Ack"
    );
    println!("{}", "-".repeat(60));
    for s in &summaries {
        println!(
            "{:<11} {:<6} {:<6} {:<6} {:<6} {:<6} {:<6} {:<6}",
            s.address,
            s.known_nodes,
            s.messages_heard,
            s.stats.frames_rx,
            s.stats.frames_tx,
            s.stats.forwarded,
            s.stats.duplicates,
            s.stats.acks
        );
    }
    println!();

    for node in sim.nodes() {
        println!("Directory of {}:", node.address());
        let mut entries: Vec<_> = node.directory().iter().collect();
        entries.sort_by_key(|n| n.address());
        for entry in entries {
            println!("  {:<11} {:<16} {} message(s)", entry.address(), entry.record.display_name(), entry.messages.len());
        }
    }
    println!();
    println!("Air transmissions: {}", sim.medium().transmissions());

    Ok(())
}

fn cmd_info(config: &NodeConfig, path: &Option<PathBuf>) -> Result<()> {
    let key = config.key().context("Invalid channel PSK")?;
    let address = config.address()?;

    println!("=== meshlink Node Configuration ===");
    println!();
    match path {
        Some(p) => println!("Source:        {}", p.display()),
        None => println!("Source:        built-in defaults"),
    }
    match address {
        Some(a) => println!("Address:       {}", a),
        None => println!("Address:       (random at startup)"),
    }
    println!("Names:         {} / {}", config.long_name, config.short_name);
    println!("Hardware:      {}", config.hardware_model);
    println!("Channel:       {} (hash 0x{:02x})", config.channel_name, key.channel_hash(&config.channel_name));
    println!("Key:           AES-{}", key.bits());
    match &config.store_path {
        Some(p) => println!("Node store:    {}", p.display()),
        None => println!("Node store:    (in memory)"),
    }
    println!();
    println!("{}", config.to_toml_string()?);

    Ok(())
}

fn cmd_nodes(config: &NodeConfig, json: bool) -> Result<()> {
    let Some(path) = &config.store_path else {
        anyhow::bail!("No store_path in the node configuration");
    };
    let store = config.open_store().context("Failed to open node store")?;
    let node = MeshNode::new(config, store).context("Failed to restore node directory")?;

    let mut records: Vec<&NodeRecord> = node.directory().iter().map(|n| &n.record).collect();
    records.sort_by_key(|r| r.address);

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!("=== Known Nodes ({}) ===", path.display());
    println!();
    println!("{:<11} {:<24} {:<6} {:<12} {:<12} {:<6}", "Node", "Name", "HW", "Lat", "Lon", "Alt");
    println!("{}", "-".repeat(75));
    for r in &records {
        println!(
            "{:<11} {:<24} {:<6} {:<12} {:<12} {:<6}",
            r.address,
            r.display_name(),
            r.hardware_model.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
            r.latitude.map(|v| format!("{:.5}", v)).unwrap_or_else(|| "-".into()),
            r.longitude.map(|v| format!("{:.5}", v)).unwrap_or_else(|| "-".into()),
            r.altitude.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    info!(count = records.len(), "listed stored nodes");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Decode { hex, psk, json } => cmd_decode(&config, hex, psk, json),

        Commands::Encode {
            text,
            from,
            to,
            psk,
            hop_limit,
        } => cmd_encode(&config, text, from, to, psk, hop_limit),

        Commands::Simulate {
            nodes,
            messages,
            cycles,
            json,
        } => cmd_simulate(&config, nodes, messages, cycles, json),

        Commands::Info => cmd_info(&config, &cli.config),

        Commands::Nodes { json } => cmd_nodes(&config, json),
    }
}
