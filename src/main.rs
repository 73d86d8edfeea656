use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn};

use nfq_handler::{
    BoxError, InterceptedPacket, IpHeaderDecoder, MonitorTransport, NfqOptions, NfqTransport,
    PacketDecoder, QueueConfig, QueueHandler, VerdictCode,
};

/// Accepts and drops packets from a netfilter queue in turn.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Queue number, as in `iptables -j NFQUEUE --queue-num N`
    queue_num: Option<u16>,

    /// Largest payload captured per packet, in bytes
    #[arg(short, long)]
    buffer_size: Option<u32>,

    /// TOML file with queue settings; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Packets the kernel may hold for the queue
    #[arg(long)]
    queue_max_len: Option<u32>,

    /// Accept packets when the kernel queue overflows
    #[arg(long)]
    fail_open: bool,

    /// Ask the kernel for the sender's UID and GID
    #[arg(long)]
    recv_uid_gid: bool,

    /// Ask the kernel for the sender's security context
    #[arg(long = "recv-secctx")]
    recv_security_context: bool,

    /// Accept GSO packets and packets with partial checksums
    #[arg(long)]
    recv_gso: bool,

    /// Seconds between traffic reports, 0 disables them
    #[arg(long)]
    stats_interval: Option<u64>,
}

fn load_config(args: &Args) -> Result<QueueConfig, BoxError> {
    let mut config = match &args.config {
        Some(path) => QueueConfig::from_file(path)?,
        None => QueueConfig::default(),
    };

    if let Some(queue_num) = args.queue_num {
        config.queue_num = queue_num;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.buffer_size = buffer_size;
    }
    if let Some(queue_max_len) = args.queue_max_len {
        config.queue_max_len = queue_max_len;
    }
    if args.fail_open {
        config.fail_open = true;
    }
    if args.recv_uid_gid {
        config.recv_uid_gid = true;
    }
    if args.recv_security_context {
        config.recv_security_context = true;
    }
    if args.recv_gso {
        config.recv_gso = true;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(1);
        }
    };

    let transport = MonitorTransport::new(
        &format!("queue-{}", config.queue_num),
        NfqTransport::new(NfqOptions {
            queue_max_len: config.queue_max_len,
            fail_open: config.fail_open,
            recv_uid_gid: config.recv_uid_gid,
            recv_security_context: config.recv_security_context,
            recv_gso: config.recv_gso,
        }),
        config.stats_interval(),
    );

    let mut handler = QueueHandler::new(transport).with_idle_backoff(config.idle_backoff());

    info!("Creating queue handler...");
    if let Err(e) = handler.open(config.queue_num, config.buffer_size) {
        error!("{}", e);
        return ExitCode::from(1);
    }
    info!("Queue handler created!");

    let close = handler.close_handle();
    if let Err(e) = ctrlc::set_handler(move || close.close()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let decoder = IpHeaderDecoder::new();
    let mut counter: u64 = 0;

    let result = handler.run(|mut packet: InterceptedPacket| -> Result<(), BoxError> {
        info!("packet received");
        match decoder.decode(packet.payload(), 0) {
            Some(ip) => info!(
                " ip src={} dst={} proto={}",
                ip.src,
                ip.dst,
                ip.protocol_name()
            ),
            None => info!(" not an IP packet ({} bytes)", packet.payload().len()),
        }

        // Even packets pass, odd packets are dropped
        let verdict = if counter % 2 == 0 {
            VerdictCode::Accept
        } else {
            VerdictCode::Drop
        };
        counter += 1;

        packet.set_verdict(verdict)?;
        Ok(())
    });

    match result {
        Ok(()) => {
            info!("Queue {} shut down after {} packets", config.queue_num, counter);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}
