use anyhow::Result;
use clap::Parser;
use log::{info, trace};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use audio_reactive::config::{DEFAULT_MULTICAST_GROUP, DEFAULT_SYNC_PORT};
use audio_reactive::sync::{SyncPacket, SyncSocket};

#[derive(Parser)]
#[command(name = "sync-monitor")]
#[command(about = "Print audio sync packets seen on the network")]
struct Args {
    /// Multicast group to join
    #[arg(long, default_value_t = DEFAULT_MULTICAST_GROUP)]
    group: Ipv4Addr,

    /// UDP port to listen on
    #[arg(long, default_value_t = DEFAULT_SYNC_PORT)]
    port: u16,

    /// Print every packet instead of one per interval
    #[arg(long)]
    all: bool,

    /// Summary interval in milliseconds
    #[arg(long, default_value = "500")]
    interval_ms: u64,
}

fn bar(value: u8) -> char {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    LEVELS[(value as usize * LEVELS.len() / 256).min(LEVELS.len() - 1)]
}

fn describe(packet: &SyncPacket) -> String {
    let bands: String = packet.bands.iter().map(|&b| bar(b)).collect();
    format!(
        "{} agc {:3} sample {:3} avg {:6.1} {:7.1} Hz mag {:9.1}{}",
        bands,
        packet.sample_agc,
        packet.sample,
        packet.sample_avg,
        packet.frequency,
        packet.magnitude,
        if packet.peak { " PEAK" } else { "" }
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut socket = SyncSocket::receiver(args.group, args.port)?;
    info!("Watching {}:{} for audio sync packets (Ctrl-C to stop)", args.group, args.port);

    let mut poll = tokio::time::interval(Duration::from_millis(5));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let interval = Duration::from_millis(args.interval_ms);
    let mut last_print = Instant::now();
    let (mut good, mut bad) = (0u64, 0u64);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                while let Some(data) = socket.recv()? {
                    match SyncPacket::decode(data) {
                        Ok(packet) => {
                            good += 1;
                            if args.all || last_print.elapsed() >= interval {
                                last_print = Instant::now();
                                println!("{}", describe(&packet));
                            }
                        }
                        Err(e) => {
                            bad += 1;
                            trace!("Dropped datagram: {}", e);
                        }
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    info!("Received {} packets, rejected {}", good, bad);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_levels() {
        assert_eq!(bar(0), '▁');
        assert_eq!(bar(254), '█');
        assert_eq!(bar(128), '▅');
    }
}
