//! Audio sync: sharing the feature vector between devices over UDP multicast.

pub mod packet;
pub mod transport;

pub use packet::{SyncPacket, PACKET_HEADER, PACKET_SIZE};
pub use transport::SyncSocket;

use log::{trace, warn};

use crate::config::{AudioConfig, SyncMode};
use crate::error::SyncError;
use crate::features::FeatureStore;

/// Minimum spacing between two transmitted packets.
pub const TRANSMIT_INTERVAL_MS: u64 = 20;
/// Datagrams drained per receive poll at most.
const MAX_DRAIN: usize = 8;

/// Packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sent: u64,
    pub received: u64,
    pub rejected: u64,
}

/// One side of the sync protocol, bound to a socket.
pub struct SyncLink {
    socket: SyncSocket,
    last_transmit_ms: Option<u64>,
    stats: SyncStats,
}

impl SyncLink {
    pub fn new(socket: SyncSocket) -> Self {
        Self {
            socket,
            last_transmit_ms: None,
            stats: SyncStats::default(),
        }
    }

    /// Open the socket the configured mode needs. `None` when sync is off.
    pub fn from_config(config: &AudioConfig) -> Result<Option<Self>, SyncError> {
        let socket = match config.sync_mode {
            SyncMode::Off => return Ok(None),
            SyncMode::Transmit => SyncSocket::transmitter(config.multicast_group, config.sync_port)?,
            SyncMode::Receive => SyncSocket::receiver(config.multicast_group, config.sync_port)?,
        };
        Ok(Some(Self::new(socket)))
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn socket(&self) -> &SyncSocket {
        &self.socket
    }

    /// Send the current features if the transmit interval has passed.
    ///
    /// Returns whether a packet went out. Send failures are logged and dropped.
    pub fn transmit(&mut self, store: &FeatureStore, now_ms: u64) -> bool {
        let due = self
            .last_transmit_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= TRANSMIT_INTERVAL_MS);
        if !due {
            return false;
        }
        self.last_transmit_ms = Some(now_ms);

        let packet = SyncPacket::from_store(store);
        match self.socket.send(&packet) {
            Ok(()) => {
                self.stats.sent += 1;
                true
            }
            Err(e) => {
                warn!("Audio sync send failed: {}", e);
                false
            }
        }
    }

    /// Apply every valid packet waiting on the socket, up to a small batch.
    ///
    /// Malformed packets leave the store untouched. Returns the number applied.
    pub fn receive(&mut self, store: &FeatureStore) -> usize {
        let mut applied = 0;
        for _ in 0..MAX_DRAIN {
            let data = match self.socket.recv() {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => {
                    warn!("Audio sync receive failed: {}", e);
                    break;
                }
            };
            match SyncPacket::decode(data) {
                Ok(packet) => {
                    packet.apply_to(store);
                    self.stats.received += 1;
                    applied += 1;
                }
                Err(e) => {
                    trace!("Dropped sync datagram: {}", e);
                    self.stats.rejected += 1;
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::SpectrumFeatures;
    use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
    use std::time::{Duration, Instant};

    fn loopback_pair() -> (SyncLink, SyncLink) {
        let receiver = SyncSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let target = receiver.local_addr().unwrap();
        let sender = SyncSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .unwrap()
            .with_target(target);
        (SyncLink::new(sender), SyncLink::new(receiver))
    }

    fn receive_within(link: &mut SyncLink, store: &FeatureStore, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let applied = link.receive(store);
            if applied > 0 || Instant::now() > deadline {
                return applied;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_loopback_transfer() {
        let (mut tx, mut rx) = loopback_pair();
        let source = FeatureStore::new();
        let mut spectrum = SpectrumFeatures::default();
        spectrum.bands = [42; 16];
        source.publish_spectrum(spectrum);
        source.trigger_peak(0);

        assert!(tx.transmit(&source, 100));
        let sink = FeatureStore::new();
        assert_eq!(receive_within(&mut rx, &sink, Duration::from_secs(2)), 1);
        assert_eq!(sink.spectrum().bands, [42; 16]);
        assert!(sink.peak());
        assert_eq!(rx.stats().received, 1);
    }

    #[test]
    fn test_transmit_interval() {
        let (mut tx, _rx) = loopback_pair();
        let store = FeatureStore::new();
        assert!(tx.transmit(&store, 0));
        assert!(!tx.transmit(&store, 19));
        assert!(tx.transmit(&store, 20));
        assert_eq!(tx.stats().sent, 2);
    }

    #[test]
    fn test_malformed_datagrams_leave_store_untouched() {
        let (_tx, mut rx) = loopback_pair();
        let target = rx.socket().local_addr().unwrap();
        let raw = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

        let mut bad_header = SyncPacket::from_store(&FeatureStore::new()).encode();
        bad_header[0] = b'X';
        bad_header[53] = 99;
        raw.send_to(&bad_header, target).unwrap();
        raw.send_to(&[0u8; 10], target).unwrap();

        let store = FeatureStore::new();
        let before = store.snapshot(10);
        let deadline = Instant::now() + Duration::from_secs(2);
        while rx.stats().rejected < 2 && Instant::now() < deadline {
            rx.receive(&store);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(rx.stats().rejected, 2);
        assert_eq!(store.snapshot(10), before);
    }

    #[test]
    fn test_sync_off_opens_nothing() {
        let config = AudioConfig::default();
        assert!(SyncLink::from_config(&config).unwrap().is_none());
    }
}
