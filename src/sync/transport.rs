use log::{info, trace};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use super::packet::{SyncPacket, PACKET_SIZE};
use crate::error::SyncError;

/// Large enough to see oversized datagrams as oversized instead of truncated.
const RECV_BUFFER: usize = 1500;

/// Non-blocking UDP endpoint for sync packets.
pub struct SyncSocket {
    socket: UdpSocket,
    target: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl SyncSocket {
    /// Bind to `addr` without joining any group.
    pub fn bind(addr: SocketAddr) -> Result<Self, SyncError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target: None,
            buffer: vec![0u8; RECV_BUFFER],
        })
    }

    /// Socket that sends to `group:port`.
    pub fn transmitter(group: Ipv4Addr, port: u16) -> Result<Self, SyncError> {
        let socket = Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        socket.socket.set_multicast_loop_v4(true)?;
        info!("Audio sync transmitting to {}:{}", group, port);
        Ok(socket.with_target(SocketAddr::V4(SocketAddrV4::new(group, port))))
    }

    /// Socket listening on `port` and joined to `group`.
    pub fn receiver(group: Ipv4Addr, port: u16) -> Result<Self, SyncError> {
        let socket = Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
        socket.socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        info!("Audio sync listening on {}:{}", group, port);
        Ok(socket)
    }

    pub fn with_target(mut self, target: SocketAddr) -> Self {
        self.target = Some(target);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SyncError> {
        Ok(self.socket.local_addr()?)
    }

    /// Fire and forget. A socket without a target sends nothing.
    pub fn send(&self, packet: &SyncPacket) -> Result<(), SyncError> {
        let Some(target) = self.target else {
            return Ok(());
        };
        let bytes = packet.encode();
        self.socket.send_to(&bytes, target)?;
        trace!("Sent {} byte sync packet to {}", PACKET_SIZE, target);
        Ok(())
    }

    /// Next pending datagram, `None` when nothing is queued.
    pub fn recv(&mut self) -> Result<Option<&[u8]>, SyncError> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((len, from)) => {
                trace!("Received {} byte datagram from {}", len, from);
                Ok(Some(&self.buffer[..len]))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
