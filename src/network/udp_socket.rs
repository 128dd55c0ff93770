use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
};

use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::PacketTransport;

/// Largest datagram we accept. Longer datagrams are truncated by the OS and
/// then rejected by the decoder.
const RECV_BUFFER_SIZE: usize = 4096;

/// A packet larger than this may be fragmented, so ideally we wouldn't send packets larger than
/// this.
const IDEAL_MAX_UDP_PACKET_SIZE: usize = 508;

/// Non-blocking UDP transport. Listens on 0.0.0.0 at a given port.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    recv_buffer: Box<[u8; RECV_BUFFER_SIZE]>,
}

impl UdpTransport {
    /// Binds a UDP socket to 0.0.0.0:port and sets it to non-blocking mode.
    pub fn bind_to_port(port: u16) -> Result<Self, std::io::Error> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            recv_buffer: Box::new([0; RECV_BUFFER_SIZE]),
        })
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }
}

impl PacketTransport<SocketAddr> for UdpTransport {
    fn send_to(&mut self, packet: &[u8], addr: &SocketAddr) {
        // Input windows grow while a peer stops acknowledging; large packets are
        // harmless once in a while but hint at a peer that went silent.
        if packet.len() > IDEAL_MAX_UDP_PACKET_SIZE {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::NetworkProtocol,
                "Sending UDP packet of size {} bytes, which is larger than ideal ({})",
                packet.len(),
                IDEAL_MAX_UDP_PACKET_SIZE
            );
        }
        if let Err(e) = self.socket.send_to(packet, addr) {
            report_violation!(
                ViolationSeverity::Warning,
                ViolationKind::NetworkProtocol,
                "Failed to send UDP packet to {}: {}",
                addr,
                e
            );
        }
    }

    fn receive_all_packets(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut received = Vec::with_capacity(4);
        loop {
            match self.socket.recv_from(&mut self.recv_buffer[..]) {
                Ok((len, src_addr)) => {
                    if let Some(bytes) = self.recv_buffer.get(..len) {
                        received.push((src_addr, bytes.to_vec()));
                    }
                },
                // there are no more packets
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return received,
                // datagram sockets sometimes report this after a send to a closed port
                Err(ref err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    report_violation!(
                        ViolationSeverity::Error,
                        ViolationKind::NetworkProtocol,
                        "Unexpected socket error: {:?}: {}",
                        err.kind(),
                        err
                    );
                    return received;
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[cfg(not(miri))]
    fn wait_for_packets(
        transport: &mut UdpTransport,
        expected: usize,
        max_retries: u32,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut all = Vec::new();
        for _ in 0..max_retries {
            all.extend(transport.receive_all_packets());
            if all.len() >= expected {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        all
    }

    // Sockets bind to 0.0.0.0:port, but some platforms cannot send to 0.0.0.0.
    #[cfg(not(miri))]
    fn loopback(transport: &UdpTransport) -> SocketAddr {
        SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            transport.local_addr().unwrap().port(),
        )
    }

    #[test]
    #[cfg(not(miri))] // Miri cannot execute foreign functions like socket()
    fn receive_is_non_blocking() {
        let mut transport = UdpTransport::bind_to_port(0).unwrap();
        assert!(transport.receive_all_packets().is_empty());
        assert_ne!(transport.local_addr().unwrap().port(), 0);
    }

    #[test]
    #[cfg(not(miri))]
    fn send_and_receive_raw_bytes() {
        let mut a = UdpTransport::bind_to_port(0).unwrap();
        let mut b = UdpTransport::bind_to_port(0).unwrap();
        let addr_a = loopback(&a);
        let addr_b = loopback(&b);

        a.send_to(&[0, 0, 0, 0, 4, 0], &addr_b);
        let received = wait_for_packets(&mut b, 1, 20);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.port(), addr_a.port());
        assert_eq!(received[0].1, vec![0, 0, 0, 0, 4, 0]);
    }

    #[test]
    #[cfg(not(miri))]
    fn send_to_invalid_address_does_not_panic() {
        let mut transport = UdpTransport::bind_to_port(0).unwrap();
        let invalid = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        transport.send_to(&[1, 2, 3], &invalid);
    }
}
