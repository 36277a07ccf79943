//! Development medium: Ethernet-style framing over a UDP broadcast socket.
//!
//! Stands in for the raw packet bindings on lab setups and simulators.
//! Every datagram carries a 14-byte pseudo link header (destination, source,
//! EtherType) followed by the beacon frame, mirroring what the production
//! capture glue would see on the wire.

use flock_beacon::{BeaconError, Medium, RxFrame};
use flock_proto::NodeId;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

const PSEUDO_HEADER: usize = 6 + 6 + 2;

pub struct UdpBroadcastMedium {
    socket: UdpSocket,
    target: SocketAddrV4,
    own_id: NodeId,
}

impl UdpBroadcastMedium {
    /// Binds the broadcast port and prepares the shared broadcast target.
    pub fn open(own_id: NodeId, port: u16) -> Result<UdpBroadcastMedium, BeaconError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_broadcast(true)?;
        Ok(UdpBroadcastMedium {
            socket,
            target: SocketAddrV4::new(Ipv4Addr::BROADCAST, port),
            own_id,
        })
    }
}

impl Medium for UdpBroadcastMedium {
    fn send(&self, ether_type: u16, payload: &[u8]) -> Result<(), BeaconError> {
        let mut frame = Vec::with_capacity(PSEUDO_HEADER + payload.len());
        frame.extend_from_slice(NodeId::BROADCAST.as_bytes());
        frame.extend_from_slice(self.own_id.as_bytes());
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame.extend_from_slice(payload);
        self.socket.send_to(&frame, self.target)?;
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<RxFrame>, BeaconError> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 2048];
        let len = match self.socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(BeaconError::Socket(e)),
        };
        if len < PSEUDO_HEADER {
            return Ok(None);
        }

        let mut dst = [0u8; 6];
        dst.copy_from_slice(&buf[0..6]);
        let mut src = [0u8; 6];
        src.copy_from_slice(&buf[6..12]);
        let ether_type = u16::from_be_bytes([buf[12], buf[13]]);

        Ok(Some(RxFrame {
            src: NodeId(src),
            dst: NodeId(dst),
            ether_type,
            payload: buf[PSEUDO_HEADER..len].to_vec(),
        }))
    }
}
