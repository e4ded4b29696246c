use std::net::Ipv4Addr;

use etherparse::Ethernet2Header;
use smoltcp::wire::{self, ArpOperation, ArpRepr, EthernetAddress, Ipv4Address};

use crate::net::{Interface, MacAddr};
use crate::protocol::DecodeError;
use crate::utils::net::ETHERTYPE_ARP;
use crate::Message;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Operation {
    Request,
    Reply,
}

impl From<Operation> for ArpOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Request => ArpOperation::Request,
            Operation::Reply => ArpOperation::Reply,
        }
    }
}

impl TryFrom<ArpOperation> for Operation {
    type Error = DecodeError;

    fn try_from(value: ArpOperation) -> Result<Self, Self::Error> {
        match value {
            ArpOperation::Request => Ok(Operation::Request),
            ArpOperation::Reply => Ok(Operation::Reply),
            other => Err(DecodeError::BadOperation(u16::from(other))),
        }
    }
}

/// An Ethernet/IPv4 ARP packet.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct ArpPacket {
    pub operation: Operation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Who-has `target` request sent from `iface`.
    pub fn request(iface: &Interface, target: Ipv4Addr) -> Self {
        Self {
            operation: Operation::Request,
            sender_mac: iface.mac,
            sender_ip: iface.ip,
            target_mac: MacAddr::ZERO,
            target_ip: target,
        }
    }

    /// Answer to this request on behalf of `iface`.
    pub fn reply_from(&self, iface: &Interface) -> Self {
        Self {
            operation: Operation::Reply,
            sender_mac: iface.mac,
            sender_ip: iface.ip,
            target_mac: self.sender_mac,
            target_ip: self.sender_ip,
        }
    }

    /// Wrap the packet in an Ethernet frame. Requests are broadcast, replies
    /// go straight to the target.
    pub fn into_frame(self) -> Vec<u8> {
        let destination = match self.operation {
            Operation::Request => MacAddr::BROADCAST,
            Operation::Reply => self.target_mac,
        };
        let eth = Ethernet2Header {
            destination: destination.octets(),
            source: self.sender_mac.octets(),
            ether_type: ETHERTYPE_ARP,
        };

        let mut frame = eth.to_bytes().to_vec();
        frame.append(&mut self.into_bytes());
        frame
    }

    fn repr(&self) -> ArpRepr {
        ArpRepr::EthernetIpv4 {
            operation: self.operation.into(),
            source_hardware_addr: EthernetAddress(self.sender_mac.octets()),
            source_protocol_addr: Ipv4Address(self.sender_ip.octets()),
            target_hardware_addr: EthernetAddress(self.target_mac.octets()),
            target_protocol_addr: Ipv4Address(self.target_ip.octets()),
        }
    }
}

impl Message for ArpPacket {
    fn into_bytes(self) -> Vec<u8> {
        let repr = self.repr();
        let mut bytes = vec![0; repr.buffer_len()];
        repr.emit(&mut wire::ArpPacket::new_unchecked(&mut bytes));
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let packet = wire::ArpPacket::new_checked(bytes).map_err(|_| DecodeError::MalformedArp)?;
        let repr = ArpRepr::parse(&packet).map_err(|_| DecodeError::MalformedArp)?;

        #[allow(unreachable_patterns)]
        match repr {
            ArpRepr::EthernetIpv4 {
                operation,
                source_hardware_addr,
                source_protocol_addr,
                target_hardware_addr,
                target_protocol_addr,
            } => Ok(Self {
                operation: Operation::try_from(operation)?,
                sender_mac: MacAddr(source_hardware_addr.0),
                sender_ip: Ipv4Addr::from(source_protocol_addr.0),
                target_mac: MacAddr(target_hardware_addr.0),
                target_ip: Ipv4Addr::from(target_protocol_addr.0),
            }),
            _ => Err(DecodeError::MalformedArp),
        }
    }
}

#[cfg(test)]
mod tests {
    use etherparse::Ethernet2Header;

    use super::*;

    fn iface() -> Interface {
        Interface::new(
            "eth0",
            Ipv4Addr::new(10, 0, 1, 1),
            Ipv4Addr::new(255, 255, 255, 0),
            MacAddr([2, 0, 0, 0, 1, 1]),
        )
    }

    #[test]
    fn request_frame_is_broadcast() {
        let frame = ArpPacket::request(&iface(), Ipv4Addr::new(10, 0, 1, 5)).into_frame();

        let (eth, payload) = Ethernet2Header::from_slice(&frame).unwrap();
        assert_eq!(eth.destination, MacAddr::BROADCAST.octets());
        assert_eq!(eth.source, iface().mac.octets());
        assert_eq!(eth.ether_type, ETHERTYPE_ARP);

        let parsed = ArpPacket::from_bytes(payload).unwrap();
        assert_eq!(parsed.operation, Operation::Request);
        assert_eq!(parsed.sender_ip, iface().ip);
        assert_eq!(parsed.target_ip, Ipv4Addr::new(10, 0, 1, 5));
        assert_eq!(parsed.target_mac, MacAddr::ZERO);
    }

    #[test]
    fn reply_answers_the_requester() {
        let requester = ArpPacket {
            operation: Operation::Request,
            sender_mac: MacAddr([2, 0, 0, 0, 9, 9]),
            sender_ip: Ipv4Addr::new(10, 0, 1, 5),
            target_mac: MacAddr::ZERO,
            target_ip: iface().ip,
        };

        let reply = requester.reply_from(&iface());
        assert_eq!(reply.operation, Operation::Reply);
        assert_eq!(reply.sender_mac, iface().mac);
        assert_eq!(reply.target_mac, requester.sender_mac);
        assert_eq!(reply.target_ip, requester.sender_ip);

        let frame = reply.into_frame();
        assert_eq!(&frame[0..6], &requester.sender_mac.octets());
    }

    #[test]
    fn reject_malformed_packets() {
        assert_eq!(
            ArpPacket::from_bytes(&[0; 10]),
            Err(DecodeError::MalformedArp)
        );

        let mut bytes = ArpPacket::request(&iface(), Ipv4Addr::new(10, 0, 1, 5)).into_bytes();
        bytes[7] = 9;
        assert_eq!(
            ArpPacket::from_bytes(&bytes),
            Err(DecodeError::BadOperation(9))
        );

        bytes[1] = 6;
        assert_eq!(
            ArpPacket::from_bytes(&bytes),
            Err(DecodeError::MalformedArp)
        );
    }
}
