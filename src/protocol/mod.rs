use std::net::Ipv4Addr;

pub mod arp;
pub mod icmp;
pub mod rip;

/// UDP port RIP speaks on.
pub const RIP_PORT: u16 = 520;

/// Multicast group RIPv2 advertisements are addressed to.
pub const RIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);

/// IP protocol numbers the router understands.
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone)]
pub enum Protocol {
    Icmp,
    Tcp,
    Udp,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseProtocolError {
    Unsupported(u8),
}

impl TryFrom<u8> for Protocol {
    type Error = ParseProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Protocol::Icmp),
            6 => Ok(Protocol::Tcp),
            17 => Ok(Protocol::Udp),
            _ => Err(ParseProtocolError::Unsupported(value)),
        }
    }
}

#[allow(clippy::from_over_into)]
impl Into<u8> for Protocol {
    fn into(self) -> u8 {
        match self {
            Protocol::Icmp => 1,
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// Reasons a wire message could not be decoded.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { needed: usize, got: usize },
    BadCommand(u8),
    BadOperation(u16),
    /// Not an Ethernet/IPv4 ARP packet, or shorter than one.
    MalformedArp,
    BadChecksum,
    UnsupportedAddressFamily(u16),
}

/// Check that `bytes` holds at least `needed` bytes.
pub(crate) fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        Err(DecodeError::Truncated {
            needed,
            got: bytes.len(),
        })
    } else {
        Ok(())
    }
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_numbers() {
        assert_eq!(Protocol::try_from(1), Ok(Protocol::Icmp));
        assert_eq!(Protocol::try_from(17), Ok(Protocol::Udp));
        assert_eq!(
            Protocol::try_from(89),
            Err(ParseProtocolError::Unsupported(89))
        );
        let tcp: u8 = Protocol::Tcp.into();
        assert_eq!(tcp, 6);
    }

    #[test]
    fn ensure_len_reports_shortfall() {
        assert_eq!(
            ensure_len(&[0, 1], 4),
            Err(DecodeError::Truncated { needed: 4, got: 2 })
        );
        assert!(ensure_len(&[0, 1, 2, 3], 4).is_ok());
    }
}
