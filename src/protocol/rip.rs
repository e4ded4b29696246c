use std::net::Ipv4Addr;

use crate::protocol::{ensure_len, read_u16, read_u32, DecodeError};
use crate::route::{Entry as RoutingEntry, INFINITY};
use crate::Message;

const RIP_VERSION: u8 = 2;
const AFI_INET: u16 = 2;

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Entry {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum Command {
    Request,
    Response,
}

/// A RIPv2 message (RFC 2453 layout).
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct RipMessage {
    pub command: Command,
    pub entries: Vec<Entry>,
}

#[allow(clippy::from_over_into)]
impl Into<u8> for Command {
    fn into(self) -> u8 {
        match self {
            Command::Request => 1,
            Command::Response => 2,
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            _ => Err(DecodeError::BadCommand(value)),
        }
    }
}

impl Entry {
    pub fn new(address: Ipv4Addr, mask: Ipv4Addr, metric: u32) -> Self {
        Self {
            address,
            mask,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric,
        }
    }

    fn serialized_size() -> usize {
        20
    }
}

impl RipMessage {
    /// A request for the neighbor's whole table.
    pub fn request() -> Self {
        Self {
            command: Command::Request,
            entries: Vec::new(),
        }
    }

    /// Advertise `routes` out of `out_iface`.
    ///
    /// Split horizon: routes whose outgoing interface is `out_iface` are left
    /// out. Unreachable routes are advertised with metric infinity.
    pub fn response_for(routes: &[RoutingEntry], out_iface: &str) -> Self {
        let entries = routes
            .iter()
            .filter(|e| e.interface() != out_iface)
            .map(|e| Entry::new(e.destination(), e.mask(), e.metric().min(INFINITY)))
            .collect();

        Self {
            command: Command::Response,
            entries,
        }
    }

    fn header_size() -> usize {
        4
    }
}

impl Message for RipMessage {
    fn into_bytes(self) -> Vec<u8> {
        let mut v =
            Vec::with_capacity(RipMessage::header_size() + self.entries.len() * Entry::serialized_size());

        v.push(self.command.into());
        v.push(RIP_VERSION);
        v.extend_from_slice(&[0, 0]);

        for entry in self.entries {
            v.append(&mut entry.into_bytes());
        }

        v
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(bytes, RipMessage::header_size())?;

        let command = Command::try_from(bytes[0])?;

        let body = &bytes[RipMessage::header_size()..];
        let whole_entries = body.len() / Entry::serialized_size();
        if body.len() % Entry::serialized_size() != 0 {
            return Err(DecodeError::Truncated {
                needed: RipMessage::header_size() + (whole_entries + 1) * Entry::serialized_size(),
                got: bytes.len(),
            });
        }

        let mut entries = Vec::with_capacity(whole_entries);
        for raw in body.chunks_exact(Entry::serialized_size()) {
            match read_u16(raw, 0) {
                AFI_INET => entries.push(Entry::from_bytes(raw)?),
                // A whole-table request carries a single AFI 0 entry.
                0 if command == Command::Request => {}
                afi => return Err(DecodeError::UnsupportedAddressFamily(afi)),
            }
        }

        Ok(Self { command, entries })
    }
}

impl Message for Entry {
    fn into_bytes(self) -> Vec<u8> {
        let mut v = Vec::with_capacity(Entry::serialized_size());
        v.extend_from_slice(&AFI_INET.to_be_bytes());
        v.extend_from_slice(&[0, 0]);
        v.extend_from_slice(&self.address.octets());
        v.extend_from_slice(&self.mask.octets());
        v.extend_from_slice(&self.next_hop.octets());
        v.extend_from_slice(&self.metric.to_be_bytes());
        v
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(bytes, Entry::serialized_size())?;

        Ok(Self {
            address: Ipv4Addr::from(read_u32(bytes, 4)),
            mask: Ipv4Addr::from(read_u32(bytes, 8)),
            next_hop: Ipv4Addr::from(read_u32(bytes, 12)),
            metric: read_u32(bytes, 16),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask24() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    #[test]
    fn test_rip_message_serde() {
        let msg = RipMessage {
            command: Command::Response,
            entries: vec![
                Entry::new(Ipv4Addr::new(10, 0, 1, 0), mask24(), 1),
                Entry::new(Ipv4Addr::new(192, 168, 5, 0), mask24(), 16),
            ],
        };
        let m = msg.clone();

        let bytes = msg.into_bytes();
        assert_eq!(bytes.len(), 4 + 2 * 20);
        assert_eq!(&bytes[..4], &[2, 2, 0, 0]);

        let parsed = RipMessage::from_bytes(&bytes).unwrap();
        assert_eq!(m, parsed);
    }

    #[test]
    fn request_has_no_entries() {
        let bytes = RipMessage::request().into_bytes();
        assert_eq!(bytes, vec![1, 2, 0, 0]);
        assert_eq!(RipMessage::from_bytes(&bytes).unwrap(), RipMessage::request());
    }

    #[test]
    fn whole_table_request_entry_is_accepted() {
        let mut bytes = vec![1, 2, 0, 0];
        bytes.extend_from_slice(&[0; 16]);
        bytes.extend_from_slice(&16u32.to_be_bytes());

        let parsed = RipMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.command, Command::Request);
        assert!(parsed.entries.is_empty());
    }

    #[test]
    fn reject_malformed_messages() {
        assert_eq!(
            RipMessage::from_bytes(&[2, 2]),
            Err(DecodeError::Truncated { needed: 4, got: 2 })
        );
        assert_eq!(
            RipMessage::from_bytes(&[7, 2, 0, 0]),
            Err(DecodeError::BadCommand(7))
        );

        let mut bytes = RipMessage {
            command: Command::Response,
            entries: vec![Entry::new(Ipv4Addr::new(10, 0, 0, 0), mask24(), 1)],
        }
        .into_bytes();
        bytes.pop();
        assert!(matches!(
            RipMessage::from_bytes(&bytes),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn response_applies_split_horizon() {
        let routes = vec![
            RoutingEntry::new(
                Ipv4Addr::new(10, 0, 1, 0),
                mask24(),
                Ipv4Addr::UNSPECIFIED,
                "eth0",
                0,
            ),
            RoutingEntry::new(
                Ipv4Addr::new(10, 0, 2, 0),
                mask24(),
                Ipv4Addr::UNSPECIFIED,
                "eth1",
                0,
            ),
            RoutingEntry::new(
                Ipv4Addr::new(192, 168, 5, 0),
                mask24(),
                Ipv4Addr::new(10, 0, 1, 2),
                "eth0",
                3,
            ),
        ];

        let out_eth0 = RipMessage::response_for(&routes, "eth0");
        assert_eq!(out_eth0.command, Command::Response);
        assert_eq!(
            out_eth0.entries,
            vec![Entry::new(Ipv4Addr::new(10, 0, 2, 0), mask24(), 0)]
        );

        let out_eth1 = RipMessage::response_for(&routes, "eth1");
        let advertised: Vec<Ipv4Addr> = out_eth1.entries.iter().map(|e| e.address).collect();
        assert_eq!(
            advertised,
            vec![Ipv4Addr::new(10, 0, 1, 0), Ipv4Addr::new(192, 168, 5, 0)]
        );
    }

    #[test]
    fn unreachable_routes_are_advertised_as_infinity() {
        let routes = vec![RoutingEntry::new(
            Ipv4Addr::new(172, 16, 0, 0),
            Ipv4Addr::new(255, 255, 0, 0),
            Ipv4Addr::new(10, 0, 1, 2),
            "eth0",
            40,
        )];
        let msg = RipMessage::response_for(&routes, "eth1");
        assert_eq!(msg.entries[0].metric, INFINITY);
    }
}
