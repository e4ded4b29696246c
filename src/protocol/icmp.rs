use etherparse::icmpv4::{DestUnreachableHeader, TimeExceededCode};
use etherparse::{IcmpEchoHeader, Icmpv4Header, Icmpv4Slice, Icmpv4Type, ReadError};

use crate::protocol::DecodeError;
use crate::Message;

/// Bytes of the offending datagram's payload quoted in an error message.
const QUOTED_PAYLOAD_LEN: usize = 8;

/// The ICMP errors the router reports back to senders.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum IcmpError {
    NetUnreachable,
    PortUnreachable,
    TimeExceeded,
}

impl From<IcmpError> for Icmpv4Type {
    fn from(kind: IcmpError) -> Self {
        match kind {
            IcmpError::NetUnreachable => {
                Icmpv4Type::DestinationUnreachable(DestUnreachableHeader::Network)
            }
            IcmpError::PortUnreachable => {
                Icmpv4Type::DestinationUnreachable(DestUnreachableHeader::Port)
            }
            IcmpError::TimeExceeded => {
                Icmpv4Type::TimeExceeded(TimeExceededCode::TtlExceededInTransit)
            }
        }
    }
}

/// An ICMP message: its header (type, code and the type specific bytes)
/// followed by the data.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct IcmpMessage {
    pub icmp_type: Icmpv4Type,
    pub data: Vec<u8>,
}

impl IcmpMessage {
    /// Identifier and sequence number, if this is an echo request.
    pub fn echo_request(&self) -> Option<IcmpEchoHeader> {
        match self.icmp_type {
            Icmpv4Type::EchoRequest(echo) => Some(echo),
            _ => None,
        }
    }

    /// The reply to an echo request carries the same identifier, sequence
    /// number and data.
    pub fn echo_reply(echo: IcmpEchoHeader, data: &[u8]) -> Self {
        Self {
            icmp_type: Icmpv4Type::EchoReply(echo),
            data: data.to_vec(),
        }
    }

    /// Build an error quoting `offending`, an IPv4 datagram starting at its
    /// header: the whole header plus the first 8 bytes of payload.
    pub fn error(kind: IcmpError, offending: &[u8]) -> Self {
        let header_len = offending
            .first()
            .map(|b| usize::from(b & 0x0f) * 4)
            .unwrap_or(0);
        let quoted = (header_len + QUOTED_PAYLOAD_LEN).min(offending.len());

        Self {
            icmp_type: kind.into(),
            data: offending[..quoted].to_vec(),
        }
    }
}

impl Message for IcmpMessage {
    fn into_bytes(self) -> Vec<u8> {
        let header = Icmpv4Header::with_checksum(self.icmp_type, &self.data);

        let mut v = Vec::with_capacity(header.header_len() + self.data.len());
        v.extend_from_slice(&header.to_bytes());
        v.extend_from_slice(&self.data);
        v
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let slice = Icmpv4Slice::from_slice(bytes).map_err(|e| match e {
            ReadError::UnexpectedEndOfSlice(needed) => DecodeError::Truncated {
                needed,
                got: bytes.len(),
            },
            ReadError::UnexpectedLenOfSlice { expected, actual } => DecodeError::Truncated {
                needed: expected,
                got: actual,
            },
            _ => DecodeError::Truncated {
                needed: Icmpv4Header::MIN_SERIALIZED_SIZE,
                got: bytes.len(),
            },
        })?;

        let icmp_type = slice.icmp_type();
        if icmp_type.calc_checksum(slice.payload()) != slice.checksum() {
            return Err(DecodeError::BadChecksum);
        }

        Ok(Self {
            icmp_type,
            data: slice.payload().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use etherparse::Ipv4Header;

    use super::*;

    fn offending_datagram(payload_len: usize) -> Vec<u8> {
        let payload = vec![0xab; payload_len];
        let mut v = Vec::new();
        Ipv4Header::new(payload_len as u16, 5, 17, [10, 0, 1, 5], [10, 0, 3, 9])
            .write(&mut v)
            .unwrap();
        v.extend_from_slice(&payload);
        v
    }

    #[test]
    fn error_quotes_header_and_eight_bytes() {
        let datagram = offending_datagram(32);
        let msg = IcmpMessage::error(IcmpError::NetUnreachable, &datagram);

        assert_eq!(
            msg.icmp_type,
            Icmpv4Type::DestinationUnreachable(DestUnreachableHeader::Network)
        );
        assert_eq!(msg.data.len(), 20 + 8);
        assert_eq!(msg.data, datagram[..28].to_vec());
    }

    #[test]
    fn error_on_short_payload_quotes_what_exists() {
        let datagram = offending_datagram(3);
        let msg = IcmpMessage::error(IcmpError::TimeExceeded, &datagram);
        assert_eq!(
            msg.icmp_type,
            Icmpv4Type::TimeExceeded(TimeExceededCode::TtlExceededInTransit)
        );
        assert_eq!(msg.data.len(), 23);
    }

    #[test]
    fn encoded_error_has_wire_type_and_code() {
        let msg = IcmpMessage::error(IcmpError::PortUnreachable, &offending_datagram(8));
        let bytes = msg.clone().into_bytes();

        let slice = Icmpv4Slice::from_slice(&bytes).unwrap();
        assert_eq!((slice.type_u8(), slice.code_u8()), (3, 3));
        assert_eq!(IcmpMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn echo_reply_keeps_identifier_and_data() {
        let echo = IcmpEchoHeader { id: 7, seq: 1 };
        let request = IcmpMessage {
            icmp_type: Icmpv4Type::EchoRequest(echo),
            data: b"ping".to_vec(),
        };
        let parsed = IcmpMessage::from_bytes(&request.into_bytes()).unwrap();
        let echo = parsed.echo_request().unwrap();

        let reply = IcmpMessage::echo_reply(echo, &parsed.data);
        let bytes = reply.into_bytes();
        assert_eq!((bytes[0], bytes[1]), (0, 0));

        let parsed = IcmpMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.icmp_type, Icmpv4Type::EchoReply(IcmpEchoHeader { id: 7, seq: 1 }));
        assert_eq!(parsed.data, b"ping".to_vec());
        assert_eq!(parsed.echo_request(), None);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = IcmpMessage::error(IcmpError::NetUnreachable, &offending_datagram(8))
            .into_bytes();
        bytes[2] ^= 0xff;
        assert_eq!(IcmpMessage::from_bytes(&bytes), Err(DecodeError::BadChecksum));
    }

    #[test]
    fn truncated_message_is_rejected() {
        assert_eq!(
            IcmpMessage::from_bytes(&[8, 0, 0]),
            Err(DecodeError::Truncated { needed: 8, got: 3 })
        );
    }
}
