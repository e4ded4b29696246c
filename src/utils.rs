use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Run `f` every `interval` until `shutdown` flips (or its sender is dropped).
///
/// A run of `f` that has started always completes; the shutdown signal is
/// only observed between runs.
pub async fn loop_with_interval<Fut: Future<Output = ()>>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    f: impl Fn() -> Fut,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => f().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

pub mod net {
    use std::net::{Ipv4Addr, SocketAddr};

    use etherparse::{Ethernet2Header, Ipv4Header, Ipv4HeaderSlice, UdpHeader};

    use crate::net::MacAddr;
    use crate::protocol::Protocol;

    pub const ETHERNET_HEADER_LEN: usize = 14;
    pub const ETHERTYPE_IPV4: u16 = 0x0800;
    pub const ETHERTYPE_ARP: u16 = 0x0806;
    pub const UDP_HEADER_LEN: usize = 8;

    pub fn localhost_with_port(port: u16) -> SocketAddr {
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    /// Number of leading one bits in a subnet mask.
    pub fn prefix_len(mask: Ipv4Addr) -> u32 {
        u32::from(mask).leading_ones()
    }

    pub fn apply_mask(addr: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(addr) & u32::from(mask))
    }

    pub fn verify_header_checksum(header: &Ipv4HeaderSlice<'_>) -> bool {
        let owned_header = header.to_header();
        match owned_header.calc_header_checksum() {
            Ok(expected_checksum) => expected_checksum == header.header_checksum(),
            Err(_) => false,
        }
    }

    /// Overwrite the Ethernet addresses of `frame` in place.
    pub fn set_macs(frame: &mut [u8], src: MacAddr, dst: MacAddr) {
        if frame.len() < ETHERNET_HEADER_LEN {
            return;
        }
        frame[0..6].copy_from_slice(&dst.octets());
        frame[6..12].copy_from_slice(&src.octets());
    }

    /// Set the TTL of the IPv4 packet carried by `frame` and recompute its
    /// header checksum. Returns false, leaving `frame` untouched, when it
    /// does not hold a valid IPv4 header.
    pub fn set_ttl(frame: &mut [u8], ttl: u8) -> bool {
        if frame.len() <= ETHERNET_HEADER_LEN {
            return false;
        }
        let ip = &mut frame[ETHERNET_HEADER_LEN..];
        let mut header = match Ipv4Header::from_slice(ip) {
            Ok((header, _)) => header,
            Err(_) => return false,
        };

        header.time_to_live = ttl;

        // Writing recomputes the header checksum.
        let mut out = &mut ip[..header.header_len()];
        header.write(&mut out).is_ok()
    }

    /// Builds an Ethernet frame carrying an IPv4 packet, optionally wrapping
    /// the payload in a UDP datagram.
    #[derive(Default, Copy, Clone)]
    pub struct FrameBuilder<'a> {
        payload: Option<&'a [u8]>,
        ttl: Option<u8>,
        protocol: Option<u8>,
        src: Option<Ipv4Addr>,
        dst: Option<Ipv4Addr>,
        src_mac: Option<MacAddr>,
        dst_mac: Option<MacAddr>,
        udp_ports: Option<(u16, u16)>,
    }

    #[derive(Debug)]
    pub enum BuildError {
        NoPayload,
        NoProtocol,
        NoSourceAddress,
        NoDestinationAddress,
        NoSourceMac,
        NoDestinationMac,
        PayloadTooLong,
        Serialize,
    }

    impl<'a> FrameBuilder<'a> {
        pub fn with_payload(&mut self, payload: &'a [u8]) -> &mut Self {
            self.payload = Some(payload);
            self
        }

        pub fn with_ttl(&mut self, ttl: u8) -> &mut Self {
            self.ttl = Some(ttl);
            self
        }

        pub fn with_protocol<P: Into<u8>>(&mut self, protocol: P) -> &mut Self {
            self.protocol = Some(protocol.into());
            self
        }

        pub fn with_src(&mut self, src: Ipv4Addr) -> &mut Self {
            self.src = Some(src);
            self
        }

        pub fn with_dst(&mut self, dst: Ipv4Addr) -> &mut Self {
            self.dst = Some(dst);
            self
        }

        pub fn with_src_mac(&mut self, mac: MacAddr) -> &mut Self {
            self.src_mac = Some(mac);
            self
        }

        pub fn with_dst_mac(&mut self, mac: MacAddr) -> &mut Self {
            self.dst_mac = Some(mac);
            self
        }

        /// Carry the payload in a UDP datagram; implies `Protocol::Udp`.
        pub fn with_udp(&mut self, src_port: u16, dst_port: u16) -> &mut Self {
            self.udp_ports = Some((src_port, dst_port));
            self.protocol = Some(Protocol::Udp.into());
            self
        }

        pub fn build(self) -> Result<Vec<u8>, BuildError> {
            let payload = self.payload.ok_or(BuildError::NoPayload)?;
            let protocol = self.protocol.ok_or(BuildError::NoProtocol)?;
            let src = self.src.ok_or(BuildError::NoSourceAddress)?;
            let dst = self.dst.ok_or(BuildError::NoDestinationAddress)?;
            let src_mac = self.src_mac.ok_or(BuildError::NoSourceMac)?;
            let dst_mac = self.dst_mac.ok_or(BuildError::NoDestinationMac)?;
            let ttl = self.ttl.unwrap_or_else(FrameBuilder::default_ttl);

            let transport_len = match self.udp_ports {
                Some(_) => payload.len() + UDP_HEADER_LEN,
                None => payload.len(),
            };
            let payload_len: u16 = transport_len
                .try_into()
                .map_err(|_| BuildError::PayloadTooLong)?;

            let ip_header = Ipv4Header::new(payload_len, ttl, protocol, src.octets(), dst.octets());
            let eth_header = Ethernet2Header {
                source: src_mac.octets(),
                destination: dst_mac.octets(),
                ether_type: ETHERTYPE_IPV4,
            };

            let mut buf = Vec::with_capacity(ETHERNET_HEADER_LEN + 20 + transport_len);
            eth_header
                .write(&mut buf)
                .map_err(|_| BuildError::Serialize)?;
            ip_header
                .write(&mut buf)
                .map_err(|_| BuildError::Serialize)?;

            if let Some((src_port, dst_port)) = self.udp_ports {
                let udp_header =
                    UdpHeader::with_ipv4_checksum(src_port, dst_port, &ip_header, payload)
                        .map_err(|_| BuildError::PayloadTooLong)?;
                udp_header
                    .write(&mut buf)
                    .map_err(|_| BuildError::Serialize)?;
            }

            buf.extend_from_slice(payload);

            Ok(buf)
        }

        fn default_ttl() -> u8 {
            64
        }
    }
}
