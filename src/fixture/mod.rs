use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use etherparse::{Ethernet2Header, Ipv4Header, UdpHeader};

use crate::net::{Interface, InterfaceTable, LinkLayer, MacAddr};
use crate::utils::net::FrameBuilder;

pub mod netlinks;

/// A link layer that records every frame handed to it.
pub struct MockLink {
    interfaces: InterfaceTable,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockLink {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self {
            interfaces: InterfaceTable::new(interfaces),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Frames transmitted since the last call, as `(interface, frame)`.
    pub fn take_sent(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl LinkLayer for MockLink {
    async fn transmit(&self, frame: &[u8], iface: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((iface.to_string(), frame.to_vec()));
        true
    }

    fn interfaces(&self) -> InterfaceTable {
        self.interfaces.clone()
    }
}

pub fn mask24() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

pub fn mac(host: u8, port: u8) -> MacAddr {
    MacAddr([2, 0, 0, 0, host, port])
}

/// The two-armed router most tests use: eth0 on 10.0.1.1/24 and eth1 on
/// 10.0.2.1/24.
pub fn two_port_link() -> Arc<MockLink> {
    Arc::new(MockLink::new(vec![
        Interface::new("eth0", Ipv4Addr::new(10, 0, 1, 1), mask24(), mac(1, 0)),
        Interface::new("eth1", Ipv4Addr::new(10, 0, 2, 1), mask24(), mac(1, 1)),
    ]))
}

/// Links for `n` routers in a line. Router `k` has a `lan` interface on
/// 192.168.k.0/24, an `east` interface on 10.0.k.1/24 facing router `k + 1`
/// and a `west` interface on 10.0.(k-1).2/24 facing router `k - 1`.
pub fn chain_links(n: usize) -> Vec<Arc<MockLink>> {
    (0..n)
        .map(|k| {
            let id = k as u8;
            let mut interfaces = vec![Interface::new(
                "lan",
                Ipv4Addr::new(192, 168, id, 1),
                mask24(),
                mac(id, 0),
            )];
            if k > 0 {
                interfaces.push(Interface::new(
                    "west",
                    Ipv4Addr::new(10, 0, id - 1, 2),
                    mask24(),
                    mac(id, 1),
                ));
            }
            if k + 1 < n {
                interfaces.push(Interface::new(
                    "east",
                    Ipv4Addr::new(10, 0, id, 1),
                    mask24(),
                    mac(id, 2),
                ));
            }
            Arc::new(MockLink::new(interfaces))
        })
        .collect()
}

/// Router and interface at the other end of router `k`'s `iface`.
pub fn chain_peer(k: usize, n: usize, iface: &str) -> Option<(usize, &'static str)> {
    match iface {
        "east" if k + 1 < n => Some((k + 1, "west")),
        "west" => k.checked_sub(1).map(|p| (p, "east")),
        _ => None,
    }
}

/// An IPv4 frame as a host on the other side of a link would send it.
pub fn ipv4_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    protocol: u8,
    payload: &[u8],
    dst_mac: MacAddr,
) -> Vec<u8> {
    FrameBuilder::default()
        .with_src(src)
        .with_dst(dst)
        .with_src_mac(mac(9, 9))
        .with_dst_mac(dst_mac)
        .with_ttl(ttl)
        .with_protocol(protocol)
        .with_payload(payload)
        .build()
        .unwrap()
}

pub fn udp_frame(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    dst_port: u16,
    payload: &[u8],
    dst_mac: MacAddr,
) -> Vec<u8> {
    FrameBuilder::default()
        .with_src(src)
        .with_dst(dst)
        .with_src_mac(mac(9, 9))
        .with_dst_mac(dst_mac)
        .with_udp(dst_port, dst_port)
        .with_payload(payload)
        .build()
        .unwrap()
}

/// Split a transmitted frame into its Ethernet and IPv4 headers and the IP
/// payload.
pub fn parse_ipv4(frame: &[u8]) -> (Ethernet2Header, Ipv4Header, Vec<u8>) {
    let (eth, rest) = Ethernet2Header::from_slice(frame).unwrap();
    let (ip, payload) = Ipv4Header::from_slice(rest).unwrap();
    (eth, ip, payload.to_vec())
}

/// Source address, destination port and payload of a UDP frame.
pub fn parse_udp(frame: &[u8]) -> (Ipv4Addr, u16, Vec<u8>) {
    let (_, ip, payload) = parse_ipv4(frame);
    let (udp, rest) = UdpHeader::from_slice(&payload).unwrap();
    (Ipv4Addr::from(ip.source), udp.destination_port, rest.to_vec())
}
