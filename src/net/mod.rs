pub mod vtlink;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use async_trait::async_trait;

/// The device layer the router sits on top of.
///
/// Frames are complete Ethernet II frames. Transmission is fire-and-forget:
/// `transmit` reports whether the frame was handed to the device, not
/// whether it was delivered.
#[async_trait]
pub trait LinkLayer: 'static + Send + Sync {
    async fn transmit(&self, frame: &[u8], iface: &str) -> bool;

    fn interfaces(&self) -> InterfaceTable;
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseMacError {
    WrongLength,
    BadOctet,
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(ParseMacError::WrongLength)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError::BadOctet)?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError::WrongLength);
        }
        Ok(MacAddr(octets))
    }
}

/// One of the router's network interfaces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub mac: MacAddr,
}

impl Interface {
    pub fn new(name: &str, ip: Ipv4Addr, mask: Ipv4Addr, mac: MacAddr) -> Self {
        Self {
            name: name.to_string(),
            ip,
            mask,
            mac,
        }
    }

    /// The network this interface is directly attached to.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip) & u32::from(self.mask))
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}\t{}", self.name, self.ip, self.mask, self.mac)
    }
}

/// The router's interfaces, in configuration order.
#[derive(Clone, Debug, Default)]
pub struct InterfaceTable {
    interfaces: Vec<Interface>,
}

impl InterfaceTable {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn get_by_ip(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.ip == ip)
    }

    pub fn is_my_addr(&self, ip: Ipv4Addr) -> bool {
        self.get_by_ip(ip).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl fmt::Display for InterfaceTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.interfaces.iter().fold(Ok(()), |acc, interface| {
            acc.and_then(|_| writeln!(f, "{}", interface))
        })
    }
}
