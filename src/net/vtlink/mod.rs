mod args;

pub use args::{Args, LinkDefinition, ParseArgsError, ParseLinkError, Timers};

use core::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    net::UdpSocket,
    sync::{
        broadcast::{self, Receiver, Sender},
        Mutex,
    },
};

use crate::net::{Interface, InterfaceTable, LinkLayer};
use crate::utils::net::localhost_with_port;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    LinkNotFound,
    Bind(std::io::Error),
}

/// Virtual Ethernet over UDP: every interface is a point-to-point link to a
/// peer process listening on a localhost port.
pub struct VtLinkLayer {
    sock: Arc<UdpSocket>,
    links: Vec<Link>,
    listener_sub: Mutex<Option<Sender<(String, Vec<u8>)>>>,
}

impl VtLinkLayer {
    pub async fn new(args: &Args) -> Result<Self> {
        let sock = UdpSocket::bind(localhost_with_port(args.host_port))
            .await
            .map_err(Error::Bind)?;

        let links = args.links.iter().map(Link::from).collect();

        Ok(Self {
            sock: Arc::new(sock),
            links,
            listener_sub: Mutex::new(None),
        })
    }

    pub fn activate_link(&self, name: &str) -> Result<()> {
        self.find_link(name).ok_or(Error::LinkNotFound)?.activate();
        Ok(())
    }

    pub fn deactivate_link(&self, name: &str) -> Result<()> {
        self.find_link(name).ok_or(Error::LinkNotFound)?.deactivate();
        Ok(())
    }

    pub fn iter_links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    pub fn find_link(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|link| link.interface.name == name)
    }

    /// Subscribe to the frames received by this host, tagged with the name
    /// of the interface they arrived on.
    ///
    /// Datagrams from unknown ports or on disabled links are discarded.
    pub async fn listen(&self) -> Receiver<(String, Vec<u8>)> {
        let mut sub = self.listener_sub.lock().await;
        if let Some(ref sub_handle) = *sub {
            return sub_handle.subscribe();
        }

        let (tx, rx) = broadcast::channel(100);
        let sender = tx.clone();
        let sock = self.sock.clone();
        let links: Vec<(u16, String, Arc<AtomicBool>)> = self
            .links
            .iter()
            .map(|l| (l.remote_port, l.interface.name.clone(), l.activated.clone()))
            .collect();

        tokio::spawn(async move {
            let mut buf = [0; 65536];
            while let Ok((sz, from)) = sock.recv_from(&mut buf).await {
                let link = links.iter().find(|(port, _, _)| *port == from.port());
                match link {
                    Some((_, name, activated)) if activated.load(Ordering::Relaxed) => {
                        if sender.send((name.clone(), buf[..sz].into())).is_err() {
                            log::error!("Failed to send frame to receiver");
                        }
                    }
                    Some((_, name, _)) => log::debug!("Link {} is down, dropping frame", name),
                    None => log::debug!("Dropping datagram from unknown peer {}", from),
                }
            }
        });

        *sub = Some(tx);
        rx
    }
}

#[async_trait]
impl LinkLayer for VtLinkLayer {
    async fn transmit(&self, frame: &[u8], iface: &str) -> bool {
        let link = match self.find_link(iface) {
            Some(link) => link,
            None => {
                log::warn!("No link named {}", iface);
                return false;
            }
        };

        if link.is_disabled() {
            return false;
        }

        match self.sock.send_to(frame, link.dest()).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to send on {}: {}", iface, e);
                false
            }
        }
    }

    fn interfaces(&self) -> InterfaceTable {
        InterfaceTable::new(self.links.iter().map(|l| l.interface.clone()).collect())
    }
}

pub struct Link {
    interface: Interface,
    remote_port: u16,
    activated: Arc<AtomicBool>,
}

impl From<&LinkDefinition> for Link {
    fn from(def: &LinkDefinition) -> Self {
        Link {
            interface: def.interface(),
            remote_port: def.remote_port,
            activated: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Link {
    pub fn activate(&self) {
        self.activated.store(true, Ordering::Relaxed);
    }

    pub fn deactivate(&self) {
        self.activated.store(false, Ordering::Relaxed);
    }

    pub fn is_disabled(&self) -> bool {
        !self.activated.load(Ordering::Relaxed)
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn dest(&self) -> SocketAddr {
        localhost_with_port(self.remote_port)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_disabled() { "down" } else { "up" };
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            state, self.interface.name, self.interface.ip, self.interface.mac, self.remote_port
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fixture::netlinks::abc;

    #[tokio::test]
    async fn frames_arrive_tagged_with_interface() {
        let net = abc::gen_unique();
        let a = VtLinkLayer::new(&net.a).await.unwrap();
        let b = VtLinkLayer::new(&net.b).await.unwrap();
        let c = VtLinkLayer::new(&net.c).await.unwrap();

        let mut b_rx = b.listen().await;

        assert!(a.transmit(b"from a", "eth0").await);
        let (iface, frame) = b_rx.recv().await.unwrap();
        assert_eq!(iface, "eth0");
        assert_eq!(frame, b"from a".to_vec());

        assert!(c.transmit(b"from c", "eth0").await);
        let (iface, frame) = b_rx.recv().await.unwrap();
        assert_eq!(iface, "eth1");
        assert_eq!(frame, b"from c".to_vec());
    }

    #[tokio::test]
    async fn disabled_link_neither_sends_nor_receives() {
        let net = abc::gen_unique();
        let a = VtLinkLayer::new(&net.a).await.unwrap();
        let b = VtLinkLayer::new(&net.b).await.unwrap();
        let mut b_rx = b.listen().await;

        a.deactivate_link("eth0").unwrap();
        assert!(!a.transmit(b"dropped", "eth0").await);
        a.activate_link("eth0").unwrap();

        b.deactivate_link("eth0").unwrap();
        assert!(a.transmit(b"ignored", "eth0").await);
        let received = tokio::time::timeout(Duration::from_millis(100), b_rx.recv()).await;
        assert!(received.is_err());

        assert!(matches!(a.deactivate_link("eth9"), Err(Error::LinkNotFound)));
        assert!(!a.transmit(b"nowhere", "eth9").await);
    }

    #[tokio::test]
    async fn interfaces_follow_link_file() {
        let net = abc::gen_unique();
        let b = VtLinkLayer::new(&net.b).await.unwrap();

        let interfaces = b.interfaces();
        assert_eq!(interfaces.len(), 2);
        assert!(interfaces.is_my_addr("10.0.2.1".parse().unwrap()));
        assert_eq!(interfaces.get("eth0").unwrap().ip, "10.0.1.2".parse::<std::net::Ipv4Addr>().unwrap());
    }
}
