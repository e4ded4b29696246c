use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::net::{Interface, LinkLayer, MacAddr};
use crate::protocol::rip::{Command, Entry as RipEntry, RipMessage};
use crate::protocol::{RIP_MULTICAST_ADDR, RIP_PORT};
use crate::route::{RouteTable, INFINITY};
use crate::utils::loop_with_interval;
use crate::utils::net::{BuildError, FrameBuilder};
use crate::Message;

/// TTL of outgoing RIP datagrams.
const RIP_TTL: u8 = 16;

/// Distance-vector route learning over RIPv2.
pub struct RipEngine<L: LinkLayer> {
    link: Arc<L>,
    routes: Arc<RwLock<RouteTable>>,
    route_timeout: Duration,
}

impl<L: LinkLayer> Clone for RipEngine<L> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            routes: self.routes.clone(),
            route_timeout: self.route_timeout,
        }
    }
}

impl<L: LinkLayer> RipEngine<L> {
    pub fn new(link: Arc<L>, routes: Arc<RwLock<RouteTable>>, route_timeout: Duration) -> Self {
        Self {
            link,
            routes,
            route_timeout,
        }
    }

    /// Seed the table with the directly connected networks and ask every
    /// neighbor for its table.
    ///
    /// A table that already holds routes was loaded from a static file; RIP
    /// then leaves it alone and `false` is returned so no periodic task is
    /// started.
    pub async fn init(&self) -> bool {
        {
            let mut table = self.routes.write().await;
            if !table.is_empty() {
                log::info!("Static routing table in use, not starting RIP");
                return false;
            }
            for iface in self.link.interfaces().iter() {
                table.add_entry(
                    iface.network(),
                    Ipv4Addr::UNSPECIFIED,
                    iface.mask,
                    &iface.name,
                    0,
                );
            }
        }

        self.send_request().await;
        true
    }

    /// Send a request for the whole table out of every interface.
    pub async fn send_request(&self) {
        for iface in self.link.interfaces().iter() {
            self.send_message(iface, RipMessage::request()).await;
        }
    }

    /// Advertise the table out of `iface`.
    pub async fn send_response(&self, iface: &Interface) {
        let routes = self.routes.read().await.snapshot();
        self.send_message(iface, RipMessage::response_for(&routes, &iface.name))
            .await;
    }

    /// Advertise the table out of every interface.
    pub async fn broadcast_responses(&self) {
        let routes = self.routes.read().await.snapshot();
        for iface in self.link.interfaces().iter() {
            log::debug!("Sending periodic update out of {}", iface.name);
            self.send_message(iface, RipMessage::response_for(&routes, &iface.name))
                .await;
        }
    }

    async fn send_message(&self, iface: &Interface, msg: RipMessage) {
        match rip_frame(iface, msg) {
            Ok(frame) => {
                log::trace!("Sending {} byte frame on {}", frame.len(), iface.name);
                if !self.link.transmit(&frame, &iface.name).await {
                    log::warn!("Failed to send RIP message out of {}", iface.name);
                }
            }
            Err(e) => log::error!("Failed to build RIP frame for {}: {:?}", iface.name, e),
        }
    }

    /// One periodic round: advertise, then evict stale routes.
    pub async fn tick(&self, now: Instant) {
        self.broadcast_responses().await;
        self.expire_routes(now).await;
    }

    pub async fn expire_routes(&self, now: Instant) -> usize {
        self.routes.write().await.prune(self.route_timeout, now)
    }

    /// Handle the payload of a UDP datagram sent to the RIP port by `source`.
    pub async fn handle_packet(&self, source: Ipv4Addr, payload: &[u8], in_iface: &Interface) {
        let msg = match RipMessage::from_bytes(payload) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Dropping malformed RIP message from {}: {:?}", source, e);
                return;
            }
        };

        match msg.command {
            Command::Request => {
                log::debug!("RIP request from {} on {}", source, in_iface.name);
                self.send_response(in_iface).await;
            }
            Command::Response => {
                self.handle_response(source, &msg.entries, in_iface).await;
            }
        }
    }

    /// Relax the table against a neighbor's advertisement. Returns the
    /// number of routes added or updated.
    pub async fn handle_response(
        &self,
        source: Ipv4Addr,
        entries: &[RipEntry],
        in_iface: &Interface,
    ) -> usize {
        let mut table = self.routes.write().await;
        let mut changed = 0;

        for entry in entries {
            let metric = entry.metric.saturating_add(1).min(INFINITY);

            let accept = match table.find_entry(entry.address, entry.mask) {
                None => {
                    table.add_entry(entry.address, source, entry.mask, &in_iface.name, metric)
                }
                // Equal cost is accepted too, which keeps the route from
                // timing out while the neighbor keeps advertising it.
                Some(current) if entry.metric < INFINITY && current.metric() >= metric => table
                    .update_entry(entry.address, entry.mask, source, &in_iface.name, metric),
                Some(_) => false,
            };

            if accept {
                changed += 1;
            }
        }

        changed
    }

    pub fn spawn_periodic(
        &self,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let rip = self.clone();
        tokio::spawn(async move {
            periodic_rip_update(rip, interval, shutdown).await;
        })
    }
}

async fn periodic_rip_update<L: LinkLayer>(
    rip: RipEngine<L>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    loop_with_interval(interval, shutdown, || async {
        rip.tick(Instant::now()).await;
    })
    .await;
}

/// Wrap `msg` for multicast out of `iface`.
fn rip_frame(iface: &Interface, msg: RipMessage) -> Result<Vec<u8>, BuildError> {
    let payload = msg.into_bytes();
    FrameBuilder::default()
        .with_src(iface.ip)
        .with_dst(RIP_MULTICAST_ADDR)
        .with_src_mac(iface.mac)
        .with_dst_mac(MacAddr::BROADCAST)
        .with_ttl(RIP_TTL)
        .with_udp(RIP_PORT, RIP_PORT)
        .with_payload(&payload)
        .build()
}
