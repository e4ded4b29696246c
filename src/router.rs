use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use etherparse::{Ethernet2Header, IcmpEchoHeader, Ipv4HeaderSlice, UdpHeader};
use tokio::sync::{watch, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;

use crate::arp::{ArpCache, PendingRequest, Resolution, WaitOutcome};
use crate::net::{Interface, InterfaceTable, LinkLayer, MacAddr};
use crate::protocol::arp::{ArpPacket, Operation};
use crate::protocol::icmp::{IcmpError, IcmpMessage};
use crate::protocol::{Protocol, RIP_MULTICAST_ADDR, RIP_PORT};
use crate::rip::RipEngine;
use crate::route::RouteTable;
use crate::utils::loop_with_interval;
use crate::utils::net::{
    set_macs, set_ttl, verify_header_checksum, FrameBuilder, ETHERNET_HEADER_LEN, ETHERTYPE_ARP,
    ETHERTYPE_IPV4,
};
use crate::Message;

/// TTL of ICMP messages the router originates.
const ICMP_TTL: u8 = 64;

#[derive(PartialEq, Eq, Debug)]
pub enum PacketDecision {
    Drop,
    Forward,
    Consume,
}

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub rip_update_interval: Duration,
    /// How long a learned route lives without being refreshed.
    pub route_timeout: Duration,
    /// Minimum time between two ARP requests for the same address.
    pub arp_retry_interval: Duration,
    /// How often pending ARP requests are checked.
    pub arp_sweep_interval: Duration,
    /// Forget resolved addresses after this long. Never, when unset.
    pub arp_entry_max_age: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rip_update_interval: Duration::from_secs(10),
            route_timeout: Duration::from_secs(30),
            arp_retry_interval: Duration::from_secs(1),
            arp_sweep_interval: Duration::from_secs(1),
            arp_entry_max_age: None,
        }
    }
}

pub struct Router<L: LinkLayer> {
    link: Arc<L>,
    interfaces: InterfaceTable,
    routes: Arc<RwLock<RouteTable>>,
    arp: Arc<RwLock<ArpCache>>,
    rip: RipEngine<L>,
    config: RouterConfig,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: LinkLayer> Router<L> {
    /// A router over `link`. An empty `routes` means routes are learned with
    /// RIP; otherwise the table is used as is.
    pub fn new(link: Arc<L>, routes: RouteTable, config: RouterConfig) -> Self {
        let interfaces = link.interfaces();
        let routes = Arc::new(RwLock::new(routes));
        let arp = Arc::new(RwLock::new(ArpCache::new(
            config.arp_retry_interval,
            config.arp_entry_max_age,
        )));
        let rip = RipEngine::new(link.clone(), routes.clone(), config.route_timeout);
        let (shutdown, _) = watch::channel(false);

        Self {
            link,
            interfaces,
            routes,
            arp,
            rip,
            config,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Initialize RIP and start the background tasks. Does nothing if the
    /// router is already running.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            log::debug!("Router already started");
            return;
        }

        if self.rip.init().await {
            tasks.push(
                self.rip
                    .spawn_periodic(self.config.rip_update_interval, self.shutdown.subscribe()),
            );
        }

        let link = self.link.clone();
        let arp = self.arp.clone();
        let interfaces = self.interfaces.clone();
        let sweep_interval = self.config.arp_sweep_interval;
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            retry_arp_requests(link, arp, interfaces, sweep_interval, shutdown).await;
        }));
    }

    /// Stop the background tasks, waiting for a round in progress to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("Background task ended abnormally: {:?}", e);
            }
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn rip(&self) -> &RipEngine<L> {
        &self.rip
    }

    pub async fn get_routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read().await
    }

    pub async fn get_routes_mut(&self) -> RwLockWriteGuard<'_, RouteTable> {
        self.routes.write().await
    }

    pub async fn get_arp_cache(&self) -> RwLockReadGuard<'_, ArpCache> {
        self.arp.read().await
    }

    /// Run one pass of the ARP retry timer.
    pub async fn retry_arp(&self, now: Instant) {
        sweep_arp_cache(self.link.as_ref(), &self.arp, &self.interfaces, now).await;
    }

    /// Entry point for every frame received on `in_iface`.
    pub async fn on_frame(&self, frame: &[u8], in_iface: &str) {
        log::trace!("Received {} byte frame on {}", frame.len(), in_iface);

        let iface = match self.interfaces.get(in_iface) {
            Some(iface) => iface,
            None => {
                log::debug!("Frame arrived on unknown interface {}, dropping", in_iface);
                return;
            }
        };

        let (eth, payload) = match Ethernet2Header::from_slice(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("Malformed Ethernet frame on {}: {:?}", in_iface, e);
                return;
            }
        };

        match eth.ether_type {
            ETHERTYPE_ARP => self.handle_arp(payload, iface).await,
            ETHERTYPE_IPV4 => self.handle_ipv4(frame, iface).await,
            other => log::debug!("Dropping frame with EtherType {:#06x}", other),
        }
    }

    async fn handle_arp(&self, payload: &[u8], iface: &Interface) {
        let packet = match ArpPacket::from_bytes(payload) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Malformed ARP packet on {}: {:?}", iface.name, e);
                return;
            }
        };

        if packet.target_ip != iface.ip {
            log::debug!(
                "Ignoring ARP {:?} for {} on {}",
                packet.operation,
                packet.target_ip,
                iface.name
            );
            return;
        }

        match packet.operation {
            Operation::Request => {
                let reply = packet.reply_from(iface).into_frame();
                self.transmit(&reply, &iface.name).await;
            }
            Operation::Reply => {
                let pending = self.arp.write().await.insert(
                    packet.sender_mac,
                    packet.sender_ip,
                    Instant::now(),
                );
                if let Some(request) = pending {
                    self.release_waiting_frames(request, packet.sender_mac).await;
                }
            }
        }
    }

    async fn release_waiting_frames(&self, request: PendingRequest, mac: MacAddr) {
        let out_iface = match self.interfaces.get(&request.interface) {
            Some(iface) => iface,
            None => {
                log::warn!("Interface {} vanished, dropping queued frames", request.interface);
                return;
            }
        };

        log::debug!(
            "Releasing {} frames for {}",
            request.waiting_frames.len(),
            request.target_ip
        );
        for mut frame in request.waiting_frames {
            set_macs(&mut frame, out_iface.mac, mac);
            self.transmit(&frame, &out_iface.name).await;
        }
    }

    async fn handle_ipv4(&self, frame: &[u8], iface: &Interface) {
        let header = match Ipv4HeaderSlice::from_slice(&frame[ETHERNET_HEADER_LEN..]) {
            Ok(header) => header,
            Err(e) => {
                log::debug!("Malformed IPv4 header on {}: {:?}", iface.name, e);
                return;
            }
        };

        match self.decide_packet(&header) {
            PacketDecision::Drop => {}
            PacketDecision::Consume => {
                let payload = ip_payload(frame, &header);
                self.consume_packet(frame, &header, payload, iface).await
            }
            PacketDecision::Forward => self.forward_packet(frame, &header, iface).await,
        }
    }

    pub fn decide_packet(&self, header: &Ipv4HeaderSlice<'_>) -> PacketDecision {
        if !verify_header_checksum(header) {
            log::debug!("packet header checksum invalid; dropping packet");
            return PacketDecision::Drop;
        }

        let dest = header.destination_addr();
        if self.interfaces.is_my_addr(dest) || dest == RIP_MULTICAST_ADDR {
            return PacketDecision::Consume;
        }

        PacketDecision::Forward
    }

    async fn consume_packet(
        &self,
        frame: &[u8],
        header: &Ipv4HeaderSlice<'_>,
        payload: &[u8],
        iface: &Interface,
    ) {
        match Protocol::try_from(header.protocol()) {
            Ok(Protocol::Icmp) => match IcmpMessage::from_bytes(payload) {
                Ok(msg) => match msg.echo_request() {
                    Some(echo) => {
                        self.send_echo_reply(frame, header, echo, &msg.data, iface)
                            .await
                    }
                    None => log::debug!(
                        "Ignoring ICMP {:?} from {}",
                        msg.icmp_type,
                        header.source_addr()
                    ),
                },
                Err(e) => log::debug!("Malformed ICMP message: {:?}", e),
            },
            Ok(Protocol::Udp) => match UdpHeader::from_slice(payload) {
                Ok((udp, data)) if udp.destination_port == RIP_PORT => {
                    self.rip
                        .handle_packet(header.source_addr(), data, iface)
                        .await
                }
                Ok(_) => {
                    self.send_icmp_error(IcmpError::PortUnreachable, frame, iface)
                        .await
                }
                Err(e) => log::debug!("Malformed UDP header: {:?}", e),
            },
            Ok(Protocol::Tcp) => {
                self.send_icmp_error(IcmpError::PortUnreachable, frame, iface)
                    .await
            }
            Err(e) => log::debug!("Dropping packet for me: {:?}", e),
        }
    }

    async fn forward_packet(&self, frame: &[u8], header: &Ipv4HeaderSlice<'_>, in_iface: &Interface) {
        let ttl = header.ttl().saturating_sub(1);
        if ttl == 0 {
            log::debug!("TTL expired for packet to {}", header.destination_addr());
            self.send_icmp_error(IcmpError::TimeExceeded, frame, in_iface)
                .await;
            return;
        }

        let dest = header.destination_addr();
        let route = {
            let rt = self.routes.read().await;
            rt.lookup(dest)
                .filter(|entry| !entry.is_unreachable())
                .map(|entry| (entry.gateway(), entry.interface().to_string()))
        };

        let (gateway, out_name) = match route {
            Some(route) => route,
            None => {
                log::info!("No route to {}, dropping packet", dest);
                self.send_icmp_error(IcmpError::NetUnreachable, frame, in_iface)
                    .await;
                return;
            }
        };

        let out_iface = match self.interfaces.get(&out_name) {
            Some(iface) => iface,
            None => {
                log::warn!("Route to {} uses unknown interface {}", dest, out_name);
                return;
            }
        };

        let next_hop = if gateway.is_unspecified() { dest } else { gateway };

        let mut packet = frame.to_vec();
        if !set_ttl(&mut packet, ttl) {
            log::debug!("Cannot rewrite TTL of packet to {}, dropping", dest);
            return;
        }
        self.send_via_arp(packet, out_iface, next_hop).await;
    }

    /// Send `frame` to `next_hop` once its hardware address is known.
    async fn send_via_arp(&self, frame: Vec<u8>, out_iface: &Interface, next_hop: Ipv4Addr) {
        let now = Instant::now();
        let (ready, new_request) = {
            let mut arp = self.arp.write().await;
            match arp.resolve(next_hop, &out_iface.name, now) {
                Resolution::Resolved(mac) => (Some((mac, frame)), false),
                Resolution::Pending { new_request } => {
                    match arp.wait_for_arp(frame, &out_iface.name, next_hop, now) {
                        WaitOutcome::Queued { .. } => (None, new_request),
                        WaitOutcome::Resolved(mac, frame) => (Some((mac, frame)), false),
                    }
                }
            }
        };

        if let Some((mac, mut frame)) = ready {
            set_macs(&mut frame, out_iface.mac, mac);
            self.transmit(&frame, &out_iface.name).await;
        }

        if new_request {
            send_arp_request(self.link.as_ref(), out_iface, next_hop).await;
        }
    }

    async fn send_echo_reply(
        &self,
        frame: &[u8],
        header: &Ipv4HeaderSlice<'_>,
        echo: IcmpEchoHeader,
        data: &[u8],
        iface: &Interface,
    ) {
        let dest = header.destination_addr();
        let src = if self.interfaces.is_my_addr(dest) {
            dest
        } else {
            iface.ip
        };
        let reply = IcmpMessage::echo_reply(echo, data).into_bytes();

        let built = FrameBuilder::default()
            .with_src(src)
            .with_dst(header.source_addr())
            .with_src_mac(iface.mac)
            .with_dst_mac(source_mac(frame))
            .with_protocol(Protocol::Icmp)
            .with_ttl(ICMP_TTL)
            .with_payload(&reply)
            .build();

        match built {
            Ok(reply_frame) => self.transmit(&reply_frame, &iface.name).await,
            Err(e) => log::error!("Failed to build echo reply: {:?}", e),
        }
    }

    /// Report `kind` to the sender of `frame`, out of the interface it
    /// arrived on.
    async fn send_icmp_error(&self, kind: IcmpError, frame: &[u8], iface: &Interface) {
        let offending = &frame[ETHERNET_HEADER_LEN..];
        let original = match Ipv4HeaderSlice::from_slice(offending) {
            Ok(header) => header,
            Err(_) => return,
        };

        let dst = original.source_addr();
        let msg = IcmpMessage::error(kind, offending).into_bytes();
        let built = FrameBuilder::default()
            .with_src(iface.ip)
            .with_dst(dst)
            .with_src_mac(iface.mac)
            .with_dst_mac(source_mac(frame))
            .with_protocol(Protocol::Icmp)
            .with_ttl(ICMP_TTL)
            .with_payload(&msg)
            .build();

        match built {
            Ok(error_frame) => {
                log::info!("Sending ICMP {:?} to {}", kind, dst);
                self.transmit(&error_frame, &iface.name).await;
            }
            Err(e) => log::error!("Failed to build ICMP {:?}: {:?}", kind, e),
        }
    }

    async fn transmit(&self, frame: &[u8], iface: &str) {
        log::trace!("Sending {} byte frame on {}", frame.len(), iface);
        if !self.link.transmit(frame, iface).await {
            log::warn!("Failed to transmit frame on {}", iface);
        }
    }
}

impl<L: LinkLayer> Drop for Router<L> {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().iter() {
            task.abort();
        }
    }
}

async fn retry_arp_requests<L: LinkLayer>(
    link: Arc<L>,
    arp: Arc<RwLock<ArpCache>>,
    interfaces: InterfaceTable,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    loop_with_interval(interval, shutdown, || async {
        sweep_arp_cache(link.as_ref(), &arp, &interfaces, Instant::now()).await;
    })
    .await;
}

async fn sweep_arp_cache<L: LinkLayer>(
    link: &L,
    arp: &RwLock<ArpCache>,
    interfaces: &InterfaceTable,
    now: Instant,
) {
    let sweep = arp.write().await.sweep(now);

    for (target, iface_name) in sweep.retries {
        match interfaces.get(&iface_name) {
            Some(iface) => send_arp_request(link, iface, target).await,
            None => log::warn!("Cannot retry ARP for {}: no interface {}", target, iface_name),
        }
    }
}

async fn send_arp_request<L: LinkLayer>(link: &L, iface: &Interface, target: Ipv4Addr) {
    log::debug!("Who has {}? Asking on {}", target, iface.name);
    let frame = ArpPacket::request(iface, target).into_frame();
    log::trace!("Sending {} byte frame on {}", frame.len(), iface.name);
    if !link.transmit(&frame, &iface.name).await {
        log::warn!("Failed to send ARP request on {}", iface.name);
    }
}

/// The IP payload of `frame`, without any link-layer padding.
fn ip_payload<'a>(frame: &'a [u8], header: &Ipv4HeaderSlice<'_>) -> &'a [u8] {
    let start = ETHERNET_HEADER_LEN + header.slice().len();
    let end = (ETHERNET_HEADER_LEN + usize::from(header.total_len())).clamp(start, frame.len());
    &frame[start..end]
}

fn source_mac(frame: &[u8]) -> MacAddr {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&frame[6..12]);
    MacAddr(octets)
}
