use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLockReadGuard;

use crate::arp::ArpCache;
use crate::net::vtlink::{self, Link, VtLinkLayer};
use crate::route::{ParseTableError, RouteTable};
use crate::router::{Router, RouterConfig};
use crate::Args;

#[derive(Debug)]
pub enum BuildNodeError {
    Link(vtlink::Error),
    RouteFile(ParseTableError),
}

pub struct NodeBuilder<'a> {
    args: &'a Args,
    config: RouterConfig,
}

impl<'a> NodeBuilder<'a> {
    /// A builder using the timers given in `args`, defaults otherwise.
    pub fn new(args: &'a Args) -> Self {
        let mut builder = Self {
            args,
            config: RouterConfig::default(),
        };

        let timers = &args.timers;
        if let Some(interval) = timers.rip_interval {
            builder.with_rip_interval(interval);
        }
        if let Some(timeout) = timers.route_timeout {
            builder.with_route_timeout(timeout);
        }
        if let Some(interval) = timers.arp_retry {
            builder.with_arp_retry_interval(interval);
        }
        if let Some(max_age) = timers.arp_max_age {
            builder.with_arp_entry_max_age(max_age);
        }
        builder
    }

    /// Set the interval of sending periodic RIP updates.
    pub fn with_rip_interval(&mut self, rip_interval: Duration) -> &mut Self {
        self.config.rip_update_interval = rip_interval;
        self
    }

    /// Set the maximum time a learned route can live without receiving an update.
    pub fn with_route_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.config.route_timeout = timeout;
        self
    }

    /// Set the time between two ARP requests for the same address.
    pub fn with_arp_retry_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.arp_retry_interval = interval;
        self
    }

    /// Forget resolved hardware addresses after `max_age`.
    pub fn with_arp_entry_max_age(&mut self, max_age: Duration) -> &mut Self {
        self.config.arp_entry_max_age = Some(max_age);
        self
    }

    pub async fn build(&self) -> Result<Node, BuildNodeError> {
        let routes = match &self.args.route_file {
            Some(path) => {
                let table = RouteTable::load_from_path(path).map_err(BuildNodeError::RouteFile)?;
                log::info!("Loaded {} static routes from {}", table.len(), path);
                table
            }
            None => RouteTable::default(),
        };

        let link = Arc::new(
            VtLinkLayer::new(self.args)
                .await
                .map_err(BuildNodeError::Link)?,
        );
        let router = Router::new(link.clone(), routes, self.config.clone());

        Ok(Node { link, router })
    }
}

pub struct Node {
    link: Arc<VtLinkLayer>,
    router: Router<VtLinkLayer>,
}

impl Node {
    /// Start the router and feed it every received frame until the link
    /// layer goes away.
    pub async fn run(&self) {
        self.router.start().await;

        let mut listener = self.link.listen().await;
        loop {
            match listener.recv().await {
                Ok((iface, frame)) => self.router.on_frame(&frame, &iface).await,
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Missed handling {n} frames b/c internal buffer full")
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }

    /// Turns on a link interface.
    pub fn activate(&self, iface: &str) -> Result<(), vtlink::Error> {
        self.link.activate_link(iface)
    }

    /// Turns off a link interface.
    pub fn deactivate(&self, iface: &str) -> Result<(), vtlink::Error> {
        self.link.deactivate_link(iface)
    }

    /// Iterate all links (both active and inactive) for this host.
    pub fn iter_links(&self) -> impl Iterator<Item = &Link> {
        self.link.iter_links()
    }

    pub async fn get_routes(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.router.get_routes().await
    }

    pub async fn get_arp_cache(&self) -> RwLockReadGuard<'_, ArpCache> {
        self.router.get_arp_cache().await
    }
}
