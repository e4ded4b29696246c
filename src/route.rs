use core::fmt;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    net::Ipv4Addr,
    path::Path,
    time::{Duration, Instant},
};

use crate::utils::net::{apply_mask, prefix_len};

/// RIP's "unreachable" metric.
pub const INFINITY: u32 = 16;

#[derive(Default, Debug)]
pub struct RouteTable {
    entries: Vec<Entry>,
}

impl RouteTable {
    pub fn with_entries(entries: Vec<Entry>) -> Self {
        let mut table = Self::default();
        for entry in entries {
            table.insert(entry);
        }
        table
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Longest-prefix match for `dest`.
    ///
    /// Among matching entries the one with the longest mask wins; on equal
    /// masks the most recently learned entry wins.
    pub fn lookup(&self, dest: Ipv4Addr) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.matches(dest))
            .max_by(|a, b| {
                a.prefix_len()
                    .cmp(&b.prefix_len())
                    .then(a.learned_at.cmp(&b.learned_at))
            })
    }

    pub fn find_entry(&self, network: Ipv4Addr, mask: Ipv4Addr) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.destination == network && e.mask == mask)
    }

    fn find_mut_entry(&mut self, network: Ipv4Addr, mask: Ipv4Addr) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.destination == network && e.mask == mask)
    }

    /// Add a route. Returns false, leaving the table untouched, when a route
    /// for the same network and mask already exists.
    pub fn add_entry(
        &mut self,
        network: Ipv4Addr,
        gateway: Ipv4Addr,
        mask: Ipv4Addr,
        iface: &str,
        metric: u32,
    ) -> bool {
        self.insert(Entry::new(network, mask, gateway, iface, metric))
    }

    fn insert(&mut self, entry: Entry) -> bool {
        if self.find_entry(entry.destination, entry.mask).is_some() {
            log::debug!("Not adding duplicate route {}", entry);
            return false;
        }
        log::info!("Adding route {}", entry);
        self.entries.push(entry);
        true
    }

    /// Replace the gateway, interface and metric of an existing route and
    /// restart its timer. Returns false when there is no such route.
    pub fn update_entry(
        &mut self,
        network: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        iface: &str,
        metric: u32,
    ) -> bool {
        match self.find_mut_entry(network, mask) {
            Some(entry) => {
                entry.update(gateway, iface, metric);
                true
            }
            None => false,
        }
    }

    pub fn remove_entry(&mut self, network: Ipv4Addr, mask: Ipv4Addr) -> bool {
        let len_before = self.entries.len();
        self.entries
            .retain(|e| !(e.destination == network && e.mask == mask));
        len_before != self.entries.len()
    }

    pub fn entries(&self) -> &[Entry] {
        self.entries.as_slice()
    }

    /// An owned copy of every entry, for use once the lock is released.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    /// Delete learned routes that have not been refreshed within `max_age`.
    ///
    /// Directly connected routes (metric 0) never expire.
    pub fn prune(&mut self, max_age: Duration, now: Instant) -> usize {
        let expired = |e: &Entry| !e.is_directly_connected() && e.age(now) > max_age;

        for (i, entry) in self.entries().iter().enumerate() {
            if expired(entry) {
                log::warn!(
                    "Deleting entry {i}, {:?}, age: {:?}",
                    entry,
                    entry.age(now)
                );
            }
        }

        let num_deleted = {
            let len_before = self.entries.len();
            self.entries.retain(|e| !expired(e));
            len_before - self.entries.len()
        };
        if num_deleted > 0 {
            log::info!("Table pruned, {num_deleted} entries deleted");
        }
        num_deleted
    }

    /// Parse a static routing table: one `destination gateway mask interface
    /// [metric]` route per line. Blank lines and `#` comments are skipped.
    pub fn load<B: BufRead>(reader: B) -> Result<Self, ParseTableError> {
        let mut table = RouteTable::default();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(ParseTableError::ReadLineError)?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let entry =
                Entry::try_parse(line).map_err(|e| ParseTableError::MalformedRoute(idx + 1, e))?;
            table.insert(entry);
        }

        Ok(table)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ParseTableError> {
        let br = BufReader::new(File::open(path).map_err(ParseTableError::OpenFileError)?);
        RouteTable::load(br)
    }
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.entries.iter().fold(Ok(()), |acc, entry| {
            acc.and_then(|_| writeln!(f, "{}", entry))
        })
    }
}

#[derive(Debug)]
pub enum ParseRouteError {
    NoDestination,
    NoGateway,
    NoMask,
    NoInterface,
    MalformedIp,
    MalformedMetric,
}

#[derive(Debug)]
pub enum ParseTableError {
    /// Line number (1-based) and what was wrong with it.
    MalformedRoute(usize, ParseRouteError),
    ReadLineError(std::io::Error),
    OpenFileError(std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    destination: Ipv4Addr,
    mask: Ipv4Addr,
    gateway: Ipv4Addr,
    interface: String,
    metric: u32,
    pub learned_at: Instant,
}

impl Entry {
    pub fn new(
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: &str,
        metric: u32,
    ) -> Self {
        Self {
            destination,
            mask,
            gateway,
            interface: interface.to_string(),
            metric,
            learned_at: Instant::now(),
        }
    }

    fn try_parse(line: &str) -> Result<Self, ParseRouteError> {
        let mut split = line.split_whitespace();

        let destination = split
            .next()
            .ok_or(ParseRouteError::NoDestination)?
            .parse()
            .map_err(|_| ParseRouteError::MalformedIp)?;

        let gateway = split
            .next()
            .ok_or(ParseRouteError::NoGateway)?
            .parse()
            .map_err(|_| ParseRouteError::MalformedIp)?;

        let mask = split
            .next()
            .ok_or(ParseRouteError::NoMask)?
            .parse()
            .map_err(|_| ParseRouteError::MalformedIp)?;

        let interface = split.next().ok_or(ParseRouteError::NoInterface)?;

        let metric = match split.next() {
            Some(m) => m.parse().map_err(|_| ParseRouteError::MalformedMetric)?,
            None => 0,
        };

        Ok(Entry::new(destination, mask, gateway, interface, metric))
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// Next hop; 0.0.0.0 for a directly connected network.
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn metric(&self) -> u32 {
        self.metric
    }

    pub fn is_unreachable(&self) -> bool {
        self.metric >= INFINITY
    }

    /// Whether this is a route to a network one of our interfaces is on.
    pub fn is_directly_connected(&self) -> bool {
        self.metric == 0
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        apply_mask(addr, self.mask) == self.destination
    }

    pub fn prefix_len(&self) -> u32 {
        prefix_len(self.mask)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.learned_at)
    }

    pub fn update(&mut self, gateway: Ipv4Addr, interface: &str, metric: u32) {
        log::info!(
            "Update routing entry: old: {}, new gateway: {}, new interface: {}, new metric: {}",
            self,
            gateway,
            interface,
            metric
        );
        self.gateway = gateway;
        self.interface = interface.to_string();
        self.metric = metric;
        self.restart_delete_timer();
    }

    pub fn restart_delete_timer(&mut self) {
        log::debug!("resetting timer for entry: {}", self);
        self.learned_at = Instant::now();
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.destination, self.gateway, self.mask, self.interface, self.metric
        )
    }
}
