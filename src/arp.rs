use core::fmt;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::net::MacAddr;

/// Broadcasts sent for one address before its queued frames are dropped.
pub const MAX_ARP_REQUESTS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub mac: MacAddr,
    pub resolved_at: Instant,
}

/// Frames waiting on an address that has not been resolved yet.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingRequest {
    pub target_ip: Ipv4Addr,
    /// Interface the ARP requests go out of.
    pub interface: String,
    /// Complete frames, in the order they were queued.
    pub waiting_frames: Vec<Vec<u8>>,
    pub requests_sent: u32,
    pub last_sent_at: Instant,
}

#[derive(Debug)]
pub enum ArpState {
    Pending(PendingRequest),
    Resolved(ArpEntry),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Resolved(MacAddr),
    /// `new_request` is set when this call started resolution, so the first
    /// request still has to be broadcast.
    Pending { new_request: bool },
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Queued { new_request: bool },
    /// The address got resolved in the meantime; the frame is handed back to
    /// be sent right away.
    Resolved(MacAddr, Vec<u8>),
}

/// Work produced by one pass of the retry timer.
#[derive(Debug, Default)]
pub struct Sweep {
    /// `(target, interface)` pairs whose request must be broadcast again.
    pub retries: Vec<(Ipv4Addr, String)>,
    /// Requests that ran out of retries, along with their queued frames.
    pub dropped: Vec<PendingRequest>,
    pub expired: usize,
}

/// Mapping between IP addresses and hardware addresses, with a queue of
/// frames per address still being resolved.
#[derive(Debug)]
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, ArpState>,
    retry_interval: Duration,
    entry_max_age: Option<Duration>,
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), None)
    }
}

impl ArpCache {
    pub fn new(retry_interval: Duration, entry_max_age: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            retry_interval,
            entry_max_age,
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        match self.entries.get(&ip) {
            Some(ArpState::Resolved(entry)) => Some(entry.mac),
            _ => None,
        }
    }

    pub fn state(&self, ip: Ipv4Addr) -> Option<&ArpState> {
        self.entries.get(&ip)
    }

    /// Look `ip` up, starting resolution out of `iface` on a miss.
    pub fn resolve(&mut self, ip: Ipv4Addr, iface: &str, now: Instant) -> Resolution {
        match self.entries.get(&ip) {
            Some(ArpState::Resolved(entry)) => Resolution::Resolved(entry.mac),
            Some(ArpState::Pending(_)) => Resolution::Pending { new_request: false },
            None => {
                self.start_request(ip, iface, now);
                Resolution::Pending { new_request: true }
            }
        }
    }

    /// Queue `frame` until `target_ip` is resolved.
    pub fn wait_for_arp(
        &mut self,
        frame: Vec<u8>,
        iface: &str,
        target_ip: Ipv4Addr,
        now: Instant,
    ) -> WaitOutcome {
        let new_request = match self.entries.get(&target_ip) {
            Some(ArpState::Resolved(entry)) => return WaitOutcome::Resolved(entry.mac, frame),
            Some(ArpState::Pending(_)) => false,
            None => {
                self.start_request(target_ip, iface, now);
                true
            }
        };

        if let Some(ArpState::Pending(request)) = self.entries.get_mut(&target_ip) {
            request.waiting_frames.push(frame);
            log::debug!(
                "Queued frame for {}, {} waiting",
                target_ip,
                request.waiting_frames.len()
            );
        }

        WaitOutcome::Queued { new_request }
    }

    fn start_request(&mut self, ip: Ipv4Addr, iface: &str, now: Instant) {
        log::debug!("Resolving {} on {}", ip, iface);
        self.entries.insert(
            ip,
            ArpState::Pending(PendingRequest {
                target_ip: ip,
                interface: iface.to_string(),
                waiting_frames: Vec::new(),
                requests_sent: 1,
                last_sent_at: now,
            }),
        );
    }

    /// Record that `ip` is at `mac`. Returns the request that was waiting on
    /// this address, if any, so its frames can be sent.
    pub fn insert(&mut self, mac: MacAddr, ip: Ipv4Addr, now: Instant) -> Option<PendingRequest> {
        log::info!("ARP: {} is at {}", ip, mac);
        let previous = self.entries.insert(
            ip,
            ArpState::Resolved(ArpEntry {
                mac,
                resolved_at: now,
            }),
        );

        match previous {
            Some(ArpState::Pending(request)) => Some(request),
            _ => None,
        }
    }

    /// Advance the retry timers.
    ///
    /// Requests last sent at least one retry interval ago are sent again,
    /// or dropped together with their frames after `MAX_ARP_REQUESTS`
    /// attempts. Resolved entries older than the configured max age are
    /// forgotten.
    pub fn sweep(&mut self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();
        let retry_interval = self.retry_interval;
        let entry_max_age = self.entry_max_age;

        let mut to_drop = Vec::new();
        let mut to_expire = Vec::new();
        for (ip, state) in self.entries.iter_mut() {
            match state {
                ArpState::Pending(request) => {
                    if now.saturating_duration_since(request.last_sent_at) < retry_interval {
                        continue;
                    }
                    if request.requests_sent >= MAX_ARP_REQUESTS {
                        to_drop.push(*ip);
                    } else {
                        request.requests_sent += 1;
                        request.last_sent_at = now;
                        sweep.retries.push((*ip, request.interface.clone()));
                    }
                }
                ArpState::Resolved(entry) => {
                    if let Some(max_age) = entry_max_age {
                        if now.saturating_duration_since(entry.resolved_at) > max_age {
                            to_expire.push(*ip);
                        }
                    }
                }
            }
        }

        for ip in to_drop {
            if let Some(ArpState::Pending(request)) = self.entries.remove(&ip) {
                log::warn!(
                    "No ARP reply from {} after {} requests, dropping {} frames",
                    ip,
                    request.requests_sent,
                    request.waiting_frames.len()
                );
                sweep.dropped.push(request);
            }
        }

        for ip in to_expire {
            log::debug!("ARP entry for {} expired", ip);
            self.entries.remove(&ip);
            sweep.expired += 1;
        }

        sweep
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ArpCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut ips: Vec<&Ipv4Addr> = self.entries.keys().collect();
        ips.sort();

        for ip in ips {
            match &self.entries[ip] {
                ArpState::Resolved(entry) => writeln!(f, "{}\t{}", ip, entry.mac)?,
                ArpState::Pending(request) => writeln!(
                    f,
                    "{}\t(pending on {}, {} sent, {} queued)",
                    ip,
                    request.interface,
                    request.requests_sent,
                    request.waiting_frames.len()
                )?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 2, 7)
    }

    fn mac() -> MacAddr {
        MacAddr([2, 0, 0, 0, 2, 7])
    }

    #[test]
    fn miss_starts_one_request() {
        let mut cache = ArpCache::default();
        let now = Instant::now();

        assert_eq!(
            cache.resolve(ip(), "eth1", now),
            Resolution::Pending { new_request: true }
        );
        assert_eq!(
            cache.resolve(ip(), "eth1", now),
            Resolution::Pending { new_request: false }
        );
        assert_eq!(cache.lookup(ip()), None);

        cache.insert(mac(), ip(), now);
        assert_eq!(cache.resolve(ip(), "eth1", now), Resolution::Resolved(mac()));
        assert_eq!(cache.lookup(ip()), Some(mac()));
    }

    #[test]
    fn insert_releases_queue_in_order() {
        let mut cache = ArpCache::default();
        let now = Instant::now();

        assert_eq!(
            cache.wait_for_arp(vec![1], "eth1", ip(), now),
            WaitOutcome::Queued { new_request: true }
        );
        assert_eq!(
            cache.wait_for_arp(vec![2], "eth1", ip(), now),
            WaitOutcome::Queued { new_request: false }
        );
        cache.wait_for_arp(vec![3], "eth1", ip(), now);

        let request = cache.insert(mac(), ip(), now).unwrap();
        assert_eq!(request.interface, "eth1");
        assert_eq!(request.waiting_frames, vec![vec![1], vec![2], vec![3]]);

        // Nothing left to release the second time around.
        assert!(cache.insert(mac(), ip(), now).is_none());
    }

    #[test]
    fn queueing_after_resolution_hands_frame_back() {
        let mut cache = ArpCache::default();
        let now = Instant::now();
        cache.insert(mac(), ip(), now);

        assert_eq!(
            cache.wait_for_arp(vec![9], "eth1", ip(), now),
            WaitOutcome::Resolved(mac(), vec![9])
        );
    }

    #[test]
    fn retries_then_drops() {
        let mut cache = ArpCache::default();
        let start = Instant::now();
        cache.wait_for_arp(vec![1], "eth1", ip(), start);

        // Too early for a retry.
        let sweep = cache.sweep(start + Duration::from_millis(500));
        assert!(sweep.retries.is_empty());
        assert!(sweep.dropped.is_empty());

        let mut retries = 0;
        for i in 1..=MAX_ARP_REQUESTS {
            let sweep = cache.sweep(start + Duration::from_secs(u64::from(i)));
            retries += sweep.retries.len();
            if !sweep.dropped.is_empty() {
                assert_eq!(sweep.dropped[0].waiting_frames, vec![vec![1]]);
                assert_eq!(sweep.dropped[0].requests_sent, MAX_ARP_REQUESTS);
                break;
            }
            assert_eq!(sweep.retries, vec![(ip(), "eth1".to_string())]);
        }

        assert_eq!(retries as u32, MAX_ARP_REQUESTS - 1);
        assert!(cache.state(ip()).is_none());
    }

    #[test]
    fn resolved_entries_expire_when_configured() {
        let start = Instant::now();

        let mut cache = ArpCache::new(Duration::from_secs(1), Some(Duration::from_secs(15)));
        cache.insert(mac(), ip(), start);
        cache.sweep(start + Duration::from_secs(10));
        assert_eq!(cache.lookup(ip()), Some(mac()));
        cache.sweep(start + Duration::from_secs(16));
        assert_eq!(cache.lookup(ip()), None);

        let mut cache = ArpCache::default();
        cache.insert(mac(), ip(), start);
        cache.sweep(start + Duration::from_secs(3600));
        assert_eq!(cache.lookup(ip()), Some(mac()));
    }
}
