use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;

/// Immutable composed view of every blocking input for one server instance.
///
/// Published once by the builder and shared read-only across all concurrent
/// handlers; a rebuild produces a fresh snapshot for the next instance
/// instead of mutating this one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Snapshot {
    hostnames: HashSet<String>,
    ips: HashSet<IpAddr>,
    prefixes: HashSet<IpNet>,
}

impl Snapshot {
    pub(crate) fn new(
        hostnames: HashSet<String>,
        ips: HashSet<IpAddr>,
        prefixes: HashSet<IpNet>,
    ) -> Self {
        Self {
            hostnames,
            ips,
            prefixes,
        }
    }

    pub fn hostname_count(&self) -> usize {
        self.hostnames.len()
    }

    pub fn ip_count(&self) -> usize {
        self.ips.len()
    }

    pub fn prefix_count(&self) -> usize {
        self.prefixes.len()
    }

    /// Whether `name` or any parent domain of it is blocked. The name is
    /// compared lowercase and without a trailing dot.
    pub fn blocks_hostname(&self, name: &str) -> bool {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        let mut suffix = name.as_str();
        loop {
            if self.hostnames.contains(suffix) {
                return true;
            }
            match suffix.split_once('.') {
                Some((_, rest)) => suffix = rest,
                None => return false,
            }
        }
    }

    /// Whether `ip` is blocked directly or covered by a blocked prefix.
    pub fn blocks_ip(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip) || self.prefixes.iter().any(|prefix| prefix.contains(&ip))
    }

    #[cfg(test)]
    pub(crate) fn hostnames(&self) -> &HashSet<String> {
        &self.hostnames
    }

    #[cfg(test)]
    pub(crate) fn ips(&self) -> &HashSet<IpAddr> {
        &self.ips
    }

    #[cfg(test)]
    pub(crate) fn prefixes(&self) -> &HashSet<IpNet> {
        &self.prefixes
    }
}
