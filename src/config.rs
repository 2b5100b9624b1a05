//! Configuration surface of the forwarder.
//!
//! Every option can be given as a command line flag or through the matching
//! environment variable. Raw values are validated into typed [`Settings`]
//! before anything starts: provider identifiers are resolved against the
//! catalog and the active provider list must not be empty.

use std::time::Duration;

use crate::blocklist::BuilderSettings;
use crate::provider::{self, Provider, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UpstreamKind {
    /// DNS over TLS, TCP port 853.
    Dot,
    /// DNS over HTTPS, wire format POST requests.
    Doh,
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dot => write!(f, "DNS over TLS"),
            Self::Doh => write!(f, "DNS over HTTPS"),
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(name = "dnsward", version, about = "Local DNS forwarder with DNSSEC validation")]
pub struct Cli {
    /// Upstream transport used to forward queries.
    #[arg(long, env = "UPSTREAM_TYPE", value_enum, default_value_t = UpstreamKind::Dot)]
    pub upstream_type: UpstreamKind,

    /// Providers used for DNS over TLS, in catalog identifiers.
    #[arg(
        long,
        env = "DOT_PROVIDERS",
        value_delimiter = ',',
        default_value = "cloudflare"
    )]
    pub dot_providers: Vec<String>,

    /// Providers used for DNS over HTTPS.
    #[arg(
        long,
        env = "DOH_PROVIDERS",
        value_delimiter = ',',
        default_value = "cloudflare"
    )]
    pub doh_providers: Vec<String>,

    /// Plaintext fallback providers used when the DoT TCP connect fails.
    /// Empty disables the fallback.
    #[arg(long, env = "DNS_FALLBACK_PROVIDERS", value_delimiter = ',')]
    pub dns_fallback_providers: Vec<String>,

    /// Allow dialing upstream providers over IPv6.
    #[arg(long, env = "IPV6", default_value_t = false, action = clap::ArgAction::Set)]
    pub ipv6: bool,

    /// DNS over TLS dial timeout in seconds.
    #[arg(long, env = "DOT_TIMEOUT_SECONDS", default_value_t = 5)]
    pub dot_timeout_seconds: u64,

    /// DNS over HTTPS request timeout in seconds.
    #[arg(long, env = "DOH_TIMEOUT_SECONDS", default_value_t = 5)]
    pub doh_timeout_seconds: u64,

    /// Block hostnames and addresses from the malicious lists.
    #[arg(long, env = "BLOCK_MALICIOUS", default_value_t = true, action = clap::ArgAction::Set)]
    pub block_malicious: bool,

    /// Block hostnames and addresses from the ads lists.
    #[arg(long, env = "BLOCK_ADS", default_value_t = false, action = clap::ArgAction::Set)]
    pub block_ads: bool,

    /// Block hostnames and addresses from the surveillance lists.
    #[arg(long, env = "BLOCK_SURVEILLANCE", default_value_t = false, action = clap::ArgAction::Set)]
    pub block_surveillance: bool,

    /// Hostnames to exempt from every block list, with their subdomains.
    #[arg(long, env = "ALLOWED_HOSTNAMES", value_delimiter = ',')]
    pub allowed_hostnames: Vec<String>,

    /// Additional hostnames to block.
    #[arg(long, env = "BLOCK_HOSTNAMES", value_delimiter = ',')]
    pub block_hostnames: Vec<String>,

    /// Additional IP addresses to block.
    #[arg(long, env = "BLOCK_IPS", value_delimiter = ',')]
    pub block_ips: Vec<String>,

    /// Additional CIDR prefixes to block.
    #[arg(long, env = "BLOCK_IPNETS", value_delimiter = ',')]
    pub block_ipnets: Vec<String>,

    /// Block answers pointing into private network space.
    #[arg(long, env = "REBINDING_PROTECTION", default_value_t = true, action = clap::ArgAction::Set)]
    pub rebinding_protection: bool,

    /// Resolve a known hostname through the server after each start.
    #[arg(long, env = "CHECK_DNS", default_value_t = true, action = clap::ArgAction::Set)]
    pub check_dns: bool,

    /// Seconds between block list rebuilds; 0 disables periodic rebuilds.
    #[arg(long, env = "UPDATE_PERIOD_SECONDS", default_value_t = 86_400)]
    pub update_period_seconds: u64,

    /// UDP and TCP port to listen on, loopback only.
    #[arg(long, env = "LISTENING_PORT", default_value_t = 53)]
    pub listening_port: u16,
}

#[derive(Debug)]
pub enum ConfigError {
    Provider(ProviderError),
    NoProviders(UpstreamKind),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(err) => write!(f, "{}", err),
            Self::NoProviders(kind) => {
                write!(f, "at least one provider is required for {}", kind)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ProviderError> for ConfigError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}

/// Validated upstream transport configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub kind: UpstreamKind,
    pub dot_providers: Vec<&'static Provider>,
    pub doh_providers: Vec<&'static Provider>,
    pub fallback_providers: Vec<&'static Provider>,
    pub ipv6: bool,
    pub dot_timeout: Duration,
    pub doh_timeout: Duration,
}

/// Validated settings for the whole process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub upstream: UpstreamConfig,
    pub blocklist: BuilderSettings,
    pub listening_port: u16,
    pub check_dns: bool,
    pub update_period: Duration,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let dot_providers = resolve_providers(&self.dot_providers)?;
        let doh_providers = resolve_providers(&self.doh_providers)?;
        let fallback_providers = resolve_providers(&self.dns_fallback_providers)?;

        let active = match self.upstream_type {
            UpstreamKind::Dot => &dot_providers,
            UpstreamKind::Doh => &doh_providers,
        };
        if active.is_empty() {
            return Err(ConfigError::NoProviders(self.upstream_type));
        }

        Ok(Settings {
            upstream: UpstreamConfig {
                kind: self.upstream_type,
                dot_providers,
                doh_providers,
                fallback_providers,
                ipv6: self.ipv6,
                dot_timeout: Duration::from_secs(self.dot_timeout_seconds),
                doh_timeout: Duration::from_secs(self.doh_timeout_seconds),
            },
            blocklist: BuilderSettings {
                block_malicious: self.block_malicious,
                block_ads: self.block_ads,
                block_surveillance: self.block_surveillance,
                allowed_hosts: self.allowed_hostnames,
                add_blocked_hosts: self.block_hostnames,
                add_blocked_ips: self.block_ips,
                add_blocked_ip_prefixes: self.block_ipnets,
                rebinding_protection: self.rebinding_protection,
            },
            listening_port: self.listening_port,
            check_dns: self.check_dns,
            update_period: Duration::from_secs(self.update_period_seconds),
        })
    }
}

fn resolve_providers(ids: &[String]) -> Result<Vec<&'static Provider>, ProviderError> {
    ids.iter().map(|id| provider::resolve(id)).collect()
}

impl Settings {
    /// Human readable summary, logged once at startup.
    pub fn lines(&self) -> Vec<String> {
        const SUB: &str = " |--";
        const INDENT: &str = "    ";

        let mut lines = Vec::new();
        lines.push(format!("{}Upstream type: {}", SUB, self.upstream.kind));
        let active = match self.upstream.kind {
            UpstreamKind::Dot => &self.upstream.dot_providers,
            UpstreamKind::Doh => &self.upstream.doh_providers,
        };
        lines.push(format!("{}Providers:", SUB));
        for provider in active {
            lines.push(format!("{}{}{}", INDENT, SUB, provider.name));
        }
        lines.push(format!("{}Fallback providers:", SUB));
        for provider in &self.upstream.fallback_providers {
            lines.push(format!("{}{}{}", INDENT, SUB, provider.name));
        }
        lines.push(format!(
            "{}IPv6 upstream connectivity: {}",
            SUB,
            enabled(self.upstream.ipv6)
        ));
        lines.push(format!("{}Listening port: {}", SUB, self.listening_port));
        lines.push(format!(
            "{}Block malicious: {}",
            SUB,
            enabled(self.blocklist.block_malicious)
        ));
        lines.push(format!(
            "{}Block ads: {}",
            SUB,
            enabled(self.blocklist.block_ads)
        ));
        lines.push(format!(
            "{}Block surveillance: {}",
            SUB,
            enabled(self.blocklist.block_surveillance)
        ));
        lines.push(format!(
            "{}Rebinding protection: {}",
            SUB,
            enabled(self.blocklist.rebinding_protection)
        ));
        lines.push(format!(
            "{}DNS self check: {}",
            SUB,
            enabled(self.check_dns)
        ));
        lines.push(format!(
            "{}Update period: {}",
            SUB,
            if self.update_period.is_zero() {
                "disabled".to_string()
            } else {
                format!("{}s", self.update_period.as_secs())
            }
        ));
        lines
    }
}

fn enabled(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_produce_valid_settings() {
        let cli = Cli::try_parse_from(["dnsward"]).unwrap();
        let settings = cli.into_settings().unwrap();

        assert_eq!(settings.upstream.kind, UpstreamKind::Dot);
        assert_eq!(settings.upstream.dot_providers[0].id, "cloudflare");
        assert!(settings.upstream.fallback_providers.is_empty());
        assert_eq!(settings.listening_port, 53);
        assert!(settings.blocklist.block_malicious);
        assert!(!settings.blocklist.block_ads);
        assert!(settings.blocklist.rebinding_protection);
        assert_eq!(settings.update_period, Duration::from_secs(86_400));
    }

    #[test]
    fn provider_lists_are_resolved_against_the_catalog() {
        let cli = Cli::try_parse_from([
            "dnsward",
            "--dot-providers",
            "cloudflare,quad9",
            "--dns-fallback-providers",
            "google",
        ])
        .unwrap();
        let settings = cli.into_settings().unwrap();

        let ids: Vec<&str> = settings
            .upstream
            .dot_providers
            .iter()
            .map(|provider| provider.id)
            .collect();
        assert_eq!(ids, vec!["cloudflare", "quad9"]);
        assert_eq!(settings.upstream.fallback_providers[0].id, "google");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let cli = Cli::try_parse_from(["dnsward", "--dot-providers", "nonsense"]).unwrap();
        let err = cli.into_settings().unwrap_err();
        assert!(matches!(err, ConfigError::Provider(_)));
    }

    #[test]
    fn zero_update_period_disables_rebuilds() {
        let cli = Cli::try_parse_from(["dnsward", "--update-period-seconds", "0"]).unwrap();
        let settings = cli.into_settings().unwrap();
        assert!(settings.update_period.is_zero());
    }

    #[test]
    fn boolean_options_accept_explicit_values() {
        let cli = Cli::try_parse_from([
            "dnsward",
            "--block-malicious",
            "false",
            "--block-ads",
            "true",
            "--ipv6",
            "true",
        ])
        .unwrap();
        let settings = cli.into_settings().unwrap();
        assert!(!settings.blocklist.block_malicious);
        assert!(settings.blocklist.block_ads);
        assert!(settings.upstream.ipv6);
    }

    #[test]
    fn summary_mentions_the_active_providers() {
        let cli = Cli::try_parse_from(["dnsward"]).unwrap();
        let settings = cli.into_settings().unwrap();
        let summary = settings.lines().join("\n");
        assert!(summary.contains("Cloudflare"));
        assert!(summary.contains("Listening port: 53"));
    }
}
