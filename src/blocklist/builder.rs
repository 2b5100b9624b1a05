use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::mpsc;

use super::snapshot::Snapshot;
use super::sources::{self, Category, ListKind};

/// CIDRs always appended when rebinding protection is on, so upstream
/// answers can never point clients at private network space.
const PRIVATE_CIDRS: &[&str] = &[
    "127.0.0.0/8",
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "::1/128",
    "fc00::/7",
    "::ffff:0:0/96",
];

/// Inputs to one block list build.
#[derive(Debug, Default, Clone)]
pub struct BuilderSettings {
    pub block_malicious: bool,
    pub block_ads: bool,
    pub block_surveillance: bool,
    pub allowed_hosts: Vec<String>,
    pub add_blocked_hosts: Vec<String>,
    pub add_blocked_ips: Vec<String>,
    pub add_blocked_ip_prefixes: Vec<String>,
    pub rebinding_protection: bool,
}

impl BuilderSettings {
    fn enabled_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|category| match category {
                Category::Malicious => self.block_malicious,
                Category::Ads => self.block_ads,
                Category::Surveillance => self.block_surveillance,
            })
            .collect()
    }
}

/// Fatal builder failure: the user supplied an unparseable value.
#[derive(Debug)]
pub enum BlocklistError {
    InvalidUserInput { value: String, detail: String },
}

impl std::fmt::Display for BlocklistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUserInput { value, detail } => {
                write!(f, "invalid user provided value {:?}: {}", value, detail)
            }
        }
    }
}

impl std::error::Error for BlocklistError {}

#[derive(Debug, Clone)]
pub enum FetchError {
    Transport(String),
    Status(u16),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "cannot fetch list: {}", msg),
            Self::Status(code) => write!(f, "HTTP status code is {} and not 200", code),
        }
    }
}

/// Non-fatal problem with one source list.
#[derive(Debug, Clone)]
pub struct BuildWarning {
    pub url: &'static str,
    pub error: FetchError,
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.url, self.error)
    }
}

/// Downloads one newline separated list body.
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpListFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl ListFetcher for HttpListFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))
    }
}

/// Builds [`Snapshot`]s from the remote lists and the user configuration.
pub struct Builder {
    fetcher: Arc<dyn ListFetcher>,
}

impl Builder {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            fetcher: Arc::new(HttpListFetcher { client }),
        }
    }

    pub fn with_fetcher(fetcher: Arc<dyn ListFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches every enabled list concurrently and composes the snapshot.
    ///
    /// One download task runs per (category, kind) pair and the builder
    /// returns only once all of them have reported back. A failed download
    /// contributes a warning and no entries.
    pub async fn build(
        &self,
        settings: &BuilderSettings,
    ) -> Result<(Snapshot, Vec<BuildWarning>), BlocklistError> {
        let (tx, mut rx) = mpsc::channel(Category::ALL.len() * ListKind::ALL.len());

        let mut pending = 0usize;
        for category in settings.enabled_categories() {
            for kind in ListKind::ALL {
                let url = sources::url(category, kind);
                let fetcher = Arc::clone(&self.fetcher);
                let tx = tx.clone();
                pending += 1;
                tokio::spawn(async move {
                    let result = fetcher.fetch(url).await;
                    let _ = tx.send((kind, url, result)).await;
                });
            }
        }
        drop(tx);
        log::info!("downloading {} block lists", pending);

        let mut fetched_hostnames: HashSet<String> = HashSet::new();
        let mut fetched_ips: HashSet<IpAddr> = HashSet::new();
        let mut fetched_prefixes: HashSet<IpNet> = HashSet::new();
        let mut warnings = Vec::new();

        while let Some((kind, url, result)) = rx.recv().await {
            let body = match result {
                Ok(body) => body,
                Err(error) => {
                    warnings.push(BuildWarning { url, error });
                    continue;
                }
            };
            for line in body.lines().filter(|line| !line.is_empty()) {
                match kind {
                    ListKind::Hostnames => {
                        fetched_hostnames.insert(line.to_string());
                    }
                    ListKind::Ips => {
                        if let Ok(ip) = line.parse::<IpAddr>() {
                            fetched_ips.insert(ip);
                        } else if let Ok(prefix) = line.parse::<IpNet>() {
                            fetched_prefixes.insert(prefix);
                        } else {
                            log::debug!("skipping unparseable line in {}: {:?}", url, line);
                        }
                    }
                }
            }
        }

        let snapshot = compose(fetched_hostnames, fetched_ips, fetched_prefixes, settings)?;
        Ok((snapshot, warnings))
    }
}

/// Snapshot from user configuration alone, with no network fetch. Used for
/// the very first server instance so it becomes reachable immediately.
pub fn offline_snapshot(settings: &BuilderSettings) -> Result<Snapshot, BlocklistError> {
    compose(HashSet::new(), HashSet::new(), HashSet::new(), settings)
}

fn compose(
    mut hostnames: HashSet<String>,
    mut ips: HashSet<IpAddr>,
    mut prefixes: HashSet<IpNet>,
    settings: &BuilderSettings,
) -> Result<Snapshot, BlocklistError> {
    for host in &settings.add_blocked_hosts {
        hostnames.insert(host.clone());
    }
    hostnames.retain(|host| !is_allowed(host, &settings.allowed_hosts));
    for allowed in &settings.allowed_hosts {
        hostnames.remove(allowed);
    }

    for value in &settings.add_blocked_ips {
        let ip: IpAddr = value
            .parse()
            .map_err(|err: std::net::AddrParseError| BlocklistError::InvalidUserInput {
                value: value.clone(),
                detail: err.to_string(),
            })?;
        ips.insert(ip);
    }
    for value in &settings.add_blocked_ip_prefixes {
        let prefix: IpNet =
            value
                .parse()
                .map_err(|err: ipnet::AddrParseError| BlocklistError::InvalidUserInput {
                    value: value.clone(),
                    detail: err.to_string(),
                })?;
        prefixes.insert(prefix);
    }
    if settings.rebinding_protection {
        prefixes.extend(private_prefixes());
    }

    Ok(Snapshot::new(hostnames, ips, prefixes))
}

fn is_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts
        .iter()
        .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
}

fn private_prefixes() -> impl Iterator<Item = IpNet> {
    PRIVATE_CIDRS
        .iter()
        .map(|cidr| cidr.parse().expect("built-in CIDR parses"))
}
