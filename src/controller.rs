//! Rebuild supervisor for the forwarding server.
//!
//! The controller owns the server lifecycle as an explicit state machine
//! with three states. Starting runs exactly once: a server built from the
//! user configuration alone goes up immediately, so clients are served
//! before any list download can stall startup, and the controller moves
//! straight into a rebuild. Rebuilding stops the running server, rebuilds
//! the block list snapshot and starts a fresh server on the same port.
//! Running waits for the update timer, the parent cancellation, or a
//! server crash. Exactly one server instance exists between two Running
//! states; the port is briefly unbound while rebuilding, which makes each
//! snapshot swap atomic by construction.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::blocklist::{self, BlocklistError, Builder, Snapshot};
use crate::check::{self, CheckError};
use crate::config::{Settings, UpstreamKind};
use crate::server::{Server, ServerError};
use crate::upstream::dial::Dialer;
use crate::upstream::doh::DohClient;
use crate::upstream::{Transport, UpstreamError, UpstreamSelection};

const LIST_CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
pub enum ControllerError {
    Blocklist(BlocklistError),
    Upstream(UpstreamError),
    Server(ServerError),
    /// The server task stopped on its own instead of being cancelled.
    ServerCrash(String),
    Check(CheckError),
    Http(reqwest::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocklist(err) => write!(f, "cannot build block list: {}", err),
            Self::Upstream(err) => write!(f, "cannot configure upstream: {}", err),
            Self::Server(err) => write!(f, "{}", err),
            Self::ServerCrash(msg) => write!(f, "DNS server crashed: {}", msg),
            Self::Check(err) => write!(f, "DNS self check failed: {}", err),
            Self::Http(err) => write!(f, "cannot build HTTP client: {}", err),
            Self::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<BlocklistError> for ControllerError {
    fn from(err: BlocklistError) -> Self {
        Self::Blocklist(err)
    }
}

impl From<UpstreamError> for ControllerError {
    fn from(err: UpstreamError) -> Self {
        Self::Upstream(err)
    }
}

impl From<ServerError> for ControllerError {
    fn from(err: ServerError) -> Self {
        Self::Server(err)
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A spawned server with the handle needed to stop it again.
struct RunningServer {
    token: CancellationToken,
    handle: JoinHandle<crate::server::Result<()>>,
}

impl RunningServer {
    async fn stop(self) -> Result<(), ControllerError> {
        self.token.cancel();
        match self.handle.await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(join_error) => Err(ControllerError::ServerCrash(join_error.to_string())),
        }
    }
}

enum State {
    Starting,
    Rebuilding { previous: Option<RunningServer> },
    Running { server: RunningServer },
}

pub struct Controller {
    settings: Settings,
    builder: Builder,
}

impl Controller {
    pub fn new(settings: Settings) -> Result<Self, ControllerError> {
        let client = reqwest::Client::builder()
            .timeout(LIST_CLIENT_TIMEOUT)
            .build()
            .map_err(ControllerError::Http)?;
        Ok(Self {
            settings,
            builder: Builder::new(client),
        })
    }

    /// Supervises server instances until `shutdown` fires or a crash.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        // Invalid user supplied block entries are unrecoverable.
        let mut snapshot = Arc::new(blocklist::offline_snapshot(&self.settings.blocklist)?);
        let mut state = State::Starting;

        loop {
            state = match state {
                State::Starting => {
                    let server = self.start_server(&snapshot, &shutdown).await?;
                    log::info!("restarting DNS server the first time to get updated lists");
                    State::Rebuilding {
                        previous: Some(server),
                    }
                }
                State::Rebuilding { previous } => {
                    if let Some(server) = previous {
                        if let Err(err) = server.stop().await {
                            log::warn!("error stopping previous DNS server: {}", err);
                        }
                    }

                    log::info!("downloading and building DNS block lists");
                    match self.builder.build(&self.settings.blocklist).await {
                        Ok((fresh, warnings)) => {
                            for warning in &warnings {
                                log::warn!("{}", warning);
                            }
                            log::info!("{} hostnames blocked overall", fresh.hostname_count());
                            log::info!("{} IP addresses blocked overall", fresh.ip_count());
                            log::info!("{} IP networks blocked overall", fresh.prefix_count());
                            snapshot = Arc::new(fresh);
                        }
                        Err(err) => {
                            log::error!("keeping previous block list snapshot: {}", err);
                        }
                    }

                    let server = self.start_server(&snapshot, &shutdown).await?;
                    State::Running { server }
                }
                State::Running { mut server } => {
                    tokio::select! {
                        _ = update_tick(self.settings.update_period) => {
                            log::info!("planned periodic restart of DNS server");
                            State::Rebuilding { previous: Some(server) }
                        }
                        _ = shutdown.cancelled() => {
                            log::info!("exiting DNS server run loop");
                            return server.stop().await;
                        }
                        exit = &mut server.handle => {
                            return Err(match exit {
                                Ok(Ok(())) => ControllerError::ServerCrash(
                                    "server stopped unexpectedly".to_string(),
                                ),
                                Ok(Err(err)) => ControllerError::ServerCrash(err.to_string()),
                                Err(join_error) => {
                                    ControllerError::ServerCrash(join_error.to_string())
                                }
                            });
                        }
                    }
                }
            };
        }
    }

    async fn start_server(
        &self,
        snapshot: &Arc<Snapshot>,
        shutdown: &CancellationToken,
    ) -> Result<RunningServer, ControllerError> {
        let transport = self.build_transport()?;
        log::info!("starting DNS server with {} upstream", transport.kind());
        let server = Server::bind(
            Arc::new(transport),
            Arc::clone(snapshot),
            self.settings.listening_port,
        )
        .await?;
        let addr = server.local_addr()?;

        let token = shutdown.child_token();
        let handle = tokio::spawn(server.run(token.clone()));
        let running = RunningServer { token, handle };

        if self.settings.check_dns {
            if let Err(err) = check::wait_for_dns(addr).await {
                let _ = running.stop().await;
                return Err(ControllerError::Check(err));
            }
        }
        Ok(running)
    }

    fn build_transport(&self) -> Result<Transport, UpstreamError> {
        let upstream = &self.settings.upstream;
        match upstream.kind {
            UpstreamKind::Dot => Ok(Transport::Dot(Dialer::new(UpstreamSelection {
                providers: upstream.dot_providers.clone(),
                fallback: upstream.fallback_providers.clone(),
                ipv6: upstream.ipv6,
                timeout: upstream.dot_timeout,
            }))),
            UpstreamKind::Doh => Ok(Transport::Doh(DohClient::new(
                &upstream.doh_providers,
                upstream.doh_timeout,
            )?)),
        }
    }
}

/// Waits one update period; a zero period disables periodic rebuilds.
async fn update_tick(period: Duration) {
    if period.is_zero() {
        std::future::pending::<()>().await
    } else {
        tokio::time::sleep(period).await
    }
}
