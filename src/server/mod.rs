// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The served-mode supervisor.
//!
//! Binds the listing server plus one SSH server per should-listen endpoint,
//! fans endpoint updates out to live sessions, and shuts everything down in
//! an orderly way on SIGINT/SIGTERM/SIGHUP.

pub mod command;
pub mod factory;
pub mod handler;
pub mod listing;
pub mod middleware;
pub mod session;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Endpoint, MiddlewareChain, User};
use crate::keygen;

use command::CommandMiddleware;
use factory::{DefaultFactory, ServerFactory};
use handler::WishHandler;
use listing::ListingMiddleware;

/// Where served-mode state lives: host key, client key, known hosts.
pub const TRUST_DIR: &str = ".wishlist";

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// State shared by every connection of one served endpoint.
pub struct Shared {
    /// The endpoint being served, middleware chain included.
    pub endpoint: Endpoint,
    pub users: Vec<User>,
    pub trust_dir: PathBuf,
    /// The live user-endpoint set shown by listings.
    pub endpoints: Arc<RwLock<Vec<Endpoint>>>,
    /// Fan-out of endpoint replacements. Late subscribers see only
    /// subsequent updates; lagging ones drop.
    pub updates: broadcast::Sender<Vec<Endpoint>>,
    pub shutdown: CancellationToken,
}

struct Runner {
    shared: Arc<Shared>,
}

impl russh::server::Server for Runner {
    type Handler = WishHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        tracing::info!(peer = ?peer_addr, endpoint = %self.shared.endpoint.name, "new client connection");
        WishHandler::new(Arc::clone(&self.shared), peer_addr)
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        tracing::error!(error = %error, "session error");
    }
}

/// Serves the listing (and every should-listen endpoint) until a shutdown
/// signal arrives.
pub async fn serve(mut config: Config) -> Result<()> {
    let listen = config.listen.clone();
    let port = match config.port {
        0 => first_open_port(&listen, &[22, 2222]).await?,
        port => port,
    };

    let trust_dir = PathBuf::from(TRUST_DIR);
    ensure_trust_dir(&trust_dir)?;
    let host_key = keygen::ensure_key_pair(&trust_dir.join("server_ed25519"), "wishlist-server")?;

    let endpoints_shared = Arc::new(RwLock::new(config.endpoints.clone()));
    let (updates_tx, _) = broadcast::channel::<Vec<Endpoint>>(16);
    let shutdown = CancellationToken::new();

    if let Some(mut channel) = config.endpoint_channel.take() {
        let endpoints_shared = Arc::clone(&endpoints_shared);
        let updates_tx = updates_tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    replacement = channel.recv() => match replacement {
                        Some(endpoints) => {
                            *endpoints_shared.write().await = endpoints.clone();
                            // no receivers is fine; sessions join later
                            let _ = updates_tx.send(endpoints);
                        }
                        None => return,
                    },
                }
            }
        });
    }

    let factory: Arc<dyn ServerFactory> = match config.factory.clone() {
        Some(factory) => factory,
        None => Arc::new(DefaultFactory::new(host_key)),
    };

    let listing_endpoint = Endpoint {
        name: "list".to_string(),
        address: to_address(&listen, port),
        middlewares: MiddlewareChain(vec![
            Arc::new(ListingMiddleware),
            Arc::new(CommandMiddleware),
        ]),
        ..Default::default()
    };

    let last_port = AtomicU16::new(port);
    let mut servers = Vec::new();

    let mut to_serve = vec![listing_endpoint];
    to_serve.extend(config.endpoints.iter().cloned());

    for mut endpoint in to_serve {
        if !endpoint.is_valid() || !endpoint.should_listen() {
            continue;
        }
        if endpoint.address.is_empty() {
            endpoint.address = to_address(&listen, last_port.fetch_add(1, Ordering::SeqCst) + 1);
        }

        let started = start_endpoint(
            &endpoint,
            factory.as_ref(),
            &config.users,
            &trust_dir,
            &endpoints_shared,
            &updates_tx,
            &shutdown,
        )
        .await;

        match started {
            Ok(handle) => servers.push((endpoint.name.clone(), handle)),
            Err(err) => {
                shutdown.cancel();
                let _ = drain(servers).await;
                return Err(err);
            }
        }
    }

    wait_for_shutdown_signal().await?;
    tracing::info!("stopping SSH servers");
    shutdown.cancel();
    drain(servers).await
}

async fn start_endpoint(
    endpoint: &Endpoint,
    factory: &dyn ServerFactory,
    users: &[User],
    trust_dir: &std::path::Path,
    endpoints_shared: &Arc<RwLock<Vec<Endpoint>>>,
    updates_tx: &broadcast::Sender<Vec<Endpoint>>,
    shutdown: &CancellationToken,
) -> Result<tokio::task::JoinHandle<Result<()>>> {
    let server = factory.create(endpoint)?;

    let listener = TcpListener::bind(&endpoint.address)
        .await
        .with_context(|| format!("failed to listen on {}", endpoint.address))?;

    tracing::info!(
        endpoint = %endpoint.name,
        address = %format!("ssh://{}", endpoint.address),
        "starting SSH server"
    );

    let shared = Arc::new(Shared {
        endpoint: endpoint.clone(),
        users: users.to_vec(),
        trust_dir: trust_dir.to_path_buf(),
        endpoints: Arc::clone(endpoints_shared),
        updates: updates_tx.clone(),
        shutdown: shutdown.clone(),
    });

    let token = shutdown.clone();
    let russh_config = server.russh_config;
    Ok(tokio::spawn(async move {
        let mut runner = Runner { shared };
        tokio::select! {
            _ = token.cancelled() => Ok(()),
            result = russh::server::Server::run_on_socket(&mut runner, russh_config, &listener) => {
                result.map_err(|err| anyhow::anyhow!("SSH server error: {err}"))
            }
        }
    }))
}

/// Joins every server task with the shutdown deadline, aggregating failures.
/// Closed-server errors do not count.
async fn drain(servers: Vec<(String, tokio::task::JoinHandle<Result<()>>)>) -> Result<()> {
    let mut failures = Vec::new();
    for (name, handle) in servers {
        match tokio::time::timeout(SHUTDOWN_DEADLINE, handle).await {
            Err(_) => failures.push(format!("{name}: shutdown deadline exceeded")),
            Ok(Err(join_err)) if !join_err.is_cancelled() => {
                failures.push(format!("{name}: {join_err}"));
            }
            Ok(Err(_)) => {}
            Ok(Ok(Err(err))) => {
                if !err.to_string().to_lowercase().contains("closed") {
                    failures.push(format!("{name}: {err}"));
                }
            }
            Ok(Ok(Ok(()))) => {}
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{}", failures.join("; "))
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sighup = signal(SignalKind::hangup()).context("failed to register SIGHUP")?;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.context("failed to wait for SIGINT")?,
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")
}

/// Picks the first port that binds on the listen address.
pub async fn first_open_port(listen: &str, ports: &[u16]) -> Result<u16> {
    for &port in ports {
        if let Ok(listener) = TcpListener::bind(to_address(listen, port)).await {
            drop(listener);
            return Ok(port);
        }
    }
    anyhow::bail!("all ports unavailable: {ports:?}")
}

/// `listen:port`, defaulting an empty listen address to all interfaces.
pub fn to_address(listen: &str, port: u16) -> String {
    let host = if listen.is_empty() { "0.0.0.0" } else { listen };
    crate::config::join_host_port(host, &port.to_string())
}

fn ensure_trust_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to chmod {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_address() {
        assert_eq!(to_address("", 22), "0.0.0.0:22");
        assert_eq!(to_address("127.0.0.1", 2222), "127.0.0.1:2222");
        assert_eq!(to_address("::1", 22), "[::1]:22");
    }

    #[tokio::test]
    async fn test_first_open_port_skips_used() {
        // occupy one port, leave the next candidates free
        let used = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let used_port = used.local_addr().unwrap().port();

        let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let free_port = free.local_addr().unwrap().port();
        drop(free);

        let picked = first_open_port("127.0.0.1", &[used_port, free_port])
            .await
            .unwrap();
        assert_eq!(picked, free_port);
    }

    #[tokio::test]
    async fn test_first_open_port_all_unavailable() {
        let a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ports = [a.local_addr().unwrap().port(), b.local_addr().unwrap().port()];

        let err = first_open_port("127.0.0.1", &ports).await.unwrap_err();
        assert!(err.to_string().contains("all ports unavailable"));
    }

    #[tokio::test]
    async fn test_ensure_trust_dir_mode() {
        let dir = tempfile::tempdir().unwrap();
        let trust = dir.path().join(".wishlist");
        ensure_trust_dir(&trust).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&trust).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
