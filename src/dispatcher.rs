use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::config::ServerConfig;
use crate::error::ChannelError;
use crate::fiat_shamir::Modulus;
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::UserRegistry;
use crate::session::SessionStore;
use crate::verifier::AuthService;

/// Accept loop plus one task per connection. Holds nothing but the listener
/// and a handle to the shared service.
#[derive(Debug)]
pub struct AuthServer {
    listener: TcpListener,
    service: Arc<AuthService>,
    accept_timeout: Duration,
    read_timeout: Duration,
    max_frame_len: usize,
}

impl AuthServer {
    pub async fn bind(config: &ServerConfig, modulus: Modulus) -> io::Result<Self> {
        let registry = Arc::new(UserRegistry::open(&config.users_file, modulus.clone()));
        let sessions = SessionStore::new(modulus.clone(), config.total_rounds, config.session_ttl);
        let service = Arc::new(AuthService::new(modulus, registry, sessions));

        let listener = TcpListener::bind(config.bind_address).await?;
        Ok(Self {
            listener,
            service,
            accept_timeout: config.accept_timeout,
            read_timeout: config.read_timeout,
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn service(&self) -> Arc<AuthService> {
        Arc::clone(&self.service)
    }

    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Expired sessions are swept after
    /// every accept and every accept timeout.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(addr = ?self.listener.local_addr().ok(), "accepting connections");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down accept loop");
                    break;
                }
                accepted = tokio::time::timeout(self.accept_timeout, self.listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, peer))) => self.spawn_handler(stream, peer),
                        Ok(Err(err)) => warn!(error = %err, "accept failed"),
                        Err(_) => {}
                    }
                    let swept = self.service.sweep_expired();
                    if swept > 0 {
                        debug!(swept, "expired sessions swept");
                    }
                }
            }
        }
    }

    fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) {
        let service = Arc::clone(&self.service);
        let channel = MessageChannel::new(stream)
            .with_timeout(self.read_timeout)
            .with_max_frame_len(self.max_frame_len);
        tokio::spawn(handle_connection(service, channel, peer));
    }
}

/// Drives one connection to completion and drops the sessions it opened.
pub async fn handle_connection<S>(service: Arc<AuthService>, mut channel: MessageChannel<S>, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(%peer, "client connected");
    match serve(&service, &mut channel, peer).await {
        Ok(()) => info!(%peer, "client disconnected"),
        Err(ChannelError::PeerClosed) => info!(%peer, "connection closed by client"),
        Err(ChannelError::Timeout) => warn!(%peer, "client timed out"),
        Err(err) => warn!(%peer, error = %err, "connection aborted"),
    }
    service.end_connection(peer);
}

async fn serve<S>(service: &AuthService, channel: &mut MessageChannel<S>, peer: SocketAddr) -> Result<(), ChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    channel.send(&service.server_params()).await?;

    loop {
        let request = match channel.receive::<ClientMessage>().await {
            Ok(request) => request,
            Err(ChannelError::Decode(err)) => {
                warn!(%peer, error = %err, "malformed request");
                channel
                    .send(&ServerMessage::error(format!("malformed request: {err}")))
                    .await?;
                continue;
            }
            Err(err) => return Err(err),
        };

        debug!(%peer, action = request.action(), "request received");
        match service.handle(peer, request) {
            Some(reply) => channel.send(&reply).await?,
            None => return Ok(()),
        }
    }
}
