//! Client role: registration and the per-round proof loop.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fiat_shamir::{ChallengeBit, KeyMaterial, Modulus, Prover, fingerprint};
use crate::keystore::KeyStore;
use crate::message::{ClientMessage, ServerMessage, UserSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
    pub current_round: u32,
    pub successful_rounds: u32,
    pub total_rounds: u32,
    /// The saved key was re-derived for the server's modulus and re-saved.
    pub reconciled: bool,
}

#[derive(Debug)]
pub struct AuthClient {
    channel: MessageChannel<TcpStream>,
    modulus: Modulus,
    total_rounds: u32,
    keys: KeyStore,
}

impl AuthClient {
    /// Connects and reads the server's `server_params` greeting.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let addr = config.server_address.clone();
        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
            Err(_) => return Err(ClientError::ConnectTimeout(addr)),
        };
        let mut channel = MessageChannel::new(stream).with_timeout(config.response_timeout);

        let (modulus, total_rounds) = match channel.receive().await? {
            ServerMessage::ServerParams { n, total_rounds } => (Modulus::from_public(n)?, total_rounds),
            other => return Err(ClientError::unexpected("server_params", &other)),
        };
        info!(
            server = %addr,
            modulus_bits = modulus.bits(),
            fingerprint = %modulus.fingerprint(),
            total_rounds,
            "connected"
        );

        Ok(Self {
            channel,
            modulus,
            total_rounds,
            keys: KeyStore::new(&config.keys_file),
        })
    }

    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Generates a fresh key, saves it locally, then registers `v`. A refused
    /// registration restores whatever key was saved before.
    pub async fn register(&mut self, username: &str) -> Result<RegisterOutcome, ClientError> {
        let previous = self.keys.get(username);
        let key = KeyMaterial::generate(username, &self.modulus);
        self.keys.save(&key)?;

        self.channel
            .send(&ClientMessage::Register {
                username: username.to_string(),
                v: key.v.clone(),
            })
            .await?;

        let (success, message) = match self.channel.receive().await? {
            ServerMessage::RegisterResponse { success, message } => (success, message),
            ServerMessage::Error { message } => (false, message),
            other => return Err(ClientError::unexpected("register_response", &other)),
        };

        if !success {
            match previous {
                Some(previous) => self.keys.save(&previous)?,
                None => self.keys.remove(username)?,
            }
        }
        info!(username, success, %message, "registration finished");
        Ok(RegisterOutcome { success, message })
    }

    /// Runs the full challenge-response exchange for `username`.
    pub async fn authenticate(&mut self, username: &str) -> Result<AuthOutcome, ClientError> {
        let stored = self
            .keys
            .get(username)
            .ok_or_else(|| ClientError::MissingKey(username.to_string()))?;
        let (key, reconciled) = self.reconcile(stored)?;

        self.channel
            .send(&ClientMessage::StartAuth {
                username: username.to_string(),
            })
            .await?;

        let (session_id, total_rounds) = match self.channel.receive().await? {
            ServerMessage::AuthStarted {
                success: true,
                session_id,
                v,
                total_rounds,
            } => {
                if v != key.v {
                    warn!(username, "server public value differs from the saved key");
                }
                (session_id, total_rounds)
            }
            ServerMessage::AuthStarted { success: false, .. } => {
                return Err(ClientError::Rejected("authentication refused".to_string()));
            }
            ServerMessage::AuthResponse { message, .. } | ServerMessage::Error { message } => {
                return Err(ClientError::Rejected(message));
            }
            other => return Err(ClientError::unexpected("auth_started", &other)),
        };

        let prover = Prover::new(key);
        for round in 1..=total_rounds {
            let (nonce, x) = prover.commit();
            self.channel
                .send(&ClientMessage::SendX {
                    session_id: session_id.clone(),
                    x,
                })
                .await?;

            let e = match self.channel.receive().await? {
                ServerMessage::Challenge { e, .. } => e
                    .as_u64()
                    .and_then(|bit| ChallengeBit::try_from(bit).ok())
                    .ok_or_else(|| ClientError::ProtocolViolation(format!("challenge bit {e}")))?,
                ServerMessage::Error { message } => return Err(ClientError::Rejected(message)),
                other => return Err(ClientError::unexpected("challenge", &other)),
            };

            self.channel
                .send(&ClientMessage::SendY {
                    session_id: session_id.clone(),
                    y: prover.respond(&nonce, e),
                })
                .await?;

            match self.channel.receive().await? {
                ServerMessage::RoundResult {
                    success: true,
                    successful_rounds,
                    ..
                } => {
                    debug!(round, successful_rounds, total_rounds, "round passed");
                }
                ServerMessage::RoundResult {
                    success: false,
                    message,
                    current_round,
                    successful_rounds,
                    ..
                } => {
                    return Ok(AuthOutcome {
                        success: false,
                        message,
                        current_round,
                        successful_rounds,
                        total_rounds,
                        reconciled,
                    });
                }
                ServerMessage::AuthResult {
                    success,
                    message,
                    current_round,
                    successful_rounds,
                    total_rounds,
                } => {
                    info!(username, success, successful_rounds, total_rounds, "authentication finished");
                    return Ok(AuthOutcome {
                        success,
                        message,
                        current_round,
                        successful_rounds,
                        total_rounds,
                        reconciled,
                    });
                }
                ServerMessage::Error { message } => return Err(ClientError::Rejected(message)),
                other => return Err(ClientError::unexpected("round_result", &other)),
            }
        }

        Err(ClientError::ProtocolViolation(format!(
            "no final result after {total_rounds} rounds"
        )))
    }

    pub async fn list_users(&mut self) -> Result<Vec<UserSummary>, ClientError> {
        self.channel.send(&ClientMessage::ListUsers).await?;
        match self.channel.receive().await? {
            ServerMessage::UsersList { users } => Ok(users),
            other => Err(ClientError::unexpected("users_list", &other)),
        }
    }

    /// Says goodbye and closes the socket. Send failures are ignored since
    /// the connection is going away anyway.
    pub async fn disconnect(mut self) {
        if let Err(err) = self.channel.send(&ClientMessage::Disconnect).await {
            debug!(error = %err, "disconnect notice not delivered");
        }
        let mut stream = self.channel.into_inner();
        let _ = stream.shutdown().await;
    }

    // A key saved under another modulus is re-derived for the current one and
    // written back.
    fn reconcile(&self, stored: KeyMaterial) -> Result<(KeyMaterial, bool), ClientError> {
        if &stored.n == self.modulus.value() {
            return Ok((stored, false));
        }
        let rebound = stored.rebind(&self.modulus).ok_or_else(|| ClientError::IncompatibleKey {
            username: stored.username.clone(),
        })?;
        self.keys.save(&rebound)?;
        warn!(
            username = %rebound.username,
            saved_modulus = %fingerprint(&stored.n),
            server_modulus = %self.modulus.fingerprint(),
            "saved key was bound to another modulus, public value recomputed"
        );
        Ok((rebound, true))
    }
}
