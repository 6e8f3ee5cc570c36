//! Server role of the protocol: turns client records into registry and
//! session operations and builds the replies.

use std::net::SocketAddr;
use std::sync::Arc;

use num_bigint::BigUint;
use tracing::{info, warn};

use crate::error::{RegistryError, SessionError};
use crate::fiat_shamir::Modulus;
use crate::message::{ClientMessage, ServerMessage, UserSummary};
use crate::registry::UserRegistry;
use crate::session::{IssuedChallenge, RoundOutcome, SessionStore, SessionTicket};

#[derive(Debug)]
pub struct AuthService {
    modulus: Modulus,
    registry: Arc<UserRegistry>,
    sessions: SessionStore,
}

impl AuthService {
    pub fn new(modulus: Modulus, registry: Arc<UserRegistry>, sessions: SessionStore) -> Self {
        Self {
            modulus,
            registry,
            sessions,
        }
    }

    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// First record sent on every connection.
    pub fn server_params(&self) -> ServerMessage {
        ServerMessage::ServerParams {
            n: self.modulus.value().clone(),
            total_rounds: self.sessions.total_rounds(),
        }
    }

    pub fn register(&self, username: &str, v: BigUint) -> Result<(), RegistryError> {
        self.registry.register(username, v)
    }

    pub fn start_auth(&self, peer: SocketAddr, username: &str) -> Result<SessionTicket, SessionError> {
        let record = self
            .registry
            .lookup(username)
            .map_err(|_| SessionError::UnknownUser(username.to_string()))?;
        if let Err(err) = self.registry.record_attempt(username) {
            warn!(username, error = %err, "could not record login attempt");
        }
        Ok(self.sessions.create(peer, username, record.v))
    }

    pub fn receive_commitment(
        &self,
        peer: SocketAddr,
        session_id: &str,
        x: BigUint,
    ) -> Result<IssuedChallenge, SessionError> {
        self.sessions.commit(peer, session_id, x)
    }

    /// Verifies a response; a fully successful session bumps the user's
    /// login counter.
    pub fn receive_response(
        &self,
        peer: SocketAddr,
        session_id: &str,
        y: BigUint,
    ) -> Result<RoundOutcome, SessionError> {
        let outcome = self.sessions.respond(peer, session_id, y)?;
        if let RoundOutcome::Completed {
            username,
            success: true,
            ..
        } = &outcome
        {
            info!(username = %username, "authentication succeeded");
            if let Err(err) = self.registry.record_success(username) {
                warn!(username = %username, error = %err, "could not record successful login");
            }
        }
        Ok(outcome)
    }

    pub fn list_users(&self) -> Vec<UserSummary> {
        self.registry
            .list()
            .into_iter()
            .map(|(username, record)| UserSummary {
                username,
                v: record.v,
                logins: record.successful_logins,
            })
            .collect()
    }

    pub fn sweep_expired(&self) -> usize {
        self.sessions.sweep_expired()
    }

    pub fn end_connection(&self, peer: SocketAddr) -> usize {
        self.sessions.purge_peer(peer)
    }

    /// Maps one client record to its reply. `None` means the peer asked to
    /// disconnect.
    pub fn handle(&self, peer: SocketAddr, request: ClientMessage) -> Option<ServerMessage> {
        let reply = match request {
            ClientMessage::Register { username, v } => match self.register(&username, v) {
                Ok(()) => ServerMessage::RegisterResponse {
                    success: true,
                    message: format!("user {username} registered"),
                },
                Err(err) => {
                    info!(%peer, username = %username, error = %err, "registration refused");
                    ServerMessage::RegisterResponse {
                        success: false,
                        message: err.to_string(),
                    }
                }
            },
            ClientMessage::StartAuth { username } => match self.start_auth(peer, &username) {
                Ok(ticket) => ServerMessage::AuthStarted {
                    success: true,
                    session_id: ticket.session_id,
                    v: ticket.v,
                    total_rounds: ticket.total_rounds,
                },
                Err(err) => ServerMessage::AuthResponse {
                    success: false,
                    message: err.to_string(),
                },
            },
            ClientMessage::SendX { session_id, x } => match self.receive_commitment(peer, &session_id, x) {
                Ok(challenge) => ServerMessage::Challenge {
                    e: u8::from(challenge.e).into(),
                    round: challenge.round,
                    session_id,
                },
                Err(err) => ServerMessage::error(err.to_string()),
            },
            ClientMessage::SendY { session_id, y } => match self.receive_response(peer, &session_id, y) {
                Ok(outcome) => round_reply(session_id, outcome),
                Err(err) => ServerMessage::error(err.to_string()),
            },
            ClientMessage::ListUsers => ServerMessage::UsersList {
                users: self.list_users(),
            },
            ClientMessage::Disconnect => return None,
        };
        Some(reply)
    }
}

fn round_reply(session_id: String, outcome: RoundOutcome) -> ServerMessage {
    match outcome {
        RoundOutcome::Continue {
            current_round,
            successful_rounds,
        } => ServerMessage::RoundResult {
            success: true,
            message: format!("round {current_round} passed"),
            current_round,
            successful_rounds,
            session_id,
        },
        RoundOutcome::Completed {
            success,
            current_round,
            successful_rounds,
            total_rounds,
            ..
        } => ServerMessage::AuthResult {
            success,
            message: "authentication complete".to_string(),
            current_round,
            successful_rounds,
            total_rounds,
        },
        RoundOutcome::Rejected {
            reason,
            current_round,
            successful_rounds,
            total_rounds,
        } => ServerMessage::AuthResult {
            success: false,
            message: format!("round {current_round} failed: {reason}"),
            current_round,
            successful_rounds,
            total_rounds,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiat_shamir::{KeyMaterial, Prover};
    use crate::session::DEFAULT_SESSION_TTL;
    use tempfile::{TempDir, tempdir};

    fn service(rounds: u32) -> (AuthService, TempDir) {
        let dir = tempdir().unwrap();
        let m = Modulus::from_primes(&BigUint::from(1_000_000_007u64), &BigUint::from(998_244_353u64))
            .unwrap();
        let registry = Arc::new(UserRegistry::open(dir.path().join("users.json"), m.clone()));
        let sessions = SessionStore::new(m.clone(), rounds, DEFAULT_SESSION_TTL);
        (AuthService::new(m, registry, sessions), dir)
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 4000))
    }

    #[test]
    fn unknown_user_cannot_start() {
        let (svc, _dir) = service(3);
        let reply = svc.handle(peer(), ClientMessage::StartAuth { username: "ghost".into() });
        assert!(matches!(reply, Some(ServerMessage::AuthResponse { success: false, .. })));
    }

    #[test]
    fn successful_authentication_bumps_login_counter() {
        let (svc, _dir) = service(4);
        let prover = Prover::new(KeyMaterial::generate("alice", svc.modulus()));
        svc.register("alice", prover.key().v.clone()).unwrap();

        let ticket = svc.start_auth(peer(), "alice").unwrap();
        let mut last = None;
        for _ in 0..4 {
            let (nonce, x) = prover.commit();
            let challenge = svc.receive_commitment(peer(), &ticket.session_id, x).unwrap();
            last = Some(svc.receive_response(peer(), &ticket.session_id, prover.respond(&nonce, challenge.e)).unwrap());
        }
        assert!(matches!(last, Some(RoundOutcome::Completed { success: true, .. })));

        let record = svc.registry().lookup("alice").unwrap();
        assert_eq!(record.successful_logins, 1);
        assert_eq!(record.login_attempts, 1);
        assert_eq!(svc.list_users()[0].logins, 1);
    }

    #[test]
    fn degenerate_proof_never_counts_as_login() {
        let (svc, _dir) = service(1);
        let prover = Prover::new(KeyMaterial::generate("alice", svc.modulus()));
        svc.register("alice", prover.key().v.clone()).unwrap();
        let ticket = svc.start_auth(peer(), "alice").unwrap();
        let (_, x) = prover.commit();
        svc.receive_commitment(peer(), &ticket.session_id, x).unwrap();

        let reply = svc.handle(
            peer(),
            ClientMessage::SendY {
                session_id: ticket.session_id,
                y: BigUint::from(0u32),
            },
        );
        assert!(matches!(
            reply,
            Some(ServerMessage::AuthResult { success: false, current_round: 1, successful_rounds: 0, .. })
        ));
        assert_eq!(svc.registry().lookup("alice").unwrap().successful_logins, 0);
    }

    #[test]
    fn challenge_reply_carries_round_and_bit() {
        let (svc, _dir) = service(3);
        let prover = Prover::new(KeyMaterial::generate("alice", svc.modulus()));
        svc.register("alice", prover.key().v.clone()).unwrap();
        let ticket = svc.start_auth(peer(), "alice").unwrap();
        let (_, x) = prover.commit();

        let reply = svc.handle(
            peer(),
            ClientMessage::SendX {
                session_id: ticket.session_id.clone(),
                x,
            },
        );
        match reply {
            Some(ServerMessage::Challenge { e, round, session_id }) => {
                assert!(matches!(e.as_u64(), Some(0 | 1)));
                assert_eq!(round, 1);
                assert_eq!(session_id, ticket.session_id);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn disconnect_has_no_reply() {
        let (svc, _dir) = service(3);
        assert!(svc.handle(peer(), ClientMessage::Disconnect).is_none());
    }
}
