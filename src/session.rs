//! In-memory authentication sessions and the per-round verifier state
//! machine.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use num_traits::Zero;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;
use crate::fiat_shamir::{ChallengeBit, Modulus, random_challenge, verify_round};

pub const DEFAULT_TOTAL_ROUNDS: u32 = 20;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingCommitment,
    AwaitingResponse { x: BigUint, e: ChallengeBit },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub peer: SocketAddr,
    pub v: BigUint,
    /// Rounds verified so far.
    pub current_round: u32,
    pub successful_rounds: u32,
    pub total_rounds: u32,
    pub phase: SessionPhase,
    pub created_at: Instant,
}

impl Session {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub session_id: String,
    pub v: BigUint,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub e: ChallengeBit,
    /// 1-based number of the round being played.
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Mismatch,
    DegenerateProof,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Mismatch => write!(f, "verification failed"),
            RejectReason::DegenerateProof => write!(f, "degenerate proof: y = 0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Round passed, more rounds follow.
    Continue {
        current_round: u32,
        successful_rounds: u32,
    },
    /// Last round passed; the session is gone.
    Completed {
        username: String,
        success: bool,
        current_round: u32,
        successful_rounds: u32,
        total_rounds: u32,
    },
    /// Round failed; the session is gone. `current_round` is the round that
    /// failed.
    Rejected {
        reason: RejectReason,
        current_round: u32,
        successful_rounds: u32,
        total_rounds: u32,
    },
}

#[derive(Debug)]
pub struct SessionStore {
    modulus: Modulus,
    total_rounds: u32,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(modulus: Modulus, total_rounds: u32, ttl: Duration) -> Self {
        Self {
            modulus,
            total_rounds,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Opens a session for `username` with a snapshot of its public value.
    pub fn create(&self, peer: SocketAddr, username: &str, v: BigUint) -> SessionTicket {
        let session_id = format!("{}:{}:{}", peer, username, Uuid::new_v4().simple());
        let session = Session {
            username: username.to_string(),
            peer,
            v: v.clone(),
            current_round: 0,
            successful_rounds: 0,
            total_rounds: self.total_rounds,
            phase: SessionPhase::AwaitingCommitment,
            created_at: Instant::now(),
        };
        self.lock().insert(session_id.clone(), session);
        info!(session_id = %session_id, username, "session created");

        SessionTicket {
            session_id,
            v,
            total_rounds: self.total_rounds,
        }
    }

    /// Stores the commitment `x` and draws the challenge bit for it. Only the
    /// connection that opened the session may drive it.
    pub fn commit(&self, peer: SocketAddr, session_id: &str, x: BigUint) -> Result<IssuedChallenge, SessionError> {
        let mut sessions = self.lock();
        let session = live_session(&mut sessions, peer, session_id, self.ttl)?;

        if !self.modulus.contains_residue(&x) {
            return Err(SessionError::InvalidRange { field: "x" });
        }
        if matches!(session.phase, SessionPhase::AwaitingResponse { .. }) {
            sessions.remove(session_id);
            info!(session_id, "second commitment in one round, session dropped");
            return Err(SessionError::OutOfOrder("commitment"));
        }

        let e = random_challenge();
        session.phase = SessionPhase::AwaitingResponse { x, e };
        let round = session.current_round + 1;
        debug!(session_id, round, e = %e, "challenge issued");
        Ok(IssuedChallenge { e, round })
    }

    /// Verifies `y` against the outstanding challenge.
    pub fn respond(&self, peer: SocketAddr, session_id: &str, y: BigUint) -> Result<RoundOutcome, SessionError> {
        let mut sessions = self.lock();
        let session = live_session(&mut sessions, peer, session_id, self.ttl)?;

        let (x, e) = match &session.phase {
            SessionPhase::AwaitingResponse { x, e } => (x.clone(), *e),
            SessionPhase::AwaitingCommitment => {
                sessions.remove(session_id);
                return Err(SessionError::OutOfOrder("response"));
            }
        };
        if &y >= self.modulus.value() {
            return Err(SessionError::InvalidRange { field: "y" });
        }

        let attempted = session.current_round + 1;
        let reason = if y.is_zero() {
            Some(RejectReason::DegenerateProof)
        } else if !verify_round(self.modulus.value(), &session.v, &x, e, &y) {
            Some(RejectReason::Mismatch)
        } else {
            None
        };

        if let Some(reason) = reason {
            let outcome = RoundOutcome::Rejected {
                reason,
                current_round: attempted,
                successful_rounds: session.successful_rounds,
                total_rounds: session.total_rounds,
            };
            info!(session_id, round = attempted, %reason, "round rejected, session dropped");
            sessions.remove(session_id);
            return Ok(outcome);
        }

        session.current_round = attempted;
        session.successful_rounds += 1;

        if session.current_round < session.total_rounds {
            session.phase = SessionPhase::AwaitingCommitment;
            debug!(session_id, round = attempted, "round passed");
            return Ok(RoundOutcome::Continue {
                current_round: session.current_round,
                successful_rounds: session.successful_rounds,
            });
        }

        let outcome = RoundOutcome::Completed {
            username: session.username.clone(),
            success: session.successful_rounds == session.total_rounds,
            current_round: session.current_round,
            successful_rounds: session.successful_rounds,
            total_rounds: session.total_rounds,
        };
        sessions.remove(session_id);
        info!(session_id, "all rounds verified, session closed");
        Ok(outcome)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops sessions older than the configured age. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = !session.is_expired(ttl);
            if !keep {
                info!(session_id = %id, "expired session removed");
            }
            keep
        });
        before - sessions.len()
    }

    /// Drops every session opened from `peer`.
    pub fn purge_peer(&self, peer: SocketAddr) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.peer != peer);
        let removed = before - sessions.len();
        if removed > 0 {
            info!(%peer, removed, "sessions of closed connection removed");
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// Expired sessions are removed on access and reported as missing. A session
// presented by any peer other than its owner is reported as missing too.
fn live_session<'a>(
    sessions: &'a mut HashMap<String, Session>,
    peer: SocketAddr,
    session_id: &str,
    ttl: Duration,
) -> Result<&'a mut Session, SessionError> {
    let expired = match sessions.get(session_id) {
        Some(session) if session.peer == peer => session.is_expired(ttl),
        _ => return Err(SessionError::SessionNotFound),
    };
    if expired {
        sessions.remove(session_id);
        return Err(SessionError::SessionNotFound);
    }
    sessions.get_mut(session_id).ok_or(SessionError::SessionNotFound)
}
