//! Fiat–Shamir identification over TCP.
//!
//! A prover holding `s` with public value `v = s^2 mod N` convinces the
//! server it knows `s` through repeated commit / challenge / respond rounds.
//! Each round is passable without `s` with probability 1/2, so a session is
//! accepted only when every round verifies.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fiat_shamir;
pub mod keystore;
pub mod message;
pub mod prover;
pub mod registry;
pub mod session;
pub mod verifier;

pub use channel::MessageChannel;
pub use config::{ClientConfig, ServerConfig};
pub use dispatcher::AuthServer;
pub use error::{ChannelError, ClientError, ConfigError, ParamError, RegistryError, SessionError};
pub use fiat_shamir::{ChallengeBit, KeyMaterial, Modulus, Prover};
pub use keystore::KeyStore;
pub use message::{ClientMessage, ServerMessage, UserSummary};
pub use prover::{AuthClient, AuthOutcome, RegisterOutcome};
pub use registry::{UserRecord, UserRegistry};
pub use session::{RoundOutcome, SessionStore};
pub use verifier::AuthService;
