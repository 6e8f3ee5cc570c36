//! Records exchanged over the channel, tagged by their `action` field.
//!
//! Big integers travel as decimal strings: JSON numbers cannot hold them
//! without loss.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Register {
        username: String,
        #[serde(with = "decimal")]
        v: BigUint,
    },
    StartAuth {
        username: String,
    },
    SendX {
        session_id: String,
        #[serde(with = "decimal")]
        x: BigUint,
    },
    SendY {
        session_id: String,
        #[serde(with = "decimal")]
        y: BigUint,
    },
    ListUsers,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    ServerParams {
        #[serde(rename = "N", with = "decimal")]
        n: BigUint,
        total_rounds: u32,
    },
    RegisterResponse {
        success: bool,
        message: String,
    },
    AuthStarted {
        success: bool,
        session_id: String,
        #[serde(with = "decimal")]
        v: BigUint,
        total_rounds: u32,
    },
    AuthResponse {
        success: bool,
        message: String,
    },
    /// `e` is kept loose so a malformed bit reaches the client as a
    /// protocol violation instead of a decode failure.
    Challenge {
        e: serde_json::Value,
        round: u32,
        session_id: String,
    },
    RoundResult {
        success: bool,
        message: String,
        current_round: u32,
        successful_rounds: u32,
        session_id: String,
    },
    AuthResult {
        success: bool,
        message: String,
        current_round: u32,
        successful_rounds: u32,
        total_rounds: u32,
    },
    UsersList {
        users: Vec<UserSummary>,
    },
    Error {
        message: String,
    },
}

impl ClientMessage {
    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::StartAuth { .. } => "start_auth",
            ClientMessage::SendX { .. } => "send_x",
            ClientMessage::SendY { .. } => "send_y",
            ClientMessage::ListUsers => "list_users",
            ClientMessage::Disconnect => "disconnect",
        }
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    #[serde(with = "decimal")]
    pub v: BigUint,
    pub logins: u64,
}

/// Serde adapter storing a `BigUint` as a base-10 string.
pub mod decimal {
    use num_bigint::BigUint;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(deserializer)?;
        BigUint::parse_bytes(text.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid decimal integer {text:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_action_tag() {
        let msg = ClientMessage::SendX {
            session_id: "s-1".into(),
            x: BigUint::from(12345678901234567890u64) * BigUint::from(1000u32),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"action": "send_x", "session_id": "s-1", "x": "12345678901234567890000"})
        );

        let parsed: ClientMessage = serde_json::from_value(json!({"action": "list_users"})).unwrap();
        assert_eq!(parsed, ClientMessage::ListUsers);
    }

    #[test]
    fn server_params_uses_uppercase_modulus_field() {
        let msg = ServerMessage::ServerParams {
            n: BigUint::from(77u32),
            total_rounds: 20,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"action": "server_params", "N": "77", "total_rounds": 20}));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = serde_json::from_value::<ClientMessage>(json!({"action": "steal_keys"}));
        assert!(err.is_err());
    }

    #[test]
    fn non_decimal_integer_is_rejected() {
        let err = serde_json::from_value::<ClientMessage>(
            json!({"action": "send_y", "session_id": "s", "y": "0x10"}),
        );
        assert!(err.is_err());
    }
}
