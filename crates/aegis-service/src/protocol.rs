//! Wire protocol for the host-local service channel.
//!
//! Each message is one JSON object on a single line.  A client writes a
//! [`ServiceRequest`] and reads back exactly one [`ServiceResponse`]; a
//! connection may carry any number of such exchanges.
//!
//! ```text
//! -> {"command":"unlock_for_development","parameters":{"minutes":5}}
//! <- {"success":false,"value":null,"status":"forbidden","statusCode":403,"errorMessage":"dev unlock is disabled"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest request line the server accepts, in bytes.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A command sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    /// Command name; see [`Command::parse`] for the accepted spellings.
    pub command: String,
    /// Named parameters.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl ServiceRequest {
    /// Create a request with no parameters.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Map::new(),
        }
    }

    /// Add a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Look up a parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).filter(|v| !v.is_null())
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Every command the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    GetDeviceInfo,
    HasMnemonic,
    GetMnemonic,
    SetMnemonic,
    DeleteMnemonic,
    UnlockForDevelopment,
    Lock,
    GetLockStatus,
    GetRecentLogs,
}

impl Command {
    /// All commands, in protocol order.
    pub const ALL: [Command; 10] = [
        Command::Ping,
        Command::GetDeviceInfo,
        Command::HasMnemonic,
        Command::GetMnemonic,
        Command::SetMnemonic,
        Command::DeleteMnemonic,
        Command::UnlockForDevelopment,
        Command::Lock,
        Command::GetLockStatus,
        Command::GetRecentLogs,
    ];

    /// Parse a command name.
    ///
    /// Matching ignores case, `_` and `-`, so `get_mnemonic`, `GetMnemonic`
    /// and `getmnemonic` are the same command.  `unlockdev` is accepted as a
    /// short form of `unlock_for_development`.
    pub fn parse(name: &str) -> Option<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "unlockdev" => Some(Self::UnlockForDevelopment),
            _ => Self::ALL
                .into_iter()
                .find(|cmd| cmd.name().replace('_', "") == key),
        }
    }

    /// Canonical snake_case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::GetDeviceInfo => "get_device_info",
            Self::HasMnemonic => "has_mnemonic",
            Self::GetMnemonic => "get_mnemonic",
            Self::SetMnemonic => "set_mnemonic",
            Self::DeleteMnemonic => "delete_mnemonic",
            Self::UnlockForDevelopment => "unlock_for_development",
            Self::Lock => "lock",
            Self::GetLockStatus => "get_lock_status",
            Self::GetRecentLogs => "get_recent_logs",
        }
    }

    /// Whether the command can release or destroy the secret and must pass
    /// the governance gate.
    pub fn requires_unlock(self) -> bool {
        matches!(self, Self::GetMnemonic | Self::DeleteMnemonic)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Outcome classification carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    Locked,
    InternalError,
}

impl Status {
    /// HTTP-style numeric code.
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Locked => 423,
            Self::InternalError => 500,
        }
    }
}

/// The reply to one [`ServiceRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub success: bool,
    pub value: Option<Value>,
    pub status: Status,
    pub status_code: u16,
    pub error_message: Option<String>,
}

impl ServiceResponse {
    /// A successful response carrying `value`.
    pub fn ok(value: Value) -> Self {
        Self {
            success: true,
            value: Some(value),
            status: Status::Ok,
            status_code: Status::Ok.code(),
            error_message: None,
        }
    }

    /// A failed response.
    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            status,
            status_code: status.code(),
            error_message: Some(message.into()),
        }
    }
}
