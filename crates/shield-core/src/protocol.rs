use crate::{deserialize_optional_tab_id, deserialize_tab_id, ScanReport, TabId, TabRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PageScan,
    GetScan,
    GetAuthState,
    Login,
    Logout,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageScan => "PAGE_SCAN",
            Self::GetScan => "GET_SCAN",
            Self::GetAuthState => "GET_AUTH_STATE",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
        }
    }

    pub fn from_type(value: &str) -> Option<Self> {
        match value {
            "PAGE_SCAN" => Some(Self::PageScan),
            "GET_SCAN" => Some(Self::GetScan),
            "GET_AUTH_STATE" => Some(Self::GetAuthState),
            "LOGIN" => Some(Self::Login),
            "LOGOUT" => Some(Self::Logout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionMessage {
    PageScan {
        data: ScanReport,
    },
    GetScan {
        #[serde(rename = "tabId", deserialize_with = "deserialize_tab_id")]
        tab_id: TabId,
    },
    GetAuthState,
    Login {
        email: String,
        password: String,
    },
    Logout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl MessageError {
    /// A known message kind with a bad payload, as opposed to something that
    /// is not a protocol message at all.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

impl ExtensionMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PageScan { .. } => MessageKind::PageScan,
            Self::GetScan { .. } => MessageKind::GetScan,
            Self::GetAuthState => MessageKind::GetAuthState,
            Self::Login { .. } => MessageKind::Login,
            Self::Logout => MessageKind::Logout,
        }
    }

    /// Returns `Ok(None)` for messages whose `type` this protocol does not
    /// know; those are ignored rather than rejected.
    pub fn parse(value: Value) -> Result<Option<Self>, MessageError> {
        let Some(object) = value.as_object() else {
            return Err(MessageError::NotAnObject);
        };
        let Some(kind) = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::from_type)
        else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| MessageError::Malformed {
                kind: kind.as_str(),
                reason: err.to_string(),
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReply {
    pub data: Option<TabRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthStateReply {
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoginReply {
    pub fn ok(user: User) -> Self {
        Self {
            success: true,
            user: Some(user),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            user: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogoutReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Reply {
    Scan(ScanReply),
    AuthState(AuthStateReply),
    Login(LoginReply),
    Logout(LogoutReply),
}

impl Reply {
    pub fn to_value(&self) -> Result<Value, FrameError> {
        serde_json::to_value(self).map_err(|err| FrameError::Encode(err.to_string()))
    }
}

/// Inbound frame on the host socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostFrame {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(
            default,
            deserialize_with = "deserialize_optional_tab_id",
            skip_serializing_if = "Option::is_none"
        )]
        tab_id: Option<TabId>,
        message: Value,
    },
    TabRemoved {
        #[serde(deserialize_with = "deserialize_tab_id")]
        tab_id: TabId,
    },
}

/// Outbound frame on the host socket, correlated to its request by `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub reply: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}
