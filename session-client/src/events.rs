//! Session 事件与消息定义
//!
//! 定义线上消息信封、入站类型路由表、监听器收到的事件，以及设备 / 管理端上行消息的数据结构

use crate::error::SessionError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

// ==================== 消息信封 ====================

/// 每个帧携带的消息信封
///
/// `type` 必填；`data`、`timestamp` 可选；其余字段原样保留在 `extra` 中。
/// `"data": null` 读成 `Some(Value::Null)`，与缺省的 `None` 区分，重新序列化时保持原样
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 字段出现即为 Some，包括显式的 null
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// 解析一个文本帧
    pub fn decode(text: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(text)?)
    }

    /// 编码为文本帧
    pub fn encode(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    /// 创建只有类型的信封
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    /// 附带 data
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// 附带当前时间戳（RFC 3339）
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    /// 附带额外字段
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// 心跳帧
    pub fn heartbeat() -> Self {
        Self::new(message_types::HEARTBEAT)
    }
}

// ==================== 入站消息类型 ====================

/// 服务器推送的消息类型
pub mod message_types {
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const HEARTBEAT_RESPONSE: &str = "heartbeat_response";
    pub const AUTHORIZATION_UPDATE: &str = "authorization_update";
    pub const COMMAND: &str = "command";
    pub const PLAYLIST_UPDATE: &str = "playlist_update";
    pub const DEVICE_REGISTERED: &str = "device_registered";
    pub const DEVICE_AUTHORIZED: &str = "device_authorized";
    pub const DEVICE_REJECTED: &str = "device_rejected";
    pub const DEVICE_UPDATED: &str = "device_updated";
    pub const DEVICE_DELETED: &str = "device_deleted";
    pub const DEVICE_ACTIVITY: &str = "device_activity";
    pub const DEVICE_ERROR: &str = "device_error";
    pub const ERROR: &str = "error";
}

/// 客户端自身发出的生命周期事件名
pub mod event_names {
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";
    pub const ERROR: &str = "error";
    pub const RECONNECTING: &str = "reconnecting";
    pub const MAX_RECONNECT_ATTEMPTS_REACHED: &str = "max_reconnect_attempts_reached";
    /// 未识别类型的兜底事件
    pub const MESSAGE: &str = "message";
}

/// 入站类型 → 语义事件名
///
/// 新增消息类型只需要在这里加一行
pub const MESSAGE_ROUTES: &[(&str, &str)] = &[
    (message_types::CONNECTION_ESTABLISHED, "connection_established"),
    (message_types::HEARTBEAT, "heartbeat"),
    (message_types::HEARTBEAT_RESPONSE, "heartbeat_response"),
    (message_types::AUTHORIZATION_UPDATE, "authorization_update"),
    (message_types::COMMAND, "command"),
    (message_types::PLAYLIST_UPDATE, "playlist_update"),
    (message_types::DEVICE_REGISTERED, "device_registered"),
    (message_types::DEVICE_AUTHORIZED, "device_authorized"),
    (message_types::DEVICE_REJECTED, "device_rejected"),
    (message_types::DEVICE_UPDATED, "device_updated"),
    (message_types::DEVICE_DELETED, "device_deleted"),
    (message_types::DEVICE_ACTIVITY, "device_activity"),
    (message_types::DEVICE_ERROR, "device_error"),
    (message_types::ERROR, "error"),
];

/// 查找消息类型对应的事件名，未识别时落到 `message`
pub fn route_for(kind: &str) -> &'static str {
    MESSAGE_ROUTES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, event)| *event)
        .unwrap_or(event_names::MESSAGE)
}

// ==================== 监听器事件 ====================

/// 错误事件的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    SendError,
    TransportError,
    SerializationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::SendError => "send_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::SerializationError => "serialization_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    /// 解析失败时的原始帧
    pub raw: Option<String>,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw: None,
        }
    }
}

/// 传给监听器的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected { code: u16, reason: String },
    Error(ErrorEvent),
    /// 已安排重连，`attempt` 从 1 开始
    Reconnecting { attempt: u32, delay: Duration },
    MaxReconnectAttemptsReached { attempts: u32 },
    /// 路由后的入站消息，信封原样传递
    Message(Envelope),
}

impl SessionEvent {
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            SessionEvent::Message(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorEvent> {
        match self {
            SessionEvent::Error(err) => Some(err),
            _ => None,
        }
    }
}

// ==================== 上行消息 (Device → Server) ====================

/// 设备状态上报
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_playlist_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl DeviceStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

/// 设备错误上报
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

// ==================== 上行消息 (Admin → Server) ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeDevicePayload {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectDevicePayload {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 下发给设备的命令，`command_id` 供调用方关联响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCommandPayload {
    pub device_id: String,
    pub command_id: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistUpdatePayload {
    pub device_id: String,
    pub playlist_id: String,
}

/// 上行消息类型
pub mod outbound_types {
    pub const DEVICE_STATUS: &str = "device_status";
    pub const DEVICE_ERROR_REPORT: &str = "device_error_report";
    pub const AUTHORIZE_DEVICE: &str = "authorize_device";
    pub const REJECT_DEVICE: &str = "reject_device";
    pub const DEVICE_COMMAND: &str = "device_command";
    pub const PLAYLIST_UPDATE: &str = "playlist_update";
}
