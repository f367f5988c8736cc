//! 数字标牌实时 Session 客户端
//!
//! 在 WebSocket 之上提供自动重连、心跳和按消息类型分发的事件通道，
//! 供管理后台和显示设备与服务器保持同步

mod admin;
mod client;
mod device;
mod error;
mod events;
mod factory;
mod listeners;
mod policy;
mod transport;

#[cfg(test)]
mod testutil;

pub use admin::AdminSessionClient;
pub use client::{ConnectionState, SessionClient, SessionConfig};
pub use device::DeviceSessionClient;
pub use error::SessionError;
pub use events::{
    // 信封与路由
    event_names, message_types, outbound_types, route_for, Envelope, MESSAGE_ROUTES,
    // 监听器事件
    ErrorEvent, ErrorKind, SessionEvent,
    // 上行数据
    AuthorizeDevicePayload, DeviceCommandPayload, DeviceStatus, ErrorReport,
    PlaylistUpdatePayload, RejectDevicePayload,
};
pub use factory::SessionFactory;
pub use listeners::{Listener, ListenerRegistry};
pub use policy::{ExponentialBackoff, FixedInterval, ReconnectPolicy};
pub use transport::{
    build_tls_connector, resolve_ws_url, Connection, Connector, Inbound, Outbound, TlsConfig,
    WsConnector, CLOSE_ABNORMAL, CLOSE_NORMAL,
};
