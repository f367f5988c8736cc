//! 显示设备侧的 Session 客户端

use crate::client::{SessionClient, SessionConfig};
use crate::error::SessionError;
use crate::events::{outbound_types, DeviceStatus, ErrorReport};
use crate::transport::{resolve_ws_url, Connector, WsConnector};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;

/// 校验 URL 路径片段
pub(crate) fn validate_segment(s: &str, name: &str) -> Result<(), SessionError> {
    if s.is_empty() || s.contains(['/', '?', '#']) || s.chars().any(char::is_whitespace) {
        return Err(SessionError::InvalidUrl(format!("invalid {}: {:?}", name, s)));
    }
    Ok(())
}

/// 设备 Session 客户端，按设备 token 连接 `<base>/ws/device/<token>`
#[derive(Clone)]
pub struct DeviceSessionClient {
    client: SessionClient,
    token: String,
}

impl DeviceSessionClient {
    /// 创建客户端；`config.url` 为服务器基础地址
    pub fn new(
        token: &str,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SessionError> {
        validate_segment(token, "device token")?;
        let url = format!("{}/ws/device/{}", resolve_ws_url(&config.url)?, token);
        let config = SessionConfig { url, ..config };

        Ok(Self {
            client: SessionClient::new(config, connector),
            token: token.to_string(),
        })
    }

    /// 使用 WebSocket 连接器创建
    pub fn connect_to(token: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let connector = Arc::new(WsConnector::new(config.tls.clone()));
        Self::new(token, config, connector)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// 上报设备状态
    pub fn send_status_update(&self, status: &DeviceStatus) -> bool {
        self.client
            .send_payload(outbound_types::DEVICE_STATUS, status)
    }

    /// 上报设备错误
    pub fn send_error_report(&self, message: &str, details: Option<Value>) -> bool {
        let report = ErrorReport {
            message: message.to_string(),
            details,
        };
        self.client
            .send_payload(outbound_types::DEVICE_ERROR_REPORT, &report)
    }
}

impl Deref for DeviceSessionClient {
    type Target = SessionClient;

    fn deref(&self) -> &SessionClient {
        &self.client
    }
}
