//! 管理端的 Session 客户端

use crate::client::{SessionClient, SessionConfig};
use crate::error::SessionError;
use crate::events::{
    outbound_types, AuthorizeDevicePayload, DeviceCommandPayload, PlaylistUpdatePayload,
    RejectDevicePayload,
};
use crate::transport::{resolve_ws_url, Connector, WsConnector};
use serde_json::Value;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{info, warn};

/// 管理端 Session 客户端，连接 `<base>/ws/admin`
#[derive(Clone)]
pub struct AdminSessionClient {
    client: SessionClient,
}

impl AdminSessionClient {
    /// 创建客户端；`config.url` 为服务器基础地址
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Result<Self, SessionError> {
        let url = format!("{}/ws/admin", resolve_ws_url(&config.url)?);
        let config = SessionConfig { url, ..config };

        Ok(Self {
            client: SessionClient::new(config, connector),
        })
    }

    /// 使用 WebSocket 连接器创建
    pub fn connect_to(config: SessionConfig) -> Result<Self, SessionError> {
        let connector = Arc::new(WsConnector::new(config.tls.clone()));
        Self::new(config, connector)
    }

    /// 授权设备
    pub fn authorize_device(&self, device_id: &str, name: Option<&str>) -> bool {
        let payload = AuthorizeDevicePayload {
            device_id: device_id.to_string(),
            name: name.map(str::to_string),
        };
        self.client
            .send_payload(outbound_types::AUTHORIZE_DEVICE, &payload)
    }

    /// 拒绝设备
    pub fn reject_device(&self, device_id: &str, reason: Option<&str>) -> bool {
        let payload = RejectDevicePayload {
            device_id: device_id.to_string(),
            reason: reason.map(str::to_string),
        };
        self.client
            .send_payload(outbound_types::REJECT_DEVICE, &payload)
    }

    /// 向设备下发命令，发送成功时返回 command_id
    pub fn send_command(
        &self,
        device_id: &str,
        command: &str,
        params: Option<Value>,
    ) -> Option<String> {
        if command.is_empty() {
            warn!("[AdminSession] Refusing to send an empty command to {}", device_id);
            return None;
        }
        let payload = DeviceCommandPayload {
            device_id: device_id.to_string(),
            command_id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            params,
        };
        if self
            .client
            .send_payload(outbound_types::DEVICE_COMMAND, &payload)
        {
            info!(
                "[AdminSession] Command '{}' sent to {} ({})",
                command, device_id, payload.command_id
            );
            Some(payload.command_id)
        } else {
            None
        }
    }

    /// 通知设备播放列表已更新
    pub fn push_playlist_update(&self, device_id: &str, playlist_id: &str) -> bool {
        let payload = PlaylistUpdatePayload {
            device_id: device_id.to_string(),
            playlist_id: playlist_id.to_string(),
        };
        self.client
            .send_payload(outbound_types::PLAYLIST_UPDATE, &payload)
    }
}

impl Deref for AdminSessionClient {
    type Target = SessionClient;

    fn deref(&self) -> &SessionClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockConnector;
    use crate::transport::Outbound;
    use serde_json::json;

    fn config() -> SessionConfig {
        SessionConfig {
            url: "http://localhost:8000/".to_string(),
            ..Default::default()
        }
    }

    fn sent(frames: Vec<Outbound>) -> Vec<Value> {
        frames
            .into_iter()
            .filter_map(|f| match f {
                Outbound::Text(t) => serde_json::from_str(&t).ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_admin_url_from_base() {
        let client = AdminSessionClient::new(config(), MockConnector::new()).unwrap();
        assert_eq!(client.url(), "ws://localhost:8000/ws/admin");
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_helpers_build_envelopes() {
        let connector = MockConnector::new();
        let client = AdminSessionClient::new(config(), connector.clone()).unwrap();
        client.connect().await.unwrap();
        let mut peer = connector.take_peer();

        assert!(client.authorize_device("dev-1", Some("Lobby screen")));
        assert!(client.reject_device("dev-2", None));
        let command_id = client
            .send_command("dev-1", "reload", Some(json!({"hard": true})))
            .unwrap();
        assert!(client.push_playlist_update("dev-1", "pl-3"));

        let frames = sent(peer.drain());
        assert_eq!(frames.len(), 4);

        assert_eq!(frames[0]["type"], "authorize_device");
        assert_eq!(frames[0]["data"]["device_id"], "dev-1");
        assert_eq!(frames[0]["data"]["name"], "Lobby screen");

        assert_eq!(frames[1]["type"], "reject_device");
        assert!(frames[1]["data"].get("reason").is_none());

        assert_eq!(frames[2]["type"], "device_command");
        assert_eq!(frames[2]["data"]["command"], "reload");
        assert_eq!(frames[2]["data"]["command_id"], command_id.as_str());
        assert_eq!(frames[2]["data"]["params"]["hard"], true);

        assert_eq!(frames[3]["type"], "playlist_update");
        assert_eq!(frames[3]["data"]["playlist_id"], "pl-3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_offline_returns_none() {
        let client = AdminSessionClient::new(config(), MockConnector::new()).unwrap();
        assert!(client.send_command("dev-1", "reload", None).is_none());
    }
}
