//! Session 客户端工厂
//!
//! 按身份缓存客户端：每个设备 token 一个设备客户端，管理端只有一个。
//! 由组合根持有，生命周期跟随工厂

use crate::admin::AdminSessionClient;
use crate::client::SessionConfig;
use crate::device::DeviceSessionClient;
use crate::error::SessionError;
use crate::transport::{Connector, WsConnector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

pub struct SessionFactory {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    devices: Mutex<HashMap<String, DeviceSessionClient>>,
    admin: Mutex<Option<AdminSessionClient>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionFactory {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            devices: Mutex::new(HashMap::new()),
            admin: Mutex::new(None),
        }
    }

    /// 使用 WebSocket 连接器创建
    pub fn with_config(config: SessionConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.tls.clone()));
        Self::new(config, connector)
    }

    /// 获取设备客户端，首次调用时创建
    pub fn device(&self, token: &str) -> Result<DeviceSessionClient, SessionError> {
        let mut devices = locked(&self.devices);
        if let Some(client) = devices.get(token) {
            return Ok(client.clone());
        }
        let client = DeviceSessionClient::new(token, self.config.clone(), self.connector.clone())?;
        devices.insert(token.to_string(), client.clone());
        info!("[SessionFactory] Device client created: {}", client.url());
        Ok(client)
    }

    /// 获取管理端客户端，首次调用时创建
    pub fn admin(&self) -> Result<AdminSessionClient, SessionError> {
        let mut admin = locked(&self.admin);
        if let Some(client) = admin.as_ref() {
            return Ok(client.clone());
        }
        let client = AdminSessionClient::new(self.config.clone(), self.connector.clone())?;
        *admin = Some(client.clone());
        info!("[SessionFactory] Admin client created: {}", client.url());
        Ok(client)
    }

    /// 断开并移除设备客户端
    pub fn remove_device(&self, token: &str) -> bool {
        let removed = locked(&self.devices).remove(token);
        match removed {
            Some(client) => {
                client.disconnect();
                true
            }
            None => false,
        }
    }

    pub fn device_count(&self) -> usize {
        locked(&self.devices).len()
    }

    /// 断开所有缓存的客户端（缓存保留）
    pub fn disconnect_all(&self) {
        let devices: Vec<DeviceSessionClient> = locked(&self.devices).values().cloned().collect();
        for client in devices {
            client.disconnect();
        }
        let admin = locked(&self.admin).clone();
        if let Some(client) = admin {
            client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockConnector;

    fn factory(connector: Arc<MockConnector>) -> SessionFactory {
        let config = SessionConfig {
            url: "http://signage.test".to_string(),
            ..Default::default()
        };
        SessionFactory::new(config, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_clients_cached_per_token() {
        let connector = MockConnector::new();
        let factory = factory(connector.clone());

        let a = factory.device("tok-a").unwrap();
        a.connect().await.unwrap();

        let again = factory.device("tok-a").unwrap();
        assert!(again.is_connected());
        again.connect().await.unwrap();
        assert_eq!(connector.attempts(), 1);

        let b = factory.device("tok-b").unwrap();
        assert!(!b.is_connected());
        assert_eq!(factory.device_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_is_single_instance() {
        let factory = factory(MockConnector::new());
        let first = factory.admin().unwrap();
        first.connect().await.unwrap();
        assert!(factory.admin().unwrap().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_disconnect_all() {
        let factory = factory(MockConnector::new());
        let device = factory.device("tok-a").unwrap();
        let admin = factory.admin().unwrap();
        device.connect().await.unwrap();
        admin.connect().await.unwrap();

        factory.disconnect_all();
        assert!(!device.is_connected());
        assert!(!admin.is_connected());

        assert!(factory.remove_device("tok-a"));
        assert!(!factory.remove_device("tok-a"));
        assert_eq!(factory.device_count(), 0);
    }
}
