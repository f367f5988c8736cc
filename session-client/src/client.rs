//! Session 客户端实现
//!
//! 连接状态机、固定间隔重连、心跳，以及入站消息按类型分发

use crate::error::SessionError;
use crate::events::{event_names, route_for, Envelope, ErrorEvent, ErrorKind, SessionEvent};
use crate::listeners::{Listener, ListenerRegistry};
use crate::policy::{FixedInterval, ReconnectPolicy};
use crate::transport::{
    Connection, Connector, Inbound, Outbound, TlsConfig, WsConnector, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Session 客户端配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 连接地址（特化客户端里是服务器基础地址，会再拼接路径）
    pub url: String,
    /// 心跳间隔，为 0 时不发送心跳
    pub heartbeat_interval: Duration,
    /// 重连策略
    pub reconnect: Arc<dyn ReconnectPolicy>,
    /// TLS 配置
    pub tls: TlsConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        // 从环境变量读取配置，默认 localhost:8000
        let host =
            std::env::var("SIGNAGE_SERVER_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("SIGNAGE_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8000);
        let protocol = if std::env::var("SIGNAGE_USE_TLS")
            .map(|v| v == "true")
            .unwrap_or(false)
        {
            "https"
        } else {
            "http"
        };

        Self {
            url: format!("{}://{}:{}", protocol, host, port),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: Arc::new(FixedInterval::default()),
            tls: TlsConfig::default(),
        }
    }
}

/// 连接发起方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Reconnect,
}

/// 受锁保护的可变状态
#[derive(Default)]
struct Shared {
    state: ConnectionState,
    /// 每次发起连接和每次 disconnect 都会递增，用于丢弃过期的回调
    generation: u64,
    attempts: u32,
    closed_by_user: bool,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Shared {
    fn abort_tasks(&mut self) {
        for handle in [
            self.heartbeat.take(),
            self.reconnect.take(),
            self.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    listeners: ListenerRegistry<SessionEvent>,
    shared: Mutex<Shared>,
}

/// Session 客户端
///
/// 克隆得到的句柄共享同一条连接。后台任务只持有弱引用，所有句柄释放后连接随之关闭
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

impl SessionClient {
    /// 创建客户端
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                listeners: ListenerRegistry::new(),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// 使用默认配置和 WebSocket 连接器创建
    pub fn with_url(url: &str) -> Self {
        let config = SessionConfig {
            url: url.to_string(),
            ..Default::default()
        };
        let connector = Arc::new(WsConnector::new(config.tls.clone()));
        Self::new(config, connector)
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared().state
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// 当前重连计数
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared().attempts
    }

    // ==================== 监听器 ====================

    /// 订阅事件，返回的句柄用于 [`SessionClient::off`]
    pub fn on<F>(&self, event: &str, callback: F) -> Listener<SessionEvent>
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(event, callback)
    }

    /// 取消订阅
    pub fn off(&self, event: &str, listener: &Listener<SessionEvent>) {
        self.inner.listeners.unsubscribe(event, listener);
    }

    /// 清空某个事件（或全部事件）的监听器
    pub fn clear_listeners(&self, event: Option<&str>) {
        self.inner.listeners.clear(event);
    }

    pub fn listeners(&self) -> &ListenerRegistry<SessionEvent> {
        &self.inner.listeners
    }

    // ==================== 连接管理 ====================

    /// 连接到服务器
    ///
    /// 已在连接中或已连接时直接返回，不会创建第二个 socket。
    /// 调用方发起的连接会取消等待中的重连并重置重连计数
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.inner.establish(Origin::Caller).await
    }

    /// 主动断开连接
    ///
    /// 同步取消心跳和等待中的重连，之后不会再自动重连
    pub fn disconnect(&self) {
        let had_work = {
            let mut shared = self.inner.shared();
            let had_work = matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) || shared.reconnect.is_some();

            shared.closed_by_user = true;
            shared.generation += 1;
            shared.abort_tasks();
            if let Some(outbound) = shared.outbound.take() {
                let _ = outbound.send(Outbound::Close {
                    code: CLOSE_NORMAL,
                    reason: "Client disconnect".to_string(),
                });
            }
            if shared.state != ConnectionState::Idle {
                shared.state = ConnectionState::Closed;
            }
            had_work
        };

        if had_work {
            info!("[SessionClient] Disconnected by client: {}", self.url());
            self.inner.listeners.emit(
                event_names::DISCONNECTED,
                &SessionEvent::Disconnected {
                    code: CLOSE_NORMAL,
                    reason: "Client disconnect".to_string(),
                },
            );
        }
    }

    // ==================== 发送 ====================

    /// 发送信封；未连接或写入失败时返回 false 并触发 `error` 事件
    pub fn send(&self, envelope: &Envelope) -> bool {
        self.inner.send(envelope)
    }

    /// 发送带 data 和时间戳的消息
    pub fn send_message(&self, kind: &str, data: Value) -> bool {
        self.send(&Envelope::new(kind).with_data(data).stamped())
    }

    /// 序列化 payload 后发送
    pub fn send_payload<T: Serialize>(&self, kind: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(data) => self.send_message(kind, data),
            Err(e) => {
                error!("[SessionClient] Failed to serialize '{}': {}", kind, e);
                self.inner.emit_error(ErrorEvent::new(
                    ErrorKind::SerializationError,
                    format!("Failed to serialize '{}': {}", kind, e),
                ));
                false
            }
        }
    }
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_error(&self, err: ErrorEvent) {
        self.listeners
            .emit(event_names::ERROR, &SessionEvent::Error(err));
    }

    async fn establish(self: &Arc<Self>, origin: Origin) -> Result<(), SessionError> {
        let generation = {
            let mut shared = self.shared();
            if matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!("[SessionClient] Already {:?}, skip connect", shared.state);
                return Ok(());
            }
            if origin == Origin::Caller {
                shared.closed_by_user = false;
                shared.attempts = 0;
                if let Some(handle) = shared.reconnect.take() {
                    handle.abort();
                }
            }
            shared.state = ConnectionState::Connecting;
            shared.generation += 1;
            shared.generation
        };

        info!("[SessionClient] Connecting to {}", self.config.url);

        match self.connector.connect(&self.config.url).await {
            Ok(conn) => self.on_open(generation, conn),
            Err(e) => self.on_connect_failed(generation, e),
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, conn: Connection) -> Result<(), SessionError> {
        let Connection { outbound, inbound } = conn;
        {
            let mut shared = self.shared();
            if shared.generation != generation || shared.state != ConnectionState::Connecting {
                // 握手期间被 disconnect
                let _ = outbound.send(Outbound::Close {
                    code: CLOSE_NORMAL,
                    reason: "Client disconnect".to_string(),
                });
                return Err(SessionError::Aborted);
            }
            shared.state = ConnectionState::Open;
            shared.attempts = 0;
            shared.outbound = Some(outbound);
            if !self.config.heartbeat_interval.is_zero() {
                shared.heartbeat = Some(spawn_heartbeat(
                    Arc::downgrade(self),
                    self.config.heartbeat_interval,
                ));
            }
        }

        info!("[SessionClient] Connected: {}", self.config.url);
        self.listeners
            .emit(event_names::CONNECTED, &SessionEvent::Connected);

        // connected 监听器先于任何入站消息执行
        let mut shared = self.shared();
        if shared.generation == generation && shared.state == ConnectionState::Open {
            shared.reader = Some(spawn_reader(Arc::downgrade(self), generation, inbound));
        }
        Ok(())
    }

    fn on_connect_failed(
        self: &Arc<Self>,
        generation: u64,
        err: SessionError,
    ) -> Result<(), SessionError> {
        let current = {
            let mut shared = self.shared();
            let current =
                shared.generation == generation && shared.state == ConnectionState::Connecting;
            if current {
                shared.state = ConnectionState::Closed;
            }
            current
        };

        if !current {
            return Err(SessionError::Aborted);
        }

        error!("[SessionClient] Connection failed: {}", err);
        self.emit_error(ErrorEvent::new(ErrorKind::TransportError, err.to_string()));
        // 握手失败不一定会有关闭事件，这里直接触发重连
        self.schedule_reconnect();
        Err(err)
    }

    fn handle_frame(&self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("[SessionClient] Failed to parse message: {}", e);
                self.emit_error(ErrorEvent {
                    kind: ErrorKind::ParseError,
                    message: e.to_string(),
                    raw: Some(text.to_string()),
                });
                return;
            }
        };

        let event = route_for(&envelope.kind);
        debug!("[SessionClient] Received '{}' -> {}", envelope.kind, event);
        self.listeners.emit(event, &SessionEvent::Message(envelope));
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        {
            let mut shared = self.shared();
            if shared.generation != generation || shared.state != ConnectionState::Open {
                return;
            }
            shared.state = ConnectionState::Closed;
            shared.outbound = None;
            // 当前就在读任务里，只释放句柄
            shared.reader = None;
            if let Some(handle) = shared.heartbeat.take() {
                handle.abort();
            }
        }

        if code == CLOSE_NORMAL {
            info!("[SessionClient] Connection closed: {} {}", code, reason);
        } else {
            warn!("[SessionClient] Connection lost: {} {}", code, reason);
        }
        self.listeners.emit(
            event_names::DISCONNECTED,
            &SessionEvent::Disconnected { code, reason },
        );

        if code != CLOSE_NORMAL {
            self.schedule_reconnect();
        }
    }

    /// 安排一次重连；已有等待中的重连时不重复安排
    fn schedule_reconnect(self: &Arc<Self>) {
        let policy = &self.config.reconnect;
        let event = {
            let mut shared = self.shared();
            if shared.closed_by_user || shared.reconnect.is_some() {
                return;
            }
            if shared.attempts >= policy.max_attempts() {
                SessionEvent::MaxReconnectAttemptsReached {
                    attempts: shared.attempts,
                }
            } else {
                let attempt = shared.attempts + 1;
                let delay = policy.delay(attempt);
                let weak = Arc::downgrade(self);
                shared.reconnect = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    reconnect_now(weak).await;
                }));
                SessionEvent::Reconnecting { attempt, delay }
            }
        };

        match &event {
            SessionEvent::Reconnecting { attempt, delay } => {
                info!(
                    "[SessionClient] Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    attempt,
                    policy.max_attempts()
                );
                self.listeners.emit(event_names::RECONNECTING, &event);
            }
            _ => {
                error!("[SessionClient] Max reconnect attempts reached");
                self.listeners
                    .emit(event_names::MAX_RECONNECT_ATTEMPTS_REACHED, &event);
            }
        }
    }

    fn send(&self, envelope: &Envelope) -> bool {
        let outbound = {
            let shared = self.shared();
            match (shared.state, &shared.outbound) {
                (ConnectionState::Open, Some(tx)) => Some(tx.clone()),
                _ => None,
            }
        };

        let Some(outbound) = outbound else {
            warn!("[SessionClient] Cannot send '{}': not connected", envelope.kind);
            self.emit_error(ErrorEvent::new(
                ErrorKind::SendError,
                format!("Cannot send '{}': not connected", envelope.kind),
            ));
            return false;
        };

        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("[SessionClient] Failed to serialize '{}': {}", envelope.kind, e);
                self.emit_error(ErrorEvent::new(
                    ErrorKind::SerializationError,
                    e.to_string(),
                ));
                return false;
            }
        };

        if outbound.send(Outbound::Text(text)).is_err() {
            warn!("[SessionClient] Send failed: connection closed");
            self.emit_error(ErrorEvent::new(
                ErrorKind::SendError,
                format!("Cannot send '{}': connection closed", envelope.kind),
            ));
            return false;
        }

        debug!("[SessionClient] Sent '{}'", envelope.kind);
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        shared.abort_tasks();
    }
}

async fn reconnect_now(weak: Weak<Inner>) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    {
        let mut shared = inner.shared();
        // 只释放自己的句柄
        shared.reconnect = None;
        if shared.closed_by_user || shared.state != ConnectionState::Closed {
            return;
        }
        shared.attempts += 1;
    }
    if let Err(e) = inner.establish(Origin::Reconnect).await {
        debug!("[SessionClient] Reconnect attempt failed: {}", e);
    }
}

fn spawn_heartbeat(weak: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            debug!("[SessionClient] Heartbeat");
            inner.send(&Envelope::heartbeat());
        }
    })
}

fn spawn_reader(
    weak: Weak<Inner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.recv().await {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                Inbound::Text(text) => inner.handle_frame(&text),
                Inbound::Error(message) => {
                    warn!("[SessionClient] Socket error: {}", message);
                    inner.emit_error(ErrorEvent::new(ErrorKind::TransportError, message));
                }
                Inbound::Closed { code, reason } => {
                    inner.handle_close(generation, code, reason);
                    return;
                }
            }
        }
        if let Some(inner) = weak.upgrade() {
            inner.handle_close(generation, CLOSE_ABNORMAL, "transport dropped".to_string());
        }
    })
}
