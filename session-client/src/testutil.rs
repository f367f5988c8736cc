//! 测试用内存连接器

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::transport::{Connection, Connector, Inbound, Outbound};
use crate::SessionClient;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// 测试侧持有的连接另一端
pub struct MockPeer {
    pub inbound: mpsc::UnboundedSender<Inbound>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MockPeer {
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Text(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(Inbound::Closed {
            code,
            reason: String::new(),
        });
    }

    /// 取出目前所有已发出的帧
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Default)]
struct MockState {
    /// 依次决定每次连接是否成功；用完后默认成功
    script: VecDeque<bool>,
    attempts: usize,
    peers: VecDeque<MockPeer>,
    urls: Vec<String>,
}

#[derive(Default)]
pub struct MockConnector {
    state: Mutex<MockState>,
    delay: Duration,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 每次连接在握手阶段等待 `delay`
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
            delay,
        })
    }

    pub fn script(&self, outcomes: &[bool]) {
        self.state.lock().unwrap().script.extend(outcomes.iter().copied());
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn take_peer(&self) -> MockPeer {
        self.state
            .lock()
            .unwrap()
            .peers
            .pop_front()
            .expect("no connection was opened")
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, SessionError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.urls.push(url.to_string());
            if state.script.pop_front().unwrap_or(true) {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                state.peers.push_back(MockPeer {
                    inbound: in_tx,
                    outbound: out_rx,
                });
                Ok(Connection {
                    outbound: out_tx,
                    inbound: in_rx,
                })
            } else {
                Err(SessionError::ConnectionFailed("connection refused".into()))
            }
        };
        let delay = self.delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

/// 把某个事件的所有触发记录到 channel
pub fn record(client: &SessionClient, event: &str) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(event, move |ev| {
        let _ = tx.send(ev.clone());
    });
    rx
}

/// 等待下一个事件，超时视为失败
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}
