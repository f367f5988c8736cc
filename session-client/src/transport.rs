//! 底层 socket 抽象
//!
//! `Connector` 打开一条连接，返回出站帧发送端和入站事件接收端。
//! 生产实现基于 tokio-tungstenite，测试使用内存实现

use crate::error::SessionError;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use native_tls::{Certificate, Identity, TlsConnector};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// 正常关闭码
pub const CLOSE_NORMAL: u16 = 1000;
/// 未收到关闭帧就断开
pub const CLOSE_ABNORMAL: u16 = 1006;
/// 关闭帧没有携带状态码
const CLOSE_NO_STATUS: u16 = 1005;

/// 出站帧
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    /// socket 级错误；之后总会跟一个 `Closed`
    Error(String),
    Closed { code: u16, reason: String },
}

/// 一条已建立的连接
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// 连接器
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, SessionError>>;
}

/// 把 http(s) 地址转换为 ws(s) 地址
pub fn resolve_ws_url(base: &str) -> Result<String, SessionError> {
    let base = base.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else if base.starts_with("wss://") || base.starts_with("ws://") {
        Ok(base.to_string())
    } else {
        Err(SessionError::InvalidUrl(base.to_string()))
    }
}

// ==================== TLS ====================

/// TLS 配置
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA 证书路径
    pub ca_cert_path: Option<PathBuf>,
    /// 客户端证书路径 (PEM 或 P12)
    pub client_cert_path: Option<PathBuf>,
    /// 客户端私钥路径 (PEM)，P12 时不需要
    pub client_key_path: Option<PathBuf>,
    /// P12 密码
    pub client_p12_password: Option<String>,
    /// 是否跳过服务器证书验证（仅开发用）
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    fn is_empty(&self) -> bool {
        self.ca_cert_path.is_none()
            && self.client_cert_path.is_none()
            && !self.danger_accept_invalid_certs
    }

    /// 客户端证书是否为 PKCS#12 容器
    fn is_pkcs12(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("p12" | "pfx")
        )
    }

    fn identity(&self, cert_path: &Path) -> Result<Identity, SessionError> {
        let cert = fs::read(cert_path)?;
        if Self::is_pkcs12(cert_path) {
            let password = self.client_p12_password.as_deref().unwrap_or_default();
            return Identity::from_pkcs12(&cert, password).map_err(|e| {
                SessionError::Tls(format!("bad PKCS#12 bundle {:?}: {}", cert_path, e))
            });
        }

        let Some(key_path) = &self.client_key_path else {
            return Err(SessionError::Tls(format!(
                "PEM client cert {:?} needs a private key",
                cert_path
            )));
        };
        let key = fs::read(key_path)?;
        Identity::from_pkcs8(&cert, &key)
            .map_err(|e| SessionError::Tls(format!("bad PEM identity {:?}: {}", cert_path, e)))
    }
}

/// 按配置构建 native-tls 连接器
///
/// 未配置 CA、客户端证书且未关闭校验时返回 None，由 tungstenite 使用系统默认配置。
/// 文件读取失败返回 `SessionError::Io`，证书内容无效返回 `SessionError::Tls`
pub fn build_tls_connector(tls: &TlsConfig) -> Result<Option<TlsConnector>, SessionError> {
    if tls.is_empty() {
        return Ok(None);
    }

    let mut builder = TlsConnector::builder();

    if let Some(ca_path) = &tls.ca_cert_path {
        debug!("[Transport] Trusting CA {:?}", ca_path);
        let ca = Certificate::from_pem(&fs::read(ca_path)?)
            .map_err(|e| SessionError::Tls(format!("bad CA certificate {:?}: {}", ca_path, e)))?;
        builder.add_root_certificate(ca);
    }

    if let Some(cert_path) = &tls.client_cert_path {
        debug!("[Transport] Presenting client identity {:?}", cert_path);
        builder.identity(tls.identity(cert_path)?);
    }

    if tls.danger_accept_invalid_certs {
        warn!("[Transport] Server certificate checks are OFF; never use this outside development");
        builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| SessionError::Tls(e.to_string()))
}

// ==================== WebSocket 连接器 ====================

/// 基于 tokio-tungstenite 的连接器
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    tls: TlsConfig,
}

impl WsConnector {
    pub fn new(tls: TlsConfig) -> Self {
        Self { tls }
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, SessionError>> {
        let url = url.to_string();
        let tls = self.tls.clone();

        async move {
            let tls_connector =
                build_tls_connector(&tls)?.map(tokio_tungstenite::Connector::NativeTls);

            let (ws, _) = tokio_tungstenite::connect_async_tls_with_config(
                url.as_str(),
                None,
                false,
                tls_connector,
            )
            .await
            .map_err(|e| SessionError::ConnectionFailed(e.to_string()))?;

            debug!("[Transport] WebSocket handshake done: {}", url);

            let (mut sink, mut stream) = ws.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

            // 写任务：出站 channel 关闭或发出关闭帧后结束
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let result = match frame {
                        Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
                        Outbound::Close { code, reason } => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    };
                    if let Err(e) = result {
                        warn!("[Transport] Write failed: {}", e);
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            // 读任务：总是以一个 Closed 结束
            tokio::spawn(async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if in_tx.send(Inbound::Text(text.as_str().to_owned())).is_err() {
                                return;
                            }
                        }
                        Ok(Message::Binary(bytes)) => {
                            let text = String::from_utf8_lossy(&bytes).into_owned();
                            if in_tx.send(Inbound::Text(text)).is_err() {
                                return;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                                .unwrap_or((CLOSE_NO_STATUS, String::new()));
                            let _ = in_tx.send(Inbound::Closed { code, reason });
                            return;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let _ = in_tx.send(Inbound::Error(e.to_string()));
                            let _ = in_tx.send(Inbound::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: e.to_string(),
                            });
                            return;
                        }
                    }
                }
                let _ = in_tx.send(Inbound::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "stream ended".to_string(),
                });
            });

            Ok::<_, SessionError>(Connection {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_resolve_ws_url() {
        assert_eq!(
            resolve_ws_url("https://signage.local/").unwrap(),
            "wss://signage.local"
        );
        assert_eq!(
            resolve_ws_url("http://localhost:8000").unwrap(),
            "ws://localhost:8000"
        );
        assert_eq!(resolve_ws_url("ws://a:1").unwrap(), "ws://a:1");
        assert!(matches!(
            resolve_ws_url("ftp://nope"),
            Err(SessionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_no_tls_config_uses_default_connector() {
        assert!(build_tls_connector(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_missing_ca_cert_is_io_error() {
        let tls = TlsConfig {
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        assert!(matches!(build_tls_connector(&tls), Err(SessionError::Io(_))));
    }

    #[test]
    fn test_garbage_ca_cert_is_tls_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let tls = TlsConfig {
            ca_cert_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(build_tls_connector(&tls), Err(SessionError::Tls(_))));
    }

    #[test]
    fn test_pkcs12_detection() {
        assert!(TlsConfig::is_pkcs12(Path::new("client.p12")));
        assert!(TlsConfig::is_pkcs12(Path::new("client.pfx")));
        assert!(!TlsConfig::is_pkcs12(Path::new("client.pem")));
        assert!(!TlsConfig::is_pkcs12(Path::new("client")));
    }

    #[test]
    fn test_pem_client_cert_requires_key() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "-----BEGIN CERTIFICATE-----").unwrap();
        let tls = TlsConfig {
            client_cert_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let err = build_tls_connector(&tls).unwrap_err();
        assert!(matches!(err, SessionError::Tls(_)));
        assert!(err.to_string().contains("needs a private key"));
    }
}
