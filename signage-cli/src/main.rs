//! Signage Session CLI - 以设备或管理端身份连接服务器并打印收到的事件

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use session_client::{
    event_names, DeviceStatus, FixedInterval, SessionClient, SessionConfig, SessionEvent,
    SessionFactory, TlsConfig, MESSAGE_ROUTES,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Signage Session CLI
#[derive(Parser, Debug)]
#[command(name = "signage-session")]
#[command(version, about = "Real-time session client for signage devices and admin consoles")]
struct Args {
    /// Server base URL (http, https, ws or wss)
    #[arg(short, long)]
    server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Heartbeat interval in seconds (0 disables heartbeats)
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// Fixed reconnect interval in milliseconds
    #[arg(long, default_value = "5000")]
    reconnect_interval_ms: u64,

    /// Maximum number of reconnect attempts
    #[arg(long, default_value = "10")]
    max_reconnect_attempts: u32,

    /// CA certificate path for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate path for mTLS
    #[arg(long)]
    client_cert: Option<PathBuf>,

    /// Client key path for mTLS (not needed for P12)
    #[arg(long)]
    client_key: Option<PathBuf>,

    /// P12 password (for PKCS#12 format client cert)
    #[arg(long)]
    p12_password: Option<String>,

    /// Skip TLS certificate verification (DEVELOPMENT ONLY)
    #[arg(long, default_value = "false")]
    insecure: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Connect as a display device
    Device {
        /// Device token
        token: String,

        /// Status report interval in seconds
        #[arg(long, default_value = "60")]
        status_secs: u64,
    },
    /// Connect as the admin console
    Admin {
        /// Authorize this device once connected
        #[arg(long)]
        authorize: Option<String>,

        /// Reject this device once connected
        #[arg(long)]
        reject: Option<String>,

        /// Push a playlist update: <device_id>:<playlist_id>
        #[arg(long)]
        playlist: Option<String>,
    },
}

fn get_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Connected => info!("connected"),
        SessionEvent::Disconnected { code, reason } => {
            warn!("disconnected: {} {}", code, reason)
        }
        SessionEvent::Error(err) => error!("{}: {}", err.kind.as_str(), err.message),
        SessionEvent::Reconnecting { attempt, delay } => {
            info!("reconnecting in {:?} (attempt {})", delay, attempt)
        }
        SessionEvent::MaxReconnectAttemptsReached { attempts } => {
            error!("giving up after {} reconnect attempts", attempts)
        }
        SessionEvent::Message(envelope) => info!(
            "<- {} {}",
            envelope.kind,
            envelope
                .data
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default()
        ),
    }
}

/// 订阅所有生命周期事件和语义事件
fn subscribe_all(client: &SessionClient) {
    let mut names: Vec<&str> = vec![
        event_names::CONNECTED,
        event_names::DISCONNECTED,
        event_names::ERROR,
        event_names::RECONNECTING,
        event_names::MAX_RECONNECT_ATTEMPTS_REACHED,
        event_names::MESSAGE,
    ];
    names.extend(MESSAGE_ROUTES.iter().map(|(_, event)| *event));
    names.sort_unstable();
    names.dedup();

    for name in names {
        client.on(name, log_event);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 构建配置，命令行参数覆盖环境变量
    let mut config = SessionConfig::default();
    if let Some(server) = args.server {
        config.url = server;
    }
    config.heartbeat_interval = Duration::from_secs(args.heartbeat_secs);
    config.reconnect = Arc::new(FixedInterval::new(
        Duration::from_millis(args.reconnect_interval_ms),
        args.max_reconnect_attempts,
    ));
    config.tls = TlsConfig {
        ca_cert_path: args.ca_cert,
        client_cert_path: args.client_cert,
        client_key_path: args.client_key,
        client_p12_password: args.p12_password,
        danger_accept_invalid_certs: args.insecure,
    };

    info!("Starting signage session against {}", config.url);
    let factory = SessionFactory::with_config(config);

    match args.role {
        Role::Device { token, status_secs } => {
            let device = factory.device(&token)?;
            subscribe_all(&device);
            if let Err(e) = device.connect().await {
                warn!("Initial connect failed: {}, retrying in background", e);
            }

            let hostname = get_hostname();
            let reporter = {
                let device = device.clone();
                tokio::spawn(async move {
                    let period = Duration::from_secs(status_secs.max(1));
                    let mut ticker = tokio::time::interval(period);
                    loop {
                        ticker.tick().await;
                        if !device.is_connected() {
                            continue;
                        }
                        let mut status = DeviceStatus::new("online");
                        status.details = Some(serde_json::json!({ "hostname": hostname }));
                        device.send_status_update(&status);
                    }
                })
            };

            info!("Device running. Press Ctrl+C to stop.");
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, shutting down...");
            reporter.abort();
        }
        Role::Admin {
            authorize,
            reject,
            playlist,
        } => {
            let admin = factory.admin()?;
            let playlist = match playlist.as_deref().map(|p| p.split_once(':')) {
                Some(None) => bail!("--playlist expects <device_id>:<playlist_id>"),
                Some(Some((device_id, playlist_id))) => {
                    Some((device_id.to_string(), playlist_id.to_string()))
                }
                None => None,
            };

            // 首次连接失败时由后台重连负责，连上后再执行一次性操作
            let (connected_tx, mut connected_rx) = mpsc::unbounded_channel();
            admin.on(event_names::CONNECTED, move |_| {
                let _ = connected_tx.send(());
            });
            subscribe_all(&admin);
            if let Err(e) = admin.connect().await {
                warn!("Initial connect failed: {}, retrying in background", e);
            }

            info!("Admin console running. Press Ctrl+C to stop.");
            tokio::select! {
                _ = connected_rx.recv() => {
                    if let Some(device_id) = &authorize {
                        admin.authorize_device(device_id, None);
                    }
                    if let Some(device_id) = &reject {
                        admin.reject_device(device_id, None);
                    }
                    if let Some((device_id, playlist_id)) = &playlist {
                        admin.push_playlist_update(device_id, playlist_id);
                    }
                    signal::ctrl_c().await?;
                }
                res = signal::ctrl_c() => res?,
            }
            info!("Received Ctrl+C, shutting down...");
        }
    }

    factory.disconnect_all();
    info!("Session stopped");
    Ok(())
}
