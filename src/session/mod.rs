//! Session Manager — drives the connection lifecycle to the dashcam's
//! access point: discovery, the fixed connect handshake, a background
//! liveness prober, and auto-reconnect on loss.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::DeviceClient;
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Discovering,
    Connecting,
    Connected,
    Lost,
}

/// Notified of human-readable status text alongside the connected flag.
/// Calls must never block the prober loop.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn on_status(&self, message: &str, connected: bool);
}

const PROBE_INTERVAL: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct SessionManager {
    client: Arc<DeviceClient>,
    dashcam_ip: String,
    dashcam_port: u16,
    state: RwLock<SessionState>,
    sink: Arc<dyn StatusSink>,
    prober: Mutex<Option<JoinHandle<()>>>,
    stop_flag: Arc<AtomicBool>,
}

impl SessionManager {
    pub fn new(client: Arc<DeviceClient>, config: &Config, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            client,
            dashcam_ip: config.dashcam_ip.clone(),
            dashcam_port: config.dashcam_port,
            state: RwLock::new(SessionState::Disconnected),
            sink,
            prober: Mutex::new(None),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    /// Probes TCP reachability of the dashcam's access point. Runs on a
    /// blocking thread — `TcpStream::connect_timeout` blocks the calling
    /// thread for up to `DISCOVERY_TIMEOUT` and must not stall the executor.
    async fn discover(&self) -> bool {
        let addr = format!("{}:{}", self.dashcam_ip, self.dashcam_port);
        tokio::task::spawn_blocking(move || match addr.parse() {
            Ok(socket_addr) => TcpStream::connect_timeout(&socket_addr, DISCOVERY_TIMEOUT).is_ok(),
            Err(_) => false,
        })
        .await
        .unwrap_or(false)
    }

    /// Runs discovery then the fixed connect handshake: `getDeviceAttr` →
    /// `registerClient(local_ip)` → `getWifi` → `workModeCmd("stop")`.
    /// Registration errors are logged but non-fatal; the stop command is
    /// best-effort.
    pub async fn connect(self: &Arc<Self>, local_ip: &str) -> bool {
        self.set_state(SessionState::Discovering).await;
        self.sink.on_status("Discovering...", false).await;

        if !self.discover().await {
            self.set_state(SessionState::Disconnected).await;
            self.sink.on_status("Dashcam not found", false).await;
            return false;
        }

        self.set_state(SessionState::Connecting).await;
        self.sink.on_status("Connecting...", false).await;

        if let Err(e) = self.client.get_device_attr().await {
            log::warn!("[session] getDeviceAttr failed: {e}");
        }

        if let Err(e) = self.client.register_client(local_ip).await {
            log::warn!("[session] registerClient failed (non-fatal): {e}");
        }

        if let Err(e) = self.client.get_wifi().await {
            log::warn!("[session] getWifi failed: {e}");
        }

        if let Err(e) = self.client.work_mode_cmd("stop").await {
            log::debug!("[session] workModeCmd(stop) failed (best-effort): {e}");
        }

        self.set_state(SessionState::Connected).await;
        self.sink.on_status("Connected", true).await;

        self.stop_flag.store(false, Ordering::SeqCst);
        self.spawn_prober(local_ip.to_string());
        true
    }

    fn spawn_prober(self: &Arc<Self>, local_ip: String) {
        let this = Arc::clone(self);
        let stop_flag = Arc::clone(&self.stop_flag);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROBE_INTERVAL).await;
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
                // A reconnect inside probe_once spawns a fresh prober loop;
                // this one must not keep ticking alongside it.
                if !this.probe_once(&local_ip).await {
                    return;
                }
            }
        });

        // spawn_prober only runs from within connect(), never concurrently.
        if let Ok(mut slot) = this.prober.try_lock() {
            *slot = Some(handle);
        }
    }

    /// Returns whether the calling prober loop should keep ticking. A
    /// reconnect spawns its own fresh prober, so the caller must stop.
    async fn probe_once(self: &Arc<Self>, local_ip: &str) -> bool {
        match self.client.get_work_state().await {
            Ok(_) => {
                if let Err(e) = self.client.work_mode_cmd("stop").await {
                    log::debug!("[session] post-probe workModeCmd(stop) failed: {e}");
                }
                true
            }
            Err(e) => {
                log::warn!("[session] liveness probe failed: {e}");
                self.set_state(SessionState::Lost).await;
                self.sink.on_status("Connection lost", false).await;

                if self.discover().await {
                    self.sink.on_status("Reconnecting...", false).await;
                    self.connect(local_ip).await;
                } else {
                    self.set_state(SessionState::Disconnected).await;
                    self.sink.on_status("Disconnected", false).await;
                }
                false
            }
        }
    }

    /// Signals the prober to stop and joins it, bounded to avoid hanging
    /// the caller if the task is mid-RPC.
    pub async fn disconnect(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);

        let handle = self.prober.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(DISCONNECT_JOIN_TIMEOUT, handle).await;
        }

        self.set_state(SessionState::Disconnected).await;
        self.sink.on_status("Disconnected", false).await;
    }
}
