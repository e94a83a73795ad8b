//! Connect/unconnect lifecycle, description cache and data fan-out: the
//! public surface most callers reach for.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use tokio::sync::{mpsc, Notify};

use crate::clock_sync::SynchronizedClock;
use crate::command_channel::CommandChannel;
use crate::config::ClientConfig;
use crate::data_channel::DataChannel;
use crate::error::{NatNetError, Result};
use crate::protocol::commands;
use crate::protocol::{MoCapData, MoCapDescription, ServerInfo};
use crate::version::VersionContext;

fn wall_clock_now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

struct FrameQueue {
    entries: VecDeque<(i64, MoCapData)>,
    /// `None` disables the queue; `Some(0)` means unbounded; `Some(n>0)` is
    /// the head-drop bound.
    bound: Option<usize>,
}

impl FrameQueue {
    fn new(queue: i32) -> Option<Self> {
        if queue < 0 {
            return None;
        }
        Some(FrameQueue {
            entries: VecDeque::new(),
            bound: if queue == 0 { Some(0) } else { Some(queue as usize) },
        })
    }

    fn push(&mut self, stamp: i64, data: MoCapData) {
        if let Some(bound) = self.bound {
            if bound > 0 && self.entries.len() >= bound {
                self.entries.pop_front();
            }
        }
        self.entries.push_back((stamp, data));
    }
}

/// Aggregates the command and data channels behind the public API named in
/// §4.5: connect/unconnect lifecycle, description cache, and queue/callback
/// fan-out for inbound frames.
pub struct NatNetClient {
    config: ClientConfig,
    cmd: StdMutex<Option<Arc<CommandChannel>>>,
    data: StdMutex<Option<DataChannel>>,
    clock: StdMutex<Option<Arc<SynchronizedClock>>>,
    server_info: StdMutex<Option<ServerInfo>>,
    description: StdMutex<Option<MoCapDescription>>,
    rigid_body_names: StdMutex<HashMap<i32, String>>,
    queue: StdMutex<Option<FrameQueue>>,
    queue_notify: Notify,
    data_callback: StdMutex<Option<Box<dyn Fn(&MoCapData) + Send + Sync>>>,
    /// Fired by either channel's recv loop when its socket dies
    /// unexpectedly. A background task awaits this and cascades teardown,
    /// the way `async_client.py`'s `connection_lost` callbacks drive
    /// `self._done.set_result(None)`.
    lost: Arc<Notify>,
    lost_watcher_started: std::sync::atomic::AtomicBool,
    now_ns: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl NatNetClient {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(wall_clock_now_ns))
    }

    /// Same as [`Self::new`] but with an injectable receipt-stamp clock,
    /// mirroring [`SynchronizedClock::with_clock`].
    pub fn with_clock(config: ClientConfig, now_ns: Arc<dyn Fn() -> i64 + Send + Sync>) -> Arc<Self> {
        let queue = FrameQueue::new(config.queue);
        Arc::new(NatNetClient {
            config,
            cmd: StdMutex::new(None),
            data: StdMutex::new(None),
            clock: StdMutex::new(None),
            server_info: StdMutex::new(None),
            description: StdMutex::new(None),
            rigid_body_names: StdMutex::new(HashMap::new()),
            queue: StdMutex::new(queue),
            queue_notify: Notify::new(),
            data_callback: StdMutex::new(None),
            lost: Arc::new(Notify::new()),
            lost_watcher_started: std::sync::atomic::AtomicBool::new(false),
            now_ns,
        })
    }

    /// Spawns the background task that cascades teardown when either
    /// channel's recv loop fires `lost`, the way `async_client.py`'s
    /// `connection_lost` callbacks drive `self._done.set_result(None)`.
    /// Deferred until `connect()` (rather than done in `new`) so
    /// construction itself never requires a running Tokio reactor; runs
    /// at most once per client regardless of how many times it reconnects.
    fn ensure_lost_watcher(self: &Arc<Self>) {
        if self
            .lost_watcher_started
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_ok()
        {
            let watcher = self.clone();
            tokio::spawn(async move {
                loop {
                    watcher.lost.notified().await;
                    warn!("channel reported connection lost, tearing down session");
                    watcher.clear_state();
                }
            });
        }
    }

    pub fn set_data_callback(&self, cb: impl Fn(&MoCapData) + Send + Sync + 'static) {
        *self.data_callback.lock().unwrap() = Some(Box::new(cb));
    }

    pub fn connected(&self) -> bool {
        self.server_info.lock().unwrap().is_some()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    pub fn description(&self) -> Option<MoCapDescription> {
        self.description.lock().unwrap().clone()
    }

    pub fn rigid_body_names(&self) -> HashMap<i32, String> {
        self.rigid_body_names.lock().unwrap().clone()
    }

    fn use_multicast(&self) -> bool {
        self.server_info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|info| info.connection_info.as_ref())
            .map(|ci| ci.multicast)
            .unwrap_or(self.config.use_multicast)
    }

    fn data_port(&self) -> u16 {
        self.server_info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|info| info.connection_info.as_ref())
            .map(|ci| ci.data_port)
            .unwrap_or(self.config.data_port)
    }

    /// Idempotent: rejects if already connected. Runs discovery first when
    /// `config.discovery_address` is non-empty, else connects directly.
    pub async fn connect(self: &Arc<Self>, start_listening_for_data: bool) -> Result<bool> {
        if self.connected() {
            warn!("connect called while already connected");
            return Ok(false);
        }
        self.ensure_lost_watcher();

        let client_addr: IpAddr = self
            .config
            .client_address
            .parse()
            .map_err(|_| NatNetError::State("invalid client_address"))?;
        let server_addr: IpAddr = self
            .config
            .server_address
            .parse()
            .map_err(|_| NatNetError::State("invalid server_address"))?;

        let cmd = Arc::new(
            CommandChannel::bind(
                client_addr,
                (server_addr, self.config.command_port).into(),
                self.lost.clone(),
            )
            .await?,
        );

        let info = if !self.config.discovery_address.is_empty() {
            let discovery_addr: IpAddr = self
                .config
                .discovery_address
                .parse()
                .map_err(|_| NatNetError::State("invalid discovery_address"))?;
            let servers = cmd
                .discover(discovery_addr, self.config.connect_timeout, 1)
                .await?;
            let Some((addr, info)) = servers.into_iter().next() else {
                warn!("discovery found no servers");
                return Ok(false);
            };
            cmd.set_remote(addr).await;
            info
        } else {
            let Some(info) = cmd.connect(self.config.connect_timeout).await? else {
                warn!("failed connecting to server");
                return Ok(false);
            };
            info
        };

        VersionContext::set_current(info.stream_version.0, info.stream_version.1);
        *self.server_info.lock().unwrap() = Some(info.clone());

        let Some(description) = cmd.get_description(self.config.connect_timeout).await? else {
            warn!("failed fetching description");
            *self.server_info.lock().unwrap() = None;
            return Ok(false);
        };
        let rigid_body_names: HashMap<i32, String> = description
            .rigid_bodies
            .iter()
            .map(|rb| (rb.id, rb.name.clone()))
            .collect();
        info!(
            "got description for rigid bodies: {}",
            rigid_body_names.values().cloned().collect::<Vec<_>>().join(", ")
        );
        *self.description.lock().unwrap() = Some(description);
        *self.rigid_body_names.lock().unwrap() = rigid_body_names;

        *self.cmd.lock().unwrap() = Some(cmd.clone());

        if self.config.sync_clock && info.clock_freq > 0 {
            let clock = SynchronizedClock::new(
                info.clock_freq,
                self.config.estimate_skew,
                self.config.clock_sync_period,
            );
            clock.start(cmd.clone());
            *self.clock.lock().unwrap() = Some(clock);
        }

        info!("natnet client connected: {}", info.application_name);

        if start_listening_for_data {
            return self.start_listening_for_data().await;
        }
        Ok(true)
    }

    pub async fn start_listening_for_data(self: &Arc<Self>) -> Result<bool> {
        let cmd = {
            let guard = self.cmd.lock().unwrap();
            guard.clone()
        };
        let Some(cmd) = cmd else {
            warn!("start_listening_for_data called before connecting");
            return Ok(false);
        };

        let client_addr: Ipv4Addr = self
            .config
            .client_address
            .parse()
            .map_err(|_| NatNetError::State("invalid client_address"))?;

        let (tx, mut rx) = mpsc::channel::<MoCapData>(256);
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                this.dispatch_frame(frame);
            }
        });
        // Unicast sessions can see FrameOfData arrive on the command socket
        // before the data channel takes over; fan those out too.
        cmd.set_data_sink(tx.clone()).await;

        let use_multicast = self.use_multicast();
        let data_port = self.data_port();
        info!(
            "creating data {} socket on port {data_port}",
            if use_multicast { "multicast" } else { "unicast" }
        );

        let channel = if use_multicast {
            let multicast_addr: Ipv4Addr = self
                .config
                .multicast_address
                .parse()
                .map_err(|_| NatNetError::State("invalid multicast_address"))?;
            match DataChannel::open_multicast(client_addr, multicast_addr, data_port, tx, self.lost.clone()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("data channel failed to join multicast group: {e}");
                    return Ok(false);
                }
            }
        } else {
            let channel = DataChannel::open_unicast(client_addr, data_port, tx, self.lost.clone()).await?;
            if self.config.double_connect_on_unicast {
                cmd.connect(self.config.connect_timeout).await?;
            }
            cmd.enable_keep_alive(self.config.keep_alive_timeout);
            channel
        };

        *self.data.lock().unwrap() = Some(channel);
        Ok(true)
    }

    fn dispatch_frame(&self, frame: MoCapData) {
        let stamp = (self.now_ns)();
        if let Some(queue) = self.queue.lock().unwrap().as_mut() {
            queue.push(stamp, frame.clone());
        }
        self.queue_notify.notify_waiters();
        if let Some(cb) = self.data_callback.lock().unwrap().as_ref() {
            cb(&frame);
        }
    }

    /// Dequeues the oldest frame, or (when `last` is set) drains the queue
    /// and returns only the newest.
    pub async fn get_data(&self, timeout: Duration, last: bool) -> Option<(i64, MoCapData)> {
        let immediate = {
            let mut queue = self.queue.lock().unwrap();
            let queue = queue.as_mut()?;
            if last {
                let mut newest = None;
                while let Some(entry) = queue.entries.pop_front() {
                    newest = Some(entry);
                }
                newest
            } else {
                queue.entries.pop_front()
            }
        };
        if immediate.is_some() {
            return immediate;
        }
        if timeout.is_zero() {
            self.queue_notify.notified().await;
        } else if tokio::time::timeout(timeout, self.queue_notify.notified()).await.is_err() {
            warn!("get_data timed out");
            return None;
        }
        let mut queue = self.queue.lock().unwrap();
        let queue = queue.as_mut()?;
        if last {
            let mut newest = None;
            while let Some(entry) = queue.entries.pop_front() {
                newest = Some(entry);
            }
            newest
        } else {
            queue.entries.pop_front()
        }
    }

    /// Completes after `duration`, or earlier if a channel loses its
    /// socket. Returns `true` if still connected.
    pub async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.connected(),
            _ = self.lost.notified() => false,
        }
    }

    fn clear_state(&self) {
        *self.data.lock().unwrap() = None;
        if let Some(cmd) = self.cmd.lock().unwrap().take() {
            cmd.close();
        }
        if let Some(clock) = self.clock.lock().unwrap().take() {
            clock.stop();
        }
        *self.server_info.lock().unwrap() = None;
        *self.description.lock().unwrap() = None;
        self.rigid_body_names.lock().unwrap().clear();
    }

    /// Closes the data channel, stops keep-alive/clock tasks, clears
    /// cached server state. The command channel is dropped here too in
    /// this implementation (unlike the original, which keeps it alive for
    /// reuse) because our command channel has no standalone reconnect
    /// path; call `connect` again to get a fresh one.
    pub fn unconnect(&self) {
        self.clear_state();
    }

    pub fn close(&self) {
        self.unconnect();
    }

    async fn send_request(&self, payload: &[u8], timeout: Duration) -> Option<crate::protocol::Response> {
        let cmd = self.cmd.lock().unwrap().clone()?;
        cmd.send_request(payload, timeout).await.ok().flatten()
    }

    pub async fn set_property(&self, node: &str, name: &str, value: &str, timeout: Duration) -> bool {
        let payload = commands::cmd_set_property(node, name, value);
        self.send_request(&payload, timeout)
            .await
            .and_then(|r| r.as_i32())
            .map(|v| v == 0)
            .unwrap_or(false)
    }

    pub async fn get_property(&self, node: &str, name: &str, timeout: Duration) -> Option<Vec<u8>> {
        let payload = commands::cmd_get_property(node, name);
        self.send_request(&payload, timeout).await.map(|r| r.data)
    }

    pub async fn set_framerate(&self, rate: i32, timeout: Duration) -> bool {
        self.set_property("", "Master Rate", &rate.to_string(), timeout).await
    }

    pub async fn get_framerate(&self) -> Option<f32> {
        self.send_request(&commands::cmd_frame_rate(), Duration::from_secs(1))
            .await
            .and_then(|r| r.as_f32())
    }

    pub async fn enable_asset(&self, name: &str, timeout: Duration) -> bool {
        self.send_request(&commands::cmd_enable_asset(name), timeout).await.is_some()
    }

    pub async fn disable_asset(&self, name: &str, timeout: Duration) -> bool {
        self.send_request(&commands::cmd_disable_asset(name), timeout).await.is_some()
    }

    fn can_subscribe(&self) -> bool {
        VersionContext::current().can_subscribe() && !self.use_multicast()
    }

    pub async fn subscribe(&self, kind: &str, name: &str, timeout: Duration) -> bool {
        if !self.can_subscribe() {
            warn!("subscription commands not available");
            return false;
        }
        self.send_request(&commands::cmd_subscribe_to_data(kind, name), timeout)
            .await
            .is_some()
    }

    pub async fn subscribe_by_id(&self, kind: &str, id: i32, timeout: Duration) -> bool {
        if !self.can_subscribe() {
            warn!("subscription commands not available");
            return false;
        }
        self.send_request(&commands::cmd_subscribe_by_id(kind, id), timeout)
            .await
            .is_some()
    }

    pub async fn subscribe_all(&self, timeout: Duration) -> bool {
        if !self.can_subscribe() {
            warn!("subscription commands not available");
            return false;
        }
        self.send_request(&commands::cmd_subscribe_all(), timeout).await.is_some()
    }

    pub async fn unsubscribe(&self, kind: &str, name: &str, timeout: Duration) -> bool {
        if !self.can_subscribe() {
            warn!("subscription commands not available");
            return false;
        }
        self.send_request(&commands::cmd_unsubscribe_by_name(kind, name), timeout)
            .await
            .is_some()
    }

    pub async fn clear_subscriptions(&self, timeout: Duration) -> bool {
        if !self.can_subscribe() {
            warn!("subscription commands not available");
            return false;
        }
        self.send_request(b"SubscribeToData", timeout).await.is_some()
            && self.send_request(b"SubscribeByID", timeout).await.is_some()
    }

    /// Refuses when `major < 4` or multicast is in use.
    pub async fn set_version(&self, major: u8, minor: u8, timeout: Duration) -> bool {
        if major < 4 || self.use_multicast() {
            warn!("cannot set bitstream version");
            return false;
        }
        let payload = commands::cmd_bitstream(major, minor);
        if self.send_request(&payload, timeout).await.is_none() {
            warn!("failed to set bitstream version");
            return false;
        }
        VersionContext::set_current(major, minor);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::MoCapData;

    fn frame(n: i32) -> MoCapData {
        MoCapData {
            frame_number: n,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn head_drop_keeps_last_q_in_fifo_order() {
        let mut config = ClientConfig::default();
        config.queue = 2;
        let client = NatNetClient::new(config);
        for n in 1..=5 {
            client.dispatch_frame(frame(n));
        }
        let first = client.get_data(Duration::from_millis(10), false).await;
        let second = client.get_data(Duration::from_millis(10), false).await;
        assert_eq!(first.unwrap().1.frame_number, 4);
        assert_eq!(second.unwrap().1.frame_number, 5);
    }

    #[tokio::test]
    async fn get_data_last_drains_queue_and_returns_newest() {
        let mut config = ClientConfig::default();
        config.queue = 2;
        let client = NatNetClient::new(config);
        for n in 1..=5 {
            client.dispatch_frame(frame(n));
        }
        let newest = client.get_data(Duration::from_millis(10), true).await;
        assert_eq!(newest.unwrap().1.frame_number, 5);
        let empty = client.get_data(Duration::from_millis(10), false).await;
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn lost_notification_cascades_to_clear_state() {
        let client = NatNetClient::new(ClientConfig::default());
        client.ensure_lost_watcher();
        *client.server_info.lock().unwrap() = Some(ServerInfo {
            application_name: "mock".to_string(),
            server_version: (3, 1, 0, 0),
            stream_version: (3, 1, 0, 0),
            clock_freq: 0,
            connection_info: None,
        });
        assert!(client.connected());

        client.lost.notify_waiters();
        // The teardown watcher runs on its own task; poll briefly for it to
        // react to the notification.
        for _ in 0..50 {
            if !client.connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!client.connected());
    }

    #[tokio::test]
    async fn custom_clock_stamps_dispatched_frames() {
        let mut config = ClientConfig::default();
        config.queue = 1;
        let client = NatNetClient::with_clock(config, Arc::new(|| 123_456i64));
        client.dispatch_frame(frame(1));
        let (stamp, _) = client.get_data(Duration::from_millis(10), false).await.unwrap();
        assert_eq!(stamp, 123_456);
    }

    #[tokio::test]
    async fn negative_queue_disables_queueing() {
        let mut config = ClientConfig::default();
        config.queue = -1;
        let client = NatNetClient::new(config);
        client.dispatch_frame(frame(1));
        let result = client.get_data(Duration::from_millis(10), false).await;
        assert!(result.is_none());
    }
}
