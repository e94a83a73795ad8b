//! Request/response correlation, discovery and keep-alive over the command
//! socket, bound to `(client_address, 0)` with `SO_REUSEADDR`/`SO_BROADCAST`
//! set via `socket2` (`tokio::net::UdpSocket` doesn't expose those directly).
//!
//! Mirrors the teacher's `daemon/src/diag.rs` shape: a struct owning a
//! socket plus a `tokio::select!`-driven background task, commands flowing
//! in over channels rather than direct method calls on shared state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{NatNetError, Result};
use crate::protocol::{self, EchoRequest, EchoResponse, Message, MoCapData, MoCapDescription, Response, ServerInfo};
use crate::version::VersionContext;

/// Which concrete variant a pending `send()` is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    ServerInfo,
    ModelDef,
    Response,
    EchoResponse,
}

impl Message {
    /// `None` for kinds that are never awaited as a typed response
    /// (`FrameOfData`, `MessageString`) so they can't spuriously satisfy an
    /// unrelated pending request.
    fn kind(&self) -> Option<ResponseKind> {
        match self {
            Message::ServerInfo(_) => Some(ResponseKind::ServerInfo),
            Message::ModelDef(_) => Some(ResponseKind::ModelDef),
            Message::Response(_) => Some(ResponseKind::Response),
            Message::EchoResponse(_) => Some(ResponseKind::EchoResponse),
            Message::FrameOfData(_) | Message::MessageString(_) => None,
        }
    }
}

struct PendingResponse {
    kind: ResponseKind,
    tx: oneshot::Sender<Message>,
}

struct Shared {
    socket: UdpSocket,
    remote: Mutex<SocketAddr>,
    pending: Mutex<Option<PendingResponse>>,
    discovery: Mutex<Option<mpsc::UnboundedSender<(SocketAddr, ServerInfo)>>>,
    data_tx: Mutex<Option<mpsc::Sender<MoCapData>>>,
    keep_alive_enabled: AtomicBool,
    cancel: CancellationToken,
    /// Shared with the client: fired when the socket dies unexpectedly so
    /// the orchestrator can cascade teardown.
    lost: Arc<Notify>,
}

/// Owns the command socket: request/response correlation (at most one
/// outstanding typed await), discovery accumulation and the keep-alive
/// loop.
pub struct CommandChannel {
    shared: Arc<Shared>,
}

impl CommandChannel {
    pub async fn bind(client_address: std::net::IpAddr, server: SocketAddr, lost: Arc<Notify>) -> Result<Self> {
        let sock2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NatNetError::transport("command socket create", e))?;
        sock2
            .set_reuse_address(true)
            .map_err(|e| NatNetError::transport("command socket SO_REUSEADDR", e))?;
        sock2
            .set_broadcast(true)
            .map_err(|e| NatNetError::transport("command socket SO_BROADCAST", e))?;
        sock2.set_nonblocking(true).map_err(|e| NatNetError::transport("command socket nonblocking", e))?;
        let bind_addr: SocketAddr = (client_address, 0).into();
        sock2
            .bind(&bind_addr.into())
            .map_err(|e| NatNetError::transport("command socket bind", e))?;
        let socket = UdpSocket::from_std(sock2.into())
            .map_err(|e| NatNetError::transport("command socket into tokio", e))?;

        let shared = Arc::new(Shared {
            socket,
            remote: Mutex::new(server),
            pending: Mutex::new(None),
            discovery: Mutex::new(None),
            data_tx: Mutex::new(None),
            keep_alive_enabled: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            lost,
        });

        let recv_shared = shared.clone();
        tokio::spawn(async move { recv_loop(recv_shared).await });

        Ok(CommandChannel { shared })
    }

    /// Installs the fan-out sink for `MoCapData` that arrives on the
    /// command channel itself (observed in unicast sessions before the
    /// data channel has taken over).
    pub async fn set_data_sink(&self, tx: mpsc::Sender<MoCapData>) {
        *self.shared.data_tx.lock().await = Some(tx);
    }

    pub async fn remote(&self) -> SocketAddr {
        *self.shared.remote.lock().await
    }

    pub async fn set_remote(&self, addr: SocketAddr) {
        *self.shared.remote.lock().await = addr;
    }

    async fn send_raw(&self, datagram: &[u8], to: SocketAddr) -> Result<()> {
        self.shared
            .socket
            .send_to(datagram, to)
            .await
            .map_err(|e| NatNetError::transport("command send", e))?;
        Ok(())
    }

    /// Serializes and transmits `datagram`, then awaits a single inbound
    /// message of `kind`. At most one typed await may be outstanding;
    /// arriving messages of other kinds are routed to the discovery
    /// callback and/or the data fan-out instead. A timeout clears the
    /// pending slot and returns `Ok(None)`.
    pub async fn send(&self, datagram: &[u8], kind: ResponseKind, wait: Duration) -> Result<Option<Message>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            *pending = Some(PendingResponse { kind, tx });
        }
        let remote = self.remote().await;
        self.send_raw(datagram, remote).await?;

        match timeout(wait, rx).await {
            Ok(Ok(msg)) => Ok(Some(msg)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                warn!("command request timed out waiting for {kind:?}");
                self.shared.pending.lock().await.take();
                Ok(None)
            }
        }
    }

    pub async fn send_request(&self, payload: &[u8], timeout: Duration) -> Result<Option<Response>> {
        let datagram = protocol::request(payload);
        match self.send(&datagram, ResponseKind::Response, timeout).await? {
            Some(Message::Response(r)) => Ok(Some(r)),
            _ => Ok(None),
        }
    }

    pub async fn connect(&self, timeout: Duration) -> Result<Option<ServerInfo>> {
        let datagram = protocol::connect_request(protocol::DEFAULT_VERSION, protocol::DEFAULT_VERSION);
        match self.send(&datagram, ResponseKind::ServerInfo, timeout).await? {
            Some(Message::ServerInfo(info)) => Ok(Some(info)),
            _ => Ok(None),
        }
    }

    pub async fn get_description(&self, timeout: Duration) -> Result<Option<MoCapDescription>> {
        let datagram = protocol::model_def_request();
        match self.send(&datagram, ResponseKind::ModelDef, timeout).await? {
            Some(Message::ModelDef(desc)) => Ok(Some(desc)),
            _ => Ok(None),
        }
    }

    pub async fn send_echo(&self, stamp: u64, timeout: Duration) -> Result<Option<EchoResponse>> {
        let datagram = protocol::echo_request(EchoRequest { timestamp: stamp });
        match self.send(&datagram, ResponseKind::EchoResponse, timeout).await? {
            Some(Message::EchoResponse(echo)) => Ok(Some(echo)),
            _ => Ok(None),
        }
    }

    /// Sends a `DiscoveryRequest` to `(broadcast_address, command_port)` and
    /// accumulates `ServerInfo` replies keyed by source address until
    /// either `number` responders have answered (`number > 0`) or `wait`
    /// elapses.
    pub async fn discover(
        &self,
        broadcast_address: std::net::IpAddr,
        wait: Duration,
        number: i32,
    ) -> Result<HashMap<SocketAddr, ServerInfo>> {
        let port = self.remote().await.port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.shared.discovery.lock().await = Some(tx);

        let datagram = protocol::discovery_request(protocol::DEFAULT_VERSION, protocol::DEFAULT_VERSION);
        self.send_raw(&datagram, (broadcast_address, port).into()).await?;

        let mut servers = HashMap::new();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some((addr, info))) => {
                    servers.insert(addr, info);
                    if number > 0 && servers.len() >= number as usize {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("discovery timed out");
                    break;
                }
            }
        }
        self.shared.discovery.lock().await.take();
        Ok(servers)
    }

    /// Engages the keep-alive loop; only meaningful on unicast sessions.
    /// Cancellable via `disable_keep_alive`/`close`.
    pub fn enable_keep_alive(self: &Arc<Self>, period: Duration) {
        self.shared.keep_alive_enabled.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let cancel = self.shared.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                if !shared.keep_alive_enabled.load(Ordering::SeqCst) {
                    return;
                }
                let remote = *shared.remote.lock().await;
                debug!("keep alive -> {remote}");
                if let Err(e) = shared.socket.send_to(&protocol::keep_alive(), remote).await {
                    warn!("keep alive send failed: {e}");
                }
            }
        });
    }

    pub fn disable_keep_alive(&self) {
        self.shared.keep_alive_enabled.store(false, Ordering::SeqCst);
    }

    /// Cancels the keep-alive loop and the receive task. Idempotent.
    pub fn close(&self) {
        self.shared.keep_alive_enabled.store(false, Ordering::SeqCst);
        self.shared.cancel.cancel();
    }
}

async fn recv_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let recv = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            r = shared.socket.recv_from(&mut buf) => r,
        };
        let (n, from) = match recv {
            Ok(v) => v,
            Err(e) => {
                warn!("command socket closed: {e}");
                shared.lost.notify_waiters();
                return;
            }
        };
        let msg = match protocol::unpack(&buf[..n], VersionContext::current()) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(e) => {
                warn!("malformed command datagram from {from}: {e}");
                continue;
            }
        };

        if let (Message::ServerInfo(info), Some(tx)) = (&msg, shared.discovery.lock().await.as_ref()) {
            let _ = tx.send((from, info.clone()));
        }

        if let Some(kind) = msg.kind() {
            let mut pending = shared.pending.lock().await;
            if pending.as_ref().map(|p| p.kind) == Some(kind) {
                if let Some(p) = pending.take() {
                    let _ = p.tx.send(msg.clone());
                }
            }
        }

        if let Message::FrameOfData(frame) = msg {
            if let Some(tx) = shared.data_tx.lock().await.as_ref() {
                let _ = tx.send(frame).await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn discover_returns_when_none_respond() {
        let channel = CommandChannel::bind(
            Ipv4Addr::LOCALHOST.into(),
            (Ipv4Addr::LOCALHOST, 1).into(),
            Arc::new(Notify::new()),
        )
        .await
        .unwrap();
        let servers = channel
            .discover(Ipv4Addr::LOCALHOST.into(), Duration::from_millis(50), 1)
            .await
            .unwrap();
        assert!(servers.is_empty());
    }

    #[tokio::test]
    async fn recv_loop_fires_lost_on_socket_error() {
        let lost = Arc::new(Notify::new());
        let channel = CommandChannel::bind(
            Ipv4Addr::LOCALHOST.into(),
            (Ipv4Addr::LOCALHOST, 1).into(),
            lost.clone(),
        )
        .await
        .unwrap();
        let waiter = tokio::spawn({
            let lost = lost.clone();
            async move {
                lost.notified().await;
            }
        });
        // Give the spawned task a chance to register as a waiter before
        // firing. `Shared.lost` is the exact handle passed to `bind`; firing
        // it the way `recv_loop`'s socket-error arm does wakes any waiter.
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.shared.lost.notify_waiters();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("lost notification should reach the waiter")
            .unwrap();
    }
}
