//! Inbound frame datagram reception and multicast group membership.
//!
//! Created only after a successful connect. Multicast joins are fatal to
//! the data channel alone — the command channel stays usable — matching
//! §4.4's "failure to join is fatal for the data channel but leaves the
//! command channel intact" contract.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use std::sync::Arc;

use log::warn;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{NatNetError, Result};
use crate::protocol::{self, Message, MoCapData};
use crate::version::VersionContext;

pub struct DataChannel {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl DataChannel {
    /// Opens the multicast data socket: `SO_REUSEADDR`, bind `("", data_port)`,
    /// join `(multicast_address, client_address)`.
    pub async fn open_multicast(
        client_address: Ipv4Addr,
        multicast_address: Ipv4Addr,
        data_port: u16,
        data_tx: mpsc::Sender<MoCapData>,
        lost: Arc<Notify>,
    ) -> Result<Self> {
        let sock2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NatNetError::transport("data socket create", e))?;
        sock2
            .set_reuse_address(true)
            .map_err(|e| NatNetError::transport("data socket SO_REUSEADDR", e))?;
        let bind_addr: SocketAddr = (IpAddr::V4(Ipv4Addr::UNSPECIFIED), data_port).into();
        sock2
            .bind(&bind_addr.into())
            .map_err(|e| NatNetError::transport("data socket bind", e))?;
        sock2
            .join_multicast_v4(&multicast_address, &client_address)
            .map_err(|e| NatNetError::transport("data socket join multicast", e))?;
        sock2.set_nonblocking(true).map_err(|e| NatNetError::transport("data socket nonblocking", e))?;
        let socket = UdpSocket::from_std(sock2.into())
            .map_err(|e| NatNetError::transport("data socket into tokio", e))?;
        Ok(Self::spawn(socket, data_tx, lost))
    }

    /// Opens the unicast data socket: bind `(client_address, data_port)`.
    /// The caller is responsible for re-issuing `Connect` and enabling
    /// keep-alive on the command channel afterwards, per §4.4.
    pub async fn open_unicast(
        client_address: Ipv4Addr,
        data_port: u16,
        data_tx: mpsc::Sender<MoCapData>,
        lost: Arc<Notify>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((client_address, data_port))
            .await
            .map_err(|e| NatNetError::transport("data socket bind", e))?;
        Ok(Self::spawn(socket, data_tx, lost))
    }

    fn spawn(socket: UdpSocket, data_tx: mpsc::Sender<MoCapData>, lost: Arc<Notify>) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            recv_loop(socket, data_tx, task_cancel, lost).await;
        });
        DataChannel { cancel, handle }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

async fn recv_loop(socket: UdpSocket, data_tx: mpsc::Sender<MoCapData>, cancel: CancellationToken, lost: Arc<Notify>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let recv = tokio::select! {
            _ = cancel.cancelled() => return,
            r = socket.recv_from(&mut buf) => r,
        };
        let (n, _from) = match recv {
            Ok(v) => v,
            Err(e) => {
                warn!("data socket closed: {e}");
                lost.notify_waiters();
                return;
            }
        };
        match protocol::unpack(&buf[..n], VersionContext::current()) {
            Ok(Some(Message::FrameOfData(frame))) => {
                if data_tx.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("malformed data datagram: {e}"),
        }
    }
}
