//! End-to-end scenarios driven against a minimal mock NatNet server: a
//! `tokio::net::UdpSocket` that answers Connect/ModelDefRequest/Request/
//! EchoRequest/Discovery datagrams the way a real server would.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use natnet_client::buffer::{Buffer, WriteBuffer};
use natnet_client::client::NatNetClient;
use natnet_client::command_channel::CommandChannel;
use natnet_client::config::ClientConfig;
use natnet_client::protocol::server_info::{ConnectionInfo, ServerInfo};
use natnet_client::protocol::{MoCapDescription, MessageId};
use natnet_client::version::VersionContext;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

fn frame(id: MessageId, body: impl FnOnce(&mut WriteBuffer)) -> Vec<u8> {
    let mut w = WriteBuffer::new();
    w.write_ushort(id as u16);
    w.write_ushort(0);
    body(&mut w);
    let payload_size = (w.len() - 4) as i16;
    w.set_short(2, payload_size);
    w.into_bytes().to_vec()
}

fn mock_server_info() -> ServerInfo {
    ServerInfo {
        application_name: "mock-motive".to_string(),
        server_version: (3, 1, 0, 0),
        stream_version: (3, 1, 0, 0),
        clock_freq: 1_000_000_000,
        connection_info: Some(ConnectionInfo {
            data_port: 0,
            multicast: false,
            multicast_address: [239, 255, 42, 99],
        }),
    }
}

/// Binds a mock server socket and spawns a task that answers the handful
/// of request types a connecting client actually sends.
async fn spawn_mock_server(info: ServerInfo) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (n, from) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let mut header = Buffer::new(&buf[..n]);
            let id = match header.read_ushort() {
                Ok(v) => v,
                Err(_) => continue,
            };
            if id == MessageId::Connect as u16 || id == MessageId::Discovery as u16 {
                let bytes = frame(MessageId::ServerInfo, |w| info.pack(w));
                let _ = socket.send_to(&bytes, from).await;
            } else if id == MessageId::ModelDefRequest as u16 {
                let desc = MoCapDescription::default();
                let bytes = frame(MessageId::ModelDef, |w| desc.pack(w, VersionContext::new(3, 1)));
                let _ = socket.send_to(&bytes, from).await;
            } else if id == MessageId::EchoRequest as u16 {
                let mut echo_body = Buffer::new(&buf[4..n]);
                let timestamp = echo_body.read_ulong().unwrap_or(0);
                let bytes = frame(MessageId::EchoResponse, |w| {
                    w.write_ulong(timestamp);
                    w.write_ulong(timestamp);
                });
                let _ = socket.send_to(&bytes, from).await;
            } else if id == MessageId::Request as u16 {
                let bytes = frame(MessageId::Response, |w| w.write_bytes(&0i32.to_le_bytes(), 0));
                let _ = socket.send_to(&bytes, from).await;
            }
        }
    });
    (addr, handle)
}

#[tokio::test]
async fn connect_fetches_server_info_and_description() {
    let (addr, _handle) = spawn_mock_server(mock_server_info()).await;

    let mut config = ClientConfig::default();
    config.server_address = addr.ip().to_string();
    config.command_port = addr.port();
    config.client_address = "127.0.0.1".to_string();
    config.use_multicast = false;
    config.sync_clock = false;
    config.connect_timeout = Duration::from_millis(500);

    let client = NatNetClient::new(config);
    let connected = client.connect(false).await.unwrap();
    assert!(connected);
    assert!(client.connected());
    assert_eq!(client.server_info().unwrap().application_name, "mock-motive");
    assert!(client.description().is_some());
}

#[tokio::test]
async fn echo_round_trip_matches_request_stamp() {
    let (addr, _handle) = spawn_mock_server(mock_server_info()).await;

    let cmd = CommandChannel::bind("127.0.0.1".parse().unwrap(), addr, Arc::new(Notify::new()))
        .await
        .unwrap();
    let response = cmd
        .send_echo(42, Duration::from_millis(500))
        .await
        .unwrap()
        .expect("echo response");
    assert_eq!(response.request_stamp, 42);
    assert_eq!(response.received_stamp, 42);
}

#[tokio::test]
async fn discovery_finds_the_mock_server() {
    let (addr, _handle) = spawn_mock_server(mock_server_info()).await;

    let cmd = CommandChannel::bind("127.0.0.1".parse().unwrap(), addr, Arc::new(Notify::new()))
        .await
        .unwrap();
    let found = cmd
        .discover("127.0.0.1".parse().unwrap(), Duration::from_millis(500), 1)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    let (_, found_info) = found.into_iter().next().unwrap();
    assert_eq!(found_info.application_name, "mock-motive");
}

#[tokio::test]
async fn bitstream_change_refused_on_pre_v4_stream() {
    let (addr, _handle) = spawn_mock_server(mock_server_info()).await;

    let mut config = ClientConfig::default();
    config.server_address = addr.ip().to_string();
    config.command_port = addr.port();
    config.client_address = "127.0.0.1".to_string();
    config.use_multicast = false;
    config.sync_clock = false;
    config.connect_timeout = Duration::from_millis(500);

    let client = NatNetClient::new(config);
    assert!(client.connect(false).await.unwrap());
    // stream_version is 3.1, below the 4.x floor `set_version` requires.
    let changed = client.set_version(4, 0, Duration::from_millis(200)).await;
    assert!(!changed);
}

#[tokio::test]
async fn command_request_round_trip_decodes_zero() {
    let (addr, _handle) = spawn_mock_server(mock_server_info()).await;

    let cmd = CommandChannel::bind("127.0.0.1".parse().unwrap(), addr, Arc::new(Notify::new()))
        .await
        .unwrap();
    let response = cmd
        .send_request(b"FrameRate", Duration::from_millis(500))
        .await
        .unwrap()
        .expect("response");
    assert_eq!(response.as_i32(), Some(0));
}
