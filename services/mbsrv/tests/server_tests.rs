//! End-to-end tests against a live server on an ephemeral port

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use mbsrv::protocol::frame::encode_request;
use mbsrv::protocol::{ClientCodec, ExceptionCode, MbapHeader, Request, Response, ResponseFrame};
use mbsrv::{
    Cells, ConnectionId, DataSpace, DisconnectReason, ModbusTcpServer, RegisterStore, ServerConfig,
    ServerEvent, TablesConfig,
};

const WAIT: Duration = Duration::from_secs(3);

type Client = Framed<TcpStream, ClientCodec>;

fn local_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".into(),
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (ModbusTcpServer, SocketAddr) {
    let mut server = ModbusTcpServer::new(config).unwrap();
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    Framed::new(TcpStream::connect(addr).await.unwrap(), ClientCodec)
}

async fn call(client: &mut Client, transaction_id: u16, request: Request) -> ResponseFrame {
    client
        .send((MbapHeader::new(transaction_id, 1), request))
        .await
        .unwrap();
    timeout(WAIT, client.next())
        .await
        .expect("response timed out")
        .expect("connection closed")
        .unwrap()
}

fn read_holding(address: u16, quantity: u16) -> Request {
    Request::ReadHoldingRegisters { address, quantity }
}

/// The peer sees either an orderly close or a reset
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match timeout(WAIT, stream.read(&mut buf)).await.expect("still open") {
        Ok(0) | Err(_) => {},
        Ok(n) => panic!("expected close, got {} bytes", n),
    }
}

async fn next_disconnect(
    events: &mut broadcast::Receiver<ServerEvent>,
) -> (Option<ConnectionId>, DisconnectReason) {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("no disconnect event")
            .unwrap();
        if let ServerEvent::Disconnected { id, reason, .. } = event {
            return (id, reason);
        }
    }
}

async fn wait_for_active(server: &ModbusTcpServer, expected: usize) {
    timeout(WAIT, async {
        while server.active_connections() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("active connection count never settled");
}

#[tokio::test]
async fn test_read_holding_registers_returns_fill() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut client = connect(addr).await;

    let frame = call(&mut client, 0x1234, read_holding(0, 5)).await;
    assert_eq!(frame.header, MbapHeader::new(0x1234, 1));
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17; 5]));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_function_keeps_connection_usable() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x99])
        .await
        .unwrap();
    let mut reply = [0u8; 9];
    timeout(WAIT, stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x99, 0x01]);

    let mut client = Framed::new(stream, ClientCodec);
    let frame = call(&mut client, 2, read_holding(10, 2)).await;
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17, 17]));

    let stats = server.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.exceptions, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_read_is_illegal_data_address() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut client = connect(addr).await;

    let frame = call(&mut client, 9, read_holding(1999, 2)).await;
    let Response::Exception(exception) = frame.response else {
        panic!("expected exception, got {:?}", frame.response);
    };
    assert_eq!(exception.function_code, 0x03);
    assert_eq!(exception.code, ExceptionCode::IllegalDataAddress);

    // Still open afterwards
    let frame = call(&mut client, 10, read_holding(1998, 2)).await;
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17, 17]));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_writes_are_visible_to_other_connections() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut writer = connect(addr).await;
    let mut reader = connect(addr).await;

    let frame = call(
        &mut writer,
        1,
        Request::WriteMultipleRegisters {
            address: 100,
            values: vec![1, 2, 3],
        },
    )
    .await;
    assert_eq!(
        frame.response,
        Response::WriteMultipleRegisters {
            address: 100,
            quantity: 3
        }
    );

    let frame = call(&mut writer, 2, Request::WriteSingleCoil { address: 0, value: true }).await;
    assert_eq!(
        frame.response,
        Response::WriteSingleCoil {
            address: 0,
            value: true
        }
    );

    let frame = call(&mut reader, 3, read_holding(99, 5)).await;
    assert_eq!(
        frame.response,
        Response::ReadHoldingRegisters(vec![17, 1, 2, 3, 17])
    );

    let frame = call(
        &mut reader,
        4,
        Request::ReadCoils {
            address: 0,
            quantity: 3,
        },
    )
    .await;
    let Response::ReadCoils(bits) = frame.response else {
        panic!("expected coils");
    };
    assert_eq!(&bits[..3], &[true, true, false]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let config = ServerConfig {
        idle_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let (mut server, addr) = start_server(config).await;
    let mut events = server.subscribe();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    wait_for_active(&server, 1).await;

    assert_closed(&mut stream).await;
    let (id, reason) = next_disconnect(&mut events).await;
    assert_eq!(id, Some(ConnectionId(1)));
    assert_eq!(reason, DisconnectReason::Idle);
    wait_for_active(&server, 0).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_truncated_frame_is_closed_when_idle() {
    let config = ServerConfig {
        idle_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let (mut server, addr) = start_server(config).await;
    let mut events = server.subscribe();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // five of the seven header bytes
    stream.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00]).await.unwrap();

    assert_closed(&mut stream).await;
    let (_, reason) = next_disconnect(&mut events).await;
    assert_eq!(reason, DisconnectReason::Idle);
    wait_for_active(&server, 0).await;
    assert_eq!(server.stats().requests, 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_that_never_reads_is_reaped() {
    let config = ServerConfig {
        idle_timeout: Duration::from_millis(300),
        ..local_config()
    };
    let (mut server, addr) = start_server(config).await;
    let mut events = server.subscribe();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (_unread, mut write_half) = stream.into_split();

    let mut batch = Vec::new();
    for txn in 0..1000u16 {
        let bytes = encode_request(MbapHeader::new(txn, 1), &read_holding(0, 125)).unwrap();
        batch.extend_from_slice(&bytes);
    }
    let flood = tokio::spawn(async move {
        while write_half.write_all(&batch).await.is_ok() {}
    });

    let reason = timeout(Duration::from_secs(15), async {
        loop {
            if let Ok(ServerEvent::Disconnected { reason, .. }) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .expect("stalled client was never closed");
    assert_eq!(reason, DisconnectReason::Idle);
    wait_for_active(&server, 0).await;

    flood.abort();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_server_writes_through_shared_store() {
    let store = Arc::new(RegisterStore::from_config(&TablesConfig::default()).unwrap());
    let mut server = ModbusTcpServer::with_store(local_config(), Arc::clone(&store));
    let addr = server.start().await.unwrap();
    let mut client = connect(addr).await;

    call(&mut client, 1, Request::WriteSingleRegister { address: 42, value: 0xBEEF }).await;
    assert_eq!(
        store.read_words(DataSpace::HoldingRegisters, 42, 1).unwrap(),
        vec![0xBEEF]
    );

    store
        .write(DataSpace::InputRegisters, 0, &Cells::Words(vec![5, 6]))
        .unwrap();
    let frame = call(
        &mut client,
        2,
        Request::ReadInputRegisters {
            address: 0,
            quantity: 2,
        },
    )
    .await;
    assert_eq!(frame.response, Response::ReadInputRegisters(vec![5, 6]));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_immediate_close_is_deregistered() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut events = server.subscribe();

    let stream = TcpStream::connect(addr).await.unwrap();
    drop(stream);

    let (_, reason) = next_disconnect(&mut events).await;
    assert_eq!(reason, DisconnectReason::DisconnectedByPeer);
    wait_for_active(&server, 0).await;
    assert_eq!(server.stats().accepted, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_closes_without_reply() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut events = server.subscribe();
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // protocol id 1
    stream
        .write_all(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();

    assert_closed(&mut stream).await;
    let (_, reason) = next_disconnect(&mut events).await;
    assert_eq!(reason, DisconnectReason::ProtocolError);
    assert_eq!(server.stats().protocol_errors, 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_multiple_frames_in_one_write() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut batch = Vec::new();
    for txn in 1..=3u16 {
        let bytes = encode_request(MbapHeader::new(txn, 1), &read_holding(txn, 1)).unwrap();
        batch.extend_from_slice(&bytes);
    }
    stream.write_all(&batch).await.unwrap();

    let mut client = Framed::new(stream, ClientCodec);
    for txn in 1..=3u16 {
        let frame = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame.header.transaction_id, txn);
        assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17]));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let (mut server, addr) = start_server(local_config()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bytes = encode_request(MbapHeader::new(77, 3), &read_holding(0, 2)).unwrap();
    stream.write_all(&bytes[..5]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stream.write_all(&bytes[5..]).await.unwrap();

    let mut client = Framed::new(stream, ClientCodec);
    let frame = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame.header, MbapHeader::new(77, 3));
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17, 17]));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_full_server_refuses_new_client() {
    let config = ServerConfig {
        max_connections: 1,
        displace_after: Duration::from_secs(3600),
        ..local_config()
    };
    let (mut server, addr) = start_server(config).await;
    let mut events = server.subscribe();

    let mut first = connect(addr).await;
    call(&mut first, 1, read_holding(0, 1)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_closed(&mut second).await;
    let (id, reason) = next_disconnect(&mut events).await;
    assert_eq!(id, None);
    assert_eq!(reason, DisconnectReason::NoFreeClient);
    assert_eq!(server.stats().rejected, 1);

    // The admitted client is unaffected
    let frame = call(&mut first, 2, read_holding(0, 1)).await;
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17]));
    assert_eq!(server.active_connections(), 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_idle_client_is_displaced() {
    let config = ServerConfig {
        max_connections: 1,
        displace_after: Duration::from_millis(100),
        ..local_config()
    };
    let (mut server, addr) = start_server(config).await;
    let mut events = server.subscribe();

    let mut first = TcpStream::connect(addr).await.unwrap();
    wait_for_active(&server, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = connect(addr).await;
    let frame = call(&mut second, 1, read_holding(0, 1)).await;
    assert_eq!(frame.response, Response::ReadHoldingRegisters(vec![17]));

    assert_closed(&mut first).await;
    let (id, reason) = next_disconnect(&mut events).await;
    assert_eq!(id, Some(ConnectionId(1)));
    assert_eq!(reason, DisconnectReason::Displaced);
    assert_eq!(server.stats().displaced, 1);
    wait_for_active(&server, 1).await;

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_every_connection() {
    let (mut server, addr) = start_server(local_config()).await;

    let mut streams = Vec::new();
    for _ in 0..3 {
        streams.push(TcpStream::connect(addr).await.unwrap());
    }
    wait_for_active(&server, 3).await;
    assert_eq!(server.connections().len(), 3);

    server.stop().await.unwrap();
    assert_eq!(server.active_connections(), 0);

    for stream in &mut streams {
        assert_closed(stream).await;
    }
    assert!(TcpStream::connect(addr).await.is_err());
}
