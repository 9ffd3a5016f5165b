//! End-to-end tests driving a client against a scripted router over an
//! in-memory duplex transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use bosswave_client::protocol::generate_seq_no;
use bosswave_client::{
    BosswaveClient, BosswaveError, Command, Frame, Message, ObjectType, PayloadObject,
    PublishRequest, Response, RoutingObject, SubscribeRequest,
};

type RouterReader = BufReader<ReadHalf<DuplexStream>>;
type RouterWriter = WriteHalf<DuplexStream>;

/// Connect a client to a scripted router side, completing the handshake.
async fn connect() -> (BosswaveClient, RouterReader, RouterWriter) {
    let (client_side, router_side) = tokio::io::duplex(1 << 16);
    let (router_read, mut router_write) = tokio::io::split(router_side);

    router_write
        .write_all(&Frame::new(Command::Hello, 0).encode())
        .await
        .unwrap();
    let client = BosswaveClient::from_transport(client_side).await.unwrap();

    (client, BufReader::new(router_read), router_write)
}

async fn read_frame(reader: &mut RouterReader) -> Frame {
    timeout(Duration::from_secs(2), Frame::read_from(reader))
        .await
        .unwrap()
        .unwrap()
}

async fn write_frame(writer: &mut RouterWriter, frame: &Frame) {
    writer.write_all(&frame.encode()).await.unwrap();
}

fn response_frame(seq_no: u32, status: &str, reason: Option<&str>) -> Frame {
    let mut frame = Frame::new(Command::Response, seq_no);
    frame.push_kv("status", Bytes::copy_from_slice(status.as_bytes()));
    if let Some(reason) = reason {
        frame.push_kv("reason", Bytes::copy_from_slice(reason.as_bytes()));
    }
    frame
}

fn result_frame(seq_no: u32, uri: &str, from: &str) -> Frame {
    let mut frame = Frame::new(Command::Result, seq_no);
    frame.push_kv("uri", Bytes::copy_from_slice(uri.as_bytes()));
    frame.push_kv("from", Bytes::copy_from_slice(from.as_bytes()));
    frame
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn handshake_rejects_non_hello() {
    let (client_side, router_side) = tokio::io::duplex(1 << 16);
    let (_router_read, mut router_write) = tokio::io::split(router_side);

    router_write
        .write_all(&response_frame(1, "okay", None).encode())
        .await
        .unwrap();

    let result = BosswaveClient::from_transport(client_side).await;
    assert!(matches!(result, Err(BosswaveError::Handshake(_))));
}

#[tokio::test]
async fn handshake_rejects_garbage() {
    let (client_side, router_side) = tokio::io::duplex(1 << 16);
    let (_router_read, mut router_write) = tokio::io::split(router_side);

    router_write.write_all(b"not a frame\n\n").await.unwrap();

    let result = BosswaveClient::from_transport(client_side).await;
    assert!(matches!(result, Err(BosswaveError::Handshake(_))));
}

#[tokio::test]
async fn publish_response_okay() {
    let (client, mut reader, mut writer) = connect().await;
    let (tx, rx) = oneshot::channel();

    let request = PublishRequest::builder("scratch/demo").build();
    client
        .publish(&request, move |response| {
            let _ = tx.send(response);
        })
        .await
        .unwrap();

    let frame = read_frame(&mut reader).await;
    assert_eq!(frame.command, Command::Publish);
    assert_eq!(frame.first_value("uri").unwrap().as_ref(), b"scratch/demo");

    write_frame(&mut writer, &response_frame(frame.seq_no, "okay", None)).await;

    let response = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert_eq!(response.status, "okay");
    assert!(response.is_okay());
    assert_eq!(response.reason, None);
}

#[tokio::test]
async fn publish_response_error_carries_reason() {
    let (client, mut reader, mut writer) = connect().await;
    let (tx, rx) = oneshot::channel();

    let request = PublishRequest::builder("scratch/demo").build();
    client
        .publish(&request, move |response| {
            let _ = tx.send(response);
        })
        .await
        .unwrap();

    let frame = read_frame(&mut reader).await;
    write_frame(
        &mut writer,
        &response_frame(frame.seq_no, "error", Some("permission denied")),
    )
    .await;

    let response = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert!(!response.is_okay());
    assert_eq!(response.reason.as_deref(), Some("permission denied"));
}

#[tokio::test]
async fn persist_request_uses_persist_command() {
    let (client, mut reader, _writer) = connect().await;

    let request = PublishRequest::builder("scratch/demo").persist(true).build();
    client.publish(&request, |_| {}).await.unwrap();

    let frame = read_frame(&mut reader).await;
    assert_eq!(frame.command, Command::Persist);
    assert_eq!(frame.first_value("persist").unwrap().as_ref(), b"true");
}

#[tokio::test]
async fn response_handler_fires_at_most_once() {
    let (client, mut reader, mut writer) = connect().await;
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = fired.clone();

    let request = PublishRequest::builder("scratch/demo").build();
    client
        .publish(&request, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    let first = read_frame(&mut reader).await;

    // Duplicate terminal response for the same sequence number.
    write_frame(&mut writer, &response_frame(first.seq_no, "okay", None)).await;
    write_frame(&mut writer, &response_frame(first.seq_no, "okay", None)).await;

    // A second request acts as a fence: once its response arrives, the
    // duplicate above has already been dispatched.
    let (tx, rx) = oneshot::channel();
    client
        .publish(&request, move |_| {
            let _ = tx.send(());
        })
        .await
        .unwrap();
    let second = read_frame(&mut reader).await;
    write_frame(&mut writer, &response_frame(second.seq_no, "okay", None)).await;
    timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn subscription_delivers_result_stream() {
    let (client, mut reader, mut writer) = connect().await;
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();
    let (resp_tx, resp_rx) = oneshot::channel::<Response>();

    let request = SubscribeRequest::builder("scratch/+").build();
    client
        .subscribe(
            &request,
            move |response| {
                let _ = resp_tx.send(response);
            },
            move |message| {
                let _ = msg_tx.send(message);
            },
        )
        .await
        .unwrap();

    let frame = read_frame(&mut reader).await;
    assert_eq!(frame.command, Command::Subscribe);
    assert_eq!(frame.first_value("unpack").unwrap().as_ref(), b"true");
    let seq_no = frame.seq_no;

    write_frame(&mut writer, &response_frame(seq_no, "okay", None)).await;
    let response = timeout(Duration::from_secs(2), resp_rx).await.unwrap().unwrap();
    assert!(response.is_okay());

    let po = PayloadObject::new(
        ObjectType::from_octet([64, 0, 1, 0]),
        Bytes::from_static(b"payload"),
    );
    let ro = RoutingObject::new(
        ObjectType::from_number(51).unwrap(),
        Bytes::from_static(b"\x01\x02"),
    );
    for i in 0..3 {
        let mut frame = result_frame(seq_no, &format!("scratch/{}", i), &format!("vk{}", i));
        frame.push_routing_object(ro.clone());
        frame.push_payload_object(po.clone());
        write_frame(&mut writer, &frame).await;
    }

    for i in 0..3 {
        let message = recv(&mut msg_rx).await;
        assert_eq!(message.uri, format!("scratch/{}", i));
        assert_eq!(message.from, format!("vk{}", i));
        assert_eq!(message.routing_objects.as_deref(), Some(&[ro.clone()][..]));
        assert_eq!(message.payload_objects.as_deref(), Some(&[po.clone()][..]));
    }
}

#[tokio::test]
async fn packed_result_omits_objects() {
    let (client, mut reader, mut writer) = connect().await;
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();

    let request = SubscribeRequest::builder("scratch/+").leave_packed(true).build();
    client
        .subscribe(
            &request,
            |_| {},
            move |message| {
                let _ = msg_tx.send(message);
            },
        )
        .await
        .unwrap();
    let frame = read_frame(&mut reader).await;
    assert!(frame.first_value("unpack").is_none());

    let mut result = result_frame(frame.seq_no, "scratch/x", "vk");
    result.push_kv("unpack", Bytes::from_static(b"false"));
    result.push_payload_object(PayloadObject::new(
        ObjectType::from_number(1).unwrap(),
        Bytes::from_static(b"opaque"),
    ));
    write_frame(&mut writer, &result).await;

    let message = recv(&mut msg_rx).await;
    assert_eq!(message.routing_objects, None);
    assert_eq!(message.payload_objects, None);
}

#[tokio::test]
async fn cancelled_subscription_stops_delivering() {
    let (client, mut reader, mut writer) = connect().await;
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<Message>();

    let request = SubscribeRequest::builder("scratch/+").build();
    let seq_no = client
        .subscribe(
            &request,
            |_| {},
            move |message| {
                let _ = msg_tx.send(message);
            },
        )
        .await
        .unwrap();
    let _ = read_frame(&mut reader).await;

    write_frame(&mut writer, &result_frame(seq_no, "a", "vk")).await;
    let first = recv(&mut msg_rx).await;
    assert_eq!(first.uri, "a");

    client.cancel_subscription(seq_no);
    write_frame(&mut writer, &result_frame(seq_no, "b", "vk")).await;

    // Fence: a response frame proves the dropped result was dispatched.
    let (tx, rx) = oneshot::channel();
    client
        .publish(&PublishRequest::builder("x").build(), move |_| {
            let _ = tx.send(());
        })
        .await
        .unwrap();
    let publish = read_frame(&mut reader).await;
    write_frame(&mut writer, &response_frame(publish.seq_no, "okay", None)).await;
    timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();

    assert!(msg_rx.try_recv().is_err());
}

#[tokio::test]
async fn unknown_sequence_numbers_are_dropped() {
    let (client, mut reader, mut writer) = connect().await;

    // Neither of these has a registered handler.
    write_frame(&mut writer, &response_frame(generate_seq_no(), "okay", None)).await;
    write_frame(&mut writer, &result_frame(generate_seq_no(), "a", "vk")).await;

    // The dispatcher is still alive and delivers the next correlated reply.
    let (tx, rx) = oneshot::channel();
    client
        .publish(&PublishRequest::builder("x").build(), move |response| {
            let _ = tx.send(response);
        })
        .await
        .unwrap();
    let frame = read_frame(&mut reader).await;
    write_frame(&mut writer, &response_frame(frame.seq_no, "okay", None)).await;
    let response = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert!(response.is_okay());
}

#[tokio::test]
async fn unhandled_commands_are_dropped() {
    let (client, mut reader, mut writer) = connect().await;

    write_frame(&mut writer, &Frame::new(Command::List, 7)).await;
    write_frame(&mut writer, &Frame::new(Command::Hello, 8)).await;

    let (tx, rx) = oneshot::channel();
    client
        .publish(&PublishRequest::builder("x").build(), move |response| {
            let _ = tx.send(response);
        })
        .await
        .unwrap();
    let frame = read_frame(&mut reader).await;
    write_frame(&mut writer, &response_frame(frame.seq_no, "okay", None)).await;
    let response = timeout(Duration::from_secs(2), rx).await.unwrap().unwrap();
    assert!(response.is_okay());
}

#[tokio::test]
async fn concurrent_publishes_do_not_interleave() {
    const WORKERS: usize = 8;
    let (client, mut reader, mut writer) = connect().await;
    let client = Arc::new(client);
    let acked = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..WORKERS {
        let client = client.clone();
        let acked = acked.clone();
        tasks.push(tokio::spawn(async move {
            let request = PublishRequest::builder(format!("scratch/{}", i))
                .payload_object(PayloadObject::new(
                    ObjectType::from_number(1).unwrap(),
                    vec![i as u8; 100],
                ))
                .build();
            client
                .publish(&request, move |_| {
                    acked.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Each frame must decode independently; interleaved bytes would fail.
    let mut seq_nos = Vec::new();
    for _ in 0..WORKERS {
        let frame = read_frame(&mut reader).await;
        assert_eq!(frame.command, Command::Publish);
        assert_eq!(frame.payload_objects.len(), 1);
        assert_eq!(frame.payload_objects[0].content().len(), 100);
        seq_nos.push(frame.seq_no);
    }
    seq_nos.sort_unstable();
    seq_nos.dedup();
    assert_eq!(seq_nos.len(), WORKERS);

    for seq_no in &seq_nos {
        write_frame(&mut writer, &response_frame(*seq_no, "okay", None)).await;
    }

    // Fence: once the follow-up response arrives, all acks have fired.
    let (fence_tx, fence_rx) = oneshot::channel();
    client
        .publish(&PublishRequest::builder("fence").build(), move |_| {
            let _ = fence_tx.send(());
        })
        .await
        .unwrap();
    let fence = read_frame(&mut reader).await;
    write_frame(&mut writer, &response_frame(fence.seq_no, "okay", None)).await;
    timeout(Duration::from_secs(2), fence_rx)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(acked.load(Ordering::SeqCst), WORKERS);
}

#[tokio::test]
async fn set_entity_sends_key_payload() {
    let (client, mut reader, _writer) = connect().await;

    client
        .set_entity(Bytes::from_static(b"signing-key-bytes"), |_| {})
        .await
        .unwrap();

    let frame = read_frame(&mut reader).await;
    assert_eq!(frame.command, Command::SetEntity);
    assert_eq!(frame.payload_objects.len(), 1);
    let po = &frame.payload_objects[0];
    assert_eq!(po.object_type().octet(), Some([1, 0, 1, 2]));
    assert_eq!(po.content().as_ref(), b"signing-key-bytes");
}

#[tokio::test]
async fn close_is_idempotent_and_fails_new_requests() {
    let (client, _reader, _writer) = connect().await;

    client.close();
    client.close();

    let result = client
        .publish(&PublishRequest::builder("x").build(), |_| {})
        .await;
    assert!(matches!(result, Err(BosswaveError::ConnectionClosed)));

    timeout(Duration::from_secs(2), client.wait_for_shutdown())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn router_disconnect_is_orderly_shutdown() {
    let (client, reader, writer) = connect().await;
    drop(reader);
    drop(writer);

    timeout(Duration::from_secs(2), client.wait_for_shutdown())
        .await
        .unwrap()
        .unwrap();
}
