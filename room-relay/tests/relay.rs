use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use room_relay::{
    config::RelayConfig,
    message::{
        ClientEvent, ExistRequest, LineReader, PostNotice, PostRequest, PresenceNotice,
        PresenceRequest, ServerEvent, write_frame, write_message,
    },
    server::RelayServer,
};
use serde_json::json;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(1);

type Reader = LineReader<BufReader<OwnedReadHalf>>;

#[tokio::test]
async fn enter_publish_exit_round_trip() -> Result<()> {
    let (addr, shutdown_tx, server) = start_relay().await?;

    let (mut alice_reader, mut alice_writer) = connect(addr).await?;
    let (mut bob_reader, mut bob_writer) = connect(addr).await?;

    write_message(&mut bob_writer, &enter("bob", "bob joined")).await?;
    assert_eq!(
        next_event(&mut bob_reader).await?,
        presence_enter("bob", "bob joined")
    );

    write_message(&mut alice_writer, &enter("alice", "joined")).await?;
    assert_eq!(
        next_event(&mut alice_reader).await?,
        presence_enter("alice", "joined")
    );
    assert_eq!(
        next_event(&mut bob_reader).await?,
        presence_enter("alice", "joined")
    );

    write_message(
        &mut bob_writer,
        &ClientEvent::Publish(PostRequest {
            room_id: "r1".into(),
            user_name: Some("bob".into()),
            message: Some("hello alice".into()),
            date: Some("2024/05/01 10:00".into()),
            event_type: Some("publish".into()),
        }),
    )
    .await?;
    let post = ServerEvent::Publish(PostNotice {
        user_name: Some("bob".into()),
        message: Some("hello alice".into()),
        date: Some("2024/05/01 10:00".into()),
        event_type: Some("publish".into()),
    });
    assert_eq!(next_event(&mut alice_reader).await?, post);
    assert_eq!(next_event(&mut bob_reader).await?, post);

    write_message(
        &mut alice_writer,
        &ClientEvent::Exit(PresenceRequest {
            room_id: "r1".into(),
            user_name: Some("alice".into()),
            message: Some("joined".into()),
            event_type: Some("enter".into()),
        }),
    )
    .await?;
    let exit = ServerEvent::Exit(PresenceNotice {
        user_name: Some("alice".into()),
        message: Some("joined".into()),
        event_type: Some("enter".into()),
    });
    assert_eq!(next_event(&mut alice_reader).await?, exit);
    assert_eq!(next_event(&mut bob_reader).await?, exit);

    write_message(
        &mut bob_writer,
        &ClientEvent::PublishExist(ExistRequest {
            room_id: "r1".into(),
            message: json!("bob"),
        }),
    )
    .await?;
    assert_eq!(
        next_event(&mut bob_reader).await?,
        ServerEvent::PublishExist(json!("bob"))
    );
    assert!(
        timeout(Duration::from_millis(200), alice_reader.next_frame())
            .await
            .is_err(),
        "alice left r1 and must not receive further room traffic"
    );

    alice_writer.shutdown().await?;
    bob_writer.shutdown().await?;
    drop(alice_reader);
    drop(bob_reader);

    let _ = shutdown_tx.send(());
    let _ = server.await;

    Ok(())
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_session() -> Result<()> {
    let (addr, shutdown_tx, server) = start_relay().await?;
    let (mut reader, mut writer) = connect(addr).await?;

    write_frame(&mut writer, "this is not json").await?;
    write_frame(&mut writer, r#"{"event":"danceEvent","data":{"roomId":"r1"}}"#).await?;
    write_message(&mut writer, &enter("alice", "still here")).await?;

    assert_eq!(
        next_event(&mut reader).await?,
        presence_enter("alice", "still here")
    );

    writer.shutdown().await?;
    drop(reader);
    let _ = shutdown_tx.send(());
    let _ = server.await;

    Ok(())
}

#[tokio::test]
async fn disconnect_removes_member_from_rooms() -> Result<()> {
    let server = RelayServer::bind(&RelayConfig::ephemeral()).await?;
    let addr = server.tcp_addr()?;
    let hub = server.hub();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = server
            .run_until(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    let (mut reader, mut writer) = connect(addr).await?;
    write_message(&mut writer, &enter("alice", "joined")).await?;
    next_event(&mut reader).await?;
    assert_eq!(hub.member_count(&"r1".into()).await, 1);

    writer.shutdown().await?;
    drop(reader);

    timeout(Duration::from_secs(1), async {
        while hub.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    assert_eq!(hub.room_count().await, 0);

    let _ = shutdown_tx.send(());
    let _ = handle.await;

    Ok(())
}

async fn start_relay() -> Result<(SocketAddr, oneshot::Sender<()>, JoinHandle<()>)> {
    let server = RelayServer::bind(&RelayConfig::ephemeral()).await?;
    let addr = server.tcp_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = server.run_until(shutdown).await;
    });

    Ok((addr, shutdown_tx, handle))
}

async fn connect(addr: SocketAddr) -> Result<(Reader, OwnedWriteHalf)> {
    let stream = TcpStream::connect(addr).await?;
    let (reader, writer) = stream.into_split();
    Ok((LineReader::new(BufReader::new(reader)), writer))
}

async fn next_event(reader: &mut Reader) -> Result<ServerEvent> {
    let event = timeout(READ_TIMEOUT, reader.read_message::<ServerEvent>())
        .await??
        .expect("relay closed the connection");
    Ok(event)
}

fn enter(user: &str, message: &str) -> ClientEvent {
    ClientEvent::Enter(PresenceRequest {
        room_id: "r1".into(),
        user_name: Some(user.into()),
        message: Some(message.into()),
        event_type: Some("enter".into()),
    })
}

fn presence_enter(user: &str, message: &str) -> ServerEvent {
    ServerEvent::Enter(PresenceNotice {
        user_name: Some(user.into()),
        message: Some(message.into()),
        event_type: Some("enter".into()),
    })
}
