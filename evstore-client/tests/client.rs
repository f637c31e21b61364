mod common;

use common::{config, connect, indexed, record, FakeServer};
use evstore_client::{
    CatchUpSettings, Client, ClientError, ConnectionConfig, DropReason, EventData,
    EventReadStatus, ExpectedVersion, NakAction, ReadDirection, RetryPolicy, SliceReadStatus,
    SubscriptionState,
};
use evstore_protocol::message::{
    self, ConnectToPersistentSubscription, MasterInfo, NotHandledReason,
    PersistentSubscriptionConfirmation, PersistentSubscriptionNakEvents,
    PersistentSubscriptionStreamEventAppeared, ReadEvent, ReadEventCompleted, ReadStreamEvents,
    ReadStreamEventsCompleted, StreamEventAppeared, SubscribeToStream, SubscriptionConfirmation,
    WriteEvents, WriteEventsCompleted,
};
use evstore_protocol::{Frame, TcpCommand};
use prost::Message as _;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use uuid::Uuid;

fn slice(
    events: Vec<message::ResolvedIndexedEvent>,
    next: i64,
    last: i64,
    end: bool,
) -> ReadStreamEventsCompleted {
    ReadStreamEventsCompleted {
        events,
        result: 0,
        next_event_number: next,
        last_event_number: last,
        is_end_of_stream: end,
        last_commit_position: 1_000,
        error: None,
    }
}

fn live_event(stream: &str, number: i64) -> StreamEventAppeared {
    StreamEventAppeared {
        event: message::ResolvedEvent {
            event: Some(record(stream, number)),
            link: None,
            commit_position: 1_000 + number,
            prepare_position: 1_000 + number,
        },
    }
}

fn write_completed(result: i32, current_version: Option<i64>) -> WriteEventsCompleted {
    WriteEventsCompleted {
        result,
        message: None,
        first_event_number: 0,
        last_event_number: 0,
        prepare_position: Some(10),
        commit_position: Some(10),
        current_version,
    }
}

#[tokio::test]
async fn test_paginated_read_follows_next_event_number() {
    let (client, mut server) = connect(config()).await;

    let reader = client.clone();
    let read = tokio::spawn(async move {
        reader
            .read_stream_events("orders-1", 0, 20, ReadDirection::Forward, false, None)
            .await
    });

    let first = server.expect(TcpCommand::ReadStreamEventsForward).await;
    let request: ReadStreamEvents = first.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "orders-1");
    assert_eq!(request.from_event_number, 0);
    assert_eq!(request.max_count, 20);
    let page = (0..5).map(|n| indexed("orders-1", n)).collect();
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            first.correlation_id,
            &slice(page, 5, 9, false),
        )
        .await;

    let second = server.expect(TcpCommand::ReadStreamEventsForward).await;
    assert_ne!(second.correlation_id, first.correlation_id);
    let request: ReadStreamEvents = second.decode_payload().unwrap();
    assert_eq!(request.from_event_number, 5);
    assert_eq!(request.max_count, 15);
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            second.correlation_id,
            &slice(Vec::new(), 5, 4, true),
        )
        .await;

    let result = assert_ok!(read.await.unwrap());
    assert_eq!(result.status, SliceReadStatus::Success);
    assert_eq!(result.from_event_number, 0);
    assert_eq!(result.events.len(), 5);
    assert!(result.is_end_of_stream);
    let numbers: Vec<i64> = result
        .events
        .iter()
        .filter_map(|e| e.original_event_number())
        .collect();
    assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_read_missing_stream() {
    let (client, mut server) = connect(config()).await;

    let reader = client.clone();
    let read = tokio::spawn(async move {
        reader
            .read_stream_events("orders-9", 0, 100, ReadDirection::Forward, false, None)
            .await
    });

    let frame = server.expect(TcpCommand::ReadStreamEventsForward).await;
    let mut completed = slice(Vec::new(), -1, -1, true);
    completed.result = 1;
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            frame.correlation_id,
            &completed,
        )
        .await;

    let result = read.await.unwrap().unwrap();
    assert_eq!(result.status, SliceReadStatus::StreamNotFound);
    assert!(result.events.is_empty());
}

#[tokio::test]
async fn test_read_rejects_zero_count() {
    let (client, _server) = connect(config()).await;
    let result = client
        .read_stream_events("orders-1", 0, 0, ReadDirection::Forward, false, None)
        .await;
    assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_wrong_expected_version_is_not_retried() {
    let (client, mut server) = connect(config().with_retry_policy(RetryPolicy::no_retries())).await;

    let writer = client.clone();
    let append = tokio::spawn(async move {
        let event = EventData::binary("OrderPlaced", b"{}".to_vec());
        writer
            .append_to_stream("orders-1", ExpectedVersion::Exact(5), &[event], None)
            .await
    });

    let frame = server.expect(TcpCommand::WriteEvents).await;
    let request: WriteEvents = frame.decode_payload().unwrap();
    assert_eq!(request.expected_version, 5);
    assert_eq!(request.events.len(), 1);
    server
        .reply(
            TcpCommand::WriteEventsCompleted,
            frame.correlation_id,
            &write_completed(4, Some(7)),
        )
        .await;

    match append.await.unwrap() {
        Err(ClientError::WrongExpectedVersion {
            stream,
            expected,
            current,
        }) => {
            assert_eq!(stream, "orders-1");
            assert_eq!(expected, 5);
            assert_eq!(current, Some(7));
        }
        other => panic!("expected WrongExpectedVersion, got {:?}", other),
    }

    // Nothing else was sent for the failed write.
    let pinger = client.clone();
    let ping = tokio::spawn(async move { pinger.ping().await });
    let frame = server.expect(TcpCommand::Ping).await;
    server
        .send(Frame::empty(TcpCommand::Pong, frame.correlation_id))
        .await;
    ping.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_bound() {
    let policy = RetryPolicy::new(Some(2), Duration::from_millis(5), Duration::from_millis(5));
    let (client, mut server) = connect(config().with_retry_policy(policy)).await;

    let writer = client.clone();
    let append = tokio::spawn(async move {
        let event = EventData::binary("OrderPlaced", b"{}".to_vec());
        writer
            .append_to_stream("orders-1", ExpectedVersion::Any, &[event], None)
            .await
    });

    let mut correlation_id = None;
    for _ in 0..3 {
        let frame = server.expect(TcpCommand::WriteEvents).await;
        let id = *correlation_id.get_or_insert(frame.correlation_id);
        assert_eq!(frame.correlation_id, id, "retries reuse the correlation id");
        server
            .reply(
                TcpCommand::WriteEventsCompleted,
                frame.correlation_id,
                &write_completed(1, None),
            )
            .await;
    }

    let err = append.await.unwrap().unwrap_err();
    assert!(
        matches!(err, ClientError::RetriesExhausted { attempts: 3, .. }),
        "expected RetriesExhausted, got {:?}",
        err
    );
    assert!(err.is_timeout());
    assert_eq!(client.connection().pending_count(), 0);
}

#[tokio::test]
async fn test_replies_are_routed_by_correlation_id() {
    let (client, mut server) = connect(config()).await;

    let mut reads = Vec::new();
    for stream in ["alpha", "beta"] {
        let reader = client.clone();
        reads.push(tokio::spawn(async move {
            reader.read_event(stream, 3, false, None).await
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..2 {
        let frame = server.expect(TcpCommand::ReadEvent).await;
        let request: ReadEvent = frame.decode_payload().unwrap();
        requests.push((frame.correlation_id, request.event_stream_id));
    }

    // Answer in reverse order.
    for (id, stream) in requests.into_iter().rev() {
        server
            .reply(
                TcpCommand::ReadEventCompleted,
                id,
                &ReadEventCompleted {
                    result: 0,
                    event: indexed(&stream, 3),
                    error: None,
                },
            )
            .await;
    }

    for (read, stream) in reads.into_iter().zip(["alpha", "beta"]) {
        let result = read.await.unwrap().unwrap();
        assert_eq!(result.status, EventReadStatus::Success);
        assert_eq!(result.stream, stream);
        assert_eq!(
            result.event.as_ref().and_then(|e| e.original_stream_id()),
            Some(stream)
        );
    }
}

#[tokio::test]
async fn test_volatile_subscription_lifecycle() {
    let (client, mut server) = connect(config()).await;

    let subscriber = client.clone();
    let subscribe =
        tokio::spawn(async move { subscriber.subscribe_to_stream("orders-1", true, None).await });

    let frame = server.expect(TcpCommand::SubscribeToStream).await;
    let id = frame.correlation_id;
    let request: SubscribeToStream = frame.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "orders-1");
    assert!(request.resolve_link_tos);
    server
        .reply(
            TcpCommand::SubscriptionConfirmation,
            id,
            &SubscriptionConfirmation {
                last_commit_position: 1_004,
                last_event_number: Some(4),
            },
        )
        .await;

    let mut subscription = subscribe.await.unwrap().unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Live);
    assert_eq!(subscription.last_event_number(), Some(4));
    assert_eq!(subscription.last_commit_position(), 1_004);

    for n in 5..8 {
        server
            .reply(TcpCommand::StreamEventAppeared, id, &live_event("orders-1", n))
            .await;
    }
    for n in 5..8 {
        let event = subscription.next().await.unwrap();
        assert_eq!(event.original_event_number(), Some(n));
        assert!(event.position.is_some());
    }

    subscription.unsubscribe().await.unwrap();
    assert_eq!(subscription.state(), SubscriptionState::Live);
    let unsubscribe = server.expect(TcpCommand::UnsubscribeFromStream).await;
    assert_eq!(unsubscribe.correlation_id, id);
    server
        .reply(
            TcpCommand::SubscriptionDropped,
            id,
            &message::SubscriptionDropped { reason: Some(0) },
        )
        .await;

    let dropped = subscription.dropped().await;
    assert_eq!(dropped.reason, DropReason::Unsubscribed);
    assert!(dropped.error.is_none());
}

#[tokio::test]
async fn test_subscription_denied_before_confirmation() {
    let (client, mut server) = connect(config()).await;

    let subscriber = client.clone();
    let subscribe =
        tokio::spawn(async move { subscriber.subscribe_to_stream("$secret", false, None).await });

    let frame = server.expect(TcpCommand::SubscribeToStream).await;
    server
        .reply(
            TcpCommand::SubscriptionDropped,
            frame.correlation_id,
            &message::SubscriptionDropped { reason: Some(1) },
        )
        .await;

    let err = match subscribe.await.unwrap() {
        Err(err) => err,
        Ok(_) => panic!("subscription should not be confirmed"),
    };
    assert!(matches!(
        err,
        ClientError::SubscriptionDropped(DropReason::AccessDenied)
    ));
    assert!(err.to_string().contains("access denied"));
}

#[tokio::test]
async fn test_persistent_nack_batches_ids() {
    let (client, mut server) = connect(config()).await;

    let subscriber = client.clone();
    let connect = tokio::spawn(async move {
        subscriber
            .connect_to_persistent_subscription("invoices", "billing", 10, None)
            .await
    });

    let frame = server
        .expect(TcpCommand::ConnectToPersistentSubscription)
        .await;
    let id = frame.correlation_id;
    let request: ConnectToPersistentSubscription = frame.decode_payload().unwrap();
    assert_eq!(request.subscription_id, "billing");
    assert_eq!(request.event_stream_id, "invoices");
    assert_eq!(request.allowed_in_flight_messages, 10);
    server
        .reply(
            TcpCommand::PersistentSubscriptionConfirmation,
            id,
            &PersistentSubscriptionConfirmation {
                last_commit_position: 2_000,
                subscription_id: "invoices::billing".to_string(),
                last_event_number: Some(1),
            },
        )
        .await;
    let mut subscription = connect.await.unwrap().unwrap();
    assert_eq!(subscription.subscription_id(), "invoices::billing");

    for n in 0..2 {
        server
            .reply(
                TcpCommand::PersistentSubscriptionStreamEventAppeared,
                id,
                &PersistentSubscriptionStreamEventAppeared {
                    event: indexed("invoices", n),
                    retry_count: Some(n as i32),
                },
            )
            .await;
    }

    let mut ids = Vec::new();
    for n in 0..2 {
        let event = subscription.next().await.unwrap();
        assert_eq!(event.retry_count, n);
        ids.push(event.event.ack_id().unwrap());
    }
    subscription
        .fail(&ids, NakAction::Retry, "downstream unavailable")
        .await
        .unwrap();

    let nak = server
        .expect(TcpCommand::PersistentSubscriptionNakEvents)
        .await;
    assert_eq!(nak.correlation_id, id);
    let nak: PersistentSubscriptionNakEvents = nak.decode_payload().unwrap();
    assert_eq!(nak.subscription_id, "invoices::billing");
    assert_eq!(nak.action, NakAction::Retry as i32);
    assert_eq!(nak.message.as_deref(), Some("downstream unavailable"));
    let nak_ids: Vec<Uuid> = nak
        .processed_event_ids
        .iter()
        .map(|raw| Uuid::from_slice(raw).unwrap())
        .collect();
    assert_eq!(nak_ids, ids);
}

#[tokio::test]
async fn test_catch_up_skips_events_already_delivered() {
    let (client, mut server) = connect(config()).await;

    let settings = CatchUpSettings {
        read_batch_size: 2,
        ..CatchUpSettings::default()
    };
    let mut subscription = client.subscribe_to_stream_from("orders-1", Some(1), settings, None);
    assert_eq!(subscription.state(), SubscriptionState::Unconfirmed);

    let frame = server.expect(TcpCommand::ReadStreamEventsForward).await;
    let request: ReadStreamEvents = frame.decode_payload().unwrap();
    assert_eq!(request.from_event_number, 2);
    assert_eq!(request.max_count, 2);
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            frame.correlation_id,
            &slice(vec![indexed("orders-1", 2), indexed("orders-1", 3)], 4, 4, false),
        )
        .await;

    let frame = server.expect(TcpCommand::ReadStreamEventsForward).await;
    let request: ReadStreamEvents = frame.decode_payload().unwrap();
    assert_eq!(request.from_event_number, 4);
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            frame.correlation_id,
            &slice(vec![indexed("orders-1", 4)], 5, 4, true),
        )
        .await;

    let frame = server.expect(TcpCommand::SubscribeToStream).await;
    let subscription_id = frame.correlation_id;
    server
        .reply(
            TcpCommand::SubscriptionConfirmation,
            subscription_id,
            &SubscriptionConfirmation {
                last_commit_position: 1_005,
                last_event_number: Some(5),
            },
        )
        .await;

    // Event 5 was appended while the subscription was being set up.
    let frame = server.expect(TcpCommand::ReadStreamEventsForward).await;
    let request: ReadStreamEvents = frame.decode_payload().unwrap();
    assert_eq!(request.from_event_number, 5);
    server
        .reply(
            TcpCommand::ReadStreamEventsForwardCompleted,
            frame.correlation_id,
            &slice(vec![indexed("orders-1", 5)], 6, 5, true),
        )
        .await;

    for n in [5, 6] {
        server
            .reply(
                TcpCommand::StreamEventAppeared,
                subscription_id,
                &live_event("orders-1", n),
            )
            .await;
    }

    let mut numbers = Vec::new();
    for _ in 0..5 {
        let event = subscription.next().await.unwrap();
        numbers.push(event.original_event_number().unwrap());
    }
    assert_eq!(numbers, vec![2, 3, 4, 5, 6]);
    assert_eq!(subscription.state(), SubscriptionState::Live);

    subscription.stop();
    let unsubscribe = server.expect(TcpCommand::UnsubscribeFromStream).await;
    assert_eq!(unsubscribe.correlation_id, subscription_id);

    let dropped = subscription.dropped().await;
    assert_eq!(dropped.reason, DropReason::Unsubscribed);
}

#[tokio::test]
async fn test_server_heartbeat_is_answered() {
    let (_client, mut server) = connect(config()).await;

    let id = Uuid::new_v4();
    server
        .send(Frame::empty(TcpCommand::HeartbeatRequest, id))
        .await;
    let response = server.recv_any().await;
    assert_eq!(response.command, TcpCommand::HeartbeatResponse);
    assert_eq!(response.correlation_id, id);

    let id = Uuid::new_v4();
    server.send(Frame::empty(TcpCommand::Ping, id)).await;
    let pong = server.recv_any().await;
    assert_eq!(pong.command, TcpCommand::Pong);
    assert_eq!(pong.correlation_id, id);
}

#[tokio::test]
async fn test_idle_connection_sends_heartbeat() {
    let config = config().with_heartbeat(Duration::from_millis(50), Duration::from_secs(5));
    let (client, mut server) = connect(config).await;

    let request = server.recv_any().await;
    assert_eq!(request.command, TcpCommand::HeartbeatRequest);
    server
        .send(Frame::empty(
            TcpCommand::HeartbeatResponse,
            request.correlation_id,
        ))
        .await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_close_fails_pending_operations() {
    let (client, mut server) = connect(config()).await;

    let pinger = client.clone();
    let ping = tokio::spawn(async move { pinger.ping().await });
    server.expect(TcpCommand::Ping).await;

    client.close().await.unwrap();
    assert!(matches!(
        ping.await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_not_handled_without_master_is_retried() {
    let policy = RetryPolicy::new(Some(3), Duration::from_millis(5), Duration::from_millis(5));
    let (client, mut server) = connect(config().with_retry_policy(policy)).await;

    let reader = client.clone();
    let read = tokio::spawn(async move { reader.read_event("orders-1", 0, false, None).await });

    let frame = server.expect(TcpCommand::ReadEvent).await;
    server
        .reply(
            TcpCommand::NotHandled,
            frame.correlation_id,
            &message::NotHandled {
                reason: 1,
                additional_info: None,
            },
        )
        .await;

    let frame = server.expect(TcpCommand::ReadEvent).await;
    server
        .reply(
            TcpCommand::ReadEventCompleted,
            frame.correlation_id,
            &ReadEventCompleted {
                result: 1,
                event: message::ResolvedIndexedEvent {
                    event: None,
                    link: None,
                },
                error: None,
            },
        )
        .await;

    let result = read.await.unwrap().unwrap();
    assert_eq!(result.status, EventReadStatus::NotFound);
    assert!(result.event.is_none());
}

#[tokio::test]
async fn test_transaction_is_unusable_after_commit() {
    let (client, mut server) = connect(config()).await;

    let writer = client.clone();
    let session = tokio::spawn(async move {
        let mut transaction = writer
            .start_transaction("orders-1", ExpectedVersion::Exact(2), None)
            .await?;
        let event = EventData::binary("OrderShipped", b"{}".to_vec());
        transaction.write(&[event.clone()]).await?;
        let committed = transaction.commit().await?;
        let after = transaction.write(&[event]).await;
        Ok::<_, ClientError>((committed, after))
    });

    let start = server.expect(TcpCommand::TransactionStart).await;
    let request: message::TransactionStart = start.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "orders-1");
    assert_eq!(request.expected_version, 2);
    server
        .reply(
            TcpCommand::TransactionStartCompleted,
            start.correlation_id,
            &message::TransactionStartCompleted {
                transaction_id: 42,
                result: 0,
                message: None,
            },
        )
        .await;

    let write = server.expect(TcpCommand::TransactionWrite).await;
    let request: message::TransactionWrite = write.decode_payload().unwrap();
    assert_eq!(request.transaction_id, 42);
    assert_eq!(request.events.len(), 1);
    server
        .reply(
            TcpCommand::TransactionWriteCompleted,
            write.correlation_id,
            &message::TransactionWriteCompleted {
                transaction_id: 42,
                result: 0,
                message: None,
            },
        )
        .await;

    let commit = server.expect(TcpCommand::TransactionCommit).await;
    let request: message::TransactionCommit = commit.decode_payload().unwrap();
    assert_eq!(request.transaction_id, 42);
    server
        .reply(
            TcpCommand::TransactionCommitCompleted,
            commit.correlation_id,
            &message::TransactionCommitCompleted {
                transaction_id: 42,
                result: 0,
                message: None,
                first_event_number: 3,
                last_event_number: 3,
                prepare_position: Some(20),
                commit_position: Some(20),
            },
        )
        .await;

    let (committed, after) = session.await.unwrap().unwrap();
    assert_eq!(committed.next_expected_version, 3);
    assert!(matches!(after, Err(ClientError::TransactionCompleted(42))));
}

#[tokio::test]
async fn test_stream_metadata_lives_in_metastream() {
    let (client, mut server) = connect(config()).await;

    let metadata = evstore_client::StreamMetadata::new().with_max_count(50);
    let setter = client.clone();
    let set = tokio::spawn(async move {
        setter
            .set_stream_metadata("orders-1", ExpectedVersion::Any, &metadata, None)
            .await
    });

    let frame = server.expect(TcpCommand::WriteEvents).await;
    let request: WriteEvents = frame.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "$$orders-1");
    assert_eq!(request.events[0].event_type, "$metadata");
    let stored = request.events[0].data.clone();
    server
        .reply(
            TcpCommand::WriteEventsCompleted,
            frame.correlation_id,
            &write_completed(0, None),
        )
        .await;
    set.await.unwrap().unwrap();

    let getter = client.clone();
    let get = tokio::spawn(async move { getter.get_stream_metadata("orders-1", None).await });

    let frame = server.expect(TcpCommand::ReadEvent).await;
    let request: ReadEvent = frame.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "$$orders-1");
    assert_eq!(request.event_number, -1);
    let mut event = record("$$orders-1", 0);
    event.event_type = "$metadata".to_string();
    event.data = stored;
    server
        .reply(
            TcpCommand::ReadEventCompleted,
            frame.correlation_id,
            &ReadEventCompleted {
                result: 0,
                event: message::ResolvedIndexedEvent {
                    event: Some(event),
                    link: None,
                },
                error: None,
            },
        )
        .await;

    let result = get.await.unwrap().unwrap();
    assert!(!result.is_stream_deleted);
    assert_eq!(result.metastream_version, 0);
    assert_eq!(result.metadata.max_count, Some(50));
}

#[tokio::test]
async fn test_dropping_volatile_subscription_unsubscribes() {
    let (client, mut server) = connect(config()).await;

    let subscriber = client.clone();
    let subscribe =
        tokio::spawn(async move { subscriber.subscribe_to_stream("orders-1", false, None).await });
    let id = server.expect(TcpCommand::SubscribeToStream).await.correlation_id;
    server
        .reply(
            TcpCommand::SubscriptionConfirmation,
            id,
            &SubscriptionConfirmation {
                last_commit_position: 100,
                last_event_number: Some(0),
            },
        )
        .await;
    let subscription = subscribe.await.unwrap().unwrap();
    assert_eq!(client.connection().pending_count(), 1);

    drop(subscription);
    assert_eq!(client.connection().pending_count(), 0);
    let unsubscribe = server.expect(TcpCommand::UnsubscribeFromStream).await;
    assert_eq!(unsubscribe.correlation_id, id);
}

#[tokio::test]
async fn test_dropping_persistent_subscription_unsubscribes() {
    let (client, mut server) = connect(config()).await;

    let subscriber = client.clone();
    let connect = tokio::spawn(async move {
        subscriber
            .connect_to_persistent_subscription("invoices", "billing", 10, None)
            .await
    });
    let id = server
        .expect(TcpCommand::ConnectToPersistentSubscription)
        .await
        .correlation_id;
    server
        .reply(
            TcpCommand::PersistentSubscriptionConfirmation,
            id,
            &PersistentSubscriptionConfirmation {
                last_commit_position: 2_000,
                subscription_id: "invoices::billing".to_string(),
                last_event_number: None,
            },
        )
        .await;
    let subscription = connect.await.unwrap().unwrap();

    drop(subscription);
    assert_eq!(client.connection().pending_count(), 0);
    let unsubscribe = server.expect(TcpCommand::UnsubscribeFromStream).await;
    assert_eq!(unsubscribe.correlation_id, id);
}

#[tokio::test]
async fn test_reply_ahead_of_corrupt_frame_is_delivered() {
    let (client, mut server) = connect(config()).await;

    let pinger = client.clone();
    let ping = tokio::spawn(async move { pinger.ping().await });
    let id = server.expect(TcpCommand::Ping).await.correlation_id;

    let mut chunk = Frame::empty(TcpCommand::Pong, id).encode().unwrap().to_vec();
    let mut corrupt = Frame::empty(TcpCommand::HeartbeatRequest, Uuid::new_v4())
        .encode()
        .unwrap()
        .to_vec();
    corrupt[4] = 0x7E;
    chunk.extend(corrupt);
    server.send_bytes(&chunk).await;

    assert_ok!(ping.await.unwrap());
}

fn tcp_config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr)
        .with_operation_timeout(Duration::from_secs(5))
        .with_heartbeat(Duration::from_secs(60), Duration::from_secs(60))
        .with_reconnection(2, Duration::from_millis(10))
}

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

#[tokio::test]
async fn test_not_master_redirects_and_resends() {
    let (slave, slave_addr) = listen().await;
    let (master, master_addr) = listen().await;

    let client = Client::new(tcp_config(slave_addr));
    let (connected, mut slave_server) = tokio::join!(client.connect(), FakeServer::accept(&slave));
    assert_ok!(connected);

    let reader = client.clone();
    let read = tokio::spawn(async move { reader.read_event("orders-1", 0, false, None).await });

    let id = slave_server.expect(TcpCommand::ReadEvent).await.correlation_id;
    let info = MasterInfo {
        external_tcp_address: "127.0.0.1".to_string(),
        external_tcp_port: i32::from(master_addr.port()),
        external_http_address: "127.0.0.1".to_string(),
        external_http_port: 2113,
        external_secure_tcp_address: None,
        external_secure_tcp_port: None,
    };
    slave_server
        .reply(
            TcpCommand::NotHandled,
            id,
            &message::NotHandled {
                reason: NotHandledReason::NotMaster as i32,
                additional_info: Some(info.encode_to_vec()),
            },
        )
        .await;

    let mut master_server = FakeServer::accept(&master).await;
    let resent = master_server.expect(TcpCommand::ReadEvent).await;
    assert_eq!(resent.correlation_id, id);
    let request: ReadEvent = resent.decode_payload().unwrap();
    assert_eq!(request.event_stream_id, "orders-1");
    master_server
        .reply(
            TcpCommand::ReadEventCompleted,
            id,
            &ReadEventCompleted {
                result: 1,
                event: message::ResolvedIndexedEvent {
                    event: None,
                    link: None,
                },
                error: None,
            },
        )
        .await;

    let result = read.await.unwrap().unwrap();
    assert_eq!(result.status, EventReadStatus::NotFound);
    assert_eq!(client.connection().endpoint(), master_addr);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_reconnect_gives_up_and_fails_pending() {
    let (listener, addr) = listen().await;

    let client = Client::new(tcp_config(addr));
    let (connected, mut server) = tokio::join!(client.connect(), FakeServer::accept(&listener));
    assert_ok!(connected);

    let pinger = client.clone();
    let ping = tokio::spawn(async move { pinger.ping().await });
    server.expect(TcpCommand::Ping).await;

    drop(server);
    drop(listener);

    assert!(matches!(
        ping.await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
    assert_eq!(client.connection().pending_count(), 0);
    assert!(!client.is_connected());
}
