//! End-to-end session behavior against an in-process scripted broker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use mqttws::test_utils::{BrokerLink, TestConnector};
use mqttws::{
    ConnectError, ConnectionEvent, ConnectionState, MqttSession, QoS, ReconnectConfig,
    SessionError, SessionOptions, SubscriptionStatus,
};

fn test_options() -> SessionOptions {
    SessionOptions::new("test-client")
        .with_keep_alive(Duration::from_secs(60))
        .with_connect_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: Some(5),
            backoff_multiplier: 2.0,
        })
}

fn session_with_broker(options: SessionOptions) -> (MqttSession, mpsc::UnboundedReceiver<BrokerLink>) {
    let (connector, links) = TestConnector::new();
    let session = MqttSession::builder(options).connector(connector).build();
    (session, links)
}

async fn next_link(links: &mut mpsc::UnboundedReceiver<BrokerLink>) -> BrokerLink {
    tokio::time::timeout(Duration::from_secs(5), links.recv())
        .await
        .expect("timed out waiting for connection attempt")
        .expect("connector dropped")
}

async fn connect_served(
    session: &MqttSession,
    links: &mut mpsc::UnboundedReceiver<BrokerLink>,
    session_present: bool,
) {
    let connect = async {
        let mut link = next_link(links).await;
        link.accept_connect(session_present).await;
        link.serve()
    };
    let (result, _broker) = tokio::join!(session.connect("wss://broker.test:443"), connect);
    assert_eq!(result.unwrap().session_present, session_present);
}

#[tokio::test]
async fn test_connect_and_clean_close() {
    let (session, mut links) = session_with_broker(test_options());
    let mut events = session.event_stream();

    connect_served(&session, &mut links, false).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Connected {
            session_present: false
        }
    ));

    session.close().await.unwrap();
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(
        events.recv().await.unwrap(),
        ConnectionEvent::Closed
    ));
}

#[tokio::test]
async fn test_connect_sends_configured_identity() {
    let options = test_options().with_clean_session(false);
    let (session, mut links) = session_with_broker(options);

    let script = async {
        let mut link = next_link(&mut links).await;
        let connect = link.accept_connect(true).await;
        assert_eq!(connect.client_id, "test-client");
        assert!(!connect.clean_session);
        assert_eq!(connect.keep_alive_secs, 60);
        link.serve()
    };
    let (result, _broker) = tokio::join!(session.connect("wss://broker.test:443"), script);
    assert!(result.unwrap().session_present);
}

/// Connects and returns the broker link for packet-by-packet scripting.
async fn connect_manual(
    session: &MqttSession,
    links: &mut mpsc::UnboundedReceiver<BrokerLink>,
) -> BrokerLink {
    let script = async {
        let mut link = next_link(links).await;
        link.accept_connect(false).await;
        link
    };
    let (result, link) = tokio::join!(session.connect("wss://broker.test:443"), script);
    result.unwrap();
    link
}

#[tokio::test]
async fn test_concurrent_subscribes_get_distinct_ids_and_shuffled_acks_resolve() {
    let (session, mut links) = session_with_broker(test_options());
    let mut link = connect_manual(&session, &mut links).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session
                .subscribe(format!("topic/{i}"), QoS::AtLeastOnce, |_| {})
                .await
        }));
    }

    let mut subscribes = Vec::new();
    for _ in 0..4 {
        subscribes.push(link.expect_subscribe().await);
    }
    let mut ids: Vec<u16> = subscribes.iter().map(|s| s.packet_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4, "packet ids must be distinct");

    // Acknowledge in reverse arrival order; each future must still resolve
    // against its own id.
    for subscribe in subscribes.iter().rev() {
        link.grant(subscribe).await;
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), QoS::AtLeastOnce);
    }
    assert_eq!(session.subscriptions().len(), 4);
    assert!(session
        .subscriptions()
        .iter()
        .all(|s| s.status == SubscriptionStatus::Granted));
}

#[tokio::test]
async fn test_subscription_rejection_surfaces_and_removes_callback() {
    let (session, mut links) = session_with_broker(test_options());

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        let subscribe = link.expect_subscribe().await;
        link.send(mqttws::packet::Packet::SubAck(
            mqttws::packet::SubAckPacket::new(
                subscribe.packet_id,
                vec![mqttws::packet::SubAckReturnCode::Failure],
            ),
        ))
        .await;
        link
    };

    let subscribe = async {
        session.connect("wss://broker.test:443").await.unwrap();
        session.subscribe("denied/topic", QoS::AtLeastOnce, |_| {}).await
    };

    let (result, _link) = tokio::join!(subscribe, script);
    assert!(matches!(
        result,
        Err(SessionError::SubscriptionRejected { .. })
    ));
    assert_eq!(
        session.subscriptions()[0].status,
        SubscriptionStatus::Rejected
    );
}

#[tokio::test]
async fn test_qos1_publish_resolves_on_puback() {
    let (session, mut links) = session_with_broker(test_options());
    connect_served(&session, &mut links, false).await;

    session
        .publish_qos("metrics/cpu", b"0.42", QoS::AtLeastOnce)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_inbound_qos1_message_is_acked_then_delivered() {
    let (session, mut links) = session_with_broker(test_options());

    let delivered = Arc::new(AtomicUsize::new(0));
    let delivered_cb = delivered.clone();

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        let subscribe = link.expect_subscribe().await;
        link.grant(&subscribe).await;

        // Deliver a QoS 1 message and wait for the PUBACK.
        let publish = mqttws::packet::PublishPacket::new("sensors/temp", &b"21.5"[..])
            .with_qos(QoS::AtLeastOnce, 99);
        link.send(mqttws::packet::Packet::Publish(publish)).await;
        match link.recv().await {
            mqttws::packet::Packet::PubAck(ack) => assert_eq!(ack.packet_id, 99),
            other => panic!("expected PUBACK, got {:?}", other.packet_type()),
        }
        link
    };

    let flow = async {
        session.connect("wss://broker.test:443").await.unwrap();
        session
            .subscribe("sensors/+", QoS::AtLeastOnce, move |msg| {
                assert_eq!(msg.topic, "sensors/temp");
                assert_eq!(&msg.payload[..], b"21.5");
                delivered_cb.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
    };

    let (_, _link) = tokio::join!(flow, script);

    // The PUBACK was observed above; give the callback dispatch a beat.
    tokio::time::timeout(Duration::from_secs(1), async {
        while delivered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message was never delivered to the callback");
}

#[tokio::test]
async fn test_round_trip_publish_acked_before_echo_delivery() {
    let (session, mut links) = session_with_broker(test_options());
    let link = connect_manual(&session, &mut links).await;

    let publish_acked = Arc::new(AtomicBool::new(false));
    let delivered = Arc::new(AtomicUsize::new(0));
    let (acked_cb, delivered_cb) = (publish_acked.clone(), delivered.clone());

    let script = async {
        let mut link = link;
        let subscribe = link.expect_subscribe().await;
        link.grant(&subscribe).await;
        link
    };
    let subscribe = session.subscribe("loop/topic", QoS::AtLeastOnce, move |msg| {
        assert!(
            acked_cb.load(Ordering::SeqCst),
            "echo delivered before the outbound publish was acknowledged"
        );
        assert_eq!(&msg.payload[..], b"ping");
        delivered_cb.fetch_add(1, Ordering::SeqCst);
    });
    let (granted, mut link) = tokio::join!(subscribe, script);
    assert_eq!(granted.unwrap(), QoS::AtLeastOnce);

    // Publish; the broker acknowledges it before echoing anything back, so
    // the publish future must resolve first.
    let ack_script = async {
        let packet_id = match link.recv().await {
            mqttws::packet::Packet::Publish(publish) => {
                assert_eq!(publish.topic, "loop/topic");
                publish.packet_id.unwrap()
            }
            other => panic!("expected PUBLISH, got {:?}", other.packet_type()),
        };
        link.send(mqttws::packet::Packet::PubAck(
            mqttws::packet::PubAckPacket::new(packet_id),
        ))
        .await;
        link
    };
    let publish = session.publish_qos("loop/topic", b"ping", QoS::AtLeastOnce);
    let (result, mut link) = tokio::join!(publish, ack_script);
    result.unwrap();
    publish_acked.store(true, Ordering::SeqCst);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);

    // Now echo the message back as a fresh QoS 1 delivery.
    let echo = mqttws::packet::PublishPacket::new("loop/topic", &b"ping"[..])
        .with_qos(QoS::AtLeastOnce, 7);
    link.send(mqttws::packet::Packet::Publish(echo)).await;
    match link.recv().await {
        mqttws::packet::Packet::PubAck(ack) => assert_eq!(ack.packet_id, 7),
        other => panic!("expected PUBACK, got {:?}", other.packet_type()),
    }

    tokio::time::timeout(Duration::from_secs(1), async {
        while delivered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("echoed message never reached the callback");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_silent_broker_trips_keep_alive() {
    let options = SessionOptions::new("test-client")
        .with_keep_alive(Duration::from_millis(100))
        .with_connect_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        });
    let (session, mut links) = session_with_broker(options);
    let mut events = session.event_stream();

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        // Swallow the idle-triggered PINGREQ and never answer it.
        assert!(matches!(
            link.recv().await,
            mqttws::packet::Packet::PingReq
        ));
        link
    };
    let (result, _link) = tokio::join!(session.connect("wss://broker.test:443"), script);
    result.unwrap();

    // The grace window elapses without broker activity; with reconnection
    // disabled the session is interrupted and then closed for good.
    let mut saw_interrupted = false;
    let mut saw_closed = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(2), events.recv()).await
    {
        match event {
            ConnectionEvent::Interrupted { .. } => saw_interrupted = true,
            ConnectionEvent::Closed => {
                saw_closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_interrupted);
    assert!(saw_closed);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_cancels_inflight_connect() {
    let (session, mut links) =
        session_with_broker(test_options().with_connect_timeout(Duration::from_secs(5)));

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.connect("wss://broker.test:443").await })
    };
    // Accept the transport but hold the CONNECT unanswered so the attempt
    // stays in flight when close arrives.
    let mut link = next_link(&mut links).await;
    let _connect = link.recv().await;

    session.close().await.unwrap();
    assert!(matches!(
        pending.await.unwrap(),
        Err(SessionError::Connect(ConnectError::Cancelled))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_interruption_resume_replays_pending_subscribe() {
    let (session, mut links) = session_with_broker(test_options().with_clean_session(false));

    // First connection: accept, then let the subscribe hang unacked.
    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        let _ = link.expect_subscribe().await;
        link.interrupt();
    };
    let subscribe = {
        let session = session.clone();
        tokio::spawn(async move {
            session.connect("wss://broker.test:443").await.unwrap();
            session.subscribe("important/+", QoS::AtLeastOnce, |_| {}).await
        })
    };
    script.await;

    let mut events = session.event_stream();

    // Reconnect attempt: the pending SUBSCRIBE must be resent (same filter)
    // and granting it must resolve the original caller.
    let mut link = next_link(&mut links).await;
    link.accept_connect(false).await;
    let replayed = link.expect_subscribe().await;
    assert_eq!(replayed.filters[0].filter, "important/+");
    link.grant(&replayed).await;

    assert_eq!(subscribe.await.unwrap().unwrap(), QoS::AtLeastOnce);

    // The resume must be announced on the event channel.
    let mut saw_resumed = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        if matches!(event, ConnectionEvent::Resumed { .. }) {
            saw_resumed = true;
            break;
        }
    }
    assert!(saw_resumed);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_clean_session_resume_drops_granted_subscriptions() {
    let (session, mut links) = session_with_broker(test_options().with_clean_session(true));

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        let subscribe = link.expect_subscribe().await;
        link.grant(&subscribe).await;
        link
    };
    let flow = async {
        session.connect("wss://broker.test:443").await.unwrap();
        session
            .subscribe("ephemeral/topic", QoS::AtLeastOnce, |_| {})
            .await
            .unwrap();
    };
    let (_, link) = tokio::join!(flow, script);
    assert_eq!(session.subscriptions().len(), 1);

    link.interrupt();

    // Resume; with clean_session the broker state is gone and the client
    // table must not advertise stale subscriptions.
    let mut link = next_link(&mut links).await;
    link.accept_connect(false).await;
    let _broker = link.serve();

    tokio::time::timeout(Duration::from_secs(2), async {
        while session.state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never resumed");

    assert!(session.subscriptions().is_empty());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_persistent_session_resubscribes_when_broker_lost_state() {
    let (session, mut links) = session_with_broker(test_options().with_clean_session(false));

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        let subscribe = link.expect_subscribe().await;
        link.grant(&subscribe).await;
        link
    };
    let flow = async {
        session.connect("wss://broker.test:443").await.unwrap();
        session
            .subscribe("durable/topic", QoS::AtLeastOnce, |_| {})
            .await
            .unwrap();
    };
    let (_, link) = tokio::join!(flow, script);
    link.interrupt();

    // Broker restarts without session state: session_present=false forces
    // the client to reissue its granted subscriptions.
    let mut link = next_link(&mut links).await;
    link.accept_connect(false).await;
    let reissued = link.expect_subscribe().await;
    assert_eq!(reissued.filters[0].filter, "durable/topic");
    link.grant(&reissued).await;

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_connect_returns_to_disconnected() {
    let (connector, _links) = TestConnector::new();
    connector.fail_next(ConnectError::TimeoutExceeded);
    let session = MqttSession::builder(test_options()).connector(connector).build();

    let err = session.connect("wss://broker.test:443").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::TimeoutExceeded)
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // The session is reusable after a failed attempt.
    assert!(matches!(
        session.connect("wss://broker.test:443").await,
        Err(_)
    ));
}

#[tokio::test]
async fn test_connack_timeout_returns_to_disconnected() {
    let (session, mut links) = session_with_broker(
        test_options().with_connect_timeout(Duration::from_millis(50)),
    );

    let script = async {
        // Accept the transport but never answer the CONNECT.
        let mut link = next_link(&mut links).await;
        let _connect = link.recv().await;
        link
    };
    let (result, _link) = tokio::join!(session.connect("wss://broker.test:443"), script);
    assert!(matches!(
        result,
        Err(SessionError::Connect(ConnectError::TimeoutExceeded))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_fails_pending_operations() {
    let (session, mut links) = session_with_broker(test_options());

    let script = async {
        let mut link = next_link(&mut links).await;
        link.accept_connect(false).await;
        link
    };
    let connect = session.connect("wss://broker.test:443");
    let (result, mut link) = tokio::join!(connect, script);
    result.unwrap();

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session.subscribe("never/acked", QoS::AtLeastOnce, |_| {}).await
        })
    };
    // Swallow the SUBSCRIBE without acking; receiving it guarantees the
    // operation is in flight before closing.
    let _ = link.expect_subscribe().await;

    session.close().await.unwrap();
    assert!(matches!(
        pending.await.unwrap(),
        Err(SessionError::Cancelled)
    ));
    drop(link);
}

#[tokio::test]
async fn test_reconnect_exhaustion_drains_pending_and_closes() {
    let options = test_options().with_reconnect(ReconnectConfig {
        enabled: true,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(5),
        max_attempts: Some(2),
        backoff_multiplier: 1.0,
    });
    let (connector, mut links) = TestConnector::new();
    let session = MqttSession::builder(options).connector(connector.clone()).build();
    let mut events = session.event_stream();

    let script = {
        let connector = connector.clone();
        async move {
            let mut link = next_link(&mut links).await;
            link.accept_connect(false).await;
            let _ = link.expect_subscribe().await;
            // Every reconnect attempt fails until the policy gives up. Queued
            // before the interruption so no attempt can slip through.
            connector.fail_next(ConnectError::TcpFailure("down".to_string()));
            connector.fail_next(ConnectError::TcpFailure("down".to_string()));
            link.interrupt();
        }
    };
    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session.connect("wss://broker.test:443").await.unwrap();
            session.subscribe("a/b", QoS::AtLeastOnce, |_| {}).await
        })
    };
    script.await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(SessionError::ReconnectExhausted { attempts: 2 })
    ));

    let mut saw_closed = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        if matches!(event, ConnectionEvent::Closed) {
            saw_closed = true;
            break;
        }
    }
    assert!(saw_closed);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unsubscribe_removes_subscription() {
    let (session, mut links) = session_with_broker(test_options());
    connect_served(&session, &mut links, false).await;

    session
        .subscribe("remove/me", QoS::AtLeastOnce, |_| {})
        .await
        .unwrap();
    assert_eq!(session.subscriptions().len(), 1);

    session.unsubscribe("remove/me").await.unwrap();
    assert!(session.subscriptions().is_empty());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_second_connect_while_connected_is_rejected() {
    let (session, mut links) = session_with_broker(test_options());
    connect_served(&session, &mut links, false).await;

    assert!(matches!(
        session.connect("wss://broker.test:443").await,
        Err(SessionError::AlreadyConnected)
    ));
    session.close().await.unwrap();
}
