// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use ber_sockets_rs::{
    cfg::config::Config,
    codec::Node,
    routing::{Proxy, Router},
    session::{
        Client, Message, Server, SessionInit, X690Transceiver,
    },
};
use serial_test::serial;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Target {
    server: Arc<Server<X690Transceiver>>,
    inbound: mpsc::UnboundedReceiver<Message>,
    closed: Arc<AtomicUsize>,
    addr: String,
}

/// A target endpoint that records inbound messages and, when `reply` is
/// set, answers each one with `Sequence { Integer(reply) }`.
async fn spawn_target(cfg: &Config, reply: Option<i64>) -> Result<Target> {
    let (tx, inbound) = mpsc::unbounded_channel::<Message>();
    let init: SessionInit<X690Transceiver> = Box::new(move |session| {
        let tx = tx.clone();
        let replier = session.clone();
        session
            .events
            .message_received
            .subscribe(move |(_, message): &(u64, Message)| {
                let _ = tx.send(message.clone());
                if let Some(id) = reply {
                    let session = replier.clone();
                    tokio::spawn(async move {
                        let node = Node::sequence().with_child(Node::integer(id));
                        let _ = session.send(&Message::complete(node)).await;
                    });
                }
            });
    });
    let server = Server::bind_with(
        "127.0.0.1:0",
        cfg.clone(),
        X690Transceiver::new(cfg),
        None,
        Some(init),
    )
    .await?;
    let closed = Arc::new(AtomicUsize::new(0));
    {
        let closed = closed.clone();
        server.events.session_closed.subscribe(move |_| {
            closed.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = server.local_addr().to_string();
    Ok(Target {
        server,
        inbound,
        closed,
        addr,
    })
}

fn ping(text: &str) -> Message {
    Message::complete(
        Node::sequence()
            .with_child(Node::integer(1))
            .with_child(Node::text(text)),
    )
}

#[tokio::test]
#[serial]
async fn unicast_goes_to_the_routed_target_only() -> Result<()> {
    let cfg = Config::default();
    let mut target_a = spawn_target(&cfg, None).await?;
    let mut target_b = spawn_target(&cfg, None).await?;

    let router = Router::start(
        "127.0.0.1:0",
        vec![target_a.addr.clone(), target_b.addr.clone()],
        cfg.clone(),
    )
    .await?;
    let addr = router.local_addr().to_string();
    let client = Client::connect(&addr, cfg.clone(), X690Transceiver::new(&cfg)).await?;

    client.send(&ping("to the routed one")).await?;

    let got = timeout(Duration::from_secs(5), target_a.inbound.recv())
        .await?
        .expect("routed target receives");
    assert_eq!(got.id(), 1);

    // the other target stays silent
    sleep(Duration::from_millis(150)).await;
    assert!(target_b.inbound.try_recv().is_err());

    client.close();
    router.close();
    target_a.server.close();
    target_b.server.close();
    Ok(())
}

#[tokio::test]
#[serial]
async fn broadcast_order_follows_route_and_responses_filter() -> Result<()> {
    let cfg = Config::default();
    let mut target_a = spawn_target(&cfg, Some(100)).await?;
    let mut target_b = spawn_target(&cfg, Some(200)).await?;

    let router = Router::start(
        "127.0.0.1:0",
        vec![target_a.addr.clone(), target_b.addr.clone()],
        cfg.clone(),
    )
    .await?;

    let send_order = Arc::new(Mutex::new(Vec::<usize>::new()));
    {
        let send_order = send_order.clone();
        router.set_client_before_send(Box::new(move |message, index| {
            if let Ok(mut order) = send_order.lock() {
                order.push(index);
            }
            Some(message)
        }));
    }

    let other = Arc::new(AtomicUsize::new(0));
    {
        let other = other.clone();
        router
            .events()
            .other_server_message_received
            .subscribe(move |_| {
                other.fetch_add(1, Ordering::SeqCst);
            });
    }

    let addr = router.local_addr().to_string();
    let client = Client::connect(&addr, cfg.clone(), X690Transceiver::new(&cfg)).await?;
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();
    client
        .session
        .events
        .message_received
        .subscribe(move |(_, message): &(u64, Message)| {
            let _ = reply_tx.send(message.clone());
        });

    {
        let router = router.clone();
        wait_until("link wired", move || router.link(1).is_some()).await;
    }
    let link = router.link(1).expect("first common session");
    link.set_broadcast(true);

    client.send(&ping("fan out")).await?;
    timeout(Duration::from_secs(5), target_a.inbound.recv())
        .await?
        .expect("target A got the broadcast");
    timeout(Duration::from_secs(5), target_b.inbound.recv())
        .await?
        .expect("target B got the broadcast");
    {
        let send_order = send_order.clone();
        wait_until("forward order recorded", move || {
            send_order.lock().map(|o| o.len() == 2).unwrap_or(false)
        })
        .await;
    }
    assert_eq!(send_order.lock().expect("order").clone(), vec![0, 1]);

    // only the routed target's response reaches the client
    let reply = timeout(Duration::from_secs(5), reply_rx.recv())
        .await?
        .expect("routed response relayed");
    assert_eq!(reply.id(), 100);
    {
        let other = other.clone();
        wait_until("other-server event", move || {
            other.load(Ordering::SeqCst) == 1
        })
        .await;
    }
    assert!(reply_rx.try_recv().is_err(), "non-routed response must be dropped");

    // reversed order once the route moves off target 0
    link.set_route(1);
    client.send(&ping("fan out again")).await?;
    {
        let send_order = send_order.clone();
        wait_until("second forward recorded", move || {
            send_order.lock().map(|o| o.len() == 4).unwrap_or(false)
        })
        .await;
    }
    assert_eq!(
        send_order.lock().expect("order").clone(),
        vec![0, 1, 1, 0],
        "broadcast walks targets in reverse when route != 0"
    );

    client.close();
    router.close();
    target_a.server.close();
    target_b.server.close();
    Ok(())
}

#[tokio::test]
#[serial]
async fn proxy_relays_and_rewrites_both_directions() -> Result<()> {
    let cfg = Config::default();
    let mut target = spawn_target(&cfg, Some(55)).await?;

    let proxy = Proxy::start("127.0.0.1:0", &target.addr, cfg.clone()).await?;
    proxy.set_client_message_hook(|message| {
        // drop messages without a request id, pass the rest through
        if message.id() < 0 { None } else { Some(message) }
    });
    proxy.set_server_message_hook(|message| {
        let mut node = Node::sequence().with_child(Node::integer(message.id() + 1));
        node.calculate_payload_length();
        Some(Message::complete(node))
    });

    let addr = proxy.local_addr().to_string();
    let client = Client::connect(&addr, cfg.clone(), X690Transceiver::new(&cfg)).await?;
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();
    client
        .session
        .events
        .message_received
        .subscribe(move |(_, message): &(u64, Message)| {
            let _ = reply_tx.send(message.clone());
        });

    // no id: the client hook swallows it before the target sees anything
    client
        .send(&Message::complete(
            Node::sequence().with_child(Node::text("anonymous")),
        ))
        .await?;
    sleep(Duration::from_millis(150)).await;
    assert!(target.inbound.try_recv().is_err());

    client.send(&ping("through the proxy")).await?;
    let got = timeout(Duration::from_secs(5), target.inbound.recv())
        .await?
        .expect("target receives");
    assert_eq!(got.id(), 1);

    let reply = timeout(Duration::from_secs(5), reply_rx.recv())
        .await?
        .expect("rewritten response relayed");
    assert_eq!(reply.id(), 56, "server hook rewrote the response id");

    client.close();
    proxy.close();
    target.server.close();
    Ok(())
}

#[tokio::test]
#[serial]
async fn end_session_propagates_to_both_sides() -> Result<()> {
    let cfg = Config::default();
    let target_a = spawn_target(&cfg, None).await?;
    let target_b = spawn_target(&cfg, None).await?;

    let router = Router::start(
        "127.0.0.1:0",
        vec![target_a.addr.clone(), target_b.addr.clone()],
        cfg.clone(),
    )
    .await?;
    let common_closed = Arc::new(AtomicUsize::new(0));
    {
        let common_closed = common_closed.clone();
        router.server.events.session_closed.subscribe(move |_| {
            common_closed.fetch_add(1, Ordering::SeqCst);
        });
    }

    let addr = router.local_addr().to_string();
    let client = Client::connect(&addr, cfg.clone(), X690Transceiver::new(&cfg)).await?;
    {
        let router = router.clone();
        wait_until("link wired", move || router.link(1).is_some()).await;
    }

    client
        .send(&Message::complete(Node::end_session_marker()))
        .await?;

    {
        let a = target_a.closed.clone();
        wait_until("target A session closed", move || {
            a.load(Ordering::SeqCst) == 1
        })
        .await;
    }
    {
        let b = target_b.closed.clone();
        wait_until("target B session closed", move || {
            b.load(Ordering::SeqCst) == 1
        })
        .await;
    }
    {
        let common_closed = common_closed.clone();
        wait_until("common session closed", move || {
            common_closed.load(Ordering::SeqCst) >= 1
        })
        .await;
    }
    // exactly once, even with both remotes tearing down
    sleep(Duration::from_millis(200)).await;
    assert_eq!(common_closed.load(Ordering::SeqCst), 1);

    router.close();
    target_a.server.close();
    target_b.server.close();
    Ok(())
}
