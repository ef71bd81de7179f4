//! Director trees in different "processes" joined over the in-memory
//! transport.

use std::time::Duration;

use arcmesh_director::{
    Director, DirectorConfig, DirectorServer, PumpConfig, connect_upstream, spawn_pump_loop,
};
use arcmesh_protocol::{BusMessage, Channel, Message, decode_batch};
use arcmesh_transport::{Connection, MemoryTransport, memory_pair};

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_messages_cross_the_link_both_ways() {
    let server_root = Director::root(DirectorConfig::default());
    let server_loop = spawn_pump_loop(server_root.clone(), PumpConfig::host());
    let (transport, connector) = MemoryTransport::new();
    let server = DirectorServer::new(server_root.clone());
    tokio::spawn(async move { server.serve(transport).await });

    let client_root = Director::root(DirectorConfig::default());
    let client_loop = spawn_pump_loop(client_root.clone(), PumpConfig::host());
    let link = connect_upstream(&client_root, connector.connect().unwrap()).unwrap();

    let client_leaf = client_root.add_leaf().unwrap();
    client_leaf.add_interest(Channel(77));
    let server_leaf = server_root.add_leaf().unwrap();
    server_leaf.add_interest(Channel(88));

    wait_until(|| server_root.aggregate_sources(Channel(77)) == 1).await;

    server_leaf
        .send(Message::new(vec![Channel(77)], Channel::NONE, &b"down"[..]))
        .unwrap();
    wait_until(|| {
        let got = client_leaf.take_delivered();
        got.len() == 1 && &got[0].payload[..] == b"down"
    })
    .await;

    client_leaf
        .send(Message::new(vec![Channel(88)], Channel::NONE, &b"up"[..]))
        .unwrap();
    wait_until(|| {
        let got = server_leaf.take_delivered();
        got.len() == 1 && &got[0].payload[..] == b"up"
    })
    .await;

    link.abort();
    wait_until(|| server_root.aggregate_sources(Channel(77)) == 0).await;

    client_loop.stop().await;
    server_loop.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_upstream_subscribes_and_unsubscribes_once() {
    let (ours, theirs) = memory_pair();
    let root = Director::root(DirectorConfig::default());
    let leaf_a = root.add_leaf().unwrap();
    let leaf_b = root.add_leaf().unwrap();
    leaf_a.add_interest(Channel(42));
    let _link = connect_upstream(&root, ours).unwrap();

    // Already-held interest is announced on connect.
    let frame = theirs.recv().await.unwrap().unwrap();
    let control = BusMessage::from_message(&decode_batch(&frame).unwrap()[0]).unwrap();
    assert_eq!(control, BusMessage::AddInterest { channel: Channel(42) });

    leaf_b.add_interest(Channel(42));
    leaf_a.remove_interest(Channel(42));
    leaf_b.remove_interest(Channel(42));

    let frame = tokio::time::timeout(Duration::from_millis(50), theirs.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let control = BusMessage::from_message(&decode_batch(&frame).unwrap()[0]).unwrap();
    assert_eq!(control, BusMessage::RemoveInterest { channel: Channel(42) });

    // Nothing else was sent.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), theirs.recv())
            .await
            .is_err()
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_batch_is_dropped() {
    let server_root = Director::root(DirectorConfig::default());
    let server_loop = spawn_pump_loop(server_root.clone(), PumpConfig::host());
    let (transport, connector) = MemoryTransport::new();
    let server = DirectorServer::new(server_root.clone());
    tokio::spawn(async move { server.serve(transport).await });

    let listener = server_root.add_leaf().unwrap();
    listener.add_interest(Channel(5_000));

    let raw = connector.connect().unwrap();
    raw.send(&[0xFF, 0xFF]).await.unwrap();
    let good = arcmesh_protocol::encode_batch(&[Message::new(
        vec![Channel(5_000)],
        Channel::NONE,
        &b"ok"[..],
    )])
    .unwrap();
    raw.send(&good).await.unwrap();

    wait_until(|| listener.take_delivered().len() == 1).await;
    server_loop.stop().await;
}
