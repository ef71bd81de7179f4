//! The state server on the bus, driven through its remote stub.

use std::sync::Arc;

use arcmesh_director::{
    Director, DirectorConfig, PumpConfig, PumpHandle, RequestConfig, Router, spawn_pump_loop,
};
use arcmesh_protocol::{
    BusMessage, Channel, Doid, FieldDef, FieldValue, MemberFlags, Message, SchemaRegistry,
    StateFailure, TypeDef, ai_channel, client_channel, client_mirror_channel, object_channel,
};
use arcmesh_stateserver::{
    GenerateRequest, ObjectAuthority, StateServer, StateServerClient, StateServerConfig,
    StateServerError,
};
use parking_lot::Mutex;

const ZONE: u16 = 1;
const AVATAR: u16 = 2;

const ZONE_NAME: u16 = 1;
const AVATAR_NAME: u16 = 1;
const AVATAR_HP: u16 = 2;
const AVATAR_POS: u16 = 3;

fn schema() -> Arc<SchemaRegistry> {
    Arc::new(
        SchemaRegistry::builder()
            .register(TypeDef::new(ZONE, "Zone").field(FieldDef::new(
                ZONE_NAME,
                "name",
                MemberFlags::REQUIRED | MemberFlags::BROADCAST,
            )))
            .register(
                TypeDef::new(AVATAR, "Avatar")
                    .field(FieldDef::new(
                        AVATAR_NAME,
                        "name",
                        MemberFlags::REQUIRED | MemberFlags::CLIENT_RECEIVE,
                    ))
                    .field(FieldDef::new(
                        AVATAR_HP,
                        "hp",
                        MemberFlags::RAM | MemberFlags::OWNER_RECEIVE | MemberFlags::AI_RECEIVE,
                    ))
                    .field(FieldDef::new(AVATAR_POS, "pos", MemberFlags::RAM)),
            )
            .build()
            .unwrap(),
    )
}

struct Cluster {
    root: Director,
    server: StateServer,
    client: StateServerClient,
    loops: Vec<PumpHandle>,
}

impl Cluster {
    fn start() -> Self {
        let root = Director::root(DirectorConfig::default());
        let mut loops = vec![spawn_pump_loop(root.clone(), PumpConfig::host())];

        let server_router = Arc::new(Router::new(root.add_leaf().unwrap()));
        let server = StateServer::new(schema(), StateServerConfig::default());
        server.attach(Arc::clone(&server_router));
        loops.push(spawn_pump_loop(server_router, PumpConfig::host()));

        let client_router = Arc::new(Router::new(root.add_leaf().unwrap()));
        let client = StateServerClient::new(client_router);
        Self {
            root,
            server,
            client,
            loops,
        }
    }

    /// A router on its own leaf that records everything sent to `channels`.
    fn listen(&mut self, channels: Vec<Channel>) -> Arc<Mutex<Vec<Message>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(Router::new(self.root.add_leaf().unwrap()));
        let sink = Arc::clone(&seen);
        router.register_route(
            move |m| {
                sink.lock().push(m.clone());
                Ok(())
            },
            channels,
        );
        self.loops
            .push(spawn_pump_loop(router, PumpConfig::host()));
        seen
    }

    async fn stop(self) {
        for handle in self.loops {
            handle.stop().await;
        }
    }
}

async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn test_generate_and_read_back_over_bus() {
    let cluster = Cluster::start();
    let zone = cluster
        .client
        .generate(GenerateRequest::new(ZONE).field(ZONE_NAME, b"plaza".to_vec()))
        .await
        .unwrap();
    assert!(cluster.server.contains(zone));

    let snap = cluster.client.get_required(zone).await.unwrap();
    assert_eq!(snap.type_id, ZONE);
    assert_eq!(snap.parent, Doid::NONE);
    assert_eq!(snap.field(ZONE_NAME), Some(&FieldValue::from(b"plaza".to_vec())));

    let avatar = cluster
        .client
        .generate(GenerateRequest::new(AVATAR).parent(zone))
        .await
        .unwrap();
    assert_eq!(cluster.client.discover_children(zone).await.unwrap(), vec![avatar]);

    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_answered_not_dropped() {
    let cluster = Cluster::start();
    let err = cluster.client.get_required(Doid(404)).await.unwrap_err();
    assert_eq!(err.failure(), Some(&StateFailure::MissingObject(Doid(404))));

    let err = cluster
        .client
        .generate(GenerateRequest::new(99))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateServerError::Failure(StateFailure::UnknownType(99))
    ));

    // An owner on the authority's own channel would loop owner-only
    // updates back into it.
    let inbox = Channel(1000);
    let err = cluster
        .client
        .generate(GenerateRequest::new(ZONE).owner(inbox))
        .await
        .unwrap_err();
    assert_eq!(err.failure(), Some(&StateFailure::ReservedChannel(inbox)));
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_destroy_cascade_notifies_once_per_object() {
    let mut cluster = Cluster::start();
    let server = cluster.server.clone();
    server
        .generate(GenerateRequest::new(ZONE).doid(Doid(7)))
        .await
        .unwrap();
    server
        .generate(GenerateRequest::new(AVATAR).doid(Doid(9)).parent(Doid(7)))
        .await
        .unwrap();
    let mirrors = cluster.listen(vec![
        client_mirror_channel(Doid(7)),
        client_mirror_channel(Doid(9)),
    ]);
    settle().await;

    let removed = cluster.client.destroy(Doid(7)).await.unwrap();
    assert_eq!(removed, vec![Doid(9), Doid(7)]);
    assert!(server.is_empty());
    settle().await;

    let destroyed: Vec<Doid> = mirrors
        .lock()
        .iter()
        .filter_map(|m| match BusMessage::from_message(m) {
            Ok(BusMessage::ObjectDestroyed { doid }) => Some(doid),
            _ => None,
        })
        .collect();
    assert_eq!(destroyed, vec![Doid(9), Doid(7)]);
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_field_visibility_reaches_exactly_owner_and_ai() {
    let mut cluster = Cluster::start();
    let owner = client_channel(1);
    let other = client_channel(2);
    let doid = cluster
        .server
        .generate(GenerateRequest::new(AVATAR).owner(owner))
        .await
        .unwrap();

    let at_owner = cluster.listen(vec![owner]);
    let at_ai = cluster.listen(vec![ai_channel(doid)]);
    let at_mirror = cluster.listen(vec![client_mirror_channel(doid)]);
    let at_object = cluster.listen(vec![object_channel(doid)]);
    let at_other = cluster.listen(vec![other]);
    settle().await;

    cluster
        .client
        .set_field(doid, AVATAR_HP, b"90".to_vec().into(), Channel::NONE)
        .await
        .unwrap();
    settle().await;

    assert_eq!(at_owner.lock().len(), 1);
    assert_eq!(at_ai.lock().len(), 1);
    assert!(at_mirror.lock().is_empty());
    assert!(at_object.lock().is_empty());
    assert!(at_other.lock().is_empty());

    let update = BusMessage::from_message(&at_owner.lock()[0]).unwrap();
    assert!(matches!(
        update,
        BusMessage::BroadcastUpdate { field: AVATAR_HP, .. }
    ));
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_field_from_client_echoes_sender_and_correlation() {
    let mut cluster = Cluster::start();
    let owner = client_channel(1);
    let doid = cluster
        .server
        .generate(GenerateRequest::new(AVATAR).owner(owner))
        .await
        .unwrap();
    let at_ai = cluster.listen(vec![ai_channel(doid)]);
    let at_owner = cluster.listen(vec![owner]);
    settle().await;

    // A client agent writes fire-and-forget on the object channel.
    let write = BusMessage::SetField {
        doid,
        field: AVATAR_HP,
        value: b"5".to_vec().into(),
        sender: owner,
        correlation: 77,
    }
    .to_message(vec![object_channel(doid)], owner)
    .unwrap();
    cluster.client.router().send(write).unwrap();
    settle().await;

    let update = BusMessage::from_message(&at_ai.lock()[0]).unwrap();
    assert_eq!(
        update,
        BusMessage::BroadcastUpdate {
            doid,
            field: AVATAR_HP,
            value: b"5".to_vec().into(),
            sender: owner,
            correlation: 77,
        }
    );
    // Owner wrote it; no echo to the owner, and no success reply either.
    assert!(at_owner.lock().is_empty());
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_parent_moves_and_notifies() {
    let mut cluster = Cluster::start();
    let server = cluster.server.clone();
    let a = server.generate(GenerateRequest::new(ZONE)).await.unwrap();
    let b = server.generate(GenerateRequest::new(ZONE)).await.unwrap();
    let child = server
        .generate(GenerateRequest::new(AVATAR).parent(a))
        .await
        .unwrap();
    let mirror = cluster.listen(vec![client_mirror_channel(child)]);
    settle().await;

    cluster.client.set_parent(child, b).await.unwrap();
    settle().await;

    assert_eq!(cluster.client.discover_children(b).await.unwrap(), vec![child]);
    let moved = BusMessage::from_message(&mirror.lock()[0]).unwrap();
    assert_eq!(
        moved,
        BusMessage::ObjectMoved {
            doid: child,
            old_parent: a,
            new_parent: b,
        }
    );
    cluster.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_authority_gives_no_reply() {
    let root = Director::root(DirectorConfig::default());
    let root_loop = spawn_pump_loop(root.clone(), PumpConfig::host());
    let client = StateServerClient::with_config(
        Arc::new(Router::new(root.add_leaf().unwrap())),
        RequestConfig {
            timeout_ms: 50,
            retries: 1,
            pump_interval_ms: 1,
        },
    );
    let err = client.dispense_id().await.unwrap_err();
    assert!(matches!(err, StateServerError::Request(_)));
    root_loop.stop().await;
}
