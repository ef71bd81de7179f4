//! Per-connection worker: hello, client packets, and bus traffic.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `Hello` → check protocol version and schema hash
//!   2. Register a client channel → send `HelloResp`
//!   3. Loop: client packets, bus messages, eject requests, heartbeats
//!   4. Teardown: post-remove messages, routes, registry, connection
//!
//! Waits on the bus (authority reads, RPC replies, service discovery) stay
//! interruptible: an eject, a hang-up or a missed heartbeat ends the session
//! mid-wait. Packets that arrive meanwhile are handled afterwards, in order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use arcmesh_director::{DirectorError, RouteId, Router};
use arcmesh_protocol::{
    BusMessage, Channel, ClientEnvelope, ClientMessage, Codec, Doid, FieldValue, JsonCodec,
    Message, ObjectSnapshot, PROTOCOL_VERSION, ProtocolError, StateFailure, client_mirror_channel,
    object_channel,
};
use arcmesh_services::ServiceError;
use arcmesh_session::{
    ClientState, DiscoveredService, EjectRequest, ObjectPointer, Session, SessionError, security,
};
use arcmesh_stateserver::{ObjectAuthority, StateServerClient, broadcast_targets};
use arcmesh_transport::{Connection, TransportError};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::ArcmeshError;
use crate::agent::AgentShared;

/// Why the packet loop ended.
enum Stop {
    /// The client went away or said goodbye.
    Closed,
    /// The session broke a rule or was asked to leave.
    Eject(SessionError),
    /// Something on our side failed.
    Failed(ArcmeshError),
}

impl From<SessionError> for Stop {
    fn from(e: SessionError) -> Self {
        Self::Eject(e)
    }
}

impl From<TransportError> for Stop {
    fn from(e: TransportError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<ProtocolError> for Stop {
    fn from(e: ProtocolError) -> Self {
        Self::Failed(e.into())
    }
}

impl From<DirectorError> for Stop {
    fn from(e: DirectorError) -> Self {
        Self::Failed(e.into())
    }
}

/// Releases what a session holds on the bus when the worker exits, even
/// by panic or abort.
struct SessionGuard {
    shared: Arc<AgentShared>,
    router: Arc<Router>,
    channel: Channel,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.router.destroy_all_routes();
        self.router.director().detach();
        self.shared.sessions.unregister(self.channel);
    }
}

/// Sequence numbers and timestamps of packets sent to the client.
struct Outbound {
    seq: u64,
    start: Instant,
}

impl Outbound {
    fn new() -> Self {
        Self {
            seq: 1,
            start: Instant::now(),
        }
    }

    async fn send<C>(&mut self, conn: &C, message: ClientMessage) -> Result<(), Stop>
    where
        C: Connection<Error = TransportError>,
    {
        let envelope = ClientEnvelope {
            seq: next_seq(&mut self.seq),
            timestamp: self.start.elapsed().as_millis() as u64,
            message,
        };
        let bytes = JsonCodec.encode(&envelope)?;
        conn.send(&bytes).await?;
        Ok(())
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C>(
    conn: C,
    shared: Arc<AgentShared>,
) -> Result<(), ArcmeshError>
where
    C: Connection<Error = TransportError>,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");
    let mut out = Outbound::new();

    if let Err(stop) = perform_hello(&conn, &shared).await {
        return refuse(&conn, &mut out, stop).await;
    }

    let (eject_tx, eject_rx) = mpsc::unbounded_channel();
    let router = Arc::new(Router::new(shared.node.add_leaf()?));
    let channel = match shared.sessions.register(eject_tx) {
        Ok(channel) => channel,
        Err(e) => {
            router.director().detach();
            return refuse(&conn, &mut out, e.into()).await;
        }
    };
    let guard = SessionGuard {
        shared: Arc::clone(&shared),
        router: Arc::clone(&router),
        channel,
    };

    let mut session = Session::new(channel, shared.config.session.clone());
    session.transition(ClientState::Unauthenticated)?;
    let (bus_tx, mut bus_rx) = mpsc::unbounded_channel();
    let client_route = forward(&router, &bus_tx, [channel]);
    tracing::info!(%conn_id, %channel, "client connected");

    let watch = Watch {
        eject_rx,
        backlog: VecDeque::new(),
        last_heard: Instant::now(),
        heartbeat: shared.config.heartbeat_timeout(),
        heartbeat_ms: shared.config.heartbeat_timeout_ms,
    };
    let mut worker = Worker {
        conn: &conn,
        watch,
        authority: StateServerClient::with_config(
            Arc::clone(&router),
            shared.config.request.clone(),
        ),
        shared,
        router,
        session,
        out,
        bus_tx,
        client_route,
        objects: HashMap::new(),
        opened: HashMap::new(),
        guard,
    };
    let hello = worker.send(ClientMessage::HelloResp {
        client_channel: channel,
    });
    if let Err(stop) = hello.await {
        return worker.finish(stop).await;
    }

    let stop = worker.run(&mut bus_rx).await;
    worker.finish(stop).await
}

/// Receives and checks the first packet.
async fn perform_hello<C>(conn: &C, shared: &AgentShared) -> Result<(), Stop>
where
    C: Connection<Error = TransportError>,
{
    let data = match time::timeout(shared.config.hello_timeout(), conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(Stop::Closed),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(SessionError::NoHello(format!(
                "nothing within {} ms",
                shared.config.hello_timeout_ms
            ))
            .into());
        }
    };
    if data.len() > shared.config.max_datagram_size {
        return Err(SessionError::OversizedDatagram(data.len()).into());
    }

    let envelope: ClientEnvelope =
        JsonCodec.decode(&data).map_err(|e| SessionError::NoHello(e.to_string()))?;
    match envelope.message {
        ClientMessage::Hello {
            version,
            schema_hash,
        } => {
            if version != PROTOCOL_VERSION {
                return Err(SessionError::BadVersion {
                    expected: PROTOCOL_VERSION,
                    got: version,
                }
                .into());
            }
            let expected = shared.schema.schema_hash();
            if schema_hash != expected {
                return Err(SessionError::BadSchemaHash {
                    expected,
                    got: schema_hash,
                }
                .into());
            }
            Ok(())
        }
        other => Err(SessionError::NoHello(other.kind().to_string()).into()),
    }
}

/// Ends a connection that never got a session.
async fn refuse<C>(conn: &C, out: &mut Outbound, stop: Stop) -> Result<(), ArcmeshError>
where
    C: Connection<Error = TransportError>,
{
    let result = match stop {
        Stop::Closed => Ok(()),
        Stop::Eject(e) => {
            let code = e.disconnect_code();
            tracing::info!(conn_id = %conn.id(), %code, reason = %e, "refusing client");
            let _ = out
                .send(
                    conn,
                    ClientMessage::Eject {
                        code: code.code(),
                        reason: e.to_string(),
                    },
                )
                .await;
            Err(e.into())
        }
        Stop::Failed(e) => Err(e),
    };
    let _ = conn.close().await;
    result
}

/// Registers a route that hands every message on `channels` to the worker.
fn forward(
    router: &Router,
    tx: &mpsc::UnboundedSender<Message>,
    channels: impl IntoIterator<Item = Channel>,
) -> RouteId {
    let tx = tx.clone();
    router.register_route(
        move |message| {
            let _ = tx.send(message.clone());
            Ok(())
        },
        channels,
    )
}

/// A message addressed to several of this session's channels reaches one
/// forwarding route per channel; copies of one delivery share a payload
/// buffer and arrive back to back.
fn same_delivery(a: &Message, b: &Message) -> bool {
    a.payload.as_ptr() == b.payload.as_ptr() && a == b
}

/// Frames a client may send while one of its requests waits on the bus.
const MAX_BACKLOG: usize = 256;

/// What ends a session while its worker is busy: eject requests, the
/// heartbeat deadline, and frames that arrive in the meantime.
struct Watch {
    eject_rx: mpsc::UnboundedReceiver<EjectRequest>,
    /// Frames received during a wait, oldest first.
    backlog: VecDeque<Vec<u8>>,
    last_heard: Instant,
    heartbeat: Option<Duration>,
    heartbeat_ms: u64,
}

impl Watch {
    fn deadline(&self) -> Option<Instant> {
        self.heartbeat.map(|timeout| self.last_heard + timeout)
    }
}

fn ejected(request: EjectRequest) -> Stop {
    SessionError::Ejected {
        code: request.code.code(),
        reason: request.reason,
    }
    .into()
}

/// Drives `work` to completion unless the session ends first.
async fn interruptible<C, T>(
    conn: &C,
    watch: &mut Watch,
    work: impl Future<Output = T>,
) -> Result<T, Stop>
where
    C: Connection<Error = TransportError>,
{
    tokio::pin!(work);
    loop {
        let deadline = watch.deadline();
        tokio::select! {
            out = &mut work => return Ok(out),
            frame = conn.recv() => match frame {
                Ok(Some(data)) => {
                    if watch.backlog.len() >= MAX_BACKLOG {
                        return Err(SessionError::ProtocolViolation(format!(
                            "more than {MAX_BACKLOG} packets while a request is pending"
                        ))
                        .into());
                    }
                    watch.last_heard = Instant::now();
                    watch.backlog.push_back(data);
                }
                Ok(None) => return Err(Stop::Closed),
                Err(e) => {
                    tracing::debug!(error = %e, "recv error during a bus wait");
                    return Err(Stop::Closed);
                }
            },
            Some(request) = watch.eject_rx.recv() => return Err(ejected(request)),
            _ = expire(deadline) => {
                return Err(SessionError::NoHeartbeat(watch.heartbeat_ms).into());
            }
        }
    }
}

/// One wakeup of the packet loop.
enum Event {
    Frame(Vec<u8>),
    Closed,
    Bus(Message),
    Eject(EjectRequest),
    Tick,
    Notified,
    Expired,
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker<'c, C> {
    conn: &'c C,
    watch: Watch,
    shared: Arc<AgentShared>,
    router: Arc<Router>,
    authority: StateServerClient,
    session: Session,
    out: Outbound,
    bus_tx: mpsc::UnboundedSender<Message>,
    client_route: RouteId,
    /// Routes on (object, client mirror) per visible object.
    objects: HashMap<Doid, RouteId>,
    /// Channels opened by the bus with `ClientOpenChannel`.
    opened: HashMap<Channel, RouteId>,
    guard: SessionGuard,
}

impl<C> Worker<'_, C>
where
    C: Connection<Error = TransportError>,
{
    async fn send(&mut self, message: ClientMessage) -> Result<(), Stop> {
        self.out.send(self.conn, message).await
    }

    async fn run(&mut self, bus_rx: &mut mpsc::UnboundedReceiver<Message>) -> Stop {
        let conn = self.conn;
        let notify = self.router.director().notifier();
        let mut ticker = time::interval(self.shared.config.pump.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_delivery: Option<Message> = None;

        loop {
            let event = match self.watch.backlog.pop_front() {
                Some(data) => Event::Frame(data),
                None => {
                    let deadline = self.watch.deadline();
                    tokio::select! {
                        frame = conn.recv() => match frame {
                            Ok(Some(data)) => {
                                self.watch.last_heard = Instant::now();
                                Event::Frame(data)
                            }
                            Ok(None) => Event::Closed,
                            Err(e) => {
                                let channel = self.session.channel();
                                tracing::debug!(%channel, error = %e, "recv error");
                                Event::Closed
                            }
                        },
                        Some(message) = bus_rx.recv() => Event::Bus(message),
                        Some(request) = self.watch.eject_rx.recv() => Event::Eject(request),
                        _ = ticker.tick() => Event::Tick,
                        _ = notify.notified() => Event::Notified,
                        _ = expire(deadline) => Event::Expired,
                    }
                }
            };

            let step = match event {
                Event::Frame(data) => self.on_frame(&data).await,
                Event::Closed => Err(Stop::Closed),
                Event::Bus(message) => {
                    if last_delivery.as_ref().is_some_and(|last| same_delivery(last, &message)) {
                        Ok(())
                    } else {
                        let step = self.on_bus(&message).await;
                        last_delivery = Some(message);
                        step
                    }
                }
                Event::Eject(request) => Err(ejected(request)),
                Event::Tick => {
                    self.router.pump();
                    self.session.expire_correlations(Instant::now());
                    Ok(())
                }
                Event::Notified => {
                    self.router.pump();
                    Ok(())
                }
                Event::Expired => Err(SessionError::NoHeartbeat(self.watch.heartbeat_ms).into()),
            };
            if let Err(stop) = step {
                return stop;
            }
        }
    }

    // -- client → bus ------------------------------------------------------

    async fn on_frame(&mut self, data: &[u8]) -> Result<(), Stop> {
        if data.len() > self.shared.config.max_datagram_size {
            return Err(SessionError::OversizedDatagram(data.len()).into());
        }
        let envelope: ClientEnvelope = JsonCodec
            .decode(data)
            .map_err(|e| SessionError::InvalidMsgType(e.to_string()))?;
        let message = envelope.message;
        if !self.session.is_authenticated() {
            security::check_anonymous(&self.session, &message)?;
        }
        tracing::trace!(channel = %self.session.channel(), kind = message.kind(), "client packet");

        match message {
            ClientMessage::Heartbeat => Ok(()),
            ClientMessage::Disconnecting => Err(Stop::Closed),
            ClientMessage::Hello { .. } => {
                Err(SessionError::ProtocolViolation("repeated hello".into()).into())
            }
            ClientMessage::SendDatagram { channel, data } => self.send_datagram(channel, data),
            ClientMessage::DiscoverService { name } => self.discover_service(name).await,
            ClientMessage::CloseService { name } => {
                self.session.close_service(&name);
                Ok(())
            }
            ClientMessage::ObjectSetField {
                doid,
                field,
                value,
                correlation,
            } => self.set_field(doid, field, value, correlation),
            ClientMessage::ObjectGetField {
                request_id,
                doid,
                field,
            } => self.get_field(request_id, doid, field).await,
            ClientMessage::SendRpc {
                doid,
                method,
                args,
                request_id,
            } => self.send_rpc(doid, method, args, request_id).await,
            ClientMessage::DiscoverObjectChildren { context, doid } => {
                self.discover_children(context, doid).await
            }
            ClientMessage::AddInterest { context, doid } => {
                self.add_interest(context, vec![doid]).await
            }
            ClientMessage::AddInterestMultiple { context, doids } => {
                self.add_interest(context, doids).await
            }
            ClientMessage::AddInterestRange { context, low, high } => {
                let doids = self.expand_range(low, high)?;
                self.add_interest(context, doids).await
            }
            ClientMessage::RemoveInterest { context, doid } => {
                self.remove_interest(context, vec![doid]).await
            }
            ClientMessage::RemoveInterestMultiple { context, doids } => {
                self.remove_interest(context, doids).await
            }
            ClientMessage::RemoveInterestRange { context, low, high } => {
                let doids = self.expand_range(low, high)?;
                self.remove_interest(context, doids).await
            }
            other => Err(SessionError::InvalidMsgType(format!(
                "{} is not sent by clients",
                other.kind()
            ))
            .into()),
        }
    }

    fn send_datagram(&mut self, channel: Channel, data: Vec<u8>) -> Result<(), Stop> {
        if self.session.service_on(channel).is_none() {
            return Err(SessionError::ProtocolViolation(format!(
                "no discovered service on {channel}"
            ))
            .into());
        }
        let me = self.session.channel();
        let message = BusMessage::ServiceDatagram { sender: me, data };
        self.router.send(message.to_message(vec![channel], me)?)?;
        Ok(())
    }

    async fn discover_service(&mut self, name: String) -> Result<(), Stop> {
        let lookup = arcmesh_services::discover(&self.router, &name, &self.shared.config.discovery);
        let found = interruptible(self.conn, &mut self.watch, lookup).await?;
        let channel = match found {
            // Unauthenticated clients only learn about anonymous services.
            Ok(entry) if entry.anonymous || self.session.is_authenticated() => {
                let channel = entry.channel;
                self.session.discover_service(DiscoveredService {
                    name: entry.name,
                    channel,
                    anonymous: entry.anonymous,
                });
                Some(channel)
            }
            Ok(_) | Err(ServiceError::NotFound(_)) => None,
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "service discovery failed");
                None
            }
        };
        self.send(ClientMessage::DiscoverServiceResp { name, channel })
            .await
    }

    fn pointer(&self, doid: Doid) -> Result<ObjectPointer, SessionError> {
        self.session
            .object(doid)
            .copied()
            .ok_or(SessionError::MissingObject(doid))
    }

    fn set_field(
        &mut self,
        doid: Doid,
        field: u16,
        value: FieldValue,
        correlation: u32,
    ) -> Result<(), Stop> {
        let pointer = self.pointer(doid)?;
        let def = self
            .shared
            .schema
            .field(pointer.type_id, field)
            .ok_or_else(|| {
                SessionError::ProtocolViolation(format!(
                    "type {} has no field {field}",
                    pointer.type_id
                ))
            })?;
        security::check_field_send(&self.session, &pointer, def)?;

        let correlation = if correlation == 0 {
            self.session.next_correlation()
        } else {
            self.session.remember_correlation(correlation);
            correlation
        };
        let me = self.session.channel();
        let message = BusMessage::SetField {
            doid,
            field,
            value,
            sender: me,
            correlation,
        }
        .to_message(vec![object_channel(doid)], me)?;
        self.router.send(message)?;
        Ok(())
    }

    async fn get_field(&mut self, request_id: u32, doid: Doid, field: u16) -> Result<(), Stop> {
        let pointer = self.pointer(doid)?;
        let visible = self
            .shared
            .schema
            .field(pointer.type_id, field)
            .is_some_and(|def| security::can_receive_field(&self.session, &pointer, def));
        let value = if visible {
            let read = self.authority.get_field(doid, field);
            match interruptible(self.conn, &mut self.watch, read).await? {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(%doid, field, error = %e, "field read failed");
                    None
                }
            }
        } else {
            None
        };
        self.send(ClientMessage::ObjectGetFieldResp {
            request_id,
            doid,
            field,
            value,
        })
        .await
    }

    async fn send_rpc(
        &mut self,
        doid: Doid,
        method: u16,
        args: FieldValue,
        request_id: u32,
    ) -> Result<(), Stop> {
        let pointer = self.pointer(doid)?;
        let def = self
            .shared
            .schema
            .method(pointer.type_id, method)
            .ok_or_else(|| {
                SessionError::ProtocolViolation(format!(
                    "type {} has no method {method}",
                    pointer.type_id
                ))
            })?;
        security::check_method_send(&self.session, &pointer, def)?;

        let me = self.session.channel();
        let call = BusMessage::BroadcastRpc {
            doid,
            method,
            args,
            sender: me,
            correlation: request_id,
        };
        if request_id == 0 {
            let mut targets = broadcast_targets(def.flags, doid, pointer.owner, me);
            if targets.is_empty() {
                targets.push(object_channel(doid));
            }
            self.router.send(call.to_message(targets, me)?)?;
            return Ok(());
        }

        let request = call.to_message(vec![object_channel(doid)], me)?;
        let pending = self.router.request(request, &self.shared.config.rpc);
        let result = match interruptible(self.conn, &mut self.watch, pending).await? {
            Ok(reply) => match BusMessage::from_message(&reply) {
                Ok(BusMessage::BroadcastRpcResp { result, .. }) => result,
                Ok(other) => Err(format!("unexpected reply {}", other.code())),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        self.send(ClientMessage::SendRpcResp {
            request_id,
            doid,
            method,
            result,
        })
        .await
    }

    async fn discover_children(&mut self, context: u32, doid: Doid) -> Result<(), Stop> {
        if !self.session.knows(doid) {
            return Err(SessionError::MissingObject(doid).into());
        }
        let lookup = self.authority.discover_children(doid);
        let children = match interruptible(self.conn, &mut self.watch, lookup).await? {
            Ok(children) => children,
            Err(e) => {
                tracing::debug!(%doid, error = %e, "child discovery failed");
                Vec::new()
            }
        };
        self.send(ClientMessage::DiscoverObjectChildrenResp {
            context,
            doid,
            children,
        })
        .await
    }

    fn expand_range(&self, low: Doid, high: Doid) -> Result<Vec<Doid>, SessionError> {
        if low.0 > high.0 {
            return Err(SessionError::ProtocolViolation(format!(
                "empty interest range {low}..={high}"
            )));
        }
        let max = self.shared.config.max_interest_range;
        if high.0 - low.0 >= max {
            return Err(SessionError::ProtocolViolation(format!(
                "interest range {low}..={high} exceeds {max} objects"
            )));
        }
        Ok((low.0..=high.0).map(Doid).collect())
    }

    // -- interest ------------------------------------------------------------

    async fn add_interest(&mut self, context: u32, doids: Vec<Doid>) -> Result<(), Stop> {
        for doid in doids {
            if self.session.add_interest(doid) && !self.session.knows(doid) {
                self.reveal(doid).await?;
            }
        }
        self.send(ClientMessage::AddInterestResp { context }).await
    }

    async fn remove_interest(&mut self, context: u32, doids: Vec<Doid>) -> Result<(), Stop> {
        for doid in doids {
            if !self.session.remove_interest(doid) {
                continue;
            }
            if self.session.is_ancestor_of_interest(doid) {
                tracing::trace!(%doid, "still an ancestor of a watched object; kept");
                continue;
            }
            if self.hide(doid) {
                self.send(ClientMessage::ObjectLeft { doid }).await?;
            }
        }
        self.send(ClientMessage::RemoveInterestResp { context })
            .await
    }

    /// Shows `doid` to the client, generating unseen ancestors first.
    ///
    /// An object the authority doesn't have ejects the client with
    /// `MissingObject`. An unreachable authority only drops the interest.
    async fn reveal(&mut self, doid: Doid) -> Result<(), Stop> {
        let max_depth = self.shared.config.max_parent_depth;
        let mut chain: Vec<ObjectSnapshot> = Vec::new();
        let mut cursor = doid;
        while !cursor.is_none() && !self.session.knows(cursor) {
            if chain.iter().any(|s| s.doid == cursor) {
                return Err(SessionError::ProtocolViolation(format!(
                    "parent cycle through {cursor}"
                ))
                .into());
            }
            if chain.len() > max_depth {
                return Err(SessionError::ProtocolViolation(format!(
                    "parent chain of {doid} deeper than {max_depth}"
                ))
                .into());
            }
            let read = self.authority.get_required(cursor);
            let snapshot = match interruptible(self.conn, &mut self.watch, read).await? {
                Ok(snapshot) => snapshot,
                Err(e) if e.failure() == Some(&StateFailure::MissingObject(cursor)) => {
                    return Err(SessionError::MissingObject(cursor).into());
                }
                Err(e) => {
                    tracing::warn!(%doid, error = %e, "object unavailable; interest dropped");
                    self.session.remove_interest(doid);
                    return Ok(());
                }
            };
            cursor = snapshot.parent;
            chain.push(snapshot);
        }

        for snapshot in chain.into_iter().rev() {
            self.show(snapshot).await?;
        }
        Ok(())
    }

    async fn show(&mut self, snapshot: ObjectSnapshot) -> Result<(), Stop> {
        let ObjectSnapshot {
            doid,
            type_id,
            parent,
            owner,
            fields,
        } = snapshot;
        let pointer = ObjectPointer {
            doid,
            parent,
            owner,
            type_id,
        };
        self.session.remember_object(pointer);
        if !self.objects.contains_key(&doid) {
            let route = forward(
                &self.router,
                &self.bus_tx,
                [object_channel(doid), client_mirror_channel(doid)],
            );
            self.objects.insert(doid, route);
        }

        let schema = Arc::clone(&self.shared.schema);
        let fields: Vec<(u16, FieldValue)> = fields
            .into_iter()
            .filter(|(id, _)| {
                schema
                    .field(type_id, *id)
                    .is_some_and(|def| security::can_receive_field(&self.session, &pointer, def))
            })
            .collect();
        tracing::debug!(channel = %self.session.channel(), %doid, %parent, "object revealed");

        let message = if self.session.owns(doid) {
            ClientMessage::GenerateObjectOwner {
                doid,
                parent,
                type_id,
                fields,
            }
        } else {
            ClientMessage::GenerateObject {
                doid,
                parent,
                type_id,
                fields,
            }
        };
        self.send(message).await
    }

    /// Closes an object's routes and forgets it. Returns `true` if the
    /// client had been shown the object.
    fn hide(&mut self, doid: Doid) -> bool {
        if let Some(route) = self.objects.remove(&doid) {
            self.router.destroy_route_id(route);
        }
        self.session.forget_object(doid).is_some()
    }

    // -- bus → client --------------------------------------------------------

    async fn on_bus(&mut self, message: &Message) -> Result<(), Stop> {
        let bus = match BusMessage::from_message(message) {
            Ok(bus) => bus,
            Err(e) => {
                let msg_type = message.msg_type();
                tracing::debug!(?msg_type, error = %e, "undecodable bus message");
                return Ok(());
            }
        };
        let me = self.session.channel();

        match bus {
            BusMessage::BroadcastUpdate {
                doid,
                field,
                value,
                sender,
                correlation,
            } => {
                if sender == me && self.session.take_correlation(correlation) {
                    tracing::trace!(%doid, field, correlation, "echo suppressed");
                    return Ok(());
                }
                if !self.session.knows(doid) {
                    return Ok(());
                }
                self.send(ClientMessage::ObjectSetField {
                    doid,
                    field,
                    value,
                    correlation,
                })
                .await
            }
            BusMessage::ObjectDestroyed { doid } | BusMessage::ClientDestroy { doid } => {
                self.session.remove_interest(doid);
                if self.hide(doid) {
                    self.send(ClientMessage::DestroyObject { doid }).await?;
                }
                Ok(())
            }
            BusMessage::ObjectMoved {
                doid, new_parent, ..
            } => {
                let Some(pointer) = self.session.object_mut(doid) else {
                    return Ok(());
                };
                pointer.parent = new_parent;
                self.send(ClientMessage::ObjectMoved {
                    doid,
                    parent: new_parent,
                })
                .await
            }
            BusMessage::BroadcastRpc {
                doid, method, args, ..
            } => {
                let mirror = client_mirror_channel(doid);
                if self.session.knows(doid) && message.targets_any(|ch| ch == me || ch == mirror) {
                    self.send(ClientMessage::ObjectRpc { doid, method, args })
                        .await?;
                }
                Ok(())
            }
            BusMessage::ClientSetStatus { authenticated } => {
                let was = self.session.is_authenticated();
                let to = if authenticated {
                    ClientState::Authenticated
                } else {
                    ClientState::Unauthenticated
                };
                self.session.transition(to)?;
                if authenticated && !was {
                    tracing::info!(channel = %me, "client authenticated");
                    self.send(ClientMessage::Authenticated).await?;
                }
                Ok(())
            }
            BusMessage::ClientSetId { channel } => {
                self.rekey(channel);
                Ok(())
            }
            BusMessage::ClientSendDatagram { data } => {
                self.send(ClientMessage::Datagram {
                    channel: message.from,
                    data,
                })
                .await
            }
            BusMessage::ClientEject { code, reason } => {
                Err(SessionError::Ejected { code, reason }.into())
            }
            BusMessage::ClientOpenChannel { channel } => {
                if !self.opened.contains_key(&channel) {
                    let route = forward(&self.router, &self.bus_tx, [channel]);
                    self.opened.insert(channel, route);
                }
                Ok(())
            }
            BusMessage::ClientCloseChannel { channel } => {
                if let Some(route) = self.opened.remove(&channel) {
                    self.router.destroy_route_id(route);
                }
                Ok(())
            }
            BusMessage::ClientGenerate { doid } => {
                if !self.session.add_interest(doid) || self.session.knows(doid) {
                    return Ok(());
                }
                match self.reveal(doid).await {
                    Err(Stop::Eject(SessionError::MissingObject(missing))) => {
                        tracing::warn!(%doid, %missing, "bus asked to show a missing object");
                        self.session.remove_interest(doid);
                        Ok(())
                    }
                    other => other,
                }
            }
            BusMessage::ClientAddPostRemove { frame } => {
                self.session.queue_post_remove(frame);
                Ok(())
            }
            BusMessage::ClientClearPostRemove => {
                self.session.clear_post_remove();
                Ok(())
            }
            BusMessage::QueryChannel if !message.from.is_none() => {
                let reply = BusMessage::QueryChannelResp {
                    kind: "client".to_string(),
                    name: me.to_string(),
                }
                .to_message(vec![message.from], me)?;
                self.router.send(reply)?;
                Ok(())
            }
            other => {
                tracing::trace!(channel = %me, code = other.code(), "bus message ignored");
                Ok(())
            }
        }
    }

    /// Moves the session to another client channel.
    fn rekey(&mut self, new: Channel) {
        let old = self.session.channel();
        if new == old {
            return;
        }
        if let Err(e) = self.shared.sessions.rekey(old, new) {
            tracing::warn!(%old, %new, error = %e, "client channel change refused");
            return;
        }
        self.router.destroy_route_id(self.client_route);
        self.client_route = forward(&self.router, &self.bus_tx, [new]);
        self.session.set_channel(new);
        self.guard.channel = new;
    }

    // -- teardown --------------------------------------------------------------

    async fn finish(mut self, stop: Stop) -> Result<(), ArcmeshError> {
        let channel = self.session.channel();
        let result = match stop {
            Stop::Closed => {
                tracing::info!(%channel, "client disconnected");
                Ok(())
            }
            Stop::Eject(e) => {
                let code = e.disconnect_code();
                tracing::info!(%channel, %code, reason = %e, "ejecting client");
                let _ = self.session.transition(ClientState::Rejected);
                let _ = self
                    .send(ClientMessage::Eject {
                        code: code.code(),
                        reason: e.to_string(),
                    })
                    .await;
                Err(e.into())
            }
            Stop::Failed(e) => {
                tracing::warn!(%channel, error = %e, "client worker failed");
                Err(e)
            }
        };

        self.router.destroy_all_routes();
        self.objects.clear();
        self.opened.clear();
        let frames = self.session.take_post_remove();
        self.session.clear();
        for frame in frames {
            let sent = Message::decode(&mut Bytes::from(frame))
                .map_err(DirectorError::from)
                .and_then(|message| self.router.send(message));
            if let Err(e) = sent {
                tracing::warn!(%channel, error = %e, "post-remove message dropped");
            }
        }
        // Push them to the parent before the leaf leaves the tree.
        self.router.director().pump();

        drop(self.guard);
        let _ = self.conn.close().await;
        result
    }
}
