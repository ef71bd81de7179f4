//! Permission checks applied to every client write and call.

use arcmesh_protocol::{Channel, ClientMessage, FieldDef, MemberFlags, MethodDef};

use crate::{ObjectPointer, Session, SessionError};

const SERVER_ONLY: &str = "server may only set this";
const OWNER_ONLY: &str = "only the owner may set this";

/// Decides whether a caller may send to a member with `flags`.
///
/// `OWNER_SEND` admits the object's owner and nobody else, whatever the
/// other flags say. Without it, `CLIENT_SEND` admits any authenticated
/// client. With neither flag only the server may send.
fn check_send(
    flags: MemberFlags,
    caller: Channel,
    authenticated: bool,
    owner: Channel,
) -> Result<(), &'static str> {
    if flags.contains(MemberFlags::OWNER_SEND) {
        return if !owner.is_none() && caller == owner {
            Ok(())
        } else {
            Err(OWNER_ONLY)
        };
    }
    if flags.contains(MemberFlags::CLIENT_SEND) && authenticated {
        return Ok(());
    }
    Err(SERVER_ONLY)
}

/// May `session` set `field` on `object`?
///
/// # Errors
/// [`SessionError::ForbiddenField`] with the reason.
pub fn check_field_send(
    session: &Session,
    object: &ObjectPointer,
    field: &FieldDef,
) -> Result<(), SessionError> {
    check_send(
        field.flags,
        session.channel(),
        session.is_authenticated(),
        object.owner,
    )
    .map_err(|reason| SessionError::ForbiddenField {
        doid: object.doid,
        field: field.id,
        reason: reason.to_string(),
    })
}

/// May `session` call `method` on `object`?
///
/// # Errors
/// [`SessionError::ForbiddenRpc`] with the reason.
pub fn check_method_send(
    session: &Session,
    object: &ObjectPointer,
    method: &MethodDef,
) -> Result<(), SessionError> {
    check_send(
        method.flags,
        session.channel(),
        session.is_authenticated(),
        object.owner,
    )
    .map_err(|reason| SessionError::ForbiddenRpc {
        doid: object.doid,
        method: method.id,
        reason: reason.to_string(),
    })
}

/// May `session` read `field` of `object`?
///
/// Readable are fields everyone hears about (`BROADCAST`,
/// `CLIENT_RECEIVE`), `OWNER_RECEIVE` fields of objects the session owns,
/// and anything it may set.
pub fn can_receive_field(session: &Session, object: &ObjectPointer, field: &FieldDef) -> bool {
    let flags = field.flags;
    let owner = !object.owner.is_none() && object.owner == session.channel();
    flags.contains(MemberFlags::BROADCAST)
        || flags.contains(MemberFlags::CLIENT_RECEIVE)
        || (owner && flags.contains(MemberFlags::OWNER_RECEIVE))
        || check_field_send(session, object, field).is_ok()
}

/// May an unauthenticated session send `message`?
///
/// Only service discovery, datagrams to discovered anonymous services,
/// closing a service, heartbeats, and disconnecting are allowed.
///
/// # Errors
/// [`SessionError::AnonymousViolation`] naming the packet.
pub fn check_anonymous(session: &Session, message: &ClientMessage) -> Result<(), SessionError> {
    let allowed = match message {
        ClientMessage::DiscoverService { .. }
        | ClientMessage::CloseService { .. }
        | ClientMessage::Heartbeat
        | ClientMessage::Disconnecting => true,
        ClientMessage::SendDatagram { channel, .. } => session
            .service_on(*channel)
            .is_some_and(|s| s.anonymous),
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(SessionError::AnonymousViolation(message.kind().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientState, DiscoveredService, SessionConfig};
    use arcmesh_protocol::{Doid, FieldValue, client_channel, service_channel};

    const ME: u32 = 1;
    const OTHER: u32 = 2;

    fn session(authenticated: bool) -> Session {
        let mut s = Session::new(client_channel(ME), SessionConfig::default());
        s.transition(ClientState::Unauthenticated).unwrap();
        if authenticated {
            s.transition(ClientState::Authenticated).unwrap();
        }
        s
    }

    fn object(owner: Channel) -> ObjectPointer {
        ObjectPointer {
            doid: Doid(7),
            parent: Doid::NONE,
            owner,
            type_id: 1,
        }
    }

    fn field(flags: MemberFlags) -> FieldDef {
        FieldDef::new(3, "f", flags)
    }

    #[test]
    fn test_owner_send_allows_owner() {
        let s = session(true);
        let obj = object(client_channel(ME));
        assert!(check_field_send(&s, &obj, &field(MemberFlags::OWNER_SEND)).is_ok());
    }

    #[test]
    fn test_owner_send_rejects_non_owner() {
        let s = session(true);
        let obj = object(client_channel(OTHER));
        let err = check_field_send(&s, &obj, &field(MemberFlags::OWNER_SEND)).unwrap_err();
        assert!(matches!(err, SessionError::ForbiddenField { field: 3, .. }));
    }

    #[test]
    fn test_owner_send_wins_over_client_send() {
        let s = session(true);
        let flags = MemberFlags::OWNER_SEND | MemberFlags::CLIENT_SEND;

        let theirs = object(client_channel(OTHER));
        let err = check_field_send(&s, &theirs, &field(flags)).unwrap_err();
        assert!(err.to_string().contains("only the owner may set this"));
        let method = MethodDef::new(4, "shout", flags);
        assert!(matches!(
            check_method_send(&s, &theirs, &method),
            Err(SessionError::ForbiddenRpc { method: 4, .. })
        ));

        let mine = object(client_channel(ME));
        assert!(check_field_send(&s, &mine, &field(flags)).is_ok());
        assert!(check_method_send(&s, &mine, &method).is_ok());
    }

    #[test]
    fn test_client_send_requires_authentication() {
        let s = session(false);
        let obj = object(Channel::NONE);
        assert!(check_field_send(&s, &obj, &field(MemberFlags::CLIENT_SEND)).is_err());
    }

    #[test]
    fn test_no_send_flags_is_server_only() {
        let s = session(true);
        let obj = object(client_channel(ME));
        let err = check_field_send(&s, &obj, &field(MemberFlags::BROADCAST)).unwrap_err();
        assert!(err.to_string().contains("server may only set this"));
    }

    #[test]
    fn test_unowned_object_never_matches_owner() {
        // A session on channel 0 must not pass as owner of an unowned object.
        let mut s = Session::new(Channel::NONE, SessionConfig::default());
        s.transition(ClientState::Unauthenticated).unwrap();
        let obj = object(Channel::NONE);
        assert!(check_field_send(&s, &obj, &field(MemberFlags::OWNER_SEND)).is_err());
    }

    #[test]
    fn test_method_check_reports_rpc() {
        let s = session(true);
        let obj = object(client_channel(OTHER));
        let err = check_method_send(&s, &obj, &MethodDef::new(4, "m", MemberFlags::OWNER_SEND))
            .unwrap_err();
        assert!(matches!(err, SessionError::ForbiddenRpc { method: 4, .. }));
    }

    #[test]
    fn test_receive_visibility() {
        let s = session(true);
        let mine = object(client_channel(ME));
        let theirs = object(client_channel(OTHER));
        let owner_only = field(MemberFlags::RAM | MemberFlags::OWNER_RECEIVE);
        assert!(can_receive_field(&s, &mine, &owner_only));
        assert!(!can_receive_field(&s, &theirs, &owner_only));
        assert!(can_receive_field(&s, &theirs, &field(MemberFlags::CLIENT_RECEIVE)));
        let ai_only = field(MemberFlags::RAM | MemberFlags::AI_RECEIVE);
        assert!(!can_receive_field(&s, &theirs, &ai_only));
    }

    #[test]
    fn test_anonymous_allows_discovery_and_heartbeat() {
        let s = session(false);
        let discover = ClientMessage::DiscoverService { name: "auth".into() };
        assert!(check_anonymous(&s, &discover).is_ok());
        assert!(check_anonymous(&s, &ClientMessage::Heartbeat).is_ok());
    }

    #[test]
    fn test_anonymous_rejects_interest_and_field_set() {
        let s = session(false);
        let add = ClientMessage::AddInterest {
            context: 1,
            doid: Doid(7),
        };
        let set = ClientMessage::ObjectSetField {
            doid: Doid(7),
            field: 1,
            value: FieldValue::default(),
            correlation: 0,
        };
        assert!(matches!(
            check_anonymous(&s, &add),
            Err(SessionError::AnonymousViolation(kind)) if kind == "AddInterest"
        ));
        assert!(check_anonymous(&s, &set).is_err());
    }

    #[test]
    fn test_anonymous_datagram_needs_discovered_anonymous_service() {
        let mut s = session(false);
        let open = service_channel(1);
        let closed = service_channel(2);
        s.discover_service(DiscoveredService {
            name: "auth".into(),
            channel: open,
            anonymous: true,
        });
        s.discover_service(DiscoveredService {
            name: "shop".into(),
            channel: closed,
            anonymous: false,
        });
        let to = |channel| ClientMessage::SendDatagram {
            channel,
            data: vec![1],
        };
        assert!(check_anonymous(&s, &to(open)).is_ok());
        assert!(check_anonymous(&s, &to(closed)).is_err());
        assert!(check_anonymous(&s, &to(service_channel(3))).is_err());
    }
}
