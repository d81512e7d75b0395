//! Delivery router: given an outbound message event, determine which live
//! connections must receive it and emit to exactly those.
//!
//! Routing never substitutes for persistence — callers persist first and
//! only fan out once the write has completed. An empty target set (peer
//! offline, no subscribers) is a normal outcome, not a failure; the message
//! remains retrievable through history fetch.

use axum::extract::ws::Message;

use crate::ws::registry::ConnectionRegistry;
use crate::ws::rooms::RoomIndex;
use crate::ws::ConnectionId;

/// Targets for a direct message: every live connection of the peer.
/// The sender's own connections are never targeted — the sending client
/// renders its copy from the ack.
pub fn direct_targets(registry: &ConnectionRegistry, peer_user_id: &str) -> Vec<ConnectionId> {
    registry.connections_for(peer_user_id)
}

/// Targets for a community message: the room's current subscribers minus
/// all of the sender's own connections (no self-echo).
pub fn community_targets(
    rooms: &RoomIndex,
    registry: &ConnectionRegistry,
    community_id: &str,
    sender_user_id: &str,
) -> Vec<ConnectionId> {
    let own: std::collections::HashSet<ConnectionId> =
        registry.connections_for(sender_user_id).into_iter().collect();
    rooms
        .members_of(community_id)
        .into_iter()
        .filter(|conn| !own.contains(conn))
        .collect()
}

/// Fan a direct-message event out to the peer's connections.
pub fn deliver_direct(
    registry: &ConnectionRegistry,
    peer_user_id: &str,
    msg: Message,
) -> usize {
    let targets = direct_targets(registry, peer_user_id);
    registry.send_to_connections(&targets, msg)
}

/// Fan a community-message event out to the room's subscribers, excluding
/// the sender.
pub fn deliver_community(
    registry: &ConnectionRegistry,
    rooms: &RoomIndex,
    community_id: &str,
    sender_user_id: &str,
    msg: Message,
) -> usize {
    let targets = community_targets(rooms, registry, community_id, sender_user_id);
    registry.send_to_connections(&targets, msg)
}
