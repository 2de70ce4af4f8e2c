use std::collections::HashSet;

use super::error::{ChatError, ChatResult};

/// The facts about a server that authorization decisions need: who created
/// it and who belongs to it.
#[derive(Debug, Clone)]
pub struct ServerAccess {
    pub server_id: String,
    pub author_id: String,
    pub members: HashSet<String>,
}

/// One user's friendship and pending-request edge sets.
#[derive(Debug, Clone, Default)]
pub struct UserRelations {
    pub user_id: String,
    pub friends: HashSet<String>,
    /// Users with a pending request to this user.
    pub incoming: HashSet<String>,
    /// Users this user has a pending request to.
    pub outgoing: HashSet<String>,
}

/// Fails with `NotLoggedIn` unless an acting user is present.
pub fn require_authenticated(actor: Option<&str>) -> ChatResult<&str> {
    actor.ok_or(ChatError::NotLoggedIn)
}

pub fn is_server_member(user_id: &str, server: &ServerAccess) -> bool {
    server.members.contains(user_id)
}

pub fn is_server_admin(user_id: &str, server: &ServerAccess) -> bool {
    server.author_id == user_id
}

/// True iff `user_id` is in `target`'s friend set.
pub fn is_friend_of(user_id: &str, target: &UserRelations) -> bool {
    target.friends.contains(user_id)
}

/// True iff `requester_id` has a pending request to `target`.
pub fn has_pending_request_from(requester_id: &str, target: &UserRelations) -> bool {
    target.incoming.contains(requester_id)
}

pub fn require_member(user_id: &str, server: &ServerAccess) -> ChatResult<()> {
    if is_server_member(user_id, server) {
        Ok(())
    } else {
        Err(ChatError::NotServerMember)
    }
}

pub fn require_admin(user_id: &str, server: &ServerAccess) -> ChatResult<()> {
    if is_server_admin(user_id, server) {
        Ok(())
    } else {
        Err(ChatError::NotServerAdmin)
    }
}
