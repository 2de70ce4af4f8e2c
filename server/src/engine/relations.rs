//! State machines for server membership and friendship.
//!
//! Both machines are pure: the engine reads the current state from the
//! entity graph, asks for the transition here, and only then writes. An
//! invalid transition is an error before anything touches the store.

use super::error::{ChatError, ChatResult};
use super::permissions::{UserRelations, has_pending_request_from, is_friend_of};

/// A user's standing in one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    NotMember,
    Member,
    /// The server's creator. Always a member, and no transition leaves this state.
    Author,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipAction {
    /// Join through a valid, unexpired invite.
    Redeem,
    /// Voluntary leave by the user.
    Leave,
    /// Removal by the server admin. Admin rights are checked by the guard
    /// before this transition is asked for.
    Kick,
}

/// The outcome of a valid transition: the new state and whether the store
/// must be written to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub next: S,
    pub write: bool,
}

impl<S> Transition<S> {
    fn write(next: S) -> Self {
        Self { next, write: true }
    }

    fn noop(next: S) -> Self {
        Self { next, write: false }
    }
}

impl MembershipState {
    pub fn of(user_id: &str, author_id: &str, is_member: bool) -> Self {
        if user_id == author_id {
            MembershipState::Author
        } else if is_member {
            MembershipState::Member
        } else {
            MembershipState::NotMember
        }
    }

    #[cfg(test)]
    pub fn is_member(self) -> bool {
        !matches!(self, MembershipState::NotMember)
    }

    pub fn apply(self, action: MembershipAction) -> ChatResult<Transition<Self>> {
        use MembershipAction::*;
        use MembershipState::*;

        match (self, action) {
            (NotMember, Redeem) => Ok(Transition::write(Member)),
            // Redeeming again is a harmless no-op.
            (Member | Author, Redeem) => Ok(Transition::noop(self)),

            (Member, Leave | Kick) => Ok(Transition::write(NotMember)),
            (NotMember, Leave | Kick) => Err(ChatError::NotServerMember),
            (Author, Leave) => Err(ChatError::not_permitted(
                "the server author cannot leave their own server",
            )),
            (Author, Kick) => Err(ChatError::NotServerAdmin),
        }
    }
}

/// The friendship state of an ordered pair, seen from the first user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendState {
    Strangers,
    /// This user has a pending request to the other.
    RequestSent,
    /// The other user has a pending request to this user.
    RequestReceived,
    Friends,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendAction {
    Send,
    Accept,
    Decline,
    Remove,
}

impl FriendState {
    /// Derive the state between `relations.user_id` and `other_id`.
    /// Friendship wins over a pending request if the store holds both.
    pub fn between(relations: &UserRelations, other_id: &str) -> Self {
        if is_friend_of(other_id, relations) {
            FriendState::Friends
        } else if has_pending_request_from(other_id, relations) {
            FriendState::RequestReceived
        } else if relations.outgoing.contains(other_id) {
            FriendState::RequestSent
        } else {
            FriendState::Strangers
        }
    }

    /// The same pair seen from the other side.
    #[cfg(test)]
    pub fn mirrored(self) -> Self {
        match self {
            FriendState::RequestSent => FriendState::RequestReceived,
            FriendState::RequestReceived => FriendState::RequestSent,
            other => other,
        }
    }

    pub fn apply(self, action: FriendAction) -> ChatResult<Transition<Self>> {
        use FriendAction::*;
        use FriendState::*;

        match (self, action) {
            (Strangers, Send) => Ok(Transition::write(RequestSent)),
            (RequestSent, Send) => Err(ChatError::not_permitted("friend request already sent")),
            (RequestReceived, Send) => Err(ChatError::not_permitted(
                "this user already sent you a friend request",
            )),
            (Friends, Send) => Err(ChatError::not_permitted("you are already friends")),

            (RequestReceived, Accept) => Ok(Transition::write(Friends)),
            (RequestReceived, Decline) => Ok(Transition::write(Strangers)),
            (_, Accept | Decline) => Err(ChatError::not_permitted(
                "no pending friend request from this user",
            )),

            (Friends, Remove) => Ok(Transition::write(Strangers)),
            (_, Remove) => Err(ChatError::not_permitted("you are not friends with this user")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_membership_transitions() {
        use MembershipAction::*;
        use MembershipState::*;

        assert_eq!(NotMember.apply(Redeem).unwrap(), Transition::write(Member));
        assert_eq!(Member.apply(Redeem).unwrap(), Transition::noop(Member));
        assert_eq!(Author.apply(Redeem).unwrap(), Transition::noop(Author));
        assert_eq!(Member.apply(Leave).unwrap(), Transition::write(NotMember));
        assert_eq!(Member.apply(Kick).unwrap(), Transition::write(NotMember));
        assert!(matches!(NotMember.apply(Leave), Err(ChatError::NotServerMember)));
        assert!(matches!(NotMember.apply(Kick), Err(ChatError::NotServerMember)));
        assert!(matches!(
            Author.apply(Leave),
            Err(ChatError::OperationNotPermitted(_))
        ));
        assert!(matches!(Author.apply(Kick), Err(ChatError::NotServerAdmin)));
    }

    #[test]
    fn test_membership_state_of() {
        assert_eq!(MembershipState::of("a", "a", true), MembershipState::Author);
        assert_eq!(MembershipState::of("b", "a", true), MembershipState::Member);
        assert_eq!(MembershipState::of("b", "a", false), MembershipState::NotMember);
        assert!(MembershipState::Author.is_member());
        assert!(!MembershipState::NotMember.is_member());
    }

    #[test]
    fn test_friend_request_protocol() {
        use FriendAction::*;
        use FriendState::*;

        assert_eq!(Strangers.apply(Send).unwrap().next, RequestSent);
        assert_eq!(RequestReceived.apply(Accept).unwrap().next, Friends);
        assert_eq!(RequestReceived.apply(Decline).unwrap().next, Strangers);
        assert_eq!(Friends.apply(Remove).unwrap().next, Strangers);

        for state in [RequestSent, RequestReceived, Friends] {
            assert!(state.apply(Send).is_err(), "send from {state:?}");
        }
        for state in [Strangers, RequestSent, Friends] {
            assert!(state.apply(Accept).is_err(), "accept from {state:?}");
            assert!(state.apply(Decline).is_err(), "decline from {state:?}");
        }
        for state in [Strangers, RequestSent, RequestReceived] {
            assert!(state.apply(Remove).is_err(), "remove from {state:?}");
        }
    }

    #[test]
    fn test_decline_then_resend_succeeds() {
        use FriendAction::*;
        let sender = FriendState::Strangers.apply(Send).unwrap().next;
        let receiver = sender.mirrored().apply(Decline).unwrap().next;
        assert_eq!(receiver.mirrored(), FriendState::Strangers);
        assert!(receiver.mirrored().apply(Send).is_ok());
    }

    #[test]
    fn test_between_reads_edge_sets() {
        let mut rel = UserRelations {
            user_id: "a".into(),
            ..Default::default()
        };
        assert_eq!(FriendState::between(&rel, "b"), FriendState::Strangers);
        rel.outgoing.insert("b".into());
        assert_eq!(FriendState::between(&rel, "b"), FriendState::RequestSent);
        rel.outgoing.clear();
        rel.incoming.insert("b".into());
        assert_eq!(FriendState::between(&rel, "b"), FriendState::RequestReceived);
        rel.friends.insert("b".into());
        assert_eq!(FriendState::between(&rel, "b"), FriendState::Friends);
    }

    /// Directed edge sets driven only through the state machine, the way
    /// the engine drives the store.
    #[derive(Default)]
    struct EdgeModel {
        friends: HashSet<(u8, u8)>,
        requests: HashSet<(u8, u8)>,
    }

    impl EdgeModel {
        fn relations(&self, user: u8) -> UserRelations {
            let id = |u: u8| u.to_string();
            UserRelations {
                user_id: id(user),
                friends: self
                    .friends
                    .iter()
                    .filter(|(a, _)| *a == user)
                    .map(|(_, b)| id(*b))
                    .collect(),
                incoming: self
                    .requests
                    .iter()
                    .filter(|(_, t)| *t == user)
                    .map(|(r, _)| id(*r))
                    .collect(),
                outgoing: self
                    .requests
                    .iter()
                    .filter(|(r, _)| *r == user)
                    .map(|(_, t)| id(*t))
                    .collect(),
            }
        }

        fn act(&mut self, actor: u8, other: u8, action: FriendAction) {
            let state = FriendState::between(&self.relations(actor), &other.to_string());
            let Ok(t) = state.apply(action) else {
                return;
            };
            if !t.write {
                return;
            }
            match action {
                FriendAction::Send => {
                    self.requests.insert((actor, other));
                }
                FriendAction::Accept => {
                    self.requests.remove(&(other, actor));
                    self.requests.remove(&(actor, other));
                    self.friends.insert((actor, other));
                    self.friends.insert((other, actor));
                }
                FriendAction::Decline => {
                    self.requests.remove(&(other, actor));
                }
                FriendAction::Remove => {
                    self.friends.remove(&(actor, other));
                    self.friends.remove(&(other, actor));
                }
            }
        }
    }

    fn action() -> impl Strategy<Value = FriendAction> {
        prop_oneof![
            Just(FriendAction::Send),
            Just(FriendAction::Accept),
            Just(FriendAction::Decline),
            Just(FriendAction::Remove),
        ]
    }

    proptest! {
        #[test]
        fn friendship_stays_symmetric(
            ops in proptest::collection::vec((0u8..4, 0u8..4, action()), 0..64)
        ) {
            let mut model = EdgeModel::default();
            for (actor, other, action) in ops {
                if actor == other {
                    continue;
                }
                model.act(actor, other, action);

                for &(a, b) in &model.friends {
                    prop_assert!(model.friends.contains(&(b, a)));
                    prop_assert!(!model.requests.contains(&(a, b)));
                    prop_assert!(!model.requests.contains(&(b, a)));
                }
                for &(r, t) in &model.requests {
                    prop_assert!(!model.requests.contains(&(t, r)));
                }
            }
        }

        #[test]
        fn views_from_both_sides_agree(
            ops in proptest::collection::vec((0u8..3, 0u8..3, action()), 0..48)
        ) {
            let mut model = EdgeModel::default();
            for (actor, other, action) in ops {
                if actor == other {
                    continue;
                }
                model.act(actor, other, action);
            }
            for a in 0u8..3 {
                for b in 0u8..3 {
                    if a == b {
                        continue;
                    }
                    let ab = FriendState::between(&model.relations(a), &b.to_string());
                    let ba = FriendState::between(&model.relations(b), &a.to_string());
                    prop_assert_eq!(ab, ba.mirrored());
                }
            }
        }

        #[test]
        fn author_never_leaves_membership(
            actions in proptest::collection::vec(
                prop_oneof![
                    Just(MembershipAction::Redeem),
                    Just(MembershipAction::Leave),
                    Just(MembershipAction::Kick),
                ],
                0..32,
            )
        ) {
            let mut state = MembershipState::Author;
            for action in actions {
                if let Ok(t) = state.apply(action) {
                    state = t.next;
                }
                prop_assert_eq!(state, MembershipState::Author);
            }
        }
    }
}
