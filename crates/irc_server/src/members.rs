//! Channel membership: who is on a channel and which privilege prefixes
//! they currently hold.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Client, ClientId};
use crate::modes::MemberModes;

/// One occupant of a channel: the connection plus its privilege bits.
pub struct Member {
    pub client: Arc<dyn Client>,
    pub modes: MemberModes,
}

impl Member {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Member {
            client,
            modes: MemberModes::default(),
        }
    }
}

/// The set of members currently on a channel, keyed by the stable
/// `ClientId` rather than nickname since nicks are mutable but membership
/// identity is not.
#[derive(Default)]
pub struct MemberSet {
    members: HashMap<ClientId, Member>,
}

impl MemberSet {
    pub fn new() -> Self {
        MemberSet::default()
    }

    pub fn has(&self, id: ClientId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn has_mode(&self, id: ClientId, mode: crate::modes::PrivilegeMode) -> bool {
        self.members.get(&id).is_some_and(|m| m.modes.has(mode))
    }

    /// Adds `client` with the given starting modes (e.g. Founder+Operator
    /// for the first joiner). No-op if already present.
    pub fn add(&mut self, client: Arc<dyn Client>, modes: MemberModes) {
        self.members
            .entry(client.id())
            .or_insert_with(|| Member { client, modes });
    }

    /// Removes a member. Returns the removed entry, if any.
    pub fn remove(&mut self, id: ClientId) -> Option<Member> {
        self.members.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Member> {
        self.members.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Finds a member by nickname (folded comparison), used by commands
    /// that address a target nick within a channel (KICK, INVITE checks).
    pub fn find_by_nick(&self, nick: &crate::name::Name) -> Option<&Member> {
        self.members.values().find(|m| &m.client.nick() == nick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::FixtureClient;
    use crate::modes::PrivilegeMode;

    #[test]
    fn add_is_idempotent_on_existing_member() {
        let mut set = MemberSet::new();
        let alice = FixtureClient::new("Alice", "a", "host");
        set.add(alice.clone(), MemberModes::default());
        let mut founder_modes = MemberModes::default();
        founder_modes.set(PrivilegeMode::Founder, true);
        set.add(alice.clone(), founder_modes);
        assert!(!set.get(alice.id()).unwrap().modes.has(PrivilegeMode::Founder));
    }

    #[test]
    fn remove_returns_the_removed_member() {
        let mut set = MemberSet::new();
        let alice = FixtureClient::new("Alice", "a", "host");
        set.add(alice.clone(), MemberModes::default());
        assert!(set.remove(alice.id()).is_some());
        assert!(set.remove(alice.id()).is_none());
        assert!(!set.has(alice.id()));
    }

    #[test]
    fn find_by_nick_is_case_folded() {
        let mut set = MemberSet::new();
        let alice = FixtureClient::new("Alice", "a", "host");
        set.add(alice.clone(), MemberModes::default());
        let found = set.find_by_nick(&crate::name::Name::new("ALICE"));
        assert_eq!(found.unwrap().client.id(), alice.id());
    }

    #[test]
    fn has_mode_is_false_for_absent_member() {
        let set = MemberSet::new();
        assert!(!set.has_mode(42, PrivilegeMode::Voice));
    }
}
