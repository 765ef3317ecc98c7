//! The channel entity (C5): admission, membership, conversation, topic and
//! NAMES. Mode mutation itself is delegated to `mode_engine`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::client::{Capability, Client, ClientId};
use crate::constants::*;
use crate::mask::UserMaskSet;
use crate::members::MemberSet;
use crate::mode_engine;
use crate::modes::{BooleanMode, ChannelFlags, ChannelModeChange, MemberModes, PrivilegeMode};
use crate::name::Name;
use crate::persistence::ChannelSnapshot;
use crate::server::{ChannelRegistry, ServerContext};

/// Mutable channel state, guarded by a single lock. Mutate, snapshot the
/// recipient list, then release the lock before any socket I/O.
pub struct ChannelInner {
    pub(crate) flags: ChannelFlags,
    pub(crate) key: Option<String>,
    pub(crate) user_limit: Option<u32>,
    pub(crate) topic: Option<String>,
    pub(crate) topic_set_by: Option<String>,
    pub(crate) topic_set_at: Option<i64>,
    pub(crate) ban: UserMaskSet,
    pub(crate) except: UserMaskSet,
    pub(crate) invite: UserMaskSet,
    pub(crate) members: MemberSet,
}

impl Default for ChannelInner {
    fn default() -> Self {
        ChannelInner {
            flags: ChannelFlags::default(),
            key: None,
            user_limit: None,
            topic: None,
            topic_set_by: None,
            topic_set_at: None,
            ban: UserMaskSet::new(),
            except: UserMaskSet::new(),
            invite: UserMaskSet::new(),
            members: MemberSet::new(),
        }
    }
}

pub struct Channel {
    pub(crate) name: Name,
    pub(crate) server: Arc<dyn ServerContext>,
    pub(crate) inner: Mutex<ChannelInner>,
}

impl Channel {
    pub fn new(name: Name, server: Arc<dyn ServerContext>) -> Arc<Self> {
        Arc::new(Channel {
            name,
            server,
            inner: Mutex::new(ChannelInner::default()),
        })
    }

    /// Rebuilds a channel from a persisted row at startup. Membership is
    /// never persisted, so the channel comes back empty; the founder grant
    /// does not re-fire because the channel is (by construction) persistent.
    pub fn from_snapshot(snapshot: ChannelSnapshot, server: Arc<dyn ServerContext>) -> Arc<Self> {
        let mut inner = ChannelInner {
            flags: ChannelFlags::from_letters(&snapshot.mode_letters),
            key: snapshot.key,
            user_limit: snapshot.user_limit,
            topic: snapshot.topic,
            topic_set_by: snapshot.topic_set_by,
            topic_set_at: snapshot.topic_set_at,
            ban: UserMaskSet::from_serialized(&snapshot.ban_masks),
            except: UserMaskSet::from_serialized(&snapshot.except_masks),
            invite: UserMaskSet::from_serialized(&snapshot.invite_masks),
            members: MemberSet::new(),
        };
        inner.flags.set(BooleanMode::Persistent, true);
        Arc::new(Channel {
            name: Name::new(snapshot.name),
            server,
            inner: Mutex::new(inner),
        })
    }

    pub fn display_name(&self) -> String {
        self.name.as_str().to_string()
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Whether the registry should drop this channel: non-persistent and
    /// currently empty. Returns `false` (conservatively keeps the channel)
    /// if the lock is momentarily contended.
    pub fn is_empty_snapshot(&self) -> bool {
        match self.inner.try_lock() {
            Ok(inner) => !inner.flags.has(BooleanMode::Persistent) && inner.members.is_empty(),
            Err(_) => false,
        }
    }

    fn reply(&self, client: &Arc<dyn Client>, code: &str, params: &[&str]) {
        let nick = client.nick_string();
        let mut args: Vec<&str> = Vec::with_capacity(params.len() + 1);
        args.push(&nick);
        args.extend_from_slice(params);
        client.send(&[], self.server.server_name(), code, &args);
    }

    fn broadcast(members: &[Arc<dyn Client>], source: &str, command: &str, args: &[&str]) {
        for member in members {
            member.send(&[], source, command, args);
        }
    }

    async fn persist(&self) {
        let snapshot = {
            let inner = self.inner.lock().await;
            ChannelSnapshot {
                name: self.display_name(),
                topic: inner.topic.clone(),
                topic_set_by: inner.topic_set_by.clone(),
                topic_set_at: inner.topic_set_at,
                key: inner.key.clone(),
                user_limit: inner.user_limit,
                mode_letters: inner.flags.letters(),
                ban_masks: inner.ban.serialize(),
                except_masks: inner.except.serialize(),
                invite_masks: inner.invite.serialize(),
            }
        };
        let persistent = snapshot.mode_letters.contains(BooleanMode::Persistent.letter());
        let store = self.server.channel_store();
        let result = if persistent {
            store.save(&snapshot).await
        } else {
            store.delete(&snapshot.name).await
        };
        if let Err(e) = result {
            log::error!("persisting channel {}: {e}", self.display_name());
        }
    }

    // --- 4.4 admission and membership ------------------------------------

    pub async fn join(self: &Arc<Self>, client: Arc<dyn Client>, key: Option<&str>) {
        let members_snapshot: Vec<Arc<dyn Client>>;
        {
            let mut inner = self.inner.lock().await;

            if inner.members.has(client.id()) {
                return;
            }
            if let Some(limit) = inner.user_limit {
                if limit > 0 && inner.members.len() as u32 >= limit {
                    drop(inner);
                    self.reply(&client, ERR_CHANNELISFULL, &[&self.display_name(), "Cannot join channel (+l)"]);
                    return;
                }
            }
            if let Some(channel_key) = inner.key.clone() {
                if key != Some(channel_key.as_str()) {
                    drop(inner);
                    self.reply(&client, ERR_BADCHANNELKEY, &[&self.display_name(), "Cannot join channel (+k)"]);
                    return;
                }
            }
            let user_host = client.user_host();
            let invited = inner.invite.matches(&user_host);
            if inner.flags.has(BooleanMode::InviteOnly) && !invited {
                drop(inner);
                self.reply(&client, ERR_INVITEONLYCHAN, &[&self.display_name(), "Cannot join channel (+i)"]);
                return;
            }
            if inner.ban.matches(&user_host) && !invited && !inner.except.matches(&user_host) {
                drop(inner);
                self.reply(&client, ERR_BANNEDFROMCHAN, &[&self.display_name(), "Cannot join channel (+b)"]);
                return;
            }

            let grant_founder = !inner.flags.has(BooleanMode::Persistent) && inner.members.is_empty();
            let mut modes = MemberModes::default();
            if grant_founder {
                modes.set(PrivilegeMode::Founder, true);
                modes.set(PrivilegeMode::Operator, true);
            }
            inner.members.add(client.clone(), modes);
            client.mark_joined(&self.name);

            members_snapshot = inner.members.iter().map(|m| m.client.clone()).collect();
        }

        let source = client.nick_mask_string();
        Self::broadcast(&members_snapshot, &source, "JOIN", &[&self.display_name()]);

        self.get_topic(client.clone()).await;
        self.names(client).await;
    }

    pub async fn part(&self, client_id: ClientId, message: &str) {
        let members_snapshot: Vec<Arc<dyn Client>>;
        let leaver: Arc<dyn Client>;
        {
            let mut inner = self.inner.lock().await;
            let Some(member) = inner.members.get(client_id) else {
                return;
            };
            leaver = member.client.clone();
            members_snapshot = inner.members.iter().map(|m| m.client.clone()).collect();
            inner.members.remove(client_id);
            leaver.mark_left(&self.name);
        }

        let source = leaver.nick_mask_string();
        Self::broadcast(&members_snapshot, &source, "PART", &[&self.display_name(), message]);

        self.server.remove_if_empty(&self.name);
        self.persist().await;
    }

    pub async fn part_checked(&self, client: Arc<dyn Client>, message: &str) {
        let is_member = {
            let inner = self.inner.lock().await;
            inner.members.has(client.id())
        };
        if !is_member {
            self.reply(&client, ERR_NOTONCHANNEL, &[&self.display_name(), "You're not on that channel"]);
            return;
        }
        self.part(client.id(), message).await;
    }

    /// Internal removal used by disconnect handling: no PART broadcast.
    pub async fn quit(&self, client_id: ClientId) {
        let mut inner = self.inner.lock().await;
        if let Some(member) = inner.members.remove(client_id) {
            member.client.mark_left(&self.name);
        }
        let should_drop = !inner.flags.has(BooleanMode::Persistent) && inner.members.is_empty();
        drop(inner);
        if should_drop {
            self.server.remove_if_empty(&self.name);
        }
    }

    pub async fn kick(&self, actor: Arc<dyn Client>, target_nick: &Name, comment: &str) {
        let members_snapshot: Vec<Arc<dyn Client>>;
        let target: Arc<dyn Client>;
        {
            let inner = self.inner.lock().await;
            let actor_member = inner.members.get(actor.id());
            let on_channel_or_soper = actor_member.is_some() || actor.is_server_operator();
            if !on_channel_or_soper {
                drop(inner);
                self.reply(&actor, ERR_NOTONCHANNEL, &[&self.display_name(), "You're not on that channel"]);
                return;
            }
            let is_operator = actor_member.map(|m| m.modes.is_channel_operator()).unwrap_or(false);
            if !is_operator {
                drop(inner);
                self.reply(&actor, ERR_CANNOTSENDTOCHAN, &[&self.display_name(), "Cannot send to channel"]);
                return;
            }
            let Some(target_member) = inner.members.find_by_nick(target_nick) else {
                drop(inner);
                self.reply(&actor, ERR_USERNOTINCHANNEL, &[target_nick.as_str(), &self.display_name(), "They aren't on that channel"]);
                return;
            };
            target = target_member.client.clone();
            members_snapshot = inner.members.iter().map(|m| m.client.clone()).collect();
        }

        let source = actor.nick_mask_string();
        let target_nick_string = target.nick_string();
        Self::broadcast(&members_snapshot, &source, "KICK", &[&self.display_name(), &target_nick_string, comment]);

        self.quit(target.id()).await;
        self.persist().await;
    }

    pub async fn invite(&self, invitee: Arc<dyn Client>, inviter: Arc<dyn Client>) {
        let invite_only;
        {
            let mut inner = self.inner.lock().await;
            invite_only = inner.flags.has(BooleanMode::InviteOnly);
            let inviter_is_operator = inner.members.get(inviter.id()).map(|m| m.modes.is_channel_operator()).unwrap_or(false);
            if invite_only && !inviter_is_operator {
                drop(inner);
                self.reply(&inviter, ERR_CHANOPRIVSNEEDED, &[&self.display_name(), "You're not channel operator"]);
                return;
            }
            if !inner.members.has(inviter.id()) {
                drop(inner);
                self.reply(&inviter, ERR_NOTONCHANNEL, &[&self.display_name(), "You're not on that channel"]);
                return;
            }
            if invite_only {
                inner.invite.add(&invitee.user_host());
            }
        }
        if invite_only {
            self.persist().await;
        }

        self.reply(&inviter, RPL_INVITING, &[&invitee.nick_string(), &self.display_name()]);
        let source = inviter.nick_mask_string();
        invitee.send(&[], &source, "INVITE", &[&invitee.nick_string(), &self.display_name()]);
        if invitee.is_away() {
            let message = invitee.away_message().unwrap_or_default();
            self.reply(&inviter, RPL_AWAY, &[&invitee.nick_string(), &message]);
        }
    }

    // --- 4.5 conversation --------------------------------------------------

    pub async fn can_speak(&self, client_id: ClientId, is_server_operator: bool) -> bool {
        if is_server_operator {
            return true;
        }
        let inner = self.inner.lock().await;
        let member = inner.members.get(client_id);
        if inner.flags.has(BooleanMode::NoOutside) && member.is_none() {
            return false;
        }
        if inner.flags.has(BooleanMode::Moderated) {
            return member.map(|m| m.modes.can_speak_while_moderated()).unwrap_or(false);
        }
        true
    }

    pub async fn privmsg(&self, sender: Arc<dyn Client>, text: &str) {
        if !self.can_speak(sender.id(), sender.is_server_operator()).await {
            self.reply(&sender, ERR_CANNOTSENDTOCHAN, &[&self.display_name(), "Cannot send to channel"]);
            return;
        }
        let members_snapshot: Vec<Arc<dyn Client>> = {
            let inner = self.inner.lock().await;
            inner
                .members
                .iter()
                .filter(|m| m.client.id() != sender.id())
                .map(|m| m.client.clone())
                .collect()
        };
        let source = sender.nick_mask_string();
        Self::broadcast(&members_snapshot, &source, "PRIVMSG", &[&self.display_name(), text]);
    }

    pub async fn notice(&self, sender: Arc<dyn Client>, text: &str) {
        if !self.can_speak(sender.id(), sender.is_server_operator()).await {
            return;
        }
        let members_snapshot: Vec<Arc<dyn Client>> = {
            let inner = self.inner.lock().await;
            inner
                .members
                .iter()
                .filter(|m| m.client.id() != sender.id())
                .map(|m| m.client.clone())
                .collect()
        };
        let source = sender.nick_mask_string();
        Self::broadcast(&members_snapshot, &source, "NOTICE", &[&self.display_name(), text]);
    }

    pub async fn get_topic(&self, client: Arc<dyn Client>) {
        let (is_member, topic) = {
            let inner = self.inner.lock().await;
            (inner.members.has(client.id()), inner.topic.clone())
        };
        if !is_member {
            self.reply(&client, ERR_NOTONCHANNEL, &[&self.display_name(), "You're not on that channel"]);
            return;
        }
        if let Some(topic) = topic {
            self.reply(&client, RPL_TOPIC, &[&self.display_name(), &topic]);
        }
    }

    pub async fn set_topic(&self, client: Arc<dyn Client>, topic: &str) {
        {
            let inner = self.inner.lock().await;
            let is_member = inner.members.has(client.id());
            if !is_member && !client.is_server_operator() {
                drop(inner);
                self.reply(&client, ERR_NOTONCHANNEL, &[&self.display_name(), "You're not on that channel"]);
                return;
            }
            let is_operator = inner.members.get(client.id()).map(|m| m.modes.is_channel_operator()).unwrap_or(false) || client.is_server_operator();
            if inner.flags.has(BooleanMode::OpOnlyTopic) && !is_operator {
                drop(inner);
                self.reply(&client, ERR_CHANOPRIVSNEEDED, &[&self.display_name(), "You're not channel operator"]);
                return;
            }
        }

        let members_snapshot: Vec<Arc<dyn Client>> = {
            let mut inner = self.inner.lock().await;
            inner.topic = Some(topic.to_string());
            inner.topic_set_by = Some(client.nick_mask_string());
            inner.topic_set_at = Some(Utc::now().timestamp());
            inner.members.iter().map(|m| m.client.clone()).collect()
        };

        let source = client.nick_mask_string();
        Self::broadcast(&members_snapshot, &source, "TOPIC", &[&self.display_name(), topic]);
        self.persist().await;
    }

    pub async fn names(&self, requester: Arc<dyn Client>) {
        let server_name = self.server.server_name().to_string();
        let requester_nick = requester.nick_string();
        let budget = 480usize.saturating_sub(server_name.len()).saturating_sub(requester_nick.len());
        let multi_prefix = requester.has_capability(Capability::MultiPrefix);

        let tokens: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .members
                .iter()
                .map(|m| format!("{}{}", m.modes.prefixes(multi_prefix), m.client.nick_string()))
                .collect()
        };

        let mut line = String::new();
        for token in tokens {
            let candidate_len = if line.is_empty() { token.len() } else { line.len() + 1 + token.len() };
            if !line.is_empty() && candidate_len > budget {
                self.reply(&requester, RPL_NAMREPLY, &["=", &self.display_name(), &line]);
                line = token;
            } else {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(&token);
            }
        }
        self.reply(&requester, RPL_NAMREPLY, &["=", &self.display_name(), &line]);
        self.reply(&requester, RPL_ENDOFNAMES, &[&self.display_name(), "End of /NAMES list."]);
    }

    // --- 4.6 mode engine -----------------------------------------------------

    pub async fn apply_mode_changes(&self, actor: Arc<dyn Client>, changes: Vec<ChannelModeChange>) {
        if changes.is_empty() {
            let mode_string = {
                let inner = self.inner.lock().await;
                mode_engine::mode_string(&inner, &actor)
            };
            self.reply(&actor, RPL_CHANNELMODEIS, &[&self.display_name(), &mode_string]);
            return;
        }

        let (applied, members_snapshot) = {
            let mut inner = self.inner.lock().await;
            let applied = mode_engine::apply(&mut inner, &actor, &self.server, &self.name, changes);
            let members_snapshot: Vec<Arc<dyn Client>> = inner.members.iter().map(|m| m.client.clone()).collect();
            (applied, members_snapshot)
        };

        if applied.is_empty() {
            return;
        }

        let rendered = mode_engine::render_change_line(&applied);
        let source = actor.nick_mask_string();
        let display_name = self.display_name();
        let mut args: Vec<&str> = vec![&display_name, &rendered.command];
        for extra in &rendered.args {
            args.push(extra);
        }
        Self::broadcast(&members_snapshot, &source, "MODE", &args);

        self.persist().await;
    }
}
