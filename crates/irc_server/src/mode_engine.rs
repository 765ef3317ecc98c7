//! Mode engine (C6): applies a batch of `ChannelModeChange`s against a
//! channel's state and renders the resulting `MODE` line / `ModeString`.

use std::sync::Arc;

use crate::channel::ChannelInner;
use crate::client::Client;
use crate::constants::*;
use crate::modes::{ChangeOp, ChannelMode, ChannelModeChange, MaskListKind, PrivilegeMode};
use crate::name::Name;
use crate::server::{ClientRegistry, ServerContext};

fn reply(server_name: &str, client: &Arc<dyn Client>, code: &str, params: &[&str]) {
    let nick = client.nick_string();
    let mut args: Vec<&str> = Vec::with_capacity(params.len() + 1);
    args.push(&nick);
    args.extend_from_slice(params);
    client.send(&[], server_name, code, &args);
}

fn is_operator(inner: &ChannelInner, actor: &Arc<dyn Client>) -> bool {
    inner
        .members
        .get(actor.id())
        .map(|m| m.modes.is_channel_operator())
        .unwrap_or(false)
        || actor.is_server_operator()
}

/// Applies every requested change in order and returns the subsequence that
/// actually mutated state, sending any error/list replies directly to
/// `actor` along the way.
pub fn apply(
    inner: &mut ChannelInner,
    actor: &Arc<dyn Client>,
    server: &Arc<dyn ServerContext>,
    channel_name: &Name,
    changes: Vec<ChannelModeChange>,
) -> Vec<ChannelModeChange> {
    let server_name = server.server_name();
    let mut applied = Vec::new();

    for change in changes {
        match change.mode {
            ChannelMode::Boolean(boolean_mode) => {
                if !is_operator(inner, actor) {
                    reply(server_name, actor, ERR_CHANOPRIVSNEEDED, &[channel_name.as_str(), "You're not channel operator"]);
                    continue;
                }
                let target_value = change.op == ChangeOp::Add;
                if change.op != ChangeOp::List && inner.flags.set(boolean_mode, target_value) {
                    applied.push(change);
                }
            }
            ChannelMode::Key => {
                if !is_operator(inner, actor) {
                    reply(server_name, actor, ERR_CHANOPRIVSNEEDED, &[channel_name.as_str(), "You're not channel operator"]);
                    continue;
                }
                match change.op {
                    ChangeOp::Add => {
                        let Some(arg) = change.arg.clone().filter(|a| !a.is_empty()) else {
                            reply(server_name, actor, ERR_NEEDMOREPARAMS, &["MODE"]);
                            continue;
                        };
                        if inner.key.as_deref() != Some(arg.as_str()) {
                            inner.key = Some(arg);
                            applied.push(change);
                        }
                    }
                    ChangeOp::Remove => {
                        inner.key = None;
                        applied.push(ChannelModeChange::new(ChannelMode::Key, ChangeOp::Remove, None));
                    }
                    ChangeOp::List => {}
                }
            }
            ChannelMode::UserLimit => {
                if !is_operator(inner, actor) {
                    reply(server_name, actor, ERR_CHANOPRIVSNEEDED, &[channel_name.as_str(), "You're not channel operator"]);
                    continue;
                }
                match change.op {
                    ChangeOp::Add => {
                        let Some(arg) = &change.arg else {
                            reply(server_name, actor, ERR_NEEDMOREPARAMS, &["MODE"]);
                            continue;
                        };
                        match arg.parse::<u32>() {
                            Ok(0) => {}
                            Ok(n) if Some(n) == inner.user_limit => {}
                            Ok(n) => {
                                inner.user_limit = Some(n);
                                applied.push(change);
                            }
                            Err(_) => reply(server_name, actor, ERR_NEEDMOREPARAMS, &["MODE"]),
                        }
                    }
                    ChangeOp::Remove => {
                        if inner.user_limit.take().is_some() {
                            applied.push(ChannelModeChange::new(ChannelMode::UserLimit, ChangeOp::Remove, None));
                        }
                    }
                    ChangeOp::List => {}
                }
            }
            ChannelMode::Mask(kind) => {
                let wants_list = change.op == ChangeOp::List || change.arg.as_deref().is_none_or(str::is_empty);
                if wants_list {
                    show_mask_list(inner, server_name, actor, channel_name, kind);
                    continue;
                }
                if !is_operator(inner, actor) {
                    reply(server_name, actor, ERR_CHANOPRIVSNEEDED, &[channel_name.as_str(), "You're not channel operator"]);
                    continue;
                }
                let arg = change.arg.clone().unwrap();
                let list = mask_list_mut(inner, kind);
                let changed = match change.op {
                    ChangeOp::Add => list.add(&arg),
                    ChangeOp::Remove => list.remove(&arg),
                    ChangeOp::List => false,
                };
                if changed {
                    applied.push(change);
                }
            }
            ChannelMode::Privilege(privilege) => {
                let Some(target_nick_str) = change.arg.clone() else {
                    reply(server_name, actor, ERR_NEEDMOREPARAMS, &["MODE"]);
                    continue;
                };
                let target_nick = Name::new(target_nick_str);
                let is_self_remove = change.op == ChangeOp::Remove && target_nick == actor.nick();

                if !is_self_remove {
                    let actor_highest = inner.members.get(actor.id()).and_then(|m| m.modes.highest());
                    let authorized = if privilege == PrivilegeMode::Admin {
                        actor_highest == Some(PrivilegeMode::Founder)
                    } else {
                        actor_highest.map(|highest| highest >= privilege).unwrap_or(false)
                    };
                    if !authorized {
                        reply(server_name, actor, ERR_CHANOPRIVSNEEDED, &[channel_name.as_str(), "You're not channel operator"]);
                        continue;
                    }
                }

                let Some(target_client) = server.find_by_nick(&target_nick) else {
                    reply(server_name, actor, ERR_NOSUCHNICK, &[target_nick.as_str(), "No such nick/channel"]);
                    continue;
                };
                let Some(target_member) = inner.members.get_mut(target_client.id()) else {
                    reply(server_name, actor, ERR_USERNOTINCHANNEL, &[target_nick.as_str(), channel_name.as_str(), "They aren't on that channel"]);
                    continue;
                };
                let value = change.op == ChangeOp::Add;
                if target_member.modes.set(privilege, value) {
                    applied.push(ChannelModeChange::new(ChannelMode::Privilege(privilege), change.op, Some(target_nick.as_str().to_string())));
                }
            }
        }
    }

    applied
}

fn mask_list_mut<'a>(inner: &'a mut ChannelInner, kind: MaskListKind) -> &'a mut crate::mask::UserMaskSet {
    match kind {
        MaskListKind::Ban => &mut inner.ban,
        MaskListKind::Except => &mut inner.except,
        MaskListKind::Invite => &mut inner.invite,
    }
}

fn show_mask_list(inner: &ChannelInner, server_name: &str, actor: &Arc<dyn Client>, channel_name: &Name, kind: MaskListKind) {
    let (list, item_code, end_code, end_text) = match kind {
        MaskListKind::Ban => (&inner.ban, RPL_BANLIST, RPL_ENDOFBANLIST, "End of channel ban list"),
        MaskListKind::Except => (&inner.except, RPL_EXCEPTLIST, RPL_ENDOFEXCEPTLIST, "End of channel exception list"),
        MaskListKind::Invite => (&inner.invite, RPL_INVITELIST, RPL_ENDOFINVITELIST, "End of channel invite list"),
    };
    for mask in list.iter() {
        reply(server_name, actor, item_code, &[channel_name.as_str(), mask]);
    }
    reply(server_name, actor, end_code, &[channel_name.as_str(), end_text]);
}

/// Format: `+<flags>[ <key>][ <limit>]`, per `ModeString(client)`.
pub fn mode_string(inner: &ChannelInner, client: &Arc<dyn Client>) -> String {
    let mut flag_letters = String::from("+");
    let mut positional = Vec::new();

    let show_key = inner.key.is_some() && (inner.members.has(client.id()) || client.is_server_operator());
    if show_key {
        flag_letters.push('k');
        positional.push(inner.key.clone().unwrap());
    }
    if let Some(limit) = inner.user_limit {
        flag_letters.push('l');
        positional.push(limit.to_string());
    }
    flag_letters.push_str(&inner.flags.letters());

    if positional.is_empty() {
        flag_letters
    } else {
        format!("{flag_letters} {}", positional.join(" "))
    }
}

pub struct RenderedModeLine {
    pub command: String,
    pub args: Vec<String>,
}

/// Renders the applied-changes subsequence as a single consolidated `MODE`
/// command token (e.g. `+mnt-s+o`) plus its positional arguments in order.
pub fn render_change_line(applied: &[ChannelModeChange]) -> RenderedModeLine {
    let mut command = String::new();
    let mut args = Vec::new();
    let mut last_sign: Option<char> = None;

    for change in applied {
        let sign = match change.op {
            ChangeOp::Add => '+',
            ChangeOp::Remove => '-',
            ChangeOp::List => continue,
        };
        if last_sign != Some(sign) {
            command.push(sign);
            last_sign = Some(sign);
        }
        command.push(change.mode.letter());
        if change.mode.takes_arg() {
            if let Some(arg) = &change.arg {
                args.push(arg.clone());
            }
        }
    }

    RenderedModeLine { command, args }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelInner;
    use crate::client::test_support::FixtureClient;
    use crate::modes::{BooleanMode, MemberModes};
    use crate::persistence::NullChannelStore;
    use crate::server::Server;

    fn test_server() -> Arc<dyn ServerContext> {
        Server::new("test.server", Arc::new(NullChannelStore)).context()
    }

    /// `apply`/`mode_string` take `&Arc<dyn Client>`, which needs the trait
    /// object coercion to have already happened on the binding itself (it
    /// can't happen through the reference at the call site). Return both the
    /// concrete fixture (for `all_sent`/`id`) and its trait-object handle.
    fn fixture(nick: &str, user: &str, host: &str) -> (Arc<FixtureClient>, Arc<dyn Client>) {
        let concrete = FixtureClient::new(nick, user, host);
        let handle: Arc<dyn Client> = concrete.clone();
        (concrete, handle)
    }

    #[test]
    fn mode_string_hides_key_from_non_members() {
        let mut inner = ChannelInner::default();
        inner.key = Some("s3cret".to_string());
        inner.user_limit = Some(10);
        inner.flags.set(BooleanMode::Moderated, true);

        let (_outsider, outsider_handle) = fixture("Outsider", "o", "host");
        let rendered = mode_string(&inner, &outsider_handle);
        assert_eq!(rendered, "+lm 10");

        inner.members.add(outsider_handle.clone(), MemberModes::default());
        let rendered_member = mode_string(&inner, &outsider_handle);
        assert_eq!(rendered_member, "+klm s3cret 10");
    }

    #[test]
    fn show_mask_list_emits_each_mask_then_terminator() {
        let server = test_server();
        let mut inner = ChannelInner::default();
        inner.ban.add("*!*@evil.example");
        inner.ban.add("*!*@bad.example");
        let channel_name = Name::new("#c");
        let (actor, actor_handle) = fixture("Alice", "a", "host");

        apply(
            &mut inner,
            &actor_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Mask(MaskListKind::Ban), ChangeOp::List, None)],
        );

        let sent = actor.all_sent();
        assert_eq!(sent.iter().filter(|l| l.contains(RPL_BANLIST)).count(), 2);
        assert!(sent.iter().any(|l| l.contains(RPL_ENDOFBANLIST)));
    }

    #[test]
    fn admin_privilege_requires_founder_not_admin() {
        let server = test_server();
        let mut inner = ChannelInner::default();
        let channel_name = Name::new("#c");

        let (acting_admin, acting_admin_handle) = fixture("AdminAlice", "a", "host");
        let mut admin_modes = MemberModes::default();
        admin_modes.set(PrivilegeMode::Admin, true);
        inner.members.add(acting_admin_handle.clone(), admin_modes);

        let (target, target_handle) = fixture("Bob", "b", "host");
        inner.members.add(target_handle.clone(), MemberModes::default());
        server.register(target_handle.clone());

        let applied = apply(
            &mut inner,
            &acting_admin_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Privilege(PrivilegeMode::Admin), ChangeOp::Add, Some("Bob".to_string()))],
        );
        assert!(applied.is_empty());
        assert!(acting_admin.all_sent().iter().any(|l| l.contains(ERR_CHANOPRIVSNEEDED)));
        assert!(!inner.members.get(target.id()).unwrap().modes.has(PrivilegeMode::Admin));

        let mut founder_modes = MemberModes::default();
        founder_modes.set(PrivilegeMode::Founder, true);
        let (_founder, founder_handle) = fixture("Founder", "f", "host");
        inner.members.add(founder_handle.clone(), founder_modes);

        let applied = apply(
            &mut inner,
            &founder_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Privilege(PrivilegeMode::Admin), ChangeOp::Add, Some("Bob".to_string()))],
        );
        assert_eq!(applied.len(), 1);
        assert!(inner.members.get(target.id()).unwrap().modes.has(PrivilegeMode::Admin));
    }

    #[test]
    fn key_add_is_idempotent_by_value() {
        let server = test_server();
        let mut inner = ChannelInner::default();
        let channel_name = Name::new("#c");
        let (_actor, actor_handle) = fixture("Alice", "a", "host");
        let mut modes = MemberModes::default();
        modes.set(PrivilegeMode::Operator, true);
        inner.members.add(actor_handle.clone(), modes);

        let applied = apply(
            &mut inner,
            &actor_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Key, ChangeOp::Add, Some("s3cret".to_string()))],
        );
        assert_eq!(applied.len(), 1);

        let applied_again = apply(
            &mut inner,
            &actor_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Key, ChangeOp::Add, Some("s3cret".to_string()))],
        );
        assert!(applied_again.is_empty());
    }

    #[test]
    fn user_limit_parse_failure_sends_need_more_params() {
        let server = test_server();
        let mut inner = ChannelInner::default();
        let channel_name = Name::new("#c");
        let (actor, actor_handle) = fixture("Alice", "a", "host");
        let mut modes = MemberModes::default();
        modes.set(PrivilegeMode::Operator, true);
        inner.members.add(actor_handle.clone(), modes);

        let applied = apply(
            &mut inner,
            &actor_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::UserLimit, ChangeOp::Add, Some("not-a-number".to_string()))],
        );
        assert!(applied.is_empty());
        assert!(actor.all_sent().iter().any(|l| l.contains(ERR_NEEDMOREPARAMS)));
    }

    #[test]
    fn key_remove_is_unconditional_even_without_a_key_set() {
        let server = test_server();
        let mut inner = ChannelInner::default();
        let channel_name = Name::new("#c");
        let (_actor, actor_handle) = fixture("Alice", "a", "host");
        let mut modes = MemberModes::default();
        modes.set(PrivilegeMode::Operator, true);
        inner.members.add(actor_handle.clone(), modes);
        assert!(inner.key.is_none());

        let applied = apply(
            &mut inner,
            &actor_handle,
            &server,
            &channel_name,
            vec![ChannelModeChange::new(ChannelMode::Key, ChangeOp::Remove, None)],
        );
        assert_eq!(applied.len(), 1);
        assert!(inner.key.is_none());
    }

    #[test]
    fn render_change_line_groups_consecutive_signs() {
        let applied = vec![
            ChannelModeChange::new(ChannelMode::Boolean(BooleanMode::Moderated), ChangeOp::Add, None),
            ChannelModeChange::new(ChannelMode::Boolean(BooleanMode::Secret), ChangeOp::Remove, None),
            ChannelModeChange::new(ChannelMode::Privilege(PrivilegeMode::Operator), ChangeOp::Add, Some("Bob".to_string())),
        ];
        let rendered = render_change_line(&applied);
        assert_eq!(rendered.command, "+m-s+o");
        assert_eq!(rendered.args, vec!["Bob".to_string()]);
    }
}
