//! Command dispatch (C9): parses one raw post-registration line into a
//! channel operation and invokes the matching [`channel::Channel`] method.
//! This layer owns no channel state and performs no admission logic of its
//! own — every check (membership, operator, ban) lives in `Channel`.

use std::sync::Arc;

use nom::{
    IResult, Parser,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::opt,
    multi::many0,
    sequence::preceded,
};

use crate::client::Client;
use crate::constants::*;
use crate::modes::{ChangeOp, ChannelMode, ChannelModeChange};
use crate::name::Name;
use crate::parsers::trailing_parser;
use crate::server::ServerContext;

/// A parsed line: verb plus positional/trailing parameters, split the way
/// RFC 2812 §2.3.1 splits `middle` tokens from a single trailing `:`-prefixed
/// parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub command: String,
    pub params: Vec<String>,
}

fn middle_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ' ' && c != '\r' && c != '\n')(input)
}

fn tokenize(line: &str) -> IResult<&str, Tokens> {
    let (rem, command) = middle_token(line)?;
    let (rem, middles) = many0(preceded(char(' '), middle_token_not_trailing)).parse(rem)?;
    let (rem, trailing) = opt(preceded((char(' '), tag(":")), trailing_parser)).parse(rem)?;

    let mut params: Vec<String> = middles.into_iter().map(str::to_string).collect();
    if let Some(t) = trailing {
        params.push(t.to_string());
    }
    Ok((rem, Tokens { command: command.to_uppercase(), params }))
}

/// A `middle` token that must not itself look like the start of the
/// trailing parameter (`:...`), so `many0` doesn't eat into it.
fn middle_token_not_trailing(input: &str) -> IResult<&str, &str> {
    if input.starts_with(':') {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    middle_token(input)
}

pub fn parse_line(line: &str) -> Option<Tokens> {
    tokenize(line.trim_end_matches(['\r', '\n'])).ok().map(|(_, t)| t)
}

fn reply(server_name: &str, client: &Arc<dyn Client>, code: &str, params: &[&str]) {
    let nick = client.nick_string();
    let mut args: Vec<&str> = Vec::with_capacity(params.len() + 1);
    args.push(&nick);
    args.extend_from_slice(params);
    client.send(&[], server_name, code, &args);
}

/// Parses one `key=value,key=value` style mode-list argument position for
/// mask-list / privilege / key / limit changes, given the batch's mode
/// letters and their operand cursor. Channel MODE arguments are positional
/// (one per mode letter that `takes_arg()`), in the order the letters
/// appear in the command token.
fn parse_mode_changes(
    command: &str,
    mut args: std::slice::Iter<'_, String>,
) -> (Vec<ChannelModeChange>, Vec<char>) {
    let mut changes = Vec::new();
    let mut unknown = Vec::new();
    let mut op = ChangeOp::Add;
    for c in command.chars() {
        match c {
            '+' => op = ChangeOp::Add,
            '-' => op = ChangeOp::Remove,
            letter => {
                let Some(mode) = ChannelMode::from_letter(letter) else {
                    unknown.push(letter);
                    continue;
                };
                let arg = if mode.takes_arg() { args.next().cloned() } else { None };
                // A mask letter (b/e/I) with no argument is a list query
                // ("MODE #chan +b" lists bans); Key/UserLimit/Privilege keep
                // their sign's op even without one, so the mode engine can
                // reply appropriately (e.g. ERR_NEEDMOREPARAMS for `+k`).
                let effective_op = if matches!(mode, ChannelMode::Mask(_)) && arg.is_none() {
                    ChangeOp::List
                } else {
                    op
                };
                changes.push(ChannelModeChange::new(mode, effective_op, arg));
            }
        }
    }
    (changes, unknown)
}

/// Dispatches one already-tokenized, post-registration line. `PING`/`CAP`/
/// registration verbs are handled by the caller before this is reached.
pub async fn dispatch(
    tokens: Tokens,
    client: Arc<dyn Client>,
    server: &Arc<dyn ServerContext>,
) {
    let server_name = server.server_name();
    match tokens.command.as_str() {
        "JOIN" => {
            let Some(target) = tokens.params.first() else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["JOIN"]);
                return;
            };
            let key = tokens.params.get(1).map(String::as_str);
            let channel = server.get_or_create(&Name::new(target.clone()));
            channel.join(client, key).await;
        }
        "PART" => {
            let Some(target) = tokens.params.first() else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["PART"]);
                return;
            };
            let message = tokens.params.get(1).map(String::as_str).unwrap_or("leaving");
            if let Some(channel) = server.get(&Name::new(target.clone())) {
                channel.part_checked(client, message).await;
            } else {
                reply(server_name, &client, ERR_NOTONCHANNEL, &[target, "You're not on that channel"]);
            }
        }
        "KICK" => {
            let (Some(chan_name), Some(target_nick)) = (tokens.params.first(), tokens.params.get(1)) else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["KICK"]);
                return;
            };
            let comment = tokens.params.get(2).cloned().unwrap_or_else(|| client.nick_string());
            if let Some(channel) = server.get(&Name::new(chan_name.clone())) {
                channel.kick(client, &Name::new(target_nick.clone()), &comment).await;
            } else {
                reply(server_name, &client, ERR_NOTONCHANNEL, &[chan_name, "You're not on that channel"]);
            }
        }
        "INVITE" => {
            let (Some(invitee_nick), Some(chan_name)) = (tokens.params.first(), tokens.params.get(1)) else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["INVITE"]);
                return;
            };
            let Some(invitee) = server.find_by_nick(&Name::new(invitee_nick.clone())) else {
                reply(server_name, &client, ERR_NOSUCHNICK, &[invitee_nick, "No such nick/channel"]);
                return;
            };
            let channel = server.get_or_create(&Name::new(chan_name.clone()));
            channel.invite(invitee, client).await;
        }
        "TOPIC" => {
            let Some(chan_name) = tokens.params.first() else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["TOPIC"]);
                return;
            };
            let Some(channel) = server.get(&Name::new(chan_name.clone())) else {
                reply(server_name, &client, ERR_NOTONCHANNEL, &[chan_name, "You're not on that channel"]);
                return;
            };
            match tokens.params.get(1) {
                Some(topic) => channel.set_topic(client, topic).await,
                None => channel.get_topic(client).await,
            }
        }
        "NAMES" => {
            let Some(chan_name) = tokens.params.first() else { return };
            if let Some(channel) = server.get(&Name::new(chan_name.clone())) {
                channel.names(client).await;
            }
        }
        "MODE" => {
            let Some(chan_name) = tokens.params.first() else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["MODE"]);
                return;
            };
            if !chan_name.starts_with(['#', '&', '+', '!']) {
                return; // user MODE, handled by the registration layer
            }
            let channel = server.get_or_create(&Name::new(chan_name.clone()));
            match tokens.params.get(1) {
                None => channel.apply_mode_changes(client, Vec::new()).await,
                Some(mode_command) => {
                    let (changes, unknown) = parse_mode_changes(mode_command, tokens.params[2..].iter());
                    for letter in unknown {
                        reply(server_name, &client, ERR_UNKNOWNMODE, &[&letter.to_string(), "is unknown mode char to me"]);
                    }
                    channel.apply_mode_changes(client, changes).await;
                }
            }
        }
        "PRIVMSG" => {
            let (Some(chan_name), Some(text)) = (tokens.params.first(), tokens.params.get(1)) else {
                reply(server_name, &client, ERR_NEEDMOREPARAMS, &["PRIVMSG"]);
                return;
            };
            if let Some(channel) = server.get(&Name::new(chan_name.clone())) {
                channel.privmsg(client, text).await;
            } else {
                reply(server_name, &client, ERR_NOSUCHCHANNEL, &[chan_name, "No such channel"]);
            }
        }
        "NOTICE" => {
            let (Some(chan_name), Some(text)) = (tokens.params.first(), tokens.params.get(1)) else { return };
            if let Some(channel) = server.get(&Name::new(chan_name.clone())) {
                channel.notice(client, text).await;
            }
        }
        "PING" => {
            let token = tokens.params.first().cloned().unwrap_or_default();
            client.send(&[], server_name, "PONG", &[server_name, &token]);
        }
        other => {
            reply(server_name, &client, ERR_UNKNOWNCOMMAND, &[other, ERR_UNKNOWNCOMMAND_STR]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_command_with_trailing() {
        let t = parse_line("PRIVMSG #rust :hello there\r\n").unwrap();
        assert_eq!(t.command, "PRIVMSG");
        assert_eq!(t.params, vec!["#rust".to_string(), "hello there".to_string()]);
    }

    #[test]
    fn tokenizes_command_with_only_middles() {
        let t = parse_line("JOIN #rust key").unwrap();
        assert_eq!(t.command, "JOIN");
        assert_eq!(t.params, vec!["#rust".to_string(), "key".to_string()]);
    }

    #[test]
    fn mode_changes_walk_sign_and_args_in_order() {
        let args = vec!["Bob".to_string()];
        let (changes, unknown) = parse_mode_changes("+o", args.iter());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::Add);
        assert_eq!(changes[0].arg.as_deref(), Some("Bob"));
        assert!(unknown.is_empty());
    }

    #[test]
    fn mode_changes_track_sign_across_letters() {
        let args: Vec<String> = Vec::new();
        let (changes, unknown) = parse_mode_changes("+mnt-s", args.iter());
        assert_eq!(changes.len(), 4);
        assert_eq!(changes[2].op, ChangeOp::Add);
        assert_eq!(changes[3].op, ChangeOp::Remove);
        assert!(unknown.is_empty());
    }

    #[test]
    fn mask_list_with_no_arg_becomes_list_query() {
        let args: Vec<String> = Vec::new();
        let (changes, _) = parse_mode_changes("+b", args.iter());
        assert_eq!(changes[0].op, ChangeOp::List);
    }

    #[test]
    fn unknown_mode_letter_is_collected_and_skipped() {
        let args = vec!["Bob".to_string()];
        let (changes, unknown) = parse_mode_changes("+oZ", args.iter());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].op, ChangeOp::Add);
        assert_eq!(unknown, vec!['Z']);
    }
}
