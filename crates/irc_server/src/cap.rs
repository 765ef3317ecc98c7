//! IRCv3 capability negotiation (C8/C10): `CAP LS`, `CAP LIST`, `CAP REQ`,
//! `CAP ACK`/`CAP NAK`, `CAP END`. The only capability the channel core
//! itself consumes is `multi-prefix` (`Capability::MultiPrefix`); the others
//! are recognized here so negotiation has something real to advertise and
//! acknowledge.

use nom::{
    Parser,
    branch::alt,
    bytes::complete::{tag_no_case, take_till},
    combinator::{opt, rest},
    sequence::preceded,
    IResult,
};

use crate::client::Capability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapCommand {
    Ls,
    List,
    Req(Vec<String>),
    End,
}

fn cap_token_list(input: &str) -> Vec<String> {
    input.split_whitespace().map(str::to_string).collect()
}

fn ls_parser(input: &str) -> IResult<&str, CapCommand> {
    let (rem, _) = preceded(tag_no_case("CAP LS"), take_till(|_| false)).parse(input)?;
    Ok((rem, CapCommand::Ls))
}

fn list_parser(input: &str) -> IResult<&str, CapCommand> {
    let (rem, _) = tag_no_case("CAP LIST").parse(input)?;
    Ok((rem, CapCommand::List))
}

fn req_parser(input: &str) -> IResult<&str, CapCommand> {
    let (rem, tokens) = preceded(
        tag_no_case("CAP REQ"),
        preceded(opt(nom::character::complete::char(' ')), preceded(opt(nom::character::complete::char(':')), rest)),
    )
    .parse(input)?;
    Ok((rem, CapCommand::Req(cap_token_list(tokens))))
}

fn end_parser(input: &str) -> IResult<&str, CapCommand> {
    let (rem, _) = tag_no_case("CAP END").parse(input)?;
    Ok((rem, CapCommand::End))
}

/// Parses a raw `CAP ...` line. Unrecognized sub-commands (`NAK`, `CLEAR`)
/// are accepted by callers as a no-op rather than rejected here.
pub fn parse(input: &str) -> IResult<&str, CapCommand> {
    alt((req_parser, ls_parser, list_parser, end_parser)).parse(input)
}

/// All capability tokens the server is willing to advertise under `CAP LS`.
pub const SUPPORTED: [&str; 3] = ["multi-prefix", "sasl", "echo-message"];

/// Resolves the requested tokens against what the server supports. Returns
/// the subset that were recognized (to ACK) — unrecognized tokens are
/// silently dropped from the ACK per client convention (a strict server
/// would NAK, but this one is permissive since the core only depends on
/// `multi-prefix` actually landing).
pub fn resolve(requested: &[String]) -> Vec<Capability> {
    requested
        .iter()
        .filter_map(|token| Capability::from_token(token))
        .collect()
}
