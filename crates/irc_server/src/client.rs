//! The `Client` collaborator contract the channel core depends on, plus a
//! concrete implementation backed by a socket's outbound channel.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{mpsc, RwLock};

use crate::name::Name;

/// Opaque, stable identity for a connection. Nicknames may change; this does
/// not, so `MemberSet` and persistence snapshots key off it instead.
pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_client_id() -> ClientId {
    NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// IRCv3 capabilities a connection may negotiate. Only `MultiPrefix` is
/// consumed by the channel core; the others are recognized by the CAP
/// negotiation layer so `CAP LS`/`CAP ACK` have something real to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    MultiPrefix,
    Sasl,
    EchoMessage,
}

impl Capability {
    pub fn token(self) -> &'static str {
        match self {
            Capability::MultiPrefix => "multi-prefix",
            Capability::Sasl => "sasl",
            Capability::EchoMessage => "echo-message",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "multi-prefix" => Some(Capability::MultiPrefix),
            "sasl" => Some(Capability::Sasl),
            "echo-message" => Some(Capability::EchoMessage),
            _ => None,
        }
    }
}

/// The collaborator contract `Channel` and the mode engine depend on.
/// Implemented by `ConnectedClient` for real connections and by a plain
/// fixture in tests.
pub trait Client: Send + Sync + fmt::Debug {
    fn id(&self) -> ClientId;
    fn nick(&self) -> Name;
    fn nick_string(&self) -> String {
        self.nick().as_str().to_string()
    }
    /// `nick!user@host`.
    fn nick_mask_string(&self) -> String;
    /// `user@host`.
    fn user_host(&self) -> String;
    fn is_server_operator(&self) -> bool;
    fn is_away(&self) -> bool;
    fn away_message(&self) -> Option<String>;
    fn has_capability(&self, cap: Capability) -> bool;
    /// Mirror of channel membership, kept in lockstep with each `Channel`'s
    /// own member set per the mirrored-membership invariant.
    fn mark_joined(&self, channel: &Name);
    fn mark_left(&self, channel: &Name);
    fn joined_channels(&self) -> Vec<Name>;

    /// Enqueues one IRC line: `:source command args... [:last-arg]`.
    /// `tags` are IRCv3 message tags (`key=value`), rendered only if
    /// non-empty. `source` is a bare nickmask/servername, no leading `:`.
    fn send(&self, tags: &[(&str, &str)], source: &str, command: &str, args: &[&str]);
}

#[derive(Debug)]
struct ClientInner {
    nick: Option<String>,
    user: Option<String>,
    full_user_name: Option<String>,
    modes: HashSet<char>,
    away_message: Option<String>,
}

/// A connection backed by an outbound `mpsc` channel drained by the writer
/// task. Registration fields follow the same double-checked-locking shape
/// the teacher's `UserState` used for its `registered` flag.
#[derive(Debug)]
pub struct ConnectedClient {
    id: ClientId,
    addr: SocketAddr,
    registered: AtomicBool,
    inner: RwLock<ClientInner>,
    capabilities: RwLock<HashSet<Capability>>,
    channels: DashSet<Name>,
    tx_outbound: mpsc::Sender<String>,
}

impl ConnectedClient {
    pub fn new(addr: SocketAddr, tx_outbound: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(ConnectedClient {
            id: next_client_id(),
            addr,
            registered: AtomicBool::new(false),
            inner: RwLock::new(ClientInner {
                nick: None,
                user: None,
                full_user_name: None,
                modes: HashSet::new(),
                away_message: None,
            }),
            capabilities: RwLock::new(HashSet::new()),
            channels: DashSet::new(),
            tx_outbound,
        })
    }

    pub async fn set_nick(&self, nick: String) {
        self.inner.write().await.nick = Some(nick);
    }

    pub async fn set_user(&self, user: String, full_user_name: String) {
        let mut inner = self.inner.write().await;
        inner.user = Some(user);
        inner.full_user_name = Some(full_user_name);
    }

    pub async fn set_away(&self, message: Option<String>) {
        self.inner.write().await.away_message = message;
    }

    pub async fn grant_capability(&self, cap: Capability) {
        self.capabilities.write().await.insert(cap);
    }

    /// Fast-path check, then a double-checked promotion to `Active` once
    /// both NICK and USER have landed.
    pub async fn is_registered(&self) -> bool {
        if self.registered.load(Ordering::Acquire) {
            return true;
        }
        let inner = self.inner.read().await;
        if inner.nick.is_none() || inner.user.is_none() {
            return false;
        }
        drop(inner);
        self.registered.store(true, Ordering::Release);
        true
    }

    pub async fn nick_snapshot(&self) -> Option<String> {
        self.inner.read().await.nick.clone()
    }

    pub async fn user_snapshot(&self) -> Option<String> {
        self.inner.read().await.user.clone()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn set_operator(&self, value: bool) {
        let mut inner = self.inner.write().await;
        if value {
            inner.modes.insert('o');
        } else {
            inner.modes.remove('o');
        }
    }

    pub async fn user_modes(&self) -> HashSet<char> {
        self.inner.read().await.modes.clone()
    }

    pub async fn set_user_modes(&self, modes: HashSet<char>) {
        self.inner.write().await.modes = modes;
    }

    /// Best-effort snapshot used by the trait's sync methods below; a
    /// connected client that hasn't completed NICK/USER yet reports `"*"`.
    fn blocking_nick(&self) -> String {
        self.inner
            .try_read()
            .ok()
            .and_then(|inner| inner.nick.clone())
            .unwrap_or_else(|| "*".to_string())
    }

    fn blocking_user(&self) -> String {
        self.inner
            .try_read()
            .ok()
            .and_then(|inner| inner.user.clone())
            .unwrap_or_else(|| "*".to_string())
    }
}

impl Client for ConnectedClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn nick(&self) -> Name {
        Name::new(self.blocking_nick())
    }

    fn nick_mask_string(&self) -> String {
        format!("{}!{}@{}", self.blocking_nick(), self.blocking_user(), self.addr.ip())
    }

    fn user_host(&self) -> String {
        format!("{}@{}", self.blocking_user(), self.addr.ip())
    }

    fn is_server_operator(&self) -> bool {
        self.inner
            .try_read()
            .map(|inner| inner.modes.contains('o'))
            .unwrap_or(false)
    }

    fn is_away(&self) -> bool {
        self.inner
            .try_read()
            .map(|inner| inner.away_message.is_some())
            .unwrap_or(false)
    }

    fn away_message(&self) -> Option<String> {
        self.inner.try_read().ok().and_then(|inner| inner.away_message.clone())
    }

    fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities
            .try_read()
            .map(|caps| caps.contains(&cap))
            .unwrap_or(false)
    }

    fn mark_joined(&self, channel: &Name) {
        self.channels.insert(channel.clone());
    }

    fn mark_left(&self, channel: &Name) {
        self.channels.remove(channel);
    }

    fn joined_channels(&self) -> Vec<Name> {
        self.channels.iter().map(|r| r.clone()).collect()
    }

    fn send(&self, tags: &[(&str, &str)], source: &str, command: &str, args: &[&str]) {
        let mut line = String::new();
        if !tags.is_empty() {
            line.push('@');
            for (i, (k, v)) in tags.iter().enumerate() {
                if i > 0 {
                    line.push(';');
                }
                line.push_str(k);
                line.push('=');
                line.push_str(v);
            }
            line.push(' ');
        }
        if !source.is_empty() {
            line.push(':');
            line.push_str(source);
            line.push(' ');
        }
        line.push_str(command);
        if let Some((last, rest)) = args.split_last() {
            for arg in rest {
                line.push(' ');
                line.push_str(arg);
            }
            line.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                line.push(':');
            }
            line.push_str(last);
        }
        line.push_str("\r\n");

        if let Err(e) = self.tx_outbound.try_send(line) {
            log::warn!("client {}: outbound queue full or closed: {e}", self.id);
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A plain, non-networked `Client` fixture for unit tests against the
    /// channel core: records every line it would have sent instead of
    /// writing to a socket.
    #[derive(Debug)]
    pub struct FixtureClient {
        pub id: ClientId,
        pub nick: Mutex<String>,
        pub user: String,
        pub host: String,
        pub server_operator: bool,
        pub away: Mutex<Option<String>>,
        pub capabilities: Mutex<HashSet<Capability>>,
        pub channels: DashSet<Name>,
        pub sent: Mutex<Vec<String>>,
    }

    impl FixtureClient {
        pub fn new(nick: &str, user: &str, host: &str) -> Arc<Self> {
            Arc::new(FixtureClient {
                id: next_client_id(),
                nick: Mutex::new(nick.to_string()),
                user: user.to_string(),
                host: host.to_string(),
                server_operator: false,
                away: Mutex::new(None),
                capabilities: Mutex::new(HashSet::new()),
                channels: DashSet::new(),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub fn operator(mut self: Arc<Self>) -> Arc<Self> {
            Arc::get_mut(&mut self).unwrap().server_operator = true;
            self
        }

        pub fn with_capability(self: Arc<Self>, cap: Capability) -> Arc<Self> {
            self.capabilities.lock().unwrap().insert(cap);
            self
        }

        pub fn set_nick(&self, nick: &str) {
            *self.nick.lock().unwrap() = nick.to_string();
        }

        pub fn last_sent(&self) -> Option<String> {
            self.sent.lock().unwrap().last().cloned()
        }

        pub fn all_sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Client for FixtureClient {
        fn id(&self) -> ClientId {
            self.id
        }

        fn nick(&self) -> Name {
            Name::new(self.nick.lock().unwrap().clone())
        }

        fn nick_mask_string(&self) -> String {
            format!("{}!{}@{}", self.nick.lock().unwrap(), self.user, self.host)
        }

        fn user_host(&self) -> String {
            format!("{}@{}", self.user, self.host)
        }

        fn is_server_operator(&self) -> bool {
            self.server_operator
        }

        fn is_away(&self) -> bool {
            self.away.lock().unwrap().is_some()
        }

        fn away_message(&self) -> Option<String> {
            self.away.lock().unwrap().clone()
        }

        fn has_capability(&self, cap: Capability) -> bool {
            self.capabilities.lock().unwrap().contains(&cap)
        }

        fn mark_joined(&self, channel: &Name) {
            self.channels.insert(channel.clone());
        }

        fn mark_left(&self, channel: &Name) {
            self.channels.remove(channel);
        }

        fn joined_channels(&self) -> Vec<Name> {
            self.channels.iter().map(|r| r.clone()).collect()
        }

        fn send(&self, tags: &[(&str, &str)], source: &str, command: &str, args: &[&str]) {
            let tag_part = if tags.is_empty() {
                String::new()
            } else {
                format!(
                    "@{} ",
                    tags.iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect::<Vec<_>>()
                        .join(";")
                )
            };
            let args_part = args.join(" ");
            let line = if args_part.is_empty() {
                format!("{tag_part}:{source} {command}")
            } else {
                format!("{tag_part}:{source} {command} {args_part}")
            };
            self.sent.lock().unwrap().push(line);
        }
    }
}
