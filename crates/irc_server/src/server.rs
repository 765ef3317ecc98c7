//! Server-wide state: the client and channel registries, and the
//! `ServerContext` handle `Channel` uses to reach them. Everything here is
//! explicit and injected — no hidden globals.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::channel::Channel;
use crate::client::{Client, ClientId};
use crate::name::Name;
use crate::persistence::ChannelStore;

/// Lookup surface a `Channel` needs into the set of connected clients,
/// without depending on the concrete `Server` type.
pub trait ClientRegistry: Send + Sync {
    fn find_by_id(&self, id: ClientId) -> Option<Arc<dyn Client>>;
    fn find_by_nick(&self, nick: &Name) -> Option<Arc<dyn Client>>;
    /// Registers a connection once it has a usable identity, so subsequent
    /// `find_by_nick` lookups (NICK-in-use checks, MODE target lookups) can
    /// see it. Idempotent: re-registering the same client id just overwrites.
    fn register(&self, client: Arc<dyn Client>);
    fn unregister(&self, id: ClientId);
}

/// Lookup and creation surface for channels, used by command dispatch to
/// find-or-create the `Channel` a JOIN/MODE/PRIVMSG targets.
pub trait ChannelRegistry: Send + Sync {
    fn get(&self, name: &Name) -> Option<Arc<Channel>>;
    fn get_or_create(&self, name: &Name) -> Arc<Channel>;
    fn remove_if_empty(&self, name: &Name);
    fn names(&self) -> Vec<Name>;
}

/// The aggregate handle a `Channel` holds: its own name, plus the
/// collaborators it needs to reach other clients and other channels.
pub trait ServerContext: ClientRegistry + ChannelRegistry + Send + Sync {
    fn server_name(&self) -> &str;
    fn channel_store(&self) -> Arc<dyn ChannelStore>;
}

/// Concrete server state: DashMap-based registries over an injected
/// persistence store, mirroring the teacher's `DashMap<String, IrcChannel>`
/// shape but keyed by client identity rather than raw socket index.
pub struct Server {
    name: String,
    clients: DashMap<ClientId, Arc<dyn Client>>,
    channels: DashMap<String, Arc<Channel>>,
    store: Arc<dyn ChannelStore>,
    self_weak: Weak<Server>,
}

impl Server {
    pub fn new(name: impl Into<String>, store: Arc<dyn ChannelStore>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Server {
            name: name.into(),
            clients: DashMap::new(),
            channels: DashMap::new(),
            store,
            self_weak: weak.clone(),
        })
    }

    /// An owning handle to this server as a `ServerContext`, for handing to
    /// newly created `Channel`s.
    pub fn context(&self) -> Arc<dyn ServerContext> {
        self.self_weak
            .upgrade()
            .expect("Server outlives its own Arc while a method runs on it")
    }

    pub fn register_client(&self, client: Arc<dyn Client>) {
        self.clients.insert(client.id(), client);
    }

    pub fn unregister_client(&self, id: ClientId) {
        self.clients.remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Loads every persisted `+P` channel at startup so they survive a
    /// restart. Call once, before accepting connections.
    pub async fn load_persisted_channels(&self) -> Result<usize, crate::errors::IrcError> {
        let snapshots = self.store.load_all().await?;
        let count = snapshots.len();
        for snapshot in snapshots {
            let folded = crate::name::fold_rfc1459(&snapshot.name);
            let channel = Channel::from_snapshot(snapshot, self.context());
            self.channels.insert(folded, channel);
        }
        Ok(count)
    }
}

impl ClientRegistry for Server {
    fn find_by_id(&self, id: ClientId) -> Option<Arc<dyn Client>> {
        self.clients.get(&id).map(|r| r.clone())
    }

    fn find_by_nick(&self, nick: &Name) -> Option<Arc<dyn Client>> {
        self.clients
            .iter()
            .find(|entry| &entry.value().nick() == nick)
            .map(|entry| entry.value().clone())
    }

    fn register(&self, client: Arc<dyn Client>) {
        self.register_client(client);
    }

    fn unregister(&self, id: ClientId) {
        self.unregister_client(id);
    }
}

impl ChannelRegistry for Server {
    fn get(&self, name: &Name) -> Option<Arc<Channel>> {
        self.channels.get(name.folded()).map(|r| r.clone())
    }

    fn get_or_create(&self, name: &Name) -> Arc<Channel> {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        // Racing creators both build a Channel; only the first insert wins,
        // matching the teacher's get_or_create_channel read-then-insert shape.
        let created = Channel::new(name.clone(), self.context());
        self.channels
            .entry(name.folded().to_string())
            .or_insert(created)
            .clone()
    }

    fn remove_if_empty(&self, name: &Name) {
        if let Some(channel) = self.get(name) {
            if channel.is_empty_snapshot() {
                self.channels.remove(name.folded());
            }
        }
    }

    fn names(&self) -> Vec<Name> {
        self.channels.iter().map(|e| Name::new(e.value().display_name())).collect()
    }
}

impl ServerContext for Server {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn channel_store(&self) -> Arc<dyn ChannelStore> {
        self.store.clone()
    }
}
