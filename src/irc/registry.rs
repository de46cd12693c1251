/// Connection registry: every live client by id, plus a case-insensitive
/// nickname index.
use std::collections::HashMap;

use super::client::{Client, ClientHandle, ClientId};

#[derive(Debug, Default)]
pub struct Clients {
    by_id: HashMap<ClientId, Client>,
    by_nick: HashMap<String, ClientId>,
}

/// Nicknames compare ASCII case-insensitively.
fn fold(nick: &str) -> String {
    nick.to_ascii_lowercase()
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted client. It has no nickname yet.
    pub fn insert(&mut self, client: Client) {
        self.by_id.insert(client.id(), client);
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.by_id.get_mut(&id)
    }

    pub fn handle(&self, id: ClientId) -> Option<ClientHandle> {
        self.get(id).map(Client::handle)
    }

    /// Take a client out for teardown. Its nickname stays reserved until
    /// [`Clients::remove`] is called for it.
    pub fn detach(&mut self, id: ClientId) -> Option<Client> {
        self.by_id.remove(&id)
    }

    /// Forget `id` and release `nick` if it still points at `id`.
    pub fn remove(&mut self, id: ClientId, nick: Option<&str>) -> Option<Client> {
        if let Some(nick) = nick {
            let key = fold(nick);
            if self.by_nick.get(&key) == Some(&id) {
                self.by_nick.remove(&key);
            }
        }
        self.by_id.remove(&id)
    }

    pub fn find(&self, nick: &str) -> Option<ClientId> {
        self.by_nick.get(&fold(nick)).copied()
    }

    /// Point `new` at `id`, releasing `old`. Returns `false` without
    /// changing anything if `new` belongs to someone else. A case-only change
    /// of one's own nick is allowed.
    pub fn rename(&mut self, id: ClientId, old: Option<&str>, new: &str) -> bool {
        let key = fold(new);
        if matches!(self.by_nick.get(&key), Some(owner) if *owner != id) {
            return false;
        }
        if let Some(old) = old {
            self.by_nick.remove(&fold(old));
        }
        self.by_nick.insert(key, id);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
