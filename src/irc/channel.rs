/// Channels: named groups of clients. Membership is what makes two clients
/// friends, so every join and part adjusts both sides' friend counts.
use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::client::ClientId;
use super::message::Message;
use super::registry::Clients;
use super::reply::Reply;

const MAX_CHANNEL_LENGTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("no such channel: {0}")]
    NoSuchChannel(String),
    #[error("not on channel: {0}")]
    NotOnChannel(String),
}

impl ChannelError {
    pub fn reply(&self) -> Reply {
        match self {
            ChannelError::NoSuchChannel(channel) => Reply::NoSuchChannel {
                channel: channel.clone(),
            },
            ChannelError::NotOnChannel(channel) => Reply::NotOnChannel {
                channel: channel.clone(),
            },
        }
    }
}

/// `#` or `&` followed by anything but space, comma, or BEL.
pub fn is_channel_name(name: &str) -> bool {
    name.len() > 1
        && name.len() <= MAX_CHANNEL_LENGTH
        && name.starts_with(['#', '&'])
        && !name.contains([' ', ',', '\x07'])
}

#[derive(Debug)]
pub struct Channel {
    name: String,
    members: BTreeSet<ClientId>,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            members: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.members.iter().copied()
    }

    pub fn is_member(&self, id: ClientId) -> bool {
        self.members.contains(&id)
    }

    /// Send `msg` to every member except `except`.
    pub fn broadcast(&self, clients: &Clients, msg: &Message, except: Option<ClientId>) {
        for id in self.members() {
            if Some(id) == except {
                continue;
            }
            if let Some(member) = clients.get(id) {
                member.send(msg.clone());
            }
        }
    }

    /// Space-separated member nicks, as sent in RPL_NAMREPLY.
    pub fn names(&self, clients: &Clients) -> String {
        self.members()
            .filter_map(|id| clients.get(id))
            .filter_map(|member| member.nick())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Every channel with at least one member, keyed by folded name.
#[derive(Debug, Default)]
pub struct Channels {
    by_name: HashMap<String, Channel>,
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.by_name.get(&fold(name))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Add `id` to `name`, creating the channel if needed. Announces the
    /// join to all members and sends the joiner the member list.
    pub fn join(&mut self, name: &str, id: ClientId, clients: &mut Clients) {
        let Some(joiner) = clients.handle(id) else {
            return;
        };
        let channel = self
            .by_name
            .entry(fold(name))
            .or_insert_with(|| Channel::new(name));
        if channel.is_member(id) {
            return;
        }

        for member in channel.members() {
            let Some(handle) = clients.handle(member) else {
                continue;
            };
            if let Some(existing) = clients.get_mut(member) {
                existing.add_friend(joiner.clone());
            }
            if let Some(client) = clients.get_mut(id) {
                client.add_friend(handle);
            }
        }
        channel.members.insert(id);

        let Some(client) = clients.get_mut(id) else {
            return;
        };
        client.joined(channel.name());
        let notice = Reply::Join {
            source: client.user_host(),
            channel: channel.name().to_owned(),
        }
        .format("", "*");
        channel.broadcast(clients, &notice, None);

        let channel_name = channel.name().to_owned();
        let names = channel.names(clients);
        if let Some(client) = clients.get(id) {
            client.reply(Reply::NamReply {
                channel: channel_name.clone(),
                names,
            });
            client.reply(Reply::EndOfNames {
                channel: channel_name,
            });
        }
        debug!(%id, channel = %name, "joined");
    }

    /// Remove `id` from `name`, telling every member (the parter included).
    pub fn part(
        &mut self,
        name: &str,
        id: ClientId,
        message: &str,
        clients: &mut Clients,
    ) -> Result<(), ChannelError> {
        let key = fold(name);
        let channel = self
            .by_name
            .get_mut(&key)
            .ok_or_else(|| ChannelError::NoSuchChannel(name.to_owned()))?;
        if !channel.is_member(id) {
            return Err(ChannelError::NotOnChannel(name.to_owned()));
        }
        let Some(source) = clients.get(id).map(|c| c.user_host()) else {
            return Ok(());
        };

        let notice = Reply::Part {
            source,
            channel: channel.name().to_owned(),
            message: message.to_owned(),
        }
        .format("", "*");
        channel.broadcast(clients, &notice, None);

        channel.members.remove(&id);
        for member in channel.members() {
            if let Some(other) = clients.get_mut(member) {
                other.remove_friend(id);
            }
            if let Some(client) = clients.get_mut(id) {
                client.remove_friend(member);
            }
        }
        if let Some(client) = clients.get_mut(id) {
            client.parted(channel.name());
        }

        if channel.members.is_empty() {
            self.by_name.remove(&key);
            debug!(channel = %name, "disbanded");
        }
        Ok(())
    }

    /// Drop a departing client from `name` without announcing anything; the
    /// departing client does its own QUIT fan-out.
    pub fn quit(&mut self, name: &str, id: ClientId, clients: &mut Clients) {
        let key = fold(name);
        let Some(channel) = self.by_name.get_mut(&key) else {
            return;
        };
        if !channel.members.remove(&id) {
            return;
        }
        for member in channel.members() {
            if let Some(other) = clients.get_mut(member) {
                other.remove_friend(id);
            }
        }
        if channel.members.is_empty() {
            self.by_name.remove(&key);
            debug!(channel = %name, "disbanded");
        }
    }
}
