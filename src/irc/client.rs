/// Connection entity: everything the server knows about one connected peer.
///
/// A `Client` is only ever mutated from the dispatcher task. Its read loop
/// and its timers run elsewhere but reach it exclusively through the
/// dispatcher queue, so no field here needs a lock.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::Config;
use super::message::Message;
use super::queue::Queue;
use super::reply::Reply;
use super::socket::Socket;
use super::timer::{Fired, Slot, Timers};

/// Server-unique client identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Registration axis of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for NICK and USER.
    Connecting,
    /// Fully participating peer.
    Registered,
}

/// User mode flags (RFC 2812 §3.1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UserMode {
    Away,
    Invisible,
    WallOps,
    Restricted,
    Operator,
    LocalOperator,
    ServerNotice,
}

impl UserMode {
    pub fn symbol(self) -> char {
        match self {
            UserMode::Away => 'a',
            UserMode::Invisible => 'i',
            UserMode::WallOps => 'w',
            UserMode::Restricted => 'r',
            UserMode::Operator => 'o',
            UserMode::LocalOperator => 'O',
            UserMode::ServerNotice => 's',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        Some(match symbol {
            'a' => UserMode::Away,
            'i' => UserMode::Invisible,
            'w' => UserMode::WallOps,
            'r' => UserMode::Restricted,
            'o' => UserMode::Operator,
            'O' => UserMode::LocalOperator,
            's' => UserMode::ServerNotice,
            _ => return None,
        })
    }

    /// Modes a user may toggle on themselves with MODE. `a` goes through
    /// AWAY; operator and restriction flags are never self-granted.
    pub fn user_settable(self) -> bool {
        matches!(
            self,
            UserMode::Invisible | UserMode::WallOps | UserMode::ServerNotice
        )
    }
}

/// Result of applying a MODE string to a client.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ModeChange {
    /// Changes that took effect, e.g. `+i-w`. Empty when nothing changed.
    pub applied: String,
    /// At least one flag was unknown or not user-settable.
    pub unknown_flag: bool,
}

/// What another client needs to hold to send to this one.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub socket: Socket,
}

#[derive(Debug)]
struct Friend {
    socket: Socket,
    refs: u32,
}

/// Collaborators the teardown path reports to.
pub trait Membership {
    /// `client` has left `channel` for good.
    fn leave(&mut self, channel: &str, client: ClientId);
    /// Drop `client` from the connection registry.
    fn unregister(&mut self, client: ClientId, nick: Option<&str>);
}

#[derive(Debug)]
pub struct Client {
    id: ClientId,
    atime: Instant,
    ctime: SystemTime,
    away: Option<String>,
    modes: BTreeSet<UserMode>,
    channels: BTreeSet<String>,
    friends: HashMap<ClientId, Friend>,
    has_quit: bool,
    destroyed: bool,
    hops: u32,
    hostname: String,
    phase: Phase,
    nick: Option<String>,
    /// What replies address this client as, for tasks outside the dispatcher.
    recipient: watch::Sender<String>,
    username: Option<String>,
    realname: Option<String>,
    socket: Socket,
    timers: Timers,
    config: Arc<Config>,
}

impl Client {
    /// Build a client for a just-accepted connection and start its
    /// registration deadline.
    pub fn new(
        id: ClientId,
        hostname: String,
        socket: Socket,
        queue: Queue,
        config: Arc<Config>,
    ) -> Self {
        let mut timers = Timers::new(id, queue);
        timers.arm(Slot::Registration, config.login_timeout);

        Self {
            id,
            atime: Instant::now(),
            ctime: SystemTime::now(),
            away: None,
            modes: BTreeSet::new(),
            channels: BTreeSet::new(),
            friends: HashMap::new(),
            has_quit: false,
            destroyed: false,
            hops: 0,
            hostname,
            phase: Phase::Connecting,
            nick: None,
            recipient: watch::Sender::new("*".to_string()),
            username: None,
            realname: None,
            socket,
            timers,
            config,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            id: self.id,
            socket: self.socket.clone(),
        }
    }

    /// Follows the name replies to this client are addressed to.
    pub fn recipient(&self) -> watch::Receiver<String> {
        self.recipient.subscribe()
    }

    /// Format `reply` for this client and queue it on its socket.
    pub fn reply(&self, reply: Reply) {
        self.send(reply.format(&self.config.server_name, self.nick_or_star()));
    }

    pub fn send(&self, msg: Message) {
        self.socket.write(msg);
    }

    // ── Liveness ────────────────────────────────────────────────

    /// Record activity. Cancels a pending liveness timeout and, once
    /// registered, restarts the idle countdown.
    pub fn touch(&mut self) {
        self.atime = Instant::now();
        self.timers.cancel(Slot::Liveness);
        if self.is_registered() {
            self.timers.arm(Slot::Idle, self.config.idle_timeout);
        }
    }

    /// The idle timer went off: ping the peer and give it `quit_timeout` to
    /// show any sign of life.
    pub fn probe_idle(&mut self) {
        self.reply(Reply::Ping);
        self.timers.arm(Slot::Liveness, self.config.quit_timeout);
        debug!(client = %self, "idle, sent probe");
    }

    /// See [`Timers::accept`].
    pub fn accept_timer(&mut self, fired: Fired) -> bool {
        self.timers.accept(fired)
    }

    pub fn is_timer_armed(&self, slot: Slot) -> bool {
        self.timers.is_armed(slot)
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// `Connecting → Registered`.
    pub fn register(&mut self) {
        if self.is_registered() {
            return;
        }
        self.phase = Phase::Registered;
        self.timers.cancel(Slot::Registration);
        self.add_friend(self.handle());
        self.touch();
        info!(client = %self, "registered");
    }

    /// Release every resource held by this client. Runs at most once.
    pub fn destroy(&mut self, world: &mut impl Membership) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        self.socket.close();
        self.timers.cancel_all();

        for channel in std::mem::take(&mut self.channels) {
            world.leave(&channel, self.id);
        }

        world.unregister(self.id, self.nick.as_deref());
        debug!(client = %self, "destroyed");
    }

    /// Tear the connection down and tell everyone who can see it. Only the
    /// first call has any effect; returns whether this call did the work.
    pub fn quit(&mut self, reason: &str, world: &mut impl Membership) -> bool {
        if self.has_quit {
            return false;
        }
        self.has_quit = true;

        self.reply(Reply::Error {
            message: format!("Closing link: {} ({reason})", self.hostname),
        });
        self.destroy(world);

        if !self.friends.is_empty() {
            let notice = Reply::Quit {
                source: self.user_host(),
                message: reason.to_owned(),
            }
            .format(&self.config.server_name, "*");

            for (id, friend) in &self.friends {
                if *id == self.id {
                    continue;
                }
                friend.socket.write(notice.clone());
            }
        }

        info!(client = %self, reason, "quit");
        true
    }

    pub fn has_quit(&self) -> bool {
        self.has_quit
    }

    // ── Identity ────────────────────────────────────────────────

    /// Assign a new nickname and notify every friend, this client included
    /// once registered.
    pub fn change_nickname(&mut self, nickname: String) {
        // The notice's source has to be the identity *before* the change.
        let notice = Reply::Nick {
            source: self.user_host(),
            nickname: nickname.clone(),
        }
        .format(&self.config.server_name, "*");

        self.recipient.send_replace(nickname.clone());
        self.nick = Some(nickname);

        for friend in self.friends.values() {
            friend.socket.write(notice.clone());
        }
    }

    pub fn set_user(&mut self, username: String, realname: String) {
        self.username = Some(username);
        self.realname = Some(realname);
    }

    pub fn nick(&self) -> Option<&str> {
        self.nick.as_deref()
    }

    pub fn nick_or_star(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or_default()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn hops(&self) -> u32 {
        self.hops
    }

    pub fn has_nick(&self) -> bool {
        self.nick.is_some()
    }

    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.phase == Phase::Registered
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// `nick!user@host`, with `*` for whatever is not yet known.
    pub fn user_host(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nick_or_star(),
            self.username.as_deref().unwrap_or("*"),
            self.hostname
        )
    }

    // ── Presence ────────────────────────────────────────────────

    pub fn away_message(&self) -> Option<&str> {
        self.away.as_deref()
    }

    /// Set or clear the away message, keeping the `a` mode in step.
    pub fn set_away(&mut self, message: Option<String>) {
        match message {
            Some(message) => {
                self.away = Some(message);
                self.modes.insert(UserMode::Away);
            }
            None => {
                self.away = None;
                self.modes.remove(&UserMode::Away);
            }
        }
    }

    pub fn has_mode(&self, mode: UserMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Apply a MODE change string such as `+iw-s`.
    pub fn apply_modes(&mut self, changes: &str) -> ModeChange {
        let mut result = ModeChange::default();
        let mut adding = true;
        let mut last_sign = None;

        for symbol in changes.chars() {
            match symbol {
                '+' => adding = true,
                '-' => adding = false,
                _ => {
                    let Some(mode) = UserMode::from_symbol(symbol).filter(|m| m.user_settable())
                    else {
                        result.unknown_flag = true;
                        continue;
                    };
                    let changed = if adding {
                        self.modes.insert(mode)
                    } else {
                        self.modes.remove(&mode)
                    };
                    if changed {
                        if last_sign != Some(adding) {
                            result.applied.push(if adding { '+' } else { '-' });
                            last_sign = Some(adding);
                        }
                        result.applied.push(symbol);
                    }
                }
            }
        }

        result
    }

    /// Active modes as `+abc`, or an empty string when none are set.
    pub fn mode_string(&self) -> String {
        let flags: String = self.modes.iter().map(|mode| mode.symbol()).collect();
        if flags.is_empty() {
            flags
        } else {
            format!("+{flags}")
        }
    }

    pub fn idle_time(&self) -> Duration {
        self.atime.elapsed()
    }

    pub fn idle_seconds(&self) -> u64 {
        self.idle_time().as_secs()
    }

    /// Connection time as a unix timestamp.
    pub fn signon_time(&self) -> u64 {
        self.ctime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    // ── Channels ────────────────────────────────────────────────

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn is_on(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn joined(&mut self, channel: &str) {
        self.channels.insert(channel.to_owned());
    }

    pub fn parted(&mut self, channel: &str) {
        self.channels.remove(channel);
    }

    // ── Visibility graph ────────────────────────────────────────

    /// Count one more shared context with `friend`.
    pub fn add_friend(&mut self, friend: ClientHandle) {
        self.friends
            .entry(friend.id)
            .or_insert(Friend {
                socket: friend.socket,
                refs: 0,
            })
            .refs += 1;
    }

    /// Count one fewer shared context with `friend`; forget it at zero.
    pub fn remove_friend(&mut self, friend: ClientId) {
        let Some(entry) = self.friends.get_mut(&friend) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.friends.remove(&friend);
        }
    }

    pub fn friend_refs(&self, friend: ClientId) -> Option<u32> {
        self.friends.get(&friend).map(|f| f.refs)
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_host())
    }
}
