/// IRC server core: listeners, the dispatcher task, and command handling.
///
/// Everything that mutates a client or a channel runs inside
/// [`Server::dispatch`], called from a single task. Listeners, read loops and
/// timers only ever push [`Envelope`]s onto the queue.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use super::channel::{is_channel_name, Channels};
use super::client::{Client, ClientId, Membership, UserMode};
use super::command::{is_nickname, Command};
use super::config::Config;
use super::message::Message;
use super::queue::{Envelope, Event, Queue};
use super::reader;
use super::registry::Clients;
use super::reply::Reply;
use super::socket::{Lines, Socket};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const VERSION: &str = concat!("driftwood-", env!("CARGO_PKG_VERSION"));

/// QUIT without a message.
const DEFAULT_QUIT_MESSAGE: &str = "Client quit";

/// Run the IRC server on every configured address.
///
/// All listeners are bound before anything is accepted, so a port conflict
/// fails fast.
pub async fn run(config: Config) -> Result<(), BoxError> {
    let mut listeners = Vec::with_capacity(config.bind.len());
    for addr in &config.bind {
        let listener = TcpListener::bind(addr).await?;
        info!("driftwood listening on {addr}");
        listeners.push(listener);
    }
    serve(listeners, config).await
}

/// Serve on already-bound listeners.
pub async fn serve(listeners: Vec<TcpListener>, config: Config) -> Result<(), BoxError> {
    let (queue, rx) = mpsc::unbounded_channel();
    let server = Server::new(Arc::new(config), queue.clone());
    let dispatcher = tokio::spawn(dispatch_loop(server, rx));

    let mut handles = Vec::with_capacity(listeners.len());
    for listener in listeners {
        handles.push(tokio::spawn(accept_loop(listener, queue.clone())));
    }
    drop(queue);

    // Wait for any listener to exit (they shouldn't).
    for handle in handles {
        handle.await??;
    }
    dispatcher.abort();
    Ok(())
}

/// Accept loop for a single listener. Connections are handed to the
/// dispatcher, which builds the client before its reader starts.
async fn accept_loop(listener: TcpListener, queue: Queue) -> Result<(), BoxError> {
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "accepted");
        let (socket, lines) = Socket::open(stream);
        if queue
            .send(Envelope::Connect {
                socket,
                lines,
                addr,
            })
            .is_err()
        {
            return Ok(());
        }
    }
}

async fn dispatch_loop(mut server: Server, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        server.dispatch(envelope);
    }
    debug!("dispatcher stopped");
}

/// Teardown view over the registry and channels, handed to
/// [`Client::quit`] once the client has been detached.
struct World<'a> {
    clients: &'a mut Clients,
    channels: &'a mut Channels,
}

impl Membership for World<'_> {
    fn leave(&mut self, channel: &str, client: ClientId) {
        self.channels.quit(channel, client, self.clients);
    }

    fn unregister(&mut self, client: ClientId, nick: Option<&str>) {
        self.clients.remove(client, nick);
    }
}

/// All server state. Owned by the dispatcher task.
pub struct Server {
    config: Arc<Config>,
    clients: Clients,
    channels: Channels,
    queue: Queue,
    next_id: u64,
    created: String,
}

impl Server {
    pub fn new(config: Arc<Config>, queue: Queue) -> Self {
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            config,
            clients: Clients::new(),
            channels: Channels::new(),
            queue,
            next_id: 0,
            created: format!("at unix time {started}"),
        }
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Connect {
                socket,
                lines,
                addr,
            } => {
                self.accept(socket, lines, addr);
            }
            Envelope::Client { id, event } => self.handle_event(id, event),
        }
    }

    fn accept(&mut self, socket: Socket, lines: Lines, addr: SocketAddr) -> ClientId {
        let id = self.admit(socket.clone(), addr.ip().to_string());
        let Some(recipient) = self.clients.get(id).map(Client::recipient) else {
            return id;
        };
        reader::spawn(
            id,
            lines,
            socket,
            self.queue.clone(),
            self.config.server_name.clone(),
            recipient,
        );
        info!(%addr, %id, "new connection");
        id
    }

    /// Create a client for `socket` and add it to the registry. Its registration deadline
    /// starts now.
    fn admit(&mut self, socket: Socket, hostname: String) -> ClientId {
        self.next_id += 1;
        let id = ClientId(self.next_id);
        let client = Client::new(
            id,
            hostname,
            socket,
            self.queue.clone(),
            Arc::clone(&self.config),
        );
        self.clients.insert(client);
        id
    }

    fn handle_event(&mut self, id: ClientId, event: Event) {
        match event {
            Event::Command(command) => self.process(id, command),
            Event::Timer(fired) => {
                let Some(client) = self.clients.get_mut(id) else {
                    return;
                };
                if !client.accept_timer(fired) {
                    trace!(%id, ?fired, "stale timer");
                    return;
                }
                match fired.slot.expiry_reason() {
                    Some(reason) => self.quit(id, reason),
                    None => client.probe_idle(),
                }
            }
            Event::Disconnect(reason) => self.quit(id, &reason),
        }
    }

    /// Tear `id` down. Late or repeated calls find nothing and do nothing.
    fn quit(&mut self, id: ClientId, reason: &str) {
        let Some(mut client) = self.clients.detach(id) else {
            return;
        };
        let mut world = World {
            clients: &mut self.clients,
            channels: &mut self.channels,
        };
        client.quit(reason, &mut world);
    }

    fn reply(&self, id: ClientId, reply: Reply) {
        if let Some(client) = self.clients.get(id) {
            client.reply(reply);
        }
    }

    // ── Commands ────────────────────────────────────────────────

    fn process(&mut self, id: ClientId, command: Command) {
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };
        trace!(client = %client, command = command.name(), "command");

        client.touch();
        if !client.is_registered() && !command.allowed_before_registration() {
            client.reply(Reply::NotRegistered);
            return;
        }

        match command {
            Command::Cap { subcommand } => {
                if subcommand == "LS" {
                    client.reply(Reply::CapList);
                }
            }
            Command::Pass { .. } | Command::Pong { .. } => {}
            Command::Ping { token } => client.reply(Reply::Pong { token }),
            Command::Nick { nickname } => self.nick(id, nickname),
            Command::User { username, realname } => self.user(id, username, realname),
            Command::Quit { message } => {
                self.quit(id, message.as_deref().unwrap_or(DEFAULT_QUIT_MESSAGE))
            }
            Command::Join { channels } => self.join(id, channels),
            Command::Part { channels, message } => self.part(id, channels, message),
            Command::Privmsg { target, text } => self.message(id, target, text, false),
            Command::Notice { target, text } => self.message(id, target, text, true),
            Command::Away { message } => {
                let reply = if message.is_some() {
                    Reply::NowAway
                } else {
                    Reply::UnAway
                };
                client.set_away(message);
                client.reply(reply);
            }
            Command::Mode { target, changes } => self.mode(id, target, changes),
            Command::Whois { nick } => self.whois(id, nick),
            Command::Who { mask } => self.who(id, mask),
        }
    }

    fn nick(&mut self, id: ClientId, nickname: String) {
        if !is_nickname(&nickname) {
            self.reply(id, Reply::ErroneusNickname { nickname });
            return;
        }
        let Some(old) = self.clients.get(id).map(|c| c.nick().map(str::to_owned)) else {
            return;
        };
        if old.as_deref() == Some(nickname.as_str()) {
            return;
        }
        if !self.clients.rename(id, old.as_deref(), &nickname) {
            self.reply(id, Reply::NicknameInUse { nickname });
            return;
        }

        if let Some(client) = self.clients.get_mut(id) {
            client.change_nickname(nickname);
            debug!(%id, old = old.as_deref().unwrap_or("*"), new = client.nick_or_star(), "nick");
        }
        self.try_register(id);
    }

    fn user(&mut self, id: ClientId, username: String, realname: String) {
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };
        if client.is_registered() {
            client.reply(Reply::AlreadyRegistered);
            return;
        }
        client.set_user(username, realname);
        self.try_register(id);
    }

    /// Complete registration once both NICK and USER have arrived.
    fn try_register(&mut self, id: ClientId) {
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };
        if client.is_registered() || !client.has_nick() || !client.has_username() {
            return;
        }
        client.register();

        client.reply(Reply::Welcome {
            user_host: client.user_host(),
        });
        client.reply(Reply::YourHost {
            version: VERSION.into(),
        });
        client.reply(Reply::Created {
            since: self.created.clone(),
        });
        client.reply(Reply::MyInfo {
            version: VERSION.into(),
        });

        if self.config.motd.is_empty() {
            client.reply(Reply::NoMotd);
        } else {
            client.reply(Reply::MotdStart);
            for line in &self.config.motd {
                client.reply(Reply::Motd { line: line.clone() });
            }
            client.reply(Reply::EndOfMotd);
        }
    }

    fn join(&mut self, id: ClientId, names: Vec<String>) {
        for name in names {
            if !is_channel_name(&name) {
                self.reply(id, Reply::NoSuchChannel { channel: name });
                continue;
            }
            self.channels.join(&name, id, &mut self.clients);
        }
    }

    fn part(&mut self, id: ClientId, names: Vec<String>, message: Option<String>) {
        let Some(default) = self.clients.get(id).map(|c| c.nick_or_star().to_owned()) else {
            return;
        };
        let message = message.unwrap_or(default);
        for name in names {
            if let Err(e) = self.channels.part(&name, id, &message, &mut self.clients) {
                self.reply(id, e.reply());
            }
        }
    }

    /// PRIVMSG and NOTICE. NOTICE never triggers an automatic reply.
    fn message(&self, id: ClientId, target: String, text: String, notice: bool) {
        let Some(sender) = self.clients.get(id) else {
            return;
        };
        let relayed = (if notice {
            Reply::Notice {
                source: sender.user_host(),
                target: target.clone(),
                text,
            }
        } else {
            Reply::Privmsg {
                source: sender.user_host(),
                target: target.clone(),
                text,
            }
        })
        .format(&self.config.server_name, "*");

        if is_channel_name(&target) {
            let Some(channel) = self.channels.get(&target) else {
                if !notice {
                    sender.reply(Reply::NoSuchChannel { channel: target });
                }
                return;
            };
            if !channel.is_member(id) {
                if !notice {
                    sender.reply(Reply::CannotSendToChan { channel: target });
                }
                return;
            }
            channel.broadcast(&self.clients, &relayed, Some(id));
            return;
        }

        let Some(recipient) = self.clients.find(&target).and_then(|rid| self.clients.get(rid))
        else {
            if !notice {
                sender.reply(Reply::NoSuchNick { nick: target });
            }
            return;
        };
        recipient.send(relayed);
        if let (false, Some(away)) = (notice, recipient.away_message()) {
            sender.reply(Reply::Away {
                nick: recipient.nick_or_star().to_owned(),
                message: away.to_owned(),
            });
        }
    }

    fn mode(&mut self, id: ClientId, target: String, changes: Option<String>) {
        if is_channel_name(&target) {
            // Channel modes are not supported; only existence is reported.
            if self.channels.get(&target).is_none() {
                self.reply(id, Reply::NoSuchChannel { channel: target });
            }
            return;
        }

        let target_id = self.clients.find(&target);
        let Some(client) = self.clients.get_mut(id) else {
            return;
        };
        if target_id != Some(id) {
            let reply = match target_id {
                Some(_) => Reply::UsersDontMatch,
                None => Reply::NoSuchNick { nick: target },
            };
            client.reply(reply);
            return;
        }

        let Some(changes) = changes else {
            client.reply(Reply::UModeIs {
                modes: client.mode_string(),
            });
            return;
        };
        let change = client.apply_modes(&changes);
        if change.unknown_flag {
            client.reply(Reply::UModeUnknownFlag);
        }
        if !change.applied.is_empty() {
            let nick = client.nick_or_star().to_owned();
            client.send(Message::from_source(
                client.user_host(),
                "MODE",
                vec![nick, change.applied],
            ));
        }
    }

    fn whois(&self, id: ClientId, nick: String) {
        let Some(target) = self.clients.find(&nick).and_then(|tid| self.clients.get(tid)) else {
            self.reply(id, Reply::NoSuchNick { nick: nick.clone() });
            self.reply(id, Reply::EndOfWhois { nick });
            return;
        };
        let nick = target.nick_or_star().to_owned();

        self.reply(
            id,
            Reply::WhoisUser {
                nick: nick.clone(),
                username: target.username().unwrap_or("*").to_owned(),
                host: target.hostname().to_owned(),
                realname: target.realname().to_owned(),
            },
        );
        self.reply(id, Reply::WhoisServer { nick: nick.clone() });
        if let Some(away) = target.away_message() {
            self.reply(
                id,
                Reply::Away {
                    nick: nick.clone(),
                    message: away.to_owned(),
                },
            );
        }
        self.reply(
            id,
            Reply::WhoisIdle {
                nick: nick.clone(),
                idle: target.idle_seconds(),
                signon: target.signon_time(),
            },
        );
        let channels = target.channels().collect::<Vec<_>>().join(" ");
        if !channels.is_empty() {
            self.reply(
                id,
                Reply::WhoisChannels {
                    nick: nick.clone(),
                    channels,
                },
            );
        }
        self.reply(id, Reply::EndOfWhois { nick });
    }

    /// WHO for a channel, a nick, or (no mask, `*`, `0`) every visible user.
    fn who(&self, id: ClientId, mask: Option<String>) {
        let mask = mask.unwrap_or_else(|| "*".into());
        let who_reply = |channel: &str, client: &Client| Reply::WhoReply {
            channel: channel.to_owned(),
            username: client.username().unwrap_or("*").to_owned(),
            host: client.hostname().to_owned(),
            nick: client.nick_or_star().to_owned(),
            flags: if client.away_message().is_some() { "G" } else { "H" }.into(),
            hops: client.hops(),
            realname: client.realname().to_owned(),
        };

        if is_channel_name(&mask) {
            if let Some(channel) = self.channels.get(&mask) {
                for member in channel.members().filter_map(|m| self.clients.get(m)) {
                    self.reply(id, who_reply(channel.name(), member));
                }
            }
        } else if mask == "*" || mask == "0" {
            let mut visible: Vec<&Client> = self
                .clients
                .iter()
                .filter(|c| c.is_registered())
                .filter(|c| c.id() == id || !c.has_mode(UserMode::Invisible))
                .collect();
            visible.sort_by_key(|c| c.id());
            for client in visible {
                self.reply(id, who_reply("*", client));
            }
        } else if let Some(client) = self.clients.find(&mask).and_then(|m| self.clients.get(m)) {
            self.reply(id, who_reply("*", client));
        }

        self.reply(id, Reply::EndOfWho { mask });
    }
}
