/// Reply formatting: semantic replies rendered into wire [`Message`]s.
///
/// Numerics are addressed to the recipient's nick (or `*` before one is
/// assigned). Relayed events (NICK, QUIT, JOIN, ...) carry the acting
/// client's `nick!user@host` identity as their prefix and read the same for
/// every recipient.
use super::message::Message;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    // Registration.
    Welcome { user_host: String },
    YourHost { version: String },
    Created { since: String },
    MyInfo { version: String },
    MotdStart,
    Motd { line: String },
    EndOfMotd,
    NoMotd,
    CapList,

    // Liveness and teardown.
    Ping,
    Pong { token: String },
    Error { message: String },

    // Relayed events.
    Nick { source: String, nickname: String },
    Quit { source: String, message: String },
    Join { source: String, channel: String },
    Part { source: String, channel: String, message: String },
    Privmsg { source: String, target: String, text: String },
    Notice { source: String, target: String, text: String },

    // Queries.
    UModeIs { modes: String },
    Away { nick: String, message: String },
    UnAway,
    NowAway,
    WhoisUser { nick: String, username: String, host: String, realname: String },
    WhoisServer { nick: String },
    WhoisIdle { nick: String, idle: u64, signon: u64 },
    WhoisChannels { nick: String, channels: String },
    EndOfWhois { nick: String },
    WhoReply {
        channel: String,
        username: String,
        host: String,
        nick: String,
        flags: String,
        hops: u32,
        realname: String,
    },
    EndOfWho { mask: String },
    NamReply { channel: String, names: String },
    EndOfNames { channel: String },

    // Errors.
    NoSuchNick { nick: String },
    NoSuchChannel { channel: String },
    CannotSendToChan { channel: String },
    ErroneusNickname { nickname: String },
    NicknameInUse { nickname: String },
    NotOnChannel { channel: String },
    NotRegistered,
    NeedMoreParams { command: String },
    AlreadyRegistered,
    UModeUnknownFlag,
    UsersDontMatch,
}

impl Reply {
    /// Render for `recipient`, the nick the numeric is addressed to.
    pub fn format(&self, server: &str, recipient: &str) -> Message {
        let numeric = |code: &str, mut params: Vec<String>| {
            params.insert(0, recipient.to_owned());
            Message::from_server(server, code, params)
        };

        match self {
            Reply::Welcome { user_host } => numeric(
                "001",
                vec![format!("Welcome to the Internet Relay Network {user_host}")],
            ),
            Reply::YourHost { version } => numeric(
                "002",
                vec![format!("Your host is {server}, running version {version}")],
            ),
            Reply::Created { since } => {
                numeric("003", vec![format!("This server was created {since}")])
            }
            Reply::MyInfo { version } => numeric(
                "004",
                vec![server.into(), version.clone(), "aiosw".into(), "".into()],
            ),
            Reply::MotdStart => numeric("375", vec![format!("- {server} Message of the day - ")]),
            Reply::Motd { line } => numeric("372", vec![format!("- {line}")]),
            Reply::EndOfMotd => numeric("376", vec!["End of MOTD command".into()]),
            Reply::NoMotd => numeric("422", vec!["MOTD File is missing".into()]),
            Reply::CapList => Message::from_server(
                server,
                "CAP",
                vec![recipient.into(), "LS".into(), "".into()],
            ),

            Reply::Ping => Message::from_server(server, "PING", vec![server.into()]),
            Reply::Pong { token } => {
                Message::from_server(server, "PONG", vec![server.into(), token.clone()])
            }
            Reply::Error { message } => Message {
                prefix: None,
                command: "ERROR".into(),
                params: vec![message.clone()],
            },

            Reply::Nick { source, nickname } => {
                Message::from_source(source.clone(), "NICK", vec![nickname.clone()])
            }
            Reply::Quit { source, message } => {
                Message::from_source(source.clone(), "QUIT", vec![message.clone()])
            }
            Reply::Join { source, channel } => {
                Message::from_source(source.clone(), "JOIN", vec![channel.clone()])
            }
            Reply::Part {
                source,
                channel,
                message,
            } => Message::from_source(
                source.clone(),
                "PART",
                vec![channel.clone(), message.clone()],
            ),
            Reply::Privmsg {
                source,
                target,
                text,
            } => Message::from_source(
                source.clone(),
                "PRIVMSG",
                vec![target.clone(), text.clone()],
            ),
            Reply::Notice {
                source,
                target,
                text,
            } => Message::from_source(
                source.clone(),
                "NOTICE",
                vec![target.clone(), text.clone()],
            ),

            Reply::UModeIs { modes } => {
                // An empty mode string still has to be sent as one parameter.
                let modes = if modes.is_empty() { "+" } else { modes };
                numeric("221", vec![modes.into()])
            }
            Reply::Away { nick, message } => numeric("301", vec![nick.clone(), message.clone()]),
            Reply::UnAway => numeric(
                "305",
                vec!["You are no longer marked as being away".into()],
            ),
            Reply::NowAway => numeric("306", vec!["You have been marked as being away".into()]),
            Reply::WhoisUser {
                nick,
                username,
                host,
                realname,
            } => numeric(
                "311",
                vec![
                    nick.clone(),
                    username.clone(),
                    host.clone(),
                    "*".into(),
                    realname.clone(),
                ],
            ),
            Reply::WhoisServer { nick } => numeric(
                "312",
                vec![nick.clone(), server.into(), "driftwood".into()],
            ),
            Reply::WhoisIdle { nick, idle, signon } => numeric(
                "317",
                vec![
                    nick.clone(),
                    idle.to_string(),
                    signon.to_string(),
                    "seconds idle, signon time".into(),
                ],
            ),
            Reply::WhoisChannels { nick, channels } => {
                numeric("319", vec![nick.clone(), channels.clone()])
            }
            Reply::EndOfWhois { nick } => {
                numeric("318", vec![nick.clone(), "End of WHOIS list".into()])
            }
            Reply::WhoReply {
                channel,
                username,
                host,
                nick,
                flags,
                hops,
                realname,
            } => numeric(
                "352",
                vec![
                    channel.clone(),
                    username.clone(),
                    host.clone(),
                    server.into(),
                    nick.clone(),
                    flags.clone(),
                    format!("{hops} {realname}"),
                ],
            ),
            Reply::EndOfWho { mask } => {
                numeric("315", vec![mask.clone(), "End of WHO list".into()])
            }
            Reply::NamReply { channel, names } => {
                numeric("353", vec!["=".into(), channel.clone(), names.clone()])
            }
            Reply::EndOfNames { channel } => {
                numeric("366", vec![channel.clone(), "End of NAMES list".into()])
            }

            Reply::NoSuchNick { nick } => {
                numeric("401", vec![nick.clone(), "No such nick/channel".into()])
            }
            Reply::NoSuchChannel { channel } => {
                numeric("403", vec![channel.clone(), "No such channel".into()])
            }
            Reply::CannotSendToChan { channel } => {
                numeric("404", vec![channel.clone(), "Cannot send to channel".into()])
            }
            Reply::ErroneusNickname { nickname } => {
                numeric("432", vec![nickname.clone(), "Erroneous nickname".into()])
            }
            Reply::NicknameInUse { nickname } => numeric(
                "433",
                vec![nickname.clone(), "Nickname is already in use".into()],
            ),
            Reply::NotOnChannel { channel } => numeric(
                "442",
                vec![channel.clone(), "You're not on that channel".into()],
            ),
            Reply::NotRegistered => numeric("451", vec!["You have not registered".into()]),
            Reply::NeedMoreParams { command } => {
                numeric("461", vec![command.clone(), "Not enough parameters".into()])
            }
            Reply::AlreadyRegistered => numeric(
                "462",
                vec!["Unauthorized command (already registered)".into()],
            ),
            Reply::UModeUnknownFlag => numeric("501", vec!["Unknown MODE flag".into()]),
            Reply::UsersDontMatch => numeric(
                "502",
                vec!["Cannot change mode for other users".into()],
            ),
        }
    }
}
