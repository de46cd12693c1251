/// Command grammar: turns a parsed [`Message`] into a typed [`Command`].
///
/// Only the verbs the server acts on are recognised. Everything else is an
/// [`CommandError::UnknownCommand`], which the read loop drops.
use super::message::{Message, ParseError};

/// Longest nickname accepted by [`is_nickname`].
pub const MAX_NICK_LENGTH: usize = 30;

/// A command received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Cap { subcommand: String },
    Pass { password: String },
    Nick { nickname: String },
    User { username: String, realname: String },
    Quit { message: Option<String> },
    Ping { token: String },
    Pong { token: String },
    Join { channels: Vec<String> },
    Part { channels: Vec<String>, message: Option<String> },
    Privmsg { target: String, text: String },
    Notice { target: String, text: String },
    Away { message: Option<String> },
    Mode { target: String, changes: Option<String> },
    Whois { nick: String },
    Who { mask: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Message(#[from] ParseError),
    #[error("{command}: not enough parameters")]
    NotEnoughArgs { command: String },
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl Command {
    /// Parse one raw line into a command.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        Self::from_message(Message::parse(line)?)
    }

    pub fn from_message(msg: Message) -> Result<Self, CommandError> {
        let verb = msg.command.to_ascii_uppercase();
        let mut params = msg.params.into_iter();

        let arity = |min: usize, have: usize| {
            if have < min {
                Err(CommandError::NotEnoughArgs {
                    command: verb.clone(),
                })
            } else {
                Ok(())
            }
        };
        let count = params.len();

        let command = match verb.as_str() {
            "CAP" => {
                arity(1, count)?;
                Command::Cap {
                    subcommand: params.next().unwrap_or_default().to_ascii_uppercase(),
                }
            }
            "PASS" => {
                arity(1, count)?;
                Command::Pass {
                    password: params.next().unwrap_or_default(),
                }
            }
            "NICK" => {
                arity(1, count)?;
                Command::Nick {
                    nickname: params.next().unwrap_or_default(),
                }
            }
            "USER" => {
                arity(4, count)?;
                let username = params.next().unwrap_or_default();
                Command::User {
                    username,
                    realname: params.nth(2).unwrap_or_default(),
                }
            }
            "QUIT" => Command::Quit {
                message: params.next(),
            },
            "PING" => {
                arity(1, count)?;
                Command::Ping {
                    token: params.next().unwrap_or_default(),
                }
            }
            "PONG" => {
                arity(1, count)?;
                Command::Pong {
                    token: params.next().unwrap_or_default(),
                }
            }
            "JOIN" => {
                arity(1, count)?;
                Command::Join {
                    channels: split_list(&params.next().unwrap_or_default()),
                }
            }
            "PART" => {
                arity(1, count)?;
                Command::Part {
                    channels: split_list(&params.next().unwrap_or_default()),
                    message: params.next(),
                }
            }
            "PRIVMSG" | "NOTICE" => {
                arity(2, count)?;
                let target = params.next().unwrap_or_default();
                let text = params.next().unwrap_or_default();
                if verb == "PRIVMSG" {
                    Command::Privmsg { target, text }
                } else {
                    Command::Notice { target, text }
                }
            }
            "AWAY" => Command::Away {
                message: params.next().filter(|m| !m.is_empty()),
            },
            "MODE" => {
                arity(1, count)?;
                Command::Mode {
                    target: params.next().unwrap_or_default(),
                    changes: params.next(),
                }
            }
            "WHOIS" => {
                arity(1, count)?;
                // `WHOIS [server] nick`: the nick is always last.
                Command::Whois {
                    nick: params.last().unwrap_or_default(),
                }
            }
            "WHO" => Command::Who {
                mask: params.next(),
            },
            _ => return Err(CommandError::UnknownCommand(verb.clone())),
        };

        Ok(command)
    }

    /// Upper-case verb for logs and replies.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Cap { .. } => "CAP",
            Command::Pass { .. } => "PASS",
            Command::Nick { .. } => "NICK",
            Command::User { .. } => "USER",
            Command::Quit { .. } => "QUIT",
            Command::Ping { .. } => "PING",
            Command::Pong { .. } => "PONG",
            Command::Join { .. } => "JOIN",
            Command::Part { .. } => "PART",
            Command::Privmsg { .. } => "PRIVMSG",
            Command::Notice { .. } => "NOTICE",
            Command::Away { .. } => "AWAY",
            Command::Mode { .. } => "MODE",
            Command::Whois { .. } => "WHOIS",
            Command::Who { .. } => "WHO",
        }
    }

    /// Commands a peer may send while still connecting.
    pub fn allowed_before_registration(&self) -> bool {
        matches!(
            self,
            Command::Cap { .. }
                | Command::Pass { .. }
                | Command::Nick { .. }
                | Command::User { .. }
                | Command::Quit { .. }
                | Command::Ping { .. }
                | Command::Pong { .. }
        )
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// RFC 2812 nickname syntax: a letter or special character, then letters,
/// digits, specials or `-`.
pub fn is_nickname(nick: &str) -> bool {
    let is_special = |c: char| matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}');

    let mut chars = nick.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    nick.len() <= MAX_NICK_LENGTH
        && (first.is_ascii_alphabetic() || is_special(first))
        && chars.all(|c| c.is_ascii_alphanumeric() || is_special(c) || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_registration_commands() {
        assert_eq!(
            Command::parse("nick bob").unwrap(),
            Command::Nick {
                nickname: "bob".into()
            }
        );
        assert_eq!(
            Command::parse("USER b 0 * :Bob Builder").unwrap(),
            Command::User {
                username: "b".into(),
                realname: "Bob Builder".into()
            }
        );
    }

    #[test]
    fn user_needs_four_params() {
        assert_eq!(
            Command::parse("USER b 0 *"),
            Err(CommandError::NotEnoughArgs {
                command: "USER".into()
            })
        );
    }

    #[test]
    fn verb_in_arity_error_is_uppercased() {
        assert_eq!(
            Command::parse("privmsg #rust"),
            Err(CommandError::NotEnoughArgs {
                command: "PRIVMSG".into()
            })
        );
    }

    #[test]
    fn arity_error_ignores_prefix() {
        assert_eq!(
            Command::parse(":bob!b@host JOIN"),
            Err(CommandError::NotEnoughArgs {
                command: "JOIN".into()
            })
        );
    }

    #[test]
    fn unknown_verbs_are_distinguished() {
        assert_eq!(
            Command::parse("FROBNICATE now"),
            Err(CommandError::UnknownCommand("FROBNICATE".into()))
        );
        assert!(matches!(
            Command::parse(""),
            Err(CommandError::Message(ParseError::Empty))
        ));
    }

    #[test]
    fn join_splits_channel_list() {
        assert_eq!(
            Command::parse("JOIN #a,#b,,#c").unwrap(),
            Command::Join {
                channels: vec!["#a".into(), "#b".into(), "#c".into()]
            }
        );
    }

    #[test]
    fn quit_and_away_are_optional() {
        assert_eq!(
            Command::parse("QUIT").unwrap(),
            Command::Quit { message: None }
        );
        assert_eq!(
            Command::parse("AWAY :").unwrap(),
            Command::Away { message: None }
        );
        assert_eq!(
            Command::parse("AWAY :lunch").unwrap(),
            Command::Away {
                message: Some("lunch".into())
            }
        );
    }

    #[test]
    fn whois_takes_last_param() {
        assert_eq!(
            Command::parse("WHOIS irc.example.net bob").unwrap(),
            Command::Whois { nick: "bob".into() }
        );
    }

    #[test]
    fn registration_gate() {
        assert!(Command::parse("PONG :x").unwrap().allowed_before_registration());
        assert!(!Command::parse("JOIN #a").unwrap().allowed_before_registration());
    }

    #[test]
    fn nickname_syntax() {
        assert!(is_nickname("alice"));
        assert!(is_nickname("[away]"));
        assert!(is_nickname("b-0b_"));
        assert!(!is_nickname(""));
        assert!(!is_nickname("9lives"));
        assert!(!is_nickname("-dash"));
        assert!(!is_nickname("has space"));
        assert!(!is_nickname("#chan"));
        assert!(!is_nickname(&"x".repeat(MAX_NICK_LENGTH + 1)));
    }
}
