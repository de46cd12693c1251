/// IRC message parsing and serialization.
///
/// RFC 2812 framing: `[:prefix SPACE] command [SPACE params] [SPACE :trailing]`.
/// Parsing works on a line with its terminator already removed.
use std::fmt;

/// One IRC protocol line, either received from a peer or built as a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source of the message: a server name or a `nick!user@host` identity.
    pub prefix: Option<String>,
    /// Verb or three-digit numeric.
    pub command: String,
    /// Parameters; the last one may contain spaces.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// A message originating from this server.
    pub fn from_server(server: &str, command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: Some(server.to_owned()),
            command: command.to_owned(),
            params,
        }
    }

    /// A message originating from a client identity (`nick!user@host`).
    pub fn from_source(source: String, command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: Some(source),
            command: command.to_owned(),
            params,
        }
    }

    /// Parse a single line (with or without its trailing `\r\n`).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match line.strip_prefix(':') {
            Some(tagged) => match tagged.split_once(' ') {
                Some((prefix, rest)) if !prefix.is_empty() => {
                    (Some(prefix.to_owned()), rest.trim_start_matches(' '))
                }
                _ => return Err(ParseError::MissingCommand),
            },
            None => (None, line.trim_start_matches(' ')),
        };

        let (command, mut remaining) = rest.split_once(' ').unwrap_or((rest, ""));
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        loop {
            remaining = remaining.trim_start_matches(' ');
            if remaining.is_empty() {
                break;
            }
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, rest)) => {
                    params.push(param.to_owned());
                    remaining = rest;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to wire format without the `\r\n` terminator.
    ///
    /// The final parameter is always written in trailing form.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push_str(" :");
            out.push_str(last);
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
