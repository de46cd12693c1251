/// End-to-end tests over real TCP connections.
///
/// Each test starts its own server on an ephemeral port with short timeouts
/// and drives it with plain line-based clients.
///
/// Run with: `cargo test --test lifecycle`
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use driftwood::irc::config::Config;
use driftwood::irc::server;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> Config {
    Config {
        server_name: "irc.test".into(),
        motd: vec!["welcome aboard".into()],
        ..Config::default()
    }
}

async fn start(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(vec![listener], config));
    addr
}

/// Simple async IRC client for testing.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    lines: Vec<String>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            lines: Vec::new(),
        })
    }

    /// Connect and register, reading until the end of the MOTD.
    async fn register(addr: SocketAddr, nick: &str) -> io::Result<Self> {
        let mut client = Self::connect(addr).await?;
        client.send(&format!("NICK {nick}")).await?;
        client.send(&format!("USER {nick} 0 * :{nick}")).await?;
        client.read_until(" 376 ").await?;
        Ok(client)
    }

    async fn send(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(format!("{line}\r\n").as_bytes()).await?;
        self.writer.flush().await
    }

    /// Next line, or `None` at end of stream.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for a line"))??;
        if read == 0 {
            return Ok(None);
        }
        let line = line.trim_end().to_string();
        self.lines.push(line.clone());
        Ok(Some(line))
    }

    /// Read lines until one contains `marker`, and return it.
    async fn read_until(&mut self, marker: &str) -> io::Result<String> {
        loop {
            match self.next_line().await? {
                Some(line) if line.contains(marker) => return Ok(line),
                Some(_) => continue,
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("connection closed waiting for '{marker}'"),
                    ))
                }
            }
        }
    }

    /// Read until the server hangs up; returns everything read meanwhile.
    async fn read_to_close(&mut self) -> io::Result<Vec<String>> {
        let mut seen = Vec::new();
        while let Some(line) = self.next_line().await? {
            seen.push(line);
        }
        Ok(seen)
    }

    /// Round-trip a PING so that everything sent before it has arrived.
    async fn sync(&mut self, token: &str) -> io::Result<Vec<String>> {
        self.send(&format!("PING :{token}")).await?;
        let mut seen = Vec::new();
        loop {
            let Some(line) = self.next_line().await? else {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed"));
            };
            if line.contains(" PONG ") && line.ends_with(token) {
                return Ok(seen);
            }
            seen.push(line);
        }
    }
}

#[tokio::test]
async fn registration_welcome_and_ping() {
    let addr = start(config()).await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();

    assert_eq!(
        alice.lines[0],
        ":irc.test 001 alice :Welcome to the Internet Relay Network alice!alice@127.0.0.1"
    );
    assert!(alice
        .lines
        .contains(&":irc.test 372 alice :- welcome aboard".to_string()));

    alice.send("PING :tok").await.unwrap();
    assert_eq!(
        alice.read_until("PONG").await.unwrap(),
        ":irc.test PONG irc.test :tok"
    );
}

#[tokio::test]
async fn commands_before_registration_get_451() {
    let addr = start(config()).await;
    let mut peer = TestClient::connect(addr).await.unwrap();

    peer.send("JOIN #rust").await.unwrap();
    assert_eq!(
        peer.read_until(" 451 ").await.unwrap(),
        ":irc.test 451 * :You have not registered"
    );
}

#[tokio::test]
async fn short_command_gets_461() {
    let addr = start(config()).await;
    let mut peer = TestClient::connect(addr).await.unwrap();

    peer.send("USER lonely").await.unwrap();
    assert_eq!(
        peer.read_until(" 461 ").await.unwrap(),
        ":irc.test 461 * USER :Not enough parameters"
    );

    // The connection is still usable afterwards.
    peer.send("NICK lonely").await.unwrap();
    peer.send("USER lonely 0 * :Lonely").await.unwrap();
    peer.read_until(" 001 ").await.unwrap();
    peer.read_until(" 376 ").await.unwrap();

    // Once named, the reply is addressed by nick.
    peer.send("JOIN").await.unwrap();
    assert_eq!(
        peer.read_until(" 461 ").await.unwrap(),
        ":irc.test 461 lonely JOIN :Not enough parameters"
    );
}

#[tokio::test]
async fn join_and_privmsg_fan_out() {
    let addr = start(config()).await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();
    let mut bob = TestClient::register(addr, "bob").await.unwrap();

    alice.send("JOIN #rust").await.unwrap();
    alice.read_until(" 366 ").await.unwrap();
    bob.send("JOIN #rust").await.unwrap();
    assert_eq!(
        bob.read_until(" 353 ").await.unwrap(),
        ":irc.test 353 bob = #rust :alice bob"
    );

    assert_eq!(
        alice.read_until("JOIN").await.unwrap(),
        ":bob!bob@127.0.0.1 JOIN :#rust"
    );

    bob.send("PRIVMSG #rust :hello there").await.unwrap();
    assert_eq!(
        alice.read_until("PRIVMSG").await.unwrap(),
        ":bob!bob@127.0.0.1 PRIVMSG #rust :hello there"
    );
}

#[tokio::test]
async fn nick_and_quit_seen_once_through_two_channels() {
    let addr = start(config()).await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();
    let mut bob = TestClient::register(addr, "bob").await.unwrap();

    for channel in ["#one", "#two"] {
        alice.send(&format!("JOIN {channel}")).await.unwrap();
        alice.read_until(" 366 ").await.unwrap();
        bob.send(&format!("JOIN {channel}")).await.unwrap();
        bob.read_until(" 366 ").await.unwrap();
    }
    alice.sync("joined").await.unwrap();

    alice.send("NICK alicia").await.unwrap();
    assert_eq!(
        alice.read_until("NICK").await.unwrap(),
        ":alice!alice@127.0.0.1 NICK :alicia"
    );
    alice.send("QUIT :done here").await.unwrap();
    assert_eq!(
        alice.read_to_close().await.unwrap(),
        vec!["ERROR :Closing link: 127.0.0.1 (done here)".to_string()]
    );

    let seen = bob.sync("after").await.unwrap();
    assert_eq!(
        seen,
        vec![
            ":alice!alice@127.0.0.1 NICK :alicia".to_string(),
            ":alicia!alice@127.0.0.1 QUIT :done here".to_string(),
        ]
    );
}

#[tokio::test]
async fn peer_hangup_is_reported_to_friends() {
    let addr = start(config()).await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();
    let mut bob = TestClient::register(addr, "bob").await.unwrap();

    alice.send("JOIN #rust").await.unwrap();
    alice.read_until(" 366 ").await.unwrap();
    bob.send("JOIN #rust").await.unwrap();
    bob.read_until(" 366 ").await.unwrap();

    drop(alice);
    assert_eq!(
        bob.read_until("QUIT").await.unwrap(),
        ":alice!alice@127.0.0.1 QUIT :connection closed"
    );

    // The nickname is free again.
    let mut again = TestClient::register(addr, "alice").await.unwrap();
    again.sync("ok").await.unwrap();
}

#[tokio::test]
async fn unregistered_connection_times_out() {
    let addr = start(Config {
        login_timeout: Duration::from_millis(300),
        ..config()
    })
    .await;
    let mut peer = TestClient::connect(addr).await.unwrap();
    peer.send("NICK slowpoke").await.unwrap();

    let seen = peer.read_to_close().await.unwrap();
    assert_eq!(
        seen,
        vec!["ERROR :Closing link: 127.0.0.1 (registration timed out)".to_string()]
    );
}

#[tokio::test]
async fn silent_client_is_probed_then_dropped() {
    let addr = start(Config {
        idle_timeout: Duration::from_millis(300),
        quit_timeout: Duration::from_millis(300),
        ..config()
    })
    .await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();

    assert_eq!(
        alice.read_until("PING").await.unwrap(),
        ":irc.test PING :irc.test"
    );
    let seen = alice.read_to_close().await.unwrap();
    assert_eq!(
        seen,
        vec!["ERROR :Closing link: 127.0.0.1 (connection timeout)".to_string()]
    );
}

#[tokio::test]
async fn answering_the_probe_keeps_the_connection() {
    let addr = start(Config {
        idle_timeout: Duration::from_millis(300),
        quit_timeout: Duration::from_millis(600),
        ..config()
    })
    .await;
    let mut alice = TestClient::register(addr, "alice").await.unwrap();

    for _ in 0..3 {
        alice.read_until("PING").await.unwrap();
        alice.send("PONG :irc.test").await.unwrap();
    }
    alice.sync("still here").await.unwrap();
}
