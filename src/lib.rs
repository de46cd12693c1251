//! Driftwood, a small IRC server.
//!
//! Each connection is a [`irc::client::Client`] owned by a single dispatcher
//! task. Read loops and timers never touch client state directly; they push
//! events onto the dispatcher queue, and the dispatcher applies them in
//! order. Presence changes (nick, quit) fan out through each client's
//! reference-counted friend set, so every observer hears about them exactly
//! once no matter how many channels it shares with the client.

pub mod irc;
