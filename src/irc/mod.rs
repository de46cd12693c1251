pub mod channel;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod message;
pub mod queue;
pub mod reader;
pub mod registry;
pub mod reply;
pub mod server;
pub mod socket;
pub mod timer;
