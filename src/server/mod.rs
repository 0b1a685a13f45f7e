//! Request server for the voice agent

pub mod client;
pub mod listener;
pub mod message;

pub use client::BrokerClient;
pub use listener::{frame_codec, BrokerServer, MAX_FRAME_LENGTH};
pub use message::{Request, RequestEnvelope, Response};
