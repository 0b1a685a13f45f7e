//! CLI module for the load broker

pub mod app;
pub mod commands;

pub use app::BrokerApp;
pub use commands::{Cli, Commands, LoadsAction, RemoteArgs};
