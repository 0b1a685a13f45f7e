//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "loadbroker")]
#[command(about = "Load broker - carrier rate negotiation for voice agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the broker server
    Serve {
        /// TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides config)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Send one carrier offer to a running server
    Negotiate {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Load being negotiated
        #[arg(short, long)]
        load_id: String,

        /// Carrier MC number
        #[arg(short, long)]
        mc_number: String,

        /// Carrier's offer as spoken (number or text)
        #[arg(short, long)]
        offer: String,
    },

    /// Discard the negotiation state for a finished call
    EndCall {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Load being negotiated
        #[arg(short, long)]
        load_id: String,

        /// Carrier MC number
        #[arg(short, long)]
        mc_number: String,
    },

    /// Run offers through an in-process engine and print each decision
    Simulate {
        /// Posted rate of the load
        #[arg(short, long)]
        reference_rate: f64,

        /// Offers in order, one per round
        #[arg(required = true)]
        offers: Vec<String>,
    },

    /// Inspect the load catalog
    Loads {
        /// Loads JSON file
        #[arg(short, long, default_value = "data/loads.json")]
        file: PathBuf,

        #[command(subcommand)]
        action: LoadsAction,
    },
}

#[derive(clap::Args, Debug)]
pub struct RemoteArgs {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    pub addr: String,

    /// API key
    #[arg(short = 'k', long, env = "LOADBROKER_API_KEY")]
    pub api_key: String,

    /// Call ID; `negotiate` generates and prints one when omitted
    #[arg(short = 'c', long)]
    pub call_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum LoadsAction {
    /// Show one load
    Get {
        /// Load ID
        load_id: String,
    },

    /// Search loads
    Search {
        #[arg(long)]
        origin: Option<String>,

        #[arg(long)]
        destination: Option<String>,

        #[arg(long)]
        equipment_type: Option<String>,

        /// Pickup no later than (YYYY-MM-DD or ISO datetime)
        #[arg(long)]
        pickup_before: Option<String>,

        /// Pickup no earlier than (YYYY-MM-DD or ISO datetime)
        #[arg(long)]
        pickup_after: Option<String>,

        #[arg(long)]
        max_weight: Option<u64>,

        /// Return at most this many loads
        #[arg(long)]
        limit: Option<usize>,
    },
}
