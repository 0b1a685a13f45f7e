//! Load broker CLI binary

use anyhow::Context;
use clap::Parser;
use loadbroker::catalog::LoadQuery;
use loadbroker::cli::{app, BrokerApp, Cli, Commands, LoadsAction};
use loadbroker::config::{BrokerConfig, ENV_LOG_LEVEL};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// One-shot commands stay quiet unless asked otherwise
fn client_log_level() -> String {
    std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "warn".to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut config = BrokerConfig::load(config.as_deref()).context("loading config")?;
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            init_logging(&config.logging.level);

            tracing::info!(
                "Starting load broker on {} (loads: {})",
                config.server.listen_addr,
                config.catalog.loads_path.display()
            );
            let app = BrokerApp::new(config).context("building broker")?;
            app.serve().await?;
        }

        Commands::Negotiate {
            remote,
            load_id,
            mc_number,
            offer,
        } => {
            init_logging(&client_log_level());
            let round = app::negotiate_remote(&remote, &load_id, &mc_number, &offer).await?;
            print_json(&round)?;
        }

        Commands::EndCall {
            remote,
            load_id,
            mc_number,
        } => {
            init_logging(&client_log_level());
            let reply = app::end_call_remote(&remote, &load_id, &mc_number).await?;
            print_json(&reply)?;
        }

        Commands::Simulate {
            reference_rate,
            offers,
        } => {
            init_logging(&client_log_level());
            anyhow::ensure!(
                reference_rate.is_finite() && reference_rate > 0.0,
                "reference rate must be a positive number"
            );
            let policy = BrokerConfig::default().negotiation;
            for decision in app::simulate(policy, reference_rate, &offers) {
                print_json(&decision)?;
            }
        }

        Commands::Loads { file, action } => {
            init_logging(&client_log_level());
            match action {
                LoadsAction::Get { load_id } => {
                    print_json(&app::get_load(&file, &load_id)?)?;
                }
                LoadsAction::Search {
                    origin,
                    destination,
                    equipment_type,
                    pickup_before,
                    pickup_after,
                    max_weight,
                    limit,
                } => {
                    let query = LoadQuery {
                        origin,
                        destination,
                        equipment_type,
                        pickup_date_before: pickup_before,
                        pickup_date_after: pickup_after,
                        max_weight,
                        limit,
                    };
                    print_json(&app::search_loads(&file, &query)?)?;
                }
            }
        }
    }

    Ok(())
}
