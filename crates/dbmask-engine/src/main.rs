//! dbmask CLI
//!
//! Command-line front end for running anonymization specs.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dbmask_core::schedule::processing_order;
use dbmask_engine::db::MySqlDatabase;
use dbmask_engine::engine::Anonymizer;
use dbmask_engine::loader::load_spec_file;

/// MySQL data anonymizer with referential-integrity-aware scheduling.
#[derive(Parser)]
#[command(name = "dbmask")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an anonymization spec against the configured database.
    Run {
        /// Path to the JSON spec file.
        spec: PathBuf,
    },

    /// Print the table processing order without touching any database.
    ShowOrder {
        /// Path to the JSON spec file.
        spec: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { spec } => {
            let (config, blueprints) = load_spec_file(&spec)?;

            let destination = MySqlDatabase::connect(&config.connection).await?;
            let source = match &config.source {
                Some(connection) => Some(MySqlDatabase::connect(connection).await?),
                None => None,
            };
            if source.is_some() {
                info!("Migration mode: schema and rows copy from the source server");
            }

            let mut engine = Anonymizer::new(config, destination, source);
            for blueprint in blueprints {
                engine.add_blueprint(blueprint);
            }
            engine.run().await?;
        }

        Commands::ShowOrder { spec } => {
            let (_, blueprints) = load_spec_file(&spec)?;
            let order = processing_order(&blueprints)?;

            println!("\nProcessing order:");
            println!("{:-<40}", "");
            for (position, &i) in order.iter().enumerate() {
                let blueprint = &blueprints[i];
                if blueprint.dependencies.is_empty() {
                    println!(" {:>3}. {}", position + 1, blueprint.table);
                } else {
                    println!(
                        " {:>3}. {} (after {})",
                        position + 1,
                        blueprint.table,
                        blueprint.dependencies.join(", ")
                    );
                }
            }
            println!();
        }
    }

    Ok(())
}
