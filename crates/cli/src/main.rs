use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::dependencies::OutputFormat;

#[derive(Parser)]
#[command(name = "dms", about = "Education data management service", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "dms.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Initialize the data directory, configuration and database
    Init {
        /// Data directory path
        #[arg(long, default_value = "/var/lib/dms")]
        data_dir: String,
        /// Core project schema file to reference from the generated config
        #[arg(long)]
        core_schema: Option<PathBuf>,
    },
    /// Print the resource load order or dependency graph
    Dependencies {
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
        /// Core project schema file, overriding the configured one
        #[arg(long)]
        core_schema: Option<PathBuf>,
        /// Extension project schema files, used with --core-schema
        #[arg(long = "extension-schema")]
        extension_schemas: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            data_dir,
            core_schema,
        } => {
            commands::init::run(&data_dir, core_schema).await?;
        }
        Commands::Dependencies {
            format,
            core_schema,
            extension_schemas,
        } => {
            commands::dependencies::run(&cli.config, format, core_schema, extension_schemas)?;
        }
    }

    Ok(())
}
