use std::path::{Path, PathBuf};

use dms_core::config::DmsConfig;
use dms_core::db::DatabasePool;
use tracing::info;

/// Run the `init` command: create data directory, write default config, and set up the database.
pub async fn run(data_dir: &str, core_schema: Option<PathBuf>) -> anyhow::Result<()> {
    let data_path = Path::new(data_dir);

    if !data_path.exists() {
        std::fs::create_dir_all(data_path)?;
        info!("Created data directory: {}", data_dir);
    }

    let mut config = DmsConfig::generate_default();
    config.dms.database.path = data_path.join("dms.db").to_string_lossy().to_string();
    if let Some(core_schema) = core_schema {
        config.schema.core_schema_path = core_schema;
    }
    config.validate()?;

    let config_path = data_path.join("dms.toml");
    let toml_str = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, &toml_str)?;
    info!("Wrote configuration to {}", config_path.display());

    DatabasePool::new_sqlite(&config.dms.database.connection_string()).await?;
    info!("Database initialized at {}", config.dms.database.path);

    println!("DMS initialized successfully!");
    println!("  Data directory: {}", data_dir);
    println!("  Configuration:  {}", config_path.display());
    println!("  Database:       {}", config.dms.database.path);
    println!("  Core schema:    {}", config.schema.core_schema_path.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Point schema.core_schema_path in {} at your ApiSchema.json",
        config_path.display()
    );
    println!(
        "  2. Run `dms --config {} dependencies` to check the resource load order",
        config_path.display()
    );

    Ok(())
}
