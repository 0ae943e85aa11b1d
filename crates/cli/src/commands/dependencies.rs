use std::path::{Path, PathBuf};

use dms_core::config::DmsConfig;
use dms_core::load_order::{to_graphml, LoadOrderCalculator};
use dms_core::schema::ApiSchemaDocuments;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Grouped load order as `[{resource, order, operations}]`
    Json,
    /// Dependency graph for graph viewers
    Graphml,
}

/// Run the `dependencies` command: print the load order or dependency graph
/// of the configured schemas, or of the schema files given on the command line.
pub fn run(
    config_path: &str,
    format: OutputFormat,
    core_schema: Option<PathBuf>,
    extension_schemas: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let (core_schema, extension_schemas) = match core_schema {
        Some(core) => (core, extension_schemas),
        None => {
            let config = DmsConfig::load(Path::new(config_path))?;
            config.validate()?;
            info!("Loaded configuration from {}", config_path);
            (config.schema.core_schema_path, config.schema.extension_schema_paths)
        }
    };

    let documents = ApiSchemaDocuments::load(&core_schema, &extension_schemas)?;
    println!("{}", render(&documents, format)?);
    Ok(())
}

pub fn render(documents: &ApiSchemaDocuments, format: OutputFormat) -> anyhow::Result<String> {
    documents.validate_reference_consistency()?;
    let calculator = LoadOrderCalculator::default();
    let output = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&calculator.calculate(documents)?)?,
        OutputFormat::Graphml => to_graphml(&calculator.dependency_graph(documents)?),
    };
    Ok(output)
}
