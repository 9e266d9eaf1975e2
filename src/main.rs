//! Campusgraph CLI - inspect and populate a graph-backed object store

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use campusgraph::config::{self, StoreConfig};
use campusgraph::ui::{self, Icons};
use campusgraph::{Attributes, Entity, ModelManager, NodeConfig};

#[derive(Parser)]
#[command(name = "campusgraph")]
#[command(version = "0.0.1")]
#[command(about = "Graph-backed object store - typed objects persisted as nodes and relationships")]
#[command(long_about = r#"
Campusgraph keeps typed objects (accounts, rooms, exits, ...) in a uniform
SQLite graph of nodes and relationships.

Example usage:
  campusgraph init
  campusgraph create --name "Great Hall" --type object --attr capacity=200
  campusgraph search --query hall
  campusgraph serve --port 8080
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and install the built-in types
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// List node and relationship types
    Types,

    /// Show store statistics
    Stats,

    /// Show one node and its relationships
    Show {
        #[arg(short, long)]
        uuid: uuid::Uuid,
    },

    /// Find nodes whose attribute equals a value
    Find {
        #[arg(short, long)]
        key: String,

        /// JSON value; bare words are matched as strings
        #[arg(long)]
        value: String,

        #[arg(short, long = "type")]
        type_code: Option<String>,
    },

    /// Find nodes carrying a tag
    Tag {
        #[arg(short, long)]
        tag: String,

        #[arg(long = "type")]
        type_code: Option<String>,
    },

    /// Search node names and descriptions
    Search {
        #[arg(short, long)]
        query: String,

        #[arg(short, long = "type")]
        type_code: Option<String>,
    },

    /// Create a node
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long = "type", default_value = "object")]
        type_code: String,

        /// Attribute as key=value; repeatable
        #[arg(short, long = "attr")]
        attrs: Vec<String>,
    },

    /// Create nodes from a JSON list of node configs
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Deactivate nodes without active relationships
    Cleanup,

    /// Serve the HTTP read API
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut store_config = config::load_config(Some(&config_path))?.unwrap_or_default();
    if let Some(database) = &cli.database {
        store_config.database = Some(database.display().to_string());
    }

    match cli.command {
        Commands::Init { force } => {
            config::write_config(&config_path, &store_config, force)?;
            let manager = open_manager(&store_config)?;
            manager.install_builtin_types()?;

            ui::success(&format!("Wrote {}", config_path.display()));
            ui::info("Database", &store_config.database_path().display().to_string());
            print_types(&manager)?;
        }

        Commands::Types => {
            let manager = open_manager(&store_config)?;
            print_types(&manager)?;
        }

        Commands::Stats => {
            let manager = open_manager(&store_config)?;
            let stats = manager.get_statistics()?;

            ui::header(Icons::STATS, "Campusgraph Statistics");
            let mut table = ui::TableBuilder::new();
            table
                .add_row("Nodes", stats.sync.total_nodes)
                .add_row("Active nodes", stats.sync.active_nodes)
                .add_row("Relationships", stats.sync.total_relationships)
                .add_row("Active relationships", stats.sync.active_relationships)
                .add_row("Node types", stats.node_types_count)
                .add_row("Relationship types", stats.relationship_types_count)
                .add_row("Dead letters", stats.dead_letters);
            println!("{}", table.build());
        }

        Commands::Show { uuid } => {
            let manager = open_manager(&store_config)?;
            let sync = manager.synchronizer();
            let Some(node) = sync.get_node_by_uuid(&uuid)? else {
                ui::error(&format!("No node {}", uuid));
                std::process::exit(1);
            };

            ui::node_detail(&node);
            let relationships = sync.get_relationships_by_uuid(&uuid, None)?;
            if !relationships.is_empty() {
                ui::section(&format!("{} Relationships", Icons::LINK));
                for rel in &relationships {
                    ui::relationship_line(rel);
                }
            }
        }

        Commands::Find { key, value, type_code } => {
            let manager = open_manager(&store_config)?;
            let value = parse_value(&value);
            let found = manager.find_nodes_by_attribute(&key, &value, type_code.as_deref())?;
            print_entities(Icons::SEARCH, &format!("{} = {}", key, value), &found);
        }

        Commands::Tag { tag, type_code } => {
            let manager = open_manager(&store_config)?;
            let found = manager.find_nodes_by_tag(&tag, type_code.as_deref())?;
            print_entities(Icons::TAG, &tag, &found);
        }

        Commands::Search { query, type_code } => {
            let manager = open_manager(&store_config)?;
            let found = manager.search(&query, type_code.as_deref())?;
            print_entities(Icons::SEARCH, &query, &found);
        }

        Commands::Create { name, type_code, attrs } => {
            let attributes = parse_attributes(&attrs)?;
            let manager = open_manager(&store_config)?;
            let entity = manager.create_node(&name, &type_code, attributes)?;
            manager.flush()?;

            let object = entity.object();
            ui::success(&format!("Created {} ({})", object.name(), object.type_code()));
            ui::info("UUID", &object.uuid().to_string());
        }

        Commands::Import { file } => {
            let contents = std::fs::read_to_string(&file)?;
            let configs: Vec<NodeConfig> = serde_json::from_str(&contents)?;
            let manager = open_manager(&store_config)?;

            ui::header(Icons::PACKAGE, &format!("Importing {}", file.display()));
            let progress = ui::ImportProgress::new(configs.len());
            let (mut created, mut skipped) = (0, 0);
            for node_config in configs {
                let name = node_config.name.clone();
                if manager.batch_create_nodes(vec![node_config]).is_empty() {
                    skipped += 1;
                } else {
                    created += 1;
                }
                progress.inc(&name);
            }
            manager.flush()?;
            progress.finish(created, skipped);

            for letter in manager.dead_letters() {
                ui::warn(&format!("{} ({}) not written: {}", letter.uuid, letter.type_code, letter.error));
            }
        }

        Commands::Cleanup => {
            let manager = open_manager(&store_config)?;
            let spinner = ui::Spinner::new("Deactivating orphaned nodes...");
            let count = manager.cleanup_orphaned_nodes()?;
            spinner.finish_with_message(&format!("{} Deactivated {} orphaned nodes", Icons::BROOM, count));
        }

        Commands::Serve { port } => {
            let manager = Arc::new(open_manager(&store_config)?);
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(campusgraph::server::start_server(port, manager))?;
        }
    }

    Ok(())
}

fn open_manager(store_config: &StoreConfig) -> anyhow::Result<ModelManager> {
    let db_path = store_config.database_path();
    config::ensure_db_dir(&db_path)?;
    tracing::debug!("Opening {}", db_path.display());
    Ok(ModelManager::open(store_config)?)
}

fn print_types(manager: &ModelManager) -> anyhow::Result<()> {
    ui::section(&format!("{} Node types", Icons::NODE));
    println!("{}", ui::node_types_table(&manager.get_all_node_types()?));
    ui::section(&format!("{} Relationship types", Icons::LINK));
    println!("{}", ui::relationship_types_table(&manager.get_all_relationship_types()?));
    Ok(())
}

fn print_entities(icon: &str, label: &str, entities: &[Box<dyn Entity>]) {
    ui::header(icon, &format!("{} result(s) for {}", entities.len(), label));
    for entity in entities {
        let object = entity.object();
        println!(
            "  {} {} {}",
            object.name(),
            ui::dim(&format!("[{}]", object.type_code())),
            ui::dim(&object.uuid().to_string())
        );
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_attributes(pairs: &[String]) -> anyhow::Result<Attributes> {
    let mut attributes = Attributes::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("attribute '{}' is not key=value", pair);
        };
        attributes.insert(key.trim().to_string(), parse_value(value));
    }
    Ok(attributes)
}
