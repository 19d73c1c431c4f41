//! oxide-catalog CLI
//!
//! Browses, scripts and edits the schema of a SQLite database through the
//! catalog object model.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use oxide_catalog_sqlite::connection::SqliteConnection;
use oxide_catalog_sqlite::prelude::*;

/// Schema browser and DDL scripter for SQLite.
#[derive(Parser)]
#[command(name = "oxide-catalog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL (SQLite path or connection string).
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Name reported for the server in object paths.
    #[arg(long, default_value = DEFAULT_SERVER_NAME)]
    server_name: String,

    /// Scripting preferences as a JSON file.
    #[arg(short, long)]
    preferences: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables of a schema.
    Tables {
        /// Schema (attached database) name.
        #[arg(short, long, default_value = "main")]
        schema: String,
    },

    /// Print the DDL of a table and its indexes.
    Script {
        /// Table name.
        table: String,

        /// Schema (attached database) name.
        #[arg(short, long, default_value = "main")]
        schema: String,

        /// Guard CREATE statements with IF NOT EXISTS.
        #[arg(long)]
        if_not_exists: bool,
    },

    /// Load an object and everything below it and print it as JSON.
    Discover {
        /// Object path, the server when not specified.
        #[arg(short, long)]
        urn: Option<String>,
    },

    /// Drop a table.
    DropTable {
        /// Table name.
        table: String,

        /// Schema (attached database) name.
        #[arg(short, long, default_value = "main")]
        schema: String,

        /// Do not fail if the table is already gone.
        #[arg(long)]
        if_exists: bool,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Rename a table.
    RenameTable {
        /// Current table name.
        table: String,

        /// New table name.
        new_name: String,

        /// Schema (attached database) name.
        #[arg(short, long, default_value = "main")]
        schema: String,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },
}

fn find_table(tree: &mut ObjectTree, schema: &str, table: &str) -> anyhow::Result<ObjectId> {
    let database = tree
        .child(tree.root(), "Database", &ObjectKey::simple(schema))?
        .with_context(|| format!("schema '{schema}' not found"))?;
    tree.child(database, "Table", &ObjectKey::schema(schema, table))?
        .with_context(|| format!("table '{schema}.{table}' not found"))
}

fn set_dry_run(tree: &mut ObjectTree, dry_run: bool) {
    if dry_run {
        info!("Dry run mode - SQL will be printed but not executed.");
        tree.set_execution_mode(ExecutionMode::Record);
    }
}

fn print_captured(tree: &ObjectTree) {
    for statement in tree.execution().captured_sql() {
        println!("{statement};");
    }
}

fn main() -> anyhow::Result<()> {
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

    let connection = SqliteConnection::connect_named(&cli.database, &cli.server_name)?;
    let mut tree = ObjectTree::new(registry(), Box::new(connection))?;

    match cli.command {
        Commands::Tables { schema } => {
            let database = tree
                .child(tree.root(), "Database", &ObjectKey::simple(&schema))?
                .with_context(|| format!("schema '{schema}' not found"))?;
            let tables = tree.children(database, "Table")?;
            if tables.is_empty() {
                info!("No tables in schema '{}'.", schema);
            }
            for table in tables {
                let columns = tree.property(table, "ColumnCount")?;
                let view = tree.view(table)?;
                println!(" {:<40} {:>4} columns", view.name(), columns);
            }
        }

        Commands::Script {
            table,
            schema,
            if_not_exists,
        } => {
            let mut preferences = match &cli.preferences {
                Some(path) => ScriptingPreferences::from_json_file(path)?,
                None => ScriptingPreferences::default(),
            };
            preferences.include_if_not_exists |= if_not_exists;
            let id = find_table(&mut tree, &schema, &table)?;
            for statement in tree.script(id, Some(&preferences))? {
                if preferences.batch_terminator.as_deref() == Some(statement.as_str())
                    || statement.starts_with("--")
                {
                    println!("{statement}");
                } else {
                    println!("{statement};");
                }
            }
        }

        Commands::Discover { urn } => {
            let id = match urn {
                Some(text) => {
                    let urn = Urn::parse(&text)?;
                    match tree.find_by_urn(&urn)? {
                        Some(id) => id,
                        None => bail!("no object at '{text}'"),
                    }
                }
                None => tree.root(),
            };
            let snapshot = tree.discover(id)?;
            info!(objects = snapshot.object_count(), "Discovered");
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::DropTable {
            table,
            schema,
            if_exists,
            dry_run,
        } => {
            let Some(id) = find_table(&mut tree, &schema, &table).ok() else {
                if if_exists {
                    info!("Table '{}.{}' does not exist.", schema, table);
                    return Ok(());
                }
                bail!("table '{schema}.{table}' not found");
            };
            set_dry_run(&mut tree, dry_run);
            if if_exists {
                tree.drop_if_exists(id)?;
            } else {
                tree.drop(id)?;
            }
            print_captured(&tree);
        }

        Commands::RenameTable {
            table,
            new_name,
            schema,
            dry_run,
        } => {
            let id = find_table(&mut tree, &schema, &table)?;
            set_dry_run(&mut tree, dry_run);
            tree.rename(id, &new_name)?;
            print_captured(&tree);
        }
    }

    Ok(())
}
