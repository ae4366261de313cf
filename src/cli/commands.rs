//! CLI commands

use crate::config::VersioningConfig;
use crate::error::{Error, Result};
use crate::schema::hooks::VersioningHookDefinition;
use crate::schema::migration::{
    ApplicationOptions, Migration, SchemaCommand, SystemOptions, TableOptions, Versioning,
};
use crate::schema::table::{ColumnDef, ColumnType};
use crate::storage::database::Database;
use crate::storage::memory::MemoryDatabase;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Temporal versioning schema tool
#[derive(Parser, Debug)]
#[command(name = "temporal-versioning")]
#[command(about = "Generate SQL for application-time and system-time versioned tables")]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the migration SQL creating a table
    CreateTable {
        name: String,
        /// Application versioning (validity range and version counter)
        #[arg(long)]
        application: bool,
        /// System versioning (history table and hooks)
        #[arg(long)]
        system: bool,
        /// History table name
        #[arg(long)]
        history_table: Option<String>,
        /// Primary key columns, comma separated
        #[arg(long, value_delimiter = ',')]
        primary_key: Option<Vec<String>>,
        /// Payload column as `name:type`
        #[arg(long = "column")]
        columns: Vec<String>,
        /// Print the rollback SQL instead
        #[arg(long)]
        down: bool,
    },
    /// Print the versioning hook SQL for an existing source/history pair
    Hooks {
        source: String,
        history: String,
        /// Source primary key column
        #[arg(long = "key", required = true)]
        keys: Vec<String>,
        /// Mirrored column
        #[arg(long = "column")]
        columns: Vec<String>,
        /// Print the statements removing the hooks instead
        #[arg(long)]
        drop: bool,
    },
}

/// Parse `name:type`
pub fn parse_column(declaration: &str) -> Result<ColumnDef> {
    let (name, column_type) = declaration
        .split_once(':')
        .ok_or_else(|| Error::Schema(format!("column {declaration} must be written name:type")))?;
    if name.is_empty() {
        return Err(Error::Schema(format!("column {declaration} has no name")));
    }
    Ok(ColumnDef::new(name, ColumnType::parse(column_type)?))
}

fn versioning(application: bool, system: bool, history_table: Option<String>) -> Versioning {
    let system_options = SystemOptions { history_table };
    match (application, system || system_options.history_table.is_some()) {
        (true, true) => Versioning::Bitemporal(ApplicationOptions::default(), system_options),
        (true, false) => Versioning::Application(ApplicationOptions::default()),
        (false, true) => Versioning::System(system_options),
        (false, false) => Versioning::Plain,
    }
}

/// Statements the command prints, in order. Table migrations are applied
/// to a scratch in-memory database first, so invalid definitions fail here
/// instead of on the server.
///
/// Versioned tables are preceded by `CREATE EXTENSION IF NOT EXISTS`; the
/// rollback never drops the extension, which other tables may depend on.
pub async fn execute(command: Commands, config: &VersioningConfig) -> Result<Vec<String>> {
    match command {
        Commands::CreateTable {
            name,
            application,
            system,
            history_table,
            primary_key,
            columns,
            down,
        } => {
            let columns = columns
                .iter()
                .map(|c| parse_column(c))
                .collect::<Result<Vec<_>>>()?;
            let options = TableOptions {
                primary_key,
                versioning: versioning(application, system, history_table),
            };
            let versioned = options.versioning != Versioning::Plain;
            let mut migration = Migration::new(&format!("create_{name}"), config.clone());
            migration.create_table(&name, options, |t| {
                for column in columns {
                    t.column(column);
                }
            })?;

            let extension = SchemaCommand::EnableExtension("btree_gist".to_string());
            let scratch = MemoryDatabase::new();
            scratch.apply(&extension).await?;
            scratch.apply_all(&migration.up()).await?;
            if down {
                scratch.apply_all(&migration.down()?).await?;
                migration.down_sql()
            } else {
                let mut statements = if versioned { extension.to_sql() } else { Vec::new() };
                statements.extend(migration.up_sql());
                Ok(statements)
            }
        }
        Commands::Hooks {
            source,
            history,
            keys,
            columns,
            drop,
        } => {
            let mut mirrored = keys.clone();
            mirrored.extend(columns.into_iter().filter(|c| !keys.contains(c)));
            let hook = VersioningHookDefinition::new(
                &source,
                &history,
                mirrored,
                keys,
                &config.system_dimension,
            );
            Ok(if drop { hook.drop_sql() } else { hook.to_sql() })
        }
    }
}
