//! Schema statements and reversible migrations.
//!
//! `create_table` is the single table-creation entry point. It dispatches on
//! [`Versioning`] to build a plain, application-versioned, system-versioned
//! or bitemporal table, and expands into the [`SchemaCommand`]s a database
//! applies. A [`Migration`] records those commands and inverts them for
//! rollback.

use crate::config::VersioningConfig;
use crate::core::exclusion::ExclusionConstraint;
use crate::error::{Error, Result};
use crate::schema::hooks::VersioningHookDefinition;
use crate::schema::sql::{quote_ident, quote_table};
use crate::schema::table::{ColumnDef, ColumnType, TableBuilder, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application-versioning table options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationOptions {
    /// Range column; defaults to the configured application dimension
    pub dimension: Option<String>,
}

/// System-versioning table options
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemOptions {
    /// History table name; defaults to `<table><history_suffix>`
    pub history_table: Option<String>,
}

/// Table construction strategy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Versioning {
    #[default]
    Plain,
    Application(ApplicationOptions),
    System(SystemOptions),
    Bitemporal(ApplicationOptions, SystemOptions),
}

impl Versioning {
    fn application(&self) -> Option<&ApplicationOptions> {
        match self {
            Versioning::Application(a) | Versioning::Bitemporal(a, _) => Some(a),
            _ => None,
        }
    }

    fn system(&self) -> Option<&SystemOptions> {
        match self {
            Versioning::System(s) | Versioning::Bitemporal(_, s) => Some(s),
            _ => None,
        }
    }
}

/// Options for [`create_table`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableOptions {
    /// Declared primary key; defaults to the configured default key
    pub primary_key: Option<Vec<String>>,
    pub versioning: Versioning,
}

impl TableOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn application_versioned() -> Self {
        Self {
            primary_key: None,
            versioning: Versioning::Application(ApplicationOptions::default()),
        }
    }

    pub fn system_versioned() -> Self {
        Self {
            primary_key: None,
            versioning: Versioning::System(SystemOptions::default()),
        }
    }

    pub fn bitemporal() -> Self {
        Self {
            primary_key: None,
            versioning: Versioning::Bitemporal(
                ApplicationOptions::default(),
                SystemOptions::default(),
            ),
        }
    }

    pub fn with_primary_key<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.primary_key = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    pub fn with_history_table(mut self, name: &str) -> Self {
        let history = SystemOptions {
            history_table: Some(name.to_string()),
        };
        self.versioning = match self.versioning {
            Versioning::Application(a) | Versioning::Bitemporal(a, _) => {
                Versioning::Bitemporal(a, history)
            }
            _ => Versioning::System(history),
        };
        self
    }
}

/// A single schema change, as applied by a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaCommand {
    EnableExtension(String),
    DisableExtension(String),
    CreateSchema(String),
    DropSchema(String),
    CreateTable(TableDefinition),
    /// Drop a table; the definition, when known, makes the drop reversible
    DropTable {
        name: String,
        definition: Option<TableDefinition>,
    },
    CreateVersioningHook(VersioningHookDefinition),
    DropVersioningHook(VersioningHookDefinition),
}

impl SchemaCommand {
    /// The command that undoes this one
    pub fn invert(&self) -> Result<SchemaCommand> {
        Ok(match self {
            SchemaCommand::EnableExtension(name) => SchemaCommand::DisableExtension(name.clone()),
            SchemaCommand::DisableExtension(name) => SchemaCommand::EnableExtension(name.clone()),
            SchemaCommand::CreateSchema(name) => SchemaCommand::DropSchema(name.clone()),
            SchemaCommand::DropSchema(name) => SchemaCommand::CreateSchema(name.clone()),
            SchemaCommand::CreateTable(def) => SchemaCommand::DropTable {
                name: def.name.clone(),
                definition: Some(def.clone()),
            },
            SchemaCommand::DropTable { name, definition } => match definition {
                Some(def) => SchemaCommand::CreateTable(def.clone()),
                None => {
                    return Err(Error::IrreversibleMigration(format!(
                        "drop_table {name} without a table definition"
                    )))
                }
            },
            SchemaCommand::CreateVersioningHook(hook) => {
                SchemaCommand::DropVersioningHook(hook.clone())
            }
            SchemaCommand::DropVersioningHook(hook) => {
                SchemaCommand::CreateVersioningHook(hook.clone())
            }
        })
    }

    /// PostgreSQL statements for this command
    pub fn to_sql(&self) -> Vec<String> {
        match self {
            SchemaCommand::EnableExtension(name) => {
                vec![format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(name))]
            }
            SchemaCommand::DisableExtension(name) => {
                vec![format!("DROP EXTENSION IF EXISTS {}", quote_ident(name))]
            }
            SchemaCommand::CreateSchema(name) => {
                vec![format!("CREATE SCHEMA {}", quote_ident(name))]
            }
            SchemaCommand::DropSchema(name) => {
                vec![format!("DROP SCHEMA IF EXISTS {}", quote_ident(name))]
            }
            SchemaCommand::CreateTable(def) => vec![def.to_sql()],
            SchemaCommand::DropTable { name, .. } => {
                vec![format!("DROP TABLE {}", quote_table(name))]
            }
            SchemaCommand::CreateVersioningHook(hook) => hook.to_sql(),
            SchemaCommand::DropVersioningHook(hook) => hook.drop_sql(),
        }
    }
}

/// Build the commands creating `name` under the given strategy.
///
/// `block` defines the payload columns, as in a migration's table block.
/// Versioned tables carry GiST exclusion constraints and need `btree_gist`,
/// which is enabled once per database with [`Migration::enable_extension`]
/// and never by the table itself.
pub fn create_table<F>(
    config: &VersioningConfig,
    name: &str,
    options: &TableOptions,
    block: F,
) -> Result<Vec<SchemaCommand>>
where
    F: FnOnce(&mut TableBuilder),
{
    let mut builder = TableBuilder::new();
    block(&mut builder);

    let declared = options
        .primary_key
        .clone()
        .unwrap_or_else(|| vec![config.default_primary_key.clone()]);
    if declared.is_empty() || declared == [config.version_column.clone()] {
        return Err(Error::Schema(format!("{name} declares no identity columns")));
    }

    let source = match options.versioning.application() {
        Some(app) => application_versioned_table(config, name, &declared, options, app, builder),
        None => plain_table(name, &declared, options, builder),
    };
    source.validate()?;

    let hook = match options.versioning.system() {
        Some(system) => {
            let history_name = system
                .history_table
                .clone()
                .unwrap_or_else(|| format!("{name}{}", config.history_suffix));
            let history = history_table(&source, &history_name, &config.system_dimension);
            history.validate()?;
            let hook = VersioningHookDefinition::new(
                &source.name,
                &history.name,
                source.column_names(),
                source.primary_key.clone(),
                &config.system_dimension,
            );
            Some((history, hook))
        }
        None => None,
    };

    debug!(table = %name, versioning = ?options.versioning, "Building table definition");
    let mut commands = vec![SchemaCommand::CreateTable(source)];
    if let Some((history, hook)) = hook {
        commands.push(SchemaCommand::CreateTable(history));
        commands.push(SchemaCommand::CreateVersioningHook(hook));
    }
    Ok(commands)
}

fn plain_table(
    name: &str,
    declared: &[String],
    options: &TableOptions,
    builder: TableBuilder,
) -> TableDefinition {
    let mut table = TableDefinition::new(name);
    let composite = options.primary_key.as_ref().map(|k| k.len() > 1).unwrap_or(false);
    if !composite && !builder.has_column(&declared[0]) {
        table
            .columns
            .push(ColumnDef::new(&declared[0], ColumnType::BigSerial).not_null());
    }
    table.columns.extend(builder.into_columns());
    table.primary_key = declared.to_vec();
    table
}

/// Primary key = declared key ∪ [version]; identity column added unless the
/// declared key is composite; GiST exclusion over identity and validity.
fn application_versioned_table(
    config: &VersioningConfig,
    name: &str,
    declared: &[String],
    options: &TableOptions,
    app: &ApplicationOptions,
    builder: TableBuilder,
) -> TableDefinition {
    let dimension = app
        .dimension
        .clone()
        .unwrap_or_else(|| config.application_dimension.clone());
    let version = config.version_column.clone();

    let mut primary_key = declared.to_vec();
    if !primary_key.contains(&version) {
        primary_key.push(version.clone());
    }
    let identity: Vec<String> = primary_key.iter().filter(|c| **c != version).cloned().collect();

    let mut table = TableDefinition::new(name);
    let composite = options.primary_key.as_ref().map(|k| k.len() > 1).unwrap_or(false);
    if !composite && !builder.has_column(&identity[0]) {
        table
            .columns
            .push(ColumnDef::new(&identity[0], ColumnType::BigSerial).not_null());
    }
    if !builder.has_column(&version) {
        table.columns.push(
            ColumnDef::new(&version, ColumnType::BigInt)
                .not_null()
                .with_default(1i64),
        );
    }
    if !builder.has_column(&dimension) {
        table
            .columns
            .push(ColumnDef::new(&dimension, ColumnType::TstzRange).not_null());
    }
    table.columns.extend(builder.into_columns());
    table.primary_key = primary_key;
    table
        .exclusion_constraints
        .push(ExclusionConstraint::new(identity, &dimension));
    table
}

/// Mirror of `source`: key columns kept NOT NULL, every other column
/// nullable and without defaults, plus the system period.
pub fn history_table(source: &TableDefinition, name: &str, system_dimension: &str) -> TableDefinition {
    let mut table = TableDefinition::new(name);
    for column in &source.columns {
        let mut mirrored = ColumnDef::new(&column.name, column.column_type.mirrored());
        if source.primary_key.contains(&column.name) {
            mirrored = mirrored.not_null();
        }
        table.columns.push(mirrored);
    }
    table
        .columns
        .push(ColumnDef::new(system_dimension, ColumnType::TstzRange).not_null());

    table.primary_key = source.primary_key.clone();
    table.primary_key.push(system_dimension.to_string());
    table.exclusion_constraints.push(ExclusionConstraint::new(
        source.primary_key.clone(),
        system_dimension,
    ));
    table
}

/// Commands dropping a system-versioned table and everything it generated
pub fn drop_system_versioned_table(
    config: &VersioningConfig,
    source: &TableDefinition,
    history_table_name: Option<&str>,
) -> Vec<SchemaCommand> {
    let history_name = history_table_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}{}", source.name, config.history_suffix));
    let history = history_table(source, &history_name, &config.system_dimension);
    let hook = VersioningHookDefinition::new(
        &source.name,
        &history.name,
        source.column_names(),
        source.primary_key.clone(),
        &config.system_dimension,
    );
    vec![
        SchemaCommand::DropVersioningHook(hook),
        SchemaCommand::DropTable {
            name: history.name.clone(),
            definition: Some(history),
        },
        SchemaCommand::DropTable {
            name: source.name.clone(),
            definition: Some(source.clone()),
        },
    ]
}

/// Recorded, reversible sequence of schema commands
#[derive(Debug, Clone)]
pub struct Migration {
    name: String,
    config: VersioningConfig,
    commands: Vec<SchemaCommand>,
}

impl Migration {
    pub fn new(name: &str, config: VersioningConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            commands: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create_table<F>(&mut self, name: &str, options: TableOptions, block: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let commands = create_table(&self.config, name, &options, block)?;
        self.commands.extend(commands);
        Ok(self)
    }

    /// Shorthand for an application-versioned `create_table`
    pub fn create_application_versioned_table<F>(
        &mut self,
        name: &str,
        primary_key: Option<Vec<String>>,
        block: F,
    ) -> Result<&mut Self>
    where
        F: FnOnce(&mut TableBuilder),
    {
        let options = TableOptions {
            primary_key,
            versioning: Versioning::Application(ApplicationOptions::default()),
        };
        self.create_table(name, options, block)
    }

    pub fn drop_table(&mut self, name: &str, definition: Option<TableDefinition>) -> &mut Self {
        self.commands.push(SchemaCommand::DropTable {
            name: name.to_string(),
            definition,
        });
        self
    }

    pub fn drop_system_versioned_table(
        &mut self,
        source: &TableDefinition,
        history_table: Option<&str>,
    ) -> &mut Self {
        let commands = drop_system_versioned_table(&self.config, source, history_table);
        self.commands.extend(commands);
        self
    }

    pub fn enable_extension(&mut self, name: &str) -> &mut Self {
        self.commands.push(SchemaCommand::EnableExtension(name.to_string()));
        self
    }

    pub fn create_schema(&mut self, name: &str) -> &mut Self {
        self.commands.push(SchemaCommand::CreateSchema(name.to_string()));
        self
    }

    pub fn push(&mut self, command: SchemaCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Commands to apply when migrating up
    pub fn up(&self) -> Vec<SchemaCommand> {
        self.commands.clone()
    }

    /// Inverse commands, in reverse order
    pub fn down(&self) -> Result<Vec<SchemaCommand>> {
        self.commands.iter().rev().map(SchemaCommand::invert).collect()
    }

    pub fn up_sql(&self) -> Vec<String> {
        self.up().iter().flat_map(SchemaCommand::to_sql).collect()
    }

    pub fn down_sql(&self) -> Result<Vec<String>> {
        Ok(self.down()?.iter().flat_map(SchemaCommand::to_sql).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VersioningConfig {
        VersioningConfig::default()
    }

    fn created_tables(commands: &[SchemaCommand]) -> Vec<&TableDefinition> {
        commands
            .iter()
            .filter_map(|c| match c {
                SchemaCommand::CreateTable(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_application_versioned_default_key() {
        let commands = create_table(&config(), "authors", &TableOptions::application_versioned(), |t| {
            t.string("name");
        })
        .unwrap();

        let authors = created_tables(&commands)[0];
        assert_eq!(authors.primary_key, vec!["id", "version"]);
        assert_eq!(authors.column("id").unwrap().column_type, ColumnType::BigSerial);
        let version = authors.column("version").unwrap();
        assert!(!version.nullable);
        assert_eq!(version.default, Some(crate::core::value::Value::Int(1)));
        assert!(!authors.column("validity").unwrap().nullable);
        assert_eq!(authors.exclusion_constraints[0].expression(), "id WITH =, validity WITH &&");
        assert!(matches!(commands[0], SchemaCommand::CreateTable(_)));
    }

    #[test]
    fn test_application_versioned_named_key() {
        let options = TableOptions::application_versioned().with_primary_key(&["entity_id"]);
        let commands = create_table(&config(), "authors", &options, |t| {
            t.string("name");
        })
        .unwrap();

        let authors = created_tables(&commands)[0];
        assert_eq!(authors.primary_key, vec!["entity_id", "version"]);
        assert_eq!(authors.column("entity_id").unwrap().column_type, ColumnType::BigSerial);
        assert_eq!(
            authors.exclusion_constraints[0].expression(),
            "entity_id WITH =, validity WITH &&"
        );
    }

    #[test]
    fn test_application_versioned_composite_key() {
        let options = TableOptions::application_versioned().with_primary_key(&["id", "entity_id"]);
        let commands = create_table(&config(), "authors", &options, |t| {
            t.bigserial("entity_id");
            t.bigint("id").column(ColumnDef::new("id", ColumnType::BigInt).not_null());
            t.string("name");
        })
        .unwrap();

        let authors = created_tables(&commands)[0];
        assert_eq!(authors.primary_key, vec!["id", "entity_id", "version"]);
        assert_eq!(authors.column("id").unwrap().column_type, ColumnType::BigInt);
        assert_eq!(
            authors.exclusion_constraints[0].expression(),
            "id WITH =, entity_id WITH =, validity WITH &&"
        );
    }

    #[test]
    fn test_system_versioned_history_table() {
        let commands = create_table(&config(), "books", &TableOptions::system_versioned(), |t| {
            t.string("title");
            t.column(ColumnDef::new("pages", ColumnType::Integer).not_null().with_default(0i64));
        })
        .unwrap();

        let tables = created_tables(&commands);
        assert_eq!(tables.len(), 2);
        let history = tables[1];
        assert_eq!(history.name, "books_history");
        assert_eq!(history.primary_key, vec!["id", "system_period"]);
        assert_eq!(history.column("id").unwrap().column_type, ColumnType::BigInt);
        let pages = history.column("pages").unwrap();
        assert!(pages.nullable);
        assert_eq!(pages.default, None);
        assert_eq!(
            history.exclusion_constraints[0].expression(),
            "id WITH =, system_period WITH &&"
        );

        match commands.last().unwrap() {
            SchemaCommand::CreateVersioningHook(hook) => {
                assert_eq!(hook.source_table, "books");
                assert_eq!(hook.history_table, "books_history");
                assert_eq!(hook.columns, vec!["id", "title", "pages"]);
            }
            other => panic!("expected hook, got {other:?}"),
        }
    }

    #[test]
    fn test_bitemporal_history_key_includes_version() {
        let options = TableOptions::bitemporal().with_history_table("author_versions");
        let commands = create_table(&config(), "authors", &options, |t| {
            t.string("name");
        })
        .unwrap();

        let history = created_tables(&commands)[1];
        assert_eq!(history.name, "author_versions");
        assert_eq!(history.primary_key, vec!["id", "version", "system_period"]);
        assert!(history.column("validity").unwrap().nullable);
    }

    #[test]
    fn test_migration_is_reversible() {
        let mut migration = Migration::new("create_authors", config());
        migration
            .create_application_versioned_table("authors", None, |t| {
                t.string("full_name");
            })
            .unwrap();

        let down = migration.down().unwrap();
        assert_eq!(down.len(), 1);
        assert!(matches!(&down[0], SchemaCommand::DropTable { name, .. } if name == "authors"));
        assert_eq!(migration.down_sql().unwrap(), vec!["DROP TABLE \"authors\""]);
    }

    #[test]
    fn test_extension_is_only_dropped_when_enabled_explicitly() {
        let mut migration = Migration::new("enable_gist", config());
        migration.enable_extension("btree_gist");
        migration
            .create_table("books", TableOptions::application_versioned(), |t| {
                t.string("title");
            })
            .unwrap();

        let down = migration.down_sql().unwrap();
        assert_eq!(down[0], "DROP TABLE \"books\"");
        assert_eq!(down[1], "DROP EXTENSION IF EXISTS \"btree_gist\"");
        assert!(down.iter().all(|s| !s.contains("CASCADE")));
    }

    #[test]
    fn test_system_versioned_down_drops_hooks_first() {
        let mut migration = Migration::new("create_books", config());
        migration
            .create_table("books", TableOptions::system_versioned(), |t| {
                t.string("title");
            })
            .unwrap();

        let down = migration.down().unwrap();
        assert!(matches!(down[0], SchemaCommand::DropVersioningHook(_)));
        assert!(matches!(&down[1], SchemaCommand::DropTable { name, .. } if name == "books_history"));
        assert!(matches!(&down[2], SchemaCommand::DropTable { name, .. } if name == "books"));
    }

    #[test]
    fn test_drop_without_definition_is_irreversible() {
        let mut migration = Migration::new("drop_books", config());
        migration.drop_table("books", None);
        assert!(matches!(migration.down(), Err(Error::IrreversibleMigration(_))));
    }
}
