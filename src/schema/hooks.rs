//! Versioning hooks: the trigger protocol that keeps a history table in
//! step with its source table.
//!
//! A [`VersioningHookDefinition`] captures everything needed to regenerate
//! (or remove) the triggers deterministically. The same definition is
//! executed directly by the in-memory backend.

use crate::schema::sql::{quote_ident, quote_literal, quote_table};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parameters of the system-versioning schema transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningHookDefinition {
    pub source_table: String,
    pub history_table: String,
    /// Source columns mirrored into the history table
    pub columns: Vec<String>,
    /// Source primary key columns
    pub primary_key: Vec<String>,
    /// Range column on the history table
    pub system_dimension: String,
    /// Version of the generator that produced the hook
    pub compatibility: String,
}

/// Insert trigger parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertHookDefinition<'a> {
    pub source_table: &'a str,
    pub history_table: &'a str,
    pub columns: &'a [String],
}

/// Update trigger parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateHookDefinition<'a> {
    pub source_table: &'a str,
    pub history_table: &'a str,
    pub columns: &'a [String],
    pub primary_key: &'a [String],
}

/// Delete trigger parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteHookDefinition<'a> {
    pub source_table: &'a str,
    pub history_table: &'a str,
    pub primary_key: &'a [String],
}

/// Trigger event a hook function is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Insert,
    Update,
    Delete,
}

impl HookEvent {
    fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Insert => "insert",
            HookEvent::Update => "update",
            HookEvent::Delete => "delete",
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            HookEvent::Insert => "INSERT",
            HookEvent::Update => "UPDATE",
            HookEvent::Delete => "DELETE",
        }
    }
}

impl VersioningHookDefinition {
    pub fn new(
        source_table: &str,
        history_table: &str,
        columns: Vec<String>,
        primary_key: Vec<String>,
        system_dimension: &str,
    ) -> Self {
        Self {
            source_table: source_table.to_string(),
            history_table: history_table.to_string(),
            columns,
            primary_key,
            system_dimension: system_dimension.to_string(),
            compatibility: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn insert_hook(&self) -> InsertHookDefinition<'_> {
        InsertHookDefinition {
            source_table: &self.source_table,
            history_table: &self.history_table,
            columns: &self.columns,
        }
    }

    pub fn update_hook(&self) -> UpdateHookDefinition<'_> {
        UpdateHookDefinition {
            source_table: &self.source_table,
            history_table: &self.history_table,
            columns: &self.columns,
            primary_key: &self.primary_key,
        }
    }

    pub fn delete_hook(&self) -> DeleteHookDefinition<'_> {
        DeleteHookDefinition {
            source_table: &self.source_table,
            history_table: &self.history_table,
            primary_key: &self.primary_key,
        }
    }

    /// Deterministic function name for the source/history pair
    pub fn function_name(&self, event: HookEvent) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source_table.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.history_table.as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect();

        let base = self.source_table.rsplit('.').next().unwrap_or(&self.source_table);
        let mut sanitized: String = base
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        // 63-byte identifier limit, `_trigger` suffix included
        sanitized.truncate(31);

        format!("sys_ver_{}_{sanitized}_{digest}", event.as_str())
    }

    fn trigger_name(&self, event: HookEvent) -> String {
        format!("{}_trigger", self.function_name(event))
    }

    /// Functions live beside the source table when it is schema-qualified
    fn qualified_function(&self, event: HookEvent) -> String {
        match self.source_table.rsplit_once('.') {
            Some((schema, _)) => format!(
                "{}.{}",
                quote_ident(schema),
                quote_ident(&self.function_name(event))
            ),
            None => quote_ident(&self.function_name(event)),
        }
    }

    /// Statements creating every hook; safe to run repeatedly
    pub fn to_sql(&self) -> Vec<String> {
        let comment = serde_json::to_string(self).unwrap_or_default();
        let mut statements = Vec::new();
        for (event, body) in [
            (HookEvent::Insert, self.insert_hook().body(&self.system_dimension)),
            (HookEvent::Update, self.update_hook().body(&self.system_dimension)),
            (HookEvent::Delete, self.delete_hook().body(&self.system_dimension)),
        ] {
            let function = self.qualified_function(event);
            statements.push(format!(
                "CREATE OR REPLACE FUNCTION {function}() RETURNS trigger LANGUAGE plpgsql AS $function$\nBEGIN\n{body}  RETURN NULL;\nEND;\n$function$"
            ));
            statements.push(format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                quote_ident(&self.trigger_name(event)),
                quote_table(&self.source_table)
            ));
            statements.push(format!(
                "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW EXECUTE FUNCTION {function}()",
                quote_ident(&self.trigger_name(event)),
                event.keyword(),
                quote_table(&self.source_table)
            ));
            statements.push(format!(
                "COMMENT ON FUNCTION {function}() IS {}",
                quote_literal(&comment)
            ));
        }
        statements
    }

    /// Statements removing every hook
    pub fn drop_sql(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for event in [HookEvent::Insert, HookEvent::Update, HookEvent::Delete] {
            statements.push(format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                quote_ident(&self.trigger_name(event)),
                quote_table(&self.source_table)
            ));
            statements.push(format!(
                "DROP FUNCTION IF EXISTS {}()",
                self.qualified_function(event)
            ));
        }
        statements
    }
}

fn record_list(record: &str, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{record}.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_match(primary_key: &[String]) -> String {
    primary_key
        .iter()
        .map(|c| format!("{} = OLD.{}", quote_ident(c), quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Rows written by the running transaction carry its id in `xmin`
const WRITTEN_HERE: &str = "xmin = pg_current_xact_id()::xid";

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

impl InsertHookDefinition<'_> {
    fn body(&self, dimension: &str) -> String {
        format!(
            "  INSERT INTO {} ({}, {}) VALUES ({}, tstzrange(now(), NULL));\n",
            quote_table(self.history_table),
            column_list(self.columns),
            quote_ident(dimension),
            record_list("NEW", self.columns)
        )
    }
}

impl UpdateHookDefinition<'_> {
    fn body(&self, dimension: &str) -> String {
        let history = quote_table(self.history_table);
        let dim = quote_ident(dimension);
        let keys = key_match(self.primary_key);
        format!(
            "  IF ({old}) IS NOT DISTINCT FROM ({new}) THEN\n    RETURN NULL;\n  END IF;\n\
             \x20 IF EXISTS (SELECT 1 FROM {history} WHERE {keys} AND upper({dim}) = now() AND {here} AND ROW({cols}) IS NOT DISTINCT FROM ROW({new})) THEN\n\
             \x20   DELETE FROM {history} WHERE {keys} AND upper_inf({dim}) AND {here};\n\
             \x20   UPDATE {history} SET {dim} = tstzrange(lower({dim}), NULL) WHERE {keys} AND upper({dim}) = now() AND {here};\n\
             \x20   RETURN NULL;\n\
             \x20 END IF;\n\
             \x20 UPDATE {history} SET ({cols}) = ROW({new}) WHERE {keys} AND upper_inf({dim}) AND {here};\n\
             \x20 IF NOT FOUND THEN\n\
             \x20   UPDATE {history} SET {dim} = tstzrange(lower({dim}), now()) WHERE {keys} AND upper_inf({dim});\n\
             \x20   INSERT INTO {history} ({cols}, {dim}) VALUES ({new}, tstzrange(now(), NULL));\n\
             \x20 END IF;\n",
            old = record_list("OLD", self.columns),
            new = record_list("NEW", self.columns),
            cols = column_list(self.columns),
            here = WRITTEN_HERE,
        )
    }
}

impl DeleteHookDefinition<'_> {
    fn body(&self, dimension: &str) -> String {
        let history = quote_table(self.history_table);
        let dim = quote_ident(dimension);
        let keys = key_match(self.primary_key);
        format!(
            "  DELETE FROM {history} WHERE {keys} AND upper_inf({dim}) AND {here};\n\
             \x20 IF NOT FOUND THEN\n\
             \x20   UPDATE {history} SET {dim} = tstzrange(lower({dim}), now()) WHERE {keys} AND upper_inf({dim});\n\
             \x20 END IF;\n",
            here = WRITTEN_HERE,
        )
    }
}
