//! Table definitions and the column builder used by migrations

use crate::core::exclusion::ExclusionConstraint;
use crate::core::value::Value;
use crate::error::{Error, Result};
use crate::schema::sql::{quote_ident, quote_list, quote_table};
use serde::{Deserialize, Serialize};

/// Column types understood by the schema transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Text,
    Integer,
    BigInt,
    /// Auto-incrementing `bigint`
    BigSerial,
    Boolean,
    Timestamp,
    TstzRange,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::String => "character varying",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::BigSerial => "bigserial",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp with time zone",
            ColumnType::TstzRange => "tstzrange",
        }
    }

    /// Type used when the column is mirrored into a history table
    pub fn mirrored(&self) -> ColumnType {
        match self {
            ColumnType::BigSerial => ColumnType::BigInt,
            other => *other,
        }
    }

    /// Parse the short names used by the CLI (`string`, `bigint`, ...)
    pub fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "string" => ColumnType::String,
            "text" => ColumnType::Text,
            "integer" => ColumnType::Integer,
            "bigint" => ColumnType::BigInt,
            "bigserial" => ColumnType::BigSerial,
            "boolean" => ColumnType::Boolean,
            "timestamp" => ColumnType::Timestamp,
            "tstzrange" => ColumnType::TstzRange,
            other => return Err(Error::Schema(format!("unknown column type {other}"))),
        })
    }
}

/// A single column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_serial(&self) -> bool {
        self.column_type == ColumnType::BigSerial
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.column_type.sql_type());
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_literal());
        }
        sql
    }
}

/// A complete table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub exclusion_constraints: Vec<ExclusionConstraint>,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            exclusion_constraints: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Structural checks: key columns exist and are unique, columns are unique
    pub fn validate(&self) -> Result<()> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Schema(format!(
                    "duplicate column {} on {}",
                    column.name, self.name
                )));
            }
        }
        for key in &self.primary_key {
            if self.column(key).is_none() {
                return Err(Error::Schema(format!(
                    "primary key column {key} missing from {}",
                    self.name
                )));
            }
        }
        for constraint in &self.exclusion_constraints {
            let range = self.column(&constraint.range_column).ok_or_else(|| {
                Error::Schema(format!(
                    "exclusion range column {} missing from {}",
                    constraint.range_column, self.name
                ))
            })?;
            if range.column_type != ColumnType::TstzRange {
                return Err(Error::Schema(format!(
                    "exclusion range column {} on {} is not a tstzrange",
                    range.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// `CREATE TABLE` statement
    pub fn to_sql(&self) -> String {
        let mut elements: Vec<String> = self.columns.iter().map(ColumnDef::to_sql).collect();
        if !self.primary_key.is_empty() {
            elements.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_key)));
        }
        for constraint in &self.exclusion_constraints {
            elements.push(constraint.to_sql(&self.name));
        }
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            quote_table(&self.name),
            elements.join(",\n  ")
        )
    }
}

/// Column builder handed to `create_table` blocks
#[derive(Debug, Default)]
pub struct TableBuilder {
    columns: Vec<ColumnDef>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(&mut self, column: ColumnDef) -> &mut Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn string(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::String))
    }

    pub fn text(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::Text))
    }

    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::Integer))
    }

    pub fn bigint(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::BigInt))
    }

    pub fn bigserial(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::BigSerial).not_null())
    }

    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::Boolean))
    }

    pub fn timestamp(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::Timestamp))
    }

    pub fn tstzrange(&mut self, name: &str) -> &mut Self {
        self.column(ColumnDef::new(name, ColumnType::TstzRange))
    }

    /// `<name>_id bigint`
    pub fn references(&mut self, name: &str) -> &mut Self {
        self.bigint(&format!("{name}_id"))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn into_columns(self) -> Vec<ColumnDef> {
        self.columns
    }
}
