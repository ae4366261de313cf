//! Filter predicates.
//!
//! A predicate renders to SQL for a relational host and evaluates directly
//! against rows for the in-memory backend; both forms must agree.

use crate::core::temporal::Timestamp;
use crate::core::value::{Row, Value};
use crate::schema::sql::quote_ident;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    True,
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    /// Point-in-time filter on a range column:
    /// `start <= instant AND (end IS absent OR instant < end)`
    AsOf { column: String, instant: Timestamp },
    /// Range column has no upper bound (the HEAD revision)
    OpenEnded(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.to_string(), value.into())
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Predicate::In(column.to_string(), values)
    }

    pub fn as_of(column: &str, instant: Timestamp) -> Self {
        Predicate::AsOf {
            column: column.to_string(),
            instant,
        }
    }

    pub fn open_ended(column: &str) -> Self {
        Predicate::OpenEnded(column.to_string())
    }

    /// Equality on every column of `key`
    pub fn key(key: &Row) -> Self {
        Predicate::And(
            key.iter()
                .map(|(c, v)| Predicate::Eq(c.to_string(), v.clone()))
                .collect(),
        )
        .simplify()
    }

    /// Conjunction, flattening nested `And`s and dropping `True`
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = Vec::new();
        for p in [self, other] {
            match p {
                Predicate::True => {}
                Predicate::And(inner) => parts.extend(inner),
                p => parts.push(p),
            }
        }
        Predicate::And(parts).simplify()
    }

    fn simplify(self) -> Self {
        match self {
            Predicate::And(mut parts) if parts.len() <= 1 => parts.pop().unwrap_or(Predicate::True),
            p => p,
        }
    }

    /// Evaluate against a row. SQL three-valued logic collapses to `false`
    /// for comparisons against NULL.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Eq(column, value) => {
                let actual = row.get(column);
                !actual.is_null() && actual == value
            }
            Predicate::In(column, values) => {
                let actual = row.get(column);
                !actual.is_null() && values.contains(actual)
            }
            Predicate::IsNull(column) => row.get(column).is_null(),
            Predicate::AsOf { column, instant } => row
                .get(column)
                .as_range()
                .map(|r| r.contains(*instant))
                .unwrap_or(false),
            Predicate::OpenEnded(column) => row
                .get(column)
                .as_range()
                .map(|r| r.is_open())
                .unwrap_or(false),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(row)),
            Predicate::Not(inner) => !inner.matches(row),
        }
    }

    /// Render as a SQL boolean expression
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::True => "TRUE".to_string(),
            Predicate::Eq(column, value) => {
                format!("{} = {}", quote_ident(column), value.to_sql_literal())
            }
            Predicate::In(_, values) if values.is_empty() => "FALSE".to_string(),
            Predicate::In(column, values) => format!(
                "{} IN ({})",
                quote_ident(column),
                values
                    .iter()
                    .map(Value::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Predicate::IsNull(column) => format!("{} IS NULL", quote_ident(column)),
            Predicate::AsOf { column, instant } => {
                let col = quote_ident(column);
                let ts = Value::Timestamp(*instant).to_sql_literal();
                format!("(lower({col}) <= {ts} AND (upper_inf({col}) OR {ts} < upper({col})))")
            }
            Predicate::OpenEnded(column) => format!("upper_inf({})", quote_ident(column)),
            Predicate::And(parts) => join_sql(parts, " AND "),
            Predicate::Or(parts) => join_sql(parts, " OR "),
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql()),
        }
    }
}

fn join_sql(parts: &[Predicate], separator: &str) -> String {
    if parts.is_empty() {
        return if separator.trim() == "AND" { "TRUE" } else { "FALSE" }.to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|p| match p {
            Predicate::And(_) | Predicate::Or(_) => format!("({})", p.to_sql()),
            _ => p.to_sql(),
        })
        .collect();
    rendered.join(separator)
}
