//! Exclusion constraint: no two rows sharing an identity may have
//! overlapping ranges.
//!
//! This is the storage-level invariant behind both application-time
//! revisions and system-time history rows.

use crate::core::value::{Row, Value};
use crate::error::{Error, Result};
use crate::schema::sql::quote_ident;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `EXCLUDE USING gist (<id> WITH =, ..., <range> WITH &&)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionConstraint {
    pub identity_columns: Vec<String>,
    pub range_column: String,
}

impl ExclusionConstraint {
    pub fn new(identity_columns: Vec<String>, range_column: &str) -> Self {
        Self {
            identity_columns,
            range_column: range_column.to_string(),
        }
    }

    /// Constraint expression, e.g. `id WITH =, entity_id WITH =, validity WITH &&`
    pub fn expression(&self) -> String {
        self.identity_columns
            .iter()
            .map(|c| format!("{c} WITH ="))
            .chain(std::iter::once(format!("{} WITH &&", self.range_column)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Deterministic constraint name for `table`
    pub fn name(&self, table: &str) -> String {
        let base = table.rsplit('.').next().unwrap_or(table);
        let base: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{base}_{}_excl", self.range_column)
    }

    /// Table-constraint clause for `CREATE TABLE` / `ALTER TABLE ... ADD`.
    /// Deferred, so a close-and-reopen pair is checked as a whole at commit.
    pub fn to_sql(&self, table: &str) -> String {
        let elements = self
            .identity_columns
            .iter()
            .map(|c| format!("{} WITH =", quote_ident(c)))
            .chain(std::iter::once(format!(
                "{} WITH &&",
                quote_ident(&self.range_column)
            )))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CONSTRAINT {} EXCLUDE USING gist ({elements}) DEFERRABLE INITIALLY DEFERRED",
            quote_ident(&self.name(table))
        )
    }

    /// Check a full set of rows, failing on the first overlapping pair.
    /// A NULL identity column never compares equal, so such rows are exempt.
    pub fn check<'a>(&self, table: &str, rows: impl IntoIterator<Item = &'a Row>) -> Result<()> {
        let mut groups: HashMap<Vec<Value>, Vec<&Row>> = HashMap::new();
        for row in rows {
            let identity = row.project(&self.identity_columns);
            if identity.iter().any(Value::is_null) {
                continue;
            }
            groups.entry(identity).or_default().push(row);
        }

        for (identity, rows) in groups {
            for (i, a) in rows.iter().enumerate() {
                let Some(range_a) = a.get(&self.range_column).as_range() else {
                    continue;
                };
                for b in &rows[i + 1..] {
                    let Some(range_b) = b.get(&self.range_column).as_range() else {
                        continue;
                    };
                    if range_a.overlaps(range_b) {
                        return Err(Error::ConstraintViolation {
                            table: table.to_string(),
                            constraint: self.name(table),
                            detail: format!(
                                "key ({}) = ({}) has overlapping {} {} and {}",
                                self.identity_columns.join(", "),
                                identity
                                    .iter()
                                    .map(ToString::to_string)
                                    .collect::<Vec<_>>()
                                    .join(", "),
                                self.range_column,
                                range_a,
                                range_b
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
