//! Association traversal with as-of propagation.
//!
//! Following an association from a record loaded under as-of instants
//! reapplies those instants to the related side, so a historical snapshot
//! only ever reaches snapshots of the same instant. History views propagate
//! always; live views only through associations declared temporal.

use crate::core::entity::{AssociationDef, AssociationKind};
use crate::core::record::Record;
use crate::core::value::Value;
use crate::error::{Error, Result};
use crate::history::resolver::HistoryResolver;
use crate::query::predicate::Predicate;
use crate::query::relation::Relation;
use crate::query::scope::TimeScope;
use crate::storage::database::Transaction;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

fn lookup<'a>(owner: &'a Record, name: &str) -> Result<&'a AssociationDef> {
    owner
        .view()
        .association(name)
        .ok_or_else(|| Error::UnknownAssociation {
            entity: owner.entity().to_string(),
            association: name.to_string(),
        })
}

/// Relation reached through a `has_many` or `belongs_to` association.
/// `None` when the owner's side of the join is NULL.
pub fn direct_relation(
    resolver: &HistoryResolver,
    owner: &Record,
    association: &AssociationDef,
    scope: &TimeScope,
) -> Result<Option<Relation>> {
    let (view, filter) = match &association.kind {
        AssociationKind::HasMany => {
            let target = association.target.as_deref().ok_or_else(|| {
                Error::Schema(format!("has_many {} declares no target", association.name))
            })?;
            let view = resolver.association_target(owner.view(), target)?;
            let Some(owner_key) = owner.view().identity_key().into_iter().next() else {
                return Ok(None);
            };
            let id = owner.get(&owner_key);
            if id.is_null() {
                return Ok(None);
            }
            let mut filter = Predicate::Eq(association.foreign_key.clone(), id.clone());
            if let Some(type_column) = association.type_column() {
                let owner_type = resolver.registry().base_name(&owner.view().source.name);
                filter = filter.and(Predicate::eq(&type_column, owner_type));
            }
            (view, filter)
        }
        AssociationKind::BelongsTo => {
            let id = owner.get(&association.foreign_key);
            if id.is_null() {
                return Ok(None);
            }
            let target = match (&association.target, association.type_column()) {
                (Some(target), _) => target.clone(),
                (None, Some(type_column)) => match owner.get(&type_column).as_text() {
                    Some(type_name) => type_name.to_string(),
                    None => return Ok(None),
                },
                (None, None) => {
                    return Err(Error::Schema(format!(
                        "belongs_to {} declares no target",
                        association.name
                    )))
                }
            };
            let view = resolver.association_target(owner.view(), &target)?;
            let Some(target_key) = view.identity_key().into_iter().next() else {
                return Ok(None);
            };
            (view, Predicate::Eq(target_key, id.clone()))
        }
        AssociationKind::HasManyThrough { .. } => {
            return Err(Error::Schema(format!(
                "{} is a through association; traverse it instead",
                association.name
            )))
        }
    };

    let propagate = owner.view().is_history() || association.temporal;
    let tags = if propagate {
        owner.time_tags().clone()
    } else {
        BTreeMap::new()
    };
    Ok(Some(
        Relation::new(view)
            .filter(filter)
            .with_time_tags(&tags)
            .with_scope(scope),
    ))
}

async fn load_direct<T: Transaction>(
    tx: &T,
    resolver: &HistoryResolver,
    owner: &Record,
    association: &AssociationDef,
    scope: &TimeScope,
) -> Result<Vec<Record>> {
    match direct_relation(resolver, owner, association, scope)? {
        Some(relation) => relation.load(tx, resolver).await,
        None => Ok(Vec::new()),
    }
}

/// Records related to `owner` through the association `name`
pub async fn traverse<T: Transaction>(
    tx: &T,
    resolver: &HistoryResolver,
    owner: &Record,
    name: &str,
    scope: &TimeScope,
) -> Result<Vec<Record>> {
    let association = lookup(owner, name)?;
    debug!(entity = %owner.entity(), association = %name, tags = ?owner.time_tags(), "Traversing association");

    let AssociationKind::HasManyThrough { through, source } = &association.kind else {
        return load_direct(tx, resolver, owner, association, scope).await;
    };

    let through = lookup(owner, through)?;
    let intermediates = load_direct(tx, resolver, owner, through, scope).await?;

    let mut seen = HashSet::new();
    let mut related = Vec::new();
    for intermediate in &intermediates {
        let step = lookup(intermediate, source)?;
        for record in load_direct(tx, resolver, intermediate, step, scope).await? {
            let key: Vec<Value> = record.key().iter().map(|(_, v)| v.clone()).collect();
            if seen.insert((record.entity().to_string(), key)) {
                related.push(record);
            }
        }
    }
    Ok(related)
}
