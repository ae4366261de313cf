//! Resolution of live entities to their history counterparts.
//!
//! Counterparts are derived on first use and memoized by name. A counterpart
//! registered explicitly takes precedence over derivation; a name with no
//! live entity behind it is an error, never a fabricated type.

use crate::config::VersioningConfig;
use crate::core::entity::{AssociationDef, EntityRegistry, Lookup};
use crate::core::value::Row;
use crate::core::view::{EntityView, ViewKind};
use crate::error::{Error, Result};
use crate::history::namespace::Namespace;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Explicitly declared counterpart
#[derive(Debug, Clone)]
struct Counterpart {
    live: String,
    associations: Option<Vec<AssociationDef>>,
}

/// Live and history views for every registered entity
pub struct HistoryResolver {
    registry: Arc<EntityRegistry>,
    config: VersioningConfig,
    root: Namespace,
    counterparts: HashMap<String, Counterpart>,
    live_views: DashMap<String, Arc<EntityView>>,
    history_views: DashMap<String, Arc<EntityView>>,
}

impl HistoryResolver {
    /// Resolver over `registry`, whose schemas are conformed to `config`
    pub fn new(mut registry: EntityRegistry, config: VersioningConfig) -> Self {
        registry.configure(&config);
        let root = Namespace::root(&config.history_namespace);
        Self {
            registry: Arc::new(registry),
            config,
            root,
            counterparts: HashMap::new(),
            live_views: DashMap::new(),
            history_views: DashMap::new(),
        }
    }

    /// Replace the root namespace
    pub fn with_namespace(mut self, root: Namespace) -> Self {
        self.root = root;
        self.history_views.clear();
        self
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    pub fn namespace(&self) -> &Namespace {
        &self.root
    }

    /// Root namespace, for declaring nested namespaces
    pub fn namespace_mut(&mut self) -> &mut Namespace {
        &mut self.root
    }

    /// Declare `name` as the counterpart of `live`. `associations`, when
    /// given, replace the live entity's associations and may target other
    /// declared counterparts by name.
    pub fn define_counterpart(
        &mut self,
        name: &str,
        live: &str,
        associations: Option<Vec<AssociationDef>>,
    ) -> Result<()> {
        let schema = self.registry.get(live)?;
        if schema.is_abstract {
            return Err(Error::AbstractEntity {
                entity: live.to_string(),
            });
        }
        self.history_views.remove(name);
        self.counterparts.insert(
            name.to_string(),
            Counterpart {
                live: live.to_string(),
                associations,
            },
        );
        Ok(())
    }

    pub fn live_view(&self, entity: &str) -> Result<Arc<EntityView>> {
        if let Some(view) = self.live_views.get(entity) {
            return Ok(view.clone());
        }
        let schema = self.registry.get(entity)?;
        let view = Arc::new(EntityView::live(&self.registry, schema));
        self.live_views.insert(entity.to_string(), view.clone());
        Ok(view)
    }

    /// Name of the counterpart of `entity` under the root namespace
    pub fn history_name(&self, entity: &str) -> String {
        format!("{}::{entity}", self.root.name())
    }

    /// Counterpart of the live `entity`
    pub fn history_view(&self, entity: &str) -> Result<Arc<EntityView>> {
        let schema = self.registry.get(entity)?;
        if schema.is_abstract {
            return Err(Error::AbstractEntity {
                entity: entity.to_string(),
            });
        }
        self.resolve(&self.history_name(entity))
    }

    /// Resolve a counterpart by its full name, e.g. `History::MyApp::User`
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityView>> {
        if let Some(view) = self.history_views.get(name) {
            return Ok(view.clone());
        }

        let view = match self.counterparts.get(name) {
            Some(counterpart) => {
                let schema = self.registry.get(&counterpart.live)?;
                EntityView::history(
                    name,
                    &self.registry,
                    &self.config,
                    schema,
                    counterpart.associations.clone(),
                )
            }
            None => self.derive(name)?,
        };

        info!(history = %name, live = %view.source.name, table = %view.table, "Resolved history counterpart");
        let view = Arc::new(view);
        self.history_views.insert(name.to_string(), view.clone());
        Ok(view)
    }

    fn derive(&self, name: &str) -> Result<EntityView> {
        let found = self.root.locate(name).ok_or_else(|| {
            Error::unresolved(name, format!("not under the {} namespace", self.root.name()))
        })?;
        if found.entity_path.is_empty() {
            return Err(Error::unresolved(name, "names a namespace, not an entity"));
        }

        let live = found.namespace.live_name(&found.entity_path);
        let schema = match self.registry.lookup(&live) {
            Lookup::Entity(schema) => schema,
            Lookup::Constant(description) => {
                return Err(Error::unresolved(
                    name,
                    format!("{live} ({description}) is not an entity"),
                ))
            }
            Lookup::Missing => {
                return Err(Error::unresolved(name, format!("no live entity named {live}")))
            }
        };
        if schema.is_abstract {
            return Err(Error::AbstractEntity { entity: live });
        }
        if found.namespace.is_system_versioned_only() && !schema.is_system_versioned() {
            return Err(Error::unresolved(name, format!("{live} is not system versioned")));
        }

        debug!(history = %name, live = %live, "Deriving history counterpart");
        Ok(EntityView::history(
            name,
            &self.registry,
            &self.config,
            schema,
            None,
        ))
    }

    /// View of the same kind as `view` for the subtype named by `type_name`
    pub fn find_sti_view(&self, view: &EntityView, type_name: &str) -> Result<Arc<EntityView>> {
        let subtype = self.registry.get(type_name)?;
        let related = subtype.name == view.source.name
            || self
                .registry
                .descendants(&view.source.name)
                .iter()
                .any(|d| d.name == subtype.name);
        if !related {
            return Err(Error::Schema(format!(
                "{type_name} is not a subtype of {}",
                view.source.name
            )));
        }
        match view.kind {
            ViewKind::Live => self.live_view(type_name),
            ViewKind::History => self.history_view(type_name),
        }
    }

    /// View a loaded row should be instantiated as, following the
    /// inheritance discriminator
    pub fn instantiate(&self, view: &Arc<EntityView>, row: &Row) -> Result<Arc<EntityView>> {
        let Some(column) = self.registry.inheritance_column(&view.source) else {
            return Ok(view.clone());
        };
        match row.get(&column).as_text() {
            Some(type_name) if type_name != view.source.name => self.find_sti_view(view, type_name),
            _ => Ok(view.clone()),
        }
    }

    /// View an association from `owner` lands on. History owners reach
    /// counterparts: either a declared counterpart named by `target` or the
    /// counterpart of the live entity `target`.
    pub fn association_target(&self, owner: &EntityView, target: &str) -> Result<Arc<EntityView>> {
        match owner.kind {
            ViewKind::Live => self.live_view(target),
            ViewKind::History if self.counterparts.contains_key(target) => self.resolve(target),
            ViewKind::History => self.history_view(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::EntitySchema;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register(EntitySchema::abstract_entity("ApplicationRecord")).unwrap();
        registry
            .register(EntitySchema::new("Author", "authors").system_versioned())
            .unwrap();
        let desert = registry
            .register(
                EntitySchema::new("Desert", "deserts")
                    .system_versioned()
                    .with_inheritance_column("type"),
            )
            .unwrap();
        registry
            .register(EntitySchema::subtype("CoolWhip", &desert))
            .unwrap();
        registry
            .register(EntitySchema::new("MyApp::SystemB::User", "users").system_versioned())
            .unwrap();
        registry.register(EntitySchema::new("Plain", "plains")).unwrap();
        registry.register_constant("Num", "1");
        registry
    }

    fn resolver() -> HistoryResolver {
        HistoryResolver::new(registry(), VersioningConfig::default())
    }

    #[test]
    fn test_resolves_and_memoizes() {
        let resolver = resolver();
        let a = resolver.resolve("History::Author").unwrap();
        let b = resolver.history_view("Author").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.table, "authors_history");
    }

    #[test]
    fn test_unresolvable_names() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve("History::Foo"),
            Err(Error::UnresolvedHistoryName { .. })
        ));
        assert!(matches!(
            resolver.resolve("History::Num"),
            Err(Error::UnresolvedHistoryName { .. })
        ));
        assert!(matches!(
            resolver.resolve("Elsewhere::Author"),
            Err(Error::UnresolvedHistoryName { .. })
        ));
    }

    #[test]
    fn test_abstract_entity_has_no_counterpart() {
        let resolver = resolver();
        assert!(matches!(
            resolver.history_view("ApplicationRecord"),
            Err(Error::AbstractEntity { .. })
        ));
        assert!(matches!(
            resolver.resolve("History::ApplicationRecord"),
            Err(Error::AbstractEntity { .. })
        ));
    }

    #[test]
    fn test_nested_namespace() {
        let mut resolver = resolver();
        resolver.namespace_mut().namespace("MyApp").namespace("SystemB");
        let view = resolver.resolve("History::MyApp::SystemB::User").unwrap();
        assert_eq!(view.source.name, "MyApp::SystemB::User");
        assert_eq!(view.name, "History::MyApp::SystemB::User");
    }

    #[test]
    fn test_system_versioned_only_namespace() {
        let resolver = resolver().with_namespace(Namespace::root("History").system_versioned_only());
        assert!(resolver.resolve("History::Author").is_ok());
        assert!(matches!(
            resolver.resolve("History::Plain"),
            Err(Error::UnresolvedHistoryName { .. })
        ));
    }

    #[test]
    fn test_defined_counterpart_takes_precedence() {
        let mut resolver = resolver();
        resolver
            .define_counterpart(
                "History::Author",
                "Author",
                Some(vec![AssociationDef::has_many("books", "HistoryBook", "author_id")]),
            )
            .unwrap();
        let view = resolver.resolve("History::Author").unwrap();
        assert_eq!(view.associations.len(), 1);
        assert!(view.associations[0].temporal);
    }

    #[test]
    fn test_subtypes_resolve_to_history_subtypes() {
        let resolver = resolver();
        let desert = resolver.history_view("Desert").unwrap();
        let row = Row::new().with("type", "CoolWhip");
        let instantiated = resolver.instantiate(&desert, &row).unwrap();
        assert_eq!(instantiated.name, "History::CoolWhip");
        assert_eq!(instantiated.table, "deserts_history");

        let author = resolver.history_view("Author").unwrap();
        assert!(resolver.find_sti_view(&author, "CoolWhip").is_err());
    }
}
