//! Namespace tree under which history counterparts are resolved.
//!
//! The root namespace (`History` by default) maps to the top level of live
//! entity names. A nested namespace `History::MyApp` maps to `MyApp`, so
//! `History::MyApp::User` resolves to the live `MyApp::User`.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    /// Live-name prefix this namespace mirrors; `None` for the top level
    live_root: Option<String>,
    children: BTreeMap<String, Namespace>,
    /// Reject counterparts of entities without system versioning
    system_versioned_only: bool,
}

/// Where a history name landed in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resolution<'a> {
    pub namespace: &'a Namespace,
    /// Remaining `::`-separated segments naming the live entity
    pub entity_path: Vec<&'a str>,
}

impl Namespace {
    pub fn root(name: &str) -> Self {
        Self {
            name: name.to_string(),
            live_root: None,
            children: BTreeMap::new(),
            system_versioned_only: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn live_root(&self) -> Option<&str> {
        self.live_root.as_deref()
    }

    pub fn is_system_versioned_only(&self) -> bool {
        self.system_versioned_only
    }

    /// Only resolve entities that are system versioned, in this namespace and
    /// namespaces declared beneath it afterwards
    pub fn system_versioned_only(mut self) -> Self {
        self.system_versioned_only = true;
        self
    }

    /// Declare (or reopen) a nested namespace and return it for further nesting
    pub fn namespace(&mut self, name: &str) -> &mut Namespace {
        let full_name = join(Some(&self.name), name);
        let live_root = join(self.live_root.as_deref(), name);
        let system_versioned_only = self.system_versioned_only;
        self.children
            .entry(name.to_string())
            .or_insert_with(|| Namespace {
                name: full_name,
                live_root: Some(live_root),
                children: BTreeMap::new(),
                system_versioned_only,
            })
    }

    pub fn child(&self, name: &str) -> Option<&Namespace> {
        self.children.get(name)
    }

    /// Live entity name for `entity_path` under this namespace
    pub fn live_name(&self, entity_path: &[&str]) -> String {
        join(self.live_root.as_deref(), &entity_path.join("::"))
    }

    /// Walk `name` down the tree. `None` when it is not under this root.
    pub(crate) fn locate<'a>(&'a self, name: &'a str) -> Option<Resolution<'a>> {
        let mut segments = name.split("::");
        if segments.next()? != self.name {
            return None;
        }
        let mut namespace = self;
        let mut rest: Vec<&str> = segments.collect();
        while let Some(child) = rest.first().and_then(|s| namespace.children.get(*s)) {
            namespace = child;
            rest.remove(0);
        }
        Some(Resolution {
            namespace,
            entity_path: rest,
        })
    }
}

fn join(base: Option<&str>, name: &str) -> String {
    match base {
        Some(base) if !base.is_empty() => format!("{base}::{name}"),
        _ => name.to_string(),
    }
}
