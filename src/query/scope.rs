//! Scoped as-of bindings.
//!
//! A [`TimeScope`] belongs to one unit of work and is passed explicitly to
//! every versioning and query call. Bindings are pushed as frames; the
//! returned [`ScopeGuard`] pops its frame (and anything nested above it)
//! when dropped, including during unwinding.

use crate::core::temporal::Timestamp;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// Stack of `dimension -> instant` frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeScope {
    frames: Vec<BTreeMap<String, Timestamp>>,
}

impl TimeScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a scope binding each given dimension until the guard drops
    pub fn push<I, S>(&mut self, bindings: I) -> ScopeGuard<'_>
    where
        I: IntoIterator<Item = (S, Timestamp)>,
        S: Into<String>,
    {
        let depth = self.frames.len();
        self.frames
            .push(bindings.into_iter().map(|(d, t)| (d.into(), t)).collect());
        ScopeGuard { scope: self, depth }
    }

    /// Run `f` with the given bindings in effect
    pub fn at<I, S, R>(&mut self, bindings: I, f: impl FnOnce(&mut TimeScope) -> R) -> R
    where
        I: IntoIterator<Item = (S, Timestamp)>,
        S: Into<String>,
    {
        let mut guard = self.push(bindings);
        f(&mut guard)
    }

    /// Innermost binding for `dimension`; `None` means fall back to now
    pub fn lookup(&self, dimension: &str) -> Option<Timestamp> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(dimension).copied())
    }

    /// Effective binding of every dimension currently in scope
    pub fn bindings(&self) -> BTreeMap<String, Timestamp> {
        let mut merged = BTreeMap::new();
        for frame in &self.frames {
            merged.extend(frame.iter().map(|(d, t)| (d.clone(), *t)));
        }
        merged
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(BTreeMap::is_empty)
    }
}

/// Active frame of a [`TimeScope`]
#[derive(Debug)]
pub struct ScopeGuard<'a> {
    scope: &'a mut TimeScope,
    depth: usize,
}

impl Deref for ScopeGuard<'_> {
    type Target = TimeScope;

    fn deref(&self) -> &TimeScope {
        self.scope
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut TimeScope {
        self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.frames.truncate(self.depth);
    }
}
