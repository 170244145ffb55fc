// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Observe the changes a commit applies, so they can be reverted later.
//!
//! A changelog is told about every element inserted into or removed from an array flat, about
//! every id that turns up as a foreign key, and about which records own which flats. Before the
//! next commit starts, it is asked to undo whatever it remembers, which makes repeated commits
//! (for example, reloading a set of tweak sources) converge on the same store state.
//!
//! All methods have empty default bodies, so an implementation only overrides what it tracks.
//! For a testing-oriented example, see [`RecordingChangelog`]; for a changelog that can
//! actually revert, see [`UndoLog`](crate::memory::UndoLog).
use crate::{
    TweakId,
    store::{Store, ValueOf},
};
use std::{collections::BTreeMap, fmt::Debug};

/// Receives the deltas produced by [`Changeset::commit_with`](crate::Changeset::commit_with).
#[expect(unused_variables)]
pub trait Changelog<S: Store> {
    /// Reverts the changes recorded during previous commits.
    fn revert_changes(&mut self, store: &mut S) {}

    /// Forgets all previously discovered foreign keys.
    fn forget_foreign_keys(&mut self) {}

    /// Observe an id that a written flat refers to.
    fn register_foreign_key(&mut self, id: TweakId) {}

    /// Observe an element removed from `flat`. `index` is the position before removal.
    fn register_deletion(&mut self, flat: TweakId, index: usize, value: &ValueOf<S>) {}

    /// Observe an element inserted into `flat` at `index`.
    fn register_insertion(&mut self, flat: TweakId, index: usize, value: &ValueOf<S>) {}

    /// Observe that `flat` belongs to `record`.
    fn associate_record(&mut self, record: TweakId, flat: TweakId) {}

    fn register_name(&mut self, id: TweakId, name: &str) {}
}

/// A changelog that does nothing.
///
/// Used when a commit doesn't need to be reverted later.
pub struct NoChangelog;

impl<S: Store> Changelog<S> for NoChangelog {}

/// A changelog that records all calls in a human readable form.
///
/// Ids are rendered through the names this changelog has been told about, either up front via
/// [`RecordingChangelog::named`] or through [`Changelog::register_name`].
#[derive(Debug, Default)]
pub struct RecordingChangelog {
    names: BTreeMap<TweakId, String>,
    /// A string representation of each call that the changelog has received.
    pub changes_seen: Vec<String>,
}

impl RecordingChangelog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Teaches the changelog a name without recording a call.
    pub fn named(mut self, id: TweakId, name: impl Into<String>) -> Self {
        self.names.insert(id, name.into());
        self
    }

    fn describe(&self, id: TweakId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }
}

impl<S> Changelog<S> for RecordingChangelog
where
    S: Store,
    ValueOf<S>: Debug,
{
    fn revert_changes(&mut self, _store: &mut S) {
        self.changes_seen.push("revert".to_string());
    }

    fn forget_foreign_keys(&mut self) {
        self.changes_seen.push("forget foreign keys".to_string());
    }

    fn register_foreign_key(&mut self, id: TweakId) {
        let line = format!("foreign key {}", self.describe(id));
        self.changes_seen.push(line);
    }

    fn register_deletion(&mut self, flat: TweakId, index: usize, value: &ValueOf<S>) {
        let line = format!("delete {}[{index}] {value:?}", self.describe(flat));
        self.changes_seen.push(line);
    }

    fn register_insertion(&mut self, flat: TweakId, index: usize, value: &ValueOf<S>) {
        let line = format!("insert {}[{index}] {value:?}", self.describe(flat));
        self.changes_seen.push(line);
    }

    fn associate_record(&mut self, record: TweakId, flat: TweakId) {
        let line = format!(
            "associate {} with {}",
            self.describe(flat),
            self.describe(record)
        );
        self.changes_seen.push(line);
    }

    fn register_name(&mut self, id: TweakId, name: &str) {
        self.names.insert(id, name.to_string());
        self.changes_seen.push(format!("name {name}"));
    }
}
