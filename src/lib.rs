// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # tweakset: Transactional Changesets for Tweak Databases
//!
//! A tweak database is a layered store of typed values. Every value lives in a **flat**, a single
//! named scalar or array entry, and flats are grouped into **records**, typed entities that can
//! be created fresh or cloned from another record. Mods and patches describe their edits as
//! changes on top of the live database rather than as complete replacements.
//!
//! This crate implements the part that turns such a description into store writes: the
//! [`Changeset`]. Producers (typically readers for the various declarative source formats)
//! accumulate pending operations in any order, then commit the whole batch against a live
//! [`Store`] in one go.
//!
//! ## Pending Operations
//!
//! A changeset holds four independent kinds of pending work:
//!
//! - **Flat writes**: full replacement of a flat's value ([`Changeset::set_flat`]).
//! - **Record operations**: create, clone or re-publish a record ([`Changeset::make_record`],
//!   [`Changeset::update_record`]). Records are processed in the order they were first declared,
//!   so a clone can rely on its source having been created earlier in the same batch.
//! - **Alterations**: *relative* edits to array flats ([`Changeset::append_element`],
//!   [`Changeset::prepend_element`], [`Changeset::remove_element`], [`Changeset::append_from`],
//!   [`Changeset::prepend_from`]). These are resolved against the array as it is at commit
//!   time, not at the time they were declared.
//! - **Names**: human readable names for ids, used for diagnostics and forwarded to the store.
//!
//! ## Inherited Alterations
//!
//! Records inherit from one another, and so do their array edits. With
//! [`Changeset::inherit_changes`] an alteration can declare another alteration as its base: the
//! base's edits are then applied to the derived array as well, *underneath* the derived edits.
//! Following base links produces a **chain**, ordered from the most general ancestor to the
//! entry itself.
//!
//! The chain decides precedence. Prepended elements of more general levels end up closer to the
//! front, appended elements of more general levels end up closer to the middle. And a removal
//! declared by a more derived level suppresses re-insertion of the same value by a less derived
//! one: if a child removes an element, its ancestors can't bring it back.
//!
//! ## Fault Isolation
//!
//! A commit always runs to completion. Every flat, record and altered array is handled on its
//! own; if the store rejects one of them, the failure is logged (via [`tracing`]) with the
//! offending id and the item is skipped. Afterwards the changeset is empty again, regardless of
//! how many items failed.
//!
//! ## Auditing
//!
//! Every element a commit inserts or removes can be reported to a [`Changelog`], together with
//! the foreign keys it discovers and the record each array flat belongs to. A changelog that
//! remembers these deltas can undo them before the next commit begins, see
//! [`memory::UndoLog`] for an example.
//!
//! ## Getting Started
//!
//! ```rust
//! use tweakset::{
//!     Changeset, TweakId,
//!     memory::{MemoryReflection, MemoryStore, Value, ValueType},
//! };
//!
//! let tags = TweakId::from_name("Items.Jacket.tags");
//!
//! let mut store = MemoryStore::new();
//! store.insert_flat(
//!     tags,
//!     ValueType::array(ValueType::String),
//!     Value::array(["Clothing", "Quest"]),
//! );
//!
//! let mut changeset = Changeset::<MemoryReflection>::new();
//! changeset
//!     .append_element(tags, ValueType::String, Value::from("Legendary"), true)
//!     .unwrap();
//! changeset
//!     .remove_element(tags, ValueType::String, Value::from("Quest"))
//!     .unwrap();
//!
//! changeset.commit(&mut store);
//!
//! assert!(changeset.is_empty());
//! assert_eq!(
//!     store.flat_value(tags),
//!     Some(&Value::array(["Clothing", "Legendary"]))
//! );
//! ```
//!
//! ## Scope of this Crate
//!
//! The crate does not parse any source format and does not own the storage. It talks to the
//! live database exclusively through the [`Store`] and [`Reflection`] traits, so it can sit on
//! top of any engine able to implement them. [`memory::MemoryStore`] is a complete
//! implementation over a small dynamic value model, useful for tests and tooling.
//!
//! ## Features
//!
//! - `serde`: Provides `serde` support for [`TweakId`] and [`CommitSummary`].
//! - `arbitrary`: Implements `quickcheck::Arbitrary` for [`TweakId`], useful for property-based
//!   testing.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use ahash::RandomState;
use std::{
    hash::BuildHasher,
    sync::atomic::{AtomicBool, Ordering},
};

// Use a constant seed for hashing to make benchmarks and logs have less variance.
pub(crate) const DETERMINISTIC_HASHER: RandomState = RandomState::with_seeds(48, 1516, 23, 42);

pub mod changelog;
pub use changelog::{Changelog, NoChangelog, RecordingChangelog};
mod changeset;
pub use changeset::{
    AlteringEntry, Changeset, CommitSummary, DeletionEntry, FlatEntry, InsertionEntry,
    MergingEntry, RecordEntry,
};
pub mod error;
pub use error::{ChainError, ChangesetError};
mod id;
pub use id::TweakId;
pub mod memory;
pub mod reflection;
pub use reflection::Reflection;
pub mod store;
pub use store::{Store, WriteBatch};

static ENABLE_DETERMINISM: AtomicBool = AtomicBool::new(false);

/// Makes all hash maps iterate deterministically.
///
/// This should only be enabled for testing, as it increases the odds of DoS
/// scenarios.
#[doc(hidden)]
pub fn enable_determinism() {
    ENABLE_DETERMINISM.store(true, Ordering::Release);
}

/// Checks if determinism is enabled.
///
/// Should be used internally and for testing.
#[doc(hidden)]
pub fn determinism_enabled() -> bool {
    ENABLE_DETERMINISM.load(Ordering::Acquire)
}

/// Create a random state for a hashmap.
/// If `enable_determinism` has been used, this will return a deterministic
/// decidedly non-random RandomState, useful in tests.
#[inline]
fn make_random_state() -> RandomState {
    if determinism_enabled() {
        DETERMINISTIC_HASHER
    } else {
        RandomState::new()
    }
}

pub(crate) type Map<K, V> = std::collections::HashMap<K, V, TweakRandomState>;
pub(crate) type Set<K> = std::collections::HashSet<K, TweakRandomState>;

fn create_map<K, V>() -> Map<K, V> {
    Map::with_hasher(TweakRandomState::default())
}

fn create_set<K>() -> Set<K> {
    Set::with_hasher(TweakRandomState::default())
}

/// This is a small wrapper around the ahash RandomState.
/// This allows us to easily switch to a non-random RandomState for use in tests.
#[derive(Clone)]
pub struct TweakRandomState {
    inner: RandomState,
}

// Falls back on regular ahash::RandomState except when 'enable_determinism' has been called,
// in which case a static only-for-test RandomState is used.
impl Default for TweakRandomState {
    #[inline]
    fn default() -> Self {
        Self {
            inner: make_random_state(),
        }
    }
}

impl BuildHasher for TweakRandomState {
    type Hasher = <RandomState as BuildHasher>::Hasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        self.inner.build_hasher()
    }
}

/// Routes `tracing` output of the crate's own tests through the test harness.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
