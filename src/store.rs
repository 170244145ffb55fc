// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The live database a [`Changeset`](crate::Changeset) is committed against.
use crate::{TweakId, reflection::Reflection};
use std::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Flat type descriptor of store `S`.
pub type TypeOf<S> = <<S as Store>::Reflection as Reflection>::Type;
/// Record type descriptor of store `S`.
pub type RecordTypeOf<S> = <<S as Store>::Reflection as Reflection>::RecordType;
/// Value cell of store `S`.
pub type ValueOf<S> = <<S as Store>::Reflection as Reflection>::Value;

/// Owns flats and records and performs the actual storage writes.
///
/// Values returned from [`Store::flat`] may point straight into the store's internal buffers.
/// Callers must never assume they can hold on to them across a write.
pub trait Store {
    type Reflection: Reflection;

    /// Why a write was rejected. Only ever logged.
    type Error: fmt::Display;

    fn reflection(&self) -> &Self::Reflection;

    /// Opens a write batch. Always paired with exactly one [`Store::commit_batch`].
    ///
    /// Prefer [`WriteBatch`], which closes the batch on every exit path.
    fn start_batch(&mut self);

    /// Closes the write batch opened by [`Store::start_batch`].
    fn commit_batch(&mut self);

    fn register_name(&mut self, id: TweakId, name: &str);

    /// Looks up the declared type and current value of a flat.
    fn flat(
        &self,
        id: TweakId,
    ) -> Option<(
        &<Self::Reflection as Reflection>::Type,
        &<Self::Reflection as Reflection>::Value,
    )>;

    /// Creates or replaces a flat.
    fn set_flat(
        &mut self,
        id: TweakId,
        ty: &<Self::Reflection as Reflection>::Type,
        value: &<Self::Reflection as Reflection>::Value,
    ) -> Result<(), Self::Error>;

    fn record_exists(&self, id: TweakId) -> bool;

    /// Creates a record of the given class with default flats.
    fn create_record(
        &mut self,
        id: TweakId,
        ty: &<Self::Reflection as Reflection>::RecordType,
    ) -> Result<(), Self::Error>;

    /// Creates a record as a copy of the existing record `source`.
    fn clone_record(&mut self, id: TweakId, source: TweakId) -> Result<(), Self::Error>;

    /// Re-publishes an existing record after its flats changed.
    fn update_record(&mut self, id: TweakId) -> Result<(), Self::Error>;
}

/// An open write batch.
///
/// The batch is opened on construction and committed exactly once, either through
/// [`WriteBatch::finish`] or when the guard is dropped. Writes go through the guard via
/// [`Deref`]/[`DerefMut`].
pub struct WriteBatch<'a, S>
where
    S: Store + ?Sized,
{
    store: &'a mut S,
}

impl<'a, S> WriteBatch<'a, S>
where
    S: Store + ?Sized,
{
    pub fn open(store: &'a mut S) -> Self {
        store.start_batch();
        Self { store }
    }

    /// Commits the batch now rather than at the end of the scope.
    pub fn finish(self) {}
}

impl<S> Deref for WriteBatch<'_, S>
where
    S: Store + ?Sized,
{
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S> DerefMut for WriteBatch<'_, S>
where
    S: Store + ?Sized,
{
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S> Drop for WriteBatch<'_, S>
where
    S: Store + ?Sized,
{
    fn drop(&mut self) {
        self.store.commit_batch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn batch_closes_on_drop() {
        let mut store = MemoryStore::new();
        {
            let _batch = WriteBatch::open(&mut store);
        }
        assert_eq!(store.batches_committed(), 1);
        assert!(!store.in_batch());
    }

    #[test]
    fn batch_closes_once_on_finish() {
        let mut store = MemoryStore::new();
        let mut batch = WriteBatch::open(&mut store);
        assert!(batch.in_batch());
        batch.register_name(TweakId::from_name("Items.A"), "Items.A");
        batch.finish();
        assert_eq!(store.batches_committed(), 1);
        assert_eq!(store.name(TweakId::from_name("Items.A")), Some("Items.A"));
    }
}
