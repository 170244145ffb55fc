//! The pending-mutation accumulator.
//!
//! A [`Changeset`] collects operations without ever touching a store. Nothing is validated
//! against the live database until [`Changeset::commit`], which is why operations can be
//! declared in any order: a record can be cloned from a source that is only declared later, an
//! array can be altered before the record that owns it exists.
//!
//! # Keys
//!
//! All pending sets are keyed by [`TweakId`]. Declaring something twice for the same id never
//! duplicates it:
//!
//! - flat writes and names: the last declaration wins
//! - records: the last declaration wins, but commit order is the order of *first* declaration
//! - alterations: edits accumulate, in declaration order
//!
//! # Example
//!
//! ```rust
//! use tweakset::{
//!     Changeset, TweakId,
//!     memory::{MemoryReflection, Value, ValueType},
//! };
//!
//! let base = TweakId::from_name("Items.Base.tags");
//! let derived = TweakId::from_name("Items.Derived.tags");
//!
//! let mut changeset = Changeset::<MemoryReflection>::new();
//! changeset
//!     .append_element(base, ValueType::String, Value::from("Heavy"), false)
//!     .unwrap();
//!
//! // The derived array receives the base's edits, minus what it removes itself.
//! changeset.inherit_changes(derived, base).unwrap();
//! changeset
//!     .remove_element(derived, ValueType::String, Value::from("Heavy"))
//!     .unwrap();
//!
//! assert_eq!(changeset.altering(derived).unwrap().base, Some(base));
//! ```
use crate::{Map, Reflection, TweakId, create_map, error::ChangesetError};

mod array;
mod chain;
mod commit;
mod entries;

pub use commit::CommitSummary;
pub use entries::{
    AlteringEntry, DeletionEntry, FlatEntry, InsertionEntry, MergingEntry, RecordEntry,
};

type Flat<R> = FlatEntry<<R as Reflection>::Type, <R as Reflection>::Value>;
type Altering<R> = AlteringEntry<<R as Reflection>::Type, <R as Reflection>::Value>;
type Record<R> = RecordEntry<<R as Reflection>::RecordType>;

/// Pending flat writes, record operations, array alterations and names.
///
/// See the [module documentation](self) for how repeated declarations combine, and
/// [`Changeset::commit`] for how the batch is applied.
pub struct Changeset<R: Reflection> {
    flats: Map<TweakId, Flat<R>>,
    records: Map<TweakId, Record<R>>,
    ordered_records: Vec<TweakId>,
    alterings: Map<TweakId, Altering<R>>,
    ordered_alterings: Vec<TweakId>,
    names: Map<TweakId, String>,
    // Outlives commits: it describes the store layout, not pending work.
    flat_to_record: Map<TweakId, TweakId>,
}

impl<R: Reflection> Default for Changeset<R> {
    fn default() -> Self {
        Self {
            flats: create_map(),
            records: create_map(),
            ordered_records: Vec::new(),
            alterings: create_map(),
            ordered_alterings: Vec::new(),
            names: create_map(),
            flat_to_record: create_map(),
        }
    }
}

fn check(id: TweakId) -> Result<(), ChangesetError> {
    if id.is_valid() {
        Ok(())
    } else {
        Err(ChangesetError::InvalidId { id })
    }
}

/// Renders an id through its registered name, falling back to the raw id.
pub(crate) fn describe(names: &Map<TweakId, String>, id: TweakId) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}

impl<R: Reflection> Changeset<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value of a flat.
    ///
    /// Any pending relative edits of the same flat are discarded, since a full replacement
    /// supersedes them.
    pub fn set_flat(
        &mut self,
        id: TweakId,
        ty: R::Type,
        value: R::Value,
    ) -> Result<(), ChangesetError> {
        check(id)?;

        self.flats.insert(id, FlatEntry { ty, value });

        if self.alterings.remove(&id).is_some() {
            self.ordered_alterings.retain(|&altered| altered != id);
        }

        Ok(())
    }

    /// Declares a record to create from `ty`, or to clone from `source`.
    ///
    /// Declaring the same record again replaces its type and source but keeps its position in
    /// the commit order.
    pub fn make_record(
        &mut self,
        id: TweakId,
        ty: R::RecordType,
        source: Option<TweakId>,
    ) -> Result<(), ChangesetError> {
        check(id)?;

        let entry = self.record_entry(id);
        entry.ty = Some(ty);
        entry.source = source.filter(|source| source.is_valid());

        Ok(())
    }

    /// Forces a record to be re-published even if none of its flats change.
    ///
    /// Leaves an already declared record untouched.
    pub fn update_record(&mut self, id: TweakId) -> Result<(), ChangesetError> {
        check(id)?;

        self.record_entry(id);

        Ok(())
    }

    fn record_entry(&mut self, id: TweakId) -> &mut Record<R> {
        self.records.entry(id).or_insert_with(|| {
            self.ordered_records.push(id);
            RecordEntry::default()
        })
    }

    /// Remembers that `flat` belongs to `record`, so the record is re-published whenever the
    /// flat's array is altered.
    pub fn associate_record(
        &mut self,
        record: TweakId,
        flat: TweakId,
    ) -> Result<(), ChangesetError> {
        check(record)?;
        check(flat)?;

        self.flat_to_record.insert(flat, record);

        Ok(())
    }

    /// Appends `value` to the array `flat` at commit time.
    ///
    /// With `unique`, nothing is appended if an equal element is already present.
    pub fn append_element(
        &mut self,
        flat: TweakId,
        ty: R::Type,
        value: R::Value,
        unique: bool,
    ) -> Result<(), ChangesetError> {
        let entry = self.altering_entry(flat)?;
        entry.appendings.push(InsertionEntry { ty, value, unique });
        Ok(())
    }

    /// Prepends `value` to the array `flat` at commit time.
    ///
    /// Several prepends keep their declaration order at the front of the array.
    pub fn prepend_element(
        &mut self,
        flat: TweakId,
        ty: R::Type,
        value: R::Value,
        unique: bool,
    ) -> Result<(), ChangesetError> {
        let entry = self.altering_entry(flat)?;
        entry.prependings.push(InsertionEntry { ty, value, unique });
        Ok(())
    }

    /// Removes one element equal to `value` from the array `flat` at commit time.
    pub fn remove_element(
        &mut self,
        flat: TweakId,
        ty: R::Type,
        value: R::Value,
    ) -> Result<(), ChangesetError> {
        let entry = self.altering_entry(flat)?;
        entry.deletions.push(DeletionEntry { ty, value });
        Ok(())
    }

    /// Appends all elements of the array `source` that `flat` doesn't contain yet.
    pub fn append_from(&mut self, flat: TweakId, source: TweakId) -> Result<(), ChangesetError> {
        check(source)?;
        let entry = self.altering_entry(flat)?;
        entry.appending_merges.push(MergingEntry { source });
        Ok(())
    }

    /// Prepends all elements of the array `source` that `flat` doesn't contain yet.
    pub fn prepend_from(&mut self, flat: TweakId, source: TweakId) -> Result<(), ChangesetError> {
        check(source)?;
        let entry = self.altering_entry(flat)?;
        entry.prepending_merges.push(MergingEntry { source });
        Ok(())
    }

    /// Applies the pending edits of `base` to `flat` as well, underneath `flat`'s own edits.
    ///
    /// `base` must already have pending edits.
    pub fn inherit_changes(
        &mut self,
        flat: TweakId,
        base: TweakId,
    ) -> Result<(), ChangesetError> {
        check(flat)?;
        check(base)?;

        if !self.alterings.contains_key(&base) {
            return Err(ChangesetError::MissingBase { flat, base });
        }

        self.altering_entry(flat)?.base = Some(base);

        Ok(())
    }

    fn altering_entry(&mut self, flat: TweakId) -> Result<&mut Altering<R>, ChangesetError> {
        check(flat)?;

        Ok(self.alterings.entry(flat).or_insert_with(|| {
            self.ordered_alterings.push(flat);
            AlteringEntry::default()
        }))
    }

    /// Names an id for diagnostics. The name is also registered with the store on commit.
    pub fn register_name(&mut self, id: TweakId, name: impl Into<String>) {
        self.names.insert(id, name.into());
    }

    pub fn flat(&self, id: TweakId) -> Option<&Flat<R>> {
        self.flats.get(&id)
    }

    pub fn record(&self, id: TweakId) -> Option<&Record<R>> {
        self.records.get(&id)
    }

    pub fn has_record(&self, id: TweakId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn altering(&self, id: TweakId) -> Option<&Altering<R>> {
        self.alterings.get(&id)
    }

    pub fn name(&self, id: TweakId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// The record `flat` was associated with.
    pub fn associated_record(&self, flat: TweakId) -> Option<TweakId> {
        self.flat_to_record.get(&flat).copied()
    }

    /// Pending records in commit order.
    pub fn pending_records(&self) -> impl Iterator<Item = (TweakId, &Record<R>)> + '_ {
        self.ordered_records
            .iter()
            .filter_map(|id| self.records.get(id).map(|entry| (*id, entry)))
    }

    /// Pending alterations in the order they are applied.
    pub fn pending_alterings(&self) -> impl Iterator<Item = (TweakId, &Altering<R>)> + '_ {
        self.ordered_alterings
            .iter()
            .filter_map(|id| self.alterings.get(id).map(|entry| (*id, entry)))
    }

    pub fn pending_flats(&self) -> impl Iterator<Item = (TweakId, &Flat<R>)> + '_ {
        self.flats.iter().map(|(id, entry)| (*id, entry))
    }

    /// Renders an id through its registered name, or as a raw id if it has none.
    pub fn describe(&self, id: TweakId) -> String {
        describe(&self.names, id)
    }

    /// Whether there are no pending flats, records, alterations or names.
    ///
    /// Record associations are not pending work and don't count.
    pub fn is_empty(&self) -> bool {
        self.flats.is_empty()
            && self.records.is_empty()
            && self.alterings.is_empty()
            && self.names.is_empty()
    }

    /// Drops all pending work. Record associations are kept.
    pub fn clear(&mut self) {
        self.flats.clear();
        self.records.clear();
        self.ordered_records.clear();
        self.alterings.clear();
        self.ordered_alterings.clear();
        self.names.clear();
    }
}
