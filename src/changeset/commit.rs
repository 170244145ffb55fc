use super::{Changeset, array::ArrayEdit, chain};
use crate::{
    TweakId,
    changelog::{Changelog, NoChangelog},
    error::AlterError,
    reflection::Reflection,
    store::{Store, WriteBatch},
};
use tracing::{debug, error, warn};

/// What a commit did.
///
/// Failures are already logged when the summary is returned; the counts are meant for callers
/// that want to report totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
pub struct CommitSummary {
    pub flats_written: usize,
    pub flats_failed: usize,
    pub records_written: usize,
    pub records_failed: usize,
    /// Array flats whose edited value was written back.
    pub arrays_altered: usize,
    /// Array flats left untouched because they were missing, not arrays, had a broken
    /// inheritance chain, or their new value was rejected.
    pub arrays_skipped: usize,
    pub records_republished: usize,
}

impl<R: Reflection> Changeset<R> {
    /// Applies all pending work to `store`, then clears the changeset.
    ///
    /// Same as [`Changeset::commit_with`] without a changelog.
    pub fn commit<S>(&mut self, store: &mut S) -> CommitSummary
    where
        S: Store<Reflection = R>,
    {
        self.commit_with(store, &mut NoChangelog)
    }

    /// Applies all pending work to `store`, reporting every change to `changelog`, then clears
    /// the changeset.
    ///
    /// The commit proceeds in phases:
    ///
    /// 1. `changelog` reverts what it remembers from earlier commits and forgets its foreign keys.
    /// 2. Within one write batch, names are registered, flats are written, and records are
    ///    created, cloned or updated in the order they were first declared.
    /// 3. Every alteration is resolved against the array as it is *now*, including flats and
    ///    records written in phase 2, and the edited copy is written back.
    /// 4. Records owning an altered array are re-published, each once.
    ///
    /// Every flat, record and array is handled on its own. If one of them fails, the failure is
    /// logged and the commit moves on; the changeset is cleared either way.
    pub fn commit_with<S, C>(&mut self, store: &mut S, changelog: &mut C) -> CommitSummary
    where
        S: Store<Reflection = R>,
        C: Changelog<S> + ?Sized,
    {
        changelog.revert_changes(store);
        changelog.forget_foreign_keys();

        let mut summary = CommitSummary::default();

        let mut batch = WriteBatch::open(store);
        for (&id, name) in &self.names {
            batch.register_name(id, name);
        }
        self.write_flats(&mut *batch, changelog, &mut summary);
        self.write_records(&mut *batch, &mut summary);
        batch.finish();

        let republish = self.alter_arrays(store, changelog, &mut summary);
        for record in republish {
            match store.update_record(record) {
                Ok(()) => summary.records_republished += 1,
                Err(error) => {
                    error!(record = %self.describe(record), %error, "cannot re-publish record");
                }
            }
        }

        debug!(?summary, "committed changeset");

        self.clear();
        summary
    }

    fn write_flats<S, C>(&self, store: &mut S, changelog: &mut C, summary: &mut CommitSummary)
    where
        S: Store<Reflection = R>,
        C: Changelog<S> + ?Sized,
    {
        for (&id, entry) in &self.flats {
            if let Err(error) = store.set_flat(id, &entry.ty, &entry.value) {
                error!(flat = %self.describe(id), %error, "cannot set flat");
                summary.flats_failed += 1;
                continue;
            }

            summary.flats_written += 1;

            for key in store.reflection().foreign_keys(&entry.ty, &entry.value) {
                changelog.register_foreign_key(key);
            }
        }
    }

    fn write_records<S>(&self, store: &mut S, summary: &mut CommitSummary)
    where
        S: Store<Reflection = R>,
    {
        for (id, entry) in self.pending_records() {
            let record = self.describe(id);

            let result = if store.record_exists(id) {
                store
                    .update_record(id)
                    .map_err(|error| error!(%record, %error, "cannot update record"))
            } else if let Some(source) = entry.source {
                store.clone_record(id, source).map_err(|error| {
                    let source = self.describe(source);
                    error!(%record, %source, %error, "cannot clone record");
                })
            } else if let Some(ty) = &entry.ty {
                store.create_record(id, ty).map_err(|error| {
                    let ty = store.reflection().record_type_name(ty);
                    error!(%record, %ty, %error, "cannot create record");
                })
            } else {
                error!(%record, "cannot update record, it doesn't exist");
                Err(())
            };

            match result {
                Ok(()) => summary.records_written += 1,
                Err(()) => summary.records_failed += 1,
            }
        }
    }

    /// Applies every pending alteration, returning the records to re-publish.
    fn alter_arrays<S, C>(
        &self,
        store: &mut S,
        changelog: &mut C,
        summary: &mut CommitSummary,
    ) -> Vec<TweakId>
    where
        S: Store<Reflection = R>,
        C: Changelog<S> + ?Sized,
    {
        let mut republish = Vec::new();

        for &flat in &self.ordered_alterings {
            match self.alter_array(store, changelog, flat, &mut republish) {
                Ok(()) => summary.arrays_altered += 1,
                Err(AlterError::Chain(error)) => {
                    warn!(flat = %self.describe(flat), %error, "cannot apply changes");
                    summary.arrays_skipped += 1;
                }
                Err(error) => {
                    error!(flat = %self.describe(flat), %error, "cannot apply changes");
                    summary.arrays_skipped += 1;
                }
            }
        }

        republish
    }

    fn alter_array<S, C>(
        &self,
        store: &mut S,
        changelog: &mut C,
        flat: TweakId,
        republish: &mut Vec<TweakId>,
    ) -> Result<(), AlterError>
    where
        S: Store<Reflection = R>,
        C: Changelog<S> + ?Sized,
    {
        let lookup: &S = store;
        let reflection = lookup.reflection();

        let (ty, current) = lookup.flat(flat).ok_or(AlterError::MissingFlat)?;
        let Some(element_ty) = reflection.element_type(ty) else {
            return Err(AlterError::NotAnArray {
                type_name: reflection.type_name(ty),
            });
        };

        let chain = chain::resolve(&self.alterings, &self.names, flat)?;

        // the store's value may be its internal buffer, so the edit works on a copy
        let ty = ty.clone();
        let is_foreign_key_array = reflection.is_foreign_key_array(&ty);
        let altered = ArrayEdit::new(reflection, flat, &ty, element_ty, current, &self.names)
            .apply(&chain, |source| lookup.flat(source));

        store
            .set_flat(flat, &ty, &altered.value)
            .map_err(|error| AlterError::Write {
                reason: error.to_string(),
            })?;

        if let Some(&record) = self.flat_to_record.get(&flat) {
            if !republish.contains(&record) {
                republish.push(record);
            }
            changelog.associate_record(record, flat);
        }

        for (index, value) in &altered.deletions {
            changelog.register_deletion(flat, *index, value);
        }

        for (index, inserted) in &altered.insertions {
            let value = inserted.get();
            changelog.register_insertion(flat, *index, value);

            if is_foreign_key_array
                && let Some(key) = store.reflection().as_foreign_key(value)
            {
                changelog.register_foreign_key(key);
                changelog.register_name(key, &self.describe(key));
            }
        }

        changelog.register_name(flat, &self.describe(flat));

        debug!(
            flat = %self.describe(flat),
            levels = chain.len(),
            deleted = altered.deletions.len(),
            inserted = altered.insertions.len(),
            "applied changes"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        changelog::RecordingChangelog,
        memory::{MemoryReflection, MemoryStore, RecordClass, Value, ValueType},
    };
    use insta::assert_snapshot;

    fn id(name: &str) -> TweakId {
        TweakId::from_name(name)
    }

    fn strings() -> ValueType {
        ValueType::array(ValueType::String)
    }

    fn log(changelog: &RecordingChangelog) -> String {
        changelog.changes_seen.join("\n")
    }

    #[test]
    fn reports_deltas_in_order() {
        crate::init_test_logging();

        let tags = id("Items.Jacket.tags");
        let mut store = MemoryStore::new();
        store.insert_flat(tags, strings(), Value::array(["Clothing", "Quest", "Heavy"]));
        store.insert_record(id("Items.Jacket"), RecordClass::new("gamedataItem_Record"));

        let mut changeset = Changeset::<MemoryReflection>::new();
        changeset.register_name(tags, "Items.Jacket.tags");
        changeset.associate_record(id("Items.Jacket"), tags).unwrap();
        changeset
            .remove_element(tags, ValueType::String, Value::from("Heavy"))
            .unwrap();
        changeset
            .remove_element(tags, ValueType::String, Value::from("Clothing"))
            .unwrap();
        changeset
            .prepend_element(tags, ValueType::String, Value::from("Legendary"), false)
            .unwrap();
        changeset
            .append_element(tags, ValueType::String, Value::from("Quest"), true)
            .unwrap();
        changeset
            .append_element(tags, ValueType::String, Value::from("Light"), true)
            .unwrap();

        let mut changelog = RecordingChangelog::new()
            .named(id("Items.Jacket"), "Items.Jacket")
            .named(tags, "Items.Jacket.tags");
        let summary = changeset.commit_with(&mut store, &mut changelog);

        assert_eq!(
            store.flat_value(tags),
            Some(&Value::array(["Legendary", "Quest", "Light"]))
        );
        assert_eq!(summary.arrays_altered, 1);
        assert_eq!(summary.records_republished, 1);
        assert_eq!(store.record_updates(id("Items.Jacket")), 1);
        assert_snapshot!(log(&changelog), @r#"
        revert
        forget foreign keys
        associate Items.Jacket.tags with Items.Jacket
        delete Items.Jacket.tags[2] String("Heavy")
        delete Items.Jacket.tags[0] String("Clothing")
        insert Items.Jacket.tags[0] String("Legendary")
        insert Items.Jacket.tags[2] String("Light")
        name Items.Jacket.tags
        "#);
    }

    #[test]
    fn reports_foreign_keys() {
        let parts = id("Items.Jacket.parts");
        let slot = id("Items.Jacket.slot");
        let mut store = MemoryStore::new();
        store.insert_flat(
            parts,
            ValueType::array(ValueType::ForeignKey),
            Value::Array(Vec::new()),
        );

        let mut changeset = Changeset::<MemoryReflection>::new();
        changeset.register_name(id("Items.Pocket"), "Items.Pocket");
        changeset.register_name(parts, "Items.Jacket.parts");
        changeset
            .set_flat(slot, ValueType::ForeignKey, Value::from(id("Slots.Body")))
            .unwrap();
        changeset
            .append_element(
                parts,
                ValueType::ForeignKey,
                Value::from(id("Items.Pocket")),
                false,
            )
            .unwrap();

        let mut changelog = RecordingChangelog::new().named(id("Slots.Body"), "Slots.Body");
        changeset.commit_with(&mut store, &mut changelog);

        assert_snapshot!(log(&changelog), @r#"
        revert
        forget foreign keys
        foreign key Slots.Body
        insert <TDBID:AD9720F8:12>[0] ForeignKey(<TDBID:8A44A98A:0C>)
        foreign key <TDBID:8A44A98A:0C>
        name Items.Pocket
        name Items.Jacket.parts
        "#);
    }

    #[test]
    fn records_follow_declaration_order() {
        crate::init_test_logging();

        let class =
            RecordClass::new("gamedataItem_Record").with_property("quality", ValueType::Int);
        let mut store = MemoryStore::new();
        store.insert_record(id("Items.Existing"), class.clone());

        let mut changeset = Changeset::<MemoryReflection>::new();
        changeset
            .make_record(id("Items.Base"), class.clone(), None)
            .unwrap();
        changeset
            .make_record(id("Items.Copy"), class.clone(), Some(id("Items.Base")))
            .unwrap();
        changeset.update_record(id("Items.Existing")).unwrap();
        changeset.update_record(id("Items.Missing")).unwrap();
        changeset
            .make_record(id("Items.Orphan"), class.clone(), Some(id("Items.Nowhere")))
            .unwrap();
        changeset
            .set_flat(id("Items.Base.quality"), ValueType::Int, Value::Int(4))
            .unwrap();

        let summary = changeset.commit(&mut store);

        assert_eq!(summary.records_written, 3);
        assert_eq!(summary.records_failed, 2);
        assert_eq!(summary.flats_written, 1);
        assert!(store.record_exists(id("Items.Copy")));
        assert!(!store.record_exists(id("Items.Orphan")));
        assert_eq!(store.record_updates(id("Items.Existing")), 1);
        // flats are written before records are created, and created flats are kept
        assert_eq!(store.flat_value(id("Items.Base.quality")), Some(&Value::Int(4)));
        assert_eq!(store.flat_value(id("Items.Copy.quality")), Some(&Value::Int(4)));
        assert!(changeset.is_empty());
    }

    #[test]
    fn alterations_see_records_created_in_the_same_commit() {
        let class = RecordClass::new("gamedataItem_Record").with_property("tags", strings());
        let mut store = MemoryStore::new();

        let mut changeset = Changeset::<MemoryReflection>::new();
        changeset.make_record(id("Items.New"), class, None).unwrap();
        changeset
            .append_element(
                id("Items.New.tags"),
                ValueType::String,
                Value::from("Fresh"),
                false,
            )
            .unwrap();

        let summary = changeset.commit(&mut store);

        assert_eq!(summary.arrays_altered, 1);
        assert_eq!(
            store.flat_value(id("Items.New.tags")),
            Some(&Value::array(["Fresh"]))
        );
    }

    #[test]
    fn failed_arrays_are_skipped() {
        crate::init_test_logging();

        let mut store = MemoryStore::new();
        store.insert_flat(id("A.scalar"), ValueType::Int, Value::Int(1));
        store.insert_flat(id("A.locked"), strings(), Value::array(["a"]));
        store.insert_flat(id("A.fine"), strings(), Value::array(["a"]));
        store.reject_writes_to(id("A.locked"));

        let mut changeset = Changeset::<MemoryReflection>::new();
        for flat in ["A.missing", "A.scalar", "A.locked", "A.fine"] {
            changeset
                .append_element(id(flat), ValueType::String, Value::from("b"), false)
                .unwrap();
        }

        let summary = changeset.commit(&mut store);

        assert_eq!(summary.arrays_skipped, 3);
        assert_eq!(summary.arrays_altered, 1);
        assert_eq!(store.flat_value(id("A.scalar")), Some(&Value::Int(1)));
        assert_eq!(store.flat_value(id("A.locked")), Some(&Value::array(["a"])));
        assert_eq!(store.flat_value(id("A.fine")), Some(&Value::array(["a", "b"])));
        assert!(changeset.is_empty());
    }

    #[test]
    fn records_are_republished_once() {
        let mut store = MemoryStore::new();
        store.insert_record(id("Items.A"), RecordClass::new("gamedataItem_Record"));
        store.insert_flat(id("Items.A.x"), strings(), Value::Array(Vec::new()));
        store.insert_flat(id("Items.A.y"), strings(), Value::Array(Vec::new()));

        let mut changeset = Changeset::<MemoryReflection>::new();
        for flat in ["Items.A.x", "Items.A.y"] {
            changeset.associate_record(id("Items.A"), id(flat)).unwrap();
            changeset
                .append_element(id(flat), ValueType::String, Value::from("v"), false)
                .unwrap();
        }

        let summary = changeset.commit(&mut store);
        assert_eq!(summary.records_republished, 1);
        assert_eq!(store.record_updates(id("Items.A")), 1);

        // the association outlives the commit
        changeset
            .append_element(id("Items.A.x"), ValueType::String, Value::from("w"), false)
            .unwrap();
        changeset.commit(&mut store);
        assert_eq!(store.record_updates(id("Items.A")), 2);
    }

    #[test]
    fn names_reach_the_store() {
        let mut store = MemoryStore::new();
        let mut changeset = Changeset::<MemoryReflection>::new();
        changeset.register_name(id("Items.A"), "Items.A");

        changeset.commit(&mut store);

        assert_eq!(store.name(id("Items.A")), Some("Items.A"));
        assert_eq!(store.batches_committed(), 1);
        assert!(!store.in_batch());
    }
}
