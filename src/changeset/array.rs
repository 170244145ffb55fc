//! Applies a resolved chain of alterations to a copy of an array.
//!
//! The edit happens in two passes over the chain. The deletion pass locates every requested
//! removal in the array as it was fetched, then removes the matches back to front so earlier
//! indices stay valid. The insertion pass walks the chain twice: once for prepends, inserting at
//! a cursor that starts at the front, and once for appends, with the cursor starting at the end.
//! Levels are visited from the most general to the most derived, so each level's insertions
//! end up contiguous and in declaration order.
//!
//! Every removal leaves a skip marker at its chain level. An insertion is dropped if an equal
//! value was removed by a *more derived* level.
use super::{AlteringEntry, InsertionEntry, MergingEntry, chain::Chain, describe};
use crate::{Map, TweakId, reflection::Reflection};
use tracing::{error, trace};

/// An element that ended up in the edited array.
pub(super) enum Inserted<'c, V> {
    /// Inserted directly; still owned by the pending alteration.
    Pending(&'c V),
    /// Copied out of a merge source.
    Merged(V),
}

impl<V> Inserted<'_, V> {
    pub(super) fn get(&self) -> &V {
        match self {
            Inserted::Pending(value) => value,
            Inserted::Merged(value) => value,
        }
    }
}

/// Result of editing one array.
pub(super) struct AlteredArray<'c, V> {
    /// The edited copy.
    pub(super) value: V,
    /// Removed elements with their index before removal, last index first.
    pub(super) deletions: Vec<(usize, V)>,
    /// Inserted elements with the index they were inserted at, in insertion order.
    pub(super) insertions: Vec<(usize, Inserted<'c, V>)>,
}

pub(super) struct ArrayEdit<'r, 'c, R: Reflection> {
    reflection: &'r R,
    ty: &'r R::Type,
    element_ty: R::Type,
    flat: TweakId,
    names: &'c Map<TweakId, String>,
    array: R::Value,
    skips: Vec<(usize, &'c R::Value)>,
    deletions: Vec<(usize, R::Value)>,
    insertions: Vec<(usize, Inserted<'c, R::Value>)>,
    cursor: usize,
}

impl<'r, 'c, R: Reflection> ArrayEdit<'r, 'c, R> {
    /// Starts editing a copy of `current`, leaving `current` untouched.
    pub(super) fn new(
        reflection: &'r R,
        flat: TweakId,
        ty: &'r R::Type,
        element_ty: R::Type,
        current: &R::Value,
        names: &'c Map<TweakId, String>,
    ) -> Self {
        Self {
            reflection,
            ty,
            element_ty,
            flat,
            names,
            array: reflection.copy_of(ty, current),
            skips: Vec::new(),
            deletions: Vec::new(),
            insertions: Vec::new(),
            cursor: 0,
        }
    }

    /// Applies all levels of `chain`, looking up merge sources through `source`.
    pub(super) fn apply<F>(
        mut self,
        chain: &Chain<'c, R::Type, R::Value>,
        source: F,
    ) -> AlteredArray<'c, R::Value>
    where
        F: Fn(TweakId) -> Option<(&'r R::Type, &'r R::Value)>,
    {
        self.delete(chain);

        self.cursor = 0;
        for (level, entry) in chain.iter().copied().enumerate() {
            self.insert(level, &entry.prependings, &entry.prepending_merges, &source);
        }

        self.cursor = self.reflection.length(self.ty, &self.array);
        for (level, entry) in chain.iter().copied().enumerate() {
            self.insert(level, &entry.appendings, &entry.appending_merges, &source);
        }

        AlteredArray {
            value: self.array,
            deletions: self.deletions,
            insertions: self.insertions,
        }
    }

    fn delete(&mut self, chain: &[&'c AlteringEntry<R::Type, R::Value>]) {
        let mut matched = Vec::new();

        for (level, entry) in chain.iter().copied().enumerate() {
            for deletion in &entry.deletions {
                if !self.has_element_type(&deletion.ty) {
                    continue;
                }

                // each removal claims its own occurrence, so an index is never removed twice
                let length = self.reflection.length(self.ty, &self.array);
                let index = (0..length).find(|index| {
                    !matched.contains(index)
                        && self
                            .reflection
                            .element(self.ty, &self.array, *index)
                            .is_some_and(|element| {
                                self.reflection
                                    .is_equal(&self.element_ty, element, &deletion.value)
                            })
                });

                if let Some(index) = index {
                    matched.push(index);
                }

                self.skips.push((level, &deletion.value));
            }
        }

        matched.sort_unstable_by(|a, b| b.cmp(a));

        for index in matched {
            if let Some(removed) = self.reflection.remove_at(self.ty, &mut self.array, index) {
                trace!(flat = %self.flat, index, "removed element");
                self.deletions.push((index, removed));
            }
        }
    }

    fn insert<F>(
        &mut self,
        level: usize,
        insertions: &'c [InsertionEntry<R::Type, R::Value>],
        merges: &[MergingEntry],
        source: &F,
    ) where
        F: Fn(TweakId) -> Option<(&'r R::Type, &'r R::Value)>,
    {
        for insertion in insertions {
            if !self.has_element_type(&insertion.ty) {
                continue;
            }

            if insertion.unique && self.contains(&insertion.value) {
                continue;
            }

            if self.is_skipped(level, &insertion.value) {
                continue;
            }

            self.insert_at_cursor(&insertion.value, Inserted::Pending(&insertion.value));
        }

        for merge in merges {
            let Some((source_ty, source_array)) = source(merge.source) else {
                error!(
                    flat = %describe(self.names, self.flat),
                    source = %describe(self.names, merge.source),
                    "cannot merge, the source does not exist"
                );
                continue;
            };

            if source_ty != self.ty {
                error!(
                    flat = %describe(self.names, self.flat),
                    source = %describe(self.names, merge.source),
                    source_type = %self.reflection.type_name(source_ty),
                    "cannot merge, the source is not an array of the same type"
                );
                continue;
            }

            for index in 0..self.reflection.length(source_ty, source_array) {
                let Some(element) = self.reflection.element(source_ty, source_array, index) else {
                    continue;
                };

                if self.contains(element) || self.is_skipped(level, element) {
                    continue;
                }

                let copy = self.reflection.copy_of(&self.element_ty, element);
                self.insert_at_cursor(element, Inserted::Merged(copy));
            }
        }
    }

    fn insert_at_cursor(&mut self, value: &R::Value, inserted: Inserted<'c, R::Value>) {
        self.reflection
            .insert_at(self.ty, &mut self.array, self.cursor, value);
        trace!(flat = %self.flat, index = self.cursor, "inserted element");
        self.insertions.push((self.cursor, inserted));
        self.cursor += 1;
    }

    /// Whether a direct edit declared with `ty` fits the array; logs the edit otherwise.
    fn has_element_type(&self, ty: &R::Type) -> bool {
        if *ty == self.element_ty {
            return true;
        }

        error!(
            flat = %describe(self.names, self.flat),
            element_type = %self.reflection.type_name(&self.element_ty),
            declared_type = %self.reflection.type_name(ty),
            "skipping an element edit of the wrong type"
        );
        false
    }

    fn contains(&self, value: &R::Value) -> bool {
        self.reflection.contains_element(self.ty, &self.array, value)
    }

    /// Whether a level more derived than `level` removed `value`.
    fn is_skipped(&self, level: usize, value: &R::Value) -> bool {
        self.skips.iter().any(|(skip_level, skipped)| {
            *skip_level > level && self.reflection.is_equal(&self.element_ty, skipped, value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        changeset::{DeletionEntry, chain},
        create_map,
        memory::{MemoryReflection, Value, ValueType},
    };

    type Entry = AlteringEntry<ValueType, Value>;

    fn ty() -> ValueType {
        ValueType::array(ValueType::Int)
    }

    fn insertion(value: i32, unique: bool) -> InsertionEntry<ValueType, Value> {
        InsertionEntry {
            ty: ValueType::Int,
            value: Value::Int(value),
            unique,
        }
    }

    fn deletion(value: i32) -> DeletionEntry<ValueType, Value> {
        DeletionEntry {
            ty: ValueType::Int,
            value: Value::Int(value),
        }
    }

    fn edit(current: &Value, levels: &[&Entry]) -> (Value, Vec<usize>, Vec<(usize, Value)>) {
        edit_with_source(current, levels, None)
    }

    fn edit_with_source(
        current: &Value,
        levels: &[&Entry],
        source: Option<(TweakId, &ValueType, &Value)>,
    ) -> (Value, Vec<usize>, Vec<(usize, Value)>) {
        let names = create_map();
        let ty = ty();
        let chain: chain::Chain<'_, _, _> = levels.iter().copied().collect();
        let altered = ArrayEdit::new(
            &MemoryReflection,
            TweakId::from_name("A.x"),
            &ty,
            ValueType::Int,
            current,
            &names,
        )
        .apply(&chain, |id| {
            source.and_then(|(source_id, ty, value)| (source_id == id).then_some((ty, value)))
        });

        let deleted = altered.deletions.iter().map(|(index, _)| *index).collect();
        let inserted = altered
            .insertions
            .iter()
            .map(|(index, value)| (*index, value.get().clone()))
            .collect();
        (altered.value, deleted, inserted)
    }

    #[test]
    fn leaves_the_fetched_value_untouched() {
        let current = Value::array([1, 2]);
        let entry = Entry {
            deletions: vec![deletion(1)],
            appendings: vec![insertion(3, false)],
            ..Default::default()
        };

        let (edited, _, _) = edit(&current, &[&entry]);
        assert_eq!(edited, Value::array([2, 3]));
        assert_eq!(current, Value::array([1, 2]));
    }

    #[test]
    fn removes_back_to_front() {
        let entry = Entry {
            deletions: vec![deletion(1), deletion(3)],
            ..Default::default()
        };

        let (edited, deleted, _) = edit(&Value::array([1, 2, 3]), &[&entry]);
        assert_eq!(edited, Value::array([2]));
        assert_eq!(deleted, [2, 0]);
    }

    #[test]
    fn repeated_removals_claim_distinct_occurrences() {
        let base = Entry {
            deletions: vec![deletion(7)],
            ..Default::default()
        };
        let derived = Entry {
            deletions: vec![deletion(7), deletion(9)],
            ..Default::default()
        };

        let (edited, deleted, _) = edit(&Value::array([7, 8, 7]), &[&base, &derived]);
        assert_eq!(edited, Value::array([8]));
        assert_eq!(deleted, [2, 0]);
    }

    #[test]
    fn prepends_and_appends_follow_level_order() {
        let base = Entry {
            prependings: vec![insertion(10, false), insertion(11, false)],
            appendings: vec![insertion(20, false), insertion(21, false)],
            ..Default::default()
        };
        let derived = Entry {
            prependings: vec![insertion(12, false)],
            appendings: vec![insertion(22, false)],
            ..Default::default()
        };

        let (edited, _, inserted) = edit(&Value::array([0]), &[&base, &derived]);
        assert_eq!(edited, Value::array([10, 11, 12, 0, 20, 21, 22]));
        let indices: Vec<_> = inserted.iter().map(|(index, _)| *index).collect();
        assert_eq!(indices, [0, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn derived_removal_suppresses_base_insertion() {
        let base = Entry {
            appendings: vec![insertion(5, false)],
            prependings: vec![insertion(6, false)],
            ..Default::default()
        };
        let derived = Entry {
            deletions: vec![deletion(5), deletion(6)],
            ..Default::default()
        };

        let (edited, _, inserted) = edit(&Value::array([1]), &[&base, &derived]);
        assert_eq!(edited, Value::array([1]));
        assert!(inserted.is_empty());
    }

    #[test]
    fn same_level_removal_does_not_suppress() {
        let entry = Entry {
            deletions: vec![deletion(5)],
            appendings: vec![insertion(5, false)],
            ..Default::default()
        };

        let (edited, deleted, _) = edit(&Value::array([5, 1]), &[&entry]);
        assert_eq!(edited, Value::array([1, 5]));
        assert_eq!(deleted, [0]);
    }

    #[test]
    fn base_removal_does_not_suppress_derived_insertion() {
        let base = Entry {
            deletions: vec![deletion(5)],
            ..Default::default()
        };
        let derived = Entry {
            appendings: vec![insertion(5, false)],
            ..Default::default()
        };

        let (edited, _, _) = edit(&Value::array([5]), &[&base, &derived]);
        assert_eq!(edited, Value::array([5]));
    }

    #[test]
    fn unique_insertions_check_every_index() {
        let entry = Entry {
            appendings: vec![insertion(1, true), insertion(2, true), insertion(3, false)],
            ..Default::default()
        };

        // an equal element at index 0 counts as present
        let (edited, _, _) = edit(&Value::array([1, 2]), &[&entry]);
        assert_eq!(edited, Value::array([1, 2, 3]));
    }

    #[test]
    fn unique_insertions_see_earlier_insertions() {
        let entry = Entry {
            prependings: vec![insertion(4, true), insertion(4, true)],
            ..Default::default()
        };

        let (edited, _, _) = edit(&Value::Array(Vec::new()), &[&entry]);
        assert_eq!(edited, Value::array([4]));
    }

    #[test]
    fn merges_skip_present_elements() {
        let source_id = TweakId::from_name("B.x");
        let source_ty = ty();
        let source = Value::array([1, 2, 3]);
        let entry = Entry {
            appending_merges: vec![MergingEntry { source: source_id }],
            ..Default::default()
        };

        let (edited, _, inserted) = edit_with_source(
            &Value::array([1]),
            &[&entry],
            Some((source_id, &source_ty, &source)),
        );
        assert_eq!(edited, Value::array([1, 2, 3]));
        assert_eq!(inserted, [(1, Value::Int(2)), (2, Value::Int(3))]);
    }

    #[test]
    fn merges_come_after_direct_insertions_of_a_level() {
        let source_id = TweakId::from_name("B.x");
        let source_ty = ty();
        let source = Value::array([8, 9]);
        let entry = Entry {
            prependings: vec![insertion(1, false)],
            prepending_merges: vec![MergingEntry { source: source_id }],
            ..Default::default()
        };

        let (edited, _, _) = edit_with_source(
            &Value::array([0]),
            &[&entry],
            Some((source_id, &source_ty, &source)),
        );
        assert_eq!(edited, Value::array([1, 8, 9, 0]));
    }

    #[test]
    fn merges_respect_derived_removals() {
        let source_id = TweakId::from_name("B.x");
        let source_ty = ty();
        let source = Value::array([8, 9]);
        let base = Entry {
            appending_merges: vec![MergingEntry { source: source_id }],
            ..Default::default()
        };
        let derived = Entry {
            deletions: vec![deletion(8)],
            ..Default::default()
        };

        let (edited, _, _) = edit_with_source(
            &Value::Array(Vec::new()),
            &[&base, &derived],
            Some((source_id, &source_ty, &source)),
        );
        assert_eq!(edited, Value::array([9]));
    }

    #[test]
    fn merges_from_mismatched_sources_are_skipped() {
        crate::init_test_logging();

        let source_id = TweakId::from_name("B.x");
        let source_ty = ValueType::array(ValueType::String);
        let source = Value::array(["a"]);
        let entry = Entry {
            appending_merges: vec![
                MergingEntry { source: source_id },
                MergingEntry {
                    source: TweakId::from_name("C.x"),
                },
            ],
            appendings: vec![insertion(1, false)],
            ..Default::default()
        };

        let (edited, _, _) = edit_with_source(
            &Value::Array(Vec::new()),
            &[&entry],
            Some((source_id, &source_ty, &source)),
        );
        assert_eq!(edited, Value::array([1]));
    }

    #[test]
    fn edits_of_the_wrong_element_type_are_skipped_alone() {
        crate::init_test_logging();

        let entry = Entry {
            deletions: vec![
                deletion(1),
                DeletionEntry {
                    ty: ValueType::String,
                    value: Value::from("2"),
                },
            ],
            appendings: vec![
                insertion(3, false),
                InsertionEntry {
                    ty: ValueType::String,
                    value: Value::from("4"),
                    unique: false,
                },
            ],
            ..Default::default()
        };

        let (edited, deleted, inserted) = edit(&Value::array([1, 2]), &[&entry]);
        assert_eq!(edited, Value::array([2, 3]));
        assert_eq!(deleted, [0]);
        assert_eq!(inserted, [(1, Value::Int(3))]);
    }

    #[quickcheck]
    fn unique_appends_never_duplicate(current: Vec<i8>, appended: Vec<i8>) -> bool {
        let current = Value::array(current.into_iter().map(i32::from));
        let entry = Entry {
            appendings: appended
                .iter()
                .map(|value| insertion(i32::from(*value), true))
                .collect(),
            ..Default::default()
        };

        let (edited, _, inserted) = edit(&current, &[&entry]);
        let Value::Array(elements) = edited else {
            return false;
        };
        let Value::Array(before) = current else {
            return false;
        };

        // existing elements stay in front and every inserted value is new to the array
        elements.starts_with(&before)
            && inserted.iter().all(|(_, value)| {
                !before.contains(value) && elements.iter().filter(|e| *e == value).count() == 1
            })
    }

    #[quickcheck]
    fn removals_never_grow_the_array(current: Vec<i8>, removed: Vec<i8>) -> bool {
        let current = Value::array(current.into_iter().map(i32::from));
        let entry = Entry {
            deletions: removed
                .iter()
                .map(|value| deletion(i32::from(*value)))
                .collect(),
            ..Default::default()
        };

        let (edited, deleted, _) = edit(&current, &[&entry]);
        let reflection = MemoryReflection;
        let before = reflection.length(&ty(), &current);
        let after = reflection.length(&ty(), &edited);
        after + deleted.len() == before && deleted.windows(2).all(|pair| pair[0] > pair[1])
    }
}
