// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Type-erased access to the values held by a store.
//!
//! The store owns its values in whatever representation suits it (typed buffers, boxed dynamic
//! values, foreign memory behind an FFI boundary). The commit engine never looks inside them
//! directly; everything it needs to do with a value goes through the narrow [`Reflection`]
//! interface defined here. An adapter only has to implement the handful of required methods,
//! the search helpers are provided on top of them.
use crate::TweakId;
use std::fmt;

/// Queries and array operations over the values of a store.
///
/// Array methods take the *array* type descriptor, [`Reflection::is_equal`] takes the
/// *element* type descriptor (as returned by [`Reflection::element_type`]).
pub trait Reflection {
    /// Describes the declared type of a flat.
    ///
    /// Two descriptors compare equal only if they describe the identical type.
    type Type: Clone + PartialEq + fmt::Debug;

    /// Describes the class of a record.
    type RecordType: fmt::Debug;

    /// A single value: a scalar, an array element, or a whole array.
    type Value;

    /// Human readable name of a flat type, for diagnostics.
    fn type_name(&self, ty: &Self::Type) -> String;

    /// Human readable name of a record type, for diagnostics.
    fn record_type_name(&self, ty: &Self::RecordType) -> String;

    /// Returns the element type if `ty` is an array type, `None` otherwise.
    fn element_type(&self, ty: &Self::Type) -> Option<Self::Type>;

    /// Whether values of `ty` are a single reference to another entry.
    fn is_foreign_key(&self, ty: &Self::Type) -> bool;

    /// Whether values of `ty` are arrays of references to other entries.
    fn is_foreign_key_array(&self, ty: &Self::Type) -> bool;

    /// Reads a foreign key scalar.
    fn as_foreign_key(&self, value: &Self::Value) -> Option<TweakId>;

    /// Creates a fresh default value of `ty`. Arrays start out empty.
    fn construct(&self, ty: &Self::Type) -> Self::Value;

    /// Overwrites `target` with a deep copy of `source`.
    fn assign(&self, ty: &Self::Type, target: &mut Self::Value, source: &Self::Value);

    fn length(&self, ty: &Self::Type, array: &Self::Value) -> usize;

    fn element<'v>(
        &self,
        ty: &Self::Type,
        array: &'v Self::Value,
        index: usize,
    ) -> Option<&'v Self::Value>;

    /// Inserts a copy of `element` so that it ends up at `index`.
    ///
    /// An `index` past the end appends.
    fn insert_at(
        &self,
        ty: &Self::Type,
        array: &mut Self::Value,
        index: usize,
        element: &Self::Value,
    );

    /// Removes and returns the element at `index`, or `None` if out of bounds.
    fn remove_at(
        &self,
        ty: &Self::Type,
        array: &mut Self::Value,
        index: usize,
    ) -> Option<Self::Value>;

    fn is_equal(&self, element_ty: &Self::Type, a: &Self::Value, b: &Self::Value) -> bool;

    /// Creates an independent copy of `value`.
    fn copy_of(&self, ty: &Self::Type, value: &Self::Value) -> Self::Value {
        let mut copy = self.construct(ty);
        self.assign(ty, &mut copy, value);
        copy
    }

    /// Index of the first element of `array` equal to `value`.
    fn find_element(
        &self,
        ty: &Self::Type,
        array: &Self::Value,
        value: &Self::Value,
    ) -> Option<usize> {
        let element_ty = self.element_type(ty)?;
        (0..self.length(ty, array)).find(|&index| {
            self.element(ty, array, index)
                .is_some_and(|element| self.is_equal(&element_ty, element, value))
        })
    }

    /// Whether an element equal to `value` is present anywhere in `array`, including index 0.
    fn contains_element(&self, ty: &Self::Type, array: &Self::Value, value: &Self::Value) -> bool {
        self.find_element(ty, array, value).is_some()
    }

    /// Collects the ids referenced by a value of a foreign key or foreign key array type.
    ///
    /// Returns nothing for any other type.
    fn foreign_keys(&self, ty: &Self::Type, value: &Self::Value) -> Vec<TweakId> {
        if self.is_foreign_key(ty) {
            self.as_foreign_key(value).into_iter().collect()
        } else if self.is_foreign_key_array(ty) {
            (0..self.length(ty, value))
                .filter_map(|index| self.element(ty, value, index))
                .filter_map(|element| self.as_foreign_key(element))
                .collect()
        } else {
            Vec::new()
        }
    }
}
