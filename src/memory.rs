// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! An in-memory tweak database.
//!
//! [`MemoryStore`] implements [`Store`] over a small dynamic value model ([`Value`] and
//! [`ValueType`]), with [`MemoryReflection`] as its [`Reflection`]. It enforces the same rules a
//! real database would: a flat keeps its declared type once written, values must conform to it,
//! and records can only be created once. Tests can make it reject writes to chosen ids to
//! exercise failure paths.
//!
//! [`UndoLog`] is a [`Changelog`] for this store that can actually revert the array edits of a
//! previous commit.
use crate::{Changelog, TweakId, reflection::Reflection, store::Store};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Declared type of a flat.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    ForeignKey,
    Array(Box<ValueType>),
}

impl ValueType {
    pub fn array(element: ValueType) -> Self {
        Self::Array(Box::new(element))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("Bool"),
            ValueType::Int => f.write_str("Int32"),
            ValueType::Float => f.write_str("Float"),
            ValueType::String => f.write_str("String"),
            ValueType::ForeignKey => f.write_str("TweakDBID"),
            ValueType::Array(element) => write!(f, "array:{element}"),
        }
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
    ForeignKey(TweakId),
    Array(Vec<Value>),
}

impl Value {
    /// Builds an array value.
    ///
    /// ```rust
    /// # use tweakset::memory::Value;
    /// assert_eq!(
    ///     Value::array([1, 2]),
    ///     Value::Array(vec![Value::Int(1), Value::Int(2)])
    /// );
    /// ```
    pub fn array<I>(elements: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self::Array(elements.into_iter().map(Into::into).collect())
    }

    /// Whether this value can be stored in a flat of type `ty`.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Value::Bool(_), ValueType::Bool)
            | (Value::Int(_), ValueType::Int)
            | (Value::Float(_), ValueType::Float)
            | (Value::String(_), ValueType::String)
            | (Value::ForeignKey(_), ValueType::ForeignKey) => true,
            (Value::Array(elements), ValueType::Array(element_ty)) => {
                elements.iter().all(|element| element.conforms_to(element_ty))
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<TweakId> for Value {
    fn from(value: TweakId) -> Self {
        Self::ForeignKey(value)
    }
}

/// The class of a record: a name and the flats each of its instances owns.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordClass {
    name: String,
    properties: Vec<(String, ValueType)>,
}

impl RecordClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property. Instances store it in the flat `<record name>.<property>`.
    pub fn with_property(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.properties.push((name.into(), ty));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &ValueType)> {
        self.properties.iter().map(|(name, ty)| (name.as_str(), ty))
    }
}

/// [`Reflection`] over [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryReflection;

impl Reflection for MemoryReflection {
    type Type = ValueType;
    type RecordType = RecordClass;
    type Value = Value;

    fn type_name(&self, ty: &ValueType) -> String {
        ty.to_string()
    }

    fn record_type_name(&self, ty: &RecordClass) -> String {
        ty.name.clone()
    }

    fn element_type(&self, ty: &ValueType) -> Option<ValueType> {
        match ty {
            ValueType::Array(element) => Some(element.as_ref().clone()),
            _ => None,
        }
    }

    fn is_foreign_key(&self, ty: &ValueType) -> bool {
        *ty == ValueType::ForeignKey
    }

    fn is_foreign_key_array(&self, ty: &ValueType) -> bool {
        matches!(ty, ValueType::Array(element) if **element == ValueType::ForeignKey)
    }

    fn as_foreign_key(&self, value: &Value) -> Option<TweakId> {
        match value {
            Value::ForeignKey(id) => Some(*id),
            _ => None,
        }
    }

    fn construct(&self, ty: &ValueType) -> Value {
        match ty {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::ForeignKey => Value::ForeignKey(TweakId::INVALID),
            ValueType::Array(_) => Value::Array(Vec::new()),
        }
    }

    fn assign(&self, _ty: &ValueType, target: &mut Value, source: &Value) {
        target.clone_from(source);
    }

    fn length(&self, _ty: &ValueType, array: &Value) -> usize {
        match array {
            Value::Array(elements) => elements.len(),
            _ => 0,
        }
    }

    fn element<'v>(&self, _ty: &ValueType, array: &'v Value, index: usize) -> Option<&'v Value> {
        match array {
            Value::Array(elements) => elements.get(index),
            _ => None,
        }
    }

    fn insert_at(&self, _ty: &ValueType, array: &mut Value, index: usize, element: &Value) {
        if let Value::Array(elements) = array {
            let index = index.min(elements.len());
            elements.insert(index, element.clone());
        }
    }

    fn remove_at(&self, _ty: &ValueType, array: &mut Value, index: usize) -> Option<Value> {
        match array {
            Value::Array(elements) if index < elements.len() => Some(elements.remove(index)),
            _ => None,
        }
    }

    fn is_equal(&self, _element_ty: &ValueType, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// Why [`MemoryStore`] rejected a write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    #[error("value is not a {ty}")]
    TypeMismatch { ty: ValueType },

    #[error("flat {id} is declared as {declared}, not {ty}")]
    TypeChanged {
        id: TweakId,
        declared: ValueType,
        ty: ValueType,
    },

    #[error("record {id} already exists")]
    RecordExists { id: TweakId },

    #[error("record {id} doesn't exist")]
    MissingRecord { id: TweakId },

    #[error("writes to {id} are rejected")]
    Rejected { id: TweakId },
}

#[derive(Debug, Clone)]
struct StoredRecord {
    class: RecordClass,
    updates: usize,
}

/// A [`Store`] keeping everything in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    reflection: MemoryReflection,
    flats: BTreeMap<TweakId, (ValueType, Value)>,
    records: BTreeMap<TweakId, StoredRecord>,
    names: BTreeMap<TweakId, String>,
    rejected: BTreeSet<TweakId>,
    in_batch: bool,
    batches_committed: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a flat, bypassing all checks.
    pub fn insert_flat(&mut self, id: TweakId, ty: ValueType, value: Value) {
        self.flats.insert(id, (ty, value));
    }

    /// Seeds a record and its flats, bypassing all checks.
    pub fn insert_record(&mut self, id: TweakId, class: RecordClass) {
        self.create_flats(id, &class, None);
        self.records.insert(id, StoredRecord { class, updates: 0 });
    }

    pub fn flat_value(&self, id: TweakId) -> Option<&Value> {
        self.flats.get(&id).map(|(_, value)| value)
    }

    pub fn flat_type(&self, id: TweakId) -> Option<&ValueType> {
        self.flats.get(&id).map(|(ty, _)| ty)
    }

    pub fn record_class(&self, id: TweakId) -> Option<&RecordClass> {
        self.records.get(&id).map(|record| &record.class)
    }

    /// How often a record has been re-published.
    pub fn record_updates(&self, id: TweakId) -> usize {
        self.records.get(&id).map_or(0, |record| record.updates)
    }

    pub fn name(&self, id: TweakId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    /// Makes every following write to `id` fail, whether to a flat or a record.
    pub fn reject_writes_to(&mut self, id: TweakId) {
        self.rejected.insert(id);
    }

    fn check_writable(&self, id: TweakId) -> Result<(), MemoryError> {
        if self.rejected.contains(&id) {
            Err(MemoryError::Rejected { id })
        } else {
            Ok(())
        }
    }

    /// Creates the flats of a record that don't exist yet, copying from `source`'s flats where
    /// it has them.
    fn create_flats(&mut self, id: TweakId, class: &RecordClass, source: Option<TweakId>) {
        for (property, ty) in class.properties() {
            let suffix = format!(".{property}");
            let flat = id.with_suffix(&suffix);
            if self.flats.contains_key(&flat) {
                continue;
            }

            let value = source
                .and_then(|source| self.flats.get(&source.with_suffix(&suffix)))
                .filter(|(source_ty, _)| source_ty == ty)
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| self.reflection.construct(ty));
            self.flats.insert(flat, (ty.clone(), value));
        }
    }
}

impl Store for MemoryStore {
    type Reflection = MemoryReflection;
    type Error = MemoryError;

    fn reflection(&self) -> &MemoryReflection {
        &self.reflection
    }

    fn start_batch(&mut self) {
        self.in_batch = true;
    }

    fn commit_batch(&mut self) {
        self.in_batch = false;
        self.batches_committed += 1;
    }

    fn register_name(&mut self, id: TweakId, name: &str) {
        self.names.insert(id, name.to_string());
    }

    fn flat(&self, id: TweakId) -> Option<(&ValueType, &Value)> {
        self.flats.get(&id).map(|(ty, value)| (ty, value))
    }

    fn set_flat(&mut self, id: TweakId, ty: &ValueType, value: &Value) -> Result<(), MemoryError> {
        self.check_writable(id)?;

        if !value.conforms_to(ty) {
            return Err(MemoryError::TypeMismatch { ty: ty.clone() });
        }

        if let Some((declared, _)) = self.flats.get(&id)
            && declared != ty
        {
            return Err(MemoryError::TypeChanged {
                id,
                declared: declared.clone(),
                ty: ty.clone(),
            });
        }

        self.flats.insert(id, (ty.clone(), value.clone()));
        Ok(())
    }

    fn record_exists(&self, id: TweakId) -> bool {
        self.records.contains_key(&id)
    }

    fn create_record(&mut self, id: TweakId, ty: &RecordClass) -> Result<(), MemoryError> {
        self.check_writable(id)?;

        if self.records.contains_key(&id) {
            return Err(MemoryError::RecordExists { id });
        }

        self.insert_record(id, ty.clone());
        Ok(())
    }

    fn clone_record(&mut self, id: TweakId, source: TweakId) -> Result<(), MemoryError> {
        self.check_writable(id)?;

        if self.records.contains_key(&id) {
            return Err(MemoryError::RecordExists { id });
        }

        let Some(class) = self.records.get(&source).map(|record| record.class.clone()) else {
            return Err(MemoryError::MissingRecord { id: source });
        };

        self.create_flats(id, &class, Some(source));
        self.records.insert(id, StoredRecord { class, updates: 0 });
        Ok(())
    }

    fn update_record(&mut self, id: TweakId) -> Result<(), MemoryError> {
        self.check_writable(id)?;

        let record = self
            .records
            .get_mut(&id)
            .ok_or(MemoryError::MissingRecord { id })?;
        record.updates += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ArrayChange {
    Inserted {
        flat: TweakId,
        index: usize,
        value: Value,
    },
    Deleted {
        flat: TweakId,
        index: usize,
        value: Value,
    },
}

/// A [`Changelog`] that reverts the array edits of the previous commit.
///
/// Reverting undoes the recorded insertions and deletions in reverse order, which restores every
/// touched array exactly as long as nothing else edited it in between, then re-publishes the
/// records owning those arrays. Foreign keys are kept until the next commit asks to forget them;
/// associations and names are kept for good.
///
/// ```rust
/// use tweakset::{
///     Changeset, TweakId,
///     memory::{MemoryReflection, MemoryStore, UndoLog, Value, ValueType},
/// };
///
/// let tags = TweakId::from_name("Items.Jacket.tags");
/// let mut store = MemoryStore::new();
/// store.insert_flat(tags, ValueType::array(ValueType::Int), Value::array([1]));
///
/// let mut undo = UndoLog::new();
/// let mut changeset = Changeset::<MemoryReflection>::new();
/// changeset.append_element(tags, ValueType::Int, Value::Int(2), false).unwrap();
/// changeset.commit_with(&mut store, &mut undo);
/// assert_eq!(store.flat_value(tags), Some(&Value::array([1, 2])));
///
/// // The next commit starts by reverting the last one.
/// changeset.append_element(tags, ValueType::Int, Value::Int(3), false).unwrap();
/// changeset.commit_with(&mut store, &mut undo);
/// assert_eq!(store.flat_value(tags), Some(&Value::array([1, 3])));
/// ```
#[derive(Debug, Default)]
pub struct UndoLog {
    changes: Vec<ArrayChange>,
    foreign_keys: BTreeSet<TweakId>,
    associations: BTreeMap<TweakId, TweakId>,
    names: BTreeMap<TweakId, String>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether there are no array edits left to revert.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of recorded insertions and deletions.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = TweakId> + '_ {
        self.foreign_keys.iter().copied()
    }

    pub fn is_foreign_key(&self, id: TweakId) -> bool {
        self.foreign_keys.contains(&id)
    }

    pub fn associated_record(&self, flat: TweakId) -> Option<TweakId> {
        self.associations.get(&flat).copied()
    }

    pub fn name(&self, id: TweakId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    fn describe(&self, id: TweakId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn revert(&self, store: &mut MemoryStore, change: &ArrayChange) -> bool {
        let (ArrayChange::Inserted { flat, .. } | ArrayChange::Deleted { flat, .. }) = change;
        let Some((_, Value::Array(elements))) = store.flats.get_mut(flat) else {
            warn!(flat = %self.describe(*flat), "cannot revert change, the array is gone");
            return false;
        };

        match change {
            ArrayChange::Inserted { index, value, .. } => {
                // fall back to the first equal element if the array moved underneath us
                let position = if elements.get(*index) == Some(value) {
                    Some(*index)
                } else {
                    elements.iter().position(|element| element == value)
                };
                match position {
                    Some(position) => {
                        elements.remove(position);
                    }
                    None => {
                        warn!(flat = %self.describe(*flat), ?value, "cannot revert insertion");
                        return false;
                    }
                }
            }
            ArrayChange::Deleted { index, value, .. } => {
                let index = (*index).min(elements.len());
                elements.insert(index, value.clone());
            }
        }

        true
    }
}

impl Changelog<MemoryStore> for UndoLog {
    fn revert_changes(&mut self, store: &mut MemoryStore) {
        if self.changes.is_empty() {
            return;
        }

        debug!(changes = self.changes.len(), "reverting previous commit");

        let changes = std::mem::take(&mut self.changes);
        let mut touched = BTreeSet::new();
        for change in changes.iter().rev() {
            if self.revert(store, change) {
                let (ArrayChange::Inserted { flat, .. } | ArrayChange::Deleted { flat, .. }) =
                    change;
                touched.insert(*flat);
            }
        }

        let records: BTreeSet<_> = touched
            .iter()
            .filter_map(|flat| self.associations.get(flat).copied())
            .collect();
        for record in records {
            if let Err(error) = store.update_record(record) {
                warn!(record = %self.describe(record), %error, "cannot re-publish record");
            }
        }
    }

    fn forget_foreign_keys(&mut self) {
        self.foreign_keys.clear();
    }

    fn register_foreign_key(&mut self, id: TweakId) {
        self.foreign_keys.insert(id);
    }

    fn register_deletion(&mut self, flat: TweakId, index: usize, value: &Value) {
        self.changes.push(ArrayChange::Deleted {
            flat,
            index,
            value: value.clone(),
        });
    }

    fn register_insertion(&mut self, flat: TweakId, index: usize, value: &Value) {
        self.changes.push(ArrayChange::Inserted {
            flat,
            index,
            value: value.clone(),
        });
    }

    fn associate_record(&mut self, record: TweakId, flat: TweakId) {
        self.associations.insert(flat, record);
    }

    fn register_name(&mut self, id: TweakId, name: &str) {
        self.names.insert(id, name.to_string());
    }
}
