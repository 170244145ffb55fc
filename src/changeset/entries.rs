use crate::TweakId;

/// A pending full replacement of a flat's value.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatEntry<T, V> {
    pub ty: T,
    pub value: V,
}

/// A pending record operation.
///
/// With a type and no source the record is created fresh, with a source it is cloned. An entry
/// with neither only forces an existing record to be re-published.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry<RT> {
    pub ty: Option<RT>,
    pub source: Option<TweakId>,
}

impl<RT> Default for RecordEntry<RT> {
    fn default() -> Self {
        Self {
            ty: None,
            source: None,
        }
    }
}

/// One requested append or prepend.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionEntry<T, V> {
    pub ty: T,
    pub value: V,
    /// Skip the insertion if an equal element is already present when it is applied.
    pub unique: bool,
}

/// One requested removal by value.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionEntry<T, V> {
    pub ty: T,
    pub value: V,
}

/// A request to copy all elements of another array flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergingEntry {
    pub source: TweakId,
}

/// All relative edits requested for one array flat.
#[derive(Debug, Clone, PartialEq)]
pub struct AlteringEntry<T, V> {
    pub appendings: Vec<InsertionEntry<T, V>>,
    pub prependings: Vec<InsertionEntry<T, V>>,
    pub deletions: Vec<DeletionEntry<T, V>>,
    pub appending_merges: Vec<MergingEntry>,
    pub prepending_merges: Vec<MergingEntry>,
    /// The alteration these edits are applied on top of.
    pub base: Option<TweakId>,
}

impl<T, V> Default for AlteringEntry<T, V> {
    fn default() -> Self {
        Self {
            appendings: Vec::new(),
            prependings: Vec::new(),
            deletions: Vec::new(),
            appending_merges: Vec::new(),
            prepending_merges: Vec::new(),
            base: None,
        }
    }
}
