// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Error types.
//!
//! [`ChangesetError`] is returned synchronously by the accumulation API and means nothing was
//! recorded. The other errors only ever occur inside a commit, where they are logged and the
//! offending item is skipped.
use crate::TweakId;
use thiserror::Error;

/// A mutation was rejected by the changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChangesetError {
    /// The id is the reserved invalid id.
    #[error("invalid id {id}")]
    InvalidId { id: TweakId },

    /// [`Changeset::inherit_changes`](crate::Changeset::inherit_changes) named a base that has no
    /// pending alteration.
    #[error("cannot inherit changes of {base} into {flat}: base has no pending changes")]
    MissingBase { flat: TweakId, base: TweakId },
}

/// The inheritance chain of an alteration could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Following base links from `flat` leads back to `at`.
    #[error("inheritance cycle: {flat} reaches {at} twice")]
    Cycle { flat: TweakId, at: TweakId },
}

/// An array flat was skipped during commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum AlterError {
    #[error("the flat doesn't exist")]
    MissingFlat,

    #[error("it's not an array but {type_name}")]
    NotAnArray { type_name: String },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("the store rejected the new value: {reason}")]
    Write { reason: String },
}
