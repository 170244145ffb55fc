use super::{AlteringEntry, describe};
use crate::{Map, TweakId, create_set, error::ChainError};
use smallvec::SmallVec;
use tracing::debug;

/// Alterations applied to one array, from the most general ancestor (level 0) to the
/// alteration of the array itself (last level).
pub(super) type Chain<'c, T, V> = SmallVec<[&'c AlteringEntry<T, V>; 4]>;

/// Follows the base links of `flat`'s alteration.
///
/// A base without a pending alteration ends the chain; that happens when the base's edits were
/// superseded by a full replacement after the link was made.
pub(super) fn resolve<'c, T, V>(
    alterings: &'c Map<TweakId, AlteringEntry<T, V>>,
    names: &Map<TweakId, String>,
    flat: TweakId,
) -> Result<Chain<'c, T, V>, ChainError> {
    let mut chain = Chain::new();
    let Some(entry) = alterings.get(&flat) else {
        return Ok(chain);
    };

    let mut visited = create_set();
    visited.insert(flat);
    chain.push(entry);

    let mut next = entry.base;
    while let Some(base) = next {
        if !visited.insert(base) {
            return Err(ChainError::Cycle { flat, at: base });
        }

        let Some(entry) = alterings.get(&base) else {
            debug!(
                flat = %describe(names, flat),
                base = %describe(names, base),
                "base has no pending changes, chain ends"
            );
            break;
        };

        chain.push(entry);
        next = entry.base;
    }

    chain.reverse();
    Ok(chain)
}
