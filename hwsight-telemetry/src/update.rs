//! Identity-based refresh of previously collected entities.
//!
//! An entity keeps its identity across refreshes only while its identity key
//! is unchanged. Entities whose key no longer appears are gone: they are
//! dropped, never patched with placeholder values.

use hwsight_common::model::{HWDiskStore, OSProcess};
use tracing::debug;

/// An entity that can be matched against a later collection pass.
pub trait Identity {
    type Key: PartialEq;

    fn identity_key(&self) -> Self::Key;
}

impl Identity for HWDiskStore {
    /// Exact match on name, model, serial and size. A disk whose reported
    /// size changes is treated as a different disk.
    type Key = (String, String, String, u64);

    fn identity_key(&self) -> Self::Key {
        (
            self.name.clone(),
            self.model.clone(),
            self.serial.clone(),
            self.size,
        )
    }
}

impl Identity for OSProcess {
    /// Pid plus the unclamped start time, so a recycled pid is a different
    /// process while a young one keeps its identity.
    type Key = (u32, u64);

    fn identity_key(&self) -> Self::Key {
        (self.process_id, self.raw_start_time)
    }
}

/// Pick the candidate with the same identity as `existing`.
///
/// Returns `None` when the entity has disappeared.
pub fn update_by_identity<T, I>(existing: &T, candidates: I) -> Option<T>
where
    T: Identity,
    I: IntoIterator<Item = T>,
{
    let key = existing.identity_key();
    let found = candidates.into_iter().find(|c| c.identity_key() == key);
    if found.is_none() {
        debug!("Entity no longer present on refresh");
    }
    found
}

/// Replace `held` with the fresh entities that match it by identity, in the
/// order they were held. Held entities with no match are dropped; fresh
/// entities not previously held are appended.
///
/// Returns the number of held entities that disappeared.
pub fn reconcile<T: Identity>(held: &mut Vec<T>, fresh: Vec<T>) -> usize {
    let mut fresh: Vec<Option<T>> = fresh.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(fresh.len());
    let mut gone = 0;

    for old in held.drain(..) {
        let key = old.identity_key();
        let slot = fresh
            .iter_mut()
            .find(|f| f.as_ref().is_some_and(|f| f.identity_key() == key));
        match slot.and_then(Option::take) {
            Some(updated) => merged.push(updated),
            None => gone += 1,
        }
    }
    merged.extend(fresh.into_iter().flatten());
    *held = merged;
    gone
}
