use std::sync::{Mutex, MutexGuard, PoisonError};

use super::persist::Persistence;
use super::types::{StateDocument, StoreError};

// ============================================================================
// Subscription Store
// ============================================================================

/// In-memory [`StateDocument`] mirrored to a [`Persistence`] provider.
///
/// Every mutation runs against a copy of the document; the copy is saved and
/// only then becomes the live document. A failed save therefore leaves both
/// memory and disk at the previous state, and a read after a successful write
/// always observes it.
///
/// The lock is only held around a single read-modify-write and never across
/// network I/O.
pub struct SubscriptionStore {
    doc: Mutex<StateDocument>,
    persistence: Box<dyn Persistence>,
}

impl SubscriptionStore {
    /// Loads the document, writing a default one if nothing was stored yet.
    pub fn open(persistence: impl Persistence + 'static) -> Result<Self, StoreError> {
        let doc = match persistence.load()? {
            Some(doc) => doc,
            None => {
                let doc = StateDocument::default();
                persistence.save(&doc)?;
                tracing::info!("Initialized empty subscription state");
                doc
            }
        };

        tracing::debug!(
            feeds = doc.feeds.len(),
            endpoints = doc.rsshub_endpoints.len(),
            "Loaded subscription state"
        );

        Ok(Self {
            doc: Mutex::new(doc),
            persistence: Box::new(persistence),
        })
    }

    /// Copy of the whole document.
    pub fn snapshot(&self) -> StateDocument {
        self.lock().clone()
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, StateDocument> {
        // A panic mid-mutation never touches the live document, so a
        // poisoned lock still guards consistent data.
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn read<T>(&self, f: impl FnOnce(&StateDocument) -> T) -> T {
        f(&self.lock())
    }

    /// Applies `f` to a copy of the document and persists the result.
    ///
    /// Nothing is saved when `f` fails.
    pub(super) fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StateDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let value = f(&mut next)?;
        self.commit(&mut guard, next)?;
        Ok(value)
    }

    /// Saves `next` and makes it the live document.
    pub(super) fn commit(
        &self,
        guard: &mut MutexGuard<'_, StateDocument>,
        next: StateDocument,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persistence.save(&next) {
            tracing::error!(error = %e, "Failed to persist subscription state");
            return Err(e.into());
        }
        **guard = next;
        Ok(())
    }
}
