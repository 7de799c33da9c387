use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rankpulse_core::SeriesKey;
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<SeriesKey, Arc<tokio::sync::Mutex<()>>>;

/// One async mutex per `(entity, category)` series so detection for a series
/// never runs twice at once.
///
/// Entries live only while a guard is held or a task is waiting, so the map
/// stays as small as the set of series being worked on.
#[derive(Debug, Default)]
pub(crate) struct SeriesLocks {
    locks: Mutex<LockMap>,
}

impl SeriesLocks {
    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn acquire(&self, key: &SeriesKey) -> SeriesGuard<'_> {
        let lock = Arc::clone(self.map().entry(key.clone()).or_default());
        SeriesGuard {
            held: Some(lock.lock_owned().await),
            key: key.clone(),
            locks: self,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// Holds one series lock; dropping it removes the entry when nobody else
/// holds or waits on it.
pub(crate) struct SeriesGuard<'a> {
    held: Option<OwnedMutexGuard<()>>,
    key: SeriesKey,
    locks: &'a SeriesLocks,
}

impl Drop for SeriesGuard<'_> {
    fn drop(&mut self) {
        // Release first so our own clone no longer counts.
        drop(self.held.take());
        let mut map = self.locks.map();
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}
