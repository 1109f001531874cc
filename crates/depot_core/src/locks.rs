use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::session::SessionId;

/// Per-session reader/writer locks shared by every clone of a manager.
///
/// Chunk writes hold the read side for a session, the finalize claim holds the write side, so a
/// claim is only taken once no chunk write for that session is in flight. Entries are dropped
/// once nothing holds their lock.
#[derive(Clone, Default)]
pub(crate) struct SessionLocks {
    locks: Arc<Mutex<HashMap<SessionId, Weak<RwLock<()>>>>>,
}

impl SessionLocks {
    pub(crate) async fn read(&self, id: &SessionId) -> OwnedRwLockReadGuard<()> {
        self.lock_for(id).read_owned().await
    }

    pub(crate) async fn write(&self, id: &SessionId) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(id).write_owned().await
    }

    fn lock_for(&self, id: &SessionId) -> Arc<RwLock<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(lock) = locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }
        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(RwLock::new(()));
        locks.insert(*id, Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
