use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per user id. Every read-modify-write of a user's
/// documents holds that user's guard for its whole duration.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_user_turns_are_serialized() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.acquire("u1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire after release")
            .expect("waiter task");
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLocks::new();
        let _a = locks.acquire("a").await;
        tokio::time::timeout(Duration::from_millis(100), locks.acquire("b"))
            .await
            .expect("other user is independent");
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = UserLocks::new();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        let _c = locks.acquire("c").await;
        assert_eq!(locks.tracked(), 1);
    }
}
