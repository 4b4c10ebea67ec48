//! Per-address session locks.
//!
//! Every load, mutate and persist cycle on a session must run while holding
//! the lock for the peer address. The locks are reentrant so an entry point
//! can take the lock even when the caller already holds it on the same
//! thread.

use crate::storage::ProtocolAddress;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to the lock guarding one address.
#[derive(Clone, Default)]
pub struct SessionLock(Arc<ReentrantMutex<()>>);

impl SessionLock {
    /// Blocks until the lock is held by the current thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.0.lock()
    }
}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("locked", &self.0.is_locked())
            .finish()
    }
}

/// Lazily populated map from address to its [`SessionLock`].
///
/// Entries are never dropped on their own; call [`remove`](Self::remove)
/// when a peer's sessions are torn down.
#[derive(Default)]
pub struct SessionLockRegistry {
    locks: Mutex<HashMap<ProtocolAddress, SessionLock>>,
}

impl SessionLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `address`, creating it on first use.
    pub fn lock_for(&self, address: &ProtocolAddress) -> SessionLock {
        self.locks.lock().entry(*address).or_default().clone()
    }

    /// Runs `f` while holding the lock for `address`.
    pub fn with_lock<T>(&self, address: &ProtocolAddress, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(address);
        let _guard = lock.lock();
        f()
    }

    /// Forgets the lock for `address`. Handles already returned by
    /// [`lock_for`](Self::lock_for) stay valid but no longer exclude callers
    /// that look the address up afterwards, so only remove an address
    /// nobody is using.
    pub fn remove(&self, address: &ProtocolAddress) -> bool {
        self.locks.lock().remove(address).is_some()
    }

    /// Number of addresses currently in the registry.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

impl fmt::Debug for SessionLockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLockRegistry")
            .field("addresses", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use uuid::Uuid;

    fn address(n: u128) -> ProtocolAddress {
        ProtocolAddress::new(Uuid::from_u128(n), Uuid::from_u128(n + 1000))
    }

    #[test]
    fn test_lock_is_reentrant() {
        let registry = SessionLockRegistry::new();
        let alice = address(1);

        let result = registry.with_lock(&alice, || registry.with_lock(&alice, || 7));
        assert_eq!(result, 7);
    }

    #[test]
    fn test_same_address_shares_lock() {
        let registry = SessionLockRegistry::new();
        let alice = address(1);

        let first = registry.lock_for(&alice);
        let second = registry.lock_for(&alice);
        assert!(Arc::ptr_eq(&first.0, &second.0));
        assert_eq!(registry.len(), 1);

        let other = registry.lock_for(&address(2));
        assert!(!Arc::ptr_eq(&first.0, &other.0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_forgets_address() {
        let registry = SessionLockRegistry::new();
        let alice = address(1);

        let first = registry.lock_for(&alice);
        registry.lock_for(&address(2));
        assert!(registry.remove(&alice));
        assert!(!registry.remove(&alice));
        assert_eq!(registry.len(), 1);

        let second = registry.lock_for(&alice);
        assert!(!Arc::ptr_eq(&first.0, &second.0));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_other_address_not_blocked() {
        let registry = Arc::new(SessionLockRegistry::new());
        let alice = address(1);
        let bob = address(2);

        let alice_lock = registry.lock_for(&alice);
        let _held = alice_lock.lock();

        let registry_clone = Arc::clone(&registry);
        let handle = thread::spawn(move || registry_clone.with_lock(&bob, || true));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_lock_serializes_threads() {
        let registry = Arc::new(SessionLockRegistry::new());
        let alice = address(1);
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    registry.with_lock(&alice, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
