use crate::error::ErrorCode;
use crate::model::UserId;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

/// Per-user lock errors.
#[derive(Debug)]
pub enum LockError {
    Timeout { user: UserId, waited: Duration },
    Poisoned,
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Poisoned => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { user, waited } => {
                write!(
                    f,
                    "{}: lock for user {} timed out after {:?}",
                    self.code().code(),
                    user,
                    waited
                )
            }
            Self::Poisoned => write!(f, "{}: user lock table poisoned", self.code().code()),
        }
    }
}

impl std::error::Error for LockError {}

/// Table of per-user mutual-exclusion slots.
///
/// Different users never share a slot, so updates for one user never wait on
/// another. Slots are created on first use and dropped when the last guard
/// releases with no other thread waiting on them.
#[derive(Debug, Default)]
pub struct UserLocks {
    slots: Mutex<HashMap<UserId, Arc<AtomicBool>>>,
}

impl UserLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive slot for `user`, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the slot stays held past `timeout`.
    pub fn acquire(&self, user: &UserId, timeout: Duration) -> Result<UserGuard<'_>, LockError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| LockError::Poisoned)?;
            Arc::clone(slots.entry(user.clone()).or_default())
        };

        let start = Instant::now();
        loop {
            if slot
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(UserGuard {
                    locks: self,
                    slot,
                    user: user.clone(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    user: user.clone(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// RAII guard for one user's slot. Release happens on drop.
#[derive(Debug)]
pub struct UserGuard<'a> {
    locks: &'a UserLocks,
    slot: Arc<AtomicBool>,
    user: UserId,
}

impl UserGuard<'_> {
    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }

    /// The user this guard serializes.
    #[must_use]
    pub const fn user(&self) -> &UserId {
        &self.user
    }
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        // Waiters clone the slot under the table lock, so holding it here
        // makes the count check and the removal atomic with respect to them.
        match self.locks.slots.lock() {
            Ok(mut slots) => {
                self.slot.store(false, Ordering::Release);
                // One reference in the table, one in this guard.
                if Arc::strong_count(&self.slot) == 2 {
                    slots.remove(&self.user);
                }
            }
            Err(_) => self.slot.store(false, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LockError, UserLocks};
    use crate::error::ErrorCode;
    use crate::model::UserId;
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn acquire_and_release() -> Result<(), LockError> {
        let locks = UserLocks::new();
        let user = UserId::new("ana");
        let guard = locks.acquire(&user, Duration::from_millis(50))?;
        assert_eq!(guard.user(), &user);
        guard.release();
        let _again = locks.acquire(&user, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn released_slots_leave_the_table() -> Result<(), LockError> {
        let locks = UserLocks::new();
        for i in 0..100 {
            let _guard = locks.acquire(&UserId::new(format!("member-{i}")), Duration::from_millis(50))?;
        }
        assert!(locks.slots.lock().unwrap().is_empty());

        let held = locks.acquire(&UserId::new("ana"), Duration::from_millis(50))?;
        assert_eq!(locks.slots.lock().unwrap().len(), 1);
        held.release();
        assert!(locks.slots.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn slot_survives_release_while_another_thread_waits() -> Result<(), LockError> {
        let locks = Arc::new(UserLocks::new());
        let user = UserId::new("ana");
        let guard = locks.acquire(&user, Duration::from_millis(50))?;

        let waiter = {
            let locks = Arc::clone(&locks);
            let user = user.clone();
            thread::spawn(move || locks.acquire(&user, Duration::from_secs(2)).map(|g| g.release()))
        };
        // Wait until the waiter has cloned the slot.
        while Arc::strong_count(&locks.slots.lock().unwrap()[&user]) < 3 {
            thread::yield_now();
        }
        guard.release();

        waiter.join().unwrap()?;
        assert!(locks.slots.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn held_slot_times_out() {
        let locks = UserLocks::new();
        let user = UserId::new("ana");
        let _guard = locks.acquire(&user, Duration::from_millis(50)).unwrap();
        let err = locks.acquire(&user, Duration::from_millis(20)).unwrap_err();

        assert!(matches!(err, LockError::Timeout { user: ref u, .. } if *u == user));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }

    #[test]
    fn different_users_do_not_contend() -> Result<(), LockError> {
        let locks = UserLocks::new();
        let _a = locks.acquire(&UserId::new("ana"), Duration::from_millis(50))?;
        let _b = locks.acquire(&UserId::new("bo"), Duration::from_millis(1))?;
        Ok(())
    }

    #[test]
    fn contention_is_resolved_after_holder_releases() -> Result<(), LockError> {
        let locks = Arc::new(UserLocks::new());
        let user = UserId::new("ana");

        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let handle = {
            let locks = Arc::clone(&locks);
            let user = user.clone();
            let held = Arc::clone(&held);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let _guard = locks.acquire(&user, Duration::from_millis(200)).unwrap();
                held.wait();
                release.wait();
            })
        };

        held.wait();
        assert!(matches!(
            locks.acquire(&user, Duration::from_millis(20)),
            Err(LockError::Timeout { .. })
        ));
        release.wait();
        handle.join().unwrap();

        let follow_up = locks.acquire(&user, Duration::from_millis(50))?;
        follow_up.release();
        Ok(())
    }
}
