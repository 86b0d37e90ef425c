use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use prometheus::IntGauge;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::AppError;

/// Ephemeral per-order matching state. Never persisted.
#[derive(Debug)]
pub struct DispatchLock {
    locked: bool,
    assigned_to: Option<Uuid>,
    notified: Vec<Uuid>,
    declined: HashSet<Uuid>,
    running: bool,
    signal: Arc<Notify>,
}

impl DispatchLock {
    fn new() -> Self {
        Self {
            locked: false,
            assigned_to: None,
            notified: Vec::new(),
            declined: HashSet::new(),
            running: false,
            signal: Arc::new(Notify::new()),
        }
    }
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct LockSnapshot {
    pub locked: bool,
    pub assigned_to: Option<Uuid>,
    pub notified: Vec<Uuid>,
    pub running: bool,
}

#[derive(Debug)]
pub enum Claim<T> {
    Won(T),
    Taken { by: Option<Uuid> },
}

/// Held by a matching run. Dropping it ends the run, including when the
/// run's future is dropped before finishing.
pub struct RunGuard {
    locks: DispatchLocks,
    order_id: Uuid,
    signal: Arc<Notify>,
}

impl RunGuard {
    /// Wakes on accept, decline, release and cancel.
    pub fn signal(&self) -> &Notify {
        &self.signal
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.end_run(self.order_id);
    }
}

/// Process-wide dispatch locks keyed by order id.
#[derive(Clone)]
pub struct DispatchLocks {
    inner: Arc<DashMap<Uuid, DispatchLock>>,
    active: IntGauge,
}

impl DispatchLocks {
    pub fn new(active: IntGauge) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            active,
        }
    }

    fn entry(&self, order_id: Uuid) -> RefMut<'_, Uuid, DispatchLock> {
        match self.inner.entry(order_id) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                self.active.inc();
                entry.insert(DispatchLock::new())
            }
        }
    }

    /// Marks a matching run as in progress. Each run starts with an empty
    /// notified list, so couriers missed by an earlier run are offered the
    /// order again.
    pub fn begin_run(&self, order_id: Uuid) -> Result<RunGuard, AppError> {
        let mut lock = self.entry(order_id);
        if lock.locked {
            return Err(AppError::Conflict(format!("order {order_id} already taken")));
        }
        if lock.running {
            return Err(AppError::Conflict(format!(
                "matching already in progress for order {order_id}"
            )));
        }

        lock.running = true;
        lock.notified.clear();
        lock.declined.clear();
        Ok(RunGuard {
            locks: self.clone(),
            order_id,
            signal: lock.signal.clone(),
        })
    }

    fn end_run(&self, order_id: Uuid) {
        if let Some(mut lock) = self.inner.get_mut(&order_id) {
            lock.running = false;
        }
    }

    pub fn record_notified(&self, order_id: Uuid, courier_id: Uuid) {
        if let Some(mut lock) = self.inner.get_mut(&order_id) {
            lock.notified.push(courier_id);
        }
    }

    pub fn is_locked(&self, order_id: Uuid) -> bool {
        self.inner
            .get(&order_id)
            .map(|lock| lock.locked)
            .unwrap_or(false)
    }

    pub fn has_declined(&self, order_id: Uuid, courier_id: Uuid) -> bool {
        self.inner
            .get(&order_id)
            .map(|lock| lock.declined.contains(&courier_id))
            .unwrap_or(false)
    }

    /// Records a courier passing on the order and wakes the matching run so it
    /// can move on without waiting out the deadline.
    pub fn decline(&self, order_id: Uuid, courier_id: Uuid) {
        if let Some(mut lock) = self.inner.get_mut(&order_id) {
            lock.declined.insert(courier_id);
            lock.signal.notify_one();
        }
    }

    /// Wakes the matching run so it re-checks the order.
    pub fn wake(&self, order_id: Uuid) {
        if let Some(lock) = self.inner.get(&order_id) {
            lock.signal.notify_one();
        }
    }

    /// First-accept-wins. The test-and-set and `commit` run under the same
    /// entry guard, so no other caller can observe the lock between the two.
    /// `commit` failing leaves the lock untouched.
    pub fn claim<T>(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        commit: impl FnOnce() -> Result<T, AppError>,
    ) -> Result<Claim<T>, AppError> {
        let mut lock = self.entry(order_id);
        if lock.locked {
            return Ok(Claim::Taken {
                by: lock.assigned_to,
            });
        }

        let committed = commit()?;

        lock.locked = true;
        lock.assigned_to = Some(courier_id);
        lock.signal.notify_one();
        Ok(Claim::Won(committed))
    }

    /// Drops the lock and wakes any run still waiting on it.
    pub fn release(&self, order_id: Uuid) {
        if let Some((_, lock)) = self.inner.remove(&order_id) {
            lock.signal.notify_one();
            self.active.dec();
        }
    }

    /// Drops a lock nobody is matching on or has claimed.
    pub fn discard_idle(&self, order_id: Uuid) {
        let removed = self.inner.remove_if(&order_id, |_, lock| {
            !lock.locked && !lock.running && lock.notified.is_empty()
        });
        if removed.is_some() {
            self.active.dec();
        }
    }

    /// Removes a claimed lock once the retention window passes. The persisted
    /// order is the source of truth from the moment of the claim.
    pub fn schedule_release(&self, order_id: Uuid, courier_id: Uuid, after: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(order_id = %order_id, "no runtime to expire dispatch lock");
            return;
        };
        let inner = self.inner.clone();
        let active = self.active.clone();

        runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let removed = inner.remove_if(&order_id, |_, lock| {
                lock.locked && lock.assigned_to == Some(courier_id)
            });
            if removed.is_some() {
                active.dec();
                tracing::debug!(order_id = %order_id, "dispatch lock expired");
            }
        });
    }

    #[cfg(test)]
    pub fn snapshot(&self, order_id: Uuid) -> Option<LockSnapshot> {
        self.inner.get(&order_id).map(|lock| LockSnapshot {
            locked: lock.locked,
            assigned_to: lock.assigned_to,
            notified: lock.notified.clone(),
            running: lock.running,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use prometheus::IntGauge;
    use uuid::Uuid;

    use super::{Claim, DispatchLocks};
    use crate::error::AppError;

    fn locks() -> DispatchLocks {
        DispatchLocks::new(IntGauge::new("test_locks", "test").unwrap())
    }

    #[test]
    fn second_claim_sees_the_first_winner() {
        let locks = locks();
        let order = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let won = locks.claim(order, first, || Ok(())).unwrap();
        assert!(matches!(won, Claim::Won(())));

        let commits = AtomicUsize::new(0);
        let lost = locks
            .claim(order, second, || {
                commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(matches!(lost, Claim::Taken { by: Some(by) } if by == first));
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_commit_leaves_lock_open() {
        let locks = locks();
        let order = Uuid::new_v4();

        let err = locks
            .claim(order, Uuid::new_v4(), || -> Result<(), AppError> {
                Err(AppError::Conflict("gone".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(!locks.is_locked(order));

        let retry = locks.claim(order, Uuid::new_v4(), || Ok(())).unwrap();
        assert!(matches!(retry, Claim::Won(())));
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let locks = Arc::new(locks());
        let order = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let locks = locks.clone();
                std::thread::spawn(move || {
                    matches!(
                        locks.claim(order, Uuid::new_v4(), || Ok(())).unwrap(),
                        Claim::Won(())
                    )
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn only_one_run_per_order() {
        let locks = locks();
        let order = Uuid::new_v4();

        let run = locks.begin_run(order).unwrap();
        assert!(matches!(locks.begin_run(order), Err(AppError::Conflict(_))));

        drop(run);
        assert!(locks.begin_run(order).is_ok());
    }

    #[test]
    fn each_run_starts_with_no_notified_couriers() {
        let locks = locks();
        let order = Uuid::new_v4();
        let courier = Uuid::new_v4();

        let first = locks.begin_run(order).unwrap();
        locks.record_notified(order, courier);
        locks.decline(order, courier);
        drop(first);
        assert_eq!(locks.snapshot(order).unwrap().notified, vec![courier]);

        let _second = locks.begin_run(order).unwrap();
        let snapshot = locks.snapshot(order).unwrap();
        assert!(snapshot.running);
        assert!(snapshot.notified.is_empty());
        assert!(!locks.has_declined(order, courier));
    }

    #[tokio::test(start_paused = true)]
    async fn claimed_lock_is_dropped_after_retention() {
        let locks = locks();
        let order = Uuid::new_v4();
        let courier = Uuid::new_v4();

        locks.claim(order, courier, || Ok(())).unwrap();
        locks.schedule_release(order, courier, Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(locks.is_locked(order));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(locks.snapshot(order).is_none());
        assert!(locks.is_empty());
    }
}
