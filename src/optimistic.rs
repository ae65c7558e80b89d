//! Optimistic local state.
//!
//! A mutation snapshots the local value, writes its predicted value right
//! away, then awaits the remote call. Failure restores the snapshot; success
//! replaces the prediction with what the remote confirmed. Every local write
//! stamps a generation, and a late rollback or reconcile only lands while its
//! generation is still the newest for that key. An outcome that cannot land
//! is handed to the next pending mutation of the same key as its rollback
//! base, so a later rollback restores confirmed state instead of a stale
//! prediction.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::repo::{RepoError, RepoResult};

/// Transient, user-facing message for a failed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MutationError {
    pub error: RepoError,
    /// False when a newer mutation owned the key and the snapshot was not restored.
    pub rolled_back: bool,
}

impl MutationError {
    pub fn notice(&self) -> Notice {
        let (message, retryable) = match &self.error {
            RepoError::Unavailable(_) => ("Couldn't reach the server. Your change was undone, please try again.", true),
            RepoError::Forbidden => ("You don't have permission to do that.", false),
            RepoError::NotFound => ("This item no longer exists.", false),
            RepoError::Conflict => ("That change conflicts with the current state. Refresh and try again.", false),
            RepoError::Internal(_) => ("Something went wrong. Your change was undone.", false),
        };
        Notice { message: message.to_string(), retryable }
    }
}

struct Slot<V> {
    value: Option<V>,
    generation: u64,
    /// In-flight mutations in generation order, with the value each restores on failure.
    pending: Vec<Pending<V>>,
}

struct Pending<V> {
    generation: u64,
    base: Option<V>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self { value: None, generation: 0, pending: Vec::new() }
    }

    fn take_pending(&mut self, generation: u64) -> Option<Pending<V>> {
        let idx = self.pending.iter().position(|p| p.generation == generation)?;
        Some(self.pending.remove(idx))
    }

    // The oldest mutation still in flight after `generation` inherits `base`.
    fn hand_off(&mut self, generation: u64, base: Option<V>) -> bool {
        match self.pending.iter_mut().find(|p| p.generation > generation) {
            Some(next) => {
                next.base = base;
                true
            }
            None => false,
        }
    }
}

pub struct OptimisticMutator<K, V> {
    slots: DashMap<K, Slot<V>>,
    generations: AtomicU64,
}

impl<K, V> Default for OptimisticMutator<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> OptimisticMutator<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self { slots: DashMap::new(), generations: AtomicU64::new(0) }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Store a freshly fetched value. Pending rollbacks for `key` become stale.
    pub fn seed(&self, key: K, value: V) {
        let generation = self.next_generation();
        self.slots.insert(key, Slot { value: Some(value), generation, pending: Vec::new() });
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.slots.get(key).and_then(|slot| slot.value.clone())
    }

    pub fn forget(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run one optimistic mutation.
    ///
    /// `apply` predicts the new value from the current one (None when the key
    /// was never seeded). `remote` receives the prediction and performs the
    /// call. `reconcile` turns the confirmed result into the authoritative
    /// local value, or None to keep the prediction.
    pub async fn mutate<T, A, F, Fut, R>(&self, key: K, apply: A, remote: F, reconcile: R) -> Result<T, MutationError>
    where
        A: FnOnce(Option<&V>) -> V,
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = RepoResult<T>>,
        R: FnOnce(&T) -> Option<V>,
    {
        let (generation, predicted) = {
            let mut slot = self.slots.entry(key.clone()).or_insert_with(Slot::empty);
            // taken under the entry lock so `pending` stays in generation order
            let generation = self.next_generation();
            let snapshot = slot.value.clone();
            let predicted = apply(snapshot.as_ref());
            slot.value = Some(predicted.clone());
            slot.generation = generation;
            slot.pending.push(Pending { generation, base: snapshot });
            (generation, predicted)
        };

        match remote(predicted).await {
            Ok(confirmed) => {
                let value = reconcile(&confirmed);
                self.settle_success(&key, generation, value);
                Ok(confirmed)
            }
            Err(error) => {
                let rolled_back = self.settle_failure(&key, generation);
                if rolled_back {
                    debug!(?key, %error, "remote mutation failed; rolled back");
                } else {
                    warn!(?key, %error, "remote mutation failed after a newer local change; rollback skipped");
                }
                Err(MutationError { error, rolled_back })
            }
        }
    }

    fn settle_success(&self, key: &K, generation: u64, value: Option<V>) {
        let Some(mut slot) = self.slots.get_mut(key) else { return };
        if slot.take_pending(generation).is_none() {
            // reseeded or forgotten meanwhile
            return;
        }
        let Some(value) = value else { return };
        if slot.generation == generation {
            slot.value = Some(value);
        } else if slot.hand_off(generation, Some(value)) {
            debug!(?key, "newer local change pending; confirmed value kept as its rollback base");
        }
    }

    fn settle_failure(&self, key: &K, generation: u64) -> bool {
        let Some(mut slot) = self.slots.get_mut(key) else { return false };
        let Some(own) = slot.take_pending(generation) else { return false };
        if slot.generation == generation {
            slot.value = own.base;
            // the newest mutation still in flight owns the slot again
            if let Some(prev) = slot.pending.last() {
                slot.generation = prev.generation;
            }
            true
        } else {
            slot.hand_off(generation, own.base);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn unavailable() -> RepoError {
        RepoError::Unavailable("connection reset".into())
    }

    #[tokio::test]
    async fn failure_restores_snapshot_exactly() {
        let m: OptimisticMutator<&str, (i64, bool)> = OptimisticMutator::new();
        m.seed("post:1", (5, false));
        let err = m
            .mutate(
                "post:1",
                |v| {
                    let (n, _) = *v.unwrap();
                    (n + 1, true)
                },
                |_| async { Err::<(), _>(unavailable()) },
                |_| None,
            )
            .await
            .unwrap_err();
        assert!(err.rolled_back);
        assert!(err.notice().retryable);
        assert_eq!(m.get(&"post:1"), Some((5, false)));
    }

    #[tokio::test]
    async fn prediction_is_visible_before_remote_completes() {
        let m: OptimisticMutator<u8, bool> = OptimisticMutator::new();
        m.seed(1, false);
        let (tx, rx) = oneshot::channel::<RepoResult<bool>>();
        let fut = m.mutate(1, |v| !v.copied().unwrap_or(false), |_| async move { rx.await.unwrap() }, |ok| Some(*ok));
        let observer = async {
            tokio::task::yield_now().await;
            let seen = m.get(&1);
            tx.send(Ok(true)).unwrap();
            seen
        };
        let (res, seen) = tokio::join!(fut, observer);
        assert_eq!(seen, Some(true));
        assert!(res.unwrap());
        assert_eq!(m.get(&1), Some(true));
    }

    #[tokio::test]
    async fn success_reconciles_to_remote_value() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 10);
        // another voter landed in between: remote says 12, not the predicted 11
        let out = m.mutate(1, |v| v.unwrap() + 1, |_| async { Ok(12i64) }, |n| Some(*n)).await.unwrap();
        assert_eq!(out, 12);
        assert_eq!(m.get(&1), Some(12));
    }

    #[tokio::test]
    async fn stale_rollback_does_not_clobber_newer_value() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 0);
        let (tx1, rx1) = oneshot::channel::<RepoResult<i64>>();
        let (tx2, rx2) = oneshot::channel::<RepoResult<i64>>();

        let first = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx1.await.unwrap() }, |n| Some(*n));
        let second = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx2.await.unwrap() }, |n| Some(*n));
        let driver = async {
            tokio::task::yield_now().await;
            assert_eq!(m.get(&1), Some(2));
            tx1.send(Err(unavailable())).unwrap();
            tokio::task::yield_now().await;
            // the first failure must not undo the second prediction
            assert_eq!(m.get(&1), Some(2));
            // only the second change reached the server
            tx2.send(Ok(1)).unwrap();
        };
        let (r1, r2, ()) = tokio::join!(first, second, driver);

        let e1 = r1.unwrap_err();
        assert!(!e1.rolled_back);
        assert_eq!(r2.unwrap(), 1);
        assert_eq!(m.get(&1), Some(1));
    }

    #[tokio::test]
    async fn confirmed_value_survives_rollback_of_newer_change() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 10);
        let (tx1, rx1) = oneshot::channel::<RepoResult<i64>>();
        let (tx2, rx2) = oneshot::channel::<RepoResult<i64>>();

        let first = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx1.await.unwrap() }, |n| Some(*n));
        let second = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx2.await.unwrap() }, |n| Some(*n));
        let driver = async {
            tokio::task::yield_now().await;
            assert_eq!(m.get(&1), Some(12));
            // other users moved the server to 15 before the first change landed
            tx1.send(Ok(15)).unwrap();
            tokio::task::yield_now().await;
            assert_eq!(m.get(&1), Some(12));
            tx2.send(Err(unavailable())).unwrap();
        };
        let (r1, r2, ()) = tokio::join!(first, second, driver);

        assert_eq!(r1.unwrap(), 15);
        assert!(r2.unwrap_err().rolled_back);
        assert_eq!(m.get(&1), Some(15));
    }

    #[tokio::test]
    async fn older_confirmation_lands_after_newer_rollback() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 10);
        let (tx1, rx1) = oneshot::channel::<RepoResult<i64>>();
        let (tx2, rx2) = oneshot::channel::<RepoResult<i64>>();

        let first = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx1.await.unwrap() }, |n| Some(*n));
        let second = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx2.await.unwrap() }, |n| Some(*n));
        let driver = async {
            tokio::task::yield_now().await;
            tx2.send(Err(unavailable())).unwrap();
            tokio::task::yield_now().await;
            // back to the first prediction while it is still in flight
            assert_eq!(m.get(&1), Some(11));
            tx1.send(Ok(15)).unwrap();
        };
        let (r1, r2, ()) = tokio::join!(first, second, driver);

        assert!(r2.unwrap_err().rolled_back);
        assert_eq!(r1.unwrap(), 15);
        assert_eq!(m.get(&1), Some(15));
    }

    #[tokio::test]
    async fn skipped_rollback_passes_its_base_along() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 0);
        let (tx1, rx1) = oneshot::channel::<RepoResult<i64>>();
        let (tx2, rx2) = oneshot::channel::<RepoResult<i64>>();

        let first = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx1.await.unwrap() }, |n| Some(*n));
        let second = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx2.await.unwrap() }, |n| Some(*n));
        let driver = async {
            tokio::task::yield_now().await;
            tx1.send(Err(unavailable())).unwrap();
            tokio::task::yield_now().await;
            tx2.send(Err(unavailable())).unwrap();
        };
        let (r1, r2, ()) = tokio::join!(first, second, driver);

        assert!(!r1.unwrap_err().rolled_back);
        assert!(r2.unwrap_err().rolled_back);
        assert_eq!(m.get(&1), Some(0));
    }

    #[tokio::test]
    async fn untracked_key_rolls_back_to_absent() {
        let m: OptimisticMutator<u8, bool> = OptimisticMutator::new();
        let err = m
            .mutate(9, |_| true, |_| async { Err::<(), _>(RepoError::Forbidden) }, |_| None)
            .await
            .unwrap_err();
        assert!(err.rolled_back);
        assert!(!err.notice().retryable);
        assert_eq!(m.get(&9), None);
    }

    #[tokio::test]
    async fn fresh_seed_wins_over_pending_rollback() {
        let m: OptimisticMutator<u8, i64> = OptimisticMutator::new();
        m.seed(1, 1);
        let (tx, rx) = oneshot::channel::<RepoResult<()>>();
        let fut = m.mutate(1, |v| v.unwrap() + 1, |_| async move { rx.await.unwrap() }, |_| None);
        let refresher = async {
            tokio::task::yield_now().await;
            m.seed(1, 7);
            tx.send(Err(unavailable())).unwrap();
        };
        let (res, ()) = tokio::join!(fut, refresher);
        assert!(!res.unwrap_err().rolled_back);
        assert_eq!(m.get(&1), Some(7));
    }
}
