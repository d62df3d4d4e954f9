//! Mutation coalescer
//!
//! Collapses bursts of field edits into one durable write per
//! `(target, field)` key:
//! - The local effect is applied on every call, synchronously
//! - A new value for a key replaces the pending one and restarts its timer
//! - Different keys never interfere
//! - Commits for the same key run one at a time, in issue order
//!
//! Commits are spawned tokio tasks; a key's commit lane is a
//! `tokio::sync::Mutex` so a slow write is never overtaken by the next one.

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskboard_model::{FieldName, Identifier};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Key under which edits coalesce
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationKey {
    pub target: Identifier,
    pub field: FieldName,
}

impl MutationKey {
    #[inline]
    #[must_use]
    pub fn new(target: Identifier, field: FieldName) -> Self {
        Self { target, field }
    }
}

impl Display for MutationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.field)
    }
}

/// Latest uncommitted value for a key
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation<V> {
    pub target_id: Identifier,
    pub field: FieldName,
    pub value: V,
    /// When the current quiet period started
    pub scheduled_at: Instant,
}

type CommitFn<V> = Box<dyn FnOnce(V) -> BoxFuture<'static, ()> + Send>;

struct Entry<V> {
    pending: PendingMutation<V>,
    commit: CommitFn<V>,
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner<V> {
    entries: Mutex<HashMap<MutationKey, Entry<V>>>,
    lanes: DashMap<MutationKey, Arc<tokio::sync::Mutex<()>>>,
    next_generation: AtomicU64,
}

/// Debounces field edits per `(target, field)` key
///
/// Cloning yields another handle to the same pending table.
pub struct MutationCoalescer<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for MutationCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Send + 'static> Default for MutationCoalescer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for MutationCoalescer<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCoalescer")
            .field("pending", &self.inner.entries.lock().len())
            .finish()
    }
}

impl<V: Send + 'static> MutationCoalescer<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                lanes: DashMap::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Record an edit
    ///
    /// `apply_locally` runs before returning. `commit_remotely` runs with the
    /// latest value once `delay` passes without another edit on the same key;
    /// a superseded commit closure is dropped unrun.
    ///
    /// Returns `true` if the key had no pending value before this call.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule<A, C, Fut>(
        &self,
        key: MutationKey,
        value: V,
        apply_locally: A,
        commit_remotely: C,
        delay: Duration,
    ) -> bool
    where
        A: FnOnce(&V),
        C: FnOnce(V) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        apply_locally(&value);

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let commit: CommitFn<V> = Box::new(move |value| Box::pin(commit_remotely(value)));
        let pending = PendingMutation {
            target_id: key.target.clone(),
            field: key.field.clone(),
            value,
            scheduled_at: Instant::now(),
        };

        // Spawn under the lock so the timer cannot observe the table before
        // its own entry is in place.
        let mut entries = self.inner.entries.lock();
        let inner = Arc::clone(&self.inner);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Inner::fire(&inner, &timer_key, generation).await;
        });

        let entry = Entry {
            pending,
            commit,
            generation,
            timer,
        };
        match entries.insert(key.clone(), entry) {
            Some(previous) => {
                previous.timer.abort();
                trace!(key = %key, "pending edit superseded");
                false
            }
            None => true,
        }
    }

    /// Commit a key's pending value now
    ///
    /// Also waits for a commit of the key that is already in flight. Returns
    /// `false` when nothing was pending.
    pub async fn flush(&self, key: &MutationKey) -> bool {
        let taken = self.inner.entries.lock().remove(key);
        match taken {
            Some(entry) => {
                entry.timer.abort();
                self.inner.commit(key, entry).await;
                true
            }
            None => {
                self.inner.drain_lane(key).await;
                false
            }
        }
    }

    /// Commit every pending field of one target
    pub async fn flush_target(&self, target: &Identifier) -> usize {
        let keys: Vec<MutationKey> = self
            .inner
            .entries
            .lock()
            .keys()
            .filter(|key| &key.target == target)
            .cloned()
            .collect();
        self.flush_keys(keys).await
    }

    /// Commit everything pending
    pub async fn flush_all(&self) -> usize {
        let keys: Vec<MutationKey> = self.inner.entries.lock().keys().cloned().collect();
        self.flush_keys(keys).await
    }

    async fn flush_keys(&self, keys: Vec<MutationKey>) -> usize {
        let flushes = keys.iter().map(|key| self.flush(key));
        futures::future::join_all(flushes)
            .await
            .into_iter()
            .filter(|flushed| *flushed)
            .count()
    }

    /// Drop pending edits of a target without committing them
    ///
    /// Used when the target is deleted.
    pub fn discard_target(&self, target: &Identifier) -> usize {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|key, entry| {
            if &key.target == target {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
        let discarded = before - entries.len();
        if discarded > 0 {
            debug!(target_id = %target, discarded, "pending edits discarded");
        }
        discarded
    }

    /// Fields of a target with an uncommitted value
    #[must_use]
    pub fn pending_fields(&self, target: &Identifier) -> Vec<FieldName> {
        self.inner
            .entries
            .lock()
            .keys()
            .filter(|key| &key.target == target)
            .map(|key| key.field.clone())
            .collect()
    }

    /// Number of keys with an uncommitted value
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

impl<V: Clone + Send + 'static> MutationCoalescer<V> {
    /// Pending value of a key
    #[must_use]
    pub fn pending(&self, key: &MutationKey) -> Option<PendingMutation<V>> {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.pending.clone())
    }
}

impl<V: Send + 'static> Inner<V> {
    async fn fire(this: &Arc<Self>, key: &MutationKey, generation: u64) {
        let taken = {
            let mut entries = this.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.generation == generation => entries.remove(key),
                _ => None,
            }
        };
        if let Some(entry) = taken {
            this.commit(key, entry).await;
        }
    }

    async fn commit(&self, key: &MutationKey, entry: Entry<V>) {
        let lane = self.lane(key);
        {
            let _turn = lane.lock().await;
            debug!(key = %key, "committing coalesced edit");
            (entry.commit)(entry.pending.value).await;
        }
        self.release_lane(key, &lane);
    }

    async fn drain_lane(&self, key: &MutationKey) {
        let lane = self.lanes.get(key).map(|lane| Arc::clone(lane.value()));
        if let Some(lane) = lane {
            drop(lane.lock().await);
            self.release_lane(key, &lane);
        }
    }

    /// Drop a lane held only by the table and the caller
    fn release_lane(&self, key: &MutationKey, lane: &Arc<tokio::sync::Mutex<()>>) {
        self.lanes
            .remove_if(key, |_, held| Arc::ptr_eq(held, lane) && Arc::strong_count(held) == 2);
    }

    fn lane(&self, key: &MutationKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.lanes.entry(key.clone()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    type Log = Arc<SyncMutex<Vec<(String, u128)>>>;

    fn recorder(log: &Log, start: Instant) -> impl FnOnce(String) -> BoxFuture<'static, ()> + Send {
        let log = Arc::clone(log);
        move |value: String| {
            Box::pin(async move {
                log.lock().push((value, start.elapsed().as_millis()));
            })
        }
    }

    fn key(target: &str, field: FieldName) -> MutationKey {
        MutationKey::new(target.into(), field)
    }

    async fn type_at(coalescer: &MutationCoalescer<String>, log: &Log, start: Instant, edits: &[(u64, &str)]) -> Arc<SyncMutex<String>> {
        let local = Arc::new(SyncMutex::new(String::new()));
        for (at, value) in edits {
            tokio::time::sleep_until(start + Duration::from_millis(*at)).await;
            let sink = Arc::clone(&local);
            coalescer.schedule(
                key("b1", FieldName::TITLE),
                (*value).to_string(),
                move |v| *sink.lock() = v.clone(),
                recorder(log, start),
                Duration::from_millis(200),
            );
        }
        local
    }

    #[tokio::test(start_paused = true)]
    async fn burst_commits_latest_value_once() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();

        let local = type_at(&coalescer, &log, start, &[(0, "h"), (50, "he"), (240, "hel")]).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(*local.lock(), "hel");
        assert_eq!(*log.lock(), vec![("hel".to_string(), 440)]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_longer_than_delay_commits_in_between() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();

        // 50 -> 260 is a 210 ms pause, longer than the 200 ms quiet period.
        let local = type_at(&coalescer, &log, start, &[(0, "h"), (50, "he"), (260, "hel")]).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(*local.lock(), "hel");
        assert_eq!(
            *log.lock(),
            vec![("he".to_string(), 250), ("hel".to_string(), 460)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn local_effect_is_immediate() {
        let coalescer = MutationCoalescer::<String>::new();
        let local = Arc::new(SyncMutex::new(String::new()));

        let sink = Arc::clone(&local);
        coalescer.schedule(
            key("t1", FieldName::CONTENT),
            "x".into(),
            move |v| *sink.lock() = v.clone(),
            |_| async {},
            Duration::from_millis(500),
        );

        assert_eq!(*local.lock(), "x");
        assert!(!coalescer.schedule(
            key("t1", FieldName::CONTENT),
            "xy".into(),
            |_| {},
            |_| async {},
            Duration::from_millis(500),
        ));
        let pending = coalescer.pending(&key("t1", FieldName::CONTENT)).unwrap();
        assert_eq!(pending.value, "xy");
        assert_eq!(pending.target_id, Identifier::from("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();
        let delay = Duration::from_millis(200);

        coalescer.schedule(key("b1", FieldName::TITLE), "t".into(), |_| {}, recorder(&log, start), delay);
        coalescer.schedule(key("b1", FieldName::ICON), "i".into(), |_| {}, recorder(&log, start), delay);
        coalescer.schedule(key("b2", FieldName::TITLE), "u".into(), |_| {}, recorder(&log, start), delay);

        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut values: Vec<String> = log.lock().iter().map(|(v, _)| v.clone()).collect();
        values.sort();
        assert_eq!(values, vec!["i", "t", "u"]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_commits_without_waiting() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();
        let k = key("t1", FieldName::CONTENT);

        coalescer.schedule(k.clone(), "draft".into(), |_| {}, recorder(&log, start), Duration::from_millis(500));

        assert!(coalescer.flush(&k).await);
        assert_eq!(*log.lock(), vec![("draft".to_string(), 0)]);

        // Timer was cancelled; no second commit.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(log.lock().len(), 1);
        assert!(!coalescer.flush(&k).await);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_target_only_touches_that_target() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();
        let delay = Duration::from_millis(500);

        coalescer.schedule(key("t1", FieldName::TITLE), "a".into(), |_| {}, recorder(&log, start), delay);
        coalescer.schedule(key("t1", FieldName::CONTENT), "b".into(), |_| {}, recorder(&log, start), delay);
        coalescer.schedule(key("t2", FieldName::TITLE), "c".into(), |_| {}, recorder(&log, start), delay);

        assert_eq!(coalescer.flush_target(&"t1".into()).await, 2);
        assert_eq!(log.lock().len(), 2);
        assert_eq!(coalescer.pending_count(), 1);
        assert_eq!(coalescer.pending_fields(&"t2".into()), vec![FieldName::TITLE]);
    }

    #[tokio::test(start_paused = true)]
    async fn commits_on_one_key_never_overlap() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();
        let k = key("b1", FieldName::TITLE);

        let slow_log = Arc::clone(&log);
        coalescer.schedule(
            k.clone(),
            "first".into(),
            |_| {},
            move |value| async move {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                slow_log.lock().push((value, start.elapsed().as_millis()));
            },
            Duration::from_millis(200),
        );

        // Second edit arrives while the first write is in flight.
        tokio::time::sleep(Duration::from_millis(300)).await;
        coalescer.schedule(k, "second".into(), |_| {}, recorder(&log, start), Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(
            *log.lock(),
            vec![("first".to_string(), 1200), ("second".to_string(), 1200)]
        );
        assert!(coalescer.inner.lanes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_keys_release_their_lane() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();
        let delay = Duration::from_millis(200);

        for target in ["t1", "t2", "t3"] {
            coalescer.schedule(key(target, FieldName::TITLE), "x".into(), |_| {}, recorder(&log, start), delay);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(log.lock().len(), 3);
        assert!(coalescer.inner.lanes.is_empty());

        let k = key("t4", FieldName::CONTENT);
        coalescer.schedule(k.clone(), "y".into(), |_| {}, recorder(&log, start), delay);
        assert!(coalescer.flush(&k).await);
        assert!(coalescer.inner.lanes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn discarded_edits_never_commit() {
        let coalescer = MutationCoalescer::<String>::new();
        let log: Log = Arc::default();
        let start = Instant::now();

        coalescer.schedule(key("t1", FieldName::TITLE), "x".into(), |_| {}, recorder(&log, start), Duration::from_millis(200));
        assert_eq!(coalescer.discard_target(&"t1".into()), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(log.lock().is_empty());
    }
}
