//! Optimistic sync engine
//!
//! One generic engine drives every list. Structural edits are applied to the
//! local store synchronously and persisted afterwards:
//! - success aligns local order to the canonical order in the ack
//! - failure restores the pre-move snapshot and publishes a notice
//! - a failure overtaken by a newer move on the same collection keeps the
//!   newer local order and marks its collections stale; stale collections
//!   are re-fetched once no move touching them is in flight
//!
//! The store lock is never held across an `.await`.

use crate::authority::{OrderAck, OrderRequest, Record, RemoteAuthority};
use crate::binding::ListBinding;
use crate::config::SyncConfig;
use crate::error::{AuthorityError, SyncError};
use crate::notice::NoticeBus;
use crate::state::{SyncLedger, SyncState};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use taskboard_model::{
    CollectionId, Entity, FieldMap, FieldName, Identifier, ModelError, Move, OrderedCollection,
    PositionedItem,
};
use taskboard_store::{MoveOutcome, OrderedCollectionStore, Snapshot, StoreError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Local state guarded by one lock
struct Local<T> {
    store: OrderedCollectionStore<T>,
    /// Sequence number of the newest move touching each collection
    latest_move: HashMap<CollectionId, u64>,
    next_move: u64,
    /// Collections whose local order may differ from durable order
    stale: HashSet<CollectionId>,
    /// Collections of every move whose write has not settled
    in_flight: HashMap<u64, Vec<CollectionId>>,
}

impl<T> Local<T> {
    fn is_latest(&self, affected: &[CollectionId], seq: u64) -> bool {
        affected
            .iter()
            .all(|id| self.latest_move.get(id).copied() == Some(seq))
    }

    fn is_busy(&self, id: &CollectionId) -> bool {
        self.in_flight.values().any(|ids| ids.contains(id))
    }

    /// Take every stale collection once no unsettled move touches any of them
    ///
    /// A failed transfer leaves its item's home uncertain in both
    /// collections, so they are re-fetched together.
    fn take_settled_stale(&mut self) -> Vec<CollectionId> {
        if self.stale.iter().any(|id| self.is_busy(id)) {
            return Vec::new();
        }
        self.stale.drain().collect()
    }
}

fn push_unique(ids: &mut Vec<CollectionId>, more: impl IntoIterator<Item = CollectionId>) {
    for id in more {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

struct EngineInner<T> {
    binding: ListBinding,
    authority: Arc<dyn RemoteAuthority>,
    local: Mutex<Local<T>>,
    ledger: SyncLedger,
    notices: NoticeBus,
    refetch_on_conflict: bool,
}

/// Optimistic engine for one list
///
/// Cheap to clone; clones share state.
pub struct OptimisticSyncEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for OptimisticSyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for OptimisticSyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimisticSyncEngine")
            .field("binding", &self.inner.binding)
            .finish_non_exhaustive()
    }
}

impl<T: Entity> OptimisticSyncEngine<T> {
    /// Create engine with an empty store
    #[must_use]
    pub fn new(
        binding: ListBinding,
        authority: Arc<dyn RemoteAuthority>,
        notices: NoticeBus,
        config: &SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                binding,
                authority,
                local: Mutex::new(Local {
                    store: OrderedCollectionStore::new(),
                    latest_move: HashMap::new(),
                    next_move: 0,
                    stale: HashSet::new(),
                    in_flight: HashMap::new(),
                }),
                ledger: SyncLedger::new(),
                notices,
                refetch_on_conflict: config.refetch_on_conflict,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn binding(&self) -> &ListBinding {
        &self.inner.binding
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Copy of a collection
    #[must_use]
    pub fn collection(&self, id: &CollectionId) -> Option<OrderedCollection<T>> {
        self.inner.local.lock().store.collection(id).cloned()
    }

    /// Payloads of a collection in order (empty if not loaded)
    #[must_use]
    pub fn items(&self, id: &CollectionId) -> Vec<T> {
        self.inner
            .local
            .lock()
            .store
            .collection(id)
            .map(|coll| coll.payloads().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of a collection in order
    ///
    /// # Errors
    /// Returns `SyncError::Store` if the collection is not loaded
    pub fn order(&self, id: &CollectionId) -> Result<Vec<Identifier>, SyncError> {
        Ok(self.inner.local.lock().store.order(id)?)
    }

    /// Loaded collections in insertion order
    #[must_use]
    pub fn collection_ids(&self) -> Vec<CollectionId> {
        self.inner.local.lock().store.collection_ids()
    }

    /// Local value of an item, acknowledged or not
    #[must_use]
    pub fn get(&self, id: &Identifier) -> Option<T> {
        self.inner
            .local
            .lock()
            .store
            .get(id)
            .map(|item| item.payload.clone())
    }

    /// Value of an item only if no write on it is unacknowledged
    #[must_use]
    pub fn authoritative(&self, id: &Identifier) -> Option<T> {
        if self.inner.ledger.is_clean(id) {
            self.get(id)
        } else {
            None
        }
    }

    /// Owning collection and index of an item
    #[must_use]
    pub fn locate(&self, id: &Identifier) -> Option<(CollectionId, usize)> {
        self.inner.local.lock().store.locate(id)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.locate(id).is_some()
    }

    #[must_use]
    pub fn sync_state(&self, id: &Identifier) -> SyncState {
        self.inner.ledger.state(id)
    }

    /// Number of items with unacknowledged writes
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.inner.ledger.pending_count()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Install a collection fetched from the authority
    ///
    /// Items are taken out of any other collection first, so each stays in
    /// exactly one.
    pub fn hydrate(&self, collection: OrderedCollection<T>) {
        let mut local = self.inner.local.lock();
        for item in &collection.items {
            if let Some((owner, _)) = local.store.locate(&item.id) {
                if owner != collection.id {
                    local.store.remove_by_id(&owner, &item.id);
                }
            }
        }
        local.stale.remove(&collection.id);
        local.store.insert_collection(collection);
    }

    /// Drop a collection and its items
    pub fn remove_collection(&self, id: &CollectionId) -> Option<OrderedCollection<T>> {
        let mut local = self.inner.local.lock();
        local.latest_move.remove(id);
        local.stale.remove(id);
        for ids in local.in_flight.values_mut() {
            ids.retain(|c| c != id);
        }
        local.store.remove_collection(id)
    }

    /// Re-fetch one collection and replace local state with it
    ///
    /// # Errors
    /// - `SyncError::Authority` if the fetch fails
    /// - `SyncError::Model` if a record does not decode
    pub async fn refresh(&self, id: &CollectionId) -> Result<(), SyncError> {
        let scope = self.inner.binding.scope(id);
        let records = self.inner.authority.fetch(scope).await?;
        let entities = records
            .into_iter()
            .map(T::from_record)
            .collect::<Result<Vec<T>, ModelError>>()?;

        debug!(collection = %id, items = entities.len(), "collection fetched");
        self.hydrate(OrderedCollection::from_entities(id.clone(), entities));
        Ok(())
    }

    /// Fetch the list's collections
    ///
    /// Single-collection lists fetch their home collection; task lists
    /// re-fetch every loaded section.
    ///
    /// # Errors
    /// Returns the first fetch or decode error
    pub async fn load(&self) -> Result<(), SyncError> {
        let ids = match self.inner.binding.home_collection() {
            Some(home) => vec![home],
            None => self.collection_ids(),
        };
        for id in &ids {
            self.refresh(id).await?;
        }
        Ok(())
    }

    /// Re-fetch collections that are still loaded, logging failures
    async fn refresh_loaded(&self, ids: &[CollectionId]) {
        for id in ids {
            let loaded = self.inner.local.lock().store.collection(id).is_some();
            if !loaded {
                continue;
            }
            info!(collection = %id, "re-fetching collection");
            if let Err(err) = self.refresh(id).await {
                warn!(collection = %id, error = %err, "re-fetch failed");
                if let Some(err) = err.authority() {
                    self.inner.notices.report(None, None, err);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Moves
    // ------------------------------------------------------------------

    /// Apply a move locally and prepare its durable write
    ///
    /// Returns `None` for a cancelled gesture.
    ///
    /// # Errors
    /// - `SyncError::Unsupported` for a transfer on a list without transfers
    /// - `SyncError::Store` if the move does not fit local state
    pub fn stage_move(&self, mv: Move) -> Result<Option<StagedMove<T>>, SyncError> {
        if mv.is_transfer() && !self.inner.binding.supports_transfer() {
            return Err(SyncError::Unsupported {
                operation: "transfer",
                binding: self.inner.binding.clone(),
            });
        }

        let affected = mv.affected();
        let (snapshot, outcome, request, seq) = {
            let mut local = self.inner.local.lock();
            let snapshot = local.store.snapshot(&affected);
            let outcome = local.store.apply_move(&mv)?;
            if !outcome.needs_persist() {
                debug!(item = %mv.item_id, "move cancelled");
                return Ok(None);
            }

            let source_order = local.store.order(&mv.from_collection)?;
            let destination_order = if mv.is_transfer() {
                local.store.order(&mv.to_collection)?
            } else {
                Vec::new()
            };
            local.next_move += 1;
            let seq = local.next_move;
            for id in &affected {
                local.latest_move.insert(id.clone(), seq);
            }
            local.in_flight.insert(seq, affected.clone());

            let request = self
                .inner
                .binding
                .order_request(&mv, source_order, destination_order);
            (snapshot, outcome, request, seq)
        };

        self.begin_write(&mv.item_id);
        debug!(item = %mv.item_id, from = %mv.from_collection, to = %mv.to_collection, ?outcome, "move applied locally");

        Ok(Some(StagedMove {
            engine: self.clone(),
            item: mv.item_id,
            affected,
            outcome,
            request,
            snapshot,
            seq,
        }))
    }

    /// Apply a move and wait for its durable write to settle
    ///
    /// # Errors
    /// Returns the local rejection or the authority failure; after a failure
    /// local order has already been restored.
    pub async fn move_item(&self, mv: Move) -> Result<MoveOutcome, SyncError> {
        match self.stage_move(mv)? {
            Some(staged) => staged.settle().await,
            None => Ok(MoveOutcome::Cancelled),
        }
    }

    async fn reconcile(&self, affected: &[CollectionId], seq: u64, ack: &OrderAck) {
        let refetch = {
            let mut local = self.inner.local.lock();
            local.in_flight.remove(&seq);
            let mut refetch = Vec::new();
            if local.is_latest(affected, seq) {
                for canonical in &ack.orders {
                    if !affected.contains(&canonical.collection) {
                        continue;
                    }
                    match local.store.align_to(&canonical.collection, &canonical.order) {
                        Ok(true) => info!(collection = %canonical.collection, "aligned to canonical order"),
                        Ok(false) => {}
                        Err(err) => {
                            warn!(collection = %canonical.collection, error = %err, "canonical order diverges");
                            refetch.push(canonical.collection.clone());
                        }
                    }
                }
                // The ack covers only the collections this move wrote.
                for id in affected {
                    local.stale.remove(id);
                }
            } else {
                debug!("ack overtaken by a newer move");
            }
            let settled = local.take_settled_stale();
            push_unique(&mut refetch, settled);
            refetch
        };
        self.refresh_loaded(&refetch).await;
    }

    async fn recover(
        &self,
        affected: &[CollectionId],
        seq: u64,
        snapshot: Snapshot<T>,
        err: &AuthorityError,
    ) {
        let refetch = {
            let mut local = self.inner.local.lock();
            local.in_flight.remove(&seq);
            let mut refetch = Vec::new();
            if local.is_latest(affected, seq) {
                local.store.restore(snapshot);
                info!(collections = ?affected, "local order rolled back");
                if err.is_conflict() && self.inner.refetch_on_conflict {
                    for id in affected {
                        local.stale.remove(id);
                    }
                    refetch.extend(affected.iter().cloned());
                }
            } else {
                warn!(collections = ?affected, "failed write overtaken by a newer move; keeping local order");
                local.stale.extend(affected.iter().cloned());
            }
            let settled = local.take_settled_stale();
            push_unique(&mut refetch, settled);
            refetch
        };
        self.refresh_loaded(&refetch).await;
    }

    // ------------------------------------------------------------------
    // Create / delete
    // ------------------------------------------------------------------

    /// Create an item on the authority and insert it locally
    ///
    /// Creation is pessimistic: the item appears once the authority has
    /// assigned its id.
    ///
    /// # Errors
    /// - `SyncError::Unsupported` on the favourites list
    /// - `SyncError::Store` if the collection is not loaded
    /// - `SyncError::Authority` if the authority rejects the create
    pub async fn create(&self, collection: &CollectionId, seed: FieldMap) -> Result<T, SyncError> {
        let binding = &self.inner.binding;
        if !binding.supports_create() {
            return Err(SyncError::Unsupported {
                operation: "create",
                binding: binding.clone(),
            });
        }
        if self.collection(collection).is_none() {
            return Err(StoreError::UnknownCollection(collection.clone()).into());
        }

        let request = binding.create_request(collection, seed);
        let record = match self.inner.authority.create(request).await {
            Ok(record) => record,
            Err(err) => {
                warn!(collection = %collection, error = %err, "create failed");
                self.inner.notices.report(None, None, &err);
                return Err(err.into());
            }
        };
        let entity = T::from_record(record)?;

        let mut local = self.inner.local.lock();
        let len = local
            .store
            .collection(collection)
            .map(OrderedCollection::len)
            .ok_or_else(|| StoreError::UnknownCollection(collection.clone()))?;
        let index = binding.insert_position().index(len);
        local.store.insert_at(
            collection,
            PositionedItem::from_entity(entity.clone(), collection.clone()),
            index,
        )?;
        info!(id = %entity.id(), collection = %collection, index, "item created");
        Ok(entity)
    }

    /// Insert an item locally without contacting the authority
    ///
    /// # Errors
    /// Returns `SyncError::Store` on a duplicate id or bad index
    pub fn insert_local(&self, collection: &CollectionId, item: T, index: usize) -> Result<(), SyncError> {
        let mut local = self.inner.local.lock();
        let len = local
            .store
            .collection(collection)
            .map(OrderedCollection::len)
            .ok_or_else(|| StoreError::UnknownCollection(collection.clone()))?;
        local.store.insert_at(
            collection,
            PositionedItem::from_entity(item, collection.clone()),
            index.min(len),
        )?;
        Ok(())
    }

    /// Remove an item locally without contacting the authority
    pub fn remove_local(&self, id: &Identifier) -> Option<PositionedItem<T>> {
        let mut local = self.inner.local.lock();
        let (owner, _) = local.store.locate(id)?;
        local.store.remove_by_id(&owner, id)
    }

    /// Remove an item and fire its delete
    ///
    /// The item disappears immediately; the delete is not rolled back on
    /// failure. A `NotFound` from the authority counts as success.
    pub fn delete(&self, id: &Identifier) -> Option<Deleted<T>> {
        let removed = self.remove_local(id)?;
        let target = self.inner.binding.entity_ref(id.clone());
        let inner = Arc::clone(&self.inner);

        let request = tokio::spawn(async move {
            match inner.authority.delete(target.clone()).await {
                Ok(()) => debug!(target = %target, "delete acknowledged"),
                Err(AuthorityError::NotFound(_)) => debug!(target = %target, "already deleted"),
                Err(err) => {
                    warn!(target = %target, error = %err, "delete failed");
                    inner.notices.report(None, None, &err);
                }
            }
        });

        info!(id = %id, collection = %removed.owner, "item deleted locally");
        Some(Deleted {
            item: removed.payload,
            collection: removed.owner,
            request,
        })
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    /// Check a field map would apply, without changing anything
    ///
    /// # Errors
    /// - `SyncError::UnknownItem` if the item is not loaded
    /// - `SyncError::Model` if a value does not fit its field
    pub fn check_fields(&self, id: &Identifier, fields: &FieldMap) -> Result<(), SyncError> {
        let mut probe = self.get(id).ok_or_else(|| SyncError::UnknownItem(id.clone()))?;
        probe.apply_fields(fields)?;
        Ok(())
    }

    /// Apply fields to the local payload
    ///
    /// Returns `false` if the item is not in this list.
    ///
    /// # Errors
    /// Returns `SyncError::Model` if a value does not fit its field
    pub fn apply_fields(&self, id: &Identifier, fields: &FieldMap) -> Result<bool, SyncError> {
        let mut local = self.inner.local.lock();
        match local.store.update(id, |payload| payload.apply_fields(fields)) {
            Some(result) => result.map(|()| true).map_err(SyncError::from),
            None => Ok(false),
        }
    }

    /// Merge a canonical record into the local payload
    ///
    /// Fields in `masked` still hold newer uncommitted local values and are
    /// left alone. Returns `false` if the item is not in this list.
    ///
    /// # Errors
    /// Returns `SyncError::Model` if the record does not describe this entity
    pub fn merge_record(&self, record: &Record, masked: &[FieldName]) -> Result<bool, SyncError> {
        let canonical = T::from_record(record.clone())?;
        let Value::Object(map) = record else {
            return Err(ModelError::NotAnObject(T::KIND).into());
        };

        let mut fields = FieldMap::new();
        for (key, value) in map {
            let field = FieldName::new(key.clone());
            if !masked.contains(&field) {
                fields.insert(field, value.clone());
            }
        }
        self.apply_fields(canonical.id(), &fields)
    }

    /// Mark an item as carrying an unacknowledged write
    pub fn begin_write(&self, id: &Identifier) {
        if let Err(err) = self.inner.ledger.begin(id) {
            warn!(id = %id, error = %err, "sync state out of step");
        }
    }

    /// Settle an unacknowledged write
    pub fn finish_write(&self, id: &Identifier, succeeded: bool) {
        let result = if succeeded {
            self.inner.ledger.acknowledge(id)
        } else {
            self.inner.ledger.roll_back(id)
        };
        if let Err(err) = result {
            warn!(id = %id, error = %err, "sync state out of step");
        }
    }

    #[inline]
    #[must_use]
    pub fn notices(&self) -> &NoticeBus {
        &self.inner.notices
    }

    #[inline]
    #[must_use]
    pub fn authority(&self) -> &Arc<dyn RemoteAuthority> {
        &self.inner.authority
    }
}

/// Move applied locally, durable write not yet sent
///
/// Dropping it without settling leaves the item `OptimisticallyApplied`.
#[must_use = "a staged move must be settled or spawned"]
pub struct StagedMove<T> {
    engine: OptimisticSyncEngine<T>,
    item: Identifier,
    affected: Vec<CollectionId>,
    outcome: MoveOutcome,
    request: OrderRequest,
    snapshot: Snapshot<T>,
    seq: u64,
}

impl<T: Entity> StagedMove<T> {
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> MoveOutcome {
        self.outcome
    }

    /// Order write that will be sent
    #[inline]
    #[must_use]
    pub fn request(&self) -> &OrderRequest {
        &self.request
    }

    /// Send the write and reconcile or roll back
    ///
    /// # Errors
    /// Returns `SyncError::Authority` if the write failed
    pub async fn settle(self) -> Result<MoveOutcome, SyncError> {
        let Self {
            engine,
            item,
            affected,
            outcome,
            request,
            snapshot,
            seq,
        } = self;

        match engine.inner.authority.persist_order(request).await {
            Ok(ack) => {
                engine.reconcile(&affected, seq, &ack).await;
                engine.finish_write(&item, true);
                debug!(item = %item, "order write acknowledged");
                Ok(outcome)
            }
            Err(err) => {
                warn!(item = %item, error = %err, "order write failed");
                engine.recover(&affected, seq, snapshot, &err).await;
                engine.finish_write(&item, false);
                engine.inner.notices.report(None, None, &err);
                Err(err.into())
            }
        }
    }

    /// Settle in the background
    pub fn spawn(self) -> JoinHandle<Result<MoveOutcome, SyncError>> {
        tokio::spawn(self.settle())
    }
}

/// Item removed by [`OptimisticSyncEngine::delete`]
#[derive(Debug)]
pub struct Deleted<T> {
    pub item: T,
    pub collection: CollectionId,
    request: JoinHandle<()>,
}

impl<T> Deleted<T> {
    /// Wait for the background delete request to finish
    pub async fn settled(self) {
        if let Err(err) = self.request.await {
            warn!(error = %err, "delete task aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{CollectionOrder, MockRemoteAuthority, Scope};
    use crate::notice::Notice;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use taskboard_model::{Board, Task};

    fn ids(items: &[&str]) -> Vec<Identifier> {
        items.iter().map(|id| Identifier::from(*id)).collect()
    }

    fn boards_engine(mock: MockRemoteAuthority, items: &[&str]) -> OptimisticSyncEngine<Board> {
        let engine = OptimisticSyncEngine::new(
            ListBinding::Boards,
            Arc::new(mock),
            NoticeBus::new(16),
            &SyncConfig::default(),
        );
        engine.hydrate(OrderedCollection::from_entities(
            CollectionId::boards(),
            items.iter().map(|id| Board::new((*id).into())),
        ));
        engine
    }

    fn tasks_engine(mock: MockRemoteAuthority) -> OptimisticSyncEngine<Task> {
        let engine = OptimisticSyncEngine::new(
            ListBinding::tasks("b1".into()),
            Arc::new(mock),
            NoticeBus::new(16),
            &SyncConfig::default(),
        );
        for (section, tasks) in [("s1", ["A", "B"].as_slice()), ("s2", ["X"].as_slice())] {
            engine.hydrate(OrderedCollection::from_entities(
                section.into(),
                tasks.iter().map(|id| Task::new((*id).into())),
            ));
        }
        engine
    }

    #[tokio::test]
    async fn reorder_persists_full_order() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .withf(|req| {
                *req == OrderRequest::Reorder {
                    scope: Scope::Boards,
                    collection: CollectionId::boards(),
                    order: ids(&["b", "c", "a"]),
                }
            })
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        let engine = boards_engine(mock, &["a", "b", "c"]);

        let outcome = engine
            .move_item(Move::within(CollectionId::boards(), "a".into(), 2))
            .await
            .unwrap();

        assert_eq!(outcome, MoveOutcome::Applied);
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["b", "c", "a"]));
        assert_eq!(engine.sync_state(&"a".into()), SyncState::Clean);
    }

    #[tokio::test]
    async fn local_order_is_visible_before_ack() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order().returning(|req| Ok(OrderAck::echo(&req)));
        let engine = boards_engine(mock, &["a", "b", "c"]);

        let staged = engine
            .stage_move(Move::within(CollectionId::boards(), "c".into(), 0))
            .unwrap()
            .unwrap();

        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["c", "a", "b"]));
        assert_eq!(engine.sync_state(&"c".into()), SyncState::OptimisticallyApplied);
        assert!(engine.authoritative(&"c".into()).is_none());
        assert!(engine.get(&"c".into()).is_some());

        staged.settle().await.unwrap();
        assert!(engine.authoritative(&"c".into()).is_some());
    }

    #[tokio::test]
    async fn failed_reorder_restores_snapshot_and_notifies() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .returning(|_| Err(AuthorityError::transient("connection reset")));
        let engine = boards_engine(mock, &["a", "b", "c"]);
        let mut notices = engine.notices().subscribe();

        let err = engine
            .move_item(Move::within(CollectionId::boards(), "a".into(), 2))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["a", "b", "c"]));
        assert_eq!(engine.sync_state(&"a".into()), SyncState::Clean);
        assert!(matches!(notices.recv().await.unwrap(), Notice::Transient { .. }));
    }

    #[tokio::test]
    async fn ack_with_different_order_wins() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order().returning(|_| {
            Ok(OrderAck {
                orders: vec![CollectionOrder::new(CollectionId::boards(), ids(&["c", "b", "a"]))],
            })
        });
        let engine = boards_engine(mock, &["a", "b", "c"]);

        engine
            .move_item(Move::within(CollectionId::boards(), "a".into(), 2))
            .await
            .unwrap();

        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["c", "b", "a"]));
    }

    #[tokio::test]
    async fn conflict_refetches_collection() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .returning(|_| Err(AuthorityError::Conflict("stale order".into())));
        mock.expect_fetch()
            .withf(|scope| *scope == Scope::Boards)
            .times(1)
            .returning(|_| Ok(vec![json!({"id": "b"}), json!({"id": "a"}), json!({"id": "c"}), json!({"id": "d"})]));
        let engine = boards_engine(mock, &["a", "b", "c"]);

        let err = engine
            .move_item(Move::within(CollectionId::boards(), "a".into(), 2))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Authority(AuthorityError::Conflict(_))));
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["b", "a", "c", "d"]));
    }

    #[tokio::test]
    async fn cancelled_move_sends_nothing() {
        let mock = MockRemoteAuthority::new();
        let engine = boards_engine(mock, &["a", "b"]);

        let outcome = engine
            .move_item(Move::cancelled(CollectionId::boards(), "a".into()))
            .await
            .unwrap();

        assert_eq!(outcome, MoveOutcome::Cancelled);
        assert_eq!(engine.pending_writes(), 0);
    }

    #[tokio::test]
    async fn same_index_is_still_persisted() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        let engine = boards_engine(mock, &["a", "b"]);

        let outcome = engine
            .move_item(Move::within(CollectionId::boards(), "b".into(), 1))
            .await
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Unchanged);
    }

    #[tokio::test]
    async fn transfer_sends_both_orders() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .withf(|req| {
                matches!(req, OrderRequest::Transfer(t)
                    if t.source_order == ids(&["B"]) && t.destination_order == ids(&["X", "A"]))
            })
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        let engine = tasks_engine(mock);

        engine
            .move_item(Move::across("s1".into(), "s2".into(), "A".into(), 1))
            .await
            .unwrap();

        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["B"]));
        assert_eq!(engine.order(&"s2".into()).unwrap(), ids(&["X", "A"]));
        assert_eq!(engine.locate(&"A".into()), Some(("s2".into(), 1)));
    }

    #[tokio::test]
    async fn failed_transfer_returns_item_home() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .returning(|_| Err(AuthorityError::transient("503")));
        let engine = tasks_engine(mock);

        engine
            .move_item(Move::across("s1".into(), "s2".into(), "A".into(), 0))
            .await
            .unwrap_err();

        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["A", "B"]));
        assert_eq!(engine.order(&"s2".into()).unwrap(), ids(&["X"]));
    }

    #[tokio::test]
    async fn board_list_rejects_transfer() {
        let engine = boards_engine(MockRemoteAuthority::new(), &["a"]);
        let err = engine
            .stage_move(Move::across(CollectionId::boards(), CollectionId::favourites(), "a".into(), 0))
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Unsupported { operation: "transfer", .. }));
    }

    #[tokio::test]
    async fn overtaken_failure_keeps_newer_order() {
        let mut mock = MockRemoteAuthority::new();
        let first = ids(&["b", "a", "c"]);
        mock.expect_persist_order()
            .withf(move |req| req.orders()[0].order == first)
            .returning(|_| Err(AuthorityError::transient("timeout")));
        mock.expect_persist_order()
            .withf(|req| req.orders()[0].order == ids(&["c", "b", "a"]))
            .returning(|req| Ok(OrderAck::echo(&req)));
        let engine = boards_engine(mock, &["a", "b", "c"]);

        let first = engine
            .stage_move(Move::within(CollectionId::boards(), "a".into(), 1))
            .unwrap()
            .unwrap();
        let second = engine
            .stage_move(Move::within(CollectionId::boards(), "c".into(), 0))
            .unwrap()
            .unwrap();

        first.settle().await.unwrap_err();
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["c", "b", "a"]));

        second.settle().await.unwrap();
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["c", "b", "a"]));
    }

    #[tokio::test]
    async fn overtaken_transfer_failure_refetches_its_source() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_persist_order()
            .withf(|req| matches!(req, OrderRequest::Transfer(_)))
            .times(1)
            .returning(|_| Err(AuthorityError::transient("timeout")));
        mock.expect_persist_order()
            .withf(|req| matches!(req, OrderRequest::Reorder { .. }))
            .times(1)
            .returning(|req| Ok(OrderAck::echo(&req)));
        mock.expect_fetch()
            .withf(|scope| matches!(scope, Scope::Tasks { section, .. } if section.as_str() == "s1"))
            .times(1)
            .returning(|_| Ok(vec![json!({"id": "A"}), json!({"id": "B"})]));
        let engine = tasks_engine(mock);

        let transfer = engine
            .stage_move(Move::across("s1".into(), "s2".into(), "A".into(), 1))
            .unwrap()
            .unwrap();
        let reorder = engine
            .stage_move(Move::within("s2".into(), "A".into(), 0))
            .unwrap()
            .unwrap();

        transfer.settle().await.unwrap_err();
        // s1 is still unsettled while the reorder touching s2 is in flight.
        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["B"]));

        reorder.settle().await.unwrap();
        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["A", "B"]));
        assert_eq!(engine.order(&"s2".into()).unwrap(), ids(&["X"]));
        assert_eq!(engine.locate(&"A".into()), Some(("s1".into(), 0)));
    }

    #[tokio::test]
    async fn create_inserts_at_binding_position() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_create()
            .returning(|req| Ok(json!({"id": "t-new", "section": req.section})));
        let engine = tasks_engine(mock);

        let task = engine.create(&"s1".into(), FieldMap::new()).await.unwrap();

        assert_eq!(task.id, Identifier::from("t-new"));
        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["t-new", "A", "B"]));
    }

    #[tokio::test]
    async fn create_failure_inserts_nothing() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_create().returning(|_| Err(AuthorityError::Unauthorized));
        let engine = boards_engine(mock, &["a"]);

        let err = engine.create(&CollectionId::boards(), FieldMap::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Authority(AuthorityError::Unauthorized)));
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["a"]));
    }

    #[tokio::test]
    async fn delete_is_immediate_and_tolerates_not_found() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_delete()
            .times(1)
            .returning(|target| Err(AuthorityError::NotFound(target.id.to_string())));
        let engine = boards_engine(mock, &["a", "b"]);
        let mut notices = engine.notices().subscribe();

        let deleted = engine.delete(&"a".into()).unwrap();
        assert_eq!(engine.order(&CollectionId::boards()).unwrap(), ids(&["b"]));
        assert_eq!(deleted.collection, CollectionId::boards());

        deleted.settled().await;
        assert!(notices.try_recv().is_err());
        assert!(engine.delete(&"a".into()).is_none());
    }

    #[tokio::test]
    async fn merge_record_respects_masked_fields() {
        let engine = boards_engine(MockRemoteAuthority::new(), &["a"]);
        engine
            .apply_fields(&"a".into(), &FieldMap::single(FieldName::TITLE, "typing"))
            .unwrap();

        let record = json!({"id": "a", "title": "stale", "icon": "📃"});
        assert!(engine.merge_record(&record, &[FieldName::TITLE]).unwrap());

        let board = engine.get(&"a".into()).unwrap();
        assert_eq!(board.title, "typing");
        assert_eq!(board.icon, "📃");
    }

    #[tokio::test]
    async fn refresh_moves_items_out_of_other_collections() {
        let mut mock = MockRemoteAuthority::new();
        mock.expect_fetch()
            .returning(|_| Ok(vec![json!({"id": "X"}), json!({"id": "A"})]));
        let engine = tasks_engine(mock);

        engine.refresh(&"s2".into()).await.unwrap();

        assert_eq!(engine.order(&"s1".into()).unwrap(), ids(&["B"]));
        assert_eq!(engine.order(&"s2".into()).unwrap(), ids(&["X", "A"]));
    }
}
