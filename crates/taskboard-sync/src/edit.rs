//! Coalesced field edits
//!
//! [`FieldEditor`] routes title, description, icon and content edits through
//! the shared [`MutationCoalescer`]. The local value lands in every list that
//! mirrors the entity (a board lives in both the board list and
//! favourites); the canonical value returned by the authority is written
//! back the same way unless a newer edit of the field is pending.

use crate::authority::{EntityRef, RemoteAuthority};
use crate::coalescer::{MutationCoalescer, MutationKey};
use crate::config::SyncConfig;
use crate::engine::OptimisticSyncEngine;
use crate::error::SyncError;
use crate::notice::{NoticeBus, SavedFlag};
use serde_json::Value;
use std::sync::Arc;
use taskboard_model::{Entity, FieldMap, FieldName, Identifier};
use tracing::{debug, warn};

/// Shared edit pipeline for one session
#[derive(Clone)]
pub struct FieldEditor {
    authority: Arc<dyn RemoteAuthority>,
    coalescer: MutationCoalescer<Value>,
    notices: NoticeBus,
    saved: SavedFlag,
    config: SyncConfig,
}

impl std::fmt::Debug for FieldEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEditor")
            .field("coalescer", &self.coalescer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FieldEditor {
    #[must_use]
    pub fn new(
        authority: Arc<dyn RemoteAuthority>,
        notices: NoticeBus,
        saved: SavedFlag,
        config: SyncConfig,
    ) -> Self {
        Self {
            authority,
            coalescer: MutationCoalescer::new(),
            notices,
            saved,
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn coalescer(&self) -> &MutationCoalescer<Value> {
        &self.coalescer
    }

    #[inline]
    #[must_use]
    pub fn saved(&self) -> &SavedFlag {
        &self.saved
    }

    /// Edit one field of `target`
    ///
    /// The value is applied to every mirror holding the entity right away;
    /// the durable update follows after the kind's quiet period. A failed
    /// update keeps the local value and publishes a notice.
    ///
    /// # Errors
    /// - `SyncError::UnknownItem` if no mirror holds the entity
    /// - `SyncError::Model` if the value does not fit the field
    pub fn edit<T: Entity>(
        &self,
        mirrors: &[OptimisticSyncEngine<T>],
        target: EntityRef,
        field: FieldName,
        value: Value,
    ) -> Result<(), SyncError> {
        let primary = mirrors
            .iter()
            .find(|engine| engine.contains(&target.id))
            .cloned()
            .ok_or_else(|| SyncError::UnknownItem(target.id.clone()))?;
        primary.check_fields(&target.id, &FieldMap::single(field.clone(), value.clone()))?;

        let key = MutationKey::new(target.id.clone(), field.clone());
        let delay = self.config.delay_for(target.kind);
        let local = mirrors.to_vec();
        let remote = mirrors.to_vec();
        let editor = self.clone();
        let id = target.id.clone();
        let local_field = field.clone();
        let tracker = primary.clone();
        let tracked = target.id.clone();

        // Counted before scheduling so the commit can never settle first.
        tracker.begin_write(&tracked);
        let fresh = self.coalescer.schedule(
            key,
            value,
            move |value| {
                let fields = FieldMap::single(local_field, value.clone());
                for engine in &local {
                    if let Err(err) = engine.apply_fields(&id, &fields) {
                        warn!(id = %id, error = %err, "local edit rejected");
                    }
                }
            },
            move |value| async move {
                editor.commit(primary, remote, target, field, value).await;
            },
            delay,
        );
        if !fresh {
            // Superseded value is folded into the pending write.
            tracker.finish_write(&tracked, true);
        }
        Ok(())
    }

    async fn commit<T: Entity>(
        &self,
        primary: OptimisticSyncEngine<T>,
        mirrors: Vec<OptimisticSyncEngine<T>>,
        target: EntityRef,
        field: FieldName,
        value: Value,
    ) {
        let fields = FieldMap::single(field.clone(), value);
        match self.authority.update(target.clone(), fields).await {
            Ok(record) => {
                // A newer local value for the field still waits to be sent.
                let superseded = self.coalescer.pending_fields(&target.id).contains(&field);
                if let (false, Some(canonical)) = (superseded, record.get(field.as_str())) {
                    let fields = FieldMap::single(field.clone(), canonical.clone());
                    for engine in &mirrors {
                        if let Err(err) = engine.apply_fields(&target.id, &fields) {
                            warn!(target = %target, error = %err, "canonical value rejected");
                        }
                    }
                }
                self.saved.mark(self.config.saved_flag());
                debug!(target = %target, field = %field, "field committed");
            }
            Err(err) => {
                warn!(target = %target, field = %field, error = %err, "field update failed");
                self.notices.report(Some(&target.id), Some(&field), &err);
            }
        }
        // Field edits keep their local value either way.
        primary.finish_write(&target.id, true);
    }

    /// Commit a target's pending edits now
    pub async fn flush_target(&self, target: &Identifier) -> usize {
        self.coalescer.flush_target(target).await
    }

    /// Commit every pending edit now
    pub async fn flush_all(&self) -> usize {
        self.coalescer.flush_all().await
    }

    /// Drop pending edits of a deleted entity
    pub fn discard<T: Entity>(&self, engine: &OptimisticSyncEngine<T>, target: &Identifier) {
        for _ in 0..self.coalescer.discard_target(target) {
            engine.finish_write(target, true);
        }
    }
}
