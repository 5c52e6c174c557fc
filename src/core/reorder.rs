//! Optimistic drag-and-drop reordering.
//!
//! A drag is applied to the local list immediately and produces a
//! `PersistTicket` with the full reordered id list. The caller sends it to the
//! server and reports back through `SceneList::finish_persist`. The server
//! keeps the authoritative order; the local list is trusted only while the set
//! of ids it holds is unchanged.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ReorderConfig, ReorderFailurePolicy};
use crate::core::models::OrderedItem;
use crate::core::notifications::{self, JobEvent, NotificationChannel};

/// Replaces the server-side order of a collection wholesale.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn persist_order(&self, list_id: &str, ordered_ids: &[String]) -> Result<()>;
}

/// End of a drag gesture. `destination` is `None` when the drop target was invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragEnd {
    pub source: usize,
    pub destination: Option<usize>,
}

/// Order that must be sent to the server for a drag to stick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistTicket {
    epoch: u64,
    seq: u64,
    pub ordered_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragResult {
    Moved(PersistTicket),
    /// Invalid or absent destination, or a drop onto the same slot.
    Unchanged,
    /// A previous order is still being saved.
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistResolution {
    Confirmed,
    /// The save failed and the optimistic order stays on screen.
    Kept,
    Reverted,
    /// The list was rebuilt from a new source while the save was in flight.
    Stale,
}

/// Remove the element at `from` and reinsert it at `to`.
///
/// Returns false, leaving `items` untouched, when either index is out of range
/// or both are equal.
pub fn move_item<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() || to >= items.len() || from == to {
        return false;
    }
    let item = items.remove(from);
    items.insert(to, item);
    true
}

fn sorted_by_order<T: OrderedItem>(mut items: Vec<T>) -> Vec<T> {
    items.sort_by_key(|item| item.order());
    items
}

/// Locally owned, optimistically reordered list.
#[derive(Debug, Clone)]
pub struct SceneList<T: OrderedItem> {
    items: Vec<T>,
    confirmed: Vec<T>,
    epoch: u64,
    pending: usize,
    /// Sequence number of the newest ticket handed out.
    issued: u64,
    /// Every drag up to this sequence number was undone by a revert.
    reverted_through: u64,
    config: ReorderConfig,
}

impl<T: OrderedItem> SceneList<T> {
    /// Take ownership of `source`, sorted by `order` ascending.
    pub fn new(source: Vec<T>, config: ReorderConfig) -> Self {
        let items = sorted_by_order(source);
        Self {
            confirmed: items.clone(),
            items,
            epoch: 0,
            pending: 0,
            issued: 0,
            reverted_through: 0,
            config,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id().to_string()).collect()
    }

    /// True while at least one persist call is outstanding.
    pub fn is_reordering(&self) -> bool {
        self.pending > 0
    }

    pub fn apply_drag(&mut self, drag: DragEnd) -> DragResult {
        let Some(destination) = drag.destination else {
            return DragResult::Unchanged;
        };
        if self.config.guard_while_persisting && self.is_reordering() {
            debug!(source = drag.source, destination, "Drag ignored while saving order");
            return DragResult::Busy;
        }
        if !move_item(&mut self.items, drag.source, destination) {
            return DragResult::Unchanged;
        }

        self.pending += 1;
        self.issued += 1;
        DragResult::Moved(PersistTicket {
            epoch: self.epoch,
            seq: self.issued,
            ordered_ids: self.ids(),
        })
    }

    /// Record the server's answer for `ticket`.
    pub fn finish_persist(&mut self, ticket: &PersistTicket, saved: bool) -> PersistResolution {
        if ticket.epoch != self.epoch {
            return PersistResolution::Stale;
        }
        self.pending = self.pending.saturating_sub(1);

        if saved {
            let mut by_id: HashMap<&str, &T> =
                self.items.iter().map(|item| (item.id(), item)).collect();
            self.confirmed = ticket
                .ordered_ids
                .iter()
                .filter_map(|id| by_id.remove(id.as_str()).cloned())
                .collect();
            // No later drag is still on screen, so show what the server holds.
            if ticket.seq == self.issued || self.reverted_through == self.issued {
                self.items = self.confirmed.clone();
            }
            return PersistResolution::Confirmed;
        }

        match self.config.failure_policy {
            ReorderFailurePolicy::Keep => PersistResolution::Kept,
            ReorderFailurePolicy::Revert => {
                self.items = self.confirmed.clone();
                self.reverted_through = self.issued;
                PersistResolution::Reverted
            }
        }
    }

    /// Adopt `source` if it holds a different set of ids than the local list.
    ///
    /// Returns true when the local order was discarded. Tickets issued before a
    /// rebuild resolve as `Stale`.
    pub fn reconcile(&mut self, source: Vec<T>) -> bool {
        let local: HashSet<&str> = self.items.iter().map(|item| item.id()).collect();
        let incoming: HashSet<&str> = source.iter().map(|item| item.id()).collect();
        if local == incoming && self.items.len() == source.len() {
            return false;
        }

        debug!(
            local = self.items.len(),
            incoming = source.len(),
            "Item set changed, rebuilding local order"
        );
        let items = sorted_by_order(source);
        self.confirmed = items.clone();
        self.items = items;
        self.epoch += 1;
        self.pending = 0;
        true
    }
}

/// Send `ticket` to the store. Failures are logged and notified, never returned.
pub async fn persist_ticket<S>(
    store: &S,
    notifier: &dyn NotificationChannel,
    list_id: &str,
    ticket: &PersistTicket,
) -> bool
where
    S: OrderStore + ?Sized,
{
    match store.persist_order(list_id, &ticket.ordered_ids).await {
        Ok(()) => {
            debug!(list_id = %list_id, count = ticket.ordered_ids.len(), "Order saved");
            true
        }
        Err(e) => {
            warn!(list_id = %list_id, error = %e, "Failed to save order");
            notifications::deliver(
                notifier,
                JobEvent::ReorderFailed {
                    list_id: list_id.to_string(),
                    error: format!("{e:#}"),
                },
            )
            .await;
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragOutcome {
    Unchanged,
    Busy,
    Persisted(PersistResolution),
}

/// Apply a drag and wait for its persist call.
pub async fn drag_and_persist<T, S>(
    list: &mut SceneList<T>,
    drag: DragEnd,
    store: &S,
    notifier: &dyn NotificationChannel,
    list_id: &str,
) -> DragOutcome
where
    T: OrderedItem,
    S: OrderStore + ?Sized,
{
    match list.apply_drag(drag) {
        DragResult::Unchanged => DragOutcome::Unchanged,
        DragResult::Busy => DragOutcome::Busy,
        DragResult::Moved(ticket) => {
            let saved = persist_ticket(store, notifier, list_id, &ticket).await;
            DragOutcome::Persisted(list.finish_persist(&ticket, saved))
        }
    }
}
