use std::collections::HashSet;

use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_MS;
use crate::model::*;

use super::{Engine, SharedLedger, StoreError};

/// Newest start first, ties broken by id for a stable order.
pub(crate) fn sort_by_start_desc(list: &mut [Reservation]) {
    list.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(b.id.cmp(&a.id)));
}

impl Engine {
    async fn active_in(&self, ledger: Option<SharedLedger>, span: &Span) -> Vec<Reservation> {
        let Some(ledger) = ledger else {
            return Vec::new();
        };
        let ids: Vec<Ulid> = {
            let guard = ledger.read().await;
            guard.overlapping(span).map(|s| s.id).collect()
        };
        ids.iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .filter(Reservation::is_active)
            .collect()
    }

    pub async fn active_for_room(&self, room_id: Ulid, span: &Span) -> Vec<Reservation> {
        let ledger = self.rooms.get(&room_id).map(|e| e.value().clone());
        self.active_in(ledger, span).await
    }

    pub async fn active_for_user(&self, user_id: Ulid, span: &Span) -> Vec<Reservation> {
        let ledger = self.users.get(&user_id).map(|e| e.value().clone());
        self.active_in(ledger, span).await
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn reservations_for_user(&self, user_id: Ulid) -> Vec<Reservation> {
        let mut list: Vec<Reservation> = self
            .records
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        sort_by_start_desc(&mut list);
        list
    }

    pub fn all_reservations(&self) -> Vec<Reservation> {
        let mut list: Vec<Reservation> = self.records.iter().map(|e| e.value().clone()).collect();
        sort_by_start_desc(&mut list);
        list
    }

    /// Rooms holding at least one active reservation overlapping `span`.
    /// Status is as stored: an ended reservation the sweeper has not reached
    /// still counts, so callers clamp `span` to start no earlier than now.
    pub async fn busy_rooms(&self, span: &Span) -> Result<HashSet<Ulid>, StoreError> {
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(StoreError::LimitExceeded("query window too wide"));
        }
        // Clone the handles out first: no DashMap guard may live across an await.
        let ledgers: Vec<(Ulid, SharedLedger)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut busy = HashSet::new();
        for (room_id, ledger) in ledgers {
            if ledger.read().await.overlapping(span).next().is_some() {
                busy.insert(room_id);
            }
        }
        Ok(busy)
    }
}
