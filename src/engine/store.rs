use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use crate::identity::Caller;
use crate::model::*;

use super::{Engine, StoreError};

/// Durable, queryable reservation collection.
///
/// `create_if_no_conflict` and `cancel` are the only writes; both are atomic
/// with respect to every other write on the same room or user. Reads may be
/// momentarily stale.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_active_overlaps_for_room(&self, room_id: Ulid, span: Span) -> Vec<Reservation>;

    async fn find_active_overlaps_for_user(&self, user_id: Ulid, span: Span) -> Vec<Reservation>;

    /// Overlap check and insert as one indivisible step. `timeout` bounds the
    /// wait for the ledgers; a timeout writes nothing.
    async fn create_if_no_conflict(
        &self,
        candidate: Reservation,
        timeout: Duration,
    ) -> Result<Reservation, StoreError>;

    /// Flip `Active → Cancelled` if `actor` owns the reservation or is elevated.
    async fn cancel(&self, id: Ulid, actor: &Caller, timeout: Duration) -> Result<Reservation, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Option<Reservation>;

    /// Ordered by start, newest first.
    async fn list_by_user(&self, user_id: Ulid) -> Vec<Reservation>;

    /// Ordered by start, newest first.
    async fn list_all(&self) -> Vec<Reservation>;

    async fn rooms_with_active_overlap(&self, span: Span) -> Result<HashSet<Ulid>, StoreError>;
}

#[async_trait]
impl ReservationStore for Engine {
    async fn find_active_overlaps_for_room(&self, room_id: Ulid, span: Span) -> Vec<Reservation> {
        self.active_for_room(room_id, &span).await
    }

    async fn find_active_overlaps_for_user(&self, user_id: Ulid, span: Span) -> Vec<Reservation> {
        self.active_for_user(user_id, &span).await
    }

    async fn create_if_no_conflict(
        &self,
        candidate: Reservation,
        timeout: Duration,
    ) -> Result<Reservation, StoreError> {
        self.place_reservation(candidate, timeout).await
    }

    async fn cancel(&self, id: Ulid, actor: &Caller, timeout: Duration) -> Result<Reservation, StoreError> {
        self.cancel_reservation(id, actor, timeout).await
    }

    async fn find_by_id(&self, id: Ulid) -> Option<Reservation> {
        self.get_reservation(&id)
    }

    async fn list_by_user(&self, user_id: Ulid) -> Vec<Reservation> {
        self.reservations_for_user(user_id)
    }

    async fn list_all(&self) -> Vec<Reservation> {
        self.all_reservations()
    }

    async fn rooms_with_active_overlap(&self, span: Span) -> Result<HashSet<Ulid>, StoreError> {
        self.busy_rooms(&span).await
    }
}
