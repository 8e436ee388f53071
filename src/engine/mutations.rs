use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::identity::Caller;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_purpose, validate_span};
use super::{ConflictKind, Engine, LedgerGuards, StoreError, WalCommand};

impl Engine {
    /// Take the room ledger then the user ledger, giving up after `timeout`.
    /// Dropping the future on timeout releases whatever was already held.
    async fn lock_pair(&self, room_id: Ulid, user_id: Ulid, timeout: Duration) -> Result<LedgerGuards, StoreError> {
        let room = self.room_ledger(room_id);
        let user = self.user_ledger(user_id);
        tokio::time::timeout(timeout, async move {
            let room_guard = room.write_owned().await;
            let user_guard = user.write_owned().await;
            (room_guard, user_guard)
        })
        .await
        .map_err(|_| StoreError::Timeout)
    }

    fn keys_of(&self, id: Ulid) -> Result<(Ulid, Ulid), StoreError> {
        self.records
            .get(&id)
            .map(|r| (r.room_id, r.user_id))
            .ok_or(StoreError::NotFound(id))
    }

    /// Check both invariants and insert, as one step under both ledger locks.
    /// The candidate's status is ignored: new reservations always start active.
    pub async fn place_reservation(
        &self,
        mut candidate: Reservation,
        timeout: Duration,
    ) -> Result<Reservation, StoreError> {
        validate_span(&candidate.span)?;
        validate_purpose(candidate.purpose.as_deref())?;
        candidate.status = ReservationStatus::Active;

        let (room, user) = self.lock_pair(candidate.room_id, candidate.user_id, timeout).await?;

        if self.records.contains_key(&candidate.id) {
            return Err(StoreError::AlreadyExists(candidate.id));
        }
        check_no_conflict(&room, &candidate.span, ConflictKind::Room)?;
        check_no_conflict(&user, &candidate.span, ConflictKind::User)?;

        let event = Event::ReservationCreated { reservation: candidate.clone() };
        self.persist_and_apply((room, user), event).await?;
        debug!(
            "reservation {} placed on room {} [{}, {})",
            candidate.id, candidate.room_id, candidate.span.start, candidate.span.end
        );
        Ok(candidate)
    }

    /// Compare-and-swap `Active → Cancelled`, only for the owner or an elevated actor.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        actor: &Caller,
        timeout: Duration,
    ) -> Result<Reservation, StoreError> {
        let (room_id, user_id) = self.keys_of(id)?;
        let guards = self.lock_pair(room_id, user_id, timeout).await?;

        let current = self
            .records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        if !actor.may_access(&current) {
            return Err(StoreError::Forbidden);
        }
        current.status.transition(ReservationStatus::Cancelled)?;

        self.persist_and_apply(guards, Event::ReservationCancelled { id }).await?;
        Ok(Reservation { status: ReservationStatus::Cancelled, ..current })
    }

    /// Persist `Active → Completed` for a reservation whose end has passed.
    pub async fn complete_reservation(&self, id: Ulid, now: Ms, timeout: Duration) -> Result<(), StoreError> {
        let (room_id, user_id) = self.keys_of(id)?;
        let guards = self.lock_pair(room_id, user_id, timeout).await?;

        let (status, span) = self
            .records
            .get(&id)
            .map(|r| (r.status, r.span))
            .ok_or(StoreError::NotFound(id))?;
        if span.end > now {
            return Err(StoreError::NotEnded(id));
        }
        status.transition(ReservationStatus::Completed)?;

        self.persist_and_apply(guards, Event::ReservationCompleted { id }).await
    }

    /// Active reservations whose end is at or before `now`.
    pub fn collect_elapsed(&self, now: Ms) -> Vec<Ulid> {
        self.records
            .iter()
            .filter(|e| e.is_active() && e.span.end <= now)
            .map(|e| *e.key())
            .collect()
    }

    /// Rewrite the WAL with one `ReservationCreated` per record, carrying its
    /// current status. Cancelled and completed records are kept as audit trail.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;
        let mut snapshot: Vec<Reservation> = self.records.iter().map(|e| e.value().clone()).collect();
        snapshot.sort_by_key(|r| r.id);
        let events: Vec<Event> = snapshot
            .into_iter()
            .map(|reservation| Event::ReservationCreated { reservation })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!("compacted WAL to {count} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
