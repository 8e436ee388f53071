mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::{ConflictKind, StoreError};
pub use store::ReservationStore;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Room ledger guard, then user ledger guard.
pub(super) type LedgerGuards = (OwnedRwLockWriteGuard<Ledger>, OwnedRwLockWriteGuard<Ledger>);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Every append that is already queued when the first one arrives joins the
/// same batch and shares a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("wal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    let result = result.and_then(|()| wal.flush_sync());

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    // Every caller in a failed batch hears `Err`, so none of its frames may
    // stay on disk.
    if let Err(e) = &result {
        warn!("wal batch of {} failed: {e}", batch.len());
        if let Err(e) = wal.rollback() {
            error!("wal rollback failed, unacknowledged events may replay: {e}");
        }
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// The reservation store: every record ever created, plus per-room and
/// per-user ledgers of the currently active claims.
///
/// Writers lock the room ledger first and the user ledger second, and hold
/// both across check, WAL append and apply.
pub struct Engine {
    pub(super) records: Arc<DashMap<Ulid, Reservation>>,
    pub(super) rooms: DashMap<Ulid, SharedLedger>,
    pub(super) users: DashMap<Ulid, SharedLedger>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared; compaction holds it exclusively so its
    /// snapshot never misses an event already written to the log.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

/// Apply an event to the record map and the two ledgers it touches.
/// Caller holds both ledger write locks.
fn apply_event(
    records: &DashMap<Ulid, Reservation>,
    room: &mut Ledger,
    user: &mut Ledger,
    event: &Event,
) {
    match event {
        Event::ReservationCreated { reservation } => {
            // A retried write whose first attempt reached disk replays twice.
            if records.contains_key(&reservation.id) {
                warn!("duplicate create for reservation {}, ignoring", reservation.id);
                return;
            }
            if reservation.is_active() {
                let slot = Slot { id: reservation.id, span: reservation.span };
                room.insert_slot(slot);
                user.insert_slot(slot);
            }
            records.insert(reservation.id, reservation.clone());
        }
        Event::ReservationCancelled { id } => {
            settle(records, room, user, *id, ReservationStatus::Cancelled);
        }
        Event::ReservationCompleted { id } => {
            settle(records, room, user, *id, ReservationStatus::Completed);
        }
    }
}

fn settle(
    records: &DashMap<Ulid, Reservation>,
    room: &mut Ledger,
    user: &mut Ledger,
    id: Ulid,
    to: ReservationStatus,
) {
    let Some(mut record) = records.get_mut(&id) else {
        warn!("status change for unknown reservation {id}");
        return;
    };
    match record.status.transition(to) {
        Ok(status) => {
            record.status = status;
            room.remove_slot(id);
            user.remove_slot(id);
        }
        Err(e) => warn!("reservation {id}: {e}"),
    }
}

/// Id of an active claim that a replayed create would overlap. Only a log
/// written by an interrupted commit can contain one; the later create loses.
fn replay_clash(
    records: &DashMap<Ulid, Reservation>,
    room: &Ledger,
    user: &Ledger,
    event: &Event,
) -> Option<Ulid> {
    let Event::ReservationCreated { reservation } = event else {
        return None;
    };
    if !reservation.is_active() || records.contains_key(&reservation.id) {
        return None;
    }
    room.overlapping(&reservation.span)
        .chain(user.overlapping(&reservation.span))
        .map(|slot| slot.id)
        .next()
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), StoreError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
        .map_err(|e| StoreError::Wal(e.to_string()))
}

/// (room_id, user_id) an event belongs to, given the records seen so far.
fn event_keys(records: &DashMap<Ulid, Reservation>, event: &Event) -> Option<(Ulid, Ulid)> {
    match event {
        Event::ReservationCreated { reservation } => Some((reservation.room_id, reservation.user_id)),
        other => records
            .get(&other.reservation_id())
            .map(|r| (r.room_id, r.user_id)),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Rebuild ledgers unlocked, then publish them behind their locks.
        let records: Arc<DashMap<Ulid, Reservation>> = Arc::new(DashMap::new());
        let mut rooms: HashMap<Ulid, Ledger> = HashMap::new();
        let mut users: HashMap<Ulid, Ledger> = HashMap::new();
        for event in &events {
            let Some((room_id, user_id)) = event_keys(&records, event) else {
                warn!("replay: skipping event for unknown reservation {}", event.reservation_id());
                continue;
            };
            let mut room = rooms.remove(&room_id).unwrap_or_default();
            let user = users.entry(user_id).or_default();
            match replay_clash(&records, &room, user, event) {
                Some(with) => warn!(
                    "replay: reservation {} overlaps active {with}, dropping it",
                    event.reservation_id()
                ),
                None => apply_event(&records, &mut room, user, event),
            }
            rooms.insert(room_id, room);
        }

        let engine = Self {
            records,
            rooms: rooms
                .into_iter()
                .map(|(id, l)| (id, Arc::new(RwLock::new(l))))
                .collect(),
            users: users
                .into_iter()
                .map(|(id, l)| (id, Arc::new(RwLock::new(l))))
                .collect(),
            wal_tx,
            commit_gate: Arc::new(RwLock::new(())),
        };
        debug!(
            "replayed {} events into {} reservations",
            events.len(),
            engine.records.len()
        );
        Ok(engine)
    }

    /// WAL-append then apply, on a spawned task that owns both ledger guards.
    /// The commit runs to completion even if the caller's future is dropped,
    /// so the log and the ledgers never disagree.
    pub(super) async fn persist_and_apply(&self, guards: LedgerGuards, event: Event) -> Result<(), StoreError> {
        let records = self.records.clone();
        let gate = self.commit_gate.clone();
        let wal_tx = self.wal_tx.clone();
        let commit = tokio::spawn(async move {
            let (mut room, mut user) = guards;
            let _gate = gate.read_owned().await;
            wal_append(&wal_tx, event.clone()).await?;
            apply_event(&records, &mut room, &mut user, &event);
            Ok::<(), StoreError>(())
        });
        commit
            .await
            .map_err(|e| StoreError::Wal(format!("commit task failed: {e}")))?
    }

    pub(super) fn room_ledger(&self, room_id: Ulid) -> SharedLedger {
        self.rooms.entry(room_id).or_default().value().clone()
    }

    pub(super) fn user_ledger(&self, user_id: Ulid) -> SharedLedger {
        self.users.entry(user_id).or_default().value().clone()
    }

    pub fn reservation_count(&self) -> usize {
        self.records.len()
    }
}
