//! Booking orchestration: identity, room lookup, pre-check, atomic commit.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::directory::RoomDirectory;
use crate::engine::{ConflictKind, ReservationStore, StoreError};
use crate::identity::{AuthError, Caller, IdentityProvider};
use crate::limits::{MAX_QUERY_WINDOW_MS, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::observability;
use crate::resolver::{decide, Rejection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("start must be before end")]
    InvalidInterval,
    #[error("reservations cannot start in the past")]
    PastInterval,
    #[error("reservations must fall within business hours")]
    OutsideBusinessHours,
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("{kind} conflict: the interval overlaps reservation {with}")]
    Conflict { kind: ConflictKind, with: Ulid },
    #[error("room is missing or inactive")]
    RoomUnavailable,
    #[error("not allowed to act on this reservation")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("reservation is no longer active")]
    AlreadyCancelled,
    #[error("reservation store unavailable, try again later")]
    Unavailable,
}

impl BookingError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Unauthenticated => "unauthenticated",
            BookingError::Validation(_) => "validation",
            BookingError::Conflict { kind: ConflictKind::Room, .. } => "room_conflict",
            BookingError::Conflict { kind: ConflictKind::User, .. } => "user_conflict",
            BookingError::RoomUnavailable => "room_unavailable",
            BookingError::Forbidden => "forbidden",
            BookingError::NotFound(_) => "not_found",
            BookingError::AlreadyCancelled => "already_cancelled",
            BookingError::Unavailable => "unavailable",
        }
    }
}

impl From<AuthError> for BookingError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthenticated => BookingError::Unauthenticated,
        }
    }
}

impl From<Rejection> for BookingError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::RoomUnavailable => BookingError::RoomUnavailable,
            Rejection::InvalidInterval => ValidationError::InvalidInterval.into(),
            Rejection::PastInterval => ValidationError::PastInterval.into(),
            Rejection::OutsideBusinessHours => ValidationError::OutsideBusinessHours.into(),
            Rejection::RoomConflict { with } => BookingError::Conflict { kind: ConflictKind::Room, with },
            Rejection::UserConflict { with } => BookingError::Conflict { kind: ConflictKind::User, with },
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => BookingError::NotFound(id),
            StoreError::Conflict { kind, with } => BookingError::Conflict { kind, with },
            StoreError::Forbidden => BookingError::Forbidden,
            StoreError::InvalidTransition(_) => BookingError::AlreadyCancelled,
            StoreError::LimitExceeded(what) => ValidationError::LimitExceeded(what).into(),
            StoreError::Timeout | StoreError::Wal(_) | StoreError::AlreadyExists(_) | StoreError::NotEnded(_) => {
                error!("reservation store failure: {e}");
                BookingError::Unavailable
            }
        }
    }
}

/// Refuse timestamps the store would never accept before any arithmetic runs on them.
fn check_range(span: &Span) -> Result<(), ValidationError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(ValidationError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// A booking request as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub purpose: Option<String>,
}

pub struct BookingService {
    store: Arc<dyn ReservationStore>,
    rooms: Arc<dyn RoomDirectory>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: ServiceConfig,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        rooms: Arc<dyn RoomDirectory>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        config: ServiceConfig,
    ) -> Self {
        Self { store, rooms, identity, clock, config }
    }

    fn record<T>(op: &'static str, started: Instant, result: &Result<T, BookingError>) {
        metrics::counter!(
            observability::OPERATIONS_TOTAL,
            "op" => op,
            "outcome" => observability::outcome_label(result)
        )
        .increment(1);
        metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
            .record(started.elapsed().as_secs_f64());
    }

    /// Run a store write, retrying transient failures with exponential backoff.
    async fn with_retries<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(e) if e.is_transient() && retries < self.config.max_retries => {
                    let delay = self.config.retry_backoff.saturating_mul(1 << retries.min(16));
                    retries += 1;
                    warn!("{op}: transient store failure ({e}), retry {retries} in {delay:?}");
                    metrics::counter!(observability::STORE_RETRIES_TOTAL, "op" => op).increment(1);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn authenticate(&self, credential: &str) -> Result<Caller, BookingError> {
        Ok(self.identity.authenticate(credential).await?)
    }

    // ── Writes ───────────────────────────────────────────────

    pub async fn create_reservation(
        &self,
        credential: &str,
        request: NewReservation,
    ) -> Result<Reservation, BookingError> {
        let started = Instant::now();
        let result = self.create(credential, request).await;
        Self::record("create", started, &result);
        result
    }

    async fn create(&self, credential: &str, request: NewReservation) -> Result<Reservation, BookingError> {
        let caller = self.authenticate(credential).await?;
        if !self.rooms.exists(request.room_id).await {
            return Err(BookingError::NotFound(request.room_id));
        }
        let room_active = self.rooms.is_active(request.room_id).await;
        let span = Span { start: request.start, end: request.end };
        if span.is_well_formed() {
            check_range(&span)?;
        }
        let now = self.clock.now();

        // Fast-fail on a possibly stale read; the insert below re-checks atomically.
        let (room_hits, user_hits) = if span.is_well_formed() {
            (
                self.store.find_active_overlaps_for_room(request.room_id, span).await,
                self.store.find_active_overlaps_for_user(caller.user_id, span).await,
            )
        } else {
            (Vec::new(), Vec::new())
        };
        if let Err(rejection) = decide(
            span,
            room_active,
            &room_hits,
            &user_hits,
            now,
            &self.config.business_hours,
        )
        .into_result()
        {
            debug!("create on room {} rejected: {rejection:?}", request.room_id);
            return Err(rejection.into());
        }

        let candidate = Reservation {
            id: Ulid::new(),
            room_id: request.room_id,
            user_id: caller.user_id,
            span,
            purpose: request.purpose,
            status: ReservationStatus::Active,
            created_at: now,
        };
        let timeout = self.config.store_timeout;
        let created = self
            .with_retries("create", || self.store.create_if_no_conflict(candidate.clone(), timeout))
            .await
            .map_err(|e| {
                if let StoreError::Conflict { kind, with } = &e {
                    info!("create on room {} lost race: {kind} conflict with {with}", candidate.room_id);
                    metrics::counter!(observability::RACES_LOST_TOTAL).increment(1);
                }
                BookingError::from(e)
            })?;

        info!(
            "reservation {} created: room {} user {} [{}, {})",
            created.id, created.room_id, created.user_id, created.span.start, created.span.end
        );
        Ok(created)
    }

    pub async fn cancel_reservation(&self, credential: &str, id: Ulid) -> Result<(), BookingError> {
        let started = Instant::now();
        let result = self.cancel(credential, id).await;
        Self::record("cancel", started, &result);
        result
    }

    async fn cancel(&self, credential: &str, id: Ulid) -> Result<(), BookingError> {
        let caller = self.authenticate(credential).await?;
        let current = self.store.find_by_id(id).await.ok_or(BookingError::NotFound(id))?;
        if !caller.may_access(&current) {
            return Err(BookingError::Forbidden);
        }
        if current.effective_status(self.clock.now()).is_terminal() {
            return Err(BookingError::AlreadyCancelled);
        }

        let timeout = self.config.store_timeout;
        self.with_retries("cancel", || self.store.cancel(id, &caller, timeout))
            .await?;
        info!("reservation {id} cancelled by {}", caller.user_id);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn get_reservation(&self, credential: &str, id: Ulid) -> Result<Reservation, BookingError> {
        let caller = self.authenticate(credential).await?;
        let reservation = self.store.find_by_id(id).await.ok_or(BookingError::NotFound(id))?;
        if !caller.may_access(&reservation) {
            return Err(BookingError::Forbidden);
        }
        Ok(reservation.as_of(self.clock.now()))
    }

    /// The caller's own reservations, newest start first.
    pub async fn list_reservations_for_caller(&self, credential: &str) -> Result<Vec<Reservation>, BookingError> {
        let caller = self.authenticate(credential).await?;
        let now = self.clock.now();
        Ok(self
            .store
            .list_by_user(caller.user_id)
            .await
            .iter()
            .map(|r| r.as_of(now))
            .collect())
    }

    /// Every reservation, newest start first. Elevated callers only.
    pub async fn list_all_reservations(&self, credential: &str) -> Result<Vec<Reservation>, BookingError> {
        let caller = self.authenticate(credential).await?;
        if !caller.is_elevated() {
            return Err(BookingError::Forbidden);
        }
        let now = self.clock.now();
        Ok(self.store.list_all().await.iter().map(|r| r.as_of(now)).collect())
    }

    /// Active rooms with no active reservation overlapping `[start, end)`.
    ///
    /// Reservations that have ended read as completed, so only the part of the
    /// window from `now` on can be busy.
    pub async fn list_available_rooms(&self, start: Ms, end: Ms) -> Result<Vec<Ulid>, BookingError> {
        let span = Span::checked(start, end).ok_or(ValidationError::InvalidInterval)?;
        check_range(&span)?;
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(ValidationError::LimitExceeded("query window too wide").into());
        }
        let busy = match Span::checked(span.start.max(self.clock.now()), span.end) {
            Some(upcoming) => self.store.rooms_with_active_overlap(upcoming).await?,
            None => HashSet::new(),
        };
        let mut free: Vec<Ulid> = self
            .rooms
            .rooms()
            .await
            .into_iter()
            .filter(|room| room.active && !busy.contains(&room.id))
            .map(|room| room.id)
            .collect();
        free.sort();
        Ok(free)
    }
}
