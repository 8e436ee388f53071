//! Pure accept/reject logic for a proposed reservation.
//!
//! Rules are checked in a fixed order and the first failure wins, so the
//! same request always reports the same reason.

use ulid::Ulid;

use crate::model::*;

/// Opening window compared on the hour-of-day of each endpoint.
///
/// Only the hour is compared: a request passes when `hour(start) >= open_hour`
/// and `hour(end) <= close_hour`. An end of 18:45 therefore passes with the
/// default 8–18 window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    pub open_hour: u32,
    pub close_hour: u32,
    /// Offset added to UTC before taking the hour of day.
    pub utc_offset_ms: Ms,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self { open_hour: 8, close_hour: 18, utc_offset_ms: 0 }
    }
}

impl BusinessHours {
    pub fn hour_of_day(&self, t: Ms) -> u32 {
        // Reduce both terms first so the sum cannot overflow.
        let local = t.rem_euclid(DAY_MS) + self.utc_offset_ms.rem_euclid(DAY_MS);
        (local.rem_euclid(DAY_MS) / HOUR_MS) as u32
    }

    pub fn admits(&self, span: &Span) -> bool {
        self.hour_of_day(span.start) >= self.open_hour && self.hour_of_day(span.end) <= self.close_hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RoomUnavailable,
    InvalidInterval,
    PastInterval,
    OutsideBusinessHours,
    RoomConflict { with: Ulid },
    UserConflict { with: Ulid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Verdict::Accept => Ok(()),
            Verdict::Reject(r) => Err(r),
        }
    }
}

/// First active reservation in `candidates` overlapping `span`.
pub fn first_active_overlap(candidates: &[Reservation], span: &Span) -> Option<Ulid> {
    candidates
        .iter()
        .find(|r| r.is_active() && r.span.overlaps(span))
        .map(|r| r.id)
}

pub fn decide(
    proposed: Span,
    room_active: bool,
    room_overlaps: &[Reservation],
    user_overlaps: &[Reservation],
    now: Ms,
    hours: &BusinessHours,
) -> Verdict {
    if !room_active {
        return Verdict::Reject(Rejection::RoomUnavailable);
    }
    if !proposed.is_well_formed() {
        return Verdict::Reject(Rejection::InvalidInterval);
    }
    if proposed.start < now {
        return Verdict::Reject(Rejection::PastInterval);
    }
    if !hours.admits(&proposed) {
        return Verdict::Reject(Rejection::OutsideBusinessHours);
    }
    if let Some(with) = first_active_overlap(room_overlaps, &proposed) {
        return Verdict::Reject(Rejection::RoomConflict { with });
    }
    if let Some(with) = first_active_overlap(user_overlaps, &proposed) {
        return Verdict::Reject(Rejection::UserConflict { with });
    }
    Verdict::Accept
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-01-01T00:00:00Z
    const DAY0: Ms = 1_767_225_600_000;
    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn at(hours: Ms, minutes: Ms) -> Ms {
        DAY0 + hours * H + minutes * M
    }

    fn existing(span: Span, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            span,
            purpose: None,
            status,
            created_at: 0,
        }
    }

    fn decide_simple(span: Span, room: &[Reservation], user: &[Reservation]) -> Verdict {
        decide(span, true, room, user, DAY0, &BusinessHours::default())
    }

    #[test]
    fn accepts_clean_request() {
        let v = decide_simple(Span::new(at(9, 0), at(10, 0)), &[], &[]);
        assert_eq!(v, Verdict::Accept);
    }

    #[test]
    fn inactive_room_wins_over_everything() {
        let v = decide(
            Span { start: at(20, 0), end: at(19, 0) },
            false,
            &[],
            &[],
            DAY0 + 10 * DAY_MS,
            &BusinessHours::default(),
        );
        assert_eq!(v, Verdict::Reject(Rejection::RoomUnavailable));
    }

    #[test]
    fn inverted_and_empty_intervals() {
        let hours = BusinessHours::default();
        let inverted = Span { start: at(11, 0), end: at(10, 0) };
        let empty = Span { start: at(10, 0), end: at(10, 0) };
        for span in [inverted, empty] {
            assert_eq!(
                decide(span, true, &[], &[], DAY0, &hours),
                Verdict::Reject(Rejection::InvalidInterval)
            );
        }
    }

    #[test]
    fn past_boundary() {
        let hours = BusinessHours::default();
        let now = at(9, 0);
        let exact = Span::new(now, at(10, 0));
        assert_eq!(decide(exact, true, &[], &[], now, &hours), Verdict::Accept);

        let one_second_early = Span::new(now - 1_000, at(10, 0));
        assert_eq!(
            decide(one_second_early, true, &[], &[], now, &hours),
            Verdict::Reject(Rejection::PastInterval)
        );
    }

    #[test]
    fn business_hours_boundary() {
        assert_eq!(
            decide_simple(Span::new(at(7, 59), at(9, 0)), &[], &[]),
            Verdict::Reject(Rejection::OutsideBusinessHours)
        );
        assert_eq!(decide_simple(Span::new(at(8, 0), at(18, 0)), &[], &[]), Verdict::Accept);
        assert_eq!(
            decide_simple(Span::new(at(17, 0), at(19, 0)), &[], &[]),
            Verdict::Reject(Rejection::OutsideBusinessHours)
        );
    }

    #[test]
    fn business_hours_compares_hour_only() {
        // 18:45 has hour 18, which is not > 18.
        assert_eq!(decide_simple(Span::new(at(17, 0), at(18, 45)), &[], &[]), Verdict::Accept);
    }

    #[test]
    fn business_hours_respects_offset() {
        // UTC-5: 13:00Z is 08:00 local.
        let hours = BusinessHours { utc_offset_ms: -5 * H, ..BusinessHours::default() };
        assert_eq!(hours.hour_of_day(at(13, 0)), 8);
        assert!(hours.admits(&Span::new(at(13, 0), at(14, 0))));
        assert!(!hours.admits(&Span::new(at(9, 0), at(10, 0))));
    }

    #[test]
    fn hour_of_day_at_timestamp_extremes() {
        let east = BusinessHours { utc_offset_ms: 2 * H, ..BusinessHours::default() };
        let west = BusinessHours { utc_offset_ms: -2 * H, ..BusinessHours::default() };
        assert_eq!(BusinessHours::default().hour_of_day(Ms::MAX), 7);
        assert_eq!(east.hour_of_day(Ms::MAX), 9);
        assert_eq!(west.hour_of_day(Ms::MIN), 14);
    }

    #[test]
    fn half_open_room_conflicts() {
        let booked = existing(Span::new(at(10, 0), at(11, 0)), ReservationStatus::Active);
        let room = [booked.clone()];

        assert_eq!(decide_simple(Span::new(at(11, 0), at(12, 0)), &room, &[]), Verdict::Accept);
        assert_eq!(decide_simple(Span::new(at(9, 0), at(10, 0)), &room, &[]), Verdict::Accept);
        assert_eq!(
            decide_simple(Span::new(at(10, 30), at(11, 30)), &room, &[]),
            Verdict::Reject(Rejection::RoomConflict { with: booked.id })
        );
    }

    #[test]
    fn cancelled_and_completed_do_not_block() {
        let span = Span::new(at(10, 0), at(11, 0));
        let gone = [
            existing(span, ReservationStatus::Cancelled),
            existing(span, ReservationStatus::Completed),
        ];
        assert_eq!(decide_simple(span, &gone, &gone), Verdict::Accept);
    }

    #[test]
    fn room_conflict_reported_before_user_conflict() {
        let span = Span::new(at(10, 0), at(11, 0));
        let room = [existing(span, ReservationStatus::Active)];
        let user = [existing(span, ReservationStatus::Active)];
        assert!(matches!(
            decide_simple(span, &room, &user),
            Verdict::Reject(Rejection::RoomConflict { .. })
        ));
        assert_eq!(
            decide_simple(span, &[], &user),
            Verdict::Reject(Rejection::UserConflict { with: user[0].id })
        );
    }

    #[test]
    fn verdict_into_result() {
        assert_eq!(Verdict::Accept.into_result(), Ok(()));
        assert_eq!(
            Verdict::Reject(Rejection::PastInterval).into_result(),
            Err(Rejection::PastInterval)
        );
    }
}
