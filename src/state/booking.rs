use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy category of a request. Carried for filtering/reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    WeeklyPlanning,
    SameWeekExceptional,
    MonthlyProvisional,
}

impl BookingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingType::WeeklyPlanning => "weekly_planning",
            BookingType::SameWeekExceptional => "same_week_exceptional",
            BookingType::MonthlyProvisional => "monthly_provisional",
        }
    }

    pub fn requires_justification(&self) -> bool {
        matches!(self, BookingType::SameWeekExceptional)
    }
}

impl fmt::Display for BookingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weekly_planning" => Ok(BookingType::WeeklyPlanning),
            "same_week_exceptional" => Ok(BookingType::SameWeekExceptional),
            "monthly_provisional" => Ok(BookingType::MonthlyProvisional),
            other => Err(format!("unknown booking type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

/// Ledger consequence of a permitted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    /// No tokens move
    None,
    /// Charge `tokens_consumed` (emits `consumed`)
    Charge,
    /// Reverse an earlier charge (emits `refunded`)
    Refund,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// `approved` is terminal for every target except `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }

    /// Transition table. `None` means the move is never allowed.
    pub fn transition_effect(&self, target: BookingStatus) -> Option<LedgerEffect> {
        use BookingStatus::*;
        match (self, target) {
            (Pending, Approved) => Some(LedgerEffect::Charge),
            (Pending, Rejected) => Some(LedgerEffect::None),
            (Pending, Cancelled) => Some(LedgerEffect::None),
            (Approved, Cancelled) => Some(LedgerEffect::Refund),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        self.transition_effect(target).is_some()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

/// Booking aggregate.
///
/// Invariants:
/// - `end > start` and the duration is within the policy cap
/// - `tokens_consumed` is fixed at admission and never changes
/// - Status only moves along `BookingStatus::transition_effect`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub machine_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    pub justification: Option<String>,
    /// Token cost reserved for this booking; charged only on approval
    pub tokens_consumed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Admin who approved or rejected the request
    pub approved_by: Option<String>,
}

impl Booking {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }

    pub fn is_pending(&self) -> bool {
        self.status == BookingStatus::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.status == BookingStatus::Approved
    }

    /// Move to `target`, returning the ledger effect.
    ///
    /// Returns `None` (and leaves the booking untouched) if the table forbids it.
    pub(crate) fn set_status(
        &mut self,
        target: BookingStatus,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Option<LedgerEffect> {
        let effect = self.status.transition_effect(target)?;
        if matches!(target, BookingStatus::Approved | BookingStatus::Rejected) {
            self.approved_by = Some(actor.to_string());
        }
        self.status = target;
        self.updated_at = at;
        Some(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_booking() -> Booking {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Booking {
            id: "bk-1".to_string(),
            user_id: "acme".to_string(),
            machine_id: "cnc-1".to_string(),
            start,
            end: start + chrono::Duration::hours(5),
            booking_type: BookingType::WeeklyPlanning,
            status: BookingStatus::Pending,
            justification: None,
            tokens_consumed: 30,
            created_at: start,
            updated_at: start,
            approved_by: None,
        }
    }

    #[test]
    fn test_transition_table() {
        use BookingStatus::*;
        assert_eq!(Pending.transition_effect(Approved), Some(LedgerEffect::Charge));
        assert_eq!(Pending.transition_effect(Rejected), Some(LedgerEffect::None));
        assert_eq!(Pending.transition_effect(Cancelled), Some(LedgerEffect::None));
        assert_eq!(Approved.transition_effect(Cancelled), Some(LedgerEffect::Refund));

        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Pending));
        for terminal in [Rejected, Cancelled] {
            for target in [Pending, Approved, Rejected, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_set_status_records_approver() {
        let mut booking = sample_booking();
        let at = booking.start;
        assert_eq!(
            booking.set_status(BookingStatus::Approved, "admin", at),
            Some(LedgerEffect::Charge)
        );
        assert_eq!(booking.approved_by.as_deref(), Some("admin"));
        assert!(booking.is_approved());
    }

    #[test]
    fn test_set_status_rejects_illegal_move() {
        let mut booking = sample_booking();
        booking.status = BookingStatus::Rejected;
        assert_eq!(booking.set_status(BookingStatus::Approved, "admin", booking.start), None);
        assert_eq!(booking.status, BookingStatus::Rejected);
        assert!(booking.approved_by.is_none());
    }

    #[test]
    fn test_duration() {
        assert_eq!(sample_booking().duration_ms(), 5 * 3_600_000);
    }
}
