//! Ledger accessor: the single derivation point for token balances.
//!
//! Nothing here reads a stored counter. Consumption is always summed from the
//! user's approved bookings, so the figures cannot drift from the bookings.

use crate::state::{Booking, BookingStatus, User};
use serde::{Deserialize, Serialize};

/// A user's derived token position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub given: u64,
    pub consumed: u64,
    /// `given - consumed`; only negative if the persisted data is inconsistent
    pub remaining: i64,
}

/// Sum of `tokens_consumed` over the user's approved bookings.
pub fn consumed_tokens<'a, I>(user_id: &str, bookings: I) -> u64
where
    I: IntoIterator<Item = &'a Booking>,
{
    bookings
        .into_iter()
        .filter(|b| b.user_id == user_id && b.status == BookingStatus::Approved)
        .fold(0u64, |acc, b| acc.saturating_add(b.tokens_consumed))
}

pub fn remaining_tokens<'a, I>(user: &User, bookings: I) -> i64
where
    I: IntoIterator<Item = &'a Booking>,
{
    balance(user, bookings).remaining
}

pub fn balance<'a, I>(user: &User, bookings: I) -> Balance
where
    I: IntoIterator<Item = &'a Booking>,
{
    let consumed = consumed_tokens(&user.id, bookings);
    Balance {
        given: user.tokens_given,
        consumed,
        remaining: to_signed(user.tokens_given) - to_signed(consumed),
    }
}

pub(crate) fn to_signed(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
