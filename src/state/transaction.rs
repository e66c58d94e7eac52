use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Allocated,
    Consumed,
    Refunded,
    Adjusted,
    Expired,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Allocated => "allocated",
            TransactionType::Consumed => "consumed",
            TransactionType::Refunded => "refunded",
            TransactionType::Adjusted => "adjusted",
            TransactionType::Expired => "expired",
        }
    }

    /// Whether `amount` has the sign this type demands.
    pub fn accepts_amount(&self, amount: i64) -> bool {
        match self {
            TransactionType::Allocated | TransactionType::Refunded => amount > 0,
            TransactionType::Consumed | TransactionType::Expired => amount < 0,
            TransactionType::Adjusted => amount != 0,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record of one balance movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenTransaction {
    /// Position in the global log (0, 1, 2, ...)
    pub seq: u64,
    pub user_id: String,
    pub transaction_type: TransactionType,
    /// Signed: positive credits the user, negative debits
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    /// Booking that triggered this entry, if any
    pub booking_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only token transaction log.
///
/// Entries are never edited or removed; `seq` equals the entry's index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionLog {
    entries: Vec<TokenTransaction>,
}

impl TransactionLog {
    pub fn new() -> Self {
        TransactionLog {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_seq(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Append an entry, assigning its sequence number. Returns the stored record.
    pub(crate) fn append(&mut self, mut entry: TokenTransaction) -> &TokenTransaction {
        entry.seq = self.next_seq();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn all(&self) -> &[TokenTransaction] {
        &self.entries
    }

    /// A user's entries, newest first.
    ///
    /// The iterator is `Clone`, so a caller can restart it without re-querying.
    pub fn history<'a, 'u>(&'a self, user_id: &'u str) -> History<'a, 'u> {
        History {
            inner: self.entries.iter().rev(),
            user_id,
        }
    }

    /// Latest entry for a user, if any.
    pub fn latest_for(&self, user_id: &str) -> Option<&TokenTransaction> {
        self.history(user_id).next()
    }

    /// Entries referencing a booking, oldest first.
    pub fn for_booking<'a>(
        &'a self,
        booking_id: &'a str,
    ) -> impl Iterator<Item = &'a TokenTransaction> + 'a {
        self.entries
            .iter()
            .filter(move |t| t.booking_id.as_deref() == Some(booking_id))
    }
}

/// Newest-first iterator over one user's transactions.
#[derive(Debug, Clone)]
pub struct History<'a, 'u> {
    inner: std::iter::Rev<std::slice::Iter<'a, TokenTransaction>>,
    user_id: &'u str,
}

impl<'a, 'u> Iterator for History<'a, 'u> {
    type Item = &'a TokenTransaction;

    fn next(&mut self) -> Option<Self::Item> {
        let user_id = self.user_id;
        self.inner.by_ref().find(|t| t.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(user_id: &str, ty: TransactionType, amount: i64) -> TokenTransaction {
        TokenTransaction {
            seq: 0,
            user_id: user_id.to_string(),
            transaction_type: ty,
            amount,
            balance_before: 0,
            balance_after: amount,
            description: "test".to_string(),
            booking_id: None,
            created_by: "admin".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_append_assigns_seq() {
        let mut log = TransactionLog::new();
        log.append(entry("acme", TransactionType::Allocated, 40));
        let second = log.append(entry("beta", TransactionType::Allocated, 10));
        assert_eq!(second.seq, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_history_newest_first_and_restartable() {
        let mut log = TransactionLog::new();
        log.append(entry("acme", TransactionType::Allocated, 40));
        log.append(entry("beta", TransactionType::Allocated, 10));
        log.append(entry("acme", TransactionType::Consumed, -30));

        let history = log.history("acme");
        let first_pass: Vec<u64> = history.clone().map(|t| t.seq).collect();
        let second_pass: Vec<u64> = history.map(|t| t.seq).collect();
        assert_eq!(first_pass, vec![2, 0]);
        assert_eq!(first_pass, second_pass);
        assert_eq!(log.history("nobody").count(), 0);
    }

    #[test]
    fn test_amount_sign_rules() {
        assert!(TransactionType::Allocated.accepts_amount(5));
        assert!(!TransactionType::Allocated.accepts_amount(-5));
        assert!(TransactionType::Consumed.accepts_amount(-5));
        assert!(TransactionType::Expired.accepts_amount(-1));
        assert!(TransactionType::Adjusted.accepts_amount(-3));
        assert!(!TransactionType::Adjusted.accepts_amount(0));
    }
}
