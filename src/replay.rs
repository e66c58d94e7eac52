//! Replay service: rebuild state from snapshot + command log, and audit the
//! token transaction log against the ledger.

use crate::config::BookingPolicy;
use crate::error::{Error, Result};
use crate::state::{apply, State};
use crate::storage::Storage;
use crate::tx::validation::ValidationContext;
use crate::tx::Command;
use serde::Serialize;

/// Replay command log from storage to current tip.
///
/// - If a snapshot exists: load it, then replay commands from its `next_seq`.
/// - If no snapshot: replay from genesis (position 0).
///
/// A logged command that no longer applies means the log and state disagree;
/// that is reported as `PersistenceInconsistency`, never skipped.
pub fn replay_to_tip<S: Storage>(storage: &S, policy: &BookingPolicy) -> Result<(State, u64)> {
    let (state, next_seq) = storage.load_state()?.unwrap_or_else(|| (State::new(), 0));
    let commands = storage.load_commands_from(next_seq)?;
    if next_seq > 0 && commands.is_empty() {
        // Snapshot must not be ahead of the log.
        let logged = storage.load_commands_from(next_seq - 1)?;
        if logged.is_empty() {
            return Err(Error::PersistenceInconsistency(format!(
                "Snapshot covers {} commands but the log is shorter",
                next_seq
            )));
        }
    }
    replay_commands(state, &commands, next_seq, policy)
}

/// Apply `commands` on top of `state`; the first has log position `start_seq`.
///
/// Each command runs under the policy recorded on it; `policy` only covers
/// commands logged without one.
pub fn replay_commands(
    state: State,
    commands: &[Command],
    start_seq: u64,
    policy: &BookingPolicy,
) -> Result<(State, u64)> {
    let mut current = state;
    let mut seq = start_seq;
    for cmd in commands {
        let ctx = ValidationContext::replay_for_command(seq, cmd, policy);
        current = match apply(&current, cmd, &ctx) {
            Ok((next, _)) => next,
            Err(e) => {
                return Err(Error::PersistenceInconsistency(format!(
                    "Logged command {} ({}) no longer applies: {}",
                    seq,
                    cmd.kind.name(),
                    e
                )))
            }
        };
        seq += 1;
    }
    Ok((current, seq))
}

/// Per-user outcome of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReconciliation {
    pub user_id: String,
    /// Balance derived from allocation and approved bookings
    pub ledger_remaining: i64,
    /// Sum of the user's transaction amounts
    pub logged_total: i64,
    /// `balance_after` of the newest entry (0 if none)
    pub last_balance_after: i64,
}

impl UserReconciliation {
    pub fn is_consistent(&self) -> bool {
        self.ledger_remaining == self.logged_total
            && self.ledger_remaining == self.last_balance_after
            && self.ledger_remaining >= 0
    }
}

/// Check every user's transaction log against the ledger accessor.
///
/// Returns the per-user report (ordered by user id) when everything agrees,
/// otherwise `PersistenceInconsistency` naming the first user that does not.
pub fn reconcile(state: &State) -> Result<Vec<UserReconciliation>> {
    let mut ids: Vec<&String> = state.users.keys().collect();
    ids.sort();

    let mut report = Vec::with_capacity(ids.len());
    for id in ids {
        let ledger_remaining = state.remaining_tokens(id).unwrap_or(0);
        let logged_total: i64 = state.history(id).map(|t| t.amount).sum();
        let last_balance_after = state
            .transactions
            .latest_for(id)
            .map(|t| t.balance_after)
            .unwrap_or(0);
        let row = UserReconciliation {
            user_id: id.clone(),
            ledger_remaining,
            logged_total,
            last_balance_after,
        };
        if !row.is_consistent() {
            return Err(Error::PersistenceInconsistency(format!(
                "User {}: ledger remaining {}, logged total {}, last balance_after {}",
                row.user_id, row.ledger_remaining, row.logged_total, row.last_balance_after
            )));
        }
        report.push(row);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;
    use crate::storage::MemoryStorage;
    use crate::tx::CommandKind;
    use chrono::{TimeZone, Utc};

    fn commands() -> Vec<Command> {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        vec![
            Command::new(
                "root".to_string(),
                at,
                CommandKind::RegisterUser {
                    user_id: "root".to_string(),
                    name: "Root".to_string(),
                    role: Role::FacilityAdmin,
                    tokens_given: 0,
                },
            ),
            Command::new(
                "root".to_string(),
                at,
                CommandKind::RegisterUser {
                    user_id: "acme".to_string(),
                    name: "Acme".to_string(),
                    role: Role::Startup,
                    tokens_given: 40,
                },
            ),
            Command::new(
                "root".to_string(),
                at,
                CommandKind::AdjustTokens {
                    user_id: "acme".to_string(),
                    amount: -5,
                    description: "typo in grant".to_string(),
                },
            ),
        ]
    }

    #[test]
    fn test_replay_from_genesis() {
        let mut storage = MemoryStorage::new();
        for (seq, cmd) in commands().iter().enumerate() {
            storage.append_command(cmd, seq as u64).unwrap();
        }
        let (state, next_seq) = replay_to_tip(&storage, &BookingPolicy::default()).unwrap();
        assert_eq!(next_seq, 3);
        assert_eq!(state.remaining_tokens("acme"), Some(35));
        assert_eq!(reconcile(&state).unwrap().len(), 2);
    }

    #[test]
    fn test_replay_from_snapshot_matches_genesis() {
        let policy = BookingPolicy::default();
        let all = commands();
        let (partial, seq) = replay_commands(State::new(), &all[..2], 0, &policy).unwrap();

        let mut storage = MemoryStorage::new();
        for (seq, cmd) in all.iter().enumerate() {
            storage.append_command(cmd, seq as u64).unwrap();
        }
        storage.persist_state(&partial, seq).unwrap();

        let (from_snapshot, _) = replay_to_tip(&storage, &policy).unwrap();
        let (from_genesis, _) = replay_commands(State::new(), &all, 0, &policy).unwrap();
        assert_eq!(from_snapshot, from_genesis);
    }

    #[test]
    fn test_replay_uses_recorded_policy() {
        let admitted = BookingPolicy {
            max_duration_minutes: 600,
            ..BookingPolicy::default()
        };
        let at = Utc.with_ymd_and_hms(2026, 1, 6, 8, 0, 0).unwrap();
        let mut log = commands();
        log.push(
            Command::new(
                "root".to_string(),
                at,
                CommandKind::RegisterMachine {
                    machine_id: "kiln".to_string(),
                    name: "Kiln".to_string(),
                    machine_type: "firing".to_string(),
                    token_cost_per_hour: None,
                },
            )
            .with_policy(admitted.clone()),
        );
        log.push(
            Command::new(
                "acme".to_string(),
                at,
                CommandKind::SubmitBooking(crate::tx::BookingRequest {
                    user_id: "acme".to_string(),
                    machine_id: "kiln".to_string(),
                    start: Some(at),
                    end: Some(at + chrono::Duration::hours(9)),
                    booking_type: crate::state::BookingType::WeeklyPlanning,
                    justification: None,
                }),
            )
            .with_policy(admitted),
        );

        // Reopened with a tighter cap and a higher default cost.
        let current = BookingPolicy {
            max_duration_minutes: 240,
            default_token_cost: 3,
            ..BookingPolicy::default()
        };
        let (state, next_seq) = replay_commands(State::new(), &log, 0, &current).unwrap();
        assert_eq!(next_seq, 5);
        let booking = state.bookings_for_user("acme")[0];
        assert_eq!(booking.tokens_consumed, 9);
    }

    #[test]
    fn test_snapshot_ahead_of_log() {
        let mut storage = MemoryStorage::new();
        storage.persist_state(&State::new(), 4).unwrap();
        let err = replay_to_tip(&storage, &BookingPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::PersistenceInconsistency(_)));
    }

    #[test]
    fn test_unreplayable_command_is_inconsistency() {
        // Adjustment before the user exists cannot apply.
        let all = commands();
        let reordered = vec![all[0].clone(), all[2].clone()];
        let err = replay_commands(State::new(), &reordered, 0, &BookingPolicy::default())
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceInconsistency(_)));
    }

    #[test]
    fn test_reconcile_detects_drift() {
        let (mut state, _) =
            replay_commands(State::new(), &commands(), 0, &BookingPolicy::default()).unwrap();
        // Mutate the allocation behind the log's back.
        state.user_mut("acme").unwrap().tokens_given += 7;
        let err = reconcile(&state).unwrap_err();
        assert!(matches!(err, Error::PersistenceInconsistency(_)));
    }
}
