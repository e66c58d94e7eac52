use crate::error::{Error, Result};
use crate::state::{
    ledger, Booking, BookingStatus, LedgerEffect, Machine, State, TokenTransaction,
    TransactionType, User,
};
use crate::tx::validation::{
    validate_register_machine, validate_register_user, validate_set_machine_status,
    validate_submit_booking, validate_token_change, validate_transition, ValidationContext,
};
use crate::tx::{booking_id_for, Command, CommandKind};
use chrono::{DateTime, Utc};

/// What a successfully applied command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Booking created or transitioned by the command
    pub booking: Option<Booking>,
    /// Ledger entries appended by the command, oldest first
    pub transactions: Vec<TokenTransaction>,
}

/// Validate `cmd` against `state` and, if it passes, return the next state.
///
/// `state` is never modified: on any error the caller still holds the
/// untouched previous state, so a failed command leaves nothing half-applied.
pub fn apply(state: &State, cmd: &Command, ctx: &ValidationContext) -> Result<(State, Receipt)> {
    let mut new_state = state.clone();
    let receipt = match &cmd.kind {
        CommandKind::RegisterUser {
            user_id,
            name,
            role,
            tokens_given,
        } => {
            validate_register_user(state, cmd)?;
            let user = User::new(user_id.clone(), name.clone(), *role);
            apply_register_user(&mut new_state, user, *tokens_given, cmd)?
        }
        CommandKind::RegisterMachine {
            machine_id,
            name,
            machine_type,
            token_cost_per_hour,
        } => {
            validate_register_machine(state, cmd)?;
            let mut machine = Machine::new(machine_id.clone(), name.clone(), machine_type.clone());
            machine.token_cost_per_hour = *token_cost_per_hour;
            new_state.insert_machine(machine);
            Receipt::default()
        }
        CommandKind::SetMachineStatus { machine_id, status } => {
            validate_set_machine_status(state, cmd)?;
            let machine = new_state
                .machine_mut(machine_id)
                .ok_or_else(|| Error::InvalidCommand(format!("Machine {} vanished", machine_id)))?;
            machine.status = *status;
            Receipt::default()
        }
        CommandKind::AllocateTokens {
            user_id,
            amount,
            description,
        } => {
            validate_token_change(state, cmd)?;
            let entry = record(
                &mut new_state,
                Entry::new(user_id, TransactionType::Allocated, ledger::to_signed(*amount), description, cmd),
                |s| grant(s, user_id, *amount),
            )?;
            Receipt {
                booking: None,
                transactions: vec![entry],
            }
        }
        CommandKind::AdjustTokens {
            user_id,
            amount,
            description,
        } => {
            validate_token_change(state, cmd)?;
            let delta = *amount;
            let entry = record(
                &mut new_state,
                Entry::new(user_id, TransactionType::Adjusted, delta, description, cmd),
                |s| {
                    if delta >= 0 {
                        grant(s, user_id, delta.unsigned_abs())
                    } else {
                        revoke(s, user_id, delta.unsigned_abs())
                    }
                },
            )?;
            Receipt {
                booking: None,
                transactions: vec![entry],
            }
        }
        CommandKind::ExpireTokens {
            user_id,
            amount,
            description,
        } => {
            validate_token_change(state, cmd)?;
            let entry = record(
                &mut new_state,
                Entry::new(user_id, TransactionType::Expired, -ledger::to_signed(*amount), description, cmd),
                |s| revoke(s, user_id, *amount),
            )?;
            Receipt {
                booking: None,
                transactions: vec![entry],
            }
        }
        CommandKind::SubmitBooking(_) => {
            let draft = validate_submit_booking(state, cmd, ctx)?;
            let id = booking_id_for(cmd, ctx.seq)?;
            if new_state.booking(&id).is_some() {
                return Err(Error::PersistenceInconsistency(format!(
                    "Booking id {} already taken",
                    id
                )));
            }
            let booking = draft.into_booking(id, cmd.issued_at);
            new_state.insert_booking(booking.clone());
            Receipt {
                booking: Some(booking),
                transactions: Vec::new(),
            }
        }
        CommandKind::TransitionBooking { booking_id, target } => {
            let effect = validate_transition(state, &cmd.actor, booking_id, *target, &ctx.policy)?;
            apply_transition(&mut new_state, booking_id, *target, effect, cmd)?
        }
    };

    Ok((new_state, receipt))
}

fn apply_register_user(
    state: &mut State,
    user: User,
    tokens_given: u64,
    cmd: &Command,
) -> Result<Receipt> {
    let user_id = user.id.clone();
    state.insert_user(user);
    if tokens_given == 0 {
        return Ok(Receipt::default());
    }
    let entry = record(
        state,
        Entry::new(
            &user_id,
            TransactionType::Allocated,
            ledger::to_signed(tokens_given),
            "Initial allocation",
            cmd,
        ),
        |s| grant(s, &user_id, tokens_given),
    )?;
    Ok(Receipt {
        booking: None,
        transactions: vec![entry],
    })
}

fn apply_transition(
    state: &mut State,
    booking_id: &str,
    target: BookingStatus,
    effect: LedgerEffect,
    cmd: &Command,
) -> Result<Receipt> {
    let (user_id, tokens) = {
        let booking = state
            .booking(booking_id)
            .ok_or_else(|| Error::InvalidCommand(format!("Booking {} vanished", booking_id)))?;
        (booking.user_id.clone(), booking.tokens_consumed)
    };
    let actor = cmd.actor.clone();
    let at = cmd.issued_at;
    let flip = move |s: &mut State| -> Result<()> {
        let booking = s
            .booking_mut(booking_id)
            .ok_or_else(|| Error::InvalidCommand(format!("Booking {} vanished", booking_id)))?;
        booking.set_status(target, &actor, at).ok_or_else(|| {
            Error::InvalidCommand(format!("Transition to {} not allowed", target))
        })?;
        Ok(())
    };

    let entry = match effect {
        LedgerEffect::None => {
            flip(state)?;
            None
        }
        LedgerEffect::Charge => Some(record(
            state,
            Entry::new(
                &user_id,
                TransactionType::Consumed,
                -ledger::to_signed(tokens),
                &format!("Booking {} approved", booking_id),
                cmd,
            )
            .for_booking(booking_id),
            flip,
        )?),
        LedgerEffect::Refund => Some(record(
            state,
            Entry::new(
                &user_id,
                TransactionType::Refunded,
                ledger::to_signed(tokens),
                &format!("Booking {} cancelled after approval", booking_id),
                cmd,
            )
            .for_booking(booking_id),
            flip,
        )?),
    };

    Ok(Receipt {
        booking: state.booking(booking_id).cloned(),
        transactions: entry.into_iter().collect(),
    })
}

fn grant(state: &mut State, user_id: &str, amount: u64) -> Result<()> {
    let user = state
        .user_mut(user_id)
        .ok_or_else(|| Error::InvalidCommand(format!("User {} vanished", user_id)))?;
    user.grant(amount);
    Ok(())
}

fn revoke(state: &mut State, user_id: &str, amount: u64) -> Result<()> {
    let user = state
        .user_mut(user_id)
        .ok_or_else(|| Error::InvalidCommand(format!("User {} vanished", user_id)))?;
    user.revoke(amount).map_err(Error::InvalidCommand)?;
    Ok(())
}

/// Ledger entry under construction.
struct Entry<'a> {
    user_id: &'a str,
    transaction_type: TransactionType,
    amount: i64,
    description: String,
    booking_id: Option<String>,
    created_by: &'a str,
    created_at: DateTime<Utc>,
}

impl<'a> Entry<'a> {
    fn new(
        user_id: &'a str,
        transaction_type: TransactionType,
        amount: i64,
        description: &str,
        cmd: &'a Command,
    ) -> Self {
        Entry {
            user_id,
            transaction_type,
            amount,
            description: description.trim().to_string(),
            booking_id: None,
            created_by: &cmd.actor,
            created_at: cmd.issued_at,
        }
    }

    fn for_booking(mut self, booking_id: &str) -> Self {
        self.booking_id = Some(booking_id.to_string());
        self
    }
}

/// Apply `effect` and append the matching ledger entry as one unit.
///
/// `balance_before` comes from the ledger accessor before the effect runs;
/// after it runs the ledger must show exactly `balance_before + amount`.
/// Any disagreement means two code paths moved the balance differently, which
/// surfaces as `PersistenceInconsistency` instead of a silently wrong log.
fn record<F>(state: &mut State, entry: Entry<'_>, effect: F) -> Result<TokenTransaction>
where
    F: FnOnce(&mut State) -> Result<()>,
{
    if !entry.transaction_type.accepts_amount(entry.amount) {
        return Err(Error::InvalidCommand(format!(
            "{} entry cannot carry amount {}",
            entry.transaction_type, entry.amount
        )));
    }
    let before = state.remaining_tokens(entry.user_id).ok_or_else(|| {
        Error::InvalidCommand(format!("User {} not found", entry.user_id))
    })?;

    effect(state)?;

    let after = state.remaining_tokens(entry.user_id).ok_or_else(|| {
        Error::InvalidCommand(format!("User {} not found", entry.user_id))
    })?;
    let expected = before.checked_add(entry.amount).ok_or_else(|| {
        Error::InvalidCommand(format!("Balance overflow for {}", entry.user_id))
    })?;
    if after != expected {
        return Err(Error::PersistenceInconsistency(format!(
            "{} entry for {}: ledger moved {} -> {}, log expects {}",
            entry.transaction_type, entry.user_id, before, after, expected
        )));
    }

    let tx = TokenTransaction {
        seq: 0,
        user_id: entry.user_id.to_string(),
        transaction_type: entry.transaction_type,
        amount: entry.amount,
        balance_before: before,
        balance_after: after,
        description: entry.description,
        booking_id: entry.booking_id,
        created_by: entry.created_by.to_string(),
        created_at: entry.created_at,
    };
    Ok(state.transactions.append(tx).clone())
}
