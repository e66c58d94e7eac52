//! Booking engine: the operations surrounding layers call.
//!
//! Every state-changing call runs validate, apply, log append and state swap
//! under one mutex. The append is conditional on the log position the
//! validation saw, so a balance check and the write that depends on it can
//! never interleave with another command, whether it comes from this process
//! or another session on the same data directory. The command log append is
//! the commit point; the snapshot written afterwards is only a cache.

use crate::config::BookingPolicy;
use crate::error::{Error, ErrorKind, Result, ValidationError};
use crate::replay::{self, UserReconciliation};
use crate::state::apply::Receipt;
use crate::state::{
    apply, Balance, Booking, BookingStatus, Machine, MachineCatalog, MachineStatus, Role, State,
    TokenTransaction, UserDirectory,
};
use crate::storage::Storage;
use crate::tx::validation::{validate, ValidationContext};
use crate::tx::{BookingRequest, Command, CommandKind};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

struct Inner<S> {
    state: State,
    next_seq: u64,
    storage: S,
}

pub struct BookingEngine<S: Storage> {
    inner: Mutex<Inner<S>>,
    policy: BookingPolicy,
}

impl<S: Storage> BookingEngine<S> {
    /// Open an engine over `storage`, replaying the command log to its tip.
    pub fn open(storage: S, policy: BookingPolicy) -> Result<Self> {
        let (state, next_seq) = replay::replay_to_tip(&storage, &policy).map_err(|e| {
            if e.kind() == ErrorKind::PersistenceInconsistency {
                error!(error = %e, "replay failed; manual reconciliation required");
            }
            e
        })?;
        debug!(next_seq, users = state.users.len(), "engine opened");
        Ok(BookingEngine {
            inner: Mutex::new(Inner {
                state,
                next_seq,
                storage,
            }),
            policy,
        })
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Lock the engine and fold in anything other sessions have committed
    /// to the shared log since this engine last looked.
    fn lock(&self) -> Result<MutexGuard<'_, Inner<S>>> {
        let mut guard = self.inner.lock().map_err(|_| {
            Error::PersistenceInconsistency("engine lock poisoned by a panicked command".to_string())
        })?;
        self.catch_up(&mut guard)?;
        Ok(guard)
    }

    fn catch_up(&self, inner: &mut Inner<S>) -> Result<()> {
        let newer = inner.storage.load_commands_from(inner.next_seq)?;
        if newer.is_empty() {
            return Ok(());
        }
        let from = inner.next_seq;
        let (state, next_seq) =
            replay::replay_commands(inner.state.clone(), &newer, from, &self.policy).map_err(|e| {
                error!(from, error = %e, "catching up with the command log failed");
                e
            })?;
        debug!(from, to = next_seq, "caught up with commands from another session");
        inner.state = state;
        inner.next_seq = next_seq;
        Ok(())
    }

    /// Validate and commit one command under this engine's policy.
    ///
    /// The append only lands if the log still ends where this engine's state
    /// does; otherwise `Error::LogConflict` is returned and the engine
    /// refreshes itself, so the caller may retry against current balances.
    /// On any error nothing is committed.
    pub fn execute(&self, cmd: Command) -> Result<Receipt> {
        let cmd = cmd.with_policy(self.policy.clone());
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let seq = inner.next_seq;
        let ctx = ValidationContext::new(seq, self.policy.clone());

        let (next_state, receipt) = apply(&inner.state, &cmd, &ctx).map_err(|e| {
            log_rejection(&cmd, &e);
            e
        })?;

        if let Err(e) = inner.storage.append_command(&cmd, seq) {
            match e.kind() {
                ErrorKind::LogConflict => {
                    warn!(seq, command = cmd.kind.name(), error = %e,
                        "command log moved under this session; refreshing");
                    self.catch_up(inner)?;
                }
                ErrorKind::PersistenceInconsistency => {
                    error!(seq, command = cmd.kind.name(), actor = %cmd.actor, error = %e,
                        "command log append left storage inconsistent; manual reconciliation required");
                }
                _ => warn!(seq, command = cmd.kind.name(), error = %e, "command log append failed"),
            }
            return Err(e);
        }

        inner.state = next_state;
        inner.next_seq = seq + 1;

        if let Err(e) = inner.storage.persist_state(&inner.state, inner.next_seq) {
            // The log already holds the command; replay recovers the snapshot.
            warn!(seq, error = %e, "snapshot write failed");
        }

        log_commit(seq, &cmd, &receipt);
        Ok(receipt)
    }

    /// Validate a command against current state without committing it.
    pub fn dry_run(&self, cmd: &Command) -> Result<()> {
        let inner = self.lock()?;
        let ctx = ValidationContext::new(inner.next_seq, self.policy.clone());
        validate(&inner.state, cmd, &ctx)
    }

    /// Submit a booking request on behalf of `request.user_id`.
    pub fn submit_booking(&self, request: BookingRequest) -> Result<Booking> {
        let actor = request.user_id.clone();
        self.submit_booking_as(&actor, request)
    }

    /// Submit a booking request with an explicit actor (admins may book for others).
    pub fn submit_booking_as(&self, actor: &str, request: BookingRequest) -> Result<Booking> {
        let receipt = self.execute(Command::now(
            actor.to_string(),
            CommandKind::SubmitBooking(request),
        ))?;
        receipt
            .booking
            .ok_or_else(|| Error::InvalidCommand("submit produced no booking".to_string()))
    }

    pub fn transition_booking(
        &self,
        booking_id: &str,
        target: BookingStatus,
        acting_user_id: &str,
    ) -> Result<Booking> {
        let receipt = self.execute(Command::now(
            acting_user_id.to_string(),
            CommandKind::TransitionBooking {
                booking_id: booking_id.to_string(),
                target,
            },
        ))?;
        receipt
            .booking
            .ok_or_else(|| Error::InvalidCommand("transition produced no booking".to_string()))
    }

    pub fn register_user(
        &self,
        actor: &str,
        user_id: &str,
        name: &str,
        role: Role,
        tokens_given: u64,
    ) -> Result<Receipt> {
        self.execute(Command::now(
            actor.to_string(),
            CommandKind::RegisterUser {
                user_id: user_id.to_string(),
                name: name.to_string(),
                role,
                tokens_given,
            },
        ))
    }

    pub fn register_machine(
        &self,
        actor: &str,
        machine_id: &str,
        name: &str,
        machine_type: &str,
        token_cost_per_hour: Option<u64>,
    ) -> Result<Receipt> {
        self.execute(Command::now(
            actor.to_string(),
            CommandKind::RegisterMachine {
                machine_id: machine_id.to_string(),
                name: name.to_string(),
                machine_type: machine_type.to_string(),
                token_cost_per_hour,
            },
        ))
    }

    pub fn set_machine_status(
        &self,
        actor: &str,
        machine_id: &str,
        status: MachineStatus,
    ) -> Result<Receipt> {
        self.execute(Command::now(
            actor.to_string(),
            CommandKind::SetMachineStatus {
                machine_id: machine_id.to_string(),
                status,
            },
        ))
    }

    pub fn allocate_tokens(
        &self,
        actor: &str,
        user_id: &str,
        amount: u64,
        description: &str,
    ) -> Result<TokenTransaction> {
        self.ledger_command(
            actor,
            CommandKind::AllocateTokens {
                user_id: user_id.to_string(),
                amount,
                description: description.to_string(),
            },
        )
    }

    pub fn adjust_tokens(
        &self,
        actor: &str,
        user_id: &str,
        amount: i64,
        description: &str,
    ) -> Result<TokenTransaction> {
        self.ledger_command(
            actor,
            CommandKind::AdjustTokens {
                user_id: user_id.to_string(),
                amount,
                description: description.to_string(),
            },
        )
    }

    pub fn expire_tokens(
        &self,
        actor: &str,
        user_id: &str,
        amount: u64,
        description: &str,
    ) -> Result<TokenTransaction> {
        self.ledger_command(
            actor,
            CommandKind::ExpireTokens {
                user_id: user_id.to_string(),
                amount,
                description: description.to_string(),
            },
        )
    }

    fn ledger_command(&self, actor: &str, kind: CommandKind) -> Result<TokenTransaction> {
        let receipt = self.execute(Command::now(actor.to_string(), kind))?;
        receipt
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidCommand("ledger command produced no entry".to_string()))
    }

    /// `{given, consumed, remaining}` derived from the bookings, never cached.
    pub fn get_balance(&self, user_id: &str) -> Result<Balance> {
        let inner = self.lock()?;
        inner
            .state
            .balance(user_id)
            .ok_or_else(|| ValidationError::UserNotFound(user_id.to_string()).into())
    }

    /// A user's token transactions, newest first.
    pub fn get_transaction_history(&self, user_id: &str) -> Result<Vec<TokenTransaction>> {
        let inner = self.lock()?;
        if inner.state.get_user(user_id)?.is_none() {
            return Err(ValidationError::UserNotFound(user_id.to_string()).into());
        }
        Ok(inner.state.history(user_id).cloned().collect())
    }

    pub fn get_booking(&self, booking_id: &str) -> Result<Option<Booking>> {
        Ok(self.lock()?.state.booking(booking_id).cloned())
    }

    pub fn bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>> {
        Ok(self
            .lock()?
            .state
            .bookings_for_user(user_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn bookings_for_machine(&self, machine_id: &str) -> Result<Vec<Booking>> {
        Ok(self
            .lock()?
            .state
            .bookings_for_machine(machine_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn bookings_with_status(&self, status: BookingStatus) -> Result<Vec<Booking>> {
        Ok(self
            .lock()?
            .state
            .bookings_with_status(status)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn list_available_machines(&self) -> Result<Vec<Machine>> {
        let inner = self.lock()?;
        let machines = inner.state.list_available()?;
        Ok(machines.into_iter().cloned().collect())
    }

    /// Audit the transaction log against the ledger.
    pub fn reconcile(&self) -> Result<Vec<UserReconciliation>> {
        let inner = self.lock()?;
        replay::reconcile(&inner.state).map_err(|e| {
            error!(error = %e, "ledger reconciliation failed; manual reconciliation required");
            e
        })
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<State> {
        Ok(self.lock()?.state.clone())
    }

    /// Log position of the next command.
    pub fn next_seq(&self) -> Result<u64> {
        Ok(self.lock()?.next_seq)
    }
}

fn log_rejection(cmd: &Command, e: &Error) {
    match e.kind() {
        ErrorKind::PersistenceInconsistency => {
            error!(command = cmd.kind.name(), actor = %cmd.actor, error = %e,
                "ledger and log disagree; command aborted, manual reconciliation required")
        }
        _ => warn!(command = cmd.kind.name(), actor = %cmd.actor, error = %e, "command rejected"),
    }
}

fn log_commit(seq: u64, cmd: &Command, receipt: &Receipt) {
    match &cmd.kind {
        CommandKind::SubmitBooking(_) | CommandKind::TransitionBooking { .. } => {
            if let Some(b) = &receipt.booking {
                info!(seq, actor = %cmd.actor, booking = %b.id, user = %b.user_id,
                    status = %b.status, tokens = b.tokens_consumed, "booking committed");
            }
        }
        _ => info!(seq, actor = %cmd.actor, command = cmd.kind.name(), "command committed"),
    }
    for t in &receipt.transactions {
        info!(seq, user = %t.user_id, kind = %t.transaction_type, amount = t.amount,
            balance_before = t.balance_before, balance_after = t.balance_after,
            "ledger entry recorded");
    }
}
