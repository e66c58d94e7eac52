pub mod apply;
pub mod booking;
pub mod ledger;
pub mod machine;
pub mod transaction;
pub mod user;

pub use apply::apply;
pub use booking::{Booking, BookingStatus, BookingType, LedgerEffect};
pub use ledger::Balance;
pub use machine::{Machine, MachineStatus};
pub use transaction::{History, TokenTransaction, TransactionLog, TransactionType};
pub use user::{Role, User};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read side of the machine catalog.
///
/// Lookups return `Err(Error::Unavailable)` when the backing catalog cannot
/// answer; a missing machine is `Ok(None)`. Callers pick any fallback policy.
pub trait MachineCatalog {
    fn get_machine(&self, id: &str) -> Result<Option<&Machine>>;

    /// Machines whose status is `available`, ordered by id.
    fn list_available(&self) -> Result<Vec<&Machine>>;
}

/// Read side of the user directory.
pub trait UserDirectory {
    fn get_user(&self, id: &str) -> Result<Option<&User>>;
}

/// Core domain state: users, machines, bookings and the token transaction log.
///
/// State is fully reconstructible by replaying commands from genesis.
/// Token balances are never stored here; see [`ledger`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    pub users: HashMap<String, User>,

    pub machines: HashMap<String, Machine>,

    pub bookings: HashMap<String, Booking>,

    pub transactions: TransactionLog,
}

impl State {
    /// Create empty genesis state
    pub fn new() -> Self {
        State {
            users: HashMap::new(),
            machines: HashMap::new(),
            bookings: HashMap::new(),
            transactions: TransactionLog::new(),
        }
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn machine(&self, id: &str) -> Option<&Machine> {
        self.machines.get(id)
    }

    pub fn machine_mut(&mut self, id: &str) -> Option<&mut Machine> {
        self.machines.get_mut(id)
    }

    pub fn insert_machine(&mut self, machine: Machine) {
        self.machines.insert(machine.id.clone(), machine);
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn booking_mut(&mut self, id: &str) -> Option<&mut Booking> {
        self.bookings.get_mut(id)
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id.clone(), booking);
    }

    /// All bookings owned by a user, oldest first.
    pub fn bookings_for_user(&self, user_id: &str) -> Vec<&Booking> {
        self.sorted_bookings(|b| b.user_id == user_id)
    }

    /// All bookings against a machine, ordered by start time.
    pub fn bookings_for_machine(&self, machine_id: &str) -> Vec<&Booking> {
        let mut out = self.sorted_bookings(|b| b.machine_id == machine_id);
        out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn bookings_with_status(&self, status: BookingStatus) -> Vec<&Booking> {
        self.sorted_bookings(|b| b.status == status)
    }

    fn sorted_bookings<F>(&self, pred: F) -> Vec<&Booking>
    where
        F: Fn(&Booking) -> bool,
    {
        let mut out: Vec<&Booking> = self.bookings.values().filter(|b| pred(b)).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Derived balance for a user; `None` if the user is unknown.
    pub fn balance(&self, user_id: &str) -> Option<Balance> {
        let user = self.user(user_id)?;
        Some(ledger::balance(user, self.bookings.values()))
    }

    /// Derived remaining tokens for a user; `None` if the user is unknown.
    pub fn remaining_tokens(&self, user_id: &str) -> Option<i64> {
        self.balance(user_id).map(|b| b.remaining)
    }

    /// A user's token transactions, newest first.
    pub fn history<'a, 'u>(&'a self, user_id: &'u str) -> History<'a, 'u> {
        self.transactions.history(user_id)
    }
}

impl MachineCatalog for State {
    fn get_machine(&self, id: &str) -> Result<Option<&Machine>> {
        Ok(self.machine(id))
    }

    fn list_available(&self) -> Result<Vec<&Machine>> {
        let mut out: Vec<&Machine> = self.machines.values().filter(|m| m.is_available()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

impl UserDirectory for State {
    fn get_user(&self, id: &str) -> Result<Option<&User>> {
        Ok(self.user(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_creation() {
        let state = State::new();
        assert!(state.users.is_empty());
        assert!(state.bookings.is_empty());
        assert!(state.transactions.is_empty());
    }

    #[test]
    fn test_balance_unknown_user() {
        let state = State::new();
        assert!(state.balance("ghost").is_none());
    }

    #[test]
    fn test_list_available_filters_status() {
        let mut state = State::new();
        state.insert_machine(Machine::new("b".to_string(), "Lathe".to_string(), "turning".to_string()));
        let mut down = Machine::new("a".to_string(), "Mill".to_string(), "milling".to_string());
        down.status = MachineStatus::Maintenance;
        state.insert_machine(down);
        state.insert_machine(Machine::new("c".to_string(), "Printer".to_string(), "3d".to_string()));

        let ids: Vec<&str> = state
            .list_available()
            .unwrap()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
