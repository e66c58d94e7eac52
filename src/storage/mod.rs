pub mod kv;
pub mod memory;

pub use kv::FileStorage;
pub use memory::MemoryStorage;

use crate::state::State;
use crate::tx::Command;
use crate::error::Result;

/// Storage abstraction for the append-only command log and state snapshots.
///
/// Implementations must preserve:
/// - Append-only semantics for the command log; an append either lands
///   whole or not at all (`PersistenceInconsistency` if that cannot be
///   guaranteed)
/// - Atomic snapshot writes (crash-safe)
/// - Deterministic replay from the command log
pub trait Storage {
    /// Append a command to the log at position `expected_seq` (append-only,
    /// fsync before ack).
    ///
    /// If the log does not hold exactly `expected_seq` commands, nothing is
    /// written and `Error::LogConflict` is returned. The position check and
    /// the write are one step with respect to every other writer.
    fn append_command(&mut self, cmd: &Command, expected_seq: u64) -> Result<()>;

    /// Load the latest state snapshot with the sequence number of the next command
    ///
    /// Returns `None` if no snapshot exists (genesis state).
    fn load_state(&self) -> Result<Option<(State, u64)>>;

    /// Persist state snapshot atomically
    ///
    /// `next_seq` is the log position of the first command NOT reflected in `state`.
    fn persist_state(&mut self, state: &State, next_seq: u64) -> Result<()>;

    /// Load commands from the log starting at `from_seq` (inclusive)
    ///
    /// Sequence numbers are positional (0, 1, 2, ...).
    fn load_commands_from(&self, from_seq: u64) -> Result<Vec<Command>>;
}
