use crate::error::{Error, Result};
use crate::state::State;
use crate::storage::Storage;
use crate::tx::Command;

/// In-process storage. Nothing survives the process; useful for tests and
/// for embedding the engine behind a caller-owned persistence layer.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    commands: Vec<Command>,
    snapshot: Option<(State, u64)>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

impl Storage for MemoryStorage {
    fn append_command(&mut self, cmd: &Command, expected_seq: u64) -> Result<()> {
        let found = self.commands.len() as u64;
        if found != expected_seq {
            return Err(Error::LogConflict {
                expected: expected_seq,
                found,
            });
        }
        self.commands.push(cmd.clone());
        Ok(())
    }

    fn load_state(&self) -> Result<Option<(State, u64)>> {
        Ok(self.snapshot.clone())
    }

    fn persist_state(&mut self, state: &State, next_seq: u64) -> Result<()> {
        self.snapshot = Some((state.clone(), next_seq));
        Ok(())
    }

    fn load_commands_from(&self, from_seq: u64) -> Result<Vec<Command>> {
        let from = usize::try_from(from_seq).unwrap_or(usize::MAX);
        Ok(self.commands.iter().skip(from).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MachineStatus;
    use crate::tx::CommandKind;

    fn offline(machine_id: &str) -> Command {
        Command::now(
            "admin".to_string(),
            CommandKind::SetMachineStatus {
                machine_id: machine_id.to_string(),
                status: MachineStatus::Offline,
            },
        )
    }

    #[test]
    fn test_append_checks_position() {
        let mut storage = MemoryStorage::new();
        storage.append_command(&offline("a"), 0).unwrap();
        let err = storage.append_command(&offline("b"), 0).unwrap_err();
        assert!(matches!(err, Error::LogConflict { expected: 0, found: 1 }));
        assert_eq!(storage.command_count(), 1);
    }
}
