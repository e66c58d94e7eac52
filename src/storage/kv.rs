use crate::storage::Storage;
use crate::state::State;
use crate::tx::Command;
use crate::error::{Error, Result};
use crate::config::Config;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::PathBuf;
use std::fs;

/// File-based storage implementation using an append-only log and snapshots.
///
/// Files:
/// - `commands.log`: Append-only command log (length-prefixed bincode)
/// - `state.bin`: State snapshot (bincode serialized State + u64 next_seq)
/// - `state.bin.tmp`: Temporary file for atomic snapshot writes
///
/// Writers hold an exclusive lock on `commands.log` and readers a shared
/// one, so several processes can share a data directory.
pub struct FileStorage {
    log_path: PathBuf,
    state_path: PathBuf,
    state_tmp_path: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage with paths from config
    pub fn new(config: &Config) -> Self {
        FileStorage {
            log_path: config.get_command_log_path(),
            state_path: config.get_state_path(),
            state_tmp_path: config.get_state_path().with_extension("bin.tmp"),
        }
    }

    /// Create FileStorage with custom paths (for testing)
    pub fn with_paths(log_path: PathBuf, state_path: PathBuf) -> Self {
        let state_tmp_path = state_path.with_extension("bin.tmp");
        FileStorage {
            log_path,
            state_path,
            state_tmp_path,
        }
    }

    /// Ensure the data directory exists
    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        }
        Ok(())
    }

    /// Open the log for writing and take the exclusive lock; released on drop.
    fn lock_log_for_write(&self) -> Result<File> {
        self.ensure_dir()?;
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to open command log for append: {}", e)))?;
        FileExt::lock_exclusive(&file)
            .map_err(|e| Error::Storage(format!("Failed to lock command log: {}", e)))?;
        Ok(file)
    }

    fn write_record(file: &mut File, bytes: &[u8]) -> io::Result<()> {
        let len = bytes.len() as u64;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(bytes)?;
        file.sync_all()
    }
}

/// Walk the log from the start. Records at or after `from_seq` are handed to
/// `visit`; earlier ones are skipped without buffering. Returns the number of
/// whole records. A record cut short is `PersistenceInconsistency`.
fn scan_log<R, F>(reader: R, from_seq: u64, mut visit: F) -> Result<u64>
where
    R: Read,
    F: FnMut(u64, &[u8]) -> Result<()>,
{
    let mut reader = BufReader::new(reader);
    let mut current = 0u64;

    loop {
        let mut len_buf = [0u8; 8];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Storage(format!("Failed to read command log: {}", e))),
        }
        let len = u64::from_le_bytes(len_buf);
        let truncated = |detail: String| {
            Error::PersistenceInconsistency(format!("Command {} is truncated: {}", current, detail))
        };

        if current >= from_seq {
            let size = usize::try_from(len).map_err(|_| truncated(format!("length {}", len)))?;
            let mut buf = vec![0u8; size];
            reader
                .read_exact(&mut buf)
                .map_err(|e| truncated(e.to_string()))?;
            visit(current, &buf)?;
        } else {
            let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())
                .map_err(|e| Error::Storage(format!("Failed to read command log: {}", e)))?;
            if skipped != len {
                return Err(truncated(format!("{} of {} bytes", skipped, len)));
            }
        }
        current += 1;
    }

    Ok(current)
}

impl Storage for FileStorage {
    fn append_command(&mut self, cmd: &Command, expected_seq: u64) -> Result<()> {
        let bytes = cmd.canonical_bytes()?;
        let mut file = self.lock_log_for_write()?;

        let found = scan_log(&file, u64::MAX, |_, _| Ok(()))?;
        if found != expected_seq {
            return Err(Error::LogConflict {
                expected: expected_seq,
                found,
            });
        }

        let prev_len = file
            .metadata()
            .map_err(|e| Error::Storage(format!("Failed to stat command log: {}", e)))?
            .len();

        // Length prefix (u64 little-endian) + command data, then fsync
        if let Err(write_err) = Self::write_record(&mut file, &bytes) {
            // Roll a torn record back so the log never holds half a command.
            return match file.set_len(prev_len).and_then(|_| file.sync_all()) {
                Ok(()) => Err(Error::Storage(format!(
                    "Failed to append command: {}",
                    write_err
                ))),
                Err(rollback_err) => Err(Error::PersistenceInconsistency(format!(
                    "Command log append failed ({}) and rollback to {} bytes failed ({})",
                    write_err, prev_len, rollback_err
                ))),
            };
        }

        Ok(())
    }

    fn load_state(&self) -> Result<Option<(State, u64)>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.state_path)
            .map_err(|e| Error::Storage(format!("Failed to open state file: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::Storage(format!("Failed to read state file: {}", e)))?;

        // Format: [State bytes][next_seq: u64]
        if data.len() < 8 {
            return Err(Error::Storage("State file too short".to_string()));
        }

        let (state_bytes, seq_bytes) = data.split_at(data.len() - 8);
        let mut seq_buf = [0u8; 8];
        seq_buf.copy_from_slice(seq_bytes);
        let next_seq = u64::from_le_bytes(seq_buf);

        let state: State = bincode::deserialize(state_bytes)
            .map_err(|e| Error::Storage(format!("Failed to deserialize state: {}", e)))?;

        Ok(Some((state, next_seq)))
    }

    fn persist_state(&mut self, state: &State, next_seq: u64) -> Result<()> {
        let state_bytes = bincode::serialize(state)
            .map_err(|e| Error::Storage(format!("Failed to serialize state: {}", e)))?;

        // Serialize snapshot writers; they share one tmp path.
        let _log_lock = self.lock_log_for_write()?;

        let mut file = File::create(&self.state_tmp_path)
            .map_err(|e| Error::Storage(format!("Failed to create temp state file: {}", e)))?;

        file.write_all(&state_bytes)
            .map_err(|e| Error::Storage(format!("Failed to write state: {}", e)))?;
        file.write_all(&next_seq.to_le_bytes())
            .map_err(|e| Error::Storage(format!("Failed to write next_seq: {}", e)))?;

        // Fsync before rename (crash safety)
        file.sync_all()
            .map_err(|e| Error::Storage(format!("Failed to fsync temp state file: {}", e)))?;
        drop(file);

        fs::rename(&self.state_tmp_path, &self.state_path)
            .map_err(|e| Error::Storage(format!("Failed to rename temp state file: {}", e)))?;

        // Fsync parent directory (ensure rename is persisted)
        if let Some(parent) = self.state_path.parent() {
            let parent_file = File::open(parent)
                .map_err(|e| Error::Storage(format!("Failed to open parent directory: {}", e)))?;
            parent_file.sync_all()
                .map_err(|e| Error::Storage(format!("Failed to fsync parent directory: {}", e)))?;
        }

        Ok(())
    }

    fn load_commands_from(&self, from_seq: u64) -> Result<Vec<Command>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| Error::Storage(format!("Failed to open command log: {}", e)))?;
        // Shared lock: never observe a record mid-append.
        FileExt::lock_shared(&file)
            .map_err(|e| Error::Storage(format!("Failed to lock command log: {}", e)))?;

        let mut commands = Vec::new();
        scan_log(&file, from_seq, |seq, buf| {
            let cmd: Command = bincode::deserialize(buf).map_err(|e| {
                Error::Storage(format!("Failed to deserialize command {}: {}", seq, e))
            })?;
            commands.push(cmd);
            Ok(())
        })?;

        Ok(commands)
    }
}
