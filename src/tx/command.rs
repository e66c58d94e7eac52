use crate::config::BookingPolicy;
use crate::error::{Error, Result};
use crate::sha256_digest;
use crate::state::{BookingStatus, BookingType, MachineStatus, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A booking request as it arrives from the UI/CLI layer.
///
/// Fields the form may leave blank are optional so the validator can report
/// exactly which one is missing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingRequest {
    pub user_id: String,
    pub machine_id: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub booking_type: BookingType,
    #[serde(default)]
    pub justification: Option<String>,
}

/// Every state change is one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandKind {
    RegisterUser {
        user_id: String,
        name: String,
        role: Role,
        tokens_given: u64,
    },
    RegisterMachine {
        machine_id: String,
        name: String,
        machine_type: String,
        token_cost_per_hour: Option<u64>,
    },
    SetMachineStatus {
        machine_id: String,
        status: MachineStatus,
    },
    AllocateTokens {
        user_id: String,
        amount: u64,
        description: String,
    },
    /// Signed correction to the allocation
    AdjustTokens {
        user_id: String,
        amount: i64,
        description: String,
    },
    ExpireTokens {
        user_id: String,
        amount: u64,
        description: String,
    },
    SubmitBooking(BookingRequest),
    TransitionBooking {
        booking_id: String,
        target: BookingStatus,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::RegisterUser { .. } => "register_user",
            CommandKind::RegisterMachine { .. } => "register_machine",
            CommandKind::SetMachineStatus { .. } => "set_machine_status",
            CommandKind::AllocateTokens { .. } => "allocate_tokens",
            CommandKind::AdjustTokens { .. } => "adjust_tokens",
            CommandKind::ExpireTokens { .. } => "expire_tokens",
            CommandKind::SubmitBooking(_) => "submit_booking",
            CommandKind::TransitionBooking { .. } => "transition_booking",
        }
    }
}

/// Command envelope: who acted, when, and what they asked for.
///
/// `issued_at` is captured once when the command is created and is the only
/// clock the apply path reads, so replaying the log is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub actor: String,
    pub issued_at: DateTime<Utc>,
    pub kind: CommandKind,
    /// Policy the command was admitted under, stamped at commit. Replay
    /// applies the command under this policy, not whatever is configured
    /// at reopen, so `tokens_consumed` and past admissions never change.
    #[serde(default)]
    pub policy: Option<BookingPolicy>,
}

impl Command {
    pub fn new(actor: String, issued_at: DateTime<Utc>, kind: CommandKind) -> Self {
        Command {
            actor,
            issued_at,
            kind,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Stamp a command with the current wall clock.
    pub fn now(actor: String, kind: CommandKind) -> Self {
        Command::new(actor, Utc::now(), kind)
    }

    /// Canonical bytes (bincode).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Storage(format!("Failed to serialize command: {}", e)))
    }

    /// Content id: lowercase hex SHA-256 of the canonical bytes.
    pub fn id(&self) -> Result<String> {
        Ok(hex::encode(sha256_digest(&self.canonical_bytes()?)))
    }
}

/// Deterministic booking id for the booking created by command `seq`.
pub fn booking_id_for(command: &Command, seq: u64) -> Result<String> {
    let mut bytes = command.canonical_bytes()?;
    bytes.extend_from_slice(&seq.to_le_bytes());
    let digest = hex::encode(sha256_digest(&bytes));
    Ok(format!("bk-{}", &digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn submit() -> Command {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        Command::new(
            "acme".to_string(),
            start,
            CommandKind::SubmitBooking(BookingRequest {
                user_id: "acme".to_string(),
                machine_id: "cnc-1".to_string(),
                start: Some(start),
                end: Some(start + chrono::Duration::hours(2)),
                booking_type: BookingType::WeeklyPlanning,
                justification: None,
            }),
        )
    }

    #[test]
    fn test_command_id_is_stable() {
        let cmd = submit();
        assert_eq!(cmd.id().unwrap(), cmd.clone().id().unwrap());
        assert_eq!(cmd.id().unwrap().len(), 64);
    }

    #[test]
    fn test_booking_id_depends_on_seq() {
        let cmd = submit();
        let a = booking_id_for(&cmd, 3).unwrap();
        let b = booking_id_for(&cmd, 4).unwrap();
        assert!(a.starts_with("bk-"));
        assert_eq!(a.len(), 19);
        assert_ne!(a, b);
    }

    #[test]
    fn test_recorded_policy_changes_identity() {
        let plain = submit();
        let stamped = submit().with_policy(BookingPolicy::default());
        assert_eq!(stamped.policy, Some(BookingPolicy::default()));
        assert_ne!(plain.id().unwrap(), stamped.id().unwrap());
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&submit()).unwrap();
        assert!(json.contains("\"SubmitBooking\""));
        assert!(json.contains("\"weekly_planning\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back, submit());
    }
}
