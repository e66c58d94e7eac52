use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Available,
    Maintenance,
    Offline,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::Maintenance => "maintenance",
            MachineStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MachineStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" => Ok(MachineStatus::Available),
            "maintenance" => Ok(MachineStatus::Maintenance),
            "offline" => Ok(MachineStatus::Offline),
            other => Err(format!("unknown machine status: {}", other)),
        }
    }
}

/// Machine catalog entry. The booking core only reads these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub id: String,
    pub name: String,
    /// Category reference (machine type)
    pub machine_type: String,
    pub status: MachineStatus,
    /// Tokens per hour; `None` falls back to the policy default
    pub token_cost_per_hour: Option<u64>,
}

impl Machine {
    pub fn new(id: String, name: String, machine_type: String) -> Self {
        Machine {
            id,
            name,
            machine_type,
            status: MachineStatus::Available,
            token_cost_per_hour: None,
        }
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.token_cost_per_hour = Some(cost);
        self
    }

    pub fn is_available(&self) -> bool {
        self.status == MachineStatus::Available
    }

    pub fn effective_cost(&self, default_cost: u64) -> u64 {
        self.token_cost_per_hour.unwrap_or(default_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_defaults() {
        let machine = Machine::new("cnc-1".to_string(), "CNC".to_string(), "milling".to_string());
        assert!(machine.is_available());
        assert_eq!(machine.effective_cost(1), 1);
    }

    #[test]
    fn test_custom_cost() {
        let machine = Machine::new("cnc-1".to_string(), "CNC".to_string(), "milling".to_string())
            .with_cost(6);
        assert_eq!(machine.effective_cost(1), 6);
    }

    #[test]
    fn test_status_roundtrip_str() {
        for s in ["available", "maintenance", "offline"] {
            let status: MachineStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
    }
}
