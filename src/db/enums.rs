use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a pool VM. Only `Running` rows are assignable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Initializing,
    Running,
    Error,
    Unknown,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Initializing => "initializing",
            VmStatus::Running => "running",
            VmStatus::Error => "error",
            VmStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for VmStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(VmStatus::Initializing),
            "running" => Ok(VmStatus::Running),
            "error" => Ok(VmStatus::Error),
            "unknown" => Ok(VmStatus::Unknown),
            other => Err(format!("invalid VM status: {other}")),
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// GPU health as reported by the VM agent. `NotApplicable` is terminal:
/// the agent stops probing once no GPU driver is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuHealth {
    Healthy,
    Unhealthy,
    #[serde(rename = "N/A")]
    NotApplicable,
}

impl GpuHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuHealth::Healthy => "Healthy",
            GpuHealth::Unhealthy => "Unhealthy",
            GpuHealth::NotApplicable => "N/A",
        }
    }
}

impl FromStr for GpuHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Healthy" => Ok(GpuHealth::Healthy),
            "Unhealthy" => Ok(GpuHealth::Unhealthy),
            "N/A" => Ok(GpuHealth::NotApplicable),
            other => Err(format!("invalid GPU health value: {other}")),
        }
    }
}

impl fmt::Display for GpuHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Scheduled,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Executing => "executing",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// A terminal schedule can no longer be cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Completed | ScheduleStatus::Failed | ScheduleStatus::Cancelled
        )
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "executing" => Ok(ScheduleStatus::Executing),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(format!("invalid schedule status: {other}")),
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_status_round_trips() {
        for s in ["initializing", "running", "error", "unknown"] {
            assert_eq!(s.parse::<VmStatus>().unwrap().as_str(), s);
        }
        assert!("online".parse::<VmStatus>().is_err());
    }

    #[test]
    fn gpu_health_uses_na_spelling() {
        assert_eq!(GpuHealth::NotApplicable.as_str(), "N/A");
        assert_eq!(
            "N/A".parse::<GpuHealth>().unwrap(),
            GpuHealth::NotApplicable
        );
    }

    #[test]
    fn terminal_schedule_statuses() {
        assert!(ScheduleStatus::Cancelled.is_terminal());
        assert!(ScheduleStatus::Completed.is_terminal());
        assert!(!ScheduleStatus::Scheduled.is_terminal());
        assert!(!ScheduleStatus::Executing.is_terminal());
    }
}
