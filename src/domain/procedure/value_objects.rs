use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::{Result, WorkflowError};
use crate::domain::scheduling::shift;

// ============================================================================
// Procedure Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Discontinued,
    Ghost,
}

impl ProcedureStatus {
    pub fn code(&self) -> &'static str {
        match self {
            ProcedureStatus::Scheduled => "SC",
            ProcedureStatus::InProgress => "IP",
            ProcedureStatus::Completed => "CM",
            ProcedureStatus::Cancelled => "CA",
            ProcedureStatus::Discontinued => "DC",
            ProcedureStatus::Ghost => "GH",
        }
    }

    pub fn is_terminated(&self) -> bool {
        !matches!(self, ProcedureStatus::Scheduled | ProcedureStatus::InProgress)
    }

    pub fn is_defunct(&self) -> bool {
        matches!(
            self,
            ProcedureStatus::Cancelled | ProcedureStatus::Discontinued | ProcedureStatus::Ghost
        )
    }
}

impl fmt::Display for ProcedureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Orderable procedure type. `id` keys the procedure plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureType {
    pub id: String,
    pub name: String,
    /// Minutes.
    pub default_duration: i64,
}

impl ProcedureType {
    pub fn new(id: impl Into<String>, name: impl Into<String>, default_duration: i64) -> Self {
        Self { id: id.into(), name: name.into(), default_duration }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    pub code: String,
    pub information_authority: String,
}

impl Facility {
    pub fn new(code: impl Into<String>, information_authority: impl Into<String>) -> Self {
        Self { code: code.into(), information_authority: information_authority.into() }
    }
}

// ============================================================================
// Check-In
// ============================================================================

/// Patient check-in/check-out record for one procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureCheckIn {
    check_in_time: Option<DateTime<Utc>>,
    check_out_time: Option<DateTime<Utc>>,
}

impl ProcedureCheckIn {
    pub fn check_in_time(&self) -> Option<DateTime<Utc>> {
        self.check_in_time
    }

    pub fn check_out_time(&self) -> Option<DateTime<Utc>> {
        self.check_out_time
    }

    pub fn is_pre_check_in(&self) -> bool {
        self.check_in_time.is_none()
    }

    pub fn is_checked_in(&self) -> bool {
        self.check_in_time.is_some() && self.check_out_time.is_none()
    }

    pub fn is_checked_out(&self) -> bool {
        self.check_out_time.is_some()
    }

    pub fn check_in(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        if self.is_checked_in() {
            return Err(WorkflowError::violation("Patient is already checked in for this procedure"));
        }
        self.check_in_time = Some(time.unwrap_or_else(Utc::now));
        self.check_out_time = None;
        Ok(())
    }

    pub fn check_out(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        if !self.is_checked_in() {
            return Err(WorkflowError::violation("Patient is not checked in for this procedure"));
        }
        self.check_out_time = Some(time.unwrap_or_else(Utc::now));
        Ok(())
    }

    pub fn revert_check_in(&mut self) -> Result<()> {
        if !self.is_checked_in() {
            return Err(WorkflowError::violation(
                "Only a checked-in procedure can have its check-in reverted",
            ));
        }
        self.check_in_time = None;
        Ok(())
    }

    pub fn time_shift(&mut self, minutes: i64) {
        self.check_in_time = shift(self.check_in_time, minutes);
        self.check_out_time = shift(self.check_out_time, minutes);
    }
}
