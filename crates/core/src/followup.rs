use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::types::LeadStatus;

/// Computes follow-up dates on the agency's local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpSchedule {
    timezone: Tz,
}

impl FollowUpSchedule {
    /// Builds a schedule for the IANA timezone name, e.g. `America/Mexico_City`.
    pub fn new(timezone: &str) -> Result<Self, ScheduleError> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
        Ok(Self { timezone })
    }

    /// Calendar day of `at` in the agency timezone.
    pub fn local_day(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }

    /// Days until the next touch for a lead in `status`; `None` once closed.
    pub fn interval_days(status: LeadStatus) -> Option<u64> {
        match status {
            LeadStatus::New => Some(1),
            LeadStatus::Contacted => Some(3),
            LeadStatus::Qualified => Some(2),
            LeadStatus::Negotiating => Some(1),
            LeadStatus::Won | LeadStatus::Lost => None,
        }
    }

    /// Follow-up date for a lead in `status` last touched at `reference`.
    pub fn next_follow_up(
        &self,
        status: LeadStatus,
        reference: DateTime<Utc>,
    ) -> Option<NaiveDate> {
        let days = Self::interval_days(status)?;
        self.local_day(reference).checked_add_days(Days::new(days))
    }

    /// Leads with a follow-up date strictly before this day are overdue.
    pub fn overdue_cutoff(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_day(now)
    }
}

impl Default for FollowUpSchedule {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}
