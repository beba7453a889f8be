//! # Schedule Policy
//!
//! Decides when a tenant's automatic sync is due.
//!
//! ## Slot Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every schedule defines at most one SLOT per calendar day, in the      │
//! │  tenant's local time:                                                  │
//! │                                                                         │
//! │   daily    every day                at hour:minute                     │
//! │   weekly   day_of_week (0=Sunday)   at hour:minute                     │
//! │   monthly  day_of_month (1-31, -1)  at hour:minute                     │
//! │            -1 = last day; 31 in a 30-day month = day 30                │
//! │   manual   never                                                       │
//! │                                                                         │
//! │  is_due(now, last_run) ⇔ first slot after last_run ≤ now               │
//! │  never ran              ⇔ today has a slot ∧ now ≥ slot                │
//! │                                                                         │
//! │  Slots missed while the worker was down fire once on the next tick.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure. Callers pass `now` and the tenant's zone.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::ValidationResult;

/// `day_of_month` value meaning "last calendar day of the month".
pub const LAST_DAY_OF_MONTH: i32 = -1;

/// How far ahead `next_slot_after` searches (covers any monthly rule).
const SEARCH_HORIZON_DAYS: u64 = 62;

// =============================================================================
// Frequency
// =============================================================================

/// How often automatic syncs fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    /// Only manual triggers.
    #[default]
    Manual,
    Daily,
    Weekly,
    Monthly,
}

// =============================================================================
// Schedule
// =============================================================================

/// A tenant's recurring sync schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncSchedule {
    pub frequency: SyncFrequency,
    /// 0-23, tenant local time.
    pub hour: u32,
    /// 0-59.
    pub minute: u32,
    /// 0-6 with 0 = Sunday. Required for weekly.
    pub day_of_week: Option<u32>,
    /// 1-31, or -1 for the last day. Required for monthly.
    pub day_of_month: Option<i32>,
}

impl Default for SyncSchedule {
    fn default() -> Self {
        SyncSchedule {
            frequency: SyncFrequency::Manual,
            hour: 23,
            minute: 0,
            day_of_week: None,
            day_of_month: None,
        }
    }
}

impl SyncSchedule {
    /// Daily schedule at `hour:minute`.
    pub fn daily(hour: u32, minute: u32) -> Self {
        SyncSchedule {
            frequency: SyncFrequency::Daily,
            hour,
            minute,
            ..SyncSchedule::default()
        }
    }

    /// Weekly schedule; `day_of_week` uses 0 = Sunday.
    pub fn weekly(day_of_week: u32, hour: u32, minute: u32) -> Self {
        SyncSchedule {
            frequency: SyncFrequency::Weekly,
            hour,
            minute,
            day_of_week: Some(day_of_week),
            day_of_month: None,
        }
    }

    /// Monthly schedule; pass [`LAST_DAY_OF_MONTH`] for the last day.
    pub fn monthly(day_of_month: i32, hour: u32, minute: u32) -> Self {
        SyncSchedule {
            frequency: SyncFrequency::Monthly,
            hour,
            minute,
            day_of_week: None,
            day_of_month: Some(day_of_month),
        }
    }

    /// Checks field ranges and per-frequency requirements.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.hour > 23 {
            return Err(out_of_range("hour", 0, 23));
        }
        if self.minute > 59 {
            return Err(out_of_range("minute", 0, 59));
        }

        match self.frequency {
            SyncFrequency::Weekly => match self.day_of_week {
                None => return Err(ValidationError::required("day_of_week")),
                Some(d) if d > 6 => return Err(out_of_range("day_of_week", 0, 6)),
                Some(_) => {}
            },
            SyncFrequency::Monthly => match self.day_of_month {
                None => return Err(ValidationError::required("day_of_month")),
                Some(LAST_DAY_OF_MONTH) => {}
                Some(d) if !(1..=31).contains(&d) => {
                    return Err(ValidationError::InvalidFormat {
                        field: "day_of_month".to_string(),
                        reason: "must be 1-31 or -1 for the last day".to_string(),
                    })
                }
                Some(_) => {}
            },
            SyncFrequency::Manual | SyncFrequency::Daily => {}
        }

        Ok(())
    }

    /// Returns true if the schedule has a slot on `date`.
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        match self.frequency {
            SyncFrequency::Manual => false,
            SyncFrequency::Daily => true,
            SyncFrequency::Weekly => self
                .day_of_week
                .is_some_and(|d| date.weekday().num_days_from_sunday() == d),
            SyncFrequency::Monthly => self
                .day_of_month
                .is_some_and(|d| date.day() == effective_day_of_month(d, date)),
        }
    }

    /// Local slot time on `date`, if the schedule runs that day.
    pub fn slot_on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        if !self.runs_on(date) {
            return None;
        }
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;
        Some(date.and_time(time))
    }

    /// Decides whether a sync is due at local time `now`.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::NaiveDate;
    /// use tally_core::schedule::{SyncSchedule, LAST_DAY_OF_MONTH};
    ///
    /// let schedule = SyncSchedule::monthly(LAST_DAY_OF_MONTH, 23, 0);
    /// let feb_28 = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap().and_hms_opt(23, 5, 0).unwrap();
    /// assert!(schedule.is_due(feb_28, None));
    /// ```
    pub fn is_due(&self, now: NaiveDateTime, last_run: Option<NaiveDateTime>) -> bool {
        match last_run {
            Some(last) => self.next_slot_after(last).is_some_and(|slot| slot <= now),
            None => self.slot_on(now.date()).is_some_and(|slot| now >= slot),
        }
    }

    /// First local slot strictly after `after`.
    pub fn next_slot_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut date = after.date();
        for _ in 0..=SEARCH_HORIZON_DAYS {
            if let Some(slot) = self.slot_on(date) {
                if slot > after {
                    return Some(slot);
                }
            }
            date = date.checked_add_days(Days::new(1))?;
        }
        None
    }

    /// [`is_due`](Self::is_due) evaluated in the tenant's zone.
    pub fn is_due_in(&self, tz: Tz, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
        let now_local = now.with_timezone(&tz).naive_local();
        let last_local = last_run.map(|t| t.with_timezone(&tz).naive_local());
        self.is_due(now_local, last_local)
    }

    /// Next slot after `after`, as a UTC instant.
    ///
    /// A slot that falls into a DST gap moves forward by one hour.
    pub fn next_run_in(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let slot = self.next_slot_after(after.with_timezone(&tz).naive_local())?;
        tz.from_local_datetime(&slot)
            .earliest()
            .or_else(|| {
                let shifted = slot.checked_add_signed(chrono::Duration::hours(1))?;
                tz.from_local_datetime(&shifted).earliest()
            })
            .map(|t| t.with_timezone(&Utc))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Parses an IANA zone name ("Europe/Oslo").
pub fn parse_timezone(name: &str) -> CoreResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::InvalidTimezone(name.to_string()))
}

/// Last calendar day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Day a monthly rule fires on in `date`'s month.
fn effective_day_of_month(day_of_month: i32, date: NaiveDate) -> u32 {
    let last = last_day_of_month(date);
    if day_of_month == LAST_DAY_OF_MONTH {
        return last;
    }
    u32::try_from(day_of_month).map_or(last, |d| d.min(last))
}

fn out_of_range(field: &str, min: i64, max: i64) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min,
        max,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
