//! Data models for the workforce store.
//!
//! Alarms, work sessions, breaks, and the derived work status used by the
//! notification scheduler.

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

/// What a recurring alarm reminds the user to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    ClockIn,
    ClockOut,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::ClockIn => "clock_in",
            AlarmKind::ClockOut => "clock_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "clock_in" => Some(AlarmKind::ClockIn),
            "clock_out" => Some(AlarmKind::ClockOut),
            _ => None,
        }
    }
}

/// A recurring reminder definition. Read-only to the scheduler; created and
/// edited through the external CRUD layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub kind: AlarmKind,
    /// Time of day in `HH:MM`, local time.
    pub time: String,
    /// ISO weekdays the alarm fires on (Monday = 1 .. Sunday = 7).
    pub weekdays: Vec<u8>,
    pub active: bool,
}

impl Alarm {
    /// Parse the configured `HH:MM` time of day. Returns None for malformed
    /// values so a bad row never panics a scheduler tick.
    pub fn time_of_day(&self) -> Option<(u32, u32)> {
        let (h, m) = self.time.split_once(':')?;
        let hour: u32 = h.parse().ok()?;
        let minute: u32 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some((hour, minute))
    }

    /// Whether this alarm is due at the given instant: the weekday is in the
    /// configured set and the time matches to the minute.
    pub fn is_due(&self, now: &DateTime<Local>) -> bool {
        if !self.active {
            return false;
        }
        let weekday = now.weekday().number_from_monday() as u8;
        if !self.weekdays.contains(&weekday) {
            return false;
        }
        match self.time_of_day() {
            Some((hour, minute)) => now.hour() == hour && now.minute() == minute,
            None => false,
        }
    }

    pub(crate) fn weekdays_to_csv(&self) -> String {
        self.weekdays
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn weekdays_from_csv(csv: &str) -> Vec<u8> {
        csv.split(',')
            .filter_map(|s| s.trim().parse::<u8>().ok())
            .filter(|d| (1..=7).contains(d))
            .collect()
    }
}

/// A clocked work session. `clock_out` is None while the session is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSession {
    pub id: String,
    pub user_id: String,
    pub clock_in: i64,
    pub clock_out: Option<i64>,
}

/// Minimal user projection the scheduling core needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub profile_picture: Option<String>,
}

/// Current clocked state of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    NotClockedIn,
    ClockedIn,
    OnBreak,
    Unknown,
}

/// Action buttons a push notification can offer, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkAction {
    ClockIn,
    StartBreak,
    ClockOut,
    EndBreak,
}

impl WorkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkAction::ClockIn => "clock_in",
            WorkAction::StartBreak => "start_break",
            WorkAction::ClockOut => "clock_out",
            WorkAction::EndBreak => "end_break",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            WorkAction::ClockIn => "Clock in",
            WorkAction::StartBreak => "Start break",
            WorkAction::ClockOut => "Clock out",
            WorkAction::EndBreak => "End break",
        }
    }
}

/// Derived per-send snapshot of a user's clocked state. Never cached; queried
/// from the store right before each alarm delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkStatus {
    pub state: WorkState,
    pub active_session_id: Option<String>,
    pub active_break_id: Option<String>,
}

impl WorkStatus {
    pub fn not_clocked_in() -> Self {
        Self {
            state: WorkState::NotClockedIn,
            active_session_id: None,
            active_break_id: None,
        }
    }

    /// Actions currently available to the user, in display order.
    pub fn available_actions(&self) -> Vec<WorkAction> {
        match self.state {
            WorkState::NotClockedIn => vec![WorkAction::ClockIn],
            WorkState::ClockedIn => vec![WorkAction::StartBreak, WorkAction::ClockOut],
            WorkState::OnBreak => vec![WorkAction::EndBreak],
            WorkState::Unknown => vec![],
        }
    }
}
