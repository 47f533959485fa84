//! Human readable rendering of sessions

use chrono::{DateTime, Utc};
use std::fmt;

use super::{Session, SessionTemplate};

/// Render a duration the way users read it.
///
/// Up to a minute is shown in seconds, up to an hour in whole minutes
/// (rounded up), anything longer as hours plus minutes.
pub fn nice_time(seconds: i64) -> String {
    if seconds > 60 * 60 {
        let total_minutes = (seconds + 59) / 60;
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        let unit = if hours == 1 { "hour" } else { "hours" };
        format!("{hours} {unit} {minutes} minutes")
    } else if seconds > 60 {
        format!("{} minutes", (seconds + 59) / 60)
    } else {
        format!("{seconds} seconds")
    }
}

fn sprints_label(count: Option<i32>) -> String {
    match count {
        Some(n) => n.to_string(),
        None => "X".to_string(),
    }
}

impl Session {
    /// Multi-line description of the session as of `now`.
    pub fn describe_at(&self, now: DateTime<Utc>) -> String {
        if self.is_zero() {
            return "No session configured".to_string();
        }

        let remaining = match self.sprints_remaining.bounded() {
            // During a rest the sprint that just ended has already been counted.
            Some(n) if self.is_rest => (n + 1).to_string(),
            Some(n) => n.to_string(),
            None => "Unspecified".to_string(),
        };
        let (phase, left) = if self.is_rest {
            ("rest", self.rest_remaining_at(now))
        } else {
            ("pomodoro", self.sprint_remaining_at(now))
        };

        format!(
            "Session of {}🍅 x {}m + {}m\nPomodoros remaining: {}\nTime for current {} remaining: {}\n\nCurrent session state: {}",
            sprints_label(self.sprint_count.bounded()),
            self.sprint_duration_secs / 60,
            self.rest_duration_secs / 60,
            remaining,
            phase,
            nice_time(left.max(0)),
            self.state_at(now),
        )
    }

    /// One line telling the user what is left right now.
    pub fn left_time_message_at(&self, now: DateTime<Utc>) -> String {
        if self.is_paused && !self.is_finished {
            return "Pomodoro in pause. (use resume)".to_string();
        }
        if self.is_zero() || self.is_canceled || self.is_stopped_at(now) {
            return "No running pomodoros!".to_string();
        }
        if self.is_rest {
            format!("Rest for other {}", nice_time(self.rest_remaining_at(now)))
        } else {
            format!("Task time: {} left.", nice_time(self.sprint_remaining_at(now)))
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe_at(Utc::now()))
    }
}

impl fmt::Display for SessionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("No session configured");
        }
        write!(
            f,
            "Session of {}🍅 x {}m + {}m",
            sprints_label(self.sprint_count.bounded()),
            self.sprint_duration_secs / 60,
            self.rest_duration_secs / 60,
        )
    }
}
