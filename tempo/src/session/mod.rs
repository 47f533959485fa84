//! Session entity and its state machine
//!
//! A [`Session`] is plain data. Every time-dependent query and transition
//! takes `now` explicitly; while a session runs, the absolute deadlines are the
//! source of truth and the remaining-seconds counters are only a snapshot taken
//! when the session stops.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempo_ipc::{Phase, SessionState, SessionStatus};

use crate::error::{EngineError, Result};

mod format;

pub use format::nice_time;

/// Rest length used when a cycle is configured without one.
pub const DEFAULT_REST_SECS: i64 = 5 * 60;

/// Upper bound for the total time of a bounded cycle (48 hours).
pub const MAX_SESSION_SECS: i64 = 48 * 60 * 60;

/// Number of sprints in a cycle.
///
/// Stored as a signed integer so the value survives storage unchanged;
/// [`SprintCount::UNBOUNDED`] and anything below it mean "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SprintCount(i32);

impl SprintCount {
    pub const UNBOUNDED: SprintCount = SprintCount(-100);

    pub const fn new(count: i32) -> Self {
        Self(count)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    pub fn is_unbounded(self) -> bool {
        self.0 <= Self::UNBOUNDED.0
    }

    /// The counter ran below zero on a bounded cycle.
    pub fn is_exhausted(self) -> bool {
        !self.is_unbounded() && self.0 < 0
    }

    /// `None` for unbounded cycles.
    pub fn bounded(self) -> Option<i32> {
        (!self.is_unbounded()).then_some(self.0)
    }

    fn decremented(self) -> Self {
        if self.is_unbounded() {
            self
        } else {
            Self(self.0 - 1)
        }
    }
}

/// The configured shape of a cycle, as chosen by the user.
///
/// The default value has a zero sprint duration and stands for "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTemplate {
    pub sprint_count: SprintCount,
    pub sprint_duration_secs: i64,
    pub rest_duration_secs: i64,
}

impl SessionTemplate {
    pub fn new(sprint_count: SprintCount, sprint_duration_secs: i64, rest_duration_secs: i64) -> Self {
        Self {
            sprint_count,
            sprint_duration_secs,
            rest_duration_secs,
        }
    }

    /// Four 25 minute sprints separated by 5 minute rests.
    pub fn classic() -> Self {
        Self::new(SprintCount::new(4), 25 * 60, DEFAULT_REST_SECS)
    }

    pub fn is_zero(&self) -> bool {
        self.sprint_duration_secs == 0
    }

    /// Length of the whole cycle; `None` when unbounded. Saturates at
    /// `i64::MAX`.
    pub fn total_secs(&self) -> Option<i64> {
        let sprints = i64::from(self.sprint_count.bounded()?);
        let mut total = self.sprint_duration_secs.saturating_mul(sprints);
        if sprints > 1 {
            total = total.saturating_add(self.rest_duration_secs.saturating_mul(sprints - 1));
        }
        Some(total)
    }

    pub fn validate(self) -> Result<Self> {
        if self.sprint_duration_secs <= 0 {
            return Err(EngineError::invalid_template("sprint duration must be positive"));
        }
        if self.rest_duration_secs < 0 {
            return Err(EngineError::invalid_template("rest duration cannot be negative"));
        }
        if !self.sprint_count.is_unbounded() && self.sprint_count.get() < 1 {
            return Err(EngineError::invalid_template("a cycle needs at least one sprint"));
        }
        match self.total_secs() {
            Some(total) if total > MAX_SESSION_SECS => Err(EngineError::SessionTooLong(total)),
            _ => Ok(self),
        }
    }

    /// A fresh, paused session with every counter at its configured value.
    pub fn instantiate(&self) -> Session {
        Session {
            sprint_count: self.sprint_count,
            sprint_duration_secs: self.sprint_duration_secs,
            rest_duration_secs: self.rest_duration_secs,
            sprints_remaining: self.sprint_count,
            sprint_remaining_secs: self.sprint_duration_secs,
            rest_remaining_secs: self.rest_duration_secs,
            is_rest: false,
            is_paused: true,
            is_canceled: false,
            is_finished: false,
            next_sprint_deadline: None,
            next_rest_deadline: None,
        }
    }
}

/// Runtime and durable state of one conversation's cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    sprint_count: SprintCount,
    sprint_duration_secs: i64,
    rest_duration_secs: i64,

    sprints_remaining: SprintCount,
    sprint_remaining_secs: i64,
    rest_remaining_secs: i64,

    is_rest: bool,
    is_paused: bool,
    is_canceled: bool,
    is_finished: bool,

    next_sprint_deadline: Option<DateTime<Utc>>,
    next_rest_deadline: Option<DateTime<Utc>>,
}

impl Session {
    pub fn template(&self) -> SessionTemplate {
        SessionTemplate::new(self.sprint_count, self.sprint_duration_secs, self.rest_duration_secs)
    }

    pub fn sprint_count(&self) -> SprintCount {
        self.sprint_count
    }

    pub fn sprint_duration_secs(&self) -> i64 {
        self.sprint_duration_secs
    }

    pub fn rest_duration_secs(&self) -> i64 {
        self.rest_duration_secs
    }

    pub fn sprints_remaining(&self) -> SprintCount {
        self.sprints_remaining
    }

    pub fn is_rest(&self) -> bool {
        self.is_rest
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn is_zero(&self) -> bool {
        self.sprint_duration_secs == 0
    }

    pub fn next_sprint_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_sprint_deadline
    }

    pub fn next_rest_deadline(&self) -> Option<DateTime<Utc>> {
        self.next_rest_deadline
    }

    pub fn phase(&self) -> Phase {
        if self.is_rest {
            Phase::Rest
        } else {
            Phase::Sprint
        }
    }

    /// Seconds left in the current sprint.
    pub fn sprint_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_finished {
            return 0;
        }
        match self.next_sprint_deadline {
            Some(deadline) if !self.is_paused => (deadline - now).num_seconds(),
            _ => self.sprint_remaining_secs,
        }
    }

    /// Seconds left until the end of the current (or next) rest.
    pub fn rest_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_finished {
            return 0;
        }
        match self.next_rest_deadline {
            Some(deadline) if !self.is_paused => (deadline - now).num_seconds(),
            _ => self.rest_remaining_secs,
        }
    }

    /// Not running for any reason, including an elapsed sprint that the
    /// timer has not picked up yet.
    pub fn is_stopped_at(&self, now: DateTime<Utc>) -> bool {
        self.sprint_remaining_at(now) <= 0
            || self.sprints_remaining.is_exhausted()
            || self.is_paused
            || self.is_canceled
            || self.is_finished
    }

    /// Classification shown to users. The order of the checks matters.
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_paused {
            if self.sprint_remaining_at(now) == self.sprint_duration_secs
                && self.sprints_remaining == self.sprint_count
                && self.rest_remaining_at(now) == self.rest_duration_secs
            {
                SessionState::Pending
            } else {
                SessionState::Paused
            }
        } else if self.is_canceled {
            SessionState::Canceled
        } else if self.is_finished {
            SessionState::Finished
        } else if self.is_stopped_at(now) {
            SessionState::Stopped
        } else {
            SessionState::Running
        }
    }

    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        self.state_at(now) == SessionState::Running
    }

    /// Instantiated from a template and never started.
    fn is_fresh(&self) -> bool {
        self.is_paused
            && !self.is_rest
            && !self.is_canceled
            && !self.is_finished
            && self.sprints_remaining == self.sprint_count
            && self.sprint_remaining_secs == self.sprint_duration_secs
            && self.rest_remaining_secs == self.rest_duration_secs
            && self.next_sprint_deadline.is_none()
    }

    /// Begin the first sprint.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_zero() {
            return Err(EngineError::UninitializedSession);
        }
        if !self.is_fresh() {
            return Err(EngineError::AlreadyRunning);
        }

        self.is_paused = false;
        // Counts the sprint that begins now. Unbounded counts stay unbounded.
        self.sprints_remaining = SprintCount(self.sprints_remaining.0.saturating_sub(1));
        self.assign_deadlines(now);
        Ok(())
    }

    /// Continue from the snapshot taken when the session stopped.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_zero() {
            return Err(EngineError::UninitializedSession);
        }
        if !self.is_stopped_at(now) {
            return Err(EngineError::AlreadyRunning);
        }
        if self.is_canceled {
            return Err(EngineError::AlreadyCanceled);
        }
        if self.is_finished {
            return Err(EngineError::AlreadyFinished);
        }

        if !self.is_paused {
            self.freeze(now);
        }
        self.is_paused = false;
        self.assign_deadlines(now);
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_paused {
            return Err(EngineError::AlreadyPaused);
        }
        self.freeze(now);
        self.is_paused = true;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.is_canceled {
            return Err(EngineError::AlreadyCanceled);
        }
        self.freeze(now);
        self.is_canceled = true;
        Ok(())
    }

    /// The last sprint elapsed.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.sprints_remaining = self.sprints_remaining.decremented();
        self.freeze(now);
        self.is_finished = true;
    }

    /// A sprint elapsed and a rest begins.
    pub fn rest_started(&mut self, now: DateTime<Utc>) {
        self.sprints_remaining = self.sprints_remaining.decremented();
        self.is_rest = true;
        self.reset_counters();
        self.assign_deadlines(now);
    }

    /// A rest elapsed and the next sprint begins.
    pub fn rest_finished(&mut self, now: DateTime<Utc>) {
        self.is_rest = false;
        self.reset_counters();
        self.assign_deadlines(now);
    }

    pub fn sprint_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        !self.is_rest && self.next_sprint_deadline.is_some_and(|deadline| now > deadline)
    }

    pub fn rest_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.is_rest && self.next_rest_deadline.is_some_and(|deadline| now > deadline)
    }

    /// Whether the sprint in progress is the last one of a bounded cycle.
    pub fn is_last_sprint(&self) -> bool {
        self.sprints_remaining.decremented().is_exhausted()
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        SessionStatus {
            state: self.state_at(now),
            phase: self.phase(),
            sprint_count: self.sprint_count.bounded(),
            sprints_remaining: self.sprints_remaining.bounded(),
            sprint_seconds_left: self.sprint_remaining_at(now),
            rest_seconds_left: self.rest_remaining_at(now),
            summary: self.describe_at(now),
        }
    }

    fn reset_counters(&mut self) {
        self.sprint_remaining_secs = self.sprint_duration_secs;
        self.rest_remaining_secs = self.rest_duration_secs;
    }

    /// Snapshot both counters from the deadlines and drop the deadlines.
    ///
    /// During a sprint the rest counter holds the time until the end of the
    /// following rest.
    fn freeze(&mut self, now: DateTime<Utc>) {
        self.sprint_remaining_secs = self.sprint_remaining_at(now).max(0);
        self.rest_remaining_secs = self.rest_remaining_at(now).max(0);
        self.next_sprint_deadline = None;
        self.next_rest_deadline = None;
    }

    fn assign_deadlines(&mut self, now: DateTime<Utc>) {
        self.next_sprint_deadline = None;
        self.next_rest_deadline = None;

        if self.is_rest {
            self.next_rest_deadline = Some(now + Duration::seconds(self.rest_remaining_secs));
        } else {
            let sprint_end = now + Duration::seconds(self.sprint_remaining_secs);
            self.next_sprint_deadline = Some(sprint_end);
            self.next_rest_deadline = Some(sprint_end + Duration::seconds(self.rest_duration_secs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn template(sprints: i32) -> SessionTemplate {
        SessionTemplate::new(SprintCount::new(sprints), 60, 30)
    }

    #[test]
    fn fresh_session_is_pending() {
        let session = template(2).instantiate();
        assert_eq!(session.state_at(t0()), SessionState::Pending);
        assert!(session.is_stopped_at(t0()));
    }

    #[test]
    fn start_decrements_and_assigns_deadlines() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();

        assert_eq!(session.sprints_remaining().get(), 1);
        assert_eq!(session.next_sprint_deadline(), Some(t0() + secs(60)));
        assert_eq!(session.next_rest_deadline(), Some(t0() + secs(90)));
        assert_eq!(session.state_at(t0() + secs(10)), SessionState::Running);
        assert_eq!(session.sprint_remaining_at(t0() + secs(10)), 50);
    }

    #[test]
    fn start_requires_configured_cycle() {
        let mut session = SessionTemplate::default().instantiate();
        assert!(matches!(session.start(t0()), Err(EngineError::UninitializedSession)));
    }

    #[test]
    fn double_start_is_refused() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        assert!(matches!(session.start(t0()), Err(EngineError::AlreadyRunning)));
        assert_eq!(session.sprints_remaining().get(), 1);
    }

    #[test]
    fn pause_snapshots_remaining_and_clears_deadlines() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.pause(t0() + secs(15)).unwrap();

        assert!(session.next_sprint_deadline().is_none());
        assert!(session.next_rest_deadline().is_none());
        assert_eq!(session.sprint_remaining_at(t0() + secs(500)), 45);
        assert_eq!(session.state_at(t0() + secs(500)), SessionState::Paused);
    }

    #[test]
    fn pause_keeps_both_counters_where_they_were() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();

        let at = t0() + secs(15);
        let before = session.status_at(at);
        session.pause(at).unwrap();
        let after = session.status_at(t0() + secs(500));

        assert_eq!(before.sprint_seconds_left, 45);
        assert_eq!(before.rest_seconds_left, 75);
        assert_eq!(after.sprint_seconds_left, before.sprint_seconds_left);
        assert_eq!(after.rest_seconds_left, before.rest_seconds_left);

        // Resuming still gives the next rest its full length.
        let later = t0() + secs(1000);
        session.resume(later).unwrap();
        assert_eq!(session.next_rest_deadline(), Some(later + secs(45 + 30)));
    }

    #[test]
    fn second_pause_leaves_state_untouched() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.pause(t0() + secs(15)).unwrap();
        let before = session.clone();

        assert!(matches!(session.pause(t0() + secs(20)), Err(EngineError::AlreadyPaused)));
        assert_eq!(session, before);
    }

    #[test]
    fn resume_continues_from_snapshot() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.pause(t0() + secs(15)).unwrap();

        let later = t0() + secs(3600);
        session.resume(later).unwrap();
        assert_eq!(session.state_at(later), SessionState::Running);
        assert_eq!(session.phase(), Phase::Sprint);
        assert_eq!(session.next_sprint_deadline(), Some(later + secs(45)));
    }

    #[test]
    fn resume_keeps_rest_phase() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.rest_started(t0() + secs(61));
        session.pause(t0() + secs(71)).unwrap();

        let later = t0() + secs(1000);
        session.resume(later).unwrap();
        assert_eq!(session.phase(), Phase::Rest);
        assert_eq!(session.rest_remaining_at(later), 20);
        assert_eq!(session.state_at(later), SessionState::Running);
    }

    #[test]
    fn resume_refuses_running_canceled_and_finished() {
        let mut running = template(2).instantiate();
        running.start(t0()).unwrap();
        assert!(matches!(running.resume(t0() + secs(1)), Err(EngineError::AlreadyRunning)));

        let mut canceled = running.clone();
        canceled.cancel(t0() + secs(2)).unwrap();
        assert!(matches!(canceled.resume(t0() + secs(3)), Err(EngineError::AlreadyCanceled)));

        let mut finished = running.clone();
        finished.finish(t0() + secs(61));
        assert!(matches!(finished.resume(t0() + secs(62)), Err(EngineError::AlreadyFinished)));
    }

    #[test]
    fn cancel_is_terminal() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.cancel(t0() + secs(5)).unwrap();

        assert_eq!(session.state_at(t0() + secs(6)), SessionState::Canceled);
        assert!(matches!(session.cancel(t0() + secs(7)), Err(EngineError::AlreadyCanceled)));
        assert!(session.is_canceled());
    }

    #[test]
    fn paused_classification_wins_over_canceled() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        session.pause(t0() + secs(5)).unwrap();
        session.cancel(t0() + secs(6)).unwrap();

        assert_eq!(session.state_at(t0() + secs(7)), SessionState::Paused);
    }

    #[test]
    fn elapsed_sprint_reads_as_stopped_until_polled() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();

        let late = t0() + secs(61);
        assert!(session.sprint_deadline_passed(late));
        assert_eq!(session.state_at(late), SessionState::Stopped);
    }

    #[test]
    fn bounded_cycle_runs_out() {
        let mut session = template(2).instantiate();
        session.start(t0()).unwrap();
        assert!(!session.is_last_sprint());

        session.rest_started(t0() + secs(61));
        assert_eq!(session.sprints_remaining().get(), 0);
        assert!(session.rest_deadline_passed(t0() + secs(92)));

        session.rest_finished(t0() + secs(92));
        assert!(session.is_last_sprint());

        session.finish(t0() + secs(153));
        assert!(session.sprints_remaining().is_exhausted());
        assert_eq!(session.state_at(t0() + secs(154)), SessionState::Finished);
        assert_eq!(session.sprint_remaining_at(t0() + secs(154)), 0);
    }

    #[test]
    fn unbounded_cycle_never_runs_out() {
        let mut session = SessionTemplate::new(SprintCount::UNBOUNDED, 60, 30).instantiate();
        session.start(t0()).unwrap();

        for _ in 0..10 {
            assert!(!session.is_last_sprint());
            session.rest_started(t0());
            session.rest_finished(t0());
        }
        assert!(session.sprints_remaining().is_unbounded());
        assert_eq!(session.state_at(t0() + secs(1)), SessionState::Running);
    }

    #[test]
    fn template_validation() {
        assert!(SessionTemplate::classic().validate().is_ok());
        assert!(SessionTemplate::new(SprintCount::UNBOUNDED, 25 * 60, 0).validate().is_ok());
        assert!(matches!(
            SessionTemplate::new(SprintCount::new(1), 0, 60).validate(),
            Err(EngineError::InvalidTemplate(_))
        ));
        assert!(matches!(
            SessionTemplate::new(SprintCount::new(0), 60, 60).validate(),
            Err(EngineError::InvalidTemplate(_))
        ));
        assert!(matches!(
            SessionTemplate::new(SprintCount::new(100), 60 * 60, 5 * 60).validate(),
            Err(EngineError::SessionTooLong(_))
        ));
    }

    #[test]
    fn huge_templates_are_too_long_instead_of_overflowing() {
        let max_minutes = i64::from(u32::MAX) * 60;
        for template in [
            SessionTemplate::new(SprintCount::new(i32::MAX), max_minutes, DEFAULT_REST_SECS),
            SessionTemplate::new(SprintCount::new(40_000_000), max_minutes, DEFAULT_REST_SECS),
            SessionTemplate::new(SprintCount::new(i32::MAX), 60, max_minutes),
        ] {
            assert!(matches!(template.validate(), Err(EngineError::SessionTooLong(_))));
        }
        assert_eq!(
            SessionTemplate::new(SprintCount::new(i32::MAX), max_minutes, max_minutes).total_secs(),
            Some(i64::MAX)
        );
    }

    #[test]
    fn total_time_counts_rests_between_sprints() {
        assert_eq!(SessionTemplate::classic().total_secs(), Some(4 * 25 * 60 + 3 * 5 * 60));
        assert_eq!(SessionTemplate::new(SprintCount::new(1), 60, 30).total_secs(), Some(60));
        assert_eq!(SessionTemplate::new(SprintCount::UNBOUNDED, 60, 30).total_secs(), None);
    }

    #[test]
    fn serde_round_trip_keeps_deadlines_and_flags() {
        let mut session = template(3).instantiate();
        session.start(t0()).unwrap();
        session.rest_started(t0() + secs(61));

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
        assert_eq!(back.state_at(t0() + secs(70)), session.state_at(t0() + secs(70)));
    }
}
