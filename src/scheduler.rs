//! Daily trigger for collection runs.
//!
//! State machine: `Idle -> Waiting(next_trigger) -> Running -> Idle`. Only one
//! run is in flight at a time; triggers that come due during a run collapse
//! into a single deferred run started as soon as the current one finishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::error::CollectorError;

/// Upper bound for a single sleep so wall-clock jumps are noticed.
const MAX_SLEEP: Duration = Duration::from_secs(3600);

/// Days searched for a valid local trigger time before giving up on DST math.
const MAX_LOOKAHEAD_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Wait for the first daily trigger (production)
    ScheduledOnly,
    /// Run once at startup, then follow the daily trigger (development)
    ImmediateThenScheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting(DateTime<Utc>),
    Running,
}

/// A fixed local wall-clock time, once per calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailySchedule {
    at: NaiveTime,
    timezone: Tz,
}

impl DailySchedule {
    pub fn new(at: NaiveTime, timezone: Tz) -> Self {
        Self { at, timezone }
    }

    /// Parse `HH:MM` and an IANA zone name such as `Asia/Seoul`.
    pub fn parse(time: &str, timezone: &str) -> Result<Self, CollectorError> {
        let at = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|e| {
            CollectorError::Config(format!("schedule time '{}' is not HH:MM: {}", time, e))
        })?;
        let timezone = timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| CollectorError::Config(format!("unknown time zone '{}'", timezone)))?;

        Ok(Self::new(at, timezone))
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First trigger strictly after `after`.
    ///
    /// A local time skipped by a DST transition rolls to the next day that
    /// has it; a repeated local time resolves to its earliest instant.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = after.with_timezone(&self.timezone).date_naive();

        for offset in 0..=MAX_LOOKAHEAD_DAYS {
            let Some(date) = local_date.checked_add_signed(TimeDelta::days(offset)) else {
                break;
            };

            let candidate = self
                .timezone
                .from_local_datetime(&date.and_time(self.at))
                .earliest()
                .map(|t| t.with_timezone(&Utc));

            match candidate {
                Some(t) if t > after => return t,
                Some(_) => {}
                None => debug!(
                    date = %date,
                    time = %self.at,
                    timezone = %self.timezone,
                    "Local trigger time does not exist on this date, skipping"
                ),
            }
        }

        after + TimeDelta::days(1)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One full collection run.
#[async_trait]
pub trait CollectionJob: Send + Sync {
    async fn run_once(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextRun {
    At(DateTime<Utc>),
    Deferred,
}

pub struct Scheduler {
    schedule: DailySchedule,
    mode: RunMode,
    clock: Arc<dyn Clock>,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(schedule: DailySchedule, mode: RunMode, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule,
            mode,
            clock,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Drive `job` forever. Runs never overlap.
    pub async fn run(&mut self, job: &dyn CollectionJob) {
        let start = self.clock.now();
        let mut next = match self.mode {
            RunMode::ImmediateThenScheduled => {
                info!("Immediate run requested at startup");
                NextRun::Deferred
            }
            RunMode::ScheduledOnly => NextRun::At(self.schedule.next_after(start)),
        };

        loop {
            let trigger = match next {
                NextRun::At(trigger) => {
                    self.state = SchedulerState::Waiting(trigger);
                    info!(
                        next_run = %trigger.with_timezone(&self.schedule.timezone).to_rfc3339(),
                        next_run_utc = %trigger.to_rfc3339(),
                        "Waiting for next scheduled run"
                    );
                    self.sleep_until(trigger).await;
                    trigger
                }
                NextRun::Deferred => self.clock.now(),
            };

            self.state = SchedulerState::Running;
            let started = self.clock.now();
            info!(trigger = %trigger.to_rfc3339(), "Collection run started");

            job.run_once().await;

            let finished = self.clock.now();
            self.state = SchedulerState::Idle;
            info!(
                duration_seconds = (finished - started).num_seconds(),
                "Collection run finished"
            );

            next = self.plan_next(trigger, finished);
        }
    }

    /// Decide what follows a run served for `last_trigger` that ended at `now`.
    fn plan_next(&self, last_trigger: DateTime<Utc>, now: DateTime<Utc>) -> NextRun {
        let upcoming = self.schedule.next_after(last_trigger);
        if upcoming > now {
            return NextRun::At(upcoming);
        }

        let missed = self.count_missed(upcoming, now);
        warn!(
            missed_triggers = missed,
            first_missed = %upcoming.to_rfc3339(),
            "Trigger came due during a run, starting deferred run"
        );
        NextRun::Deferred
    }

    fn count_missed(&self, first: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let mut missed = 0;
        let mut trigger = first;
        while trigger <= now {
            missed += 1;
            trigger = self.schedule.next_after(trigger);
        }
        missed
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        loop {
            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            let remaining = (deadline - now).to_std().unwrap_or_default();
            tokio::time::sleep(remaining.min(MAX_SLEEP)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn seoul_0800() -> DailySchedule {
        DailySchedule::parse("08:00", "Asia/Seoul").unwrap()
    }

    /// Wall clock that follows tokio's (pausable) clock.
    struct TokioClock {
        base: DateTime<Utc>,
        origin: Instant,
    }

    impl TokioClock {
        fn starting_at(base: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                base,
                origin: Instant::now(),
            })
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + TimeDelta::from_std(self.origin.elapsed()).unwrap()
        }
    }

    struct RecordingJob {
        clock: Arc<TokioClock>,
        duration: Duration,
        starts: Mutex<Vec<DateTime<Utc>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl RecordingJob {
        fn new(clock: Arc<TokioClock>, duration: Duration) -> Self {
            Self {
                clock,
                duration,
                starts: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        fn starts(&self) -> Vec<DateTime<Utc>> {
            self.starts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CollectionJob for RecordingJob {
        async fn run_once(&self) {
            self.starts.lock().unwrap().push(self.clock.now());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.duration).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn drive_for(scheduler: &mut Scheduler, job: &RecordingJob, hours: u64) {
        let _ = tokio::time::timeout(Duration::from_secs(hours * 3600), scheduler.run(job)).await;
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            DailySchedule::parse("8am", "Asia/Seoul"),
            Err(CollectorError::Config(_))
        ));
        assert!(matches!(
            DailySchedule::parse("08:00", "Mars/Olympus"),
            Err(CollectorError::Config(_))
        ));
    }

    #[test]
    fn test_next_after_same_day() {
        assert_eq!(
            seoul_0800().next_after(utc("2026-10-18T22:00:00Z")),
            utc("2026-10-18T23:00:00Z")
        );
    }

    #[test]
    fn test_next_after_is_strictly_after() {
        assert_eq!(
            seoul_0800().next_after(utc("2026-10-18T23:00:00Z")),
            utc("2026-10-19T23:00:00Z")
        );
    }

    #[test]
    fn test_next_after_skips_dst_gap() {
        let schedule = DailySchedule::parse("02:30", "America/New_York").unwrap();
        assert_eq!(
            schedule.next_after(utc("2026-03-07T12:00:00Z")),
            utc("2026-03-09T06:30:00Z")
        );
    }

    #[test]
    fn test_next_after_ambiguous_time_uses_earliest() {
        let schedule = DailySchedule::parse("01:30", "America/New_York").unwrap();
        assert_eq!(
            schedule.next_after(utc("2026-10-31T12:00:00Z")),
            utc("2026-11-01T05:30:00Z")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_only_runs_once_per_day() {
        let clock = TokioClock::starting_at(utc("2026-10-19T00:00:00Z"));
        let job = RecordingJob::new(clock.clone(), Duration::from_secs(600));
        let mut scheduler = Scheduler::new(seoul_0800(), RunMode::ScheduledOnly, clock);

        drive_for(&mut scheduler, &job, 72).await;

        assert_eq!(
            job.starts(),
            vec![
                utc("2026-10-19T23:00:00Z"),
                utc("2026-10-20T23:00:00Z"),
                utc("2026-10-21T23:00:00Z"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_mode_runs_at_startup_then_daily() {
        let clock = TokioClock::starting_at(utc("2026-10-19T00:00:00Z"));
        let job = RecordingJob::new(clock.clone(), Duration::from_secs(600));
        let mut scheduler = Scheduler::new(seoul_0800(), RunMode::ImmediateThenScheduled, clock);

        drive_for(&mut scheduler, &job, 72).await;

        let starts = job.starts();
        assert_eq!(starts.len(), 4);
        assert_eq!(starts[0], utc("2026-10-19T00:00:00Z"));
        assert_eq!(starts[1], utc("2026-10-19T23:00:00Z"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_job_defers_and_collapses_triggers() {
        let clock = TokioClock::starting_at(utc("2026-10-18T22:00:00Z"));
        let job = RecordingJob::new(clock.clone(), Duration::from_secs(30 * 3600));
        let mut scheduler = Scheduler::new(seoul_0800(), RunMode::ScheduledOnly, clock);

        drive_for(&mut scheduler, &job, 80).await;

        assert_eq!(
            job.starts(),
            vec![
                utc("2026-10-18T23:00:00Z"),
                utc("2026-10-20T05:00:00Z"),
                utc("2026-10-21T11:00:00Z"),
            ]
        );
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plan_next_counts_collapsed_triggers() {
        let clock = TokioClock::starting_at(utc("2026-10-18T22:00:00Z"));
        let scheduler = Scheduler::new(seoul_0800(), RunMode::ScheduledOnly, clock);

        assert_eq!(
            scheduler.plan_next(utc("2026-10-18T23:00:00Z"), utc("2026-10-19T01:00:00Z")),
            NextRun::At(utc("2026-10-19T23:00:00Z"))
        );
        assert_eq!(
            scheduler.plan_next(utc("2026-10-18T23:00:00Z"), utc("2026-10-21T00:00:00Z")),
            NextRun::Deferred
        );
        assert_eq!(
            scheduler.count_missed(utc("2026-10-19T23:00:00Z"), utc("2026-10-21T00:00:00Z")),
            2
        );
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let clock = TokioClock::starting_at(utc("2026-10-18T22:00:00Z"));
        let scheduler = Scheduler::new(seoul_0800(), RunMode::ScheduledOnly, clock);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
