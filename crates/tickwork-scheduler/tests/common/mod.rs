#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tickwork_events::{EventFlag, EventSink, JobEvent};
use tickwork_scheduler::{CancellationScope, Cancelled, Clock, FakeClock, Job, JobError, Schedule};
use tokio::sync::Notify;

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// Poll `cond` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    cond()
}

/// Keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn of(&self, job: &str, flag: EventFlag) -> Vec<JobEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.job_name == job && e.flag == flag)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &JobEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// What a [`TestJob`] does when executed.
pub enum Behavior {
    /// Returns immediately.
    Succeed,
    /// Returns `JobError::Failed`.
    Fail(&'static str),
    /// Panics with a message.
    Panic(&'static str),
    /// Unwinds with the `Cancelled` payload.
    PanicCancelled,
    /// Runs until `FakeClock` shows the given time has passed, polling the scope.
    BusyFor(Arc<FakeClock>, Duration),
    /// Polls the scope every few milliseconds for up to the given real time.
    PollFor(Duration),
    /// Waits for a release signal, ignoring cancellation.
    UntilReleased(Arc<Notify>),
}

/// Counters shared between a test job and the test.
#[derive(Default)]
pub struct Tally {
    pub starts: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub start_hooks: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub completions: Mutex<Vec<Option<String>>>,
    pub cancelled_completions: AtomicUsize,
    pub elapsed: Mutex<Vec<Duration>>,
}

impl Tally {
    pub fn completed(&self) -> usize {
        self.completions.lock().unwrap().len()
    }
}

pub struct TestJob {
    pub name: String,
    pub schedule: Arc<dyn Schedule>,
    pub behavior: Behavior,
    pub timeout: Option<Duration>,
    pub serial: bool,
    pub show_messages: bool,
    pub tally: Arc<Tally>,
}

impl TestJob {
    pub fn new(name: &str, schedule: impl Schedule + 'static, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            schedule: Arc::new(schedule),
            behavior,
            timeout: None,
            serial: true,
            show_messages: true,
            tally: Arc::new(Tally::default()),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.serial = false;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.show_messages = false;
        self
    }

    pub fn tally(&self) -> Arc<Tally> {
        Arc::clone(&self.tally)
    }

    async fn body(&self, scope: &CancellationScope, began: Option<DateTime<Utc>>) -> Result<(), JobError> {
        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(JobError::failed(*message)),
            Behavior::Panic(message) => panic!("{message}"),
            Behavior::PanicCancelled => std::panic::panic_any(Cancelled),
            Behavior::BusyFor(clock, duration) => {
                let began = began.unwrap_or_else(|| clock.now());
                let until = began + chrono::TimeDelta::from_std(*duration).unwrap();
                while clock.now() < until {
                    scope.check_cancellation()?;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Ok(())
            }
            Behavior::PollFor(duration) => {
                let until = Instant::now() + *duration;
                while Instant::now() < until {
                    scope.check_cancellation()?;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(())
            }
            Behavior::UntilReleased(release) => {
                release.notified().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Job for TestJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self) -> Arc<dyn Schedule> {
        Arc::clone(&self.schedule)
    }

    async fn execute(&self, scope: CancellationScope) -> Result<(), JobError> {
        // Read the fake clock before announcing the start; tests advance it right after.
        let began = match &self.behavior {
            Behavior::BusyFor(clock, _) => Some(clock.now()),
            _ => None,
        };
        let tally = &self.tally;
        tally.starts.fetch_add(1, Ordering::SeqCst);
        let active = tally.active.fetch_add(1, Ordering::SeqCst) + 1;
        tally.max_active.fetch_max(active, Ordering::SeqCst);
        let started = Instant::now();

        let outcome = self.body(&scope, began).await;

        tally.elapsed.lock().unwrap().push(started.elapsed());
        tally.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn status(&self) -> Option<String> {
        Some(format!("{} starts", self.tally.starts.load(Ordering::SeqCst)))
    }

    fn show_messages(&self) -> bool {
        self.show_messages
    }

    fn serial(&self) -> bool {
        self.serial
    }

    fn on_start(&self) {
        self.tally.start_hooks.fetch_add(1, Ordering::SeqCst);
    }

    fn on_complete(&self, error: Option<&JobError>) {
        if error.is_some_and(JobError::is_cancelled) {
            self.tally.cancelled_completions.fetch_add(1, Ordering::SeqCst);
        }
        self.tally
            .completions
            .lock()
            .unwrap()
            .push(error.map(|e| e.to_string()));
    }

    fn on_cancellation(&self) {
        self.tally.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}
