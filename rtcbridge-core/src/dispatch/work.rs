//! Work items and the completion signal used by blocking submissions.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a work item ended, as seen by a blocked submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    Panicked(String),
    /// Discarded without running (dispatcher shut down).
    Dropped,
}

/// One-shot completion signal. `finish` may be called from any thread; the
/// first outcome wins.
pub(crate) struct Signal {
    outcome: Mutex<Option<Outcome>>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn finish(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.cond.notify_all();
    }

    /// Block until finished, or until `deadline` passes (`None` then).
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> Option<Outcome> {
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut slot),
            }
        }
        slot.clone()
    }
}

/// A closure bound for the designated thread plus an optional completion
/// signal. The closure's captures are its payload.
pub(crate) struct WorkItem {
    job: Option<Job>,
    signal: Option<Arc<Signal>>,
}

impl WorkItem {
    pub(crate) fn new(job: Job, signal: Option<Arc<Signal>>) -> Self {
        Self {
            job: Some(job),
            signal,
        }
    }

    /// Run the job, catching a panic. The signal fires on every path.
    pub(crate) fn run(mut self) -> Result<(), String> {
        let result = match self.job.take() {
            Some(job) => catch_unwind(AssertUnwindSafe(job)).map_err(|p| panic_message(&*p)),
            None => Ok(()),
        };
        if let Some(signal) = self.signal.take() {
            signal.finish(match &result {
                Ok(()) => Outcome::Done,
                Err(msg) => Outcome::Panicked(msg.clone()),
            });
        }
        result
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        // Never leave a blocked submitter waiting on an item that will not run.
        if let Some(signal) = self.signal.take() {
            signal.finish(Outcome::Dropped);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_fires_on_success() {
        let signal = Arc::new(Signal::new());
        let item = WorkItem::new(Box::new(|| {}), Some(signal.clone()));
        assert!(item.run().is_ok());
        assert_eq!(signal.wait(None), Some(Outcome::Done));
    }

    #[test]
    fn test_signal_fires_on_panic() {
        let signal = Arc::new(Signal::new());
        let item = WorkItem::new(Box::new(|| panic!("boom")), Some(signal.clone()));
        assert_eq!(item.run(), Err("boom".to_string()));
        assert_eq!(signal.wait(None), Some(Outcome::Panicked("boom".to_string())));
    }

    #[test]
    fn test_dropped_item_releases_signal() {
        let signal = Arc::new(Signal::new());
        drop(WorkItem::new(Box::new(|| {}), Some(signal.clone())));
        assert_eq!(signal.wait(None), Some(Outcome::Dropped));
    }

    #[test]
    fn test_wait_times_out() {
        let signal = Signal::new();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(signal.wait(Some(deadline)), None);
    }

    #[test]
    fn test_first_outcome_wins() {
        let signal = Signal::new();
        signal.finish(Outcome::Done);
        signal.finish(Outcome::Dropped);
        assert_eq!(signal.wait(None), Some(Outcome::Done));
    }
}
