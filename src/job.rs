//! Background execution of a solve.
//!
//! A [`SolveJob`] runs one closure on a named worker thread and hands the
//! outcome back over a channel. The host polls with [`SolveJob::state`] or
//! [`SolveJob::try_take`] and never blocks unless it calls [`SolveJob::wait`].
//!
//! Cancellation is dropping the handle. The numeric kernel is not interrupted:
//! the worker runs to completion and its result is discarded.

use std::io;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::debug;

/// Progress of a background job as seen from its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    /// The outcome is ready to take.
    Finished,
    /// The worker ended without delivering (it panicked), or the outcome was
    /// already taken.
    Lost,
}

/// Handle to a computation running on its own thread.
pub struct SolveJob<T> {
    name: String,
    receiver: Receiver<T>,
    ready: Option<T>,
}

impl<T: Send + 'static> SolveJob<T> {
    /// Starts `work` on a new thread called `name`.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> io::Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let worker_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("job {worker_name}: started");
            let outcome = work();
            if sender.send(outcome).is_err() {
                debug!("job {worker_name}: handle dropped, discarding result");
            } else {
                debug!("job {worker_name}: finished");
            }
        })?;
        Ok(Self {
            name,
            receiver,
            ready: None,
        })
    }
}

impl<T> SolveJob<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Polls the worker without blocking.
    pub fn state(&mut self) -> JobState {
        if self.ready.is_some() {
            return JobState::Finished;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.ready = Some(outcome);
                JobState::Finished
            }
            Err(TryRecvError::Empty) => JobState::Running,
            Err(TryRecvError::Disconnected) => JobState::Lost,
        }
    }

    /// Takes the outcome if it is ready.
    pub fn try_take(&mut self) -> Option<T> {
        match self.state() {
            JobState::Finished => self.ready.take(),
            JobState::Running | JobState::Lost => None,
        }
    }

    /// Blocks until the worker delivers. `None` if it panicked.
    pub fn wait(mut self) -> Option<T> {
        if let Some(outcome) = self.ready.take() {
            return Some(outcome);
        }
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_moves_from_running_to_finished() {
        let (go, gate) = mpsc::channel::<()>();
        let mut job = SolveJob::spawn("gated", move || {
            gate.recv().ok();
            7
        })
        .unwrap();
        assert_eq!(job.state(), JobState::Running);
        assert_eq!(job.try_take(), None);
        go.send(()).unwrap();
        assert_eq!(job.wait(), Some(7));
    }

    #[test]
    fn taken_outcome_leaves_job_lost() {
        let mut job = SolveJob::spawn("quick", || "done").unwrap();
        while job.state() == JobState::Running {
            thread::yield_now();
        }
        assert_eq!(job.try_take(), Some("done"));
        // the worker may still hold its sender for a moment
        while job.state() == JobState::Running {
            thread::yield_now();
        }
        assert_eq!(job.state(), JobState::Lost);
    }
}
