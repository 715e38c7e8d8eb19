//! Background execution of reasoning and query jobs.
//!
//! At most one job runs at a time. Its output comes back over a channel that is
//! drained from the interface thread with [`TaskRunner::try_complete`] or [`TaskRunner::wait`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread::{Builder, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

/// The kind of job running in the background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Reasoning,
    Query,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reasoning => "reasoning",
            Self::Query => "query",
        })
    }
}

/// Shared flag a running job polls to know if it should stop early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a background job ended.
#[derive(Debug)]
pub enum Completion<T> {
    Finished(T),
    /// The job panicked before producing its output.
    Crashed,
}

struct InFlight<T> {
    kind: TaskKind,
    cancellation: CancellationToken,
    receiver: Receiver<T>,
    handle: JoinHandle<()>,
    started: Instant,
}

/// Runs jobs on a worker thread, one at a time.
pub struct TaskRunner<T> {
    in_flight: Option<InFlight<T>>,
}

impl<T: Send + 'static> TaskRunner<T> {
    pub fn new() -> Self {
        Self { in_flight: None }
    }

    /// Starts `job` on a worker thread.
    ///
    /// Returns the kind of the running job if one is already in flight.
    pub fn spawn(
        &mut self,
        kind: TaskKind,
        job: impl FnOnce(&CancellationToken) -> T + Send + 'static,
    ) -> Result<(), TaskKind> {
        if let Some(in_flight) = &self.in_flight {
            return Err(in_flight.kind);
        }
        let cancellation = CancellationToken::new();
        let (sender, receiver) = channel();
        let token = cancellation.clone();
        let handle = Builder::new()
            .name(format!("ontoscope {kind}"))
            .spawn(move || {
                // The receiver is gone only if the runner itself has been dropped
                let _: Result<(), _> = sender.send(job(&token));
            })
            .map_err(|e| {
                warn!("Unable to start the {kind} worker thread: {e}");
                kind
            })?;
        debug!("{kind} started");
        self.in_flight = Some(InFlight {
            kind,
            cancellation,
            receiver,
            handle,
            started: Instant::now(),
        });
        Ok(())
    }

    /// The kind of the job currently running, if any.
    pub fn busy(&self) -> Option<TaskKind> {
        self.in_flight.as_ref().map(|in_flight| in_flight.kind)
    }

    /// Asks the running job to stop. Returns `false` if nothing is running.
    pub fn cancel(&self) -> bool {
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancellation.cancel();
            true
        } else {
            false
        }
    }

    /// Returns the running job output if it is already available.
    pub fn try_complete(&mut self) -> Option<(TaskKind, Completion<T>)> {
        let completion = match self.in_flight.as_ref()?.receiver.try_recv() {
            Ok(output) => Completion::Finished(output),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Completion::Crashed,
        };
        let in_flight = self.in_flight.take()?;
        Some(Self::finish(in_flight, completion))
    }

    /// Blocks until the running job ends. Returns `None` if nothing is running.
    pub fn wait(&mut self) -> Option<(TaskKind, Completion<T>)> {
        let completion = match self.in_flight.as_ref()?.receiver.recv() {
            Ok(output) => Completion::Finished(output),
            Err(_) => Completion::Crashed,
        };
        let in_flight = self.in_flight.take()?;
        Some(Self::finish(in_flight, completion))
    }

    fn finish(in_flight: InFlight<T>, completion: Completion<T>) -> (TaskKind, Completion<T>) {
        if in_flight.handle.join().is_err() {
            warn!("The {} worker thread panicked", in_flight.kind);
        }
        debug!(
            elapsed_ms = in_flight.started.elapsed().as_millis(),
            "{} finished",
            in_flight.kind
        );
        (in_flight.kind, completion)
    }
}

impl<T: Send + 'static> Default for TaskRunner<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;

    #[test]
    fn runs_one_job_at_a_time() {
        let mut runner = TaskRunner::new();
        let (release, gate) = sync_channel::<()>(0);
        let spawned = runner.spawn(TaskKind::Reasoning, move |_| {
            let _: Result<(), _> = gate.recv();
            1
        });
        assert!(spawned.is_ok());
        assert_eq!(runner.busy(), Some(TaskKind::Reasoning));
        assert_eq!(
            runner.spawn(TaskKind::Query, |_| 2),
            Err(TaskKind::Reasoning)
        );
        assert!(runner.try_complete().is_none());
        assert!(release.send(()).is_ok());
        assert!(matches!(
            runner.wait(),
            Some((TaskKind::Reasoning, Completion::Finished(1)))
        ));
        assert_eq!(runner.busy(), None);
        assert!(runner.spawn(TaskKind::Query, |_| 2).is_ok());
        assert!(matches!(
            runner.wait(),
            Some((TaskKind::Query, Completion::Finished(2)))
        ));
    }

    #[test]
    fn cancellation_reaches_the_job() {
        let mut runner = TaskRunner::new();
        let spawned = runner.spawn(TaskKind::Query, |token| {
            while !token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            "stopped"
        });
        assert!(spawned.is_ok());
        assert!(runner.cancel());
        assert!(matches!(
            runner.wait(),
            Some((_, Completion::Finished("stopped")))
        ));
        assert!(!runner.cancel());
    }

    #[test]
    fn crashed_job_frees_the_runner() {
        let mut runner = TaskRunner::<u8>::new();
        assert!(runner.spawn(TaskKind::Query, |_| panic!("boom")).is_ok());
        assert!(matches!(runner.wait(), Some((_, Completion::Crashed))));
        assert_eq!(runner.busy(), None);
    }

    #[test]
    fn nothing_to_wait_for() {
        let mut runner = TaskRunner::<()>::new();
        assert!(runner.wait().is_none());
        assert!(runner.try_complete().is_none());
    }
}
