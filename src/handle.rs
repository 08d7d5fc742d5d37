use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
    Arc,
};

use crate::compose::RunSummary;

/// Events the orchestrator emits while a job runs. Every run ends with
/// exactly one terminal event (`Finished` or `Failed`).
#[derive(Debug)]
pub enum JobEvent {
    Log(String),
    Finished(RunSummary),
    Failed(String),
}

/// Shared handle between a running job and its control surface: a cooperative
/// stop flag plus the log/event channel. Clones share both, so the caller
/// keeps one clone for `request_stop` while the worker logs through another.
#[derive(Clone)]
pub struct JobHandle {
    stop: Arc<AtomicBool>,
    events: Sender<JobEvent>,
}

impl JobHandle {
    /// A fresh handle and the receiving end of its event channel.
    pub fn channel() -> (Self, Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                stop: Arc::new(AtomicBool::new(false)),
                events: tx,
            },
            rx,
        )
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Checked by the orchestrator at each key boundary, never mid-key.
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// A disconnected receiver is not an error; the job keeps running and
    /// the line is dropped.
    pub fn log(&self, msg: impl Into<String>) {
        let _ = self.events.send(JobEvent::Log(msg.into()));
    }

    pub(crate) fn finished(&self, summary: RunSummary) {
        let _ = self.events.send(JobEvent::Finished(summary));
    }

    pub(crate) fn failed(&self, msg: impl Into<String>) {
        let _ = self.events.send(JobEvent::Failed(msg.into()));
    }
}
