use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// External pause/resume/stop switch for the polling loop
///
/// The loop looks at it once per cycle boundary; calls already in flight
/// are allowed to finish.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Arc<watch::Sender<RunState>>,
}

impl ControlHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<RunState>) {
        let (tx, rx) = watch::channel(RunState::Running);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn pause(&self) {
        self.tx.send_modify(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
            }
        });
    }

    pub fn resume(&self) {
        self.tx.send_modify(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
            }
        });
    }

    /// Final; a stopped loop cannot be resumed
    pub fn stop(&self) {
        self.tx.send_replace(RunState::Stopped);
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }
}
