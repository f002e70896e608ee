//! `RpcServerImpl` run-mode state machine (spec §4.11).

use tokio::sync::watch;

/// Stopped → Starting → Running → Terminating → Stopped; Failed is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Stopped,
    Starting,
    Running,
    Terminating,
    Failed,
}

/// `runmodeChanged(state)` (spec §4.11). Grounded on the teacher's
/// `runtime/message_bus.rs`, but narrowed from a glob-matched broadcast of
/// arbitrary named events to `tokio::sync::watch`: this signal only ever
/// carries "what is the current run mode", which is exactly what `watch`
/// models (always-current value, late subscribers see the latest state
/// immediately rather than missing past events).
pub struct RunModeSignal {
    tx: watch::Sender<RunMode>,
}

impl RunModeSignal {
    pub fn new() -> (Self, watch::Receiver<RunMode>) {
        let (tx, rx) = watch::channel(RunMode::Stopped);
        (Self { tx }, rx)
    }

    pub fn set(&self, mode: RunMode) {
        let _ = self.tx.send(mode);
    }

    pub fn current(&self) -> RunMode {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_observes_transitions() {
        let (signal, mut rx) = RunModeSignal::new();
        assert_eq!(*rx.borrow(), RunMode::Stopped);

        signal.set(RunMode::Starting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), RunMode::Starting);
        assert_eq!(signal.current(), RunMode::Starting);
    }
}
