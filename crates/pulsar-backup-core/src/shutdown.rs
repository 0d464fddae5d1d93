//! Shutdown signal observed by engine tasks.

use tokio::sync::broadcast::{self, error::TryRecvError};

/// Latching view of an engine's shutdown channel.
///
/// A broadcast message is consumed by the first `try_recv`, so the observed
/// signal is remembered for every later check.
#[derive(Debug)]
pub struct Shutdown {
    rx: broadcast::Receiver<()>,
    signalled: bool,
}

impl Shutdown {
    pub fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            signalled: false,
        }
    }

    /// Non-blocking check
    pub fn is_signalled(&mut self) -> bool {
        if !self.signalled {
            self.signalled = matches!(self.rx.try_recv(), Ok(()) | Err(TryRecvError::Lagged(_)));
        }
        self.signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_latches() {
        let (tx, _) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(tx.subscribe());
        assert!(!shutdown.is_signalled());

        tx.send(()).unwrap();
        assert!(shutdown.is_signalled());
        assert!(shutdown.is_signalled());
    }
}
