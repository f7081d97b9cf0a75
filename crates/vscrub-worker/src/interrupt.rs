//! Pre-emption notice plumbing.

use tokio::sync::watch;

/// Raises the interruption notice.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: watch::Sender<bool>,
}

impl InterruptHandle {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> InterruptSignal {
        InterruptSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes the interruption notice at checkpoints.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    rx: watch::Receiver<bool>,
}

impl InterruptSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        interrupt_channel().1
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the notice is raised.
    pub async fn raised(&mut self) {
        // The sender is gone when never() drops it; stay pending in that case.
        let closed = self.rx.wait_for(|raised| *raised).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

pub fn interrupt_channel() -> (InterruptHandle, InterruptSignal) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx }, InterruptSignal { rx })
}
