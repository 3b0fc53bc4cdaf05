use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation plus an optional deadline, handed down through every
/// blocking operation. Derived contexts are cancelled with their parent and
/// never outlive its deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// A derived context that can be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Non-blocking check.
    pub fn interrupt(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or past its deadline.
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Drives `future` unless the context ends first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupt> {
        if let Some(interrupt) = self.interrupt() {
            return Err(interrupt);
        }
        tokio::select! {
            biased;
            interrupt = self.done() => Err(interrupt),
            output = future => Ok(output),
        }
    }

    /// Sleeps for `duration`, waking early when the context ends.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interrupt> {
        self.run(tokio::time::sleep(duration)).await
    }
}
