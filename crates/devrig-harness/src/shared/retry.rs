use crate::shared::context::{CallContext, Interrupt};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    /// The ceiling passed without a successful probe.
    TimedOut { last_error: Option<E> },
    Interrupted(Interrupt),
}

/// Runs `probe` immediately and then every `interval` until it succeeds,
/// `ceiling` has elapsed, or the context ends. A probe still running when
/// the ceiling passes is dropped.
pub async fn poll_until<T, E, F, Fut>(
    ctx: &CallContext,
    interval: Duration,
    ceiling: Duration,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let give_up = Instant::now() + ceiling;
    let mut last_error = None;

    loop {
        match tokio::time::timeout_at(give_up, ctx.run(probe())).await {
            Ok(Ok(Ok(value))) => return Ok(value),
            Ok(Ok(Err(err))) => last_error = Some(err),
            Ok(Err(interrupt)) => return Err(PollError::Interrupted(interrupt)),
            Err(_) => return Err(PollError::TimedOut { last_error }),
        }

        let now = Instant::now();
        if now >= give_up {
            return Err(PollError::TimedOut { last_error });
        }
        let pause = interval.min(give_up - now);
        ctx.sleep(pause).await.map_err(PollError::Interrupted)?;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: E },
    /// An attempt failed with an error that is not worth retrying.
    Fatal(E),
    Interrupted(Interrupt),
}

/// Runs `op` up to `attempts` times, sleeping `backoff` between attempts
/// while `retryable` accepts the error.
pub async fn retry_attempts<T, E, F, Fut, R>(
    ctx: &CallContext,
    attempts: u32,
    backoff: Duration,
    retryable: R,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match ctx.run(op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(interrupt) => return Err(RetryError::Interrupted(interrupt)),
        };

        if !retryable(&err) {
            return Err(RetryError::Fatal(err));
        }
        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts,
                last_error: err,
            });
        }

        ctx.sleep(backoff).await.map_err(RetryError::Interrupted)?;
        attempt += 1;
    }
}
