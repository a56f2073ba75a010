//! Bounded retry loops shared by funding and confirmation

use backoff::backoff::Backoff;
use futures::future;
use std::{future::Future, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Delay grows by a fixed step per attempt up to a cap
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    initial: Duration,
    step: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl LinearBackoff {
    pub fn new(initial: Duration, step: Duration, max: Duration) -> Self {
        Self {
            initial,
            step,
            max,
            current: None,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.current = None;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current.unwrap_or(self.initial).min(self.max);
        self.current = Some((delay + self.step).min(self.max));
        Some(delay)
    }
}

/// How a bounded retry loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The predicate accepted a probed value
    Succeeded { value: T, attempts: u32 },
    /// Every attempt ran without the predicate accepting a value
    Exhausted { last: Option<T>, attempts: u32 },
    /// The caller deadline would have passed before the next probe
    DeadlineExceeded { last: Option<T>, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}

/// Runs act, wait, probe cycles until a predicate holds or the budget runs out
#[derive(Debug, Clone)]
pub struct BoundedRetry<B> {
    max_attempts: u32,
    backoff: B,
    deadline: Option<Instant>,
}

impl<B: Backoff> BoundedRetry<B> {
    pub fn new(max_attempts: u32, backoff: B) -> Self {
        Self {
            max_attempts,
            backoff,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Each attempt runs `act`, waits for the next backoff delay, then runs `probe`.
    /// Attempts are numbered from 1.
    pub async fn run<T, A, AF, P, PF, D>(
        &mut self,
        mut act: A,
        mut probe: P,
        is_done: D,
    ) -> RetryOutcome<T>
    where
        A: FnMut(u32) -> AF,
        AF: Future<Output = ()>,
        P: FnMut(u32) -> PF,
        PF: Future<Output = T>,
        D: Fn(&T) -> bool,
    {
        self.backoff.reset();
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            let Some(delay) = self.backoff.next_backoff() else {
                return RetryOutcome::Exhausted {
                    last,
                    attempts: attempt - 1,
                };
            };

            // An attempt whose probe cannot land before the deadline is never acted on
            if self.deadline_passed(delay) {
                debug!("Deadline leaves no room to probe attempt {}", attempt);
                return RetryOutcome::DeadlineExceeded {
                    last,
                    attempts: attempt - 1,
                };
            }

            act(attempt).await;
            sleep(delay).await;

            let value = probe(attempt).await;
            if is_done(&value) {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }

            debug!("Attempt {}/{} not yet satisfied", attempt, self.max_attempts);
            last = Some(value);
        }

        RetryOutcome::Exhausted {
            last,
            attempts: self.max_attempts,
        }
    }

    /// Probe-only variant of [`BoundedRetry::run`]
    pub async fn poll<T, P, PF, D>(&mut self, probe: P, is_done: D) -> RetryOutcome<T>
    where
        P: FnMut(u32) -> PF,
        PF: Future<Output = T>,
        D: Fn(&T) -> bool,
    {
        self.run(|_| future::ready(()), probe, is_done).await
    }

    fn deadline_passed(&self, after: Duration) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() + after > deadline)
    }
}
