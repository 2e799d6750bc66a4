// ── Retry ladder ──
//
// Pure bookkeeping for where a supervisor is on its reconnect schedule.
// Kept apart from the displayed `ConnectionState`: a socket that opens and
// then dies before its first frame shows `Connecting` but must resume the
// ladder where it left off.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rung {
    /// No failure since the last success (or since enable).
    Fresh,
    Rapid(u32),
    Backoff(u32),
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStep {
    Rapid { attempt: u32, delay: Duration },
    Backoff { attempt: u32, delay: Duration },
    /// Waiting again would overrun the backoff budget.
    Exhausted,
}

#[derive(Debug, Clone)]
pub(crate) struct RetryLadder {
    policy: RetryPolicy,
    rung: Rung,
    /// When `Backoff(1)` was entered. The budget runs on wall time from
    /// here: waits, attempts and gated ticks all count.
    backoff_since: Option<Instant>,
}

impl RetryLadder {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rung: Rung::Fresh,
            backoff_since: None,
        }
    }

    /// Back to the bottom after a successful connection or a re-enable.
    pub(crate) fn reset(&mut self) {
        self.rung = Rung::Fresh;
        self.backoff_since = None;
    }

    /// Climb one rung after an attempt that failed at `now`.
    pub(crate) fn on_failure(&mut self, now: Instant) -> NextStep {
        match self.rung {
            Rung::Fresh => self.rapid(1, now),
            Rung::Rapid(n) if n < self.policy.rapid_attempts => self.rapid(n + 1, now),
            Rung::Rapid(_) => self.backoff(1, now),
            Rung::Backoff(n) => self.backoff(n + 1, now),
        }
    }

    /// The wait of the current rung, reused when a tick is gated.
    pub(crate) fn current_delay(&self) -> Duration {
        match self.rung {
            Rung::Fresh | Rung::Rapid(_) => self.policy.rapid_delay,
            Rung::Backoff(n) => self.policy.backoff_delay(n),
        }
    }

    /// The wait for a gated tick at `now`, or `None` once waiting again
    /// would overrun the budget.
    pub(crate) fn gated_delay(&self, now: Instant) -> Option<Duration> {
        let delay = self.current_delay();
        (!self.overruns(now, delay)).then_some(delay)
    }

    /// Instant the backoff budget runs out, if the ladder is in backoff.
    pub(crate) fn budget_deadline(&self) -> Option<Instant> {
        self.backoff_since.map(|since| since + self.policy.backoff_budget)
    }

    fn rapid(&mut self, attempt: u32, now: Instant) -> NextStep {
        if self.policy.rapid_attempts == 0 {
            return self.backoff(1, now);
        }
        self.rung = Rung::Rapid(attempt);
        NextStep::Rapid {
            attempt,
            delay: self.policy.rapid_delay,
        }
    }

    fn backoff(&mut self, attempt: u32, now: Instant) -> NextStep {
        let delay = self.policy.backoff_delay(attempt);
        if attempt == 1 {
            self.backoff_since = Some(now);
        }
        if self.overruns(now, delay) {
            return NextStep::Exhausted;
        }
        self.rung = Rung::Backoff(attempt);
        NextStep::Backoff { attempt, delay }
    }

    fn overruns(&self, now: Instant, delay: Duration) -> bool {
        let Some(since) = self.backoff_since else {
            return false;
        };
        let elapsed = now.saturating_duration_since(since);
        elapsed >= self.policy.backoff_budget || elapsed + delay > self.policy.backoff_budget
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    /// Drive the ladder through the rapid rungs, each failure at `start`.
    fn past_rapid(ladder: &mut RetryLadder, start: Instant) {
        for _ in 0..RetryPolicy::default().rapid_attempts {
            ladder.on_failure(start);
        }
    }

    #[test]
    fn five_rapid_then_backoff() {
        let mut ladder = RetryLadder::new(RetryPolicy::default());
        let now = Instant::now();
        let steps: Vec<NextStep> = (0..7).map(|_| ladder.on_failure(now)).collect();

        assert_eq!(
            steps,
            vec![
                NextStep::Rapid { attempt: 1, delay: secs(2) },
                NextStep::Rapid { attempt: 2, delay: secs(2) },
                NextStep::Rapid { attempt: 3, delay: secs(2) },
                NextStep::Rapid { attempt: 4, delay: secs(2) },
                NextStep::Rapid { attempt: 5, delay: secs(2) },
                NextStep::Backoff { attempt: 1, delay: secs(30) },
                NextStep::Backoff { attempt: 2, delay: secs(60) },
            ]
        );
    }

    #[test]
    fn budget_exhausts_before_thirty_minutes_of_waiting() {
        let mut ladder = RetryLadder::new(RetryPolicy::default());
        let start = Instant::now();
        past_rapid(&mut ladder, start);

        // Refusals are instant: only the waits move the clock.
        let mut now = start;
        let mut attempts = Vec::new();
        loop {
            match ladder.on_failure(now) {
                NextStep::Backoff { attempt, delay } => {
                    attempts.push(attempt);
                    now += delay;
                }
                NextStep::Exhausted => break,
                NextStep::Rapid { .. } => unreachable!(),
            }
        }

        // 30+60+120+240+300*4 = 1650s; a ninth wait would pass 1800s.
        assert_eq!(attempts, (1..=8).collect::<Vec<_>>());
        assert_eq!(now - start, secs(1650));
        assert_eq!(ladder.on_failure(now), NextStep::Exhausted);
    }

    #[test]
    fn time_inside_attempts_counts_against_the_budget() {
        let mut ladder = RetryLadder::new(RetryPolicy::default());
        let start = Instant::now();
        past_rapid(&mut ladder, start);

        // Every attempt hangs for the 90s heartbeat before failing.
        let mut now = start;
        let mut attempts = Vec::new();
        while let NextStep::Backoff { attempt, delay } = ladder.on_failure(now) {
            attempts.push(attempt);
            now += delay + secs(90);
        }

        assert_eq!(attempts, (1..=6).collect::<Vec<_>>());
        assert!(now - start <= RetryPolicy::default().backoff_budget);
    }

    #[test]
    fn gated_ticks_spend_the_budget_too() {
        let mut ladder = RetryLadder::new(RetryPolicy::default());
        let start = Instant::now();
        past_rapid(&mut ladder, start);
        assert_eq!(
            ladder.on_failure(start),
            NextStep::Backoff { attempt: 1, delay: secs(30) }
        );
        assert_eq!(ladder.budget_deadline(), Some(start + secs(1800)));

        assert_eq!(ladder.gated_delay(start + secs(1770)), Some(secs(30)));
        assert_eq!(ladder.gated_delay(start + secs(1771)), None);
    }

    #[test]
    fn reset_returns_to_rapid_and_refills_budget() {
        let mut ladder = RetryLadder::new(RetryPolicy::default());
        let start = Instant::now();
        for _ in 0..8 {
            ladder.on_failure(start);
        }
        assert_eq!(ladder.current_delay(), secs(120));

        ladder.reset();
        assert_eq!(ladder.current_delay(), secs(2));
        assert_eq!(ladder.budget_deadline(), None);
        assert_eq!(ladder.gated_delay(start + secs(7200)), Some(secs(2)));
        assert_eq!(
            ladder.on_failure(start + secs(7200)),
            NextStep::Rapid { attempt: 1, delay: secs(2) }
        );
    }
}
