//! The death-penalty guard: forced interruption of overrunning jobs.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pluggable interruption strategy. Arming returns a scoped [`ArmedGuard`]
/// whose cancellation signal the worker races against job execution; the
/// worker logic is polymorphic over this single capability.
pub trait DeathPenalty: Send + Sync {
    fn arm(&self, timeout: Option<Duration>) -> ArmedGuard;
}

/// A scoped, armed guard for exactly one job execution.
///
/// Dropping the guard disarms it on every exit path (normal return, error, or
/// expiry), so a guard never outlives the job it protects. The token is also
/// how an external stop reaches the current job.
#[derive(Debug)]
pub struct ArmedGuard {
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl ArmedGuard {
    /// A guard that will never fire on its own.
    pub fn inert() -> Self {
        Self {
            token: CancellationToken::new(),
            timer: None,
        }
    }

    /// Handle to the guard's cancellation signal, usable to force a stop from
    /// outside the execution path.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the guard has fired.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Explicit disarm; equivalent to dropping the guard.
    pub fn disarm(self) {}
}

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Timer-backed guard: once armed with a budget, a runtime timer cancels the
/// token when the budget elapses. Armed without a budget it stays inert but
/// still accepts an external stop through its token.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerDeathPenalty;

impl DeathPenalty for TimerDeathPenalty {
    fn arm(&self, timeout: Option<Duration>) -> ArmedGuard {
        let token = CancellationToken::new();
        let timer = timeout.map(|budget| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                token.cancel();
            })
        });
        ArmedGuard { token, timer }
    }
}

/// Guard that never fires; used by inline execution where no timeout is
/// enforced.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpDeathPenalty;

impl DeathPenalty for NoOpDeathPenalty {
    fn arm(&self, _timeout: Option<Duration>) -> ArmedGuard {
        ArmedGuard::inert()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_guard_fires_after_budget() {
        let guard = TimerDeathPenalty.arm(Some(Duration::from_millis(10)));
        tokio::time::timeout(Duration::from_secs(1), guard.cancelled())
            .await
            .expect("guard should fire");
        assert!(guard.is_fired());
    }

    #[tokio::test]
    async fn timer_guard_without_budget_stays_inert() {
        let guard = TimerDeathPenalty.arm(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guard.is_fired());

        // An external stop still reaches it through the token.
        guard.token().cancel();
        assert!(guard.is_fired());
    }

    #[tokio::test]
    async fn dropping_the_guard_disarms_the_timer() {
        let guard = TimerDeathPenalty.arm(Some(Duration::from_millis(10)));
        let token = guard.token();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn noop_guard_ignores_budget() {
        let guard = NoOpDeathPenalty.arm(Some(Duration::from_millis(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!guard.is_fired());
    }
}
