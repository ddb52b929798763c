use crate::config::RateLimits;
use crate::models::{LimitKind, UsageSnapshot, UsageState};
use crate::storage::UsageStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

const WINDOW_SECONDS: i64 = 60;

/// Sliding-window limiter for outbound completion calls, with daily
/// request and token counters.
///
/// Requests are rejected when the 60 s window is full. The daily counters
/// only reject when `RateLimits::enforce_daily` is set; otherwise they are
/// tracked and reported. The guard owns the usage state outright. Daily counters are written
/// through to the store on every change; the per-minute window lives only
/// in memory. Store failures are logged and never surface to callers.
pub struct RateGuard {
    limits: RateLimits,
    state: UsageState,
    store: Box<dyn UsageStore>,
}

impl RateGuard {
    /// Loads persisted counters and performs the once-per-process daily reset.
    pub fn open(store: Box<dyn UsageStore>, limits: RateLimits, today: NaiveDate) -> Self {
        let daily = match store.load_daily() {
            Ok(daily) => Some(daily),
            Err(err) => {
                warn!(error = %err, "failed to load usage counters, starting from zero");
                None
            }
        };

        let mut guard = Self {
            limits,
            state: UsageState::fresh(today),
            store,
        };

        match daily {
            Some(daily) if daily.last_reset_date == Some(guard.state.last_reset_date) => {
                guard.state.daily_request_count = daily.request_count;
                guard.state.daily_token_count = daily.token_count;
                debug!(
                    requests = daily.request_count,
                    tokens = daily.token_count,
                    "restored daily usage"
                );
            }
            previous => {
                info!(
                    previous = ?previous.and_then(|d| d.last_reset_date),
                    today = %guard.state.last_reset_date,
                    "resetting daily usage counters"
                );
                if let Err(err) = guard.store.save_reset(guard.state.last_reset_date) {
                    warn!(error = %err, "failed to persist daily reset");
                }
            }
        }

        guard
    }

    fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(WINDOW_SECONDS)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = Self::window_start(now);
        while self
            .state
            .request_timestamps
            .front()
            .is_some_and(|ts| *ts <= cutoff)
        {
            self.state.request_timestamps.pop_front();
        }
    }

    /// Admits a request at `now`, or names the ceiling that rejected it.
    pub fn try_admit(&mut self, now: DateTime<Utc>) -> Result<(), LimitKind> {
        self.prune(now);

        if self.state.request_timestamps.len() >= self.limits.requests_per_minute {
            return Err(LimitKind::PerMinute);
        }
        if self.limits.enforce_daily {
            if self.state.daily_request_count >= self.limits.requests_per_day {
                return Err(LimitKind::DailyRequests);
            }
            if self.state.daily_token_count >= self.limits.tokens_per_day {
                return Err(LimitKind::DailyTokens);
            }
        }

        self.state.request_timestamps.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    pub fn admit(&mut self, now: DateTime<Utc>) -> bool {
        self.try_admit(now).is_ok()
    }

    /// Books a completed call: reported tokens (if any) and one request.
    pub fn record_success(&mut self, tokens: Option<u64>) {
        if let Some(tokens) = tokens {
            self.state.daily_token_count = self.state.daily_token_count.saturating_add(tokens);
            if let Err(err) = self.store.save_token_count(self.state.daily_token_count) {
                warn!(error = %err, "failed to persist daily token count");
            }
        }

        self.state.daily_request_count += 1;
        if let Err(err) = self
            .store
            .save_request_count(self.state.daily_request_count)
        {
            warn!(error = %err, "failed to persist daily request count");
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let cutoff = Self::window_start(now);
        let in_window = self
            .state
            .request_timestamps
            .iter()
            .filter(|ts| **ts > cutoff)
            .count();
        UsageSnapshot::new(&self.state, in_window, &self.limits)
    }
}
