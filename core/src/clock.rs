use std::sync::atomic::{AtomicI64, Ordering};

/// Wall clock in epoch milliseconds. Swapped for [`ManualClock`] in tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_millis(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Active time of a session: wall time since start minus time spent paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionClock {
    start: Option<i64>,
    paused_total: i64,
    last_toggle: i64,
    paused: bool,
}

impl SessionClock {
    pub fn start(&mut self, now: i64) {
        *self = Self {
            start: Some(now),
            paused_total: 0,
            last_toggle: now,
            paused: false,
        };
    }

    pub fn pause(&mut self, now: i64) {
        if self.start.is_none() || self.paused {
            return;
        }
        self.last_toggle = now.max(self.last_toggle);
        self.paused = true;
    }

    pub fn resume(&mut self, now: i64) {
        if self.start.is_none() || !self.paused {
            return;
        }
        let now = now.max(self.last_toggle);
        self.paused_total += now - self.last_toggle;
        self.last_toggle = now;
        self.paused = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.start.is_some() && !self.paused
    }

    #[must_use]
    pub fn elapsed_millis(&self, now: i64) -> i64 {
        let Some(start) = self.start else {
            return 0;
        };
        let end = if self.paused {
            self.last_toggle
        } else {
            now.max(self.last_toggle)
        };
        (end - start - self.paused_total).max(0)
    }

    #[must_use]
    pub fn elapsed_seconds(&self, now: i64) -> u64 {
        u64::try_from(self.elapsed_millis(now) / 1000).unwrap_or_default()
    }
}
