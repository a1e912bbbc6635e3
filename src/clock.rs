use std::sync::Arc;

use rearch::CapsuleHandle;
use time::OffsetDateTime;

pub fn clock_capsule(_: CapsuleHandle) -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Source of "now" for expiry checks and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}
