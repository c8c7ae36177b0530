//! Reconnection delay policies.
//!
//! The default policy is a three-step [`Staircase`] rather than an exponential curve:
//! short waits for the first few attempts, then progressively longer ones, with no cap on
//! the number of attempts.
//!
//! ```
//! use std::time::Duration;
//!
//! use stream_lifecycle::backoff::{self, BackoffPolicy as _, Staircase};
//!
//! assert_eq!(backoff::delay(0), Duration::from_secs(3));
//!
//! let quick = Staircase::builder()
//!     .base(Duration::from_millis(100))
//!     .ceiling(Duration::from_secs(1))
//!     .build();
//! assert_eq!(quick.delay(100), Duration::from_secs(1));
//! ```

#![expect(
    clippy::module_name_repetitions,
    reason = "BackoffPolicy reads better than Policy at call sites"
)]

use std::time::Duration;

use bon::Builder;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_MIDDLE_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_CEILING_DELAY: Duration = Duration::from_secs(20);
const DEFAULT_MIDDLE_AFTER: u32 = 3;
const DEFAULT_CEILING_AFTER: u32 = 7;

/// Maps a reconnection attempt count to the wait before that attempt.
///
/// Implementations are invoked synchronously from the close handler, so they must be
/// pure and cheap. Any `Fn(u32) -> Duration` closure is a policy.
pub trait BackoffPolicy: Send + Sync + 'static {
    /// Wait before the next reconnection, given the attempts made since the last
    /// successful open.
    fn delay(&self, try_count: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync + 'static,
{
    fn delay(&self, try_count: u32) -> Duration {
        self(try_count)
    }
}

/// Three-tier delay staircase.
///
/// With the defaults: attempts `0..=3` wait 3 s, `4..=7` wait 10 s, and everything past
/// that waits 20 s.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct Staircase {
    /// Delay used until `middle_after` attempts have been made
    #[builder(default = DEFAULT_BASE_DELAY)]
    pub base: Duration,
    /// Attempt count after which `middle` applies
    #[builder(default = DEFAULT_MIDDLE_AFTER)]
    pub middle_after: u32,
    #[builder(default = DEFAULT_MIDDLE_DELAY)]
    pub middle: Duration,
    /// Attempt count after which `ceiling` applies
    #[builder(default = DEFAULT_CEILING_AFTER)]
    pub ceiling_after: u32,
    #[builder(default = DEFAULT_CEILING_DELAY)]
    pub ceiling: Duration,
}

impl Default for Staircase {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffPolicy for Staircase {
    fn delay(&self, try_count: u32) -> Duration {
        if try_count > self.ceiling_after {
            self.ceiling
        } else if try_count > self.middle_after {
            self.middle
        } else {
            self.base
        }
    }
}

/// Delay of the default [`Staircase`] for `try_count`.
#[must_use]
pub fn delay(try_count: u32) -> Duration {
    Staircase::default().delay(try_count)
}
