use std::num::NonZeroU32;
use std::time;

use governor::{clock, middleware::NoOpMiddleware, state, Quota, RateLimiter};

/// The answer of a `CooldownGate` to a caller asking to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Denied, with the time left until the gate opens again.
    Denied(time::Duration),
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

type DirectLimiter<C> =
    RateLimiter<state::NotKeyed, state::InMemoryState, C, NoOpMiddleware<<C as clock::Clock>::Instant>>;

/// Lets at most one caller through per `interval`.
///
/// Backed by a direct GCRA limiter with a burst of one: callers that arrive while the gate is
/// closed are turned away immediately, there is no queue. The check and the update happen in
/// a single atomic step, so among concurrent contenders exactly one is granted. Share it
/// behind an `Arc`.
///
/// The clock is a parameter so tests can move time by hand.
pub struct CooldownGate<C: clock::Clock = clock::DefaultClock> {
    /// `None` for a zero interval, which never denies.
    limiter: Option<DirectLimiter<C>>,
    clock: C,
}

impl CooldownGate {
    pub fn new(interval: time::Duration) -> Self {
        Self::with_clock(interval, &clock::DefaultClock::default())
    }
}

impl<C: clock::Clock> CooldownGate<C> {
    pub fn with_clock(interval: time::Duration, clock: &C) -> Self {
        let limiter = Quota::with_period(interval)
            .map(|quota| RateLimiter::direct_with_clock(quota.allow_burst(NonZeroU32::MIN), clock));

        Self {
            limiter,
            clock: clock.clone(),
        }
    }

    /// Ask to proceed now, as read from the gate's clock. A granted admission starts a new
    /// cooldown window, a denied one leaves the gate untouched.
    pub fn try_acquire(&self) -> Admission {
        let Some(limiter) = &self.limiter else {
            return Admission::Granted;
        };

        match limiter.check() {
            Ok(()) => Admission::Granted,
            Err(not_until) => Admission::Denied(not_until.wait_time_from(self.clock.now())),
        }
    }
}
