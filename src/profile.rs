//! Injection profiles: the declarative shape of the load.
//!
//! An [`InjectionProfile`] is an ordered list of [`Segment`]s laid end to end
//! on a virtual clock. [`InjectionProfile::schedule`] turns it into the exact
//! stream of [`StartEvent`]s the scheduler dispatches, without touching any
//! clock itself, so the same profile always yields the same schedule.
//!
//! # Placement of starts
//!
//! For a segment starting at virtual time `t0` with duration `d`:
//!
//! ```text
//! AtOnce{n}            n starts at t0
//! Ramp{n, d}           start i at t0 + i*d/n            i = 0..n-1
//! ConstantRate{r, d}   start k at t0 + k/r              k = 0..n-1, n = floor(r*d + carry)
//! RampRate{a, b, d}    start k where the arrival integral reaches k
//! Hold{d}              nothing
//! ```
//!
//! For the rate-based segments the fractional part of the expected user count
//! is carried into the next rate-based segment, so back-to-back rate segments
//! keep the long-term average:
//!
//! ```text
//! exact = expected + carry
//! n     = floor(exact)
//! carry = exact - n
//! ```
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::utils::duration;
use internals::*;

/// One piece of the load shape.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    /// All users start together; takes no time.
    AtOnce { users: u64 },
    /// `users` starts spread evenly over `duration`.
    Ramp {
        users: u64,
        #[serde(deserialize_with = "duration::deserialize")]
        duration: Duration,
    },
    /// A fixed arrival rate, in users per second.
    ConstantRate {
        rate: f64,
        #[serde(deserialize_with = "duration::deserialize")]
        duration: Duration,
    },
    /// An arrival rate interpolated linearly from `from` to `to` users per second.
    RampRate {
        from: f64,
        to: f64,
        #[serde(deserialize_with = "duration::deserialize")]
        duration: Duration,
    },
    /// No new users; time passes.
    Hold {
        #[serde(deserialize_with = "duration::deserialize")]
        duration: Duration,
    },
}

impl Segment {
    pub fn at_once(users: u64) -> Self {
        Segment::AtOnce { users }
    }

    pub fn ramp(users: u64, duration: Duration) -> Self {
        Segment::Ramp { users, duration }
    }

    pub fn constant_rate(rate: f64, duration: Duration) -> Self {
        Segment::ConstantRate { rate, duration }
    }

    pub fn ramp_rate(from: f64, to: f64, duration: Duration) -> Self {
        Segment::RampRate { from, to, duration }
    }

    pub fn hold(duration: Duration) -> Self {
        Segment::Hold { duration }
    }

    pub fn duration(&self) -> Duration {
        match *self {
            Segment::AtOnce { .. } => Duration::ZERO,
            Segment::Ramp { duration, .. }
            | Segment::ConstantRate { duration, .. }
            | Segment::RampRate { duration, .. }
            | Segment::Hold { duration } => duration,
        }
    }

    fn rates(&self) -> Vec<f64> {
        match *self {
            Segment::ConstantRate { rate, .. } => vec![rate],
            Segment::RampRate { from, to, .. } => vec![from, to],
            Segment::AtOnce { .. } | Segment::Ramp { .. } | Segment::Hold { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("segment {segment} has a negative arrival rate")]
    NegativeRate { segment: usize },
    #[error("segment {segment} has a non-finite arrival rate")]
    NonFiniteRate { segment: usize },
}

/// Ordered sequence of segments executed strictly one after another.
///
/// # Example
/// ```rust
/// use std::time::Duration;
/// use volley::profile::{InjectionProfile, Segment};
///
/// let profile = InjectionProfile::new()
///     .then(Segment::ramp(10, Duration::from_secs(10)))
///     .then(Segment::constant_rate(2.0, Duration::from_secs(5)))
///     .then(Segment::hold(Duration::from_secs(30)));
///
/// assert_eq!(profile.total_users(), 20);
/// assert_eq!(profile.duration(), Duration::from_secs(45));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionProfile {
    segments: Vec<Segment>,
}

impl InjectionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Sum of all segment durations.
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(Segment::duration).sum()
    }

    /// Number of start events the profile will emit.
    pub fn total_users(&self) -> u64 {
        plan(&self.segments).iter().map(|p| p.users).sum()
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        for (segment, s) in self.segments.iter().enumerate() {
            for rate in s.rates() {
                if !rate.is_finite() {
                    return Err(ProfileError::NonFiniteRate { segment });
                }
                if rate < 0.0 {
                    return Err(ProfileError::NegativeRate { segment });
                }
            }
        }
        Ok(())
    }

    /// The start events of this profile, in non-decreasing offset order.
    pub fn schedule(&self) -> Schedule {
        let plans = plan(&self.segments);
        let remaining = plans.iter().map(|p| p.users).sum();
        Schedule {
            plans,
            segment: 0,
            k: 0,
            next_user: 0,
            remaining,
        }
    }
}

impl From<Vec<Segment>> for InjectionProfile {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl FromIterator<Segment> for InjectionProfile {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

/// One scheduled virtual-user start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartEvent {
    pub user_id: u64,
    /// Index of the segment that emitted this start.
    pub segment: usize,
    /// Offset from the start of the run.
    pub offset: Duration,
}

/// Lazily generated stream of [`StartEvent`]s.
#[derive(Debug, Clone)]
pub struct Schedule {
    plans: Vec<SegmentPlan>,
    segment: usize,
    k: u64,
    next_user: u64,
    remaining: u64,
}

impl Iterator for Schedule {
    type Item = StartEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let plan = self.plans.get(self.segment)?;
            if self.k < plan.users {
                let event = StartEvent {
                    user_id: self.next_user,
                    segment: plan.index,
                    offset: plan.offset(self.k),
                };
                self.k += 1;
                self.next_user += 1;
                self.remaining -= 1;
                return Some(event);
            }
            self.segment += 1;
            self.k = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Schedule {}

#[cfg(feature = "internals")]
pub use internals::*;

/// Pure planning helpers behind [`InjectionProfile::schedule`].
mod internals {
    use super::*;

    /// Slack absorbing float error so that e.g. `0.1 * 30` still yields 3 users.
    const EPSILON: f64 = 1e-9;

    /// A segment placed on the virtual clock, with its final user count.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct SegmentPlan {
        pub index: usize,
        pub segment: Segment,
        pub start: Duration,
        pub users: u64,
    }

    impl SegmentPlan {
        /// Offset from run start of this segment's `k`-th start.
        pub fn offset(&self, k: u64) -> Duration {
            let local = match self.segment {
                Segment::AtOnce { .. } | Segment::Hold { .. } => Duration::ZERO,
                Segment::Ramp { users, duration } => {
                    let nanos = duration.as_nanos() * k as u128 / users.max(1) as u128;
                    Duration::from_nanos(nanos as u64)
                }
                Segment::ConstantRate { rate, duration } => {
                    secs_to_duration(k as f64 / rate).min(duration)
                }
                Segment::RampRate { from, to, duration } => {
                    ramp_rate_offset(from, to, duration, k).min(duration)
                }
            };
            self.start + local
        }

        pub fn end(&self) -> Duration {
            self.start + self.segment.duration()
        }
    }

    /// Lay segments end to end and settle how many users each one emits.
    pub fn plan(segments: &[Segment]) -> Vec<SegmentPlan> {
        let mut start = Duration::ZERO;
        let mut carry = 0.0;
        segments
            .iter()
            .enumerate()
            .map(|(index, segment)| {
                let mut rated = |expected: f64| {
                    let (users, c) = rate_segment_users(expected, carry);
                    carry = c;
                    users
                };
                let users = match *segment {
                    Segment::AtOnce { users } | Segment::Ramp { users, .. } => users,
                    Segment::Hold { .. } => 0,
                    Segment::ConstantRate { rate, duration } => {
                        rated(rate * duration.as_secs_f64())
                    }
                    Segment::RampRate { from, to, duration } => {
                        rated((from + to) / 2.0 * duration.as_secs_f64())
                    }
                };
                let plan = SegmentPlan {
                    index,
                    segment: *segment,
                    start,
                    users,
                };
                start += segment.duration();
                plan
            })
            .collect()
    }

    /// Users emitted by a rate-based segment, given the carry from earlier
    /// rate-based segments.
    ///
    /// Returns `(users, next_carry)`.
    pub fn rate_segment_users(expected: f64, carry: f64) -> (u64, f64) {
        let exact = expected.max(0.0) + carry;
        let users = (exact + EPSILON).floor();
        let carry = (exact - users).max(0.0);
        (users as u64, carry)
    }

    /// Time at which the cumulative arrivals of a linear rate ramp reach `k`.
    ///
    /// Solves `from*t + (to-from)/(2d) * t^2 = k` in the form that stays stable
    /// when the ramp is flat.
    pub fn ramp_rate_offset(from: f64, to: f64, duration: Duration, k: u64) -> Duration {
        if k == 0 {
            return Duration::ZERO;
        }
        let d = duration.as_secs_f64();
        let a = (to - from) / (2.0 * d);
        let b = from;
        let k = k as f64;
        let discriminant = (b * b + 4.0 * a * k).max(0.0);
        let denominator = b + discriminant.sqrt();
        if denominator <= 0.0 {
            return duration;
        }
        secs_to_duration(2.0 * k / denominator)
    }

    /// Round to the nearest nanosecond so that e.g. `3/10 s` is exactly 300ms.
    fn secs_to_duration(secs: f64) -> Duration {
        if !secs.is_finite() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((secs * 1e9).round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn offsets(profile: &InjectionProfile) -> Vec<Duration> {
        profile.schedule().map(|e| e.offset).collect()
    }

    mod rate_segment_users {
        use super::*;

        #[test]
        fn whole_numbers_leave_no_carry() {
            assert_eq!(rate_segment_users(30.0, 0.0), (30, 0.0));
        }

        #[test]
        fn fraction_is_carried() {
            let (n, carry) = rate_segment_users(2.5, 0.0);
            assert_eq!(n, 2);
            assert_eq!(carry, 0.5);

            let (n, carry) = rate_segment_users(2.5, carry);
            assert_eq!(n, 3);
            assert_eq!(carry, 0.0);
        }

        #[test]
        fn float_error_does_not_lose_a_user() {
            // 4.35 * 100 = 434.99999999999994
            assert_eq!(rate_segment_users(4.35 * 100.0, 0.0), (435, 0.0));
            assert_eq!(rate_segment_users(0.1 * 30.0, 0.0).0, 3);
        }

        #[test]
        fn negative_expectation_emits_nothing() {
            assert_eq!(rate_segment_users(-5.0, 0.0), (0, 0.0));
        }
    }

    mod schedule {
        use super::*;

        #[test]
        fn ramp_spreads_starts_evenly_over_the_window() {
            let profile = InjectionProfile::new().then(Segment::ramp(4, secs(2)));
            assert_eq!(offsets(&profile), vec![ms(0), ms(500), ms(1000), ms(1500)]);
        }

        #[test]
        fn empty_ramp_emits_nothing_but_takes_time() {
            let profile = InjectionProfile::new()
                .then(Segment::ramp(0, secs(3)))
                .then(Segment::at_once(1));
            assert_eq!(offsets(&profile), vec![secs(3)]);
        }

        #[test]
        fn constant_rate_spacing_and_count() {
            let profile = InjectionProfile::new().then(Segment::constant_rate(10.0, secs(1)));
            let expected: Vec<_> = (0..10).map(|k| ms(k * 100)).collect();
            assert_eq!(offsets(&profile), expected);
        }

        #[test]
        fn constant_rate_floors_the_count() {
            let profile = InjectionProfile::new().then(Segment::constant_rate(2.0, ms(2600)));
            assert_eq!(profile.total_users(), 5);
            assert!(offsets(&profile).iter().all(|o| *o < ms(2600)));
        }

        #[test]
        fn carry_crosses_rate_segments_but_not_holds() {
            let profile = InjectionProfile::new()
                .then(Segment::constant_rate(1.0, ms(2500)))
                .then(Segment::hold(secs(1)))
                .then(Segment::constant_rate(1.0, ms(2500)));
            let plans = plan(profile.segments());
            assert_eq!(plans.iter().map(|p| p.users).collect::<Vec<_>>(), vec![2, 0, 3]);
            assert_eq!(profile.total_users(), 5);
        }

        #[test]
        fn carry_crosses_from_constant_into_ramp_rate() {
            let profile = InjectionProfile::new()
                .then(Segment::constant_rate(1.0, ms(2500)))
                .then(Segment::ramp(2, secs(1)))
                .then(Segment::ramp_rate(1.0, 1.0, ms(2500)));
            let plans = plan(profile.segments());
            assert_eq!(plans.iter().map(|p| p.users).collect::<Vec<_>>(), vec![2, 2, 3]);
        }

        #[test]
        fn hold_and_at_once() {
            let profile = InjectionProfile::new()
                .then(Segment::hold(secs(5)))
                .then(Segment::at_once(3));
            assert_eq!(offsets(&profile), vec![secs(5); 3]);
            assert_eq!(profile.duration(), secs(5));
        }

        #[test]
        fn segments_never_overlap() {
            let profile = InjectionProfile::new()
                .then(Segment::ramp(7, secs(3)))
                .then(Segment::constant_rate(3.0, secs(2)))
                .then(Segment::ramp_rate(1.0, 5.0, secs(4)))
                .then(Segment::ramp(5, secs(1)));
            let plans = plan(profile.segments());

            for event in profile.schedule() {
                let plan = &plans[event.segment];
                assert!(event.offset >= plan.start, "{event:?} before its segment");
                assert!(
                    event.offset < plan.end(),
                    "{event:?} after its segment window"
                );
            }
        }

        #[test]
        fn offsets_are_non_decreasing_and_ids_sequential() {
            let profile = InjectionProfile::new()
                .then(Segment::at_once(2))
                .then(Segment::ramp(5, secs(1)))
                .then(Segment::ramp_rate(10.0, 0.0, secs(2)));
            let events: Vec<_> = profile.schedule().collect();

            assert_eq!(events.len() as u64, profile.total_users());
            assert!(events.windows(2).all(|w| w[0].offset <= w[1].offset));
            assert!(events.iter().enumerate().all(|(i, e)| e.user_id == i as u64));
            assert!(events.iter().all(|e| e.offset <= profile.duration()));
        }

        #[test]
        fn ramp_rate_counts_the_area_under_the_rate() {
            let profile = InjectionProfile::new().then(Segment::ramp_rate(0.0, 10.0, secs(10)));
            assert_eq!(profile.total_users(), 50);

            // Arrivals accelerate: the second half holds three quarters of them.
            let late = profile
                .schedule()
                .filter(|e| e.offset >= secs(5))
                .count();
            assert_eq!(late, 37);
        }

        #[test]
        fn flat_ramp_rate_matches_constant_rate() {
            let ramp = InjectionProfile::new().then(Segment::ramp_rate(4.0, 4.0, secs(2)));
            let constant = InjectionProfile::new().then(Segment::constant_rate(4.0, secs(2)));
            assert_eq!(offsets(&ramp), offsets(&constant));
        }

        #[test]
        fn schedule_reports_exact_length() {
            let profile = InjectionProfile::new()
                .then(Segment::at_once(3))
                .then(Segment::constant_rate(2.0, secs(2)));
            let mut schedule = profile.schedule();
            assert_eq!(schedule.len(), 7);
            schedule.next();
            assert_eq!(schedule.len(), 6);
        }
    }

    #[test]
    fn validation_rejects_bad_rates() {
        let profile = InjectionProfile::new()
            .then(Segment::at_once(1))
            .then(Segment::constant_rate(-1.0, secs(1)));
        assert_eq!(
            profile.validate(),
            Err(ProfileError::NegativeRate { segment: 1 })
        );

        let profile = InjectionProfile::new().then(Segment::ramp_rate(1.0, f64::NAN, secs(1)));
        assert_eq!(
            profile.validate(),
            Err(ProfileError::NonFiniteRate { segment: 0 })
        );
        assert!(InjectionProfile::new().validate().is_ok());
    }

    #[test]
    fn deserializes_segments() {
        let segments: Vec<Segment> = serde_json::from_str(
            r#"[
                {"type": "ramp", "users": 10, "duration": "10s"},
                {"type": "constant_rate", "rate": 2.5, "duration": 5000},
                {"type": "hold", "duration": "1m"},
                {"type": "at_once", "users": 1}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::ramp(10, secs(10)),
                Segment::constant_rate(2.5, secs(5)),
                Segment::hold(secs(60)),
                Segment::at_once(1),
            ]
        );
    }
}
