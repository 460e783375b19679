// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Duration;

use tokio::time::Instant;

/// A resettable one-shot deadline, the primitive the endpoint strand builds
/// its PINGREQ-send and PINGRESP-recv timers from. Unlike `tokio::time::interval`
/// (which the connection loop in `hebo::ConnectionContext::run_loop` uses for a
/// fixed-period tick) these deadlines move every time the connection sees
/// traffic, so a plain `Option<Instant>` plus `sleep_until` fits better than a
/// ticking interval.
#[derive(Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the current deadline, or never if the timer is disarmed.
    /// Safe to call repeatedly inside a `tokio::select!` loop: an unarmed
    /// timer's branch simply never wins the race.
    pub async fn tick(&mut self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unarmed_timer_never_resolves_before_a_reset() {
        let mut timer = Timer::new();
        assert!(!timer.is_armed());
        tokio::select! {
            () = timer.tick() => panic!("unarmed timer must not resolve"),
            () = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn reset_then_cancel_disarms_it() {
        let mut timer = Timer::new();
        timer.reset(Duration::from_millis(5));
        timer.cancel();
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn fires_after_the_requested_duration() {
        let mut timer = Timer::new();
        timer.reset(Duration::from_millis(5));
        timer.tick().await;
    }
}
