// Copyright (c) The testlens Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use pin_project_lite::pin_project;
use std::{future::Future, pin::Pin, task::Poll, time::Duration};
use tokio::time::{Instant, Sleep};

pub(crate) fn quiet_timer(period: Duration) -> QuietTimer {
    QuietTimer::new(period)
}

pin_project! {
    /// A wrapper around `tokio::time::Sleep` that fires once a quiet period has passed without
    /// being rearmed.
    ///
    /// Rearming pushes the deadline out rather than stacking another timer, and a disarmed timer
    /// never completes.
    #[derive(Debug)]
    pub(crate) struct QuietTimer {
        #[pin]
        sleep: Sleep,
        period: Duration,
        state: QuietTimerState,
    }
}

impl QuietTimer {
    fn new(period: Duration) -> Self {
        Self {
            sleep: tokio::time::sleep_until(far_future()),
            period,
            state: QuietTimerState::Disarmed,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        matches!(self.state, QuietTimerState::Armed)
    }

    /// Restarts the quiet period from now.
    pub(crate) fn rearm(self: Pin<&mut Self>) {
        let this = self.project();
        this.sleep.reset(Instant::now() + *this.period);
        *this.state = QuietTimerState::Armed;
    }

    /// Cancels the pending deadline, if any.
    pub(crate) fn disarm(self: Pin<&mut Self>) {
        let this = self.project();
        this.sleep.reset(far_future());
        *this.state = QuietTimerState::Disarmed;
    }
}

impl Future for QuietTimer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.state {
            QuietTimerState::Armed => match this.sleep.poll(cx) {
                Poll::Ready(()) => {
                    *this.state = QuietTimerState::Disarmed;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            },
            QuietTimerState::Disarmed => Poll::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum QuietTimerState {
    Armed,
    Disarmed,
}

// Cribbed from tokio.
fn far_future() -> Instant {
    // Roughly 30 years from now.
    // API does not provide a way to obtain max `Instant`
    // or convert specific date in the future to instant.
    // 1000 years overflows on macOS, 100 years overflows on FreeBSD.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
