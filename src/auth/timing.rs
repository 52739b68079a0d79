//! Request cancellation and the constant-time floor for login.

use std::future::Future;
use std::time::Duration;

use axum::{extract::Request, http::Extensions, middleware::Next, response::Response};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Middleware giving every request a [`CancellationToken`] that fires when the
/// request future is dropped before it completes (client went away).
pub async fn track_cancellation(mut request: Request, next: Next) -> Response {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    request.extensions_mut().insert(token);

    let response = next.run(request).await;
    guard.disarm();
    response
}

/// Cancellation signal of the current request. Requests that did not pass
/// through [`track_cancellation`] get a token that never fires.
pub fn cancellation_of(extensions: &Extensions) -> CancellationToken {
    extensions
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_else(CancellationToken::new)
}

/// Pads an operation so it never completes faster than a fixed floor.
#[derive(Debug, Clone, Copy)]
pub struct ConstantTimeWaiter {
    started: Instant,
    floor: Duration,
}

impl ConstantTimeWaiter {
    pub fn start(floor: Duration) -> Self {
        Self {
            started: Instant::now(),
            floor,
        }
    }

    /// Sleep until `floor` has elapsed since [`start`](Self::start), or until
    /// `cancel` fires. Returns false if cancelled.
    pub async fn wait(self, cancel: &CancellationToken) -> bool {
        let deadline = self.started + self.floor;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// Run `operation` and hold its result until the floor has passed.
pub async fn with_floor<F: Future>(
    floor: Option<Duration>,
    cancel: &CancellationToken,
    operation: F,
) -> F::Output {
    let Some(floor) = floor else {
        return operation.await;
    };
    let waiter = ConstantTimeWaiter::start(floor);
    let output = operation.await;
    waiter.wait(cancel).await;
    output
}
