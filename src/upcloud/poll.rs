//! Deadline-bounded polling used by the state waits.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::cloud::WaitTarget;

/// Repeatedly calls `fetch` until the state extracted by `state_of` satisfies
/// `target`, sleeping `interval` between attempts.
///
/// The resource is always fetched at least once, so a zero timeout still
/// observes the current state. Fetch errors are returned immediately.
pub(crate) async fn poll_until<T, S, E, F, Fut, G, H>(
    mut fetch: F,
    state_of: G,
    target: &WaitTarget<S>,
    timeout: Duration,
    interval: Duration,
    on_timeout: H,
) -> Result<T, E>
where
    S: PartialEq + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    G: Fn(&T) -> &S,
    H: FnOnce(&S) -> E,
{
    let deadline = Instant::now() + timeout;
    loop {
        let current = fetch().await?;
        let state = state_of(&current);
        if target.is_satisfied(state) {
            return Ok(current);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(on_timeout(state));
        }
        tracing::debug!(state = %state, target = %target, "resource not ready; polling again");
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ServerState;
    use std::cell::Cell;

    #[tokio::test]
    async fn returns_once_target_is_reached() {
        let calls = Cell::new(0_usize);
        let states = [
            ServerState::Maintenance,
            ServerState::Maintenance,
            ServerState::Started,
        ];

        let result: Result<(usize, ServerState), String> = poll_until(
            || {
                let call = calls.get();
                calls.set(call + 1);
                let state = states.get(call).cloned().unwrap_or(ServerState::Started);
                async move { Ok((call, state)) }
            },
            |(_, state)| state,
            &WaitTarget::Reach(ServerState::Started),
            Duration::from_secs(5),
            Duration::from_millis(1),
            |state| format!("timed out in {state}"),
        )
        .await;

        let (call, state) = result.unwrap_or_else(|err| panic!("poll should succeed: {err}"));
        assert_eq!(call, 2);
        assert_eq!(state, ServerState::Started);
    }

    #[tokio::test]
    async fn times_out_with_last_observed_state() {
        let result: Result<ServerState, String> = poll_until(
            || async { Ok(ServerState::Maintenance) },
            |state| state,
            &WaitTarget::Leave(ServerState::Maintenance),
            Duration::from_millis(20),
            Duration::from_millis(5),
            |state| format!("timed out in {state}"),
        )
        .await;

        assert_eq!(result, Err(String::from("timed out in maintenance")));
    }

    #[tokio::test]
    async fn fetch_errors_short_circuit() {
        let calls = Cell::new(0_u32);
        let result: Result<ServerState, String> = poll_until(
            || {
                calls.set(calls.get() + 1);
                async { Err(String::from("boom")) }
            },
            |state| state,
            &WaitTarget::Reach(ServerState::Started),
            Duration::from_secs(5),
            Duration::from_millis(1),
            |state| format!("timed out in {state}"),
        )
        .await;

        assert_eq!(result, Err(String::from("boom")));
        assert_eq!(calls.get(), 1);
    }
}
