//! Per-zone concurrent execution within a step.

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::cloud::CloudError;

use super::{RunError, ZoneSlot};

/// Runs `task` for every slot concurrently and waits for all of them.
///
/// Zone tasks are never dropped. Each one receives a halt token that fires
/// when a sibling fails, when `cancel` fires, or when `deadline` passes; a
/// task only stops where it awaits [`interruptible`] work, so requests that
/// create resources always complete and land in their slot before this
/// returns. The earliest failure is returned wrapped with its zone.
pub(crate) async fn for_each_zone<'s, F, Fut>(
    slots: &'s mut [ZoneSlot],
    cancel: &CancellationToken,
    step: &'static str,
    deadline: Duration,
    mut task: F,
) -> Result<(), RunError>
where
    F: FnMut(&'s mut ZoneSlot, CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), RunError>> + 's,
{
    let halt = cancel.child_token();
    let mut pending: FuturesUnordered<_> = slots
        .iter_mut()
        .map(|slot| {
            let zone = slot.zone.clone();
            let work = task(slot, halt.clone());
            async move { work.await.map_err(|err| err.in_zone(&zone)) }
        })
        .collect();

    let expiry = sleep(deadline);
    tokio::pin!(expiry);
    let mut expired = false;
    let mut interrupted = false;
    let mut first: Option<RunError> = None;

    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(Ok(())) => {}
                Some(Err(RunError::Cancelled)) => interrupted = true,
                Some(Err(err)) => {
                    halt.cancel();
                    if first.is_none() {
                        first = Some(err);
                    } else {
                        tracing::debug!(step, error = %err, "further zone failure");
                    }
                }
                None => break,
            },
            () = &mut expiry, if !expired => {
                tracing::warn!(step, ?deadline, "step deadline passed; halting zones");
                expired = true;
                halt.cancel();
            }
        }
    }

    if let Some(err) = first {
        return Err(err);
    }
    if interrupted && expired && !cancel.is_cancelled() {
        return Err(RunError::StepDeadline {
            step,
            timeout: deadline,
        });
    }
    if interrupted {
        return Err(RunError::Cancelled);
    }
    Ok(())
}

/// Runs `work` unless `halt` fires first, in which case `work` is dropped
/// and [`RunError::Cancelled`] is returned. Never wrap a request that
/// creates a resource.
pub(crate) async fn interruptible<T, Fut>(halt: &CancellationToken, work: Fut) -> Result<T, RunError>
where
    Fut: Future<Output = Result<T, RunError>>,
{
    tokio::select! {
        biased;
        () = halt.cancelled() => Err(RunError::Cancelled),
        result = work => result,
    }
}

/// Fails with [`RunError::Cancelled`] once `halt` has fired, so no new
/// resource is requested after a sibling failed.
pub(crate) fn ensure_running(halt: &CancellationToken) -> Result<(), RunError> {
    if halt.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    Ok(())
}

/// Awaits a provider wait under the core's own bound, independent of any
/// timeout the provider enforces.
pub(crate) async fn bounded<T, E, Fut>(
    what: String,
    limit: Duration,
    wait: Fut,
) -> Result<T, RunError>
where
    E: CloudError,
    Fut: Future<Output = Result<T, E>>,
{
    match timeout(limit, wait).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RunError::wait(what, err, limit)),
        Err(_) => Err(RunError::Timeout {
            context: what,
            timeout: limit,
        }),
    }
}

/// Awaits a single provider call, attaching `what` to its failure.
pub(crate) async fn call<T, E, Fut>(what: impl FnOnce() -> String, request: Fut) -> Result<T, RunError>
where
    E: CloudError,
    Fut: Future<Output = Result<T, E>>,
{
    request.await.map_err(|err| RunError::cloud(what(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slots(zones: &[&str]) -> Vec<ZoneSlot> {
        zones.iter().map(|zone| ZoneSlot::new(*zone)).collect()
    }

    async fn forever(halt: &CancellationToken) -> Result<(), RunError> {
        interruptible(halt, async {
            pending::<()>().await;
            Ok(())
        })
        .await
    }

    #[tokio::test]
    async fn every_slot_is_visited() {
        let mut slots = slots(&["a", "b", "c"]);
        let token = CancellationToken::new();

        for_each_zone(&mut slots, &token, "test", Duration::from_secs(5), |slot, _| async move {
            slot.zone.push_str("-done");
            Ok(())
        })
        .await
        .unwrap_or_else(|err| panic!("fan-out should succeed: {err}"));

        let zones: Vec<&str> = slots.iter().map(|slot| slot.zone.as_str()).collect();
        assert_eq!(zones, vec!["a-done", "b-done", "c-done"]);
    }

    #[tokio::test]
    async fn first_failure_names_zone_and_halts_siblings() {
        let mut slots = slots(&["a", "b"]);
        let token = CancellationToken::new();
        let finished = AtomicUsize::new(0);

        let err = for_each_zone(&mut slots, &token, "test", Duration::from_secs(5), |slot, halt| {
            let counter = &finished;
            async move {
                if slot.zone == "b" {
                    return Err(RunError::Structural(String::from("boom")));
                }
                interruptible(&halt, async {
                    sleep(Duration::from_secs(2)).await;
                    Ok(())
                })
                .await?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .expect_err("zone b fails");

        assert_eq!(err.zone(), Some("b"));
        assert_eq!(err.root().to_string(), "boom");
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn siblings_finish_uninterruptible_work_and_record_it() {
        let mut slots = slots(&["a", "b"]);
        let token = CancellationToken::new();

        let err = for_each_zone(&mut slots, &token, "test", Duration::from_secs(5), |slot, halt| async move {
            if slot.zone == "b" {
                return Err(RunError::Structural(String::from("boom")));
            }
            sleep(Duration::from_millis(50)).await;
            slot.zone.push_str("-recorded");
            forever(&halt).await
        })
        .await
        .expect_err("zone b fails");

        assert_eq!(err.zone(), Some("b"));
        assert_eq!(slots.first().map(|slot| slot.zone.as_str()), Some("a-recorded"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_tasks() {
        let mut slots = slots(&["a"]);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = for_each_zone(&mut slots, &token, "test", Duration::from_secs(5), |_, halt| async move {
            forever(&halt).await
        })
        .await
        .expect_err("cancelled");
        assert!(matches!(err, RunError::Cancelled));
    }

    #[tokio::test]
    async fn step_deadline_is_enforced() {
        let mut slots = slots(&["a"]);
        let token = CancellationToken::new();

        let err = for_each_zone(&mut slots, &token, "create-servers", Duration::from_millis(20), |_, halt| async move {
            forever(&halt).await
        })
        .await
        .expect_err("deadline");
        assert!(matches!(err, RunError::StepDeadline { step: "create-servers", .. }));
    }

    #[test]
    fn ensure_running_fails_once_halted() {
        let halt = CancellationToken::new();
        assert!(ensure_running(&halt).is_ok());
        halt.cancel();
        assert!(matches!(ensure_running(&halt), Err(RunError::Cancelled)));
    }
}
