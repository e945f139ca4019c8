//! Sequential build pipeline with guaranteed reverse-order cleanup.
//!
//! A build is a list of [`Step`]s run in order against a shared
//! [`RunContext`]. Each step fans its work out per zone. The first failure
//! is recorded in the context and halts forward progress; every step whose
//! `run` began is then cleaned up, most recent first.

mod context;
mod create_servers;
mod error;
mod fanout;
mod provision;
mod templatize;

use std::future::Future;
use std::pin::Pin;

pub use context::{RunContext, ZoneSlot};
pub use create_servers::CreateServers;
pub use error::{CleanupError, RunError};
pub use provision::ProvisionServers;
pub use templatize::Templatize;

/// Outcome of a step's `run`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepAction {
    /// Proceed to the next step.
    Continue,
    /// Stop and unwind.
    Halt,
}

/// Future returned by [`Step`] methods.
pub type StepFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of a build.
pub trait Step<C>: Send {
    /// Short name used in logs and deadline errors.
    fn name(&self) -> &'static str;

    /// Performs the step. Failures are recorded through
    /// [`RunContext::halt`] rather than returned.
    fn run<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, StepAction>;

    /// Removes whatever this step created. Always called once for a step
    /// whose `run` began, whatever its outcome. Failures are reported, not
    /// recorded.
    fn cleanup<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, ()>;
}

/// Runs steps in order and unwinds them in reverse.
pub struct StepRunner<C> {
    steps: Vec<Box<dyn Step<C>>>,
}

impl<C> StepRunner<C> {
    /// Creates a runner for `steps`.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn Step<C>>>) -> Self {
        Self { steps }
    }

    /// Runs the pipeline to completion or first failure, then cleans up
    /// every started step.
    ///
    /// # Errors
    ///
    /// Returns the first recorded [`RunError`], including
    /// [`RunError::Cancelled`] when cancellation is observed between steps.
    pub async fn run(&mut self, ctx: &mut RunContext<C>) -> Result<(), RunError> {
        let mut started = 0;
        for step in &mut self.steps {
            if ctx.is_cancelled() {
                tracing::info!(step = step.name(), "cancelled before step");
                ctx.record_error(RunError::Cancelled);
                break;
            }

            started += 1;
            tracing::debug!(step = step.name(), "running step");
            let action = step.run(ctx).await;
            if action == StepAction::Halt || ctx.error().is_some() {
                tracing::debug!(step = step.name(), "step halted the pipeline");
                break;
            }
        }

        for step in self.steps.iter_mut().take(started).rev() {
            tracing::debug!(step = step.name(), "cleaning up step");
            step.cleanup(ctx).await;
        }

        ctx.take_error().map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::test_support::{FakeCloud, RecordingUi};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: &'static str,
        outcome: Option<&'static str>,
        journal: Journal,
        cancel_after: Option<CancellationToken>,
    }

    impl Scripted {
        fn boxed(name: &'static str, outcome: Option<&'static str>, journal: &Journal) -> Box<dyn Step<FakeCloud>> {
            Box::new(Self {
                name,
                outcome,
                journal: Arc::clone(journal),
                cancel_after: None,
            })
        }

        fn log(&self, entry: String) {
            self.journal
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(entry);
        }
    }

    impl Step<FakeCloud> for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run<'a>(&'a mut self, ctx: &'a mut RunContext<FakeCloud>) -> StepFuture<'a, StepAction> {
            Box::pin(async move {
                self.log(format!("run {}", self.name));
                if let Some(ref token) = self.cancel_after {
                    token.cancel();
                }
                match self.outcome {
                    Some(message) => ctx.halt(RunError::Structural(message.to_owned())),
                    None => StepAction::Continue,
                }
            })
        }

        fn cleanup<'a>(&'a mut self, _ctx: &'a mut RunContext<FakeCloud>) -> StepFuture<'a, ()> {
            Box::pin(async move { self.log(format!("cleanup {}", self.name)) })
        }
    }

    fn context(cancel: CancellationToken) -> RunContext<FakeCloud> {
        RunContext::new(
            RunConfig::new(["fi-hel1"], "tmpl"),
            Arc::new(FakeCloud::new()),
            Arc::new(RecordingUi::default()),
            cancel,
        )
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    #[tokio::test]
    async fn success_runs_all_then_cleans_up_in_reverse() {
        let journal = Journal::default();
        let mut runner = StepRunner::new(vec![
            Scripted::boxed("a", None, &journal),
            Scripted::boxed("b", None, &journal),
        ]);

        runner
            .run(&mut context(CancellationToken::new()))
            .await
            .unwrap_or_else(|err| panic!("pipeline should succeed: {err}"));

        assert_eq!(entries(&journal), vec!["run a", "run b", "cleanup b", "cleanup a"]);
    }

    #[tokio::test]
    async fn halt_skips_later_steps() {
        let journal = Journal::default();
        let mut runner = StepRunner::new(vec![
            Scripted::boxed("a", None, &journal),
            Scripted::boxed("b", Some("boom"), &journal),
            Scripted::boxed("c", None, &journal),
        ]);

        let err = runner
            .run(&mut context(CancellationToken::new()))
            .await
            .expect_err("step b halts");

        assert_eq!(err.to_string(), "boom");
        assert_eq!(entries(&journal), vec!["run a", "run b", "cleanup b", "cleanup a"]);
    }

    #[tokio::test]
    async fn cancellation_between_steps_records_cancelled() {
        let journal = Journal::default();
        let token = CancellationToken::new();
        let first: Box<dyn Step<FakeCloud>> = Box::new(Scripted {
            name: "a",
            outcome: None,
            journal: Arc::clone(&journal),
            cancel_after: Some(token.clone()),
        });
        let mut runner = StepRunner::new(vec![first, Scripted::boxed("b", None, &journal)]);

        let err = runner.run(&mut context(token)).await.expect_err("cancelled");

        assert!(matches!(err, RunError::Cancelled));
        assert_eq!(entries(&journal), vec!["run a", "cleanup a"]);
    }
}
