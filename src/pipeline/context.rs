//! State shared by every step of one build.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cloud::{ServerDetails, StorageDetails};
use crate::config::RunConfig;
use crate::ui::Ui;

use super::{RunError, StepAction};

/// Resources created for one zone. Slot `i` always belongs to zone `i`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ZoneSlot {
    /// Zone this slot tracks.
    pub zone: String,
    /// Build server, recorded as soon as creation returns.
    pub server: Option<ServerDetails>,
    /// Template, recorded as soon as templatization returns.
    pub template: Option<StorageDetails>,
}

impl ZoneSlot {
    /// Creates an empty slot for `zone`.
    #[must_use]
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            server: None,
            template: None,
        }
    }
}

/// Context threaded through the steps of a build.
pub struct RunContext<C> {
    pub(crate) config: RunConfig,
    pub(crate) client: Arc<C>,
    pub(crate) ui: Arc<dyn Ui>,
    pub(crate) slots: Vec<ZoneSlot>,
    pub(crate) cancel: CancellationToken,
    error: Option<RunError>,
}

impl<C> RunContext<C> {
    /// Creates a context with one empty slot per configured zone.
    #[must_use]
    pub fn new(
        config: RunConfig,
        client: Arc<C>,
        ui: Arc<dyn Ui>,
        cancel: CancellationToken,
    ) -> Self {
        let slots = config.zones.iter().map(ZoneSlot::new).collect();
        Self {
            config,
            client,
            ui,
            slots,
            cancel,
            error: None,
        }
    }

    /// Run inputs.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Per-zone resource records, in zone order.
    #[must_use]
    pub fn slots(&self) -> &[ZoneSlot] {
        &self.slots
    }

    /// Returns the recorded error, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    /// Returns `true` once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records `err` unless an earlier error is already present.
    pub fn record_error(&mut self, err: RunError) {
        if let Some(ref existing) = self.error {
            tracing::debug!(recorded = %existing, ignored = %err, "error already recorded");
            return;
        }
        self.error = Some(err);
    }

    /// Reports `err`, records it, and halts the pipeline.
    pub fn halt(&mut self, err: RunError) -> StepAction {
        self.ui.error(&err.to_string());
        self.record_error(err);
        StepAction::Halt
    }

    /// Removes and returns the recorded error.
    pub const fn take_error(&mut self) -> Option<RunError> {
        self.error.take()
    }
}
