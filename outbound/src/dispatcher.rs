use crate::error::{OutboundError, SubmitError};
use crate::pipeline::{Pipeline, PipelineSender};
use gatecast_core::metrics::METRICS;
use gatecast_core::{EventKind, LifecycleEvent, OutboundConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a routed event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the pipeline for its kind.
    Submitted,
    /// No pipeline is bound for this kind; the event was counted and discarded.
    NoPipeline,
    /// The pipeline declined the event (queue full or closed); counted and discarded.
    Shed,
}

/// Cheap, cloneable routing handle shared with the transport layer.
///
/// Routing is fire-and-forget: the caller never blocks and never waits for
/// delivery. Every discard path increments a counter, so nothing disappears
/// silently.
#[derive(Clone, Default)]
pub struct DispatchSender {
    connect: Option<PipelineSender>,
    disconnect: Option<PipelineSender>,
    message_received: Option<PipelineSender>,
}

impl DispatchSender {
    fn slot(&self, kind: EventKind) -> Option<&PipelineSender> {
        match kind {
            EventKind::Connect => self.connect.as_ref(),
            EventKind::Disconnect => self.disconnect.as_ref(),
            EventKind::MessageReceived => self.message_received.as_ref(),
        }
    }

    /// Route an event to the pipeline for its kind.
    pub fn route(&self, event: LifecycleEvent) -> RouteOutcome {
        let kind = event.kind;
        let Some(pipeline) = self.slot(kind) else {
            METRICS.inc_outbound_unrouted();
            tracing::debug!(kind = %kind, device = %event.device, "no pipeline bound for kind, dropping event");
            return RouteOutcome::NoPipeline;
        };

        match pipeline.submit(event) {
            Ok(()) => RouteOutcome::Submitted,
            Err(err @ (SubmitError::QueueFull | SubmitError::Closed)) => {
                METRICS.inc_outbound_shed();
                tracing::debug!(kind = %kind, "shedding event: {}", err);
                RouteOutcome::Shed
            }
        }
    }

    /// Kinds that currently have a pipeline bound.
    pub fn bound_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.slot(*kind).is_some())
            .collect()
    }

    /// Total queued events across pipelines. Approximate.
    pub fn queued(&self) -> usize {
        EventKind::ALL
            .into_iter()
            .filter_map(|kind| self.slot(kind))
            .map(|p| p.queued())
            .sum()
    }
}

/// Owns the per-kind delivery pipelines and routes events to them.
pub struct DispatchRouter {
    pipelines: Vec<Pipeline>,
    sender: DispatchSender,
}

impl DispatchRouter {
    /// Build pipelines from the outbound config.
    ///
    /// With at least one per-kind section, each present section gets its own
    /// pipeline and absent kinds stay unbound. With no per-kind sections the
    /// legacy flat fields configure a single pipeline bound to
    /// messageReceived, matching what older config files expect.
    pub fn build(
        config: &OutboundConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, OutboundError> {
        let mut pipelines = Vec::new();
        let mut sender = DispatchSender::default();

        if config.has_kind_sections() {
            for kind in EventKind::ALL {
                match config.section(kind) {
                    Some(section) => {
                        let pipeline =
                            Pipeline::start(kind, section.clone(), cancel.child_token())?;
                        Self::bind(&mut sender, kind, pipeline.sender());
                        pipelines.push(pipeline);
                    }
                    None => {
                        tracing::info!(kind = %kind, "no outbound section, events of this kind will be dropped");
                    }
                }
            }
        } else {
            tracing::info!("no per-kind outbound sections, binding legacy pipeline to messageReceived");
            let pipeline = Pipeline::start(
                EventKind::MessageReceived,
                config.legacy.clone(),
                cancel.child_token(),
            )?;
            Self::bind(&mut sender, EventKind::MessageReceived, pipeline.sender());
            pipelines.push(pipeline);
        }

        Ok(Self { pipelines, sender })
    }

    fn bind(sender: &mut DispatchSender, kind: EventKind, pipeline: PipelineSender) {
        match kind {
            EventKind::Connect => sender.connect = Some(pipeline),
            EventKind::Disconnect => sender.disconnect = Some(pipeline),
            EventKind::MessageReceived => sender.message_received = Some(pipeline),
        }
    }

    /// A routing handle for the transport layer.
    pub fn sender(&self) -> DispatchSender {
        self.sender.clone()
    }

    /// Drain all pipelines within one shared window. Callers must drop their
    /// [`DispatchSender`] clones first; the router drops its own here.
    pub async fn shutdown(self, drain: Duration) {
        let DispatchRouter { pipelines, sender } = self;
        drop(sender);

        let deadline = tokio::time::Instant::now() + drain;
        for pipeline in pipelines {
            pipeline.shutdown_until(deadline).await;
        }
        tracing::info!("dispatch router stopped");
    }
}
