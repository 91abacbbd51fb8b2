//! Assembles a pipeline from stage descriptors

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::config::PipelineConfig;
use super::element::{PullElement, PushElement};
use super::jiffies;
use super::msg::{Msg, MsgBody, MsgFactory, MsgPoolSizes};
use super::reservoir::Reservoir;
use super::stages::{
    FlushControl, Flusher, MuteControl, Muter, PreDriver, Ramper, Stage, StageKind,
    StarvationMonitor, VariableDelay,
};
use super::supply::{PipelineSupply, Supply};
use super::{PipelineEvent, StreamHandler};
use crate::error::PipelineError;

/// Default reservoir appended when the configuration names none
const DEFAULT_RESERVOIR: StageKind = StageKind::Reservoir {
    max_ms: 1000,
    max_msgs: 256,
};

/// A run of stages with no reservoir between them
#[derive(Default)]
struct Segment {
    stages: Vec<Box<dyn Stage>>,
}

impl Segment {
    fn run(&mut self, msg: Msg) -> Vec<Msg> {
        let mut pending = vec![msg];
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(pending.len());
            for msg in pending {
                stage.process(msg, &mut next);
            }
            pending = next;
        }
        pending
    }

    fn starved(&mut self) -> Vec<Msg> {
        let mut pending = Vec::new();
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(pending.len());
            for msg in pending {
                stage.process(msg, &mut next);
            }
            stage.on_starved(&mut next);
            pending = next;
        }
        pending
    }

    fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Head segment, run on the pushing task
///
/// Intended for a single producer; concurrent pushers may interleave.
struct SegmentPush {
    segment: Mutex<Segment>,
    factory: MsgFactory,
    downstream: Arc<dyn PushElement>,
}

#[async_trait]
impl PushElement for SegmentPush {
    async fn push(&self, msg: Msg) -> Result<(), PipelineError> {
        let out = self
            .segment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .run(msg);
        for mut msg in out {
            self.factory.attach(&mut msg).await?;
            self.downstream.push(msg).await?;
        }
        Ok(())
    }
}

async fn run_segment(
    mut segment: Segment,
    upstream: Arc<Reservoir>,
    downstream: Arc<Reservoir>,
    factory: MsgFactory,
) {
    loop {
        let msg = upstream.pull().await;
        let quit = matches!(msg.body(), MsgBody::Quit);
        for mut msg in segment.run(msg) {
            if factory.attach(&mut msg).await.is_err() || downstream.push(msg).await.is_err() {
                tracing::debug!(upstream = upstream.name(), "segment downstream closed");
                return;
            }
        }
        if quit {
            tracing::debug!(upstream = upstream.name(), "segment quit");
            return;
        }
    }
}

/// Control surface for a running pipeline
#[derive(Clone)]
pub struct PipelineControl {
    flushers: Vec<Arc<FlushControl>>,
    mute: Arc<MuteControl>,
}

impl PipelineControl {
    /// Discard audio in every flusher until the flush with `id` passes
    pub fn discard_until_flush(&self, id: u32) {
        for flusher in &self.flushers {
            flusher.discard_until_flush(id);
        }
    }

    /// Discard audio in every flusher until the halt with `id` passes
    pub fn discard_until_halt(&self, id: u32) {
        for flusher in &self.flushers {
            flusher.discard_until_halt(id);
        }
    }

    /// Stop `stream_id` through its protocol and discard its queued audio
    ///
    /// Returns the flush id that ends the discard, or `None` if the protocol
    /// refused the stop, in which case nothing is discarded.
    pub fn stop_stream(&self, handler: &dyn StreamHandler, stream_id: u32) -> Option<u32> {
        let flush_id = handler.try_stop(stream_id)?;
        tracing::debug!(stream_id, flush_id, "stopping stream");
        self.discard_until_flush(flush_id);
        Some(flush_id)
    }

    /// Mute or unmute
    pub fn set_muted(&self, muted: bool) {
        self.mute.set_muted(muted);
    }

    /// Current mute state
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }
}

/// Pull side of the pipeline, used by the audio driver
pub struct PipelineOutput {
    upstream: Arc<Reservoir>,
    segment: Segment,
    pending: VecDeque<Msg>,
    starvation_timeout: std::time::Duration,
    quit: bool,
}

impl PipelineOutput {
    /// Next playable message
    ///
    /// Returns `None` once quit has been returned; nothing is produced after
    /// it.
    pub async fn pull(&mut self) -> Option<Msg> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                if matches!(msg.body(), MsgBody::Quit) {
                    self.quit = true;
                    self.pending.clear();
                }
                return Some(msg);
            }
            if self.quit {
                return None;
            }

            match tokio::time::timeout(self.starvation_timeout, self.upstream.pull()).await {
                Ok(msg) => self.pending.extend(self.segment.run(msg)),
                Err(_) => self.pending.extend(self.segment.starved()),
            }
        }
    }

    /// Whether quit has been pulled
    #[must_use]
    pub fn has_quit(&self) -> bool {
        self.quit
    }
}

/// A running pipeline
pub struct Pipeline {
    supply: Arc<PipelineSupply>,
    output: PipelineOutput,
    control: PipelineControl,
    events: broadcast::Sender<PipelineEvent>,
    factory: MsgFactory,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Push side for protocols
    #[must_use]
    pub fn supply(&self) -> Arc<dyn Supply> {
        self.supply.clone()
    }

    /// Pull side for the driver
    pub fn output(&mut self) -> &mut PipelineOutput {
        &mut self.output
    }

    /// Flush and mute control
    #[must_use]
    pub fn control(&self) -> PipelineControl {
        self.control.clone()
    }

    /// Subscribe to pipeline events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Pipeline events as a stream
    ///
    /// Events missed by a slow consumer are skipped.
    pub fn events(&self) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        futures::stream::unfold(self.events.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "pipeline event consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Message pools
    #[must_use]
    pub fn factory(&self) -> &MsgFactory {
        &self.factory
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.factory.close();
        for worker in &self.workers {
            worker.abort();
        }
    }
}

/// Builds a [`Pipeline`] from a [`PipelineConfig`]
///
/// Descriptors are read head first. Each reservoir ends one segment and
/// starts the next; segments between reservoirs run on their own task, the
/// head segment runs on the pushing task and the tail segment runs inside
/// [`PipelineOutput::pull`].
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a builder
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Build and start the pipeline. Must be called inside a tokio runtime.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let config = self.config;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let factory = MsgFactory::new(MsgPoolSizes {
            audio: config.audio_msgs,
            control: config.control_msgs,
        });
        let mute = Arc::new(MuteControl::default());
        let mut flushers = Vec::new();

        let mut kinds: Vec<StageKind> = config
            .stages
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.kind)
            .collect();
        if !kinds
            .iter()
            .any(|k| matches!(k, StageKind::Reservoir { .. }))
        {
            kinds.push(DEFAULT_RESERVOIR);
        }

        // Split into segments separated by reservoirs
        let mut segments = vec![Segment::default()];
        let mut reservoirs = Vec::new();
        for kind in kinds {
            let stage: Box<dyn Stage> = match kind {
                StageKind::Reservoir { max_ms, max_msgs } => {
                    let name = if reservoirs.is_empty() {
                        "encoded_reservoir"
                    } else {
                        "decoded_reservoir"
                    };
                    reservoirs.push(Arc::new(Reservoir::new(
                        name,
                        jiffies::from_ms(max_ms),
                        max_msgs,
                    )));
                    segments.push(Segment::default());
                    continue;
                }
                StageKind::Flusher => {
                    let control = Arc::new(FlushControl::new());
                    flushers.push(control.clone());
                    Box::new(Flusher::new(control))
                }
                StageKind::Ramper => Box::new(Ramper::new(jiffies::from_ms(
                    u64::try_from(config.ramp_duration.as_millis()).unwrap_or(u64::MAX),
                ))),
                StageKind::Muter => Box::new(Muter::new(mute.clone())),
                StageKind::VariableDelay => Box::new(VariableDelay::new()),
                StageKind::StarvationMonitor => Box::new(StarvationMonitor::new(
                    jiffies::from_ms(
                        u64::try_from(config.starvation_timeout.as_millis()).unwrap_or(u64::MAX),
                    ),
                    events.clone(),
                )),
                StageKind::PreDriver => Box::new(PreDriver::new(events.clone())),
            };
            if let Some(segment) = segments.last_mut() {
                segment.stages.push(stage);
            }
        }

        let mut segments = segments.into_iter();
        let head_segment = segments.next().unwrap_or_default();
        let tail_segment = segments.next_back().unwrap_or_default();
        let middle: Vec<Segment> = segments.collect();

        let mut workers = Vec::new();
        for (i, segment) in middle.into_iter().enumerate() {
            tracing::debug!(stages = ?segment.names(), "starting pipeline segment");
            workers.push(tokio::spawn(run_segment(
                segment,
                reservoirs[i].clone(),
                reservoirs[i + 1].clone(),
                factory.clone(),
            )));
        }

        // At least one reservoir exists, so first/last are present
        let first = reservoirs[0].clone();
        let last = reservoirs[reservoirs.len() - 1].clone();

        let head: Arc<dyn PushElement> = if head_segment.stages.is_empty() {
            first
        } else {
            Arc::new(SegmentPush {
                segment: Mutex::new(head_segment),
                factory: factory.clone(),
                downstream: first,
            })
        };

        tracing::debug!(
            reservoirs = reservoirs.len(),
            tail = ?tail_segment.names(),
            "pipeline built"
        );

        Pipeline {
            supply: Arc::new(PipelineSupply::new(factory.clone(), head)),
            output: PipelineOutput {
                upstream: last,
                segment: tail_segment,
                pending: VecDeque::new(),
                starvation_timeout: config.starvation_timeout,
                quit: false,
            },
            control: PipelineControl { flushers, mute },
            events,
            factory,
            workers,
        }
    }
}
