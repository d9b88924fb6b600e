//! Wiring of the calibration pipeline.

use crate::protocol::{ErrorKind, Input, InputError, Output, Request, Response};
use crate::{ConfigError, ValidatedConfig};
use calib_frames_core::{Clock, EdgeSource, FrameTransform};
use calib_frames_pose::{
    DetectionListener, LatestPoseSelector, ListenerStatsSnapshot, OffsetComposer, RawDetection,
    RejectReason, SubmitOutcome, TargetEdge,
};
use calib_frames_registry::{
    BroadcastConfig, Broadcaster, RegistryEntry, SinkError, TransformBatch, TransformRegistry,
    TransformSink,
};
use log::{debug, warn};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// The assembled pipeline: detections in, transform batches out.
///
/// Detection intake and registry requests may be called from any thread.
pub struct CalibrationService {
    clock: Arc<dyn Clock>,
    listener: DetectionListener<Arc<dyn Clock>>,
    selector: Arc<LatestPoseSelector>,
    composer: Arc<OffsetComposer>,
    registry: Arc<TransformRegistry>,
    broadcast: BroadcastConfig,
}

impl CalibrationService {
    /// Build the pipeline and install static transforms.
    ///
    /// Fails if the static transforms and the reserved calibration edges do
    /// not form a forest together.
    pub fn new(config: ValidatedConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let ValidatedConfig {
            camera_frame,
            offset,
            policy,
            broadcast,
            publish_target_edge,
            static_transforms,
        } = config;

        let listener = DetectionListener::new(Arc::clone(&clock)).with_camera_frame(&camera_frame);
        let selector = Arc::new(LatestPoseSelector::new(policy));
        let target_frame = offset.target_frame().to_string();
        let composer = Arc::new(OffsetComposer::new(
            Arc::clone(&selector),
            offset,
            &camera_frame,
        ));

        let mut builder =
            TransformRegistry::builder().edge_source(Arc::clone(&composer) as Arc<dyn EdgeSource>);
        if publish_target_edge {
            builder = builder.edge_source(Arc::new(TargetEdge::new(
                Arc::clone(&selector),
                &camera_frame,
                target_frame,
            )));
        }
        for (name, transform) in static_transforms {
            builder = builder.static_entry(name, transform);
        }
        let registry = Arc::new(builder.build()?);

        Ok(Self {
            clock,
            listener,
            selector,
            composer,
            registry,
            broadcast,
        })
    }

    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Arc<LatestPoseSelector> {
        &self.selector
    }

    pub fn composer(&self) -> &OffsetComposer {
        &self.composer
    }

    pub fn listener_stats(&self) -> ListenerStatsSnapshot {
        self.listener.stats()
    }

    /// Validate a raw detection and offer it to the selector.
    pub fn ingest_detection(&self, raw: RawDetection) -> Result<SubmitOutcome, RejectReason> {
        let candidate = self.listener.on_detection(raw)?;
        let outcome = self.selector.submit(candidate);
        if outcome != SubmitOutcome::Stored {
            debug!("detection not stored: {outcome:?}");
        }
        Ok(outcome)
    }

    /// Apply one registry request. Upserted transforms are stamped with the
    /// current clock time.
    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Upsert {
                name,
                parent_frame,
                child_frame,
                translation,
                rotation,
            } => {
                let transform = match FrameTransform::from_components(
                    parent_frame,
                    child_frame,
                    translation,
                    rotation,
                    self.clock.now(),
                ) {
                    Ok(tf) => tf,
                    Err(err) => return err.into(),
                };
                match self.registry.upsert(&name, transform) {
                    Ok(_) => Response::Ok,
                    Err(err) => err.into(),
                }
            }
            Request::Remove { name } => match self.registry.remove(&name) {
                Ok(_) => Response::Ok,
                Err(err) => err.into(),
            },
            Request::Get { name } => match self.registry.get(&name) {
                Ok(entry) => Response::Entry { entry },
                Err(err) => err.into(),
            },
            Request::List => Response::Entries {
                entries: self.registry.entries(),
            },
        }
    }

    /// Process one input line. Detections never produce a response;
    /// malformed ones are only counted. Every other line gets exactly one.
    pub fn handle_line(&self, line: &[u8]) -> Option<Response> {
        match Input::from_line(line) {
            Ok(Input::Detection(raw)) => {
                // Rejections are counted and logged by the listener.
                let _ = self.ingest_detection(raw);
                None
            }
            Ok(Input::Request(request)) => Some(self.handle(request)),
            Err(InputError::Detection(err)) => {
                self.listener.on_malformed(&err);
                None
            }
            Err(err @ InputError::Request(_)) => {
                warn!("unreadable input line: {err}");
                Some(Response::error(ErrorKind::InvalidRequest, err.to_string()))
            }
        }
    }

    /// Everything that would be broadcast right now.
    pub fn snapshot(&self) -> TransformBatch {
        TransformBatch::from_registry(&self.registry, self.clock.now())
    }

    /// Start periodic broadcasting into `sink`. Each tick also evicts stale
    /// detections from the selector.
    pub fn start_broadcast<S: TransformSink>(&self, sink: S) -> std::io::Result<Broadcaster> {
        let selector = Arc::clone(&self.selector);
        Broadcaster::spawn_with_hook(
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
            self.broadcast,
            sink,
            Box::new(move |now| {
                let evicted = selector.evict_stale(now);
                if evicted > 0 {
                    debug!("evicted {evicted} stale detection(s)");
                }
            }),
        )
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.registry.entries()
    }
}

/// Line-delimited JSON writer shared between the request loop and the
/// broadcaster. Each line is written under one lock.
pub struct JsonLinesWriter<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for JsonLinesWriter<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn write(&self, output: &Output<'_>) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_string(output).map_err(|e| SinkError::Encode(e.to_string()))?;
        line.push('\n');
        let mut out = self.out.lock();
        out.write_all(line.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// Consume the writer, returning the inner value if no clones remain.
    pub fn into_inner(self) -> Option<W> {
        Arc::into_inner(self.out).map(Mutex::into_inner)
    }
}

impl<W: Write + Send + 'static> TransformSink for JsonLinesWriter<W> {
    fn publish(&mut self, batch: &TransformBatch) -> Result<(), SinkError> {
        self.write(&Output::Broadcast(batch))
    }
}
