//! Scan Controller
//!
//! Drives the recognition chain from a periodic timer and owns the pipeline
//! state machine:
//!
//! ```text
//! Idle -> Requesting -> Streaming <-> Processing -> Matched -> Streaming
//!              |                          |
//!            Error (until retry)     Disambiguating -> Matched | Streaming
//! ```
//!
//! Ticks that arrive while a frame is still in flight are dropped.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::analysis::{parse_collector_number, CardResolver, CooldownMap, MatchOutcome, ResolveQuery, SetFilter};
use crate::capture::{AcquisitionError, CapturedFrame, FrameSource};
use crate::config::{AppConfig, ScannerSettings, Viewport};
use crate::shared::{FrameOutcome, FrameRejection, FrameResult, PipelineState, TickOutcome};
use crate::storage::{CardKey, Catalog, CatalogEntry};
use crate::telemetry::{DiagnosticsReport, FrameTrace, GeometryReport, Telemetry};
use crate::vision::{DebugImage, EngineFactory, InkClassifier, RecognitionService, RegionLayout, RegionPreprocessor};

/// Invoked once per accepted card
pub type MatchCallback = Arc<dyn Fn(&CatalogEntry) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("candidate {index} does not exist ({available} offered)")]
    UnknownCandidate { index: usize, available: usize },
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("pipeline was closed while the camera was being acquired")]
    Closed,
    #[error("{} #{} was accepted moments ago", .0.set_code, .0.collector_number)]
    Cooling(CardKey),
}

/// Inputs that callers may swap while scanning
struct ScanContext {
    resolver: CardResolver,
    set_filter: SetFilter,
    viewport: Option<Viewport>,
    on_match: Option<MatchCallback>,
}

/// Clears the in-flight flag when a tick ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Camera-driven card scanning pipeline
pub struct ScanController {
    settings: ScannerSettings,
    layout: RegionLayout,
    source: Arc<dyn FrameSource>,
    recognizer: RecognitionService,
    classifier: InkClassifier,
    telemetry: Arc<Telemetry>,
    context: RwLock<ScanContext>,
    state: watch::Sender<PipelineState>,
    /// Set while a frame is being evaluated
    busy: AtomicBool,
    preprocessor: AsyncMutex<RegionPreprocessor>,
    cooldown: Mutex<CooldownMap>,
    last_geometry: Mutex<Option<GeometryReport>>,
    /// Frame most recently evaluated, kept for debug capture
    last_frame: Mutex<Option<Arc<CapturedFrame>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    resume: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on close; work started in an older session is discarded
    session: AtomicU64,
}

impl ScanController {
    pub fn new(config: &AppConfig, source: Arc<dyn FrameSource>, factory: EngineFactory, catalog: Catalog) -> Arc<Self> {
        let telemetry = Arc::new(Telemetry::new(config.telemetry.capacity));
        let recognizer = RecognitionService::new(factory).with_observer(telemetry.clone());
        let classifier = InkClassifier::new(config.ink.clone());
        let resolver = CardResolver::new(catalog, config.scanner.max_candidates, config.ink.min_confidence);
        let (state, _) = watch::channel(PipelineState::Idle);

        Arc::new(Self {
            settings: config.scanner.clone(),
            layout: config.geometry.clone(),
            source,
            recognizer,
            classifier,
            telemetry,
            context: RwLock::new(ScanContext {
                resolver,
                set_filter: SetFilter::All,
                viewport: config.scanner.viewport,
                on_match: None,
            }),
            state,
            busy: AtomicBool::new(false),
            preprocessor: AsyncMutex::new(RegionPreprocessor::new()),
            cooldown: Mutex::new(CooldownMap::new(config.scanner.cooldown())),
            last_geometry: Mutex::new(None),
            last_frame: Mutex::new(None),
            timer: Mutex::new(None),
            resume: Mutex::new(None),
            session: AtomicU64::new(0),
        })
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Watch every state change
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn recognizer(&self) -> &RecognitionService {
        &self.recognizer
    }

    pub fn set_catalog(&self, catalog: Catalog) {
        let resolver = CardResolver::new(
            catalog,
            self.settings.max_candidates,
            self.classifier.config().min_confidence,
        );
        info!("Catalog replaced ({} cards)", resolver.catalog().len());
        self.context.write().resolver = resolver;
    }

    pub fn set_set_filter(&self, filter: SetFilter) {
        debug!("Set filter: {:?}", filter);
        self.context.write().set_filter = filter;
    }

    /// Displayed viewport size; `None` maps the guide onto the whole frame
    pub fn set_viewport(&self, viewport: Option<Viewport>) {
        self.context.write().viewport = viewport;
    }

    pub fn set_on_match(&self, callback: impl Fn(&CatalogEntry) + Send + Sync + 'static) {
        self.context.write().on_match = Some(Arc::new(callback));
    }

    /// Acquire the camera and start scanning
    pub async fn open(self: &Arc<Self>) -> Result<(), ControllerError> {
        self.request_stream("open", |s| matches!(s, PipelineState::Idle)).await
    }

    /// Re-attempt acquisition after an error
    pub async fn retry(self: &Arc<Self>) -> Result<(), ControllerError> {
        self.request_stream("retry", |s| matches!(s, PipelineState::Error(_))).await
    }

    async fn request_stream(
        self: &Arc<Self>,
        action: &'static str,
        from: impl Fn(&PipelineState) -> bool,
    ) -> Result<(), ControllerError> {
        if !self.transition(from, PipelineState::Requesting) {
            return Err(self.invalid(action));
        }
        let session = self.session.load(Ordering::SeqCst);
        info!("Requesting camera stream from {}", self.source.describe());

        if let Err(e) = self.source.acquire().await {
            warn!("Camera acquisition failed: {}", e);
            self.transition(
                |s| matches!(s, PipelineState::Requesting),
                PipelineState::Error(e.clone()),
            );
            return Err(e.into());
        }

        if self.session.load(Ordering::SeqCst) != session
            || !self.transition(|s| matches!(s, PipelineState::Requesting), PipelineState::Streaming)
        {
            self.source.release();
            return Err(ControllerError::Closed);
        }

        info!("Camera stream acquired, scanning");
        self.start_timer();
        Ok(())
    }

    fn start_timer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.settings.tick_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                // Run detached so a slow frame makes later ticks skip instead of queue
                tokio::spawn(async move {
                    controller.tick().await;
                });
            }
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Evaluate one frame if the pipeline is streaming and idle
    pub async fn tick(self: &Arc<Self>) -> TickOutcome {
        if self.busy.swap(true, Ordering::SeqCst) {
            debug!("Previous frame still in flight, skipping tick");
            return TickOutcome::Skipped;
        }
        let _busy = BusyGuard(&self.busy);

        let session = self.session.load(Ordering::SeqCst);
        if !self.transition(|s| matches!(s, PipelineState::Streaming), PipelineState::Processing) {
            return TickOutcome::NotStreaming;
        }

        let mut trace = FrameTrace::default();
        let result = self.evaluate(&mut trace).await;
        let result = self.settle(result);

        if self.session.load(Ordering::SeqCst) == session {
            self.telemetry.record(trace, &result);
        }
        TickOutcome::Processed(result)
    }

    /// Run the recognition chain on the latest frame
    async fn evaluate(&self, trace: &mut FrameTrace) -> FrameResult {
        let frame = Arc::new(self.source.next_frame().ok_or(FrameRejection::NoFrame)?);
        *self.last_frame.lock() = Some(frame.clone());
        let (frame_width, frame_height) = frame.dimensions();

        let viewport = self.context.read().viewport;
        let (viewport_width, viewport_height) = viewport.map_or((frame_width, frame_height), |v| (v.width, v.height));
        let plan = self
            .layout
            .plan(frame_width, frame_height, viewport_width, viewport_height)
            .ok_or(FrameRejection::GeometryUnavailable)?;
        *self.last_geometry.lock() = Some(GeometryReport {
            frame_width,
            frame_height,
            viewport_width,
            viewport_height,
            plan,
        });

        let mut preprocessor = self.preprocessor.lock().await;
        let prepared = preprocessor
            .prepare(&frame.image, &plan, self.layout.number_upscale)
            .ok_or(FrameRejection::EmptyRegion)?;

        let ink = self.classifier.classify(&prepared.ink);
        trace.ink = ink.clone();

        let report = self.recognizer.recognize(prepared.number).await?;
        drop(preprocessor);

        trace.text = Some(report.text.clone());
        trace.recognition_confidence = Some(report.confidence);
        trace.latency = Some(report.latency);
        trace.queued = report.queued;

        if report.text.trim().is_empty() {
            return Err(FrameRejection::NoText);
        }
        if report.confidence < self.settings.min_recognition_confidence {
            return Err(FrameRejection::LowConfidence {
                confidence: report.confidence,
            });
        }

        let parsed = parse_collector_number(&report.text).ok_or_else(|| FrameRejection::ParseFailed {
            text: report.text.clone(),
        })?;
        trace.parsed = Some(parsed.clone());

        let outcome = {
            let context = self.context.read();
            context.resolver.resolve(&ResolveQuery {
                cn: &parsed.cn,
                total: parsed.total,
                set_number: parsed.set_number.as_deref(),
                ink: ink.as_ref(),
                set_filter: &context.set_filter,
            })
        };

        let now = Instant::now();
        let mut cooldown = self.cooldown.lock();
        cooldown.sweep(now);

        Ok(match outcome {
            MatchOutcome::NoMatch => FrameOutcome::NoMatch,
            MatchOutcome::Accepted(card) => {
                let key = card.key();
                if cooldown.is_cooling(&key, now) {
                    FrameOutcome::Cooling(key)
                } else {
                    FrameOutcome::Matched(card)
                }
            }
            MatchOutcome::Ambiguous { candidates, suppressed } => {
                // Cards accepted moments ago are not offered again; a lone
                // survivor is still offered rather than accepted on its own
                let first = candidates.first().map(CatalogEntry::key);
                let offered: Vec<CatalogEntry> = candidates
                    .into_iter()
                    .filter(|c| !cooldown.is_cooling(&c.key(), now))
                    .collect();
                match first {
                    Some(first) if offered.is_empty() => FrameOutcome::Cooling(first),
                    _ => FrameOutcome::Disambiguating {
                        candidates: offered,
                        suppressed,
                    },
                }
            }
        })
    }

    /// Leave `Processing` according to the frame result
    fn settle(self: &Arc<Self>, result: FrameResult) -> FrameResult {
        let processing = |s: &PipelineState| matches!(s, PipelineState::Processing);

        match result {
            Ok(FrameOutcome::Matched(card)) => {
                if self.accept(card.clone(), processing) {
                    Ok(FrameOutcome::Matched(card))
                } else {
                    Err(FrameRejection::Interrupted)
                }
            }
            Ok(FrameOutcome::Disambiguating { candidates, suppressed }) => {
                let next = PipelineState::Disambiguating {
                    candidates: candidates.clone(),
                    suppressed,
                };
                if self.transition(processing, next) {
                    info!("{} candidates to choose from ({} suppressed)", candidates.len(), suppressed);
                    Ok(FrameOutcome::Disambiguating { candidates, suppressed })
                } else {
                    Err(FrameRejection::Interrupted)
                }
            }
            other => {
                if let Err(rejection) = &other {
                    match rejection {
                        FrameRejection::Recognition(e) => warn!("Frame dropped: {}", e),
                        _ => debug!("Frame dropped: {}", rejection),
                    }
                }
                if self.transition(processing, PipelineState::Streaming) {
                    other
                } else {
                    Err(FrameRejection::Interrupted)
                }
            }
        }
    }

    /// Move to `Matched`, stamp the cooldown, notify the caller and schedule the resume
    fn accept(self: &Arc<Self>, card: CatalogEntry, from: impl Fn(&PipelineState) -> bool) -> bool {
        if !self.transition(from, PipelineState::Matched(card.clone())) {
            return false;
        }

        self.cooldown.lock().stamp(card.key(), Instant::now());
        info!("Matched {} ({} #{})", card.full_name, card.set_code, card.collector_number);

        let callback = self.context.read().on_match.clone();
        if let Some(callback) = callback {
            callback(&card);
        }

        self.schedule_resume();
        true
    }

    fn schedule_resume(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = self.settings.matched_display();
        let session = self.session.load(Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(controller) = weak.upgrade() else {
                return;
            };
            if controller.session.load(Ordering::SeqCst) == session
                && controller.transition(|s| matches!(s, PipelineState::Matched(_)), PipelineState::Streaming)
            {
                debug!("Match display elapsed, scanning resumed");
            }
        });

        if let Some(previous) = self.resume.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Accept one of the offered candidates
    pub fn select_candidate(self: &Arc<Self>, index: usize) -> Result<CatalogEntry, ControllerError> {
        let state = self.state();
        let PipelineState::Disambiguating { candidates, .. } = &state else {
            return Err(self.invalid("select a candidate"));
        };
        let card = candidates.get(index).cloned().ok_or(ControllerError::UnknownCandidate {
            index,
            available: candidates.len(),
        })?;

        let key = card.key();
        let now = Instant::now();
        {
            let mut cooldown = self.cooldown.lock();
            cooldown.sweep(now);
            if cooldown.is_cooling(&key, now) {
                return Err(ControllerError::Cooling(key));
            }
        }

        let offered = card.clone();
        if self.accept(card.clone(), move |s| s.candidates().get(index) == Some(&offered)) {
            Ok(card)
        } else {
            Err(self.invalid("select a candidate"))
        }
    }

    /// Decline every offered candidate and keep scanning
    pub fn dismiss_candidates(&self) -> Result<(), ControllerError> {
        if self.transition(
            |s| matches!(s, PipelineState::Disambiguating { .. }),
            PipelineState::Streaming,
        ) {
            debug!("Candidates dismissed");
            Ok(())
        } else {
            Err(self.invalid("dismiss candidates"))
        }
    }

    /// Stop scanning, release the camera and tear everything down
    pub async fn close(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        if let Some(resume) = self.resume.lock().take() {
            resume.abort();
        }

        let previous = self.state.send_replace(PipelineState::Idle);
        if previous.is_open() {
            self.source.release();
        }
        self.recognizer.terminate().await;

        self.telemetry.reset();
        self.cooldown.lock().clear();
        *self.last_geometry.lock() = None;
        *self.last_frame.lock() = None;
        info!("Scanner closed (was {})", previous.name());
    }

    /// Labelled images of the last evaluated frame and its crops; no effect on scanning
    pub fn debug_capture(&self) -> Result<Vec<DebugImage>, FrameRejection> {
        let frame = self.last_frame.lock().clone().ok_or(FrameRejection::NoFrame)?;
        let (frame_width, frame_height) = frame.dimensions();
        let (viewport_width, viewport_height) = self
            .context
            .read()
            .viewport
            .map_or((frame_width, frame_height), |v| (v.width, v.height));
        let plan = self
            .layout
            .plan(frame_width, frame_height, viewport_width, viewport_height)
            .ok_or(FrameRejection::GeometryUnavailable)?;

        Ok(RegionPreprocessor::new().debug_capture(&frame.image, &plan, self.layout.number_upscale))
    }

    /// Diagnostics bundle for the current session
    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.telemetry.export(self.last_geometry.lock().clone())
    }

    /// Replace the state if `from` accepts the current one
    fn transition(&self, from: impl Fn(&PipelineState) -> bool, to: PipelineState) -> bool {
        let mut previous = "";
        let changed = self.state.send_if_modified(|state| {
            if from(state) {
                previous = state.name();
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("State {} -> {}", previous, self.state.borrow().name());
        }
        changed
    }

    fn invalid(&self, action: &'static str) -> ControllerError {
        ControllerError::InvalidTransition {
            action,
            state: self.state.borrow().name(),
        }
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
        if let Some(resume) = self.resume.get_mut().take() {
            resume.abort();
        }
    }
}
