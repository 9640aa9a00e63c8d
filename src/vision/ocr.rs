//! Recognition service
//!
//! Wraps a stateful, non-reentrant text recognition engine. At most one
//! recognition runs at any instant; callers queue in FIFO order behind a fair
//! async mutex. The engine is created lazily on first use and can be torn
//! down to reclaim memory; the next call recreates it.

use async_trait::async_trait;
use image::GrayImage;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Text and confidence returned by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine confidence, 0 - 100
    pub confidence: f32,
}

/// One completed call through the service
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionReport {
    pub text: String,
    pub confidence: f32,
    /// Engine time, excluding queue wait
    pub latency: Duration,
    /// Whether the call had to wait behind another one
    pub queued: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),
    #[error("recognition failed: {0}")]
    Engine(String),
    #[error("recognition service was terminated")]
    Terminated,
}

/// A stateful text recognition engine
#[async_trait]
pub trait TextRecognizer: Send {
    async fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError>;
}

/// Builds a fresh engine instance
pub type EngineFactory = Box<dyn Fn() -> Result<Box<dyn TextRecognizer>, RecognitionError> + Send + Sync>;

/// Receives live worker counters
pub trait WorkerObserver: Send + Sync {
    fn worker_status(&self, locked: bool, queue_depth: usize);
}

/// Serialized access to a single recognition engine
pub struct RecognitionService {
    factory: EngineFactory,
    engine: Mutex<Option<Box<dyn TextRecognizer>>>,
    queue_depth: AtomicUsize,
    locked: AtomicBool,
    /// Bumped on teardown; calls enqueued under an older generation fail
    generation: AtomicU64,
    observer: Option<Arc<dyn WorkerObserver>>,
}

impl RecognitionService {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: Mutex::new(None),
            queue_depth: AtomicUsize::new(0),
            locked: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            observer: None,
        }
    }

    /// Report counter changes to an observer (telemetry)
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Whether a recognition call is executing
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Number of calls waiting for their turn
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Run recognition once the engine is free.
    ///
    /// A failing call does not affect the calls queued behind it.
    pub async fn recognize(&self, image: &GrayImage) -> Result<RecognitionReport, RecognitionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let queued = self.is_locked() || self.queue_depth() > 0;

        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        self.publish();
        let ticket = QueueTicket(self);

        let mut slot = self.engine.lock().await;
        self.locked.store(true, Ordering::SeqCst);
        drop(ticket);
        // Declared after the guard so the flag clears before the lock is released
        let _running = RunningFlag(self);

        if generation != self.generation.load(Ordering::SeqCst) {
            debug!("Dropping recognition call queued before teardown");
            return Err(RecognitionError::Terminated);
        }

        if slot.is_none() {
            info!("Creating recognition engine");
            *slot = Some((self.factory)()?);
        }
        let Some(engine) = slot.as_mut() else {
            return Err(RecognitionError::Unavailable("engine slot empty".to_string()));
        };

        let start = Instant::now();
        let result = engine.recognize(image).await;
        let latency = start.elapsed();

        match result {
            Ok(recognition) => {
                debug!(
                    "Recognized {:?} (confidence {:.0}) in {:?}{}",
                    recognition.text,
                    recognition.confidence,
                    latency,
                    if queued { " after queueing" } else { "" }
                );
                Ok(RecognitionReport {
                    text: recognition.text,
                    confidence: recognition.confidence,
                    latency,
                    queued,
                })
            }
            Err(e) => {
                warn!("Recognition call failed after {:?}: {}", latency, e);
                Err(e)
            }
        }
    }

    /// Tear down the engine. Calls queued at this point fail with
    /// [`RecognitionError::Terminated`]; later calls recreate the engine.
    pub async fn terminate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.engine.lock().await;
        if slot.take().is_some() {
            info!("Recognition engine torn down");
        }
    }

    /// Whether an engine instance currently exists
    pub fn has_engine(&self) -> bool {
        self.engine.try_lock().map(|slot| slot.is_some()).unwrap_or(true)
    }

    fn publish(&self) {
        if let Some(observer) = &self.observer {
            observer.worker_status(self.is_locked(), self.queue_depth());
        }
    }
}

/// Leaves the queue when dropped, including on cancellation
struct QueueTicket<'a>(&'a RecognitionService);

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.queue_depth.fetch_sub(1, Ordering::SeqCst);
        self.0.publish();
    }
}

/// Clears the locked flag when the running call finishes or fails
struct RunningFlag<'a>(&'a RecognitionService);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.locked.store(false, Ordering::SeqCst);
        self.0.publish();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures_util::future::join_all;
    use parking_lot::Mutex as SyncMutex;

    /// Engine that echoes the image width and tracks concurrency
    pub(crate) struct ProbeEngine {
        pub in_flight: Arc<AtomicUsize>,
        pub peak: Arc<AtomicUsize>,
        pub order: Arc<SyncMutex<Vec<u32>>>,
        pub delay: Duration,
        pub fail_on_width: Option<u32>,
    }

    #[async_trait]
    impl TextRecognizer for ProbeEngine {
        async fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.order.lock().push(image.width());

            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if Some(image.width()) == self.fail_on_width {
                return Err(RecognitionError::Engine("probe failure".to_string()));
            }
            Ok(Recognition {
                text: image.width().to_string(),
                confidence: 90.0,
            })
        }
    }

    struct Probe {
        peak: Arc<AtomicUsize>,
        order: Arc<SyncMutex<Vec<u32>>>,
        created: Arc<AtomicUsize>,
    }

    fn probe_service(delay: Duration, fail_on_width: Option<u32>) -> (RecognitionService, Probe) {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(SyncMutex::new(Vec::new()));
        let created = Arc::new(AtomicUsize::new(0));

        let probe = Probe {
            peak: peak.clone(),
            order: order.clone(),
            created: created.clone(),
        };

        let factory: EngineFactory = Box::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ProbeEngine {
                in_flight: in_flight.clone(),
                peak: peak.clone(),
                order: order.clone(),
                delay,
                fail_on_width,
            }) as Box<dyn TextRecognizer>)
        });

        (RecognitionService::new(factory), probe)
    }

    fn image(width: u32) -> GrayImage {
        GrayImage::new(width, 1)
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_serialized() {
        let (service, probe) = probe_service(Duration::from_millis(1), None);
        let images: Vec<GrayImage> = (1..=50).map(image).collect();

        let calls = images.iter().map(|img| service.recognize(img));
        let results = tokio::time::timeout(Duration::from_secs(30), join_all(calls))
            .await
            .expect("calls deadlocked");

        assert_eq!(results.len(), 50);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
        assert_eq!(probe.created.load(Ordering::SeqCst), 1);
        assert_eq!(service.queue_depth(), 0);
        assert!(!service.is_locked());
    }

    #[tokio::test]
    async fn test_calls_complete_in_fifo_order() {
        let (service, probe) = probe_service(Duration::from_millis(2), None);
        let images: Vec<GrayImage> = (1..=10).map(image).collect();

        let results = join_all(images.iter().map(|img| service.recognize(img))).await;

        assert_eq!(*probe.order.lock(), (1..=10).collect::<Vec<u32>>());
        assert!(!results[0].as_ref().unwrap().queued);
        assert!(results[9].as_ref().unwrap().queued);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_call() {
        let (service, _probe) = probe_service(Duration::from_millis(1), Some(2));
        let images: Vec<GrayImage> = (1..=3).map(image).collect();

        let results = join_all(images.iter().map(|img| service.recognize(img))).await;

        assert_eq!(results[0].as_ref().unwrap().text, "1");
        assert_eq!(results[1], Err(RecognitionError::Engine("probe failure".to_string())));
        assert_eq!(results[2].as_ref().unwrap().text, "3");
        assert!(!service.is_locked());
    }

    #[tokio::test]
    async fn test_factory_failure_is_reported_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let service = RecognitionService::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RecognitionError::Unavailable("no engine".to_string()))
        }));

        assert!(matches!(service.recognize(&image(1)).await, Err(RecognitionError::Unavailable(_))));
        assert!(matches!(service.recognize(&image(1)).await, Err(RecognitionError::Unavailable(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!service.is_locked());
    }

    #[tokio::test]
    async fn test_terminate_fails_queued_calls_and_recreates_engine() {
        let (service, probe) = probe_service(Duration::from_millis(50), None);
        let service = Arc::new(service);

        let running = tokio::spawn({
            let s = service.clone();
            async move { s.recognize(&image(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiting = tokio::spawn({
            let s = service.clone();
            async move { s.recognize(&image(2)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(service.is_locked());
        assert_eq!(service.queue_depth(), 1);

        service.terminate().await;

        assert!(running.await.unwrap().is_ok());
        assert_eq!(waiting.await.unwrap(), Err(RecognitionError::Terminated));
        assert!(!service.has_engine());

        let again = service.recognize(&image(3)).await.unwrap();
        assert_eq!(again.text, "3");
        assert_eq!(probe.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let (service, _probe) = probe_service(Duration::from_millis(50), None);
        let service = Arc::new(service);

        let running = tokio::spawn({
            let s = service.clone();
            async move { s.recognize(&image(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let img = image(2);
        let timed_out = tokio::time::timeout(Duration::from_millis(5), service.recognize(&img)).await;
        assert!(timed_out.is_err());
        assert_eq!(service.queue_depth(), 0);

        assert!(running.await.unwrap().is_ok());
        assert!(!service.is_locked());
    }

    struct StatusLog(SyncMutex<Vec<(bool, usize)>>);

    impl WorkerObserver for StatusLog {
        fn worker_status(&self, locked: bool, queue_depth: usize) {
            self.0.lock().push((locked, queue_depth));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_lock_and_queue() {
        let (service, _probe) = probe_service(Duration::from_millis(1), None);
        let log = Arc::new(StatusLog(SyncMutex::new(Vec::new())));
        let service = service.with_observer(log.clone());

        let images: Vec<GrayImage> = (1..=3).map(image).collect();
        join_all(images.iter().map(|img| service.recognize(img))).await;

        let statuses = log.0.lock().clone();
        assert!(statuses.iter().any(|&(locked, _)| locked));
        assert!(statuses.iter().any(|&(_, depth)| depth >= 2));
        assert_eq!(statuses.last(), Some(&(false, 0)));
    }
}
