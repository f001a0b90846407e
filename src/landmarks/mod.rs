//! Hand landmark provider.
//!
//! The engine lives on a dedicated worker thread that owns it for the rest of
//! the process. Callers talk to it through [`DetectorHandle`], which makes
//! initialization happen once no matter how many threads ask for it and
//! serializes detections so every reply reaches the caller that asked.

mod common;
mod ort;
mod palm;

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use image::RgbaImage;

pub use self::ort::OrtEngine;
use crate::{
    config::DetectorConfig,
    types::{DetectionOutcome, Hand},
};

/// A hand landmark detector working on still images.
pub trait LandmarkEngine: 'static {
    /// Every hand found in `image`, landmarks normalized to its size.
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>>;
}

pub type EngineFactory =
    Arc<dyn Fn(&DetectorConfig) -> Result<Box<dyn LandmarkEngine>> + Send + Sync>;

struct DetectRequest {
    image: Arc<RgbaImage>,
    reply_tx: Sender<Result<Vec<Hand>>>,
    /// Set by the caller once it stops waiting; the worker skips the request.
    abandoned: Arc<AtomicBool>,
}

#[derive(Clone)]
struct Worker {
    request_tx: Sender<DetectRequest>,
}

/// Outcome of one initialization attempt, filled in when it settles.
type AttemptOutcome = Arc<OnceLock<bool>>;

enum HandleState {
    Uninitialized,
    Initializing(AttemptOutcome),
    Ready(Worker),
}

pub struct DetectorHandle {
    config: DetectorConfig,
    factory: EngineFactory,
    state: Mutex<HandleState>,
    settled: Condvar,
}

static SHARED: OnceLock<Arc<DetectorHandle>> = OnceLock::new();

impl DetectorHandle {
    pub fn new(config: DetectorConfig, factory: EngineFactory) -> Self {
        Self {
            config,
            factory,
            state: Mutex::new(HandleState::Uninitialized),
            settled: Condvar::new(),
        }
    }

    /// Handle backed by [`OrtEngine`], downloading models on first use.
    pub fn with_ort(config: DetectorConfig) -> Self {
        Self::new(
            config,
            Arc::new(|cfg: &DetectorConfig| {
                Ok(Box::new(OrtEngine::load(cfg)?) as Box<dyn LandmarkEngine>)
            }),
        )
    }

    /// The process-wide ORT handle, created on first call from the environment config.
    pub fn shared() -> Arc<DetectorHandle> {
        SHARED
            .get_or_init(|| Arc::new(DetectorHandle::with_ort(DetectorConfig::from_env())))
            .clone()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), HandleState::Ready(_))
    }

    /// Brings the engine up once. Callers arriving while another thread is
    /// initializing wait for and share that attempt's outcome. A failed
    /// attempt leaves the handle uninitialized so a later call retries.
    pub fn initialize(&self) -> bool {
        let mut state = self.lock();
        let pending = match &*state {
            HandleState::Ready(_) => return true,
            HandleState::Initializing(outcome) => Some(Arc::clone(outcome)),
            HandleState::Uninitialized => None,
        };
        if let Some(outcome) = pending {
            let _state = self
                .settled
                .wait_while(state, |_| outcome.get().is_none())
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            return outcome.get().copied().unwrap_or(false);
        }

        let outcome = AttemptOutcome::default();
        *state = HandleState::Initializing(Arc::clone(&outcome));
        drop(state);

        let started = self.start_worker();

        let mut state = self.lock();
        let ok = match started {
            Ok(worker) => {
                *state = HandleState::Ready(worker);
                true
            }
            Err(reason) => {
                log::error!("hand landmark detector unavailable: {reason}");
                *state = HandleState::Uninitialized;
                false
            }
        };
        let _ = outcome.set(ok);
        drop(state);
        self.settled.notify_all();
        ok
    }

    /// Runs detection on the worker. Never fails: engine errors, timeouts
    /// and a missing engine all come back as [`DetectionOutcome::Unavailable`].
    pub fn detect(&self, image: Arc<RgbaImage>) -> DetectionOutcome {
        let worker = match &*self.lock() {
            HandleState::Ready(worker) => worker.clone(),
            _ => return DetectionOutcome::Unavailable("detector not initialized".to_string()),
        };

        let (reply_tx, reply_rx) = bounded(1);
        let abandoned = Arc::new(AtomicBool::new(false));
        let request = DetectRequest {
            image,
            reply_tx,
            abandoned: Arc::clone(&abandoned),
        };
        if worker.request_tx.send(request).is_err()
        {
            self.mark_lost(&worker);
            return DetectionOutcome::Unavailable("detector worker stopped".to_string());
        }

        match reply_rx.recv_timeout(self.config.detect_timeout) {
            Ok(Ok(hands)) => DetectionOutcome::from_hands(hands),
            Ok(Err(err)) => {
                log::warn!("hand detection failed: {err:?}");
                DetectionOutcome::Unavailable(format!("{err:#}"))
            }
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                log::warn!(
                    "hand detection timed out after {:?}",
                    self.config.detect_timeout
                );
                DetectionOutcome::Unavailable("detection timed out".to_string())
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_lost(&worker);
                DetectionOutcome::Unavailable("detector worker stopped".to_string())
            }
        }
    }

    fn start_worker(&self) -> std::result::Result<Worker, String> {
        let (request_tx, request_rx) = unbounded::<DetectRequest>();
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let factory = Arc::clone(&self.factory);
        let config = self.config.clone();

        thread::Builder::new()
            .name("hand-landmarks".to_string())
            .spawn(move || run_worker(factory, config, request_rx, ready_tx))
            .map_err(|err| format!("failed to spawn detector worker: {err}"))?;

        match ready_rx.recv_timeout(self.config.init_timeout) {
            Ok(Ok(())) => Ok(Worker { request_tx }),
            Ok(Err(reason)) => Err(reason),
            // Dropping `request_tx` here lets a late worker exit on its own.
            Err(RecvTimeoutError::Timeout) => Err(format!(
                "initialization timed out after {:?}",
                self.config.init_timeout
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err("detector worker exited during initialization".to_string())
            }
        }
    }

    fn mark_lost(&self, worker: &Worker) {
        let mut state = self.lock();
        let lost = matches!(&*state, HandleState::Ready(current)
            if current.request_tx.same_channel(&worker.request_tx));
        if lost {
            log::warn!("detector worker is gone; next use will reinitialize");
            *state = HandleState::Uninitialized;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn run_worker(
    factory: EngineFactory,
    config: DetectorConfig,
    request_rx: Receiver<DetectRequest>,
    ready_tx: Sender<std::result::Result<(), String>>,
) {
    log::info!("initializing hand landmark detector");
    let mut engine = match factory(&config).and_then(|mut engine| {
        // Warm-up pass so lazy allocations happen before the first real image.
        engine.detect(&RgbaImage::new(1, 1))?;
        Ok(engine)
    }) {
        Ok(engine) => engine,
        Err(err) => {
            let _ = ready_tx.send(Err(format!("{err:#}")));
            return;
        }
    };

    if ready_tx.send(Ok(())).is_err() {
        log::warn!("detector became ready after initialization was abandoned");
        return;
    }
    log::info!("hand landmark detector ready");

    while let Ok(request) = request_rx.recv() {
        if request.abandoned.load(Ordering::SeqCst) {
            log::debug!("skipping detection nobody is waiting for");
            continue;
        }
        let _ = request.reply_tx.send(engine.detect(&request.image));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HandLandmark, NUM_LANDMARKS};
    use anyhow::anyhow;
    use std::{
        sync::atomic::AtomicUsize,
        time::{Duration, Instant},
    };

    /// Reports one hand whose every landmark encodes the image width.
    struct WidthEcho;

    impl LandmarkEngine for WidthEcho {
        fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>> {
            if image.width() == 1 {
                return Ok(Vec::new());
            }
            let marker = image.width() as f32 / 1000.0;
            let hand = Hand::new([HandLandmark::new(marker, 0.5, 0.0); NUM_LANDMARKS]);
            thread::sleep(Duration::from_millis(2));
            Ok(vec![hand])
        }
    }

    struct Failing;

    impl LandmarkEngine for Failing {
        fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>> {
            if image.width() == 1 {
                return Ok(Vec::new());
            }
            Err(anyhow!("inference exploded"))
        }
    }

    struct Stalled;

    impl LandmarkEngine for Stalled {
        fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>> {
            if image.width() > 1 {
                thread::sleep(Duration::from_millis(500));
            }
            Ok(Vec::new())
        }
    }

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            init_timeout: Duration::from_secs(5),
            detect_timeout: Duration::from_secs(5),
            ..DetectorConfig::default()
        }
    }

    fn counting_handle(
        constructions: Arc<AtomicUsize>,
        delay: Duration,
    ) -> DetectorHandle {
        DetectorHandle::new(
            fast_config(),
            Arc::new(move |_cfg: &DetectorConfig| {
                constructions.fetch_add(1, Ordering::SeqCst);
                thread::sleep(delay);
                Ok(Box::new(WidthEcho) as Box<dyn LandmarkEngine>)
            }),
        )
    }

    #[test]
    fn concurrent_initialize_constructs_once() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(counting_handle(
            constructions.clone(),
            Duration::from_millis(100),
        ));

        let results: Vec<bool> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.initialize())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();

        assert!(results.iter().all(|ok| *ok));
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(handle.initialize());
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_initialize_is_shared_then_retried() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let counter = constructions.clone();
        let handle = Arc::new(DetectorHandle::new(
            fast_config(),
            Arc::new(move |_cfg: &DetectorConfig| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                if n == 0 {
                    Err(anyhow!("runtime assets unreachable"))
                } else {
                    Ok(Box::new(WidthEcho) as Box<dyn LandmarkEngine>)
                }
            }),
        ));

        let results: Vec<bool> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.initialize())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect();
        assert_eq!(results, vec![false; 4]);
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(!handle.is_ready());

        assert!(handle.initialize());
        assert_eq!(constructions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn detect_before_initialize_is_unavailable() {
        let handle = counting_handle(Arc::new(AtomicUsize::new(0)), Duration::ZERO);
        let outcome = handle.detect(Arc::new(RgbaImage::new(10, 10)));
        assert!(matches!(outcome, DetectionOutcome::Unavailable(_)));
    }

    #[test]
    fn concurrent_detects_get_their_own_results() {
        let handle = Arc::new(counting_handle(
            Arc::new(AtomicUsize::new(0)),
            Duration::ZERO,
        ));
        assert!(handle.initialize());

        let workers: Vec<_> = (2..12u32)
            .map(|i| {
                let handle = handle.clone();
                thread::spawn(move || {
                    let width = i * 10;
                    match handle.detect(Arc::new(RgbaImage::new(width, 4))) {
                        DetectionOutcome::Detected(hands) => (width, hands[0].landmark(8).x),
                        other => panic!("unexpected outcome {other:?}"),
                    }
                })
            })
            .collect();

        for worker in workers {
            let (width, marker) = worker.join().unwrap();
            assert_eq!(marker, width as f32 / 1000.0);
        }
    }

    #[test]
    fn engine_errors_become_unavailable() {
        let handle = DetectorHandle::new(
            fast_config(),
            Arc::new(|_cfg: &DetectorConfig| Ok(Box::new(Failing) as Box<dyn LandmarkEngine>)),
        );
        assert!(handle.initialize());
        match handle.detect(Arc::new(RgbaImage::new(8, 8))) {
            DetectionOutcome::Unavailable(reason) => assert!(reason.contains("exploded")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(handle.is_ready());
    }

    #[test]
    fn slow_detection_times_out() {
        let handle = DetectorHandle::new(
            DetectorConfig {
                detect_timeout: Duration::from_millis(20),
                ..fast_config()
            },
            Arc::new(|_cfg: &DetectorConfig| Ok(Box::new(Stalled) as Box<dyn LandmarkEngine>)),
        );
        assert!(handle.initialize());
        assert_eq!(
            handle.detect(Arc::new(RgbaImage::new(8, 8))),
            DetectionOutcome::Unavailable("detection timed out".to_string())
        );
    }

    /// Sleeps on 8x8 images, answers anything else at once.
    struct SlowOnSmall {
        slow_runs: Arc<AtomicUsize>,
    }

    impl LandmarkEngine for SlowOnSmall {
        fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>> {
            if image.width() == 8 {
                self.slow_runs.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(400));
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn timed_out_requests_do_not_delay_later_ones() {
        let slow_runs = Arc::new(AtomicUsize::new(0));
        let runs = slow_runs.clone();
        let handle = Arc::new(DetectorHandle::new(
            DetectorConfig {
                detect_timeout: Duration::from_millis(100),
                ..fast_config()
            },
            Arc::new(move |_cfg: &DetectorConfig| {
                Ok(Box::new(SlowOnSmall {
                    slow_runs: runs.clone(),
                }) as Box<dyn LandmarkEngine>)
            }),
        ));
        assert!(handle.initialize());

        let slow: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.detect(Arc::new(RgbaImage::new(8, 8))))
            })
            .collect();
        for caller in slow {
            assert_eq!(
                caller.join().unwrap(),
                DetectionOutcome::Unavailable("detection timed out".to_string())
            );
        }

        // Past the one slow run already in progress when the callers gave up.
        thread::sleep(Duration::from_millis(400));
        let started = Instant::now();
        assert_eq!(
            handle.detect(Arc::new(RgbaImage::new(9, 9))),
            DetectionOutcome::NotFound
        );
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(slow_runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiters_keep_the_outcome_of_the_attempt_they_joined() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let constructions = Arc::new(AtomicUsize::new(0));
        let counter = constructions.clone();
        let handle = Arc::new(DetectorHandle::new(
            fast_config(),
            Arc::new(move |_cfg: &DetectorConfig| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let _ = gate_rx.recv();
                    return Err(anyhow!("first attempt fails"));
                }
                Ok(Box::new(WidthEcho) as Box<dyn LandmarkEngine>)
            }),
        ));

        let first = {
            let handle = handle.clone();
            thread::spawn(move || handle.initialize())
        };
        while constructions.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.initialize())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));

        gate_tx.send(()).unwrap();
        assert!(!first.join().unwrap());
        // A fresh attempt succeeds while the waiters may still be waking up.
        assert!(handle.initialize());

        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        assert_eq!(constructions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slow_initialization_times_out() {
        let constructions = Arc::new(AtomicUsize::new(0));
        let handle = DetectorHandle::new(
            DetectorConfig {
                init_timeout: Duration::from_millis(20),
                ..fast_config()
            },
            Arc::new(move |_cfg: &DetectorConfig| {
                constructions.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                Ok(Box::new(WidthEcho) as Box<dyn LandmarkEngine>)
            }),
        );
        assert!(!handle.initialize());
        assert!(!handle.is_ready());
    }
}
