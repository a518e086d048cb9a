// This is free and unencumbered software released into the public domain.

//! Frame analysis: the single-worker executor, the keep-only-latest frame
//! pipeline and the [`ImageAnalysis`] use-case built on them.

use crate::shared::{Backpressure, CameraError, Frame, Size, UseCaseId};
use scopeguard::defer;
use std::{
    fmt,
    ops::Deref,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc::{Sender, channel},
    },
    thread::{JoinHandle, ThreadId},
};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorShared {
    tx: Mutex<Option<Sender<Job>>>,
    shutdowns: AtomicUsize,
}

/// Cloneable submission handle for an [`AnalysisExecutor`].
#[derive(Clone)]
pub struct ExecutorHandle {
    shared: Arc<ExecutorShared>,
}

impl fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl ExecutorHandle {
    /// Queues `job` on the worker. Fails with [`CameraError::Closed`] once the
    /// executor is shut down; the rejected job is dropped without running.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), CameraError> {
        let job: Job = Box::new(job);
        let rejected = {
            let guard = self.shared.tx.lock().unwrap_or_else(|p| p.into_inner());
            match guard.as_ref() {
                Some(tx) => tx.send(job).err().map(|e| e.0),
                None => Some(job),
            }
        };
        // Dropped outside the lock: the job may own an image whose release
        // dispatches the next frame through this executor.
        match rejected {
            None => Ok(()),
            Some(job) => {
                drop(job);
                Err(CameraError::Closed)
            },
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }
}

/// A dedicated single-thread executor. Jobs run serially, in submission order.
pub struct AnalysisExecutor {
    handle: ExecutorHandle,
    join: Option<JoinHandle<()>>,
    worker: ThreadId,
}

impl fmt::Debug for AnalysisExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisExecutor")
            .field("worker", &self.worker)
            .field("shutdown_count", &self.shutdown_count())
            .finish()
    }
}

impl AnalysisExecutor {
    pub fn new() -> Result<Self, CameraError> {
        let (tx, rx) = channel::<Job>();

        let join = std::thread::Builder::new()
            .name("camera-analysis".into())
            .spawn(move || {
                defer! {
                    debug!("analysis worker exited");
                }
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!("analyzer panicked; frame released");
                    }
                }
            })
            .map_err(|e| CameraError::driver("spawning the analysis worker", e))?;

        let worker = join.thread().id();
        Ok(Self {
            handle: ExecutorHandle {
                shared: Arc::new(ExecutorShared {
                    tx: Mutex::new(Some(tx)),
                    shutdowns: AtomicUsize::new(0),
                }),
            },
            join: Some(join),
            worker,
        })
    }

    pub fn handle(&self) -> ExecutorHandle {
        self.handle.clone()
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), CameraError> {
        self.handle.execute(job)
    }

    /// Stops accepting jobs; already queued jobs still run. Returns `true`
    /// only for the call that actually shut the executor down.
    pub fn shutdown(&self) -> bool {
        let sender = self
            .handle
            .shared
            .tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match sender {
            Some(tx) => {
                drop(tx);
                self.handle.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
                debug!("shutdown camera analysis executor");
                true
            },
            None => false,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.handle.is_shutdown()
    }

    pub fn shutdown_count(&self) -> usize {
        self.handle.shared.shutdowns.load(Ordering::SeqCst)
    }

    pub fn worker_thread(&self) -> ThreadId {
        self.worker
    }
}

impl Drop for AnalysisExecutor {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(join) = self.join.take() {
            if join.thread().id() != std::thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

/// Receives frames on the analysis worker.
pub trait Analyzer: Send + Sync + 'static {
    fn analyze(&self, image: ImageProxy);
}

impl<F> Analyzer for F
where
    F: Fn(ImageProxy) + Send + Sync + 'static,
{
    fn analyze(&self, image: ImageProxy) {
        self(image)
    }
}

/// Logs the dimensions and plane sizes of every frame, then releases it.
#[derive(Debug, Default)]
pub struct PlaneLogger {
    frames: AtomicU64,
}

impl PlaneLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Analyzer for PlaneLogger {
    fn analyze(&self, image: ImageProxy) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        trace!(
            "image analysis -- height: {}, width: {}, planes count: {}",
            image.height,
            image.width,
            image.planes.len()
        );
        for (index, plane) in image.planes.iter().enumerate() {
            trace!("    - planes[{index}]: {}", plane.len());
        }
        image.close();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    /// Frames accepted from the provider while the pipeline was open.
    pub offered: u64,
    /// Frames handed to the analyzer.
    pub delivered: u64,
    /// Pending frames replaced by a newer one before delivery.
    pub dropped: u64,
}

#[derive(Default)]
struct PipelineState {
    pending: Option<Frame>,
    in_flight: bool,
    closed: bool,
    stats: AnalysisStats,
}

struct Pipeline {
    id: UseCaseId,
    analyzer: Arc<dyn Analyzer>,
    executor: ExecutorHandle,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn offer(self: &Arc<Self>, frame: Frame) -> bool {
        let next = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.stats.offered += 1;
            if state.in_flight {
                if state.pending.replace(frame).is_some() {
                    state.stats.dropped += 1;
                }
                return true;
            }
            state.in_flight = true;
            state.stats.delivered += 1;
            frame
        };
        self.dispatch(next);
        true
    }

    fn release(self: &Arc<Self>) {
        let next = {
            let mut state = self.lock();
            state.in_flight = false;
            if state.closed {
                state.pending = None;
                return;
            }
            match state.pending.take() {
                Some(frame) => {
                    state.in_flight = true;
                    state.stats.delivered += 1;
                    frame
                },
                None => return,
            }
        };
        self.dispatch(next);
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        let image = ImageProxy {
            frame,
            _lease: Lease(Arc::clone(self)),
        };
        let analyzer = Arc::clone(&self.analyzer);
        if self.executor.execute(move || analyzer.analyze(image)).is_err() {
            debug!("analysis #{} dropped a frame: executor is shut down", self.id);
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.pending = None;
    }
}

struct Lease(Arc<Pipeline>);

impl Drop for Lease {
    fn drop(&mut self) {
        Pipeline::release(&self.0);
    }
}

/// A frame on loan to the analyzer.
///
/// The pipeline delivers nothing else to this use-case until the proxy is
/// released, either with [`ImageProxy::close`] or by dropping it.
pub struct ImageProxy {
    frame: Frame,
    _lease: Lease,
}

impl fmt::Debug for ImageProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageProxy")
            .field("use_case", &self.use_case())
            .field("size", &self.frame.size())
            .field("pixel_format", &self.frame.pixel_format)
            .field("planes", &self.frame.planes.len())
            .finish()
    }
}

impl ImageProxy {
    pub fn use_case(&self) -> UseCaseId {
        self._lease.0.id
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Returns the frame to the pipeline.
    pub fn close(self) {}
}

impl Deref for ImageProxy {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        &self.frame
    }
}

#[derive(Clone, Debug)]
pub struct ImageAnalysisBuilder {
    target_resolution: Size,
    backpressure: Backpressure,
}

impl ImageAnalysisBuilder {
    pub fn set_target_resolution(mut self, size: Size) -> Self {
        self.target_resolution = size;
        self
    }

    pub fn set_backpressure_strategy(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Builds a new use-case, with a fresh id, whose frames run `analyzer`
    /// on `executor`.
    pub fn build(self, executor: ExecutorHandle, analyzer: Arc<dyn Analyzer>) -> ImageAnalysis {
        let id = UseCaseId::next();
        ImageAnalysis {
            id,
            target_resolution: self.target_resolution,
            backpressure: self.backpressure,
            pipeline: Arc::new(Pipeline {
                id,
                analyzer,
                executor,
                state: Mutex::new(PipelineState::default()),
            }),
        }
    }
}

/// The analysis use-case. Clones share one pipeline.
#[derive(Clone)]
pub struct ImageAnalysis {
    id: UseCaseId,
    target_resolution: Size,
    backpressure: Backpressure,
    pipeline: Arc<Pipeline>,
}

impl fmt::Debug for ImageAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAnalysis")
            .field("id", &self.id)
            .field("target_resolution", &self.target_resolution)
            .field("backpressure", &self.backpressure)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ImageAnalysis {
    pub fn builder() -> ImageAnalysisBuilder {
        ImageAnalysisBuilder {
            target_resolution: Size::default(),
            backpressure: Backpressure::default(),
        }
    }

    pub fn id(&self) -> UseCaseId {
        self.id
    }

    pub fn target_resolution(&self) -> Size {
        self.target_resolution
    }

    pub fn backpressure(&self) -> Backpressure {
        self.backpressure
    }

    /// Hands a frame to the pipeline. Returns `false` once the use-case is
    /// closed.
    pub fn offer(&self, frame: Frame) -> bool {
        match self.backpressure {
            Backpressure::KeepOnlyLatest => self.pipeline.offer(frame),
        }
    }

    /// Stops delivery. A frame already with the analyzer finishes normally.
    pub fn close(&self) {
        self.pipeline.close();
    }

    pub fn is_open(&self) -> bool {
        !self.pipeline.lock().closed
    }

    pub fn stats(&self) -> AnalysisStats {
        self.pipeline.lock().stats
    }
}
