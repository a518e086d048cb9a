// This is free and unencumbered software released into the public domain.

//! An in-process provider that needs no camera hardware.
//!
//! Clones share state, so a caller can keep a handle for emitting frames
//! and inspecting binds after the controller has taken ownership of the
//! boxed provider.

use crate::shared::{
    CameraBackend, CameraConfig, CameraError, CameraProvider, CameraSelector, Frame, Size,
    UseCase, UseCaseId,
};
use alloc::borrow::Cow;
use bytes::Bytes;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[derive(Default)]
struct Inner {
    bound: Vec<(CameraSelector, UseCase)>,
    binds: usize,
    unbinds: usize,
    max_concurrent_previews: usize,
    fail_next_bind: Option<String>,
    fail_next_unbind: Option<String>,
    generator_stop: Option<Arc<AtomicBool>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(stop) = self.generator_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Default)]
pub struct SyntheticProvider {
    inner: Arc<Mutex<Inner>>,
    generator: Option<CameraConfig>,
}

impl core::fmt::Debug for SyntheticProvider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyntheticProvider")
            .field("bound", &self.bound())
            .field("generator", &self.generator)
            .finish()
    }
}

impl SyntheticProvider {
    /// A provider that only delivers frames passed to [`Self::emit`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that also generates test-pattern frames at `config.fps`
    /// while anything is bound.
    pub fn with_generator(config: CameraConfig) -> Self {
        Self {
            inner: Arc::default(),
            generator: Some(config),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Delivers `frame` to every bound use-case; returns how many got it.
    pub fn emit(&self, frame: Frame) -> usize {
        deliver(&self.bound_use_cases(), frame)
    }

    pub fn bound_use_cases(&self) -> Vec<UseCase> {
        self.lock().bound.iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn selector_of(&self, id: UseCaseId) -> Option<CameraSelector> {
        self.lock()
            .bound
            .iter()
            .find(|(_, u)| u.id() == id)
            .map(|(s, _)| *s)
    }

    pub fn bind_count(&self) -> usize {
        self.lock().binds
    }

    pub fn unbind_count(&self) -> usize {
        self.lock().unbinds
    }

    /// Highest number of previews that were ever bound at the same time.
    pub fn max_concurrent_previews(&self) -> usize {
        self.lock().max_concurrent_previews
    }

    /// Makes the next `bind` fail with a driver error.
    pub fn fail_next_bind(&self, message: impl Into<String>) {
        self.lock().fail_next_bind = Some(message.into());
    }

    /// Makes the next `unbind` fail with a driver error. The use-case is
    /// still removed.
    pub fn fail_next_unbind(&self, message: impl Into<String>) {
        self.lock().fail_next_unbind = Some(message.into());
    }

    fn start_generator(&self, inner: &mut Inner) {
        let Some(config) = self.generator.clone() else {
            return;
        };
        if inner.generator_stop.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        inner.generator_stop = Some(Arc::clone(&stop));

        let shared = Arc::downgrade(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("camera-synthetic".into())
            .spawn(move || generate(shared, stop, config));
        if let Err(err) = spawned {
            warn!("synthetic frame generator did not start: {err}");
            inner.generator_stop = None;
        }
    }

    fn stop_generator(inner: &mut Inner) {
        if let Some(stop) = inner.generator_stop.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

impl dogma::Named for SyntheticProvider {
    fn name(&self) -> Cow<'_, str> {
        "synthetic".into()
    }
}

impl CameraProvider for SyntheticProvider {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Synthetic
    }

    fn bind(&mut self, selector: &CameraSelector, use_case: &UseCase) -> Result<(), CameraError> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_bind.take() {
            return Err(CameraError::driver(
                "binding a use case",
                std::io::Error::other(message),
            ));
        }
        if inner.bound.iter().any(|(_, u)| u.id() == use_case.id()) {
            return Err(CameraError::AlreadyBound(use_case.id().get()));
        }
        inner.bound.push((*selector, use_case.clone()));
        inner.binds += 1;
        let previews = inner.bound.iter().filter(|(_, u)| u.is_preview()).count();
        inner.max_concurrent_previews = inner.max_concurrent_previews.max(previews);
        self.start_generator(&mut inner);
        Ok(())
    }

    fn unbind(&mut self, use_case: &UseCase) -> Result<(), CameraError> {
        let mut inner = self.lock();
        let Some(index) = inner.bound.iter().position(|(_, u)| u.id() == use_case.id()) else {
            return Err(CameraError::NotBound(use_case.id().get()));
        };
        let (_, removed) = inner.bound.remove(index);
        inner.unbinds += 1;
        if inner.bound.is_empty() {
            Self::stop_generator(&mut inner);
        }
        let failure = inner.fail_next_unbind.take();
        drop(inner);
        removed.detach();
        match failure {
            Some(message) => Err(CameraError::driver(
                "unbinding a use case",
                std::io::Error::other(message),
            )),
            None => Ok(()),
        }
    }

    fn unbind_all(&mut self) {
        let mut inner = self.lock();
        let removed: Vec<_> = inner.bound.drain(..).collect();
        inner.unbinds += removed.len();
        Self::stop_generator(&mut inner);
        drop(inner);
        for (_, use_case) in removed {
            use_case.detach();
        }
    }

    fn bound(&self) -> Vec<UseCaseId> {
        self.lock().bound.iter().map(|(_, u)| u.id()).collect()
    }

}

fn deliver(use_cases: &[UseCase], frame: Frame) -> usize {
    for use_case in use_cases {
        use_case.deliver(frame.clone());
    }
    use_cases.len()
}

fn generate(shared: Weak<Mutex<Inner>>, stop: Arc<AtomicBool>, config: CameraConfig) {
    let interval = Duration::from_secs_f64(1.0 / config.fps.max(0.000_001));
    let size = config.size();
    let mut sequence = 0u32;

    while !stop.load(Ordering::Relaxed) {
        let Some(inner) = shared.upgrade() else {
            break;
        };
        let use_cases: Vec<UseCase> = inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .bound
            .iter()
            .map(|(_, u)| u.clone())
            .collect();
        drop(inner);

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        deliver(&use_cases, test_pattern(size, sequence).with_timestamp_ns(timestamp_ns));
        sequence = sequence.wrapping_add(1);

        std::thread::sleep(interval);
    }
}

/// A diagonal luma gradient that shifts by one step per frame, with flat
/// chroma.
pub fn test_pattern(size: Size, sequence: u32) -> Frame {
    let (width, height) = (size.width, size.height);
    let mut luma = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            luma.push((x.wrapping_add(y).wrapping_add(sequence) & 0xff) as u8);
        }
    }
    let chroma_len = (width.div_ceil(2) * height.div_ceil(2)) as usize;
    Frame::new_yuv420(
        Bytes::from(luma),
        Bytes::from(vec![128u8; chroma_len]),
        Bytes::from(vec![128u8; chroma_len]),
        width,
        height,
    )
}
