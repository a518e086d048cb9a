// This is free and unencumbered software released into the public domain.

use crate::shared::{CameraError, CameraSelector, Frame, ImageAnalysis, Size};
use derive_more::Display;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub type FrameSink = Arc<dyn Fn(Frame) + Send + Sync + 'static>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum CameraBackend {
    #[display("synthetic")]
    Synthetic,
    #[display("ffmpeg")]
    Ffmpeg,
}

/// Process-unique use-case identifier. Ids are never reused.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UseCaseId(u64);

impl UseCaseId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// The continuous preview use-case: every frame goes to the surface.
#[derive(Clone)]
pub struct Preview {
    id: UseCaseId,
    target_resolution: Size,
    surface: Option<FrameSink>,
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("id", &self.id)
            .field("target_resolution", &self.target_resolution)
            .field("surface", &self.surface.as_ref().map(|_| "<surface>"))
            .finish()
    }
}

impl Preview {
    pub fn new(target_resolution: Size) -> Self {
        Self {
            id: UseCaseId::next(),
            target_resolution,
            surface: None,
        }
    }

    pub fn with_surface_provider(mut self, surface: FrameSink) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn id(&self) -> UseCaseId {
        self.id
    }

    pub fn target_resolution(&self) -> Size {
        self.target_resolution
    }

    fn render(&self, frame: Frame) {
        if let Some(surface) = &self.surface {
            (surface)(frame);
        }
    }
}

#[derive(Clone, Debug)]
pub enum UseCase {
    Preview(Preview),
    Analysis(ImageAnalysis),
}

impl UseCase {
    pub fn id(&self) -> UseCaseId {
        match self {
            UseCase::Preview(p) => p.id(),
            UseCase::Analysis(a) => a.id(),
        }
    }

    pub fn target_resolution(&self) -> Size {
        match self {
            UseCase::Preview(p) => p.target_resolution(),
            UseCase::Analysis(a) => a.target_resolution(),
        }
    }

    pub fn is_preview(&self) -> bool {
        matches!(self, UseCase::Preview(_))
    }

    pub fn is_analysis(&self) -> bool {
        matches!(self, UseCase::Analysis(_))
    }

    /// Routes one frame from the provider to this use-case.
    pub fn deliver(&self, frame: Frame) {
        match self {
            UseCase::Preview(p) => p.render(frame),
            UseCase::Analysis(a) => {
                a.offer(frame);
            },
        }
    }

    /// Called by providers when the use-case is unbound.
    pub fn detach(&self) {
        if let UseCase::Analysis(a) = self {
            a.close();
        }
    }
}

impl From<Preview> for UseCase {
    fn from(preview: Preview) -> Self {
        UseCase::Preview(preview)
    }
}

impl From<ImageAnalysis> for UseCase {
    fn from(analysis: ImageAnalysis) -> Self {
        UseCase::Analysis(analysis)
    }
}

/// The acquired camera backend. Owns the bound use-cases and feeds them
/// frames from the lens chosen at bind time.
pub trait CameraProvider: dogma::Named + Send {
    fn backend(&self) -> CameraBackend;

    fn bind(&mut self, selector: &CameraSelector, use_case: &UseCase) -> Result<(), CameraError>;

    fn unbind(&mut self, use_case: &UseCase) -> Result<(), CameraError>;

    fn unbind_all(&mut self);

    /// Ids of the currently bound use-cases, in bind order.
    fn bound(&self) -> Vec<UseCaseId>;
}

impl fmt::Debug for dyn CameraProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraProvider")
            .field("name", &self.name())
            .field("backend", &self.backend())
            .field("bound", &self.bound())
            .finish()
    }
}
