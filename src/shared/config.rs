// This is free and unencumbered software released into the public domain.

use crate::shared::Size;
use derive_more::Display;

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
pub enum LensFacing {
    #[display("front")]
    Front,
    #[default]
    #[display("back")]
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CameraSelector {
    pub lens_facing: LensFacing,
}

impl CameraSelector {
    pub const DEFAULT_BACK_CAMERA: Self = Self {
        lens_facing: LensFacing::Back,
    };

    pub const DEFAULT_FRONT_CAMERA: Self = Self {
        lens_facing: LensFacing::Front,
    };

    pub fn require_lens_facing(lens_facing: LensFacing) -> Self {
        Self { lens_facing }
    }
}

/// What the analysis pipeline does when frames arrive faster than the
/// analyzer consumes them.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
#[non_exhaustive]
pub enum Backpressure {
    /// One frame in flight, one pending; a newer frame replaces the pending one.
    #[default]
    #[display("keep-only-latest")]
    KeepOnlyLatest,
}

/// Provider-side capture settings.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub diagnostics: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
            fps: 30.0,
            diagnostics: false,
        }
    }
}

impl CameraConfig {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub lens_facing: LensFacing,
    /// Used when the host reports an empty viewport.
    pub fallback_viewport: Size,
    pub backpressure: Backpressure,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lens_facing: LensFacing::Back,
            fallback_viewport: Size::new(640, 480),
            backpressure: Backpressure::KeepOnlyLatest,
        }
    }
}

impl SessionConfig {
    pub fn new(lens_facing: LensFacing) -> Self {
        Self {
            lens_facing,
            ..Default::default()
        }
    }

    pub fn with_fallback_viewport(mut self, size: Size) -> Self {
        if !size.is_empty() {
            self.fallback_viewport = size;
        }
        self
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    pub fn selector(&self) -> CameraSelector {
        CameraSelector::require_lens_facing(self.lens_facing)
    }

    /// Target resolution for use-cases: the viewport, or the fallback when
    /// the viewport has not been measured yet.
    pub fn target_resolution(&self, viewport: Size) -> Size {
        if viewport.is_empty() {
            self.fallback_viewport
        } else {
            viewport
        }
    }
}
