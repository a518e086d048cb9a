// This is free and unencumbered software released into the public domain.

//! The camera session state machine.
//!
//! ```text
//! Unpermitted ──granted──▶ AwaitingProvider ──provider──▶ Previewing ◀──toggle──▶ Analyzing
//!      │                          │
//!   denied                   failure
//!      ▼                          ▼
//! PermissionDenied             Failed          (any) ──destroyed──▶ Destroyed
//! ```

use crate::shared::{
    AlertDialog, AnalysisExecutor, Analyzer, CameraError, CameraProvider, CameraSelector, Host,
    ImageAnalysis, Permission, PermissionStatus, PlaneLogger, Preview, RequestCode,
    SessionConfig, SessionEvent, Size, UseCase, bootstrap,
};
use derive_more::Display;
use std::{mem, sync::Arc};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SessionPhase {
    #[display("unpermitted")]
    Unpermitted,
    #[display("awaiting provider")]
    AwaitingProvider,
    #[display("previewing")]
    Previewing,
    #[display("analyzing")]
    Analyzing,
    #[display("permission denied")]
    PermissionDenied,
    #[display("failed")]
    Failed,
    #[display("destroyed")]
    Destroyed,
}

impl SessionPhase {
    /// Whether the session can no longer reach the preview.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            SessionPhase::PermissionDenied | SessionPhase::Failed | SessionPhase::Destroyed
        )
    }
}

/// A provider with its preview bound.
struct Camera {
    provider: Box<dyn CameraProvider>,
    selector: CameraSelector,
    preview: Preview,
}

enum State {
    Unpermitted { request_pending: bool },
    AwaitingProvider,
    Previewing(Camera),
    Analyzing(Camera, ImageAnalysis),
    PermissionDenied,
    Failed,
    Destroyed,
}

impl State {
    fn phase(&self) -> SessionPhase {
        match self {
            State::Unpermitted { .. } => SessionPhase::Unpermitted,
            State::AwaitingProvider => SessionPhase::AwaitingProvider,
            State::Previewing(_) => SessionPhase::Previewing,
            State::Analyzing(..) => SessionPhase::Analyzing,
            State::PermissionDenied => SessionPhase::PermissionDenied,
            State::Failed => SessionPhase::Failed,
            State::Destroyed => SessionPhase::Destroyed,
        }
    }

    fn camera(&self) -> Option<&Camera> {
        match self {
            State::Previewing(camera) | State::Analyzing(camera, _) => Some(camera),
            _ => None,
        }
    }
}

/// Drives one camera session for a host.
///
/// Events must be fed from a single thread through [`Self::handle`]. Frame
/// analysis runs on the controller's own worker thread, which is shut down
/// when the session is destroyed or the controller dropped.
pub struct SessionController<H: Host> {
    host: H,
    config: SessionConfig,
    analyzer: Arc<dyn Analyzer>,
    executor: AnalysisExecutor,
    request_code: RequestCode,
    state: State,
    dialogs_shown: usize,
}

impl<H: Host> core::fmt::Debug for SessionController<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionController")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .field("request_code", &self.request_code)
            .field("executor", &self.executor)
            .finish()
    }
}

impl<H: Host> SessionController<H> {
    /// A controller whose analyzer logs every frame's planes.
    pub fn new(host: H, config: SessionConfig) -> Result<Self, CameraError> {
        Self::with_analyzer(host, config, Arc::new(PlaneLogger::new()))
    }

    pub fn with_analyzer(
        host: H,
        config: SessionConfig,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, CameraError> {
        Ok(Self {
            host,
            config,
            analyzer,
            executor: AnalysisExecutor::new()?,
            request_code: bootstrap::request_code(),
            state: State::Unpermitted {
                request_pending: false,
            },
            dialogs_shown: 0,
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn request_code(&self) -> RequestCode {
        self.request_code
    }

    /// True exactly while an analysis use-case is bound.
    pub fn is_capturing(&self) -> bool {
        matches!(self.state, State::Analyzing(..))
    }

    pub fn active_analysis(&self) -> Option<&ImageAnalysis> {
        match &self.state {
            State::Analyzing(_, analysis) => Some(analysis),
            _ => None,
        }
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.state.camera().map(|c| &c.preview)
    }

    pub fn selector(&self) -> Option<CameraSelector> {
        self.state.camera().map(|c| c.selector)
    }

    pub fn provider(&self) -> Option<&dyn CameraProvider> {
        self.state.camera().map(|c| c.provider.as_ref())
    }

    pub fn executor(&self) -> &AnalysisExecutor {
        &self.executor
    }

    /// How many fatal dialogs this session has shown.
    pub fn dialogs_shown(&self) -> usize {
        self.dialogs_shown
    }

    /// Applies one event. An error means the session just became fatal:
    /// its dialog is already up and the state is
    /// [`SessionPhase::PermissionDenied`] (for
    /// [`CameraError::PermissionDenied`]) or [`SessionPhase::Failed`].
    pub fn handle(&mut self, event: SessionEvent) -> Result<(), CameraError> {
        if let State::Destroyed = self.state {
            debug!("session destroyed; ignoring {event:?}");
            return Ok(());
        }

        match event {
            SessionEvent::Created => {
                self.setup();
                Ok(())
            },
            SessionEvent::PermissionResult {
                request_code,
                permissions,
                grant_results,
            } => self.on_permission_result(request_code, &permissions, &grant_results),
            SessionEvent::ProviderReady(result) => self.on_provider_ready(result),
            SessionEvent::TogglePressed => self.toggle_analysis(),
            SessionEvent::FinishPressed | SessionEvent::BackPressed => {
                self.host.finish();
                Ok(())
            },
            SessionEvent::DialogAcknowledged => {
                if self.phase().is_fatal() {
                    self.host.finish();
                } else {
                    debug!("no dialog to acknowledge in {}", self.phase());
                }
                Ok(())
            },
            SessionEvent::Destroyed => {
                self.destroy();
                Ok(())
            },
        }
    }

    fn setup(&mut self) {
        match self.state {
            State::Unpermitted { request_pending } => {
                if self.host.check_permission(&Permission::Camera).is_granted() {
                    self.request_provider();
                } else if request_pending {
                    debug!("camera permission request already pending");
                } else {
                    debug!("* require show request permission's dialog");
                    self.host
                        .request_permissions(&[Permission::Camera], self.request_code);
                    self.state = State::Unpermitted {
                        request_pending: true,
                    };
                }
            },
            _ => debug!("setup ignored in {}", self.phase()),
        }
    }

    fn request_provider(&mut self) {
        self.state = State::AwaitingProvider;
        self.host.request_provider();
    }

    fn on_permission_result(
        &mut self,
        request_code: RequestCode,
        permissions: &[Permission],
        grant_results: &[PermissionStatus],
    ) -> Result<(), CameraError> {
        if request_code != self.request_code {
            debug!("ignoring permission result for foreign request {request_code}");
            return Ok(());
        }
        if permissions.first() != Some(&Permission::Camera) {
            debug!("ignoring permission result without the camera permission");
            return Ok(());
        }
        let State::Unpermitted { .. } = self.state else {
            debug!("ignoring permission result in {}", self.phase());
            return Ok(());
        };

        match grant_results.first() {
            Some(PermissionStatus::Granted) => {
                debug!("* user allowed camera service's permission");
                self.request_provider();
            },
            Some(PermissionStatus::Denied) => {
                warn!("! user denied camera service's permission");
                self.state = State::PermissionDenied;
                self.show_dialog(&AlertDialog::permission_required());
                return Err(CameraError::PermissionDenied);
            },
            None => {
                debug!("camera permission request was cancelled");
                self.state = State::Unpermitted {
                    request_pending: false,
                };
            },
        }
        Ok(())
    }

    fn on_provider_ready(
        &mut self,
        result: Result<Box<dyn CameraProvider>, CameraError>,
    ) -> Result<(), CameraError> {
        if !matches!(self.state, State::AwaitingProvider) {
            debug!("ignoring camera provider in {}", self.phase());
            return Ok(());
        }
        let mut provider = match result {
            Ok(provider) => provider,
            Err(err) => return Err(self.fail(err)),
        };

        let selector = self.config.selector();
        info!(
            "* start preview ({}, {} lens)",
            provider.name(),
            selector.lens_facing
        );
        let preview = Preview::new(self.target_resolution())
            .with_surface_provider(self.host.preview_surface());
        if let Err(err) = provider.bind(&selector, &preview.clone().into()) {
            provider.unbind_all();
            return Err(self.fail(err));
        }

        self.state = State::Previewing(Camera {
            provider,
            selector,
            preview,
        });
        Ok(())
    }

    fn toggle_analysis(&mut self) -> Result<(), CameraError> {
        match mem::replace(&mut self.state, State::Destroyed) {
            State::Previewing(mut camera) => {
                info!("===== start analysis =====");
                let analysis = ImageAnalysis::builder()
                    .set_target_resolution(self.target_resolution())
                    .set_backpressure_strategy(self.config.backpressure)
                    .build(self.executor.handle(), Arc::clone(&self.analyzer));
                let bound = camera
                    .provider
                    .bind(&camera.selector, &analysis.clone().into());
                if let Err(err) = bound {
                    analysis.close();
                    self.state = State::Previewing(camera);
                    return Err(self.fail(err));
                }
                self.state = State::Analyzing(camera, analysis);
            },
            State::Analyzing(mut camera, analysis) => {
                info!("===== stop analysis =====");
                let use_case = UseCase::from(analysis);
                let unbound = camera.provider.unbind(&use_case);
                use_case.detach();
                self.state = State::Previewing(camera);
                if let Err(err) = unbound {
                    self.host.set_capturing(false);
                    return Err(self.fail(err));
                }
            },
            other => {
                warn!("toggle ignored: camera not ready ({})", other.phase());
                self.state = other;
                return Ok(());
            },
        }

        self.host.set_capturing(self.is_capturing());
        Ok(())
    }

    fn target_resolution(&self) -> Size {
        self.config.target_resolution(self.host.viewport())
    }

    fn show_dialog(&mut self, dialog: &AlertDialog) {
        self.host.show_dialog(dialog);
        self.dialogs_shown += 1;
    }

    /// Unbinds everything the session holds; the state is left for the
    /// caller to set.
    fn release_camera(&mut self) {
        match mem::replace(&mut self.state, State::Destroyed) {
            State::Previewing(mut camera) => camera.provider.unbind_all(),
            State::Analyzing(mut camera, analysis) => {
                camera.provider.unbind_all();
                analysis.close();
            },
            other => self.state = other,
        }
    }

    fn fail(&mut self, err: CameraError) -> CameraError {
        warn!("camera session failed: {err}");
        let was_capturing = self.is_capturing();
        self.release_camera();
        self.state = State::Failed;
        if was_capturing {
            self.host.set_capturing(false);
        }
        self.show_dialog(&AlertDialog::session_failed(&err));
        err
    }

    fn destroy(&mut self) {
        self.release_camera();
        self.state = State::Destroyed;
        self.executor.shutdown();
    }
}

impl<H: Host> Drop for SessionController<H> {
    fn drop(&mut self) {
        if !matches!(self.state, State::Destroyed) {
            self.destroy();
        }
    }
}
