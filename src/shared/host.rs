// This is free and unencumbered software released into the public domain.

use crate::shared::{CameraError, CameraProvider, FrameSink, Size};
use derive_more::Display;

#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Permission {
    #[display("android.permission.CAMERA")]
    Camera,
    #[display("{_0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PermissionStatus {
    #[display("granted")]
    Granted,
    #[display("denied")]
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

/// Correlates a permission request with its result callback.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub struct RequestCode(pub i32);

/// A modal dialog with a single acknowledgement button.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertDialog {
    pub title: String,
    pub message: String,
    pub positive_button: String,
}

impl AlertDialog {
    pub fn permission_required() -> Self {
        Self {
            title: "Error".into(),
            message: "This app needs the camera permission to run.".into(),
            positive_button: "Close app".into(),
        }
    }

    pub fn session_failed(error: &CameraError) -> Self {
        Self {
            title: "Error".into(),
            message: format!("The camera could not be started: {error}"),
            positive_button: "Close app".into(),
        }
    }
}

/// Everything the controller reacts to. All events are handled on the UI
/// thread, in arrival order.
#[derive(Debug)]
pub enum SessionEvent {
    Created,
    PermissionResult {
        request_code: RequestCode,
        permissions: Vec<Permission>,
        grant_results: Vec<PermissionStatus>,
    },
    ProviderReady(Result<Box<dyn CameraProvider>, CameraError>),
    TogglePressed,
    FinishPressed,
    BackPressed,
    DialogAcknowledged,
    Destroyed,
}

/// The hosting platform: permission subsystem, provider acquisition and UI.
///
/// `request_permissions` and `request_provider` are asynchronous; the host
/// answers later with [`SessionEvent::PermissionResult`] and
/// [`SessionEvent::ProviderReady`].
pub trait Host {
    fn check_permission(&self, permission: &Permission) -> PermissionStatus;

    fn request_permissions(&mut self, permissions: &[Permission], request_code: RequestCode);

    fn request_provider(&mut self);

    /// Measured size of the preview view; empty until laid out.
    fn viewport(&self) -> Size;

    fn preview_surface(&self) -> FrameSink;

    fn show_dialog(&mut self, dialog: &AlertDialog);

    /// Mirrors the capture flag into the UI.
    fn set_capturing(&mut self, capturing: bool);

    fn finish(&mut self);
}
