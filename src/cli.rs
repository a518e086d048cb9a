// This is free and unencumbered software released into the public domain.

//! CLI helpers (process start, error reporting, verbosity handling).
//!
//! This module must compile even when the crate feature `cli` is disabled,
//! because the library is built in non-CLI configurations.

#[cfg(feature = "cli")]
use crate::shared::{CameraBackend, CameraError, bootstrap};

#[cfg(feature = "cli")]
use asimov_module::SysexitsError::{self, *};

#[cfg(feature = "cli")]
use clientele::StandardOptions;

/// Process-wide initialization: logging first, then the backend choice.
#[cfg(feature = "cli")]
pub fn on_process_start(
    flags: &StandardOptions,
    backend: CameraBackend,
) -> Result<CameraBackend, CameraError> {
    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(flags)
        .map_err(|e| CameraError::other(format!("failed to initialize logging: {e:?}")))?;
    #[cfg(not(feature = "tracing"))]
    let _ = flags;

    bootstrap::configure_backend(backend)
}

#[cfg(feature = "cli")]
pub fn handle_error(err: &CameraError, flags: &StandardOptions) -> SysexitsError {
    #[cfg(feature = "tracing")]
    {
        asimov_module::tracing::error!(target: "camera_session", %err, "camera session failed");

        if flags.debug || flags.verbose >= 2 {
            asimov_module::tracing::debug!(target: "camera_session", ?err, "detailed error");
        }
    }

    report_error(err, flags);
    map_error_to_sysexit(err)
}

#[cfg(feature = "cli")]
pub fn info_user(flags: &StandardOptions, msg: &str) {
    if flags.debug || flags.verbose >= 1 {
        eprintln!("INFO: {msg}");
    }

    #[cfg(feature = "tracing")]
    asimov_module::tracing::info!(target: "camera_session", "{msg}");
}

#[cfg(feature = "cli")]
fn report_error(err: &CameraError, flags: &StandardOptions) {
    use std::error::Error as _;
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "ERROR: {err}");

    if flags.debug || flags.verbose >= 2 {
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(stderr, "  Caused by: {}", cause);
            source = cause.source();
        }
    }
}

#[cfg(feature = "cli")]
pub fn map_error_to_sysexit(err: &CameraError) -> SysexitsError {
    match err {
        CameraError::NoDriver => EX_UNAVAILABLE,
        CameraError::PermissionDenied => EX_NOPERM,
        CameraError::AlreadyBound(_) | CameraError::NotBound(_) => EX_SOFTWARE,
        CameraError::InvalidConfig(_) => EX_CONFIG,
        CameraError::Closed => EX_SOFTWARE,
        CameraError::DriverError { .. } => EX_IOERR,
        CameraError::Other(_) => EX_SOFTWARE,
    }
}

// When `cli` is disabled, keep the module linkable without exposing CLI-only types.
#[cfg(not(feature = "cli"))]
#[inline]
pub fn info_user(_msg: &str) {}
