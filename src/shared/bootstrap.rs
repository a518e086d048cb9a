// This is free and unencumbered software released into the public domain.

//! Process-wide configuration: the camera backend and the permission
//! request code. Both are fixed once per process.

use crate::shared::{CameraBackend, CameraConfig, CameraError, CameraProvider, RequestCode};
use std::sync::OnceLock;

static BACKEND: OnceLock<CameraBackend> = OnceLock::new();
static REQUEST_CODE: OnceLock<RequestCode> = OnceLock::new();

cfg_if::cfg_if! {
    if #[cfg(feature = "ffmpeg")] {
        /// The backend used when none was configured.
        pub fn default_backend() -> CameraBackend {
            CameraBackend::Ffmpeg
        }
    } else {
        /// The backend used when none was configured.
        pub fn default_backend() -> CameraBackend {
            CameraBackend::Synthetic
        }
    }
}

/// Records the process-wide backend choice. Repeating the same choice is
/// accepted; changing it is not.
pub fn configure_backend(backend: CameraBackend) -> Result<CameraBackend, CameraError> {
    let chosen = *BACKEND.get_or_init(|| backend);
    if chosen != backend {
        return Err(CameraError::invalid_config(format!(
            "camera backend already configured as {chosen}"
        )));
    }
    debug!("camera backend: {chosen}");
    Ok(chosen)
}

pub fn configured_backend() -> CameraBackend {
    BACKEND.get().copied().unwrap_or_else(default_backend)
}

/// The permission request code, drawn at random on first use.
pub fn request_code() -> RequestCode {
    *REQUEST_CODE.get_or_init(|| RequestCode(rand::random::<i32>()))
}

/// Opens a provider for the configured backend.
pub fn open_provider(config: CameraConfig) -> Result<Box<dyn CameraProvider>, CameraError> {
    open_backend(configured_backend(), config)
}

pub fn open_backend(
    backend: CameraBackend,
    config: CameraConfig,
) -> Result<Box<dyn CameraProvider>, CameraError> {
    match backend {
        CameraBackend::Synthetic => Ok(Box::new(
            super::drivers::synthetic::SyntheticProvider::with_generator(config),
        )),
        #[cfg(feature = "ffmpeg")]
        CameraBackend::Ffmpeg => Ok(Box::new(super::drivers::ffmpeg::FfmpegProvider::new(
            config,
        )?)),
        #[cfg(not(feature = "ffmpeg"))]
        CameraBackend::Ffmpeg => {
            let _ = config;
            Err(CameraError::NoDriver)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_code_is_stable() {
        assert_eq!(request_code(), request_code());
    }

    #[test]
    fn backend_is_chosen_once() {
        let first = configure_backend(CameraBackend::Synthetic).unwrap();
        assert_eq!(first, CameraBackend::Synthetic);
        assert!(configure_backend(CameraBackend::Synthetic).is_ok());
        assert!(matches!(
            configure_backend(CameraBackend::Ffmpeg),
            Err(CameraError::InvalidConfig(_))
        ));
        assert_eq!(configured_backend(), CameraBackend::Synthetic);
    }

    #[test]
    fn synthetic_backend_opens_without_hardware() {
        let provider = open_backend(CameraBackend::Synthetic, CameraConfig::default()).unwrap();
        assert_eq!(provider.backend(), CameraBackend::Synthetic);
        assert!(provider.bound().is_empty());
    }
}
