// This is free and unencumbered software released into the public domain.

// Logging shims over `asimov_module::tracing`; they compile to nothing when
// the `tracing` feature is disabled.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        asimov_module::tracing::trace!(target: "camera_session", $($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        asimov_module::tracing::debug!(target: "camera_session", $($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        asimov_module::tracing::info!(target: "camera_session", $($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "tracing")]
        asimov_module::tracing::warn!(target: "camera_session", $($arg)*);
    }};
}
