// This is free and unencumbered software released into the public domain.

mod analysis;
pub use analysis::*;

pub mod bootstrap;

mod config;
pub use config::*;

mod driver;
pub use driver::*;

pub mod drivers {
    #[cfg(feature = "ffmpeg")]
    pub mod ffmpeg;

    pub mod synthetic;
}

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod host;
pub use host::*;

mod session;
pub use session::*;
