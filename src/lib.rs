// This is free and unencumbered software released into the public domain.

//! Camera preview and frame analysis session.
//!
//! The [`shared::SessionController`] drives the permission, provider, preview
//! and analysis flow on top of a [`shared::Host`] and a
//! [`shared::CameraProvider`] backend.

extern crate alloc;

#[macro_use]
mod trace;

pub mod cli;
pub mod shared;
