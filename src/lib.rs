//! Paired scene generation for visual change-captioning datasets.
//!
//! Places randomized objects on a ground plane under spacing and margin
//! constraints, derives semantically changed variants of each base
//! scene, checks that every object stays visible, and records spatial
//! relationships. The host 3D environment is reached only through the
//! `renderer::Renderer` trait; the `python` feature exposes the engine
//! as the `scenegen_rs` extension module.

pub mod captions;
pub mod collision;
pub mod directions;
pub mod error;
pub mod generate;
pub mod layout;
pub mod mutation;
pub mod output;
pub mod prng;
pub mod relationships;
pub mod renderer;
pub mod types;
pub mod visibility;

#[cfg(feature = "python")]
mod python;

pub use error::{GenError, GenResult};
pub use generate::generate;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_level`. Returns false if a subscriber was already set.
pub fn init_logging(default_level: &str) -> bool {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
