//! Library target for the `glide` package.
//!
//! The primary deliverable of this package is the `glide` CLI binary
//! (`src/main.rs`). This library exists so CI can run `cargo test -p glide --doc`.

#[doc(hidden)]
pub use glide_engine;
