//! Provider contract shared by every configuration backend.

pub mod rules;
mod traits;

pub use traits::*;
