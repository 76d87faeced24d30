//! Domain building blocks for the service broker's configuration layer:
//! the configuration graph, the provider contract every backend implements,
//! environment configuration and telemetry wiring shared by binaries.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use model::*;
pub use storage::*;
