//! Control plane API layer: request parsing, validation, ARN synthesis, and
//! translation between the public resource model and the storage model.

pub mod args;
pub mod arn;
pub mod ops;
pub mod server;

pub use ops::EcsApi;
pub use server::{AppState, router, serve};
