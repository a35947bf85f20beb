//! Admission webhook for the virtual clusters: stamps task identities onto
//! service-owned pods and exposes liveness/readiness probes.

pub mod mutator;
pub mod server;

pub use mutator::PodMutator;
pub use server::{WebhookState, router, run_server};
