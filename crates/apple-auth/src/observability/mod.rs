//! Observability for identity token verification.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
