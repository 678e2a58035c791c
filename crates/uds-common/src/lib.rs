//! Common types for the UDS egress operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod gateway_api;
pub mod istio;
pub mod kube_utils;
pub mod mesh;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key naming the package (or shared pseudo-package) that owns a resource
pub const LABEL_PACKAGE: &str = "uds/package";

/// Label key carrying the generation that last wrote a resource
pub const LABEL_GENERATION: &str = "uds/generation";

/// Prefix of the per-package ownership annotation on shared resources
pub const SHARED_ANNOTATION_PREFIX: &str = "uds.dev/user";

/// Value written under every ownership annotation
pub const SHARED_ANNOTATION_VALUE: &str = "user";
