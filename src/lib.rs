// src/lib.rs

//! aibuild
//!
//! Compiles simple, human-authored image manifests into the flat set of build
//! variables an image build backend consumes, while enforcing an
//! organization's build policy.
//!
//! # Architecture
//!
//! - Policy engine: loads a policy, merges `@target` overlays for the build
//!   target, and checks build arguments and manifest content
//! - Manifest compiler: validates a manifest against the packaged schema
//!   (with default injection), then translates each section into variables
//! - Pipeline: one call running policy checks, compilation and define
//!   overrides in order
//! - Pure core: nothing here runs a build or calls an external tool; the
//!   result is a complete variable map or a single error

pub mod diagnostics;
mod error;
pub mod manifest;
pub mod pathexpr;
pub mod pipeline;
pub mod policy;
pub mod schema;
pub mod size;

pub use diagnostics::{
    CollectDiagnostics, Diagnostic, DiagnosticLevel, DiagnosticSink, LogDiagnostics,
    SilentDiagnostics,
};
pub use error::{Error, Result};
pub use manifest::{BuildVariables, CompileOptions, ManifestCompiler, ManifestError};
pub use pathexpr::{PathExpression, Resolution};
pub use pipeline::CompileJob;
pub use policy::{BuildRequest, Policy, PolicyError, PolicyLoader, RestrictionRule};
pub use size::{ByteSize, parse_size};
