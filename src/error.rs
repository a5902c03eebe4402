// src/error.rs

//! Crate-wide error type
//!
//! Each module owns a `thiserror` enum for its own failures; this wraps them
//! so callers that drive the whole pipeline can use a single `Result`.

use thiserror::Error;

use crate::manifest::ManifestError;
use crate::manifest::variables::DefineError;
use crate::pathexpr::PathExprError;
use crate::policy::PolicyError;
use crate::schema::SchemaDefinitionError;
use crate::size::SizeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Define(#[from] DefineError),

    #[error(transparent)]
    Size(#[from] SizeError),

    #[error(transparent)]
    PathExpr(#[from] PathExprError),

    #[error(transparent)]
    SchemaDefinition(#[from] SchemaDefinitionError),
}

pub type Result<T> = std::result::Result<T, Error>;
