// /////////////////////////////////////////////////////////////////////////////
// Signal Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! This module provides the hierarchical error system for the signal pipeline
//! domain. Failures are categorized so callers can handle them systematically:
//! configuration problems surface when a stage is appended, shape problems
//! surface from `process`, and snapshot problems surface from `load_state`.
//!
//! ## Error Categories
//!
//! - **Configuration**: invalid or missing stage parameters, detected
//!   deterministically at stage construction time
//! - **Shape**: channel-count mismatches, buffer lengths not divisible by the
//!   channel count, and missing timestamp streams, detected at process time
//! - **State loading**: snapshot structure, parameter, or derived-invariant
//!   mismatches, detected by the load protocol
//! - **Serialization**: snapshot encode/decode failures; decode failures are
//!   the only recoverable class and participate in the retry policy
//! - **Gap policy**: a time-alignment stage configured with the `error` gap
//!   policy observed a gap wider than its threshold
//!
//! ## Recovery
//!
//! `is_recoverable` marks the transient subset (decode errors). Validation
//! and structural mismatches are permanent: retrying the same bytes cannot
//! succeed, so the load protocol never retries them.

use thiserror::Error;

/// Domain-specific errors for the signal pipeline system.
///
/// Each variant carries a descriptive message naming the offending field or
/// stage so that callers can act on the failure without string matching.
///
/// ## Design Principles
///
/// - **Specific**: each variant represents one failure mode
/// - **Actionable**: messages identify the parameter, stage, or snapshot field
/// - **Categorized**: `category` groups variants for systematic handling
/// - **Recoverable**: `is_recoverable` marks the retry-able subset
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Channel mismatch: {0}")]
    ChannelMismatch(String),

    #[error("Missing timestamps: {0}")]
    MissingTimestamps(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Gap policy violation: {0}")]
    GapPolicy(String),

    #[error("State load failed: {0}")]
    StateLoad(String),

    #[error("State validation failed: {0}")]
    StateValidation(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Pipeline sealed: {0}")]
    PipelineSealed(String),

    #[error("Pipeline disposed: {0}")]
    PipelineDisposed(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Creates a new configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new parameter error
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates a new shape error
    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    /// Creates a new channel-count error
    pub fn channel_mismatch(msg: impl Into<String>) -> Self {
        Self::ChannelMismatch(msg.into())
    }

    /// Creates a new processing error
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Creates a new state-load error
    pub fn state_load(msg: impl Into<String>) -> Self {
        Self::StateLoad(msg.into())
    }

    /// Creates a new state-validation error
    pub fn state_validation(msg: impl Into<String>) -> Self {
        Self::StateValidation(msg.into())
    }

    /// Creates a new internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Checks if the error is recoverable.
    ///
    /// Only transient decode failures qualify; the snapshot load protocol
    /// retries these up to the pipeline's `max_retries`. Validation and
    /// structural mismatches are permanent and never retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::DecodeError(_))
    }

    /// Checks if the error belongs to the state-loading class.
    ///
    /// These are the failures the `fallback_on_load_failure` policy converts
    /// into a soft reset.
    pub fn is_state_load_error(&self) -> bool {
        matches!(
            self,
            PipelineError::StateLoad(_)
                | PipelineError::StateValidation(_)
                | PipelineError::DecodeError(_)
                | PipelineError::SerializationError(_)
                | PipelineError::ValidationError(_)
        )
    }

    /// Gets the error category
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::InvalidParameter(_) => "configuration",
            PipelineError::MissingParameter(_) => "configuration",
            PipelineError::ShapeMismatch(_) => "shape",
            PipelineError::ChannelMismatch(_) => "shape",
            PipelineError::MissingTimestamps(_) => "shape",
            PipelineError::ProcessingFailed(_) => "processing",
            PipelineError::GapPolicy(_) => "gap-policy",
            PipelineError::StateLoad(_) => "state-load",
            PipelineError::StateValidation(_) => "state-load",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::DecodeError(_) => "serialization",
            PipelineError::ValidationError(_) => "validation",
            PipelineError::PipelineSealed(_) => "lifecycle",
            PipelineError::PipelineDisposed(_) => "lifecycle",
            PipelineError::InternalError(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::DecodeError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PipelineError::invalid_parameter("alpha").category(), "configuration");
        assert_eq!(PipelineError::shape_mismatch("len").category(), "shape");
        assert_eq!(PipelineError::state_validation("sum").category(), "state-load");
        assert_eq!(PipelineError::GapPolicy("gap".into()).category(), "gap-policy");
    }

    #[test]
    fn test_only_decode_errors_are_recoverable() {
        assert!(PipelineError::DecodeError("truncated".into()).is_recoverable());
        assert!(!PipelineError::StateValidation("running sum".into()).is_recoverable());
        assert!(!PipelineError::StateLoad("structure".into()).is_recoverable());
        assert!(!PipelineError::invalid_parameter("mu").is_recoverable());
    }

    #[test]
    fn test_state_load_class() {
        assert!(PipelineError::StateLoad("x".into()).is_state_load_error());
        assert!(PipelineError::DecodeError("x".into()).is_state_load_error());
        assert!(!PipelineError::ChannelMismatch("x".into()).is_state_load_error());
    }

    #[test]
    fn test_messages_name_the_failure() {
        let err = PipelineError::StateValidation("Running sum validation failed".into());
        assert!(err.to_string().contains("Running sum validation failed"));
    }
}
