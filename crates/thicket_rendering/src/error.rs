//! # Instancing Error Types
//!
//! Every error here is handled at the pool/group boundary. Nothing is
//! allowed to cross the per-camera draw loop: a failing group is logged
//! and skipped so the other groups still draw that frame.

use thiserror::Error;

use crate::gpu::GpuError;
use crate::ids::{GroupKey, PrototypeKey, RenderKey};

/// Errors that can occur in the instancing core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstancingError {
    /// The render key was never registered or was already unregistered.
    #[error("unknown render key: {0}")]
    UnknownRenderKey(RenderKey),

    /// No prototype is registered under this key.
    #[error("prototype not registered: {0}")]
    UnknownPrototype(PrototypeKey),

    /// The prototype descriptor cannot be rendered.
    #[error("invalid prototype descriptor '{name}': {reason}")]
    InvalidDescriptor {
        /// Descriptor name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A buffer size request exceeds the hard instance limit.
    #[error("capacity exceeded: requested {requested}, max {max}")]
    CapacityExceeded {
        /// Requested element count.
        requested: usize,
        /// Hard maximum.
        max: usize,
    },

    /// The group lost its GPU storage and renders nothing.
    #[error("group {group} disabled: {reason}")]
    GroupDisabled {
        /// The disabled group.
        group: GroupKey,
        /// Why it was disabled.
        reason: String,
    },

    /// GPU device failure (allocation, unknown buffer, bounds).
    #[error("gpu error: {0}")]
    Gpu(#[from] GpuError),

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for instancing operations.
pub type InstancingResult<T> = Result<T, InstancingError>;
