// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for mnemo-sync.

use thiserror::Error;

use crate::config::ConfigError;
use crate::queue::QueueError;

/// Errors surfaced by the write path and context setup.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] mnemo_core::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for mnemo-sync operations.
pub type Result<T> = std::result::Result<T, Error>;
