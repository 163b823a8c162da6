// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use super::backing::ObjectKind;
use super::identifier::ObjectIdentifier;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Identifier already registered: {0}")]
    DuplicateIdentifier(ObjectIdentifier),

    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(ObjectIdentifier),

    #[error("Identifier {identifier} names a {actual}, expected a {expected}")]
    KindMismatch {
        identifier: ObjectIdentifier,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("Identifier {0} was released before its creation was processed")]
    ReleasedBeforeCreation(ObjectIdentifier),

    #[error("Failed to resolve identifiers in {0}")]
    Resolution(String),

    #[error("Protocol anomaly: {0}")]
    Protocol(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Wire codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
