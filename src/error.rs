use std::net::Ipv4Addr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while decoding a DHCP datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },
}

/// Errors raised while building or serializing a DHCP reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("option {code} value is {len} bytes, maximum is 255")]
    OptionTooLong { code: u8, len: usize },

    #[error("options need {needed} bytes but only {available} fit in the packet")]
    OptionsOverflow { needed: usize, available: usize },

    #[error("{field} is {len} bytes, field holds {capacity}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        capacity: usize,
    },
}

/// Errors raised by the lease allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("address range {start} - {end} exhausted")]
    RangeExhausted { start: Ipv4Addr, end: Ipv4Addr },

    #[error("invalid address range: {start} is after {end}")]
    InvalidRange { start: Ipv4Addr, end: Ipv4Addr },
}

/// Errors raised while loading or validating the server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Invalid(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that end an HTTP request with a plain-text error response.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Response error: {0}")]
    Response(#[from] axum::http::Error),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("{}: {}", status, self);
        }
        (status, format!("{}\n", self)).into_response()
    }
}
