//! Structured error types for the recommendation engine
//!
//! Categorizes failures into retryable (mirror unavailable) and terminal
//! classes so the listener and the DLQ reprocessor can decide whether a
//! retry is worth anything.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Engine error types with proper categorization
#[derive(Debug)]
pub enum EngineError {
    // Validation errors (400)
    InvalidMemberId(i64),
    SelfRelation(i64),
    InvalidEvent { reason: String },

    // Not found (404)
    MemberNotFound(i64),
    FriendshipNotFound { member_id: i64, friend_id: i64 },

    // Conflict (409)
    FriendshipExists { member_id: i64, friend_id: i64 },

    // Internal errors (500)
    Storage(String),
    Serialization(String),

    // Mirror/key-value store unreachable (503) - retryable
    MirrorUnavailable(String),

    // Bounded retry exhausted on the listener path (500)
    RetryExhausted { attempts: u32, last_error: String },

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl EngineError {
    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMemberId(_) => "INVALID_MEMBER_ID",
            Self::SelfRelation(_) => "SELF_RELATION",
            Self::InvalidEvent { .. } => "INVALID_EVENT",
            Self::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            Self::FriendshipNotFound { .. } => "FRIENDSHIP_NOT_FOUND",
            Self::FriendshipExists { .. } => "FRIENDSHIP_EXISTS",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::MirrorUnavailable(_) => "MIRROR_UNAVAILABLE",
            Self::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidMemberId(_) | Self::SelfRelation(_) | Self::InvalidEvent { .. } => {
                StatusCode::BAD_REQUEST
            }

            Self::MemberNotFound(_) | Self::FriendshipNotFound { .. } => StatusCode::NOT_FOUND,

            Self::FriendshipExists { .. } => StatusCode::CONFLICT,

            Self::MirrorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

            Self::Storage(_)
            | Self::Serialization(_)
            | Self::RetryExhausted { .. }
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a retry against the backing store can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::MirrorUnavailable(_))
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidMemberId(id) => format!("Invalid member id: {id}"),
            Self::SelfRelation(id) => format!("Member {id} cannot relate to itself"),
            Self::InvalidEvent { reason } => format!("Invalid event: {reason}"),
            Self::MemberNotFound(id) => format!("Member not found: {id}"),
            Self::FriendshipNotFound {
                member_id,
                friend_id,
            } => format!("Friendship not found: {member_id} - {friend_id}"),
            Self::FriendshipExists {
                member_id,
                friend_id,
            } => format!("Friendship already exists: {member_id} - {friend_id}"),
            Self::Storage(msg) => format!("Storage error: {msg}"),
            Self::Serialization(msg) => format!("Serialization error: {msg}"),
            Self::MirrorUnavailable(msg) => format!("Mirror unavailable: {msg}"),
            Self::RetryExhausted {
                attempts,
                last_error,
            } => format!("Retry exhausted after {attempts} attempts: {last_error}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::MirrorUnavailable(err.to_string())
    }
}

impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bincode::Error> for EngineError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Axum IntoResponse implementation for proper HTTP responses
impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_response();

        (status, Json(body)).into_response()
    }
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
