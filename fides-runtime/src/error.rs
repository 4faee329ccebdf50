//! Error types for the consent runtime.
//!
//! Each concern has its own enum; [`FidesError`] is the umbrella returned by
//! the controller. Only [`I18nError::NullDescriptor`] signals a programmer
//! error; everything else is a configuration or network condition that the
//! controller logs once and degrades around.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FidesError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum I18nError {
    /// `t(null)` / `t(undefined)`: the caller passed nothing where a message
    /// id or descriptor was required.
    #[error("TypeError: cannot translate a null or undefined message descriptor")]
    NullDescriptor,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cookie write rejected: {0}")]
    Write(String),

    #[error("Cookie is neither JSON nor base64: {0}")]
    Decode(String),

    #[error("Cookie JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    #[error("Element with id \"{id}\" never appeared after {attempts} attempts")]
    ContainerNotFound { id: String, attempts: u32 },

    #[error("Host document closed before it became interactive")]
    DocumentClosed,

    #[error("Overlay is not mounted")]
    NotMounted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UiError {
    #[error("Cannot {action} while the consent UI is {state}")]
    InvalidTransition { action: &'static str, state: &'static str },

    #[error("Unknown privacy notice \"{0}\"")]
    UnknownNotice(String),

    #[error("Privacy notice \"{0}\" is notice-only and cannot be toggled")]
    NoticeOnly(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TcfError {
    #[error("TC string is empty")]
    Empty,

    #[error("TC string is not valid base64url: {0}")]
    Base64(String),

    #[error("TC string ended after {0} bits")]
    Truncated(usize),

    #[error("Unsupported TC string version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid additional consent string: {0}")]
    InvalidAcString(String),

    #[error("Value {value} does not fit in {bits} bits")]
    Overflow { value: u64, bits: usize },

    #[error("\"{0}\" is not a two-letter code")]
    InvalidLetter(String),

    #[error("Vendor range {start}..={end} is outside 1..={max}")]
    VendorRange { start: u16, end: u16, max: u16 },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Server responded {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid response body: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum FidesError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    I18n(#[from] I18nError),

    #[error("Consent store error: {0}")]
    Store(#[from] StoreError),

    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("Consent UI error: {0}")]
    Ui(#[from] UiError),

    #[error("TCF error: {0}")]
    Tcf(#[from] TcfError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
