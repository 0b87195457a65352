//! Error types for rsplib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Two layers are captured here:
//!
//! - [`ApiStatus`] -- the numeric result codes the receiver service speaks,
//!   with their stable values and human-readable strings.
//! - [`Error`] -- the library error, which either wraps a non-success
//!   [`ApiStatus`] returned by a transport or describes a failure detected
//!   locally (validation, mode rules, session state).
//!
//! Every [`Error`] maps back to the [`ApiStatus`] a service caller would have
//! observed via [`Error::status()`].

use std::fmt;

use crate::types::DuoMode;

/// Result codes defined by the receiver service API.
///
/// The discriminants are the wire values and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ApiStatus {
    Success = 0,
    Fail = 1,
    InvalidParam = 2,
    OutOfRange = 3,
    GainUpdateError = 4,
    RfUpdateError = 5,
    FsUpdateError = 6,
    HwError = 7,
    AliasingError = 8,
    AlreadyInitialised = 9,
    NotInitialised = 10,
    NotEnabled = 11,
    HwVerError = 12,
    OutOfMemError = 13,
    ServiceNotResponding = 14,
    StartPending = 15,
    StopPending = 16,
    InvalidMode = 17,
    FailedVerification1 = 18,
    FailedVerification2 = 19,
    FailedVerification3 = 20,
    FailedVerification4 = 21,
    FailedVerification5 = 22,
    FailedVerification6 = 23,
    InvalidServiceVersion = 24,
}

impl ApiStatus {
    /// Every status code in numeric order.
    pub const ALL: [ApiStatus; 25] = [
        ApiStatus::Success,
        ApiStatus::Fail,
        ApiStatus::InvalidParam,
        ApiStatus::OutOfRange,
        ApiStatus::GainUpdateError,
        ApiStatus::RfUpdateError,
        ApiStatus::FsUpdateError,
        ApiStatus::HwError,
        ApiStatus::AliasingError,
        ApiStatus::AlreadyInitialised,
        ApiStatus::NotInitialised,
        ApiStatus::NotEnabled,
        ApiStatus::HwVerError,
        ApiStatus::OutOfMemError,
        ApiStatus::ServiceNotResponding,
        ApiStatus::StartPending,
        ApiStatus::StopPending,
        ApiStatus::InvalidMode,
        ApiStatus::FailedVerification1,
        ApiStatus::FailedVerification2,
        ApiStatus::FailedVerification3,
        ApiStatus::FailedVerification4,
        ApiStatus::FailedVerification5,
        ApiStatus::FailedVerification6,
        ApiStatus::InvalidServiceVersion,
    ];

    /// Look up a status from its numeric wire value.
    pub fn from_code(code: i32) -> Option<ApiStatus> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    /// The numeric wire value of this status.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// `true` for every status other than [`ApiStatus::Success`].
    pub fn is_failure(self) -> bool {
        self != ApiStatus::Success
    }

    /// `true` for the two transitional statuses a caller should back off
    /// and retry on.
    pub fn is_pending(self) -> bool {
        matches!(self, ApiStatus::StartPending | ApiStatus::StopPending)
    }

    /// The stage number (1-6) for hardware verification failures.
    pub fn verification_stage(self) -> Option<u8> {
        match self {
            ApiStatus::FailedVerification1 => Some(1),
            ApiStatus::FailedVerification2 => Some(2),
            ApiStatus::FailedVerification3 => Some(3),
            ApiStatus::FailedVerification4 => Some(4),
            ApiStatus::FailedVerification5 => Some(5),
            ApiStatus::FailedVerification6 => Some(6),
            _ => None,
        }
    }

    /// Human-readable text for this status.
    pub fn error_string(self) -> &'static str {
        match self {
            ApiStatus::Success => "success",
            ApiStatus::Fail => "fail",
            ApiStatus::InvalidParam => "invalid parameter",
            ApiStatus::OutOfRange => "out of range",
            ApiStatus::GainUpdateError => "gain update error",
            ApiStatus::RfUpdateError => "RF frequency update error",
            ApiStatus::FsUpdateError => "sample rate update error",
            ApiStatus::HwError => "hardware error",
            ApiStatus::AliasingError => "aliasing error",
            ApiStatus::AlreadyInitialised => "already initialised",
            ApiStatus::NotInitialised => "not initialised",
            ApiStatus::NotEnabled => "not enabled",
            ApiStatus::HwVerError => "hardware version error",
            ApiStatus::OutOfMemError => "out of memory",
            ApiStatus::ServiceNotResponding => "service not responding",
            ApiStatus::StartPending => "start pending",
            ApiStatus::StopPending => "stop pending",
            ApiStatus::InvalidMode => "invalid mode",
            ApiStatus::FailedVerification1 => "failed verification stage 1",
            ApiStatus::FailedVerification2 => "failed verification stage 2",
            ApiStatus::FailedVerification3 => "failed verification stage 3",
            ApiStatus::FailedVerification4 => "failed verification stage 4",
            ApiStatus::FailedVerification5 => "failed verification stage 5",
            ApiStatus::FailedVerification6 => "failed verification stage 6",
            ApiStatus::InvalidServiceVersion => "invalid service version",
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error_string())
    }
}

/// The error type for all rsplib operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The service or transport returned a non-success status.
    #[error("service error: {0}")]
    Status(ApiStatus),

    /// A parameter value failed static validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A parameter value lies outside the range the hardware accepts.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The field or operation does not exist on this device variant.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A field path has no reason-for-update bit.
    ///
    /// This is a programming error in the caller, not a runtime condition.
    #[error("unmapped field: {0}")]
    UnmappedField(String),

    /// A control operation was issued while another was in flight on the
    /// same device.
    #[error("reentrant control operation")]
    Reentrant,

    /// A parameter reference was used after a duo-mode swap or release.
    #[error("stale parameter reference")]
    StaleParameters,

    /// The request is not permitted in the current duo mode.
    #[error("{operation} not permitted in {mode} mode")]
    ModeViolation {
        /// The duo mode that rejected the request.
        mode: DuoMode,
        /// The offending reason bits or operation.
        operation: String,
    },

    /// No session or device is initialised, or the session was terminated.
    #[error("not initialised")]
    NotInitialised,

    /// The session or stream is already initialised.
    #[error("already initialised")]
    AlreadyInitialised,

    /// The device is starting a stream; retry after the transition completes.
    #[error("start pending")]
    StartPending,

    /// The device is stopping a stream; retry after the transition completes.
    #[error("stop pending")]
    StopPending,

    /// Timed out waiting for a transition or update confirmation.
    #[error("timeout waiting for device")]
    Timeout,

    /// The transport failed outside the status-code protocol.
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Convert a service status into a result, mapping the statuses that
    /// have a dedicated variant onto it.
    pub fn check(status: ApiStatus) -> Result<()> {
        match status {
            ApiStatus::Success => Ok(()),
            ApiStatus::NotInitialised => Err(Error::NotInitialised),
            ApiStatus::AlreadyInitialised => Err(Error::AlreadyInitialised),
            ApiStatus::StartPending => Err(Error::StartPending),
            ApiStatus::StopPending => Err(Error::StopPending),
            other => Err(Error::Status(other)),
        }
    }

    /// The service status code equivalent to this error.
    pub fn status(&self) -> ApiStatus {
        match self {
            Error::Status(status) => *status,
            Error::InvalidParameter(_) => ApiStatus::InvalidParam,
            Error::OutOfRange(_) => ApiStatus::OutOfRange,
            Error::Unsupported(_) => ApiStatus::InvalidParam,
            Error::ModeViolation { .. } => ApiStatus::InvalidMode,
            Error::NotInitialised => ApiStatus::NotInitialised,
            Error::AlreadyInitialised => ApiStatus::AlreadyInitialised,
            Error::StartPending => ApiStatus::StartPending,
            Error::StopPending => ApiStatus::StopPending,
            Error::Timeout => ApiStatus::ServiceNotResponding,
            Error::UnmappedField(_)
            | Error::Reentrant
            | Error::StaleParameters
            | Error::Transport(_) => ApiStatus::Fail,
        }
    }

    /// `true` for transitional errors the caller should back off and retry.
    pub fn is_pending(&self) -> bool {
        self.status().is_pending()
    }

    /// `true` for misuse of the API rather than a device or validation failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::UnmappedField(_) | Error::Reentrant | Error::StaleParameters
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Diagnostic detail recorded for the most recent failing call on a device.
///
/// Overwritten by the next failure on the same device; it is not a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Source file that reported the failure.
    pub file: String,
    /// Operation that failed.
    pub function: String,
    /// Source line that reported the failure.
    pub line: u32,
    /// Failure description.
    pub message: String,
}

impl ErrorInfo {
    /// Record `error` as raised by `function` at the caller's location.
    #[track_caller]
    pub fn capture(function: &str, error: &Error) -> Self {
        let location = std::panic::Location::caller();
        ErrorInfo {
            file: location.file().to_string(),
            function: function.to_string(),
            line: location.line(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}): {}",
            self.function, self.file, self.line, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::{Reason, ReasonSet};

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(ApiStatus::Success.code(), 0);
        assert_eq!(ApiStatus::InvalidMode.code(), 17);
        assert_eq!(ApiStatus::FailedVerification1.code(), 18);
        assert_eq!(ApiStatus::InvalidServiceVersion.code(), 24);
        for (idx, status) in ApiStatus::ALL.iter().enumerate() {
            assert_eq!(status.code(), idx as i32);
        }
    }

    #[test]
    fn status_from_code() {
        assert_eq!(ApiStatus::from_code(5), Some(ApiStatus::RfUpdateError));
        assert_eq!(ApiStatus::from_code(25), None);
        assert_eq!(ApiStatus::from_code(-1), None);
    }

    #[test]
    fn verification_stage() {
        assert_eq!(ApiStatus::FailedVerification4.verification_stage(), Some(4));
        assert_eq!(ApiStatus::HwError.verification_stage(), None);
    }

    #[test]
    fn error_display_status() {
        let e = Error::Status(ApiStatus::GainUpdateError);
        assert_eq!(e.to_string(), "service error: gain update error");
    }

    #[test]
    fn error_display_mode_violation() {
        let e = Error::ModeViolation {
            mode: DuoMode::Slave,
            operation: ReasonSet::from(Reason::DevFs).to_string(),
        };
        assert_eq!(e.to_string(), "{Dev_Fs} not permitted in slave mode");
    }

    #[test]
    fn error_display_invalid_parameter() {
        let e = Error::InvalidParameter("gain reduction 10 dB below floor".into());
        assert_eq!(
            e.to_string(),
            "invalid parameter: gain reduction 10 dB below floor"
        );
    }

    #[test]
    fn check_maps_dedicated_variants() {
        assert_eq!(Error::check(ApiStatus::Success), Ok(()));
        assert_eq!(
            Error::check(ApiStatus::NotInitialised),
            Err(Error::NotInitialised)
        );
        assert_eq!(Error::check(ApiStatus::StopPending), Err(Error::StopPending));
        assert_eq!(
            Error::check(ApiStatus::HwError),
            Err(Error::Status(ApiStatus::HwError))
        );
    }

    #[test]
    fn status_round_trips_through_check() {
        for status in ApiStatus::ALL.iter().skip(1) {
            let err = Error::check(*status).unwrap_err();
            assert_eq!(err.status(), *status);
        }
    }

    #[test]
    fn classification() {
        assert!(Error::StartPending.is_pending());
        assert!(Error::Status(ApiStatus::StopPending).is_pending());
        assert!(!Error::Timeout.is_pending());
        assert!(Error::Reentrant.is_contract_violation());
        assert!(Error::StaleParameters.is_contract_violation());
        assert!(!Error::NotInitialised.is_contract_violation());
    }

    #[test]
    fn error_info_captures_location() {
        let info = ErrorInfo::capture("update", &Error::Status(ApiStatus::RfUpdateError));
        assert_eq!(info.function, "update");
        assert!(info.file.ends_with("error.rs"));
        assert!(info.line > 0);
        assert_eq!(info.message, "service error: RF frequency update error");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
