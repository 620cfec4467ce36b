//! Stable response codes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code carried by every server response.
///
/// The numeric values are part of the wire format and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum RespCode {
    /// Request succeeded.
    Ok = 0,
    /// Identification succeeded but the host is not trusted yet.
    OkButUnauthorized = 1,
    /// Generic failure.
    Failed = 2,
    /// The command requires an authorized session.
    Unauthorized = 3,
    /// The session is already authorized.
    RegisterTwice = 4,
    /// A chunk or a download failed its integrity check.
    IntegrityFail = 5,
    /// The upload signature did not verify.
    SignatureMismatch = 6,
    /// The registration ciphertext did not decrypt.
    WrongPassword = 7,
    /// A path resolved outside the served directory.
    InvalidPath = 8,
    /// Unknown request type.
    NoSuchCommand = 9,
    /// The file system refused the operation.
    AccessDenied = 10,
    /// Another upload holds the transfer slot.
    TransmitterOccupied = 11,
}

impl RespCode {
    /// Every code, in numeric order.
    pub const ALL: [RespCode; 12] = [
        RespCode::Ok,
        RespCode::OkButUnauthorized,
        RespCode::Failed,
        RespCode::Unauthorized,
        RespCode::RegisterTwice,
        RespCode::IntegrityFail,
        RespCode::SignatureMismatch,
        RespCode::WrongPassword,
        RespCode::InvalidPath,
        RespCode::NoSuchCommand,
        RespCode::AccessDenied,
        RespCode::TransmitterOccupied,
    ];

    /// Returns the wire value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Looks up a code by wire value.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns true for `Ok` and `OkButUnauthorized`.
    pub fn is_success(self) -> bool {
        matches!(self, RespCode::Ok | RespCode::OkButUnauthorized)
    }

    /// Returns the conventional name of this code.
    pub fn name(self) -> &'static str {
        match self {
            RespCode::Ok => "ok",
            RespCode::OkButUnauthorized => "ok-but-unauthorized",
            RespCode::Failed => "failed",
            RespCode::Unauthorized => "unauthorized",
            RespCode::RegisterTwice => "register-twice",
            RespCode::IntegrityFail => "integrity-fail",
            RespCode::SignatureMismatch => "signature-mismatch",
            RespCode::WrongPassword => "wrong-password",
            RespCode::InvalidPath => "invalid-path",
            RespCode::NoSuchCommand => "no-such-command",
            RespCode::AccessDenied => "access-denied",
            RespCode::TransmitterOccupied => "transmitter-occupied",
        }
    }
}

impl From<RespCode> for u8 {
    fn from(code: RespCode) -> Self {
        code.code()
    }
}

impl TryFrom<u8> for RespCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown response code {code}"))
    }
}

impl fmt::Display for RespCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(RespCode::Ok.code(), 0);
        assert_eq!(RespCode::OkButUnauthorized.code(), 1);
        assert_eq!(RespCode::Failed.code(), 2);
        assert_eq!(RespCode::Unauthorized.code(), 3);
        assert_eq!(RespCode::RegisterTwice.code(), 4);
        assert_eq!(RespCode::IntegrityFail.code(), 5);
        assert_eq!(RespCode::SignatureMismatch.code(), 6);
        assert_eq!(RespCode::WrongPassword.code(), 7);
        assert_eq!(RespCode::InvalidPath.code(), 8);
        assert_eq!(RespCode::NoSuchCommand.code(), 9);
        assert_eq!(RespCode::AccessDenied.code(), 10);
        assert_eq!(RespCode::TransmitterOccupied.code(), 11);
    }

    #[test]
    fn lookup_by_value() {
        for code in RespCode::ALL {
            assert_eq!(RespCode::from_code(code.code()), Some(code));
        }
        assert_eq!(RespCode::from_code(12), None);
        assert!(RespCode::try_from(200).is_err());
    }

    #[test]
    fn success_classification() {
        assert!(RespCode::Ok.is_success());
        assert!(RespCode::OkButUnauthorized.is_success());
        assert!(!RespCode::Failed.is_success());
        assert!(!RespCode::TransmitterOccupied.is_success());
    }
}
