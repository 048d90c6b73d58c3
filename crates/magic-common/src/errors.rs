//! The top-level error type composed by every other crate.

use crate::status::{MagicStatus, ResultCode};
use thiserror::Error;

/// A gateway-level error, always translatable into a `(Result-Code,
/// MAGIC-Status-Code)` pair for a Diameter answer (spec §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MagicError {
    #[error("missing required AVP: {0}")]
    MissingAvp(String),
    #[error("invalid AVP value: {0}")]
    InvalidAvpValue(String),
    #[error("unknown session id: {0}")]
    UnknownSession(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("profile does not exist: {0}")]
    ProfileDoesNotExist(String),
    #[error("TFT invalid: {0}")]
    TftInvalid(String),
    #[error("NAPT invalid: {0}")]
    NaptInvalid(String),
    #[error("no free bandwidth")]
    NoFreeBandwidth,
    #[error("illegal flight phase")]
    IllegalFlightPhase,
    #[error("accounting id invalid: {0}")]
    AccountingInvalidCdrId(String),
    #[error("kernel dataplane operation failed: {0}")]
    DataplaneFailure(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl MagicError {
    /// Map to the wire-level `(Result-Code, MAGIC-Status-Code)` pair.
    pub fn to_wire(&self) -> (ResultCode, MagicStatus) {
        match self {
            MagicError::MissingAvp(_) => (ResultCode::MissingAvp, MagicStatus::MissingAvp),
            MagicError::InvalidAvpValue(_) => {
                (ResultCode::InvalidAvpValue, MagicStatus::IllegalParameter)
            }
            MagicError::UnknownSession(_) => {
                (ResultCode::UnknownSessionId, MagicStatus::UnknownSession)
            }
            MagicError::AuthenticationFailed => (
                ResultCode::AuthenticationRejected,
                MagicStatus::AuthenticationFailed,
            ),
            MagicError::ProfileDoesNotExist(_) => (
                ResultCode::InvalidAvpValue,
                MagicStatus::ProfileDoesNotExist,
            ),
            MagicError::TftInvalid(_) => (ResultCode::InvalidAvpValue, MagicStatus::TftInvalid),
            MagicError::NaptInvalid(_) => (ResultCode::InvalidAvpValue, MagicStatus::NaptInvalid),
            MagicError::NoFreeBandwidth => {
                (ResultCode::UnableToComply, MagicStatus::NoFreeBandwidth)
            }
            MagicError::IllegalFlightPhase => {
                (ResultCode::UnableToComply, MagicStatus::IllegalFlightPhase)
            }
            MagicError::AccountingInvalidCdrId(_) => (
                ResultCode::InvalidAvpValue,
                MagicStatus::AccountingInvalidCdrId,
            ),
            MagicError::DataplaneFailure(_) => {
                (ResultCode::UnableToComply, MagicStatus::MagicFailure)
            }
            MagicError::Internal(_) => (ResultCode::UnableToComply, MagicStatus::MagicFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_equivalent_maps_to_unable_to_comply() {
        let e = MagicError::Internal("handler panicked".into());
        let (rc, ms) = e.to_wire();
        assert_eq!(rc, ResultCode::UnableToComply);
        assert_eq!(ms, MagicStatus::MagicFailure);
    }

    #[test]
    fn tft_invalid_maps_correctly() {
        let e = MagicError::TftInvalid("dst port out of whitelist range".into());
        let (rc, ms) = e.to_wire();
        assert_eq!(rc, ResultCode::InvalidAvpValue);
        assert_eq!(ms, MagicStatus::TftInvalid);
    }
}
