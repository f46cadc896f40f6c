use std::fmt::{Debug, Display, Formatter};

/// Raw GATT status code reported by the platform for a failed operation.
///
/// Values in the ATT error range are decoded by [`GattStatus::att`]. Anything
/// else is a vendor or stack-specific code (e.g. Android's `GATT_ERROR` 0x85)
/// and is carried through unchanged.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct GattStatus(pub u8);

impl GattStatus {
    /// Generic failure reported by stacks that do not expose a reason.
    pub const FAILURE: Self = Self(0x85);

    /// Returns the decoded ATT error code, if the status is one.
    #[inline]
    #[must_use]
    pub fn att(self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.0).ok()
    }
}

impl From<ErrorCode> for GattStatus {
    #[inline]
    fn from(c: ErrorCode) -> Self {
        Self(c.into())
    }
}

impl Debug for GattStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.att() {
            Some(c) => write!(f, "{:#04X} ({c:?})", self.0),
            None => write!(f, "{:#04X}", self.0),
        }
    }
}

impl Display for GattStatus {
    #[inline(always)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

/// ATT and Common Profile and Service error codes
/// ([Vol 3] Part F, Section 3.4.1.1 and \[CSS\] Part B, Section 1.2).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    thiserror::Error,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// The attribute handle given was not valid on this server.
    #[error("invalid handle")]
    InvalidHandle = 0x01,
    /// The attribute cannot be read.
    #[error("read not permitted")]
    ReadNotPermitted = 0x02,
    /// The attribute cannot be written.
    #[error("write not permitted")]
    WriteNotPermitted = 0x03,
    /// The attribute PDU was invalid.
    #[error("invalid PDU")]
    InvalidPdu = 0x04,
    /// The attribute requires authentication before it can be read or written.
    #[error("insufficient authentication")]
    InsufficientAuthentication = 0x05,
    /// ATT Server does not support the request received from the client.
    #[error("request not supported")]
    RequestNotSupported = 0x06,
    /// Offset specified was past the end of the attribute.
    #[error("invalid offset")]
    InvalidOffset = 0x07,
    /// The attribute requires authorization before it can be read or written.
    #[error("insufficient authorization")]
    InsufficientAuthorization = 0x08,
    /// Too many prepare writes have been queued.
    #[error("prepare queue full")]
    PrepareQueueFull = 0x09,
    /// No attribute found within the given attribute handle range.
    #[error("attribute not found")]
    AttributeNotFound = 0x0A,
    /// The attribute cannot be read using the ATT_READ_BLOB_REQ PDU.
    #[error("attribute not long")]
    AttributeNotLong = 0x0B,
    /// The Encryption Key Size used for encrypting this link is too short.
    #[error("encryption key size too short")]
    EncryptionKeySizeTooShort = 0x0C,
    /// The attribute value length is invalid for the operation.
    #[error("invalid attribute value length")]
    InvalidAttributeValueLength = 0x0D,
    /// The attribute request that was requested has encountered an error that
    /// was unlikely, and therefore could not be completed as requested.
    #[error("unlikely error")]
    UnlikelyError = 0x0E,
    /// The attribute requires encryption before it can be read or written.
    #[error("insufficient encryption")]
    InsufficientEncryption = 0x0F,
    /// The attribute type is not a supported grouping attribute as defined by a
    /// higher layer specification.
    #[error("unsupported group type")]
    UnsupportedGroupType = 0x10,
    /// Insufficient Resources to complete the request.
    #[error("insufficient resources")]
    InsufficientResources = 0x11,
    /// The server requests the client to rediscover the database.
    #[error("database out of sync")]
    DatabaseOutOfSync = 0x12,
    /// The attribute parameter value was not allowed.
    #[error("value not allowed")]
    ValueNotAllowed = 0x13,
    /// Write operation cannot be fulfilled for reasons other than permissions.
    #[error("write request rejected")]
    WriteRequestRejected = 0xFC,
    /// Client Characteristic Configuration descriptor is not configured
    /// according to the requirements of the profile or service.
    #[error("CCCD improperly configured")]
    CccdImproperlyConfigured = 0xFD,
    /// Request cannot be serviced because an operation that has been previously
    /// triggered is still in progress.
    #[error("procedure already in progress")]
    ProcedureAlreadyInProgress = 0xFE,
    /// Attribute value is out of range.
    #[error("out of range")]
    OutOfRange = 0xFF,
}
