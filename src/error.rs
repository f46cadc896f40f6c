use std::fmt::{Display, Formatter};

use crate::{DeviceId, GattStatus, Uuid};

/// Common engine result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by every engine operation.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("device {0} is not connected")]
    DeviceNotConnected(DeviceId),
    #[error("device {0} is already connected")]
    DeviceAlreadyConnected(DeviceId),
    #[error("device {0} was disconnected")]
    DeviceDisconnected(DeviceId),
    #[error("services of device {0} not discovered")]
    ServicesNotDiscovered(DeviceId),
    #[error("characteristics of service {0} not discovered")]
    CharacteristicsNotDiscovered(Uuid),
    #[error("descriptors of characteristic {0} not discovered")]
    DescriptorsNotDiscovered(Uuid),
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("descriptor {0} not found")]
    DescriptorNotFound(Uuid),
    #[error("service {0} was invalidated")]
    ServiceInvalidated(Uuid),
    #[error("{op} failed with status {status}")]
    OperationFailed { op: OpKind, status: GattStatus },
    #[error("{op} rejected by the radio adapter: {reason}")]
    OperationStartFailed { op: OpKind, reason: String },
    #[error("{op} is not permitted by the properties of {uuid}")]
    NotPermitted { op: OpKind, uuid: Uuid },
    #[error("descriptor {0} cannot be written directly")]
    DescriptorWriteNotAllowed(Uuid),
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("{0} timed out")]
    OperationTimedOut(OpKind),
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifiers(String),
    #[error("bluetooth is powered off")]
    BluetoothPoweredOff,
    #[error("bluetooth use is not authorized")]
    BluetoothUnauthorized,
    #[error("bluetooth LE is not supported")]
    BluetoothUnsupported,
    #[error("bluetooth is resetting")]
    BluetoothResetting,
    #[error("bluetooth is in an unknown state")]
    BluetoothInUnknownState,
}

impl Error {
    /// Returns the stable numeric error code used when marshalling errors
    /// across a process boundary.
    #[must_use]
    pub const fn code(&self) -> u16 {
        use Error::*;
        match *self {
            OperationCancelled => 2,
            OperationTimedOut(_) => 3,
            OperationStartFailed { .. } => 4,
            InvalidIdentifiers(_) => 5,
            BluetoothUnsupported => 100,
            BluetoothUnauthorized => 101,
            BluetoothPoweredOff => 102,
            BluetoothInUnknownState => 103,
            BluetoothResetting => 104,
            DeviceDisconnected(_) => 201,
            DeviceAlreadyConnected(_) => 203,
            DeviceNotFound(_) => 204,
            DeviceNotConnected(_) => 205,
            ServiceNotFound(_) | ServiceInvalidated(_) => 302,
            ServicesNotDiscovered(_) => 303,
            CharacteristicNotFound(_) => 404,
            CharacteristicsNotDiscovered(_) => 405,
            DescriptorNotFound(_) => 503,
            DescriptorsNotDiscovered(_) => 504,
            DescriptorWriteNotAllowed(_) => 506,
            OperationFailed { op, .. } | NotPermitted { op, .. } => op.failure_code(),
        }
    }

    /// Returns the platform status code for [`Error::OperationFailed`].
    #[inline]
    #[must_use]
    pub const fn status(&self) -> Option<GattStatus> {
        match *self {
            Self::OperationFailed { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Returns whether the error was caused by the operation being superseded
    /// or cancelled rather than by a failure.
    #[inline]
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(*self, Self::OperationCancelled)
    }
}

/// Kind of operation issued to the radio adapter.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize)]
#[non_exhaustive]
pub enum OpKind {
    StartScan,
    StopScan,
    Connect,
    Disconnect,
    DiscoverServices,
    DiscoverIncludedServices,
    DiscoverCharacteristics,
    DiscoverDescriptors,
    ReadCharacteristic,
    WriteCharacteristic,
    SetNotify,
    ReadDescriptor,
    WriteDescriptor,
    ReadRssi,
    RequestMtu,
}

impl OpKind {
    /// Returns the error code reported when an operation of this kind fails.
    #[must_use]
    pub const fn failure_code(self) -> u16 {
        use OpKind::*;
        match self {
            StartScan | StopScan => 600,
            Connect => 200,
            Disconnect => 201,
            ReadRssi => 202,
            RequestMtu => 206,
            DiscoverServices => 300,
            DiscoverIncludedServices => 301,
            DiscoverCharacteristics => 400,
            WriteCharacteristic => 401,
            ReadCharacteristic => 402,
            SetNotify => 403,
            DiscoverDescriptors => 500,
            WriteDescriptor => 501,
            ReadDescriptor => 502,
        }
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use OpKind::*;
        f.write_str(match *self {
            StartScan => "scan start",
            StopScan => "scan stop",
            Connect => "connect",
            Disconnect => "disconnect",
            DiscoverServices => "service discovery",
            DiscoverIncludedServices => "included service discovery",
            DiscoverCharacteristics => "characteristic discovery",
            DiscoverDescriptors => "descriptor discovery",
            ReadCharacteristic => "characteristic read",
            WriteCharacteristic => "characteristic write",
            SetNotify => "notification toggle",
            ReadDescriptor => "descriptor read",
            WriteDescriptor => "descriptor write",
            ReadRssi => "RSSI read",
            RequestMtu => "MTU request",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        let id = DeviceId::new("AA:BB").unwrap();
        assert_eq!(Error::DeviceNotConnected(id.clone()).code(), 205);
        assert_eq!(Error::DeviceDisconnected(id).code(), 201);
        assert_eq!(Error::OperationCancelled.code(), 2);
        assert_eq!(Error::OperationTimedOut(OpKind::ReadCharacteristic).code(), 3);
        let e = Error::OperationFailed {
            op: OpKind::ReadCharacteristic,
            status: GattStatus(0x02),
        };
        assert_eq!(e.code(), 402);
        assert_eq!(e.status(), Some(GattStatus(0x02)));
        assert_eq!(
            e.to_string(),
            "characteristic read failed with status 0x02 (ReadNotPermitted)"
        );
        assert!(Error::OperationCancelled.is_cancelled());
    }
}
