//! Interface to the platform radio stack.
//!
//! Every [`Radio`] primitive is fire-and-forget: `Ok(())` only means that the
//! request was accepted locally. Results are delivered later as
//! [`RadioEvent`]s passed to [`Central::handle`](crate::Central::handle).

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::{Error, GattStatus, Props, Result, Uuid};

/// Opaque, platform-stable peripheral identifier (a MAC address on Android,
/// a UUID on Apple platforms).
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a device identifier. Returns [`Error::InvalidIdentifiers`] if
    /// `id` is empty.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(Error::InvalidIdentifiers(id.to_owned()));
        }
        Ok(Self(Arc::from(id)))
    }

    /// Returns the identifier string.
    #[inline(always)]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for DeviceId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl Display for DeviceId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for DeviceId {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Radio power and authorization state.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize)]
#[non_exhaustive]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Returns `Ok(())` if the radio is powered on or the error describing why
    /// it cannot be used.
    pub const fn check(self) -> Result<()> {
        match self {
            Self::PoweredOn => Ok(()),
            Self::PoweredOff => Err(Error::BluetoothPoweredOff),
            Self::Unauthorized => Err(Error::BluetoothUnauthorized),
            Self::Unsupported => Err(Error::BluetoothUnsupported),
            Self::Resetting => Err(Error::BluetoothResetting),
            Self::Unknown => Err(Error::BluetoothInUnknownState),
        }
    }

    /// Returns whether the radio may still become usable without user
    /// intervention in the platform settings.
    #[inline]
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Unknown | Self::Resetting | Self::PoweredOff)
    }
}

/// Scan duty cycle hint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ScanMode {
    Opportunistic,
    #[default]
    LowPower,
    Balanced,
    LowLatency,
}

/// Scan request parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Only report peripherals advertising at least one of these services.
    pub services: Vec<Uuid>,
    /// Report every advertisement rather than the first one per peripheral.
    pub allow_duplicates: bool,
    pub mode: ScanMode,
}

/// Connection request parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ConnectOptions {
    /// Overrides [`Config::connect_timeout`](crate::Config::connect_timeout).
    pub timeout: Option<std::time::Duration>,
    /// MTU to request once connected.
    pub mtu: Option<u16>,
    /// Discard the GATT cache before connecting.
    pub refresh_cache: bool,
    /// Let the platform connect whenever the peripheral becomes available.
    pub auto_connect: bool,
}

impl ConnectOptions {
    /// Returns default connection options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the MTU requested after connecting.
    #[inline]
    #[must_use]
    pub const fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Sets the connection timeout.
    #[inline]
    #[must_use]
    pub const fn timeout(mut self, t: std::time::Duration) -> Self {
        self.timeout = Some(t);
        self
    }

    /// Requests the GATT cache to be discarded before connecting.
    #[inline]
    #[must_use]
    pub const fn refresh_cache(mut self) -> Self {
        self.refresh_cache = true;
        self
    }
}

/// Characteristic write mode.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WriteKind {
    /// ATT Write Request. Acknowledged by the peripheral.
    WithResponse,
    /// ATT Write Command. Never acknowledged.
    WithoutResponse,
}

/// Advertising data reported with a sighting.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub tx_power: Option<i8>,
    pub connectable: Option<bool>,
    pub service_uuids: Vec<Uuid>,
    pub service_data: BTreeMap<Uuid, Vec<u8>>,
    pub manufacturer_data: Option<Vec<u8>>,
}

/// Service reported by a discovery callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub primary: bool,
}

impl ServiceInfo {
    /// Returns a primary service description.
    #[inline]
    #[must_use]
    pub fn primary(uuid: impl Into<Uuid>) -> Self {
        Self {
            uuid: uuid.into(),
            primary: true,
        }
    }
}

/// Characteristic reported by a discovery callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub props: Props,
}

impl CharacteristicInfo {
    /// Returns a characteristic description.
    #[inline]
    #[must_use]
    pub fn new(uuid: impl Into<Uuid>, props: Props) -> Self {
        Self {
            uuid: uuid.into(),
            props,
        }
    }
}

/// Path to a characteristic.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CharPath {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharPath {
    /// Creates a characteristic path.
    #[inline]
    #[must_use]
    pub fn new(service: impl Into<Uuid>, characteristic: impl Into<Uuid>) -> Self {
        Self {
            service: service.into(),
            characteristic: characteristic.into(),
        }
    }

    /// Returns the path to a descriptor of this characteristic.
    #[inline]
    #[must_use]
    pub fn descriptor(self, uuid: impl Into<Uuid>) -> DescPath {
        DescPath {
            chr: self,
            descriptor: uuid.into(),
        }
    }
}

/// Path to a descriptor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DescPath {
    pub chr: CharPath,
    pub descriptor: Uuid,
}

/// Platform radio stack used by the engine.
///
/// Implementations must not block. They may invoke
/// [`Central::handle`](crate::Central::handle) synchronously from within a
/// primitive, since the engine never holds a lock while calling one.
pub trait Radio: Send + Sync + 'static {
    /// Platform peripheral handle.
    type Peripheral: Clone + Debug + Send + Sync + 'static;

    /// Returns the current radio state.
    fn state(&self) -> AdapterState;

    /// Resolves an identifier to a platform handle for a peripheral that has
    /// not been sighted during the current scan.
    fn resolve(&self, id: &DeviceId) -> Option<Self::Peripheral>;

    fn start_scan(&self, opts: &ScanOptions) -> Result<()>;
    fn stop_scan(&self) -> Result<()>;

    fn connect(&self, p: &Self::Peripheral, opts: &ConnectOptions) -> Result<()>;
    fn disconnect(&self, p: &Self::Peripheral) -> Result<()>;

    fn discover_services(&self, p: &Self::Peripheral, filter: &[Uuid]) -> Result<()>;
    fn discover_included_services(&self, p: &Self::Peripheral, service: Uuid) -> Result<()>;
    fn discover_characteristics(
        &self,
        p: &Self::Peripheral,
        service: Uuid,
        filter: &[Uuid],
    ) -> Result<()>;
    fn discover_descriptors(&self, p: &Self::Peripheral, chr: CharPath) -> Result<()>;

    fn read_characteristic(&self, p: &Self::Peripheral, chr: CharPath) -> Result<()>;
    fn write_characteristic(
        &self,
        p: &Self::Peripheral,
        chr: CharPath,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<()>;
    fn set_notify(&self, p: &Self::Peripheral, chr: CharPath, enable: bool) -> Result<()>;

    fn read_descriptor(&self, p: &Self::Peripheral, desc: DescPath) -> Result<()>;
    fn write_descriptor(&self, p: &Self::Peripheral, desc: DescPath, value: &[u8]) -> Result<()>;

    fn read_rssi(&self, p: &Self::Peripheral) -> Result<()>;
    fn request_mtu(&self, p: &Self::Peripheral, mtu: u16) -> Result<()>;
}

/// Callback delivered by the platform radio stack.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RadioEvent<P> {
    AdapterStateChanged(AdapterState),
    Discovered {
        id: DeviceId,
        peripheral: P,
        name: Option<String>,
        rssi: i16,
        adv: AdvertisementData,
    },
    ScanFailed(GattStatus),
    Connected(DeviceId),
    ConnectionFailed {
        id: DeviceId,
        status: GattStatus,
    },
    /// Connection closed, either on request or by the platform.
    Disconnected {
        id: DeviceId,
        status: Option<GattStatus>,
    },
    ServicesDiscovered {
        id: DeviceId,
        result: std::result::Result<Vec<ServiceInfo>, GattStatus>,
    },
    IncludedServicesDiscovered {
        id: DeviceId,
        service: Uuid,
        result: std::result::Result<Vec<ServiceInfo>, GattStatus>,
    },
    CharacteristicsDiscovered {
        id: DeviceId,
        service: Uuid,
        result: std::result::Result<Vec<CharacteristicInfo>, GattStatus>,
    },
    DescriptorsDiscovered {
        id: DeviceId,
        chr: CharPath,
        result: std::result::Result<Vec<Uuid>, GattStatus>,
    },
    /// Response to a characteristic read request.
    CharacteristicRead {
        id: DeviceId,
        chr: CharPath,
        result: std::result::Result<Vec<u8>, GattStatus>,
    },
    /// Notification or indication.
    CharacteristicChanged {
        id: DeviceId,
        chr: CharPath,
        value: Vec<u8>,
    },
    CharacteristicWritten {
        id: DeviceId,
        chr: CharPath,
        result: std::result::Result<(), GattStatus>,
    },
    NotifyStateChanged {
        id: DeviceId,
        chr: CharPath,
        result: std::result::Result<bool, GattStatus>,
    },
    DescriptorRead {
        id: DeviceId,
        desc: DescPath,
        result: std::result::Result<Vec<u8>, GattStatus>,
    },
    DescriptorWritten {
        id: DeviceId,
        desc: DescPath,
        result: std::result::Result<(), GattStatus>,
    },
    /// The peripheral removed or changed the listed services.
    ServicesInvalidated {
        id: DeviceId,
        services: Vec<Uuid>,
    },
    RssiRead {
        id: DeviceId,
        result: std::result::Result<i16, GattStatus>,
    },
    MtuChanged {
        id: DeviceId,
        result: std::result::Result<u16, GattStatus>,
    },
}

impl<P> RadioEvent<P> {
    /// Returns the peripheral the event refers to.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceId> {
        use RadioEvent::*;
        match *self {
            AdapterStateChanged(_) | ScanFailed(_) => None,
            Connected(ref id)
            | Discovered { ref id, .. }
            | ConnectionFailed { ref id, .. }
            | Disconnected { ref id, .. }
            | ServicesDiscovered { ref id, .. }
            | IncludedServicesDiscovered { ref id, .. }
            | CharacteristicsDiscovered { ref id, .. }
            | DescriptorsDiscovered { ref id, .. }
            | CharacteristicRead { ref id, .. }
            | CharacteristicChanged { ref id, .. }
            | CharacteristicWritten { ref id, .. }
            | NotifyStateChanged { ref id, .. }
            | DescriptorRead { ref id, .. }
            | DescriptorWritten { ref id, .. }
            | ServicesInvalidated { ref id, .. }
            | RssiRead { ref id, .. }
            | MtuChanged { ref id, .. } => Some(id),
        }
    }
}
