//! Generic Attribute Profile hierarchy cache ([Vol 3] Part G).
//!
//! Each session owns one [`Cache`]. Services, characteristics, and
//! descriptors live in flat tables indexed by stable keys; children refer to
//! their parent by key. The platform's own GATT objects are never retained.

use bitflags::bitflags;

pub(crate) use cache::*;

use crate::{DeviceId, Uuid};

mod cache;

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    #[repr(transparent)]
    pub struct Props: u8 {
        /// Permits broadcasts of the Characteristic Value using Server
        /// Characteristic Configuration Descriptor.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permits writes of the Characteristic Value without response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        const INDICATE = 0x20;
        /// Permits signed writes to the Characteristic Value.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// Additional characteristic properties are defined in the
        /// Characteristic Extended Properties descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl Props {
    /// Returns whether the characteristic supports notifications or
    /// indications.
    #[inline]
    #[must_use]
    pub const fn can_notify(self) -> bool {
        self.intersects(Self::NOTIFY.union(Self::INDICATE))
    }
}

/// Service snapshot.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Service {
    pub device: DeviceId,
    pub uuid: Uuid,
    pub primary: bool,
    /// Including service for included services.
    pub included_by: Option<Uuid>,
}

/// Characteristic snapshot.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Characteristic {
    pub device: DeviceId,
    pub service: Uuid,
    pub uuid: Uuid,
    pub props: Props,
    pub notifying: bool,
    /// Last value read, written, or notified.
    pub value: Option<Vec<u8>>,
}

/// Descriptor snapshot.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct Descriptor {
    pub device: DeviceId,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub uuid: Uuid,
    pub value: Option<Vec<u8>>,
}
