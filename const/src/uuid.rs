use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::num::{NonZeroU128, NonZeroU16};
use std::str::FromStr;

use structbuf::Unpack;

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_16: u128 = !((u16::MAX as u128) << SHIFT);
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID ([Vol 3] Part B, Section 2.5.1).
///
/// Short-form UUIDs are always stored expanded against the Bluetooth base
/// UUID, so `0x180D`, `0x0000180D`, and `0000180d-0000-1000-8000-00805f9b34fb`
/// are the same value and hash identically.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid(NonZeroU128);

impl Uuid {
    /// UUID size in bytes.
    pub const BYTES: usize = std::mem::size_of::<Self>();
    /// Bluetooth base UUID.
    pub const BASE: Self = Self(
        // SAFETY: Non-zero
        unsafe { NonZeroU128::new_unchecked(BASE) },
    );

    /// Creates a UUID from a `u128`.
    #[inline]
    #[must_use]
    pub const fn new(v: u128) -> Option<Self> {
        match NonZeroU128::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Expands a 16-bit short-form UUID against the Bluetooth base UUID.
    #[inline]
    #[must_use]
    pub const fn from_u16(v: u16) -> Self {
        Self::from_u32(v as u32)
    }

    /// Expands a 32-bit short-form UUID against the Bluetooth base UUID.
    #[inline]
    #[must_use]
    pub const fn from_u32(v: u32) -> Self {
        // SAFETY: BASE is non-zero
        Self(unsafe { NonZeroU128::new_unchecked((v as u128) << SHIFT | BASE) })
    }

    /// Returns a [`Uuid16`] representation or [`None`] if the UUID is not an
    /// assigned 16-bit UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid16(self) -> Option<Uuid16> {
        self.as_u16().and_then(Uuid16::new)
    }

    /// Converts an assigned 16-bit Bluetooth SIG UUID to `u16`. This is
    /// mutually exclusive with `as_u32` and `as_u128`.
    #[inline]
    #[must_use]
    pub fn as_u16(self) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        let v = (self.0.get() >> SHIFT) as u16;
        (self.0.get() & MASK_16 == BASE && v > 0).then_some(v)
    }

    /// Converts an assigned 32-bit Bluetooth SIG UUID to `u32`. This is
    /// mutually exclusive with `as_u16` and `as_u128`.
    #[inline]
    #[must_use]
    pub fn as_u32(self) -> Option<u32> {
        let v = (self.0.get() >> SHIFT) as u32;
        (self.0.get() & MASK_32 == BASE && v > u32::from(u16::MAX)).then_some(v)
    }

    /// Converts an unassigned UUID to `u128`. This is mutually exclusive with
    /// `as_u16` and `as_u32`.
    #[inline]
    #[must_use]
    pub fn as_u128(self) -> Option<u128> {
        (self.0.get() & MASK_32 != BASE).then_some(self.0.get())
    }

    /// Returns the full 128-bit value.
    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> u128 {
        self.0.get()
    }

    /// Returns the UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; Self::BYTES] {
        self.0.get().to_le_bytes()
    }
}

impl From<Uuid16> for Uuid {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.as_uuid()
    }
}

impl From<Uuid> for u128 {
    #[inline]
    fn from(u: Uuid) -> Self {
        u.0.get()
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = ParseUuidError;

    /// Decodes a little-endian 2-, 4-, or 16-byte UUID.
    #[inline]
    fn try_from(v: &[u8]) -> Result<Self, Self::Error> {
        match v.len() {
            Self::BYTES => Self::new(v.unpack().u128()).ok_or(ParseUuidError::Nil),
            4 => Ok(Self::from_u32(v.unpack().u32())),
            Uuid16::BYTES => Ok(Self::from_u16(v.unpack().u16())),
            n => Err(ParseUuidError::Length(n)),
        }
    }
}

impl FromStr for Uuid {
    type Err = ParseUuidError;

    /// Parses a 4- or 8-digit short form, a 32-digit undelimited form, or the
    /// 36-character hyphenated form. Hex digits are case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hex = |s: &str| {
            if s.bytes().all(|b| b.is_ascii_hexdigit()) {
                u128::from_str_radix(s, 16).map_err(|_| ParseUuidError::Digit)
            } else {
                Err(ParseUuidError::Digit)
            }
        };
        let v = match s.len() {
            4 | 8 => {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(Self::from_u32(hex(s)? as u32));
            }
            32 => hex(s)?,
            36 => {
                let b = s.as_bytes();
                if [8, 13, 18, 23].iter().any(|&i| b[i] != b'-')
                    || b.iter().filter(|&&c| c == b'-').count() != 4
                {
                    return Err(ParseUuidError::Format);
                }
                let mut v = 0;
                for group in s.split('-') {
                    v = v << (group.len() * 4) | hex(group)?;
                }
                v
            }
            n => return Err(ParseUuidError::Length(n)),
        };
        Self::new(v).ok_or(ParseUuidError::Nil)
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(v) = self.as_u16() {
            write!(f, "{v:#06X}")
        } else if let Some(v) = self.as_u32() {
            write!(f, "{v:#010X}")
        } else {
            let v = self.0.get();
            write!(f, "{}", Hyphenated(v, true))
        }
    }
}

impl Display for Uuid {
    /// Always emits the canonical lowercase 128-bit form.
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&Hyphenated(self.0.get(), false), f)
    }
}

impl serde::Serialize for Uuid {
    #[inline]
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Uuid {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

struct Hyphenated(u128, bool);

impl Display for Hyphenated {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let v = self.0;
        let (a, b, c, d, e) = (
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            (v & ((1 << 48) - 1)) as u64,
        );
        if self.1 {
            write!(f, "{a:08X}-{b:04X}-{c:04X}-{d:04X}-{e:012X}")
        } else {
            write!(f, "{a:08x}-{b:04x}-{c:04x}-{d:04x}-{e:012x}")
        }
    }
}

/// Error returned when a UUID string or byte slice cannot be decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseUuidError {
    #[error("invalid UUID length: {0}")]
    Length(usize),
    #[error("invalid hex digit in UUID")]
    Digit,
    #[error("misplaced UUID group separator")]
    Format,
    #[error("nil UUID")]
    Nil,
}

/// 16-bit Bluetooth SIG UUID.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Uuid16(NonZeroU16);

impl Uuid16 {
    /// UUID size in bytes.
    pub const BYTES: usize = std::mem::size_of::<Self>();

    /// Creates a 16-bit SIG UUID from a `u16`.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Option<Self> {
        match NonZeroU16::new(v) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns 128-bit UUID representation.
    #[inline]
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        Uuid::from_u16(self.0.get())
    }

    /// Returns the raw 16-bit UUID value.
    #[inline(always)]
    #[must_use]
    pub(crate) const fn raw(self) -> u16 {
        self.0.get()
    }
}

impl Debug for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.0.get())
    }
}

impl Display for Uuid16 {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.as_uuid(), f)
    }
}

#[allow(clippy::derived_hash_with_manual_eq)]
impl Hash for Uuid16 {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_uuid().hash(state);
    }
}

impl PartialEq<Uuid> for Uuid16 {
    #[inline(always)]
    fn eq(&self, rhs: &Uuid) -> bool {
        self.as_uuid() == *rhs
    }
}

impl From<Uuid16> for u16 {
    #[inline]
    fn from(u: Uuid16) -> Self {
        u.raw()
    }
}

/// Creates an assigned 16-bit SIG UUID from a `u16`.
#[inline]
#[must_use]
const fn uuid16(v: u16) -> Uuid16 {
    // SAFETY: All crate uses guarantee that v != 0
    Uuid16(unsafe { NonZeroU16::new_unchecked(v) })
}

/// Provides implementations for a 16-bit UUID enum.
macro_rules! uuid16_enum {
    (
        $(#[$outer:meta])*
        $vis:vis enum $typ:ident {
            $($item:ident = $uuid:literal,)+
        }
    ) => {
        $(#[$outer])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            ::num_enum::IntoPrimitive,
            ::num_enum::TryFromPrimitive,
        )]
        #[cfg_attr(test, derive(enum_iterator::Sequence))]
        #[non_exhaustive]
        #[repr(u16)]
        $vis enum $typ {
            $($item = $uuid,)+
        }

        impl $typ {
            ::paste::paste! {$(
                pub const [<$item:snake:upper>]: $crate::Uuid16 = Self::$item.uuid16();
            )+}

            /// Returns the `Uuid` representation of the variant.
            #[inline]
            #[must_use]
            pub const fn uuid(self) -> $crate::Uuid {
                self.uuid16().as_uuid()
            }

            /// Returns the `Uuid16` representation of the variant.
            #[inline(always)]
            #[must_use]
            pub const fn uuid16(self) -> $crate::Uuid16 {
                uuid16(self as _)
            }
        }

        impl ::core::fmt::Display for $typ {
            #[inline(always)]
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Debug::fmt(self, f)
            }
        }

        impl ::core::convert::TryFrom<$crate::Uuid> for $typ {
            type Error = $crate::Uuid;

            #[inline]
            fn try_from(u: $crate::Uuid) -> Result<Self, Self::Error> {
                use ::num_enum::TryFromPrimitive;
                u.as_u16()
                    .and_then(|v| Self::try_from_primitive(v).ok())
                    .ok_or(u)
            }
        }

        impl ::core::cmp::PartialEq<$crate::Uuid> for $typ {
            #[inline(always)]
            fn eq(&self, rhs: &$crate::Uuid) -> bool {
                // Converting to 128-bit avoids branches
                self.uuid() == *rhs
            }
        }

        impl ::core::cmp::PartialEq<$typ> for $crate::Uuid {
            #[inline(always)]
            fn eq(&self, rhs: &$typ) -> bool {
                *self == rhs.uuid()
            }
        }

        impl ::core::convert::From<$typ> for $crate::Uuid {
            #[inline]
            fn from(v: $typ) -> Self {
                v.uuid()
            }
        }

        impl ::core::convert::From<$typ> for $crate::Uuid16 {
            #[inline]
            fn from(v: $typ) -> Self {
                v.uuid16()
            }
        }
    }
}

uuid16_enum! {
    /// GATT services referenced by the engine and its tooling
    /// ([Assigned Numbers] Section 3.4).
    pub enum Service {
        GenericAccess = 0x1800,
        GenericAttribute = 0x1801,
        DeviceInformation = 0x180A,
        HeartRate = 0x180D,
        Battery = 0x180F,
    }
}

uuid16_enum! {
    /// GATT characteristics referenced by the engine and its tooling
    /// ([Assigned Numbers] Section 3.8).
    pub enum Characteristic {
        DeviceName = 0x2A00,
        Appearance = 0x2A01,
        ServiceChanged = 0x2A05,
        BatteryLevel = 0x2A19,
        ManufacturerNameString = 0x2A29,
        HeartRateMeasurement = 0x2A37,
        BodySensorLocation = 0x2A38,
        HeartRateControlPoint = 0x2A39,
    }
}

uuid16_enum! {
    /// GATT characteristic descriptors ([Assigned Numbers] Section 3.7).
    pub enum Descriptor {
        CharacteristicExtendedProperties = 0x2900,
        CharacteristicUserDescription = 0x2901,
        ClientCharacteristicConfiguration = 0x2902,
        ServerCharacteristicConfiguration = 0x2903,
        CharacteristicPresentationFormat = 0x2904,
        CharacteristicAggregateFormat = 0x2905,
    }
}
