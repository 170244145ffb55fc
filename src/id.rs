// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Identifiers
//!
//! Every flat and record in a tweak database is addressed by a [`TweakId`]: a fixed-width key
//! derived from the entry's full name. Two entries with the same name always map to the same id,
//! which is what lets changesets built from unrelated sources refer to each other without ever
//! exchanging names.
//!
//! The id does not remember the name it was derived from. Human readable names are tracked
//! separately (see [`Changeset::register_name`](crate::Changeset::register_name)) and only used
//! for diagnostics.
use std::fmt;

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ CRC32_POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Feeds `bytes` into a finished checksum, as if they had been part of its input.
const fn crc32_continue(hash: u32, bytes: &[u8]) -> u32 {
    let mut crc = !hash;
    let mut i = 0;
    while i < bytes.len() {
        crc = CRC32_TABLE[((crc ^ bytes[i] as u32) & 0xFF) as usize] ^ (crc >> 8);
        i += 1;
    }
    !crc
}

const fn crc32(bytes: &[u8]) -> u32 {
    crc32_continue(0, bytes)
}

const fn saturated_length(bytes: &[u8]) -> u8 {
    if bytes.len() > u8::MAX as usize {
        u8::MAX
    } else {
        bytes.len() as u8
    }
}

/// Content-addressed identifier of a flat or record.
///
/// The zero value is reserved and never valid; it is what [`TweakId::default`] returns and is
/// used wherever an id is optional (for example, the source of a record that is created rather
/// than cloned).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Deserialize, ::serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct TweakId {
    /// ```text
    ///  0       24        32                      64
    /// +---------+--------+-----------------------+
    /// | unused  | length |       name hash       |
    /// +---------+--------+-----------------------+
    /// ```
    ///
    /// - name hash: CRC-32 of the full name
    /// - length: byte length of the name, saturated at 255
    ///
    /// Note, bit 0 is the most significant bit in the diagram above.
    bits: u64,
}

impl TweakId {
    /// The reserved invalid id.
    pub const INVALID: Self = Self { bits: 0 };

    /// Derives the id of the entry called `name`.
    ///
    /// ```rust
    /// # use tweakset::TweakId;
    /// let id = TweakId::from_name("Items.Preset_Base");
    /// assert!(id.is_valid());
    /// assert_eq!(id.length(), 17);
    /// assert_eq!(id, TweakId::from("Items.Preset_Base"));
    /// ```
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        Self::from_parts(crc32(bytes), saturated_length(bytes))
    }

    /// Derives the id of the entry whose name is this id's name followed by `suffix`, without
    /// knowing this id's name.
    ///
    /// This is how the flats of a record are addressed.
    ///
    /// ```rust
    /// # use tweakset::TweakId;
    /// let record = TweakId::from_name("Items.Jacket");
    /// assert_eq!(record.with_suffix(".tags"), TweakId::from_name("Items.Jacket.tags"));
    /// ```
    pub const fn with_suffix(self, suffix: &str) -> Self {
        let bytes = suffix.as_bytes();
        Self::from_parts(
            crc32_continue(self.hash(), bytes),
            self.length().saturating_add(saturated_length(bytes)),
        )
    }

    /// Assembles an id from an already computed name hash and name length.
    pub const fn from_parts(hash: u32, length: u8) -> Self {
        Self {
            bits: hash as u64 | ((length as u64) << 32),
        }
    }

    /// Reconstructs an id from its raw representation, discarding unused bits.
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            bits: bits & 0xFF_FFFF_FFFF,
        }
    }

    pub const fn to_bits(self) -> u64 {
        self.bits
    }

    /// CRC-32 of the entry name.
    pub const fn hash(self) -> u32 {
        self.bits as u32
    }

    /// Byte length of the entry name, saturated at 255.
    pub const fn length(self) -> u8 {
        (self.bits >> 32) as u8
    }

    pub const fn is_valid(self) -> bool {
        self.bits != 0
    }
}

impl From<&str> for TweakId {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

/// Renders the raw components, since the name itself is not recoverable.
impl fmt::Debug for TweakId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TDBID:{:08X}:{:02X}>", self.hash(), self.length())
    }
}

impl fmt::Display for TweakId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(any(test, feature = "arbitrary"))]
impl quickcheck::Arbitrary for TweakId {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self::from_parts(u32::arbitrary(g), u8::arbitrary(g))
    }
}
