use std::collections::BTreeMap;
use std::fmt;

use log::trace;
use serde::{Deserialize, Serialize};
use thiserror;

use crate::value::HexValue;

/// Default storage unit size in bytes.
pub const DEFAULT_UNIT_SIZE: usize = 8;

/// Largest storage unit the overlay supports. The validity mask holds one bit per byte.
pub const MAX_UNIT_SIZE: usize = u8::BITS as usize;

/// Memory result type
pub type Result<T> = std::result::Result<T, Error>;

/// Possible overlay errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// At least one requested byte has no concrete value. Either it is tracked by the overlay and
    /// marked invalid, or it is not tracked and the live memory cannot supply it.
    #[error("value not available at {address:#018x} ({size} byte(s))")]
    Unavailable { address: u64, size: usize },

    /// The arguments provided for a given request are invalid
    #[error("arguments provided are not valid: {0}")]
    InvalidArguments(String),
}

/// Read-only image of the inferior's memory, such as a live process or a core file.
pub trait LiveMemory {
    /// Read `size` bytes starting at `address`.
    fn read_bytes(&self, address: u64, size: usize) -> std::result::Result<Vec<u8>, String>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct StorageUnit {
    /// Bit `i` set means byte `i` of the unit holds a materialized value.
    validity: u8,
    /// Little-endian packed bytes. Only bytes marked valid are meaningful.
    value: u64,
}

impl StorageUnit {
    fn byte(&self, index: usize) -> Option<u8> {
        if self.validity & (1 << index) != 0 {
            Some((self.value >> (8 * index)) as u8)
        } else {
            None
        }
    }

    fn set_byte(&mut self, index: usize, byte: u8) {
        let shift = 8 * index;
        self.value = (self.value & !(0xffu64 << shift)) | (u64::from(byte) << shift);
        self.validity |= 1 << index;
    }
}

/// Portion of a request that falls inside a single storage unit.
#[derive(Copy, Clone, Debug)]
struct Segment {
    /// Aligned address of the storage unit
    unit: u64,
    /// Offset of the first byte within the unit
    offset: usize,
    /// Number of bytes within the unit
    len: usize,
    /// Offset of the first byte within the request
    start: usize,
}

impl Segment {
    fn mask(&self) -> u8 {
        (((1u16 << self.len) - 1) << self.offset) as u8
    }
}

/// Serializable view of a single byte tracked by the overlay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayByte {
    pub address: u64,
    pub value: Option<u8>,
}

/// Shadow memory recording which bytes have had their value reconstructed.
///
/// Storage is kept per aligned unit with a validity bit per byte. Bytes that are not tracked at
/// all are read from the [LiveMemory] given at construction. A tracked byte marked invalid is
/// never read from anywhere: reads covering it fail with [Error::Unavailable].
pub struct ByteOverlay<'a> {
    units: BTreeMap<u64, StorageUnit>,
    unit_size: usize,
    live: Option<&'a dyn LiveMemory>,
}

impl<'a> ByteOverlay<'a> {
    /// Create an overlay with the given storage unit size. The size must be in `1..=8`.
    pub fn new(unit_size: usize, live: Option<&'a dyn LiveMemory>) -> Result<Self> {
        if unit_size == 0 || unit_size > MAX_UNIT_SIZE {
            return Err(Error::InvalidArguments(format!(
                "unit size must be between 1 and {MAX_UNIT_SIZE}, got {unit_size}"
            )));
        }

        Ok(Self {
            units: Default::default(),
            unit_size,
            live,
        })
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Number of storage units currently tracked.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Whether the storage unit containing `address` is tracked.
    pub fn is_tracked(&self, address: u64) -> bool {
        self.units.contains_key(&self.align(address))
    }

    /// Validity mask of the storage unit containing `address`, if it is tracked.
    pub fn validity(&self, address: u64) -> Option<u8> {
        self.units.get(&self.align(address)).map(|unit| unit.validity)
    }

    fn align(&self, address: u64) -> u64 {
        address - address % self.unit_size as u64
    }

    fn segments(&self, address: u64, size: usize) -> Result<Vec<Segment>> {
        let overflows = u64::try_from(size)
            .ok()
            .and_then(|size| address.checked_add(size.saturating_sub(1)))
            .is_none();

        if overflows {
            return Err(Error::InvalidArguments(format!(
                "access of {size} byte(s) overflows address {address:#x}"
            )));
        }

        let mut segments = Vec::new();
        let mut start = 0;
        while start < size {
            let current = address + start as u64;
            let offset = (current % self.unit_size as u64) as usize;
            let len = (self.unit_size - offset).min(size - start);
            segments.push(Segment {
                unit: current - offset as u64,
                offset,
                len,
                start,
            });
            start += len;
        }

        Ok(segments)
    }

    fn read_live(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        let live = self.live?;
        match live.read_bytes(address, size) {
            Ok(bytes) if bytes.len() == size => Some(bytes),
            Ok(bytes) => {
                trace!(
                    "live memory returned {actual} of {size} byte(s) at {address:#018x}",
                    actual = bytes.len()
                );
                None
            }
            Err(err) => {
                trace!("live memory read at {address:#018x} failed: {err}");
                None
            }
        }
    }

    /// Build a new storage unit, filling every byte outside `exclude` from live memory when it
    /// can be read. Bytes that cannot be read stay invalid.
    fn materialize(&self, unit_address: u64, exclude: u8) -> StorageUnit {
        let mut unit = StorageUnit::default();
        if self.live.is_none() {
            return unit;
        }

        let whole_unit = unit_address
            .checked_add(self.unit_size as u64 - 1)
            .and_then(|_| self.read_live(unit_address, self.unit_size));

        if let Some(bytes) = whole_unit {
            for (i, byte) in bytes.into_iter().enumerate() {
                if exclude & (1 << i) == 0 {
                    unit.set_byte(i, byte);
                }
            }
            return unit;
        }

        // The unit may straddle the edge of a mapping, so try byte by byte
        for i in (0..self.unit_size).filter(|i| exclude & (1 << i) == 0) {
            // Bytes of the last unit may lie beyond the end of the address space
            let Some(address) = unit_address.checked_add(i as u64) else {
                break;
            };

            if let Some(bytes) = self.read_live(address, 1) {
                unit.set_byte(i, bytes[0]);
            }
        }

        unit
    }

    /// Read `size` bytes starting at `address` as a little-endian unsigned integer.
    ///
    /// The size must not exceed the unit size. Bytes of tracked units come from the overlay and
    /// must all be valid. Bytes of untracked units come from live memory.
    pub fn read_unsigned(&self, address: u64, size: usize) -> Result<u64> {
        if size == 0 || size > self.unit_size {
            return Err(Error::InvalidArguments(format!(
                "read size must be between 1 and {unit_size}, got {size}",
                unit_size = self.unit_size
            )));
        }

        let mut bytes = vec![0u8; size];
        for segment in self.segments(address, size)? {
            let target = &mut bytes[segment.start..segment.start + segment.len];
            match self.units.get(&segment.unit) {
                Some(unit) => {
                    let mask = segment.mask();
                    if unit.validity & mask != mask {
                        trace!("addressing invalid location {address:#018x}, byte size {size}");
                        return Err(Error::Unavailable { address, size });
                    }

                    for (i, byte) in target.iter_mut().enumerate() {
                        *byte = (unit.value >> (8 * (segment.offset + i))) as u8;
                    }
                }
                None => {
                    let live = self
                        .read_live(segment.unit + segment.offset as u64, segment.len)
                        .ok_or(Error::Unavailable { address, size })?;
                    target.copy_from_slice(&live);
                }
            }
        }

        let value = HexValue::from_le_bytes(&bytes).value();

        trace!("addressing valid location {address:#018x}: {value:#x}, byte size {size}");
        Ok(value)
    }

    /// Record `bytes` as the known content starting at `address`.
    ///
    /// Units touched for the first time have their remaining bytes pulled from live memory so a
    /// later read of a neighbouring byte does not fail.
    pub fn write(&mut self, address: u64, bytes: &[u8]) -> Result<()> {
        for segment in self.segments(address, bytes.len())? {
            let mask = segment.mask();
            let mut unit = match self.units.get(&segment.unit) {
                Some(unit) => *unit,
                None => self.materialize(segment.unit, mask),
            };

            for i in 0..segment.len {
                unit.set_byte(segment.offset + i, bytes[segment.start + i]);
            }
            self.units.insert(segment.unit, unit);

            trace!(
                "writing location {location:#018x}, byte size {len}",
                location = segment.unit + segment.offset as u64,
                len = segment.len
            );
        }

        Ok(())
    }

    /// Mark the `size` bytes starting at `address` as having no known value. Other bytes of the
    /// touched units keep their state.
    pub fn invalidate(&mut self, address: u64, size: usize) -> Result<()> {
        for segment in self.segments(address, size)? {
            let mask = segment.mask();
            let mut unit = match self.units.get(&segment.unit) {
                Some(unit) => *unit,
                None => self.materialize(segment.unit, mask),
            };

            unit.validity &= !mask;
            self.units.insert(segment.unit, unit);

            trace!(
                "invalidating location {location:#018x}, byte size {len}",
                location = segment.unit + segment.offset as u64,
                len = segment.len
            );
        }

        Ok(())
    }

    /// Every byte of every tracked unit, in address order.
    pub fn snapshot(&self) -> Vec<OverlayByte> {
        self.units
            .iter()
            .flat_map(|(&address, unit)| {
                (0..self.unit_size).filter_map(move |i| {
                    Some(OverlayByte {
                        address: address.checked_add(i as u64)?,
                        value: unit.byte(i),
                    })
                })
            })
            .collect()
    }

    /// Human readable listing of every tracked byte, one per line.
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ByteOverlay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.snapshot() {
            match byte.value {
                Some(value) => writeln!(f, "{:#018x}: valid:{value:#04x}", byte.address)?,
                None => writeln!(f, "{:#018x}: invalid", byte.address)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ByteOverlay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteOverlay")
            .field("unit_size", &self.unit_size)
            .field("units", &self.units)
            .field("live", &self.live.is_some())
            .finish()
    }
}
