//! Descriptor table decoding
//!
//! Firmware exposes its observable variables through a table placed in
//! flash. All fields are little-endian; offsets are relative to the table
//! base.
//!
//! ```text
//! header (16 bytes)
//!   u32 magic            0x4D434C4B ("MCLK")
//!   u32 version          major in the high half (0x0001_0000)
//!   u32 entry_count
//!   u32 entries_offset
//! entry (24 bytes, entry_count times)
//!   u32 name_offset
//!   u32 address
//!   u8  var_type
//!   u8  access_flags
//!   u8  reserved[2]
//!   u32 category_offset  0 when absent
//!   f32 min_value
//!   f32 max_value
//! strings                NUL-terminated
//! ```

use crate::error::{McuLinkError, Result};
use crate::types::{AccessMode, VarType, VariableDescriptor, ValueBounds};
use std::collections::HashSet;

/// Table magic ("MCLK")
pub const DESCRIPTOR_MAGIC: u32 = 0x4D43_4C4B;

/// Version written by current firmware
pub const DESCRIPTOR_VERSION: u32 = 0x0001_0000;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Entry size in bytes
pub const ENTRY_SIZE: usize = 24;

/// Upper bound on entries accepted from one table
pub const MAX_ENTRIES: u32 = 256;

/// Longest name or category accepted, including the terminator
pub const MAX_STRING_LEN: usize = 256;

/// Bytes requested per string read
const STRING_CHUNK: usize = 32;

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn f32_at(bytes: &[u8], offset: usize) -> f32 {
    f32::from_bits(u32_at(bytes, offset))
}

/// Decoded table header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub magic: u32,
    pub version: u32,
    pub entry_count: u32,
    pub entries_offset: u32,
}

impl DescriptorHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: u32_at(bytes, 0),
            version: u32_at(bytes, 4),
            entry_count: u32_at(bytes, 8),
            entries_offset: u32_at(bytes, 12),
        })
    }

    pub fn major_version(&self) -> u32 {
        self.version >> 16
    }
}

/// One undecoded table entry
#[derive(Debug, Clone, Copy, PartialEq)]
struct RawEntry {
    name_offset: u32,
    address: u32,
    var_type: u8,
    access_flags: u8,
    category_offset: u32,
    min_value: f32,
    max_value: f32,
}

impl RawEntry {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            name_offset: u32_at(bytes, 0),
            address: u32_at(bytes, 4),
            var_type: bytes[8],
            access_flags: bytes[9],
            category_offset: u32_at(bytes, 12),
            min_value: f32_at(bytes, 16),
            max_value: f32_at(bytes, 20),
        }
    }
}

/// Decode the table at `base`, fetching memory through `read(address, len)`.
///
/// Fails with [`McuLinkError::Discovery`] when the table is unreadable or
/// malformed. Unknown type codes are kept as [`VarType::Raw`].
pub fn decode_table<F>(base: u64, mut read: F) -> Result<Vec<VariableDescriptor>>
where
    F: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let malformed = |message: String| McuLinkError::Discovery {
        address: base,
        message,
    };
    let mut fetch = |address: u64, len: usize| -> Result<Vec<u8>> {
        let bytes = read(address, len).map_err(|e| McuLinkError::Discovery {
            address: base,
            message: format!("read of {} bytes at 0x{:08X} failed: {}", len, address, e),
        })?;
        if bytes.len() < len {
            return Err(McuLinkError::Discovery {
                address: base,
                message: format!("short read at 0x{:08X}", address),
            });
        }
        Ok(bytes)
    };

    let header_bytes = fetch(base, HEADER_SIZE)?;
    let header = DescriptorHeader::parse(&header_bytes)
        .ok_or_else(|| malformed("truncated header".to_string()))?;

    if header.magic != DESCRIPTOR_MAGIC {
        return Err(malformed(format!(
            "bad magic 0x{:08X} (expected 0x{:08X})",
            header.magic, DESCRIPTOR_MAGIC
        )));
    }
    if header.major_version() != DESCRIPTOR_VERSION >> 16 {
        return Err(malformed(format!(
            "unsupported table version 0x{:08X}",
            header.version
        )));
    }
    if header.entry_count > MAX_ENTRIES {
        return Err(malformed(format!(
            "entry count {} exceeds limit {}",
            header.entry_count, MAX_ENTRIES
        )));
    }
    if header.entry_count == 0 {
        return Ok(Vec::new());
    }

    let entries_base = base + header.entries_offset as u64;
    let table = fetch(entries_base, header.entry_count as usize * ENTRY_SIZE)?;

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(header.entry_count as usize);

    for (index, chunk) in table.chunks_exact(ENTRY_SIZE).enumerate() {
        let raw = RawEntry::parse(chunk);

        let access = AccessMode::from_flags(raw.access_flags).ok_or_else(|| {
            malformed(format!(
                "entry {} has unknown access flags 0x{:02X}",
                index, raw.access_flags
            ))
        })?;

        let name = read_string(&mut fetch, base + raw.name_offset as u64)
            .map_err(|e| e.with_context(format!("entry {} name", index)))?;
        if name.is_empty() {
            return Err(malformed(format!("entry {} has an empty name", index)));
        }

        let category = if raw.category_offset == 0 {
            None
        } else {
            let category = read_string(&mut fetch, base + raw.category_offset as u64)
                .map_err(|e| e.with_context(format!("entry {} category", index)))?;
            (!category.is_empty()).then_some(category)
        };

        let address = raw.address as u64;
        if !seen.insert(address) {
            return Err(malformed(format!(
                "duplicate variable address 0x{:08X} ({})",
                address, name
            )));
        }

        descriptors.push(VariableDescriptor {
            name,
            address,
            var_type: VarType::from_code(raw.var_type),
            access,
            category,
            bounds: ValueBounds::new(raw.min_value as f64, raw.max_value as f64),
        });
    }

    tracing::debug!(
        base = %format!("0x{:08X}", base),
        entries = descriptors.len(),
        "Decoded descriptor table"
    );

    Ok(descriptors)
}

/// Read a NUL-terminated string in chunks.
///
/// A chunk that fails or comes back short is retried at half the length, so
/// a string ending just before unreadable memory still decodes.
fn read_string<F>(fetch: &mut F, address: u64) -> Result<String>
where
    F: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let mut bytes = Vec::new();
    let mut chunk = STRING_CHUNK;
    while bytes.len() < MAX_STRING_LEN {
        let at = address + bytes.len() as u64;
        let len = chunk.min(MAX_STRING_LEN - bytes.len());
        let piece = match fetch(at, len) {
            Ok(piece) => piece,
            Err(_) if len > 1 => {
                chunk = len / 2;
                continue;
            }
            Err(e) => return Err(e),
        };
        let piece = &piece[..len];
        if let Some(end) = piece.iter().position(|&b| b == 0) {
            bytes.extend_from_slice(&piece[..end]);
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.extend_from_slice(piece);
    }
    Err(McuLinkError::Discovery {
        address,
        message: format!("unterminated string (longer than {} bytes)", MAX_STRING_LEN - 1),
    })
}

/// Builds a table image in the firmware layout.
///
/// Used by the simulated transport and by tests.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTableBuilder {
    entries: Vec<VariableDescriptor>,
    magic: Option<u32>,
}

impl DescriptorTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, descriptor: VariableDescriptor) -> Self {
        self.entries.push(descriptor);
        self
    }

    pub fn entries(mut self, descriptors: impl IntoIterator<Item = VariableDescriptor>) -> Self {
        self.entries.extend(descriptors);
        self
    }

    /// Override the magic word (to build corrupt images)
    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = Some(magic);
        self
    }

    /// Serialize the image; it ends with the last string's terminator
    pub fn build(&self) -> Vec<u8> {
        let entries_offset = HEADER_SIZE;
        let strings_offset = entries_offset + self.entries.len() * ENTRY_SIZE;

        let mut strings = Vec::new();
        let mut push_string = |s: &str| -> u32 {
            let offset = (strings_offset + strings.len()) as u32;
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            offset
        };

        let mut entries = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
        for descriptor in &self.entries {
            let name_offset = push_string(&descriptor.name);
            let category_offset = descriptor
                .category
                .as_deref()
                .map(&mut push_string)
                .unwrap_or(0);
            let (min, max) = descriptor
                .bounds
                .map(|b| (b.min as f32, b.max as f32))
                .unwrap_or((0.0, 0.0));
            let access = match descriptor.access {
                AccessMode::ReadOnly => 0u8,
                AccessMode::ReadWrite => 1u8,
            };

            entries.extend_from_slice(&name_offset.to_le_bytes());
            entries.extend_from_slice(&(descriptor.address as u32).to_le_bytes());
            entries.push(descriptor.var_type.code());
            entries.push(access);
            entries.extend_from_slice(&[0, 0]);
            entries.extend_from_slice(&category_offset.to_le_bytes());
            entries.extend_from_slice(&min.to_le_bytes());
            entries.extend_from_slice(&max.to_le_bytes());
        }

        let mut image = Vec::with_capacity(strings_offset + strings.len());
        image.extend_from_slice(&self.magic.unwrap_or(DESCRIPTOR_MAGIC).to_le_bytes());
        image.extend_from_slice(&DESCRIPTOR_VERSION.to_le_bytes());
        image.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        image.extend_from_slice(&(entries_offset as u32).to_le_bytes());
        image.extend_from_slice(&entries);
        image.extend_from_slice(&strings);
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x080F_0000;

    fn reader(image: Vec<u8>) -> impl FnMut(u64, usize) -> Result<Vec<u8>> {
        move |address, len| {
            let start = address
                .checked_sub(BASE)
                .map(|o| o as usize)
                .filter(|&o| o + len <= image.len())
                .ok_or_else(|| McuLinkError::transport("address out of range"))?;
            Ok(image[start..start + len].to_vec())
        }
    }

    fn sample_table() -> DescriptorTableBuilder {
        DescriptorTableBuilder::new()
            .entry(
                VariableDescriptor::new("temperature", 0x2000_0000, VarType::F32, AccessMode::ReadOnly)
                    .with_category("Sensors")
                    .with_bounds(-40.0, 85.0),
            )
            .entry(VariableDescriptor::new(
                "led_brightness",
                0x2000_0004,
                VarType::U8,
                AccessMode::ReadWrite,
            ))
    }

    #[test]
    fn test_decode_table() {
        let vars = decode_table(BASE, reader(sample_table().build())).unwrap();
        assert_eq!(vars.len(), 2);

        assert_eq!(vars[0].name, "temperature");
        assert_eq!(vars[0].address, 0x2000_0000);
        assert_eq!(vars[0].var_type, VarType::F32);
        assert_eq!(vars[0].access, AccessMode::ReadOnly);
        assert_eq!(vars[0].category.as_deref(), Some("Sensors"));
        assert_eq!(vars[0].bounds, ValueBounds::new(-40.0, 85.0));

        assert_eq!(vars[1].name, "led_brightness");
        assert_eq!(vars[1].access, AccessMode::ReadWrite);
        assert_eq!(vars[1].category, None);
        assert_eq!(vars[1].bounds, None);
    }

    #[test]
    fn test_string_ending_at_end_of_memory() {
        let image = sample_table().build();
        assert_eq!(image.last(), Some(&0));
        let tail = image.len() - "led_brightness".len() - 1;
        assert_eq!(&image[tail..image.len() - 1], b"led_brightness");

        let vars = decode_table(BASE, reader(image)).unwrap();
        assert_eq!(vars[1].name, "led_brightness");
    }

    #[test]
    fn test_long_names_decode() {
        let long_name = format!("motor_controller_{}", "phase_current_".repeat(8));
        assert!(long_name.len() > 64);
        let image = DescriptorTableBuilder::new()
            .entry(
                VariableDescriptor::new(long_name.as_str(), 0x2000_0000, VarType::F32, AccessMode::ReadOnly)
                    .with_category("Motor"),
            )
            .build();

        let vars = decode_table(BASE, reader(image)).unwrap();
        assert_eq!(vars[0].name, long_name);
        assert_eq!(vars[0].category.as_deref(), Some("Motor"));
    }

    #[test]
    fn test_name_over_limit_is_unterminated() {
        let image = DescriptorTableBuilder::new()
            .entry(VariableDescriptor::new(
                "x".repeat(MAX_STRING_LEN + 10),
                0x2000_0000,
                VarType::U8,
                AccessMode::ReadOnly,
            ))
            .build();
        let err = decode_table(BASE, reader(image)).unwrap_err();
        assert!(matches!(err, McuLinkError::Discovery { .. }));
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_decode_empty_table() {
        let vars = decode_table(BASE, reader(DescriptorTableBuilder::new().build())).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn test_bad_magic_is_discovery_error() {
        let image = sample_table().magic(0xDEAD_BEEF).build();
        let err = decode_table(BASE, reader(image)).unwrap_err();
        assert!(matches!(err, McuLinkError::Discovery { address: BASE, .. }));
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_unreadable_address_is_discovery_error() {
        let err = decode_table(0x0000_1000, reader(sample_table().build())).unwrap_err();
        assert!(matches!(err, McuLinkError::Discovery { .. }));
    }

    #[test]
    fn test_duplicate_addresses_rejected() {
        let image = DescriptorTableBuilder::new()
            .entry(VariableDescriptor::new("a", 0x2000_0000, VarType::U8, AccessMode::ReadOnly))
            .entry(VariableDescriptor::new("b", 0x2000_0000, VarType::U16, AccessMode::ReadOnly))
            .build();
        let err = decode_table(BASE, reader(image)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_unknown_type_code_kept_as_raw() {
        let mut image = sample_table().build();
        // var_type byte of the first entry
        image[HEADER_SIZE + 8] = 0x2A;
        let vars = decode_table(BASE, reader(image)).unwrap();
        assert_eq!(vars[0].var_type, VarType::Raw(0x2A));
    }

    #[test]
    fn test_unknown_access_flags_rejected() {
        let mut image = sample_table().build();
        image[HEADER_SIZE + 9] = 7;
        let err = decode_table(BASE, reader(image)).unwrap_err();
        assert!(err.to_string().contains("access flags"));
    }

    #[test]
    fn test_header_parse() {
        let image = sample_table().build();
        let header = DescriptorHeader::parse(&image).unwrap();
        assert_eq!(header.magic, DESCRIPTOR_MAGIC);
        assert_eq!(header.major_version(), 1);
        assert_eq!(header.entry_count, 2);
        assert_eq!(header.entries_offset as usize, HEADER_SIZE);
        assert!(DescriptorHeader::parse(&image[..8]).is_none());
    }
}
