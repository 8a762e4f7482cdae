use std::io::{Read, Seek, SeekFrom};

use crate::{Error, Result, DA_ENTRY_LOAD_REGIONS, DA_ENTRY_MAGIC, DA_INFO_MAGIC, DA_INFO_VERSION};

// On-disk layout of the vendor DA container, packed little-endian:
//   header   magic u32, version u32, identifier [u8;32], description [u8;64], entry_count u32
//   entry    magic u32, hw_code u16, hw_subcode u16, hw_version u16, sw_version u16,
//            pagesize u16, reserved u16, load_regions [region;10],
//            load_regions_count u32, entry_region_index u32
//   region   offset u32, start_addr u32, len u32, sig_offset u32, sig_len u32
const HEADER_SIZE: usize = 108;
const ENTRY_SIZE: usize = 224;
const REGION_SIZE: usize = 20;

const IDENTIFIER_OFFSET: usize = 8;
const DESCRIPTION_OFFSET: usize = 40;
const ENTRY_COUNT_OFFSET: usize = 104;

/// One load region of a DA entry: a slice of the container file and the
/// device RAM address it is meant for. The signature trails the region
/// (`sig_offset + sig_len == len`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRegion {
  /// Byte offset of the region inside the container file
  pub offset: u32,
  /// Device RAM address the region is loaded at
  pub start_addr: u32,
  /// Region length in bytes, signature included
  pub len: u32,
  /// Offset of the trailing signature within the region
  pub sig_offset: u32,
  /// Signature length in bytes
  pub sig_len: u32,
}

/// A decoded DA entry: the loader variant for one chip revision.
#[derive(Debug, Clone)]
pub struct DaEntry {
  pub hw_code: u16,
  pub hw_subcode: u16,
  pub hw_version: u16,
  pub sw_version: u16,
  pub load_regions: Vec<LoadRegion>,
  load_regions_count: u32,
  pub entry_region_index: u32,
}

impl DaEntry {
  /// Structural checks that only matter once an entry is selected.
  fn validate(&self) -> Result<()> {
    if self.load_regions_count as usize > DA_ENTRY_LOAD_REGIONS {
      return Err(Error::InvalidEntry("invalid load regions count"));
    }
    if self.entry_region_index >= self.load_regions_count {
      return Err(Error::InvalidEntry("invalid entry region index"));
    }
    Ok(())
  }

  /// Pick the Stage 1 / Stage 2 region pair of this entry.
  ///
  /// Stage 1 is the first signed region at or after the entry region
  /// index that still has a successor; Stage 2 is that successor. Both
  /// must carry their signature at the very end of the region.
  pub fn stages(&self) -> Result<(LoadRegion, LoadRegion)> {
    let count = self.load_regions.len();

    let mut stage1 = None;
    let mut index = self.entry_region_index as usize;
    while index + 1 < count {
      if self.load_regions[index].sig_len > 0 {
        stage1 = Some(index);
        break;
      }
      index += 1;
    }
    let index = stage1.ok_or(Error::InvalidEntry("no signed load region"))?;

    let stage1 = self.load_regions[index];
    let stage2 = self.load_regions[index + 1];

    if stage1.sig_offset as u64 + stage1.sig_len as u64 != stage1.len as u64 {
      return Err(Error::InvalidEntry("stage 1 signature is not at end of load region"));
    }
    if stage2.sig_offset as u64 + stage2.sig_len as u64 != stage2.len as u64 {
      return Err(Error::InvalidEntry("stage 2 signature is not at end of load region"));
    }

    Ok((stage1, stage2))
  }
}

/// An in-memory Download Agent container.
///
/// Built once from the vendor binary and immutable afterwards; entries
/// are decoded on demand so a corrupt entry only fails the run that
/// actually selects it.
pub struct DaInfo {
  image: Vec<u8>,
  entry_count: u32,
}

impl DaInfo {
  /// Read and validate a DA container.
  ///
  /// The reader may be positioned anywhere. After the header and size
  /// checks pass the whole binary is pulled into one owned buffer, so
  /// the load regions can stream straight out of it later.
  pub fn load<R: Read + Seek>(reader: &mut R) -> Result<Self> {
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let magic = le32(&header, 0);
    if magic != DA_INFO_MAGIC {
      return Err(Error::InvalidMagic);
    }
    let version = le32(&header, 4);
    if version != DA_INFO_VERSION {
      return Err(Error::UnsupportedVersion(version));
    }

    let entry_count = le32(&header, ENTRY_COUNT_OFFSET);
    let total = HEADER_SIZE as u64 + entry_count as u64 * ENTRY_SIZE as u64;

    let file_size = reader.seek(SeekFrom::End(0))?;
    if file_size < total {
      return Err(Error::Truncated);
    }

    reader.seek(SeekFrom::Start(0))?;
    let mut image = Vec::with_capacity(file_size as usize);
    reader.read_to_end(&mut image)?;

    Ok(Self { image, entry_count })
  }

  /// DA identifier string from the header (e.g. `MTK_DOWNLOAD_AGENT`)
  pub fn identifier(&self) -> String {
    fixed_string(&self.image[IDENTIFIER_OFFSET..IDENTIFIER_OFFSET + 32])
  }

  /// DA build description from the header
  pub fn description(&self) -> String {
    fixed_string(&self.image[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + 64])
  }

  pub fn entry_count(&self) -> u32 {
    self.entry_count
  }

  /// Find the entry for the connected chip: first one whose HW code
  /// matches exactly and whose HW/SW versions do not exceed the
  /// device's. Every entry walked on the way must carry a valid magic.
  pub fn select(&self, hw_code: u16, hw_version: u16, sw_version: u16) -> Result<DaEntry> {
    for index in 0..self.entry_count as usize {
      let raw = &self.image[HEADER_SIZE + index * ENTRY_SIZE..HEADER_SIZE + (index + 1) * ENTRY_SIZE];

      if le32(raw, 0) != DA_ENTRY_MAGIC {
        return Err(Error::InvalidEntry("invalid magic"));
      }

      let entry = decode_entry(raw);
      tracing::trace!(
        "entry {index}: code {:#06x}, hw {:#06x}, sw {:#06x}",
        entry.hw_code,
        entry.hw_version,
        entry.sw_version
      );

      if entry.hw_code == hw_code && entry.hw_version <= hw_version && entry.sw_version <= sw_version {
        entry.validate()?;
        tracing::debug!("selected DA entry {index} for HW code {hw_code:#06x}");
        return Ok(entry);
      }
    }

    Err(Error::NoMatchingEntry(hw_code))
  }

  /// The container bytes backing a load region.
  pub fn region_data(&self, region: &LoadRegion) -> Result<&[u8]> {
    let start = region.offset as usize;
    let end = start + region.len as usize;
    self
      .image
      .get(start..end)
      .ok_or(Error::InvalidEntry("load region exceeds container"))
  }
}

fn decode_entry(raw: &[u8]) -> DaEntry {
  let load_regions_count = le32(raw, 16 + DA_ENTRY_LOAD_REGIONS * REGION_SIZE);
  let entry_region_index = le32(raw, 16 + DA_ENTRY_LOAD_REGIONS * REGION_SIZE + 4);

  let decoded = (load_regions_count as usize).min(DA_ENTRY_LOAD_REGIONS);
  let mut load_regions = Vec::with_capacity(decoded);
  for i in 0..decoded {
    let base = 16 + i * REGION_SIZE;
    load_regions.push(LoadRegion {
      offset: le32(raw, base),
      start_addr: le32(raw, base + 4),
      len: le32(raw, base + 8),
      sig_offset: le32(raw, base + 12),
      sig_len: le32(raw, base + 16),
    });
  }

  DaEntry {
    hw_code: le16(raw, 4),
    hw_subcode: le16(raw, 6),
    hw_version: le16(raw, 8),
    sw_version: le16(raw, 10),
    load_regions,
    load_regions_count,
    entry_region_index,
  }
}

fn le16(buf: &[u8], offset: usize) -> u16 {
  u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn le32(buf: &[u8], offset: usize) -> u32 {
  u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// NUL-terminated fixed-size field to a printable string
fn fixed_string(raw: &[u8]) -> String {
  let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
  String::from_utf8_lossy(&raw[..end]).into_owned()
}


#[cfg(test)]
mod tests {
  use super::testutil::{build_image, TestEntry};
  use super::*;
  use std::io::Cursor;

  #[test]
  fn loads_header_fields() {
    let image = build_image(&[TestEntry::new(0x8590, 0xca00, 0x0100)]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    assert_eq!(info.identifier(), "MTK_DOWNLOAD_AGENT");
    assert_eq!(info.description(), "MT8590 DA");
    assert_eq!(info.entry_count(), 1);
  }

  #[test]
  fn rejects_bad_magic() {
    let mut image = build_image(&[TestEntry::new(0x8590, 0, 0)]);
    image[0] ^= 0xff;

    match DaInfo::load(&mut Cursor::new(image)) {
      Err(Error::InvalidMagic) => {}
      other => panic!("expected invalid magic, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn rejects_unsupported_version() {
    let mut image = build_image(&[TestEntry::new(0x8590, 0, 0)]);
    image[4] = 0x09;

    match DaInfo::load(&mut Cursor::new(image)) {
      Err(Error::UnsupportedVersion(0x9)) => {}
      other => panic!("expected version error, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn rejects_truncated_file() {
    let mut image = build_image(&[TestEntry::new(0x8590, 0, 0)]);
    image.truncate(HEADER_SIZE + ENTRY_SIZE - 1);

    match DaInfo::load(&mut Cursor::new(image)) {
      Err(Error::Truncated) => {}
      other => panic!("expected truncation error, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn selects_matching_entry() {
    let image = build_image(&[
      TestEntry::new(0x6572, 0xca00, 0x0100),
      TestEntry::new(0x8590, 0xcb00, 0x0100),
      TestEntry::new(0x8590, 0xca00, 0x0100),
    ]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    // hw 0xca00 rules out the 0xcb00 entry, so the third one wins
    let entry = info.select(0x8590, 0xca00, 0x0200).unwrap();
    assert_eq!(entry.hw_code, 0x8590);
    assert_eq!(entry.hw_version, 0xca00);
  }

  #[test]
  fn no_entry_for_unknown_chip() {
    let image = build_image(&[TestEntry::new(0x8590, 0, 0)]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    match info.select(0x6572, 0xffff, 0xffff) {
      Err(Error::NoMatchingEntry(0x6572)) => {}
      other => panic!("expected no matching entry, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn entry_with_bad_magic_fails_selection() {
    let mut entry = TestEntry::new(0x8590, 0, 0);
    entry.magic = 0xdead_beef;
    let image = build_image(&[entry]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    match info.select(0x8590, 0, 0) {
      Err(Error::InvalidEntry(_)) => {}
      other => panic!("expected invalid entry, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn stage_pair_skips_unsigned_regions() {
    let mut entry = TestEntry::new(0x8590, 0, 0);
    entry.regions.insert(
      0,
      LoadRegion {
        offset: 0x800,
        start_addr: 0x1000_0000,
        len: 0x80,
        sig_offset: 0,
        sig_len: 0,
      },
    );
    let image = build_image(&[entry]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    let entry = info.select(0x8590, 0, 0).unwrap();
    let (stage1, stage2) = entry.stages().unwrap();
    assert_eq!(stage1.offset, 0x1000);
    assert_eq!(stage2.offset, 0x1100);
  }

  #[test]
  fn stage_signature_must_trail() {
    let mut entry = TestEntry::new(0x8590, 0, 0);
    entry.regions[0].sig_offset = 0x10;
    let image = build_image(&[entry]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    let entry = info.select(0x8590, 0, 0).unwrap();
    match entry.stages() {
      Err(Error::InvalidEntry(reason)) => assert!(reason.contains("signature")),
      other => panic!("expected signature error, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn last_region_alone_cannot_be_stage1() {
    let mut entry = TestEntry::new(0x8590, 0, 0);
    // only the final region is signed, so there is no stage 2 after it
    entry.regions[0].sig_len = 0;
    entry.regions[0].sig_offset = entry.regions[0].len;
    let image = build_image(&[entry]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();

    let entry = info.select(0x8590, 0, 0).unwrap();
    match entry.stages() {
      Err(Error::InvalidEntry(reason)) => assert!(reason.contains("signed")),
      other => panic!("expected missing stage error, got {:?}", other.map(|_| ())),
    }
  }

  #[test]
  fn region_data_is_bounds_checked() {
    let image = build_image(&[TestEntry::new(0x8590, 0, 0)]);
    let info = DaInfo::load(&mut Cursor::new(image)).unwrap();
    let entry = info.select(0x8590, 0, 0).unwrap();
    let (stage1, _) = entry.stages().unwrap();

    // the synthetic image has no payload past the entry table
    assert!(info.region_data(&stage1).is_err());
  }
}
