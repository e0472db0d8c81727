//! PNG-in-ICO container codec.
//!
//! Every entry of a packed container stores a complete PNG stream as its
//! payload, no BMP/DIB conversion is performed.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor};

/// Size of the ICONDIR header.
pub const HEADER_SIZE: usize = 6;

/// Size of a single ICONDIRENTRY.
pub const ENTRY_SIZE: usize = 16;

/// Resource type for icons, cursors (type 2) are not produced.
const RESOURCE_TYPE_ICON: u16 = 1;

/// A single PNG rendition of the source image at `size`x`size` pixels.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SizedRaster {
    /// Edge length in pixels, in the range 1..=256
    pub size: u32,

    /// The PNG encoded image
    pub buffer: Vec<u8>,
}

impl SizedRaster {
    pub fn new(size: u32, buffer: Vec<u8>) -> Self {
        Self { size, buffer }
    }
}

/// Packs the rasters into an ICO container, preserving their order.
///
/// Sizes must already be validated to lie within 1..=256.
pub fn pack_ico(rasters: &[SizedRaster]) -> Vec<u8> {
    let count = rasters.len();
    let directory_size = HEADER_SIZE + count * ENTRY_SIZE;
    let payload_size: usize = rasters.iter().map(|r| r.buffer.len()).sum();

    let mut output = vec![0u8; directory_size];
    output.reserve_exact(payload_size);

    // ICONDIR, the first field is reserved and stays zero
    LittleEndian::write_u16(&mut output[2..4], RESOURCE_TYPE_ICON);
    LittleEndian::write_u16(&mut output[4..6], count as u16);

    let mut data_offset = directory_size as u32;
    for (index, raster) in rasters.iter().enumerate() {
        let entry = &mut output[HEADER_SIZE + index * ENTRY_SIZE..][..ENTRY_SIZE];

        let dimension = dimension_byte(raster.size);
        entry[0] = dimension;
        entry[1] = dimension;
        // entry[2] (palette size) and entry[3] (reserved) stay zero
        LittleEndian::write_u16(&mut entry[4..6], 1); // color planes
        LittleEndian::write_u16(&mut entry[6..8], 32); // bits per pixel

        let data_size = raster.buffer.len() as u32;
        LittleEndian::write_u32(&mut entry[8..12], data_size);
        LittleEndian::write_u32(&mut entry[12..16], data_offset);
        data_offset += data_size;
    }

    for raster in rasters {
        output.extend_from_slice(&raster.buffer);
    }

    output
}

/// A width/height byte of zero indicates a size of 256.
fn dimension_byte(size: u32) -> u8 {
    if size >= 256 {
        0
    } else {
        size as u8
    }
}

/// The parsed directory of an ICO container.
#[derive(Debug, Clone)]
pub struct IconDirectory {
    entries: Vec<IconDirEntry>,
}

/// One directory entry, with the width/height bytes already widened.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IconDirEntry {
    pub width: u32,
    pub height: u32,
    pub color_count: u8,
    pub color_planes: u16,
    pub bits_per_pixel: u16,
    pub data_size: u32,
    pub data_offset: u32,
}

impl IconDirectory {
    /// Reads the header and directory of an icon container.
    pub fn parse(data: &[u8]) -> io::Result<Self> {
        let mut reader = Cursor::new(data);

        let reserved = reader.read_u16::<LittleEndian>()?;
        if reserved != 0 {
            return Err(invalid_data(format!(
                "invalid reserved field in ICONDIR (was {}, but must be 0)",
                reserved
            )));
        }

        let resource_type = reader.read_u16::<LittleEndian>()?;
        if resource_type != RESOURCE_TYPE_ICON {
            return Err(invalid_data(format!(
                "unsupported resource type {}",
                resource_type
            )));
        }

        let count = reader.read_u16::<LittleEndian>()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let width = widen(reader.read_u8()?);
            let height = widen(reader.read_u8()?);
            let color_count = reader.read_u8()?;
            let reserved = reader.read_u8()?;
            if reserved != 0 {
                return Err(invalid_data(format!(
                    "invalid reserved field in ICONDIRENTRY (was {}, but must be 0)",
                    reserved
                )));
            }

            let entry = IconDirEntry {
                width,
                height,
                color_count,
                color_planes: reader.read_u16::<LittleEndian>()?,
                bits_per_pixel: reader.read_u16::<LittleEndian>()?,
                data_size: reader.read_u32::<LittleEndian>()?,
                data_offset: reader.read_u32::<LittleEndian>()?,
            };

            let end = entry.data_offset as usize + entry.data_size as usize;
            if end > data.len() {
                return Err(invalid_data(format!(
                    "entry payload ends at {} but the container is only {} bytes",
                    end,
                    data.len()
                )));
            }

            entries.push(entry);
        }

        Ok(Self { entries })
    }

    /// Returns the directory entries in container order.
    pub fn entries(&self) -> &[IconDirEntry] {
        &self.entries
    }
}

impl IconDirEntry {
    /// Slices this entry's payload out of the container it was parsed from.
    ///
    /// Returns `None` if the payload lies outside of `container`.
    pub fn payload<'a>(&self, container: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.data_offset as usize;
        container.get(start..start.checked_add(self.data_size as usize)?)
    }
}

fn widen(byte: u8) -> u32 {
    if byte == 0 {
        256
    } else {
        byte as u32
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
