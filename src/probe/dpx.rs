//! DPX header reader
//!
//! Only the magic number and the original-size fields of the orientation
//! header are read. The magic decides the byte order of the whole header:
//! "SDPX" is big-endian, anything else is read as little-endian.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::Resolution;
use crate::error::{Error, Result};

/// "SDPX" read as a little-endian word
const MAGIC_BIG_ENDIAN: u32 = 0x5850_4453;

/// Offset of the original width, followed by the original height
const ORIGINAL_SIZE_OFFSET: u64 = 1424;

/// Read width and height from a DPX file
pub fn read_dpx_resolution(path: &Path) -> Result<Resolution> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    parse_dpx_header(&mut reader).map_err(|message| Error::Probe {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse the resolution out of a DPX header
pub fn parse_dpx_header<R: Read + Seek>(reader: &mut R) -> std::result::Result<Resolution, String> {
    let magic = read_word(reader).map_err(|e| format!("Failed to read magic: {}", e))?;
    let big_endian = u32::from_le_bytes(magic) == MAGIC_BIG_ENDIAN;

    reader
        .seek(SeekFrom::Start(ORIGINAL_SIZE_OFFSET))
        .map_err(|e| format!("Failed to seek to image size: {}", e))?;

    let decode = |bytes: [u8; 4]| {
        if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    };
    let width = decode(read_word(reader).map_err(|e| format!("Failed to read width: {}", e))?);
    let height = decode(read_word(reader).map_err(|e| format!("Failed to read height: {}", e))?);

    Ok(Resolution::new(width, height))
}

fn read_word<R: Read>(reader: &mut R) -> std::io::Result<[u8; 4]> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
