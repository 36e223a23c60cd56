//! RAR4 header walker. Adapted from the teacher's `archive/rar.rs`
//! (`analyse_rar_buffer`, `RarExt` sorting, `extract_rar_number`): dropped
//! the `tokio::fs::File`-backed entry point since scanning here always
//! starts from an already-decoded in-memory segment, and added the method
//! byte + unpacked-size fields the blueprint builder needs for STORE
//! enforcement and multi-volume offset math.

use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::archive::error::ArchiveError;

const RAR_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

const RAR_MAIN_HEAD: u8 = 0x73;
const RAR_FILE_HEAD: u8 = 0x74;
const RAR_ENDARC_HEAD: u8 = 0x7B;

/// RAR4 compression method byte for "stored, no compression."
const METHOD_STORE: u8 = 0x30;

#[derive(Debug, Clone)]
pub struct RarFileHeader {
    pub name: String,
    pub data_offset: u64,
    pub packed_size: u64,
    pub unpacked_size: u64,
    pub method: u8,
}

impl RarFileHeader {
    pub fn is_stored(&self) -> bool {
        self.method == METHOD_STORE
    }
}

fn read_u16_le(cur: &mut Cursor<&[u8]>) -> Result<u16, ArchiveError> {
    let mut b = [0u8; 2];
    cur.read_exact(&mut b).map_err(|_| ArchiveError::MalformedRar)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32_le(cur: &mut Cursor<&[u8]>) -> Result<u32, ArchiveError> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).map_err(|_| ArchiveError::MalformedRar)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, ArchiveError> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|_| ArchiveError::MalformedRar)?;
    Ok(b[0])
}

/// Walk one volume's headers, returning every `RAR_FILE_HEAD` entry found
/// before the first `RAR_ENDARC_HEAD`. Stops early (rather than erroring) if
/// the tail header overruns the probe buffer — callers only need enough of
/// the volume to see the first file header(s).
pub fn scan_headers(buffer: &[u8]) -> Result<Vec<RarFileHeader>, ArchiveError> {
    let rar_offset = buffer
        .windows(RAR_SIGNATURE.len())
        .position(|w| w == RAR_SIGNATURE)
        .map(|offset| offset as u64 + RAR_SIGNATURE.len() as u64)
        .ok_or(ArchiveError::MalformedRar)?;

    let mut cursor = Cursor::new(buffer);
    cursor.seek(SeekFrom::Start(rar_offset)).map_err(|_| ArchiveError::MalformedRar)?;

    let mut entries = Vec::new();

    while read_u16_le(&mut cursor).is_ok() {
        let header_type = read_u8(&mut cursor)?;
        let _flags = read_u16_le(&mut cursor)?;
        let header_size = read_u16_le(&mut cursor)?;
        let header_start = cursor.position() - 7;

        match header_type {
            RAR_MAIN_HEAD => {
                cursor.seek(SeekFrom::Start(header_start + header_size as u64)).ok();
            }
            RAR_FILE_HEAD => {
                let packed_size = read_u32_le(&mut cursor)? as u64;
                let unpacked_size = read_u32_le(&mut cursor)? as u64;
                let _host_os = read_u8(&mut cursor)?;
                let _file_crc = read_u32_le(&mut cursor)?;
                let _file_time = read_u32_le(&mut cursor)?;
                let _unpack_version = read_u8(&mut cursor)?;
                let method = read_u8(&mut cursor)?;
                let name_size = read_u16_le(&mut cursor)?;
                let _attr = read_u32_le(&mut cursor)?;

                let name_offset = cursor.position() as usize;
                let name_bytes = buffer
                    .get(name_offset..name_offset + name_size as usize)
                    .ok_or(ArchiveError::MalformedRar)?;
                let name = String::from_utf8_lossy(name_bytes).to_string();

                let data_offset = header_start + header_size as u64;

                entries.push(RarFileHeader { name, data_offset, packed_size, unpacked_size, method });

                cursor.seek(SeekFrom::Start(header_start + header_size as u64)).ok();
            }
            RAR_ENDARC_HEAD => break,
            _ => {
                if cursor.seek(SeekFrom::Start(header_start + header_size as u64)).is_err() {
                    break;
                }
            }
        }

        if entries.len() > 256 {
            break;
        }
    }

    if entries.is_empty() {
        return Err(ArchiveError::MalformedRar);
    }

    Ok(entries)
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RarExt {
    Main,
    Part(u32),
}

impl RarExt {
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.to_lowercase().ends_with(".rar") {
            Some(RarExt::Main)
        } else {
            extract_rar_number(filename).map(RarExt::Part)
        }
    }
}

impl Ord for RarExt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use RarExt::*;
        match (self, other) {
            (Main, Main) => std::cmp::Ordering::Equal,
            (Main, _) => std::cmp::Ordering::Less,
            (_, Main) => std::cmp::Ordering::Greater,
            (Part(a), Part(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for RarExt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub fn extract_rar_number(filename: &str) -> Option<u32> {
    filename.rsplit_once('.').and_then(|(_, ext)| {
        ext.strip_prefix('r')
            .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rar_continuation_numbers() {
        let cases = [
            ("file.rar", None),
            ("file.r00", Some(0)),
            ("file.r01", Some(1)),
            ("file.r99", Some(99)),
            ("roll.roll.on.r00", Some(0)),
            ("file.ra0", None),
            ("file.txt", None),
        ];
        for (input, expected) in cases {
            assert_eq!(extract_rar_number(input), expected, "failed for {input}");
        }
    }

    #[test]
    fn sorts_main_before_continuations_in_order() {
        let mut files = vec!["file.r02", "file.r00", "file.rar", "file.r10", "file.r01"];
        files.sort_by_key(|name| RarExt::from_filename(name).unwrap());
        assert_eq!(files, vec!["file.rar", "file.r00", "file.r01", "file.r02", "file.r10"]);
    }

    #[test]
    fn rejects_buffer_without_signature() {
        let err = scan_headers(b"not a rar file").unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedRar));
    }
}
