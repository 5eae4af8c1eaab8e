use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

const CHD_MAGIC: &[u8; 8] = b"MComprHD";
const V4_HEADER_LEN: usize = 108;
const V5_HEADER_LEN: usize = 124;
// Raw-data SHA-1 offsets within the header, per version.
const V4_RAW_SHA1_OFFSET: usize = 88;
const V5_RAW_SHA1_OFFSET: usize = 84;

/// Read the raw-data SHA-1 out of a CHD v4/v5 header without touching the
/// compressed payload. Disc-system DATs carry SHA-1 only, so the CRC-32
/// half of the pair is always empty.
pub fn hash_chd_header(path: &Path) -> Result<(String, String)> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;

    let mut prefix = [0u8; 16];
    file.read_exact(&mut prefix)
        .map_err(|_| Error::parse(path, "truncated CHD header"))?;

    if &prefix[..8] != CHD_MAGIC {
        return Err(Error::format(path, "not a CHD file (bad magic)"));
    }
    let header_len = u32::from_be_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]) as usize;
    let version = u32::from_be_bytes([prefix[12], prefix[13], prefix[14], prefix[15]]);

    let (expected_len, sha1_offset) = match version {
        4 => (V4_HEADER_LEN, V4_RAW_SHA1_OFFSET),
        5 => (V5_HEADER_LEN, V5_RAW_SHA1_OFFSET),
        other => {
            return Err(Error::format(
                path,
                format!("unsupported CHD version {other}"),
            ));
        }
    };
    if header_len < expected_len {
        return Err(Error::parse(
            path,
            format!("CHD v{version} header declares {header_len} bytes, need {expected_len}"),
        ));
    }

    let mut header = vec![0u8; expected_len];
    header[..16].copy_from_slice(&prefix);
    file.read_exact(&mut header[16..])
        .map_err(|_| Error::parse(path, "truncated CHD header"))?;

    let sha1 = &header[sha1_offset..sha1_offset + 20];
    Ok((hex::encode(sha1), String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_chd(version: u32, header_len: u32, total_len: usize, sha1: &[u8; 20]) -> NamedTempFile {
        let mut header = vec![0u8; total_len];
        header[..8].copy_from_slice(CHD_MAGIC);
        header[8..12].copy_from_slice(&header_len.to_be_bytes());
        header[12..16].copy_from_slice(&version.to_be_bytes());
        let offset = if version == 4 {
            V4_RAW_SHA1_OFFSET
        } else {
            V5_RAW_SHA1_OFFSET
        };
        if total_len >= offset + 20 {
            header[offset..offset + 20].copy_from_slice(sha1);
        }
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&header).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn v5_header_sha1() {
        let sha1 = [0xABu8; 20];
        let f = write_chd(5, V5_HEADER_LEN as u32, V5_HEADER_LEN, &sha1);
        let (hex_sha1, crc) = hash_chd_header(f.path()).unwrap();
        assert_eq!(hex_sha1, "ab".repeat(20));
        assert_eq!(crc, "");
    }

    #[test]
    fn v4_header_sha1() {
        let sha1 = [0x5Cu8; 20];
        let f = write_chd(4, V4_HEADER_LEN as u32, V4_HEADER_LEN, &sha1);
        let (hex_sha1, _) = hash_chd_header(f.path()).unwrap();
        assert_eq!(hex_sha1, "5c".repeat(20));
    }

    #[test]
    fn bad_magic_is_format_error() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"NOTACHD!0000000000000000").unwrap();
        f.flush().unwrap();
        assert!(matches!(
            hash_chd_header(f.path()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_format_error() {
        let sha1 = [0u8; 20];
        let f = write_chd(3, 120, 120, &sha1);
        assert!(matches!(
            hash_chd_header(f.path()),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn truncated_header_is_parse_error() {
        let sha1 = [0u8; 20];
        // Declares a v5 header but the file ends after 40 bytes.
        let f = write_chd(5, V5_HEADER_LEN as u32, 40, &sha1);
        assert!(matches!(hash_chd_header(f.path()), Err(Error::Parse { .. })));
    }
}
