use std::fs::File;
use std::io::Read;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use sha1_smol::Sha1;
use zip::read::ZipArchive;

use crate::error::{Error, Result};

const STREAM_CHUNK_SIZE: usize = 512 * 1024;

/// Both digests a scan needs, computed in one pass over the bytes.
/// SHA-1 is 40 lowercase hex chars, CRC-32 is 8.
pub fn hash_stream<R: Read>(mut reader: R) -> Result<(String, String)> {
    let mut sha1 = Sha1::new();
    let mut crc32 = Crc32::new();

    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::io("<stream>", e))?;
        if n == 0 {
            break;
        }
        let slice = &buf[..n];
        sha1.update(slice);
        crc32.update(slice);
    }

    Ok((
        sha1.digest().to_string(),
        format!("{:08x}", crc32.finalize()),
    ))
}

pub fn hash_file(path: &Path) -> Result<(String, String)> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    hash_stream(file).map_err(|e| relabel_stream_error(e, path))
}

/// Hash the decompressed bytes of one named entry inside a zip archive.
pub fn hash_zip_entry(zip_path: &Path, entry_name: &str) -> Result<(String, String)> {
    let file = File::open(zip_path).map_err(|e| Error::io(zip_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_error(zip_path, e))?;
    let entry = archive
        .by_name(entry_name)
        .map_err(|e| zip_error(zip_path, e))?;
    hash_stream(entry).map_err(|e| relabel_stream_error(e, zip_path))
}

/// List the non-directory entry names of a zip archive with their
/// uncompressed sizes.
pub fn zip_entries(zip_path: &Path) -> Result<Vec<(String, u64)>> {
    let file = File::open(zip_path).map_err(|e| Error::io(zip_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_error(zip_path, e))?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| zip_error(zip_path, e))?;
        if entry.is_file() {
            out.push((entry.name().to_string(), entry.size()));
        }
    }
    Ok(out)
}

fn zip_error(path: &Path, err: zip::result::ZipError) -> Error {
    match err {
        zip::result::ZipError::Io(e) => Error::io(path, e),
        other => Error::io(path, std::io::Error::other(other)),
    }
}

fn relabel_stream_error(err: Error, path: &Path) -> Error {
    match err {
        Error::Io { source, .. } => Error::io(path, source),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn hashes_known_test_vector() {
        // The catalogue fixture used across the integration tests.
        let (sha1, crc32) = hash_stream(&b"test rom content"[..]).unwrap();
        assert_eq!(sha1, "331407b2bd72286d458f26c426d78f459d7116d3");
        assert_eq!(crc32, "d3764b6a");
    }

    #[test]
    fn empty_stream_hashes() {
        let (sha1, crc32) = hash_stream(&b""[..]).unwrap();
        assert_eq!(sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(crc32, "00000000");
    }

    #[test]
    fn file_and_stream_agree() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"some rom payload").unwrap();
        f.flush().unwrap();

        let from_file = hash_file(f.path()).unwrap();
        let from_stream = hash_stream(&b"some rom payload"[..]).unwrap();
        assert_eq!(from_file, from_stream);
    }

    #[test]
    fn zip_entry_hashes_decompressed_bytes() {
        let mut f = NamedTempFile::new().unwrap();
        {
            let mut writer = zip::ZipWriter::new(f.as_file_mut());
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            writer.start_file("inner/rom.bin", options).unwrap();
            writer.write_all(b"test rom content").unwrap();
            writer.finish().unwrap();
        }

        let entries = zip_entries(f.path()).unwrap();
        assert_eq!(entries, vec![("inner/rom.bin".to_string(), 16)]);

        let (sha1, crc32) = hash_zip_entry(f.path(), "inner/rom.bin").unwrap();
        assert_eq!(sha1, "331407b2bd72286d458f26c426d78f459d7116d3");
        assert_eq!(crc32, "d3764b6a");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = hash_file(Path::new("/nonexistent/rom.bin")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
