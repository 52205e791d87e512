//! SHA-256 content fingerprints for uploaded images.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

/// Stream `reader` to its end through SHA-256 and return the lowercase hex
/// digest. Read errors are returned as-is. Repositioning the reader afterwards
/// is up to the caller.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint of an in-memory blob
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom};

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"))
        }
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = vec![7u8; 200_000];
        let mut cursor = Cursor::new(data.clone());
        assert_eq!(hash_reader(&mut cursor).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn test_reader_consumed_and_rewindable() {
        let mut cursor = Cursor::new(b"image bytes".to_vec());
        let first = hash_reader(&mut cursor).unwrap();
        assert_eq!(cursor.position(), 11);

        cursor.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(hash_reader(&mut cursor).unwrap(), first);
    }

    #[test]
    fn test_read_error_propagates() {
        let err = hash_reader(&mut FailingReader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_distinct_content_distinct_digest() {
        assert_ne!(hash_bytes(b"first image"), hash_bytes(b"second image"));
        assert_eq!(hash_bytes(b"").len(), 64);
    }
}
