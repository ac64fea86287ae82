//! Checksum codec - hex conversion, single-pass hashing and content comparison

use crate::error::{Result, RomError};
use crc32fast::Hasher as Crc32Hasher;
use md5::{Digest, Md5};
use serde::{Serialize, Serializer};
use sha1::Sha1;
use sha2::Sha256;
use std::io::{self, Read};

const CHUNK_SIZE: usize = 64 * 1024;

/// Encode bytes as lowercase hex without prefix.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode hex text, accepting an optional `0x`/`0X` prefix.
///
/// Odd-length input is padded with a leading zero. Empty input decodes to an
/// empty array, which means "unknown" everywhere in the model.
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{}", digits))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|e| RomError::malformed(format!("invalid hex value '{}': {}", text, e)))
}

fn serialize_hex<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_hex(bytes))
}

/// The four checksum axes. An empty vector means the value is not known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Checksums {
    #[serde(serialize_with = "serialize_hex")]
    pub crc32: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub md5: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub sha1: Vec<u8>,
    #[serde(serialize_with = "serialize_hex")]
    pub sha256: Vec<u8>,
}

impl Checksums {
    pub fn all_known(&self) -> bool {
        !self.crc32.is_empty() && !self.md5.is_empty() && !self.sha1.is_empty() && !self.sha256.is_empty()
    }

    pub fn any_known(&self) -> bool {
        !self.crc32.is_empty() || !self.md5.is_empty() || !self.sha1.is_empty() || !self.sha256.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Fill every unknown axis from `other`, leaving known values untouched.
    pub fn fill_missing_from(&mut self, other: &Checksums) {
        if self.crc32.is_empty() {
            self.crc32 = other.crc32.clone();
        }
        if self.md5.is_empty() {
            self.md5 = other.md5.clone();
        }
        if self.sha1.is_empty() {
            self.sha1 = other.sha1.clone();
        }
        if self.sha256.is_empty() {
            self.sha256 = other.sha256.clone();
        }
    }
}

/// Hash a reader, computing CRC32, MD5, SHA1 and SHA256 in a single pass.
///
/// The first `skip` bytes are consumed without being hashed. Returns the
/// checksums and the number of hashed bytes.
pub fn hash_reader<R: Read + ?Sized>(reader: &mut R, skip: u64) -> io::Result<(Checksums, u64)> {
    if skip > 0 {
        let skipped = io::copy(&mut (&mut *reader).take(skip), &mut io::sink())?;
        if skipped < skip {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream shorter than its header",
            ));
        }
    }

    let mut crc = Crc32Hasher::new();
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        crc.update(chunk);
        md5.update(chunk);
        sha1.update(chunk);
        sha256.update(chunk);
        total += bytes_read as u64;
    }

    Ok((
        Checksums {
            crc32: crc.finalize().to_be_bytes().to_vec(),
            md5: md5.finalize().to_vec(),
            sha1: sha1.finalize().to_vec(),
            sha256: sha256.finalize().to_vec(),
        },
        total,
    ))
}

/// Compare two checksum sets on every mutually known axis.
///
/// True only when at least one axis is known on both sides and none of the
/// mutually known axes disagree. Symmetric in its arguments.
pub fn compare_checksums(a: &Checksums, b: &Checksums) -> bool {
    let pairs = [
        (&a.md5, &b.md5),
        (&a.sha1, &b.sha1),
        (&a.sha256, &b.sha256),
        (&a.crc32, &b.crc32),
    ];

    let mut compared = false;
    for (left, right) in pairs {
        if left.is_empty() || right.is_empty() {
            continue;
        }
        if left != right {
            return false;
        }
        compared = true;
    }
    compared
}

/// Decide whether an expected rom and a physical file hold the same content.
///
/// With `use_reported_crc`, a known rom CRC32 and a known archive-reported
/// CRC32 are compared on their own and the result is final.
pub fn does_checksum_match(
    expected: &Checksums,
    reported_crc32: &[u8],
    computed: &Checksums,
    use_reported_crc: bool,
) -> bool {
    if use_reported_crc && !expected.crc32.is_empty() && !reported_crc32.is_empty() {
        return expected.crc32 == reported_crc32;
    }
    compare_checksums(expected, computed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sums(crc: &str, md5: &str, sha1: &str) -> Checksums {
        Checksums {
            crc32: from_hex(crc).unwrap(),
            md5: from_hex(md5).unwrap(),
            sha1: from_hex(sha1).unwrap(),
            sha256: Vec::new(),
        }
    }

    #[test]
    fn test_hex_encoding_is_lowercase() {
        assert_eq!(to_hex(&[0xAB, 0x01, 0xff]), "ab01ff");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_hex_decoding_prefix_and_padding() {
        assert_eq!(from_hex("0xABCD").unwrap(), vec![0xab, 0xcd]);
        assert_eq!(from_hex("0X1").unwrap(), vec![0x01]);
        assert_eq!(from_hex("abc").unwrap(), vec![0x0a, 0xbc]);
        assert_eq!(from_hex("").unwrap(), Vec::<u8>::new());
        assert!(from_hex("zz").is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0u8, 1, 0x7f, 0x80, 0xfe, 0xff];
        let encoded = to_hex(&bytes);
        assert_eq!(encoded.len() % 2, 0);
        assert_eq!(from_hex(&encoded).unwrap(), bytes);
    }

    #[test]
    fn test_hash_known_content() {
        let (checksums, size) = hash_reader(&mut &b"test content"[..], 0).unwrap();
        assert_eq!(size, 12);
        assert_eq!(to_hex(&checksums.crc32), "57f4675d");
        assert_eq!(to_hex(&checksums.md5), "9473fdd0d880a43c21b7778d34872157");
        assert_eq!(to_hex(&checksums.sha1), "1eebdf4fdc9fc7bf283031b93f9aef3338de9052");
        assert!(checksums.all_known());
    }

    #[test]
    fn test_hash_empty_content() {
        let (checksums, size) = hash_reader(&mut &b""[..], 0).unwrap();
        assert_eq!(size, 0);
        assert_eq!(to_hex(&checksums.crc32), "00000000");
        assert_eq!(to_hex(&checksums.md5), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            to_hex(&checksums.sha256),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_skips_header() {
        let (with_header, size) = hash_reader(&mut &b"HDRtest content"[..], 3).unwrap();
        let (plain, _) = hash_reader(&mut &b"test content"[..], 0).unwrap();
        assert_eq!(size, 12);
        assert_eq!(with_header, plain);
    }

    #[test]
    fn test_no_overlap_never_matches() {
        let rom = sums("12345678", "", "");
        let file = sums("", "9473fdd0d880a43c21b7778d34872157", "");
        assert!(!compare_checksums(&rom, &file));
        assert!(!compare_checksums(&file, &rom));
    }

    #[test]
    fn test_single_mismatch_disqualifies() {
        let rom = sums("12345678", "9473fdd0d880a43c21b7778d34872157", "");
        let file = sums("12345678", "d41d8cd98f00b204e9800998ecf8427e", "");
        assert!(!compare_checksums(&rom, &file));
    }

    #[test]
    fn test_comparison_is_symmetric() {
        let rom = sums("12345678", "", "1eebdf4fdc9fc7bf283031b93f9aef3338de9052");
        let file = sums("12345678", "9473fdd0d880a43c21b7778d34872157", "");
        assert!(compare_checksums(&rom, &file));
        assert!(compare_checksums(&file, &rom));
    }

    #[test]
    fn test_reported_crc_fast_path() {
        let rom = sums("12345678", "", "");
        let computed = sums("", "", "");
        assert!(does_checksum_match(&rom, &[0x12, 0x34, 0x56, 0x78], &computed, true));
        assert!(!does_checksum_match(&rom, &[0x12, 0x34, 0x56, 0x79], &computed, true));
        // Without the fast path nothing is mutually known.
        assert!(!does_checksum_match(&rom, &[0x12, 0x34, 0x56, 0x78], &computed, false));
    }

    #[test]
    fn test_reported_crc_trusted_over_computed() {
        let rom = sums("12345678", "", "");
        let computed = sums("87654321", "", "");
        assert!(does_checksum_match(&rom, &[0x12, 0x34, 0x56, 0x78], &computed, true));
    }
}
