use byteorder::{ByteOrder, LittleEndian as LE};

use crate::key::CryptoKey;

/// Sentinel marking a live record: `magic` is present iff the record is
/// live. Arbitrary but fixed.
pub const DOC_MAGIC: u32 = 0x0DF5_CACE;

/// Sector size assumed for `len` rounding.
pub const SECTOR_SIZE: u64 = 512;

/// Checksum algorithm a `Doc` was written with. `V0` is a weak additive
/// sum kept for read-compatibility with stripes written under it; `V1`
/// (crc32) is used for anything written fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumVersion {
    V0,
    V1,
}

/// Wire size of the fixed portion of a [`Doc`], before `hlen` + `total_len`
/// of payload ("Doc wire format").
pub const DOC_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 16 + 16 + 8 + 8 + 4;

/// On-disk record for one stored fragment . Single-fragment
/// objects have `first_key == key`.
#[derive(Debug, Clone)]
pub struct Doc {
    pub magic: u32,
    pub len: u64,
    pub total_len: u32,
    pub hlen: u32,
    pub first_key: CryptoKey,
    pub key: CryptoKey,
    pub write_serial: u64,
    pub sync_serial: u64,
    pub checksum: u32,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl Doc {
    /// Rounds `DOC_HEADER_LEN + hlen + total_len` up to the stripe's sector
    /// size (invariant: "`len` is sector-aligned").
    pub fn sector_rounded_len(hlen: usize, total_len: usize) -> u64 {
        let raw = (DOC_HEADER_LEN + hlen + total_len) as u64;
        raw.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
    }

    pub fn is_single_fragment(&self) -> bool {
        self.first_key == self.key && self.total_len as usize == self.body.len()
    }

    fn compute_checksum(header: &[u8], body: &[u8], version: ChecksumVersion) -> u32 {
        match version {
            ChecksumVersion::V0 => header
                .iter()
                .chain(body.iter())
                .fold(0u32, |acc, b| acc.wrapping_add(*b as u32)),
            ChecksumVersion::V1 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(header);
                hasher.update(body);
                hasher.finalize()
            }
        }
    }

    pub fn new(
        first_key: CryptoKey,
        key: CryptoKey,
        write_serial: u64,
        sync_serial: u64,
        header: Vec<u8>,
        body: Vec<u8>,
        checksum_version: Option<ChecksumVersion>,
    ) -> Self {
        let len = Self::sector_rounded_len(header.len(), body.len());
        let checksum = checksum_version
            .map(|v| Self::compute_checksum(&header, &body, v))
            .unwrap_or(0);
        Self {
            magic: DOC_MAGIC,
            len,
            total_len: body.len() as u32,
            hlen: header.len() as u32,
            first_key,
            key,
            write_serial,
            sync_serial,
            checksum,
            header,
            body,
        }
    }

    /// Serializes the fixed header followed by the header/body payload,
    /// padded with zeros out to `len` (so the sector-aligned region is
    /// fully written; the padding bytes are never read back since `len`
    /// plus the payload sizes are both stored).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len as usize);
        let mut fixed = [0u8; DOC_HEADER_LEN];
        LE::write_u32(&mut fixed[0..4], self.magic);
        LE::write_u64(&mut fixed[4..12], self.len);
        LE::write_u32(&mut fixed[12..16], self.total_len);
        LE::write_u32(&mut fixed[16..20], self.hlen);
        fixed[20..36].copy_from_slice(&self.first_key.to_bytes());
        fixed[36..52].copy_from_slice(&self.key.to_bytes());
        LE::write_u64(&mut fixed[52..60], self.write_serial);
        LE::write_u64(&mut fixed[60..68], self.sync_serial);
        LE::write_u32(&mut fixed[68..72], self.checksum);
        out.extend_from_slice(&fixed);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out.resize(self.len as usize, 0);
        out
    }

    /// Parses a `Doc` out of `bytes`, which must hold at least
    /// `DOC_HEADER_LEN` bytes of fixed header. Returns `None` on magic
    /// mismatch, treated as a read miss, not an error.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < DOC_HEADER_LEN {
            return None;
        }
        let magic = LE::read_u32(&bytes[0..4]);
        if magic != DOC_MAGIC {
            return None;
        }
        let len = LE::read_u64(&bytes[4..12]);
        let total_len = LE::read_u32(&bytes[12..16]);
        let hlen = LE::read_u32(&bytes[16..20]);
        let mut first_key_bytes = [0u8; 16];
        first_key_bytes.copy_from_slice(&bytes[20..36]);
        let mut key_bytes = [0u8; 16];
        key_bytes.copy_from_slice(&bytes[36..52]);
        let write_serial = LE::read_u64(&bytes[52..60]);
        let sync_serial = LE::read_u64(&bytes[60..68]);
        let checksum = LE::read_u32(&bytes[68..72]);

        let hlen_u = hlen as usize;
        let total_len_u = total_len as usize;
        if bytes.len() < DOC_HEADER_LEN + hlen_u + total_len_u {
            return None;
        }
        let header = bytes[DOC_HEADER_LEN..DOC_HEADER_LEN + hlen_u].to_vec();
        let body = bytes[DOC_HEADER_LEN + hlen_u..DOC_HEADER_LEN + hlen_u + total_len_u].to_vec();

        Some(Self {
            magic,
            len,
            total_len,
            hlen,
            first_key: CryptoKey::from_bytes_raw(&first_key_bytes),
            key: CryptoKey::from_bytes_raw(&key_bytes),
            write_serial,
            sync_serial,
            checksum,
            header,
            body,
        })
    }

    /// Verifies the checksum field against `header`/`body`, trying both
    /// known versions since a `Doc` does not itself record which one wrote
    /// it. Callers always write fresh Docs with `V1`; this lets Docs
    /// written under either version still read back correctly.
    pub fn verify_checksum(&self) -> bool {
        if self.checksum == 0 {
            return true; // checksums disabled at write time
        }
        Self::compute_checksum(&self.header, &self.body, ChecksumVersion::V0) == self.checksum
            || Self::compute_checksum(&self.header, &self.body, ChecksumVersion::V1) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_fragment() {
        let key = CryptoKey::from_bytes(0, b"http://www.scw00.com/");
        let doc = Doc::new(key, key, 1, 0, b"Content-Type: text/html".to_vec(), vec![7u8; 10_240], Some(ChecksumVersion::V1));
        let bytes = doc.to_bytes();
        assert_eq!(bytes.len() as u64, doc.len);
        let parsed = Doc::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.body, doc.body);
        assert_eq!(parsed.header, doc.header);
        assert!(parsed.is_single_fragment());
        assert!(parsed.verify_checksum());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; DOC_HEADER_LEN];
        LE::write_u32(&mut bytes[0..4], 0xDEADBEEF);
        assert!(Doc::from_bytes(&bytes).is_none());
    }

    #[test]
    fn tampered_body_fails_checksum() {
        let key = CryptoKey::from_bytes(0, b"http://www.scw00.com/");
        let mut doc = Doc::new(key, key, 1, 0, vec![], b"hello".to_vec(), Some(ChecksumVersion::V1));
        doc.body[0] ^= 0xFF;
        assert!(!doc.verify_checksum());
    }

    #[test]
    fn len_is_sector_aligned() {
        let key = CryptoKey::from_bytes(0, b"k");
        let doc = Doc::new(key, key, 1, 0, vec![], vec![1, 2, 3], None);
        assert_eq!(doc.len % SECTOR_SIZE, 0);
        assert!(doc.len >= DOC_HEADER_LEN as u64 + 3);
    }
}
