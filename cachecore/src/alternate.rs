use byteorder::{ByteOrder, LittleEndian as LE};

use crate::key::CryptoKey;

/// One cached response variant for a URL ("Alternate"): the
/// request-header digest that selects it, its response headers (serialized
/// by the caller — this layer treats them as opaque bytes), the object key
/// its body fragments are stored under, and the byte offsets of each
/// fragment within that body (empty for a single-fragment object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternate {
    pub request_digest: u64,
    pub response_headers: Vec<u8>,
    pub object_key: CryptoKey,
    pub frag_offsets: Vec<u64>,
}

impl Alternate {
    fn encoded_len(&self) -> usize {
        8 + 4 + self.response_headers.len() + 16 + 4 + self.frag_offsets.len() * 8
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 8];
        LE::write_u64(&mut buf, self.request_digest);
        out.extend_from_slice(&buf);

        let mut len_buf = [0u8; 4];
        LE::write_u32(&mut len_buf, self.response_headers.len() as u32);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(&self.response_headers);

        out.extend_from_slice(&self.object_key.to_bytes());

        LE::write_u32(&mut len_buf, self.frag_offsets.len() as u32);
        out.extend_from_slice(&len_buf);
        for off in &self.frag_offsets {
            let mut off_buf = [0u8; 8];
            LE::write_u64(&mut off_buf, *off);
            out.extend_from_slice(&off_buf);
        }
    }

    /// Reads one alternate starting at `bytes[0]`, returning it and the
    /// number of bytes consumed.
    fn read_from(bytes: &[u8]) -> Option<(Self, usize)> {
        if bytes.len() < 8 + 4 {
            return None;
        }
        let request_digest = LE::read_u64(&bytes[0..8]);
        let hlen = LE::read_u32(&bytes[8..12]) as usize;
        let mut pos = 12;
        if bytes.len() < pos + hlen {
            return None;
        }
        let response_headers = bytes[pos..pos + hlen].to_vec();
        pos += hlen;

        if bytes.len() < pos + 16 + 4 {
            return None;
        }
        let mut key_bytes = [0u8; 16];
        key_bytes.copy_from_slice(&bytes[pos..pos + 16]);
        let object_key = CryptoKey::from_bytes_raw(&key_bytes);
        pos += 16;

        let n_frags = LE::read_u32(&bytes[pos..pos + 4]) as usize;
        pos += 4;
        if bytes.len() < pos + n_frags * 8 {
            return None;
        }
        let mut frag_offsets = Vec::with_capacity(n_frags);
        for i in 0..n_frags {
            frag_offsets.push(LE::read_u64(&bytes[pos + i * 8..pos + i * 8 + 8]));
        }
        pos += n_frags * 8;

        Some((
            Self {
                request_digest,
                response_headers,
                object_key,
                frag_offsets,
            },
            pos,
        ))
    }
}

/// Insertion-ordered list of alternates for one URL : the
/// payload stored in the first fragment's Doc header. Selection walks the
/// list in order and returns the first match, matching the "ordered list,
/// first match wins" semantics of the original vary-aware alternate
/// selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlternateVector {
    alternates: Vec<Alternate>,
}

impl AlternateVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alternates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alternates.is_empty()
    }

    /// Returns the first alternate whose `request_digest` matches, or
    /// `None` if this URL has no cached variant satisfying the request
    /// ("select").
    pub fn select(&self, request_digest: u64) -> Option<&Alternate> {
        self.alternates
            .iter()
            .find(|a| a.request_digest == request_digest)
    }

    /// Appends a new alternate, or replaces an existing one with the same
    /// digest in place ("alternate replacement" scenario: a large
    /// response is later replaced by a small one for the same variant).
    pub fn add(&mut self, alt: Alternate) {
        if let Some(slot) = self
            .alternates
            .iter_mut()
            .find(|a| a.request_digest == alt.request_digest)
        {
            *slot = alt;
        } else {
            self.alternates.push(alt);
        }
    }

    /// Replaces the response headers of the alternate matching
    /// `request_digest`, leaving its body fragments untouched (a
    /// header-only refresh, e.g. after a 304 revalidation).
    pub fn update_header(&mut self, request_digest: u64, response_headers: Vec<u8>) -> bool {
        match self
            .alternates
            .iter_mut()
            .find(|a| a.request_digest == request_digest)
        {
            Some(slot) => {
                slot.response_headers = response_headers;
                true
            }
            None => false,
        }
    }

    /// Removes the alternate matching `request_digest` ("alternate
    /// deletion" scenario: direct removal of a single variant without
    /// touching the rest of the vector).
    pub fn remove(&mut self, request_digest: u64) -> bool {
        let before = self.alternates.len();
        self.alternates.retain(|a| a.request_digest != request_digest);
        self.alternates.len() != before
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let total: usize = 4 + self.alternates.iter().map(Alternate::encoded_len).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        let mut count_buf = [0u8; 4];
        LE::write_u32(&mut count_buf, self.alternates.len() as u32);
        out.extend_from_slice(&count_buf);
        for alt in &self.alternates {
            alt.write_to(&mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return if bytes.is_empty() { Some(Self::default()) } else { None };
        }
        let count = LE::read_u32(&bytes[0..4]) as usize;
        let mut pos = 4;
        let mut alternates = Vec::with_capacity(count);
        for _ in 0..count {
            let (alt, consumed) = Alternate::read_from(&bytes[pos..])?;
            alternates.push(alt);
            pos += consumed;
        }
        Some(Self { alternates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(digest: u64, body_len: usize) -> Alternate {
        Alternate {
            request_digest: digest,
            response_headers: format!("len={body_len}").into_bytes(),
            object_key: CryptoKey::from_bytes(0, &digest.to_le_bytes()),
            frag_offsets: vec![0, 65536],
        }
    }

    #[test]
    fn select_finds_matching_digest() {
        let mut v = AlternateVector::new();
        v.add(sample(1, 100));
        v.add(sample(2, 200));
        assert_eq!(v.select(2).unwrap().response_headers, sample(2, 200).response_headers);
        assert!(v.select(3).is_none());
    }

    #[test]
    fn add_replaces_existing_digest_in_place() {
        let mut v = AlternateVector::new();
        v.add(sample(1, 100));
        v.add(sample(1, 999));
        assert_eq!(v.len(), 1);
        assert_eq!(v.select(1).unwrap().response_headers, sample(1, 999).response_headers);
    }

    #[test]
    fn remove_deletes_only_matching_alternate() {
        let mut v = AlternateVector::new();
        v.add(sample(1, 100));
        v.add(sample(2, 200));
        assert!(v.remove(1));
        assert!(v.select(1).is_none());
        assert!(v.select(2).is_some());
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut v = AlternateVector::new();
        v.add(sample(1, 100));
        v.add(sample(2, 200));
        let bytes = v.to_bytes();
        assert_eq!(AlternateVector::from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn empty_vector_round_trips() {
        let v = AlternateVector::new();
        assert_eq!(AlternateVector::from_bytes(&v.to_bytes()).unwrap(), v);
    }
}
