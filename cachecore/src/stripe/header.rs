use byteorder::{ByteOrder, LittleEndian as LE};

/// Magic for the per-disk header block ("disk header"), written
/// once at format time and validated on every stripe open.
pub const DISK_HEADER_MAGIC: u32 = 0xCAC4E_D15;
pub const DISK_HEADER_VERSION: u32 = 1;

/// One stripe's slice of a disk ("stripe descriptor"):
/// `hash_id` is a stable digest of the stripe's identity (disk path plus
/// slot), independent of its position in the descriptor table, so the vol
/// hash table survives disks being added/removed in a different order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeDescriptor {
    pub hash_id: u64,
    pub offset: u64,
    pub len: u64,
}

/// Fixed-format header block at the start of a disk : magic,
/// version, and the descriptor table for every stripe carved out of this
/// disk.
#[derive(Debug, Clone)]
pub struct DiskHeader {
    pub magic: u32,
    pub version: u32,
    pub stripes: Vec<StripeDescriptor>,
}

impl DiskHeader {
    pub fn new(stripes: Vec<StripeDescriptor>) -> Self {
        Self {
            magic: DISK_HEADER_MAGIC,
            version: DISK_HEADER_VERSION,
            stripes,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.stripes.len() * 24);
        let mut buf4 = [0u8; 4];
        LE::write_u32(&mut buf4, self.magic);
        out.extend_from_slice(&buf4);
        LE::write_u32(&mut buf4, self.version);
        out.extend_from_slice(&buf4);
        LE::write_u32(&mut buf4, self.stripes.len() as u32);
        out.extend_from_slice(&buf4);
        for d in &self.stripes {
            let mut buf8 = [0u8; 8];
            LE::write_u64(&mut buf8, d.hash_id);
            out.extend_from_slice(&buf8);
            LE::write_u64(&mut buf8, d.offset);
            out.extend_from_slice(&buf8);
            LE::write_u64(&mut buf8, d.len);
            out.extend_from_slice(&buf8);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let magic = LE::read_u32(&bytes[0..4]);
        if magic != DISK_HEADER_MAGIC {
            return None;
        }
        let version = LE::read_u32(&bytes[4..8]);
        let count = LE::read_u32(&bytes[8..12]) as usize;
        if bytes.len() < 12 + count * 24 {
            return None;
        }
        let mut stripes = Vec::with_capacity(count);
        for i in 0..count {
            let base = 12 + i * 24;
            stripes.push(StripeDescriptor {
                hash_id: LE::read_u64(&bytes[base..base + 8]),
                offset: LE::read_u64(&bytes[base + 8..base + 16]),
                len: LE::read_u64(&bytes[base + 16..base + 24]),
            });
        }
        Some(Self {
            magic,
            version,
            stripes,
        })
    }
}

/// Mutable per-stripe control block, persisted redundantly at both ends of
/// the stripe ("redundant footer"): on disagreement between
/// the two copies, the one with the lower `sync_serial` is stale and the
/// other wins, since `sync_serial` only ever increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeHeader {
    pub write_pos: u64,
    pub agg_pos: u64,
    pub phase: bool,
    pub write_serial: u64,
    pub sync_serial: u64,
    pub cycle_serial: u64,
}

impl StripeHeader {
    pub fn initial() -> Self {
        Self {
            write_pos: 0,
            agg_pos: 0,
            phase: false,
            write_serial: 0,
            sync_serial: 0,
            cycle_serial: 0,
        }
    }

    pub const WIRE_LEN: usize = 8 * 5 + 1;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        LE::write_u64(&mut out[0..8], self.write_pos);
        LE::write_u64(&mut out[8..16], self.agg_pos);
        LE::write_u64(&mut out[16..24], self.write_serial);
        LE::write_u64(&mut out[24..32], self.sync_serial);
        LE::write_u64(&mut out[32..40], self.cycle_serial);
        out[40] = self.phase as u8;
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            write_pos: LE::read_u64(&bytes[0..8]),
            agg_pos: LE::read_u64(&bytes[8..16]),
            write_serial: LE::read_u64(&bytes[16..24]),
            sync_serial: LE::read_u64(&bytes[24..32]),
            cycle_serial: LE::read_u64(&bytes[32..40]),
            phase: bytes[40] != 0,
        }
    }

    /// Picks the newer of two footer copies by `sync_serial`; a parse
    /// failure on one side defers entirely to the other (:
    /// "disagreement is resolved by trusting the higher `sync_serial`").
    pub fn reconcile(primary: Option<Self>, secondary: Option<Self>) -> Option<Self> {
        match (primary, secondary) {
            (Some(p), Some(s)) => Some(if p.sync_serial >= s.sync_serial { p } else { s }),
            (Some(p), None) => Some(p),
            (None, Some(s)) => Some(s),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_header_round_trips() {
        let h = DiskHeader::new(vec![
            StripeDescriptor { hash_id: 1, offset: 0, len: 1 << 30 },
            StripeDescriptor { hash_id: 2, offset: 1 << 30, len: 1 << 30 },
        ]);
        let bytes = h.to_bytes();
        let parsed = DiskHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.stripes, h.stripes);
    }

    #[test]
    fn stripe_header_round_trips() {
        let h = StripeHeader {
            write_pos: 4096,
            agg_pos: 2048,
            phase: true,
            write_serial: 7,
            sync_serial: 3,
            cycle_serial: 1,
        };
        assert_eq!(StripeHeader::from_bytes(&h.to_bytes()), h);
    }

    #[test]
    fn reconcile_prefers_higher_sync_serial() {
        let older = StripeHeader { sync_serial: 1, ..StripeHeader::initial() };
        let newer = StripeHeader { sync_serial: 5, ..StripeHeader::initial() };
        assert_eq!(StripeHeader::reconcile(Some(older), Some(newer)), Some(newer));
        assert_eq!(StripeHeader::reconcile(Some(newer), Some(older)), Some(newer));
    }

    #[test]
    fn reconcile_falls_back_to_whichever_parsed() {
        let only = StripeHeader::initial();
        assert_eq!(StripeHeader::reconcile(Some(only), None), Some(only));
        assert_eq!(StripeHeader::reconcile(None, Some(only)), Some(only));
        assert_eq!(StripeHeader::reconcile(None, None), None);
    }
}
