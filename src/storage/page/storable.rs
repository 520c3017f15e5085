use crate::common::{PageId, RecordId, SlotId};

/// Fixed-size little-endian on-page encoding for keys and payloads.
///
/// `SIZE` is the exact number of bytes `encode` writes and `decode` reads;
/// node layouts are computed from it, so it must be the same for every value
/// of the type.
pub trait Storable: Copy {
    const SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl Storable for u32 {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u32::from_le_bytes(buf[..4].try_into().unwrap())
    }
}

impl Storable for u64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        u64::from_le_bytes(buf[..8].try_into().unwrap())
    }
}

impl Storable for i64 {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        i64::from_le_bytes(buf[..8].try_into().unwrap())
    }
}

impl Storable for PageId {
    const SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.as_u32().to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        PageId::new(u32::from_le_bytes(buf[..4].try_into().unwrap()))
    }
}

impl Storable for RecordId {
    const SIZE: usize = 6;

    fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.as_u32().to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot_id.as_u16().to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        RecordId::new(
            PageId::new(u32::from_le_bytes(buf[..4].try_into().unwrap())),
            SlotId::new(u16::from_le_bytes(buf[4..6].try_into().unwrap())),
        )
    }
}
