use crate::common::{PageId, Result, StrataError, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// View of the header page (page 0): a flat catalog of
/// `(index name -> root page id)` records. Names longer than 32 bytes are
/// truncated to their first 32 bytes.
pub struct HeaderPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> HeaderPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(
            self.data.as_ref()[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        &self.data.as_ref()[offset..offset + NAME_SIZE]
    }

    fn root_at(&self, index: usize) -> PageId {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE + NAME_SIZE;
        PageId::new(u32::from_le_bytes(
            self.data.as_ref()[offset..offset + 4].try_into().unwrap(),
        ))
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        let padded = pad_name(name);
        (0..self.record_count()).find(|&i| self.name_at(i) == padded)
    }

    /// Root page id recorded for `name`, if any.
    pub fn find(&self, name: &str) -> Option<PageId> {
        self.find_index(name).map(|i| self.root_at(i))
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> HeaderPage<B> {
    fn set_record_count(&mut self, count: usize) {
        self.data.as_mut()[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, index: usize, name: &str, root: PageId) {
        let offset = RECORDS_OFFSET + index * RECORD_SIZE;
        let data = self.data.as_mut();
        data[offset..offset + NAME_SIZE].copy_from_slice(&pad_name(name));
        data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root.as_u32().to_le_bytes());
    }

    /// Creates or updates the record for `name`.
    pub fn upsert(&mut self, name: &str, root: PageId) -> Result<()> {
        if let Some(index) = self.find_index(name) {
            self.write_record(index, name, root);
            return Ok(());
        }
        let count = self.record_count();
        if count >= MAX_RECORDS {
            return Err(StrataError::HeaderFull);
        }
        self.write_record(count, name, root);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Drops the record for `name`, compacting the array. Returns whether a
    /// record existed.
    pub fn delete(&mut self, name: &str) -> bool {
        let Some(index) = self.find_index(name) else {
            return false;
        };
        let count = self.record_count();
        let start = RECORDS_OFFSET + (index + 1) * RECORD_SIZE;
        let end = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data
            .as_mut()
            .copy_within(start..end, RECORDS_OFFSET + index * RECORD_SIZE);
        self.set_record_count(count - 1);
        true
    }
}

fn pad_name(name: &str) -> [u8; NAME_SIZE] {
    let mut padded = [0u8; NAME_SIZE];
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_SIZE);
    padded[..len].copy_from_slice(&bytes[..len]);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_PAGE_ID;

    #[test]
    fn test_upsert_and_find() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);

        assert_eq!(header.find("orders_pk"), None);

        header.upsert("orders_pk", PageId::new(5)).unwrap();
        header.upsert("users_pk", PageId::new(9)).unwrap();
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.find("orders_pk"), Some(PageId::new(5)));

        header.upsert("orders_pk", PageId::new(11)).unwrap();
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.find("orders_pk"), Some(PageId::new(11)));
        assert_eq!(header.find("users_pk"), Some(PageId::new(9)));
    }

    #[test]
    fn test_delete_compacts() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);

        header.upsert("a", PageId::new(1)).unwrap();
        header.upsert("b", PageId::new(2)).unwrap();
        header.upsert("c", PageId::new(3)).unwrap();

        assert!(header.delete("b"));
        assert!(!header.delete("b"));
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.find("a"), Some(PageId::new(1)));
        assert_eq!(header.find("c"), Some(PageId::new(3)));
    }

    #[test]
    fn test_sentinel_root_round_trips() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);

        header.upsert("empty_tree", INVALID_PAGE_ID).unwrap();
        assert_eq!(header.find("empty_tree"), Some(INVALID_PAGE_ID));
    }

    #[test]
    fn test_full_header() {
        let mut buf = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut buf[..]);

        for i in 0..MAX_RECORDS {
            header.upsert(&format!("idx_{i}"), PageId::new(i as u32)).unwrap();
        }
        assert!(matches!(
            header.upsert("one_too_many", PageId::new(0)),
            Err(StrataError::HeaderFull)
        ));
    }
}
