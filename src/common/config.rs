/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant. The little-endian byte pattern is `-1_i32`,
/// which is also the on-disk sentinel in node headers.
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// The page holding (index name -> root page id) records. The buffer pool
/// never hands this id out from `new_page`.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

/// Default extendible hash bucket capacity
pub const DEFAULT_BUCKET_SIZE: usize = 4;

use super::types::{FrameId, PageId};
