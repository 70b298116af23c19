//! Constants and runtime knobs for the buffer-object VM path.

use log::LevelFilter;

/// Base-2 log of the page size
pub const PAGE_SHIFT: usize = 12;

/// Page size in bytes
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Mask of the in-page offset bits
pub const PAGE_MASK: u64 = (PAGE_SIZE as u64) - 1;

/// Largest page window a single fault may ask the handler to populate
pub const MAX_FAULT_PAGES: usize = 16;

/// First page of the mmap offset space handed out to buffer objects.
///
/// Everything below 4 GiB of file offset is left to legacy map handles.
pub const FILE_PAGE_OFFSET_START: u64 = (0xFFFF_FFFF >> PAGE_SHIFT) + 1;

/// Number of pages in the mmap offset space
pub const FILE_PAGE_OFFSET_SIZE: u64 = (0xFFFF_FFFF >> PAGE_SHIFT) * 256;

/// Number of pages a fault maps around the faulting address by default
pub const DEFAULT_PREFAULT_PAGES: usize = 1;

/// Round a byte count down to a page boundary
pub const fn trunc_page(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

/// Round a byte count up to a page boundary
pub const fn round_page(addr: u64) -> u64 {
    (addr + PAGE_MASK) & !PAGE_MASK
}

/// Convert a byte offset to a page number
pub const fn bytes_to_pages(bytes: u64) -> u64 {
    bytes >> PAGE_SHIFT
}

/// Convert a page number to a byte offset
pub const fn pages_to_bytes(pages: u64) -> u64 {
    pages << PAGE_SHIFT
}

/// Runtime configuration for a [`crate::ttm::BoDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// First page of the offset space managed by the range index
    pub offset_start: u64,

    /// Size of the offset space in pages
    pub offset_pages: u64,

    /// Pages per fault window built by the mapping framework
    pub prefault_pages: usize,

    /// Skip the memory-type gate when establishing bus mappings
    pub io_reserve_fastpath: bool,

    /// Log level applied by [`crate::logging::set_level`]
    pub log_level: LevelFilter,
}

impl DeviceConfig {
    /// Configuration with a custom offset space, everything else default
    pub fn with_offset_space(offset_start: u64, offset_pages: u64) -> Self {
        Self {
            offset_start,
            offset_pages,
            ..Self::default()
        }
    }

    /// Clamp the prefault window to what the handler accepts
    pub fn fault_window(&self) -> usize {
        self.prefault_pages.clamp(1, MAX_FAULT_PAGES)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            offset_start: FILE_PAGE_OFFSET_START,
            offset_pages: FILE_PAGE_OFFSET_SIZE,
            prefault_pages: DEFAULT_PREFAULT_PAGES,
            io_reserve_fastpath: false,
            log_level: LevelFilter::Warn,
        }
    }
}
