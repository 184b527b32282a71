//! This module groups the physical-memory subsystems: the coremap (frame table)
//! and the swap store. Both operate on fixed-size pages.

pub mod coremap;
pub mod swap;

/// Size of a page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Address of a physical frame, always a multiple of [`PAGE_SIZE`].
pub type PhysAddr = usize;

/// A reserved, invalid physical address, used as the "not yet resident" sentinel.
pub const INVALID_PADDR: PhysAddr = PhysAddr::MAX;

/// Low bit of a [`PhysAddr`] marking the frame dirty (written since it was last
/// paged in or zero-filled). The allocator always hands out page-aligned
/// addresses, so this bit is free to repurpose as a flag.
pub const PADDR_DIRTY: PhysAddr = 0b1;

/// Masks off the flag bits, returning the frame-aligned address.
pub fn paddr_frame(paddr: PhysAddr) -> PhysAddr {
    paddr & !PADDR_DIRTY
}

/// Returns whether the dirty flag is set on `paddr`.
pub fn paddr_is_dirty(paddr: PhysAddr) -> bool {
    paddr & PADDR_DIRTY != 0
}

/// The contents of one physical page.
pub type Page = [u8; PAGE_SIZE];

/// Returns a freshly zeroed page.
pub fn zeroed_page() -> Box<Page> {
    Box::new([0u8; PAGE_SIZE])
}
