//! This module implements the vm_object: an ordered array of lpages backing
//! one contiguous range of a vm address space.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::memory::coremap::{Coremap, FrameIndex};
use crate::memory::swap::SwapStore;
use crate::vm::lpage::Lpage;
use crate::vm::FaultKind;

/// A contiguous, page-indexed range of virtual memory. Slots start out `None`
/// (zerofill-on-demand, never materialized); a fault materializes one in place.
pub struct VmObject {
    /// Base virtual address this object is mapped at.
    pub base: usize,
    /// Size, in bytes, of the forbidden-overlap band immediately below `base`.
    pub lower_redzone: usize,
    pages: Mutex<Vec<Option<Arc<Lpage>>>>,
    coremap: Arc<Coremap>,
    swap: Arc<SwapStore>,
}

impl VmObject {
    /// `vm_object_create`: reserves swap for `npages` pages of zerofill.
    pub fn create(
        base: usize,
        lower_redzone: usize,
        npages: usize,
        coremap: Arc<Coremap>,
        swap: Arc<SwapStore>,
    ) -> Result<Self, Error> {
        swap.reserve(npages)?;
        Ok(Self {
            base,
            lower_redzone,
            pages: Mutex::new(vec![None; npages]),
            coremap,
            swap,
        })
    }

    /// Number of pages covered by this object.
    pub fn len(&self) -> usize {
        self.pages.lock().unwrap().len()
    }

    /// Whether this object covers zero pages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The virtual address range this object occupies, including its redzone.
    /// Used when checking for overlap against other regions in the same space.
    pub fn span(&self) -> std::ops::Range<usize> {
        (self.base - self.lower_redzone)..(self.base + self.len() * crate::memory::PAGE_SIZE)
    }

    /// The virtual address range actually backed by pages, excluding the redzone.
    pub fn mapped_range(&self) -> std::ops::Range<usize> {
        self.base..(self.base + self.len() * crate::memory::PAGE_SIZE)
    }

    /// `vm_object_copy`: clones every page (materializing zerofill slots is
    /// skipped — they stay zerofill in the copy too), for use by `fork`.
    pub fn copy(&self, coremap: Arc<Coremap>, swap: Arc<SwapStore>) -> Result<Self, Error> {
        let src = self.pages.lock().unwrap();
        let new = Self::create(self.base, self.lower_redzone, src.len(), coremap.clone(), swap.clone())?;
        {
            let mut dst = new.pages.lock().unwrap();
            for (slot, lp) in dst.iter_mut().zip(src.iter()) {
                if let Some(lp) = lp {
                    *slot = Some(lp.copy(coremap.clone(), swap.clone())?);
                }
            }
        }
        Ok(new)
    }

    /// `vm_object_setsize`: grows or shrinks the page array, destroying lpages
    /// or unreserving swap for the pages dropped, or reserving swap for the
    /// pages added.
    pub fn set_size(&self, npages: usize) -> Result<(), Error> {
        let mut pages = self.pages.lock().unwrap();
        if npages < pages.len() {
            for slot in pages.drain(npages..) {
                match slot {
                    Some(lp) => lp.destroy(),
                    None => self.swap.unreserve(1),
                }
            }
        } else if npages > pages.len() {
            let added = npages - pages.len();
            self.swap.reserve(added)?;
            pages.resize_with(npages, || None);
        }
        Ok(())
    }

    /// Resolves a fault at `offset` pages into this object, materializing a
    /// zero-fill lpage first if the slot has never been touched.
    pub fn fault(
        &self,
        offset: usize,
        global_paging_lock: &Mutex<()>,
        kind: FaultKind,
    ) -> Result<FrameIndex, Error> {
        let lp = {
            let mut pages = self.pages.lock().unwrap();
            let slot = pages.get_mut(offset).ok_or(Error::BadAddress)?;
            if slot.is_none() {
                *slot = Some(Lpage::zerofill(self.coremap.clone(), self.swap.clone())?);
            }
            slot.clone().unwrap()
        };
        lp.fault(global_paging_lock, kind)
    }

    /// `vm_object_destroy`.
    pub fn destroy(&self) {
        let mut pages = self.pages.lock().unwrap();
        for slot in pages.drain(..) {
            match slot {
                Some(lp) => lp.destroy(),
                None => self.swap.unreserve(1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn harness(frames: usize, swap_pages: usize) -> (Arc<Coremap>, Arc<SwapStore>) {
        let coremap = Arc::new(Coremap::new(frames, 4, &Config::default()));
        let swap = Arc::new(SwapStore::new(swap_pages, frames, 1).unwrap());
        (coremap, swap)
    }

    #[test]
    fn fault_materializes_zerofill_once() {
        let (coremap, swap) = harness(4, 32);
        let obj = VmObject::create(0x1000, 0, 4, coremap.clone(), swap).unwrap();
        let lock = Mutex::new(());
        let frame1 = obj.fault(0, &lock, FaultKind::Read).unwrap();
        coremap.unpin(frame1);
        let frame2 = obj.fault(0, &lock, FaultKind::Read).unwrap();
        coremap.unpin(frame2);
        assert_eq!(frame1, frame2);
    }

    #[test]
    fn out_of_range_offset_is_bad_address() {
        let (coremap, swap) = harness(4, 32);
        let obj = VmObject::create(0x1000, 0, 2, coremap, swap).unwrap();
        let lock = Mutex::new(());
        assert_eq!(obj.fault(5, &lock, FaultKind::Read), Err(Error::BadAddress));
    }

    #[test]
    fn copy_preserves_contents_and_is_independent() {
        let (coremap, swap) = harness(4, 32);
        let obj = VmObject::create(0x1000, 0, 2, coremap.clone(), swap.clone()).unwrap();
        let lock = Mutex::new(());
        let frame = obj.fault(0, &lock, FaultKind::Write).unwrap();
        let mut contents = *coremap.read_page(frame);
        contents[0] = 5;
        coremap.write_page(frame, &contents);
        coremap.unpin(frame);

        let clone = obj.copy(coremap.clone(), swap).unwrap();
        let clone_frame = clone.fault(0, &lock, FaultKind::Read).unwrap();
        assert_eq!(coremap.read_page(clone_frame)[0], 5);
        coremap.unpin(clone_frame);
    }

    #[test]
    fn set_size_shrink_frees_pages() {
        let (coremap, swap) = harness(4, 32);
        let obj = VmObject::create(0x1000, 0, 4, coremap, swap.clone()).unwrap();
        let (free_before, reserved_before, _) = swap.counts();
        obj.set_size(1).unwrap();
        let (free_after, reserved_after, _) = swap.counts();
        // Shrinking drops 3 never-faulted (zerofill) slots, each releasing a
        // reservation rather than a free slot — reservations never consumed
        // `free_pages` to begin with.
        assert_eq!(reserved_after, reserved_before - 3);
        assert_eq!(free_after, free_before);
    }
}
