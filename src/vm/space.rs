//! This module implements the per-process address space: an ordered list of
//! vm_objects, region placement, fork, and fault dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::memory::coremap::{AddrSpaceId, Coremap};
use crate::memory::swap::SwapStore;
use crate::memory::PAGE_SIZE;
use crate::vm::object::VmObject;
use crate::vm::FaultKind;

/// Default size of the stack region, in pages.
pub const STACK_PAGES: usize = 64;
/// Top of the stack's virtual address range, growing down from here.
pub const STACK_TOP: usize = 0x8000_0000;
/// Pages reserved below the stack as a guard band.
pub const STACK_REDZONE_PAGES: usize = 1;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A mapped region: a vm_object plus the permissions requested for it.
///
/// Permissions are recorded but only read-only enforcement is active; write and
/// execute are bookkeeping for a future protection pass, matching the documented
/// scope of this version.
struct Region {
    object: VmObject,
    writable: bool,
    #[allow(dead_code)]
    executable: bool,
}

/// One process's virtual address space.
pub struct AddrSpace {
    id: AddrSpaceId,
    regions: Mutex<Vec<Region>>,
    coremap: Arc<Coremap>,
    swap: Arc<SwapStore>,
    global_paging_lock: Arc<Mutex<()>>,
}

fn align_down(addr: usize, align: usize) -> usize {
    addr - (addr % align)
}

fn round_up_pages(size: usize) -> usize {
    (size + PAGE_SIZE - 1) / PAGE_SIZE
}

impl AddrSpace {
    /// `as_create`.
    pub fn create(coremap: Arc<Coremap>, swap: Arc<SwapStore>, global_paging_lock: Arc<Mutex<()>>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            regions: Mutex::new(Vec::new()),
            coremap,
            swap,
            global_paging_lock,
        }
    }

    /// Opaque identifier used for TLB bookkeeping.
    pub fn id(&self) -> AddrSpaceId {
        self.id
    }

    /// `define_region`: aligns `base` down and `size` up to the page size, then
    /// rejects the request if it overlaps any existing region (accounting for
    /// each region's redzone).
    pub fn define_region(
        &self,
        base: usize,
        size: usize,
        redzone_pages: usize,
        writable: bool,
        executable: bool,
    ) -> Result<(), Error> {
        let base = align_down(base, PAGE_SIZE);
        let npages = round_up_pages(size);
        let redzone = redzone_pages * PAGE_SIZE;
        let candidate_start = base.saturating_sub(redzone);
        let candidate_end = base + npages * PAGE_SIZE;

        let mut regions = self.regions.lock().unwrap();
        for region in regions.iter() {
            let span = region.object.span();
            if candidate_start < span.end && span.start < candidate_end {
                return Err(Error::InvalidArgument);
            }
        }
        let object = VmObject::create(base, redzone, npages, self.coremap.clone(), self.swap.clone())?;
        regions.push(Region {
            object,
            writable,
            executable,
        });
        Ok(())
    }

    /// `define_stack`: places the fixed-size stack region just below
    /// [`STACK_TOP`] and returns the initial stack pointer.
    pub fn define_stack(&self) -> Result<usize, Error> {
        let base = STACK_TOP - STACK_PAGES * PAGE_SIZE;
        self.define_region(base, STACK_PAGES * PAGE_SIZE, STACK_REDZONE_PAGES, true, false)?;
        Ok(STACK_TOP)
    }

    /// `as_fault`: locates the region containing `va`, delegates to its
    /// vm_object, then installs the resulting frame in the TLB.
    pub fn fault(&self, va: usize, kind: FaultKind) -> Result<(), Error> {
        let page = align_down(va, PAGE_SIZE);
        let regions = self.regions.lock().unwrap();
        let region = regions
            .iter()
            .find(|r| r.object.mapped_range().contains(&page))
            .ok_or(Error::BadAddress)?;
        if kind == FaultKind::Write && !region.writable {
            return Err(Error::BadAddress);
        }
        let offset = (page - region.object.base) / PAGE_SIZE;
        let frame = region.object.fault(offset, &self.global_paging_lock, kind)?;
        drop(regions);
        self.coremap.mmu_map(self.id, page, frame);
        self.coremap.unpin(frame);
        Ok(())
    }

    /// `as_copy`: used by fork. The source address space is left untouched.
    pub fn copy(&self) -> Result<Self, Error> {
        let src = self.regions.lock().unwrap();
        let mut new_regions = Vec::with_capacity(src.len());
        for region in src.iter() {
            let object = region.object.copy(self.coremap.clone(), self.swap.clone())?;
            new_regions.push(Region {
                object,
                writable: region.writable,
                executable: region.executable,
            });
        }
        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            regions: Mutex::new(new_regions),
            coremap: self.coremap.clone(),
            swap: self.swap.clone(),
            global_paging_lock: self.global_paging_lock.clone(),
        })
    }

    /// `as_activate`. There is no hardware page-directory register to load in
    /// this hosted simulation; this exists so callers have the same surface a
    /// real context switch would.
    pub fn activate(&self) {
        log::trace!("address space {} activated", self.id);
    }

    /// `as_destroy`: tears down every region, returning frames and swap slots.
    pub fn destroy(&self) {
        let mut regions = self.regions.lock().unwrap();
        for region in regions.drain(..) {
            region.object.destroy();
        }
        self.coremap.tlbshootdown_all();
    }
}
