//! This module implements the logical page: the per-virtual-page descriptor
//! that tracks whether a page is resident, swapped out, or has just been
//! materialized as zero-fill.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::memory::coremap::{Coremap, FrameIndex, PageOwner};
use crate::memory::swap::{SwapAddr, SwapStore};
use crate::memory::Page;
use crate::vm::FaultKind;

struct LpageState {
    /// `None` when the page is not resident (swapped out).
    paddr: Option<FrameIndex>,
    /// Always valid once the lpage has been materialized — the frame is written
    /// back here on eviction.
    swapaddr: SwapAddr,
    dirty: bool,
}

/// A single virtual page's residency state. Exclusively owned by one vm_object
/// slot; accessed by `(object, index)` rather than by raw pointer when crossing
/// module boundaries.
pub struct Lpage {
    state: Mutex<LpageState>,
    coremap: Arc<Coremap>,
    swap: Arc<SwapStore>,
}

impl Lpage {
    fn materialize(
        coremap: Arc<Coremap>,
        swap: Arc<SwapStore>,
        fill: impl FnOnce() -> Box<Page>,
    ) -> Result<Arc<Self>, Error> {
        let swapaddr = swap.alloc();
        let lp = Arc::new(Self {
            state: Mutex::new(LpageState {
                paddr: None,
                swapaddr,
                dirty: false,
            }),
            coremap: coremap.clone(),
            swap,
        });
        // alloc_user returns the frame already pinned, atomically with the
        // allocation, so it can never be picked as an eviction victim before
        // this lpage's state is published below.
        let frame = coremap.alloc_user(lp.clone())?;
        coremap.write_page(frame, &fill());
        {
            let mut st = lp.state.lock().unwrap();
            st.paddr = Some(frame);
            st.dirty = true;
        }
        coremap.unpin(frame);
        Ok(lp)
    }

    /// `lpage_zerofill`: materializes a fresh, zeroed, resident page.
    pub fn zerofill(coremap: Arc<Coremap>, swap: Arc<SwapStore>) -> Result<Arc<Self>, Error> {
        let lp = Self::materialize(coremap, swap, crate::memory::zeroed_page)?;
        log::trace!("lpage: zero-fill materialized");
        Ok(lp)
    }

    /// `lpage_copy`: used by fork. Produces a new, independent lpage holding the
    /// same contents as `self`, paging `self` in first if it is currently
    /// swapped out. `self`'s address space is never modified.
    pub fn copy(&self, coremap: Arc<Coremap>, swap: Arc<SwapStore>) -> Result<Arc<Self>, Error> {
        let contents = self.snapshot(&coremap)?;
        let lp = Self::materialize(coremap, swap, move || contents);
        lp
    }

    /// Returns a copy of this lpage's current contents, paging in from swap if
    /// the page is not resident. Leaves `self` exactly as it found it.
    fn snapshot(&self, coremap: &Coremap) -> Result<Box<Page>, Error> {
        if let Some(frame) = self.lock_and_pin(coremap) {
            let contents = coremap.read_page(frame);
            coremap.unpin(frame);
            return Ok(contents);
        }
        let swapaddr = self.state.lock().unwrap().swapaddr;
        Ok(self.swap.pagein(swapaddr))
    }

    /// `lpage_lock_and_pin`: pins the frame this lpage currently claims,
    /// retrying if the lpage's residency changed underneath us while we were
    /// blocked waiting for the pin — this is what lets callers take the
    /// coremap's pin without ever holding the lpage's own lock across it.
    /// Returns `None` if the page is not resident.
    fn lock_and_pin(&self, coremap: &Coremap) -> Option<FrameIndex> {
        loop {
            let observed = self.state.lock().unwrap().paddr?;
            coremap.pin(observed);
            let now = self.state.lock().unwrap().paddr;
            if now == Some(observed) {
                return Some(observed);
            }
            coremap.unpin(observed);
        }
    }

    /// Handles a fault against this lpage: installs residency if needed and
    /// returns a pinned frame for the caller to map and then unpin.
    ///
    /// Resident pages take the *minor fault* path (pin in place); swapped pages
    /// take the *major fault* path (allocate a frame, page in under the global
    /// paging lock, publish the new residency).
    pub fn fault(
        self: &Arc<Self>,
        global_paging_lock: &Mutex<()>,
        kind: FaultKind,
    ) -> Result<FrameIndex, Error> {
        if let Some(frame) = self.lock_and_pin(&self.coremap) {
            if kind == FaultKind::Write {
                self.state.lock().unwrap().dirty = true;
            }
            return Ok(frame);
        }

        // Already pinned by alloc_user; see the comment in materialize().
        let frame = self.coremap.alloc_user(self.clone())?;
        let swapaddr = self.state.lock().unwrap().swapaddr;
        {
            let _guard = global_paging_lock.lock().unwrap();
            let contents = self.swap.pagein(swapaddr);
            self.coremap.write_page(frame, &contents);
        }
        let mut st = self.state.lock().unwrap();
        st.paddr = Some(frame);
        st.dirty = kind == FaultKind::Write;
        Ok(frame)
    }

    /// Releases this lpage's resources: frees its physical frame, if resident,
    /// and its swap slot.
    pub fn destroy(&self) {
        let (paddr, swapaddr) = {
            let st = self.state.lock().unwrap();
            (st.paddr, st.swapaddr)
        };
        if let Some(frame) = paddr {
            self.coremap.free(frame);
        }
        self.swap.free(swapaddr);
    }

    /// Whether this lpage currently holds a physical frame.
    pub fn is_resident(&self) -> bool {
        self.state.lock().unwrap().paddr.is_some()
    }

    /// Returns the frame this lpage currently occupies, if resident, without
    /// taking the coremap pin. For diagnostics and tests.
    pub fn current_frame(&self) -> Option<FrameIndex> {
        self.state.lock().unwrap().paddr
    }
}

impl PageOwner for Lpage {
    fn evict(&self, contents: &Page) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if st.dirty {
            self.swap.pageout(st.swapaddr, contents);
        }
        st.paddr = None;
        st.dirty = false;
        Ok(())
    }
}
