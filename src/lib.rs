//! A hosted simulation of the process-lifecycle and demand-paged
//! virtual-memory core of a small educational kernel.
//!
//! [`Kernel`] bundles the four leaf components — the coremap, the swap store,
//! the PID manager, and the global paging lock shared by every address space —
//! behind one explicit initializer, so no module relies on a hidden global.

pub mod config;
pub mod error;
pub mod memory;
pub mod pid;
pub mod signal;
pub mod vm;

use std::sync::{Arc, Mutex};

use config::Config;
use memory::coremap::Coremap;
use memory::swap::SwapStore;
use pid::PidManager;
use vm::space::AddrSpace;

/// Number of TLB slots simulated per coremap. Arbitrary but small enough that
/// shootdown and slot-replacement paths actually get exercised under test.
const TLB_SLOTS: usize = 32;

/// The kernel's shared infrastructure: one coremap, one swap store, one PID
/// manager, and the paging lock every address space serializes swap I/O
/// through. Construct one per test or per simulated boot.
pub struct Kernel {
    pub pids: PidManager,
    pub coremap: Arc<Coremap>,
    pub swap: Arc<SwapStore>,
    global_paging_lock: Arc<Mutex<()>>,
    config: Config,
}

impl Kernel {
    /// Bootstraps a kernel with `physical_frames` physical frames backed by a
    /// swap store sized per `config.swap_ratio`.
    pub fn new(physical_frames: usize, config: Config) -> Result<Self, error::Error> {
        let coremap = Arc::new(Coremap::new(physical_frames, TLB_SLOTS, &config));
        let swap_pages = physical_frames * config.swap_ratio;
        let swap = Arc::new(SwapStore::new(swap_pages, physical_frames, config.swap_ratio)?);
        Ok(Self {
            pids: PidManager::new(&config),
            coremap,
            swap,
            global_paging_lock: Arc::new(Mutex::new(())),
            config,
        })
    }

    /// Bootstraps a kernel with every default-configuration constant.
    pub fn with_defaults(physical_frames: usize) -> Result<Self, error::Error> {
        Self::new(physical_frames, Config::default())
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a fresh, empty address space wired to this kernel's coremap,
    /// swap store, and paging lock.
    pub fn new_address_space(&self) -> AddrSpace {
        AddrSpace::create(
            self.coremap.clone(),
            self.swap.clone(),
            self.global_paging_lock.clone(),
        )
    }
}
