//! This module implements the process-lifecycle manager: PID allocation, the
//! parent/child table, exit/join/detach, and dispatch of pending signals.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::config::Config;
use crate::error::Error;
use crate::signal::Signal;

/// Type of a process identifier.
pub type Pid = u32;

/// The null pid: no process, no parent.
pub const INVALID_PID: Pid = 0;
/// The permanent bootstrap pid, never allocated or freed.
pub const BOOTUP_PID: Pid = 1;
/// Lowest pid handed out by [`PidManager::alloc`].
pub const PID_MIN: Pid = 2;

/// `waitpid` option requesting a non-blocking poll instead of sleeping.
pub const WNOHANG: i32 = 1;

/// The result of a [`PidManager::join`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// `WNOHANG` was given and the target has not exited yet.
    Pending,
    /// The target has exited with the given status.
    Exited(i32),
}

/// The result of [`PidManager::check_ppid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildQuery {
    /// `target` exists and its parent is the caller.
    Child,
    /// `target` exists but its parent is not the caller.
    NotChild,
    /// No record exists for `target`.
    Missing,
}

/// What a process should do after calling [`PidManager::handle_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// No pending action; resume normal execution.
    Continue,
    /// A terminating signal is pending; the caller must exit with this signal.
    Terminate(Signal),
}

struct PidInfo {
    ppid: Pid,
    exited: bool,
    exit_status: i32,
    waiting_threads: usize,
    detached: bool,
    sigkill: Option<Signal>,
    stopped: bool,
    /// Broadcast when this process exits; joiners wait on it.
    exit_cv: Arc<Condvar>,
    /// Broadcast when a stopped process should recheck its signal state.
    signal_cv: Arc<Condvar>,
}

impl PidInfo {
    fn new(ppid: Pid) -> Self {
        Self {
            ppid,
            exited: false,
            exit_status: 0,
            waiting_threads: 0,
            detached: false,
            sigkill: None,
            stopped: false,
            exit_cv: Arc::new(Condvar::new()),
            signal_cv: Arc::new(Condvar::new()),
        }
    }
}

struct Table {
    procs_max: usize,
    pid_max: Pid,
    nprocs: usize,
    next_pid: Pid,
    entries: HashMap<Pid, PidInfo>,
}

fn inc_pid(pid: Pid, pid_max: Pid) -> Pid {
    if pid >= pid_max {
        PID_MIN
    } else {
        pid + 1
    }
}

/// The process table and its single guarding lock (`pid_lock`).
///
/// Every mutation of a process record happens under this one mutex; condition
/// variables attached to individual records are always waited on while holding it,
/// so a spurious or targeted wakeup always observes a consistent table.
pub struct PidManager {
    state: Mutex<Table>,
}

impl PidManager {
    /// Bootstraps the table with the permanent [`BOOTUP_PID`] entry.
    pub fn new(config: &Config) -> Self {
        let mut entries = HashMap::new();
        entries.insert(BOOTUP_PID, PidInfo::new(INVALID_PID));
        let pid_max = (config.procs_max as Pid).saturating_mul(1024).max(PID_MIN + 1);
        Self {
            state: Mutex::new(Table {
                procs_max: config.procs_max,
                pid_max,
                nprocs: 1,
                next_pid: PID_MIN,
                entries,
            }),
        }
    }

    /// Allocates a fresh pid whose parent is `parent`.
    ///
    /// Fails with [`Error::TryAgain`] once the table holds `procs_max` live records.
    pub fn alloc(&self, parent: Pid) -> Result<Pid, Error> {
        let mut guard = self.state.lock().unwrap();
        if guard.nprocs >= guard.procs_max {
            return Err(Error::TryAgain);
        }
        let start = guard.next_pid;
        loop {
            let candidate = guard.next_pid;
            guard.next_pid = inc_pid(guard.next_pid, guard.pid_max);
            if !guard.entries.contains_key(&candidate) {
                guard.entries.insert(candidate, PidInfo::new(parent));
                guard.nprocs += 1;
                return Ok(candidate);
            }
            if guard.next_pid == start {
                return Err(Error::TryAgain);
            }
        }
    }

    /// Undoes an [`alloc`](Self::alloc) whose thread never ran: the record is
    /// unconditionally dropped, since nothing could have joined or detached it yet.
    pub fn unalloc(&self, pid: Pid) {
        let mut guard = self.state.lock().unwrap();
        if guard.entries.remove(&pid).is_some() {
            guard.nprocs -= 1;
        }
    }

    /// Records `pid`'s exit, disowns its children (detaching them too if
    /// `detach_children`), and wakes any joiners.
    pub fn exit(&self, pid: Pid, status: i32, detach_children: bool) {
        let mut guard = self.state.lock().unwrap();
        for info in guard.entries.values_mut() {
            if info.ppid == pid {
                info.ppid = INVALID_PID;
                if detach_children {
                    info.detached = true;
                }
            }
        }
        let (drop_self, exit_cv) = {
            let info = guard
                .entries
                .get_mut(&pid)
                .expect("exit() called on an unallocated pid");
            info.exited = true;
            info.exit_status = status;
            (info.detached, info.exit_cv.clone())
        };
        if drop_self {
            guard.entries.remove(&pid);
            guard.nprocs -= 1;
        } else {
            exit_cv.notify_all();
        }
    }

    /// Waits for `target` to exit and reports its status.
    ///
    /// Any thread may join any non-detached target; restricting a join to the
    /// caller's own children is the job of [`Self::waitpid`], not this method.
    pub fn join(&self, caller: Pid, target: Pid, flags: i32) -> Result<JoinOutcome, Error> {
        if target == INVALID_PID || target == BOOTUP_PID {
            return Err(Error::InvalidArgument);
        }
        if target == caller {
            return Err(Error::Deadlock);
        }
        let mut guard = self.state.lock().unwrap();
        loop {
            let (detached, exited) = {
                let info = guard.entries.get(&target).ok_or(Error::NoSuchProcess)?;
                (info.detached, info.exited)
            };
            if detached {
                return Err(Error::InvalidArgument);
            }
            if !exited {
                if flags & WNOHANG != 0 {
                    return Ok(JoinOutcome::Pending);
                }
                let cv = guard.entries.get(&target).unwrap().exit_cv.clone();
                guard.entries.get_mut(&target).unwrap().waiting_threads += 1;
                guard = cv.wait(guard).unwrap();
                if let Some(info) = guard.entries.get_mut(&target) {
                    info.waiting_threads -= 1;
                }
                continue;
            }
            let info = guard.entries.get_mut(&target).unwrap();
            let status = info.exit_status;
            let last_joiner = info.waiting_threads == 0;
            if last_joiner {
                guard.entries.remove(&target);
                guard.nprocs -= 1;
            }
            return Ok(JoinOutcome::Exited(status));
        }
    }

    /// Like [`join`](Self::join), but first requires `target` to be a child of
    /// `caller`, mapping the waitpid-specific error cases.
    pub fn waitpid(&self, caller: Pid, target: Pid, flags: i32) -> Result<JoinOutcome, Error> {
        if target == caller {
            return Err(Error::Deadlock);
        }
        match self.check_ppid(caller, target) {
            ChildQuery::Missing => return Err(Error::NoSuchProcess),
            ChildQuery::NotChild => return Err(Error::NotAChild),
            ChildQuery::Child => {}
        }
        self.join(caller, target, flags)
    }

    /// Relinquishes `caller`'s interest in `target`'s exit status.
    pub fn detach(&self, caller: Pid, target: Pid) -> Result<(), Error> {
        if target == INVALID_PID {
            return Err(Error::InvalidArgument);
        }
        let mut guard = self.state.lock().unwrap();
        let (ppid, waiting_threads, detached, exited) = {
            let info = guard.entries.get(&target).ok_or(Error::NoSuchProcess)?;
            (info.ppid, info.waiting_threads, info.detached, info.exited)
        };
        if ppid != caller || waiting_threads > 0 || detached {
            return Err(Error::InvalidArgument);
        }
        if exited {
            guard.entries.remove(&target);
            guard.nprocs -= 1;
        } else {
            guard.entries.get_mut(&target).unwrap().detached = true;
        }
        Ok(())
    }

    /// Reports whether `target` exists and, if so, whether `caller` is its parent.
    pub fn check_ppid(&self, caller: Pid, target: Pid) -> ChildQuery {
        let guard = self.state.lock().unwrap();
        match guard.entries.get(&target) {
            None => ChildQuery::Missing,
            Some(info) if info.ppid == caller => ChildQuery::Child,
            Some(_) => ChildQuery::NotChild,
        }
    }

    /// Delivers `signal` to `target`, per the eight-signal state machine.
    pub fn send_signal(&self, target: Pid, signal: Signal) -> Result<(), Error> {
        let mut guard = self.state.lock().unwrap();
        let info = guard.entries.get_mut(&target).ok_or(Error::NoSuchProcess)?;
        if signal.is_terminating() {
            info.sigkill = Some(signal);
            info.signal_cv.notify_all();
        } else if signal == Signal::Stop {
            info.stopped = true;
        } else if signal == Signal::Cont {
            info.stopped = false;
            info.signal_cv.notify_all();
        }
        // Winch and Info are recognized but take no action.
        Ok(())
    }

    /// Checks `target`'s pending signal state, blocking while stopped.
    ///
    /// Called by a process at the point it would return to userland. If a
    /// terminating signal is pending the caller must exit with it (the manager
    /// does not terminate the caller's thread itself — see
    /// [`SignalOutcome::Terminate`]).
    pub fn handle_signal(&self, pid: Pid) -> Result<SignalOutcome, Error> {
        let mut guard = self.state.lock().unwrap();
        loop {
            let cv = {
                let info = guard.entries.get(&pid).ok_or(Error::NoSuchProcess)?;
                if let Some(sig) = info.sigkill {
                    return Ok(SignalOutcome::Terminate(sig));
                }
                if !info.stopped {
                    return Ok(SignalOutcome::Continue);
                }
                info.signal_cv.clone()
            };
            guard = cv.wait(guard).unwrap();
        }
    }

    /// Number of live records, for diagnostics and tests.
    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().nprocs
    }
}
