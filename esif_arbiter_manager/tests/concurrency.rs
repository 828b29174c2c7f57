mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;

use esif_arbiter_core::*;
use esif_arbiter_manager::*;

const SETTLE: Duration = Duration::from_millis(100);

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn stop_arbitration_waits_for_outstanding_reference() {
    let (h, cpu) = Harness::with_cpu();
    h.submit(APP_A, &cpu, pl(0), 10);

    let ctx = cpu.slot().get().unwrap();
    let held = ctx.lookup(pl(0)).unwrap();
    assert_eq!(held.ref_count(), 2);

    let (tx, rx) = mpsc::channel();
    let mgr = Arc::clone(&h.manager);
    let id = cpu.id();
    let stopper = thread::spawn(move || {
        let r = mgr.stop_arbitration(id, pl(0));
        tx.send(()).unwrap();
        r
    });

    // Unlinked and marked: new lookups miss it while the stop is still blocked.
    wait_until(|| held.is_marked_for_delete());
    assert_eq!(ctx.lookup(pl(0)).unwrap_err(), ArbError::NotFound);
    assert!(matches!(h.submit(APP_B, &cpu, pl(0), 3), PrimitiveOutcome::Executed(_)));
    assert!(rx.recv_timeout(SETTLE).is_err());

    drop(held);
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(stopper.join().unwrap(), Ok(()));
}

#[test]
fn blocked_stop_does_not_block_other_entries() {
    let (h, cpu) = Harness::with_cpu();
    h.submit(APP_A, &cpu, pl(1), 1);
    let ctx = cpu.slot().get().unwrap();
    let held = ctx.lookup(pl(0)).unwrap();

    let mgr = Arc::clone(&h.manager);
    let id = cpu.id();
    let stopper = thread::spawn(move || mgr.stop_arbitration(id, pl(0)));
    wait_until(|| held.is_marked_for_delete());

    // Same participant, different entries: no waiting on the pending delete.
    assert_eq!(h.submit(APP_B, &cpu, pl(1), 5), PrimitiveOutcome::Queued);
    h.manager.set_limits(cpu.id(), pl(3), Some(100), None).unwrap();
    // pl(1), pl(3) and the TCC offset remain.
    assert_eq!(h.manager.get_information(Some(cpu.id()), None).participants[0].entries.len(), 3);

    drop(held);
    assert_eq!(stopper.join().unwrap(), Ok(()));
}

#[test]
fn get_waits_for_pending_arbitrated_set() {
    let (h, cpu) = Harness::with_cpu();
    let get = key(GET_RAPL_POWER_LIMIT, 0);

    h.pipeline.close();
    h.submit(APP_A, &cpu, pl(0), 42);
    // The worker now holds the SET; only the marker is left in the queue.
    h.pipeline.wait_blocked();
    assert_eq!(h.manager.pending_jobs(), 0);

    let (tx, rx) = mpsc::channel();
    let mgr = Arc::clone(&h.manager);
    let id = cpu.id();
    let reader = thread::spawn(move || {
        let r = mgr.execute_primitive(APP_B, id, get, Payload::empty());
        tx.send(()).unwrap();
        r
    });
    assert!(rx.recv_timeout(SETTLE).is_err());

    h.pipeline.open();
    let out = reader.join().unwrap().unwrap();
    assert_eq!(out, PrimitiveOutcome::Executed(u32_payload(42)));
}

#[test]
fn get_of_unrelated_primitive_is_not_delayed() {
    let (h, cpu) = Harness::with_cpu();

    h.pipeline.close();
    h.submit(APP_A, &cpu, pl(0), 42);
    h.pipeline.wait_blocked();

    let out = h
        .manager
        .execute_primitive(APP_B, cpu.id(), key(GET_FAN_LEVEL, 0), Payload::empty())
        .unwrap();
    assert_eq!(out, PrimitiveOutcome::Executed(u32_payload(0)));
    h.pipeline.open();
}

#[test]
fn shutdown_releases_delayed_readers() {
    let (h, cpu) = Harness::with_cpu();
    let get = key(GET_RAPL_POWER_LIMIT, 0);

    h.pipeline.close();
    h.submit(APP_A, &cpu, pl(0), 42);
    h.pipeline.wait_blocked();

    let mgr = Arc::clone(&h.manager);
    let id = cpu.id();
    let reader = thread::spawn(move || mgr.execute_primitive(APP_B, id, get, Payload::empty()));
    wait_until(|| h.manager.pending_jobs() == 1);

    let mgr = Arc::clone(&h.manager);
    let stopper = thread::spawn(move || mgr.stop());
    thread::sleep(SETTLE);
    h.pipeline.open();
    stopper.join().unwrap();

    // The queued read was abandoned and then executed directly, after the SET landed.
    let out = reader.join().unwrap().unwrap();
    assert_eq!(out, PrimitiveOutcome::Executed(u32_payload(42)));
    assert_eq!(h.manager.pending_jobs(), 0);
}

#[test]
fn concurrent_submitters_converge_on_winner() {
    let (h, cpu) = Harness::with_cpu();
    let tcc = key(SET_TCC_OFFSET, 255);

    let workers: Vec<_> = (0..8u64)
        .map(|t| {
            let mgr = Arc::clone(&h.manager);
            let id = cpu.id();
            thread::spawn(move || {
                for i in 0..50u32 {
                    let v = (i * 37 + t as u32 * 11) % 1000;
                    mgr.execute_primitive(AppHandle(t), id, tcc, u32_payload(v)).unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    h.manager.flush().unwrap();

    let info = h.manager.get_information(Some(cpu.id()), Some(tcc));
    let e = &info.participants[0].entries[0];
    assert_eq!(e.request_count, 8);
    // The last write applied is the current winner.
    assert_eq!(h.pipeline.device_value(cpu.id(), tcc), e.arbitrated_value);
}

#[test]
fn global_disable_leaves_no_request_behind_concurrent_submitters() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let (h, cpu) = Harness::with_cpu();
    let tcc = key(SET_TCC_OFFSET, 255);

    for round in 0..20u32 {
        h.manager.set_arbitration_state(Target::Global, true).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let mgr = Arc::clone(&h.manager);
                let done = Arc::clone(&done);
                let id = cpu.id();
                thread::spawn(move || {
                    let mut v = round;
                    while !done.load(Ordering::Acquire) {
                        mgr.execute_primitive(AppHandle(t), id, tcc, u32_payload(v)).unwrap();
                        v += 1;
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(2));
        h.manager.set_arbitration_state(Target::Global, false).unwrap();

        // Submissions racing the disable were either refused or purged by it.
        let info = h.manager.get_information(Some(cpu.id()), Some(tcc));
        assert_eq!(info.participants[0].entries[0].request_count, 0, "round {round}");

        done.store(true, Ordering::Release);
        for w in workers {
            w.join().unwrap();
        }
        let info = h.manager.get_information(Some(cpu.id()), Some(tcc));
        assert_eq!(info.participants[0].entries[0].request_count, 0, "round {round}");
    }
}
