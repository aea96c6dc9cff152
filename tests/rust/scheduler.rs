// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    inline_config,
    worker_config,
};
use ::anyhow::Result;
use ::pgasrt::{
    Dependency,
    GlobalAddress,
    LoopbackTransport,
    PgasRuntime,
    TaskState,
};
use ::std::sync::{
    atomic::{
        AtomicBool,
        AtomicUsize,
        Ordering,
    },
    Arc,
    Mutex,
};

//======================================================================================================================
// System Tests
//======================================================================================================================

/// Independent tasks all execute on a pool of worker threads.
#[test]
fn test_workers_drain_independent_tasks() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(worker_config(4), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    let counter: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter: Arc<AtomicUsize> = counter.clone();
        if let Err(e) = runtime.spawn(&[], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }) {
            anyhow::bail!("spawn failed: {:?}", e);
        }
    }
    runtime.wait_quiescent()?;
    pgasrt::ensure_eq!(counter.load(Ordering::SeqCst), 100);
    runtime.shutdown().ok();
    Ok(())
}

/// Conflicting writes execute in registration order even with several workers racing.
#[test]
fn test_workers_respect_write_order() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(worker_config(2), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    let addr: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0x9000);
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    for index in 0..16 {
        let order: Arc<Mutex<Vec<usize>>> = order.clone();
        if let Err(e) = runtime.spawn(&[Dependency::output(addr)], move || {
            order.lock().unwrap().push(index);
        }) {
            anyhow::bail!("spawn failed: {:?}", e);
        }
    }
    runtime.wait_quiescent()?;
    let observed: Vec<usize> = order.lock().unwrap().clone();
    pgasrt::ensure_eq!(observed, (0..16).collect::<Vec<usize>>());
    runtime.shutdown().ok();
    Ok(())
}

/// A cancelled task never runs, but its successors still make progress.
#[test]
fn test_cancelled_task_releases_successors() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    let addr: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0xa000);
    let first_ran: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let second_ran: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));

    let first = {
        let first_ran: Arc<AtomicBool> = first_ran.clone();
        match runtime.spawn(&[Dependency::output(addr)], move || {
            first_ran.store(true, Ordering::SeqCst);
        }) {
            Ok(task) => task,
            Err(e) => anyhow::bail!("spawn failed: {:?}", e),
        }
    };
    let second = {
        let second_ran: Arc<AtomicBool> = second_ran.clone();
        match runtime.spawn(&[Dependency::output(addr)], move || {
            second_ran.store(true, Ordering::SeqCst);
        }) {
            Ok(task) => task,
            Err(e) => anyhow::bail!("spawn failed: {:?}", e),
        }
    };

    runtime.cancel(&first)?;
    pgasrt::ensure_eq!(first.state(), TaskState::Cancelled);

    runtime.wait_quiescent()?;
    pgasrt::ensure_eq!(first_ran.load(Ordering::SeqCst), false);
    pgasrt::ensure_eq!(second_ran.load(Ordering::SeqCst), true);
    pgasrt::ensure_eq!(second.state(), TaskState::Finished);
    runtime.shutdown().ok();
    Ok(())
}

/// Cancelling a finished task is invalid.
#[test]
fn test_cancel_after_finish_is_invalid() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    let task = match runtime.spawn(&[], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    runtime.wait_quiescent()?;
    pgasrt::ensure_eq!(task.state(), TaskState::Finished);
    pgasrt::ensure_eq!(runtime.cancel(&task).is_err(), true);
    runtime.shutdown().ok();
    Ok(())
}

/// Ending a phase advances the unit's phase; tasks capture the phase they were submitted in.
#[test]
fn test_phase_progression() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    pgasrt::ensure_eq!(runtime.current_phase(), 0);
    let early = match runtime.spawn(&[], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    runtime.end_phase(0)?;
    pgasrt::ensure_eq!(runtime.current_phase(), 1);
    let late = match runtime.spawn(&[], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(early.phase(), 0);
    pgasrt::ensure_eq!(late.phase(), 1);

    // Phases end in order.
    pgasrt::ensure_eq!(runtime.end_phase(0).is_err(), true);
    runtime.wait_quiescent()?;
    runtime.shutdown().ok();
    Ok(())
}

/// Segments translate global addresses before dependency matching: the same location addressed
/// through a segment and absolutely still serializes.
#[test]
fn test_segment_addresses_alias() -> Result<()> {
    let runtime: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    };
    runtime.register_segment(5, 0xb000)?;

    let absolute: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0xb040);
    let relative: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 5, 0x40);

    if let Err(e) = runtime.spawn(&[Dependency::output(absolute)], || ()) {
        anyhow::bail!("spawn failed: {:?}", e);
    }
    let second = match runtime.spawn(&[Dependency::output(relative)], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(second.unresolved(), 1);

    runtime.wait_quiescent()?;
    runtime.shutdown().ok();
    Ok(())
}
