// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    inline_config,
    probe_with_numa,
    Mesh,
};
use ::anyhow::Result;
use ::pgasrt::{
    Dependency,
    GlobalAddress,
    LoopbackTransport,
    PgasRuntime,
    TaskState,
    UnitId,
};
use ::std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

//======================================================================================================================
// Helper Functions
//======================================================================================================================

/// Brings up a single-unit runtime executing tasks inline.
fn single_unit() -> Result<Arc<PgasRuntime>> {
    match PgasRuntime::new(inline_config(), Arc::new(LoopbackTransport::new())) {
        Ok(runtime) => Ok(runtime),
        Err(e) => anyhow::bail!("failed to bring up runtime: {:?}", e),
    }
}

/// Brings up a two-unit team over an in-process mesh, executing tasks inline.
fn two_units() -> Result<(Arc<Mesh>, Arc<PgasRuntime>, Arc<PgasRuntime>)> {
    let hosts: Vec<String> = vec!["h1".to_string(), "h2".to_string()];
    let hwinfo = vec![probe_with_numa(0, 1), probe_with_numa(0, 1)];
    let mesh: Arc<Mesh> = Mesh::new(hosts, hwinfo);
    let rt0: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), mesh.endpoint(0)) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up unit 0: {:?}", e),
    };
    let rt1: Arc<PgasRuntime> = match PgasRuntime::new(inline_config(), mesh.endpoint(1)) {
        Ok(runtime) => runtime,
        Err(e) => anyhow::bail!("failed to bring up unit 1: {:?}", e),
    };
    Ok((mesh, rt0, rt1))
}

fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
    let flag: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
    let setter: Arc<AtomicBool> = flag.clone();
    (flag, move || setter.store(true, Ordering::SeqCst))
}

//======================================================================================================================
// System Tests
//======================================================================================================================

/// Two local tasks writing the same address serialize in registration order.
#[test]
fn test_two_writes_serialize() -> Result<()> {
    let runtime: Arc<PgasRuntime> = single_unit()?;
    let addr: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0x4000);
    let (first_ran, first_work) = flag();
    let (second_ran, second_work) = flag();

    let first = match runtime.spawn(&[Dependency::output(addr)], first_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    let second = match runtime.spawn(&[Dependency::output(addr)], second_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };

    pgasrt::ensure_eq!(first.state(), TaskState::Ready);
    pgasrt::ensure_eq!(second.state(), TaskState::Created);
    pgasrt::ensure_eq!(second.unresolved(), 1);
    pgasrt::ensure_eq!(runtime.datadeps().live_entries(), 2);

    // Running the first write makes the second ready.
    pgasrt::ensure_eq!(runtime.step()?, true);
    pgasrt::ensure_eq!(first_ran.load(Ordering::SeqCst), true);
    pgasrt::ensure_eq!(second_ran.load(Ordering::SeqCst), false);
    pgasrt::ensure_eq!(second.unresolved(), 0);
    pgasrt::ensure_eq!(second.state(), TaskState::Ready);

    pgasrt::ensure_eq!(runtime.step()?, true);
    pgasrt::ensure_eq!(second_ran.load(Ordering::SeqCst), true);
    runtime.shutdown().ok();
    Ok(())
}

/// Write-read-write on one address: the read waits for the first write, the second write waits
/// for the read and the shadowing write stops the dependency scan.
#[test]
fn test_write_read_write_chain() -> Result<()> {
    let runtime: Arc<PgasRuntime> = single_unit()?;
    let addr: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0x8000);

    let a = match runtime.spawn(&[Dependency::output(addr)], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    let b = match runtime.spawn(&[Dependency::input(addr)], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    let c = match runtime.spawn(&[Dependency::output(addr)], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };

    pgasrt::ensure_eq!(a.unresolved(), 0);
    pgasrt::ensure_eq!(b.unresolved(), 1);
    pgasrt::ensure_eq!(c.unresolved(), 2);

    runtime.wait_quiescent()?;
    pgasrt::ensure_eq!(a.state(), TaskState::Finished);
    pgasrt::ensure_eq!(b.state(), TaskState::Finished);
    pgasrt::ensure_eq!(c.state(), TaskState::Finished);
    runtime.shutdown().ok();
    Ok(())
}

/// A remote read arriving before any local writer is parked, handed to the writer of the same
/// phase once it registers, and released when that writer finishes.
#[test]
fn test_remote_read_parks_until_writer_registers() -> Result<()> {
    let (mesh, rt0, rt1) = two_units()?;
    for phase in 0..3 {
        rt0.end_phase(phase)?;
        rt1.end_phase(phase)?;
    }

    let addr: GlobalAddress = GlobalAddress::new(rt0.my_unit(), 0, 0x2000);
    let (reader_ran, reader_work) = flag();
    let reader = match rt1.spawn(&[Dependency::input(addr)], reader_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(reader.unresolved(), 1);

    // The request arrives before any local writer and is parked.
    rt0.progress()?;
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 1);

    // A same-phase writer claims the parked request.
    let (writer_ran, writer_work) = flag();
    let writer = match rt0.spawn(&[Dependency::output(addr)], writer_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 0);
    pgasrt::ensure_eq!(writer.unresolved(), 0);

    // The writer finishes; exactly one release travels back to the reader.
    pgasrt::ensure_eq!(rt0.step()?, true);
    pgasrt::ensure_eq!(writer_ran.load(Ordering::SeqCst), true);
    pgasrt::ensure_eq!(mesh.releases().len(), 1);
    pgasrt::ensure_eq!(mesh.releases()[0].0, UnitId::from(1u32));

    rt1.progress()?;
    pgasrt::ensure_eq!(reader.unresolved(), 0);
    pgasrt::ensure_eq!(reader.state(), TaskState::Ready);
    pgasrt::ensure_eq!(rt1.step()?, true);
    pgasrt::ensure_eq!(reader_ran.load(Ordering::SeqCst), true);
    pgasrt::ensure_eq!(mesh.releases().len(), 1);

    rt0.shutdown().ok();
    rt1.shutdown().ok();
    Ok(())
}

/// A writer of a later phase must not overwrite the input of a parked reader from an earlier
/// phase: it requests a direct dependency from the reader's unit and leaves the request parked.
#[test]
fn test_later_writer_waits_for_earlier_remote_read() -> Result<()> {
    let (_mesh, rt0, rt1) = two_units()?;
    for phase in 0..4 {
        rt0.end_phase(phase)?;
    }
    for phase in 0..2 {
        rt1.end_phase(phase)?;
    }
    pgasrt::ensure_eq!(rt0.current_phase(), 4);
    pgasrt::ensure_eq!(rt1.current_phase(), 2);

    let addr: GlobalAddress = GlobalAddress::new(rt0.my_unit(), 0, 0x3000);
    let (reader_ran, reader_work) = flag();
    let reader = match rt1.spawn(&[Dependency::input(addr)], reader_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    rt0.progress()?;
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 1);

    // The phase-4 writer registers: a direct dependency is requested from the reader's unit, the
    // writer now waits for the reader, and the parked request stays for a later same-phase writer.
    let (writer_ran, writer_work) = flag();
    let writer = match rt0.spawn(&[Dependency::output(addr)], writer_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(writer.unresolved(), 1);
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 1);
    pgasrt::ensure_eq!(rt0.datadeps().pending_len(), 1);

    // The reader's unit records the direct edge.
    rt1.progress()?;

    // Ending the phase flushes the parked request, releasing the reader.
    rt0.end_phase(4)?;
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 0);
    rt1.progress()?;
    pgasrt::ensure_eq!(reader.unresolved(), 0);
    pgasrt::ensure_eq!(rt1.step()?, true);
    pgasrt::ensure_eq!(reader_ran.load(Ordering::SeqCst), true);
    pgasrt::ensure_eq!(writer_ran.load(Ordering::SeqCst), false);

    // The reader finished: its release resolves the writer's direct dependency.
    rt0.progress()?;
    pgasrt::ensure_eq!(writer.unresolved(), 0);
    pgasrt::ensure_eq!(rt0.step()?, true);
    pgasrt::ensure_eq!(writer_ran.load(Ordering::SeqCst), true);

    pgasrt::ensure_eq!(rt0.datadeps().pending_len(), 0);
    pgasrt::ensure_eq!(rt1.datadeps().pending_len(), 0);
    rt0.shutdown().ok();
    rt1.shutdown().ok();
    Ok(())
}

/// Ending a phase releases every parked remote request unconditionally.
#[test]
fn test_end_phase_flushes_parked_requests() -> Result<()> {
    let (mesh, rt0, rt1) = two_units()?;

    let addr: GlobalAddress = GlobalAddress::new(rt0.my_unit(), 0, 0x5000);
    let (reader_ran, reader_work) = flag();
    let reader = match rt1.spawn(&[Dependency::input(addr)], reader_work) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    rt0.progress()?;
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 1);

    rt0.end_phase(0)?;
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 0);
    pgasrt::ensure_eq!(mesh.releases().len(), 1);

    rt1.progress()?;
    pgasrt::ensure_eq!(reader.state(), TaskState::Ready);
    pgasrt::ensure_eq!(rt1.step()?, true);
    pgasrt::ensure_eq!(reader_ran.load(Ordering::SeqCst), true);
    rt0.shutdown().ok();
    rt1.shutdown().ok();
    Ok(())
}

/// Resetting the dependency hash empties the slots and is idempotent.
#[test]
fn test_reset_empties_the_hash() -> Result<()> {
    let runtime: Arc<PgasRuntime> = single_unit()?;
    let addr: GlobalAddress = GlobalAddress::new(runtime.my_unit(), 0, 0x6000);
    if let Err(e) = runtime.spawn(&[Dependency::output(addr)], || ()) {
        anyhow::bail!("spawn failed: {:?}", e);
    }
    runtime.wait_quiescent()?;
    pgasrt::ensure_eq!(runtime.datadeps().live_entries(), 1);

    runtime.datadeps().reset()?;
    pgasrt::ensure_eq!(runtime.datadeps().live_entries(), 0);
    runtime.datadeps().reset()?;
    pgasrt::ensure_eq!(runtime.datadeps().live_entries(), 0);
    runtime.shutdown().ok();
    Ok(())
}

/// Remote dependency requests must be reads.
#[test]
fn test_remote_request_must_be_a_read() -> Result<()> {
    let (_mesh, rt0, rt1) = two_units()?;
    let addr: GlobalAddress = GlobalAddress::new(rt0.my_unit(), 0, 0x7000);

    // A remote write is forwarded by the origin but rejected by the owner.
    let writer = match rt1.spawn(&[Dependency::output(addr)], || ()) {
        Ok(task) => task,
        Err(e) => anyhow::bail!("spawn failed: {:?}", e),
    };
    pgasrt::ensure_eq!(writer.unresolved(), 1);
    pgasrt::ensure_eq!(rt0.progress().is_err(), true);
    pgasrt::ensure_eq!(rt0.datadeps().unhandled_len(), 0);

    rt0.shutdown().ok();
    rt1.shutdown().ok();
    Ok(())
}
