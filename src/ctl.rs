// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reservation state machine: shared state, the convergent reservation
//! engine, the worker loop, and the hot-plug glue.

use crate::cpuset::CpuId;
use crate::cpuset::CpuSet;
use crate::host::CpuHost;
use crate::host::HotplugHandler;
use parking_lot::Condvar;
use parking_lot::Mutex;
use std::sync::Arc;

/// The shared reservation controller.
///
/// One instance exists per [`CpuReserve`](crate::CpuReserve). The enable
/// toggle and hot-plug handlers mutate the state under the lock and wake the
/// worker thread, which serializes all engine invocations; per-CPU isolation
/// attempts therefore never race with each other. The engine is convergent
/// rather than transactional: every invocation moves actual isolation state
/// closer to the desired reservation and is safe to re-run after any partial
/// failure.
pub struct CpuReserveCtl {
    host: Arc<dyn CpuHost>,
    /// The CPUs requested for reservation. Immutable after init.
    reserve_cpus: CpuSet,
    state: Mutex<ReservationState>,
    wake: Condvar,
}

#[derive(Default)]
struct ReservationState {
    reservation_enabled: bool,
    pending: bool,
    stop: bool,
    /// Completed engine invocations.
    cycles: u64,
    /// The CPUs isolated by this controller.
    our_isolated_cpus: CpuSet,
    /// The CPUs currently counted as reserved: `our_isolated_cpus` plus any
    /// reserve CPU that is offline.
    final_reserved_cpus: CpuSet,
}

/// A point-in-time snapshot of the reservation state, for diagnostics.
#[derive(Debug, Clone)]
pub struct ReserveStatus {
    /// The CPUs requested for reservation.
    pub reserve_cpus: CpuSet,
    /// The CPUs currently counted as reserved.
    pub final_reserved_cpus: CpuSet,
    /// The CPUs isolated by this controller.
    pub our_isolated_cpus: CpuSet,
    /// All online CPUs, as reported by the host.
    pub online_cpus: CpuSet,
    /// All isolated CPUs, as reported by the host.
    pub isolated_cpus: CpuSet,
    /// Whether reservation enforcement is active.
    pub enabled: bool,
    /// Completed reservation/reversion cycles.
    pub cycles: u64,
}

impl CpuReserveCtl {
    pub(crate) fn new(reserve_cpus: CpuSet, host: Arc<dyn CpuHost>) -> Self {
        Self {
            host,
            reserve_cpus,
            state: Mutex::new(ReservationState::default()),
            wake: Condvar::new(),
        }
    }

    /// Returns whether reservation enforcement is active.
    pub fn enabled(&self) -> bool {
        self.state.lock().reservation_enabled
    }

    /// Enables or disables reservation enforcement.
    ///
    /// A no-op if the state is unchanged. Otherwise the worker is woken to
    /// reserve or release the CPUs asynchronously.
    pub fn set_enabled(&self, enable: bool) {
        {
            let mut state = self.state.lock();
            if enable == state.reservation_enabled {
                return;
            }
            tracing::debug!(enable, "reservation toggled");
            state.reservation_enabled = enable;
            state.pending = true;
        }
        self.wake.notify_one();
        self.log_status(if enable { "enable" } else { "disable" });
    }

    /// Captures a snapshot of the current reservation state.
    pub fn status(&self) -> ReserveStatus {
        let online_cpus = self.host.online_cpus();
        let isolated_cpus = self.host.isolated_cpus();
        let state = self.state.lock();
        ReserveStatus {
            reserve_cpus: self.reserve_cpus.clone(),
            final_reserved_cpus: state.final_reserved_cpus.clone(),
            our_isolated_cpus: state.our_isolated_cpus.clone(),
            online_cpus,
            isolated_cpus,
            enabled: state.reservation_enabled,
            cycles: state.cycles,
        }
    }

    fn log_status(&self, msg: &str) {
        let status = self.status();
        tracing::debug!(
            msg,
            reserve = %status.reserve_cpus,
            reserved = %status.final_reserved_cpus,
            our_isolated = %status.our_isolated_cpus,
            online = %status.online_cpus,
            isolated = %status.isolated_cpus,
            "reservation status"
        );
    }

    /// Converges actual isolation state toward the full reservation.
    ///
    /// Offline CPUs can't be isolated but still count as reserved; when a
    /// reserved offline CPU comes online, the online handler kicks the worker
    /// to isolate it. Per-CPU isolation failures are logged and left for the
    /// next triggering event, without aborting the scan.
    fn do_reservation(&self) {
        self.log_status("reservation_start");

        let mut offline_cpus = CpuSet::new();
        let iter_cpus = self
            .reserve_cpus
            .and_not(&self.state.lock().our_isolated_cpus);

        for cpu in iter_cpus.iter() {
            if !self.host.is_online(cpu) {
                offline_cpus.insert(cpu);
                continue;
            }
            match self.host.isolate(cpu) {
                Ok(()) => {
                    self.state.lock().our_isolated_cpus.insert(cpu);
                }
                Err(err) => {
                    tracing::error!(
                        cpu,
                        error = err.as_ref() as &dyn std::error::Error,
                        "failed to isolate cpu"
                    );
                }
            }
        }

        {
            let mut state = self.state.lock();
            let reserved = state.our_isolated_cpus.union(&offline_cpus);
            if reserved != state.final_reserved_cpus {
                state.final_reserved_cpus = reserved;
            }
        }

        self.log_status("reservation_end");
    }

    /// Releases every CPU this controller isolated.
    ///
    /// Per-CPU failures are logged and the CPU stays in the isolated set for
    /// retry on the next triggering event.
    fn undo_reservation(&self) {
        self.log_status("undo_reservation_start");

        let isolated = self.state.lock().our_isolated_cpus.clone();
        for cpu in isolated.iter() {
            match self.host.unisolate(cpu) {
                Ok(()) => {
                    self.state.lock().our_isolated_cpus.remove(cpu);
                }
                Err(err) => {
                    tracing::error!(
                        cpu,
                        error = err.as_ref() as &dyn std::error::Error,
                        "failed to unisolate cpu"
                    );
                }
            }
        }

        self.log_status("undo_reservation_end");
    }

    /// The worker thread body: waits for pending work, then runs one engine
    /// invocation per wakeup with the enable state read once at cycle start.
    pub(crate) fn run_worker(&self) {
        let mut state = self.state.lock();
        loop {
            while !state.pending && !state.stop {
                self.wake.wait(&mut state);
            }
            if state.stop {
                break;
            }
            state.pending = false;
            let enabled = state.reservation_enabled;
            drop(state);

            if enabled {
                self.do_reservation();
            } else {
                self.undo_reservation();
            }

            state = self.state.lock();
            state.cycles += 1;
        }
    }

    /// Asks the worker to exit after the current cycle.
    pub(crate) fn request_stop(&self) {
        self.state.lock().stop = true;
        self.wake.notify_one();
    }
}

impl HotplugHandler for CpuReserveCtl {
    fn cpu_came_online(&self, cpu: CpuId) {
        let mut state = self.state.lock();
        if !state.reservation_enabled {
            return;
        }
        // A reserved CPU coming online must be isolated again to honor the
        // reservation.
        if state.final_reserved_cpus.contains(cpu) {
            state.pending = true;
            drop(state);
            self.wake.notify_one();
        }
    }

    fn cpu_going_offline(&self, cpu: CpuId) {
        let mut state = self.state.lock();
        if !state.reservation_enabled {
            return;
        }
        // A CPU can't be left isolated while it goes offline, so release it
        // before it leaves service. An offline CPU counts as reserved, so no
        // pending work is needed.
        if state.our_isolated_cpus.remove(cpu) {
            drop(state);
            if let Err(err) = self.host.unisolate(cpu) {
                tracing::error!(
                    cpu,
                    error = err.as_ref() as &dyn std::error::Error,
                    "failed to unisolate cpu going offline"
                );
            }
        }
    }
}
