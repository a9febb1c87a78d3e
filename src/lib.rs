// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reserves a subset of CPUs for an external hypervisor partition by
//! excluding them from general-purpose scheduling.
//!
//! The controller reconciles a fixed reservation set against the live
//! online/offline status of CPUs. A dedicated worker thread serializes all
//! isolation work; the administrative toggle and CPU hot-plug notifications
//! mark work pending and wake it. Offline CPUs can't be isolated but still
//! count as reserved, so the reservation stays whole across hot-plug.
//!
//! Per-CPU isolation failures are non-fatal: they are logged and retried on
//! the next triggering event, so repeated invocations converge on the desired
//! state. The host supplies the actual isolation primitive and hot-plug
//! delivery via the traits in [`host`].

#![forbid(unsafe_code)]

mod ctl;

pub mod control;
pub mod cpuset;
pub mod host;

pub use ctl::CpuReserveCtl;
pub use ctl::ReserveStatus;

use crate::cpuset::CpuListParseError;
use crate::cpuset::CpuSet;
use crate::host::CpuHost;
use crate::host::HotplugSource;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// A fatal controller initialization error.
#[derive(Debug, Error)]
pub enum InitError {
    /// The reserve CPU list did not parse.
    #[error("invalid reserve cpu list")]
    Config(#[from] CpuListParseError),
    /// The worker thread could not be created.
    #[error("failed to spawn reservation worker")]
    WorkerSpawn(#[source] std::io::Error),
    /// The hot-plug subscription could not be installed.
    #[error("failed to register for hotplug notifications")]
    HotplugRegistration(#[source] anyhow::Error),
}

/// Parameters for starting the reservation controller.
pub struct CpuReserveParams {
    /// The CPUs to reserve, as a Linux cpulist (`"2-3"`, `"0,4-6"`).
    pub reserve_cpus: String,
    /// The host CPU scheduling backend.
    pub host: Arc<dyn CpuHost>,
    /// Runs on the worker thread before it starts processing. The host uses
    /// this to raise the thread's priority so reservation work is scheduled
    /// promptly even under load.
    pub worker_setup: Option<Box<dyn FnOnce() + Send>>,
}

/// A running reservation controller.
///
/// Owns the worker thread; dropping this (or calling
/// [`CpuReserve::shutdown`]) stops and joins the worker. Any CPUs still
/// isolated stay isolated, matching the process-lifetime model where the
/// controller lives until system shutdown.
pub struct CpuReserve {
    ctl: Arc<CpuReserveCtl>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CpuReserve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuReserve").finish_non_exhaustive()
    }
}

impl CpuReserve {
    /// Starts the controller: parses the reserve list, spawns the worker
    /// thread, and subscribes to hot-plug notifications.
    ///
    /// Reservation enforcement starts disabled; use [`CpuReserve::set_enabled`]
    /// or a bound [`control::EnableAttr`] to turn it on.
    pub fn start(
        params: CpuReserveParams,
        hotplug: &dyn HotplugSource,
    ) -> Result<Self, InitError> {
        let reserve_cpus: CpuSet = params.reserve_cpus.parse()?;
        let ctl = Arc::new(CpuReserveCtl::new(reserve_cpus, params.host));

        let worker = std::thread::Builder::new()
            .name("cpu-reserve".to_owned())
            .spawn({
                let ctl = ctl.clone();
                let setup = params.worker_setup;
                move || {
                    if let Some(setup) = setup {
                        setup();
                    }
                    ctl.run_worker();
                }
            })
            .map_err(InitError::WorkerSpawn)?;

        let mut this = Self {
            ctl,
            worker: Some(worker),
        };
        if let Err(err) = hotplug.subscribe(this.ctl.clone()) {
            this.stop_worker();
            return Err(InitError::HotplugRegistration(err));
        }
        Ok(this)
    }

    /// Returns the shared controller, e.g. for binding a
    /// [`control::EnableAttr`].
    pub fn controller(&self) -> &Arc<CpuReserveCtl> {
        &self.ctl
    }

    /// Returns whether reservation enforcement is active.
    pub fn enabled(&self) -> bool {
        self.ctl.enabled()
    }

    /// Enables or disables reservation enforcement.
    pub fn set_enabled(&self, enable: bool) {
        self.ctl.set_enabled(enable)
    }

    /// Captures a snapshot of the current reservation state.
    pub fn status(&self) -> ReserveStatus {
        self.ctl.status()
    }

    /// Stops the worker thread and waits for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.ctl.request_stop();
            let _ = worker.join();
        }
    }
}

impl Drop for CpuReserve {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
