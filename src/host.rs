// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Interfaces to the host environment: the per-CPU isolation primitive and
//! the CPU hot-plug notification subsystem.

use crate::cpuset::CpuId;
use crate::cpuset::CpuSet;
use std::sync::Arc;

/// Host-provided control over CPU scheduling state.
///
/// Isolation excludes a CPU from receiving general-purpose scheduled work.
/// Both operations are fallible; a failure leaves the CPU in its previous
/// state and is safe to retry.
pub trait CpuHost: Send + Sync {
    /// Excludes `cpu` from general-purpose scheduling.
    fn isolate(&self, cpu: CpuId) -> anyhow::Result<()>;

    /// Returns `cpu` to general-purpose scheduling.
    fn unisolate(&self, cpu: CpuId) -> anyhow::Result<()>;

    /// Returns true if `cpu` is currently online.
    fn is_online(&self, cpu: CpuId) -> bool;

    /// All currently online CPUs. Used for diagnostics only.
    fn online_cpus(&self) -> CpuSet;

    /// All currently isolated CPUs, including those isolated by other agents.
    /// Used for diagnostics only.
    fn isolated_cpus(&self) -> CpuSet;
}

/// Receiver for CPU hot-plug notifications.
pub trait HotplugHandler: Send + Sync {
    /// Called after `cpu` has come online. Fire-and-forget; may schedule
    /// asynchronous work.
    fn cpu_came_online(&self, cpu: CpuId);

    /// Called while `cpu` is going offline. Must complete before the CPU
    /// leaves service, so the handler does any required cleanup
    /// synchronously.
    fn cpu_going_offline(&self, cpu: CpuId);
}

/// Host-provided subscription to CPU hot-plug notifications.
pub trait HotplugSource {
    /// Registers `handler` to receive hot-plug notifications for all CPUs.
    fn subscribe(&self, handler: Arc<dyn HotplugHandler>) -> anyhow::Result<()>;
}
