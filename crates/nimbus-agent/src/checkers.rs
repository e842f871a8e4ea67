//! The small set of built-in [`Checker`]s the agent daemon always runs,
//! distinct from whatever component-specific probes a deployment wires
//! in later. Grounded in `mz_http_util::handle_liveness_check`'s "the
//! process answered, therefore it's live" liveness convention, extended
//! with a state-directory disk-space probe in the same spirit.

use async_trait::async_trait;

use nimbus_health::{Checker, Probe, Severity};

/// Always reports running; its only job is to prove the probe loop
/// itself is turning, the same role `handle_liveness_check` plays for
/// an HTTP listener.
pub struct LivenessChecker;

#[async_trait]
impl Checker for LivenessChecker {
    fn name(&self) -> &str {
        "liveness"
    }

    async fn check(&self) -> Probe {
        Probe::running("liveness")
    }
}

/// Fails once the filesystem backing the agent's state directory drops
/// below a free-space floor, so a disk filling up with timeline
/// history shows up as a degraded node instead of a silent write
/// failure later. Uses `sysinfo`, the same crate the teacher workspace
/// reaches for in its orchestrator-process and service crates.
pub struct DiskSpaceChecker {
    path: std::path::PathBuf,
    min_free_bytes: u64,
}

impl DiskSpaceChecker {
    pub fn new(path: std::path::PathBuf, min_free_bytes: u64) -> DiskSpaceChecker {
        DiskSpaceChecker {
            path,
            min_free_bytes,
        }
    }
}

#[async_trait]
impl Checker for DiskSpaceChecker {
    fn name(&self) -> &str {
        "disk-space"
    }

    async fn check(&self) -> Probe {
        use sysinfo::{DiskExt, SystemExt};

        let mut system = sysinfo::System::new();
        system.refresh_disks_list();
        system.refresh_disks();

        let disk = system
            .disks()
            .iter()
            .filter(|disk| self.path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());

        match disk {
            Some(disk) if disk.available_space() >= self.min_free_bytes => Probe::running("disk-space"),
            Some(disk) => Probe::failed(
                "disk-space",
                Severity::Warning,
                format!(
                    "{} free on {}, below the {} floor",
                    disk.available_space(),
                    self.path.display(),
                    self.min_free_bytes
                ),
            ),
            None => Probe::failed(
                "disk-space",
                Severity::Warning,
                format!("no mounted filesystem found for {}", self.path.display()),
            ),
        }
    }
}
