//! `ProcessMonitor` — list sandbox processes, kill (SIGTERM→SIGKILL),
//! query by port.
//!
//! Generalizes `original_source`'s `psutil`-based adapter to Rust via
//! `sysinfo` for process enumeration. `sysinfo` does not expose listening
//! sockets directly, so port ownership is resolved by reading
//! `/proc/net/tcp{,6}` and matching the socket inode against
//! `/proc/<pid>/fd` — Linux-only, matching the sandbox's assumed
//! platform.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use sysinfo::{Pid, System};
use tracing::{debug, warn};

use super::types::SystemProcess;

#[derive(Debug, thiserror::Error)]
pub enum ProcessMonitorError {
    #[error("process {0} not found")]
    NotFound(u32),
}

pub struct ProcessMonitorConfig {
    pub zombie_threshold_sec: u64,
    pub cpu_threshold: f32,
    pub sigterm_grace: Duration,
    pub kill_poll_timeout: Duration,
}

impl Default for ProcessMonitorConfig {
    fn default() -> Self {
        Self {
            zombie_threshold_sec: 300,
            cpu_threshold: 0.5,
            sigterm_grace: Duration::from_secs(1),
            kill_poll_timeout: Duration::from_secs(2),
        }
    }
}

pub struct ProcessMonitor {
    config: ProcessMonitorConfig,
}

impl ProcessMonitor {
    pub fn new(config: ProcessMonitorConfig) -> Self {
        Self { config }
    }

    /// `list_processes(filter)` — a snapshot of every process matching
    /// `filter`.
    pub fn list_processes(&self, filter: impl Fn(&SystemProcess) -> bool) -> Vec<SystemProcess> {
        let mut sys = System::new_all();
        sys.refresh_all();

        let port_map = read_listening_ports();

        let mut out = Vec::new();
        for (pid, process) in sys.processes() {
            let pid_u32 = pid.as_u32();
            let env: HashMap<String, String> = process
                .environ()
                .iter()
                .filter_map(|e| e.to_str())
                .filter_map(|e| e.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();

            let proc = SystemProcess {
                pid: pid_u32,
                name: process.name().to_string_lossy().to_string(),
                status: format!("{:?}", process.status()).to_lowercase(),
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f32 / (1024.0 * 1024.0),
                listening_ports: port_map.get(&pid_u32).cloned().unwrap_or_default(),
                env,
            };

            if filter(&proc) {
                out.push(proc);
            }
        }

        out
    }

    /// All processes belonging to `sandbox_id`.
    pub fn list_sandbox_processes(&self, sandbox_id: &str) -> Vec<SystemProcess> {
        self.list_processes(|p| p.belongs_to_sandbox(sandbox_id))
    }

    /// `kill(pid, force)` — SIGTERM, escalating to SIGKILL after one
    /// second (or immediately if `force`). Returns `true` iff the pid is
    /// no longer running after polling for up to two seconds.
    pub async fn kill(&self, pid: u32, force: bool) -> bool {
        let mut sys = System::new_all();
        sys.refresh_all();

        let Some(process) = sys.process(Pid::from_u32(pid)) else {
            return true;
        };

        if force {
            process.kill();
        } else {
            process.kill_with(sysinfo::Signal::Term);
            tokio::time::sleep(self.config.sigterm_grace).await;

            sys.refresh_all();
            if sys.process(Pid::from_u32(pid)).is_some() {
                if let Some(process) = sys.process(Pid::from_u32(pid)) {
                    process.kill();
                }
            }
        }

        let poll_interval = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < self.config.kill_poll_timeout {
            tokio::time::sleep(poll_interval).await;
            waited += poll_interval;
            sys.refresh_all();
            if sys.process(Pid::from_u32(pid)).is_none() {
                return true;
            }
        }

        sys.refresh_all();
        sys.process(Pid::from_u32(pid)).is_none()
    }

    /// `processes_by_port(range)` — processes whose `listening_ports`
    /// intersect `range`.
    pub fn processes_by_port(&self, range: RangeInclusive<u16>) -> Vec<SystemProcess> {
        self.list_processes(|p| p.listening_ports.iter().any(|port| range.contains(port)))
    }

    /// Enumerates sandbox processes and kills those matching the zombie
    /// predicate.
    pub async fn kill_zombies(&self, sandbox_id: &str) -> usize {
        let candidates = self.list_sandbox_processes(sandbox_id);
        let mut killed = 0;
        for proc in candidates {
            // idle_sec is approximated as the zombie threshold itself when
            // status already reports "zombie"; sysinfo does not expose a
            // per-process idle timer directly.
            let idle_sec = if proc.status == "zombie" {
                self.config.zombie_threshold_sec
            } else {
                0
            };
            if proc.is_zombie(self.config.zombie_threshold_sec, self.config.cpu_threshold, idle_sec) {
                debug!(pid = proc.pid, "killing zombie process");
                if self.kill(proc.pid, true).await {
                    killed += 1;
                } else {
                    warn!(pid = proc.pid, "failed to kill zombie process");
                }
            }
        }
        killed
    }
}

/// Parses `/proc/net/tcp` and `/proc/net/tcp6` for sockets in
/// `TCP_LISTEN` state, then maps each socket inode to the owning pid by
/// scanning `/proc/<pid>/fd/*` symlinks. Best-effort: any I/O failure
/// yields an empty map rather than propagating an error, matching the
/// "best-effort cleanup" contract for sandbox process introspection.
fn read_listening_ports() -> HashMap<u32, Vec<u16>> {
    let mut inode_to_port: HashMap<u64, u16> = HashMap::new();
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines().skip(1) {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 10 {
                    continue;
                }
                // field 1: "local_address:port" in hex; field 3: state (0A = LISTEN)
                if fields[3] != "0A" {
                    continue;
                }
                let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
                    continue;
                };
                let Ok(port) = u16::from_str_radix(port_hex, 16) else {
                    continue;
                };
                let Ok(inode) = fields[9].parse::<u64>() else {
                    continue;
                };
                inode_to_port.insert(inode, port);
            }
        }
    }

    let mut pid_to_ports: HashMap<u32, Vec<u16>> = HashMap::new();
    if inode_to_port.is_empty() {
        return pid_to_ports;
    }

    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return pid_to_ports;
    };

    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else {
            continue;
        };
        for fd in fds.flatten() {
            if let Ok(target) = std::fs::read_link(fd.path()) {
                let target = target.to_string_lossy();
                if let Some(inode_str) = target
                    .strip_prefix("socket:[")
                    .and_then(|s| s.strip_suffix(']'))
                {
                    if let Ok(inode) = inode_str.parse::<u64>() {
                        if let Some(port) = inode_to_port.get(&inode) {
                            pid_to_ports.entry(pid).or_default().push(*port);
                        }
                    }
                }
            }
        }
    }

    pid_to_ports
}
