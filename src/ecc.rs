// ECC error monitoring through the Linux EDAC sysfs interface.
//
// Layout read here:
//   <root>/mc/mc<N>/ce_count, ue_count                     per memory controller
//   <root>/mc/mc<N>/dimm<M>/dimm_ce_count, dimm_ue_count   per DIMM (optional)
//   <root>/mc/mc<N>/dimm<M>/dimm_label                     vendor label (optional)
//
// Nothing in here fails the run: unreadable counters count as zero and are logged.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::{log_debug_fmt, log_error_fmt, log_warn_fmt};

pub const DEFAULT_EDAC_ROOT: &str = "/sys/devices/system/edac";

lazy_static! {
    static ref MC_DIR_REGEX: Regex = Regex::new(r"^mc(\d+)$").unwrap();
    static ref DIMM_DIR_REGEX: Regex = Regex::new(r"^(?:dimm|rank)(\d+)$").unwrap();
    static ref CPU_DIMM_REGEX: Regex = Regex::new(r"CPU(\d+)_DIMM_([A-Z])(\d+)").unwrap();
    static ref SOCKET_CHANNEL_REGEX: Regex = Regex::new(r"Socket(\d+)_Channel(\d+)_DIMM(\d+)").unwrap();
    static ref MC_CHAN_REGEX: Regex = Regex::new(r"MC(\d+)_CHAN(\d+)_DIMM(\d+)").unwrap();
    static ref P_DIMM_REGEX: Regex = Regex::new(r"P(\d+)-DIMM-([A-Z])(\d+)").unwrap();
    static ref SRCID_MC_CHAN_REGEX: Regex =
        Regex::new(r"CPU_SrcID#(\d+)_MC#(\d+)_Chan#(\d+)_DIMM#(\d+)").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimmLocation {
    pub socket: i32,
    pub channel: i32,
    pub dimm: i32,
}

impl fmt::Display for DimmLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Socket{}/Channel{}/DIMM{}", self.socket, self.channel, self.dimm)
    }
}

/// A=0, B=1, ...
fn channel_letter_to_number(letter: &str) -> Option<i32> {
    letter
        .chars()
        .next()
        .filter(|c| c.is_ascii_uppercase())
        .map(|c| (c as u8 - b'A') as i32)
}

/// Parses the vendor DIMM label formats seen in the field, e.g. `CPU0_DIMM_A1`,
/// `Socket0_Channel1_DIMM0`, `MC0_CHAN0_DIMM0`, `P0-DIMM-A1` and
/// `CPU_SrcID#0_MC#0_Chan#0_DIMM#0`.
pub fn parse_dimm_label(label: &str) -> Option<DimmLocation> {
    if let Some(caps) = CPU_DIMM_REGEX.captures(label) {
        return Some(DimmLocation {
            socket: caps[1].parse().ok()?,
            channel: channel_letter_to_number(&caps[2])?,
            dimm: caps[3].parse().ok()?,
        });
    }
    if let Some(caps) = SOCKET_CHANNEL_REGEX.captures(label) {
        return Some(DimmLocation {
            socket: caps[1].parse().ok()?,
            channel: caps[2].parse().ok()?,
            dimm: caps[3].parse().ok()?,
        });
    }
    if let Some(caps) = MC_CHAN_REGEX.captures(label) {
        // The controller number stands in for the socket.
        return Some(DimmLocation {
            socket: caps[1].parse().ok()?,
            channel: caps[2].parse().ok()?,
            dimm: caps[3].parse().ok()?,
        });
    }
    if let Some(caps) = P_DIMM_REGEX.captures(label) {
        return Some(DimmLocation {
            socket: caps[1].parse().ok()?,
            channel: channel_letter_to_number(&caps[2])?,
            dimm: caps[3].parse().ok()?,
        });
    }
    if let Some(caps) = SRCID_MC_CHAN_REGEX.captures(label) {
        return Some(DimmLocation {
            socket: caps[1].parse().ok()?,
            channel: caps[3].parse().ok()?,
            dimm: caps[4].parse().ok()?,
        });
    }
    None
}

fn read_count_file(path: &Path) -> io::Result<u64> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerCounters {
    pub controller_id: String,
    pub correctable: u64,
    pub uncorrectable: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimmCounters {
    pub controller_id: String,
    /// Directory name, e.g. `dimm0`.
    pub name: String,
    pub label: Option<String>,
    pub location: Option<DimmLocation>,
    pub correctable: u64,
    pub uncorrectable: u64,
}

/// Counter values at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EccSnapshot {
    pub correctable: u64,
    pub uncorrectable: u64,
    pub per_controller: Vec<ControllerCounters>,
    pub dimms: Vec<DimmCounters>,
}

impl EccSnapshot {
    /// Builds a snapshot whose totals are the sum of `per_controller`.
    pub fn from_controllers(per_controller: Vec<ControllerCounters>) -> Self {
        let correctable = per_controller.iter().map(|c| c.correctable).sum();
        let uncorrectable = per_controller.iter().map(|c| c.uncorrectable).sum();
        Self {
            correctable,
            uncorrectable,
            per_controller,
            dimms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Correctable,
    Uncorrectable,
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::Correctable => f.write_str("CE"),
            CounterKind::Uncorrectable => f.write_str("UE"),
        }
    }
}

/// A counter that went down between baseline and final reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReset {
    /// `total`, a controller id, or `<controller>/<dimm>`.
    pub scope: String,
    pub kind: CounterKind,
    pub baseline: u64,
    pub current: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerDelta {
    pub controller_id: String,
    pub correctable: i64,
    pub uncorrectable: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimmDelta {
    pub controller_id: String,
    pub name: String,
    pub location: Option<DimmLocation>,
    pub correctable: i64,
    pub uncorrectable: i64,
}

/// `final - baseline` for every counter. Components are signed: a negative
/// value is a counter reset and also appears in `anomalies`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EccDelta {
    pub correctable: i64,
    pub uncorrectable: i64,
    pub per_controller: Vec<ControllerDelta>,
    pub dimms: Vec<DimmDelta>,
    pub anomalies: Vec<CounterReset>,
}

impl EccDelta {
    pub fn is_anomalous(&self) -> bool {
        !self.anomalies.is_empty()
    }

    /// Logs every DIMM (or controller, when no DIMM detail exists) whose counters grew,
    /// and every counter reset.
    pub fn log_changes(&self) {
        for dimm in &self.dimms {
            let place = match &dimm.location {
                Some(loc) => loc.to_string(),
                None => format!("{}/{}", dimm.controller_id, dimm.name),
            };
            if dimm.correctable > 0 {
                log_warn_fmt!("ECC CE Error: {} (+{})", place, dimm.correctable);
            }
            if dimm.uncorrectable > 0 {
                log_error_fmt!("CRITICAL ECC UE Error: {} (+{})", place, dimm.uncorrectable);
            }
        }
        if self.dimms.is_empty() {
            for mc in &self.per_controller {
                if mc.correctable > 0 {
                    log_warn_fmt!("ECC CE Error: controller {} (+{})", mc.controller_id, mc.correctable);
                }
                if mc.uncorrectable > 0 {
                    log_error_fmt!("CRITICAL ECC UE Error: controller {} (+{})", mc.controller_id, mc.uncorrectable);
                }
            }
        }
        for reset in &self.anomalies {
            log_warn_fmt!(
                "ECC {} counter for {} went backwards ({} -> {}): counter reset during the run",
                reset.kind, reset.scope, reset.baseline, reset.current
            );
        }
    }
}

fn signed_diff(
    scope: &str,
    kind: CounterKind,
    baseline: u64,
    current: u64,
    anomalies: &mut Vec<CounterReset>,
) -> i64 {
    if current < baseline {
        anomalies.push(CounterReset {
            scope: scope.to_string(),
            kind,
            baseline,
            current,
        });
    }
    current as i64 - baseline as i64
}

/// Discovers memory controllers and reads their counters.
#[derive(Debug)]
pub struct EccMonitor {
    root: PathBuf,
    controllers: Vec<(String, PathBuf)>,
    supported: bool,
}

impl EccMonitor {
    /// Monitor reading an EDAC tree at `root` instead of the sysfs default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            controllers: Vec::new(),
            supported: false,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Looks for memory controllers. Any I/O failure means "unsupported".
    pub fn probe(&mut self) -> bool {
        match self.discover_controllers() {
            Ok(controllers) => {
                self.supported = !controllers.is_empty();
                log_debug_fmt!("EDAC: found {} memory controller(s) under {}", controllers.len(), self.root.display());
                self.controllers = controllers;
            }
            Err(e) => {
                log_debug_fmt!("EDAC not available under {}: {}", self.root.display(), e);
                self.supported = false;
                self.controllers.clear();
            }
        }
        self.supported
    }

    fn discover_controllers(&self) -> io::Result<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.root.join("mc"))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let index: u32 = match MC_DIR_REGEX.captures(&name).and_then(|c| c[1].parse().ok()) {
                Some(index) => index,
                None => continue,
            };
            if entry.path().is_dir() {
                found.push((index, name, entry.path()));
            }
        }
        found.sort_by_key(|(index, _, _)| *index);
        Ok(found.into_iter().map(|(_, name, path)| (name, path)).collect())
    }

    fn read_counter(path: &Path) -> u64 {
        match read_count_file(path) {
            Ok(count) => count,
            Err(e) => {
                log_warn_fmt!("ECC counter {} unreadable, counting as 0: {}", path.display(), e);
                0
            }
        }
    }

    /// Reads every discovered controller. Zero-filled when unsupported.
    pub fn snapshot(&self) -> EccSnapshot {
        if !self.supported {
            return EccSnapshot::default();
        }

        let mut per_controller = Vec::with_capacity(self.controllers.len());
        let mut dimms = Vec::new();
        for (controller_id, path) in &self.controllers {
            per_controller.push(ControllerCounters {
                controller_id: controller_id.clone(),
                correctable: Self::read_counter(&path.join("ce_count")),
                uncorrectable: Self::read_counter(&path.join("ue_count")),
            });
            dimms.extend(Self::read_dimms(controller_id, path));
        }

        let mut snapshot = EccSnapshot::from_controllers(per_controller);
        snapshot.dimms = dimms;
        snapshot
    }

    /// Per-DIMM counters of one controller. Incomplete or unreadable DIMM
    /// directories are skipped.
    fn read_dimms(controller_id: &str, mc_path: &Path) -> Vec<DimmCounters> {
        let entries = match fs::read_dir(mc_path) {
            Ok(entries) => entries,
            Err(e) => {
                log_warn_fmt!("Failed to list DIMMs of {}: {}", mc_path.display(), e);
                return Vec::new();
            }
        };

        let mut dimms: Vec<(u32, DimmCounters)> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let index: u32 = match DIMM_DIR_REGEX.captures(&name).and_then(|c| c[1].parse().ok()) {
                Some(index) => index,
                None => continue,
            };
            let path = entry.path();
            let counts = read_count_file(&path.join("dimm_ce_count"))
                .and_then(|ce| read_count_file(&path.join("dimm_ue_count")).map(|ue| (ce, ue)));
            let (correctable, uncorrectable) = match counts {
                Ok(counts) => counts,
                Err(e) => {
                    log_debug_fmt!("Skipping DIMM {}: {}", path.display(), e);
                    continue;
                }
            };

            let label = fs::read_to_string(path.join("dimm_label"))
                .ok()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
            let location = label.as_deref().and_then(parse_dimm_label);
            if let (Some(label), None) = (&label, &location) {
                log_debug_fmt!("Unknown DIMM label format: '{}' at {}", label, path.display());
            }

            dimms.push((
                index,
                DimmCounters {
                    controller_id: controller_id.to_string(),
                    name,
                    label,
                    location,
                    correctable,
                    uncorrectable,
                },
            ));
        }
        dimms.sort_by_key(|(index, _)| *index);
        dimms.into_iter().map(|(_, dimm)| dimm).collect()
    }

    /// `final_snapshot - baseline`, matching controllers and DIMMs by name. A
    /// controller or DIMM missing from the baseline counts from zero.
    pub fn delta(baseline: &EccSnapshot, final_snapshot: &EccSnapshot) -> EccDelta {
        let mut anomalies = Vec::new();

        let correctable = signed_diff(
            "total",
            CounterKind::Correctable,
            baseline.correctable,
            final_snapshot.correctable,
            &mut anomalies,
        );
        let uncorrectable = signed_diff(
            "total",
            CounterKind::Uncorrectable,
            baseline.uncorrectable,
            final_snapshot.uncorrectable,
            &mut anomalies,
        );

        let per_controller = final_snapshot
            .per_controller
            .iter()
            .map(|current| {
                let before = baseline
                    .per_controller
                    .iter()
                    .find(|c| c.controller_id == current.controller_id);
                let (ce0, ue0) = before.map_or((0, 0), |c| (c.correctable, c.uncorrectable));
                ControllerDelta {
                    controller_id: current.controller_id.clone(),
                    correctable: signed_diff(
                        &current.controller_id,
                        CounterKind::Correctable,
                        ce0,
                        current.correctable,
                        &mut anomalies,
                    ),
                    uncorrectable: signed_diff(
                        &current.controller_id,
                        CounterKind::Uncorrectable,
                        ue0,
                        current.uncorrectable,
                        &mut anomalies,
                    ),
                }
            })
            .collect();

        let dimms = final_snapshot
            .dimms
            .iter()
            .map(|current| {
                let before = baseline
                    .dimms
                    .iter()
                    .find(|d| d.controller_id == current.controller_id && d.name == current.name);
                let (ce0, ue0) = before.map_or((0, 0), |d| (d.correctable, d.uncorrectable));
                let scope = format!("{}/{}", current.controller_id, current.name);
                DimmDelta {
                    controller_id: current.controller_id.clone(),
                    name: current.name.clone(),
                    location: current.location.clone(),
                    correctable: signed_diff(&scope, CounterKind::Correctable, ce0, current.correctable, &mut anomalies),
                    uncorrectable: signed_diff(
                        &scope,
                        CounterKind::Uncorrectable,
                        ue0,
                        current.uncorrectable,
                        &mut anomalies,
                    ),
                }
            })
            .collect();

        EccDelta {
            correctable,
            uncorrectable,
            per_controller,
            dimms,
            anomalies,
        }
    }
}
