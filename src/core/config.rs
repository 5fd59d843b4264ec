//! Experiment and bench configuration structs with serde-backed defaults.
//!
//! [`TestConfiguration`] is the per-experiment knob set (content, target,
//! voltages, frequencies, pass/fail strings, reset policy). [`TesterBootConfig`]
//! holds postcodes and recovery timings for the boot sequence. Both deserialize
//! from the `[test]` / `[boot]` tables of a TOML bench config file, with every
//! field defaulting so a partial file is valid.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SdhError};

// ──────────────────── enums ────────────────────

/// Content payload driven on the unit during an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Dragon,
    Linux,
    PysvConsole,
    /// Console content armed with a boot breakpoint postcode.
    BootBreaks,
}

impl ContentType {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "dragon" => Ok(Self::Dragon),
            "linux" => Ok(Self::Linux),
            "pysvconsole" => Ok(Self::PysvConsole),
            "bootbreaks" => Ok(Self::BootBreaks),
            other => Err(SdhError::InvalidConfig {
                details: format!("unknown content type '{other}'"),
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dragon => "dragon",
            Self::Linux => "linux",
            Self::PysvConsole => "pysvconsole",
            Self::BootBreaks => "bootbreaks",
        }
    }
}

/// Which compute domain the experiment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestTarget {
    #[default]
    Mesh,
    Slice,
}

impl TestTarget {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "slice" => Ok(Self::Slice),
            other => Err(SdhError::InvalidConfig {
                details: format!("unknown test target '{other}'"),
            }),
        }
    }
}

/// How voltage overrides are applied to the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VoltageType {
    #[default]
    Vbump,
    Fixed,
    Ppvc,
}

impl VoltageType {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "vbump" => Ok(Self::Vbump),
            "fixed" => Ok(Self::Fixed),
            "ppvc" => Ok(Self::Ppvc),
            other => Err(SdhError::InvalidConfig {
                details: format!("unknown voltage type '{other}'"),
            }),
        }
    }
}

/// Iteration pacing: run straight through or park after every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Continuous,
    StepByStep,
}

impl ExecutionMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::StepByStep => "step_by_step",
        }
    }
}

/// Knob a sweep or shmoo axis varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    Frequency,
    Voltage,
}

impl SweepKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "frequency" | "freq" => Ok(Self::Frequency),
            "voltage" | "volt" => Ok(Self::Voltage),
            other => Err(SdhError::InvalidConfig {
                details: format!("unknown sweep type '{other}'"),
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Voltage => "voltage",
        }
    }
}

/// Domain a sweep or shmoo axis applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepDomain {
    Core,
    Mesh,
}

impl SweepDomain {
    /// Accepts both the harness names and the legacy bench aliases
    /// ("ia" for core, "cfc" for mesh).
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "core" | "ia" => Ok(Self::Core),
            "mesh" | "cfc" => Ok(Self::Mesh),
            other => Err(SdhError::InvalidConfig {
                details: format!("unknown sweep domain '{other}'"),
            }),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Mesh => "mesh",
        }
    }
}

impl fmt::Display for SweepDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── test configuration ────────────────────

fn default_name() -> String {
    "Experiment".to_string()
}
fn default_visual_id() -> String {
    "-9999999".to_string()
}
fn default_bucket() -> String {
    "FRAMEWORK".to_string()
}
fn default_pass_strings() -> String {
    "Test Complete".to_string()
}
fn default_fail_strings() -> String {
    "Test Failed".to_string()
}
fn default_true() -> bool {
    true
}
fn default_test_time() -> u64 {
    30
}

/// Per-experiment configuration.
///
/// Field defaults mirror a freshly prepared bench: dragon content on the mesh
/// domain, vbump voltage overrides, reset before every iteration, fastboot on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfiguration {
    pub name: String,
    pub content: ContentType,
    pub target: TestTarget,
    pub visual_id: String,
    pub qdf: String,
    pub bucket: String,
    /// Named slice/core configuration mask, when the experiment pins one.
    pub mask: Option<String>,
    /// Build a pseudo configuration from the mask instead of fusing it.
    pub pseudo: bool,
    /// Raw fuse value disabling two cores, when the recipe requests it.
    pub dis_two_cores: Option<u64>,
    /// Raw fuse value disabling one core.
    pub dis_one_core: Option<u64>,
    /// Core the content should be checked against.
    pub check_core: Option<u32>,
    pub core_license: Option<u32>,
    pub volt_type: VoltageType,
    pub volt_core: Option<f64>,
    pub volt_mesh: Option<f64>,
    /// Core frequency in ratio units.
    pub freq_core: Option<u32>,
    pub freq_mesh: Option<u32>,
    /// Power-cycle the unit before the next iteration.
    pub reset: bool,
    /// Reset policy after a passing iteration.
    pub reset_on_pass: bool,
    pub fastboot: bool,
    /// High-power unit: skip the post-boot postcode wait.
    pub high_power_unit: bool,
    /// Comma-separated literals that mark a passing content log line.
    pub pass_strings: String,
    /// Comma-separated literals that mark a failing content log line.
    pub fail_strings: String,
    /// Content watchdog in minutes.
    pub test_time_minutes: u64,
    /// Boot breakpoint postcode for bootbreaks content.
    pub postcode_break: Option<u32>,
    pub execution_mode: ExecutionMode,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            name: default_name(),
            content: ContentType::default(),
            target: TestTarget::default(),
            visual_id: default_visual_id(),
            qdf: String::new(),
            bucket: default_bucket(),
            mask: None,
            pseudo: false,
            dis_two_cores: None,
            dis_one_core: None,
            check_core: None,
            core_license: None,
            volt_type: VoltageType::default(),
            volt_core: None,
            volt_mesh: None,
            freq_core: None,
            freq_mesh: None,
            reset: default_true(),
            reset_on_pass: false,
            fastboot: default_true(),
            high_power_unit: false,
            pass_strings: default_pass_strings(),
            fail_strings: default_fail_strings(),
            test_time_minutes: default_test_time(),
            postcode_break: None,
            execution_mode: ExecutionMode::default(),
        }
    }
}

impl TestConfiguration {
    /// Content watchdog as a [`Duration`].
    #[must_use]
    pub const fn test_time(&self) -> Duration {
        Duration::from_secs(self.test_time_minutes * 60)
    }
}

// ──────────────────── boot configuration ────────────────────

const fn default_after_mrc_postcode() -> u32 {
    0xbf00_0000
}
const fn default_efi_postcode() -> u32 {
    0xef00_00ff
}
const fn default_linux_postcode() -> u32 {
    0x5800_0000
}
const fn default_mrc_wait_secs() -> u64 {
    30
}
const fn default_efi_wait_secs() -> u64 {
    60
}
const fn default_mrc_check_count() -> u32 {
    5
}
const fn default_efi_check_count() -> u32 {
    10
}
const fn default_boot_retry_times() -> u32 {
    3
}
const fn default_boot_retry_delay_secs() -> u64 {
    60
}
const fn default_recovery_delay_secs() -> u64 {
    120
}

/// Postcodes and timings governing the boot sequence and its recovery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterBootConfig {
    pub after_mrc_postcode: u32,
    pub efi_postcode: u32,
    pub linux_postcode: u32,
    /// Optional postcode to stop the boot at instead of running to the OS.
    pub boot_stop_postcode: Option<u32>,
    pub mrc_postcode_wait_secs: u64,
    pub efi_postcode_wait_secs: u64,
    pub mrc_postcode_check_count: u32,
    pub efi_postcode_check_count: u32,
    pub boot_retry_times: u32,
    pub boot_retry_delay_secs: u64,
    /// Settle window after a power cycle before the register-access layer is
    /// reconnected (transient-fault recovery path).
    pub recovery_delay_secs: u64,
}

impl Default for TesterBootConfig {
    fn default() -> Self {
        Self {
            after_mrc_postcode: default_after_mrc_postcode(),
            efi_postcode: default_efi_postcode(),
            linux_postcode: default_linux_postcode(),
            boot_stop_postcode: None,
            mrc_postcode_wait_secs: default_mrc_wait_secs(),
            efi_postcode_wait_secs: default_efi_wait_secs(),
            mrc_postcode_check_count: default_mrc_check_count(),
            efi_postcode_check_count: default_efi_check_count(),
            boot_retry_times: default_boot_retry_times(),
            boot_retry_delay_secs: default_boot_retry_delay_secs(),
            recovery_delay_secs: default_recovery_delay_secs(),
        }
    }
}

impl TesterBootConfig {
    #[must_use]
    pub const fn recovery_delay(&self) -> Duration {
        Duration::from_secs(self.recovery_delay_secs)
    }

    #[must_use]
    pub const fn efi_postcode_wait(&self) -> Duration {
        Duration::from_secs(self.efi_postcode_wait_secs)
    }
}

// ──────────────────── framework options ────────────────────

const fn default_halt_poll_ms() -> u64 {
    1000
}

/// Harness pacing and upload knobs, the `[framework]` table of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkOptions {
    /// Gate result upload through the quality heuristics. When false nothing
    /// is stored.
    pub upload_results: bool,
    /// Tick used while parked in a halt or step wait; each tick re-checks for
    /// cancel.
    pub halt_poll_ms: u64,
    /// Upper bound on a step-mode wait. `None` waits indefinitely.
    pub step_wait_timeout_secs: Option<u64>,
    /// Pause between iterations.
    pub iteration_settle_ms: u64,
}

impl Default for FrameworkOptions {
    fn default() -> Self {
        Self {
            upload_results: true,
            halt_poll_ms: default_halt_poll_ms(),
            step_wait_timeout_secs: None,
            iteration_settle_ms: 0,
        }
    }
}

impl FrameworkOptions {
    #[must_use]
    pub const fn halt_poll(&self) -> Duration {
        Duration::from_millis(self.halt_poll_ms)
    }

    #[must_use]
    pub fn step_wait_timeout(&self) -> Option<Duration> {
        self.step_wait_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn iteration_settle(&self) -> Duration {
        Duration::from_millis(self.iteration_settle_ms)
    }
}

// ──────────────────── bench config file ────────────────────

/// Root of the TOML bench config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub test: TestConfiguration,
    pub boot: TesterBootConfig,
    pub framework: FrameworkOptions,
}

impl BenchConfig {
    /// Load a bench config from a TOML file. A missing file is an error;
    /// missing tables and fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SdhError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| SdhError::io(path, e))?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_bench_baseline() {
        let config = TestConfiguration::default();
        assert_eq!(config.pass_strings, "Test Complete");
        assert_eq!(config.fail_strings, "Test Failed");
        assert_eq!(config.bucket, "FRAMEWORK");
        assert_eq!(config.visual_id, "-9999999");
        assert_eq!(config.target, TestTarget::Mesh);
        assert_eq!(config.volt_type, VoltageType::Vbump);
        assert!(config.reset);
        assert!(!config.reset_on_pass);
        assert!(config.fastboot);
        assert_eq!(config.execution_mode, ExecutionMode::Continuous);
    }

    #[test]
    fn boot_defaults_match_postcode_table() {
        let boot = TesterBootConfig::default();
        assert_eq!(boot.after_mrc_postcode, 0xbf00_0000);
        assert_eq!(boot.efi_postcode, 0xef00_00ff);
        assert_eq!(boot.linux_postcode, 0x5800_0000);
        assert_eq!(boot.recovery_delay(), Duration::from_secs(120));
        assert_eq!(boot.efi_postcode_wait(), Duration::from_secs(60));
        assert_eq!(boot.boot_retry_times, 3);
    }

    #[test]
    fn sweep_domain_accepts_legacy_aliases() {
        assert_eq!(SweepDomain::parse("ia").unwrap(), SweepDomain::Core);
        assert_eq!(SweepDomain::parse("CFC").unwrap(), SweepDomain::Mesh);
        assert_eq!(SweepDomain::parse("core").unwrap(), SweepDomain::Core);
        assert!(SweepDomain::parse("uncore").is_err());
    }

    #[test]
    fn sweep_kind_parse() {
        assert_eq!(SweepKind::parse("Frequency").unwrap(), SweepKind::Frequency);
        assert_eq!(SweepKind::parse("voltage").unwrap(), SweepKind::Voltage);
        assert!(SweepKind::parse("power").is_err());
    }

    #[test]
    fn content_type_parse_is_case_insensitive() {
        assert_eq!(ContentType::parse("Dragon").unwrap(), ContentType::Dragon);
        assert_eq!(
            ContentType::parse("PYSVConsole").unwrap(),
            ContentType::PysvConsole
        );
        assert!(ContentType::parse("doom").is_err());
    }

    #[test]
    fn partial_toml_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[test]\nname = \"VminSearch\"\nfreq_mesh = 20\n\n[boot]\nrecovery_delay_secs = 5\n"
        )
        .unwrap();

        let config = BenchConfig::load(file.path()).unwrap();
        assert_eq!(config.test.name, "VminSearch");
        assert_eq!(config.test.freq_mesh, Some(20));
        assert_eq!(config.test.bucket, "FRAMEWORK");
        assert_eq!(config.boot.recovery_delay_secs, 5);
        assert_eq!(config.boot.efi_postcode, 0xef00_00ff);
        assert!(config.framework.upload_results);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = BenchConfig::load(Path::new("/nonexistent/bench.toml")).unwrap_err();
        assert_eq!(err.code(), "SDH-1002");
    }
}
