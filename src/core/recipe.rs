//! Recipe parsing: spreadsheet-style experiment definitions to typed configs.
//!
//! A recipe is a flat JSON object keyed by the display names used on the
//! planning sheets ("Test Name", "Disable 2 Cores", ...). Every supported key
//! has an explicit transform into a [`ConfigUpdates`] field; unknown keys are
//! rejected at parse time so a renamed column fails loudly instead of being
//! silently dropped.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::{
    ContentType, SweepDomain, SweepKind, TestConfiguration, TestTarget, VoltageType,
};
use crate::core::errors::{Result, SdhError};

// ──────────────────── config updates ────────────────────

/// Sparse overlay onto a [`TestConfiguration`]; only `Some` fields apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdates {
    pub name: Option<String>,
    pub content: Option<ContentType>,
    pub target: Option<TestTarget>,
    pub visual_id: Option<String>,
    pub qdf: Option<String>,
    pub bucket: Option<String>,
    pub mask: Option<String>,
    pub pseudo: Option<bool>,
    pub dis_two_cores: Option<u64>,
    pub dis_one_core: Option<u64>,
    pub check_core: Option<u32>,
    pub core_license: Option<u32>,
    pub volt_type: Option<VoltageType>,
    pub volt_core: Option<f64>,
    pub volt_mesh: Option<f64>,
    pub freq_core: Option<u32>,
    pub freq_mesh: Option<u32>,
    pub reset: Option<bool>,
    pub reset_on_pass: Option<bool>,
    pub fastboot: Option<bool>,
    pub high_power_unit: Option<bool>,
    pub pass_strings: Option<String>,
    pub fail_strings: Option<String>,
    pub test_time_minutes: Option<u64>,
    pub postcode_break: Option<u32>,
}

macro_rules! apply_field {
    ($self:ident, $config:ident, $($field:ident),+ $(,)?) => {
        $(if let Some(value) = &$self.$field {
            $config.$field = value.clone().into();
        })+
    };
}

impl ConfigUpdates {
    /// Overlay the populated fields onto `config`.
    pub fn apply(&self, config: &mut TestConfiguration) {
        apply_field!(
            self, config, name, content, target, visual_id, qdf, bucket, pseudo, volt_type,
            reset, reset_on_pass, fastboot, high_power_unit, pass_strings, fail_strings,
            test_time_minutes
        );
        // Option-typed config fields keep their prior value unless overridden.
        if self.mask.is_some() {
            config.mask.clone_from(&self.mask);
        }
        if self.check_core.is_some() {
            config.check_core = self.check_core;
        }
        if self.dis_two_cores.is_some() {
            config.dis_two_cores = self.dis_two_cores;
        }
        if self.dis_one_core.is_some() {
            config.dis_one_core = self.dis_one_core;
        }
        if self.core_license.is_some() {
            config.core_license = self.core_license;
        }
        if self.volt_core.is_some() {
            config.volt_core = self.volt_core;
        }
        if self.volt_mesh.is_some() {
            config.volt_mesh = self.volt_mesh;
        }
        if self.freq_core.is_some() {
            config.freq_core = self.freq_core;
        }
        if self.freq_mesh.is_some() {
            config.freq_mesh = self.freq_mesh;
        }
        if self.postcode_break.is_some() {
            config.postcode_break = self.postcode_break;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        serde_json::to_value(self)
            .map(|v| {
                v.as_object()
                    .is_some_and(|m| m.values().all(Value::is_null))
            })
            .unwrap_or(false)
    }
}

// ──────────────────── strategy spec ────────────────────

/// One swept axis: the knob, the domain it applies to, and the range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxisSpec {
    #[serde(rename = "Type")]
    pub kind: SweepKind,
    #[serde(rename = "Domain")]
    pub domain: SweepDomain,
    #[serde(rename = "Start")]
    pub start: f64,
    #[serde(rename = "End")]
    pub end: f64,
    #[serde(rename = "Steps")]
    pub step: f64,
}

/// What kind of run the recipe requests, with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategySpec {
    Loops { iterations: usize },
    Sweep { axis: SweepAxisSpec },
    Shmoo { file: PathBuf, label: String },
}

impl StrategySpec {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Loops { .. } => "Loops",
            Self::Sweep { .. } => "Sweep",
            Self::Shmoo { .. } => "Shmoo",
        }
    }
}

// ──────────────────── value coercion helpers ────────────────────

fn invalid(key: &str, details: impl Into<String>) -> SdhError {
    SdhError::InvalidRecipe {
        key: key.to_string(),
        details: details.into(),
    }
}

fn as_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid(key, format!("expected a string, got {other}"))),
    }
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(key, "number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| invalid(key, e.to_string())),
        other => Err(invalid(key, format!("expected a number, got {other}"))),
    }
}

fn as_u64(key: &str, value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| invalid(key, "expected a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(key, e.to_string())),
        other => Err(invalid(key, format!("expected an integer, got {other}"))),
    }
}

fn as_u32(key: &str, value: &Value) -> Result<u32> {
    u32::try_from(as_u64(key, value)?).map_err(|_| invalid(key, "value exceeds 32 bits"))
}

fn as_bool(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(invalid(key, format!("expected a boolean, got '{other}'"))),
        },
        other => Err(invalid(key, format!("expected a boolean, got {other}"))),
    }
}

/// Parse "0x..." hex or plain decimal into a fuse value.
fn as_fuse_value(key: &str, value: &Value) -> Result<u64> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.strip_prefix("0x").map_or_else(
                || {
                    trimmed
                        .parse::<u64>()
                        .map_err(|e| invalid(key, e.to_string()))
                },
                |hex| u64::from_str_radix(hex, 16).map_err(|e| invalid(key, e.to_string())),
            )
        }
        _ => as_u64(key, value),
    }
}

/// Core license cells read "N: description"; only the leading number matters.
fn as_core_license(key: &str, value: &Value) -> Result<u32> {
    match value {
        Value::String(s) => {
            let head = s.split(':').next().unwrap_or("").trim();
            head.parse::<u32>().map_err(|e| invalid(key, e.to_string()))
        }
        _ => as_u32(key, value),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// ──────────────────── recipe ────────────────────

/// A fully parsed experiment recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub enabled: bool,
    pub strategy: StrategySpec,
    pub updates: ConfigUpdates,
}

#[derive(Default)]
struct SweepParams {
    kind: Option<SweepKind>,
    domain: Option<SweepDomain>,
    start: Option<f64>,
    end: Option<f64>,
    step: Option<f64>,
}

impl Recipe {
    /// Parse a recipe from a flat JSON object.
    #[allow(clippy::too_many_lines)]
    pub fn parse(map: &serde_json::Map<String, Value>) -> Result<Self> {
        let test_type = map
            .get("Test Type")
            .map(|v| as_string("Test Type", v))
            .transpose()?
            .ok_or_else(|| invalid("Test Type", "missing required key"))?;

        let mut enabled = true;
        let mut updates = ConfigUpdates::default();
        let mut loops: Option<usize> = None;
        let mut sweep = SweepParams::default();
        let mut shmoo_file: Option<PathBuf> = None;
        let mut shmoo_label: Option<String> = None;

        for (key, value) in map {
            if is_blank(value) {
                continue;
            }
            match key.as_str() {
                "Test Type" | "Comment" => {}
                "Experiment" => {
                    enabled = as_string(key, value)?.eq_ignore_ascii_case("enabled");
                }
                "Test Name" => updates.name = Some(as_string(key, value)?),
                "Test Mode" => {
                    updates.target = Some(TestTarget::parse(&as_string(key, value)?)?);
                }
                "Visual ID" => updates.visual_id = Some(as_string(key, value)?),
                "QDF" => updates.qdf = Some(as_string(key, value)?),
                "Bucket" => updates.bucket = Some(as_string(key, value)?),
                "Content" => {
                    updates.content = Some(ContentType::parse(&as_string(key, value)?)?);
                }
                "Pass String" => updates.pass_strings = Some(as_string(key, value)?),
                "Fail String" => updates.fail_strings = Some(as_string(key, value)?),
                "Test Time" => updates.test_time_minutes = Some(as_u64(key, value)?),
                "Reset" => updates.reset = Some(as_bool(key, value)?),
                "Reset on PASS" => updates.reset_on_pass = Some(as_bool(key, value)?),
                "FastBoot" => updates.fastboot = Some(as_bool(key, value)?),
                "600W Unit" => updates.high_power_unit = Some(as_bool(key, value)?),
                "Pseudo Config" => updates.pseudo = Some(as_bool(key, value)?),
                "Configuration (Mask)" => updates.mask = Some(as_string(key, value)?),
                "Boot Breakpoint" => {
                    updates.postcode_break =
                        Some(u32::try_from(as_fuse_value(key, value)?).map_err(|_| {
                            invalid(key, "postcode exceeds 32 bits")
                        })?);
                }
                "Disable 2 Cores" => updates.dis_two_cores = Some(as_fuse_value(key, value)?),
                "Disable 1 Core" => updates.dis_one_core = Some(as_fuse_value(key, value)?),
                "Check Core" => updates.check_core = Some(as_u32(key, value)?),
                "Core License" => updates.core_license = Some(as_core_license(key, value)?),
                "Voltage Type" => {
                    updates.volt_type = Some(VoltageType::parse(&as_string(key, value)?)?);
                }
                "Voltage IA" => updates.volt_core = Some(as_f64(key, value)?),
                "Voltage CFC" => updates.volt_mesh = Some(as_f64(key, value)?),
                "Frequency IA" => updates.freq_core = Some(as_u32(key, value)?),
                "Frequency CFC" => updates.freq_mesh = Some(as_u32(key, value)?),
                "Loops" => {
                    loops = Some(usize::try_from(as_u64(key, value)?).map_err(|_| {
                        invalid(key, "loop count out of range")
                    })?);
                }
                "Type" => sweep.kind = Some(SweepKind::parse(&as_string(key, value)?)?),
                "Domain" => sweep.domain = Some(SweepDomain::parse(&as_string(key, value)?)?),
                "Start" => sweep.start = Some(as_f64(key, value)?),
                "End" => sweep.end = Some(as_f64(key, value)?),
                "Steps" => sweep.step = Some(as_f64(key, value)?),
                "ShmooFile" => shmoo_file = Some(PathBuf::from(as_string(key, value)?)),
                "ShmooLabel" => shmoo_label = Some(as_string(key, value)?),
                unknown => {
                    return Err(invalid(unknown, "unknown recipe key"));
                }
            }
        }

        // Console content armed with a breakpoint runs as bootbreaks.
        if updates.postcode_break.is_some()
            && updates.content == Some(ContentType::PysvConsole)
        {
            updates.content = Some(ContentType::BootBreaks);
        }

        let strategy = match test_type.as_str() {
            "Loops" => StrategySpec::Loops {
                iterations: loops.ok_or_else(|| invalid("Loops", "missing loop count"))?,
            },
            "Sweep" => StrategySpec::Sweep {
                axis: SweepAxisSpec {
                    kind: sweep.kind.ok_or_else(|| invalid("Type", "missing sweep type"))?,
                    domain: sweep
                        .domain
                        .ok_or_else(|| invalid("Domain", "missing sweep domain"))?,
                    start: sweep.start.ok_or_else(|| invalid("Start", "missing"))?,
                    end: sweep.end.ok_or_else(|| invalid("End", "missing"))?,
                    step: sweep.step.ok_or_else(|| invalid("Steps", "missing"))?,
                },
            },
            "Shmoo" => StrategySpec::Shmoo {
                file: shmoo_file.ok_or_else(|| invalid("ShmooFile", "missing"))?,
                label: shmoo_label.ok_or_else(|| invalid("ShmooLabel", "missing"))?,
            },
            other => {
                return Err(SdhError::UnknownTestType {
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            enabled,
            strategy,
            updates,
        })
    }

    /// Load a single recipe from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let map = read_json_object(path)?;
        Self::parse(&map)
    }
}

fn read_json_object(path: &Path) -> Result<serde_json::Map<String, Value>> {
    if !path.exists() {
        return Err(SdhError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|e| SdhError::io(path, e))?;
    let value: Value = serde_json::from_str(&raw)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| SdhError::Serialization {
            context: "recipe",
            details: format!("{} is not a JSON object", path.display()),
        })
}

// ──────────────────── recipe sets ────────────────────

/// Named recipes loaded from a batch file (one JSON object per experiment).
#[derive(Debug, Default)]
pub struct RecipeSet {
    pub entries: Vec<(String, Recipe)>,
}

impl RecipeSet {
    /// Load a batch file: a JSON object mapping experiment names to recipe
    /// objects. Parse failures abort the whole load so a bad sheet never runs
    /// half its experiments.
    pub fn load(path: &Path) -> Result<Self> {
        let map = read_json_object(path)?;
        let mut entries = Vec::with_capacity(map.len());
        for (name, value) in &map {
            let recipe_map = value.as_object().ok_or_else(|| SdhError::Serialization {
                context: "recipe",
                details: format!("experiment '{name}' is not a JSON object"),
            })?;
            entries.push((name.clone(), Recipe::parse(recipe_map)?));
        }
        Ok(Self { entries })
    }
}

// ──────────────────── shmoo definitions ────────────────────

/// Fixed operating point applied before a shmoo, per knob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmooBaseline {
    #[serde(rename = "core")]
    pub core: Option<f64>,
    #[serde(rename = "cfc")]
    pub mesh: Option<f64>,
}

/// One labelled entry of a shmoo definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct ShmooDefinition {
    #[serde(rename = "VoltageSettings", default)]
    pub voltage_baseline: ShmooBaseline,
    #[serde(rename = "FrequencySettings", default)]
    pub frequency_baseline: ShmooBaseline,
    #[serde(rename = "Xaxis")]
    pub x_axis: SweepAxisSpec,
    #[serde(rename = "Yaxis")]
    pub y_axis: SweepAxisSpec,
}

impl ShmooDefinition {
    /// Load one labelled definition from a shmoo file (a JSON object mapping
    /// labels to definitions).
    pub fn load(path: &Path, label: &str) -> Result<Self> {
        if !path.exists() {
            return Err(SdhError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| SdhError::io(path, e))?;
        let mut book: std::collections::BTreeMap<String, Self> = serde_json::from_str(&raw)?;
        book.remove(label).ok_or_else(|| SdhError::ShmooLabelNotFound {
            label: label.to_string(),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn obj(json: &str) -> serde_json::Map<String, Value> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parse_full_loops_recipe() {
        let map = obj(
            r#"{
                "Test Type": "Loops",
                "Loops": 5,
                "Test Name": "MeshStress",
                "Test Mode": "mesh",
                "Content": "Dragon",
                "Visual ID": "7xk1234",
                "Bucket": "VMIN",
                "Pass String": "Test Complete,All Done",
                "Fail String": "Test Failed",
                "Disable 2 Cores": "0x3000000",
                "Core License": "4: AVX heavy",
                "Reset": "True",
                "Reset on PASS": "False",
                "Frequency CFC": 20,
                "Voltage CFC": 0.85
            }"#,
        );
        let recipe = Recipe::parse(&map).unwrap();
        assert!(recipe.enabled);
        assert_eq!(recipe.strategy, StrategySpec::Loops { iterations: 5 });
        assert_eq!(recipe.updates.name.as_deref(), Some("MeshStress"));
        assert_eq!(recipe.updates.dis_two_cores, Some(0x0300_0000));
        assert_eq!(recipe.updates.core_license, Some(4));
        assert_eq!(recipe.updates.freq_mesh, Some(20));
        assert_eq!(recipe.updates.volt_mesh, Some(0.85));
        assert_eq!(recipe.updates.reset, Some(true));

        let mut config = TestConfiguration::default();
        recipe.updates.apply(&mut config);
        assert_eq!(config.name, "MeshStress");
        assert_eq!(config.pass_strings, "Test Complete,All Done");
        assert_eq!(config.freq_mesh, Some(20));
    }

    #[test]
    fn parse_sweep_recipe() {
        let map = obj(
            r#"{
                "Test Type": "Sweep",
                "Type": "Frequency",
                "Domain": "CFC",
                "Start": 16,
                "End": 39,
                "Steps": 4
            }"#,
        );
        let recipe = Recipe::parse(&map).unwrap();
        let StrategySpec::Sweep { axis } = recipe.strategy else {
            panic!("expected sweep");
        };
        assert_eq!(axis.kind, SweepKind::Frequency);
        assert_eq!(axis.domain, SweepDomain::Mesh);
        assert!((axis.start - 16.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sweep_missing_param_is_rejected() {
        let map = obj(r#"{"Test Type": "Sweep", "Type": "Frequency", "Domain": "CFC"}"#);
        let err = Recipe::parse(&map).unwrap_err();
        assert_eq!(err.code(), "SDH-1101");
    }

    #[test]
    fn unknown_test_type_is_rejected() {
        let map = obj(r#"{"Test Type": "Margining"}"#);
        let err = Recipe::parse(&map).unwrap_err();
        assert_eq!(err.code(), "SDH-1102");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let map = obj(r#"{"Test Type": "Loops", "Loops": 1, "Lopos": 3}"#);
        let err = Recipe::parse(&map).unwrap_err();
        assert!(err.to_string().contains("Lopos"));
    }

    #[test]
    fn blank_cells_are_skipped() {
        let map = obj(
            r#"{"Test Type": "Loops", "Loops": 2, "Visual ID": "", "Bucket": null}"#,
        );
        let recipe = Recipe::parse(&map).unwrap();
        assert!(recipe.updates.visual_id.is_none());
        assert!(recipe.updates.bucket.is_none());
    }

    #[test]
    fn disabled_experiment_flag() {
        let map = obj(r#"{"Test Type": "Loops", "Loops": 1, "Experiment": "Disabled"}"#);
        assert!(!Recipe::parse(&map).unwrap().enabled);
    }

    #[test]
    fn console_with_breakpoint_becomes_bootbreaks() {
        let map = obj(
            r#"{
                "Test Type": "Loops",
                "Loops": 1,
                "Content": "PYSVConsole",
                "Boot Breakpoint": "0xbf000000"
            }"#,
        );
        let recipe = Recipe::parse(&map).unwrap();
        assert_eq!(recipe.updates.content, Some(ContentType::BootBreaks));
        assert_eq!(recipe.updates.postcode_break, Some(0xbf00_0000));
    }

    #[test]
    fn recipe_set_loads_batch_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "Exp A": {{"Test Type": "Loops", "Loops": 3}},
                "Exp B": {{"Test Type": "Loops", "Loops": 1, "Experiment": "Disabled"}}
            }}"#
        )
        .unwrap();
        let set = RecipeSet::load(file.path()).unwrap();
        assert_eq!(set.entries.len(), 2);
        let disabled = set
            .entries
            .iter()
            .find(|(name, _)| name == "Exp B")
            .unwrap();
        assert!(!disabled.1.enabled);
    }

    #[test]
    fn shmoo_definition_loads_by_label() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "MeshVF": {{
                    "VoltageSettings": {{"cfc": 0.9}},
                    "FrequencySettings": {{"core": 20}},
                    "Xaxis": {{"Type": "frequency", "Domain": "mesh", "Start": 16, "End": 24, "Steps": 4}},
                    "Yaxis": {{"Type": "voltage", "Domain": "mesh", "Start": 0.8, "End": 0.9, "Steps": 0.05}}
                }}
            }}"#
        )
        .unwrap();
        let def = ShmooDefinition::load(file.path(), "MeshVF").unwrap();
        assert_eq!(def.x_axis.kind, SweepKind::Frequency);
        assert_eq!(def.voltage_baseline.mesh, Some(0.9));

        let err = ShmooDefinition::load(file.path(), "Nope").unwrap_err();
        assert_eq!(err.code(), "SDH-1103");
    }
}
