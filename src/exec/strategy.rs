//! Run strategies: plain loops, one-axis sweeps, and two-axis shmoos.
//!
//! A strategy is a pure iteration plan. Value generation lives here; the
//! per-iteration driving loop (gating, retry, result collection) is shared and
//! lives in [`crate::exec::framework`].

#![allow(missing_docs)]

use std::fmt;

use crate::core::config::{SweepDomain, SweepKind, TestConfiguration};
use crate::core::errors::{Result, SdhError};
use crate::core::recipe::{ShmooDefinition, SweepAxisSpec};

// ──────────────────── range generation ────────────────────

/// Float comparison slack for voltage ranges.
const VOLT_EPSILON: f64 = 1e-9;

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Generate the value sequence for one axis, start toward end inclusive.
///
/// Values step from `start` in the direction of `end`; when the step does not
/// land exactly on `end`, the final value is clamped to `end` so the range
/// boundary is always tested. Frequency ranges are integral ratios; voltage
/// ranges are rounded to 5 decimal places with half-step tolerance.
pub fn build_range(kind: SweepKind, start: f64, end: f64, step: f64) -> Result<Vec<f64>> {
    if step <= 0.0 || !step.is_finite() {
        return Err(SdhError::InvalidConfig {
            details: format!("sweep step must be positive, got {step}"),
        });
    }
    if !start.is_finite() || !end.is_finite() {
        return Err(SdhError::InvalidConfig {
            details: "sweep bounds must be finite".to_string(),
        });
    }

    let mut values = match kind {
        SweepKind::Frequency => {
            #[allow(clippy::cast_possible_truncation)]
            let (start_i, end_i, step_i) = (
                start.round() as i64,
                end.round() as i64,
                step.round().max(1.0) as i64,
            );
            let mut values = Vec::new();
            let mut current = start_i;
            if start_i <= end_i {
                while current <= end_i {
                    values.push(current as f64);
                    current += step_i;
                }
            } else {
                while current >= end_i {
                    values.push(current as f64);
                    current -= step_i;
                }
            }
            values
        }
        SweepKind::Voltage => {
            let mut values = Vec::new();
            let mut current = start;
            let tolerance = step / 2.0;
            if start <= end {
                while current <= end + tolerance {
                    values.push(round5(current));
                    current += step;
                }
            } else {
                while current >= end - tolerance {
                    values.push(round5(current));
                    current -= step;
                }
            }
            values
        }
    };

    // Clamp the boundary: overshoot is replaced, undershoot appends `end`.
    match values.last().copied() {
        None => values.push(end),
        Some(last) => {
            let passed = if start <= end { last > end } else { last < end };
            if passed {
                if let Some(slot) = values.last_mut() {
                    *slot = end;
                }
            } else if (last - end).abs() > VOLT_EPSILON {
                values.push(end);
            }
        }
    }
    Ok(values)
}

// ──────────────────── iteration points ────────────────────

/// One axis setting applied to the configuration for an iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisValue {
    pub kind: SweepKind,
    pub domain: SweepDomain,
    pub value: f64,
}

impl AxisValue {
    /// Apply this value to the configuration.
    pub fn apply(self, config: &mut TestConfiguration) {
        match (self.kind, self.domain) {
            (SweepKind::Frequency, SweepDomain::Core) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    config.freq_core = Some(self.value.round() as u32);
                }
            }
            (SweepKind::Frequency, SweepDomain::Mesh) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    config.freq_mesh = Some(self.value.round() as u32);
                }
            }
            (SweepKind::Voltage, SweepDomain::Core) => config.volt_core = Some(self.value),
            (SweepKind::Voltage, SweepDomain::Mesh) => config.volt_mesh = Some(self.value),
        }
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SweepKind::Frequency => write!(f, "{}_freq={}", self.domain, self.value),
            SweepKind::Voltage => write!(f, "{}_volt={:.5}", self.domain, self.value),
        }
    }
}

/// The knob settings of one planned iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationPoint {
    /// No knob changes (loop strategy).
    Fixed,
    OneAxis(AxisValue),
    /// X then Y axis values (shmoo strategy).
    TwoAxis(AxisValue, AxisValue),
}

impl IterationPoint {
    pub fn apply(self, config: &mut TestConfiguration) {
        match self {
            Self::Fixed => {}
            Self::OneAxis(axis) => axis.apply(config),
            Self::TwoAxis(x, y) => {
                x.apply(config);
                y.apply(config);
            }
        }
    }
}

impl fmt::Display for IterationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::OneAxis(axis) => write!(f, "{axis}"),
            Self::TwoAxis(x, y) => write!(f, "{x} {y}"),
        }
    }
}

// ──────────────────── strategy ────────────────────

/// One resolved axis: knob, domain, and the generated value sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAxis {
    pub kind: SweepKind,
    pub domain: SweepDomain,
    pub values: Vec<f64>,
}

impl ResolvedAxis {
    pub fn from_spec(spec: &SweepAxisSpec) -> Result<Self> {
        Ok(Self {
            kind: spec.kind,
            domain: spec.domain,
            values: build_range(spec.kind, spec.start, spec.end, spec.step)?,
        })
    }

    fn label(&self, value: f64) -> String {
        match self.kind {
            SweepKind::Frequency => format!("{value}"),
            SweepKind::Voltage => format!("{value:.3}"),
        }
    }

    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.values.iter().map(|v| self.label(*v)).collect()
    }
}

/// A fully resolved run plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Loop {
        iterations: usize,
    },
    Sweep {
        axis: ResolvedAxis,
    },
    /// Y is the outer loop; iterations run row-major across X.
    Shmoo {
        x: ResolvedAxis,
        y: ResolvedAxis,
        /// Fixed operating point applied before the shmoo starts.
        baseline: ShmooBaselinePoint,
    },
}

/// Fixed voltages/frequencies a shmoo pins before sweeping its axes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShmooBaselinePoint {
    pub volt_core: Option<f64>,
    pub volt_mesh: Option<f64>,
    pub freq_core: Option<u32>,
    pub freq_mesh: Option<u32>,
}

impl ShmooBaselinePoint {
    pub fn apply(self, config: &mut TestConfiguration) {
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
    }
}

impl Strategy {
    pub fn loops(iterations: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(SdhError::InvalidConfig {
                details: "loop count must be at least 1".to_string(),
            });
        }
        Ok(Self::Loop { iterations })
    }

    pub fn sweep(spec: &SweepAxisSpec) -> Result<Self> {
        Ok(Self::Sweep {
            axis: ResolvedAxis::from_spec(spec)?,
        })
    }

    pub fn shmoo(definition: &ShmooDefinition) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let baseline = ShmooBaselinePoint {
            volt_core: definition.voltage_baseline.core,
            volt_mesh: definition.voltage_baseline.mesh,
            freq_core: definition.frequency_baseline.core.map(|v| v.round() as u32),
            freq_mesh: definition.frequency_baseline.mesh.map(|v| v.round() as u32),
        };
        Ok(Self::Shmoo {
            x: ResolvedAxis::from_spec(&definition.x_axis)?,
            y: ResolvedAxis::from_spec(&definition.y_axis)?,
            baseline,
        })
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Loop { .. } => "Loops",
            Self::Sweep { .. } => "Sweep",
            Self::Shmoo { .. } => "Shmoo",
        }
    }

    #[must_use]
    pub fn total_iterations(&self) -> usize {
        match self {
            Self::Loop { iterations } => *iterations,
            Self::Sweep { axis } => axis.values.len(),
            Self::Shmoo { x, y, .. } => x.values.len() * y.values.len(),
        }
    }

    /// The full iteration plan, in execution order.
    #[must_use]
    pub fn plan(&self) -> Vec<IterationPoint> {
        match self {
            Self::Loop { iterations } => vec![IterationPoint::Fixed; *iterations],
            Self::Sweep { axis } => axis
                .values
                .iter()
                .map(|v| {
                    IterationPoint::OneAxis(AxisValue {
                        kind: axis.kind,
                        domain: axis.domain,
                        value: *v,
                    })
                })
                .collect(),
            Self::Shmoo { x, y, .. } => {
                let mut points = Vec::with_capacity(x.values.len() * y.values.len());
                for yv in &y.values {
                    for xv in &x.values {
                        points.push(IterationPoint::TwoAxis(
                            AxisValue {
                                kind: x.kind,
                                domain: x.domain,
                                value: *xv,
                            },
                            AxisValue {
                                kind: y.kind,
                                domain: y.domain,
                                value: *yv,
                            },
                        ));
                    }
                }
                points
            }
        }
    }

    /// Axis labels for matrix rendering: `(x_labels, y_labels)`.
    #[must_use]
    pub fn axis_labels(&self) -> (Vec<String>, Vec<String>) {
        match self {
            Self::Loop { iterations } => {
                (Vec::new(), (1..=*iterations).map(|i| i.to_string()).collect())
            }
            Self::Sweep { axis } => (Vec::new(), axis.labels()),
            Self::Shmoo { x, y, .. } => (x.labels(), y.labels()),
        }
    }

    /// Shmoo matrix dimensions `(x_len, y_len)`, when two-dimensional.
    #[must_use]
    pub fn matrix_dims(&self) -> Option<(usize, usize)> {
        match self {
            Self::Shmoo { x, y, .. } => Some((x.values.len(), y.values.len())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recipe::ShmooBaseline;

    fn axis(kind: SweepKind, start: f64, end: f64, step: f64) -> SweepAxisSpec {
        SweepAxisSpec {
            kind,
            domain: SweepDomain::Mesh,
            start,
            end,
            step,
        }
    }

    #[test]
    fn ascending_frequency_range_clamps_to_end() {
        let values = build_range(SweepKind::Frequency, 16.0, 39.0, 4.0).unwrap();
        assert_eq!(values, vec![16.0, 20.0, 24.0, 28.0, 32.0, 36.0, 39.0]);
    }

    #[test]
    fn descending_frequency_range_steps_from_start() {
        let values = build_range(SweepKind::Frequency, 39.0, 16.0, 4.0).unwrap();
        assert_eq!(values, vec![39.0, 35.0, 31.0, 27.0, 23.0, 19.0, 16.0]);
    }

    #[test]
    fn exact_frequency_range_keeps_end() {
        let values = build_range(SweepKind::Frequency, 16.0, 24.0, 4.0).unwrap();
        assert_eq!(values, vec![16.0, 20.0, 24.0]);
    }

    #[test]
    fn voltage_range_rounds_and_tolerates_float_drift() {
        let values = build_range(SweepKind::Voltage, 0.5, 0.8, 0.1).unwrap();
        assert_eq!(values, vec![0.5, 0.6, 0.7, 0.8]);
    }

    #[test]
    fn voltage_range_clamps_overshoot() {
        let values = build_range(SweepKind::Voltage, 0.5, 0.75, 0.1).unwrap();
        assert_eq!(values, vec![0.5, 0.6, 0.7, 0.75]);
    }

    #[test]
    fn descending_voltage_range() {
        let values = build_range(SweepKind::Voltage, 0.9, 0.7, 0.1).unwrap();
        assert_eq!(values, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn single_point_range_when_start_equals_end() {
        let values = build_range(SweepKind::Frequency, 20.0, 20.0, 4.0).unwrap();
        assert_eq!(values, vec![20.0]);
    }

    #[test]
    fn non_positive_step_is_rejected() {
        assert!(build_range(SweepKind::Frequency, 16.0, 39.0, 0.0).is_err());
        assert!(build_range(SweepKind::Voltage, 0.5, 0.8, -0.1).is_err());
    }

    #[test]
    fn zero_loop_count_is_rejected() {
        assert!(Strategy::loops(0).is_err());
        assert_eq!(Strategy::loops(3).unwrap().total_iterations(), 3);
    }

    #[test]
    fn sweep_plan_applies_values_in_order() {
        let strategy =
            Strategy::sweep(&axis(SweepKind::Frequency, 16.0, 24.0, 4.0)).unwrap();
        let plan = strategy.plan();
        assert_eq!(plan.len(), 3);

        let mut config = TestConfiguration::default();
        plan[1].apply(&mut config);
        assert_eq!(config.freq_mesh, Some(20));
        assert_eq!(config.freq_core, None);
    }

    #[test]
    fn shmoo_plan_is_row_major_with_y_outer() {
        let definition = ShmooDefinition {
            voltage_baseline: ShmooBaseline::default(),
            frequency_baseline: ShmooBaseline::default(),
            x_axis: SweepAxisSpec {
                kind: SweepKind::Frequency,
                domain: SweepDomain::Mesh,
                start: 16.0,
                end: 24.0,
                step: 4.0,
            },
            y_axis: SweepAxisSpec {
                kind: SweepKind::Voltage,
                domain: SweepDomain::Mesh,
                start: 0.8,
                end: 0.9,
                step: 0.05,
            },
        };
        let strategy = Strategy::shmoo(&definition).unwrap();
        assert_eq!(strategy.total_iterations(), 9);
        assert_eq!(strategy.matrix_dims(), Some((3, 3)));

        let plan = strategy.plan();
        // First row: Y fixed at 0.8, X walking 16 → 24.
        let IterationPoint::TwoAxis(x0, y0) = plan[0] else {
            panic!("expected two-axis point");
        };
        assert!((x0.value - 16.0).abs() < f64::EPSILON);
        assert!((y0.value - 0.8).abs() < f64::EPSILON);
        let IterationPoint::TwoAxis(x2, y2) = plan[2] else {
            panic!("expected two-axis point");
        };
        assert!((x2.value - 24.0).abs() < f64::EPSILON);
        assert!((y2.value - 0.8).abs() < f64::EPSILON);
        // Second row bumps Y.
        let IterationPoint::TwoAxis(_, y3) = plan[3] else {
            panic!("expected two-axis point");
        };
        assert!((y3.value - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn shmoo_baseline_applies_fixed_point() {
        let baseline = ShmooBaselinePoint {
            volt_mesh: Some(0.9),
            freq_core: Some(20),
            ..ShmooBaselinePoint::default()
        };
        let mut config = TestConfiguration::default();
        baseline.apply(&mut config);
        assert_eq!(config.volt_mesh, Some(0.9));
        assert_eq!(config.freq_core, Some(20));
        assert_eq!(config.volt_core, None);
    }

    #[test]
    fn loop_plan_is_all_fixed_points() {
        let strategy = Strategy::loops(4).unwrap();
        assert!(strategy.plan().iter().all(|p| *p == IterationPoint::Fixed));
        assert_eq!(strategy.label(), "Loops");
    }

    #[test]
    fn axis_labels_for_shmoo() {
        let strategy = Strategy::shmoo(&ShmooDefinition {
            voltage_baseline: ShmooBaseline::default(),
            frequency_baseline: ShmooBaseline::default(),
            x_axis: axis(SweepKind::Frequency, 16.0, 20.0, 4.0),
            y_axis: axis(SweepKind::Voltage, 0.8, 0.85, 0.05),
        })
        .unwrap();
        let (x_labels, y_labels) = strategy.axis_labels();
        assert_eq!(x_labels, vec!["16", "20"]);
        assert_eq!(y_labels, vec!["0.800", "0.850"]);
    }

    // ──────────────────── range properties ────────────────────

    mod properties {
        use proptest::prelude::*;

        // `Strategy` below is proptest's trait; the run-plan enum is `plan::Strategy`.
        use super::super::{self as plan, build_range};
        use super::{ShmooBaseline, ShmooDefinition, SweepAxisSpec, SweepDomain, SweepKind};

        fn arb_frequency_bounds() -> impl Strategy<Value = (f64, f64, f64)> {
            (1i64..=100, 1i64..=100, 1i64..=20)
                .prop_map(|(start, end, step)| (start as f64, end as f64, step as f64))
        }

        fn arb_voltage_bounds() -> impl Strategy<Value = (f64, f64, f64)> {
            (30u32..=130, 30u32..=130, 1u32..=10).prop_map(|(start, end, step)| {
                (
                    f64::from(start) / 100.0,
                    f64::from(end) / 100.0,
                    f64::from(step) / 100.0,
                )
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            /// Every range ends exactly on `end` and never overshoots it.
            #[test]
            fn frequency_range_is_bounded_and_ends_on_end(
                (start, end, step) in arb_frequency_bounds()
            ) {
                let values = build_range(SweepKind::Frequency, start, end, step).unwrap();
                prop_assert!(!values.is_empty());
                prop_assert_eq!(*values.last().unwrap(), end);
                let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
                for v in &values {
                    prop_assert!(*v >= lo && *v <= hi, "value {v} outside [{lo}, {hi}]");
                }
            }

            /// Frequency values are integral and strictly monotonic from
            /// start toward end.
            #[test]
            fn frequency_range_is_integral_and_monotonic(
                (start, end, step) in arb_frequency_bounds()
            ) {
                let values = build_range(SweepKind::Frequency, start, end, step).unwrap();
                prop_assert_eq!(*values.first().unwrap(), start);
                for v in &values {
                    prop_assert_eq!(v.fract(), 0.0, "non-integral frequency {}", v);
                }
                for pair in values.windows(2) {
                    if start <= end {
                        prop_assert!(pair[0] < pair[1]);
                    } else {
                        prop_assert!(pair[0] > pair[1]);
                    }
                }
            }

            /// Voltage ranges start on `start`, end on `end`, and walk
            /// monotonically between them despite float accumulation.
            #[test]
            fn voltage_range_walks_start_to_end(
                (start, end, step) in arb_voltage_bounds()
            ) {
                let values = build_range(SweepKind::Voltage, start, end, step).unwrap();
                prop_assert!(!values.is_empty());
                prop_assert!((values[0] - start).abs() < 1e-9);
                prop_assert!((values.last().unwrap() - end).abs() < 1e-9);
                for pair in values.windows(2) {
                    if start <= end {
                        prop_assert!(pair[0] < pair[1] + 1e-9);
                    } else {
                        prop_assert!(pair[0] > pair[1] - 1e-9);
                    }
                }
            }

            /// A sweep plan always has one point per generated value, and the
            /// shmoo plan length is the product of its axis lengths.
            #[test]
            fn plan_length_matches_total_iterations(
                (start, end, step) in arb_frequency_bounds(),
                (vstart, vend, vstep) in arb_voltage_bounds()
            ) {
                let sweep = plan::Strategy::sweep(&SweepAxisSpec {
                    kind: SweepKind::Frequency,
                    domain: SweepDomain::Core,
                    start,
                    end,
                    step,
                }).unwrap();
                prop_assert_eq!(sweep.plan().len(), sweep.total_iterations());

                let shmoo = plan::Strategy::shmoo(&ShmooDefinition {
                    voltage_baseline: ShmooBaseline::default(),
                    frequency_baseline: ShmooBaseline::default(),
                    x_axis: SweepAxisSpec {
                        kind: SweepKind::Frequency,
                        domain: SweepDomain::Mesh,
                        start,
                        end,
                        step,
                    },
                    y_axis: SweepAxisSpec {
                        kind: SweepKind::Voltage,
                        domain: SweepDomain::Mesh,
                        start: vstart,
                        end: vend,
                        step: vstep,
                    },
                }).unwrap();
                let (x_len, y_len) = shmoo.matrix_dims().unwrap();
                prop_assert_eq!(shmoo.plan().len(), x_len * y_len);
                prop_assert_eq!(shmoo.total_iterations(), x_len * y_len);
            }
        }
    }
}
