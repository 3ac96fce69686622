//! USDA grade table and the statistics it is evaluated against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::mapping::KernelClass;

/// Grade returned when no rule of the table is satisfied.
pub const SAMPLE_GRADE: &str = "Sample Grade";

/// Below this many kernels the absolute-count columns are used instead of
/// percentages.
pub const SMALL_SAMPLE_KERNELS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradeRule {
    pub name: &'static str,
    pub max_damage_pct: f64,
    pub max_damage_kernels: u32,
    pub max_heat_pct: f64,
    pub max_heat_kernels: u32,
}

const fn rule(
    name: &'static str,
    max_damage_pct: f64,
    max_damage_kernels: u32,
    max_heat_pct: f64,
    max_heat_kernels: u32,
) -> GradeRule {
    GradeRule {
        name,
        max_damage_pct,
        max_damage_kernels,
        max_heat_pct,
        max_heat_kernels,
    }
}

/// Ordered by increasing severity; the first matching rule wins.
pub const USDA_GRADES: [GradeRule; 5] = [
    rule("U.S. No. 1", 3.0, 1, 0.1, 0),
    rule("U.S. No. 2", 5.0, 2, 0.2, 0),
    rule("U.S. No. 3", 7.0, 3, 0.5, 0),
    rule("U.S. No. 4", 10.0, 5, 1.0, 0),
    rule("U.S. No. 5", 15.0, 7, 3.0, 1),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub total_kernels: u32,
    pub damage_kernels: u32,
    pub damage_pct: f64,
    pub heat_kernels: u32,
    pub heat_pct: f64,
}

impl SampleStats {
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut total = 0;
        let mut damage = 0;
        let mut heat = 0;
        for d in detections {
            let class = KernelClass::from_label(&d.label);
            total += 1;
            if class.is_damage() {
                damage += 1;
            }
            if class == KernelClass::HeatDamage {
                heat += 1;
            }
        }
        Self::from_counts(total, damage, heat)
    }

    pub fn from_counts(total_kernels: u32, damage_kernels: u32, heat_kernels: u32) -> Self {
        let pct = |n: u32| {
            if total_kernels == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total_kernels as f64
            }
        };
        Self {
            total_kernels,
            damage_kernels,
            damage_pct: pct(damage_kernels),
            heat_kernels,
            heat_pct: pct(heat_kernels),
        }
    }

    pub fn is_small_sample(&self) -> bool {
        self.total_kernels < SMALL_SAMPLE_KERNELS
    }
}

impl GradeRule {
    fn admits(&self, stats: &SampleStats) -> bool {
        if stats.is_small_sample() {
            stats.damage_kernels <= self.max_damage_kernels
                && stats.heat_kernels <= self.max_heat_kernels
        } else {
            stats.damage_pct <= self.max_damage_pct && stats.heat_pct <= self.max_heat_pct
        }
    }
}

/// Classify a sample against [`USDA_GRADES`].
///
/// Small samples are judged on kernel counts, larger ones on percentages, so
/// a handful of kernels cannot produce misleading percentages.
pub fn classify_grade(stats: &SampleStats) -> &'static str {
    USDA_GRADES
        .iter()
        .find(|r| r.admits(stats))
        .map(|r| r.name)
        .unwrap_or(SAMPLE_GRADE)
}

/// Number of detections per label, ordered by label.
pub fn count_labels(detections: &[Detection]) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for d in detections {
        *counts.entry(d.label.clone()).or_insert(0) += 1;
    }
    counts
}
