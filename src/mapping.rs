use image::Rgb;
use tracing::debug;

/// Label the detector uses for undamaged kernels.
pub const NORMAL_LABEL: &str = "Normal";

pub const DAMAGE_LABELS: [&str; 7] = [
    "Blue-eye Mold damage",
    "Drier damage",
    "Insect damage",
    "Mold damage",
    "Sprout damage",
    "Surface Mold",
    "cracked",
];

pub const HEAT_DAMAGE_LABELS: [&str; 1] = ["Heat damage"];

/// Grading partition of detector labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelClass {
    Normal,
    Damage,
    HeatDamage,
}

impl KernelClass {
    /// Anything that is not a normal kernel counts as damage; heat damage is
    /// damage that is also tracked on its own.
    pub fn from_label(label: &str) -> Self {
        if label == NORMAL_LABEL {
            KernelClass::Normal
        } else if HEAT_DAMAGE_LABELS.contains(&label) {
            KernelClass::HeatDamage
        } else {
            if !is_known_label(label) {
                debug!(label, "unknown detector label counted as damage");
            }
            KernelClass::Damage
        }
    }

    pub fn is_damage(&self) -> bool {
        !matches!(self, KernelClass::Normal)
    }
}

/// True for labels the corn model is trained on.
pub fn is_known_label(label: &str) -> bool {
    label == NORMAL_LABEL || DAMAGE_LABELS.contains(&label) || HEAT_DAMAGE_LABELS.contains(&label)
}

/// Outline colour for a label. Unknown labels get a stable colour derived
/// from the label text.
pub fn label_color(label: &str) -> Rgb<u8> {
    match label {
        NORMAL_LABEL => Rgb([0, 0, 255]),
        "Mold damage" => Rgb([255, 0, 0]),
        "Blue-eye Mold damage" => Rgb([139, 0, 0]),
        other => {
            // FNV-1a over the label bytes.
            let hash = other
                .bytes()
                .fold(0x811c_9dc5_u32, |h, b| (h ^ b as u32).wrapping_mul(0x0100_0193));
            Rgb([(hash >> 16) as u8, (hash >> 8) as u8, hash as u8])
        }
    }
}
