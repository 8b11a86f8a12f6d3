//! Model selection policy.
//!
//! An ordered decision table: the first rule whose preset and memory gate
//! both hold contributes an explicit priority list, and the first installed
//! model on that list wins. The priority lists are authoritative as written;
//! they are not derived from the descriptors' quality/speed scores, which
//! the policy deliberately ignores.

use crate::capability::SystemCapability;
use crate::error::Error;
use crate::presets::QualityPreset;
use crate::registry::ModelDescriptor;

/// Memory gates, in GB of usable accelerator memory.
const COMMERCIAL_MIN_GB: f64 = 16.0;
const SDXL_MIN_GB: f64 = 8.0;
const PREVIEW_MIN_GB: f64 = 6.0;

const COMMERCIAL_PRIORITY: &[&str] = &["realvis-xl", "juggernaut-xl"];
const STANDARD_PRIORITY: &[&str] = &["juggernaut-xl", "realvis-xl"];
const PREVIEW_PRIORITY: &[&str] = &["sdxl-lightning", "juggernaut-xl"];

/// Every preset falls back to this when nothing else qualifies, regardless
/// of available memory.
const FALLBACK_MODEL: &str = "sd15";

/// Pick the model to run for `preset` on this machine, or fail if nothing
/// qualifies. Deterministic for a fixed (preset, available, capability)
/// tuple; callers must treat failure as fatal for the request.
pub fn select<'a>(
    preset: QualityPreset,
    available: &'a [ModelDescriptor],
    capability: &SystemCapability,
) -> Result<&'a ModelDescriptor, Error> {
    let usable = capability.usable_memory_gb;

    let priority: &[&str] = match preset {
        QualityPreset::Commercial if usable >= COMMERCIAL_MIN_GB => COMMERCIAL_PRIORITY,
        QualityPreset::HighQuality | QualityPreset::Standard if usable >= SDXL_MIN_GB => {
            STANDARD_PRIORITY
        }
        QualityPreset::Preview if usable >= PREVIEW_MIN_GB => PREVIEW_PRIORITY,
        _ => &[],
    };

    priority
        .iter()
        .chain(std::iter::once(&FALLBACK_MODEL))
        .find_map(|&id| installed(available, id))
        .ok_or(Error::NoCompatibleModel {
            preset,
            usable_memory_gb: usable,
        })
}

fn installed<'a>(available: &'a [ModelDescriptor], id: &str) -> Option<&'a ModelDescriptor> {
    available.iter().find(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::AcceleratorKind;
    use crate::registry::known_model;
    use std::path::Path;

    fn models(ids: &[&str]) -> Vec<ModelDescriptor> {
        ids.iter()
            .map(|id| {
                known_model(id)
                    .unwrap()
                    .materialize(Path::new("/tmp/models"))
            })
            .collect()
    }

    fn capability(usable_gb: f64) -> SystemCapability {
        SystemCapability {
            kind: if usable_gb > 0.0 {
                AcceleratorKind::GenericGpu
            } else {
                AcceleratorKind::None
            },
            total_memory_gb: usable_gb.max(8.0),
            usable_memory_gb: usable_gb,
        }
    }

    #[test]
    fn commercial_prefers_priority_order_not_scores() {
        // realvis-xl outranks juggernaut-xl here because the commercial list
        // says so, not because of its quality score.
        let available = models(&["juggernaut-xl", "realvis-xl"]);
        let chosen = select(QualityPreset::Commercial, &available, &capability(20.0)).unwrap();
        assert_eq!(chosen.id, "realvis-xl");
    }

    #[test]
    fn standard_prefers_juggernaut_despite_lower_score() {
        // realvis-xl carries the higher quality score; a score sort would
        // invert this result.
        let available = models(&["juggernaut-xl", "realvis-xl"]);
        for preset in [QualityPreset::Standard, QualityPreset::HighQuality] {
            let chosen = select(preset, &available, &capability(12.0)).unwrap();
            assert_eq!(chosen.id, "juggernaut-xl");
        }
    }

    #[test]
    fn preview_uses_second_choice_when_lightning_absent() {
        let available = models(&["juggernaut-xl"]);
        let chosen = select(QualityPreset::Preview, &available, &capability(6.0)).unwrap();
        assert_eq!(chosen.id, "juggernaut-xl");
    }

    #[test]
    fn preview_prefers_lightning_when_present() {
        let available = models(&["juggernaut-xl", "sdxl-lightning"]);
        let chosen = select(QualityPreset::Preview, &available, &capability(6.0)).unwrap();
        assert_eq!(chosen.id, "sdxl-lightning");
    }

    #[test]
    fn empty_model_set_fails_even_with_plenty_of_memory() {
        let err = select(QualityPreset::Standard, &[], &capability(32.0)).unwrap_err();
        assert!(matches!(err, Error::NoCompatibleModel { .. }));
    }

    #[test]
    fn sd15_fallback_applies_to_every_preset_at_zero_memory() {
        let available = models(&["sd15"]);
        for preset in QualityPreset::ALL {
            let chosen = select(preset, &available, &capability(0.0)).unwrap();
            assert_eq!(chosen.id, "sd15");
        }
    }

    #[test]
    fn memory_gate_drops_to_fallback() {
        // Enough models installed, but 4GB opens no SDXL rule.
        let available = models(&["juggernaut-xl", "realvis-xl", "sdxl-lightning", "sd15"]);
        let chosen = select(QualityPreset::Commercial, &available, &capability(4.0)).unwrap();
        assert_eq!(chosen.id, "sd15");
    }

    #[test]
    fn commercial_below_gate_uses_standard_rule() {
        // 12GB fails the 16GB commercial gate but matches nothing else for
        // commercial; the policy is ordered, so it falls through to sd15.
        let available = models(&["juggernaut-xl", "realvis-xl", "sd15"]);
        let chosen = select(QualityPreset::Commercial, &available, &capability(12.0)).unwrap();
        assert_eq!(chosen.id, "sd15");
    }

    #[test]
    fn selection_is_deterministic_across_subsets() {
        let all_ids = ["juggernaut-xl", "realvis-xl", "sdxl-lightning", "sd15"];
        for mask in 0u32..16 {
            let subset: Vec<&str> = all_ids
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            let available = models(&subset);
            for preset in QualityPreset::ALL {
                for usable in [0.0, 6.0, 8.0, 16.0, 32.0] {
                    let first = select(preset, &available, &capability(usable))
                        .map(|m| m.id.clone())
                        .ok();
                    let second = select(preset, &available, &capability(usable))
                        .map(|m| m.id.clone())
                        .ok();
                    assert_eq!(first, second);
                    if let Some(id) = first {
                        assert!(subset.contains(&id.as_str()));
                    }
                }
            }
        }
    }
}
