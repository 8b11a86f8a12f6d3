use serde::{Deserialize, Serialize};

/// Named speed/quality tradeoff selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Preview,
    Standard,
    HighQuality,
    Commercial,
}

serde_plain::derive_display_from_serialize!(QualityPreset);
serde_plain::derive_fromstr_from_deserialize!(QualityPreset);

/// Generation parameters bundled under a preset. Echoed back to the caller
/// in the result metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetParams {
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub num_images_per_prompt: usize,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Preview,
        QualityPreset::Standard,
        QualityPreset::HighQuality,
        QualityPreset::Commercial,
    ];

    pub fn params(self) -> PresetParams {
        match self {
            QualityPreset::Preview => PresetParams {
                num_inference_steps: 15,
                guidance_scale: 7.0,
                width: 768,
                height: 1024,
                num_images_per_prompt: 1,
            },
            QualityPreset::Standard => PresetParams {
                num_inference_steps: 25,
                guidance_scale: 7.5,
                width: 1024,
                height: 1024,
                num_images_per_prompt: 1,
            },
            QualityPreset::HighQuality => PresetParams {
                num_inference_steps: 30,
                guidance_scale: 8.0,
                width: 1024,
                height: 1344,
                num_images_per_prompt: 1,
            },
            QualityPreset::Commercial => PresetParams {
                num_inference_steps: 40,
                guidance_scale: 8.5,
                width: 1024,
                height: 1536,
                num_images_per_prompt: 1,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_names_round_trip() {
        for preset in QualityPreset::ALL {
            let parsed: QualityPreset = preset.to_string().parse().unwrap();
            assert_eq!(parsed, preset);
        }
        assert_eq!(
            "high_quality".parse::<QualityPreset>().unwrap(),
            QualityPreset::HighQuality
        );
        assert!("ultra".parse::<QualityPreset>().is_err());
    }

    #[test]
    fn preset_tables_match_documented_bundles() {
        let preview = QualityPreset::Preview.params();
        assert_eq!(preview.num_inference_steps, 15);
        assert_eq!((preview.width, preview.height), (768, 1024));

        let commercial = QualityPreset::Commercial.params();
        assert_eq!(commercial.num_inference_steps, 40);
        assert_eq!(commercial.guidance_scale, 8.5);
        assert_eq!((commercial.width, commercial.height), (1024, 1536));

        // Every preset resolution must be valid for the latent space.
        for preset in QualityPreset::ALL {
            let p = preset.params();
            assert_eq!(p.width % 8, 0);
            assert_eq!(p.height % 8, 0);
            assert_eq!(p.num_images_per_prompt, 1);
        }
    }
}
