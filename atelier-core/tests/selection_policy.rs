//! End-to-end checks of the selection policy against an on-disk models
//! directory, the way the generator actually drives it.

use std::fs;
use std::path::Path;

use atelier_core::{
    available_models, select, AcceleratorKind, Error, QualityPreset, SystemCapability,
};
use tempfile::TempDir;

fn install(models_dir: &Path, ids: &[&str]) {
    for id in ids {
        fs::create_dir_all(models_dir.join(id)).unwrap();
    }
}

fn gpu(usable_gb: f64) -> SystemCapability {
    SystemCapability {
        kind: AcceleratorKind::GenericGpu,
        total_memory_gb: 64.0,
        usable_memory_gb: usable_gb,
    }
}

#[test]
fn full_install_resolves_every_preset_tier() {
    let dir = TempDir::new().unwrap();
    install(
        dir.path(),
        &["juggernaut-xl", "realvis-xl", "sdxl-lightning", "sd15"],
    );
    let available = available_models(dir.path());

    // (preset, usable GB) -> expected model
    let golden = [
        (QualityPreset::Commercial, 20.0, "realvis-xl"),
        (QualityPreset::Commercial, 16.0, "realvis-xl"),
        (QualityPreset::Commercial, 12.0, "sd15"),
        (QualityPreset::HighQuality, 12.0, "juggernaut-xl"),
        (QualityPreset::Standard, 8.0, "juggernaut-xl"),
        (QualityPreset::Standard, 7.9, "sd15"),
        (QualityPreset::Preview, 6.0, "sdxl-lightning"),
        (QualityPreset::Preview, 5.0, "sd15"),
        (QualityPreset::Preview, 0.0, "sd15"),
    ];
    for (preset, usable, expected) in golden {
        let chosen = select(preset, &available, &gpu(usable)).unwrap();
        assert_eq!(
            chosen.id, expected,
            "preset {preset} at {usable}GB should pick {expected}"
        );
    }
}

#[test]
fn scan_tracks_the_filesystem_not_the_manifest() {
    let dir = TempDir::new().unwrap();
    install(dir.path(), &["juggernaut-xl"]);
    let available = available_models(dir.path());
    assert_eq!(available.len(), 1);

    // The commercial tier degrades to its second choice when realvis-xl is
    // not installed, even with memory to spare.
    let chosen = select(QualityPreset::Commercial, &available, &gpu(24.0)).unwrap();
    assert_eq!(chosen.id, "juggernaut-xl");
}

#[test]
fn bare_host_fails_with_no_compatible_model() {
    let dir = TempDir::new().unwrap();
    let available = available_models(dir.path());
    let err = select(QualityPreset::Standard, &available, &gpu(32.0)).unwrap_err();
    match err {
        Error::NoCompatibleModel { preset, .. } => assert_eq!(preset, QualityPreset::Standard),
        other => panic!("expected NoCompatibleModel, got {other}"),
    }
}

#[test]
fn unified_memory_host_selects_like_its_usable_estimate() {
    let dir = TempDir::new().unwrap();
    install(dir.path(), &["juggernaut-xl", "realvis-xl", "sd15"]);
    let available = available_models(dir.path());

    // 32GB unified memory -> 19.2GB usable, which opens the commercial tier.
    let capability = SystemCapability {
        kind: AcceleratorKind::UnifiedMemory,
        total_memory_gb: 32.0,
        usable_memory_gb: 19.2,
    };
    let chosen = select(QualityPreset::Commercial, &available, &capability).unwrap();
    assert_eq!(chosen.id, "realvis-xl");

    // 16GB unified memory -> 9.6GB usable: commercial gate closed, sd15.
    let capability = SystemCapability {
        kind: AcceleratorKind::UnifiedMemory,
        total_memory_gb: 16.0,
        usable_memory_gb: 9.6,
    };
    let chosen = select(QualityPreset::Commercial, &available, &capability).unwrap();
    assert_eq!(chosen.id, "sd15");
}
