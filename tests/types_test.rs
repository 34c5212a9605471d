//! Tests for CrabPreview core types

use crabpreview::types::{
    AeMode, AfMode, CameraCharacteristics, CameraIdentity, CaptureRequest, DisplayRotation,
    LensFacing, RequestTemplate, Size, SurfaceId,
};
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod size_tests {
    use super::*;

    #[test]
    fn test_area_does_not_overflow() {
        let huge = Size::new(u32::MAX, u32::MAX);
        assert_eq!(huge.area(), u64::from(u32::MAX) * u64::from(u32::MAX));
    }

    #[test]
    fn test_aspect_comparison() {
        let aspect = Size::new(16, 9);
        assert!(Size::new(3840, 2160).same_aspect(&aspect));
        assert!(!Size::new(640, 480).same_aspect(&aspect));
        assert!(!Size::new(1080, 1920).same_aspect(&aspect));
        assert!(Size::new(1080, 1920).swapped().same_aspect(&aspect));
    }

    #[test]
    fn test_orientation_helpers() {
        assert!(Size::new(1920, 1080).is_landscape());
        assert!(!Size::new(1080, 1920).is_landscape());
        // Square counts as landscape
        assert!(Size::new(500, 500).is_landscape());
        assert!(Size::new(0, 10).is_empty());
        assert_eq!(Size::new(1920, 1080).to_string(), "1920x1080");
    }
}

#[cfg(test)]
mod rotation_tests {
    use super::*;

    #[test]
    fn test_degrees_round_trip() {
        for rotation in [
            DisplayRotation::Rotation0,
            DisplayRotation::Rotation90,
            DisplayRotation::Rotation180,
            DisplayRotation::Rotation270,
        ] {
            assert_eq!(
                DisplayRotation::from_degrees(rotation.degrees() as i32),
                Some(rotation)
            );
        }
    }

    #[test]
    fn test_quarter_turns() {
        assert!(DisplayRotation::Rotation90.is_quarter_turn());
        assert!(DisplayRotation::Rotation270.is_quarter_turn());
        assert!(!DisplayRotation::Rotation180.is_quarter_turn());
        assert_eq!(DisplayRotation::default(), DisplayRotation::Rotation0);
    }
}

#[cfg(test)]
mod request_tests {
    use super::*;

    #[test]
    fn test_preview_defaults() {
        let request = CaptureRequest::preview(vec![SurfaceId(1), SurfaceId(2)]);
        assert_eq!(request.template, RequestTemplate::Preview);
        assert_eq!(request.af_mode, AfMode::ContinuousPicture);
        assert_eq!(request.ae_mode, AeMode::On);
        assert_eq!(request.targets.len(), 2);
    }

    #[test]
    fn test_builders_replace_modes() {
        let request = CaptureRequest::preview(vec![SurfaceId(1)])
            .with_af_mode(AfMode::Off)
            .with_ae_mode(AeMode::OnAlwaysFlash);
        assert_eq!(request.af_mode, AfMode::Off);
        assert_eq!(request.ae_mode, AeMode::OnAlwaysFlash);
    }
}

#[cfg(test)]
mod serialization_tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        camera: CameraIdentity,
        characteristics: CameraCharacteristics,
        af_mode: AfMode,
        ae_mode: AeMode,
    }

    #[test]
    fn test_toml_uses_snake_case_names() {
        let snapshot = Snapshot {
            camera: CameraIdentity::new("0"),
            characteristics: CameraCharacteristics {
                output_sizes: vec![Size::new(1920, 1080)],
                sensor_orientation: 90,
                lens_facing: LensFacing::Back,
                flash_available: true,
            },
            af_mode: AfMode::ContinuousPicture,
            ae_mode: AeMode::OnAutoFlash,
        };

        let text = toml::to_string(&snapshot).unwrap();
        assert!(text.contains("af_mode = \"continuous_picture\""));
        assert!(text.contains("ae_mode = \"on_auto_flash\""));
        assert!(text.contains("lens_facing = \"back\""));

        let parsed: Snapshot = toml::from_str(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
