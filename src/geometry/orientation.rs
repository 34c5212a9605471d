use crate::types::{DisplayRotation, LensFacing, Size};
use serde::{Deserialize, Serialize};

/// Extra rotation applied to front-facing modules, which are mounted
/// mirrored relative to back-facing ones.
const FRONT_FACING_OFFSET: i64 = 180;

/// Clockwise rotation, in degrees, that turns a sensor buffer upright on the
/// current display. Always one of 0, 90, 180 or 270 for right-angle inputs.
pub fn effective_rotation_degrees(
    sensor_orientation: u32,
    display_rotation_degrees: u32,
    lens_facing: LensFacing,
) -> u32 {
    let facing_offset = match lens_facing {
        LensFacing::Front => FRONT_FACING_OFFSET,
        LensFacing::Back | LensFacing::External => 0,
    };
    let degrees = 360 + i64::from(sensor_orientation) - i64::from(display_rotation_degrees)
        + facing_offset;
    degrees.rem_euclid(360) as u32
}

/// The sensor reports its size independent of device rotation, so a
/// landscape display exchanges width and height.
pub fn aspect_for_orientation(width: u32, height: u32, display_is_landscape: bool) -> (u32, u32) {
    if display_is_landscape {
        (height, width)
    } else {
        (width, height)
    }
}

/// Whether the sensor is mounted perpendicular to the current display, in
/// which case the view's dimensions must be exchanged before negotiating a
/// preview size.
pub fn dimensions_swapped(sensor_orientation: u32, rotation: DisplayRotation) -> bool {
    (i64::from(sensor_orientation) - i64::from(rotation.degrees())).rem_euclid(180) != 0
}

/// Rotation and scale mapping preview buffer coordinates onto the view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub rotation_degrees: u32,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Front cameras are shown mirrored, like a looking glass
    pub mirror_horizontal: bool,
}

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform {
        rotation_degrees: 0,
        scale_x: 1.0,
        scale_y: 1.0,
        mirror_horizontal: false,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// Compute the view transform for a `preview` sized buffer shown in `view`.
///
/// Quarter turns rotate the buffer back by the display rotation and scale it
/// to fill the view; a half turn only rotates.
pub fn view_transform(
    view: Size,
    preview: Size,
    rotation: DisplayRotation,
    lens_facing: LensFacing,
) -> ViewTransform {
    let mirror_horizontal = lens_facing == LensFacing::Front;

    if view.is_empty() || preview.is_empty() {
        return ViewTransform {
            mirror_horizontal,
            ..ViewTransform::IDENTITY
        };
    }

    match rotation {
        DisplayRotation::Rotation90 | DisplayRotation::Rotation270 => {
            let (vw, vh) = (view.width as f32, view.height as f32);
            let (pw, ph) = (preview.width as f32, preview.height as f32);
            let fill = (vh / ph).max(vw / pw);
            ViewTransform {
                rotation_degrees: (360 - rotation.degrees()) % 360,
                scale_x: ph / vw * fill,
                scale_y: pw / vh * fill,
                mirror_horizontal,
            }
        }
        DisplayRotation::Rotation180 => ViewTransform {
            rotation_degrees: 180,
            mirror_horizontal,
            ..ViewTransform::IDENTITY
        },
        DisplayRotation::Rotation0 => ViewTransform {
            mirror_horizontal,
            ..ViewTransform::IDENTITY
        },
    }
}
