//! Pure preview geometry: output-size negotiation and display orientation
//!
//! Nothing in here touches hardware; every function is deterministic and
//! tested directly with literal inputs.

pub mod orientation;
pub mod sizing;

pub use orientation::{
    aspect_for_orientation, dimensions_swapped, effective_rotation_degrees, view_transform,
    ViewTransform,
};
pub use sizing::choose_preview_size;

use crate::types::{CameraCharacteristics, DisplayRotation, Size};
use serde::{Deserialize, Serialize};

/// Everything the UI needs to present the sensor image upright
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewGeometry {
    /// Buffer size negotiated with the hardware
    pub preview_size: Size,
    /// Aspect ratio the view should adopt for the current display orientation
    pub view_aspect: Size,
    /// Clockwise rotation from sensor to display, in degrees
    pub sensor_rotation: u32,
    pub transform: ViewTransform,
}

impl PreviewGeometry {
    /// Negotiate a preview size for `view` and derive the display transform.
    ///
    /// Returns `None` only when the camera reports no output sizes at all.
    pub fn compute(
        characteristics: &CameraCharacteristics,
        view: Size,
        rotation: DisplayRotation,
        fixed_aspect: Size,
    ) -> Option<Self> {
        let target = if dimensions_swapped(characteristics.sensor_orientation, rotation) {
            view.swapped()
        } else {
            view
        };
        let preview_size = choose_preview_size(
            &characteristics.output_sizes,
            target.width,
            target.height,
            fixed_aspect,
        )?;
        Some(Self::for_preview(characteristics, view, rotation, preview_size))
    }

    /// Recompute orientation-dependent fields for an already negotiated size.
    pub fn for_preview(
        characteristics: &CameraCharacteristics,
        view: Size,
        rotation: DisplayRotation,
        preview_size: Size,
    ) -> Self {
        let (w, h) = aspect_for_orientation(
            preview_size.height,
            preview_size.width,
            view.is_landscape(),
        );
        Self {
            preview_size,
            view_aspect: Size::new(w, h),
            sensor_rotation: effective_rotation_degrees(
                characteristics.sensor_orientation,
                rotation.degrees(),
                characteristics.lens_facing,
            ),
            transform: view_transform(view, preview_size, rotation, characteristics.lens_facing),
        }
    }
}
