use serde::{Deserialize, Serialize};
use std::fmt;

/// Width/height pair in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, widened so 4K+ sensors never overflow
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Exact aspect-ratio comparison by cross multiplication
    pub fn same_aspect(&self, other: &Size) -> bool {
        u64::from(self.width) * u64::from(other.height)
            == u64::from(self.height) * u64::from(other.width)
    }

    pub fn swapped(&self) -> Size {
        Size::new(self.height, self.width)
    }

    pub fn is_landscape(&self) -> bool {
        self.width >= self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which way a camera module points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    /// Toward the user
    Front,
    /// Away from the user
    Back,
    /// Externally attached (USB and similar)
    External,
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensFacing::Front => write!(f, "front"),
            LensFacing::Back => write!(f, "back"),
            LensFacing::External => write!(f, "external"),
        }
    }
}

/// Rotation of the device screen relative to its natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    pub fn degrees(&self) -> u32 {
        match self {
            DisplayRotation::Rotation0 => 0,
            DisplayRotation::Rotation90 => 90,
            DisplayRotation::Rotation180 => 180,
            DisplayRotation::Rotation270 => 270,
        }
    }

    /// Accepts any multiple of 90, including negative and > 360 values
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        if degrees % 90 != 0 {
            return None;
        }
        match degrees.rem_euclid(360) {
            0 => Some(DisplayRotation::Rotation0),
            90 => Some(DisplayRotation::Rotation90),
            180 => Some(DisplayRotation::Rotation180),
            _ => Some(DisplayRotation::Rotation270),
        }
    }

    /// 90 and 270 put a naturally-portrait device into landscape
    pub fn is_quarter_turn(&self) -> bool {
        matches!(self, DisplayRotation::Rotation90 | DisplayRotation::Rotation270)
    }
}

/// Opaque handle naming one physical camera
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraIdentity {
    pub id: String,
}

impl CameraIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Static capabilities reported by the hardware for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCharacteristics {
    /// Candidate preview output sizes, in hardware-reported order
    pub output_sizes: Vec<Size>,
    /// Sensor mounting angle in degrees, clockwise from natural orientation
    pub sensor_orientation: u32,
    pub lens_facing: LensFacing,
    pub flash_available: bool,
}

/// The identity and characteristics picked for one acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCamera {
    pub identity: CameraIdentity,
    pub characteristics: CameraCharacteristics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// A render target handed to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Surface {
    pub id: SurfaceId,
    /// Buffer size the surface was configured with
    pub size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfMode {
    Off,
    Auto,
    ContinuousPicture,
    ContinuousVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AeMode {
    Off,
    On,
    OnAutoFlash,
    OnAlwaysFlash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
}

/// A capture request bound to a set of configured surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<SurfaceId>,
    pub af_mode: AfMode,
    pub ae_mode: AeMode,
}

impl CaptureRequest {
    pub fn preview(targets: Vec<SurfaceId>) -> Self {
        Self {
            template: RequestTemplate::Preview,
            targets,
            af_mode: AfMode::ContinuousPicture,
            ae_mode: AeMode::On,
        }
    }

    pub fn with_af_mode(mut self, af_mode: AfMode) -> Self {
        self.af_mode = af_mode;
        self
    }

    pub fn with_ae_mode(mut self, ae_mode: AeMode) -> Self {
        self.ae_mode = ae_mode;
        self
    }
}
