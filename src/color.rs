//! Color formats and the math for reconstructing RGB images from YUV planes.

use std::fmt;

use smallvec::SmallVec;

use crate::error::PrePostError;
use crate::graph::{Dimension, PartialShape};
use crate::layout::Layout;

/// Color format of an image tensor.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(
    feature = "serde_traits",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ColorFormat {
    #[default]
    Undefined,
    Rgb,
    Bgr,
    /// NV12 image in a single tensor of shape `[N, H * 3 / 2, W, 1]`, with
    /// the Y plane followed by interleaved UV samples.
    Nv12SinglePlane,
    /// NV12 image with a `[N, H, W, 1]` Y plane and a `[N, H / 2, W / 2, 2]`
    /// interleaved UV plane.
    Nv12TwoPlanes,
    /// I420 image in a single tensor of shape `[N, H * 3 / 2, W, 1]`, with
    /// the Y plane followed by the U and V planes.
    I420SinglePlane,
    /// I420 image with a `[N, H, W, 1]` Y plane and `[N, H / 2, W / 2, 1]` U
    /// and V planes.
    I420ThreePlanes,
}

impl ColorFormat {
    /// Return the number of tensors an image in this format is split into.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Nv12TwoPlanes => 2,
            Self::I420ThreePlanes => 3,
            _ => 1,
        }
    }

    /// Return the default names of each plane of a multi-plane format, or
    /// an empty slice for single-plane formats.
    pub fn plane_labels(self) -> &'static [&'static str] {
        match self {
            Self::Nv12TwoPlanes => &["Y", "UV"],
            Self::I420ThreePlanes => &["Y", "U", "V"],
            _ => &[],
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::Nv12SinglePlane | Self::Nv12TwoPlanes | Self::I420SinglePlane | Self::I420ThreePlanes
        )
    }

    /// Return true for RGB and BGR formats.
    pub fn is_rgb(self) -> bool {
        matches!(self, Self::Rgb | Self::Bgr)
    }

    /// Return the number of channels of images in this format, if it has a
    /// channel axis of fixed size.
    pub fn channels(self) -> Option<usize> {
        self.is_rgb().then_some(3)
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "UNDEFINED",
            Self::Rgb => "RGB",
            Self::Bgr => "BGR",
            Self::Nv12SinglePlane => "NV12_SINGLE_PLANE",
            Self::Nv12TwoPlanes => "NV12_TWO_PLANES",
            Self::I420SinglePlane => "I420_SINGLE_PLANE",
            Self::I420ThreePlanes => "I420_THREE_PLANES",
        };
        write!(f, "{}", name)
    }
}

/// Check that images can be converted from color format `from` to `to`.
pub fn check_conversion(from: ColorFormat, to: ColorFormat) -> Result<(), PrePostError> {
    let unsupported = |reason| PrePostError::UnsupportedColorConversion { from, to, reason };

    if from == ColorFormat::Undefined || to == ColorFormat::Undefined {
        return Err(unsupported("color format is undefined"));
    }
    if to.is_yuv() {
        return Err(unsupported("conversion to YUV formats is not supported"));
    }
    Ok(())
}

/// Resolve the names of the planes of an image in a given format.
///
/// `sub_names` are caller-provided names, which replace the default
/// [`plane_labels`](ColorFormat::plane_labels). They can only be given for
/// multi-plane formats, and there must be exactly one per plane.
pub fn plane_names(
    format: ColorFormat,
    sub_names: &[String],
) -> Result<SmallVec<[String; 3]>, PrePostError> {
    if format.plane_count() == 1 {
        if !sub_names.is_empty() {
            return Err(PrePostError::InvalidPlaneNaming(format!(
                "{} is a single-plane format but {} plane names were given",
                format,
                sub_names.len()
            )));
        }
        return Ok(SmallVec::new());
    }

    if sub_names.is_empty() {
        return Ok(format.plane_labels().iter().map(|s| s.to_string()).collect());
    }
    if sub_names.len() != format.plane_count() {
        return Err(PrePostError::InvalidPlaneNaming(format!(
            "{} has {} planes but {} names were given",
            format,
            format.plane_count(),
            sub_names.len()
        )));
    }
    for (i, name) in sub_names.iter().enumerate() {
        if name.is_empty() {
            return Err(PrePostError::InvalidPlaneNaming("plane name is empty".into()));
        }
        if sub_names[i + 1..].contains(name) {
            return Err(PrePostError::InvalidPlaneNaming(format!(
                "plane name \"{}\" is used more than once",
                name
            )));
        }
    }
    Ok(sub_names.iter().cloned().collect())
}

/// Compute the shapes of the tensors that carry an image in `format`.
///
/// `image` is the shape of the reconstructed 3-channel image and `layout`
/// locates its height, width and channel axes. Dynamic heights and widths
/// stay dynamic. The result has one entry per plane, or just `image` for
/// formats that are not YUV.
pub fn plane_shapes(
    image: &PartialShape,
    layout: &Layout,
    format: ColorFormat,
) -> Result<SmallVec<[PartialShape; 3]>, PrePostError> {
    if !format.is_yuv() {
        return Ok([image.clone()].into_iter().collect());
    }
    let Some(rank) = image.rank() else {
        return Ok(std::iter::repeat_n(PartialShape::dynamic(), format.plane_count()).collect());
    };

    let h = layout.height_idx(Some(rank))?;
    let w = layout.width_idx(Some(rank))?;
    let c = layout.channels_idx(Some(rank))?;

    let plane = |height: Dimension, width: Dimension, channels: usize| {
        let mut shape = image.clone();
        shape.set_dim(h, height);
        shape.set_dim(w, width);
        shape.set_dim(c, Dimension::Fixed(channels));
        shape
    };

    let height = image.dim(h);
    let width = image.dim(w);
    let half_height = height.map(|h| h / 2);
    let half_width = width.map(|w| w / 2);

    let shapes = match format {
        ColorFormat::Nv12SinglePlane | ColorFormat::I420SinglePlane => {
            [plane(height.map(|h| h * 3 / 2), width, 1)].into_iter().collect()
        }
        ColorFormat::Nv12TwoPlanes => [
            plane(height, width, 1),
            plane(half_height, half_width, 2),
        ]
        .into_iter()
        .collect(),
        ColorFormat::I420ThreePlanes => [
            plane(height, width, 1),
            plane(half_height, half_width, 1),
            plane(half_height, half_width, 1),
        ]
        .into_iter()
        .collect(),
        ColorFormat::Undefined | ColorFormat::Rgb | ColorFormat::Bgr => unreachable!(),
    };
    Ok(shapes)
}

/// Convert a single YUV sample to RGB using the BT.601 "video range"
/// coefficients.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.;
    let d = u as f32 - 128.;
    let e = v as f32 - 128.;

    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.391 * d - 0.813 * e;
    let b = 1.164 * c + 2.018 * d;

    [r, g, b].map(|x| x.round().clamp(0., 255.) as u8)
}
