use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::color::ColorFormat;
use crate::element_type::ElementType;
use crate::graph::PartialShape;
use crate::ops::InferShapesError;

/// Whether a pre/post-processing reference points at a model input or output.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Port {
    Input,
    Output,
}

impl Display for Port {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Port::Input => write!(f, "input"),
            Port::Output => write!(f, "output"),
        }
    }
}

/// The category of a pre/post-processing error. See [`PrePostError::kind`].
#[derive(Copy, Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The builder was configured incorrectly, independent of the shapes and
    /// types in the model (eg. an unknown tensor name or bad layout string).
    Configuration,

    /// The configuration is valid but cannot be applied to this model (eg. a
    /// resize step on an input whose layout has no width axis).
    Compatibility,

    /// A user-supplied custom step failed.
    UserStep,
}

/// Errors reported by [`PrePostProcessor::build`](crate::PrePostProcessor::build)
/// and the layout parser.
///
/// When `build` returns an error the model has not been modified.
#[derive(Debug)]
#[non_exhaustive]
pub enum PrePostError {
    /// A reference without an index or name was used but the model does not
    /// have exactly one input/output.
    AmbiguousReference { port: Port, count: usize },

    /// No input/output has a tensor alias with this name.
    UnknownTensorName { port: Port, name: String },

    /// An input/output index is out of bounds.
    IndexOutOfRange { port: Port, index: usize, len: usize },

    /// Two configurations resolve to the same input/output.
    DuplicateReference { port: Port, index: usize },

    /// A layout string could not be parsed.
    InvalidLayoutSyntax { layout: String, reason: &'static str },

    /// Color plane names are invalid or collide with existing names.
    InvalidPlaneNaming(String),

    /// Both a full shape and a spatial shape were set on a tensor.
    ConflictingShape,

    /// An explicit layout permutation is not a permutation of `0..n`.
    InvalidPermutation(Vec<usize>),

    /// Named axes of two layouts cannot be matched against each other.
    AxisMismatch { tensor: String, model: String },

    /// A layout cannot be resolved against a value's rank.
    IncompatibleRank {
        layout: String,
        rank: Option<usize>,
    },

    /// A layout does not contain a required axis.
    AxisNotFound { layout: String, axis: String },

    /// Conversion between these color formats is not supported.
    UnsupportedColorConversion {
        from: ColorFormat,
        to: ColorFormat,
        reason: &'static str,
    },

    /// A step needs a layout with specific axes to locate the dimensions it
    /// operates on.
    LayoutRequired(&'static str),

    /// A per-channel vector length does not match the channels extent.
    DimensionMismatch { expected: usize, actual: usize },

    /// The channels axis of the declared layout is beyond the value rank.
    ChannelsAxisOutOfRange { axis: usize, rank: usize },

    /// A step cannot operate on values of this element type.
    TypeError {
        step: &'static str,
        element_type: ElementType,
    },

    /// The target type of an element type conversion cannot be determined.
    AmbiguousImplicitConvert(&'static str),

    /// The step cannot be applied while the input is split into color planes.
    UnsupportedForMultiPlane(&'static str),

    /// The element type after processing differs from what the model expects.
    TypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },

    /// The shape after processing is incompatible with what the model expects.
    ShapeMismatch {
        expected: PartialShape,
        actual: PartialShape,
    },

    /// Type/shape inference failed for a node added by a step.
    InferShapes {
        op: &'static str,
        error: InferShapesError,
    },

    /// A custom step returned an error.
    UserStep(Box<dyn Error + Send + Sync>),
}

impl PrePostError {
    /// Return the general category of error.
    pub fn kind(&self) -> ErrorKind {
        type Kind = ErrorKind;

        match self {
            Self::AmbiguousReference { .. }
            | Self::UnknownTensorName { .. }
            | Self::IndexOutOfRange { .. }
            | Self::DuplicateReference { .. }
            | Self::InvalidLayoutSyntax { .. }
            | Self::InvalidPlaneNaming(_)
            | Self::ConflictingShape
            | Self::InvalidPermutation(_) => Kind::Configuration,
            Self::AxisMismatch { .. }
            | Self::IncompatibleRank { .. }
            | Self::AxisNotFound { .. }
            | Self::UnsupportedColorConversion { .. }
            | Self::LayoutRequired(_)
            | Self::DimensionMismatch { .. }
            | Self::ChannelsAxisOutOfRange { .. }
            | Self::TypeError { .. }
            | Self::AmbiguousImplicitConvert(_)
            | Self::UnsupportedForMultiPlane(_)
            | Self::TypeMismatch { .. }
            | Self::ShapeMismatch { .. }
            | Self::InferShapes { .. } => Kind::Compatibility,
            Self::UserStep(_) => Kind::UserStep,
        }
    }
}

impl Display for PrePostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousReference { port, count } => write!(
                f,
                "{} must be specified by index or name, model has {} {}s",
                port, count, port
            ),
            Self::UnknownTensorName { port, name } => {
                write!(f, "no {} has a tensor named \"{}\"", port, name)
            }
            Self::IndexOutOfRange { port, index, len } => write!(
                f,
                "{} index {} is out of range, model has {} {}s",
                port, index, len, port
            ),
            Self::DuplicateReference { port, index } => {
                write!(f, "{} {} is configured more than once", port, index)
            }
            Self::InvalidLayoutSyntax { layout, reason } => {
                write!(f, "invalid layout \"{}\": {}", layout, reason)
            }
            Self::InvalidPlaneNaming(msg) => write!(f, "invalid plane names: {}", msg),
            Self::ConflictingShape => write!(
                f,
                "tensor shape and spatial shape cannot be set at the same time"
            ),
            Self::InvalidPermutation(perm) => write!(f, "invalid permutation {:?}", perm),
            Self::AxisMismatch { tensor, model } => write!(
                f,
                "axes of tensor layout \"{}\" do not match model layout \"{}\"",
                tensor, model
            ),
            Self::IncompatibleRank { layout, rank } => match rank {
                Some(rank) => write!(f, "layout \"{}\" is incompatible with rank {}", layout, rank),
                None => write!(f, "layout \"{}\" cannot be resolved for unknown rank", layout),
            },
            Self::AxisNotFound { layout, axis } => {
                write!(f, "layout \"{}\" has no \"{}\" axis", layout, axis)
            }
            Self::UnsupportedColorConversion { from, to, reason } => write!(
                f,
                "color conversion from {} to {} is not supported: {}",
                from, to, reason
            ),
            Self::LayoutRequired(msg) => write!(f, "layout required: {}", msg),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "expected {} values to match channels dimension, got {}",
                expected, actual
            ),
            Self::ChannelsAxisOutOfRange { axis, rank } => write!(
                f,
                "channels axis {} is out of range for rank {}",
                axis, rank
            ),
            Self::TypeError { step, element_type } => write!(
                f,
                "{} requires a floating point input, got {}",
                step, element_type
            ),
            Self::AmbiguousImplicitConvert(msg) => {
                write!(f, "cannot determine target element type: {}", msg)
            }
            Self::UnsupportedForMultiPlane(step) => write!(
                f,
                "{} is not supported for multi-plane color formats, convert color first",
                step
            ),
            Self::TypeMismatch { expected, actual } => write!(
                f,
                "element type after processing is {}, model expects {}",
                actual, expected
            ),
            Self::ShapeMismatch { expected, actual } => write!(
                f,
                "shape after processing is {}, model expects {}",
                actual, expected
            ),
            Self::InferShapes { op, error } => {
                write!(f, "shape inference for \"{}\" failed: {}", op, error)
            }
            Self::UserStep(err) => write!(f, "custom step failed: {}", err),
        }
    }
}

impl Error for PrePostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UserStep(err) => Some(err.as_ref()),
            Self::InferShapes { error, .. } => Some(error),
            _ => None,
        }
    }
}
