//! Operators used by pre/post-processing steps and their type and shape
//! inference.

use std::error::Error;
use std::fmt;

use smallvec::SmallVec;

use crate::color::ColorFormat;
use crate::element_type::ElementType;
use crate::graph::{Dimension, PartialShape, ValueInfo};
use crate::layout::is_valid_permutation;

/// Errors that occur when inferring the type or shape of an operator output.
#[derive(Clone, Debug, PartialEq)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this operator.
    IncorrectInputCount,

    /// The input shapes are incompatible.
    ///
    /// Operator execution will fail if given inputs with these shapes.
    IncompatibleShapes,

    /// An input's rank does not match that expected by the operator.
    IncorrectRank,

    /// An operator attribute has an invalid value.
    InvalidValue,

    /// The input element types are incompatible.
    IncompatibleTypes,
}

impl fmt::Display for InferShapesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncorrectInputCount => write!(f, "incorrect input count"),
            Self::IncompatibleShapes => write!(f, "incompatible input shapes"),
            Self::IncorrectRank => write!(f, "input has incorrect rank"),
            Self::InvalidValue => write!(f, "invalid attribute value"),
            Self::IncompatibleTypes => write!(f, "incompatible input types"),
        }
    }
}

impl Error for InferShapesError {}

/// Interpolation used by [`OpType::Interpolate`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "serde_traits",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum ResizeAlgorithm {
    #[default]
    Linear,
    Cubic,
    Nearest,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Abs,
    Neg,
    Relu,
}

/// Operator of an operator node in a [`Model`](crate::Model).
#[derive(Clone, Debug, PartialEq)]
pub enum OpType {
    /// Cast elements to another type.
    Convert { to: ElementType },

    /// Permute axes. Output axis `i` is input axis `perm[i]`.
    Transpose { perm: SmallVec<[usize; 5]> },

    /// Resize the spatial axes `axes` (height, width) to `sizes`.
    Interpolate {
        algorithm: ResizeAlgorithm,
        axes: [usize; 2],
        sizes: [Dimension; 2],
    },

    /// Elementwise binary operation with broadcasting.
    Binary(BinaryOp),

    Unary(UnaryOp),

    /// Reverse the order of elements along an axis.
    Reverse { axis: usize },

    /// Reconstruct an NHWC RGB or BGR image from YUV planes. Takes one input
    /// per plane of `format`.
    YuvToRgb { format: ColorFormat, bgr: bool },
}

impl OpType {
    /// Return the operator name, which is also used as the prefix for the
    /// names of new nodes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Convert { .. } => "Convert",
            Self::Transpose { .. } => "Transpose",
            Self::Interpolate { .. } => "Interpolate",
            Self::Binary(BinaryOp::Add) => "Add",
            Self::Binary(BinaryOp::Sub) => "Subtract",
            Self::Binary(BinaryOp::Mul) => "Multiply",
            Self::Binary(BinaryOp::Div) => "Divide",
            Self::Unary(UnaryOp::Abs) => "Abs",
            Self::Unary(UnaryOp::Neg) => "Negative",
            Self::Unary(UnaryOp::Relu) => "Relu",
            Self::Reverse { .. } => "Reverse",
            Self::YuvToRgb { bgr: false, .. } => "YuvToRgb",
            Self::YuvToRgb { bgr: true, .. } => "YuvToBgr",
        }
    }

    /// Infer the element type and shape of the output of this operator given
    /// its inputs.
    pub fn infer(&self, inputs: &[&ValueInfo]) -> Result<(ElementType, PartialShape), InferShapesError> {
        match self {
            Self::Convert { to } => {
                let [input] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                if to.is_dynamic() {
                    return Err(InferShapesError::InvalidValue);
                }
                Ok((*to, input.shape.clone()))
            }
            Self::Transpose { perm } => {
                let [input] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                if !is_valid_permutation(perm) {
                    return Err(InferShapesError::InvalidValue);
                }
                check_rank(&input.shape, perm.len())?;
                Ok((input.element_type, input.shape.permuted(perm)))
            }
            Self::Interpolate { axes, sizes, .. } => {
                let [input] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                if axes[0] == axes[1] {
                    return Err(InferShapesError::InvalidValue);
                }
                let mut shape = input.shape.clone();
                if let Some(rank) = shape.rank() {
                    if axes.iter().any(|&axis| axis >= rank) {
                        return Err(InferShapesError::IncorrectRank);
                    }
                    for (&axis, &size) in axes.iter().zip(sizes) {
                        shape.set_dim(axis, size);
                    }
                }
                Ok((input.element_type, shape))
            }
            Self::Binary(_) => {
                let [a, b] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                let element_type = merge_types(a.element_type, b.element_type)?;
                Ok((element_type, broadcast_shapes(&a.shape, &b.shape)?))
            }
            Self::Unary(_) => {
                let [input] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                Ok((input.element_type, input.shape.clone()))
            }
            Self::Reverse { axis } => {
                let [input] = inputs else {
                    return Err(InferShapesError::IncorrectInputCount);
                };
                if input.shape.rank().is_some_and(|rank| *axis >= rank) {
                    return Err(InferShapesError::IncorrectRank);
                }
                Ok((input.element_type, input.shape.clone()))
            }
            Self::YuvToRgb { format, .. } => infer_yuv_to_rgb(*format, inputs),
        }
    }
}

fn check_rank(shape: &PartialShape, expected: usize) -> Result<(), InferShapesError> {
    match shape.rank() {
        Some(rank) if rank != expected => Err(InferShapesError::IncorrectRank),
        _ => Ok(()),
    }
}

fn merge_types(a: ElementType, b: ElementType) -> Result<ElementType, InferShapesError> {
    match (a, b) {
        (ElementType::Dynamic, ty) | (ty, ElementType::Dynamic) => Ok(ty),
        (a, b) if a == b => Ok(a),
        _ => Err(InferShapesError::IncompatibleTypes),
    }
}

/// Broadcast two shapes together following numpy rules.
fn broadcast_shapes(a: &PartialShape, b: &PartialShape) -> Result<PartialShape, InferShapesError> {
    let (Some(a_dims), Some(b_dims)) = (a.dims(), b.dims()) else {
        return Ok(PartialShape::dynamic());
    };

    let a_pad = b_dims.len().saturating_sub(a_dims.len());
    let b_pad = a_dims.len().saturating_sub(b_dims.len());
    let one = Dimension::Fixed(1);

    let a_iter = std::iter::repeat_n(one, a_pad).chain(a_dims.iter().copied());
    let b_iter = std::iter::repeat_n(one, b_pad).chain(b_dims.iter().copied());

    let mut out_shape = Vec::with_capacity(a_pad + a_dims.len());
    for (a, b) in a_iter.zip(b_iter) {
        let dim = match (a, b) {
            (a, b) if a == b => a,

            // Size 1 is broadcast against the other size.
            (Dimension::Fixed(1), b) => b,
            (a, Dimension::Fixed(1)) => a,

            (Dimension::Fixed(_), Dimension::Fixed(_)) => {
                return Err(InferShapesError::IncompatibleShapes);
            }

            // A dynamic size can only match a fixed size other than 1 if
            // they are equal.
            (Dimension::Dynamic, fixed) | (fixed, Dimension::Dynamic) => fixed,
        };
        out_shape.push(dim);
    }

    Ok(PartialShape::new(out_shape))
}

/// Type and shape inference for YUV to RGB conversion. Inputs are NHWC planes.
fn infer_yuv_to_rgb(
    format: ColorFormat,
    inputs: &[&ValueInfo],
) -> Result<(ElementType, PartialShape), InferShapesError> {
    if !format.is_yuv() {
        return Err(InferShapesError::InvalidValue);
    }
    if inputs.len() != format.plane_count() {
        return Err(InferShapesError::IncorrectInputCount);
    }

    let element_type = inputs
        .iter()
        .try_fold(ElementType::Dynamic, |ty, input| merge_types(ty, input.element_type))?;

    let y = &inputs[0].shape;
    let Some(y_dims) = y.dims() else {
        return Ok((element_type, PartialShape::dynamic()));
    };
    let [n, h, w, c] = y_dims else {
        return Err(InferShapesError::IncorrectRank);
    };
    if !c.compatible(Dimension::Fixed(1)) {
        return Err(InferShapesError::IncompatibleShapes);
    }

    let height = match format.plane_count() {
        // Single plane images store the chroma samples below the luma samples.
        1 => match h {
            Dimension::Fixed(h) if h % 3 != 0 => return Err(InferShapesError::IncompatibleShapes),
            h => h.map(|h| h * 2 / 3),
        },
        _ => *h,
    };

    for (plane, expected_channels) in inputs[1..].iter().zip(match format {
        ColorFormat::Nv12TwoPlanes => &[2][..],
        _ => &[1, 1][..],
    }) {
        let Some(dims) = plane.shape.dims() else {
            continue;
        };
        let [pn, ph, pw, pc] = dims else {
            return Err(InferShapesError::IncorrectRank);
        };
        let compatible = pn.compatible(*n)
            && ph.compatible(height.map(|h| h / 2))
            && pw.compatible(w.map(|w| w / 2))
            && pc.compatible(Dimension::Fixed(*expected_channels));
        if !compatible {
            return Err(InferShapesError::IncompatibleShapes);
        }
    }

    Ok((
        element_type,
        PartialShape::new([*n, height, *w, Dimension::Fixed(3)]),
    ))
}

#[cfg(test)]
mod tests {
    use prepost_testing::TestCases;
    use smallvec::smallvec;

    use super::{BinaryOp, InferShapesError, OpType, ResizeAlgorithm, UnaryOp};
    use crate::color::ColorFormat;
    use crate::element_type::ElementType;
    use crate::graph::{Dimension, PartialShape, ValueInfo};
    use crate::shape;

    fn value(element_type: ElementType, shape: PartialShape) -> ValueInfo {
        ValueInfo::new(element_type, shape)
    }

    fn infer(
        op: OpType,
        inputs: &[ValueInfo],
    ) -> Result<(ElementType, PartialShape), InferShapesError> {
        let inputs: Vec<&ValueInfo> = inputs.iter().collect();
        op.infer(&inputs)
    }

    #[test]
    fn test_binary_broadcast() {
        #[derive(Debug)]
        struct Case {
            a: PartialShape,
            b: PartialShape,
            expected: Result<PartialShape, InferShapesError>,
        }

        let cases = [
            Case {
                a: shape![1, 3, 4, 4],
                b: shape![1, 3, 1, 1],
                expected: Ok(shape![1, 3, 4, 4]),
            },
            Case {
                a: shape![?, 3, ?, ?],
                b: shape![3, 1, 1],
                expected: Ok(shape![?, 3, ?, ?]),
            },
            Case {
                a: shape![?, 2],
                b: shape![5, ?],
                expected: Ok(shape![5, 2]),
            },
            Case {
                a: shape![1, 3],
                b: shape![1, 4],
                expected: Err(InferShapesError::IncompatibleShapes),
            },
            Case {
                a: PartialShape::dynamic(),
                b: shape![1],
                expected: Ok(PartialShape::dynamic()),
            },
        ];

        cases.test_each(|case| {
            let result = infer(
                OpType::Binary(BinaryOp::Sub),
                &[
                    value(ElementType::F32, case.a.clone()),
                    value(ElementType::F32, case.b.clone()),
                ],
            );
            assert_eq!(result.map(|(_, shape)| shape), case.expected);
        })
    }

    #[test]
    fn test_binary_types() {
        let result = infer(
            OpType::Binary(BinaryOp::Add),
            &[
                value(ElementType::F32, shape![1]),
                value(ElementType::F16, shape![1]),
            ],
        );
        assert_eq!(result, Err(InferShapesError::IncompatibleTypes));
    }

    #[test]
    fn test_convert_and_transpose() {
        let input = value(ElementType::U8, shape![1, 480, 640, 3]);

        let (ty, shape) = infer(
            OpType::Convert {
                to: ElementType::F32,
            },
            &[input.clone()],
        )
        .unwrap();
        assert_eq!(ty, ElementType::F32);
        assert_eq!(shape, shape![1, 480, 640, 3]);

        let (_, shape) = infer(
            OpType::Transpose {
                perm: smallvec![0, 3, 1, 2],
            },
            &[input.clone()],
        )
        .unwrap();
        assert_eq!(shape, shape![1, 3, 480, 640]);

        let result = infer(
            OpType::Transpose {
                perm: smallvec![0, 3, 2, 2],
            },
            &[input.clone()],
        );
        assert_eq!(result, Err(InferShapesError::InvalidValue));

        let result = infer(
            OpType::Convert {
                to: ElementType::Dynamic,
            },
            &[input],
        );
        assert_eq!(result, Err(InferShapesError::InvalidValue));
    }

    #[test]
    fn test_interpolate() {
        let op = OpType::Interpolate {
            algorithm: ResizeAlgorithm::Cubic,
            axes: [2, 3],
            sizes: [Dimension::Fixed(224), Dimension::Dynamic],
        };
        let (_, shape) = infer(op.clone(), &[value(ElementType::F32, shape![1, 3, 480, 640])]).unwrap();
        assert_eq!(shape, shape![1, 3, 224, ?]);

        let result = infer(op, &[value(ElementType::F32, shape![1, 3, 480])]);
        assert_eq!(result, Err(InferShapesError::IncorrectRank));
    }

    #[test]
    fn test_unary_and_reverse() {
        let input = value(ElementType::I32, shape![1, 3, 1, 1]);
        let (ty, shape) = infer(OpType::Unary(UnaryOp::Abs), &[input.clone()]).unwrap();
        assert_eq!(ty, ElementType::I32);
        assert_eq!(shape, shape![1, 3, 1, 1]);

        assert!(infer(OpType::Reverse { axis: 1 }, &[input.clone()]).is_ok());
        assert_eq!(
            infer(OpType::Reverse { axis: 4 }, &[input]),
            Err(InferShapesError::IncorrectRank)
        );
    }

    #[test]
    fn test_yuv_to_rgb() {
        #[derive(Debug)]
        struct Case {
            format: ColorFormat,
            planes: Vec<PartialShape>,
            expected: Result<PartialShape, InferShapesError>,
        }

        let cases = [
            Case {
                format: ColorFormat::Nv12TwoPlanes,
                planes: vec![shape![5, 2, 2, 1], shape![5, 1, 1, 2]],
                expected: Ok(shape![5, 2, 2, 3]),
            },
            Case {
                format: ColorFormat::I420ThreePlanes,
                planes: vec![
                    shape![5, 30, 20, 1],
                    shape![5, 15, 10, 1],
                    shape![5, 15, 10, 1],
                ],
                expected: Ok(shape![5, 30, 20, 3]),
            },
            Case {
                format: ColorFormat::Nv12SinglePlane,
                planes: vec![shape![?, 3, 2, 1]],
                expected: Ok(shape![?, 2, 2, 3]),
            },
            Case {
                format: ColorFormat::I420SinglePlane,
                planes: vec![shape![?, 6, 4, 1]],
                expected: Ok(shape![?, 4, 4, 3]),
            },
            Case {
                format: ColorFormat::Nv12TwoPlanes,
                planes: vec![shape![5, 2, 2, 1]],
                expected: Err(InferShapesError::IncorrectInputCount),
            },
            Case {
                format: ColorFormat::Nv12TwoPlanes,
                planes: vec![shape![5, 2, 2, 1], shape![5, 1, 1, 1]],
                expected: Err(InferShapesError::IncompatibleShapes),
            },
            Case {
                format: ColorFormat::Rgb,
                planes: vec![shape![5, 2, 2, 3]],
                expected: Err(InferShapesError::InvalidValue),
            },
        ];

        cases.test_each(|case| {
            let planes: Vec<_> = case
                .planes
                .iter()
                .map(|shape| value(ElementType::U8, shape.clone()))
                .collect();
            let result = infer(
                OpType::YuvToRgb {
                    format: case.format,
                    bgr: false,
                },
                &planes,
            );
            assert_eq!(result.map(|(_, shape)| shape), case.expected);
        })
    }
}
