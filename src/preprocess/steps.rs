use std::error::Error;

use smallvec::{smallvec, SmallVec};

use super::tensor_info::IntoLayout;
use crate::color::{check_conversion, ColorFormat};
use crate::element_type::ElementType;
use crate::error::PrePostError;
use crate::graph::{ConstantData, Dimension, GraphEdit, NodeId, PartialShape};
use crate::layout::{axis, find_permutation, is_valid_permutation, Layout};
use crate::ops::{BinaryOp, OpType, ResizeAlgorithm};

/// A user-provided processing step.
///
/// The function receives the edit which stages new nodes and the ID of the
/// value produced by the previous step. It returns the ID of the value that
/// subsequent steps should consume.
pub type CustomStep<'a> = Box<
    dyn FnOnce(&mut GraphEdit<'_>, NodeId) -> Result<NodeId, Box<dyn Error + Send + Sync>> + 'a,
>;

/// Target of a layout conversion step.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LayoutTarget {
    /// Convert to the layout on the other side of the pipeline.
    Implicit,
    Layout(Layout),
    Permutation(SmallVec<[usize; 5]>),
}

pub(crate) enum PreStep<'a> {
    ConvertType(Option<ElementType>),
    ConvertLayout(LayoutTarget),
    ConvertColor(ColorFormat),
    Resize {
        algorithm: ResizeAlgorithm,
        size: Option<[usize; 2]>,
    },
    Mean(Vec<f32>),
    Scale(Vec<f32>),
    ReverseChannels,
    Custom(CustomStep<'a>),
}

impl PreStep<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConvertType(_) => "convert_element_type",
            Self::ConvertLayout(_) => "convert_layout",
            Self::ConvertColor(_) => "convert_color",
            Self::Resize { .. } => "resize",
            Self::Mean(_) => "mean",
            Self::Scale(_) => "scale",
            Self::ReverseChannels => "reverse_channels",
            Self::Custom(_) => "custom",
        }
    }
}

pub(crate) enum PostStep<'a> {
    ConvertType(Option<ElementType>),
    ConvertLayout(LayoutTarget),
    Custom(CustomStep<'a>),
}

/// Preprocessing steps of a model input, applied in the order they are
/// added.
#[derive(Default)]
pub struct PreProcessSteps<'a> {
    pub(crate) steps: Vec<PreStep<'a>>,
    pub(crate) deferred_error: Option<PrePostError>,
}

impl<'a> PreProcessSteps<'a> {
    fn push(&mut self, step: PreStep<'a>) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Convert elements to type `ty`.
    pub fn convert_element_type(&mut self, ty: ElementType) -> &mut Self {
        self.push(PreStep::ConvertType(Some(ty)))
    }

    /// Convert elements to the element type of the model input.
    pub fn convert_element_type_default(&mut self) -> &mut Self {
        self.push(PreStep::ConvertType(None))
    }

    /// Transpose the value to the layout of the model input.
    pub fn convert_layout(&mut self) -> &mut Self {
        self.push(PreStep::ConvertLayout(LayoutTarget::Implicit))
    }

    /// Transpose the value from its current layout to `layout`.
    pub fn convert_layout_to<L: IntoLayout>(&mut self, layout: L) -> &mut Self {
        match layout.into_layout() {
            Ok(layout) => self.push(PreStep::ConvertLayout(LayoutTarget::Layout(layout))),
            Err(err) => {
                self.deferred_error.get_or_insert(err);
                self
            }
        }
    }

    /// Transpose the value such that output axis `i` is input axis `dims[i]`.
    pub fn convert_layout_dims(&mut self, dims: &[usize]) -> &mut Self {
        self.push(PreStep::ConvertLayout(LayoutTarget::Permutation(
            dims.into(),
        )))
    }

    pub fn convert_color(&mut self, format: ColorFormat) -> &mut Self {
        self.push(PreStep::ConvertColor(format))
    }

    /// Subtract `value` from every element.
    pub fn mean(&mut self, value: f32) -> &mut Self {
        self.push(PreStep::Mean(vec![value]))
    }

    /// Subtract `values[c]` from every element in channel `c`.
    pub fn mean_per_channel(&mut self, values: &[f32]) -> &mut Self {
        self.push(PreStep::Mean(values.to_vec()))
    }

    /// Divide every element by `value`.
    pub fn scale(&mut self, value: f32) -> &mut Self {
        self.push(PreStep::Scale(vec![value]))
    }

    pub fn scale_per_channel(&mut self, values: &[f32]) -> &mut Self {
        self.push(PreStep::Scale(values.to_vec()))
    }

    /// Resize the spatial axes to the height and width of the model input.
    pub fn resize(&mut self, algorithm: ResizeAlgorithm) -> &mut Self {
        self.push(PreStep::Resize {
            algorithm,
            size: None,
        })
    }

    /// Resize the spatial axes to a fixed size.
    pub fn resize_to(&mut self, algorithm: ResizeAlgorithm, height: usize, width: usize) -> &mut Self {
        self.push(PreStep::Resize {
            algorithm,
            size: Some([height, width]),
        })
    }

    /// Reverse the order of channels, eg. to convert RGB to BGR.
    pub fn reverse_channels(&mut self) -> &mut Self {
        self.push(PreStep::ReverseChannels)
    }

    pub fn custom<F>(&mut self, step: F) -> &mut Self
    where
        F: FnOnce(&mut GraphEdit<'_>, NodeId) -> Result<NodeId, Box<dyn Error + Send + Sync>> + 'a,
    {
        self.push(PreStep::Custom(Box::new(step)))
    }
}

/// Postprocessing steps of a model output, applied in the order they are
/// added.
#[derive(Default)]
pub struct PostProcessSteps<'a> {
    pub(crate) steps: Vec<PostStep<'a>>,
    pub(crate) deferred_error: Option<PrePostError>,
}

impl<'a> PostProcessSteps<'a> {
    fn push(&mut self, step: PostStep<'a>) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn convert_element_type(&mut self, ty: ElementType) -> &mut Self {
        self.push(PostStep::ConvertType(Some(ty)))
    }

    /// Convert elements to the element type set on the output tensor.
    pub fn convert_element_type_default(&mut self) -> &mut Self {
        self.push(PostStep::ConvertType(None))
    }

    /// Transpose the value to the layout set on the output tensor.
    pub fn convert_layout(&mut self) -> &mut Self {
        self.push(PostStep::ConvertLayout(LayoutTarget::Implicit))
    }

    pub fn convert_layout_to<L: IntoLayout>(&mut self, layout: L) -> &mut Self {
        match layout.into_layout() {
            Ok(layout) => self.push(PostStep::ConvertLayout(LayoutTarget::Layout(layout))),
            Err(err) => {
                self.deferred_error.get_or_insert(err);
                self
            }
        }
    }

    pub fn convert_layout_dims(&mut self, dims: &[usize]) -> &mut Self {
        self.push(PostStep::ConvertLayout(LayoutTarget::Permutation(
            dims.into(),
        )))
    }

    pub fn custom<F>(&mut self, step: F) -> &mut Self
    where
        F: FnOnce(&mut GraphEdit<'_>, NodeId) -> Result<NodeId, Box<dyn Error + Send + Sync>> + 'a,
    {
        self.push(PostStep::Custom(Box::new(step)))
    }
}

/// Result of planning a layout conversion.
#[derive(Debug, PartialEq)]
pub(crate) struct LayoutChange {
    /// Transpose permutation, or `None` if no transpose is needed.
    pub perm: Option<SmallVec<[usize; 5]>>,

    /// Layout after the conversion.
    pub layout: Option<Layout>,
}

/// Work out the transpose that converts a value of rank `rank` with layout
/// `current` as requested by `target`.
///
/// `implicit` is the layout that [`LayoutTarget::Implicit`] converts to.
pub(crate) fn plan_layout_change(
    target: &LayoutTarget,
    current: Option<&Layout>,
    implicit: Option<&Layout>,
    rank: Option<usize>,
) -> Result<LayoutChange, PrePostError> {
    let to_layout = |dst: &Layout| {
        let current = current.ok_or(PrePostError::LayoutRequired("convert_layout"))?;
        let perm = find_permutation(current, dst, rank)?;
        Ok(LayoutChange {
            perm: perm.map(SmallVec::from_vec),
            layout: Some(dst.clone()),
        })
    };

    match target {
        LayoutTarget::Implicit => {
            let dst = implicit.ok_or(PrePostError::LayoutRequired("convert_layout"))?;
            to_layout(dst)
        }
        LayoutTarget::Layout(dst) if dst.is_empty() => Ok(LayoutChange {
            perm: None,
            layout: current.cloned(),
        }),
        LayoutTarget::Layout(dst) => to_layout(dst),
        LayoutTarget::Permutation(perm) if perm.is_empty() => Ok(LayoutChange {
            perm: None,
            layout: current.cloned(),
        }),
        LayoutTarget::Permutation(perm) => {
            if !is_valid_permutation(perm) {
                return Err(PrePostError::InvalidPermutation(perm.to_vec()));
            }
            if rank.is_some_and(|rank| rank != perm.len()) {
                return Err(PrePostError::IncompatibleRank {
                    layout: current.map(|l| l.to_string()).unwrap_or_default(),
                    rank,
                });
            }
            let layout = current.map(|l| l.permuted(perm)).transpose()?;
            let is_identity = perm.iter().enumerate().all(|(i, &p)| i == p);
            Ok(LayoutChange {
                perm: (!is_identity).then(|| perm.clone()),
                layout,
            })
        }
    }
}

/// Return the index of the channels axis of a value with a given layout and
/// rank.
pub(crate) fn channels_axis(
    layout: Option<&Layout>,
    rank: Option<usize>,
    step: &'static str,
) -> Result<usize, PrePostError> {
    let layout = layout
        .filter(|l| l.has_axis(axis::CHANNELS))
        .ok_or(PrePostError::LayoutRequired(step))?;

    match layout.channels_idx(None) {
        Ok(axis) => match rank {
            Some(rank) if axis >= rank => Err(PrePostError::ChannelsAxisOutOfRange { axis, rank }),
            _ => Ok(axis),
        },
        // Axes after an ellipsis can only be located given the rank.
        Err(_) => layout.channels_idx(rank),
    }
}

/// State of the value flowing through a pipeline of steps.
pub(crate) struct Pipeline<'e, 'm> {
    edit: &'e mut GraphEdit<'m>,

    /// Nodes producing the current value. There is one node per color plane
    /// until planes are merged by a color conversion.
    pub nodes: SmallVec<[NodeId; 3]>,
    pub layout: Option<Layout>,
    pub color: ColorFormat,
}

impl<'e, 'm> Pipeline<'e, 'm> {
    pub fn new(
        edit: &'e mut GraphEdit<'m>,
        nodes: SmallVec<[NodeId; 3]>,
        layout: Option<Layout>,
        color: ColorFormat,
    ) -> Self {
        Pipeline {
            edit,
            nodes,
            layout,
            color,
        }
    }

    /// Return the node producing the current value.
    pub fn output(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn element_type(&self) -> ElementType {
        self.edit
            .value(self.output())
            .map(|v| v.element_type)
            .unwrap_or_default()
    }

    pub fn shape(&self) -> PartialShape {
        self.edit
            .value(self.output())
            .map(|v| v.shape.clone())
            .unwrap_or_default()
    }

    fn add_op(&mut self, op: OpType, inputs: &[NodeId]) -> Result<NodeId, PrePostError> {
        let name = op.name();
        self.edit
            .add_op(op, inputs)
            .map_err(|error| PrePostError::InferShapes { op: name, error })
    }

    /// Add an operator that takes the current value as its only input.
    fn apply_unary(&mut self, op: OpType) -> Result<(), PrePostError> {
        let input = self.output();
        let output = self.add_op(op, &[input])?;
        self.nodes = smallvec![output];
        Ok(())
    }

    /// Convert the elements of every plane to `target`.
    pub fn convert_type(&mut self, target: ElementType) -> Result<(), PrePostError> {
        if target.is_dynamic() {
            return Err(PrePostError::AmbiguousImplicitConvert("convert_element_type"));
        }
        for i in 0..self.nodes.len() {
            let node = self.nodes[i];
            let current = self.edit.value(node).map(|v| v.element_type);
            if current == Some(target) {
                tracing::debug!(%target, "skipping no-op element type conversion");
                continue;
            }
            self.nodes[i] = self.add_op(OpType::Convert { to: target }, &[node])?;
        }
        Ok(())
    }

    pub fn convert_layout(
        &mut self,
        target: &LayoutTarget,
        implicit: Option<&Layout>,
    ) -> Result<(), PrePostError> {
        let rank = self.shape().rank();
        let change = plan_layout_change(target, self.layout.as_ref(), implicit, rank)?;
        match change.perm {
            Some(perm) => self.apply_unary(OpType::Transpose { perm })?,
            None => tracing::debug!(?target, "skipping identity layout conversion"),
        }
        self.layout = change.layout;
        Ok(())
    }

    pub fn convert_color(&mut self, target: ColorFormat) -> Result<(), PrePostError> {
        let from = self.color;
        check_conversion(from, target)?;
        if from == target {
            tracing::debug!(%target, "skipping no-op color conversion");
            return Ok(());
        }

        if from.is_yuv() {
            let nhwc = Layout::parse("NHWC")?;
            if self.layout.as_ref() != Some(&nhwc) {
                return Err(PrePostError::UnsupportedColorConversion {
                    from,
                    to: target,
                    reason: "YUV planes must have NHWC layout",
                });
            }
            let planes = self.nodes.clone();
            let rgb = self.add_op(
                OpType::YuvToRgb {
                    format: from,
                    bgr: target == ColorFormat::Bgr,
                },
                &planes,
            )?;
            self.nodes = smallvec![rgb];
        } else {
            // RGB and BGR differ only in channel order.
            self.reverse_channels("convert_color")?;
        }

        self.color = target;
        Ok(())
    }

    pub fn reverse_channels(&mut self, step: &'static str) -> Result<(), PrePostError> {
        let axis = channels_axis(self.layout.as_ref(), self.shape().rank(), step)?;
        self.apply_unary(OpType::Reverse { axis })
    }

    /// Subtract (mean) or divide by (scale) a scalar or per-channel vector.
    pub fn normalize(
        &mut self,
        op: BinaryOp,
        step: &'static str,
        values: &[f32],
    ) -> Result<(), PrePostError> {
        let element_type = self.element_type();
        if !element_type.is_float() && !element_type.is_dynamic() {
            return Err(PrePostError::TypeError { step, element_type });
        }
        let const_type = if element_type.is_dynamic() {
            ElementType::F32
        } else {
            element_type
        };

        let constant = match values {
            [value] => ConstantData::scalar(const_type, *value),
            values => {
                let shape = self.shape();
                let layout = self.layout.as_ref();
                let c = channels_axis(layout, shape.rank(), step)?;

                let rank = shape
                    .rank()
                    .or_else(|| layout.filter(|l| !l.has_ellipsis()).map(|l| l.min_rank()))
                    .ok_or_else(|| PrePostError::IncompatibleRank {
                        layout: layout.map(|l| l.to_string()).unwrap_or_default(),
                        rank: None,
                    })?;

                if let Some(Dimension::Fixed(channels)) = shape.dims().and_then(|d| d.get(c).copied()) {
                    if channels != values.len() {
                        return Err(PrePostError::DimensionMismatch {
                            expected: channels,
                            actual: values.len(),
                        });
                    }
                }

                let mut const_shape = vec![1; rank];
                const_shape[c] = values.len();
                ConstantData::new(const_type, &const_shape, values.to_vec())
            }
        };

        let input = self.output();
        let constant = self.edit.add_constant(constant);
        let output = self.add_op(OpType::Binary(op), &[input, constant])?;
        self.nodes = smallvec![output];
        Ok(())
    }

    /// Resize the height and width axes to `size`, or to the corresponding
    /// sizes of `model_shape` located using `model_layout`.
    pub fn resize(
        &mut self,
        algorithm: ResizeAlgorithm,
        size: Option<[usize; 2]>,
        model_shape: &PartialShape,
        model_layout: Option<&Layout>,
    ) -> Result<(), PrePostError> {
        let has_spatial_axes = |l: &&Layout| l.has_axis(axis::HEIGHT) && l.has_axis(axis::WIDTH);

        let layout = self
            .layout
            .as_ref()
            .filter(has_spatial_axes)
            .ok_or(PrePostError::LayoutRequired("resize"))?;
        let rank = self.shape().rank();
        let axes = [layout.height_idx(rank)?, layout.width_idx(rank)?];

        let sizes = match size {
            Some([height, width]) => [Dimension::Fixed(height), Dimension::Fixed(width)],
            None => {
                let model_layout = model_layout
                    .filter(has_spatial_axes)
                    .ok_or(PrePostError::LayoutRequired("resize"))?;
                let model_rank = model_shape.rank();
                [
                    model_shape.dim(model_layout.height_idx(model_rank)?),
                    model_shape.dim(model_layout.width_idx(model_rank)?),
                ]
            }
        };

        self.apply_unary(OpType::Interpolate {
            algorithm,
            axes,
            sizes,
        })
    }

    pub fn custom(&mut self, step: CustomStep<'_>) -> Result<(), PrePostError> {
        let input = self.output();
        let output = step(&mut *self.edit, input).map_err(PrePostError::UserStep)?;
        if self.edit.value(output).is_none() {
            return Err(PrePostError::UserStep(
                format!("custom step returned unknown node {}", output).into(),
            ));
        }
        self.nodes = smallvec![output];
        Ok(())
    }
}
