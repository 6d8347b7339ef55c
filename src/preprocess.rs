//! Builder which adds pre and post-processing steps to a model's inputs and
//! outputs.
//!
//! A [`PrePostProcessor`] describes, for each model input, the format of the
//! data that callers will supply (element type, layout, shape, color format)
//! and the steps that convert it into what the model expects. Outputs are
//! described likewise. [`PrePostProcessor::build`] then inserts the nodes
//! for these steps into the model.
//!
//! ```
//! use prepost::{shape, ColorFormat, ElementType, Model, OpType, PrePostProcessor, UnaryOp};
//!
//! let mut model = Model::new();
//! let image = model.add_parameter("image", ElementType::F32, shape![1, 3, 224, 224]);
//! let relu = model.add_op("relu", OpType::Unary(UnaryOp::Relu), &[image]).unwrap();
//! model.add_result("scores", relu);
//!
//! let mut ppp = PrePostProcessor::new(&mut model);
//! let input = ppp.input();
//! input
//!     .tensor()
//!     .set_element_type(ElementType::U8)
//!     .set_layout("NHWC")
//!     .set_color_format(ColorFormat::Bgr);
//! input.model().set_layout("NCHW");
//! input
//!     .preprocess()
//!     .convert_element_type(ElementType::F32)
//!     .convert_color(ColorFormat::Rgb)
//!     .mean(127.5)
//!     .scale(127.5);
//! let model = ppp.build()?;
//!
//! let param = model.parameter(0).unwrap();
//! assert_eq!(param.output().element_type, ElementType::U8);
//! assert_eq!(param.output().shape, shape![1, 224, 224, 3]);
//! # Ok::<(), prepost::PrePostError>(())
//! ```

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};

use crate::color::{plane_names, plane_shapes, ColorFormat};
use crate::env::{env_flag, VERBOSE_ENV};
use crate::error::{Port, PrePostError};
use crate::graph::{
    Dimension, GraphEdit, Model, NodeId, ParamReplacement, PartialShape, ResultReplacement,
    StagedChanges, ValueInfo, MEMORY_TYPE,
};
use crate::layout::{axis, Layout};
use crate::ops::BinaryOp;

mod steps;
mod tensor_info;

pub use steps::{CustomStep, PostProcessSteps, PreProcessSteps};
pub use tensor_info::{InputTensorInfo, IntoLayout, ModelInfo, OutputTensorInfo};

use steps::{plan_layout_change, LayoutTarget, Pipeline, PostStep, PreStep};
use tensor_info::SpatialShape;

/// How an input or output was referred to by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Reference {
    /// The only input or output of the model.
    Only,
    Index(usize),
    /// An input or output with a given tensor name.
    Name(String),
}

/// Options that control [`PrePostProcessor::build`].
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Log a summary of the new model inputs and outputs at the `info` level.
    ///
    /// Defaults to the value of the `PREPOST_VERBOSE` environment variable.
    pub verbose: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            verbose: env_flag(VERBOSE_ENV, false),
        }
    }
}

/// Pre-processing configuration for a model input.
#[derive(Default)]
pub struct InputInfo<'a> {
    tensor: InputTensorInfo,
    model: ModelInfo,
    preprocess: PreProcessSteps<'a>,
}

impl<'a> InputInfo<'a> {
    /// Describe the data that callers will pass.
    pub fn tensor(&mut self) -> &mut InputTensorInfo {
        &mut self.tensor
    }

    /// Describe the input as the model sees it.
    pub fn model(&mut self) -> &mut ModelInfo {
        &mut self.model
    }

    pub fn preprocess(&mut self) -> &mut PreProcessSteps<'a> {
        &mut self.preprocess
    }
}

/// Post-processing configuration for a model output.
#[derive(Default)]
pub struct OutputInfo<'a> {
    tensor: OutputTensorInfo,
    model: ModelInfo,
    postprocess: PostProcessSteps<'a>,
}

impl<'a> OutputInfo<'a> {
    /// Describe the data that callers will receive.
    pub fn tensor(&mut self) -> &mut OutputTensorInfo {
        &mut self.tensor
    }

    pub fn model(&mut self) -> &mut ModelInfo {
        &mut self.model
    }

    pub fn postprocess(&mut self) -> &mut PostProcessSteps<'a> {
        &mut self.postprocess
    }
}

/// Adds pre-processing to a model's inputs and post-processing to its
/// outputs.
///
/// Configuration is collected by the [`input`](Self::input) and
/// [`output`](Self::output) families of methods and validated by
/// [`build`](Self::build). The model is only modified if `build` succeeds.
pub struct PrePostProcessor<'a> {
    model: &'a mut Model,
    inputs: Vec<(Reference, InputInfo<'a>)>,
    outputs: Vec<(Reference, OutputInfo<'a>)>,
    options: BuildOptions,
}

impl<'a> PrePostProcessor<'a> {
    pub fn new(model: &'a mut Model) -> PrePostProcessor<'a> {
        PrePostProcessor {
            model,
            inputs: Vec::new(),
            outputs: Vec::new(),
            options: BuildOptions::default(),
        }
    }

    pub fn set_options(&mut self, options: BuildOptions) {
        self.options = options;
    }

    fn input_info(&mut self, reference: Reference) -> &mut InputInfo<'a> {
        let pos = match self.inputs.iter().position(|(r, _)| *r == reference) {
            Some(pos) => pos,
            None => {
                self.inputs.push((reference, InputInfo::default()));
                self.inputs.len() - 1
            }
        };
        &mut self.inputs[pos].1
    }

    fn output_info(&mut self, reference: Reference) -> &mut OutputInfo<'a> {
        let pos = match self.outputs.iter().position(|(r, _)| *r == reference) {
            Some(pos) => pos,
            None => {
                self.outputs.push((reference, OutputInfo::default()));
                self.outputs.len() - 1
            }
        };
        &mut self.outputs[pos].1
    }

    /// Configure the model's only input.
    ///
    /// [`build`](Self::build) fails if the model does not have exactly one
    /// input.
    pub fn input(&mut self) -> &mut InputInfo<'a> {
        self.input_info(Reference::Only)
    }

    /// Configure the input at position `index` in the model's input list.
    pub fn input_at(&mut self, index: usize) -> &mut InputInfo<'a> {
        self.input_info(Reference::Index(index))
    }

    /// Configure the input with tensor name `name`.
    pub fn input_by_name(&mut self, name: &str) -> &mut InputInfo<'a> {
        self.input_info(Reference::Name(name.to_string()))
    }

    /// Configure the model's only output.
    pub fn output(&mut self) -> &mut OutputInfo<'a> {
        self.output_info(Reference::Only)
    }

    pub fn output_at(&mut self, index: usize) -> &mut OutputInfo<'a> {
        self.output_info(Reference::Index(index))
    }

    pub fn output_by_name(&mut self, name: &str) -> &mut OutputInfo<'a> {
        self.output_info(Reference::Name(name.to_string()))
    }

    /// Validate the configuration and apply it to the model.
    ///
    /// Each configured input is replaced by one new parameter, or one
    /// parameter per color plane, followed by the nodes for its steps.
    /// Configured outputs get the nodes for their steps inserted before the
    /// result. On error the model is left unchanged.
    pub fn build(self) -> Result<&'a mut Model, PrePostError> {
        let PrePostProcessor {
            model,
            inputs,
            outputs,
            options,
        } = self;

        let changes = stage_changes(model, inputs, outputs)?;
        let new_params: Vec<NodeId> = changes
            .params
            .iter()
            .flat_map(|p| p.new_params.iter().copied())
            .collect();
        let new_results: Vec<NodeId> = changes.results.iter().map(|r| r.result).collect();

        model.commit(changes);

        if options.verbose {
            log_summary(model, &new_params, &new_results);
        }

        Ok(model)
    }
}

fn log_summary(model: &Model, params: &[NodeId], results: &[NodeId]) {
    for (kind, ids) in [("input", params), ("output", results)] {
        for node in ids.iter().filter_map(|id| model.node(*id)) {
            let value = node.output();
            tracing::info!(
                kind,
                name = node.name(),
                element_type = %value.element_type,
                shape = %value.shape,
                layout = %value.layout.as_ref().map(|l| l.to_string()).unwrap_or_default(),
                "processed model {}",
                kind
            );
        }
    }
}

/// Return the position of the parameter or result referred to by `reference`
/// in `ids`.
fn resolve_reference(
    model: &Model,
    port: Port,
    ids: &[NodeId],
    reference: &Reference,
) -> Result<usize, PrePostError> {
    match reference {
        Reference::Only if ids.len() == 1 => Ok(0),
        Reference::Only => Err(PrePostError::AmbiguousReference {
            port,
            count: ids.len(),
        }),
        Reference::Index(index) if *index < ids.len() => Ok(*index),
        Reference::Index(index) => Err(PrePostError::IndexOutOfRange {
            port,
            index: *index,
            len: ids.len(),
        }),
        Reference::Name(name) => ids
            .iter()
            .position(|id| model.value(*id).is_some_and(|v| v.has_name(name)))
            .ok_or_else(|| PrePostError::UnknownTensorName {
                port,
                name: name.clone(),
            }),
    }
}

/// Resolve references, checking that no two configurations refer to the same
/// input or output.
fn resolve_all<T>(
    model: &Model,
    port: Port,
    ids: &[NodeId],
    infos: Vec<(Reference, T)>,
) -> Result<Vec<(usize, T)>, PrePostError> {
    let mut seen = FxHashSet::default();
    let mut resolved = Vec::with_capacity(infos.len());
    for (reference, info) in infos {
        let index = resolve_reference(model, port, ids, &reference)?;
        if !seen.insert(index) {
            return Err(PrePostError::DuplicateReference { port, index });
        }
        resolved.push((index, info));
    }
    Ok(resolved)
}

/// Stage the nodes for all inputs and outputs without modifying the model.
fn stage_changes<'a>(
    model: &Model,
    inputs: Vec<(Reference, InputInfo<'a>)>,
    outputs: Vec<(Reference, OutputInfo<'a>)>,
) -> Result<StagedChanges, PrePostError> {
    let inputs = resolve_all(model, Port::Input, model.parameters(), inputs)?;
    let outputs = resolve_all(model, Port::Output, model.results(), outputs)?;

    let mut edit = GraphEdit::new(model);
    let mut plane_aliases = FxHashSet::default();

    let mut params = Vec::with_capacity(inputs.len());
    for (index, info) in inputs {
        params.push(build_input(&mut edit, index, info, &mut plane_aliases)?);
    }

    let mut results = Vec::with_capacity(outputs.len());
    for (index, info) in outputs {
        results.push(build_output(&mut edit, index, info)?);
    }

    Ok(edit.finish(params, results))
}

fn non_empty(layout: Option<Layout>) -> Option<Layout> {
    layout.filter(|l| !l.is_empty())
}

fn layout_str(layout: Option<&Layout>) -> String {
    layout.map(|l| l.to_string()).unwrap_or_default()
}

/// Check the steps of an input whose color format is `format`.
///
/// YUV images must be converted to RGB or BGR. Before that, only element
/// type conversions are allowed, plus custom steps if the image is a single
/// plane.
fn check_yuv_steps(format: ColorFormat, steps: &[PreStep]) -> Result<(), PrePostError> {
    if !format.is_yuv() {
        return Ok(());
    }
    let single_plane = format.plane_count() == 1;
    for step in steps {
        match step {
            PreStep::ConvertType(_) => continue,
            PreStep::Custom(_) if single_plane => continue,
            PreStep::ConvertColor(_) => return Ok(()),
            step => return Err(PrePostError::UnsupportedForMultiPlane(step.name())),
        }
    }
    Err(PrePostError::UnsupportedColorConversion {
        from: format,
        to: ColorFormat::Undefined,
        reason: "YUV input must be converted to RGB or BGR",
    })
}

/// Compute the shape of the tensor callers will pass for an input.
///
/// Unless set explicitly, this is the model shape mapped back through every
/// transpose the steps will apply, with spatial dimensions overridden.
fn derive_tensor_shape(
    tensor: &InputTensorInfo,
    steps: &[PreStep],
    tensor_layout: Option<&Layout>,
    model_layout: Option<&Layout>,
    model_shape: &PartialShape,
) -> Result<PartialShape, PrePostError> {
    if let Some(shape) = &tensor.shape {
        if tensor.spatial_shape.is_some() {
            return Err(PrePostError::ConflictingShape);
        }
        return Ok(shape.clone());
    }

    let rank = model_shape.rank();
    let mut perms = Vec::new();
    let mut current = tensor_layout.cloned();
    for step in steps {
        if let PreStep::ConvertLayout(target) = step {
            let change = plan_layout_change(target, current.as_ref(), model_layout, rank)?;
            perms.extend(change.perm);
            current = change.layout;
        }
    }
    if let (Some(current), Some(model_layout)) = (&current, model_layout) {
        let change = plan_layout_change(
            &LayoutTarget::Implicit,
            Some(current),
            Some(model_layout),
            rank,
        )?;
        perms.extend(change.perm);
    }

    let mut shape = perms
        .iter()
        .rev()
        .fold(model_shape.clone(), |shape, perm| shape.unpermuted(perm));

    let has_resize = steps.iter().any(|s| matches!(s, PreStep::Resize { .. }));
    let (spatial, step) = match &tensor.spatial_shape {
        Some(SpatialShape::Static { height, width }) => (
            Some([Dimension::Fixed(*height), Dimension::Fixed(*width)]),
            "set_spatial_static_shape",
        ),
        Some(SpatialShape::Dynamic) => (
            Some([Dimension::Dynamic; 2]),
            "set_spatial_dynamic_shape",
        ),
        None if has_resize => (Some([Dimension::Dynamic; 2]), "resize"),
        None => (None, ""),
    };

    if let Some([height, width]) = spatial {
        let layout = tensor_layout
            .filter(|l| l.has_axis(axis::HEIGHT) && l.has_axis(axis::WIDTH))
            .ok_or(PrePostError::LayoutRequired(step))?;
        let rank = shape.rank();
        let h = layout.height_idx(rank)?;
        let w = layout.width_idx(rank)?;
        shape.set_dim(h, height);
        shape.set_dim(w, width);
    }

    Ok(shape)
}

/// Stage the new parameters and pre-processing nodes for the input at
/// position `index`.
fn build_input(
    edit: &mut GraphEdit<'_>,
    index: usize,
    info: InputInfo<'_>,
    plane_aliases: &mut FxHashSet<String>,
) -> Result<ParamReplacement, PrePostError> {
    let InputInfo {
        mut tensor,
        model: mut model_info,
        mut preprocess,
    } = info;
    for deferred in [
        tensor.deferred_error.take(),
        model_info.deferred_error.take(),
        preprocess.deferred_error.take(),
    ] {
        if let Some(err) = deferred {
            return Err(err);
        }
    }

    let model = edit.model();
    let param_id = model.parameters()[index];
    let param = model
        .node(param_id)
        .ok_or(PrePostError::IndexOutOfRange {
            port: Port::Input,
            index,
            len: model.parameters().len(),
        })?;
    let param_info = param.output();
    let param_type = param_info.element_type;
    let param_shape = &param_info.shape;

    let model_layout = non_empty(model_info.layout).or_else(|| non_empty(param_info.layout.clone()));
    let (color, sub_names) = tensor.color_format.take().unwrap_or_default();
    check_yuv_steps(color, &preprocess.steps)?;
    let labels = plane_names(color, &sub_names)?;

    let tensor_layout = match non_empty(tensor.layout.take()) {
        Some(layout) => Some(layout),
        None if color.is_yuv() => Some(Layout::parse("NHWC")?),
        None => model_layout.clone(),
    };
    let tensor_type = tensor.element_type.unwrap_or(param_type);
    let tensor_shape = derive_tensor_shape(
        &tensor,
        &preprocess.steps,
        tensor_layout.as_ref(),
        model_layout.as_ref(),
        param_shape,
    )?;

    tracing::debug!(
        input = param.name(),
        index,
        %tensor_type,
        %tensor_shape,
        tensor_layout = %layout_str(tensor_layout.as_ref()),
        model_layout = %layout_str(model_layout.as_ref()),
        %color,
        steps = preprocess.steps.len(),
        "staging pre-processing"
    );

    let shapes = match &tensor_layout {
        Some(layout) if color.is_yuv() => plane_shapes(&tensor_shape, layout, color)?,
        _ => smallvec![tensor_shape],
    };

    let mut rt_info = param_info.rt_info.clone();
    match tensor.memory_type.as_deref() {
        Some("") => {
            rt_info.remove(MEMORY_TYPE);
        }
        Some(memory_type) => rt_info.insert(MEMORY_TYPE, memory_type),
        None => {}
    }

    let new_param_info = |names: BTreeSet<String>, shape: PartialShape| ValueInfo {
        element_type: tensor_type,
        shape,
        names,
        layout: tensor_layout.clone(),
        rt_info: rt_info.clone(),
    };

    let mut new_params: SmallVec<[NodeId; 3]> = SmallVec::new();
    if labels.is_empty() {
        let shape = shapes.into_iter().next().unwrap_or_default();
        let info = new_param_info(param_info.names.clone(), shape);
        new_params.push(edit.add_parameter(param.name().to_string(), info, param.rt_info().clone()));
    } else {
        for (label, shape) in labels.iter().zip(shapes) {
            let names: BTreeSet<String> = param_info
                .names
                .iter()
                .map(|alias| format!("{}/{}", alias, label))
                .collect();
            for alias in &names {
                if model.has_alias(alias) || !plane_aliases.insert(alias.clone()) {
                    return Err(PrePostError::InvalidPlaneNaming(format!(
                        "tensor name \"{}\" is already in use",
                        alias
                    )));
                }
            }
            let name = format!("{}/{}", param.name(), label);
            let info = new_param_info(names, shape);
            new_params.push(edit.add_parameter(name, info, param.rt_info().clone()));
        }
    }

    let mut pipeline = Pipeline::new(edit, new_params.clone(), tensor_layout, color);
    let mut explicit_convert = false;
    for step in preprocess.steps {
        match step {
            PreStep::ConvertType(target) => {
                explicit_convert = true;
                pipeline.convert_type(target.unwrap_or(param_type))?;
            }
            PreStep::ConvertLayout(target) => {
                pipeline.convert_layout(&target, model_layout.as_ref())?
            }
            PreStep::ConvertColor(format) => pipeline.convert_color(format)?,
            PreStep::Resize { algorithm, size } => {
                pipeline.resize(algorithm, size, param_shape, model_layout.as_ref())?
            }
            PreStep::Mean(values) => pipeline.normalize(BinaryOp::Sub, "mean", &values)?,
            PreStep::Scale(values) => pipeline.normalize(BinaryOp::Div, "scale", &values)?,
            PreStep::ReverseChannels => pipeline.reverse_channels("reverse_channels")?,
            PreStep::Custom(step) => pipeline.custom(step)?,
        }
    }

    if pipeline.layout.is_some() && model_layout.is_some() {
        pipeline.convert_layout(&LayoutTarget::Implicit, model_layout.as_ref())?;
    }
    if !explicit_convert && !param_type.is_dynamic() && pipeline.element_type() != param_type {
        pipeline.convert_type(param_type)?;
    }

    let actual_type = pipeline.element_type();
    if !param_type.is_dynamic() && actual_type != param_type {
        return Err(PrePostError::TypeMismatch {
            expected: param_type,
            actual: actual_type,
        });
    }
    let actual_shape = pipeline.shape();
    if !actual_shape.compatible(param_shape) {
        return Err(PrePostError::ShapeMismatch {
            expected: param_shape.clone(),
            actual: actual_shape,
        });
    }

    Ok(ParamReplacement {
        index,
        old: param_id,
        new_params,
        output: pipeline.output(),
    })
}

/// Stage the post-processing nodes for the output at position `index`.
fn build_output(
    edit: &mut GraphEdit<'_>,
    index: usize,
    info: OutputInfo<'_>,
) -> Result<ResultReplacement, PrePostError> {
    let OutputInfo {
        mut tensor,
        model: mut model_info,
        mut postprocess,
    } = info;
    for deferred in [
        tensor.deferred_error.take(),
        model_info.deferred_error.take(),
        postprocess.deferred_error.take(),
    ] {
        if let Some(err) = deferred {
            return Err(err);
        }
    }

    let model = edit.model();
    let result_id = model.results()[index];
    let (result, producer) = model
        .node(result_id)
        .and_then(|result| Some((result, *result.inputs().first()?)))
        .ok_or(PrePostError::IndexOutOfRange {
            port: Port::Output,
            index,
            len: model.results().len(),
        })?;

    let model_layout =
        non_empty(model_info.layout).or_else(|| non_empty(result.output().layout.clone()));
    let tensor_layout = non_empty(tensor.layout.take());

    tracing::debug!(
        output = result.name(),
        index,
        tensor_layout = %layout_str(tensor_layout.as_ref()),
        model_layout = %layout_str(model_layout.as_ref()),
        steps = postprocess.steps.len(),
        "staging post-processing"
    );

    let mut pipeline = Pipeline::new(
        edit,
        smallvec![producer],
        model_layout,
        ColorFormat::Undefined,
    );
    let mut explicit_convert = false;
    for step in postprocess.steps {
        match step {
            PostStep::ConvertType(target) => {
                explicit_convert = true;
                let target = target
                    .or(tensor.element_type)
                    .ok_or(PrePostError::AmbiguousImplicitConvert("convert_element_type"))?;
                pipeline.convert_type(target)?;
            }
            PostStep::ConvertLayout(target) => {
                pipeline.convert_layout(&target, tensor_layout.as_ref())?
            }
            PostStep::Custom(step) => pipeline.custom(step)?,
        }
    }

    if pipeline.layout.is_some() && tensor_layout.is_some() {
        pipeline.convert_layout(&LayoutTarget::Implicit, tensor_layout.as_ref())?;
    }
    if let Some(ty) = tensor.element_type {
        if !explicit_convert && pipeline.element_type() != ty {
            pipeline.convert_type(ty)?;
        }
    }

    // The tag describes the final value. Without a model layout there is
    // nothing to convert from, so a tensor layout cannot be applied.
    let layout = pipeline.layout.clone();
    if layout.is_none() && tensor_layout.is_some() {
        tracing::debug!(
            output = result.name(),
            tensor_layout = %layout_str(tensor_layout.as_ref()),
            "ignoring tensor layout of output with unknown model layout"
        );
    }

    Ok(ResultReplacement {
        result: result_id,
        producer: pipeline.output(),
        layout,
    })
}
