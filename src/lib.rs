//! prepost adds pre-processing and post-processing steps to the inputs and
//! outputs of a model graph.
//!
//! Models are usually trained on data in one specific format, for example
//! `f32` images in NCHW layout with RGB channels normalized to a given mean
//! and standard deviation. Applications frequently have data in another
//! format, such as `u8` NHWC images in BGR or NV12 color. Rather than
//! converting the data by hand, the conversion can be expressed as nodes of
//! the model graph itself.
//!
//! # Workflow
//!
//! 1. Build or obtain a [`Model`].
//! 2. Create a [`PrePostProcessor`] for it.
//! 3. For each input that needs conversion, describe the tensor callers will
//!    supply using [`InputInfo::tensor`], the format the model expects using
//!    [`InputInfo::model`] and any explicit steps using
//!    [`InputInfo::preprocess`]. Outputs are configured similarly.
//! 4. Call [`PrePostProcessor::build`]. This either applies all changes to
//!    the model or returns an error and leaves the model untouched.
//!
//! Steps which are implied by the difference between the tensor and model
//! descriptions, such as a final element type conversion or a transpose
//! between layouts, are added automatically. Steps which would have no
//! effect are omitted.
//!
//! # Layouts
//!
//! Layouts name the axes of a tensor, such as `"NCHW"` or `"[N,?,...,C]"`.
//! See [`Layout`] for the syntax. Steps such as resizing and per-channel
//! normalization use the layout to find the axes they operate on.
//!
//! # Color formats
//!
//! Inputs can be described as RGB, BGR or one of several YUV formats (see
//! [`ColorFormat`]). Multi-plane YUV formats replace the original input with
//! one input per plane.
//!
//! # Logging
//!
//! Decisions made while building are logged using [`tracing`] at the `debug`
//! level. A summary of the new inputs and outputs is logged at the `info`
//! level if [`BuildOptions::verbose`] is set, or the `PREPOST_VERBOSE`
//! environment variable is enabled.

mod element_type;
mod env;
mod error;
mod graph;
mod preprocess;

pub mod color;
pub mod layout;
pub mod ops;

pub use color::ColorFormat;
pub use element_type::{ElementType, UnknownElementType};
pub use env::VERBOSE_ENV;
pub use error::{ErrorKind, Port, PrePostError};
pub use graph::{
    ConstantData, Dimension, GraphEdit, Model, Node, NodeId, NodeKind, PartialShape, RtValue,
    RuntimeInfo, ValueInfo, MEMORY_TYPE,
};
pub use layout::Layout;
pub use ops::{BinaryOp, InferShapesError, OpType, ResizeAlgorithm, UnaryOp};
pub use preprocess::{
    BuildOptions, CustomStep, InputInfo, InputTensorInfo, IntoLayout, ModelInfo, OutputInfo,
    OutputTensorInfo, PostProcessSteps, PreProcessSteps, PrePostProcessor,
};
