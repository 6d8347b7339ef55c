use crate::color::ColorFormat;
use crate::element_type::ElementType;
use crate::error::PrePostError;
use crate::graph::PartialShape;
use crate::layout::Layout;

/// Types which can be converted into a [`Layout`].
///
/// Layout setters accept strings as well as parsed layouts. Parse errors are
/// reported when the processor is built.
pub trait IntoLayout {
    fn into_layout(self) -> Result<Layout, PrePostError>;
}

impl IntoLayout for Layout {
    fn into_layout(self) -> Result<Layout, PrePostError> {
        Ok(self)
    }
}

impl IntoLayout for &Layout {
    fn into_layout(self) -> Result<Layout, PrePostError> {
        Ok(self.clone())
    }
}

impl IntoLayout for &str {
    fn into_layout(self) -> Result<Layout, PrePostError> {
        Layout::parse(self)
    }
}

impl IntoLayout for String {
    fn into_layout(self) -> Result<Layout, PrePostError> {
        Layout::parse(&self)
    }
}

/// Store a layout, or the first error encountered when parsing one.
fn set_layout<L: IntoLayout>(
    slot: &mut Option<Layout>,
    deferred_error: &mut Option<PrePostError>,
    layout: L,
) {
    match layout.into_layout() {
        Ok(layout) => *slot = Some(layout),
        Err(err) => {
            deferred_error.get_or_insert(err);
        }
    }
}

/// Override for the height and width of an input tensor.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SpatialShape {
    Static { height: usize, width: usize },
    Dynamic,
}

/// Description of the data that callers will pass for a model input.
///
/// Properties which are not set default to those of the model input.
#[derive(Debug, Default)]
pub struct InputTensorInfo {
    pub(crate) element_type: Option<ElementType>,
    pub(crate) layout: Option<Layout>,
    pub(crate) shape: Option<PartialShape>,
    pub(crate) spatial_shape: Option<SpatialShape>,
    pub(crate) color_format: Option<(ColorFormat, Vec<String>)>,
    pub(crate) memory_type: Option<String>,
    pub(crate) deferred_error: Option<PrePostError>,
}

impl InputTensorInfo {
    pub fn set_element_type(&mut self, ty: ElementType) -> &mut Self {
        self.element_type = Some(ty);
        self
    }

    pub fn set_layout<L: IntoLayout>(&mut self, layout: L) -> &mut Self {
        set_layout(&mut self.layout, &mut self.deferred_error, layout);
        self
    }

    /// Set the full shape of the tensor.
    ///
    /// This cannot be combined with a spatial shape override.
    pub fn set_shape(&mut self, shape: impl Into<PartialShape>) -> &mut Self {
        self.shape = Some(shape.into());
        self
    }

    /// Set the height and width of the tensor, leaving other dimensions as
    /// derived from the model input.
    pub fn set_spatial_static_shape(&mut self, height: usize, width: usize) -> &mut Self {
        self.spatial_shape = Some(SpatialShape::Static { height, width });
        self
    }

    /// Make the height and width of the tensor dynamic.
    pub fn set_spatial_dynamic_shape(&mut self) -> &mut Self {
        self.spatial_shape = Some(SpatialShape::Dynamic);
        self
    }

    pub fn set_color_format(&mut self, format: ColorFormat) -> &mut Self {
        self.color_format = Some((format, Vec::new()));
        self
    }

    /// Set a multi-plane color format with custom names for the planes.
    ///
    /// Each plane becomes a separate model input named after the original
    /// input and the plane's name, eg. "input/Y".
    pub fn set_color_format_with_names(
        &mut self,
        format: ColorFormat,
        plane_names: &[&str],
    ) -> &mut Self {
        let names = plane_names.iter().map(|name| name.to_string()).collect();
        self.color_format = Some((format, names));
        self
    }

    /// Tag the new model inputs with a memory type. An empty string removes
    /// an existing tag.
    pub fn set_memory_type(&mut self, memory_type: &str) -> &mut Self {
        self.memory_type = Some(memory_type.to_string());
        self
    }
}

/// Description of the data that callers will receive from a model output.
#[derive(Debug, Default)]
pub struct OutputTensorInfo {
    pub(crate) element_type: Option<ElementType>,
    pub(crate) layout: Option<Layout>,
    pub(crate) deferred_error: Option<PrePostError>,
}

impl OutputTensorInfo {
    pub fn set_element_type(&mut self, ty: ElementType) -> &mut Self {
        self.element_type = Some(ty);
        self
    }

    pub fn set_layout<L: IntoLayout>(&mut self, layout: L) -> &mut Self {
        set_layout(&mut self.layout, &mut self.deferred_error, layout);
        self
    }
}

/// Model-side description of an input or output.
#[derive(Debug, Default)]
pub struct ModelInfo {
    pub(crate) layout: Option<Layout>,
    pub(crate) deferred_error: Option<PrePostError>,
}

impl ModelInfo {
    /// Set the layout the model uses for this input or output.
    ///
    /// This overrides the layout tag of the model's parameter or result.
    pub fn set_layout<L: IntoLayout>(&mut self, layout: L) -> &mut Self {
        set_layout(&mut self.layout, &mut self.deferred_error, layout);
        self
    }
}
