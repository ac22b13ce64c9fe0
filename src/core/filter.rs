//! Filter trait and filter metadata.
//!
//! A filter has N typed inputs and M typed outputs. The pipeline drives it in
//! two phases:
//!
//! 1. **Information** (`output_information`): computes the metadata of every
//!    output from the input metadata, without any pixel data. Wiring problems
//!    are reported here as [`ConfigurationError`]s.
//! 2. **Generation** (`generate`): called once per thread sub-region with the
//!    input buffers already pulled, writing only into its own tile of each
//!    output. Every output of a node is generated over the same region.
//!
//! # Thread Safety
//!
//! `generate` takes `&self` and runs concurrently on disjoint tiles, so any
//! state a filter accumulates while generating must live behind per-thread
//! storage (see [`crate::filters::builtin::statistics`]).

use crate::core::buffer::{AnyBuffer, AnyTileMut};
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::info::ImageInfo;
use crate::core::pixel::PixelType;
use crate::core::propagation::{EdgePolicy, Propagation};
use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};

/// Description of one filter input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    /// Input name.
    pub name: String,
    /// Accepted pixel types; empty accepts every type.
    pub pixel_types: Vec<PixelType>,
    /// Whether the input may stay unconnected.
    pub optional: bool,
}

impl InputDefinition {
    /// Required input accepting any pixel type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pixel_types: Vec::new(),
            optional: false,
        }
    }

    /// Restrict the accepted pixel types.
    pub fn accepting(mut self, pixel_types: &[PixelType]) -> Self {
        self.pixel_types = pixel_types.to_vec();
        self
    }

    /// Mark as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether `pixel_type` may be connected.
    pub fn accepts(&self, pixel_type: PixelType) -> bool {
        self.pixel_types.is_empty() || self.pixel_types.contains(&pixel_type)
    }
}

/// Description of one filter output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
    /// Output name.
    pub name: String,
    pub description: String,
}

/// Description of one filter parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    /// Default value rendered as text, if the parameter has one.
    pub default: Option<String>,
}

/// Metadata describing a filter type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterMetadata {
    /// Unique identifier for this filter type (e.g., "shift_scale")
    pub id: String,
    /// Human-readable name (e.g., "Shift Scale")
    pub name: String,
    /// Detailed description
    pub description: String,
    /// Ordered input definitions
    pub inputs: Vec<InputDefinition>,
    /// Ordered output definitions; never empty
    pub outputs: Vec<OutputDefinition>,
    /// Parameter definitions
    pub parameters: Vec<ParameterDefinition>,
    /// Whether the filter accumulates state across streamed pieces
    pub persistent: bool,
}

impl FilterMetadata {
    /// Create a new metadata builder.
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> FilterMetadataBuilder {
        FilterMetadataBuilder {
            metadata: FilterMetadata {
                id: id.into(),
                name: name.into(),
                description: String::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                parameters: Vec::new(),
                persistent: false,
            },
        }
    }

    /// Get all input names.
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.name.as_str()).collect()
    }

    /// Get all output names.
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.name.as_str()).collect()
    }
}

/// Builder for FilterMetadata.
pub struct FilterMetadataBuilder {
    metadata: FilterMetadata,
}

impl FilterMetadataBuilder {
    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Add an input.
    pub fn input(mut self, input: InputDefinition) -> Self {
        self.metadata.inputs.push(input);
        self
    }

    /// Add an output. Filters declaring none get a single `output`.
    pub fn output(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.metadata.outputs.push(OutputDefinition {
            name: name.into(),
            description: description.into(),
        });
        self
    }

    /// Add a parameter.
    pub fn parameter(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default: Option<&str>,
    ) -> Self {
        self.metadata.parameters.push(ParameterDefinition {
            name: name.into(),
            description: description.into(),
            default: default.map(str::to_string),
        });
        self
    }

    /// Mark as accumulating state across streamed pieces.
    pub fn persistent(mut self) -> Self {
        self.metadata.persistent = true;
        self
    }

    /// Build the metadata.
    pub fn build(mut self) -> FilterMetadata {
        if self.metadata.outputs.is_empty() {
            self.metadata.outputs.push(OutputDefinition {
                name: "output".to_string(),
                description: String::new(),
            });
        }
        self.metadata
    }
}

/// Inputs handed to [`Filter::generate`].
///
/// Buffers cover at least the region resolved for each input. Both buffers
/// and metadata are indexed by input slot; unconnected optional inputs are
/// `None`.
pub struct GenerateInputs<'a> {
    buffers: Vec<Option<&'a AnyBuffer>>,
    infos: Vec<Option<&'a ImageInfo>>,
    outputs: &'a [ImageInfo],
}

impl<'a> GenerateInputs<'a> {
    pub fn new(
        buffers: Vec<Option<&'a AnyBuffer>>,
        infos: Vec<Option<&'a ImageInfo>>,
        outputs: &'a [ImageInfo],
    ) -> Self {
        Self { buffers, infos, outputs }
    }

    /// Number of input slots.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the filter has no inputs.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer of input `index`.
    pub fn buffer(&self, index: usize) -> Result<&'a AnyBuffer, ComputeError> {
        self.buffers
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| ComputeError::new(format!("input {} has no data", index)))
    }

    /// Buffer of input `index` if it is connected.
    pub fn optional_buffer(&self, index: usize) -> Option<&'a AnyBuffer> {
        self.buffers.get(index).copied().flatten()
    }

    /// Metadata of input `index` if it is connected.
    pub fn info(&self, index: usize) -> Option<&'a ImageInfo> {
        self.infos.get(index).copied().flatten()
    }

    /// Metadata of output `index`.
    pub fn output_info(&self, index: usize) -> Option<&'a ImageInfo> {
        self.outputs.get(index)
    }
}

/// Tile of output `index` among the tiles handed to [`Filter::generate`].
pub fn output_tile<'t, 'a>(outputs: &'t mut [AnyTileMut<'a>], index: usize) -> Result<&'t mut AnyTileMut<'a>, ComputeError> {
    let count = outputs.len();
    outputs
        .get_mut(index)
        .ok_or_else(|| ComputeError::new(format!("output {} missing ({} tiles)", index, count)))
}

/// The core trait for pipeline filters.
///
/// # Example Implementation
///
/// ```ignore
/// struct Negate;
///
/// impl Filter for Negate {
///     fn metadata(&self) -> FilterMetadata {
///         FilterMetadata::builder("negate", "Negate")
///             .input(InputDefinition::new("input"))
///             .build()
///     }
///
///     fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
///         Ok(vec![inputs[0].clone().with_pixel_type(PixelType::F64)])
///     }
///
///     fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
///         let input = inputs.buffer(0)?;
///         let output = output_tile(outputs, 0)?;
///         // write -input into every pixel of output.region()
///         Ok(())
///     }
/// }
/// ```
pub trait Filter: Send + Sync {
    /// Get the metadata for this filter.
    fn metadata(&self) -> FilterMetadata;

    /// Compute the metadata of every output from the metadata of the inputs.
    ///
    /// Called with one entry per connected input slot, after the pipeline
    /// checked that required inputs are connected, that no input follows an
    /// unconnected one and that pixel types are accepted; entry `i` is input
    /// `i`. Returns one entry per declared output, all sharing one extent.
    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError>;

    /// Region propagation for input `input`.
    fn input_propagation(&self, _input: usize) -> Propagation {
        Propagation::Identity
    }

    /// What to do when a required input region leaves the input extent.
    fn edge_policy(&self) -> EdgePolicy {
        EdgePolicy::CropAndTolerate
    }

    /// Called once per pull before the threads start.
    fn before_generate(&self, _region: &ImageRegion, _threads: usize) -> Result<(), ComputeError> {
        Ok(())
    }

    /// Compute the pixels of one sub-region, given one tile per output. Every
    /// tile covers the same region.
    fn generate(
        &self,
        inputs: &GenerateInputs<'_>,
        outputs: &mut [AnyTileMut<'_>],
        thread: usize,
    ) -> Result<(), ComputeError>;

    /// Called once per pull after every thread finished successfully.
    fn after_generate(&self, _region: &ImageRegion) -> Result<(), ComputeError> {
        Ok(())
    }

    /// Clear accumulated state before the first streamed piece.
    fn reset(&self) {}

    /// Reduce accumulated state after the last streamed piece.
    ///
    /// Returns a report for filters that produce one.
    fn synthesize(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Check connected input metadata against the filter's input definitions.
///
/// Connected inputs must form a prefix of the input slots, so an unconnected
/// optional input may only be followed by other unconnected ones.
pub fn check_inputs(metadata: &FilterMetadata, inputs: &[Option<&ImageInfo>]) -> Result<(), ConfigurationError> {
    let mut unconnected = None;
    for (i, definition) in metadata.inputs.iter().enumerate() {
        let Some(info) = inputs.get(i).copied().flatten() else {
            if !definition.optional {
                return Err(ConfigurationError::MissingInput { input: i });
            }
            unconnected.get_or_insert(i);
            continue;
        };
        if let Some(unconnected) = unconnected {
            return Err(ConfigurationError::InputAfterUnconnected { input: i, unconnected });
        }
        if !definition.accepts(info.pixel_type) {
            return Err(ConfigurationError::PixelTypeMismatch {
                input: i,
                expected: definition.pixel_types.clone(),
                got: info.pixel_type,
            });
        }
    }
    Ok(())
}

/// Require every input to share the extent of input 0.
pub fn common_extent(inputs: &[ImageInfo]) -> Result<ImageRegion, ConfigurationError> {
    let first = inputs.first().ok_or(ConfigurationError::MissingInput { input: 0 })?;
    for (i, info) in inputs.iter().enumerate().skip(1) {
        if info.largest_region != first.largest_region {
            return Err(ConfigurationError::ExtentMismatch {
                input: i,
                expected: first.largest_region,
                got: info.largest_region,
            });
        }
    }
    Ok(first.largest_region)
}

/// Parameter validation error helper.
pub fn invalid_parameter(parameter: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidParameter {
        parameter: parameter.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pixel_type: PixelType, w: u64) -> ImageInfo {
        ImageInfo::new(ImageRegion::from_size([w, 4]), pixel_type, 1)
    }

    fn metadata() -> FilterMetadata {
        FilterMetadata::builder("test", "Test")
            .input(InputDefinition::new("image").accepting(&[PixelType::U8, PixelType::F32]))
            .input(InputDefinition::new("mask").optional())
            .parameter("gain", "Multiplier", Some("1.0"))
            .build()
    }

    #[test]
    fn test_metadata_builder() {
        let metadata = metadata();
        assert_eq!(metadata.input_names(), vec!["image", "mask"]);
        assert_eq!(metadata.output_names(), vec!["output"]);
        assert_eq!(metadata.parameters[0].default.as_deref(), Some("1.0"));
        assert!(!metadata.persistent);
    }

    #[test]
    fn test_check_inputs() {
        let metadata = metadata();
        let u8_info = info(PixelType::U8, 4);
        let f64_info = info(PixelType::F64, 4);

        assert!(check_inputs(&metadata, &[Some(&u8_info), None]).is_ok());
        assert_eq!(
            check_inputs(&metadata, &[None, Some(&u8_info)]),
            Err(ConfigurationError::MissingInput { input: 0 })
        );
        assert!(matches!(
            check_inputs(&metadata, &[Some(&f64_info)]),
            Err(ConfigurationError::PixelTypeMismatch { input: 0, got: PixelType::F64, .. })
        ));
    }

    #[test]
    fn test_optional_inputs_must_be_trailing() {
        let metadata = FilterMetadata::builder("test", "Test")
            .input(InputDefinition::new("aux").optional())
            .input(InputDefinition::new("image").optional())
            .build();
        let u8_info = info(PixelType::U8, 4);

        assert!(check_inputs(&metadata, &[None, None]).is_ok());
        assert!(check_inputs(&metadata, &[Some(&u8_info), None]).is_ok());
        assert_eq!(
            check_inputs(&metadata, &[None, Some(&u8_info)]),
            Err(ConfigurationError::InputAfterUnconnected { input: 1, unconnected: 0 })
        );
    }

    #[test]
    fn test_generate_inputs_by_slot() {
        let image = info(PixelType::U8, 4);
        let buffer = AnyBuffer::allocate(PixelType::U8, image.largest_region, 1, None).unwrap();
        let outputs = [image.clone(), image.clone().with_components(2)];
        let inputs = GenerateInputs::new(vec![Some(&buffer), None], vec![Some(&image), None], &outputs);

        assert_eq!(inputs.len(), 2);
        assert!(inputs.info(0).is_some());
        assert!(inputs.info(1).is_none());
        assert!(inputs.optional_buffer(1).is_none());
        assert!(inputs.buffer(1).is_err());
        assert_eq!(inputs.output_info(1).map(|o| o.components), Some(2));
        assert!(inputs.output_info(2).is_none());
    }

    #[test]
    fn test_output_tile() {
        let region = ImageRegion::from_size([2, 2]);
        let mut buffer = AnyBuffer::allocate(PixelType::U8, region, 1, None).unwrap();
        let mut tiles = buffer.split_tiles_mut(&[region]).unwrap();
        assert!(output_tile(&mut tiles, 0).is_ok());
        assert!(output_tile(&mut tiles, 1).is_err());
    }

    #[test]
    fn test_common_extent() {
        let a = info(PixelType::U8, 4);
        let b = info(PixelType::F64, 4);
        let c = info(PixelType::U8, 5);
        assert_eq!(common_extent(&[a.clone(), b]).unwrap(), a.largest_region);
        assert!(matches!(
            common_extent(&[a, c]),
            Err(ConfigurationError::ExtentMismatch { input: 1, .. })
        ));
    }
}
