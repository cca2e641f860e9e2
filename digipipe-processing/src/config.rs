//! Configuration of sequences and dispatching actions.

use digipipe_core::error::Result;
use digipipe_core::key::Mask;
use digipipe_core::properties::Properties;
use serde::{Deserialize, Deserializer, Serialize};

/// Default name of the input data segment.
pub const DEFAULT_INPUT_SEGMENT: &str = "inputs";
/// Default name of the output data segment.
pub const DEFAULT_OUTPUT_SEGMENT: &str = "outputs";

/// Configuration for a [`ContainerSequence`](crate::ContainerSequence).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Run the member processors through the worker pool concurrently.
    pub parallel: bool,
}

impl SequenceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets parallel processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Decodes the configuration from action properties.
    ///
    /// # Errors
    /// Returns an error if a recognized option has the wrong type.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        properties.decode()
    }
}

/// Configuration for a [`ContainerSequenceAction`](crate::ContainerSequenceAction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceActionConfig {
    /// Input data segment name.
    pub input_segment: String,
    /// Input mask to be handled.
    pub input_mask: Mask,
    /// Output data segment name.
    pub output_segment: String,
    /// Event mask for output data.
    pub output_mask: Mask,
}

impl Default for SequenceActionConfig {
    fn default() -> Self {
        Self {
            input_segment: DEFAULT_INPUT_SEGMENT.to_string(),
            input_mask: 0,
            output_segment: DEFAULT_OUTPUT_SEGMENT.to_string(),
            output_mask: 0,
        }
    }
}

impl SequenceActionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input segment.
    #[must_use]
    pub fn with_input_segment(mut self, name: &str) -> Self {
        self.input_segment = name.to_string();
        self
    }

    /// Sets the input mask.
    #[must_use]
    pub fn with_input_mask(mut self, mask: Mask) -> Self {
        self.input_mask = mask;
        self
    }

    /// Sets the output segment.
    #[must_use]
    pub fn with_output_segment(mut self, name: &str) -> Self {
        self.output_segment = name.to_string();
        self
    }

    /// Sets the output mask.
    #[must_use]
    pub fn with_output_mask(mut self, mask: Mask) -> Self {
        self.output_mask = mask;
        self
    }

    /// Decodes the configuration from action properties.
    ///
    /// # Errors
    /// Returns an error if a recognized option has the wrong type.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        properties.decode()
    }

    /// True if outputs land in the stream being read.
    #[must_use]
    pub fn overlaps_input(&self) -> bool {
        self.input_segment == self.output_segment && self.input_mask == self.output_mask
    }
}

/// Configuration for a [`MultiContainerProcessor`](crate::MultiContainerProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiContainerConfig {
    /// Input data segment name.
    pub input_segment: String,
    /// Event masks to be handled. Accepts a single mask or a list.
    #[serde(deserialize_with = "one_or_many")]
    pub input_masks: Vec<Mask>,
    /// Output data segment name.
    pub output_segment: String,
    /// Event mask for output data.
    pub output_mask: Mask,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Mask),
    Many(Vec<Mask>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<Mask>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(mask) => vec![mask],
        OneOrMany::Many(masks) => masks,
    })
}

impl Default for MultiContainerConfig {
    fn default() -> Self {
        Self {
            input_segment: DEFAULT_INPUT_SEGMENT.to_string(),
            input_masks: vec![0],
            output_segment: DEFAULT_OUTPUT_SEGMENT.to_string(),
            output_mask: 0,
        }
    }
}

impl MultiContainerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input segment.
    #[must_use]
    pub fn with_input_segment(mut self, name: &str) -> Self {
        self.input_segment = name.to_string();
        self
    }

    /// Sets the input masks.
    #[must_use]
    pub fn with_input_masks(mut self, masks: &[Mask]) -> Self {
        self.input_masks = masks.to_vec();
        self
    }

    /// Sets the output segment.
    #[must_use]
    pub fn with_output_segment(mut self, name: &str) -> Self {
        self.output_segment = name.to_string();
        self
    }

    /// Sets the output mask.
    #[must_use]
    pub fn with_output_mask(mut self, mask: Mask) -> Self {
        self.output_mask = mask;
        self
    }

    /// Decodes the configuration from action properties.
    ///
    /// # Errors
    /// Returns an error if a recognized option has the wrong type.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        properties.decode()
    }
}
