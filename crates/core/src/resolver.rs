//! Node role resolution.
//!
//! Decides which node ids play which semantic role (positive prompt,
//! negative prompt, size source, samplers, outputs, ...) in a workflow
//! graph. Two strategies implement [`NodeResolver`]:
//!
//! - [`FixedResolver`] binds roles from a hard-coded id table for a known
//!   graph shape and fails if any required id is absent.
//! - [`StructuralResolver`] infers roles from node types, titles and
//!   input fields for templates of unknown shape. Missing roles are
//!   simply left unbound.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::graph::{NodeFamily, NodeId, WorkflowGraph};

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

/// How seed parameters map onto sampler nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedPolicy {
    /// One `seed` parameter for the single sampler.
    #[default]
    Single,
    /// `seed_high` drives the primary sampler, `seed_low` the secondary.
    PerStage,
}

/// Frame-rate / duration defaults for video templates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDefaults {
    pub fps: i64,
    pub seconds: f64,
}

/// Template-family rules the mapper applies on top of the role table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MappingProfile {
    pub seed_policy: SeedPolicy,
    /// `Some` when the template produces video and needs a frame length.
    pub frame_defaults: Option<FrameDefaults>,
}

/// Resolved role -> node id table. Unbound roles are left untouched by
/// the mapper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeRoleBinding {
    pub positive_text: Option<NodeId>,
    pub negative_text: Option<NodeId>,
    pub size_source: Option<NodeId>,
    /// Coarse / high-resolution pass (or the only sampler).
    pub sampler_primary: Option<NodeId>,
    /// Fine / low-resolution pass.
    pub sampler_secondary: Option<NodeId>,
    pub frame_rate: Option<NodeId>,
    pub image_input: Option<NodeId>,
    /// Output writers sharing the logical filename prefix.
    pub outputs: Vec<NodeId>,
    pub profile: MappingProfile,
}

impl NodeRoleBinding {
    /// Bound sampler ids, primary first.
    pub fn samplers(&self) -> impl Iterator<Item = &NodeId> {
        self.sampler_primary.iter().chain(self.sampler_secondary.iter())
    }
}

/// Capability shared by both resolution strategies.
pub trait NodeResolver {
    fn resolve(&self, graph: &WorkflowGraph) -> Result<NodeRoleBinding, CoreError>;
}

// ---------------------------------------------------------------------------
// Fixed-convention resolution
// ---------------------------------------------------------------------------

/// Hard-coded role table for one known workflow shape.
#[derive(Debug, Clone, Copy)]
pub struct FixedConvention {
    pub name: &'static str,
    /// Ids that must exist, in the order they are checked.
    pub required: &'static [&'static str],
    pub positive_text: Option<&'static str>,
    pub negative_text: Option<&'static str>,
    pub size_source: Option<&'static str>,
    pub sampler_primary: Option<&'static str>,
    pub sampler_secondary: Option<&'static str>,
    pub frame_rate: Option<&'static str>,
    pub image_input: Option<&'static str>,
    pub outputs: &'static [&'static str],
    pub profile: MappingProfile,
}

/// Merged-sampler video workflow (two coupled KSampler passes).
pub const MERGED_VIDEO: FixedConvention = FixedConvention {
    name: "merged-video",
    required: &["72", "74", "78", "80", "81", "88", "89"],
    positive_text: Some("89"),
    negative_text: Some("72"),
    size_source: Some("74"),
    sampler_primary: Some("81"),
    sampler_secondary: Some("78"),
    frame_rate: Some("88"),
    image_input: None,
    outputs: &["80", "90", "100", "110"],
    profile: MappingProfile {
        seed_policy: SeedPolicy::PerStage,
        frame_defaults: Some(FrameDefaults { fps: 20, seconds: 5.0 }),
    },
};

/// Dedicated image-to-video workflow. Sampler ids 85/86 are optional.
pub const IMAGE_TO_VIDEO: FixedConvention = FixedConvention {
    name: "image-to-video",
    required: &["93", "89", "98", "94", "97", "108"],
    positive_text: Some("93"),
    negative_text: Some("89"),
    size_source: Some("98"),
    sampler_primary: Some("85"),
    sampler_secondary: Some("86"),
    frame_rate: Some("94"),
    image_input: Some("97"),
    outputs: &["108"],
    profile: MappingProfile {
        seed_policy: SeedPolicy::PerStage,
        frame_defaults: Some(FrameDefaults { fps: 20, seconds: 6.0 }),
    },
};

/// Resolves roles from a [`FixedConvention`] table.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver {
    convention: FixedConvention,
}

impl FixedResolver {
    pub fn new(convention: FixedConvention) -> Self {
        Self { convention }
    }

    /// Required ids absent from `graph`, in check order.
    pub fn missing_nodes(&self, graph: &WorkflowGraph) -> Vec<String> {
        self.convention
            .required
            .iter()
            .filter(|id| !graph.contains(id))
            .map(|id| id.to_string())
            .collect()
    }
}

impl NodeResolver for FixedResolver {
    fn resolve(&self, graph: &WorkflowGraph) -> Result<NodeRoleBinding, CoreError> {
        let conv = &self.convention;
        let missing = self.missing_nodes(graph);
        if !missing.is_empty() {
            tracing::error!(
                convention = conv.name,
                ?missing,
                "Workflow is missing required nodes",
            );
            return Err(CoreError::MissingRequiredNode { missing });
        }

        let bind = |id: Option<&'static str>| {
            id.filter(|id| graph.contains(id)).map(str::to_string)
        };

        let binding = NodeRoleBinding {
            positive_text: bind(conv.positive_text),
            negative_text: bind(conv.negative_text),
            size_source: bind(conv.size_source),
            sampler_primary: bind(conv.sampler_primary),
            sampler_secondary: bind(conv.sampler_secondary),
            frame_rate: bind(conv.frame_rate),
            image_input: bind(conv.image_input),
            outputs: conv
                .outputs
                .iter()
                .filter(|id| graph.contains(id))
                .map(|id| id.to_string())
                .collect(),
            profile: conv.profile,
        };

        tracing::debug!(convention = conv.name, ?binding, "Resolved fixed node roles");
        Ok(binding)
    }
}

// ---------------------------------------------------------------------------
// Structural inference
// ---------------------------------------------------------------------------

/// Text encoder class types considered by structural inference.
///
/// `CLIPTextEncodeSDXL` is left out: generic templates using it keep
/// their template text. Dual-field encoders are only written when a
/// fixed convention binds them by id.
const INFERRED_TEXT_CLASSES: &[&str] = &["CLIPTextEncode", "FluxTextEncode", "CLIPTextEncodeFlux"];

/// Title marker for the negative prompt encoder (case-insensitive).
const NEGATIVE_TITLE_MARKER: &str = "negative";

/// Inputs that identify a sampler node.
const SAMPLER_INPUTS: &[&str] = &["sampler_name", "steps", "cfg"];

/// Output class type bound by inference.
const INFERRED_OUTPUT_CLASS: &str = "SaveImage";

/// Infers roles for generic text-to-image templates.
///
/// Nodes are scanned in declaration order and each role is bound to the
/// first matching node.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralResolver;

impl NodeResolver for StructuralResolver {
    fn resolve(&self, graph: &WorkflowGraph) -> Result<NodeRoleBinding, CoreError> {
        let mut binding = NodeRoleBinding::default();

        for (id, node) in graph.iter() {
            let class_type = node.class_type.as_str();

            if INFERRED_TEXT_CLASSES.contains(&class_type) {
                let is_negative = node
                    .title()
                    .is_some_and(|t| t.to_lowercase().contains(NEGATIVE_TITLE_MARKER));
                if is_negative && binding.negative_text.is_none() {
                    binding.negative_text = Some(id.clone());
                } else if binding.positive_text.is_none() {
                    binding.positive_text = Some(id.clone());
                }
            }

            if binding.size_source.is_none() && node.inputs.has("width") && node.inputs.has("height")
            {
                binding.size_source = Some(id.clone());
            }

            if binding.sampler_primary.is_none()
                && node.family() == NodeFamily::Sampler
                && SAMPLER_INPUTS.iter().any(|f| node.inputs.has(f))
            {
                binding.sampler_primary = Some(id.clone());
            }

            if binding.outputs.is_empty() && class_type == INFERRED_OUTPUT_CLASS {
                binding.outputs.push(id.clone());
            }
        }

        tracing::debug!(?binding, "Inferred node roles");
        Ok(binding)
    }
}

// ---------------------------------------------------------------------------
// Template family selection
// ---------------------------------------------------------------------------

/// Which kind of workflow template is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    /// Text-to-image template of unknown shape.
    Generic,
    /// Merged-sampler video workflow.
    MergedVideo,
    /// Dedicated image-to-video workflow.
    ImageToVideo,
}

impl TemplateFamily {
    pub fn resolver(self) -> Box<dyn NodeResolver + Send + Sync> {
        match self {
            Self::Generic => Box::new(StructuralResolver),
            Self::MergedVideo => Box::new(FixedResolver::new(MERGED_VIDEO)),
            Self::ImageToVideo => Box::new(FixedResolver::new(IMAGE_TO_VIDEO)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::MergedVideo => "merged",
            Self::ImageToVideo => "i2v",
        }
    }
}

impl fmt::Display for TemplateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TemplateFamily {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Self::Generic),
            "merged" => Ok(Self::MergedVideo),
            "i2v" => Ok(Self::ImageToVideo),
            other => Err(CoreError::Validation(format!(
                "Unknown template family '{other}'. Must be one of: generic, merged, i2v"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
