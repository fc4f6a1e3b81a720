//! Typed ComfyUI job graph.
//!
//! A workflow in ComfyUI "API format" is an object keyed by node id,
//! where each node carries a `class_type`, an optional `_meta.title`
//! and an `inputs` object:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "_meta": { "title": "KSampler" },
//!     "inputs": { "seed": 42, "cfg": 7.5, "model": ["4", 0] }
//!   }
//! }
//! ```
//!
//! Inputs are parsed into a per-family struct ([`NodeInputs`]) with the
//! fields the mapper knows how to write declared up front. Everything
//! else (links, widgets of unknown nodes) is carried through untouched.

use indexmap::IndexMap;
use serde::{ser::SerializeMap, Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Opaque node identifier (the object key in the workflow JSON).
pub type NodeId = String;

// ---------------------------------------------------------------------------
// Node class types grouped by operation family
// ---------------------------------------------------------------------------

/// Text encoder class types (prompt conditioning).
pub const TEXT_ENCODER_CLASSES: &[&str] = &[
    "CLIPTextEncode",
    "FluxTextEncode",
    "CLIPTextEncodeFlux",
    "CLIPTextEncodeSDXL",
];

/// Latent/size source class types.
pub const LATENT_SIZE_CLASSES: &[&str] = &[
    "EmptyLatentImage",
    "EmptySD3LatentImage",
    "EmptyHunyuanLatentVideo",
    "WanImageToVideo",
];

/// Output writer class types.
pub const OUTPUT_CLASSES: &[&str] = &[
    "SaveImage",
    "SaveVideo",
    "SaveAnimatedWEBP",
    "VHS_VideoCombine",
];

/// Image loader class type.
pub const LOAD_IMAGE_CLASS: &str = "LoadImage";

/// Frame-to-video assembly class type.
pub const CREATE_VIDEO_CLASS: &str = "CreateVideo";

/// Case-insensitive marker shared by every sampler class
/// (`KSampler`, `KSamplerAdvanced`, ...).
const SAMPLER_CLASS_MARKER: &str = "ksampler";

/// Operation family of a node, derived from its `class_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFamily {
    TextEncoder,
    Sampler,
    LatentSize,
    Output,
    LoadImage,
    VideoAssembly,
    Unknown,
}

impl NodeFamily {
    /// Classify a ComfyUI class type.
    pub fn classify(class_type: &str) -> Self {
        if TEXT_ENCODER_CLASSES.contains(&class_type) {
            Self::TextEncoder
        } else if class_type.to_lowercase().contains(SAMPLER_CLASS_MARKER) {
            Self::Sampler
        } else if LATENT_SIZE_CLASSES.contains(&class_type) {
            Self::LatentSize
        } else if OUTPUT_CLASSES.contains(&class_type) {
            Self::Output
        } else if class_type == LOAD_IMAGE_CLASS {
            Self::LoadImage
        } else if class_type == CREATE_VIDEO_CLASS {
            Self::VideoAssembly
        } else {
            Self::Unknown
        }
    }
}

// ---------------------------------------------------------------------------
// Per-family input structs
// ---------------------------------------------------------------------------

/// Keeps a declared key "present" even when its JSON value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Declares an input struct for one node family. Each listed field is
/// `Some` exactly when the key exists in the template; all other keys
/// land in `other`.
macro_rules! input_family {
    ($(#[$meta:meta])* $name:ident { $($field:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
                pub $field: Option<Value>,
            )*
            /// Inputs not declared for this family (links, extra widgets).
            #[serde(flatten)]
            pub other: Map<String, Value>,
        }

        impl $name {
            fn field(&self, name: &str) -> Option<&Value> {
                match name {
                    $(stringify!($field) => self.$field.as_ref(),)*
                    _ => self.other.get(name),
                }
            }

            fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
                match name {
                    $(stringify!($field) => self.$field.as_mut(),)*
                    _ => self.other.get_mut(name),
                }
            }
        }
    };
}

input_family!(
    /// Inputs of a text encoder (single or dual text fields).
    TextEncoderInputs { text, text_g, text_l }
);

input_family!(
    /// Inputs of a KSampler-family node.
    SamplerInputs {
        steps,
        num_steps,
        cfg,
        guidance,
        sampler_name,
        sampler,
        scheduler,
        seed,
        noise_seed,
    }
);

input_family!(
    /// Inputs of an empty-latent / size source node.
    LatentSizeInputs { width, height, length }
);

input_family!(
    /// Inputs of an output writer.
    OutputInputs { filename_prefix }
);

input_family!(
    /// Inputs of an image loader.
    LoadImageInputs { image }
);

input_family!(
    /// Inputs of a frame-to-video assembly node.
    VideoAssemblyInputs { fps }
);

/// Node inputs, typed by operation family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeInputs {
    TextEncoder(TextEncoderInputs),
    Sampler(SamplerInputs),
    LatentSize(LatentSizeInputs),
    Output(OutputInputs),
    LoadImage(LoadImageInputs),
    VideoAssembly(VideoAssemblyInputs),
    /// Node type not known to the mapper; inputs kept verbatim.
    Unknown(Map<String, Value>),
}

impl NodeInputs {
    /// Parse a raw `inputs` object according to the node's family.
    pub fn parse(class_type: &str, raw: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let value = Value::Object(raw);
        Ok(match NodeFamily::classify(class_type) {
            NodeFamily::TextEncoder => Self::TextEncoder(serde_json::from_value(value)?),
            NodeFamily::Sampler => Self::Sampler(serde_json::from_value(value)?),
            NodeFamily::LatentSize => Self::LatentSize(serde_json::from_value(value)?),
            NodeFamily::Output => Self::Output(serde_json::from_value(value)?),
            NodeFamily::LoadImage => Self::LoadImage(serde_json::from_value(value)?),
            NodeFamily::VideoAssembly => Self::VideoAssembly(serde_json::from_value(value)?),
            NodeFamily::Unknown => match value {
                Value::Object(map) => Self::Unknown(map),
                _ => Self::Unknown(Map::new()),
            },
        })
    }

    /// Look up an input field by name, declared or not.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::TextEncoder(i) => i.field(name),
            Self::Sampler(i) => i.field(name),
            Self::LatentSize(i) => i.field(name),
            Self::Output(i) => i.field(name),
            Self::LoadImage(i) => i.field(name),
            Self::VideoAssembly(i) => i.field(name),
            Self::Unknown(map) => map.get(name),
        }
    }

    /// Mutable access to an existing input field. Never creates a field.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        match self {
            Self::TextEncoder(i) => i.field_mut(name),
            Self::Sampler(i) => i.field_mut(name),
            Self::LatentSize(i) => i.field_mut(name),
            Self::Output(i) => i.field_mut(name),
            Self::LoadImage(i) => i.field_mut(name),
            Self::VideoAssembly(i) => i.field_mut(name),
            Self::Unknown(map) => map.get_mut(name),
        }
    }

    /// Whether the node exposes an input with this name.
    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Overwrite an existing field. Returns `false` (and writes nothing)
    /// when the node does not expose `name`.
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.field_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// The `_meta` block ComfyUI attaches to exported nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A single node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawNode")]
pub struct WorkflowNode {
    /// ComfyUI class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Human label from `_meta.title`, if exported.
    pub meta: Option<NodeMeta>,
    /// Typed input values.
    pub inputs: NodeInputs,
    /// Any other top-level keys, preserved verbatim.
    pub extra: Map<String, Value>,
}

impl WorkflowNode {
    /// The node's `_meta.title`, if any.
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.title.as_deref())
    }

    pub fn family(&self) -> NodeFamily {
        NodeFamily::classify(&self.class_type)
    }
}

#[derive(Deserialize)]
struct RawNode {
    class_type: String,
    #[serde(default)]
    inputs: Map<String, Value>,
    #[serde(rename = "_meta", default)]
    meta: Option<NodeMeta>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let inputs = NodeInputs::parse(&raw.class_type, raw.inputs)?;
        Ok(Self {
            class_type: raw.class_type,
            meta: raw.meta,
            inputs,
            extra: raw.extra,
        })
    }
}

impl Serialize for WorkflowNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("inputs", &self.inputs)?;
        map.serialize_entry("class_type", &self.class_type)?;
        if let Some(meta) = &self.meta {
            map.serialize_entry("_meta", meta)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A ComfyUI job graph: node id -> node, in template declaration order.
///
/// Templates are shared read-only; every parameter application works on
/// a deep copy (see [`crate::mapper::apply`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: IndexMap<NodeId, WorkflowNode>,
}

impl WorkflowGraph {
    /// Build a typed graph from already-parsed workflow JSON.
    pub fn from_value(json: &Value) -> Result<Self, CoreError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CoreError::Validation("Workflow JSON must be an object".to_string()))?;

        if obj.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }

        let mut nodes = IndexMap::with_capacity(obj.len());
        for (node_id, node_value) in obj {
            if node_value.get("class_type").and_then(Value::as_str).is_none() {
                return Err(CoreError::Validation(format!(
                    "Node '{node_id}' is missing required 'class_type' field"
                )));
            }
            let node = WorkflowNode::deserialize(node_value).map_err(|e| {
                CoreError::Validation(format!("Node '{node_id}' is malformed: {e}"))
            })?;
            nodes.insert(node_id.clone(), node);
        }

        Ok(Self { nodes })
    }

    /// Serialize back to ComfyUI API-format JSON.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize workflow: {e}")))
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &WorkflowNode)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// SHA-256 hex digest of the compact JSON form.
    ///
    /// Recorded in run metadata so a run can be traced to the exact
    /// template revision it used.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
