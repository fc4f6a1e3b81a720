//! Parameter application.
//!
//! [`apply`] writes a [`ParameterSet`] into the nodes named by a
//! [`NodeRoleBinding`] and returns a new graph. The template is never
//! modified. Only fields a node already exposes are written; absent
//! parameters leave the template value in place.
//!
//! All values are coerced before the first write, so a bad parameter
//! fails the whole call instead of producing a half-mapped graph.

use serde_json::Value;

use crate::error::CoreError;
use crate::graph::WorkflowGraph;
use crate::params::{self, ParameterSet};
use crate::resolver::{NodeRoleBinding, SeedPolicy};

/// Number of frames for a clip: `max(1, round(fps * seconds))`.
///
/// Halfway cases round to even.
pub fn frame_length(fps: i64, seconds: f64) -> i64 {
    let frames = (fps as f64 * seconds).round_ties_even();
    frames.max(1.0) as i64
}

/// Coerced parameter values, read once per [`apply`] call.
#[derive(Debug, Default)]
struct MappedValues {
    prompt: Option<String>,
    negative_prompt: Option<String>,
    prompt_part_a: Option<String>,
    prompt_part_b: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    fps: Option<i64>,
    length: Option<i64>,
    steps: Option<i64>,
    cfg_scale: Option<f64>,
    sampler: Option<String>,
    scheduler: Option<String>,
    seed_primary: Option<u64>,
    seed_secondary: Option<u64>,
    prefix: Option<String>,
    image: Option<String>,
}

impl MappedValues {
    fn collect(params: &ParameterSet, binding: &NodeRoleBinding) -> Result<Self, CoreError> {
        let profile = binding.profile;

        let (fps, length) = match profile.frame_defaults {
            Some(defaults) => {
                let fps = params.integer(params::FPS)?.unwrap_or(defaults.fps);
                let seconds = params.float(params::SECONDS)?.unwrap_or(defaults.seconds);
                (Some(fps), Some(frame_length(fps, seconds)))
            }
            None => (None, None),
        };

        let (seed_primary, seed_secondary) = match profile.seed_policy {
            SeedPolicy::Single => (params.seed(params::SEED)?, None),
            SeedPolicy::PerStage => (
                params.seed(params::SEED_HIGH)?,
                params.seed(params::SEED_LOW)?,
            ),
        };

        let image = match binding.image_input {
            Some(_) => Some(
                params
                    .text(params::REFERENCE_IMAGE_NAME)?
                    .ok_or(CoreError::MissingParameter(params::REFERENCE_IMAGE_NAME))?,
            ),
            None => None,
        };

        Ok(Self {
            prompt: params.text(params::PROMPT)?,
            negative_prompt: params.text(params::NEGATIVE_PROMPT)?,
            prompt_part_a: params.text(params::PROMPT_PART_A)?,
            prompt_part_b: params.text(params::PROMPT_PART_B)?,
            width: params.integer(params::WIDTH)?,
            height: params.integer(params::HEIGHT)?,
            fps,
            length,
            steps: params.integer(params::STEPS)?,
            cfg_scale: params.float(params::CFG_SCALE)?,
            sampler: params.text(params::SAMPLER)?,
            scheduler: params.text(params::SCHEDULER)?,
            seed_primary,
            seed_secondary,
            prefix: params.text(params::PREFIX)?,
            image,
        })
    }
}

/// Apply `params` to a copy of `template` using the resolved roles.
pub fn apply(
    template: &WorkflowGraph,
    binding: &NodeRoleBinding,
    params: &ParameterSet,
) -> Result<WorkflowGraph, CoreError> {
    let values = MappedValues::collect(params, binding)?;
    let mut graph = template.clone();

    if let Some(id) = &binding.positive_text {
        write_text(
            &mut graph,
            id,
            values.prompt.as_deref(),
            values.prompt_part_a.as_deref(),
            values.prompt_part_b.as_deref(),
        );
    }
    // The negative encoder has no split parts: both dual fields get the
    // full negative prompt.
    if let Some(id) = &binding.negative_text {
        write_text(&mut graph, id, values.negative_prompt.as_deref(), None, None);
    }

    if let Some(id) = &binding.size_source {
        write_opt(&mut graph, id, "width", values.width.map(Value::from));
        write_opt(&mut graph, id, "height", values.height.map(Value::from));
        write_opt(&mut graph, id, "length", values.length.map(Value::from));
    }

    if let Some(id) = &binding.frame_rate {
        write_opt(&mut graph, id, "fps", values.fps.map(Value::from));
    }

    let stages = [
        (&binding.sampler_primary, values.seed_primary),
        (&binding.sampler_secondary, values.seed_secondary),
    ];
    for (id, seed) in stages {
        if let Some(id) = id {
            write_sampler(&mut graph, id, &values, seed);
        }
    }

    if let Some(prefix) = &values.prefix {
        for id in &binding.outputs {
            write(&mut graph, id, "filename_prefix", Value::from(prefix.as_str()));
        }
    }

    if let (Some(id), Some(image)) = (&binding.image_input, &values.image) {
        write(&mut graph, id, "image", Value::from(image.as_str()));
    }

    Ok(graph)
}

/// Write prompt text into a single-field or dual-field encoder.
///
/// `text` takes the combined prompt; `text_g` / `text_l` take the split
/// parts when given, else the combined prompt.
fn write_text(
    graph: &mut WorkflowGraph,
    id: &str,
    combined: Option<&str>,
    part_a: Option<&str>,
    part_b: Option<&str>,
) {
    write_opt(graph, id, "text", combined.map(Value::from));
    write_opt(graph, id, "text_g", part_a.or(combined).map(Value::from));
    write_opt(graph, id, "text_l", part_b.or(combined).map(Value::from));
}

fn write_sampler(graph: &mut WorkflowGraph, id: &str, values: &MappedValues, seed: Option<u64>) {
    for field in ["steps", "num_steps"] {
        write_opt(graph, id, field, values.steps.map(Value::from));
    }
    for field in ["cfg", "guidance"] {
        write_opt(graph, id, field, values.cfg_scale.map(Value::from));
    }
    for field in ["sampler_name", "sampler"] {
        write_opt(graph, id, field, values.sampler.as_deref().map(Value::from));
    }
    write_opt(graph, id, "scheduler", values.scheduler.as_deref().map(Value::from));
    for field in ["noise_seed", "seed"] {
        write_opt(graph, id, field, seed.map(Value::from));
    }
}

fn write_opt(graph: &mut WorkflowGraph, id: &str, field: &str, value: Option<Value>) {
    if let Some(value) = value {
        write(graph, id, field, value);
    }
}

/// Overwrite `field` on node `id` if the node exposes it.
fn write(graph: &mut WorkflowGraph, id: &str, field: &str, value: Value) {
    let Some(node) = graph.get_mut(id) else {
        return;
    };
    if node.inputs.set(field, value) {
        tracing::debug!(node_id = id, field, "Applied workflow parameter");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{
        FixedResolver, NodeResolver, StructuralResolver, IMAGE_TO_VIDEO, MERGED_VIDEO,
    };
    use assert_matches::assert_matches;
    use serde_json::json;

    fn graph(value: Value) -> WorkflowGraph {
        WorkflowGraph::from_value(&value).unwrap()
    }

    fn input(graph: &WorkflowGraph, id: &str, field: &str) -> Value {
        graph.get(id).unwrap().inputs.field(field).cloned().unwrap_or(Value::Null)
    }

    fn generic_json() -> Value {
        json!({
            "6": {
                "class_type": "CLIPTextEncode",
                "_meta": { "title": "Positive Prompt" },
                "inputs": { "text": "template positive", "clip": ["4", 1] }
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "_meta": { "title": "Negative Prompt" },
                "inputs": { "text": "template negative", "clip": ["4", 1] }
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": 1024, "height": 768, "batch_size": 1 }
            },
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 1, "steps": 20, "cfg": 7.0,
                    "sampler_name": "dpmpp_2m", "scheduler": "normal",
                    "model": ["4", 0]
                }
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": { "filename_prefix": "ComfyUI", "images": ["8", 0] }
            }
        })
    }

    fn merged_json() -> Value {
        json!({
            "72": { "class_type": "CLIPTextEncode", "inputs": { "text": "neg" } },
            "74": { "class_type": "WanImageToVideo", "inputs": { "width": 640, "height": 360, "length": 81 } },
            "78": { "class_type": "KSamplerAdvanced", "inputs": { "noise_seed": 1, "steps": 4, "cfg": 1.0, "sampler_name": "euler", "scheduler": "simple" } },
            "80": { "class_type": "SaveVideo", "inputs": { "filename_prefix": "video/a", "format": "auto" } },
            "81": { "class_type": "KSamplerAdvanced", "inputs": { "noise_seed": 2, "steps": 4, "cfg": 1.0, "sampler_name": "euler", "scheduler": "simple" } },
            "88": { "class_type": "CreateVideo", "inputs": { "fps": 16 } },
            "89": { "class_type": "CLIPTextEncode", "inputs": { "text": "pos" } },
            "90": { "class_type": "SaveImage", "inputs": { "filename_prefix": "frames/a" } },
            "100": { "class_type": "PreviewImage", "inputs": { "images": ["8", 0] } }
        })
    }

    fn apply_generic(template: &WorkflowGraph, params: &ParameterSet) -> Result<WorkflowGraph, CoreError> {
        let binding = StructuralResolver.resolve(template).unwrap();
        apply(template, &binding, params)
    }

    // -- frame_length --

    #[test]
    fn frame_length_rounds_and_clamps() {
        assert_eq!(frame_length(20, 6.0), 120);
        assert_eq!(frame_length(24, 5.01), 120);
        assert_eq!(frame_length(1, 0.1), 1);
        assert_eq!(frame_length(20, 0.0), 1);
        assert_eq!(frame_length(1, 2.5), 2);
    }

    // -- purity --

    #[test]
    fn apply_never_mutates_template() {
        let template = graph(generic_json());
        let before = template.clone();
        let params = ParameterSet::new()
            .with(params::PROMPT, "a cat")
            .with(params::WIDTH, 512)
            .with(params::STEPS, 9)
            .with(params::PREFIX, "run/x");
        let out = apply_generic(&template, &params).unwrap();
        assert_eq!(template, before);
        assert_ne!(out, template);
    }

    #[test]
    fn empty_params_leave_generic_graph_unchanged() {
        let template = graph(generic_json());
        let out = apply_generic(&template, &ParameterSet::new()).unwrap();
        assert_eq!(out, template);
    }

    #[test]
    fn omitted_fields_keep_template_values() {
        let template = graph(generic_json());
        let params = ParameterSet::new().with(params::WIDTH, 512).with(params::CFG_SCALE, 4.5);
        let out = apply_generic(&template, &params).unwrap();
        assert_eq!(input(&out, "5", "width"), json!(512));
        assert_eq!(input(&out, "5", "height"), json!(768));
        assert_eq!(input(&out, "3", "cfg"), json!(4.5));
        assert_eq!(input(&out, "3", "steps"), json!(20));
        assert_eq!(input(&out, "3", "seed"), json!(1));
        assert_eq!(input(&out, "6", "text"), json!("template positive"));
    }

    // -- text --

    #[test]
    fn generic_writes_positive_and_negative_text() {
        let template = graph(generic_json());
        let params = ParameterSet::new()
            .with(params::PROMPT, "a lighthouse")
            .with(params::NEGATIVE_PROMPT, "blurry");
        let out = apply_generic(&template, &params).unwrap();
        assert_eq!(input(&out, "6", "text"), json!("a lighthouse"));
        assert_eq!(input(&out, "7", "text"), json!("blurry"));
    }

    #[test]
    fn dual_field_encoder_takes_parts_then_combined_prompt() {
        let template = graph(json!({
            "1": { "class_type": "CLIPTextEncodeSDXL", "inputs": { "text_g": "g", "text_l": "l" } },
            "2": { "class_type": "CLIPTextEncodeSDXL", "inputs": { "text_g": "ng", "text_l": "nl" } }
        }));
        let binding = NodeRoleBinding {
            positive_text: Some("1".into()),
            negative_text: Some("2".into()),
            ..Default::default()
        };

        let split = ParameterSet::new()
            .with(params::PROMPT, "whole")
            .with(params::PROMPT_PART_A, "subject")
            .with(params::NEGATIVE_PROMPT, "bad");
        let out = apply(&template, &binding, &split).unwrap();
        assert_eq!(input(&out, "1", "text_g"), json!("subject"));
        assert_eq!(input(&out, "1", "text_l"), json!("whole"));
        assert_eq!(input(&out, "2", "text_g"), json!("bad"));
        assert_eq!(input(&out, "2", "text_l"), json!("bad"));
        assert!(!out.get("1").unwrap().inputs.has("text"));
    }

    // -- sampling --

    #[test]
    fn sampler_fields_follow_node_variants() {
        let template = graph(json!({
            "3": {
                "class_type": "XlabsSampler",
                "inputs": { "sampler": "euler", "guidance": 3.5, "num_steps": 20, "noise_seed": 5 }
            }
        }));
        let binding = NodeRoleBinding {
            sampler_primary: Some("3".into()),
            ..Default::default()
        };
        let params = ParameterSet::new()
            .with(params::SAMPLER, "heun")
            .with(params::CFG_SCALE, "2.5")
            .with(params::STEPS, 12.0)
            .with(params::SEED, 77);
        let out = apply(&template, &binding, &params).unwrap();
        assert_eq!(input(&out, "3", "sampler"), json!("heun"));
        assert_eq!(input(&out, "3", "guidance"), json!(2.5));
        assert_eq!(input(&out, "3", "num_steps"), json!(12));
        assert_eq!(input(&out, "3", "noise_seed"), json!(77));
        assert!(!out.get("3").unwrap().inputs.has("cfg"));
    }

    #[test]
    fn per_stage_seeds_are_never_conflated() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new()
            .with(params::SEED, 999)
            .with(params::SEED_HIGH, 11)
            .with(params::SEED_LOW, 22);
        let out = apply(&template, &binding, &params).unwrap();
        assert_eq!(input(&out, "81", "noise_seed"), json!(11));
        assert_eq!(input(&out, "78", "noise_seed"), json!(22));
    }

    #[test]
    fn per_stage_seeds_keep_full_unsigned_range() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new()
            .with(params::SEED_HIGH, 12_345_678_901_234_567_890u64)
            .with(params::SEED_LOW, u64::MAX);
        let out = apply(&template, &binding, &params).unwrap();
        assert_eq!(input(&out, "81", "noise_seed"), json!(12_345_678_901_234_567_890u64));
        assert_eq!(input(&out, "78", "noise_seed"), json!(u64::MAX));
    }

    #[test]
    fn negative_seed_is_a_coercion_error() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new().with(params::SEED_LOW, -5);
        assert_matches!(
            apply(&template, &binding, &params),
            Err(CoreError::ParameterCoercion { ref param, .. }) if param == "seed_low"
        );
    }

    #[test]
    fn merged_sampler_settings_apply_to_both_passes() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new()
            .with(params::SAMPLER, "dpmpp_2m")
            .with(params::SCHEDULER, "karras")
            .with(params::STEPS, 6)
            .with(params::CFG_SCALE, 3);
        let out = apply(&template, &binding, &params).unwrap();
        for id in ["78", "81"] {
            assert_eq!(input(&out, id, "sampler_name"), json!("dpmpp_2m"));
            assert_eq!(input(&out, id, "scheduler"), json!("karras"));
            assert_eq!(input(&out, id, "steps"), json!(6));
            assert_eq!(input(&out, id, "cfg"), json!(3.0));
        }
    }

    // -- duration --

    #[test]
    fn merged_defaults_fps_and_five_second_length() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let out = apply(&template, &binding, &ParameterSet::new()).unwrap();
        assert_eq!(input(&out, "88", "fps"), json!(20));
        assert_eq!(input(&out, "74", "length"), json!(100));
        assert_eq!(input(&out, "74", "width"), json!(640));
    }

    #[test]
    fn explicit_fps_and_seconds_drive_length() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new().with(params::FPS, 24).with(params::SECONDS, 5.01);
        let out = apply(&template, &binding, &params).unwrap();
        assert_eq!(input(&out, "88", "fps"), json!(24));
        assert_eq!(input(&out, "74", "length"), json!(120));
    }

    // -- output prefix --

    #[test]
    fn prefix_reaches_every_known_output_and_nothing_else() {
        let template = graph(merged_json());
        let binding = FixedResolver::new(MERGED_VIDEO).resolve(&template).unwrap();
        let params = ParameterSet::new().with(params::PREFIX, "run42/iter0003/image");
        let out = apply(&template, &binding, &params).unwrap();

        assert_eq!(input(&out, "80", "filename_prefix"), json!("run42/iter0003/image"));
        assert_eq!(input(&out, "90", "filename_prefix"), json!("run42/iter0003/image"));
        assert_eq!(input(&out, "80", "format"), json!("auto"));
        assert!(!out.get("100").unwrap().inputs.has("filename_prefix"));

        // Only the fps/length defaults and the prefixes differ.
        for id in ["72", "78", "81", "89", "100"] {
            assert_eq!(out.get(id), template.get(id), "node {id} changed");
        }
    }

    // -- image reference --

    #[test]
    fn image_to_video_requires_reference_image() {
        let template = graph(json!({
            "93": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
            "89": { "class_type": "CLIPTextEncode", "inputs": { "text": "" } },
            "98": { "class_type": "WanImageToVideo", "inputs": { "width": 832, "height": 480, "length": 81 } },
            "94": { "class_type": "CreateVideo", "inputs": { "fps": 16 } },
            "97": { "class_type": "LoadImage", "inputs": { "image": "example.png" } },
            "108": { "class_type": "SaveVideo", "inputs": { "filename_prefix": "video/ComfyUI" } }
        }));
        let binding = FixedResolver::new(IMAGE_TO_VIDEO).resolve(&template).unwrap();

        assert_matches!(
            apply(&template, &binding, &ParameterSet::new()),
            Err(CoreError::MissingParameter("reference_image_name"))
        );

        let params = ParameterSet::new()
            .with(params::REFERENCE_IMAGE_NAME, "run_1_iter_0001_image.png")
            .with(params::WIDTH, 960)
            .with(params::HEIGHT, 540);
        let out = apply(&template, &binding, &params).unwrap();
        assert_eq!(input(&out, "97", "image"), json!("run_1_iter_0001_image.png"));
        assert_eq!(input(&out, "98", "width"), json!(960));
        assert_eq!(input(&out, "98", "length"), json!(120));
        assert_eq!(input(&out, "94", "fps"), json!(20));
    }

    // -- coercion --

    #[test]
    fn coercion_failure_is_reported_and_nothing_is_written() {
        let template = graph(generic_json());
        let params = ParameterSet::new()
            .with(params::PROMPT, "ok")
            .with(params::WIDTH, "wide");
        assert_matches!(
            apply_generic(&template, &params),
            Err(CoreError::ParameterCoercion { ref param, .. }) if param == "width"
        );
    }
}
