//! Node-graph metadata embedded by graph-based generators.
//!
//! Two shapes exist: the UI workflow (`{"nodes": [{"type", "widgets_values"}]}`)
//! and the API prompt (`{"<id>": {"class_type", "inputs"}}`). Both are reduced
//! to the same [`GenerationParams`] with the same text heuristics.

use serde_json::{Map, Value};

use crate::lenient::{value_to_dimension, value_to_string};
use crate::GenerationParams;

const TEXT_ENCODER: &str = "CLIPTextEncode";
const SAMPLER: &str = "KSampler";
const SAMPLER_ADVANCED: &str = "KSamplerAdvanced";
const LATENT_IMAGE: &str = "EmptyLatentImage";
const CHECKPOINT_LOADER: &str = "CheckpointLoaderSimple";

/// Any of these marks a text candidate as the negative prompt outright.
const NEGATIVE_MARKERS: &[&str] = &["negative", "nsfw", "low quality", "worst quality"];
/// Weaker hints, only consulted when nothing matched [`NEGATIVE_MARKERS`].
const WEAK_NEGATIVE_MARKERS: &[&str] = &[
    "bad",
    "lowres",
    "blurry",
    "deformed",
    "ugly",
    "bad anatomy",
    "low quality",
    "worst quality",
];
/// Widget values that follow the seed on samplers but carry no parameter.
const SEED_CONTROL_MODES: &[&str] = &["fixed", "increment", "decrement", "randomize"];

#[derive(Default)]
struct PromptCandidates {
    positive: String,
    negative: String,
    seen: Vec<String>,
}

impl PromptCandidates {
    fn push(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let lower = text.to_lowercase();
        if NEGATIVE_MARKERS.iter().any(|m| lower.contains(m)) {
            self.negative = text.clone();
        } else if self.positive.is_empty()
            || text.chars().count() > self.positive.chars().count()
        {
            self.positive = text.clone();
        }
        self.seen.push(text);
    }

    fn finish(self, params: &mut GenerationParams) {
        let negative = if self.negative.is_empty() {
            self.seen
                .iter()
                .find(|text| {
                    let lower = text.to_lowercase();
                    **text != self.positive && WEAK_NEGATIVE_MARKERS.iter().any(|m| lower.contains(m))
                })
                .cloned()
                .unwrap_or_default()
        } else {
            self.negative
        };
        params.prompt = self.positive;
        params.negative_prompt = negative;
    }
}

/// Parse a UI workflow. `None` when the text is not JSON or has no node list.
pub fn parse_ui_workflow(raw: &str) -> Option<GenerationParams> {
    let graph: Value = serde_json::from_str(raw).ok()?;
    let nodes = graph.get("nodes")?.as_array()?;

    let mut params = GenerationParams::default();
    let mut candidates = PromptCandidates::default();

    for node in nodes {
        let Some(kind) = node.get("type").and_then(Value::as_str) else {
            continue;
        };
        let widgets = node
            .get("widgets_values")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match kind {
            TEXT_ENCODER => {
                if let Some(first) = widgets.first() {
                    candidates.push(value_to_string(first));
                }
            }
            SAMPLER | SAMPLER_ADVANCED => {
                apply_sampler_widgets(&mut params, widgets, kind == SAMPLER_ADVANCED);
            }
            LATENT_IMAGE if widgets.len() >= 2 => {
                params.width = value_to_dimension(&widgets[0]);
                params.height = value_to_dimension(&widgets[1]);
            }
            CHECKPOINT_LOADER => {
                if let Some(first) = widgets.first() {
                    params.model = value_to_string(first);
                }
            }
            _ => {}
        }
    }

    candidates.finish(&mut params);
    Some(params)
}

/// Widgets are positional: `[seed, (control), steps, cfg, sampler_name, scheduler, ...]`.
/// The advanced sampler prepends an `enable`/`disable` noise switch.
fn apply_sampler_widgets(params: &mut GenerationParams, widgets: &[Value], advanced: bool) {
    let mut values: Vec<&Value> = widgets.iter().collect();
    if advanced
        && matches!(values.first().and_then(|v| v.as_str()), Some("enable" | "disable"))
    {
        values.remove(0);
    }
    if values
        .get(1)
        .and_then(|v| v.as_str())
        .is_some_and(|mode| SEED_CONTROL_MODES.contains(&mode))
    {
        values.remove(1);
    }
    if values.len() < 4 {
        return;
    }

    params.seed = value_to_string(values[0]);
    params.steps = value_to_string(values[1]);
    params.cfg_scale = value_to_string(values[2]);
    params.sampler = value_to_string(values[3]);
}

/// Parse an API prompt graph. `None` unless at least one node has a `class_type`.
pub fn parse_api_prompt(raw: &str) -> Option<GenerationParams> {
    let graph: Map<String, Value> = serde_json::from_str(raw).ok()?;
    if !graph.values().any(|node| node.get("class_type").is_some()) {
        return None;
    }

    let mut params = GenerationParams::default();
    let mut candidates = PromptCandidates::default();

    for node in graph.values() {
        let Some(kind) = node.get("class_type").and_then(Value::as_str) else {
            continue;
        };
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };

        match kind {
            TEXT_ENCODER => {
                if let Some(text) = inputs.get("text").and_then(Value::as_str) {
                    candidates.push(text.to_string());
                }
            }
            SAMPLER | SAMPLER_ADVANCED => {
                if let Some(seed) = scalar(inputs, "seed").or_else(|| scalar(inputs, "noise_seed")) {
                    params.seed = seed;
                }
                if let Some(steps) = scalar(inputs, "steps") {
                    params.steps = steps;
                }
                if let Some(cfg) = scalar(inputs, "cfg") {
                    params.cfg_scale = cfg;
                }
                if let Some(sampler) = scalar(inputs, "sampler_name") {
                    params.sampler = sampler;
                }
            }
            LATENT_IMAGE => {
                params.width = inputs.get("width").and_then(value_to_dimension);
                params.height = inputs.get("height").and_then(value_to_dimension);
            }
            CHECKPOINT_LOADER => {
                if let Some(name) = scalar(inputs, "ckpt_name") {
                    params.model = name;
                }
            }
            _ => {}
        }
    }

    candidates.finish(&mut params);
    Some(params)
}

/// Linked inputs are `[node_id, slot]` arrays; only literal values count.
fn scalar(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    match inputs.get(key)? {
        Value::Array(_) | Value::Object(_) | Value::Null => None,
        other => Some(value_to_string(other)),
    }
}
