//! Legacy flat parameter strings.
//!
//! ```text
//! positive prompt
//! Negative prompt: negative prompt
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 12345, Size: 512x768, Model: foo
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

use crate::GenerationParams;

const NEGATIVE_MARKER: &str = "Negative prompt:";

static STEPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Steps:\s*(\d+)").expect("steps regex"));
static SAMPLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Sampler:\s*([^,\n]+)").expect("sampler regex"));
static CFG_SCALE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"CFG scale:\s*([\d.]+)").expect("cfg regex"));
static SEED: Lazy<Regex> = Lazy::new(|| Regex::new(r"Seed:\s*(\d+)").expect("seed regex"));
static SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Size:\s*(\d+)x(\d+)").expect("size regex"));
static MODEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bModel:\s*([^\n,]+)").expect("model regex"));
/// Start of the trailing `Steps: N, ...` line.
static PARAMS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Steps:\s*\d").expect("params line regex"));

pub fn parse(raw: &str) -> GenerationParams {
    let mut params = GenerationParams::default();

    params.steps = capture(&STEPS, raw);
    params.sampler = capture(&SAMPLER, raw);
    params.cfg_scale = capture(&CFG_SCALE, raw);
    params.seed = capture(&SEED, raw);
    params.model = capture(&MODEL, raw);
    if let Some(size) = SIZE.captures(raw) {
        params.width = size[1].parse().ok();
        params.height = size[2].parse().ok();
    }

    match raw.split_once(NEGATIVE_MARKER) {
        Some((positive, rest)) => {
            params.prompt = positive.trim().to_string();
            params.negative_prompt = strip_params_line(rest).trim().to_string();
        }
        None => {
            params.prompt = strip_params_line(raw).trim().to_string();
        }
    }

    params
}

fn capture(re: &Regex, raw: &str) -> String {
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn strip_params_line(text: &str) -> &str {
    match PARAMS_LINE.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_parameter_block() {
        let meta = parse(
            "beautiful landscape, mountains\nNegative prompt: ugly, blurry\nSteps: 20, Sampler: Euler a, CFG scale: 7.5, Seed: 12345, Size: 512x768, Model: sd_xl_base",
        );
        assert_eq!(meta.prompt, "beautiful landscape, mountains");
        assert_eq!(meta.negative_prompt, "ugly, blurry");
        assert_eq!(meta.steps, "20");
        assert_eq!(meta.sampler, "Euler a");
        assert_eq!(meta.cfg_scale, "7.5");
        assert_eq!(meta.seed, "12345");
        assert_eq!(meta.width, Some(512));
        assert_eq!(meta.height, Some(768));
        assert_eq!(meta.model, "sd_xl_base");
    }

    #[test]
    fn params_without_negative() {
        let meta = parse("a cat on a mat\nSteps: 30, Sampler: DPM++ 2M, CFG scale: 12, Seed: 99999");
        assert_eq!(meta.prompt, "a cat on a mat");
        assert!(meta.negative_prompt.is_empty());
        assert_eq!(meta.steps, "30");
        assert_eq!(meta.sampler, "DPM++ 2M");
    }

    #[test]
    fn prompt_only() {
        let meta = parse("just a prompt with no params");
        assert_eq!(meta.prompt, "just a prompt with no params");
        assert!(meta.steps.is_empty());
        assert!(meta.width.is_none());
    }

    #[test]
    fn model_hash_is_not_model() {
        let meta = parse("x\nSteps: 5, Model hash: abc123, Model: real_model");
        assert_eq!(meta.model, "real_model");
    }

    #[test]
    fn negative_without_params_line() {
        let meta = parse("sunset\nNegative prompt: lowres");
        assert_eq!(meta.prompt, "sunset");
        assert_eq!(meta.negative_prompt, "lowres");
    }
}
