//! Reference parameter combinations for the video stage.
//!
//! The file is either a JSON list of parameter objects, or an object that
//! holds such a list under one of [`LIST_KEYS`]. Entries may wrap their
//! parameters in a `params` object.

use std::path::Path;

use serde_json::Value;
use t2i2v_core::params::ParameterSet;

/// Object keys searched, in order, for the reference list.
pub const LIST_KEYS: &[&str] = &[
    "reference_combinations",
    "params_list",
    "combos",
    "list",
    "reference_videos",
];

/// Load reference parameter sets from `path`.
///
/// A missing, unreadable or unrecognised file yields an empty list; the
/// video stage then runs on built-in defaults.
pub fn load_reference_params(path: &Path) -> Vec<ParameterSet> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Reference parameters unavailable, using defaults");
            return Vec::new();
        }
    };
    let doc: Value = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Reference parameters are not valid JSON, using defaults");
            return Vec::new();
        }
    };

    let refs = parse_reference_list(&doc);
    if refs.is_empty() {
        tracing::warn!(path = %path.display(), "Reference parameter list is empty, using defaults");
    } else {
        tracing::info!(path = %path.display(), count = refs.len(), "Loaded reference parameters");
    }
    refs
}

/// Normalise an already-parsed reference document.
pub fn parse_reference_list(doc: &Value) -> Vec<ParameterSet> {
    let items = match doc {
        Value::Array(items) => Some(items),
        Value::Object(obj) => LIST_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    };

    items
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let obj = item.as_object()?;
            match obj.get("params") {
                Some(Value::Object(inner)) => Some(inner.clone()),
                Some(_) => None,
                None => Some(obj.clone()),
            }
        })
        .map(ParameterSet::from_map)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_list_is_used_as_is() {
        let refs = parse_reference_list(&json!([{ "steps": 6 }, { "sampler": "dpmpp" }]));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].integer("steps").unwrap(), Some(6));
    }

    #[test]
    fn params_wrapper_is_unwrapped_and_non_objects_skipped() {
        let refs = parse_reference_list(&json!([
            { "params": { "cfg_scale": 2.5 }, "score": 0.9 },
            "junk",
            7,
            { "fps": 24 }
        ]));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].float("cfg_scale").unwrap(), Some(2.5));
        assert!(!refs[0].contains("score"));
        assert_eq!(refs[1].integer("fps").unwrap(), Some(24));
    }

    #[test]
    fn first_known_key_wins() {
        let refs = parse_reference_list(&json!({
            "notes": "ignored",
            "combos": [{ "steps": 4 }],
            "reference_combinations": [{ "steps": 10 }, { "steps": 12 }]
        }));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].integer("steps").unwrap(), Some(10));
    }

    #[test]
    fn reference_videos_key_is_supported() {
        let refs = parse_reference_list(&json!({
            "reference_videos": [{ "params": { "scheduler": "beta" } }]
        }));
        assert_eq!(refs[0].text("scheduler").unwrap().as_deref(), Some("beta"));
    }

    #[test]
    fn unknown_shapes_yield_empty_list() {
        assert!(parse_reference_list(&json!({ "other": [] })).is_empty());
        assert!(parse_reference_list(&json!("text")).is_empty());
    }

    #[test]
    fn missing_file_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_reference_params(&dir.path().join("absent.json")).is_empty());
    }

    #[test]
    fn invalid_json_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_reference_params(&path).is_empty());
    }

    #[test]
    fn file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(&path, r#"{"params_list":[{"steps":8,"sampler":"euler"}]}"#).unwrap();
        let refs = load_reference_params(&path);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].text("sampler").unwrap().as_deref(), Some("euler"));
    }
}
