//! Deep merge of layered YAML configuration.
//!
//! # Merge Rules
//!
//! - Mappings merge recursively
//! - Sequences are replaced wholesale (a local `depends_on` is the full list)
//! - `null` in the overlay removes the key from the base
//! - Scalars in the overlay win

use serde_yaml::Value;

/// Deep merge `overlay` on top of `base`.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    result.remove(key);
                } else if let Some(base_value) = base_map.get(key) {
                    result.insert(key.clone(), deep_merge(base_value, overlay_value));
                } else {
                    result.insert(key.clone(), overlay_value.clone());
                }
            }
            Value::Mapping(result)
        }
        // An empty local file parses to null and changes nothing.
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}

/// Merge configs in order; the last has the highest priority.
pub fn merge_configs(configs: &[Value]) -> Value {
    configs
        .iter()
        .fold(Value::Mapping(Default::default()), |acc, config| {
            deep_merge(&acc, config)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn overlay_replaces_at_conflict_point() {
        let base = yaml(
            r#"
steps:
  segment:
    command: recon-all -all
    resources:
      cpus: 4
"#,
        );
        let overlay = yaml(
            r#"
steps:
  segment:
    resources:
      cpus: 16
"#,
        );

        let result = deep_merge(&base, &overlay);
        assert_eq!(result["steps"]["segment"]["resources"]["cpus"], 16);
        assert_eq!(result["steps"]["segment"]["command"], "recon-all -all");
    }

    #[test]
    fn sequences_are_replaced() {
        let base = yaml("depends_on: [segment, denoise]");
        let overlay = yaml("depends_on: [segment]");

        let result = deep_merge(&base, &overlay);
        let deps = result["depends_on"].as_sequence().unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0], "segment");
    }

    #[test]
    fn null_removes_key() {
        let base = yaml("scheduler:\n  account: lab\n  partition: long\n");
        let overlay = yaml("scheduler:\n  account: null\n");

        let result = deep_merge(&base, &overlay);
        assert!(result["scheduler"].get("account").is_none());
        assert_eq!(result["scheduler"]["partition"], "long");
    }

    #[test]
    fn empty_overlay_keeps_base() {
        let base = yaml("project: study");
        let result = deep_merge(&base, &Value::Null);
        assert_eq!(result["project"], "study");
    }

    #[test]
    fn scalar_overlay_replaces_mapping() {
        let base = yaml("validator:\n  type: marker\n");
        let overlay = yaml("validator: none");
        assert_eq!(deep_merge(&base, &overlay)["validator"], "none");
    }

    #[test]
    fn merge_configs_applies_in_order() {
        let configs = vec![yaml("a: 1\nb: 2"), yaml("b: 3\nc: 4"), yaml("c: 5")];
        let result = merge_configs(&configs);
        assert_eq!(result["a"], 1);
        assert_eq!(result["b"], 3);
        assert_eq!(result["c"], 5);
    }

    #[test]
    fn merge_of_nothing_is_empty_mapping() {
        let result = merge_configs(&[]);
        assert!(result.as_mapping().unwrap().is_empty());
    }
}
