use serde_json::Value;

/// Serde-facing transform entry as it appears in layer configs:
/// `{"match": "...", "action": "...", "params": {...}}`.
///
/// `match` gates application: the transform runs only when it equals the
/// owning layer's name case-insensitively. Param values may be JSON numbers
/// or strings (form-field exports), and are parsed leniently with per-param
/// defaults; an unknown `action` simply parses to no transform.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TransformSpec {
    #[serde(rename = "match", default)]
    pub match_name: String,
    #[serde(default)]
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// The closed set of geometric layer transforms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransformAction {
    /// Degrees counter-clockwise about the canvas center; canvas size
    /// unchanged, vacated area transparent.
    Rotate { angle_deg: f32 },
    Flip { direction: FlipDirection },
    /// Toroidal pixel shift; positive dx moves right, positive dy moves down.
    Roll { dx: i64, dy: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipDirection {
    Horizontal,
    Vertical,
}

impl TransformSpec {
    /// Whether this transform applies to a layer with the given name.
    pub fn applies_to(&self, layer_name: &str) -> bool {
        self.match_name.eq_ignore_ascii_case(layer_name)
    }

    /// Parses the action/params pair into a typed action. Unknown actions
    /// yield `None`; missing or malformed params fall back to defaults
    /// (angle 0, horizontal, zero offsets).
    pub fn parse(&self) -> Option<TransformAction> {
        match self.action.trim().to_ascii_lowercase().as_str() {
            "rotate" => Some(TransformAction::Rotate {
                angle_deg: param_f32(&self.params, "angle").unwrap_or(0.0),
            }),
            "flip" => {
                let direction = match param_str(&self.params, "direction") {
                    Some(d) if d.eq_ignore_ascii_case("vertical") => FlipDirection::Vertical,
                    _ => FlipDirection::Horizontal,
                };
                Some(TransformAction::Flip { direction })
            }
            "roll" => Some(TransformAction::Roll {
                dx: param_i64(&self.params, "x_offset").unwrap_or(0),
                dy: param_i64(&self.params, "y_offset").unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// The transforms that actually apply to `layer_name`, in list order.
pub fn applicable_transforms(specs: &[TransformSpec], layer_name: &str) -> Vec<TransformAction> {
    specs
        .iter()
        .filter(|t| t.applies_to(layer_name))
        .filter_map(TransformSpec::parse)
        .collect()
}

fn param_f32(params: &Value, key: &str) -> Option<f32> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn param_i64(params: &Value, key: &str) -> Option<i64> {
    match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(action: &str, params: Value) -> TransformSpec {
        TransformSpec {
            match_name: "layer".to_string(),
            action: action.to_string(),
            params,
        }
    }

    #[test]
    fn parses_rotate_from_number_or_string() {
        let a = spec("rotate", serde_json::json!({ "angle": 90 }));
        let b = spec("rotate", serde_json::json!({ "angle": "90" }));
        assert_eq!(a.parse(), Some(TransformAction::Rotate { angle_deg: 90.0 }));
        assert_eq!(a.parse(), b.parse());
    }

    #[test]
    fn rotate_without_angle_defaults_to_zero() {
        let t = spec("rotate", serde_json::json!({}));
        assert_eq!(t.parse(), Some(TransformAction::Rotate { angle_deg: 0.0 }));
    }

    #[test]
    fn flip_defaults_to_horizontal() {
        let t = spec("flip", serde_json::json!({}));
        assert_eq!(
            t.parse(),
            Some(TransformAction::Flip {
                direction: FlipDirection::Horizontal
            })
        );
        let v = spec("flip", serde_json::json!({ "direction": "Vertical" }));
        assert_eq!(
            v.parse(),
            Some(TransformAction::Flip {
                direction: FlipDirection::Vertical
            })
        );
    }

    #[test]
    fn roll_reads_offsets() {
        let t = spec("roll", serde_json::json!({ "x_offset": "3", "y_offset": -2 }));
        assert_eq!(t.parse(), Some(TransformAction::Roll { dx: 3, dy: -2 }));
    }

    #[test]
    fn unknown_action_is_dropped() {
        let t = spec("sharpen", serde_json::json!({}));
        assert_eq!(t.parse(), None);
    }

    #[test]
    fn match_is_case_insensitive() {
        let mut t = spec("rotate", serde_json::json!({ "angle": 1 }));
        t.match_name = "Beauty".to_string();
        assert!(t.applies_to("beauty"));
        assert!(!t.applies_to("ao"));
        let actions = applicable_transforms(std::slice::from_ref(&t), "BEAUTY");
        assert_eq!(actions.len(), 1);
    }
}
