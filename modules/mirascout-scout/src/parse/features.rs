//! Feature strings and labelled characteristics.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static RE_ROOMS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*hab\.?").unwrap());
static RE_BATHS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*baños?").unwrap());
static RE_AREA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:[.,]\d+)?)\s*m(?:²|2)").unwrap());

pub const SPEC_ROOMS: &str = "habitaciones";
pub const SPEC_BATHROOMS: &str = "baños";
pub const SPEC_AREA: &str = "superficie";
pub const SPEC_FLOOR: &str = "planta";
pub const SPEC_LIFT: &str = "ascensor";

/// Structural values pulled out of compact feature strings, plus the
/// resulting spec map.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureSummary {
    pub specs: BTreeMap<String, String>,
    pub rooms: Option<i64>,
    pub bathrooms: Option<i64>,
    pub area_m2: Option<f64>,
}

/// Parse compact feature strings such as `"2 hab."`, `"97 m²"` or
/// `"Planta 2ª exterior con ascensor"`.
///
/// Unrecognised strings are kept as flag specs (`"Terraza" -> "true"`).
pub fn parse_feature_strings<S: AsRef<str>>(features: &[S]) -> FeatureSummary {
    let mut summary = FeatureSummary::default();

    for raw in features {
        let feat = raw.as_ref().trim();
        if feat.is_empty() {
            continue;
        }
        let lower = feat.to_lowercase();

        if let Some(caps) = RE_ROOMS.captures(&lower) {
            summary.specs.insert(SPEC_ROOMS.into(), caps[1].to_string());
            summary.rooms = caps[1].parse().ok();
            continue;
        }

        if let Some(caps) = RE_BATHS.captures(&lower) {
            summary.specs.insert(SPEC_BATHROOMS.into(), caps[1].to_string());
            summary.bathrooms = caps[1].parse().ok();
            continue;
        }

        if let Some(caps) = RE_AREA.captures(&lower) {
            let number = &caps[1];
            summary.specs.insert(SPEC_AREA.into(), format!("{number} m²"));
            summary.area_m2 = number.replace(',', ".").parse().ok();
            continue;
        }

        if lower.contains("planta") || lower.contains("bajo") {
            summary.specs.insert(SPEC_FLOOR.into(), feat.to_string());
            if lower.contains("con ascensor") {
                summary.specs.insert(SPEC_LIFT.into(), "true".into());
            } else if lower.contains("sin ascensor") {
                summary.specs.insert(SPEC_LIFT.into(), "false".into());
            }
            continue;
        }

        summary.specs.insert(feat.to_string(), "true".into());
    }

    summary
}

/// Split `"Key: value"` into a spec entry; bare text is `None`.
pub fn split_labelled(text: &str) -> Option<(String, String)> {
    let (k, v) = text.split_once(':')?;
    let k = k.trim();
    (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
}

/// Flatten embedded feature groups (`[{ "label": [...] }]`) into specs.
pub fn parse_feature_groups(groups: &[Value], specs: &mut BTreeMap<String, String>) {
    for group in groups {
        let labels = group.get("label").or_else(|| group.get("labels"));
        let texts: Vec<String> = match labels {
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => continue,
        };

        for text in texts {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match split_labelled(text) {
                Some((k, v)) => {
                    specs.insert(k, v);
                }
                None => {
                    specs.insert(text.to_string(), "true".into());
                }
            }
        }
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rooms_area_and_floor() {
        let summary = parse_feature_strings(&["2 hab.", "97 m²", "Planta 2ª exterior con ascensor"]);
        assert_eq!(summary.specs[SPEC_ROOMS], "2");
        assert_eq!(summary.specs[SPEC_AREA], "97 m²");
        assert_eq!(summary.specs[SPEC_FLOOR], "Planta 2ª exterior con ascensor");
        assert_eq!(summary.specs[SPEC_LIFT], "true");
        assert_eq!(summary.rooms, Some(2));
        assert_eq!(summary.area_m2, Some(97.0));
    }

    #[test]
    fn ground_floor_without_lift() {
        let summary = parse_feature_strings(&["Bajo exterior sin ascensor"]);
        assert_eq!(summary.specs[SPEC_FLOOR], "Bajo exterior sin ascensor");
        assert_eq!(summary.specs[SPEC_LIFT], "false");
    }

    #[test]
    fn bathrooms_and_unknown_flags() {
        let summary = parse_feature_strings(&["1 baño", "Terraza", "  "]);
        assert_eq!(summary.bathrooms, Some(1));
        assert_eq!(summary.specs["Terraza"], "true");
        assert_eq!(summary.specs.len(), 2);
    }

    #[test]
    fn empty_input() {
        let empty: [&str; 0] = [];
        assert_eq!(parse_feature_strings(&empty), FeatureSummary::default());
    }

    #[test]
    fn labelled_text() {
        assert_eq!(
            split_labelled("Orientación: sur"),
            Some(("Orientación".to_string(), "sur".to_string()))
        );
        assert_eq!(split_labelled("Garaje incluido"), None);
    }

    #[test]
    fn feature_groups_flatten() {
        let groups = vec![
            json!({"label": ["Certificado energético: E", "Calefacción"]}),
            json!({"labels": "Trastero"}),
            json!({"other": 1}),
        ];
        let mut specs = BTreeMap::new();
        parse_feature_groups(&groups, &mut specs);
        assert_eq!(specs["Certificado energético"], "E");
        assert_eq!(specs["Calefacción"], "true");
        assert_eq!(specs["Trastero"], "true");
        assert_eq!(specs.len(), 3);
    }
}
