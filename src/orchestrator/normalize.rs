//! Canonicalization of model recommendation output.
//!
//! The model is asked for `{"recommendations": [...]}` but does not always
//! comply. Every consumer of recommendation output goes through
//! [`normalize_recommendations`] so the stored shape is always an array.

use serde_json::Value;

use crate::models::{Crop, RecommendationOutput};

// ---

/// Shapes the model has been seen to answer with.
#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationShape {
    /// `{"recommendations": [...]}`
    Wrapped(Vec<Value>),
    /// `[...]`
    BareArray(Vec<Value>),
    /// `{"data": [...]}`
    DataList(Vec<Value>),
    /// `{"items": [...]}`
    ItemsList(Vec<Value>),
    /// Anything else; yields no recommendations.
    Other(Value),
}

impl RecommendationShape {
    pub fn classify(raw: Value) -> Self {
        // ---
        match raw {
            Value::Array(list) => Self::BareArray(list),
            Value::Object(mut map) => {
                if let Some(Value::Array(list)) = map.remove("recommendations") {
                    return Self::Wrapped(list);
                }
                // an empty `data` list falls through to `items`
                match (map.remove("data"), map.remove("items")) {
                    (Some(Value::Array(list)), _) if !list.is_empty() => Self::DataList(list),
                    (_, Some(Value::Array(list))) => Self::ItemsList(list),
                    (Some(Value::Array(list)), _) => Self::DataList(list),
                    _ => Self::Other(Value::Object(map)),
                }
            }
            other => Self::Other(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Wrapped(_) => "wrapped",
            Self::BareArray(_) => "bare_array",
            Self::DataList(_) => "data_list",
            Self::ItemsList(_) => "items_list",
            Self::Other(_) => "other",
        }
    }
}

/// Reduce any model answer to `{recommendations: [Crop...]}`.
pub fn normalize_recommendations(raw: Value) -> RecommendationOutput {
    // ---
    let shape = RecommendationShape::classify(raw);
    let label = shape.label();

    let entries = match shape {
        RecommendationShape::Wrapped(list)
        | RecommendationShape::BareArray(list)
        | RecommendationShape::DataList(list)
        | RecommendationShape::ItemsList(list) => list,
        RecommendationShape::Other(value) => {
            let preview: String = value.to_string().chars().take(200).collect();
            tracing::warn!(%preview, "model output has no recommendation list; using empty list");
            Vec::new()
        }
    };

    let total = entries.len();
    let recommendations: Vec<Crop> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(fields) => Some(Crop::from_map(fields)),
            _ => None,
        })
        .collect();

    if recommendations.len() < total {
        tracing::warn!(
            dropped = total - recommendations.len(),
            "dropped non-object recommendation entries"
        );
    }
    tracing::debug!(shape = label, count = recommendations.len(), "normalized model output");

    RecommendationOutput { recommendations }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn names(output: &RecommendationOutput) -> Vec<String> {
        output.crop_names()
    }

    #[test]
    fn test_every_shape_yields_an_array() {
        // ---
        let crops = json!([{"crop": "Pechay"}, {"crop": "Okra"}]);
        let cases = [
            (json!({"recommendations": crops.clone()}), 2),
            (crops.clone(), 2),
            (json!({"data": crops.clone()}), 2),
            (json!({"items": crops.clone()}), 2),
            (json!({}), 0),
        ];

        for (raw, expected) in cases {
            let output = normalize_recommendations(raw.clone());
            assert_eq!(output.recommendations.len(), expected, "input: {raw}");
            let value = serde_json::to_value(&output).unwrap();
            assert!(value["recommendations"].is_array());
        }
    }

    #[test]
    fn test_data_is_searched_before_items() {
        // ---
        let output = normalize_recommendations(json!({
            "data": [{"crop": "Sitaw"}],
            "items": [{"crop": "Kangkong"}]
        }));
        assert_eq!(names(&output), vec!["Sitaw"]);

        let output = normalize_recommendations(json!({
            "data": [],
            "items": [{"crop": "Kangkong"}]
        }));
        assert_eq!(names(&output), vec!["Kangkong"]);
    }

    #[test]
    fn test_unexpected_shapes_become_empty() {
        // ---
        for raw in [
            json!({"recommendations": {"crop": "Pechay"}}),
            json!({"data": "nope"}),
            json!("just text"),
            json!(42),
            Value::Null,
        ] {
            let output = normalize_recommendations(raw.clone());
            assert!(output.recommendations.is_empty(), "input: {raw}");
        }
    }

    #[test]
    fn test_non_object_entries_are_dropped() {
        // ---
        let output = normalize_recommendations(json!([{"crop": "Pechay"}, "Okra", 3, null]));
        assert_eq!(names(&output), vec!["Pechay"]);
    }

    #[test]
    fn test_classify_labels() {
        // ---
        assert_eq!(RecommendationShape::classify(json!([])).label(), "bare_array");
        assert_eq!(
            RecommendationShape::classify(json!({"recommendations": []})).label(),
            "wrapped"
        );
        assert_eq!(RecommendationShape::classify(json!({"x": 1})).label(), "other");
    }
}
