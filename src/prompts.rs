//! Prompt templates and placeholder substitution.
//!
//! Templates use `{name}` slots. Each template's slot set is fixed and
//! covered by tests, since the shape of the model's answer depends on
//! what the prompt embeds. Structured values are embedded as compact JSON.

use std::collections::BTreeSet;

use serde::Serialize;

// ---

/// Field list shared by every crop-producing prompt.
macro_rules! crop_schema {
    () => {
        r#"{
  "crop": "string (specific variety if applicable, e.g. 'Ampalaya - Jade 20')",
  "searchable_name": "string (common English name for an encyclopedia search, e.g. 'bitter gourd' for Ampalaya)",
  "scientific_name": "string",
  "category": "string (Vegetables/Fruits/Cereals/Legumes/Cash/Fodder/Herbs/Ornamentals)",
  "scores": {
    "overall_score": "number 0.0-1.0",
    "confidence_pct": "integer 0-100",
    "env_score": "number 0.0-1.0",
    "econ_score": "number 0.0-1.0",
    "time_fit_score": "number 0.0-1.0",
    "season_score": "number 0.0-1.0",
    "labor_score": "number 0.0-1.0",
    "risk_score": "number 0.0-1.0 (higher means lower risk)",
    "market_score": "number 0.0-1.0"
  },
  "growth_requirements": {
    "crop_cycle_days": "integer",
    "water_requirement": "string",
    "sunlight_hours_daily": "integer",
    "optimal_temp_range_c": "string (e.g. 20-30)",
    "soil_ph_range": "string (e.g. 5.5-6.5)",
    "soil_type_preferred": "string"
  },
  "tolerances": {
    "drought_tolerance": "Low/Moderate/High",
    "flood_tolerance": "Low/Moderate/High",
    "salinity_tolerance": "Low/Moderate/High",
    "frost_tolerance": "Low/Moderate/High",
    "shade_tolerance": "Low/Moderate/High",
    "pest_disease_resistance": "Low/Moderate/High"
  },
  "management": {
    "management_intensity": "Low/Moderate/High",
    "labor_hours_per_ha_per_week": "number",
    "organic_suitable": "boolean",
    "mechanization_possible": "boolean",
    "requires_irrigation": "boolean",
    "requires_trellising": "boolean"
  },
  "economics": {
    "estimated_cost_php": "number",
    "cost_breakdown": {
      "seeds_php": "number",
      "fertilizer_php": "number",
      "pesticides_php": "number",
      "labor_php": "number",
      "irrigation_php": "number",
      "others_php": "number"
    },
    "estimated_yield_kg_per_ha": "number",
    "estimated_revenue_php": "number",
    "profit_margin_pct": "number",
    "roi_pct": "number",
    "break_even_days": "integer"
  },
  "market_strategy": {
    "best_selling_locations": ["string"],
    "current_market_price_php_per_kg": "number",
    "projected_harvest_price_php_per_kg": "number",
    "price_volatility": "Low/Moderate/High",
    "demand_level": "Low/Moderate/High/Very High",
    "export_potential": "boolean",
    "buyer_types": ["string"]
  },
  "planting_schedule": {
    "recommended_planting_date": "string",
    "expected_harvest_date": "string",
    "succession_planting_possible": "boolean",
    "intercropping_compatible_with": ["string"]
  },
  "risk_assessment": {
    "weather_risks": ["string"],
    "pest_disease_risks": ["string"],
    "market_risks": ["string"],
    "mitigation_strategies": ["string"]
  },
  "reasoning": "string (2-3 sentences)"
}"#
    };
}

pub const CONTEXT_ANALYSIS_PROMPT: &str = r#"You are an agricultural data analyst for Philippine farming conditions.
Assess the agricultural context for the location and planning month below.

Input data:
{input_payload}

Answer with one JSON object using exactly these keys. String values must be
bare answers without parenthetical explanations.

{
  "location_analysis": {
    "province": "string",
    "region": "string",
    "climate_type": "Type I/Type II/Type III/Type IV",
    "current_season": "Dry/Wet/Transition",
    "season_end_month": "integer 1-12"
  },
  "weather_forecast": {
    "current_month_rainfall_mm": "number",
    "next_3months_rainfall_mm": "number",
    "temperature_range_c": "string (e.g. 24-32)",
    "typhoon_risk": "Low/Moderate/High",
    "el_nino_la_nina": "Normal/El Nino/La Nina"
  },
  "market_conditions": {
    "high_demand_crops": ["crop name"],
    "price_trends": "string",
    "export_opportunities": ["crop name"],
    "local_market_saturation": ["crop name"]
  },
  "agricultural_calendar": {
    "optimal_planting_window": "string (e.g. November-January)",
    "harvest_season_conflict": "string",
    "recommended_crop_cycles": ["Fast (30-60d)", "Medium (60-120d)", "Long (120d+)"]
  },
  "risk_factors": {
    "pest_disease_season": ["pest or disease name"],
    "water_availability": "Abundant/Moderate/Scarce",
    "soil_degradation_risk": "Low/Moderate/High"
  }
}

Base the analysis on regional climate patterns and the planning month. Be specific to {location}.
"#;

pub const RECOMMENDATION_PROMPT: &str = concat!(
    r#"You are an agronomist producing personalized crop recommendations for a Philippine farmer.

CONTEXTUAL DATA:
{context_data}

FARMER PROFILE & SENSORS:
{input_payload}

Return a JSON object with key "recommendations" holding an array of crop objects.
Every crop object has all of these fields:

"#,
    crop_schema!(),
    r#"

Requirements:
1. At most 8 recommendations, sorted by overall_score descending.
2. Penalize time_fit_score when crop_cycle_days exceeds waiting_tolerance_days.
3. Let the contextual weather and market data drive season_score and market_score.
4. Lower confidence_pct when soil chemistry sensors (pH, EC, NPK) are missing.
5. Scale every peso figure to the farmer's land_size_ha; never exceed budget_php.
6. The planting month is {start_month}; avoid harvests that land in the worst weather.

Output only JSON. No markdown fences, no prose outside the JSON.
"#
);

pub const HARDWARE_RECOMMENDATION_PROMPT: &str = concat!(
    r#"You are an agronomist producing automated crop recommendations from greenhouse sensor data alone.

CONTEXTUAL DATA:
{context_data}

SENSOR READINGS:
{input_payload}

ALREADY GENERATED CROPS (do not repeat any of these):
{already_generated}

Return a JSON object with key "recommendations" holding an array of exactly 8 crop objects,
diverse across categories and none of them in the already generated list.
Every crop object has all of these fields:

"#,
    crop_schema!(),
    r#"

Requirements:
1. Exactly 8 recommendations, sorted by overall_score descending.
2. Base suitability on the sensor readings (soil moisture, temperature, humidity, light).
3. Let the contextual weather and market data drive season_score and market_score.
4. With only the four basic sensors, keep confidence_pct between 60 and 75.
5. Express peso figures per hectare.
6. The planting month is {start_month}; avoid harvests that land in the worst weather.

Output only JSON. No markdown fences, no prose outside the JSON.
"#
);

pub const FILTER_RECOMMENDATION_PROMPT: &str = concat!(
    r#"You are an agronomist narrowing an existing list of crop recommendations to a farmer's preferences.

AVAILABLE CROPS (names only):
{available_crops}

CONTEXTUAL DATA:
{context_data}

FARMER PREFERENCES:
{farmer_input}

Pick 1-5 crops from the available list that best fit the preferences. Return:

{
  "filter_explanation": "string (2-3 sentences: criteria prioritized, why others were dropped)",
  "recommendations": [1-5 crop objects]
}

Every crop object has all of these fields, recalculated for this farmer:

"#,
    crop_schema!(),
    r#"

Requirements:
1. Only crops from the available list.
2. Category must match crop_category unless it is "Any".
3. crop_cycle_days must fit within waiting_tolerance_days.
4. Costs must be scaled to land_size_ha and stay within budget_php.
5. Base labor figures on manpower.
6. If nothing satisfies every constraint, return the best 1-2 and say why.

Output only JSON. No markdown fences, no prose outside the JSON.
"#
);

pub const CHAT_PROMPT: &str = r#"You are PiliSeed AI, a farming assistant for Filipino farmers. You can see the farmer's latest crop recommendation data for one sensor location.

User question: {user_message}

Sensor ID: {sensor_id}
Location: {location}

Farmer input:
- Crop category: {crop_category}
- Budget: PHP {budget}
- Land size: {land_size} hectares
- Manpower: {manpower} workers
- Waiting tolerance: {waiting_tolerance} days

Environmental context:
{context_data}

Recommended crops:
{recommendations}

Answer from this data in simple, friendly language. If the question is outside
what the data covers, say what information you do have. Use pesos and metric
units. Reply in plain text only: no markdown, use dashes or numbers for lists
and CAPITAL LETTERS for emphasis.
"#;

/// Named values to substitute into a template.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    values: Vec<(&'static str, String)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value verbatim.
    pub fn text(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.push((name, value.into()));
        self
    }

    /// Bind a structured value as compact JSON.
    pub fn json<T: Serialize + ?Sized>(self, name: &'static str, value: &T) -> Self {
        // Serialize impls for our payload types cannot fail
        let text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        self.text(name, text)
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn is_slot_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

/// Slot name starting right after a `{`, if the text there is `name}`.
fn slot_at(rest: &str) -> Option<&str> {
    let end = rest.find('}')?;
    let name = &rest[..end];
    (!name.is_empty() && name.chars().all(is_slot_char)).then_some(name)
}

/// Every `{name}` slot in a template.
pub fn placeholders(template: &str) -> BTreeSet<&str> {
    // ---
    template
        .match_indices('{')
        .filter_map(|(i, _)| slot_at(&template[i + 1..]))
        .collect()
}

/// Substitute bound slots. Unbound slots are left as literal text.
pub fn fill(template: &str, bindings: &Bindings) -> String {
    // ---
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match slot_at(after).and_then(|name| bindings.get(name).map(|v| (name, v))) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    let unresolved: Vec<&str> = placeholders(template)
        .into_iter()
        .filter(|name| bindings.get(name).is_none())
        .collect();
    if !unresolved.is_empty() {
        tracing::warn!(?unresolved, "prompt rendered with unbound placeholders");
    }
    out
}

/// Format a peso amount as `12,345.67`.
pub fn format_php(amount: f64) -> String {
    // ---
    let fixed = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((&fixed, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn set(names: &[&'static str]) -> BTreeSet<&'static str> {
        names.iter().copied().collect()
    }

    #[test]
    fn test_template_placeholder_contracts() {
        // ---
        assert_eq!(
            placeholders(CONTEXT_ANALYSIS_PROMPT),
            set(&["input_payload", "location"])
        );
        assert_eq!(
            placeholders(RECOMMENDATION_PROMPT),
            set(&["context_data", "input_payload", "start_month"])
        );
        assert_eq!(
            placeholders(HARDWARE_RECOMMENDATION_PROMPT),
            set(&["already_generated", "context_data", "input_payload", "start_month"])
        );
        assert_eq!(
            placeholders(FILTER_RECOMMENDATION_PROMPT),
            set(&["available_crops", "context_data", "farmer_input"])
        );
        assert_eq!(
            placeholders(CHAT_PROMPT),
            set(&[
                "budget",
                "context_data",
                "crop_category",
                "land_size",
                "location",
                "manpower",
                "recommendations",
                "sensor_id",
                "user_message",
                "waiting_tolerance",
            ])
        );
    }

    #[test]
    fn test_fill_substitutes_compact_json() {
        // ---
        let bindings = Bindings::new()
            .json("input_payload", &json!({"location": "Bulacan", "start_month": 11}))
            .text("location", "Bulacan");
        let prompt = fill(CONTEXT_ANALYSIS_PROMPT, &bindings);

        assert!(prompt.contains(r#"{"location":"Bulacan","start_month":11}"#));
        assert!(prompt.contains("Be specific to Bulacan."));
        assert!(placeholders(&prompt).is_empty());
        // JSON skeleton braces survive untouched
        assert!(prompt.contains("\"location_analysis\": {"));
    }

    #[test]
    fn test_fill_leaves_unbound_slots_literal() {
        // ---
        let out = fill("a {x} b {y} c {", &Bindings::new().text("x", "1"));
        assert_eq!(out, "a 1 b {y} c {");
    }

    #[test]
    fn test_fill_does_not_rescan_substituted_text() {
        // ---
        let out = fill(
            "{a}{b}",
            &Bindings::new().text("a", "{b}").text("b", "2"),
        );
        assert_eq!(out, "{b}2");
    }

    #[test]
    fn test_format_php() {
        // ---
        assert_eq!(format_php(0.0), "0.00");
        assert_eq!(format_php(999.5), "999.50");
        assert_eq!(format_php(10000.0), "10,000.00");
        assert_eq!(format_php(1234567.891), "1,234,567.89");
        assert_eq!(format_php(-2500.0), "-2,500.00");
    }
}
