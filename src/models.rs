//! Data models for sensor locations, users and the recommendation history.
//!
//! Entity documents (sensor locations, users) are stored flat. History
//! documents are stored inside an [`Envelope`] that carries the server-side
//! timestamp, taken at the service's fixed UTC+8 operating offset.

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---

/// Offset of the service's operating timezone (Philippine time).
pub const OPERATING_OFFSET_SECS: i32 = 8 * 3600;

/// Current time at the fixed UTC+8 operating offset.
pub fn operating_now() -> DateTime<FixedOffset> {
    // ---
    Utc::now().with_timezone(&operating_offset())
}

pub fn operating_offset() -> FixedOffset {
    FixedOffset::east_opt(OPERATING_OFFSET_SECS).expect("UTC+8 is within the valid offset range")
}

/// Current calendar month (1-12) in the operating timezone.
pub fn current_month() -> u32 {
    operating_now().month()
}

/// Four-value environmental reading bound to a sensor location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    // ---
    pub soil_moisture_pct: f64,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub light_lux: f64,
}

impl Default for SensorData {
    /// Reading set used when a location has never reported.
    fn default() -> Self {
        Self {
            soil_moisture_pct: 28.0,
            temperature_c: 26.7,
            humidity_pct: 78.0,
            light_lux: 20000.0,
        }
    }
}

/// Request body for creating a sensor location.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSensorLocation {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Stored shape of a sensor location (flat entity document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorLocationDoc {
    // ---
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_sensors: Option<SensorData>,
}

impl SensorLocationDoc {
    /// Snapshot to feed the prompts: the stored one, or the default set.
    pub fn snapshot_or_default(&self) -> SensorData {
        self.current_sensors.unwrap_or_default()
    }
}

/// A sensor location as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorLocation {
    pub sensor_id: String,
    #[serde(flatten)]
    pub doc: SensorLocationDoc,
}

/// Farmer profile supplied with a recommendation or filter request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerInput {
    // ---
    pub crop_category: String,
    pub budget_php: f64,
    pub waiting_tolerance_days: u32,
    pub land_size_ha: f64,
    pub manpower: u32,
    /// Free-text extra preferences (used by filtering).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    // ---
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// One crop recommendation as produced by the model.
///
/// The record is passed through verbatim: `crop`, `searchable_name`,
/// `scientific_name`, `category`, `scores`, `growth_requirements`,
/// `tolerances`, `management`, `economics`, `market_strategy`,
/// `planting_schedule`, `risk_assessment` and `reasoning` are whatever the
/// model wrote. The service itself only reads the name fields and writes
/// `image_url`, `planted` and `is_top_3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crop(Map<String, Value>);

impl Crop {
    // ---
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Display name (`crop`), e.g. "Ampalaya - Jade 20".
    pub fn name(&self) -> Option<&str> {
        self.str_field("crop")
    }

    /// Name to use for image lookup: `searchable_name`, else `crop`.
    pub fn lookup_name(&self) -> Option<&str> {
        self.str_field("searchable_name").or_else(|| self.name())
    }

    pub fn image_url(&self) -> Option<&str> {
        self.str_field("image_url")
    }

    /// Set or clear the thumbnail. A cleared image is stored as `null`.
    pub fn set_image_url(&mut self, url: Option<String>) {
        let value = url.map(Value::String).unwrap_or(Value::Null);
        self.0.insert("image_url".to_string(), value);
    }

    pub fn planted(&self) -> bool {
        self.0.get("planted").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_planted(&mut self, planted: bool) {
        self.0.insert("planted".to_string(), Value::Bool(planted));
    }

    pub fn is_top_3(&self) -> bool {
        self.0.get("is_top_3").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_top_3(&mut self, top: bool) {
        self.0.insert("is_top_3".to_string(), Value::Bool(top));
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Canonical recommendation output: always an array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationOutput {
    #[serde(default)]
    pub recommendations: Vec<Crop>,
}

impl RecommendationOutput {
    /// Crop display names, in ranking order, skipping unnamed entries.
    pub fn crop_names(&self) -> Vec<String> {
        self.recommendations
            .iter()
            .filter_map(|c| c.name().map(str::to_string))
            .collect()
    }
}

/// Timestamped wrapper stored for every history document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub timestamp: DateTime<FixedOffset>,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn now(data: T) -> Self {
        Self {
            timestamp: operating_now(),
            data,
        }
    }
}

/// Input recorded with a context analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInput {
    pub sensors: SensorData,
    pub location: String,
    pub start_month: u32,
}

/// `location_analysis` document payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysisData {
    // ---
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub sensor_name: String,
    pub input: ContextInput,
    pub output: Value,
}

/// Which workflow produced a recommendation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    #[default]
    Farmer,
    Hardware,
}

/// Input recorded with a recommendation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationInput {
    // ---
    pub sensors: SensorData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farmer: Option<FarmerInput>,
    pub location: String,
    pub start_month: u32,
    #[serde(default)]
    pub source: RecommendationSource,
}

/// `crop_recommendations` document payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationData {
    // ---
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub sensor_name: String,
    pub input: RecommendationInput,
    /// Context analysis output the set was generated from.
    #[serde(default)]
    pub context_data: Option<Value>,
    #[serde(default)]
    pub output: RecommendationOutput,
}

/// `filtered_recommendations` document payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredRecommendationData {
    // ---
    pub session_id: String,
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uid: Option<String>,
    pub farmer_input: FarmerInput,
    pub filter_explanation: String,
    pub available_crops: Vec<String>,
    pub output: RecommendationOutput,
}

/// `chat_history` document payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatExchangeData {
    // ---
    pub session_id: String,
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub user_message: String,
    pub response: String,
}
