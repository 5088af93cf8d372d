//! Recommendation workflows.
//!
//! Each request walks the stages in [`Stage`] strictly in order:
//! FetchingSensor → ResolvingContext → GeneratingRecommendations →
//! Enriching → Persisting → Done. Any failure ends the request, and
//! documents already written by earlier stages stay in history.
//! Thumbnail lookups are the only recoverable step.

use std::{fmt, sync::Arc};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{parse_id, AppError, Context};
use crate::llm::{GenerationParams, LanguageModel};
use crate::models::{
    current_month, ContextAnalysisData, ContextInput, Crop, FarmerInput, RecommendationData,
    RecommendationInput, RecommendationOutput, RecommendationSource, SensorData, SensorLocation,
};
use crate::prompts::{self, Bindings};
use crate::repos::{
    ChatRepository, ContextAnalysisRepository, FilteredRecommendationRepository,
    RecommendationRepository, Scope, SensorRepository,
};
use crate::store::{DocId, SharedStore};
use crate::thumbnails::ThumbnailLookup;

mod chat;
mod normalize;
mod sessions;

pub use chat::{ChatOutcome, ChatReply, ChatRequest, MissingPrecondition, PreconditionCode};
pub use normalize::{normalize_recommendations, RecommendationShape};
pub use sessions::{DeletionReport, FilterRequest, FilteredView, PlantedView, SessionView};

// ---

/// Number of crops flagged `is_top_3` in the hardware flow.
const TOP_CROPS: usize = 3;

/// Workflow step, used for tracing spans and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchingSensor,
    ResolvingContext,
    GeneratingRecommendations,
    Enriching,
    Persisting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Stage::FetchingSensor => "fetching sensor",
            Stage::ResolvingContext => "resolving context",
            Stage::GeneratingRecommendations => "generating recommendations",
            Stage::Enriching => "enriching recommendations",
            Stage::Persisting => "persisting recommendations",
            Stage::Done => "done",
        };
        f.write_str(text)
    }
}

/// Context analysis chosen for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContext {
    pub id: DocId,
    pub timestamp: DateTime<FixedOffset>,
    pub output: Value,
    pub reused: bool,
}

/// Response shape for the context-analysis endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextAnalysisView {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub reused: bool,
    #[serde(flatten)]
    pub analysis: Map<String, Value>,
}

impl ContextAnalysisView {
    const OWN_FIELDS: &'static [&'static str] = &["id", "timestamp", "reused"];
}

/// Body of `POST /recommendations/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub sensor_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub farmer: FarmerInput,
    /// Regenerate the context analysis instead of reusing the latest one.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedRecommendations {
    pub id: String,
    pub recommendations: Vec<Crop>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardwareRecommendations {
    pub session_id: String,
    pub top_3_crops: Vec<String>,
    pub total_crops_generated: usize,
    pub message: String,
    pub recommendations: Vec<Crop>,
}

/// Sequences sensor lookup, context resolution, model calls, enrichment and
/// persistence for every recommendation workflow.
pub struct Orchestrator {
    sensors: SensorRepository,
    contexts: ContextAnalysisRepository,
    recommendations: RecommendationRepository,
    filtered: FilteredRecommendationRepository,
    chats: ChatRepository,
    model: Arc<dyn LanguageModel>,
    thumbnails: Arc<dyn ThumbnailLookup>,
    start_month: Option<u32>,
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        model: Arc<dyn LanguageModel>,
        thumbnails: Arc<dyn ThumbnailLookup>,
        start_month: Option<u32>,
    ) -> Self {
        Self {
            sensors: SensorRepository::new(store.clone()),
            contexts: ContextAnalysisRepository::new(store.clone()),
            recommendations: RecommendationRepository::new(store.clone()),
            filtered: FilteredRecommendationRepository::new(store.clone()),
            chats: ChatRepository::new(store),
            model,
            thumbnails,
            start_month,
        }
    }

    fn planning_month(&self) -> u32 {
        self.start_month.unwrap_or_else(current_month)
    }

    /// FetchingSensor: resolve and load a sensor location.
    async fn fetch_sensor(&self, sensor_id: &str) -> Result<(DocId, SensorLocation), AppError> {
        // ---
        let id: DocId = parse_id(sensor_id, "sensor_id")?;
        let sensor = self
            .sensors
            .get(id)
            .await
            .context(Stage::FetchingSensor)?
            .ok_or_else(|| AppError::not_found("Sensor location"))?;
        Ok((id, sensor))
    }

    /// ResolvingContext: reuse the latest analysis in scope unless `refresh`,
    /// otherwise purge the scope's analyses and ask the model for a new one.
    async fn resolve_context(
        &self,
        sensor: &SensorLocation,
        scope: &Scope,
        refresh: bool,
    ) -> Result<ResolvedContext, AppError> {
        // ---
        if !refresh {
            if let Some(existing) = self
                .contexts
                .latest(scope)
                .await
                .context(Stage::ResolvingContext)?
            {
                info!(context_id = %existing.id, "reusing context analysis");
                return Ok(ResolvedContext {
                    id: existing.id,
                    timestamp: existing.envelope.timestamp,
                    output: existing.envelope.data.output,
                    reused: true,
                });
            }
        } else {
            let purged = self
                .contexts
                .delete_for(scope)
                .await
                .context(Stage::ResolvingContext)?;
            info!(purged, "refresh requested, purged prior context analyses");
        }

        let input = ContextInput {
            sensors: sensor.doc.snapshot_or_default(),
            location: sensor.doc.location.clone(),
            start_month: self.planning_month(),
        };
        let prompt = prompts::fill(
            prompts::CONTEXT_ANALYSIS_PROMPT,
            &Bindings::new()
                .json("input_payload", &input)
                .text("location", input.location.clone()),
        );

        let output = self
            .model
            .generate_json(&prompt, GenerationParams::STRUCTURED)
            .await
            .context(Stage::ResolvingContext)?;

        let data = ContextAnalysisData {
            sensor_id: sensor.sensor_id.clone(),
            user_id: scope.user_id.clone(),
            sensor_name: sensor.doc.name.clone(),
            input,
            output: output.clone(),
        };
        let id = self
            .contexts
            .insert(data)
            .await
            .context(Stage::ResolvingContext)?;
        let stored = self
            .contexts
            .get(id)
            .await
            .context(Stage::ResolvingContext)?
            .ok_or_else(|| AppError::not_found("Context analysis"))?;

        info!(context_id = %id, "stored new context analysis");
        Ok(ResolvedContext {
            id,
            timestamp: stored.envelope.timestamp,
            output,
            reused: false,
        })
    }

    /// Context analysis for a sensor, reused unless `refresh` is set.
    pub async fn context_analysis(
        &self,
        sensor_id: &str,
        user_id: Option<String>,
        refresh: bool,
    ) -> Result<ContextAnalysisView, AppError> {
        // ---
        let (_, sensor) = self
            .fetch_sensor(sensor_id)
            .instrument(info_span!("stage", stage = %Stage::FetchingSensor))
            .await?;
        let scope = Scope::sensor(sensor.sensor_id.clone()).with_user(user_id);
        let ctx = self
            .resolve_context(&sensor, &scope, refresh)
            .instrument(info_span!("stage", stage = %Stage::ResolvingContext))
            .await?;

        let mut analysis = match ctx.output {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("analysis".to_string(), other);
                map
            }
        };
        // the view's own fields win over same-named model keys
        for key in ContextAnalysisView::OWN_FIELDS {
            if analysis.remove(*key).is_some() {
                warn!(field = *key, "dropping model field that shadows the view");
            }
        }
        Ok(ContextAnalysisView {
            id: ctx.id.to_string(),
            timestamp: ctx.timestamp,
            reused: ctx.reused,
            analysis,
        })
    }

    /// Farmer-driven recommendation workflow.
    pub async fn generate(&self, request: RecommendationRequest) -> Result<GeneratedRecommendations, AppError> {
        // ---
        info!(sensor_id = %request.sensor_id, refresh = request.refresh, "generating recommendations");

        let (_, sensor) = self
            .fetch_sensor(&request.sensor_id)
            .instrument(info_span!("stage", stage = %Stage::FetchingSensor))
            .await?;
        let scope = Scope::sensor(sensor.sensor_id.clone()).with_user(request.user_id);

        let ctx = self
            .resolve_context(&sensor, &scope, request.refresh)
            .instrument(info_span!("stage", stage = %Stage::ResolvingContext))
            .await?;

        let input = RecommendationInput {
            sensors: sensor.doc.snapshot_or_default(),
            farmer: Some(request.farmer),
            location: sensor.doc.location.clone(),
            start_month: self.planning_month(),
            source: RecommendationSource::Farmer,
        };
        let prompt = prompts::fill(
            prompts::RECOMMENDATION_PROMPT,
            &Bindings::new()
                .json("context_data", &ctx.output)
                .json("input_payload", &input)
                .text("start_month", input.start_month.to_string()),
        );
        let mut output = self
            .recommend(&prompt)
            .instrument(info_span!("stage", stage = %Stage::GeneratingRecommendations))
            .await?;

        self.enrich(&mut output.recommendations)
            .instrument(info_span!("stage", stage = %Stage::Enriching))
            .await;

        let data = RecommendationData {
            sensor_id: sensor.sensor_id.clone(),
            user_id: scope.user_id.clone(),
            sensor_name: sensor.doc.name.clone(),
            input,
            context_data: Some(ctx.output),
            output,
        };
        let recommendations = data.output.recommendations.clone();
        let id = self
            .recommendations
            .insert(data)
            .instrument(info_span!("stage", stage = %Stage::Persisting))
            .await
            .context(Stage::Persisting)?;

        info!(session_id = %id, count = recommendations.len(), stage = %Stage::Done, "recommendations ready");
        Ok(GeneratedRecommendations {
            id: id.to_string(),
            recommendations,
        })
    }

    /// Hardware-auto workflow: store the posted readings, then recommend from
    /// sensor data alone and flag the top three.
    pub async fn hardware_readings(
        &self,
        sensor_id: &str,
        readings: SensorData,
    ) -> Result<HardwareRecommendations, AppError> {
        // ---
        info!(sensor_id, "hardware readings received");

        let (id, mut sensor) = self
            .fetch_sensor(sensor_id)
            .instrument(info_span!("stage", stage = %Stage::FetchingSensor))
            .await?;
        if !self
            .sensors
            .replace_snapshot(id, readings)
            .await
            .context(Stage::FetchingSensor)?
        {
            return Err(AppError::not_found("Sensor location"));
        }
        sensor.doc.current_sensors = Some(readings);

        let scope = Scope::sensor(sensor.sensor_id.clone());
        let ctx = self
            .resolve_context(&sensor, &scope, false)
            .instrument(info_span!("stage", stage = %Stage::ResolvingContext))
            .await?;

        let already_generated = self
            .recommendations
            .latest(&scope)
            .await
            .context(Stage::GeneratingRecommendations)?
            .map(|prev| prev.envelope.data.output.crop_names())
            .unwrap_or_default();

        let input = RecommendationInput {
            sensors: readings,
            farmer: None,
            location: sensor.doc.location.clone(),
            start_month: self.planning_month(),
            source: RecommendationSource::Hardware,
        };
        let prompt = prompts::fill(
            prompts::HARDWARE_RECOMMENDATION_PROMPT,
            &Bindings::new()
                .json("context_data", &ctx.output)
                .json("input_payload", &input)
                .json("already_generated", &already_generated)
                .text("start_month", input.start_month.to_string()),
        );
        let mut output = self
            .recommend(&prompt)
            .instrument(info_span!("stage", stage = %Stage::GeneratingRecommendations))
            .await?;

        // the model ranks by overall_score, best first
        for (rank, crop) in output.recommendations.iter_mut().enumerate() {
            crop.set_top_3(rank < TOP_CROPS);
        }
        self.enrich(&mut output.recommendations)
            .instrument(info_span!("stage", stage = %Stage::Enriching))
            .await;

        let top_3_crops: Vec<String> = output
            .recommendations
            .iter()
            .take(TOP_CROPS)
            .filter_map(|c| c.name().map(str::to_string))
            .collect();
        let recommendations = output.recommendations.clone();

        let data = RecommendationData {
            sensor_id: sensor.sensor_id.clone(),
            user_id: None,
            sensor_name: sensor.doc.name.clone(),
            input,
            context_data: Some(ctx.output),
            output,
        };
        let session_id = self
            .recommendations
            .insert(data)
            .instrument(info_span!("stage", stage = %Stage::Persisting))
            .await
            .context(Stage::Persisting)?;

        info!(%session_id, total = recommendations.len(), stage = %Stage::Done, "hardware recommendations ready");
        Ok(HardwareRecommendations {
            session_id: session_id.to_string(),
            message: format!(
                "Generated {} crop recommendations from sensor readings",
                recommendations.len()
            ),
            top_3_crops,
            total_crops_generated: recommendations.len(),
            recommendations,
        })
    }

    /// GeneratingRecommendations: invoke the model and normalize its answer.
    async fn recommend(&self, prompt: &str) -> Result<RecommendationOutput, AppError> {
        let raw = self
            .model
            .generate_json(prompt, GenerationParams::STRUCTURED)
            .await
            .context(Stage::GeneratingRecommendations)?;
        Ok(normalize_recommendations(raw))
    }

    /// Enriching: attach a thumbnail to every crop, one lookup at a time.
    async fn enrich(&self, crops: &mut [Crop]) {
        // ---
        for crop in crops.iter_mut() {
            let name = crop.lookup_name().map(str::to_string);
            let url = match name {
                Some(name) => self.thumbnails.lookup(&name).await,
                None => None,
            };
            crop.set_image_url(url);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the workflow tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::llm::{GenerationParams, LanguageModel, ModelError, TransientError};
    use crate::thumbnails::ThumbnailLookup;

    /// Replays scripted answers and records every prompt it was given.
    #[derive(Default)]
    pub struct ScriptedModel {
        json: Mutex<VecDeque<Result<Value, ModelError>>>,
        text: Mutex<VecDeque<String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_json(&self, value: Value) -> &Self {
            self.json.lock().unwrap().push_back(Ok(value));
            self
        }

        pub fn push_failure(&self) -> &Self {
            let err = ModelError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(TransientError::RateLimited.into()),
            };
            self.json.lock().unwrap().push_back(Err(err));
            self
        }

        pub fn push_text(&self, text: &str) -> &Self {
            self.text.lock().unwrap().push_back(text.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate_json(&self, prompt: &str, params: GenerationParams) -> Result<Value, ModelError> {
            assert_eq!(params, GenerationParams::STRUCTURED);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.json
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected generate_json call")
        }

        async fn generate_text(&self, prompt: &str, params: GenerationParams) -> Result<String, ModelError> {
            assert_eq!(params, GenerationParams::CHAT);
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self
                .text
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected generate_text call"))
        }
    }

    /// Known names resolve to a fixed URL; everything else has no image.
    #[derive(Default)]
    pub struct CannedThumbnails {
        pub urls: HashMap<String, String>,
        pub lookups: Mutex<Vec<String>>,
    }

    impl CannedThumbnails {
        pub fn with(names: &[&str]) -> Self {
            Self {
                urls: names
                    .iter()
                    .map(|n| (n.to_string(), format!("https://img.test/{}.jpg", n.replace(' ', "_"))))
                    .collect(),
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ThumbnailLookup for CannedThumbnails {
        async fn lookup(&self, name: &str) -> Option<String> {
            self.lookups.lock().unwrap().push(name.to_string());
            self.urls.get(name).cloned()
        }
    }

    pub fn crops(names: &[&str]) -> Value {
        let list: Vec<Value> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                json!({
                    "crop": name,
                    "searchable_name": name.to_lowercase(),
                    "scores": {"overall_score": 0.9 - (i as f64) * 0.05},
                    "reasoning": format!("{name} fits the plot")
                })
            })
            .collect();
        json!({ "recommendations": list })
    }

    pub fn context_output(tag: &str) -> Value {
        json!({
            "location_analysis": {"province": "Bulacan", "region": "Central Luzon", "tag": tag},
            "weather_forecast": {"typhoon_risk": "Moderate"},
            "market_conditions": {},
            "agricultural_calendar": {},
            "risk_factors": {}
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::testing::*;
    use super::*;
    use crate::models::NewSensorLocation;
    use crate::store::MemoryDocumentStore;
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        model: Arc<ScriptedModel>,
        thumbs: Arc<CannedThumbnails>,
        orchestrator: Orchestrator,
    }

    fn harness(thumbs: CannedThumbnails) -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let model = Arc::new(ScriptedModel::new());
        let thumbs = Arc::new(thumbs);
        let orchestrator = Orchestrator::new(store.clone(), model.clone(), thumbs.clone(), Some(11));
        Harness {
            store,
            model,
            thumbs,
            orchestrator,
        }
    }

    async fn sensor(h: &Harness) -> String {
        SensorRepository::new(h.store.clone())
            .create(NewSensorLocation {
                name: "North plot".into(),
                location: "Malolos, Bulacan".into(),
                description: None,
            })
            .await
            .unwrap()
            .sensor_id
    }

    fn farmer() -> FarmerInput {
        FarmerInput {
            crop_category: "Vegetables".into(),
            budget_php: 10000.0,
            waiting_tolerance_days: 90,
            land_size_ha: 0.5,
            manpower: 2,
            preferences: None,
        }
    }

    fn request(sensor_id: &str, refresh: bool) -> RecommendationRequest {
        RecommendationRequest {
            sensor_id: sensor_id.to_string(),
            user_id: None,
            farmer: farmer(),
            refresh,
        }
    }

    #[tokio::test]
    async fn test_generate_runs_context_then_recommendations() {
        // ---
        let h = harness(CannedThumbnails::with(&["pechay"]));
        let sensor_id = sensor(&h).await;
        h.model
            .push_json(context_output("first"))
            .push_json(crops(&["Pechay", "Okra"]));

        let result = h.orchestrator.generate(request(&sensor_id, false)).await.unwrap();

        assert_eq!(h.model.calls(), 2);
        assert_eq!(result.recommendations.len(), 2);
        assert_eq!(result.recommendations[0].image_url(), Some("https://img.test/pechay.jpg"));
        assert_eq!(result.recommendations[1].image_url(), None);
        assert_eq!(
            result.recommendations[1].fields().get("image_url"),
            Some(&Value::Null)
        );

        // the recommendation prompt embeds the resolved context and month
        let prompt = h.model.last_prompt();
        assert!(prompt.contains(r#""tag":"first""#));
        assert!(prompt.contains("The planting month is 11;"));
        assert!(prompt.contains(r#""soil_moisture_pct":28.0"#));

        let stored = h
            .orchestrator
            .recommendations
            .get(result.id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data().context_data, Some(context_output("first")));
        assert_eq!(stored.data().output.recommendations, result.recommendations);
        assert_eq!(stored.data().input.farmer, Some(farmer()));
    }

    #[tokio::test]
    async fn test_context_is_reused_without_model_call() {
        // ---
        let h = harness(CannedThumbnails::default());
        let sensor_id = sensor(&h).await;
        h.model.push_json(context_output("cached"));

        let first = h
            .orchestrator
            .context_analysis(&sensor_id, None, false)
            .await
            .unwrap();
        assert!(!first.reused);

        let second = h
            .orchestrator
            .context_analysis(&sensor_id, None, false)
            .await
            .unwrap();
        assert!(second.reused);
        assert_eq!(second.id, first.id);
        assert_eq!(second.analysis["location_analysis"]["tag"], "cached");
        assert_eq!(h.model.calls(), 1);

        // generation reuses it as well: only the recommendation call happens
        h.model.push_json(crops(&["Okra"]));
        h.orchestrator.generate(request(&sensor_id, false)).await.unwrap();
        assert_eq!(h.model.calls(), 2);
        assert!(h.model.last_prompt().contains(r#""tag":"cached""#));
    }

    #[tokio::test]
    async fn test_context_view_keeps_its_own_fields() {
        // ---
        let h = harness(CannedThumbnails::default());
        let sensor_id = sensor(&h).await;
        let mut output = context_output("shadow");
        output["id"] = json!("model-id");
        output["reused"] = json!("maybe");
        h.model.push_json(output);

        let view = h
            .orchestrator
            .context_analysis(&sensor_id, None, false)
            .await
            .unwrap();
        assert!(!view.analysis.contains_key("id"));
        assert!(!view.analysis.contains_key("reused"));

        let body = serde_json::to_value(&view).unwrap();
        assert_eq!(body["id"], view.id.as_str());
        assert_eq!(body["reused"], false);
        assert_eq!(body["location_analysis"]["tag"], "shadow");
    }

    #[tokio::test]
    async fn test_refresh_purges_and_regenerates() {
        // ---
        let h = harness(CannedThumbnails::default());
        let sensor_id = sensor(&h).await;
        h.model
            .push_json(context_output("old"))
            .push_json(context_output("user"))
            .push_json(context_output("new"));

        let old = h.orchestrator.context_analysis(&sensor_id, None, false).await.unwrap();
        // a scoped request for a user sees no analysis of its own yet
        h.orchestrator
            .context_analysis(&sensor_id, Some("u-1".into()), false)
            .await
            .unwrap();
        assert_eq!(h.store.count("location_analysis").await, 2);

        let fresh = h.orchestrator.context_analysis(&sensor_id, None, true).await.unwrap();
        assert!(!fresh.reused);
        assert_ne!(fresh.id, old.id);
        assert_eq!(fresh.analysis["location_analysis"]["tag"], "new");
        // unscoped refresh purged every analysis for the sensor
        assert_eq!(h.store.count("location_analysis").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_sensor_ids() {
        // ---
        let h = harness(CannedThumbnails::default());

        let err = h.orchestrator.generate(request("abc", false)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidId(_)));

        let err = h
            .orchestrator
            .generate(request(&DocId::new().to_string(), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_partial_workflow_keeps_context_analysis() {
        // ---
        let h = harness(CannedThumbnails::default());
        let sensor_id = sensor(&h).await;
        h.model.push_json(context_output("kept")).push_failure();

        let err = h.orchestrator.generate(request(&sensor_id, false)).await.unwrap_err();

        assert!(err.to_string().starts_with("generating recommendations: "));
        assert_eq!(h.store.count("location_analysis").await, 1);
        assert_eq!(h.store.count("crop_recommendations").await, 0);
    }

    #[tokio::test]
    async fn test_bare_array_output_is_wrapped() {
        // ---
        let h = harness(CannedThumbnails::default());
        let sensor_id = sensor(&h).await;
        h.model
            .push_json(context_output("ctx"))
            .push_json(json!([{"crop": "Sitaw"}]));

        let result = h.orchestrator.generate(request(&sensor_id, false)).await.unwrap();
        assert_eq!(result.recommendations.len(), 1);
        assert_eq!(result.recommendations[0].name(), Some("Sitaw"));
    }

    #[tokio::test]
    async fn test_hardware_flow_marks_top_three_and_stores_readings() {
        // ---
        let h = harness(CannedThumbnails::with(&["tomato"]));
        let sensor_id = sensor(&h).await;
        let readings = SensorData {
            soil_moisture_pct: 45.5,
            temperature_c: 28.3,
            humidity_pct: 72.0,
            light_lux: 15000.0,
        };
        h.model
            .push_json(context_output("hw"))
            .push_json(crops(&["Tomato", "Pechay", "Okra", "Sitaw", "Kangkong"]))
            .push_json(crops(&["Mustasa"]));

        let result = h
            .orchestrator
            .hardware_readings(&sensor_id, readings)
            .await
            .unwrap();

        assert_eq!(result.top_3_crops, vec!["Tomato", "Pechay", "Okra"]);
        assert_eq!(result.total_crops_generated, 5);
        let flags: Vec<bool> = result.recommendations.iter().map(Crop::is_top_3).collect();
        assert_eq!(flags, vec![true, true, true, false, false]);
        assert!(h.model.last_prompt().contains(r#""soil_moisture_pct":45.5"#));
        assert!(h.model.last_prompt().contains("ALREADY GENERATED CROPS (do not repeat any of these):\n[]"));

        let sensor = h
            .orchestrator
            .sensors
            .get(sensor_id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sensor.doc.current_sensors, Some(readings));

        // the next run is told what was already generated
        h.orchestrator.hardware_readings(&sensor_id, readings).await.unwrap();
        assert!(h
            .model
            .last_prompt()
            .contains(r#"["Tomato","Pechay","Okra","Sitaw","Kangkong"]"#));
    }

    #[tokio::test]
    async fn test_enrichment_uses_searchable_name_then_crop() {
        // ---
        let h = harness(CannedThumbnails::with(&["bitter gourd", "Talong"]));
        let mut list = vec![
            Crop::from_map(
                json!({"crop": "Ampalaya", "searchable_name": "bitter gourd"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
            Crop::from_map(json!({"crop": "Talong"}).as_object().cloned().unwrap()),
            Crop::from_map(json!({"scores": {}}).as_object().cloned().unwrap()),
        ];

        h.orchestrator.enrich(&mut list).await;

        assert_eq!(list[0].image_url(), Some("https://img.test/bitter_gourd.jpg"));
        assert_eq!(list[1].image_url(), Some("https://img.test/Talong.jpg"));
        assert_eq!(list[2].image_url(), None);
        assert_eq!(*h.thumbs.lookups.lock().unwrap(), vec!["bitter gourd", "Talong"]);
    }
}
