//! Operations over stored recommendation sessions: retrieval, the planted
//! toggle, per-sensor deletion and preference filtering.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use super::{normalize_recommendations, Orchestrator, Stage};
use crate::error::{parse_id, AppError, Context};
use crate::llm::GenerationParams;
use crate::models::{FarmerInput, FilteredRecommendationData, RecommendationData};
use crate::prompts::{self, Bindings};
use crate::repos::{PlantedUpdate, Scope, Stored};
use crate::store::DocId;

// ---

/// Most crops a filtered view may hold.
const FILTER_CAP: usize = 5;

/// A recommendation session as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub data: RecommendationData,
}

impl From<Stored<RecommendationData>> for SessionView {
    fn from(stored: Stored<RecommendationData>) -> Self {
        Self {
            id: stored.id.to_string(),
            timestamp: stored.envelope.timestamp,
            data: stored.envelope.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredView {
    pub id: String,
    pub timestamp: DateTime<FixedOffset>,
    pub data: FilteredRecommendationData,
}

impl From<Stored<FilteredRecommendationData>> for FilteredView {
    fn from(stored: Stored<FilteredRecommendationData>) -> Self {
        Self {
            id: stored.id.to_string(),
            timestamp: stored.envelope.timestamp,
            data: stored.envelope.data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantedView {
    pub session_id: String,
    pub index: usize,
    pub crop: Option<String>,
    pub planted: bool,
}

/// Counts from deleting a sensor's history. A side that failed reports zero
/// and its error text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeletionReport {
    pub context_analysis: u64,
    pub recommendations: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Body of `POST /recommendations/sessions/{session_id}/filter`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRequest {
    pub farmer: FarmerInput,
    #[serde(default, alias = "user_id")]
    pub user_uid: Option<String>,
}

impl Orchestrator {
    pub(super) async fn load_session(&self, session_id: &str) -> Result<Stored<RecommendationData>, AppError> {
        // ---
        let id: DocId = parse_id(session_id, "session_id")?;
        self.recommendations
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("Recommendation session"))
    }

    /// Newest recommendation set for a sensor.
    pub async fn latest_session(&self, sensor_id: &str, user_id: Option<String>) -> Result<SessionView, AppError> {
        // ---
        let scope = Scope::sensor(sensor_id).with_user(user_id);
        self.recommendations
            .latest(&scope)
            .await?
            .map(SessionView::from)
            .ok_or_else(|| AppError::NotFound("No recommendations found for this sensor".to_string()))
    }

    /// Recommendation sets for a sensor, newest first.
    pub async fn session_history(
        &self,
        sensor_id: &str,
        user_id: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionView>, AppError> {
        let scope = Scope::sensor(sensor_id).with_user(user_id);
        let sessions = self.recommendations.list(&scope, limit).await?;
        Ok(sessions.into_iter().map(SessionView::from).collect())
    }

    pub async fn session(&self, session_id: &str) -> Result<SessionView, AppError> {
        Ok(self.load_session(session_id).await?.into())
    }

    /// Set one crop's `planted` flag, or flip it when `planted` is `None`.
    pub async fn set_planted(
        &self,
        session_id: &str,
        index: usize,
        planted: Option<bool>,
    ) -> Result<PlantedView, AppError> {
        // ---
        let id: DocId = parse_id(session_id, "session_id")?;
        match self.recommendations.set_planted(id, index, planted).await? {
            PlantedUpdate::Updated { crop, planted } => {
                info!(%id, index, planted, "planted flag updated");
                Ok(PlantedView {
                    session_id: id.to_string(),
                    index,
                    crop,
                    planted,
                })
            }
            PlantedUpdate::SessionMissing => Err(AppError::not_found("Recommendation session")),
            PlantedUpdate::IndexOutOfRange { len } => Err(AppError::BadRequest(format!(
                "Crop index {index} out of range (session has {len} crops)"
            ))),
        }
    }

    /// Delete every context analysis and recommendation set for a sensor.
    ///
    /// The two collections are cleared independently. One side failing is
    /// reported in the counts; both failing is an error.
    pub async fn delete_sensor_data(
        &self,
        sensor_id: &str,
        user_id: Option<String>,
    ) -> Result<DeletionReport, AppError> {
        // ---
        parse_id::<DocId>(sensor_id, "sensor_id")?;
        let scope = Scope::sensor(sensor_id).with_user(user_id);

        let contexts = self.contexts.delete_for(&scope).await;
        let recommendations = self.recommendations.delete_for(&scope).await;

        let (contexts, recommendations) = match (contexts, recommendations) {
            (Err(source), Err(other)) => {
                warn!(sensor_id, error = %other, "recommendation deletion failed");
                return Err(AppError::Store {
                    context: "deleting sensor data".to_string(),
                    source,
                });
            }
            results => results,
        };

        let mut report = DeletionReport::default();
        match contexts {
            Ok(n) => report.context_analysis = n,
            Err(e) => report.errors.push(format!("context analysis: {e}")),
        }
        match recommendations {
            Ok(n) => report.recommendations = n,
            Err(e) => report.errors.push(format!("recommendations: {e}")),
        }
        report.total = report.context_analysis + report.recommendations;

        if report.errors.is_empty() {
            info!(sensor_id, total = report.total, "sensor data deleted");
        } else {
            warn!(sensor_id, errors = ?report.errors, "sensor data partially deleted");
        }
        Ok(report)
    }

    /// Narrow a session to at most five crops matching new preferences.
    pub async fn filter_session(&self, session_id: &str, request: FilterRequest) -> Result<FilteredView, AppError> {
        // ---
        let session = self.load_session(session_id).await?;
        let parent = session.data();

        let available = parent.output.crop_names();
        if available.is_empty() {
            return Err(AppError::NotFound(
                "Recommendation session has no crops to filter".to_string(),
            ));
        }

        let context = self.session_context(parent).await?;

        let prompt = prompts::fill(
            prompts::FILTER_RECOMMENDATION_PROMPT,
            &Bindings::new()
                .json("available_crops", &available)
                .json("context_data", &context)
                .json("farmer_input", &request.farmer),
        );
        let raw = self
            .model
            .generate_json(&prompt, GenerationParams::STRUCTURED)
            .instrument(info_span!("stage", stage = %Stage::GeneratingRecommendations))
            .await
            .context("filtering recommendations")?;

        let explanation = raw
            .get("filter_explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut output = normalize_recommendations(raw);
        if output.recommendations.len() > FILTER_CAP {
            info!(
                returned = output.recommendations.len(),
                kept = FILTER_CAP,
                "truncating filtered recommendations"
            );
            output.recommendations.truncate(FILTER_CAP);
        }

        let allowed: HashSet<&str> = available.iter().map(String::as_str).collect();
        let outside: Vec<&str> = output
            .recommendations
            .iter()
            .filter_map(|c| c.name())
            .filter(|name| !allowed.contains(name))
            .collect();
        if !outside.is_empty() {
            warn!(?outside, "filter returned crops outside the session's list");
        }

        self.enrich(&mut output.recommendations)
            .instrument(info_span!("stage", stage = %Stage::Enriching))
            .await;

        let data = FilteredRecommendationData {
            session_id: session.id.to_string(),
            sensor_id: parent.sensor_id.clone(),
            user_uid: request.user_uid.filter(|u| !u.trim().is_empty()),
            farmer_input: request.farmer,
            filter_explanation: explanation,
            available_crops: available,
            output,
        };
        let id = self
            .filtered
            .insert(data)
            .instrument(info_span!("stage", stage = %Stage::Persisting))
            .await
            .context(Stage::Persisting)?;

        info!(filter_id = %id, session_id = %session.id, "filtered recommendations stored");
        self.filtered
            .get(id)
            .await?
            .map(FilteredView::from)
            .ok_or_else(|| AppError::not_found("Filtered recommendation"))
    }

    /// Context of a session, falling back to the sensor's latest analysis.
    /// The parent session is left untouched either way.
    async fn session_context(&self, session: &RecommendationData) -> Result<Value, AppError> {
        // ---
        if let Some(context) = session.context_data.as_ref().filter(|c| !c.is_null()) {
            return Ok(context.clone());
        }
        warn!(sensor_id = %session.sensor_id, "session has no context data, using latest analysis");
        self.contexts
            .latest(&Scope::sensor(session.sensor_id.clone()))
            .await
            .context(Stage::ResolvingContext)?
            .map(|stored| stored.envelope.data.output)
            .ok_or_else(|| AppError::not_found("Context analysis for this session"))
    }

    pub async fn filtered(&self, filter_id: &str) -> Result<FilteredView, AppError> {
        let id: DocId = parse_id(filter_id, "filter_id")?;
        self.filtered
            .get(id)
            .await?
            .map(FilteredView::from)
            .ok_or_else(|| AppError::not_found("Filtered recommendation"))
    }

    /// Filtered views derived from a session, newest first.
    pub async fn filtered_for_session(&self, session_id: &str) -> Result<Vec<FilteredView>, AppError> {
        let id: DocId = parse_id(session_id, "session_id")?;
        let views = self.filtered.for_session(id).await?;
        Ok(views.into_iter().map(FilteredView::from).collect())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;

    use serde_json::json;

    use super::super::testing::*;
    use super::*;
    use crate::models::{
        ContextAnalysisData, ContextInput, Crop, NewSensorLocation, RecommendationInput, SensorData,
    };
    use crate::repos::SensorRepository;
    use crate::store::{DocumentStore, MemoryDocumentStore};

    struct Harness {
        store: Arc<MemoryDocumentStore>,
        model: Arc<ScriptedModel>,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        let model = Arc::new(ScriptedModel::new());
        let thumbs = Arc::new(CannedThumbnails::with(&["pechay"]));
        let orchestrator = Orchestrator::new(store.clone(), model.clone(), thumbs, Some(6));
        Harness {
            store,
            model,
            orchestrator,
        }
    }

    fn farmer(category: &str) -> FarmerInput {
        FarmerInput {
            crop_category: category.into(),
            budget_php: 25000.0,
            waiting_tolerance_days: 60,
            land_size_ha: 1.0,
            manpower: 3,
            preferences: Some("low water".into()),
        }
    }

    fn session_data(sensor_id: &str, names: &[&str], context: Option<Value>) -> RecommendationData {
        let output = normalize_recommendations(crops(names));
        RecommendationData {
            sensor_id: sensor_id.into(),
            user_id: None,
            sensor_name: "North plot".into(),
            input: RecommendationInput {
                sensors: SensorData::default(),
                farmer: Some(farmer("Any")),
                location: "Malolos, Bulacan".into(),
                start_month: 6,
                source: Default::default(),
            },
            context_data: context,
            output,
        }
    }

    fn context_data(sensor_id: &str, tag: &str) -> ContextAnalysisData {
        ContextAnalysisData {
            sensor_id: sensor_id.into(),
            user_id: None,
            sensor_name: "North plot".into(),
            input: ContextInput {
                sensors: SensorData::default(),
                location: "Malolos, Bulacan".into(),
                start_month: 6,
            },
            output: context_output(tag),
        }
    }

    async fn sensor_id(h: &Harness) -> String {
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

    const NINE: [&str; 9] = [
        "Pechay", "Okra", "Sitaw", "Kangkong", "Talong", "Ampalaya", "Mustasa", "Upo", "Patola",
    ];

    #[tokio::test]
    async fn test_filter_caps_at_five() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        let session = h
            .orchestrator
            .recommendations
            .insert(session_data(&sensor, &NINE, Some(context_output("stored"))))
            .await
            .unwrap();

        let mut answer = crops(&NINE);
        answer["filter_explanation"] = json!("Prioritized short cycles.");
        h.model.push_json(answer);

        let view = h
            .orchestrator
            .filter_session(
                &session.to_string(),
                FilterRequest {
                    farmer: farmer("Vegetables"),
                    user_uid: Some("u-7".into()),
                },
            )
            .await
            .unwrap();

        let names = view.data.output.crop_names();
        assert_eq!(names, NINE[..5].to_vec());
        assert_eq!(view.data.filter_explanation, "Prioritized short cycles.");
        assert_eq!(view.data.available_crops.len(), 9);
        assert_eq!(view.data.user_uid.as_deref(), Some("u-7"));
        assert_eq!(
            view.data.output.recommendations[0].image_url(),
            Some("https://img.test/pechay.jpg")
        );

        // the prompt offers only the session's names and its stored context
        let prompt = h.model.last_prompt();
        assert!(prompt.contains(r#"["Pechay","Okra","Sitaw","Kangkong","Talong","Ampalaya","Mustasa","Upo","Patola"]"#));
        assert!(prompt.contains(r#""tag":"stored""#));
        assert!(prompt.contains(r#""crop_category":"Vegetables""#));

        let stored = h.orchestrator.filtered(&view.id).await.unwrap();
        assert_eq!(stored.data.output.recommendations.len(), 5);

        let listed = h
            .orchestrator
            .filtered_for_session(&session.to_string())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, view.id);
    }

    #[tokio::test]
    async fn test_filter_backfills_context_without_touching_parent() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        h.orchestrator
            .contexts
            .insert(context_data(&sensor, "backfill"))
            .await
            .unwrap();
        let parent = session_data(&sensor, &["Pechay", "Okra"], None);
        let session = h.orchestrator.recommendations.insert(parent.clone()).await.unwrap();

        h.model.push_json(json!({"filter_explanation": "ok", "recommendations": [{"crop": "Okra"}]}));
        h.orchestrator
            .filter_session(
                &session.to_string(),
                FilterRequest {
                    farmer: farmer("Vegetables"),
                    user_uid: None,
                },
            )
            .await
            .unwrap();

        assert!(h.model.last_prompt().contains(r#""tag":"backfill""#));
        let after = h.orchestrator.recommendations.get(session).await.unwrap().unwrap();
        assert_eq!(after.data(), &parent);
    }

    #[tokio::test]
    async fn test_filter_failures() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        let request = || FilterRequest {
            farmer: farmer("Any"),
            user_uid: None,
        };

        let err = h.orchestrator.filter_session("nope", request()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidId(_)));

        let err = h
            .orchestrator
            .filter_session(&DocId::new().to_string(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let empty = h
            .orchestrator
            .recommendations
            .insert(session_data(&sensor, &[], Some(context_output("x"))))
            .await
            .unwrap();
        let err = h
            .orchestrator
            .filter_session(&empty.to_string(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // no stored context and nothing to backfill from
        let bare = h
            .orchestrator
            .recommendations
            .insert(session_data(&sensor, &["Okra"], None))
            .await
            .unwrap();
        let err = h
            .orchestrator
            .filter_session(&bare.to_string(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_planted_toggle_changes_one_entry() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        let session = h
            .orchestrator
            .recommendations
            .insert(session_data(&sensor, &["Pechay", "Okra", "Sitaw"], None))
            .await
            .unwrap();
        let before = h.store.find_by_id("crop_recommendations", session).await.unwrap().unwrap();

        let view = h
            .orchestrator
            .set_planted(&session.to_string(), 1, None)
            .await
            .unwrap();
        assert_eq!(view.crop.as_deref(), Some("Okra"));
        assert!(view.planted);

        let after = h.store.find_by_id("crop_recommendations", session).await.unwrap().unwrap();
        let list_before = before.body.pointer("/data/output/recommendations").unwrap().as_array().unwrap();
        let list_after = after.body.pointer("/data/output/recommendations").unwrap().as_array().unwrap();
        assert_eq!(list_before[0], list_after[0]);
        assert_eq!(list_before[2], list_after[2]);

        let mut expected = list_before[1].clone();
        expected["planted"] = json!(true);
        assert_eq!(list_after[1], expected);
        assert_eq!(before.body["timestamp"], after.body["timestamp"]);
        assert_eq!(before.body["data"]["context_data"], after.body["data"]["context_data"]);

        // toggling again flips back; an explicit value is applied as given
        let view = h.orchestrator.set_planted(&session.to_string(), 1, None).await.unwrap();
        assert!(!view.planted);
        let view = h.orchestrator.set_planted(&session.to_string(), 2, Some(false)).await.unwrap();
        assert!(!view.planted);

        let err = h.orchestrator.set_planted(&session.to_string(), 3, None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        let err = h
            .orchestrator
            .set_planted(&DocId::new().to_string(), 0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_sensor_data_accounting() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        let other = sensor_id(&h).await;

        for tag in ["a", "b"] {
            h.orchestrator.contexts.insert(context_data(&sensor, tag)).await.unwrap();
        }
        for _ in 0..3 {
            h.orchestrator
                .recommendations
                .insert(session_data(&sensor, &["Okra"], None))
                .await
                .unwrap();
        }
        h.orchestrator
            .recommendations
            .insert(session_data(&other, &["Upo"], None))
            .await
            .unwrap();

        let report = h.orchestrator.delete_sensor_data(&sensor, None).await.unwrap();
        assert_eq!(
            report,
            DeletionReport {
                context_analysis: 2,
                recommendations: 3,
                total: 5,
                errors: Vec::new(),
            }
        );
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({"context_analysis": 2, "recommendations": 3, "total": 5})
        );

        let err = h.orchestrator.latest_session(&sensor, None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(h.orchestrator.session_history(&sensor, None, None).await.unwrap().is_empty());
        assert!(h.orchestrator.latest_session(&other, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        // ---
        let h = harness();
        let sensor = sensor_id(&h).await;
        for names in [["Pechay"], ["Okra"], ["Sitaw"]] {
            h.orchestrator
                .recommendations
                .insert(session_data(&sensor, &names, None))
                .await
                .unwrap();
        }

        let history = h
            .orchestrator
            .session_history(&sensor, None, Some(2))
            .await
            .unwrap();
        let firsts: Vec<Option<&str>> = history
            .iter()
            .map(|s| s.data.output.recommendations.first().and_then(Crop::name))
            .collect();
        assert_eq!(firsts, vec![Some("Sitaw"), Some("Okra")]);

        let latest = h.orchestrator.latest_session(&sensor, None).await.unwrap();
        assert_eq!(latest.id, history[0].id);
        assert_eq!(h.orchestrator.session(&latest.id).await.unwrap(), latest);
    }
}
