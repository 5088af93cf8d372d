//! Free-text questions about a recommendation session.
//!
//! Missing upstream data is an expected outcome here, not an error: callers
//! get `{success: false, error_code, message}` and are expected to branch on
//! the code.

use serde::{Deserialize, Serialize, Serializer};
use tracing::{info, info_span, Instrument};

use super::{Orchestrator, Stage};
use crate::error::{AppError, Context};
use crate::llm::GenerationParams;
use crate::models::{ChatExchangeData, FarmerInput};
use crate::prompts::{self, format_php, Bindings};
use crate::repos::Scope;

// ---

const NOT_SPECIFIED: &str = "Not specified";

/// Body of `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "user_message")]
    pub message: String,
    pub sensor_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session to discuss; defaults to the newest one in scope.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Overrides the farmer profile recorded with the session.
    #[serde(default)]
    pub farmer: Option<FarmerInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreconditionCode {
    NoContext,
    NoRecommendations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingPrecondition {
    pub error_code: PreconditionCode,
    pub message: String,
}

impl MissingPrecondition {
    fn no_context() -> Self {
        Self {
            error_code: PreconditionCode::NoContext,
            message: "No context analysis found for this sensor. Generate recommendations first."
                .to_string(),
        }
    }

    fn no_recommendations() -> Self {
        Self {
            error_code: PreconditionCode::NoRecommendations,
            message: "No crop recommendations found for this sensor. Generate recommendations first."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub sensor_id: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Reply(ChatReply),
    Missing(MissingPrecondition),
}

impl Serialize for ChatOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Tagged<'a, T> {
            success: bool,
            #[serde(flatten)]
            body: &'a T,
        }

        match self {
            ChatOutcome::Reply(body) => Tagged { success: true, body }.serialize(serializer),
            ChatOutcome::Missing(body) => Tagged { success: false, body }.serialize(serializer),
        }
    }
}

impl Orchestrator {
    /// Answer a question using the session's context and recommendations.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, AppError> {
        // ---
        if request.message.trim().is_empty() {
            return Err(AppError::BadRequest("Message must not be empty".to_string()));
        }

        let (_, sensor) = self
            .fetch_sensor(&request.sensor_id)
            .instrument(info_span!("stage", stage = %Stage::FetchingSensor))
            .await?;
        let scope = Scope::sensor(sensor.sensor_id.clone()).with_user(request.user_id.clone());

        let session = match request.session_id.as_deref() {
            Some(id) => {
                let session = self.load_session(id).await?;
                if session.data().sensor_id != sensor.sensor_id {
                    return Err(AppError::NotFound(
                        "Recommendation session not found for this sensor".to_string(),
                    ));
                }
                Some(session)
            }
            None => self.recommendations.latest(&scope).await?,
        };

        let context = match session.as_ref().and_then(|s| s.data().context_data.clone()) {
            Some(ctx) if !ctx.is_null() => Some(ctx),
            _ => self
                .contexts
                .latest(&scope)
                .await?
                .map(|stored| stored.envelope.data.output),
        };
        let Some(context) = context else {
            info!(sensor_id = %sensor.sensor_id, "chat without context analysis");
            return Ok(ChatOutcome::Missing(MissingPrecondition::no_context()));
        };
        let Some(session) = session.filter(|s| !s.data().output.recommendations.is_empty()) else {
            info!(sensor_id = %sensor.sensor_id, "chat without recommendations");
            return Ok(ChatOutcome::Missing(MissingPrecondition::no_recommendations()));
        };

        let farmer = request
            .farmer
            .as_ref()
            .or(session.data().input.farmer.as_ref());
        let prompt = prompts::fill(
            prompts::CHAT_PROMPT,
            &profile_bindings(farmer)
                .text("user_message", request.message.trim())
                .text("sensor_id", sensor.sensor_id.clone())
                .text("location", sensor.doc.location.clone())
                .json("context_data", &context)
                .json("recommendations", &session.data().output.recommendations),
        );

        let response = self
            .model
            .generate_text(&prompt, GenerationParams::CHAT)
            .await
            .context("answering chat message")?;

        let exchange = ChatExchangeData {
            session_id: session.id.to_string(),
            sensor_id: sensor.sensor_id.clone(),
            user_id: scope.user_id.clone(),
            user_message: request.message,
            response: response.clone(),
        };
        self.chats.insert(exchange).await.context("storing chat exchange")?;

        info!(session_id = %session.id, chars = response.len(), "chat answered");
        Ok(ChatOutcome::Reply(ChatReply {
            session_id: session.id.to_string(),
            sensor_id: sensor.sensor_id,
            response,
        }))
    }
}

fn profile_bindings(farmer: Option<&FarmerInput>) -> Bindings {
    // ---
    let bindings = Bindings::new();
    match farmer {
        Some(f) => bindings
            .text("crop_category", f.crop_category.clone())
            .text("budget", format_php(f.budget_php))
            .text("land_size", f.land_size_ha.to_string())
            .text("manpower", f.manpower.to_string())
            .text("waiting_tolerance", f.waiting_tolerance_days.to_string()),
        None => bindings
            .text("crop_category", NOT_SPECIFIED)
            .text("budget", NOT_SPECIFIED)
            .text("land_size", NOT_SPECIFIED)
            .text("manpower", NOT_SPECIFIED)
            .text("waiting_tolerance", NOT_SPECIFIED),
    }
}
