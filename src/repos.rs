//! Typed repositories over the document store.
//!
//! This is the only module that knows history documents are nested inside
//! `{timestamp, data}` envelopes, and the only place filter paths are
//! spelled out. User scoping is a [`Scope`] value threaded through every
//! query: an absent `user_id` matches every document for the sensor,
//! including ones written before user scoping existed; a present one matches
//! only documents tagged with that user.

use std::marker::PhantomData;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::models::{
    ChatExchangeData, ContextAnalysisData, Crop, Envelope, FilteredRecommendationData, NewSensorLocation,
    NewUser, RecommendationData, SensorData, SensorLocation, SensorLocationDoc, User,
};
use crate::store::{DocId, Document, Filter, SharedStore, StoreResult};

// ---

/// Sensor / user restriction applied to history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub sensor_id: Option<String>,
    pub user_id: Option<String>,
}

impl Scope {
    pub fn sensor(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: Some(sensor_id.into()),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id.filter(|u| !u.trim().is_empty());
        self
    }
}

/// A history payload type and the collection it lives in.
pub trait HistoryRecord: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    /// Field inside `data` holding the user identifier.
    const USER_FIELD: &'static str = "user_id";
}

impl HistoryRecord for ContextAnalysisData {
    const COLLECTION: &'static str = "location_analysis";
}

impl HistoryRecord for RecommendationData {
    const COLLECTION: &'static str = "crop_recommendations";
}

impl HistoryRecord for FilteredRecommendationData {
    const COLLECTION: &'static str = "filtered_recommendations";
    const USER_FIELD: &'static str = "user_uid";
}

impl HistoryRecord for ChatExchangeData {
    const COLLECTION: &'static str = "chat_history";
}

/// A history document read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub id: DocId,
    pub envelope: Envelope<T>,
}

impl<T> Stored<T> {
    pub fn data(&self) -> &T {
        &self.envelope.data
    }
}

/// Append-mostly repository for one envelope collection.
pub struct History<T> {
    store: SharedStore,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for History<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _record: PhantomData,
        }
    }
}

pub type ContextAnalysisRepository = History<ContextAnalysisData>;
pub type RecommendationRepository = History<RecommendationData>;
pub type FilteredRecommendationRepository = History<FilteredRecommendationData>;
pub type ChatRepository = History<ChatExchangeData>;

impl<T: HistoryRecord> History<T> {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            _record: PhantomData,
        }
    }

    fn filter(scope: &Scope) -> Filter {
        Filter::new()
            .eq_opt("data.sensor_id", scope.sensor_id.clone())
            .eq_opt(&format!("data.{}", T::USER_FIELD), scope.user_id.clone())
    }

    fn decode(doc: Document) -> StoreResult<Stored<T>> {
        Ok(Stored {
            id: doc.id,
            envelope: serde_json::from_value(doc.body)?,
        })
    }

    /// Wrap `data` in a timestamped envelope and store it.
    pub async fn insert(&self, data: T) -> StoreResult<DocId> {
        // ---
        let body = serde_json::to_value(Envelope::now(data))?;
        let id = self.store.insert(T::COLLECTION, body).await?;
        tracing::debug!(collection = T::COLLECTION, %id, "history document stored");
        Ok(id)
    }

    pub async fn get(&self, id: DocId) -> StoreResult<Option<Stored<T>>> {
        self.store
            .find_by_id(T::COLLECTION, id)
            .await?
            .map(Self::decode)
            .transpose()
    }

    /// Most recent document in scope.
    pub async fn latest(&self, scope: &Scope) -> StoreResult<Option<Stored<T>>> {
        self.store
            .find_one(T::COLLECTION, &Self::filter(scope))
            .await?
            .map(Self::decode)
            .transpose()
    }

    /// Documents in scope, newest first.
    pub async fn list(&self, scope: &Scope, limit: Option<usize>) -> StoreResult<Vec<Stored<T>>> {
        self.store
            .find_many(T::COLLECTION, &Self::filter(scope), limit)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Remove every document in scope.
    pub async fn delete_for(&self, scope: &Scope) -> StoreResult<u64> {
        let removed = self
            .store
            .delete_many(T::COLLECTION, &Self::filter(scope))
            .await?;
        tracing::debug!(collection = T::COLLECTION, removed, "history documents deleted");
        Ok(removed)
    }
}

/// Result of a planted-flag update.
#[derive(Debug, Clone, PartialEq)]
pub enum PlantedUpdate {
    Updated { crop: Option<String>, planted: bool },
    SessionMissing,
    IndexOutOfRange { len: usize },
}

impl History<RecommendationData> {
    /// Set (or flip, when `planted` is `None`) one crop's `planted` flag.
    ///
    /// Edits the stored JSON in place so every other entry and field keeps
    /// its exact stored value.
    pub async fn set_planted(
        &self,
        id: DocId,
        index: usize,
        planted: Option<bool>,
    ) -> StoreResult<PlantedUpdate> {
        // ---
        let collection = RecommendationData::COLLECTION;
        let Some(doc) = self.store.find_by_id(collection, id).await? else {
            return Ok(PlantedUpdate::SessionMissing);
        };
        let Some(mut data) = doc.body.get("data").cloned() else {
            return Ok(PlantedUpdate::SessionMissing);
        };

        let Some(list) = data
            .pointer_mut("/output/recommendations")
            .and_then(Value::as_array_mut)
        else {
            return Ok(PlantedUpdate::IndexOutOfRange { len: 0 });
        };
        let len = list.len();
        let Some(Value::Object(entry)) = list.get_mut(index) else {
            return Ok(PlantedUpdate::IndexOutOfRange { len });
        };

        let mut crop = Crop::from_map(std::mem::take(entry));
        let next = planted.unwrap_or(!crop.planted());
        crop.set_planted(next);
        let name = crop.name().map(str::to_string);
        *entry = crop.into_fields();

        let mut set = Map::new();
        set.insert("data".to_string(), data);
        if !self.store.update_one(collection, id, set).await? {
            return Ok(PlantedUpdate::SessionMissing);
        }
        Ok(PlantedUpdate::Updated {
            crop: name,
            planted: next,
        })
    }
}

impl History<FilteredRecommendationData> {
    /// Filtered views derived from one recommendation session, newest first.
    pub async fn for_session(&self, session_id: DocId) -> StoreResult<Vec<Stored<FilteredRecommendationData>>> {
        let filter = Filter::new().eq("data.session_id", session_id.to_string());
        self.store
            .find_many(FilteredRecommendationData::COLLECTION, &filter, None)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }
}

// ---

const SENSOR_COLLECTION: &str = "sensor_locations";
const USER_COLLECTION: &str = "users";

/// Sensor locations (flat entity documents).
#[derive(Clone)]
pub struct SensorRepository {
    store: SharedStore,
}

impl SensorRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn decode(doc: Document) -> StoreResult<SensorLocation> {
        Ok(SensorLocation {
            sensor_id: doc.id.to_string(),
            doc: serde_json::from_value(doc.body)?,
        })
    }

    /// New locations start with the default reading set.
    pub async fn create(&self, new: NewSensorLocation) -> StoreResult<SensorLocation> {
        // ---
        let doc = SensorLocationDoc {
            name: new.name,
            location: new.location,
            description: new.description,
            created_at: Utc::now(),
            last_updated: None,
            current_sensors: Some(SensorData::default()),
        };
        let id = self
            .store
            .insert(SENSOR_COLLECTION, serde_json::to_value(&doc)?)
            .await?;

        Ok(SensorLocation {
            sensor_id: id.to_string(),
            doc,
        })
    }

    pub async fn get(&self, id: DocId) -> StoreResult<Option<SensorLocation>> {
        self.store
            .find_by_id(SENSOR_COLLECTION, id)
            .await?
            .map(Self::decode)
            .transpose()
    }

    pub async fn list(&self) -> StoreResult<Vec<SensorLocation>> {
        self.store
            .find_many(SENSOR_COLLECTION, &Filter::new(), None)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    /// Overwrite the snapshot wholesale. Returns false for an unknown id.
    pub async fn replace_snapshot(&self, id: DocId, sensors: SensorData) -> StoreResult<bool> {
        // ---
        let mut set = Map::new();
        set.insert("current_sensors".to_string(), serde_json::to_value(sensors)?);
        set.insert("last_updated".to_string(), json!(Utc::now()));
        self.store.update_one(SENSOR_COLLECTION, id, set).await
    }
}

/// Users, unique by (first_name, last_name).
#[derive(Clone)]
pub struct UserRepository {
    store: SharedStore,
}

impl UserRepository {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Return the user with these names, creating it on first registration.
    pub async fn register(&self, new: NewUser) -> StoreResult<User> {
        // ---
        let by_name = Filter::new()
            .eq("first_name", new.first_name.clone())
            .eq("last_name", new.last_name.clone());

        if let Some(existing) = self.store.find_one(USER_COLLECTION, &by_name).await? {
            let user: User = serde_json::from_value(existing.body)?;
            tracing::debug!(user_id = %user.user_id, "returning existing user");
            return Ok(user);
        }

        let user = User {
            user_id: Uuid::new_v4().to_string(),
            first_name: new.first_name,
            last_name: new.last_name,
            created_at: Utc::now(),
        };
        self.store
            .insert(USER_COLLECTION, serde_json::to_value(&user)?)
            .await?;
        tracing::info!(user_id = %user.user_id, "registered new user");
        Ok(user)
    }

    pub async fn get_by_user_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        let filter = Filter::new().eq("user_id", Value::String(user_id.to_string()));
        self.store
            .find_one(USER_COLLECTION, &filter)
            .await?
            .map(|doc| serde_json::from_value(doc.body).map_err(Into::into))
            .transpose()
    }
}
