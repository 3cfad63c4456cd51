//! Shared data models for the synonymer API.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

// --- Explanations ---

/// One generated version of an explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplanationEntry {
    pub explanation: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
}

/// A word together with every explanation generated for it so far.
///
/// `entries` only ever grows: a regeneration appends a new version, and the
/// last element is the current one. An empty list means the backend worker
/// has not finished the first generation yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Explanation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub word: String,
    #[serde(default)]
    pub entries: Vec<ExplanationEntry>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<NaiveDateTime>,
}

impl Explanation {
    /// The most recent generated entry, if any.
    pub fn current_entry(&self) -> Option<&ExplanationEntry> {
        self.entries.last()
    }

    /// True while the backend is still producing the first entry.
    pub fn is_generating(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One page of the explanation listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExplanationPage {
    pub items: Vec<Explanation>,
    pub total: u64,
    #[serde(default)]
    pub skip: u32,
    #[serde(default)]
    pub limit: u32,
}

impl ExplanationPage {
    /// The page returned when listing fails: no items, nothing in total.
    pub fn empty(skip: u32, limit: u32) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            skip,
            limit,
        }
    }
}

/// Paging and filtering for `GET /api/explanations`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListParams {
    pub skip: u32,
    pub limit: u32,
    pub query: Option<String>,
}

impl ListParams {
    pub fn new(skip: u32, limit: u32) -> Self {
        Self {
            skip,
            limit,
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = if query.trim().is_empty() {
            None
        } else {
            Some(query)
        };
        self
    }
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateExplanationRequest {
    pub word: String,
}

// --- Nuance comparison ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NuanceRequest {
    pub word1: String,
    pub word2: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormalityLevel {
    Word1MoreFormal,
    Word2MoreFormal,
    EquallyFormal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalWeight {
    Word1Stronger,
    Word2Stronger,
    EquallyStrong,
}

/// Derived comparison of two words.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynonymNuance {
    pub word1: String,
    pub word2: String,
    pub nuance_explanation: String,
    #[serde(default)]
    pub usage_examples: Vec<String>,
    pub context_differences: String,
    pub formality_level: FormalityLevel,
    pub emotional_weight: EmotionalWeight,
}

// --- Auth ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCheckResponse {
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    #[serde(default)]
    pub message: String,
}

// --- Timestamps ---

/// The backend writes naive ISO-8601 datetimes; accept RFC 3339 with an
/// offset as well and normalize it to UTC.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        None => Ok(None),
    }
}
