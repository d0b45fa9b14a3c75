//! Data models for dictionary entries and regions
//!
//! This module defines the domain types handed to the UI layer and the raw
//! payload schemas the API returns. Raw records are decoded item by item:
//! a record that cannot be decoded becomes a placeholder so a single bad
//! record never fails a whole list.

use std::collections::BTreeSet;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Fallback headword for records without one
pub const MISSING_WORD: &str = "Unknown word";
/// Fallback meaning for records without one
pub const MISSING_MEANING: &str = "Meaning not available";
/// Region id given to entries that name no region
pub const UNASSIGNED_REGION_ID: &str = "0";
/// Label shown for entries whose region is unknown
pub const UNKNOWN_REGION: &str = "Unknown region";
/// Fallback display name for regions without one
pub const MISSING_REGION_NAME: &str = "Unnamed region";
/// Id prefix and tag of placeholders standing in for undecodable records
pub const ERROR_TAG: &str = "error";

/// A single dictionary word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryEntry {
    /// Unique identifier, always non-empty
    pub id: String,
    /// The headword
    pub word: String,
    /// Definition text
    pub meaning: String,
    /// Usage sentence
    pub example: Option<String>,
    /// Id of the owning region, always non-empty
    pub region_id: String,
    /// Display name of the owning region, when the API includes it
    pub region_name: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl DictionaryEntry {
    pub fn new(
        id: impl Into<String>,
        word: impl Into<String>,
        meaning: impl Into<String>,
        region_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            word: word.into(),
            meaning: meaning.into(),
            example: None,
            region_id: region_id.into(),
            region_name: None,
            notes: None,
            tags: BTreeSet::new(),
        }
    }

    /// Entry standing in for a raw record that could not be decoded
    pub fn error_placeholder(reason: impl Into<String>) -> Self {
        let mut entry = Self::new(
            format!("{ERROR_TAG}-{}", random_suffix()),
            "[invalid entry]",
            "This entry could not be loaded.",
            UNASSIGNED_REGION_ID,
        );
        entry.notes = Some(reason.into());
        entry.tags.insert(ERROR_TAG.to_string());
        entry
    }

    pub fn is_placeholder(&self) -> bool {
        self.tags.contains(ERROR_TAG) && self.id.starts_with(ERROR_TAG)
    }

    /// Region name for display; dangling region ids render as unknown
    pub fn region_label(&self) -> &str {
        self.region_name.as_deref().unwrap_or(UNKNOWN_REGION)
    }
}

/// An administrative region entries are grouped under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub capital: Option<String>,
    /// Flag image reference
    pub flag: Option<String>,
    /// Emblem image reference
    pub emblem: Option<String>,
}

impl Region {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            capital: None,
            flag: None,
            emblem: None,
        }
    }

    /// Region standing in for a raw record that could not be decoded
    pub fn error_placeholder(reason: impl Into<String>) -> Self {
        let mut region = Self::new(format!("{ERROR_TAG}-{}", random_suffix()), "[invalid region]");
        region.description = Some(reason.into());
        region
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(ERROR_TAG) && self.name == "[invalid region]"
    }
}

/// Raw entry record as returned by `/entries`
///
/// Field names follow the API; the domain names are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntry {
    #[serde(default, deserialize_with = "loose_id")]
    pub id: Option<String>,
    #[serde(default, alias = "word")]
    pub term: Option<String>,
    #[serde(default, alias = "meaning")]
    pub definition: Option<String>,
    #[serde(default, alias = "example")]
    pub usage_example: Option<String>,
    #[serde(
        default,
        alias = "stateId",
        alias = "regionId",
        deserialize_with = "loose_id"
    )]
    pub state_id: Option<String>,
    /// Nested owning region
    #[serde(default, alias = "region")]
    pub state: Option<RawRegionRef>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Region reference nested inside a raw entry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRegionRef {
    #[serde(default, deserialize_with = "loose_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Raw region record as returned by `/regions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRegion {
    #[serde(default, deserialize_with = "loose_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default, alias = "flag")]
    pub flag_url: Option<String>,
    #[serde(default, alias = "emblem")]
    pub coat_of_arms_url: Option<String>,
}

impl From<RawEntry> for DictionaryEntry {
    fn from(raw: RawEntry) -> Self {
        let (nested_id, region_name) = match raw.state {
            Some(state) => (state.id, non_blank(state.name)),
            None => (None, None),
        };

        Self {
            id: raw.id.unwrap_or_else(|| format!("entry-{}", random_suffix())),
            word: non_blank(raw.term).unwrap_or_else(|| MISSING_WORD.to_string()),
            meaning: non_blank(raw.definition).unwrap_or_else(|| MISSING_MEANING.to_string()),
            example: non_blank(raw.usage_example),
            region_id: raw
                .state_id
                .or(nested_id)
                .unwrap_or_else(|| UNASSIGNED_REGION_ID.to_string()),
            region_name,
            notes: non_blank(raw.notes),
            tags: raw
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl From<RawRegion> for Region {
    fn from(raw: RawRegion) -> Self {
        Self {
            id: raw.id.unwrap_or_else(|| format!("region-{}", random_suffix())),
            name: non_blank(raw.name).unwrap_or_else(|| MISSING_REGION_NAME.to_string()),
            description: non_blank(raw.description),
            capital: non_blank(raw.capital),
            flag: non_blank(raw.flag_url),
            emblem: non_blank(raw.coat_of_arms_url),
        }
    }
}

/// Coerce a list payload into its items
///
/// A lone object is treated as a one-element list and `null` as an empty
/// one; anything else cannot be coerced.
pub fn coerce_list(payload: Value) -> Result<Vec<Value>> {
    match payload {
        Value::Array(items) => Ok(items),
        Value::Object(_) => {
            log::warn!("Expected a list but received a single object, wrapping it");
            Ok(vec![payload])
        }
        Value::Null => Ok(Vec::new()),
        other => Err(Error::MalformedResponse(format!(
            "expected a list of records, got {}",
            describe(&other)
        ))),
    }
}

/// Decode one raw entry
pub fn decode_entry(item: Value) -> Result<DictionaryEntry> {
    Ok(serde_json::from_value::<RawEntry>(item)?.into())
}

/// Decode one raw region
pub fn decode_region(item: Value) -> Result<Region> {
    Ok(serde_json::from_value::<RawRegion>(item)?.into())
}

/// Decode a list of raw entries, replacing undecodable items with placeholders
pub fn map_entries(items: Vec<Value>) -> Vec<DictionaryEntry> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            decode_entry(item).unwrap_or_else(|e| {
                log::warn!("Entry #{i} could not be mapped: {e}");
                DictionaryEntry::error_placeholder(e.to_string())
            })
        })
        .collect()
}

/// Decode a list of raw regions, replacing undecodable items with placeholders
pub fn map_regions(items: Vec<Value>) -> Vec<Region> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            decode_region(item).unwrap_or_else(|e| {
                log::warn!("Region #{i} could not be mapped: {e}");
                Region::error_placeholder(e.to_string())
            })
        })
        .collect()
}

/// Accept ids sent as strings or numbers
fn loose_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or numeric id, got {}",
            describe(&other)
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_mapping_uses_api_field_names() {
        let entry = decode_entry(json!({
            "id": 17,
            "term": "Arroio",
            "definition": "Small stream",
            "usage_example": "Cruzamos o arroio a pé.",
            "state_id": 21,
            "state": {"id": 21, "name": "Rio Grande do Sul"},
            "tags": ["hydrography", " "]
        }))
        .unwrap();

        assert_eq!(entry.id, "17");
        assert_eq!(entry.word, "Arroio");
        assert_eq!(entry.meaning, "Small stream");
        assert_eq!(entry.example.as_deref(), Some("Cruzamos o arroio a pé."));
        assert_eq!(entry.region_id, "21");
        assert_eq!(entry.region_label(), "Rio Grande do Sul");
        assert_eq!(entry.tags.len(), 1);
        assert!(!entry.is_placeholder());
    }

    #[test]
    fn test_entry_mapping_fallbacks() {
        let entry = decode_entry(json!({"state": {"id": "5"}})).unwrap();
        assert!(entry.id.starts_with("entry-"));
        assert_eq!(entry.word, MISSING_WORD);
        assert_eq!(entry.meaning, MISSING_MEANING);
        assert_eq!(entry.region_id, "5");
        assert_eq!(entry.region_label(), UNKNOWN_REGION);

        let entry = decode_entry(json!({"id": "3", "word": "oxe", "meaning": "surprise"})).unwrap();
        assert_eq!(entry.word, "oxe");
        assert_eq!(entry.region_id, UNASSIGNED_REGION_ID);
    }

    #[test]
    fn test_bad_items_become_placeholders() {
        let items = vec![
            json!({"id": 1, "term": "a"}),
            json!({"id": 2, "term": "b"}),
            json!(42),
            json!({"id": {"nested": true}, "term": "c"}),
            json!({"id": 5, "term": "e"}),
        ];

        let entries = map_entries(items);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.iter().filter(|e| e.is_placeholder()).count(), 2);
        assert!(entries[2].id.starts_with("error-"));
        assert_ne!(entries[2].id, entries[3].id);
        assert_eq!(entries[4].id, "5");
    }

    #[test]
    fn test_coerce_list() {
        assert_eq!(coerce_list(json!([1, 2])).unwrap().len(), 2);
        assert_eq!(coerce_list(json!({"id": 1})).unwrap(), vec![json!({"id": 1})]);
        assert!(coerce_list(Value::Null).unwrap().is_empty());
        assert!(matches!(
            coerce_list(json!("oops")),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_region_mapping() {
        let region = decode_region(json!({
            "id": 43,
            "name": "Rio Grande do Sul",
            "capital": "Porto Alegre",
            "flag_url": "https://img.example.org/rs.png"
        }))
        .unwrap();
        assert_eq!(region.id, "43");
        assert_eq!(region.capital.as_deref(), Some("Porto Alegre"));
        assert_eq!(region.flag.as_deref(), Some("https://img.example.org/rs.png"));
        assert!(region.emblem.is_none());

        let regions = map_regions(vec![json!({"id": 1}), json!("texas")]);
        assert_eq!(regions[0].name, MISSING_REGION_NAME);
        assert!(regions[1].is_placeholder());
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let entry = DictionaryEntry::new("1", "uai", "expression of surprise", "31");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["regionId"], "31");
        assert!(json.get("region_id").is_none());
    }
}
