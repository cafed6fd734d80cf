//! Origin Data Model & Record Source Abstraction
//!
//! Shared types describing CRM records and the trait origin connectors
//! implement. The engine in `core-sync` is written entirely against
//! [`RecordSource`], so connectors can be swapped for mocks in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::Result;

/// One entity instance at the origin (a contact, a company, ...).
///
/// Identity is the `(object type, id)` pair; the id is assigned by the
/// origin and never changes across syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Origin-assigned identifier, unique within its object type
    pub id: String,

    /// Named properties; absent values are kept as `None` so the writer can
    /// map them to SQL NULLs
    pub properties: HashMap<String, Option<String>>,

    /// Creation timestamp, when the origin reports one
    pub created_at: Option<DateTime<Utc>>,

    /// Last-modified timestamp, when the origin reports one
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_deref())
    }

    /// The record's modification time per the object type's modified
    /// property, falling back to the envelope timestamp.
    pub fn modified_at(&self, spec: &ObjectSpec) -> Option<DateTime<Utc>> {
        self.property(&spec.modified_property)
            .and_then(parse_origin_timestamp)
            .or(self.updated_at)
    }
}

/// Parse a timestamp the way the origin serializes property values
/// (RFC 3339, e.g. `2024-03-01T10:00:00.000Z`).
pub fn parse_origin_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Per-object-type replication parameters.
///
/// The modified-property name differs between object types at the origin,
/// so it is carried here rather than hardcoded anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// API path segment, e.g. `contacts`
    pub object_type: String,

    /// Destination table name
    pub table: String,

    /// Domain properties replicated column-per-property
    pub properties: Vec<String>,

    /// Name of the last-modified property at the origin
    pub modified_property: String,
}

impl ObjectSpec {
    pub fn new(
        object_type: impl Into<String>,
        table: impl Into<String>,
        properties: Vec<String>,
        modified_property: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            table: table.into(),
            properties,
            modified_property: modified_property.into(),
        }
    }

    /// The built-in contacts object type.
    pub fn contacts() -> Self {
        Self::new(
            "contacts",
            "contacts",
            vec![
                "email".to_string(),
                "firstname".to_string(),
                "lastname".to_string(),
                "phone".to_string(),
                "jobtitle".to_string(),
                "company".to_string(),
                "createdate".to_string(),
            ],
            "lastmodifieddate",
        )
    }

    /// The built-in companies object type.
    pub fn companies() -> Self {
        Self::new(
            "companies",
            "companies",
            vec![
                "name".to_string(),
                "domain".to_string(),
                "industry".to_string(),
                "city".to_string(),
                "country".to_string(),
                "createdate".to_string(),
            ],
            "hs_lastmodifieddate",
        )
    }

    /// Properties to request from the origin: the domain properties plus
    /// the modified-date property needed for watermark computation.
    pub fn fetch_properties(&self) -> Vec<String> {
        let mut all = self.properties.clone();
        if !all.iter().any(|p| *p == self.modified_property) {
            all.push(self.modified_property.clone());
        }
        all
    }
}

/// Half-open time window `[start, end)` used by windowed search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// One page of a full listing.
#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<Record>,
    pub next_after: Option<String>,
}

/// One page of an id-only listing.
#[derive(Debug, Clone)]
pub struct IdPage {
    pub ids: Vec<String>,
    pub next_after: Option<String>,
}

/// One page of a filtered search, including the origin's total match count
/// for the filter (the number the result cap applies to).
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub records: Vec<Record>,
    pub next_after: Option<String>,
    pub total: u64,
}

/// Ordered collection of origin ids with the set algebra reconciliation
/// and soft-delete detection are built on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet(BTreeSet<String>);

impl IdSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids present in `self` but not in `other`.
    pub fn difference(&self, other: &IdSet) -> IdSet {
        IdSet(self.0.difference(&other.0).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}

impl FromIterator<String> for IdSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<String> for IdSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// Async origin API trait
///
/// Implementations own rate limiting and retries: a returned error means
/// the attempt budget is spent or the request itself was rejected.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page of the unfiltered listing (full-load path).
    async fn list_page(&self, spec: &ObjectSpec, after: Option<&str>) -> Result<RecordPage>;

    /// Fetch one page of the id-only listing (reconciliation path).
    async fn list_ids_page(&self, spec: &ObjectSpec, after: Option<&str>) -> Result<IdPage>;

    /// Fetch one page of records modified within `range` (incremental path).
    async fn search_modified(
        &self,
        spec: &ObjectSpec,
        range: &TimeRange,
        after: Option<&str>,
    ) -> Result<SearchPage>;

    /// Fetch full records for specific ids. Implementations accept at most
    /// their batch-read limit per call; callers chunk.
    async fn read_batch(&self, spec: &ObjectSpec, ids: &[String]) -> Result<Vec<Record>>;

    /// Create records at the origin (seeding and test harnesses).
    async fn create_batch(
        &self,
        spec: &ObjectSpec,
        inputs: &[HashMap<String, String>],
    ) -> Result<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record_with(prop: &str, value: &str) -> Record {
        let mut properties = HashMap::new();
        properties.insert(prop.to_string(), Some(value.to_string()));
        Record {
            id: "1".to_string(),
            properties,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_modified_at_parses_property() {
        let spec = ObjectSpec::contacts();
        let record = record_with("lastmodifieddate", "2024-03-01T10:00:00.000Z");

        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(record.modified_at(&spec), Some(expected));
    }

    #[test]
    fn test_modified_at_falls_back_to_envelope() {
        let spec = ObjectSpec::contacts();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = Record {
            id: "1".to_string(),
            properties: HashMap::new(),
            created_at: None,
            updated_at: Some(ts),
        };

        assert_eq!(record.modified_at(&spec), Some(ts));
    }

    #[test]
    fn test_fetch_properties_appends_modified_property_once() {
        let spec = ObjectSpec::contacts();
        let props = spec.fetch_properties();
        assert!(props.contains(&"lastmodifieddate".to_string()));
        assert_eq!(
            props
                .iter()
                .filter(|p| *p == "lastmodifieddate")
                .count(),
            1
        );

        // Already listed: not duplicated
        let spec = ObjectSpec::new(
            "deals",
            "deals",
            vec!["amount".to_string(), "hs_lastmodifieddate".to_string()],
            "hs_lastmodifieddate",
        );
        assert_eq!(spec.fetch_properties().len(), 2);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let range = TimeRange::new(start, end);

        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(range.contains(end - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_id_set_difference() {
        let origin: IdSet = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let destination: IdSet = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();

        let missing = origin.difference(&destination);
        assert_eq!(missing.into_vec(), vec!["a".to_string()]);

        let deleted = destination.difference(&origin);
        assert_eq!(deleted.into_vec(), vec!["d".to_string()]);
    }
}
