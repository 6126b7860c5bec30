//! The beacon directory: known beacons for one session.
//!
//! Fetched once per session and immutable afterwards. Records are decoded
//! one at a time; a record that does not decode, has no identifier, or whose
//! location does not parse is dropped and counted. One bad record never
//! fails the whole load.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::Coordinate;
use crate::types::RawBeacon;

/// A beacon with a parsed location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconRecord {
    /// Unique beacon identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Parsed location.
    pub coordinate: Coordinate,
    /// Longer description.
    pub description: Option<String>,
    /// Who placed the beacon.
    pub created_by: Option<String>,
    /// Picture of the spot.
    pub image_url: Option<String>,
}

impl BeaconRecord {
    /// Convert a raw record, or `None` if it has no identifier or its
    /// location does not parse.
    #[must_use]
    pub fn from_raw(raw: RawBeacon) -> Option<Self> {
        let id = raw.identifier()?.to_string();
        let coordinate = Coordinate::parse(&raw.location)?;
        Some(Self {
            id,
            name: raw.name,
            coordinate,
            description: raw.description,
            created_by: raw.created_by,
            image_url: raw.image_url,
        })
    }
}

/// Where raw beacon records come from.
#[async_trait]
pub trait BeaconSource: Send + Sync {
    /// Fetch every beacon the user may hunt, as undecoded JSON records.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch itself fails (network, auth).
    async fn fetch_beacons(&self) -> Result<Vec<Value>>;
}

/// Immutable snapshot of the known beacons, in server order.
#[derive(Debug, Clone, Default)]
pub struct BeaconDirectory {
    beacons: Arc<[BeaconRecord]>,
    skipped: usize,
}

impl BeaconDirectory {
    /// Fetch and parse the directory.
    ///
    /// # Errors
    ///
    /// Propagates a failed fetch. Unparseable records are not errors.
    pub async fn load(source: &dyn BeaconSource) -> Result<Self> {
        let records = source.fetch_beacons().await?;
        let directory = Self::from_json(records);
        debug!(
            beacons = directory.len(),
            skipped = directory.skipped(),
            "beacon directory loaded"
        );
        Ok(directory)
    }

    /// Decode JSON records one by one, then parse them as with
    /// [`from_raw`](Self::from_raw). Undecodable records count as skipped.
    #[must_use]
    pub fn from_json(records: Vec<Value>) -> Self {
        let total = records.len();
        let raw: Vec<RawBeacon> = records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value(record) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(index, error = %e, "skipping undecodable beacon record");
                    None
                }
            })
            .collect();
        let mut directory = Self::from_raw(raw);
        directory.skipped = total - directory.len();
        directory
    }

    /// Parse raw records, dropping and counting the malformed ones.
    #[must_use]
    pub fn from_raw(raw: Vec<RawBeacon>) -> Self {
        let total = raw.len();
        let beacons: Vec<BeaconRecord> = raw
            .into_iter()
            .filter_map(|r| {
                let id = r.identifier().map(str::to_string);
                let location = r.location.clone();
                let parsed = BeaconRecord::from_raw(r);
                match (&parsed, id) {
                    (Some(_), _) => {}
                    (None, None) => warn!("skipping beacon without an identifier"),
                    (None, Some(id)) => warn!(
                        beacon_id = %id,
                        location = %location,
                        "skipping beacon with unparseable location"
                    ),
                }
                parsed
            })
            .collect();
        let skipped = total - beacons.len();
        Self {
            beacons: beacons.into(),
            skipped,
        }
    }

    /// All usable beacons, in server order.
    #[must_use]
    pub fn beacons(&self) -> &[BeaconRecord] {
        &self.beacons
    }

    /// Look up a beacon by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BeaconRecord> {
        self.beacons.iter().find(|b| b.id == id)
    }

    /// Number of usable beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Whether no beacon is usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Number of records dropped as undecodable, unidentified, or with an
    /// unparseable location.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::QuestError;
    use serde_json::json;

    /// Serves a fixed list, or fails like a dropped connection.
    pub(crate) struct FixtureSource(pub Option<Vec<RawBeacon>>);

    #[async_trait]
    impl BeaconSource for FixtureSource {
        async fn fetch_beacons(&self) -> Result<Vec<Value>> {
            let records = self
                .0
                .clone()
                .ok_or_else(|| QuestError::NetworkFailure("connection reset".into()))?;
            Ok(records
                .iter()
                .map(|r| serde_json::to_value(r).unwrap())
                .collect())
        }
    }

    /// Serves JSON exactly as given.
    struct JsonSource(Vec<Value>);

    #[async_trait]
    impl BeaconSource for JsonSource {
        async fn fetch_beacons(&self) -> Result<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    pub(crate) fn raw(id: &str, location: &str) -> RawBeacon {
        RawBeacon {
            beacon_id: Some(id.to_string()),
            id: None,
            name: format!("Beacon {id}"),
            location: location.to_string(),
            description: None,
            created_by: None,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_dropped() {
        let source = FixtureSource(Some(vec![raw("a", "1.0, 2.0"), raw("b", "bad,data")]));
        let directory = BeaconDirectory::load(&source).await.unwrap();

        assert_eq!(directory.len(), 1);
        assert_eq!(directory.skipped(), 1);
        assert_eq!(directory.beacons()[0].coordinate, Coordinate::new(1.0, 2.0));
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped_not_fatal() {
        let source = JsonSource(vec![
            json!({"id": 5, "beacon_id": "B-1", "name": "Fig", "location": "1.0, 2.0"}),
            json!({"id": 6, "name": "Pond", "location": "3.0, 4.0"}),
            json!({"name": "Nameless", "location": "5.0, 6.0"}),
            json!({"beacon_id": "B-4", "name": ["not", "a", "name"], "location": "1.0, 1.0"}),
            json!(42),
        ]);
        let directory = BeaconDirectory::load(&source).await.unwrap();

        let ids: Vec<&str> = directory.beacons().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["B-1", "6"]);
        assert_eq!(directory.skipped(), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let source = FixtureSource(None);
        let err = BeaconDirectory::load(&source).await.unwrap_err();
        assert!(matches!(err, QuestError::NetworkFailure(_)));
    }

    #[test]
    fn test_order_is_preserved() {
        let directory = BeaconDirectory::from_raw(vec![
            raw("z", "0.0, 0.0"),
            raw("x", ""),
            raw("a", "0.5, 0.5"),
        ]);
        let ids: Vec<&str> = directory.beacons().iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["z", "a"]);
        assert!(directory.get("a").is_some());
        assert!(directory.get("x").is_none());
    }

    #[test]
    fn test_empty_directory() {
        let directory = BeaconDirectory::from_raw(Vec::new());
        assert!(directory.is_empty());
        assert_eq!(directory.skipped(), 0);
    }
}
