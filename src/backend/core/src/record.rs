//! Event record assembly.
//!
//! [`EventRecorder`] turns one submission plus its [`SkewDecision`] into an
//! immutable [`EventRecord`]. It does not persist anything; the caller hands
//! the record to a [`RecordStore`](crate::store::RecordStore).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::{self, ClockSource};
use crate::config::RecordConfig;
use crate::skew::{Confidence, SkewDecision};

/// Source of opaque record identifiers.
pub trait IdSource: Send + Sync {
    fn new_id(&self) -> String;
}

/// UUID v4 identifiers in simple (unhyphenated) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdSource;

impl IdSource for UuidIdSource {
    fn new_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Raw submission body.
///
/// Fields are kept as JSON values and coerced when the record is built, so a
/// mistyped optional field is dropped instead of failing the submission.
/// The Portuguese names used by earlier clients are accepted as aliases.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    #[serde(default, alias = "usuario")]
    pub user: Value,
    #[serde(default, alias = "tipo")]
    pub kind: Value,
    #[serde(default, alias = "origem")]
    pub origin: Value,
    #[serde(default)]
    pub lat: Value,
    #[serde(default)]
    pub lng: Value,
    #[serde(default)]
    pub accuracy_meters: Value,
    #[serde(default)]
    pub time_zone: Value,
    #[serde(default, alias = "agrupadorId")]
    pub group_id: Value,
    #[serde(default)]
    pub client_id: Value,
    #[serde(default)]
    pub device_wall_timestamp: Value,
    #[serde(default, alias = "approxServerMs")]
    pub approx_server_millis: Value,
    #[serde(default)]
    pub device_utc_offset_minutes: Value,
    #[serde(default)]
    pub network_state: Value,
}

impl EventInput {
    /// Client-claimed server time as handed to the skew policy.
    ///
    /// Absent or `null` is no claim. A value of any other JSON type is a
    /// claim that is not a number and maps to NaN so it is rejected.
    pub fn approx_server_claim(&self) -> Option<f64> {
        match &self.approx_server_millis {
            Value::Null => None,
            Value::Number(n) => Some(n.as_f64().unwrap_or(f64::NAN)),
            _ => Some(f64::NAN),
        }
    }
}

/// Audit trail of how the official timestamp was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAudit {
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew_millis: Option<i64>,
    pub clock_source: ClockSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_utc_offset_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_state: Option<String>,
}

/// One persisted time-clock event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: String,

    #[serde(alias = "usuario")]
    pub user: String,

    /// Event type, e.g. "entrada" or "saida"
    #[serde(alias = "tipo")]
    pub kind: String,

    /// ISO-8601 UTC, always chosen by the server
    #[serde(alias = "data")]
    pub official_timestamp: String,

    #[serde(default, alias = "origem", skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(default, alias = "agrupadorId", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// Client correlation id for offline reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Device clock at capture, echoed unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_wall_timestamp: Option<Value>,
    /// Client-claimed server time, echoed whether or not it was accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_server_millis: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<RecordAudit>,
}

/// Builds [`EventRecord`]s.
pub struct EventRecorder {
    ids: Arc<dyn IdSource>,
    config: RecordConfig,
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("config", &self.config)
            .finish()
    }
}

impl EventRecorder {
    pub fn new(ids: Arc<dyn IdSource>, config: RecordConfig) -> Self {
        Self { ids, config }
    }

    pub fn with_uuid_ids(config: RecordConfig) -> Self {
        Self::new(Arc::new(UuidIdSource), config)
    }

    /// Materialize one record. Pure apart from drawing an id.
    pub fn record(
        &self,
        input: &EventInput,
        decision: &SkewDecision,
        clock_source: ClockSource,
    ) -> EventRecord {
        let audit = self.config.audit_metadata.then(|| RecordAudit {
            confidence: decision.confidence(),
            skew_millis: decision.skew_millis,
            clock_source,
            device_utc_offset_minutes: coerce_integer(&input.device_utc_offset_minutes),
            network_state: coerce_string(&input.network_state),
        });

        EventRecord {
            id: self.ids.new_id(),
            user: coerce_string(&input.user).unwrap_or_else(|| self.config.default_user.clone()),
            kind: coerce_string(&input.kind).unwrap_or_else(|| self.config.default_kind.clone()),
            official_timestamp: clock::iso_from_millis(decision.epoch_millis),
            origin: Some(
                coerce_string(&input.origin).unwrap_or_else(|| self.config.default_origin.clone()),
            ),
            lat: coerce_number(&input.lat),
            lng: coerce_number(&input.lng),
            accuracy_meters: coerce_integer(&input.accuracy_meters),
            time_zone: coerce_string(&input.time_zone),
            group_id: coerce_string(&input.group_id),
            client_id: coerce_string(&input.client_id),
            device_wall_timestamp: match &input.device_wall_timestamp {
                Value::Null => None,
                other => Some(other.clone()),
            },
            approx_server_millis: coerce_integer(&input.approx_server_millis),
            audit,
        }
    }
}

/// Strings as-is; numbers and booleans in their JSON text form.
fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Finite JSON numbers only. Numeric strings are not numbers.
fn coerce_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

/// JSON numbers rounded to the nearest integer, when they fit.
fn coerce_integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    let rounded = coerce_number(value)?.round();
    (rounded >= i64::MIN as f64 && rounded < i64::MAX as f64).then_some(rounded as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skew;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_704_067_200_000;

    struct CountingIds(AtomicUsize);

    impl IdSource for CountingIds {
        fn new_id(&self) -> String {
            format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn recorder(config: RecordConfig) -> EventRecorder {
        EventRecorder::new(Arc::new(CountingIds(AtomicUsize::new(0))), config)
    }

    fn input(body: Value) -> EventInput {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_defaults_applied_to_empty_input() {
        let recorder = recorder(RecordConfig::default());
        let decision = skew::resolve(None, NOW, 600_000);
        let record = recorder.record(&EventInput::default(), &decision, ClockSource::Reference);

        assert_eq!(record.id, "id-0");
        assert_eq!(record.user, "Desconhecido");
        assert_eq!(record.kind, "entrada");
        assert_eq!(record.origin.as_deref(), Some("online"));
        assert_eq!(record.official_timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(record.approx_server_millis, None);

        let audit = record.audit.unwrap();
        assert_eq!(audit.confidence, Confidence::Server);
        assert_eq!(audit.clock_source, ClockSource::Reference);
    }

    #[test]
    fn test_accepted_claim_sets_official_timestamp() {
        let recorder = recorder(RecordConfig::default());
        let input = input(json!({
            "user": "ana",
            "kind": "saida",
            "approxServerMillis": (NOW - 5_000) as f64 + 0.6,
        }));
        let decision = skew::resolve(input.approx_server_claim(), NOW, 600_000);
        let record = recorder.record(&input, &decision, ClockSource::Reference);

        assert_eq!(record.official_timestamp, "2023-12-31T23:59:55.001Z");
        assert_eq!(record.approx_server_millis, Some(NOW - 4_999));
        assert_eq!(record.audit.unwrap().confidence, Confidence::ClientAccepted);
    }

    #[test]
    fn test_rejected_claim_is_still_echoed() {
        let recorder = recorder(RecordConfig::default());
        let input = input(json!({ "approxServerMillis": NOW - 7_200_000 }));
        let decision = skew::resolve(input.approx_server_claim(), NOW, 600_000);
        let record = recorder.record(&input, &decision, ClockSource::Host);

        assert_eq!(record.official_timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(record.approx_server_millis, Some(NOW - 7_200_000));

        let audit = record.audit.unwrap();
        assert_eq!(audit.confidence, Confidence::ClientRejected);
        assert_eq!(audit.skew_millis, Some(-7_200_000));
        assert_eq!(audit.clock_source, ClockSource::Host);
    }

    #[test]
    fn test_non_numeric_claim_is_rejected_and_not_echoed() {
        let input = input(json!({ "approxServerMillis": "1704067200000" }));
        assert!(input.approx_server_claim().unwrap().is_nan());

        let decision = skew::resolve(input.approx_server_claim(), NOW, 600_000);
        let record = recorder(RecordConfig::default()).record(&input, &decision, ClockSource::Reference);
        assert!(!decision.accepted);
        assert_eq!(record.approx_server_millis, None);
        assert_eq!(record.audit.unwrap().confidence, Confidence::ClientRejected);
    }

    #[test]
    fn test_passthrough_fields_are_coerced() {
        let input = input(json!({
            "usuario": "joao",
            "tipo": "saida",
            "origem": "offline",
            "lat": -23.5505,
            "lng": "not a number",
            "accuracyMeters": 12.6,
            "timeZone": "America/Sao_Paulo",
            "agrupadorId": 42,
            "clientId": "local-7",
            "deviceWallTimestamp": "2024-01-01T00:00:03.000Z",
            "deviceUtcOffsetMinutes": -180,
            "networkState": "offline",
        }));
        let decision = skew::resolve(None, NOW, 600_000);
        let record = recorder(RecordConfig::default()).record(&input, &decision, ClockSource::Reference);

        assert_eq!(record.user, "joao");
        assert_eq!(record.kind, "saida");
        assert_eq!(record.origin.as_deref(), Some("offline"));
        assert_eq!(record.lat, Some(-23.5505));
        assert_eq!(record.lng, None);
        assert_eq!(record.accuracy_meters, Some(13));
        assert_eq!(record.time_zone.as_deref(), Some("America/Sao_Paulo"));
        assert_eq!(record.group_id.as_deref(), Some("42"));
        assert_eq!(record.client_id.as_deref(), Some("local-7"));
        assert_eq!(
            record.device_wall_timestamp,
            Some(json!("2024-01-01T00:00:03.000Z"))
        );

        let audit = record.audit.unwrap();
        assert_eq!(audit.device_utc_offset_minutes, Some(-180));
        assert_eq!(audit.network_state.as_deref(), Some("offline"));
    }

    #[test]
    fn test_audit_metadata_can_be_disabled() {
        let config = RecordConfig {
            audit_metadata: false,
            ..RecordConfig::default()
        };
        let decision = skew::resolve(None, NOW, 600_000);
        let record = recorder(config).record(&EventInput::default(), &decision, ClockSource::Reference);

        assert!(record.audit.is_none());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("audit").is_none());
        assert!(json.get("lat").is_none());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let input = input(json!({ "clientId": "c1", "approxServerMillis": NOW }));
        let decision = skew::resolve(input.approx_server_claim(), NOW, 600_000);
        let record = recorder(RecordConfig::default()).record(&input, &decision, ClockSource::Reference);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["officialTimestamp"], "2024-01-01T00:00:00.000Z");
        assert_eq!(json["clientId"], "c1");
        assert_eq!(json["approxServerMillis"], NOW);
        assert_eq!(json["audit"]["confidence"], "client_accepted");
        assert_eq!(json["audit"]["clockSource"], "reference");
    }

    #[test]
    fn test_legacy_record_deserializes() {
        let legacy = json!({
            "id": "V1StGX",
            "usuario": "maria",
            "tipo": "entrada",
            "data": "2023-05-01T11:00:00.000Z",
            "origem": "online",
            "agrupadorId": "g1",
        });
        let record: EventRecord = serde_json::from_value(legacy).unwrap();

        assert_eq!(record.user, "maria");
        assert_eq!(record.official_timestamp, "2023-05-01T11:00:00.000Z");
        assert_eq!(record.group_id.as_deref(), Some("g1"));
        assert!(record.audit.is_none());
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidIdSource;
        let a = ids.new_id();
        let b = ids.new_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
