//! Execution context: payload, metadata, event trace, and completed-step
//! bookkeeping.
//!
//! One context is created per run and mutated in place by the executing
//! tree. The trace is append-only and its timestamps come from a monotonic
//! clock, so trace order is execution order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{SerializationError, StepError};
use crate::name::StepName;

/// What a trace event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An attempt of a task began.
    Start,
    /// An attempt of a task succeeded.
    End,
    /// An attempt of a task failed.
    Error,
    /// A failed attempt will be retried after a backoff.
    Retry,
    /// A compensator is about to run.
    CompensateStart,
    /// A compensator succeeded.
    CompensateEnd,
    /// A compensator failed; the rollback continues regardless.
    CompensateError,
}

/// Payload attached to a trace event: a structured failure, backoff info,
/// or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventDetail {
    /// The failure that triggered an `error` or `compensate_error` event.
    Failure(StepError),
    /// The wait announced by a `retry` event.
    Backoff {
        /// Milliseconds until the next attempt.
        next_delay_ms: u64,
    },
    /// Free-form text.
    Text(String),
}

impl EventDetail {
    /// An empty detail.
    pub fn none() -> Self {
        EventDetail::Text(String::new())
    }
}

impl From<StepError> for EventDetail {
    fn from(error: StepError) -> Self {
        EventDetail::Failure(error)
    }
}

/// One entry in the chronological trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The node the event targets.
    pub node: StepName,
    /// Milliseconds since the context was created, monotonic.
    #[serde(rename = "ts")]
    pub ts_ms: u64,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Structured or free-form payload.
    pub detail: EventDetail,
}

/// Per-run mutable state shared by every node of an executing tree.
///
/// The runner guarantees at-most-one active task at a time, so no internal
/// locking is needed. Two concurrent runs against the same context are
/// undefined and must be prevented by the caller.
pub struct ExecutionContext<T> {
    /// User-supplied payload.
    pub data: T,
    /// Arbitrary caller annotations (ids, timestamps, tenant info).
    pub metadata: BTreeMap<String, Value>,
    trace: Vec<Event>,
    completed_steps: BTreeSet<StepName>,
    epoch: Instant,
    ts_offset_ms: u64,
}

impl<T: fmt::Debug> fmt::Debug for ExecutionContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("data", &self.data)
            .field("metadata", &self.metadata)
            .field("trace_len", &self.trace.len())
            .field("completed_steps", &self.completed_steps)
            .finish()
    }
}

impl<T: PartialEq> PartialEq for ExecutionContext<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
            && self.metadata == other.metadata
            && self.trace == other.trace
            && self.completed_steps == other.completed_steps
    }
}

impl<T> ExecutionContext<T> {
    /// Creates a fresh context around the given payload.
    pub fn new(data: T) -> Self {
        Self {
            data,
            metadata: BTreeMap::new(),
            trace: Vec::new(),
            completed_steps: BTreeSet::new(),
            epoch: Instant::now(),
            ts_offset_ms: 0,
        }
    }

    /// Appends an event to the trace, stamping it with the current monotonic
    /// offset. Timestamps are non-decreasing by construction.
    pub fn emit(&mut self, kind: EventKind, node: &StepName, attempt: u32, detail: EventDetail) {
        let ts_ms = self.ts_offset_ms + self.epoch.elapsed().as_millis() as u64;
        self.trace.push(Event {
            kind,
            node: node.clone(),
            ts_ms,
            attempt,
            detail,
        });
    }

    /// Records that the named task executed successfully.
    pub fn mark_completed(&mut self, name: &StepName) {
        self.completed_steps.insert(name.clone());
    }

    /// Returns `true` if the named task completed successfully this run.
    pub fn was_completed(&self, name: &str) -> bool {
        self.completed_steps.contains(name)
    }

    /// The chronological trace.
    pub fn trace(&self) -> &[Event] {
        &self.trace
    }

    /// The set of successfully completed task names.
    pub fn completed_steps(&self) -> &BTreeSet<StepName> {
        &self.completed_steps
    }
}

const KNOWN_FIELDS: [&str; 4] = ["data", "metadata", "trace", "completed_steps"];

#[derive(Serialize)]
struct ContextWire<'a, T> {
    data: &'a T,
    metadata: &'a BTreeMap<String, Value>,
    trace: &'a [Event],
    completed_steps: TaggedSet<'a>,
}

/// Sets round-trip as `{"__set__": [...]}` so they survive JSON, which has
/// no set type.
#[derive(Serialize)]
struct TaggedSet<'a> {
    #[serde(rename = "__set__")]
    members: Vec<&'a StepName>,
}

impl<T: Serialize> ExecutionContext<T> {
    /// Serializes the context to a JSON string.
    pub fn to_json(&self) -> Result<String, SerializationError> {
        let wire = ContextWire {
            data: &self.data,
            metadata: &self.metadata,
            trace: &self.trace,
            completed_steps: TaggedSet {
                members: self.completed_steps.iter().collect(),
            },
        };
        serde_json::to_string_pretty(&wire).map_err(|e| SerializationError::Malformed(e.to_string()))
    }
}

impl<T: DeserializeOwned> ExecutionContext<T> {
    /// Reconstructs a context from a JSON string.
    ///
    /// `data` is mandatory and is reconstructed into `T`; use
    /// `ExecutionContext::<serde_json::Value>::from_json` when no typed
    /// schema is available. Unknown fields and missing optional fields are
    /// logged as warnings, not errors.
    pub fn from_json(raw: &str) -> Result<Self, SerializationError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| SerializationError::Malformed(e.to_string()))?;
        let obj = match value {
            Value::Object(obj) => obj,
            _ => {
                return Err(SerializationError::Malformed(
                    "expected a JSON object".to_string(),
                ))
            }
        };

        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                warn!(field = %key, "ignoring unknown context field");
            }
        }

        let data_value = obj
            .get("data")
            .ok_or(SerializationError::MissingField("data"))?;
        let data = serde_json::from_value(data_value.clone()).map_err(|e| {
            SerializationError::InvalidField {
                field: "data",
                reason: e.to_string(),
            }
        })?;

        let metadata = match obj.get("metadata") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(_) => {
                return Err(SerializationError::InvalidField {
                    field: "metadata",
                    reason: "expected an object".to_string(),
                })
            }
            None => {
                warn!("context payload has no metadata field, defaulting to empty");
                BTreeMap::new()
            }
        };

        let trace: Vec<Event> = match obj.get("trace") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                SerializationError::InvalidField {
                    field: "trace",
                    reason: e.to_string(),
                }
            })?,
            None => {
                warn!("context payload has no trace field, defaulting to empty");
                Vec::new()
            }
        };

        let completed_steps = match obj.get("completed_steps") {
            Some(Value::Object(map)) => {
                let members = map
                    .get("__set__")
                    .ok_or(SerializationError::InvalidField {
                        field: "completed_steps",
                        reason: "missing '__set__' tag".to_string(),
                    })?;
                let names: Vec<StepName> =
                    serde_json::from_value(members.clone()).map_err(|e| {
                        SerializationError::InvalidField {
                            field: "completed_steps",
                            reason: e.to_string(),
                        }
                    })?;
                names.into_iter().collect()
            }
            Some(_) => {
                return Err(SerializationError::InvalidField {
                    field: "completed_steps",
                    reason: "expected a '__set__'-tagged object".to_string(),
                })
            }
            None => {
                warn!("context payload has no completed_steps field, defaulting to empty");
                BTreeSet::new()
            }
        };

        // Resume the monotonic clock past the restored trace so future
        // events keep timestamps non-decreasing.
        let ts_offset_ms = trace.iter().map(|e| e.ts_ms).max().unwrap_or(0);

        Ok(Self {
            data,
            metadata,
            trace,
            completed_steps,
            epoch: Instant::now(),
            ts_offset_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn name(s: &str) -> StepName {
        StepName::new(s)
    }

    #[test]
    fn test_emit_and_completion() {
        let mut ctx = ExecutionContext::new(0u32);
        let a = name("a");
        ctx.emit(EventKind::Start, &a, 1, EventDetail::none());
        ctx.emit(EventKind::End, &a, 1, EventDetail::none());
        ctx.mark_completed(&a);

        assert_eq!(ctx.trace().len(), 2);
        assert!(ctx.was_completed("a"));
        assert!(!ctx.was_completed("b"));
    }

    #[test]
    fn test_trace_timestamps_non_decreasing() {
        let mut ctx = ExecutionContext::new(());
        let a = name("a");
        for attempt in 1..=5 {
            ctx.emit(EventKind::Start, &a, attempt, EventDetail::none());
            std::thread::sleep(std::time::Duration::from_millis(2));
            ctx.emit(EventKind::End, &a, attempt, EventDetail::none());
        }
        let stamps: Vec<u64> = ctx.trace().iter().map(|e| e.ts_ms).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        user_id: u64,
        email: String,
    }

    #[test]
    fn test_round_trip() {
        let mut ctx = ExecutionContext::new(Payload {
            user_id: 7,
            email: "ada@example.com".to_string(),
        });
        ctx.metadata
            .insert("run_id".to_string(), serde_json::json!("r-123"));
        let a = name("create_account");
        ctx.emit(EventKind::Start, &a, 1, EventDetail::none());
        ctx.emit(
            EventKind::Error,
            &a,
            1,
            EventDetail::Failure(StepError::user("smtp down")),
        );
        ctx.emit(EventKind::Retry, &a, 1, EventDetail::Backoff { next_delay_ms: 10 });
        ctx.emit(EventKind::Start, &a, 2, EventDetail::none());
        ctx.emit(EventKind::End, &a, 2, EventDetail::none());
        ctx.mark_completed(&a);

        let raw = ctx.to_json().unwrap();
        let restored = ExecutionContext::<Payload>::from_json(&raw).unwrap();
        assert_eq!(restored, ctx);
    }

    #[test]
    fn test_set_tag_on_the_wire() {
        let mut ctx = ExecutionContext::new(());
        ctx.mark_completed(&name("a"));
        ctx.mark_completed(&name("b"));
        let raw = ctx.to_json().unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["completed_steps"]["__set__"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_untyped_payload_round_trip() {
        let raw = r#"{"data": {"k": 1}, "metadata": {}, "trace": [], "completed_steps": {"__set__": []}}"#;
        let ctx = ExecutionContext::<Value>::from_json(raw).unwrap();
        assert_eq!(ctx.data["k"], 1);
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let raw = r#"{"metadata": {}}"#;
        let err = ExecutionContext::<Value>::from_json(raw).unwrap_err();
        assert!(matches!(err, SerializationError::MissingField("data")));
    }

    #[test]
    fn test_unknown_and_missing_optional_fields_tolerated() {
        let raw = r#"{"data": 1, "surprise": true}"#;
        let ctx = ExecutionContext::<u32>::from_json(raw).unwrap();
        assert_eq!(ctx.data, 1);
        assert!(ctx.trace().is_empty());
        assert!(ctx.completed_steps().is_empty());
    }

    #[test]
    fn test_untagged_set_rejected() {
        let raw = r#"{"data": 1, "completed_steps": ["a"]}"#;
        let err = ExecutionContext::<u32>::from_json(raw).unwrap_err();
        assert!(matches!(
            err,
            SerializationError::InvalidField {
                field: "completed_steps",
                ..
            }
        ));
    }

    #[test]
    fn test_timestamps_resume_after_restore() {
        let mut ctx = ExecutionContext::new(());
        let a = name("a");
        std::thread::sleep(std::time::Duration::from_millis(3));
        ctx.emit(EventKind::Start, &a, 1, EventDetail::none());
        let raw = ctx.to_json().unwrap();

        let mut restored = ExecutionContext::<()>::from_json(&raw).unwrap();
        restored.emit(EventKind::End, &a, 1, EventDetail::none());
        let trace = restored.trace();
        assert!(trace[1].ts_ms >= trace[0].ts_ms);
    }

    #[test]
    fn test_error_detail_round_trips_kind() {
        let mut ctx = ExecutionContext::new(());
        let a = name("a");
        ctx.emit(
            EventKind::Error,
            &a,
            1,
            EventDetail::Failure(StepError::new("rate_limited", "throttled")),
        );
        let raw = ctx.to_json().unwrap();
        let restored = ExecutionContext::<()>::from_json(&raw).unwrap();
        match &restored.trace()[0].detail {
            EventDetail::Failure(error) => {
                assert_eq!(error.kind, ErrorKind::Other("rate_limited".to_string()));
            }
            other => panic!("expected a failure detail, got {other:?}"),
        }
    }
}
