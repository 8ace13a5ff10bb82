//! Payload-derived audit events.
//!
//! A table of `(field, event_type)` rules: when a job's JSON payload carries
//! the field, an extra event is recorded before the job runs.

use serde_json::Value;

/// One payload field to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEventRule {
    pub field: String,
    pub event_type: String,
}

impl PayloadEventRule {
    pub fn new(field: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            event_type: event_type.into(),
        }
    }
}

/// An event derived from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEvent {
    pub event_type: String,
    pub message: String,
}

/// Ordered set of payload rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEventTable {
    rules: Vec<PayloadEventRule>,
}

impl Default for PayloadEventTable {
    fn default() -> Self {
        Self::new(vec![
            PayloadEventRule::new("color", "COLOR"),
            PayloadEventRule::new("notify", "NOTIFY"),
        ])
    }
}

impl PayloadEventTable {
    #[must_use]
    pub const fn new(rules: Vec<PayloadEventRule>) -> Self {
        Self { rules }
    }

    /// Events `payload` triggers, in rule order. Non-object payloads trigger none.
    #[must_use]
    pub fn events_for(&self, payload: &str) -> Vec<PayloadEvent> {
        if self.rules.is_empty() {
            return Vec::new();
        }
        let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };

        self.rules
            .iter()
            .filter_map(|rule| {
                let value = fields.get(&rule.field)?;
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some(PayloadEvent {
                    event_type: rule.event_type.clone(),
                    message: format!("{}={rendered}", rule.field),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_fields_produce_events() {
        let table = PayloadEventTable::default();
        let events = table.events_for(r#"{"action":"paint","color":"red","notify":true}"#);

        assert_eq!(
            events,
            vec![
                PayloadEvent {
                    event_type: "COLOR".to_string(),
                    message: "color=red".to_string(),
                },
                PayloadEvent {
                    event_type: "NOTIFY".to_string(),
                    message: "notify=true".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_unmatched_or_opaque_payloads() {
        let table = PayloadEventTable::default();

        assert!(table.events_for(r#"{"action":"noop"}"#).is_empty());
        assert!(table.events_for("not json").is_empty());
        assert!(table.events_for(r#"["color"]"#).is_empty());
    }

    #[test]
    fn test_custom_rules() {
        let table = PayloadEventTable::new(vec![PayloadEventRule::new("region", "REGION")]);
        let events = table.events_for(r#"{"region":"eu-west","color":"red"}"#);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "region=eu-west");
        assert!(PayloadEventTable::new(Vec::new()).events_for(r#"{"color":"red"}"#).is_empty());
    }
}
