//! Log event → compact JSON document
//!
//! Two entry points: the full-event form (`@t`, `@mt`, `@r`, `@l`, `@x`, then
//! the properties) and the property-bag form. Neither filters properties;
//! callers pass an already reduced event or bag.

use chrono::Utc;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::event::{LogEvent, LogEventLevel, PropertyValue};
use crate::core::template::{FormatProvider, InvariantFormatProvider};
use crate::error::Result;

/// Event JSON Formatter
#[derive(Debug, Clone, Copy, Default)]
pub struct EventJsonFormatter;

impl EventJsonFormatter {
    /// Render the whole event; `@r` uses the invariant provider.
    pub fn format_event(&self, event: &LogEvent) -> Result<String> {
        self.format_event_with(event, &InvariantFormatProvider)
    }

    /// Render the whole event, `@r` entries formatted by `provider`.
    pub fn format_event_with(
        &self,
        event: &LogEvent,
        provider: &dyn FormatProvider,
    ) -> Result<String> {
        Ok(serde_json::to_string(&EventDocument { event, provider })?)
    }

    /// Render only the property bag, members in the map's iteration order.
    pub fn format_properties(
        &self,
        properties: &BTreeMap<String, PropertyValue>,
    ) -> Result<String> {
        Ok(serde_json::to_string(properties)?)
    }
}

/// `O` 格式的 UTC 时间戳：七位小数秒
fn round_trip_utc(event: &LogEvent) -> String {
    let utc = event.timestamp().with_timezone(&Utc);
    format!(
        "{}.{:07}Z",
        utc.format("%Y-%m-%dT%H:%M:%S"),
        utc.timestamp_subsec_nanos() / 100
    )
}

struct EventDocument<'a> {
    event: &'a LogEvent,
    provider: &'a dyn FormatProvider,
}

impl Serialize for EventDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let event = self.event;
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("@t", &round_trip_utc(event))?;
        map.serialize_entry("@mt", event.template().text())?;

        let renderings: Vec<String> = event
            .template()
            .property_tokens()
            .filter(|token| token.format().is_some())
            .map(|token| {
                let mut rendered = String::new();
                token.render(event.properties(), self.provider, &mut rendered);
                rendered
            })
            .collect();
        if !renderings.is_empty() {
            map.serialize_entry("@r", &renderings)?;
        }

        if event.level() != LogEventLevel::Information {
            map.serialize_entry("@l", event.level().name())?;
        }

        if let Some(exception) = event.exception() {
            map.serialize_entry("@x", exception)?;
        }

        for (name, value) in event.properties() {
            if name.starts_with('@') {
                // 保留字段前缀，属性名加倍 `@` 以免冲突
                map.serialize_entry(&format!("@{}", name), value)?;
            } else {
                map.serialize_entry(name, value)?;
            }
        }

        map.end()
    }
}
