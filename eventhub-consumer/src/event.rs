use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// An event as delivered from one partition of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEvent {
    body: Vec<u8>,
    partition_id: String,
    offset: i64,
    partition_key: Option<String>,
    enqueued_time: Option<DateTime<Utc>>,
    properties: BTreeMap<String, String>,
}

impl ReceivedEvent {
    pub fn new(partition_id: impl Into<String>, offset: i64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            partition_id: partition_id.into(),
            offset,
            partition_key: None,
            enqueued_time: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    pub fn with_enqueued_time(mut self, enqueued_time: DateTime<Utc>) -> Self {
        self.enqueued_time = Some(enqueued_time);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, if it is valid UTF-8.
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Position of the event within its partition.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    pub fn enqueued_time(&self) -> Option<DateTime<Utc>> {
        self.enqueued_time
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl fmt::Display for ReceivedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body_as_str() {
            Some(body) => write!(f, "{{ body: '{}'", body)?,
            None => write!(f, "{{ body: <binary {} bytes>", self.body.len())?,
        }

        f.write_str(", properties: {")?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        write!(f, "}}, offset: {}", self.offset)?;

        if let Some(key) = &self.partition_key {
            write!(f, ", partition_key: '{}'", key)?;
        }
        if let Some(enqueued_time) = &self.enqueued_time {
            write!(
                f,
                ", enqueued_time: {}",
                enqueued_time.to_rfc3339_opts(SecondsFormat::Millis, true)
            )?;
        }

        f.write_str(" }")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn displays_body_and_offset() {
        let event = ReceivedEvent::new("0", 42, "lux=312");

        assert_eq!(
            event.to_string(),
            "{ body: 'lux=312', properties: {}, offset: 42 }"
        );
    }

    #[test]
    fn displays_optional_metadata() {
        let enqueued = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let event = ReceivedEvent::new("3", 7, "{\"lux\":12}")
            .with_partition_key("sphere-1")
            .with_enqueued_time(enqueued)
            .with_property("source", "tsl2561")
            .with_property("app", "sphere");

        assert_eq!(
            event.to_string(),
            "{ body: '{\"lux\":12}', properties: {app: sphere, source: tsl2561}, offset: 7, \
             partition_key: 'sphere-1', enqueued_time: 2024-03-01T12:30:00.000Z }"
        );
    }

    #[test]
    fn binary_bodies_are_summarised() {
        let event = ReceivedEvent::new("1", 0, vec![0xff, 0xfe, 0x00]);

        assert_eq!(event.body_as_str(), None);
        assert_eq!(
            event.to_string(),
            "{ body: <binary 3 bytes>, properties: {}, offset: 0 }"
        );
    }
}
