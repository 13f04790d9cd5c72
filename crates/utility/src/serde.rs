pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone as _, Utc};
    use serde::{Deserialize as _, Deserializer};

    /// Parses the timestamp flavours the backend is known to send: RFC 3339
    /// strings (any offset), naive `YYYY-MM-DDTHH:MM:SS[.fff]` strings which
    /// are taken as UTC, and epoch milliseconds as a number or numeric string.
    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
            return Some(date_time.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&naive));
        }
        value.parse::<i64>().ok().and_then(from_epoch_millis)
    }

    pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Canonical ISO form used wherever two timestamps must compare equal as
    /// strings, e.g. `2024-05-01T10:00:00.000Z`.
    pub fn to_iso(date_time: &DateTime<Utc>) -> String {
        date_time.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Lenient optional timestamp: missing, null or unparsable values all become
    /// `None` instead of failing the whole payload.
    pub fn deserialize_option<'de, D>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json_like::Raw>::deserialize(deserializer)?;
        Ok(value.and_then(|raw| match raw {
            serde_json_like::Raw::Text(text) => parse(&text),
            serde_json_like::Raw::Integer(millis) => from_epoch_millis(millis),
            serde_json_like::Raw::Float(millis) => from_epoch_millis(millis as i64),
        }))
    }

    mod serde_json_like {
        use serde::Deserialize;

        #[derive(Deserialize)]
        #[serde(untagged)]
        pub enum Raw {
            Integer(i64),
            Float(f64),
            Text(String),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;

    use super::timestamp;

    #[derive(Deserialize)]
    struct Ping {
        #[serde(default, deserialize_with = "timestamp::deserialize_option")]
        at: Option<chrono::DateTime<Utc>>,
    }

    fn iso(raw: &str) -> Option<String> {
        timestamp::parse(raw).map(|at| timestamp::to_iso(&at))
    }

    #[test]
    fn offsets_render_as_utc_millis() {
        assert_eq!(
            iso("2024-05-01T12:00:00+02:00").as_deref(),
            Some("2024-05-01T10:00:00.000Z")
        );
        assert_eq!(iso("2024-05-01T10:00:00Z"), iso("2024-05-01T10:00:00.000Z"));
        assert_eq!(iso("2024-05-01T10:00:00"), iso("2024-05-01T10:00:00Z"));
        assert_eq!(iso(" garbage "), None);
    }

    #[test]
    fn accepts_epoch_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(timestamp::parse("1714557600000"), Some(expected));
        let ping: Ping = serde_json::from_str(r#"{"at": 1714557600000}"#).unwrap();
        assert_eq!(ping.at, Some(expected));
    }

    #[test]
    fn optional_timestamps_are_lenient() {
        let ping: Ping = serde_json::from_str(r#"{"at": "not a date"}"#).unwrap();
        assert_eq!(ping.at, None);
        let ping: Ping = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(ping.at, None);
    }
}
