//! Timestamp wrapper shared by every row type that crosses the SQL boundary.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbTimestamp {
    inner: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTimestampError {
    message: String,
}

impl DbTimestampError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DbTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DbTimestampError {}

impl DbTimestamp {
    pub fn now() -> Self {
        Self {
            inner: chrono::Utc::now(),
        }
    }

    pub fn from_rfc3339(value: &str) -> Result<Self, DbTimestampError> {
        chrono::DateTime::parse_from_rfc3339(value)
            .map(|dt| Self {
                inner: dt.with_timezone(&chrono::Utc),
            })
            .map_err(|e| DbTimestampError::new(format!("invalid timestamp: {e}")))
    }

    pub fn to_rfc3339(&self) -> String {
        self.inner.to_rfc3339()
    }

    pub fn unix_millis(&self) -> i64 {
        self.inner.timestamp_millis()
    }

    pub fn from_chrono(value: chrono::DateTime<chrono::Utc>) -> Self {
        Self { inner: value }
    }

    pub fn as_chrono(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.inner
    }
}

impl serde::Serialize for DbTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> serde::Deserialize<'de> for DbTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        DbTimestamp::from_rfc3339(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_rfc3339() {
        let ts = DbTimestamp::now();
        let parsed = DbTimestamp::from_rfc3339(&ts.to_rfc3339()).unwrap();
        assert_eq!(ts.unix_millis(), parsed.unix_millis());
    }

    #[test]
    fn rejects_garbage() {
        assert!(DbTimestamp::from_rfc3339("not a timestamp").is_err());
    }
}
