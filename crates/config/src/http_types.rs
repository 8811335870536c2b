//! Thin `Deserialize`-able wrappers around `http`'s header types, used by
//! config sections that accept arbitrary header maps (OTLP exporters).

use serde::{Deserialize, Deserializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderName(http::HeaderName);

impl HeaderName {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn into_inner(self) -> http::HeaderName {
        self.0
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for HeaderName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let name = http::HeaderName::try_from(raw).map_err(serde::de::Error::custom)?;
        Ok(HeaderName(name))
    }
}

#[derive(Debug, Clone)]
pub struct HeaderValue(http::HeaderValue);

impl HeaderValue {
    pub fn to_str(&self) -> Result<&str, http::header::ToStrError> {
        self.0.to_str()
    }

    pub fn into_inner(self) -> http::HeaderValue {
        self.0
    }
}

impl<'de> Deserialize<'de> for HeaderValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let value = http::HeaderValue::try_from(raw).map_err(serde::de::Error::custom)?;
        Ok(HeaderValue(value))
    }
}
