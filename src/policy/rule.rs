//! Wire shape of the remote lossless rule (camelCase JSON as served by the rule client).
//!
//! Integer fields may arrive as JSON numbers or as decimal strings, since 64-bit integers are
//! string-encoded by some control planes.

use serde::{Deserialize, Deserializer};

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LosslessRule {
    #[serde(default)]
    pub lossless_online: Option<RemoteLosslessOnline>,
    #[serde(default)]
    pub lossless_offline: Option<RemoteToggle>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLosslessOnline {
    #[serde(default)]
    pub delay_register: Option<RemoteDelayRegister>,
    #[serde(default)]
    pub readiness: Option<RemoteToggle>,
    #[serde(default)]
    pub warmup: Option<RemoteWarmup>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteToggle {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDelayRegister {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub interval_second: Option<u64>,
    /// Kept as text; an unparseable value disables delay registration.
    #[serde(default, deserialize_with = "lenient_string")]
    pub health_check_interval_second: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWarmup {
    #[serde(default)]
    pub enable: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub interval_second: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub curvature: Option<u64>,
    #[serde(default)]
    pub enable_overload_protection: bool,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub overload_protection_threshold: Option<u64>,
}

impl LosslessRule {
    /// Accepts either a bare rule object or a rule list, in which case the first entry wins.
    pub fn from_document(document: &serde_json::Value) -> Result<Self, serde_json::Error> {
        match document {
            serde_json::Value::Array(items) => match items.first() {
                Some(first) => Self::deserialize(first),
                None => Err(serde::de::Error::custom("lossless rule list is empty")),
            },
            serde_json::Value::Object(_) => Self::deserialize(document),
            _ => Err(serde::de::Error::custom(
                "lossless rule document must be a JSON object",
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(value)) => Ok(Some(value)),
        Some(NumberOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("`{text}` is not an unsigned integer"))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<NumberOrText>::deserialize(deserializer)?.map(|value| match value {
            NumberOrText::Number(number) => number.to_string(),
            NumberOrText::Text(text) => text,
        }),
    )
}
