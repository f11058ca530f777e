//! Attestation documents and the measurement policy they are checked against
//!
//! A document is reduced to a set of named digests. The control tool emits it
//! as JSON, either flat (`{"pcr0": "..."}`) or nested under a `Measurements`
//! member. Names are compared case-insensitively by normalising to upper case.

use crate::error::EnclaveError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Conventional name of the boot image measurement
pub const PCR0: &str = "PCR0";

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Measurements retrieved from a running enclave
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDocument {
    measurements: BTreeMap<String, String>,
}

impl AttestationDocument {
    pub fn new<I, K, V>(measurements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            measurements: measurements
                .into_iter()
                .map(|(k, v)| (normalize_name(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// Decode the JSON emitted by the control tool
    pub fn from_json(data: &[u8]) -> Result<Self, EnclaveError> {
        let value: Value = serde_json::from_slice(data).map_err(|e| {
            EnclaveError::AttestationRetrieval(format!("malformed attestation JSON: {}", e))
        })?;

        let object = match &value {
            Value::Object(map) => map
                .get("Measurements")
                .or_else(|| map.get("measurements"))
                .and_then(Value::as_object)
                .unwrap_or(map),
            _ => {
                return Err(EnclaveError::AttestationRetrieval(
                    "attestation document is not a JSON object".into(),
                ))
            }
        };

        let mut measurements = BTreeMap::new();
        for (name, digest) in object {
            match digest.as_str() {
                Some(d) => {
                    measurements.insert(normalize_name(name), d.to_string());
                }
                None => log::debug!("Ignoring non-digest document member '{}'", name),
            }
        }

        if measurements.is_empty() {
            return Err(EnclaveError::AttestationRetrieval(
                "attestation document contains no measurements".into(),
            ));
        }

        Ok(Self { measurements })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.measurements.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

/// Expected digests, fixed by the operator at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedMeasurementPolicy {
    expected: BTreeMap<String, String>,
}

impl ExpectedMeasurementPolicy {
    pub fn new<I, K, V>(expected: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            expected: expected
                .into_iter()
                .map(|(k, v)| (normalize_name(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// Policy with a single expected boot image measurement
    pub fn pcr0(digest: impl Into<String>) -> Self {
        Self::new([(PCR0, digest)])
    }

    /// Parse `NAME=DIGEST` pairs
    pub fn parse_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, EnclaveError> {
        let mut expected = BTreeMap::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, digest) = pair.split_once('=').ok_or_else(|| {
                EnclaveError::Config(format!("expected NAME=DIGEST, got '{}'", pair))
            })?;
            if name.trim().is_empty() || digest.trim().is_empty() {
                return Err(EnclaveError::Config(format!(
                    "empty measurement name or digest in '{}'",
                    pair
                )));
            }
            expected.insert(normalize_name(name), digest.trim().to_string());
        }
        Ok(Self { expected })
    }

    /// Add or replace one expected digest
    pub fn insert(&mut self, name: &str, digest: impl Into<String>) {
        self.expected.insert(normalize_name(name), digest.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.expected.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}
