//! Attestation verification — compare retrieved measurements against policy
//!
//! A mismatch is a definitive trust decision. Nothing here retries, and an
//! empty policy never verifies anything.

use super::document::{AttestationDocument, ExpectedMeasurementPolicy};
use log::{error, info};
use serde::{Deserialize, Serialize};

/// Outcome of checking a document against a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationVerdict {
    /// Every configured measurement matched exactly
    Trusted { checked: usize },
    /// At least one measurement differed or was missing from the document
    Mismatch { measurements: Vec<String> },
    /// No document was provided
    MissingDocument,
    /// The policy names no measurements (misconfiguration)
    EmptyPolicy,
}

impl AttestationVerdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, AttestationVerdict::Trusted { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            AttestationVerdict::Trusted { checked } => {
                format!("{} measurement(s) verified", checked)
            }
            AttestationVerdict::Mismatch { measurements } => {
                format!("measurement mismatch: {}", measurements.join(", "))
            }
            AttestationVerdict::MissingDocument => "no document provided".to_string(),
            AttestationVerdict::EmptyPolicy => "expected measurement policy is empty".to_string(),
        }
    }
}

/// Check a document against a policy, logging retrieved vs expected values
pub fn evaluate(
    doc: Option<&AttestationDocument>,
    policy: &ExpectedMeasurementPolicy,
) -> AttestationVerdict {
    info!("Verifying attestation document...");

    let doc = match doc {
        Some(doc) => doc,
        None => {
            error!("No attestation document provided.");
            return AttestationVerdict::MissingDocument;
        }
    };

    if policy.is_empty() {
        error!("Expected measurement policy is empty, refusing to verify");
        return AttestationVerdict::EmptyPolicy;
    }

    let mut mismatched = Vec::new();
    for (name, expected) in policy.iter() {
        let retrieved = doc.get(name);
        info!(
            "Attestation Doc {}: {}",
            name,
            retrieved.unwrap_or("<missing>")
        );
        info!("Expected {}:      {}", name, expected);

        if retrieved == Some(expected) {
            info!("{} measurement verified successfully.", name);
        } else {
            error!("{} measurement mismatch!", name);
            mismatched.push(name.to_string());
        }
    }

    if mismatched.is_empty() {
        AttestationVerdict::Trusted {
            checked: policy.len(),
        }
    } else {
        AttestationVerdict::Mismatch {
            measurements: mismatched,
        }
    }
}

/// Returns true only if every configured measurement matches exactly
pub fn verify(doc: Option<&AttestationDocument>, policy: &ExpectedMeasurementPolicy) -> bool {
    evaluate(doc, policy).is_trusted()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_pcr0() {
        let policy = ExpectedMeasurementPolicy::pcr0("abc123");
        let doc = AttestationDocument::new([("PCR0", "abc123")]);
        assert!(verify(Some(&doc), &policy));
        assert_eq!(
            evaluate(Some(&doc), &policy),
            AttestationVerdict::Trusted { checked: 1 }
        );
    }

    #[test]
    fn test_mismatched_pcr0() {
        let policy = ExpectedMeasurementPolicy::pcr0("abc123");
        let doc = AttestationDocument::new([("PCR0", "xyz999")]);
        assert!(!verify(Some(&doc), &policy));
    }

    #[test]
    fn test_missing_document() {
        assert!(!verify(None, &ExpectedMeasurementPolicy::pcr0("any_hash")));
        assert!(!verify(None, &ExpectedMeasurementPolicy::default()));
        assert_eq!(
            evaluate(None, &ExpectedMeasurementPolicy::pcr0("x")),
            AttestationVerdict::MissingDocument
        );
    }

    #[test]
    fn test_empty_policy_fails_closed() {
        let doc = AttestationDocument::new([("PCR0", "abc123")]);
        let verdict = evaluate(Some(&doc), &ExpectedMeasurementPolicy::default());
        assert_eq!(verdict, AttestationVerdict::EmptyPolicy);
        assert!(!verdict.is_trusted());
    }

    #[test]
    fn test_every_configured_measurement_must_match() {
        let policy = ExpectedMeasurementPolicy::new([("PCR0", "aa"), ("PCR1", "bb"), ("PCR2", "cc")]);
        let good = AttestationDocument::new([("PCR0", "aa"), ("PCR1", "bb"), ("PCR2", "cc")]);
        assert!(verify(Some(&good), &policy));

        // Each single-measurement deviation must be rejected
        for name in ["PCR0", "PCR1", "PCR2"] {
            let tampered: Vec<(&str, String)> = [("PCR0", "aa"), ("PCR1", "bb"), ("PCR2", "cc")]
                .iter()
                .map(|(k, v)| {
                    let v = if *k == name { format!("{}ff", v) } else { v.to_string() };
                    (*k, v)
                })
                .collect();
            let doc = AttestationDocument::new(tampered);
            match evaluate(Some(&doc), &policy) {
                AttestationVerdict::Mismatch { measurements } => {
                    assert_eq!(measurements, vec![name.to_string()])
                }
                other => panic!("expected mismatch for {}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_extra_document_measurements_are_ignored() {
        let policy = ExpectedMeasurementPolicy::pcr0("aa");
        let doc = AttestationDocument::new([("PCR0", "aa"), ("PCR4", "zz")]);
        assert!(verify(Some(&doc), &policy));
    }

    #[test]
    fn test_measurement_absent_from_document() {
        let policy = ExpectedMeasurementPolicy::new([("PCR0", "aa"), ("PCR8", "bb")]);
        let doc = AttestationDocument::new([("PCR0", "aa")]);
        let verdict = evaluate(Some(&doc), &policy);
        assert_eq!(
            verdict,
            AttestationVerdict::Mismatch {
                measurements: vec!["PCR8".to_string()]
            }
        );
        assert!(verdict.reason().contains("PCR8"));
    }

    #[test]
    fn test_comparison_is_exact() {
        let policy = ExpectedMeasurementPolicy::pcr0("ABC123");
        let doc = AttestationDocument::new([("PCR0", "abc123")]);
        assert!(!verify(Some(&doc), &policy));
    }
}
