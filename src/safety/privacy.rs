//! Privacy: personal data in the response.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::{CandidateResponse, ReasoningTrace};
use crate::error::Result;
use crate::safety::{SafetyCategory, SafetyDetector, SafetyIssue, Severity};

static RE_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap());

static RE_SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)\s?|\b\d{3}[\s.-])\d{3}[\s.-]\d{4}\b").unwrap()
});

static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:25[0-5]|2[0-4]\d|1?\d?\d)(?:\.(?:25[0-5]|2[0-4]\d|1?\d?\d)){3}\b").unwrap()
});

/// Kind of personal data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    CardNumber,
    GovernmentId,
    Email,
    Phone,
    IpAddress,
}

impl PiiKind {
    pub fn label(&self) -> &'static str {
        match self {
            PiiKind::CardNumber => "card number",
            PiiKind::GovernmentId => "government id",
            PiiKind::Email => "email address",
            PiiKind::Phone => "phone number",
            PiiKind::IpAddress => "ip address",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            PiiKind::CardNumber | PiiKind::GovernmentId => Severity::Critical,
            PiiKind::Email | PiiKind::Phone => Severity::Medium,
            PiiKind::IpAddress => Severity::Low,
        }
    }

    fn placeholder(&self) -> &'static str {
        match self {
            PiiKind::CardNumber => "[REDACTED CARD]",
            PiiKind::GovernmentId => "[REDACTED ID]",
            PiiKind::Email => "[REDACTED EMAIL]",
            PiiKind::Phone => "[REDACTED PHONE]",
            PiiKind::IpAddress => "[REDACTED IP]",
        }
    }
}

/// Luhn checksum over the digits of `s`.
pub fn luhn_valid(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Replace personal data with placeholders, returning the redacted text and
/// the kinds found (with counts), most severe first.
pub fn redact(text: &str) -> (String, Vec<(PiiKind, usize)>) {
    let mut out = text.to_string();
    let mut found = Vec::new();

    let mut count = 0;
    out = RE_CARD
        .replace_all(&out, |caps: &regex::Captures| {
            if luhn_valid(&caps[0]) {
                count += 1;
                PiiKind::CardNumber.placeholder().to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if count > 0 {
        found.push((PiiKind::CardNumber, count));
    }

    let simple: [(&Regex, PiiKind); 4] = [
        (&RE_SSN, PiiKind::GovernmentId),
        (&RE_EMAIL, PiiKind::Email),
        (&RE_PHONE, PiiKind::Phone),
        (&RE_IPV4, PiiKind::IpAddress),
    ];
    for (re, kind) in simple {
        let n = re.find_iter(&out).count();
        if n > 0 {
            out = re.replace_all(&out, kind.placeholder()).into_owned();
            found.push((kind, n));
        }
    }

    (out, found)
}

/// Flags personal data in the response.
#[derive(Debug, Default)]
pub struct PrivacyDetector;

impl PrivacyDetector {
    pub fn new() -> Self {
        Self
    }
}

impl SafetyDetector for PrivacyDetector {
    fn name(&self) -> &'static str {
        "privacy"
    }

    fn category(&self) -> SafetyCategory {
        SafetyCategory::Privacy
    }

    fn inspect(
        &self,
        _trace: &ReasoningTrace,
        response: &CandidateResponse,
    ) -> Result<Vec<SafetyIssue>> {
        let (_, found) = redact(&response.text);
        Ok(found
            .into_iter()
            .map(|(kind, n)| {
                SafetyIssue::new(
                    SafetyCategory::Privacy,
                    kind.severity(),
                    self.name(),
                    vec![format!("{} x{} in response", kind.label(), n)],
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::test_support::{response, trace};

    fn inspect(text: &str) -> Vec<SafetyIssue> {
        PrivacyDetector::new()
            .inspect(&trace(), &response(text))
            .unwrap()
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("1234"));
    }

    #[test]
    fn test_card_number_is_critical() {
        let issues = inspect("Charge it to 4111 1111 1111 1111 please.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        // Raw digits never appear in evidence
        assert!(!issues[0].evidence[0].contains("4111"));
    }

    #[test]
    fn test_invalid_card_not_flagged() {
        assert!(inspect("Order 4111 1111 1111 1112 shipped.").is_empty());
    }

    #[test]
    fn test_contact_details_are_medium() {
        let issues = inspect("Reach Jane at jane.doe@example.com or 555-123-4567.");
        let kinds: Vec<&str> = issues.iter().map(|i| i.evidence[0].as_str()).collect();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Medium));
        assert!(kinds[0].starts_with("email address"));
        assert!(kinds[1].starts_with("phone number"));
    }

    #[test]
    fn test_redact() {
        let (text, found) = redact("SSN 123-45-6789, server 10.0.0.12");
        assert_eq!(text, "SSN [REDACTED ID], server [REDACTED IP]");
        assert_eq!(
            found,
            vec![(PiiKind::GovernmentId, 1), (PiiKind::IpAddress, 1)]
        );
    }

    #[test]
    fn test_plain_numbers_not_flagged() {
        assert!(inspect("Revenue grew 40% in 2023 to 1.2 million.").is_empty());
    }
}
