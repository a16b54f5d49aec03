use std::collections::HashSet;

use bloc_core::{DriftSeverity, PatchChange, RiskWarning, WarningSource, truncate_chars};
use bloc_store::{DriftPatternRecord, SemanticHit};

const DEDUPE_MESSAGE_CHARS: usize = 50;
const SEMANTIC_MESSAGE_CHARS: usize = 200;

/// Function name a change targets: the last path segment of `file` with a
/// trailing `.py` removed. `billing/invoice.py` and `billing.invoice` both
/// name a file stem the drift records can be matched against.
pub fn function_name_for_change(change: &PatchChange) -> String {
    let file = change.file.trim();
    let last = file.rsplit(['/', '\\']).next().unwrap_or(file);
    last.strip_suffix(".py").unwrap_or(last).to_owned()
}

/// Substring matches between changes and stored drift patterns. A pattern
/// matches when its function name appears in the change description, or
/// when the change's function name appears in the pattern's function name.
pub fn memory_warnings(changes: &[PatchChange], known: &[DriftPatternRecord]) -> Vec<RiskWarning> {
    let mut warnings = Vec::new();
    for change in changes {
        let function = function_name_for_change(change);
        if function.is_empty() {
            continue;
        }

        for pattern in known {
            let matched = (!pattern.function_name.is_empty()
                && change.description.contains(&pattern.function_name))
                || pattern.function_name.contains(&function);
            if !matched {
                continue;
            }
            warnings.push(RiskWarning {
                source: WarningSource::Memory,
                function: pattern.function_name.clone(),
                severity: parse_severity(&pattern.severity),
                message: format!("Previously caused drift: {}", pattern.description),
                times_seen: u32::try_from(pattern.times_seen.max(0)).unwrap_or(u32::MAX),
            });
        }
    }
    warnings
}

/// Converts similarity hits from the drift collection into warnings,
/// skipping functions that already carry a warning.
pub(crate) fn semantic_warnings(
    change_function: &str,
    hits: &[SemanticHit],
    existing: &[RiskWarning],
) -> Vec<RiskWarning> {
    let mut warned = existing
        .iter()
        .map(|warning| warning.function.clone())
        .collect::<HashSet<_>>();
    let mut warnings = Vec::new();

    for hit in hits {
        let function = hit
            .metadata
            .get("function_name")
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(change_function)
            .to_owned();
        if !warned.insert(function.clone()) {
            continue;
        }

        let severity = hit
            .metadata
            .get("severity")
            .and_then(|value| value.as_str())
            .map(parse_severity)
            .unwrap_or(DriftSeverity::NonCritical);
        let times_seen = hit
            .metadata
            .get("times_seen")
            .and_then(|value| value.as_u64())
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or(0);

        warnings.push(RiskWarning {
            source: WarningSource::Semantic,
            function,
            severity,
            message: truncate_chars(&hit.text, SEMANTIC_MESSAGE_CHARS),
            times_seen,
        });
    }
    warnings
}

/// Keeps the first warning per function and message prefix.
pub fn dedupe_warnings(warnings: Vec<RiskWarning>) -> Vec<RiskWarning> {
    let mut seen = HashSet::new();
    warnings
        .into_iter()
        .filter(|warning| {
            let key = format!(
                "{}_{}",
                warning.function,
                truncate_chars(&warning.message, DEDUPE_MESSAGE_CHARS)
            );
            seen.insert(key)
        })
        .collect()
}

fn parse_severity(raw: &str) -> DriftSeverity {
    raw.parse().unwrap_or(DriftSeverity::NonCritical)
}

#[cfg(test)]
mod tests {
    use bloc_core::ChangeType;
    use serde_json::{Map, json};

    use super::*;

    fn change(file: &str, description: &str) -> PatchChange {
        PatchChange {
            file: file.to_owned(),
            change_type: ChangeType::Semantic,
            description: description.to_owned(),
            line: 0,
        }
    }

    fn pattern(function_name: &str, severity: &str, description: &str) -> DriftPatternRecord {
        DriftPatternRecord {
            repo_id: "repo".to_owned(),
            function_name: function_name.to_owned(),
            severity: severity.to_owned(),
            description: description.to_owned(),
            before_output: String::new(),
            after_output: String::new(),
            first_seen: 1,
            last_seen: 2,
            times_seen: 3,
        }
    }

    #[test]
    fn function_name_strips_directories_and_extension() {
        assert_eq!(
            function_name_for_change(&change("billing/invoice.py", "")),
            "invoice"
        );
        assert_eq!(
            function_name_for_change(&change("billing.invoice", "")),
            "billing.invoice"
        );
        assert_eq!(function_name_for_change(&change("pkg/", "")), "");
    }

    #[test]
    fn matches_by_description_or_function_substring() {
        let known = vec![
            pattern("test_calculate_fee_0", "critical", "fee rounding changed"),
            pattern("send_email", "non_critical", "subject casing"),
            pattern("unrelated", "critical", "never matches"),
        ];
        let changes = vec![
            change("billing/calculate_fee.py", "switch to decimal"),
            change("mail.py", "touches send_email retries"),
        ];

        let warnings = memory_warnings(&changes, &known);
        let functions = warnings
            .iter()
            .map(|warning| warning.function.as_str())
            .collect::<Vec<_>>();

        assert_eq!(functions, vec!["test_calculate_fee_0", "send_email"]);
        assert_eq!(warnings[0].severity, DriftSeverity::Critical);
        assert_eq!(warnings[0].times_seen, 3);
        assert_eq!(warnings[0].message, "Previously caused drift: fee rounding changed");
        assert_eq!(warnings[1].severity, DriftSeverity::NonCritical);
    }

    #[test]
    fn changes_without_a_function_name_never_match() {
        let known = vec![pattern("anything", "critical", "x")];
        assert!(memory_warnings(&[change("", "anything")], &known).is_empty());
    }

    #[test]
    fn semantic_hits_skip_functions_already_warned() {
        let mut metadata = Map::new();
        metadata.insert("function_name".to_owned(), json!("send_email"));
        metadata.insert("severity".to_owned(), json!("critical"));
        let hits = vec![
            SemanticHit {
                entry_id: "a".to_owned(),
                text: "Drift in function: send_email".to_owned(),
                metadata: metadata.clone(),
                similarity: 0.9,
            },
            SemanticHit {
                entry_id: "b".to_owned(),
                text: "x".repeat(300),
                metadata: Map::new(),
                similarity: 0.8,
            },
        ];
        let existing = vec![RiskWarning {
            source: WarningSource::Memory,
            function: "send_email".to_owned(),
            severity: DriftSeverity::Critical,
            message: "Previously caused drift: subject".to_owned(),
            times_seen: 1,
        }];

        let warnings = semantic_warnings("mail", &hits, &existing);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].function, "mail");
        assert_eq!(warnings[0].source, WarningSource::Semantic);
        assert_eq!(warnings[0].severity, DriftSeverity::NonCritical);
        assert_eq!(warnings[0].message.chars().count(), 200);
    }

    #[test]
    fn dedupe_uses_function_and_message_prefix() {
        let base = RiskWarning {
            source: WarningSource::Memory,
            function: "f".to_owned(),
            severity: DriftSeverity::Critical,
            message: format!("{}tail-one", "p".repeat(50)),
            times_seen: 1,
        };
        let mut same_prefix = base.clone();
        same_prefix.message = format!("{}tail-two", "p".repeat(50));
        let mut other_function = base.clone();
        other_function.function = "g".to_owned();

        let deduped = dedupe_warnings(vec![base, same_prefix, other_function]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[1].function, "g");
    }
}
