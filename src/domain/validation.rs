use super::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

include!(concat!(env!("OUT_DIR"), "/validated_patterns.rs"));

static METRIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(METRIC_NAME_PATTERN).expect("pattern validated by build.rs"));

static LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LABEL_NAME_PATTERN).expect("pattern validated by build.rs"));

/// Prometheus-compatible metric name check: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn validate_metric_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyMetricName);
    }
    if !METRIC_NAME.is_match(name) {
        return Err(ValidationError::InvalidMetricName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Prometheus-compatible label name check: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn validate_label_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyLabelName);
    }
    if !LABEL_NAME.is_match(name) {
        return Err(ValidationError::InvalidLabelName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_metric_names() {
        for name in ["foo", "foo_bar", "foo:bar", "_foo", ":foo", "Foo123"] {
            assert!(validate_metric_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_metric_names() {
        assert_eq!(validate_metric_name(""), Err(ValidationError::EmptyMetricName));
        for name in ["1foo", "foo-bar", "foo bar", "foo{bar=\"baz\"}", "föö"] {
            assert!(
                matches!(
                    validate_metric_name(name),
                    Err(ValidationError::InvalidMetricName { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_label_names_reject_colons() {
        assert!(validate_label_name("job").is_ok());
        assert!(validate_label_name("__name__").is_ok());
        assert_eq!(validate_label_name(""), Err(ValidationError::EmptyLabelName));
        assert!(matches!(
            validate_label_name("a:b"),
            Err(ValidationError::InvalidLabelName { .. })
        ));
        assert!(matches!(
            validate_label_name("0abc"),
            Err(ValidationError::InvalidLabelName { .. })
        ));
    }
}
