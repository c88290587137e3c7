//! Numeric conditions written as `(L,10)`, `(G,5)` or `(4,5)`.

use crate::error::EvaluationError;
use serde::{Deserialize, Serialize};

pub const ACCEPTED_LESS: &[&str] = &[
    "L", "LESS", "LESS THAN", "LT", "LOWER", "BELOW", "LESSTHAN", "UNDER",
];
pub const ACCEPTED_MORE: &[&str] = &[
    "G", "GREATER", "GREATER THAN", "GT", "HIGHER", "MORE", "ABOVE", "GREATERTHAN",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeKind {
    LessThan,
    GreaterOrEqual,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RangeCondition {
    /// `value < bound`
    LessThan(f64),
    /// `value >= bound`. Not strict, unlike `LessThan`.
    GreaterOrEqual(f64),
    /// `lo <= value <= hi`
    Between(f64, f64),
}

impl RangeCondition {
    /// Parses `(a,b)`. Surrounding parentheses are optional; a leading
    /// `field_` prefix is tolerated and ignored.
    pub fn parse(spec: &str) -> Result<Self, EvaluationError> {
        let body = spec
            .rsplit(crate::label_codec::FIELD_SEPARATOR)
            .next()
            .unwrap_or(spec)
            .replace(['(', ')'], "");
        let tokens: Vec<&str> = body.split(',').map(str::trim).collect();
        if tokens.len() != 2 {
            return Err(EvaluationError::Malformed(spec.to_string()));
        }
        let bound = parse_number(tokens[1])?;
        let keyword = tokens[0].to_ascii_uppercase();
        if ACCEPTED_LESS.contains(&keyword.as_str()) {
            Ok(Self::LessThan(bound))
        } else if ACCEPTED_MORE.contains(&keyword.as_str()) {
            Ok(Self::GreaterOrEqual(bound))
        } else {
            Ok(Self::Between(parse_number(tokens[0])?, bound))
        }
    }

    pub fn kind(&self) -> RangeKind {
        match self {
            Self::LessThan(_) => RangeKind::LessThan,
            Self::GreaterOrEqual(_) => RangeKind::GreaterOrEqual,
            Self::Between(_, _) => RangeKind::Between,
        }
    }

    pub fn holds(&self, value: f64) -> bool {
        match *self {
            Self::LessThan(bound) => value < bound,
            Self::GreaterOrEqual(bound) => value >= bound,
            Self::Between(lo, hi) => lo <= value && value <= hi,
        }
    }
}

fn parse_number(text: &str) -> Result<f64, EvaluationError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(v),
        _ => Err(EvaluationError::NotNumeric(trimmed.to_string())),
    }
}

/// Checks the value `actual_value` of `condition_field` against
/// `condition_spec`. The field name only serves diagnostics.
pub fn evaluate(
    actual_value: &str,
    condition_field: &str,
    condition_spec: &str,
) -> Result<bool, EvaluationError> {
    let condition = RangeCondition::parse(condition_spec)?;
    evaluate_parsed(actual_value, condition_field, &condition)
}

/// [`evaluate`] against a condition that was already parsed.
pub fn evaluate_parsed(
    actual_value: &str,
    condition_field: &str,
    condition: &RangeCondition,
) -> Result<bool, EvaluationError> {
    let value = parse_number(actual_value)?;
    let holds = condition.holds(value);
    log::debug!("{condition_field}={actual_value} against {condition:?}: {holds}");
    Ok(holds)
}

/// [`evaluate_parsed`] with failures logged and treated as a non-match.
pub fn evaluate_or_false(actual_value: &str, condition_field: &str, condition: &RangeCondition) -> bool {
    match evaluate_parsed(actual_value, condition_field, condition) {
        Ok(holds) => holds,
        Err(e) => {
            log::warn!("Range condition on '{condition_field}' not evaluated: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_less_than_is_strict() {
        assert_eq!(evaluate("5", "pH", "(L,10)"), Ok(true));
        assert_eq!(evaluate("10", "pH", "(L,10)"), Ok(false));
    }

    #[test]
    fn test_greater_is_not_strict() {
        assert_eq!(evaluate("10", "pH", "(G,10)"), Ok(true));
        assert_eq!(evaluate("9", "pH", "(G,10)"), Ok(false));
    }

    #[test]
    fn test_between_is_inclusive() {
        assert_eq!(evaluate("4.5", "pH", "(4,5)"), Ok(true));
        assert_eq!(evaluate("5", "pH", "(4,5)"), Ok(true));
        assert_eq!(evaluate("5.1", "pH", "(4,5)"), Ok(false));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(evaluate("3", "t", "(below,4)"), Ok(true));
        assert_eq!(evaluate("3", "t", "(Less Than, 4)"), Ok(true));
        assert_eq!(evaluate("30", "t", "(greaterthan,25)"), Ok(true));
        assert_eq!(
            RangeCondition::parse("(ABOVE,1)").unwrap().kind(),
            RangeKind::GreaterOrEqual
        );
    }

    #[test]
    fn test_failures() {
        assert!(matches!(
            evaluate("5", "pH", "(L,10,2)"),
            Err(EvaluationError::Malformed(_))
        ));
        assert!(matches!(
            evaluate("NONE", "pH", "(L,10)"),
            Err(EvaluationError::NotNumeric(_))
        ));
        assert!(matches!(
            evaluate("5", "pH", "(X,10)"),
            Err(EvaluationError::NotNumeric(_))
        ));
        assert!(matches!(
            evaluate("5", "pH", "(L,ten)"),
            Err(EvaluationError::NotNumeric(_))
        ));
        let between = RangeCondition::parse("(4,5)").unwrap();
        assert!(!evaluate_or_false("NONE", "pH", &between));
        assert!(evaluate_or_false("4", "pH", &between));
    }

    #[test]
    fn test_parsed_condition_matches_text_form() {
        let condition = RangeCondition::parse("(G,5)").unwrap();
        for value in ["4.9", "5", "7.25", "NONE"] {
            assert_eq!(
                evaluate_parsed(value, "pH", &condition),
                evaluate(value, "pH", "(G,5)")
            );
        }
    }

    #[test]
    fn test_field_prefixed_spec() {
        assert_eq!(evaluate("22", "DoublingTime", "DoublingTime_(20,25)"), Ok(true));
    }
}
