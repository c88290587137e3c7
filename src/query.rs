//! The leaf search language: `FIELD=VALUE AND FIELD=(a,b) AND COLOUR=X`.
//!
//! Queries without any `(` are matched loosely: every clause only has to occur
//! somewhere in the label text, ignoring case. As soon as one clause carries a
//! range condition, every clause is checked field by field against the
//! decoded label instead.

use crate::color::{COMMON_COLOURS, Color};
use crate::error::EngineError;
use crate::label_codec::{FIELD_SEPARATOR, decode};
use crate::range::{self, RangeCondition, RangeKind};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUERY_COLOR: &str = "#FEE715";

/// Prefixes that mark the last clause as the target color (`COLOUR=red`).
pub const COLOUR_PREFIXES: &[&str] = &["COLOUR", "COLOR", "COL"];

lazy_static! {
    static ref CONJUNCTION: Regex = Regex::new(r"\s+(?:AND|and)\s+").expect("valid conjunction regex");
}

/// Problems worth telling the user about that do not stop the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryWarning {
    MissingConjunction,
    MissingColor,
    MissingAssignment,
}

impl QueryWarning {
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingConjunction => {
                "Conjunction missing from query or mistake present; the query will still run"
            }
            Self::MissingColor => "No colour recognized in the query; the default colour is used",
            Self::MissingAssignment => {
                "No '=' found; one or more clauses may be missing a character"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Equality {
        field: String,
        value: String,
        raw: String,
    },
    Range {
        field: String,
        spec: String,
        /// `None` when `spec` did not parse; such a clause never matches.
        condition: Option<RangeCondition>,
        raw: String,
    },
}

impl Predicate {
    fn from_clause(clause: &str) -> Self {
        let raw = clause.to_string();
        match clause.split_once(FIELD_SEPARATOR) {
            Some((field, value)) if value.contains('(') => {
                let condition = RangeCondition::parse(value)
                    .inspect_err(|e| {
                        log::warn!("Range condition on '{field}' never matches: {e}")
                    })
                    .ok();
                Self::Range {
                    field: field.to_string(),
                    spec: value.to_string(),
                    condition,
                    raw,
                }
            }
            Some((field, value)) => Self::Equality {
                field: field.to_string(),
                value: value.to_string(),
                raw,
            },
            None => Self::Equality {
                field: raw.clone(),
                value: String::new(),
                raw,
            },
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Equality { field, .. } | Self::Range { field, .. } => field,
        }
    }

    /// Clause text after `=` normalization, e.g. `prtS_1`.
    pub fn raw(&self) -> &str {
        match self {
            Self::Equality { raw, .. } | Self::Range { raw, .. } => raw,
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }

    /// Parsed range condition; `None` for equality clauses and malformed ranges.
    pub fn condition(&self) -> Option<&RangeCondition> {
        match self {
            Self::Range { condition, .. } => condition.as_ref(),
            Self::Equality { .. } => None,
        }
    }

    pub fn range_kind(&self) -> Option<RangeKind> {
        self.condition().map(RangeCondition::kind)
    }

    fn holds_for_fields(&self, fields: &[(String, String)]) -> bool {
        fields.iter().any(|(name, value)| {
            if !name.eq_ignore_ascii_case(self.field()) {
                return false;
            }
            match self {
                Self::Equality { value: wanted, .. } => value.to_uppercase() == wanted.to_uppercase(),
                Self::Range { condition: None, .. } => false,
                Self::Range {
                    condition: Some(condition),
                    ..
                } => range::evaluate_or_false(value, name, condition),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub predicates: Vec<Predicate>,
    pub color: Color,
}

impl Query {
    pub fn parse(raw: &str) -> Result<(Self, Vec<QueryWarning>), EngineError> {
        Self::parse_with_default(raw, &Color::new(DEFAULT_QUERY_COLOR))
    }

    pub fn parse_with_default(
        raw: &str,
        default_color: &Color,
    ) -> Result<(Self, Vec<QueryWarning>), EngineError> {
        if raw.trim().is_empty() {
            return Err(EngineError::invalid_input(
                "Enter label names and a colour to colour the tree",
            ));
        }
        let warnings = quality_check(raw);
        for w in &warnings {
            log::warn!("Query '{raw}': {}", w.message());
        }

        let normalized = raw.trim().replace('=', "_");
        let mut clauses: Vec<&str> = CONJUNCTION
            .split(&normalized)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        let mut color = default_color.clone();
        if clauses.len() > 1 {
            if let Some(target) = clauses.last().and_then(|last| color_clause(last)) {
                color = target;
                clauses.pop();
            }
        }

        let query = Self {
            predicates: clauses.into_iter().map(Predicate::from_clause).collect(),
            color,
        };
        Ok((query, warnings))
    }

    pub fn is_range_aware(&self) -> bool {
        self.predicates.iter().any(|p| p.raw().contains('('))
    }

    /// All predicates must hold for `label`.
    pub fn matches(&self, label: &str) -> bool {
        if self.is_range_aware() {
            let decoded = decode(label);
            self.predicates
                .iter()
                .all(|p| p.holds_for_fields(&decoded.fields))
        } else {
            let upper = label.to_uppercase();
            self.predicates
                .iter()
                .all(|p| upper.contains(&p.raw().to_uppercase()))
        }
    }
}

/// Color for a leaf: the query's target color on a match, white otherwise.
pub fn evaluate_leaf(label: &str, query: &Query) -> Color {
    if query.matches(label) {
        query.color.clone()
    } else {
        Color::white()
    }
}

pub fn quality_check(raw: &str) -> Vec<QueryWarning> {
    let upper = raw.to_uppercase();
    let mut warnings = vec![];
    if !upper.contains(" AND ") {
        warnings.push(QueryWarning::MissingConjunction);
    }
    let normalized = raw.trim().replace('=', "_");
    let colour_clause_given = CONJUNCTION
        .split(&normalized)
        .last()
        .is_some_and(|last| color_clause(last.trim()).is_some());
    if !colour_clause_given && !COMMON_COLOURS.iter().any(|c| upper.contains(c)) && !upper.contains('#') {
        warnings.push(QueryWarning::MissingColor);
    }
    if !upper.contains('=') {
        warnings.push(QueryWarning::MissingAssignment);
    }
    warnings
}

fn color_clause(clause: &str) -> Option<Color> {
    let upper = clause.to_ascii_uppercase();
    for prefix in COLOUR_PREFIXES {
        if upper.starts_with(prefix) && upper[prefix.len()..].starts_with(FIELD_SEPARATOR) {
            let value = clause[prefix.len() + 1..].trim();
            return (!value.is_empty()).then(|| Color::new(value));
        }
    }
    Color::parse_token(clause)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = "S1 // prtS_1 // pH_4.2 // Lysotype_SoS-ST0234-SX";

    #[test]
    fn test_parse_simple_with_bare_color() {
        let (q, warnings) = Query::parse("prts_1 AND yellow").unwrap();
        assert_eq!(q.predicates.len(), 1);
        assert_eq!(q.predicates[0].field(), "prts");
        assert!(matches!(
            &q.predicates[0],
            Predicate::Equality { value, .. } if value == "1"
        ));
        assert_eq!(q.color, Color::new("yellow"));
        assert_eq!(warnings, vec![QueryWarning::MissingAssignment]);
    }

    #[test]
    fn test_parse_ranges_and_colour_clause() {
        let (q, warnings) = Query::parse("pH=(G,5) AND pH=(L,8) AND colour=red").unwrap();
        assert!(warnings.is_empty());
        assert_eq!(q.predicates.len(), 2);
        assert!(q.predicates.iter().all(|p| p.is_range()));
        assert_eq!(q.predicates[0].range_kind(), Some(RangeKind::GreaterOrEqual));
        assert_eq!(q.predicates[1].range_kind(), Some(RangeKind::LessThan));
        assert_eq!(q.color, Color::new("red"));
    }

    #[test]
    fn test_parse_without_color_appends_default() {
        let (q, warnings) = Query::parse("prtS=1 AND pH=4.2").unwrap();
        assert_eq!(q.predicates.len(), 2);
        assert_eq!(q.color, Color::new(DEFAULT_QUERY_COLOR));
        assert!(warnings.contains(&QueryWarning::MissingColor));

        let (single, warnings) = Query::parse("prtS_1").unwrap();
        assert_eq!(single.predicates.len(), 1);
        assert_eq!(single.color, Color::new(DEFAULT_QUERY_COLOR));
        assert!(warnings.contains(&QueryWarning::MissingConjunction));
    }

    #[test]
    fn test_parse_lowercase_conjunction_and_hex() {
        let (q, _) = Query::parse("prtS=1 and col=#00FF00").unwrap();
        assert_eq!(q.predicates.len(), 1);
        assert_eq!(q.color, Color::new("#00FF00"));
        // "and" inside a value is not a conjunction
        let (q, _) = Query::parse("Origin=Sandwich AND blue").unwrap();
        assert!(matches!(
            &q.predicates[0],
            Predicate::Equality { value, .. } if value == "Sandwich"
        ));
    }

    #[test]
    fn test_colour_prefix_counts_as_color() {
        let (q, warnings) = Query::parse("prtS=1 AND colour=teal").unwrap();
        assert_eq!(q.color, Color::new("teal"));
        assert!(warnings.is_empty());
        assert!(quality_check("prtS=1 AND COL=navy").is_empty());
        assert!(quality_check("prtS=1 AND Color=#123456").is_empty());
        assert_eq!(
            quality_check("prtS=1 AND Protocol=x"),
            vec![QueryWarning::MissingColor]
        );
    }

    #[test]
    fn test_range_condition_parsed_once() {
        let (q, _) = Query::parse("pH=(x,y) AND pH=(4,5) AND red").unwrap();
        assert!(q.predicates[0].is_range());
        assert_eq!(q.predicates[0].condition(), None);
        assert_eq!(q.predicates[1].condition(), Some(&RangeCondition::Between(4.0, 5.0)));
        // the stored condition survives a state round trip
        let json = serde_json::to_string(&q).unwrap();
        let back: Query = serde_json::from_str(&json).unwrap();
        assert_eq!(back, q);
        assert!(!back.matches(LEAF));
    }

    #[test]
    fn test_parse_empty_is_error() {
        assert!(Query::parse("   ").is_err());
    }

    #[test]
    fn test_simple_mode_is_substring_match() {
        let (q, _) = Query::parse("prts_1 AND yellow").unwrap();
        assert_eq!(evaluate_leaf(LEAF, &q), Color::new("yellow"));
        // loose: "sos-st02" is only part of a value
        let (q, _) = Query::parse("Lysotype=sos-st02 AND red").unwrap();
        assert!(q.matches(LEAF));
        let (q, _) = Query::parse("prts_0 AND colour=yellow").unwrap();
        assert!(evaluate_leaf(LEAF, &q).is_white());
    }

    #[test]
    fn test_range_mode_is_field_exact() {
        let (q, _) = Query::parse("prts_1 AND pH=(L,5) AND colour=yellow").unwrap();
        assert!(q.is_range_aware());
        assert_eq!(evaluate_leaf(LEAF, &q), Color::new("yellow"));

        // partial values no longer match once a range clause is present
        let (q, _) = Query::parse("Lysotype=sos-st02 AND pH=(4,5) AND red").unwrap();
        assert!(!q.matches(LEAF));
        let (q, _) = Query::parse("Lysotype=sos-st0234-sx AND pH=(4,5) AND red").unwrap();
        assert!(q.matches(LEAF));
    }

    #[test]
    fn test_range_mode_failures_do_not_match() {
        let (q, _) = Query::parse("pH=(G,5) AND red").unwrap();
        assert!(!q.matches("S2 // pH_NONE"));
        let (q, _) = Query::parse("pH=(x,y) AND red").unwrap();
        assert!(!q.matches(LEAF));
        let (q, _) = Query::parse("missing=(1,2) AND red").unwrap();
        assert!(!q.matches(LEAF));
    }
}
