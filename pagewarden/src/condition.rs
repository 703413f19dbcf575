//! Comparison operators for criterion and flag gates.

use regex::Regex;

use crate::errors::EngineError;

/// A comparison between an observed value and a document-supplied one.
///
/// Operators are written in the document either as a word (`"contains"`) or
/// as a symbol alias (`"@"`), case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Search,
    NotSearch,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
}

impl CompareOp {
    pub fn parse(op: &str) -> Result<Self, EngineError> {
        match op.to_lowercase().as_str() {
            "equals" | "==" => Ok(CompareOp::Equals),
            "notequals" | "!=" => Ok(CompareOp::NotEquals),
            "contains" | "@" => Ok(CompareOp::Contains),
            "notcontains" | "!@" => Ok(CompareOp::NotContains),
            "search" | "~" => Ok(CompareOp::Search),
            "notsearch" | "!~" => Ok(CompareOp::NotSearch),
            "lessthan" | "<" => Ok(CompareOp::LessThan),
            "lessthanequals" | "<=" => Ok(CompareOp::LessThanEquals),
            "greaterthan" | ">" => Ok(CompareOp::GreaterThan),
            "greaterthanequals" | ">=" => Ok(CompareOp::GreaterThanEquals),
            _ => Err(EngineError::UnknownOperator(op.to_string())),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Equals => "==",
            CompareOp::NotEquals => "!=",
            CompareOp::Contains => "@",
            CompareOp::NotContains => "!@",
            CompareOp::Search => "~",
            CompareOp::NotSearch => "!~",
            CompareOp::LessThan => "<",
            CompareOp::LessThanEquals => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanEquals => ">=",
        }
    }

    /// Evaluate `observed <op> expected`.
    ///
    /// The four ordered comparisons parse both sides as floating point and
    /// fail when either side does not parse. The search forms treat
    /// `expected` as a regular expression matched anywhere in `observed`; no
    /// match is `false`, not an error.
    pub fn evaluate(&self, observed: &str, expected: &str) -> Result<bool, EngineError> {
        match self {
            CompareOp::Equals => Ok(observed == expected),
            CompareOp::NotEquals => Ok(observed != expected),
            CompareOp::Contains => Ok(observed.contains(expected)),
            CompareOp::NotContains => Ok(!observed.contains(expected)),
            CompareOp::Search => Ok(self.pattern(expected)?.is_match(observed)),
            CompareOp::NotSearch => Ok(!self.pattern(expected)?.is_match(observed)),
            CompareOp::LessThan => self.numeric(observed, expected, |l, r| l < r),
            CompareOp::LessThanEquals => self.numeric(observed, expected, |l, r| l <= r),
            CompareOp::GreaterThan => self.numeric(observed, expected, |l, r| l > r),
            CompareOp::GreaterThanEquals => self.numeric(observed, expected, |l, r| l >= r),
        }
    }

    fn pattern(&self, expected: &str) -> Result<Regex, EngineError> {
        Regex::new(expected).map_err(|e| EngineError::InvalidPattern {
            pattern: expected.to_string(),
            reason: e.to_string(),
        })
    }

    fn numeric(
        &self,
        observed: &str,
        expected: &str,
        cmp: fn(f64, f64) -> bool,
    ) -> Result<bool, EngineError> {
        let non_numeric = || EngineError::NonNumericComparison {
            observed: observed.to_string(),
            op: self.symbol().to_string(),
            expected: expected.to_string(),
        };
        let lhs: f64 = observed.trim().parse().map_err(|_| non_numeric())?;
        let rhs: f64 = expected.trim().parse().map_err(|_| non_numeric())?;
        Ok(cmp(lhs, rhs))
    }
}

/// Parse the operator and evaluate in one step.
pub fn evaluate(observed: &str, expected: &str, op: &str) -> Result<bool, EngineError> {
    CompareOp::parse(op)?.evaluate(observed, expected)
}
