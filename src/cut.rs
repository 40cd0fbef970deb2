//! Restricted custom-cut expressions.
//!
//! Grammar:
//!
//! ```text
//! expression := condition ( " & " condition )*
//! condition  := identifier ws* operator ws* number
//! operator   := "==" | "!=" | "<=" | ">=" | "<" | ">"
//! number     := digits ( "." digits )?
//! ```
//!
//! There is no OR, no grouping and no negative literal. Expressions are
//! parsed into data and evaluated against named per-event arrays; nothing is
//! ever executed.

use std::collections::BTreeMap;
use std::fmt;

use crate::data::filter::CompareOp;
use crate::error::{Result, SelectionError};

/// Separator between AND-ed conditions, spaces included.
pub const AND_TOKEN: &str = " & ";

/// Named per-event arrays a cut expression may refer to.
pub type CutBindings = BTreeMap<String, Vec<f64>>;

/// `identifier OP literal`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub identifier: String,
    pub op: CompareOp,
    pub literal: f64,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.identifier, self.op, self.literal)
    }
}

/// A parsed custom cut: the AND of its conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct CutExpression {
    source: String,
    conditions: Vec<Condition>,
}

impl CutExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        if expression.trim().is_empty() {
            return Err(SelectionError::parse(expression, "empty expression"));
        }
        let conditions = expression
            .split(AND_TOKEN)
            .map(|part| parse_condition(expression, part))
            .collect::<Result<Vec<_>>>()?;
        Ok(CutExpression {
            source: expression.to_string(),
            conditions,
        })
    }

    /// The expression text exactly as supplied.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|c| c.identifier.as_str())
    }

    /// Per-event mask. Every identifier must be bound and every bound array
    /// used must have the same length.
    pub fn evaluate(&self, bindings: &CutBindings) -> Result<Vec<bool>> {
        let mut arrays = Vec::with_capacity(self.conditions.len());
        for cond in &self.conditions {
            let values = bindings.get(&cond.identifier).ok_or_else(|| {
                SelectionError::configuration(format!(
                    "unknown identifier '{}' in cut '{}'",
                    cond.identifier, self.source
                ))
            })?;
            arrays.push((cond, values));
        }

        let n = arrays.first().map_or(0, |(_, v)| v.len());
        if let Some((cond, v)) = arrays.iter().find(|(_, v)| v.len() != n) {
            return Err(SelectionError::configuration(format!(
                "binding '{}' has {} entries, expected {n}",
                cond.identifier,
                v.len()
            )));
        }

        let mut mask = vec![true; n];
        for (cond, values) in arrays {
            for (m, &v) in mask.iter_mut().zip(values) {
                *m &= cond.op.apply(v, cond.literal);
            }
        }
        Ok(mask)
    }
}

impl fmt::Display for CutExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one step.
pub fn evaluate_cut(expression: &str, bindings: &CutBindings) -> Result<Vec<bool>> {
    CutExpression::parse(expression)?.evaluate(bindings)
}

fn parse_condition(expression: &str, part: &str) -> Result<Condition> {
    let text = part.trim();
    if text.is_empty() {
        return Err(SelectionError::parse(expression, "empty condition"));
    }

    let ident_len = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    let identifier = &text[..ident_len];
    if identifier.is_empty() || identifier.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(SelectionError::parse(
            expression,
            format!("condition '{text}' must start with an identifier"),
        ));
    }

    let rest = text[ident_len..].trim_start();
    let op = CompareOp::ALL
        .into_iter()
        .find(|op| rest.starts_with(op.symbol()))
        .ok_or_else(|| {
            SelectionError::parse(
                expression,
                format!("condition '{text}' has no comparison operator after '{identifier}'"),
            )
        })?;

    let literal_text = rest[op.symbol().len()..].trim_start();
    let literal = parse_literal(literal_text).ok_or_else(|| {
        SelectionError::parse(
            expression,
            format!("'{literal_text}' in condition '{text}' is not a numeric literal"),
        )
    })?;

    Ok(Condition {
        identifier: identifier.to_string(),
        op,
        literal,
    })
}

/// `digits` or `digits.digits`.
fn parse_literal(text: &str) -> Option<f64> {
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !frac_part.map_or(true, all_digits) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> CutBindings {
        CutBindings::from([
            ("selCMet".to_string(), vec![100.0, 200.0]),
            ("nSelPhotons".to_string(), vec![1.0, 1.0]),
        ])
    }

    #[test]
    fn and_of_two_conditions() {
        let mask = evaluate_cut("selCMet>150 & nSelPhotons==1", &bindings()).unwrap();
        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn whitespace_around_operator_is_allowed() {
        let cut = CutExpression::parse("selCMet >= 100.5").unwrap();
        assert_eq!(
            cut.conditions(),
            &[Condition {
                identifier: "selCMet".into(),
                op: CompareOp::Ge,
                literal: 100.5
            }]
        );
        assert_eq!(cut.evaluate(&bindings()).unwrap(), vec![false, true]);
    }

    #[test]
    fn every_operator_parses() {
        for (text, op) in [
            ("a==1", CompareOp::Eq),
            ("a!=1", CompareOp::Ne),
            ("a<=1", CompareOp::Le),
            ("a>=1", CompareOp::Ge),
            ("a<1", CompareOp::Lt),
            ("a>1", CompareOp::Gt),
        ] {
            assert_eq!(CutExpression::parse(text).unwrap().conditions()[0].op, op);
        }
    }

    #[test]
    fn unknown_identifier_is_configuration_error() {
        let err = evaluate_cut("nJets>2", &bindings()).unwrap_err();
        match err {
            SelectionError::Configuration(msg) => assert!(msg.contains("nJets")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_expressions_are_parse_errors() {
        for bad in [
            "x>>1",
            "",
            "selCMet",
            "selCMet>",
            "selCMet>abc",
            "selCMet>-5",
            "selCMet>1.",
            "selCMet>150&nSelPhotons==1",
            "selCMet>150 | nSelPhotons==1",
            "selCMet>150 &  & nSelPhotons==1",
            "(selCMet>150)",
            "1>0",
        ] {
            assert!(
                matches!(CutExpression::parse(bad), Err(SelectionError::Parse { .. })),
                "expected parse error for {bad:?}"
            );
        }
    }

    #[test]
    fn mismatched_binding_lengths_are_rejected() {
        let mut b = bindings();
        b.insert("SV_nHadronic".into(), vec![1.0]);
        assert!(evaluate_cut("selCMet>0 & SV_nHadronic==1", &b).is_err());
    }
}
