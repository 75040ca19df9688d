// ============================================================
// Layer 3 - Run Search Filter
// ============================================================
// A small typed version of the tracking store's filter strings:
//
//   params.model_name = 'resnet_18' and metrics.best_val_acc > 0.8
//
// Clauses are joined with `and` (case-insensitive). Each clause is
// <scope>.<key> <op> <value> where scope is params, tags, metrics
// or attributes (run_name, status). Strings are quoted with ' or ",
// metric values are numbers. An empty filter matches every run.

use std::str::FromStr;

use crate::domain::error::{Error, Result};
use crate::domain::run::RunRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Param(String),
    Tag(String),
    Metric(String),
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    // Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, CmpOp); 6] = [
        ("!=", CmpOp::Ne),
        (">=", CmpOp::Ge),
        ("<=", CmpOp::Le),
        ("=", CmpOp::Eq),
        (">", CmpOp::Gt),
        ("<", CmpOp::Lt),
    ];

    fn holds<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Text(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: Field,
    pub op:    CmpOp,
    pub value: Literal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    pub clauses: Vec<Clause>,
}

impl RunFilter {
    pub fn matches(&self, run: &RunRecord) -> bool {
        self.clauses.iter().all(|c| c.matches(run))
    }
}

impl Clause {
    fn matches(&self, run: &RunRecord) -> bool {
        match (&self.field, &self.value) {
            (Field::Metric(key), Literal::Number(n)) => match run.metric(key) {
                Some(v) => self.op.holds(v, *n),
                None => false,
            },
            (Field::Metric(_), Literal::Text(_)) => false,
            (field, literal) => {
                let Some(actual) = field_text(field, run) else {
                    return false;
                };
                let expected = match literal {
                    Literal::Text(s) => s.clone(),
                    Literal::Number(n) => n.to_string(),
                };
                // Numeric params compare numerically when both sides parse.
                match (actual.parse::<f64>(), expected.parse::<f64>()) {
                    (Ok(a), Ok(b)) => self.op.holds(a, b),
                    _ => self.op.holds(actual.as_str(), expected.as_str()),
                }
            }
        }
    }
}

/// Render a param/tag/attribute as the plain string the filter compares against.
fn field_text(field: &Field, run: &RunRecord) -> Option<String> {
    let (doc, key) = match field {
        Field::Param(k) => (serde_json::to_value(&run.params).ok()?, k),
        Field::Tag(k) => (serde_json::to_value(&run.tags).ok()?, k),
        Field::Attribute(k) => {
            return match k.as_str() {
                "run_name" => Some(run.run_name.clone()),
                "run_id" => Some(run.run_id.clone()),
                "status" => serde_json::to_value(run.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string)),
                _ => None,
            };
        }
        Field::Metric(_) => return None,
    };
    match doc.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl FromStr for RunFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(RunFilter::default());
        }
        let clauses = split_and(s)
            .into_iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>>>()?;
        Ok(RunFilter { clauses })
    }
}

/// Split on the `and` keyword outside of quotes.
fn split_and(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None => {
                let rest = &bytes[i..];
                if rest.len() >= 5
                    && rest[0].is_ascii_whitespace()
                    && rest[1..4].eq_ignore_ascii_case(b"and")
                    && rest[4].is_ascii_whitespace()
                {
                    parts.push(s[start..i].trim());
                    i += 5;
                    start = i;
                    continue;
                }
            }
        }
        i += 1;
    }
    parts.push(s[start..].trim());
    parts
}

fn parse_clause(raw: &str) -> Result<Clause> {
    let bad = |why: &str| Error::InvalidArgument(format!("invalid filter clause '{raw}': {why}"));

    let (pos, token, op) = CmpOp::TOKENS
        .iter()
        .filter_map(|(tok, op)| raw.find(tok).map(|p| (p, *tok, *op)))
        .min_by_key(|(p, tok, _)| (*p, usize::MAX - tok.len()))
        .ok_or_else(|| bad("missing comparison operator"))?;

    let lhs = raw[..pos].trim();
    let rhs = raw[pos + token.len()..].trim();

    let (scope, key) = lhs.split_once('.').ok_or_else(|| bad("expected <scope>.<key>"))?;
    if key.is_empty() {
        return Err(bad("empty key"));
    }
    let field = match scope {
        "params" | "param" => Field::Param(key.to_string()),
        "tags" | "tag" => Field::Tag(key.to_string()),
        "metrics" | "metric" => Field::Metric(key.to_string()),
        "attributes" | "attribute" | "attr" => Field::Attribute(key.to_string()),
        _ => return Err(bad("scope must be params, tags, metrics or attributes")),
    };

    let value = if let Some(text) = unquote(rhs) {
        Literal::Text(text.to_string())
    } else {
        rhs.parse::<f64>()
            .map(Literal::Number)
            .map_err(|_| bad("value must be a quoted string or a number"))?
    };

    if matches!(field, Field::Metric(_)) && !matches!(value, Literal::Number(_)) {
        return Err(bad("metrics compare against numbers"));
    }

    Ok(Clause { field, op, value })
}

fn unquote(s: &str) -> Option<&str> {
    let first = s.chars().next()?;
    if (first == '\'' || first == '"') && s.len() >= 2 && s.ends_with(first) {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{Architecture, DeviceTarget, SelectionMetric, TrainingConfiguration};
    use crate::domain::run::{RunParams, RunStatus, RunTags};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn run(arch: Architecture, best_val_acc: f64) -> RunRecord {
        let cfg = TrainingConfiguration {
            architecture:     arch,
            n_classes:        2,
            epochs:           3,
            learning_rate:    1e-4,
            weight_decay:     0.0,
            batch_size:       8,
            device:           DeviceTarget::Cpu,
            selection_metric: SelectionMetric::ValAcc,
            seed:             7,
            load_pretrained:  false,
        };
        let mut metrics = BTreeMap::new();
        metrics.insert("best_val_acc".to_string(), best_val_acc);
        RunRecord {
            run_id:       "r".into(),
            run_name:     format!("{arch} - v1"),
            experiment:   "catdog".into(),
            status:       RunStatus::Finished,
            start_time:   Utc::now(),
            end_time:     Some(Utc::now()),
            tags:         RunTags::new("v1", &["cat".to_string(), "dog".to_string()]),
            params:       RunParams::from_config(&cfg, 224, [0.5; 3], [0.5; 3]),
            history:      Vec::new(),
            metrics,
            artifact_uri: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let f: RunFilter = "".parse().unwrap();
        assert!(f.matches(&run(Architecture::ResNet18, 0.1)));
    }

    #[test]
    fn param_and_metric_clauses_combine() {
        let f: RunFilter = "params.model_name = 'resnet_18' AND metrics.best_val_acc >= 0.8"
            .parse()
            .unwrap();
        assert_eq!(f.clauses.len(), 2);
        assert!(f.matches(&run(Architecture::ResNet18, 0.85)));
        assert!(!f.matches(&run(Architecture::ResNet18, 0.75)));
        assert!(!f.matches(&run(Architecture::MobileNetV2, 0.95)));
    }

    #[test]
    fn numeric_params_compare_as_numbers() {
        let f: RunFilter = "params.batch_size > 4".parse().unwrap();
        assert!(f.matches(&run(Architecture::ResNet18, 0.5)));
        let f: RunFilter = "params.batch_size < 4".parse().unwrap();
        assert!(!f.matches(&run(Architecture::ResNet18, 0.5)));
    }

    #[test]
    fn quoted_and_is_not_a_separator() {
        let f: RunFilter = "tags.data_version = 'cats and dogs'".parse().unwrap();
        assert_eq!(f.clauses.len(), 1);
        assert_eq!(f.clauses[0].value, Literal::Text("cats and dogs".into()));
    }

    #[test]
    fn missing_metric_never_matches() {
        let f: RunFilter = "metrics.test_acc > 0".parse().unwrap();
        assert!(!f.matches(&run(Architecture::ResNet18, 0.5)));
    }

    #[test]
    fn malformed_clauses_are_invalid_arguments() {
        assert!("model_name = 'x'".parse::<RunFilter>().is_err());
        assert!("params.model_name ~ 'x'".parse::<RunFilter>().is_err());
        assert!("metrics.best_val_acc > 'high'".parse::<RunFilter>().is_err());
    }

    #[test]
    fn two_char_operator_wins_over_prefix() {
        let f: RunFilter = "metrics.best_val_acc <= 0.5".parse().unwrap();
        assert_eq!(f.clauses[0].op, CmpOp::Le);
    }

    #[test]
    fn status_attribute_is_filterable() {
        let f: RunFilter = "attributes.status = 'FINISHED'".parse().unwrap();
        assert!(f.matches(&run(Architecture::ResNet34, 0.5)));
    }
}
