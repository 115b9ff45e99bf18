use serde_json::Value;

use crate::node::StopRule;

/// Resolve a dotted path against a JSON value.
///
/// Object segments are keys; array segments must parse as in-range indices.
/// Any type mismatch yields `None`.
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => {
                let index: usize = part.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// JSON truthiness: null, false, zero, and empty containers are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Whether a stop rule fires for the given output.
pub fn rule_fires(rule: &StopRule, output: &Value) -> bool {
    if rule.path.is_empty() {
        return false;
    }
    let found = lookup(output, &rule.path);
    match &rule.equals {
        // A missing path compares as null
        Some(expected) => found.unwrap_or(&Value::Null) == expected,
        None => found.is_some_and(is_truthy),
    }
}

/// Index of the first rule that fires, in declared order.
pub fn first_firing(rules: &[StopRule], output: &Value) -> Option<usize> {
    rules.iter().position(|r| rule_fires(r, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested() {
        let v = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup(&v, "a.b.0"), Some(&json!(10)));
        assert_eq!(lookup(&v, "a.b.1.c"), Some(&json!("deep")));
    }

    #[test]
    fn test_lookup_fails_closed() {
        let v = json!({"a": {"b": [1, 2]}, "s": "text"});
        assert_eq!(lookup(&v, "a.b.5"), None);
        assert_eq!(lookup(&v, "a.b.-1"), None);
        assert_eq!(lookup(&v, "a.b.x"), None);
        assert_eq!(lookup(&v, "s.inner"), None);
        assert_eq!(lookup(&v, "missing"), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!({"k": 1})));
    }

    #[test]
    fn test_rule_equals() {
        let out = json!({"verdict": {"level": "red"}});
        assert!(rule_fires(&StopRule::equals("verdict.level", json!("red")), &out));
        assert!(!rule_fires(&StopRule::equals("verdict.level", json!("green")), &out));
        assert!(rule_fires(&StopRule::equals("verdict.missing", Value::Null), &out));
    }

    #[test]
    fn test_rule_truthy() {
        let out = json!({"halt": true, "flags": []});
        assert!(rule_fires(&StopRule::truthy("halt"), &out));
        assert!(!rule_fires(&StopRule::truthy("flags"), &out));
        assert!(!rule_fires(&StopRule::truthy(""), &out));
    }

    #[test]
    fn test_first_firing_order() {
        let out = json!({"a": 1, "b": 1});
        let rules = vec![
            StopRule::truthy("zzz"),
            StopRule::truthy("b"),
            StopRule::truthy("a"),
        ];
        assert_eq!(first_firing(&rules, &out), Some(1));
        assert_eq!(first_firing(&[], &out), None);
    }
}
