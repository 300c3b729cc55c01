//! `${name}` placeholder resolution against manifest variables.
//!
//! A string that is exactly one placeholder resolves to the variable's typed
//! value; placeholders embedded in longer text are replaced by the value's
//! text form. `\${` produces a literal `${`.

use crate::CoreError;
use berth_schema::{Properties, Variables};
use serde_json::Value;

pub fn substitute_value(value: &Value, variables: &Variables) -> Result<Value, CoreError> {
    match value {
        Value::String(text) => substitute_str(text, variables),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), substitute_value(v, variables)?)))
            .collect::<Result<serde_json::Map<_, _>, CoreError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

pub fn substitute_properties(
    properties: &Properties,
    variables: &Variables,
) -> Result<Properties, CoreError> {
    properties
        .iter()
        .map(|(key, value)| Ok((key.clone(), substitute_value(value, variables)?)))
        .collect()
}

/// Substitute into text, always producing text.
pub fn substitute_string(input: &str, variables: &Variables) -> Result<String, CoreError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find("${") {
        if rest[..pos].ends_with('\\') {
            out.push_str(&rest[..pos - 1]);
            out.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after.find('}').ok_or_else(|| CoreError::Substitution {
            input: input.to_owned(),
            reason: "unterminated placeholder".to_owned(),
        })?;
        let name = &after[..end];
        if name.is_empty() {
            return Err(CoreError::Substitution {
                input: input.to_owned(),
                reason: "empty variable name".to_owned(),
            });
        }
        match lookup(name, input, variables)? {
            Value::String(text) => out.push_str(text),
            other => out.push_str(&other.to_string()),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn substitute_str(input: &str, variables: &Variables) -> Result<Value, CoreError> {
    if let Some(name) = whole_placeholder(input) {
        return lookup(name, input, variables).cloned();
    }
    substitute_string(input, variables).map(Value::String)
}

fn whole_placeholder(input: &str) -> Option<&str> {
    let name = input.strip_prefix("${")?.strip_suffix('}')?;
    (!name.is_empty() && !name.contains('}') && !name.contains("${")).then_some(name)
}

fn lookup<'a>(name: &str, input: &str, variables: &'a Variables) -> Result<&'a Value, CoreError> {
    match variables.get(name) {
        None => Err(CoreError::Substitution {
            input: input.to_owned(),
            reason: format!("unresolved variable '{name}'"),
        }),
        Some(Value::Null) => Err(CoreError::UnsetVariable(name.to_owned())),
        Some(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Variables {
        let mut vars = Variables::new();
        vars.insert("host".to_owned(), json!("db.local"));
        vars.insert("port".to_owned(), json!(5432));
        vars.insert("debug".to_owned(), json!(true));
        vars.insert("unset".to_owned(), Value::Null);
        vars
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        let vars = vars();
        for input in ["", "plain", "cost: $5", "{braces}", "$host"] {
            let once = substitute_value(&json!(input), &vars).unwrap();
            assert_eq!(once, json!(input));
            assert_eq!(substitute_value(&once, &vars).unwrap(), once);
        }
    }

    #[test]
    fn every_variable_resolves() {
        let vars = vars();
        for (name, value) in vars.iter().filter(|(_, v)| !v.is_null()) {
            let resolved = substitute_value(&json!(format!("${{{name}}}")), &vars).unwrap();
            assert_eq!(&resolved, value);
        }
    }

    #[test]
    fn whole_placeholder_keeps_type() {
        let resolved = substitute_value(&json!("${port}"), &vars()).unwrap();
        assert_eq!(resolved, json!(5432));
    }

    #[test]
    fn embedded_placeholders_become_text() {
        let resolved = substitute_value(&json!("jdbc://${host}:${port}/x?debug=${debug}"), &vars()).unwrap();
        assert_eq!(resolved, json!("jdbc://db.local:5432/x?debug=true"));
    }

    #[test]
    fn absent_variable_fails() {
        let err = substitute_value(&json!("${missing}"), &vars()).unwrap_err();
        assert!(matches!(err, CoreError::Substitution { .. }));
        let err = substitute_string("prefix-${missing}", &vars()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn null_variable_is_unset() {
        let err = substitute_value(&json!("${unset}"), &vars()).unwrap_err();
        assert!(matches!(err, CoreError::UnsetVariable(name) if name == "unset"));
    }

    #[test]
    fn escaped_placeholder_is_literal() {
        let resolved = substitute_string(r"\${host} is ${host}", &vars()).unwrap();
        assert_eq!(resolved, "${host} is db.local");
    }

    #[test]
    fn malformed_placeholders_fail() {
        assert!(substitute_string("${host", &vars()).is_err());
        assert!(substitute_string("${}", &vars()).is_err());
    }

    #[test]
    fn arrays_and_properties_are_walked() {
        let mut props = Properties::new();
        props.insert("hosts".to_owned(), json!(["${host}", "backup"]));
        props.insert("port".to_owned(), json!("${port}"));
        props.insert("enabled".to_owned(), json!(false));
        let resolved = substitute_properties(&props, &vars()).unwrap();
        assert_eq!(resolved["hosts"], json!(["db.local", "backup"]));
        assert_eq!(resolved["port"], json!(5432));
        assert_eq!(resolved["enabled"], json!(false));
    }
}
