//! §4.4: secret substitution collaborator hook.
//!
//! Secrets appear in tool arguments as `%NAME%` tokens. The scheduler
//! calls [`substitute`] on a tool call's arguments immediately before
//! dispatch. Substituted values are never logged by this crate.

use serde_json::Value;
use std::collections::HashMap;

pub fn substitute(value: &mut Value, secrets: &HashMap<String, String>) {
    if secrets.is_empty() {
        return;
    }
    match value {
        Value::String(s) => {
            *s = substitute_str(s, secrets);
        }
        Value::Array(items) => {
            for item in items {
                substitute(item, secrets);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                substitute(v, secrets);
            }
        }
        _ => {}
    }
}

fn substitute_str(input: &str, secrets: &HashMap<String, String>) -> String {
    let mut out = input.to_string();
    for (name, value) in secrets {
        let token = format!("%{}%", name);
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_token_in_nested_object() {
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "sekrit".to_string());
        let mut args = json!({ "headers": { "auth": "Bearer %API_KEY%" } });
        substitute(&mut args, &secrets);
        assert_eq!(args["headers"]["auth"], "Bearer sekrit");
    }

    #[test]
    fn leaves_unrecognized_tokens_untouched() {
        let secrets = HashMap::new();
        let mut args = json!({ "v": "%UNKNOWN%" });
        substitute(&mut args, &secrets);
        assert_eq!(args["v"], "%UNKNOWN%");
    }
}
