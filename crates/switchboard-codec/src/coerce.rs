//! Tool-argument coercion and schema-driven normalization.
//!
//! Models emit tool arguments in every shape imaginable: JSON objects, JSON
//! strings, fenced code blocks, JSON5-ish text with single quotes, or loose
//! `key=value` lines. The coercion ladder turns any of those into an object;
//! normalization then reshapes the object against the declared tool schema
//! so the receiving side gets the field names it expects.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Transient `tool-name (lower-cased) → JSON Schema` mapping built from
/// whichever side of a conversion declares tool schemas. Lives for a single
/// conversion call.
#[derive(Debug, Clone, Default)]
pub struct ToolSchemaMap {
    map: HashMap<String, Value>,
}

impl ToolSchemaMap {
    /// Build from an OpenAI-style `tools` list:
    /// `[{type:"function", function:{name, parameters}}]`.
    pub fn from_openai_tools(tools: Option<&Value>) -> Self {
        let mut map = HashMap::new();
        if let Some(list) = tools.and_then(Value::as_array) {
            for tool in list {
                let function = tool.get("function").unwrap_or(tool);
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    if let Some(params) = function.get("parameters") {
                        map.insert(name.to_lowercase(), params.clone());
                    }
                }
            }
        }
        Self { map }
    }

    /// Build from an Anthropic-style `tools` list:
    /// `[{name, description, input_schema}]`.
    pub fn from_anthropic_tools(tools: Option<&Value>) -> Self {
        let mut map = HashMap::new();
        if let Some(list) = tools.and_then(Value::as_array) {
            for tool in list {
                if let Some(name) = tool.get("name").and_then(Value::as_str) {
                    if let Some(schema) = tool.get("input_schema") {
                        map.insert(name.to_lowercase(), schema.clone());
                    }
                }
            }
        }
        Self { map }
    }

    pub fn get(&self, tool_name: &str) -> Option<&Value> {
        self.map.get(&tool_name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Serialize for the sticky request binding so the response side can
    /// normalize with the schemas the request declared.
    pub fn to_value(&self) -> Value {
        Value::Object(self.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn from_value(value: &Value) -> Self {
        let map = value
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Self { map }
    }
}

/// Keys that frequently wrap the real argument object one level deep.
const WRAPPER_KEYS: &[&str] = &["input", "args", "arguments", "parameters", "data", "payload"];

/// Synonym table: schema field name → aliases models commonly use instead.
const FIELD_SYNONYMS: &[(&str, &[&str])] = &[
    ("file_path", &["filepath", "file", "path"]),
    ("pattern", &["query", "regex", "_raw"]),
    ("glob", &["include"]),
    ("old_string", &["old", "from", "before"]),
    ("new_string", &["new", "to", "after"]),
    ("command", &["cmd", "shell"]),
    ("content", &["text", "body"]),
    ("url", &["uri", "link"]),
];

/// Coerce a raw tool argument value into an object. Never fails; the worst
/// input degrades to `{"_raw": <text>}`.
pub fn coerce_arguments(raw: Option<&Value>) -> Map<String, Value> {
    let coerced = match raw {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(obj)) => obj.clone(),
        Some(Value::String(s)) => coerce_string(s),
        Some(Value::Array(items)) => coerce_array(items),
        Some(other) => {
            let mut m = Map::new();
            m.insert("_raw".to_string(), other.clone());
            m
        }
    };
    unwrap_wrapper_keys(coerced)
}

fn coerce_string(s: &str) -> Map<String, Value> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Map::new();
    }

    if let Some(value) = parse_lenient(trimmed) {
        return match value {
            Value::Object(obj) => obj,
            Value::Array(items) => coerce_array(&items),
            other => {
                let mut m = Map::new();
                m.insert("_raw".to_string(), other);
                m
            }
        };
    }

    if let Some(pairs) = parse_kv_lines(trimmed) {
        return pairs;
    }

    let mut m = Map::new();
    m.insert("_raw".to_string(), Value::String(trimmed.to_string()));
    m
}

/// The string-parse ladder: strict JSON, fenced block, brace/bracket
/// substring, then quote repair.
fn parse_lenient(s: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(s) {
        return Some(v);
    }
    if let Some(fenced) = extract_fenced_block(s) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(v);
        }
    }
    for open in ['{', '['] {
        if let Some(sub) = extract_balanced(s, open) {
            if let Ok(v) = serde_json::from_str::<Value>(&sub) {
                return Some(v);
            }
            if let Ok(v) = serde_json::from_str::<Value>(&repair_quotes(&sub)) {
                return Some(v);
            }
        }
    }
    serde_json::from_str::<Value>(&repair_quotes(s)).ok()
}

fn extract_fenced_block(s: &str) -> Option<&str> {
    let start = s.find("```json").map(|i| i + 7).or_else(|| {
        // plain fence with a JSON-looking body
        s.find("```").map(|i| i + 3)
    })?;
    let rest = &s[start..];
    let end = rest.find("```")?;
    Some(&rest[..end])
}

/// Extract the first balanced `{...}` or `[...]` run. The depth counter
/// skips over string literals so braces inside values do not confuse it.
fn extract_balanced(s: &str, open: char) -> Option<String> {
    let close = if open == '{' { '}' } else { ']' };
    let start = s.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[start..start + i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON-5-ish repair: single quotes become double quotes and bareword keys
/// get quoted. Lossy but only ever attempted after strict parsing failed.
fn repair_quotes(s: &str) -> String {
    let swapped: String = s.replace('\'', "\"");
    quote_bareword_keys(&swapped)
}

fn quote_bareword_keys(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    let mut expect_key = false;
    let mut in_string = false;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '"' && chars.get(i.wrapping_sub(1)) != Some(&'\\') {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '{' | ',' => {
                expect_key = true;
                out.push(c);
                i += 1;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            c if expect_key && (c.is_alphabetic() || c == '_') => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if chars.get(j) == Some(&':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                expect_key = false;
            }
            _ => {
                expect_key = false;
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Last-resort parse of `key=value` or `key: value` lines into a flat map.
fn parse_kv_lines(s: &str) -> Option<Map<String, Value>> {
    let mut out = Map::new();
    for line in s.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        let value = value.trim();
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        out.insert(key.to_string(), parsed);
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn coerce_array(items: &[Value]) -> Map<String, Value> {
    if items.is_empty() {
        return Map::new();
    }
    if items.iter().all(Value::is_object) {
        // shallow merge, first writer wins
        let mut merged = Map::new();
        for item in items {
            for (k, v) in item.as_object().unwrap() {
                merged.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        return merged;
    }
    // array of primitives: the first element is wrapped literally, never
    // re-parsed
    let mut m = Map::new();
    m.insert("_raw".to_string(), items[0].clone());
    m
}

/// While the object holds exactly one well-known wrapper key, replace it
/// with that key's value, re-coercing strings along the way.
fn unwrap_wrapper_keys(mut obj: Map<String, Value>) -> Map<String, Value> {
    loop {
        if obj.len() != 1 {
            return obj;
        }
        let key = obj.keys().next().unwrap().clone();
        if !WRAPPER_KEYS.contains(&key.as_str()) {
            return obj;
        }
        let inner = obj.remove(&key).unwrap();
        obj = match inner {
            Value::Object(o) => o,
            Value::String(s) => coerce_string(&s),
            Value::Array(items) => coerce_array(&items),
            other => {
                let mut m = Map::new();
                m.insert("_raw".to_string(), other);
                return m;
            }
        };
    }
}

/// Reshape a coerced argument object against a declared tool schema.
///
/// Returns `None` when a required field is still missing after synonym
/// renaming; the caller must drop the tool call entirely rather than emit
/// arguments the tool would reject.
pub fn normalize_arguments(
    args: Map<String, Value>,
    schema: Option<&Value>,
) -> Option<Map<String, Value>> {
    let Some(schema) = schema else {
        return Some(args);
    };
    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    let mut out = Map::new();
    let mut leftover = args;

    if let Some(props) = properties {
        for field in props.keys() {
            if let Some(v) = leftover.remove(field) {
                out.insert(field.clone(), v);
                continue;
            }
            // try the synonym list for this schema field
            if let Some((_, synonyms)) = FIELD_SYNONYMS.iter().find(|(f, _)| f == field) {
                if let Some(hit) = synonyms.iter().find(|s| leftover.contains_key(**s)) {
                    let v = leftover.remove(*hit).unwrap();
                    out.insert(field.clone(), v);
                }
            }
        }
    }

    if !closed {
        for (k, v) in leftover {
            out.entry(k).or_insert(v);
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !out.contains_key(field) {
                return None;
            }
        }
    }

    Some(out)
}

/// Full pipeline for one tool call: coerce, then normalize when the tool has
/// a declared schema. `None` means the call must be dropped.
pub fn coerce_and_normalize(
    raw: Option<&Value>,
    tool_name: &str,
    schemas: &ToolSchemaMap,
) -> Option<Map<String, Value>> {
    let args = coerce_arguments(raw);
    normalize_arguments(args, schemas.get(tool_name))
}
