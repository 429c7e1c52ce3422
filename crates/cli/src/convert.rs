//! One-way `hcl::Value` → `serde_json::Value` conversion for command output.
//! Rendering is display-only; nothing in the evaluator round-trips through
//! JSON.

pub fn hcl_to_json(value: &hcl::Value) -> serde_json::Value {
    match value {
        hcl::Value::Null => serde_json::Value::Null,
        hcl::Value::Bool(b) => serde_json::Value::Bool(*b),
        hcl::Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        hcl::Value::String(s) => serde_json::Value::String(s.clone()),
        hcl::Value::Array(items) => serde_json::Value::Array(items.iter().map(hcl_to_json).collect()),
        hcl::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map.iter() {
                out.insert(k.clone(), hcl_to_json(v));
            }
            serde_json::Value::Object(out)
        }
    }
}
