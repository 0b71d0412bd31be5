// Automation Values - Field resolution and lenient coercion of event data

use serde_json::{Map, Number, Value};

/// Event data: string keys mapped to dynamic JSON values.
pub type EventData = Map<String, Value>;

/// Walk a dotted path (`order.customer.tier`) through nested objects.
///
/// A missing key, a non-object intermediate or an explicit JSON `null` all
/// resolve to `None`. Arrays are never indexed.
pub fn resolve_field<'a>(path: &str, data: &'a EventData) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;

    for part in parts {
        current = current.as_object()?.get(part)?;
    }

    if current.is_null() { None } else { Some(current) }
}

/// Default textual form of a value, used by every string-based operator.
///
/// Integral numbers print without a fractional part so that `150`, `150.0`
/// and `"150"` all compare equal. Arrays and objects print as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }

    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Best-effort numeric coercion. Missing values, booleans, containers and
/// unparsable strings all become `0.0`.
pub fn to_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Stringify-then-compare equality. A missing field equals only `null`.
pub fn loosely_equal(field: Option<&Value>, expected: &Value) -> bool {
    match (field, expected) {
        (None, Value::Null) => true,
        (None, _) | (Some(_), Value::Null) => false,
        (Some(actual), expected) => stringify(actual) == stringify(expected),
    }
}
