//! Per-type normalization of untrusted input values.

use serde_json::Value as JsonValue;

use crate::schema::{FieldDescriptor, FieldType};
use crate::Value;

/// Outcome of coercing one payload entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Coercion {
    /// Key missing from the payload; leave the column untouched.
    Absent,
    /// Key present but empty or blank.
    SetNull,
    SetValue(Value),
}

/// Coerce `raw` according to the field's type. The error is a message
/// naming the field's label.
///
/// Handler fields are not special-cased here; callers route them to their
/// handler before reaching this function.
pub fn coerce(field: &FieldDescriptor, raw: Option<&JsonValue>) -> Result<Coercion, String> {
    let Some(raw) = raw else {
        return Ok(Coercion::Absent);
    };

    match field.field_type {
        FieldType::Readonly => Ok(Coercion::Absent),
        FieldType::Boolean => Ok(Coercion::SetValue(Value::Int(i64::from(is_true(raw))))),
        FieldType::Number => coerce_number(field, raw),
        FieldType::Password => Ok(match raw_text(raw) {
            Some(s) if !s.is_empty() => Coercion::SetValue(Value::Text(s)),
            _ => Coercion::SetNull,
        }),
        FieldType::Date | FieldType::Datetime => Ok(match trimmed(raw) {
            Some(s) => Coercion::SetValue(Value::Date(s)),
            None => Coercion::SetNull,
        }),
        FieldType::Select(options) => match trimmed(raw) {
            Some(s) if options.contains(&s.as_str()) => Ok(Coercion::SetValue(Value::Text(s))),
            Some(s) => Err(format!("{} : la valeur \"{}\" n'est pas autorisée", field.label, s)),
            None => Ok(Coercion::SetNull),
        },
        FieldType::Text | FieldType::Textarea | FieldType::Email | FieldType::Url => {
            Ok(match trimmed(raw) {
                Some(s) => Coercion::SetValue(Value::Text(s)),
                None => Coercion::SetNull,
            })
        }
    }
}

pub(crate) fn required_message(field: &FieldDescriptor) -> String {
    format!("{} est obligatoire", field.label)
}

/// Message for a value already held by another row of a unique field.
pub fn duplicate_message(field: &FieldDescriptor) -> String {
    format!("{} est déjà utilisé", field.label)
}

fn number_message(field: &FieldDescriptor) -> String {
    format!("{} doit être un nombre", field.label)
}

fn coerce_number(field: &FieldDescriptor, raw: &JsonValue) -> Result<Coercion, String> {
    match raw {
        JsonValue::Null => Ok(Coercion::SetNull),
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Coercion::SetValue(Value::Int(i))),
            (None, Some(f)) if f.is_finite() => Ok(Coercion::SetValue(number_value(f))),
            _ => Err(number_message(field)),
        },
        JsonValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Coercion::SetNull);
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Coercion::SetValue(Value::Int(i)));
            }
            match s.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Coercion::SetValue(number_value(f))),
                _ => Err(number_message(field)),
            }
        }
        _ => Err(number_message(field)),
    }
}

/// Whole numbers are stored as integers, the way a NUMERIC column keeps them.
fn number_value(f: f64) -> Value {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

/// `true`, `"true"`, `"1"` and `1` are true; everything else is false.
fn is_true(raw: &JsonValue) -> bool {
    match raw {
        JsonValue::Bool(b) => *b,
        JsonValue::String(s) => s == "true" || s == "1",
        JsonValue::Number(n) => n.as_f64() == Some(1.0),
        _ => false,
    }
}

fn raw_text(raw: &JsonValue) -> Option<String> {
    match raw {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Trimmed text, `None` when null or blank.
fn trimmed(raw: &JsonValue) -> Option<String> {
    raw_text(raw)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(t: FieldType) -> FieldDescriptor {
        FieldDescriptor::new("f", "Libellé", t)
    }

    #[test]
    fn missing_key_is_absent() {
        assert_eq!(coerce(&field(FieldType::Text), None), Ok(Coercion::Absent));
        assert_eq!(coerce(&field(FieldType::Boolean), None), Ok(Coercion::Absent));
    }

    #[test]
    fn numbers() {
        let f = field(FieldType::Number);
        assert_eq!(coerce(&f, Some(&json!("42"))), Ok(Coercion::SetValue(Value::Int(42))));
        assert_eq!(coerce(&f, Some(&json!(" 2.5 "))), Ok(Coercion::SetValue(Value::Float(2.5))));
        assert_eq!(coerce(&f, Some(&json!(7))), Ok(Coercion::SetValue(Value::Int(7))));
        assert_eq!(coerce(&f, Some(&json!(""))), Ok(Coercion::SetNull));
        assert_eq!(coerce(&f, Some(&json!(null))), Ok(Coercion::SetNull));
        let err = coerce(&f, Some(&json!("douze"))).unwrap_err();
        assert!(err.contains("Libellé"));
        assert!(coerce(&f, Some(&json!("NaN"))).is_err());
        assert!(coerce(&f, Some(&json!(true))).is_err());
    }

    #[test]
    fn whole_floats_become_integers() {
        let f = field(FieldType::Number);
        assert_eq!(coerce(&f, Some(&json!("45000.0"))), Ok(Coercion::SetValue(Value::Int(45000))));
        assert_eq!(coerce(&f, Some(&json!(45000.0))), Ok(Coercion::SetValue(Value::Int(45000))));
        assert_eq!(coerce(&f, Some(&json!("-3e2"))), Ok(Coercion::SetValue(Value::Int(-300))));
        assert_eq!(coerce(&f, Some(&json!(1e300))), Ok(Coercion::SetValue(Value::Float(1e300))));
    }

    #[test]
    fn booleans_store_zero_or_one() {
        let f = field(FieldType::Boolean);
        for raw in [json!(true), json!("true"), json!("1"), json!(1)] {
            assert_eq!(coerce(&f, Some(&raw)), Ok(Coercion::SetValue(Value::Int(1))), "{raw}");
        }
        for raw in [json!(false), json!("yes"), json!("TRUE"), json!(0), json!(2), json!(""), json!(null)] {
            assert_eq!(coerce(&f, Some(&raw)), Ok(Coercion::SetValue(Value::Int(0))), "{raw}");
        }
    }

    #[test]
    fn dates_pass_through() {
        let f = field(FieldType::Date);
        assert_eq!(
            coerce(&f, Some(&json!("2024-13-45"))),
            Ok(Coercion::SetValue(Value::Date("2024-13-45".into())))
        );
        assert_eq!(coerce(&f, Some(&json!(" "))), Ok(Coercion::SetNull));
    }

    #[test]
    fn selects_check_options() {
        let f = field(FieldType::Select(&["a", "b"]));
        assert_eq!(coerce(&f, Some(&json!("b"))), Ok(Coercion::SetValue(Value::from("b"))));
        assert_eq!(coerce(&f, Some(&json!(""))), Ok(Coercion::SetNull));
        let err = coerce(&f, Some(&json!("c"))).unwrap_err();
        assert!(err.contains("Libellé"));
    }

    #[test]
    fn text_is_trimmed() {
        let f = field(FieldType::Email);
        assert_eq!(
            coerce(&f, Some(&json!("  a@b.example "))),
            Ok(Coercion::SetValue(Value::from("a@b.example")))
        );
        assert_eq!(coerce(&f, Some(&json!("   "))), Ok(Coercion::SetNull));
        assert_eq!(coerce(&field(FieldType::Text), Some(&json!(12))), Ok(Coercion::SetValue(Value::from("12"))));
    }

    #[test]
    fn passwords_are_verbatim() {
        let f = field(FieldType::Password);
        assert_eq!(coerce(&f, Some(&json!(" pw "))), Ok(Coercion::SetValue(Value::from(" pw "))));
        assert_eq!(coerce(&f, Some(&json!(""))), Ok(Coercion::SetNull));
    }

    #[test]
    fn readonly_is_never_written() {
        let f = FieldDescriptor::primary_key("id", "ID");
        assert_eq!(coerce(&f, Some(&json!(5))), Ok(Coercion::Absent));
    }
}
