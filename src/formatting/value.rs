//! Property value → JSON
//!
//! Every [`PropertyValue`] variant renders to syntactically valid JSON:
//! sequences become arrays, dictionaries and structures become objects, and
//! scalars without a JSON counterpart (datetimes, non-finite floats) become
//! strings.

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

use crate::core::event::{PropertyValue, ScalarValue};
use crate::core::template::{format_invariant, natural_float};
use crate::error::Result;

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ScalarValue::Null => serializer.serialize_unit(),
            ScalarValue::Bool(b) => serializer.serialize_bool(*b),
            ScalarValue::I64(v) => serializer.serialize_i64(*v),
            ScalarValue::U64(v) => serializer.serialize_u64(*v),
            ScalarValue::F64(v) if v.is_finite() => serializer.serialize_f64(*v),
            ScalarValue::F64(v) => serializer.serialize_str(&natural_float(*v)),
            ScalarValue::Char(c) => serializer.serialize_char(*c),
            ScalarValue::String(s) => serializer.serialize_str(s),
            ScalarValue::DateTime(_) => serializer.serialize_str(&format_invariant(self, None)),
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PropertyValue::Scalar(scalar) => scalar.serialize(serializer),
            PropertyValue::Sequence(elements) => {
                let mut seq = serializer.serialize_seq(Some(elements.len()))?;
                for element in elements {
                    seq.serialize_element(element)?;
                }
                seq.end()
            }
            PropertyValue::Dictionary(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    // 重复的键按原样输出，不做去重
                    map.serialize_entry(&format_invariant(key, None), value)?;
                }
                map.end()
            }
            PropertyValue::Structure(structure) => {
                let len = structure.fields.len() + usize::from(structure.type_tag.is_some());
                let mut map = serializer.serialize_map(Some(len))?;
                for (name, value) in &structure.fields {
                    map.serialize_entry(name, value)?;
                }
                if let Some(tag) = &structure.type_tag {
                    map.serialize_entry("$type", tag)?;
                }
                map.end()
            }
        }
    }
}

/// Value Formatter
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValueFormatter;

impl JsonValueFormatter {
    /// Append the JSON text of `value` to `output`.
    pub fn format(&self, value: &PropertyValue, output: &mut String) -> Result<()> {
        output.push_str(&serde_json::to_string(value)?);
        Ok(())
    }

    pub fn to_json(&self, value: &PropertyValue) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::StructureValue;
    use chrono::{FixedOffset, TimeZone};
    use proptest::prelude::*;

    fn json(value: &PropertyValue) -> String {
        JsonValueFormatter.to_json(value).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(json(&PropertyValue::null()), "null");
        assert_eq!(json(&"a \"quoted\"\nline".into()), r#""a \"quoted\"\nline""#);
        assert_eq!(json(&42.into()), "42");
        assert_eq!(json(&1.5.into()), "1.5");
        assert_eq!(json(&true.into()), "true");
        assert_eq!(json(&'c'.into()), r#""c""#);
    }

    #[test]
    fn test_non_finite_floats_stay_valid_json() {
        assert_eq!(json(&f64::NAN.into()), r#""NaN""#);
        assert_eq!(json(&f64::NEG_INFINITY.into()), r#""-Infinity""#);
    }

    #[test]
    fn test_datetime_is_quoted_iso8601() {
        let dt = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .unwrap();
        assert_eq!(json(&dt.into()), r#""2024-05-06T07:08:09+00:00""#);
    }

    #[test]
    fn test_sequence() {
        let value = PropertyValue::Sequence(vec![1.into(), "x".into(), PropertyValue::null()]);
        assert_eq!(json(&value), r#"[1,"x",null]"#);
        assert_eq!(json(&PropertyValue::Sequence(vec![])), "[]");
    }

    #[test]
    fn test_dictionary_keeps_duplicate_keys() {
        let value = PropertyValue::Dictionary(vec![
            (ScalarValue::I64(1), "one".into()),
            (ScalarValue::from("1"), "uno".into()),
        ]);
        assert_eq!(json(&value), r#"{"1":"one","1":"uno"}"#);
    }

    #[test]
    fn test_structure_type_tag_appended() {
        let tagged = StructureValue::new(Some("Point")).with_field("X", 1).with_field("Y", 2);
        assert_eq!(json(&tagged.into()), r#"{"X":1,"Y":2,"$type":"Point"}"#);

        let untagged = StructureValue::new(None).with_field("Name", "n");
        assert_eq!(json(&untagged.into()), r#"{"Name":"n"}"#);
    }

    #[test]
    fn test_format_appends_to_output() {
        let mut output = String::from("prefix:");
        JsonValueFormatter.format(&7.into(), &mut output).unwrap();
        assert_eq!(output, "prefix:7");
    }

    fn arb_scalar() -> impl Strategy<Value = ScalarValue> {
        prop_oneof![
            Just(ScalarValue::Null),
            any::<bool>().prop_map(ScalarValue::Bool),
            any::<i64>().prop_map(ScalarValue::I64),
            any::<f64>().prop_map(ScalarValue::F64),
            ".*".prop_map(ScalarValue::String),
        ]
    }

    fn arb_value() -> impl Strategy<Value = PropertyValue> {
        arb_scalar().prop_map(PropertyValue::Scalar).prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(PropertyValue::Sequence),
                prop::collection::vec((arb_scalar(), inner.clone()), 0..4)
                    .prop_map(PropertyValue::Dictionary),
                (
                    prop::option::of("[A-Za-z]{1,8}"),
                    prop::collection::vec(("[A-Za-z]{1,8}", inner), 0..4)
                )
                    .prop_map(|(type_tag, fields)| PropertyValue::Structure(StructureValue {
                        type_tag,
                        fields
                    })),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_every_value_formats_to_valid_json(value in arb_value()) {
            let text = json(&value);
            prop_assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok(), "{}", text);
        }
    }
}
