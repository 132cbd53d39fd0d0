//! Type inference engine.
//!
//! Classifies single values into a [`TypeTag`] and merges the tags observed
//! for one field across a sample.
//!
//! Widening order (a flat lattice):
//!
//! ```text
//!                    mixed
//!   boolean  number  date  string  array  object  unknown
//!                    null
//! ```
//!
//! `null` merges into anything, equal tags merge to themselves, and any two
//! distinct concrete tags merge to `mixed`. The result never depends on the
//! order of the input.

use common::models::TypeTag;
use mongodb::bson::Bson;
use serde_json::Value;

/// Classifies a JSON value.
pub fn infer_type(value: &Value) -> TypeTag {
    match value {
        Value::Null => TypeTag::Null,
        Value::Bool(_) => TypeTag::Boolean,
        Value::Number(_) => TypeTag::Number,
        Value::String(_) => TypeTag::String,
        Value::Array(_) => TypeTag::Array,
        Value::Object(_) => TypeTag::Object,
    }
}

/// Classifies a BSON value.
pub fn infer_bson_type(value: &Bson) -> TypeTag {
    match value {
        Bson::Null | Bson::Undefined => TypeTag::Null,
        Bson::Boolean(_) => TypeTag::Boolean,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => TypeTag::Number,
        Bson::DateTime(_) | Bson::Timestamp(_) => TypeTag::Date,
        Bson::String(_) | Bson::ObjectId(_) | Bson::Decimal128(_) | Bson::Symbol(_) => {
            TypeTag::String
        }
        Bson::Array(_) => TypeTag::Array,
        Bson::Document(_) => TypeTag::Object,
        _ => TypeTag::Unknown,
    }
}

/// Joins two tags in the widening lattice.
pub fn widen(a: TypeTag, b: TypeTag) -> TypeTag {
    match (a, b) {
        (x, y) if x == y => x,
        (TypeTag::Null, other) | (other, TypeTag::Null) => other,
        _ => TypeTag::Mixed,
    }
}

/// Merges all tags observed for one field. Empty input yields `null`.
pub fn merge_types<'a, I>(tags: I) -> TypeTag
where
    I: IntoIterator<Item = &'a TypeTag>,
{
    tags.into_iter().fold(TypeTag::Null, |acc, tag| widen(acc, *tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime};
    use serde_json::json;

    #[test]
    fn test_infer_json_types() {
        assert_eq!(infer_type(&json!(null)), TypeTag::Null);
        assert_eq!(infer_type(&json!(true)), TypeTag::Boolean);
        assert_eq!(infer_type(&json!(1.5)), TypeTag::Number);
        assert_eq!(infer_type(&json!("2024-01-01")), TypeTag::String);
        assert_eq!(infer_type(&json!([1])), TypeTag::Array);
        assert_eq!(infer_type(&json!({"a": 1})), TypeTag::Object);
    }

    #[test]
    fn test_infer_bson_types() {
        assert_eq!(infer_bson_type(&Bson::DateTime(DateTime::now())), TypeTag::Date);
        assert_eq!(infer_bson_type(&Bson::ObjectId(ObjectId::new())), TypeTag::String);
        assert_eq!(infer_bson_type(&Bson::Int64(3)), TypeTag::Number);
        assert_eq!(infer_bson_type(&Bson::Document(doc! {"a": 1})), TypeTag::Object);
        assert_eq!(infer_bson_type(&Bson::MaxKey), TypeTag::Unknown);
    }

    #[test]
    fn test_merge_agreeing_tags() {
        let tags = [TypeTag::Number, TypeTag::Number, TypeTag::Number];
        assert_eq!(merge_types(&tags), TypeTag::Number);
    }

    #[test]
    fn test_merge_disagreeing_tags_is_order_independent() {
        assert_eq!(merge_types(&[TypeTag::Number, TypeTag::String]), TypeTag::Mixed);
        assert_eq!(merge_types(&[TypeTag::String, TypeTag::Number]), TypeTag::Mixed);
        assert_eq!(
            merge_types(&[TypeTag::Mixed, TypeTag::Null, TypeTag::Boolean]),
            TypeTag::Mixed
        );
    }

    #[test]
    fn test_null_is_identity() {
        assert_eq!(merge_types(&[TypeTag::Null, TypeTag::Date]), TypeTag::Date);
        assert_eq!(merge_types(&[TypeTag::Null]), TypeTag::Null);
        assert_eq!(merge_types(&[]), TypeTag::Null);
    }
}
