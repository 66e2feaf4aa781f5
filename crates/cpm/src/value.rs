//! tagged value representation
//!
//! Variable defaults and overrides are either a literal or a reference.
//!
//! A literal is one of
//! - null
//! - boolean (true/false)
//! - integer (signed, i64)
//! - float (f64)
//! - string (utf-8)
//! - object (order-preserving "map", string keys, literal values)
//!
//! A reference points at a field (`path`) of another entity (`reference`).
//!
//! Additionally:
//! - there are no arrays, at any depth. They are rejected, never dropped or stringified.
//! - a float without fractional part is an integer, in both directions
//! - only the top level value can be a reference
//!
use crate::wire::{self, WireValue};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const REFERENCE: &str = "reference";
const PATH: &str = "path";

/// Either an inline literal or a reference to another entity's field
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedValue {
    Literal(Literal),
    Reference(Reference),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Object(IndexMap<String, Literal>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub reference: String,
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(
        reference: impl Into<String>,
        path: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            reference: reference.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// `{ "reference": string, "path": [string, ...] }` and nothing else
    fn from_dynamic(raw: &WireValue) -> Option<Self> {
        let WireValue::Object(object) = raw else {
            return None;
        };

        if object.len() != 2 {
            return None;
        }

        let WireValue::String(reference) = object.get(REFERENCE)? else {
            return None;
        };

        let WireValue::Array(path) = object.get(PATH)? else {
            return None;
        };

        let path = path
            .iter()
            .map(|segment| segment.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?;

        Some(Self {
            reference: reference.clone(),
            path,
        })
    }

    fn to_dynamic(&self) -> WireValue {
        let mut object = wire::WireMap::new();
        object.insert(REFERENCE.into(), self.reference.as_str().into());
        object.insert(
            PATH.into(),
            WireValue::Array(self.path.iter().map(|s| s.as_str().into()).collect()),
        );
        WireValue::Object(object)
    }
}

impl TaggedValue {
    /// Inspect a dynamically typed value
    pub fn from_dynamic(raw: &WireValue) -> Result<Self, UnsupportedValueTypeError> {
        if let Some(reference) = Reference::from_dynamic(raw) {
            return Ok(TaggedValue::Reference(reference));
        }

        Literal::from_dynamic(raw).map(TaggedValue::Literal)
    }

    pub fn to_dynamic(&self) -> WireValue {
        match self {
            TaggedValue::Literal(literal) => literal.to_dynamic(),
            TaggedValue::Reference(reference) => reference.to_dynamic(),
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            TaggedValue::Reference(reference) => Some(reference),
            TaggedValue::Literal(_) => None,
        }
    }
}

impl Literal {
    pub fn from_dynamic(raw: &WireValue) -> Result<Self, UnsupportedValueTypeError> {
        let mut path = Vec::new();
        Self::from_dynamic_at(raw, &mut path)
    }

    fn from_dynamic_at(
        raw: &WireValue,
        path: &mut Vec<String>,
    ) -> Result<Self, UnsupportedValueTypeError> {
        let literal = match raw {
            WireValue::Null => Literal::Null,
            WireValue::Bool(value) => Literal::Boolean(*value),
            WireValue::String(value) => Literal::String(value.clone()),
            WireValue::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Literal::Integer(int)
                } else if number.is_u64() {
                    return Err(UnsupportedValueTypeError::at(path, "u64"));
                } else {
                    match number.as_f64() {
                        Some(float) => float.into(),
                        None => return Err(UnsupportedValueTypeError::at(path, "number")),
                    }
                }
            }
            WireValue::Object(object) => {
                let mut members = IndexMap::with_capacity(object.len());
                for (key, value) in object {
                    path.push(key.clone());
                    members.insert(key.clone(), Self::from_dynamic_at(value, path)?);
                    path.pop();
                }
                Literal::Object(members)
            }
            WireValue::Array(_) => {
                return Err(UnsupportedValueTypeError::at(path, wire::type_name(raw)))
            }
        };

        Ok(literal)
    }

    pub fn to_dynamic(&self) -> WireValue {
        match self {
            Literal::Null => WireValue::Null,
            Literal::Boolean(value) => (*value).into(),
            Literal::Integer(value) => (*value).into(),
            // non-finite floats become null
            Literal::Float(value) => (*value).into(),
            Literal::String(value) => value.as_str().into(),
            Literal::Object(members) => WireValue::Object(
                members
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_dynamic()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

/// Whole numbers within i64 range collapse to [Literal::Integer]
impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        // i64::MAX is not representable, 2^63 is the exclusive upper bound
        const BOUND: f64 = 9_223_372_036_854_775_808.0;

        if value.fract() == 0.0 && (-BOUND..BOUND).contains(&value) {
            return Literal::Integer(value as i64);
        }

        Literal::Float(value)
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl<K: ToString, V: Into<Literal>> From<IndexMap<K, V>> for Literal {
    fn from(value: IndexMap<K, V>) -> Self {
        Literal::Object(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect(),
        )
    }
}

impl From<Literal> for TaggedValue {
    fn from(value: Literal) -> Self {
        TaggedValue::Literal(value)
    }
}

impl From<Reference> for TaggedValue {
    fn from(value: Reference) -> Self {
        TaggedValue::Reference(value)
    }
}

impl Serialize for TaggedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_dynamic().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaggedValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = WireValue::deserialize(deserializer)?;
        TaggedValue::from_dynamic(&raw).map_err(serde::de::Error::custom)
    }
}

/// Two-slot state shape used by resource handlers
///
/// Exactly one slot must be set. A `null` literal is a set slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueState {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub literal: Option<WireValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

/// Present fields are `Some`, even when `null`
fn present<'de, D>(deserializer: D) -> Result<Option<WireValue>, D::Error>
where
    D: Deserializer<'de>,
{
    WireValue::deserialize(deserializer).map(Some)
}

impl TryFrom<ValueState> for TaggedValue {
    type Error = ValueError;

    fn try_from(state: ValueState) -> Result<Self, Self::Error> {
        match (state.literal, state.reference) {
            (Some(_), Some(_)) => Err(InconsistentUnionError::Both.into()),
            (None, None) => Err(InconsistentUnionError::Neither.into()),
            (None, Some(reference)) => Ok(TaggedValue::Reference(reference)),
            (Some(raw), None) => Ok(TaggedValue::Literal(Literal::from_dynamic(&raw)?)),
        }
    }
}

impl From<&TaggedValue> for ValueState {
    fn from(value: &TaggedValue) -> Self {
        match value {
            TaggedValue::Literal(literal) => ValueState {
                literal: Some(literal.to_dynamic()),
                reference: None,
            },
            TaggedValue::Reference(reference) => ValueState {
                literal: None,
                reference: Some(reference.clone()),
            },
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported value type `{type_name}` at {path}")]
pub struct UnsupportedValueTypeError {
    /// Location of the offending member, e.g. `$.settings.hosts`
    pub path: String,
    pub type_name: &'static str,
}

impl UnsupportedValueTypeError {
    fn at(path: &[String], type_name: &'static str) -> Self {
        let mut formatted = String::from("$");
        for key in path {
            formatted.push('.');
            formatted.push_str(key);
        }

        Self {
            path: formatted,
            type_name,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistentUnionError {
    #[error("value has both a literal and a reference")]
    Both,
    #[error("value has neither a literal nor a reference")]
    Neither,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedValueTypeError),
    #[error(transparent)]
    InconsistentUnion(#[from] InconsistentUnionError),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn round_trip(raw: WireValue) -> WireValue {
        TaggedValue::from_dynamic(&raw).unwrap().to_dynamic()
    }

    #[test]
    fn literal_round_trips() {
        for raw in [
            json!(true),
            json!("staging"),
            json!(42),
            json!(3.14),
            json!({"a": "x", "b": 1}),
            json!(null),
            json!({"outer": {"inner": false, "n": -7}}),
        ] {
            assert_eq!(round_trip(raw.clone()), raw);
        }
    }

    #[test]
    fn whole_floats_collapse_to_integers() {
        assert_eq!(
            TaggedValue::from_dynamic(&json!(3.0)).unwrap(),
            TaggedValue::Literal(Literal::Integer(3))
        );
        assert_eq!(round_trip(json!(3.0)), json!(3));
        assert!(round_trip(json!(3.0)).is_i64());

        assert_eq!(round_trip(json!({"ratio": 2.0})), json!({"ratio": 2}));
        assert_eq!(Literal::from(3.14), Literal::Float(3.14));
        assert_eq!(Literal::from(1e300), Literal::Float(1e300));
    }

    #[test]
    fn arrays_are_rejected() {
        let err = TaggedValue::from_dynamic(&json!(["a", "b"])).unwrap_err();
        assert_eq!(
            err,
            UnsupportedValueTypeError {
                path: "$".into(),
                type_name: "array"
            }
        );

        let err = TaggedValue::from_dynamic(&json!({"settings": {"hosts": ["a"]}})).unwrap_err();
        assert_eq!(err.path, "$.settings.hosts");
        assert_eq!(err.type_name, "array");
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        let err = TaggedValue::from_dynamic(&json!(u64::MAX)).unwrap_err();
        assert_eq!(err.type_name, "u64");
    }

    #[test]
    fn references() {
        let raw = json!({"reference": "cluster", "path": ["metadata", "region"]});
        let value = TaggedValue::from_dynamic(&raw).unwrap();

        assert_eq!(
            value.as_reference(),
            Some(&Reference::new("cluster", ["metadata", "region"]))
        );
        assert_eq!(value.to_dynamic(), raw);

        // not exactly the reference shape: an object literal containing an array
        let err =
            TaggedValue::from_dynamic(&json!({"reference": "cluster", "path": [1]})).unwrap_err();
        assert_eq!(err.path, "$.path");

        let value = TaggedValue::from_dynamic(&json!({"reference": "cluster"})).unwrap();
        assert!(value.as_reference().is_none());
    }

    #[test]
    fn value_state() {
        let state: ValueState = serde_json::from_value(json!({"literal": null})).unwrap();
        assert_eq!(
            TaggedValue::try_from(state).unwrap(),
            TaggedValue::Literal(Literal::Null)
        );

        let state: ValueState = serde_json::from_value(json!({
            "reference": {"reference": "cluster", "path": ["name"]}
        }))
        .unwrap();
        let value = TaggedValue::try_from(state.clone()).unwrap();
        assert_eq!(ValueState::from(&value), state);

        let both = ValueState {
            literal: Some(json!(1)),
            reference: Some(Reference::new("cluster", ["name"])),
        };
        assert_eq!(
            TaggedValue::try_from(both),
            Err(ValueError::InconsistentUnion(InconsistentUnionError::Both))
        );
        assert_eq!(
            TaggedValue::try_from(ValueState::default()),
            Err(ValueError::InconsistentUnion(InconsistentUnionError::Neither))
        );

        let list = ValueState {
            literal: Some(json!(["a"])),
            reference: None,
        };
        assert!(matches!(
            TaggedValue::try_from(list),
            Err(ValueError::UnsupportedType(_))
        ));
    }

    #[test]
    fn serde_goes_through_dynamic_form() {
        let value: TaggedValue = serde_json::from_str(r#"{"replicas": 3, "zone": "a"}"#).unwrap();
        assert_eq!(
            value,
            TaggedValue::from(Literal::from(IndexMap::from([
                ("replicas", Literal::from(3i64)),
                ("zone", Literal::from("a")),
            ])))
        );
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"replicas":3,"zone":"a"}"#
        );

        assert!(serde_json::from_str::<TaggedValue>("[1]").is_err());
    }

    fn scalar_strategy() -> impl Strategy<Value = WireValue> {
        prop_oneof![
            Just(WireValue::Null),
            any::<bool>().prop_map(WireValue::from),
            any::<i64>().prop_map(WireValue::from),
            "[a-z ]{0,8}".prop_map(WireValue::from),
            (-1.0e6..1.0e6f64)
                .prop_filter("fractional", |f| f.fract() != 0.0)
                .prop_map(WireValue::from),
        ]
    }

    fn literal_strategy() -> impl Strategy<Value = WireValue> {
        scalar_strategy().prop_recursive(3, 16, 4, |inner| {
            prop::collection::vec(("[a-z]{1,4}", inner), 0..4).prop_map(|members| {
                WireValue::Object(members.into_iter().collect())
            })
        })
    }

    proptest! {
        #[test]
        fn prop_literal_round_trip(raw in literal_strategy()) {
            let value = TaggedValue::from_dynamic(&raw).expect("literals are supported");
            prop_assert_eq!(value.to_dynamic(), raw);
        }
    }
}
