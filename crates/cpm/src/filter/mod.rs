//! filter tree model
//!
//! A filter is a tree of [FilterNode]s. `comparison` nodes combine their children with `and`/`or`,
//! every other kind is a leaf comparing one property of a resource against a string.
//!
//! Wire shape:
//! ```text
//! { "type": string, "operator"?: string, "key"?: string,
//!   "value"?: string, "not"?: bool,
//!   "conditions"?: [ <same shape>, ... ] }
//! ```
//!
//! [encode] is strict about the typed tree, [decode] is lenient about operators (the server owns
//! them) but strict about structure.
use crate::wire::{self, WireMap, WireValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod identity;
pub use identity::{identity, IDENTITY_LEN};

pub const TYPE: &str = "type";
pub const OPERATOR: &str = "operator";
pub const KEY: &str = "key";
pub const VALUE: &str = "value";
pub const NOT: &str = "not";
pub const CONDITIONS: &str = "conditions";

pub const COMPARISON_OPERATORS: &[&str] = &["and", "or"];
pub const STRING_OPERATORS: &[&str] = &["equals", "contains", "starts-with", "ends-with", "regex"];
pub const DATE_OPERATORS: &[&str] = &["before", "after", "before-or-on", "after-or-on"];

/// Discriminator of a [FilterNode]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Combines children with `and`/`or`
    Comparison,
    Name,
    Kind,
    Identifier,
    /// Compares the metadata entry named by [FilterNode::key]
    Metadata,
    CreatedAt,
    LastSync,
    Selector,
}

impl FilterKind {
    pub const ALL: [FilterKind; 8] = [
        FilterKind::Comparison,
        FilterKind::Name,
        FilterKind::Kind,
        FilterKind::Identifier,
        FilterKind::Metadata,
        FilterKind::CreatedAt,
        FilterKind::LastSync,
        FilterKind::Selector,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::Comparison => "comparison",
            FilterKind::Name => "name",
            FilterKind::Kind => "kind",
            FilterKind::Identifier => "identifier",
            FilterKind::Metadata => "metadata",
            FilterKind::CreatedAt => "created-at",
            FilterKind::LastSync => "last-sync",
            FilterKind::Selector => "selector",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn is_leaf(self) -> bool {
        self != FilterKind::Comparison
    }

    /// Operators accepted for this kind
    pub fn operators(self) -> &'static [&'static str] {
        match self {
            FilterKind::Comparison => COMPARISON_OPERATORS,
            FilterKind::CreatedAt | FilterKind::LastSync => DATE_OPERATORS,
            FilterKind::Name
            | FilterKind::Kind
            | FilterKind::Identifier
            | FilterKind::Metadata
            | FilterKind::Selector => STRING_OPERATORS,
        }
    }

    /// A selector leaf refers to a named selector and may omit the operator
    fn requires_operator(self) -> bool {
        self != FilterKind::Selector
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the predicate tree
///
/// `children` is only meaningful for [FilterKind::Comparison]. It is a plain [Vec] so "is a
/// comparison" and "has a children slot" are the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterNode {
    pub kind: FilterKind,
    pub operator: String,
    /// Metadata key, only used by [FilterKind::Metadata]
    pub key: String,
    pub value: String,
    pub negate: bool,
    pub children: Vec<FilterNode>,
}

impl FilterNode {
    /// An empty node of the given kind
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            operator: String::new(),
            key: String::new(),
            value: String::new(),
            negate: false,
            children: Vec::new(),
        }
    }

    pub fn comparison(operator: impl Into<String>, children: Vec<FilterNode>) -> Self {
        Self {
            operator: operator.into(),
            children,
            ..Self::new(FilterKind::Comparison)
        }
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        Self::comparison("and", children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        Self::comparison("or", children)
    }

    pub fn leaf(kind: FilterKind, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            value: value.into(),
            ..Self::new(kind)
        }
    }

    pub fn metadata(
        key: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            ..Self::leaf(FilterKind::Metadata, operator, value)
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// Force `value = ""` on every comparison that has children
    ///
    /// Recursive and idempotent.
    pub fn normalize(&mut self) {
        if self.kind == FilterKind::Comparison && !self.children.is_empty() {
            self.value.clear();
        }

        for child in &mut self.children {
            child.normalize();
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn identity(&self) -> String {
        identity(self)
    }

    /// Checks this node (not its children) for consistency
    fn check(&self) -> Result<(), Malformation> {
        if !self.kind.is_leaf() {
            if !self.key.is_empty() {
                return Err(Malformation::UnexpectedKey { kind: self.kind });
            }
            if !COMPARISON_OPERATORS.contains(&self.operator.as_str()) {
                return Err(Malformation::InvalidComparisonOperator(
                    self.operator.clone(),
                ));
            }
            return Ok(());
        }

        if !self.children.is_empty() {
            return Err(Malformation::LeafWithChildren { kind: self.kind });
        }

        if self.operator.is_empty() {
            if self.kind.requires_operator() {
                return Err(Malformation::MissingOperator { kind: self.kind });
            }
        } else if !self.kind.operators().contains(&self.operator.as_str()) {
            return Err(Malformation::InvalidOperator {
                kind: self.kind,
                operator: self.operator.clone(),
            });
        }

        if self.kind != FilterKind::Metadata && !self.key.is_empty() {
            return Err(Malformation::UnexpectedKey { kind: self.kind });
        }

        Ok(())
    }
}

/// Encode a typed tree into its wire map
///
/// The output is normalized regardless of the input.
pub fn encode(node: &FilterNode) -> Result<WireMap, MalformedFilterError> {
    let mut path = Vec::new();
    encode_at(node, &mut path)
}

fn encode_at(node: &FilterNode, path: &mut Vec<usize>) -> Result<WireMap, MalformedFilterError> {
    if let Err(reason) = node.check() {
        return Err(MalformedFilterError::at(path, reason));
    }

    let mut wire = WireMap::new();
    wire.insert(TYPE.into(), node.kind.as_str().into());

    if !node.operator.is_empty() {
        wire.insert(OPERATOR.into(), node.operator.as_str().into());
    }

    if node.kind == FilterKind::Metadata {
        wire.insert(KEY.into(), node.key.as_str().into());
    }

    match node.kind {
        FilterKind::Comparison if !node.children.is_empty() => {
            wire.insert(VALUE.into(), "".into());
        }
        FilterKind::Comparison if node.value.is_empty() => {}
        _ => {
            wire.insert(VALUE.into(), node.value.as_str().into());
        }
    }

    if node.negate {
        wire.insert(NOT.into(), true.into());
    }

    if node.kind == FilterKind::Comparison {
        let mut conditions = Vec::with_capacity(node.children.len());
        for (index, child) in node.children.iter().enumerate() {
            path.push(index);
            conditions.push(WireValue::Object(encode_at(child, path)?));
            path.pop();
        }
        wire.insert(CONDITIONS.into(), WireValue::Array(conditions));
    }

    tracing::trace!(path = %format_path(path), kind = %node.kind, "encoded filter node");
    Ok(wire)
}

/// Decode a wire map into a normalized typed tree
pub fn decode(wire: &WireMap) -> Result<FilterNode, MalformedFilterError> {
    let mut path = Vec::new();
    let mut node = decode_at(wire, &mut path)?;
    node.normalize();
    Ok(node)
}

fn decode_at(wire: &WireMap, path: &mut Vec<usize>) -> Result<FilterNode, MalformedFilterError> {
    let kind = match wire.get(TYPE) {
        None | Some(WireValue::Null) => {
            return Err(MalformedFilterError::at(path, Malformation::MissingType))
        }
        Some(WireValue::String(kind)) => match FilterKind::from_wire(kind) {
            Some(kind) => kind,
            None => {
                return Err(MalformedFilterError::at(
                    path,
                    Malformation::UnknownType(kind.clone()),
                ))
            }
        },
        Some(other) => {
            return Err(MalformedFilterError::at(
                path,
                Malformation::wrong_type(TYPE, "string", other),
            ))
        }
    };

    let operator = string_field(wire, OPERATOR, path)?;
    let value = string_field(wire, VALUE, path)?;
    let key = match kind {
        FilterKind::Metadata => string_field(wire, KEY, path)?,
        _ => String::new(),
    };

    let negate = match wire.get(NOT) {
        None | Some(WireValue::Null) => false,
        Some(WireValue::Bool(negate)) => *negate,
        Some(other) => {
            return Err(MalformedFilterError::at(
                path,
                Malformation::wrong_type(NOT, "boolean", other),
            ))
        }
    };

    let children = match (kind, wire.get(CONDITIONS)) {
        (_, None) | (_, Some(WireValue::Null)) => Vec::new(),
        (FilterKind::Comparison, Some(WireValue::Array(conditions))) => {
            let mut children = Vec::with_capacity(conditions.len());
            for (index, condition) in conditions.iter().enumerate() {
                path.push(index);
                let WireValue::Object(condition) = condition else {
                    return Err(MalformedFilterError::at(
                        path,
                        Malformation::NotAMap {
                            found: wire::type_name(condition),
                        },
                    ));
                };
                children.push(decode_at(condition, path)?);
                path.pop();
            }
            children
        }
        (FilterKind::Comparison, Some(other)) => {
            return Err(MalformedFilterError::at(
                path,
                Malformation::wrong_type(CONDITIONS, "array", other),
            ))
        }
        (kind, Some(_)) => {
            tracing::warn!(path = %format_path(path), %kind, "ignoring conditions on leaf filter");
            Vec::new()
        }
    };

    Ok(FilterNode {
        kind,
        operator,
        key,
        value,
        negate,
        children,
    })
}

/// Optional string field, absent and `null` read as ""
fn string_field(
    wire: &WireMap,
    field: &'static str,
    path: &[usize],
) -> Result<String, MalformedFilterError> {
    match wire.get(field) {
        None | Some(WireValue::Null) => Ok(String::new()),
        Some(WireValue::String(value)) => Ok(value.clone()),
        Some(other) => Err(MalformedFilterError::at(
            path,
            Malformation::wrong_type(field, "string", other),
        )),
    }
}

/// `$`, `$.conditions[1]`, `$.conditions[1].conditions[0]`, ...
fn format_path(path: &[usize]) -> String {
    let mut formatted = String::from("$");
    for index in path {
        formatted.push_str(&format!(".{CONDITIONS}[{index}]"));
    }
    formatted
}

impl Serialize for FilterNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        encode(self)
            .map_err(<S::Error as serde::ser::Error>::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = WireMap::deserialize(deserializer)?;
        decode(&wire).map_err(serde::de::Error::custom)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed filter at {path}: {reason}")]
pub struct MalformedFilterError {
    /// Location of the offending node, e.g. `$.conditions[1]`
    pub path: String,
    pub reason: Malformation,
}

impl MalformedFilterError {
    fn at(path: &[usize], reason: Malformation) -> Self {
        Self {
            path: format_path(path),
            reason,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Malformation {
    #[error("missing `type`")]
    MissingType,
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("`{field}` must be a {expected}, found {found}")]
    WrongFieldType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("condition must be a map, found {found}")]
    NotAMap { found: &'static str },
    #[error("comparison operator must be `and` or `or`, found `{0}`")]
    InvalidComparisonOperator(String),
    #[error("`{kind}` condition requires an operator")]
    MissingOperator { kind: FilterKind },
    #[error("operator `{operator}` is not valid for `{kind}` conditions")]
    InvalidOperator { kind: FilterKind, operator: String },
    #[error("`{kind}` condition can not have a key")]
    UnexpectedKey { kind: FilterKind },
    #[error("`{kind}` condition can not have nested conditions")]
    LeafWithChildren { kind: FilterKind },
}

impl Malformation {
    fn wrong_type(field: &'static str, expected: &'static str, found: &WireValue) -> Self {
        Malformation::WrongFieldType {
            field,
            expected,
            found: wire::type_name(found),
        }
    }
}
