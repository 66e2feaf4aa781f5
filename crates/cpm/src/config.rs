//! Typed configuration built from [HclDocuments]
//!
//! Root blocks:
//! - `filter "<name>" { ... }`: a filter tree, nested through `condition { ... }` blocks. Every
//!   filter is validated and registered in a [FilterRegistry] under its identity.
//! - `variable "<name>" { default = ... }`: a [TaggedValue]
//! - `target "<name>" { filter_id = ... }`: selects resources through a registered filter.
//!   `filter.<name>.id` evaluates to the identity of a declared filter.
use crate::filter::{self, FilterKind, FilterNode, MalformedFilterError};
use crate::hcl_documents::HclDocuments;
use crate::registry::{FilterNotFoundError, FilterRegistry};
use crate::value::{TaggedValue, UnsupportedValueTypeError};
use crate::wire::{WireMap, WireValue};
use hcl::eval::{Context, Evaluate};
use hcl_edit::structure::{Attribute, Body, Structure};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Deepest `condition` nesting accepted inside a `filter` block
///
/// Only the configuration side is limited, wire filters may nest arbitrarily.
pub const MAX_CONDITION_DEPTH: usize = 10;

/// Multiple HCL Documents containing valid cpm blocks
#[derive(Debug)]
pub struct ConfigDocument {
    filters: IndexMap<String, DeclaredFilter>,
    variables: IndexMap<String, Variable>,
    targets: IndexMap<String, Target>,
}

#[derive(Debug)]
pub struct DeclaredFilter {
    pub block_index: usize,
    pub identity: String,
    pub node: FilterNode,
}

#[derive(Debug)]
pub struct Variable {
    pub block_index: usize,
    /// `None` when the block has no `default`
    pub default: Option<TaggedValue>,
}

#[derive(Debug)]
pub struct Target {
    pub block_index: usize,
    pub filter_id: String,
    pub filter: FilterNode,
}

impl ConfigDocument {
    pub fn new(
        hcl_documents: &HclDocuments,
        registry: &FilterRegistry,
    ) -> Result<Self, ConfigErrors> {
        let mut document = Self {
            filters: Default::default(),
            variables: Default::default(),
            targets: Default::default(),
        };

        let mut e = ConfigErrors::new();
        let mut declared: HashMap<(&str, String), usize> = Default::default();
        let mut target_blocks = vec![];

        for (index, _source, _attribute) in hcl_documents.attributes() {
            e.log(Issue::RootAttribute(index))
        }

        for (index, _source, block) in hcl_documents.blocks() {
            let ident = block.ident.value().as_str();
            if !matches!(ident, "filter" | "variable" | "target") {
                e.log(Issue::UnknownBlockType(index));
                continue;
            }

            let name = match block.labels.as_slice() {
                [] => {
                    e.log(Issue::LabelMissing(index));
                    continue;
                }
                [label] => label.as_str().to_string(),
                _ => {
                    e.log(Issue::TooManyLabels(index));
                    continue;
                }
            };

            if let Some(existing) = declared.get(&(ident, name.clone())) {
                e.log(Issue::LabelCollision {
                    existing: *existing,
                    new: index,
                });
                continue;
            }
            declared.insert((ident, name.clone()), index);

            match ident {
                "filter" => match filter_from_body(&block.body, index, 0) {
                    Ok(node) => {
                        if let Err(error) = filter::encode(&node) {
                            e.log(Issue::MalformedFilter {
                                block: index,
                                error,
                            });
                            continue;
                        }

                        let identity = registry.register_filter(node.clone());
                        tracing::debug!(%name, %identity, "filter declared");
                        document.filters.insert(
                            name,
                            DeclaredFilter {
                                block_index: index,
                                identity,
                                node,
                            },
                        );
                    }
                    Err(issue) => e.log(issue),
                },
                "variable" => match variable_from_body(&block.body, index) {
                    Ok(default) => {
                        document.variables.insert(
                            name,
                            Variable {
                                block_index: index,
                                default,
                            },
                        );
                    }
                    Err(issue) => e.log(issue),
                },
                _ => target_blocks.push((index, name, &block.body)),
            }
        }

        // targets see the identities of all declared filters
        let mut context = Context::new();
        context.declare_var(
            hcl::Identifier::unchecked("filter"),
            hcl::Value::Object(
                document
                    .filters
                    .iter()
                    .map(|(name, declared)| {
                        let mut attributes = hcl::value::Map::new();
                        attributes.insert("id".to_string(), declared.identity.clone().into());
                        (name.clone(), hcl::Value::Object(attributes))
                    })
                    .collect(),
            ),
        );

        for (index, name, body) in target_blocks {
            let filter_id = match filter_id_from_body(body, index, &context) {
                Ok(filter_id) => filter_id,
                Err(issue) => {
                    e.log(issue);
                    continue;
                }
            };

            match registry.resolve(&filter_id) {
                Ok(filter) => {
                    document.targets.insert(
                        name,
                        Target {
                            block_index: index,
                            filter_id,
                            filter,
                        },
                    );
                }
                Err(error) => e.log(Issue::UnresolvedFilter {
                    block: index,
                    error,
                }),
            }
        }

        if !e.issues.is_empty() {
            return Err(e);
        }

        Ok(document)
    }

    pub fn filters(&self) -> &IndexMap<String, DeclaredFilter> {
        &self.filters
    }

    pub fn variables(&self) -> &IndexMap<String, Variable> {
        &self.variables
    }

    pub fn targets(&self) -> &IndexMap<String, Target> {
        &self.targets
    }

    /// The wire payload handed to the API client
    ///
    /// `{ "filters": {...}, "variables": {...}, "targets": {...} }`, variables without default
    /// render as `null`.
    pub fn render(&self) -> Result<WireMap, MalformedFilterError> {
        let mut filters = WireMap::new();
        for (name, declared) in &self.filters {
            filters.insert(name.clone(), filter::encode(&declared.node)?.into());
        }

        let variables = self
            .variables
            .iter()
            .map(|(name, variable)| {
                let value = variable
                    .default
                    .as_ref()
                    .map(TaggedValue::to_dynamic)
                    .unwrap_or(WireValue::Null);
                (name.clone(), value)
            })
            .collect::<WireMap>();

        let mut targets = WireMap::new();
        for (name, target) in &self.targets {
            targets.insert(name.clone(), filter::encode(&target.filter)?.into());
        }

        let mut rendered = WireMap::new();
        rendered.insert("filters".into(), filters.into());
        rendered.insert("variables".into(), variables.into());
        rendered.insert("targets".into(), targets.into());
        Ok(rendered)
    }
}

fn filter_from_body(body: &Body, block: usize, depth: usize) -> Result<FilterNode, Issue> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(Issue::TooDeep { block });
    }

    let context = Context::new();
    let mut kind = None;
    let mut node = FilterNode::new(FilterKind::Comparison);

    for structure in body.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                let key = attribute.key.value().as_str();
                let value = evaluate(attribute, block, &context)?;
                match key {
                    "type" => {
                        let type_name = expect_string(value, block, key)?;
                        match FilterKind::from_wire(&type_name) {
                            Some(found) => kind = Some(found),
                            None => {
                                return Err(Issue::UnknownFilterType {
                                    block,
                                    type_name,
                                })
                            }
                        }
                    }
                    "operator" => node.operator = expect_string(value, block, key)?,
                    "key" => node.key = expect_string(value, block, key)?,
                    "value" => node.value = expect_string(value, block, key)?,
                    "not" => node.negate = expect_bool(value, block, key)?,
                    _ => {
                        return Err(Issue::UnknownAttribute {
                            block,
                            attribute: key.to_string(),
                        })
                    }
                }
            }
            Structure::Block(nested) => {
                let ident = nested.ident.value().as_str();
                if ident != "condition" {
                    return Err(Issue::UnexpectedBlock {
                        block,
                        ident: ident.to_string(),
                    });
                }

                node.children
                    .push(filter_from_body(&nested.body, block, depth + 1)?);
            }
        }
    }

    node.kind = kind.ok_or(Issue::MissingAttribute {
        block,
        attribute: "type",
    })?;
    node.normalize();

    tracing::trace!(block, depth, kind = %node.kind, "filter node parsed");
    Ok(node)
}

fn variable_from_body(body: &Body, block: usize) -> Result<Option<TaggedValue>, Issue> {
    let context = Context::new();
    let mut default = None;

    for structure in body.iter() {
        match structure {
            Structure::Attribute(attribute) => match attribute.key.value().as_str() {
                "default" => {
                    let raw = hcl_to_dynamic(evaluate(attribute, block, &context)?);
                    let value = TaggedValue::from_dynamic(&raw)
                        .map_err(|error| Issue::UnsupportedValue { block, error })?;
                    default = Some(value);
                }
                "description" => {}
                key => {
                    return Err(Issue::UnknownAttribute {
                        block,
                        attribute: key.to_string(),
                    })
                }
            },
            Structure::Block(nested) => {
                return Err(Issue::UnexpectedBlock {
                    block,
                    ident: nested.ident.value().as_str().to_string(),
                })
            }
        }
    }

    Ok(default)
}

fn filter_id_from_body(body: &Body, block: usize, context: &Context) -> Result<String, Issue> {
    let mut filter_id = None;

    for structure in body.iter() {
        match structure {
            Structure::Attribute(attribute) => match attribute.key.value().as_str() {
                "filter_id" => {
                    let value = evaluate(attribute, block, context)?;
                    filter_id = Some(expect_string(value, block, "filter_id")?);
                }
                key => {
                    return Err(Issue::UnknownAttribute {
                        block,
                        attribute: key.to_string(),
                    })
                }
            },
            Structure::Block(nested) => {
                return Err(Issue::UnexpectedBlock {
                    block,
                    ident: nested.ident.value().as_str().to_string(),
                })
            }
        }
    }

    filter_id.ok_or(Issue::MissingAttribute {
        block,
        attribute: "filter_id",
    })
}

fn evaluate(attribute: &Attribute, block: usize, context: &Context) -> Result<hcl::Value, Issue> {
    let expression: hcl::Expression = attribute.value.clone().into();
    expression
        .evaluate(context)
        .map_err(|errors| Issue::Evaluation {
            block,
            attribute: attribute.key.value().as_str().to_string(),
            message: errors.to_string(),
        })
}

fn expect_string(value: hcl::Value, block: usize, attribute: &str) -> Result<String, Issue> {
    match value {
        hcl::Value::String(value) => Ok(value),
        _ => Err(Issue::InvalidAttributeType {
            block,
            attribute: attribute.to_string(),
            expected: "string",
        }),
    }
}

fn expect_bool(value: hcl::Value, block: usize, attribute: &str) -> Result<bool, Issue> {
    match value {
        hcl::Value::Bool(value) => Ok(value),
        _ => Err(Issue::InvalidAttributeType {
            block,
            attribute: attribute.to_string(),
            expected: "bool",
        }),
    }
}

/// Evaluated HCL into the dynamic wire form
pub fn hcl_to_dynamic(value: hcl::Value) -> WireValue {
    match value {
        hcl::Value::Null => WireValue::Null,
        hcl::Value::Bool(value) => value.into(),
        hcl::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                int.into()
            } else if let Some(uint) = number.as_u64() {
                uint.into()
            } else {
                number.as_f64().map(WireValue::from).unwrap_or(WireValue::Null)
            }
        }
        hcl::Value::String(value) => value.into(),
        hcl::Value::Array(values) => values.into_iter().map(hcl_to_dynamic).collect(),
        hcl::Value::Object(object) => WireValue::Object(
            object
                .into_iter()
                .map(|(key, value)| (key, hcl_to_dynamic(value)))
                .collect(),
        ),
    }
}

#[derive(derive_new::new, Debug)]
pub struct ConfigErrors {
    #[new(default)]
    issues: Vec<Issue>,
}

impl ConfigErrors {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl std::error::Error for ConfigErrors {}

impl std::fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} configuration issue(s)", self.issues.len())?;
        for issue in &self.issues {
            write!(f, "\n- {issue}")?;
        }
        Ok(())
    }
}

/// Problems found while interpreting configuration
///
/// `usize` values are block indices as assigned by [HclDocuments].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Issue {
    #[error("attribute #{0}: attributes are not allowed at the root")]
    RootAttribute(usize),
    #[error("block #{0}: unknown block type, expected `filter`, `variable` or `target`")]
    UnknownBlockType(usize),
    #[error("block #{0}: missing name label")]
    LabelMissing(usize),
    #[error("block #{0}: expected exactly one label")]
    TooManyLabels(usize),
    #[error("block #{new}: name already used by block #{existing}")]
    LabelCollision { existing: usize, new: usize },
    #[error("block #{block}: missing attribute `{attribute}`")]
    MissingAttribute {
        block: usize,
        attribute: &'static str,
    },
    #[error("block #{block}: unknown attribute `{attribute}`")]
    UnknownAttribute { block: usize, attribute: String },
    #[error("block #{block}: unexpected nested block `{ident}`")]
    UnexpectedBlock { block: usize, ident: String },
    #[error("block #{block}: `{attribute}` must be a {expected}")]
    InvalidAttributeType {
        block: usize,
        attribute: String,
        expected: &'static str,
    },
    #[error("block #{block}: unable to evaluate `{attribute}`: {message}")]
    Evaluation {
        block: usize,
        attribute: String,
        message: String,
    },
    #[error("block #{block}: unknown filter type `{type_name}`")]
    UnknownFilterType { block: usize, type_name: String },
    #[error("block #{block}: conditions nested deeper than {} levels", MAX_CONDITION_DEPTH)]
    TooDeep { block: usize },
    #[error("block #{block}: {error}")]
    MalformedFilter {
        block: usize,
        error: MalformedFilterError,
    },
    #[error("block #{block}: {error}")]
    UnsupportedValue {
        block: usize,
        error: UnsupportedValueTypeError,
    },
    #[error("block #{block}: {error}")]
    UnresolvedFilter {
        block: usize,
        error: FilterNotFoundError,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hcl_documents;
    use crate::registry::RetryPolicy;
    use crate::value::{Literal, Reference};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> FilterRegistry {
        FilterRegistry::new(RetryPolicy::none())
    }

    fn config_errors_for(doc: HclDocuments) -> ConfigErrors {
        ConfigDocument::new(&doc, &registry()).expect_err("must error")
    }

    const STAGING: &str = r#"
filter "staging" {
  type     = "comparison"
  operator = "and"

  condition {
    type     = "metadata"
    key      = "environment"
    operator = "equals"
    value    = "staging"
  }

  condition {
    type     = "kind"
    operator = "equals"
    value    = "Deployment"
  }
}
"#;

    #[test]
    fn root_attribute_errors() {
        let errors = config_errors_for(hcl_documents! {"root_attr = 1"});
        assert_eq!(errors.issues(), &[Issue::RootAttribute(0)]);
    }

    #[test]
    fn unknown_block_type_errors() {
        let errors = config_errors_for(hcl_documents! {"resource \"x\" {}"});
        assert!(errors.issues().contains(&Issue::UnknownBlockType(0)));
    }

    #[test]
    fn label_errors() {
        let errors = config_errors_for(hcl_documents! {"variable {}\nvariable one two {}"});
        assert_eq!(
            errors.issues(),
            &[Issue::LabelMissing(0), Issue::TooManyLabels(1)]
        );
    }

    #[test]
    fn label_collision() {
        let errors = config_errors_for(hcl_documents! {"variable one {}\nvariable one {}"});
        assert!(errors.issues().contains(&Issue::LabelCollision {
            existing: 0,
            new: 1
        }));
    }

    #[test]
    fn same_name_for_different_block_types() {
        let doc = hcl_documents! {"variable staging {}\nfilter staging {\n  type = \"selector\"\n}"};
        assert!(ConfigDocument::new(&doc, &registry()).is_ok());
    }

    #[test]
    fn filters_are_registered() {
        let registry = registry();
        let document = ConfigDocument::new(&hcl_documents! {STAGING}, &registry).unwrap();

        let expected = FilterNode::and(vec![
            FilterNode::metadata("environment", "equals", "staging"),
            FilterNode::leaf(FilterKind::Kind, "equals", "Deployment"),
        ]);

        let declared = &document.filters()["staging"];
        assert_eq!(declared.node, expected);
        assert_eq!(declared.identity, expected.identity());
        assert_eq!(registry.get(&declared.identity), Some(expected));
    }

    #[test]
    fn filter_issues() {
        let errors = config_errors_for(hcl_documents! {r#"
filter "missing_type" {
  operator = "and"
}

filter "bad_type" {
  type = "owner"
}

filter "bad_operator" {
  type     = "comparison"
  operator = "xor"
}

filter "unknown_attribute" {
  type  = "name"
  owner = "me"
}

filter "wrong_type" {
  type = "name"
  not  = "yes"
}
"#});

        assert_eq!(
            errors.issues()[0],
            Issue::MissingAttribute {
                block: 0,
                attribute: "type"
            }
        );
        assert_eq!(
            errors.issues()[1],
            Issue::UnknownFilterType {
                block: 1,
                type_name: "owner".into()
            }
        );
        assert!(matches!(
            errors.issues()[2],
            Issue::MalformedFilter { block: 2, .. }
        ));
        assert_eq!(
            errors.issues()[3],
            Issue::UnknownAttribute {
                block: 3,
                attribute: "owner".into()
            }
        );
        assert_eq!(
            errors.issues()[4],
            Issue::InvalidAttributeType {
                block: 4,
                attribute: "not".into(),
                expected: "bool"
            }
        );
    }

    fn nested_filter(levels: usize) -> String {
        let mut body = String::from("type = \"name\"\noperator = \"equals\"\nvalue = \"api\"\n");
        for _ in 0..levels {
            body = format!("type = \"comparison\"\noperator = \"or\"\ncondition {{\n{body}}}\n");
        }
        format!("filter \"deep\" {{\n{body}}}\n")
    }

    #[test]
    fn nesting_limit() {
        let doc = hcl_edit::parser::parse_body(&nested_filter(MAX_CONDITION_DEPTH)).unwrap();
        assert!(ConfigDocument::new(&doc.into(), &registry()).is_ok());

        let doc = hcl_edit::parser::parse_body(&nested_filter(MAX_CONDITION_DEPTH + 1)).unwrap();
        let errors = ConfigDocument::new(&doc.into(), &registry()).unwrap_err();
        assert_eq!(errors.issues(), &[Issue::TooDeep { block: 0 }]);
    }

    #[test]
    fn variables() {
        let document = ConfigDocument::new(
            &hcl_documents! {r#"
variable "replicas" {
  description = "number of replicas"
  default     = 3.0
}

variable "labels" {
  default = { team = "infra", tier = 2 }
}

variable "region" {
  default = { reference = "cluster", path = ["metadata", "region"] }
}

variable "unset" {}
"#},
            &registry(),
        )
        .unwrap();

        let variables = document.variables();
        assert_eq!(
            variables["replicas"].default,
            Some(TaggedValue::Literal(Literal::Integer(3)))
        );
        assert_eq!(
            variables["labels"].default.as_ref().map(TaggedValue::to_dynamic),
            Some(json!({"team": "infra", "tier": 2}))
        );
        assert_eq!(
            variables["region"].default,
            Some(TaggedValue::Reference(Reference::new(
                "cluster",
                ["metadata", "region"]
            )))
        );
        assert_eq!(variables["unset"].default, None);
    }

    #[test]
    fn list_variables_are_rejected() {
        let errors = config_errors_for(hcl_documents! {r#"
variable "zones" {
  default = ["a", "b"]
}
"#});
        assert!(matches!(
            &errors.issues()[0],
            Issue::UnsupportedValue { block: 0, error } if error.type_name == "array"
        ));
    }

    #[test]
    fn targets_resolve_filters() {
        let source = format!("{STAGING}\ntarget \"staging\" {{\n  filter_id = filter.staging.id\n}}\n");
        let doc = hcl_edit::parser::parse_body(&source).unwrap();
        let document = ConfigDocument::new(&doc.into(), &registry()).unwrap();

        let target = &document.targets()["staging"];
        assert_eq!(target.filter_id, document.filters()["staging"].identity);
        assert_eq!(target.filter, document.filters()["staging"].node);
    }

    #[test]
    fn targets_resolve_filters_registered_elsewhere() {
        let registry = registry();
        let shared = FilterNode::leaf(FilterKind::Selector, "", "all-clusters");
        let identity = registry.register_filter(shared.clone());

        let source = format!("target \"everything\" {{\n  filter_id = \"{identity}\"\n}}\n");
        let doc = hcl_edit::parser::parse_body(&source).unwrap();
        let document = ConfigDocument::new(&doc.into(), &registry).unwrap();

        assert_eq!(document.targets()["everything"].filter, shared);
    }

    #[test]
    fn unresolved_target() {
        let errors = config_errors_for(hcl_documents! {r#"
target "nowhere" {
  filter_id = "0000000000000000"
}
"#});
        assert!(matches!(
            &errors.issues()[0],
            Issue::UnresolvedFilter { block: 0, error } if error.identity == "0000000000000000"
        ));
    }

    #[test]
    fn render() {
        let source = format!(
            "{STAGING}\nvariable \"replicas\" {{\n  default = 2\n}}\ntarget \"staging\" {{\n  filter_id = filter.staging.id\n}}\n"
        );
        let doc = hcl_edit::parser::parse_body(&source).unwrap();
        let document = ConfigDocument::new(&doc.into(), &registry()).unwrap();

        let filter = json!({
            "type": "comparison",
            "operator": "and",
            "value": "",
            "conditions": [
                {"type": "metadata", "operator": "equals", "key": "environment", "value": "staging"},
                {"type": "kind", "operator": "equals", "value": "Deployment"},
            ]
        });

        assert_eq!(
            WireValue::Object(document.render().unwrap()),
            json!({
                "filters": {"staging": filter.clone()},
                "variables": {"replicas": 2},
                "targets": {"staging": filter},
            })
        );
    }
}
