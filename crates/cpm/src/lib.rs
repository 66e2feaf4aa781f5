//! # cpm - control-plane structured value model
//!
//! The typed core shared by everything that talks to the control-plane API:
//! filter trees, tagged values and the filter registry.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `cpm` works internally.
//!
//! ### Wire form
//!
//! The API speaks a loosely typed JSON dialect. We model it with [serde_json::Value] and
//! [wire::WireMap] (a string keyed, order-preserving map). Everything in this crate converts
//! between a strongly typed representation and that wire form, in both directions.
//!
//! ### Filters
//!
//! A [filter::FilterNode] is a recursive predicate used to select resources:
//!
//! ```text
//! comparison (and)
//! ├── metadata  environment equals "staging"
//! └── comparison (or)
//!     ├── kind  equals "Deployment"
//!     └── name  starts-with "api-"
//! ```
//!
//! [filter::encode] turns a tree into its wire map:
//!
//! ```json
//! { "type": "comparison", "operator": "and", "value": "", "conditions": [ ... ] }
//! ```
//!
//! and [filter::decode] turns it back. Both sides run the same normalization
//! ([filter::FilterNode::normalize]): a comparison with conditions never carries a value.
//!
//! ### Filter identity and the registry
//!
//! [filter::identity] hashes the full recursive content of a tree. Two entities created in the
//! same run can share a filter through a [registry::FilterRegistry]: one registers the tree under
//! its identity, the other resolves it. Creation order between entities is not guaranteed, so
//! [registry::FilterRegistry::resolve] retries for a bounded amount of time before giving up.
//!
//! ### Tagged values
//!
//! Variable defaults and overrides are a [value::TaggedValue]: either an inline literal or a
//! reference to a field of another entity. [value::TaggedValue::from_dynamic] and
//! [value::TaggedValue::to_dynamic] convert to and from the wire form.
//!
//! ### Configuration
//!
//! [hcl_documents::HclDocuments] loads `.hcl` files and [config::ConfigDocument] interprets their
//! `filter`, `variable` and `target` blocks:
//!
//! ```hcl
//! filter "staging" {
//!   type     = "comparison"
//!   operator = "and"
//!
//!   condition {
//!     type     = "metadata"
//!     key      = "environment"
//!     operator = "equals"
//!     value    = "staging"
//!   }
//! }
//!
//! variable "replicas" {
//!   default = 3
//! }
//!
//! target "staging" {
//!   filter_id = filter.staging.id
//! }
//! ```
//!
pub mod config;
pub mod filter;
pub mod hcl_documents;
pub mod registry;
pub mod value;
pub mod wire;
