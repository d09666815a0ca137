//! Argument resolution between the model's free-form argument bag and a
//! capability's declared parameter schema.
//!
//! The resolver is deliberately independent of any capability: it only sees
//! a schema and a bag. Unknown keys are dropped, missing required keys are
//! reported but do not block invocation; handlers absorb absent values
//! through `Option` fields and defaults.

use serde_json::{Map, Value};

/// One declared parameter of a capability.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParamSpec {
    pub(crate) name: &'static str,
    pub(crate) required: bool,
}

pub(crate) const fn req(name: &'static str) -> ParamSpec {
    ParamSpec { name, required: true }
}

pub(crate) const fn opt(name: &'static str) -> ParamSpec {
    ParamSpec { name, required: false }
}

#[derive(Debug)]
pub(crate) struct ResolvedArgs {
    pub(crate) args: Map<String, Value>,
    pub(crate) missing: Vec<&'static str>,
}

/// Filter `bag` down to the keys `schema` declares and collect the required
/// keys that are absent.
pub(crate) fn filter_args(schema: &[ParamSpec], bag: &Map<String, Value>) -> ResolvedArgs {
    let mut args = Map::new();
    let mut missing = Vec::new();
    for spec in schema {
        match bag.get(spec.name) {
            Some(v) if !v.is_null() => {
                args.insert(spec.name.to_string(), v.clone());
            }
            _ if spec.required => missing.push(spec.name),
            _ => {}
        }
    }
    ResolvedArgs { args, missing }
}
