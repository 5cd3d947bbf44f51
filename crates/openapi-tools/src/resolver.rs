//! Local `$ref` resolution.
//!
//! Parameters and path items may be written as `{"$ref": "#/components/parameters/Id"}`. Only
//! references into the same document are followed; a reference is a JSON pointer after `#`.
//! Chains of references are followed until a non-reference value is found.

use crate::error::{OpenApiToolsError, Result};
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct LocalRefResolver<'a> {
    root: &'a Value,
}

impl<'a> LocalRefResolver<'a> {
    #[must_use]
    pub fn new(root: &'a Value) -> Self {
        Self { root }
    }

    /// Resolve `value` if it is a `$ref` object, otherwise return it unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error for external references, malformed pointers, dangling pointers and
    /// reference cycles.
    pub fn resolve<'v>(&self, value: &'v Value) -> Result<&'v Value>
    where
        'a: 'v,
    {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut cur = value;

        while let Some(reference) = ref_target(cur) {
            if !seen.insert(reference) {
                return Err(OpenApiToolsError::Reference(format!(
                    "cyclic $ref detected while resolving: {reference}"
                )));
            }
            cur = self.lookup(reference)?;
        }

        Ok(cur)
    }

    fn lookup(&self, reference: &str) -> Result<&'a Value> {
        let Some(fragment) = reference.strip_prefix('#') else {
            return Err(OpenApiToolsError::Reference(format!(
                "external $ref is not supported: {reference}"
            )));
        };
        if fragment.is_empty() {
            return Ok(self.root);
        }
        if !fragment.starts_with('/') {
            return Err(OpenApiToolsError::Reference(format!(
                "unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}"
            )));
        }
        self.root.pointer(fragment).ok_or_else(|| {
            OpenApiToolsError::Reference(format!("unresolved $ref '{reference}'"))
        })
    }
}

fn ref_target(value: &Value) -> Option<&str> {
    value.as_object()?.get("$ref")?.as_str()
}
