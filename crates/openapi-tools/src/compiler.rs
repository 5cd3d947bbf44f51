//! API description → operation registry.
//!
//! Every `paths.<path>.<verb>` entry becomes one [`Operation`]. Path-level parameters are merged
//! with operation-level parameters (operation-level wins on a `(name, in)` clash), parameters are
//! classified into path / required query / optional query, and a unique name is derived from the
//! `operationId` (or `<verb>_<path>` when there is none).
//!
//! Request bodies are never introspected: an operation either accepts an opaque body or it doesn't.

use crate::config::{CollisionPolicy, CompileConfig};
use crate::error::{OpenApiToolsError, Result};
use crate::operation::{HttpMethod, Operation, OperationRegistry, SkippedOperation};
use crate::resolver::LocalRefResolver;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid separator regex"));

/// Fallback used when a seed sanitizes to nothing.
const EMPTY_NAME: &str = "op";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ParamLocation {
    Path,
    Query,
}

#[derive(Debug, Clone)]
struct ParamDecl {
    name: String,
    location: ParamLocation,
    required: bool,
}

/// Compile an API description into a registry of uniquely named operations.
///
/// Unrecognized structure is skipped rather than rejected: a missing `paths` object yields an
/// empty registry, and non-object path items, unknown verbs and non-object operations are
/// ignored.
///
/// # Errors
///
/// Returns an error only when `config` leaves no room for a name after the prefix.
pub fn compile(spec: &Value, config: &CompileConfig) -> Result<OperationRegistry> {
    let namer = Namer::new(config)?;
    let resolver = LocalRefResolver::new(spec);
    let mut registry = OperationRegistry::default();

    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        tracing::warn!("API description has no `paths` object; no operations compiled");
        return Ok(registry);
    };

    for (path, raw_item) in paths {
        let item = match resolver.resolve(raw_item) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Skipping path '{}': {}", path, e);
                continue;
            }
        };
        let Some(item) = item.as_object() else {
            continue;
        };
        let path_level = item
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (key, raw_op) in item {
            let Some(method) = HttpMethod::from_key(key) else {
                continue;
            };
            let Some(op) = raw_op.as_object() else {
                continue;
            };

            let operation_id = op
                .get("operationId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let seed = operation_id
                .clone()
                .unwrap_or_else(|| format!("{key}_{path}"));

            let Some(name) = namer.reserve(&registry, &seed) else {
                let dropped = namer.full_name(&seed);
                tracing::warn!(
                    "Dropping {} {}: operation name '{}' is already registered",
                    method,
                    path,
                    dropped
                );
                registry.record_skipped(SkippedOperation {
                    name: dropped,
                    method,
                    path: path.clone(),
                });
                continue;
            };

            let op_level = op
                .get("parameters")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let params = merge_parameters(&resolver, path_level, op_level);

            let summary = op
                .get("summary")
                .and_then(Value::as_str)
                .or_else(|| op.get("description").and_then(Value::as_str))
                .map(str::to_string);

            registry.insert(Operation {
                name,
                method,
                path_template: path.clone(),
                operation_id,
                summary,
                required_path_params: names_where(&params, |p| {
                    p.location == ParamLocation::Path
                }),
                required_query_params: names_where(&params, |p| {
                    p.location == ParamLocation::Query && p.required
                }),
                optional_query_params: names_where(&params, |p| {
                    p.location == ParamLocation::Query && !p.required
                }),
                has_body: op.get("requestBody").is_some_and(|b| !b.is_null()),
            });
        }
    }

    tracing::info!(
        "Compiled {} operations ({} dropped on name collision)",
        registry.len(),
        registry.skipped().len()
    );

    Ok(registry)
}

/// Check that `config` leaves room for a name after the (sanitized) prefix.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::Config`] when the name budget is zero.
pub fn validate_naming(config: &CompileConfig) -> Result<()> {
    Namer::new(config).map(|_| ())
}

/// Sanitize a name seed: lowercase, runs of non-alphanumerics collapsed to `_`, outer separators
/// stripped, truncated to `max_length` with trailing separators stripped again.
#[must_use]
pub fn sanitize_name(seed: &str, max_length: usize) -> String {
    let lowered = seed.to_ascii_lowercase();
    let joined = NON_ALNUM.replace_all(&lowered, "_");
    let mut name = joined.trim_matches('_').to_string();
    if name.is_empty() {
        name = EMPTY_NAME.to_string();
    }
    if name.len() > max_length {
        // Only ASCII remains at this point, so byte truncation is char-safe.
        name.truncate(max_length);
        name.truncate(name.trim_end_matches('_').len());
    }
    name
}

struct Namer {
    prefix: String,
    budget: usize,
    on_collision: CollisionPolicy,
}

impl Namer {
    fn new(config: &CompileConfig) -> Result<Self> {
        let lowered = config.name_prefix.to_ascii_lowercase();
        let prefix = NON_ALNUM
            .replace_all(&lowered, "_")
            .trim_matches('_')
            .to_string();
        let reserved = if prefix.is_empty() { 0 } else { prefix.len() + 1 };
        let budget = config.max_name_length.saturating_sub(reserved);
        if budget == 0 {
            return Err(OpenApiToolsError::Config(format!(
                "maxNameLength {} leaves no room for names after prefix '{}'",
                config.max_name_length, prefix
            )));
        }
        Ok(Self {
            prefix,
            budget,
            on_collision: config.on_collision,
        })
    }

    fn with_prefix(&self, body: &str) -> String {
        if self.prefix.is_empty() {
            body.to_string()
        } else {
            format!("{}_{body}", self.prefix)
        }
    }

    fn full_name(&self, seed: &str) -> String {
        self.with_prefix(&sanitize_name(seed, self.budget))
    }

    /// The name to register `seed` under, or `None` when it must be dropped.
    fn reserve(&self, registry: &OperationRegistry, seed: &str) -> Option<String> {
        let name = self.full_name(seed);
        if !registry.contains(&name) {
            return Some(name);
        }
        if self.on_collision == CollisionPolicy::Skip {
            return None;
        }

        let mut counter: usize = 2;
        loop {
            let suffix = format!("_{counter}");
            if suffix.len() >= self.budget {
                return None;
            }
            let body = sanitize_name(seed, self.budget - suffix.len());
            let candidate = self.with_prefix(&format!("{body}{suffix}"));
            if !registry.contains(&candidate) {
                return Some(candidate);
            }
            counter += 1;
        }
    }
}

fn merge_parameters(
    resolver: &LocalRefResolver<'_>,
    path_level: &[Value],
    op_level: &[Value],
) -> Vec<ParamDecl> {
    let mut merged: Vec<ParamDecl> = Vec::new();
    let mut index: HashMap<(String, ParamLocation), usize> = HashMap::new();

    for raw in path_level.iter().chain(op_level) {
        let Some(decl) = parse_parameter(resolver, raw) else {
            continue;
        };
        let key = (decl.name.clone(), decl.location);
        // Operation-level entries come second, so replacing in place lets them win.
        if let Some(i) = index.get(&key).copied() {
            merged[i] = decl;
        } else {
            index.insert(key, merged.len());
            merged.push(decl);
        }
    }

    merged
}

fn parse_parameter(resolver: &LocalRefResolver<'_>, raw: &Value) -> Option<ParamDecl> {
    let param = match resolver.resolve(raw) {
        Ok(v) => v.as_object()?,
        Err(e) => {
            tracing::warn!("Skipping parameter: {}", e);
            return None;
        }
    };
    let name = param.get("name")?.as_str()?.to_string();
    let location = match param.get("in")?.as_str()? {
        "path" => ParamLocation::Path,
        "query" => ParamLocation::Query,
        _ => return None,
    };
    let required = param.get("required").and_then(Value::as_bool) == Some(true);
    Some(ParamDecl {
        name,
        location,
        required,
    })
}

fn names_where(params: &[ParamDecl], pred: impl Fn(&ParamDecl) -> bool) -> Vec<String> {
    params
        .iter()
        .filter(|p| pred(p))
        .map(|p| p.name.clone())
        .collect()
}
