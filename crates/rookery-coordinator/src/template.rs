//! Query template resolution.
//!
//! Transformation queries reference upstream sources as `{{ name.variant }}`
//! escapes. [`template_replace`] substitutes each escape with its resolved
//! table name; [`discover_sources`] parses the same syntax on the
//! registration side to find which sources a query depends on.

use std::collections::HashMap;

use rookery_metadata::NameVariant;

use crate::error::CoordinatorError;

/// Replace every `{{ key }}` escape in `template` with `replacements[key]`.
///
/// Literal text order is preserved exactly and resolved values interleave in
/// the place of their markers. An unmapped key fails the whole operation
/// with no partial output.
pub fn template_replace(
  template: &str,
  replacements: &HashMap<String, String>,
) -> Result<String, CoordinatorError> {
  let mut formatted = String::with_capacity(template.len());
  let mut remainder = template;

  while let Some((literal, after_open)) = remainder.split_once("{{") {
    let (raw_key, rest) =
      after_open
        .split_once("}}")
        .ok_or_else(|| CoordinatorError::MalformedReference {
          key: after_open.to_string(),
        })?;
    let key = raw_key.trim();
    // An opener inside the key means the escapes are nested or unbalanced.
    if key.contains("{{") {
      return Err(CoordinatorError::MalformedReference {
        key: key.to_string(),
      });
    }
    let replacement =
      replacements
        .get(key)
        .ok_or_else(|| CoordinatorError::UnresolvedReference {
          key: key.to_string(),
        })?;
    formatted.push_str(literal);
    formatted.push_str(replacement);
    remainder = rest;
  }

  formatted.push_str(remainder);
  Ok(formatted)
}

/// Parse a query's `{{ name.variant }}` escapes into the source list it
/// references. A key without a `.` separator is a parse error, not a
/// default.
pub fn discover_sources(query: &str) -> Result<Vec<NameVariant>, CoordinatorError> {
  let mut sources = Vec::new();
  let mut remainder = query;

  while let Some((_, after_open)) = remainder.split_once("{{") {
    let (raw_key, rest) =
      after_open
        .split_once("}}")
        .ok_or_else(|| CoordinatorError::MalformedReference {
          key: after_open.to_string(),
        })?;
    let key = raw_key.trim();
    if key.contains("{{") {
      return Err(CoordinatorError::MalformedReference {
        key: key.to_string(),
      });
    }
    let (name, variant) =
      key
        .split_once('.')
        .ok_or_else(|| CoordinatorError::MalformedReference {
          key: key.to_string(),
        })?;
    let nv = NameVariant::new(name, variant);
    if !sources.contains(&nv) {
      sources.push(nv);
    }
    remainder = rest;
  }

  Ok(sources)
}
