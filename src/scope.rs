//! Dotted scope paths
//!
//! A scope addresses an app in the tree: `""` is the root, `"a.b"` is app `b`
//! inside app `a`. Changelog contexts use the same path prefixed with
//! [`ROOT_CONTEXT`], so the root is `"*"` and `"a.b"` is `"*.a.b"`.

use crate::error::TreeError;

/// Changelog context of the tree root
pub const ROOT_CONTEXT: &str = "*";

const MAX_NAME_LEN: usize = 63;

/// Check a structure (app, channel, type) name.
///
/// Names are 1 to 63 characters, start and end with an ASCII alphanumeric and
/// may contain `-` and `_` in between.
pub fn structure_name_is_valid(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(TreeError::InvalidName {
            name: String::from(name),
            reason: "length must be between 1 and 63",
        });
    }
    let bytes = name.as_bytes();
    let edge_ok = bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    let body_ok = bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if edge_ok && body_ok {
        Ok(())
    } else {
        Err(TreeError::InvalidName {
            name: String::from(name),
            reason: "invalid character in structure name",
        })
    }
}

/// Check an alias key of the form `<child>.<boundary>`
pub fn alias_name_is_valid(name: &str) -> Result<(), TreeError> {
    match name.split_once('.') {
        Some((child, boundary)) if !boundary.contains('.') => {
            structure_name_is_valid(child)?;
            structure_name_is_valid(boundary)
        }
        _ => Err(TreeError::InvalidName {
            name: String::from(name),
            reason: "alias names must have the form <app>.<boundary>",
        }),
    }
}

/// True if every dot-separated part of `scope` is a valid structure name.
/// The empty scope is valid.
pub fn is_valid_scope(scope: &str) -> bool {
    scope.is_empty() || scope.split('.').all(|part| structure_name_is_valid(part).is_ok())
}

/// Join two scopes, skipping empty sides
pub fn join(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => String::from(right),
        (_, true) => String::from(left),
        _ => format!("{left}.{right}"),
    }
}

/// Join two scopes after validating both
pub fn join_scopes(left: &str, right: &str) -> Result<String, TreeError> {
    if !is_valid_scope(left) {
        return Err(TreeError::InvalidScope(String::from(left)));
    }
    if !is_valid_scope(right) {
        return Err(TreeError::InvalidScope(String::from(right)));
    }
    Ok(join(left, right))
}

/// Split off the last name of a scope: `"a.b.c"` -> `("a.b", "c")`
pub fn remove_last_part(scope: &str) -> Result<(&str, &str), TreeError> {
    if scope.is_empty() || !is_valid_scope(scope) {
        return Err(TreeError::InvalidScope(String::from(scope)));
    }
    Ok(scope.rsplit_once('.').unwrap_or(("", scope)))
}

/// Map a changelog context (`"*"`, `"*.a.b"`) to a store scope (`""`, `"a.b"`).
/// Plain scopes pass through unchanged.
pub fn context_to_scope(context: &str) -> &str {
    if context == ROOT_CONTEXT {
        return "";
    }
    context
        .strip_prefix(ROOT_CONTEXT)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(context)
}

/// Map a store scope to its changelog context
pub fn scope_to_context(scope: &str) -> String {
    if scope.is_empty() {
        String::from(ROOT_CONTEXT)
    } else {
        format!("{ROOT_CONTEXT}.{scope}")
    }
}
