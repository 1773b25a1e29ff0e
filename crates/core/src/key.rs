//! Canonical `namespace/name` keys.
//!
//! A key is the only unit of work the queue understands. Namespaced objects
//! encode as `namespace/name`, cluster-scoped objects as plain `name`.

use crate::error::Error;
use crate::result::Result;

/// Encode a namespace and name into a queue key.
#[must_use]
pub fn meta_namespace_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Split a queue key back into `(namespace, name)`.
///
/// # Errors
///
/// Returns [`Error::InvalidKey`] when the key has more than one `/` or an
/// empty name.
pub fn split_meta_namespace_key(key: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((String::new(), (*name).to_string())),
        [namespace, name] if !name.is_empty() => {
            Ok(((*namespace).to_string(), (*name).to_string()))
        }
        _ => Err(Error::invalid_key(key)),
    }
}
