//! URL-safe slugs derived from display names.

use crate::error::{ArborError, ArborResult};

/// Lowercases ASCII alphanumerics and collapses every other run of
/// characters into a single `-`.
pub fn slugify(name: &str) -> ArborResult<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        return Err(ArborError::invalid(
            "name",
            format!("'{name}' contains no alphanumeric characters"),
        ));
    }
    Ok(slug)
}

/// Slug of an entity that lives inside an organization tree: the root's
/// slug followed by the entity's own slug.
pub fn namespaced(root_slug: &str, name: &str) -> ArborResult<String> {
    Ok(format!("{root_slug}.{}", slugify(name)?))
}
