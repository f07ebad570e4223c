//! Accessors for `name value` child nodes.
//!
//! A field is written as a child node whose first positional argument is the
//! value, e.g. `listen "0.0.0.0:443"`. Missing fields yield `Ok(None)`; a
//! field with the wrong value type is an error naming the field.

use anyhow::{anyhow, Result};

/// Find a direct child node by name.
pub fn get_child<'a>(node: &'a kdl::KdlNode, name: &str) -> Option<&'a kdl::KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// First positional argument of a node.
pub fn get_first_arg(node: &kdl::KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

pub fn get_string_entry(node: &kdl::KdlNode, name: &str) -> Result<Option<String>> {
    let Some(value) = get_child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_string()
        .map(|s| Some(s.to_string()))
        .ok_or_else(|| anyhow!("'{}' in '{}' must be a string", name, node.name().value()))
}

pub fn get_int_entry(node: &kdl::KdlNode, name: &str) -> Result<Option<i128>> {
    let Some(value) = get_child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_integer()
        .map(Some)
        .ok_or_else(|| anyhow!("'{}' in '{}' must be an integer", name, node.name().value()))
}

pub fn get_bool_entry(node: &kdl::KdlNode, name: &str) -> Result<Option<bool>> {
    let Some(value) = get_child(node, name).and_then(get_first_arg) else {
        return Ok(None);
    };
    value
        .as_bool()
        .map(Some)
        .ok_or_else(|| anyhow!("'{}' in '{}' must be #true or #false", name, node.name().value()))
}

/// Integer field converted to an unsigned type, rejecting negatives and overflow.
pub fn get_unsigned_entry<T>(node: &kdl::KdlNode, name: &str) -> Result<Option<T>>
where
    T: TryFrom<i128>,
{
    match get_int_entry(node, name)? {
        Some(raw) => T::try_from(raw).map(Some).map_err(|_| {
            anyhow!(
                "'{}' in '{}' is out of range: {}",
                name,
                node.name().value(),
                raw
            )
        }),
        None => Ok(None),
    }
}

/// Reject child nodes this block does not understand.
pub fn ensure_known_children(node: &kdl::KdlNode, known: &[&str]) -> Result<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        let name = child.name().value();
        if !known.contains(&name) {
            return Err(anyhow!(
                "Unknown field '{}' in '{}' block. Valid fields: {}",
                name,
                node.name().value(),
                known.join(", ")
            ));
        }
    }
    Ok(())
}
