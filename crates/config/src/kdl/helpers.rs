//! Small accessors over the KDL node tree.

use kdl::{KdlNode, KdlValue};

use crate::error::ConfigError;

/// Positional (unnamed) arguments of a node
pub fn get_args(node: &KdlNode) -> impl Iterator<Item = &KdlValue> {
    node.entries()
        .iter()
        .filter(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// First positional argument of a node, as a string
pub fn get_first_arg_string(node: &KdlNode) -> Option<String> {
    get_args(node).next().and_then(value_to_string)
}

/// Named property (`key=value`) of a node, as a string
pub fn get_property_string(node: &KdlNode, key: &str) -> Option<String> {
    node.entries()
        .iter()
        .find(|entry| entry.name().map(|n| n.value()) == Some(key))
        .and_then(|entry| value_to_string(entry.value()))
}

/// Direct child node with the given name
pub fn get_child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// First argument of the named child, as a string
pub fn get_string_entry(node: &KdlNode, name: &str) -> Option<String> {
    get_child(node, name).and_then(get_first_arg_string)
}

/// All string arguments of the named child
pub fn get_string_list(node: &KdlNode, name: &str) -> Vec<String> {
    get_child(node, name)
        .map(|child| get_args(child).filter_map(value_to_string).collect())
        .unwrap_or_default()
}

/// First argument of the named child as an unsigned integer
pub fn get_u64_entry(
    node: &KdlNode,
    name: &str,
    context: &str,
) -> Result<Option<u64>, ConfigError> {
    let Some(child) = get_child(node, name) else {
        return Ok(None);
    };
    let value = get_args(child)
        .next()
        .ok_or_else(|| ConfigError::missing(context, name))?;
    let int = value
        .as_integer()
        .ok_or_else(|| ConfigError::invalid_value(context, name, "expected an integer"))?;
    u64::try_from(int)
        .map(Some)
        .map_err(|_| ConfigError::invalid_value(context, name, "expected a non-negative integer"))
}

/// Render scalar KDL values as strings
pub fn value_to_string(value: &KdlValue) -> Option<String> {
    if let Some(s) = value.as_string() {
        return Some(s.to_string());
    }
    if let Some(i) = value.as_integer() {
        return Some(i.to_string());
    }
    value.as_bool().map(|b| b.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kdl::KdlDocument;

    fn first_node(text: &str) -> KdlNode {
        let doc: KdlDocument = text.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_args_and_properties() {
        let node = first_node(r#"output "local" type="files" { directory "/tmp/out" }"#);
        assert_eq!(get_first_arg_string(&node).as_deref(), Some("local"));
        assert_eq!(get_property_string(&node, "type").as_deref(), Some("files"));
        assert_eq!(get_string_entry(&node, "directory").as_deref(), Some("/tmp/out"));
        assert_eq!(get_string_entry(&node, "missing"), None);
    }

    #[test]
    fn test_string_list() {
        let node = first_node(r#"certificate "www" { hosts "a.example.com" "b.example.com" }"#);
        assert_eq!(
            get_string_list(&node, "hosts"),
            vec!["a.example.com".to_string(), "b.example.com".to_string()]
        );
        assert!(get_string_list(&node, "other").is_empty());
    }

    #[test]
    fn test_u64_entry() {
        let node = first_node("renewal { dns-wait-secs 30\n retry-attempts-max -1\n name \"x\" }");
        assert_eq!(get_u64_entry(&node, "dns-wait-secs", "renewal").unwrap(), Some(30));
        assert_eq!(get_u64_entry(&node, "absent", "renewal").unwrap(), None);
        assert!(get_u64_entry(&node, "retry-attempts-max", "renewal").is_err());
        assert!(get_u64_entry(&node, "name", "renewal").is_err());
    }
}
