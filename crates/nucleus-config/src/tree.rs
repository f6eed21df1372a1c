use nucleus_domain::ConfigValue;

/// A node path, root-relative, e.g. `["services", "SomeService", "port"]`.
pub type Path = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    Changed,
    ChildAdded,
    ChildRemoved,
    Removed,
}

/// Delivered to subscribers on the dedicated notification queue, never
/// inline with the mutation that produced it (§4.1).
#[derive(Debug, Clone)]
pub struct ConfigNotification {
    pub path: Path,
    pub kind: NotificationKind,
    pub old_value: Option<ConfigValue>,
}

/// A node of the config tree. Every node but the root has exactly one
/// parent; a node's full path is unique; a leaf's timestamp is
/// non-decreasing (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        value: ConfigValue,
        timestamp: i64,
    },
    /// Ordered mapping, insertion order preserved.
    Container {
        children: Vec<(String, Node)>,
    },
}

impl Node {
    pub fn new_container() -> Self {
        Node::Container { children: Vec::new() }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn leaf_value(&self) -> Option<&ConfigValue> {
        match self {
            Node::Leaf { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn leaf_timestamp(&self) -> Option<i64> {
        match self {
            Node::Leaf { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Container { children } => {
                children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
            }
            Node::Leaf { .. } => None,
        }
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        match self {
            Node::Container { children } => {
                children.iter_mut().find(|(n, _)| n == name).map(|(_, c)| c)
            }
            Node::Leaf { .. } => None,
        }
    }

    pub fn children(&self) -> &[(String, Node)] {
        match self {
            Node::Container { children } => children,
            Node::Leaf { .. } => &[],
        }
    }

    /// Inserts or replaces a named child, preserving the existing position
    /// if the name already exists (so reinserting a value does not reorder
    /// the container).
    pub fn put_child(&mut self, name: impl Into<String>, node: Node) {
        let name = name.into();
        if let Node::Container { children } = self {
            if let Some(slot) = children.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = node;
            } else {
                children.push((name, node));
            }
        }
    }

    pub fn remove_child(&mut self, name: &str) -> Option<Node> {
        if let Node::Container { children } = self {
            let idx = children.iter().position(|(n, _)| n == name)?;
            Some(children.remove(idx).1)
        } else {
            None
        }
    }

    /// Walks `path` from this node, returning `None` if any segment is
    /// missing or traverses through a leaf.
    pub fn lookup<'a>(&'a self, path: &[String]) -> Option<&'a Node> {
        let mut cur = self;
        for segment in path {
            cur = cur.child(segment)?;
        }
        Some(cur)
    }

    pub fn lookup_mut<'a>(&'a mut self, path: &[String]) -> Option<&'a mut Node> {
        let mut cur = self;
        for segment in path {
            cur = cur.child_mut(segment)?;
        }
        Some(cur)
    }

    /// Reconstructs this node's full content as a `ConfigValue`, recursing
    /// into every container. Used to restate an untouched subtree verbatim
    /// in a merge document, since `merge_node` replaces a container's
    /// children wholesale at every level it touches (§4.1).
    pub fn to_config_value(&self) -> ConfigValue {
        match self {
            Node::Leaf { value, .. } => value.clone(),
            Node::Container { children } => {
                ConfigValue::Container(children.iter().map(|(k, v)| (k.clone(), v.to_config_value())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_child_preserves_position_on_replace() {
        let mut container = Node::new_container();
        container.put_child("a", Node::Leaf { value: ConfigValue::Int(1), timestamp: 0 });
        container.put_child("b", Node::Leaf { value: ConfigValue::Int(2), timestamp: 0 });
        container.put_child("a", Node::Leaf { value: ConfigValue::Int(9), timestamp: 1 });

        let names: Vec<&str> = container.children().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(container.child("a").unwrap().leaf_value(), Some(&ConfigValue::Int(9)));
    }

    #[test]
    fn lookup_traverses_nested_path() {
        let mut root = Node::new_container();
        let mut inner = Node::new_container();
        inner.put_child("port", Node::Leaf { value: ConfigValue::Int(8080), timestamp: 1 });
        root.put_child("service", inner);

        let found = root.lookup(&["service".to_string(), "port".to_string()]);
        assert_eq!(found.unwrap().leaf_value(), Some(&ConfigValue::Int(8080)));
    }
}
