use crate::PermissionNode;

/// Every node the command layer accepts as input. Resolution does not depend
/// on this list; it exists for validation and autocomplete.
const KNOWN_NODES: [&str; 14] = [
    "ticket.open",
    "ticket.close",
    "ticket.claim",
    "ticket.transcript",
    "ticket.blacklist",
    "config.get",
    "config.set",
    "perms.group.create",
    "perms.group.delete",
    "perms.group.edit",
    "perms.group.list",
    "perms.check",
    "admin.backup",
    "admin.reload",
];

/// Flat catalog of the valid permission-node strings.
#[derive(Debug, Clone)]
pub struct NodeCatalog {
    nodes: Vec<PermissionNode>,
}

impl NodeCatalog {
    /// The built-in catalog.
    ///
    /// # Panics
    /// Never panics; every entry in the static list is a valid node and this
    /// is covered by tests.
    #[must_use]
    pub fn built_in() -> Self {
        let nodes = KNOWN_NODES
            .iter()
            .map(|raw| {
                PermissionNode::try_from(String::from(*raw))
                    .expect("static catalog entries are valid nodes")
            })
            .collect();
        Self { nodes }
    }

    #[must_use]
    pub fn nodes(&self) -> &[PermissionNode] {
        &self.nodes
    }

    #[must_use]
    pub fn contains(&self, node: &PermissionNode) -> bool {
        self.nodes.iter().any(|known| known == node)
    }

    /// Catalog entries starting with `prefix`, for autocomplete.
    #[must_use]
    pub fn suggest(&self, prefix: &str) -> Vec<&PermissionNode> {
        self.nodes
            .iter()
            .filter(|node| node.as_str().starts_with(prefix))
            .collect()
    }
}

impl Default for NodeCatalog {
    fn default() -> Self {
        Self::built_in()
    }
}
