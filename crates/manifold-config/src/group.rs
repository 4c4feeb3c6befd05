use std::collections::BTreeSet;

use serde::Deserialize;
use uuid::Uuid;

/// A curated subset of upstreams exposed as one routing scope
///
/// The symbolic `$smart` group is never stored; it is resolved dynamically.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    /// Stable identifier, generated when the settings omit one
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Scope name used in downstream paths
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Member upstreams, at most one entry per upstream name
    #[serde(default)]
    pub servers: Vec<GroupServer>,
    /// Owning principal; ownerless groups are visible to everyone
    #[serde(default)]
    pub owner: Option<String>,
}

/// One group member with an optional tool allowlist
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupServer {
    /// Upstream name this entry references
    pub upstream: String,
    /// When present, only these tools are exposed through the group
    #[serde(default)]
    pub selected_tools: Option<BTreeSet<String>>,
}

impl Group {
    /// The allowlist entry for an upstream, if it is a member
    pub fn server(&self, upstream: &str) -> Option<&GroupServer> {
        self.servers.iter().find(|s| s.upstream == upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generated_when_omitted() {
        let g: Group = toml::from_str(
            r#"
            name = "ops"
            [[servers]]
            upstream = "echo"
            selected_tools = ["ping"]
            "#,
        )
        .unwrap();
        assert_eq!(g.name, "ops");
        assert!(!g.id.is_nil());
        let allow = g.server("echo").unwrap().selected_tools.as_ref().unwrap();
        assert!(allow.contains("ping"));
    }

    #[test]
    fn omitted_allowlist_means_all() {
        let g: Group = toml::from_str(
            r#"
            name = "ops"
            [[servers]]
            upstream = "echo"
            "#,
        )
        .unwrap();
        assert!(g.server("echo").unwrap().selected_tools.is_none());
    }
}
