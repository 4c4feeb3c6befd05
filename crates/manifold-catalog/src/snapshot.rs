use std::sync::Arc;

/// Identity of one tool on one upstream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ToolKey {
    pub upstream: String,
    pub tool: String,
}

impl ToolKey {
    pub fn new(upstream: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            tool: tool.into(),
        }
    }
}

impl std::fmt::Display for ToolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.upstream, self.tool)
    }
}

/// One tool after the per-tool overlay has been applied
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveTool {
    /// Upstream this tool belongs to
    pub upstream: String,
    /// Tool name as reported by the upstream
    pub name: String,
    /// Overlaid description (operator override wins over the reported one)
    pub description: String,
    /// JSON schema for the tool input
    pub input_schema: serde_json::Value,
    /// Overlay verdict; disabled tools stay in the catalog but are invisible
    /// to routing and the vector index
    pub enabled: bool,
}

impl EffectiveTool {
    pub fn key(&self) -> ToolKey {
        ToolKey::new(self.upstream.clone(), self.name.clone())
    }

    /// Text embedded for similarity search
    ///
    /// Uses the overlaid description so vector search reflects operator
    /// intent.
    pub fn embed_text(&self) -> String {
        let schema = serde_json::to_string(&self.input_schema).unwrap_or_default();
        format!("{}\n{}\n{}", self.name, self.description, schema)
    }
}

/// Immutable view of the whole catalog at one version
///
/// Tools are ordered by `(upstream, tool)` so list outputs are stable.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    version: u64,
    tools: Arc<Vec<EffectiveTool>>,
}

impl CatalogSnapshot {
    /// Build a snapshot from a `(upstream, tool)`-sorted list
    ///
    /// The reconciliation task is the only production caller; tests build
    /// snapshots directly.
    pub fn new(version: u64, tools: Vec<EffectiveTool>) -> Self {
        debug_assert!(tools
            .windows(2)
            .all(|w| (&w[0].upstream, &w[0].name) < (&w[1].upstream, &w[1].name)));
        Self {
            version,
            tools: Arc::new(tools),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// All tools, disabled ones included
    pub fn tools(&self) -> &[EffectiveTool] {
        &self.tools
    }

    /// Enabled tools only
    pub fn enabled_tools(&self) -> impl Iterator<Item = &EffectiveTool> {
        self.tools.iter().filter(|t| t.enabled)
    }

    /// Tools belonging to one upstream
    pub fn by_upstream<'a>(&'a self, upstream: &'a str) -> impl Iterator<Item = &'a EffectiveTool> {
        self.tools.iter().filter(move |t| t.upstream == upstream)
    }

    /// Look up one tool by its key
    pub fn get(&self, upstream: &str, tool: &str) -> Option<&EffectiveTool> {
        self.tools
            .binary_search_by(|t| {
                (t.upstream.as_str(), t.name.as_str()).cmp(&(upstream, tool))
            })
            .ok()
            .map(|i| &self.tools[i])
    }

    /// Whether the key names a currently enabled tool
    pub fn contains_enabled(&self, upstream: &str, tool: &str) -> bool {
        self.get(upstream, tool).is_some_and(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(upstream: &str, name: &str, enabled: bool) -> EffectiveTool {
        EffectiveTool {
            upstream: upstream.to_string(),
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: serde_json::json!({"type": "object"}),
            enabled,
        }
    }

    #[test]
    fn lookup_finds_tools_in_sorted_snapshot() {
        let snap = CatalogSnapshot::new(
            3,
            vec![tool("a", "ping", true), tool("b", "mail", false), tool("b", "ping", true)],
        );
        assert_eq!(snap.version(), 3);
        assert!(snap.get("a", "ping").is_some());
        assert!(snap.get("b", "mail").is_some());
        assert!(snap.get("c", "ping").is_none());
        assert!(snap.contains_enabled("a", "ping"));
        assert!(!snap.contains_enabled("b", "mail"));
    }

    #[test]
    fn embed_text_carries_name_description_schema() {
        let t = tool("a", "weather", true);
        let text = t.embed_text();
        assert!(text.contains("weather"));
        assert!(text.contains("weather tool"));
        assert!(text.contains("object"));
    }
}
