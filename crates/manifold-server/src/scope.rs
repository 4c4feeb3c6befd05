use manifold_config::Settings;

/// Routing target of a downstream session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// All enabled upstreams visible to the principal
    Global,
    /// One named upstream
    Upstream(String),
    /// A stored group, addressed by name or id
    Group(String),
    /// Vector-similarity discovery via the two synthetic tools
    Smart,
}

/// Path literal selecting the smart scope
pub const SMART_SCOPE: &str = "$smart";

impl Scope {
    /// Derive the scope from an optional URL path segment
    ///
    /// An absent segment falls back to `routing.default_group` when set,
    /// else global. An upstream name shadows a group of the same name.
    pub fn parse(segment: Option<&str>, settings: &Settings) -> Self {
        match segment {
            None | Some("") => match &settings.routing.default_group {
                Some(group) => Self::Group(group.clone()),
                None => Self::Global,
            },
            Some(SMART_SCOPE) => Self::Smart,
            Some(name) if settings.upstreams.contains_key(name) => {
                Self::Upstream(name.to_string())
            }
            Some(name) => Self::Group(name.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Upstream(_) => "upstream",
            Self::Group(_) => "group",
            Self::Smart => "smart",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Upstream(name) => write!(f, "upstream:{name}"),
            Self::Group(name) => write!(f, "group:{name}"),
            Self::Smart => f.write_str(SMART_SCOPE),
        }
    }
}
