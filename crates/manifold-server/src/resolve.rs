use std::collections::BTreeSet;

use manifold_config::Settings;
use manifold_core::Principal;

use crate::error::HubError;
use crate::scope::Scope;

/// Which of an upstream's tools a scope exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFilter {
    All,
    Selected(BTreeSet<String>),
}

impl ToolFilter {
    pub fn allows(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Selected(names) => names.contains(tool),
        }
    }
}

/// One reachable upstream with its allowed tool set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub upstream: String,
    pub filter: ToolFilter,
}

/// Resolver output: the ordered reachable upstreams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub routes: Vec<Route>,
    pub is_smart: bool,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn route_for(&self, upstream: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.upstream == upstream)
    }

    /// Whether the scope exposes this `(upstream, tool)` pair
    pub fn allows(&self, upstream: &str, tool: &str) -> bool {
        self.route_for(upstream)
            .is_some_and(|route| route.filter.allows(tool))
    }
}

/// Resolve a scope and principal against a settings snapshot
///
/// Pure and deterministic: upstream order follows the settings table, group
/// member order follows the group definition. Tool selection for the smart
/// scope happens at call time in the vector index, not here.
///
/// # Errors
///
/// `Unauthorized` when the global scope is restricted to admins
pub fn resolve(
    scope: &Scope,
    principal: &Principal,
    settings: &Settings,
) -> Result<Resolution, HubError> {
    match scope {
        Scope::Upstream(name) => {
            let visible = settings.upstreams.get(name).is_some_and(|spec| {
                spec.enabled && principal.can_see(spec.owner.as_deref())
            });
            Ok(Resolution {
                routes: if visible {
                    vec![Route {
                        upstream: name.clone(),
                        filter: ToolFilter::All,
                    }]
                } else {
                    Vec::new()
                },
                is_smart: false,
            })
        }

        Scope::Group(key) => {
            let Some(group) = settings.find_group(key) else {
                return Ok(Resolution::default());
            };
            if !principal.can_see(group.owner.as_deref()) {
                return Ok(Resolution::default());
            }

            let routes = group
                .servers
                .iter()
                .filter(|server| {
                    settings.upstreams.get(&server.upstream).is_some_and(|spec| {
                        spec.enabled && principal.can_see(spec.owner.as_deref())
                    })
                })
                .map(|server| Route {
                    upstream: server.upstream.clone(),
                    filter: server
                        .selected_tools
                        .clone()
                        .map_or(ToolFilter::All, ToolFilter::Selected),
                })
                .collect();

            Ok(Resolution {
                routes,
                is_smart: false,
            })
        }

        Scope::Global => {
            if !settings.routing.allow_global && !principal.is_admin {
                return Err(HubError::Unauthorized(
                    "global scope is restricted to admins".to_string(),
                ));
            }
            Ok(Resolution {
                routes: visible_upstreams(settings, principal),
                is_smart: false,
            })
        }

        Scope::Smart => {
            if !settings.smart_routing.enabled {
                return Ok(Resolution::default());
            }
            Ok(Resolution {
                routes: visible_upstreams(settings, principal),
                is_smart: true,
            })
        }
    }
}

fn visible_upstreams(settings: &Settings, principal: &Principal) -> Vec<Route> {
    settings
        .upstreams
        .iter()
        .filter(|(_, spec)| spec.enabled && principal.can_see(spec.owner.as_deref()))
        .map(|(name, _)| Route {
            upstream: name.clone(),
            filter: ToolFilter::All,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        toml::from_str(
            r#"
            [upstreams.alpha]
            transport = "stdio"
            command = "/bin/cat"

            [upstreams.beta]
            transport = "stdio"
            command = "/bin/cat"
            owner = "alice"

            [upstreams.gamma]
            transport = "stdio"
            command = "/bin/cat"
            enabled = false

            [[groups]]
            name = "ops"
            [[groups.servers]]
            upstream = "alpha"
            selected_tools = ["ping"]
            [[groups.servers]]
            upstream = "gamma"

            [[groups]]
            name = "private"
            owner = "alice"
            [[groups.servers]]
            upstream = "alpha"
            "#,
        )
        .unwrap()
    }

    fn admin() -> Principal {
        Principal::anonymous()
    }

    #[test]
    fn upstream_scope_is_singleton() {
        let resolution = resolve(
            &Scope::Upstream("alpha".to_string()),
            &admin(),
            &settings(),
        )
        .unwrap();
        assert_eq!(resolution.routes.len(), 1);
        assert_eq!(resolution.routes[0].filter, ToolFilter::All);
        assert!(!resolution.is_smart);
    }

    #[test]
    fn disabled_upstream_resolves_empty() {
        let resolution = resolve(
            &Scope::Upstream("gamma".to_string()),
            &admin(),
            &settings(),
        )
        .unwrap();
        assert!(resolution.is_empty());
    }

    #[test]
    fn owned_upstream_invisible_to_others() {
        let resolution = resolve(
            &Scope::Upstream("beta".to_string()),
            &Principal::named("bob"),
            &settings(),
        )
        .unwrap();
        assert!(resolution.is_empty());

        let own = resolve(
            &Scope::Upstream("beta".to_string()),
            &Principal::named("alice"),
            &settings(),
        )
        .unwrap();
        assert_eq!(own.routes.len(), 1);
    }

    #[test]
    fn group_scope_skips_disabled_members_and_keeps_allowlist() {
        let resolution =
            resolve(&Scope::Group("ops".to_string()), &admin(), &settings()).unwrap();
        assert_eq!(resolution.routes.len(), 1);
        assert_eq!(resolution.routes[0].upstream, "alpha");
        assert!(resolution.allows("alpha", "ping"));
        assert!(!resolution.allows("alpha", "nuke"));
    }

    #[test]
    fn owned_group_invisible_to_others() {
        let resolution = resolve(
            &Scope::Group("private".to_string()),
            &Principal::named("bob"),
            &settings(),
        )
        .unwrap();
        assert!(resolution.is_empty());
    }

    #[test]
    fn unknown_group_resolves_empty() {
        let resolution =
            resolve(&Scope::Group("nope".to_string()), &admin(), &settings()).unwrap();
        assert!(resolution.is_empty());
    }

    #[test]
    fn global_scope_lists_visible_enabled_upstreams() {
        let resolution = resolve(&Scope::Global, &Principal::named("bob"), &settings()).unwrap();
        let names: Vec<&str> = resolution.routes.iter().map(|r| r.upstream.as_str()).collect();
        assert_eq!(names, vec!["alpha"]);

        let all = resolve(&Scope::Global, &admin(), &settings()).unwrap();
        let names: Vec<&str> = all.routes.iter().map(|r| r.upstream.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn restricted_global_rejects_non_admins() {
        let mut settings = settings();
        settings.routing.allow_global = false;

        let err = resolve(&Scope::Global, &Principal::named("bob"), &settings).unwrap_err();
        assert!(matches!(err, HubError::Unauthorized(_)));

        assert!(resolve(&Scope::Global, &admin(), &settings).is_ok());
    }

    #[test]
    fn smart_scope_requires_flag() {
        let mut enabled = settings();
        enabled.smart_routing.enabled = true;

        let resolution = resolve(&Scope::Smart, &admin(), &enabled).unwrap();
        assert!(resolution.is_smart);
        assert_eq!(resolution.routes.len(), 2);

        let disabled = resolve(&Scope::Smart, &admin(), &settings()).unwrap();
        assert!(disabled.is_empty());
        assert!(!disabled.is_smart);
    }

    #[test]
    fn resolver_is_deterministic() {
        let a = resolve(&Scope::Global, &admin(), &settings()).unwrap();
        let b = resolve(&Scope::Global, &admin(), &settings()).unwrap();
        assert_eq!(a, b);
    }
}
