use crate::Settings;

/// What changed between two settings snapshots
///
/// Upstream names land in exactly one bucket. Every subscriber observes the
/// same sequence of diffs, in mutation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDiff {
    /// Newly declared or re-enabled upstreams
    pub added_upstreams: Vec<String>,
    /// Removed or disabled upstreams
    pub removed_upstreams: Vec<String>,
    /// Connection-relevant edits: close the runtime, then re-create it
    pub recreated_upstreams: Vec<String>,
    /// Tool-overlay or ownership edits: re-project without a restart
    pub overlay_upstreams: Vec<String>,
    /// Group membership or allowlists changed
    pub groups_changed: bool,
    /// System flags (routing, smart routing, timeouts) changed
    pub flags_changed: bool,
}

impl SettingsDiff {
    /// True when the mutation was a no-op
    pub fn is_empty(&self) -> bool {
        self.added_upstreams.is_empty()
            && self.removed_upstreams.is_empty()
            && self.recreated_upstreams.is_empty()
            && self.overlay_upstreams.is_empty()
            && !self.groups_changed
            && !self.flags_changed
    }
}

/// Compute the reconciliation diff between two settings snapshots
pub fn diff(old: &Settings, new: &Settings) -> SettingsDiff {
    let mut out = SettingsDiff::default();

    for (name, new_spec) in &new.upstreams {
        match old.upstreams.get(name) {
            None => {
                if new_spec.enabled {
                    out.added_upstreams.push(name.clone());
                }
            }
            Some(old_spec) => match (old_spec.enabled, new_spec.enabled) {
                (false, true) => out.added_upstreams.push(name.clone()),
                (true, false) => out.removed_upstreams.push(name.clone()),
                (false, false) => {}
                (true, true) => {
                    if !old_spec.connection_eq(new_spec) {
                        out.recreated_upstreams.push(name.clone());
                    } else if !old_spec.overlay_eq(new_spec) {
                        out.overlay_upstreams.push(name.clone());
                    }
                }
            },
        }
    }

    for (name, old_spec) in &old.upstreams {
        if old_spec.enabled && !new.upstreams.contains_key(name) {
            out.removed_upstreams.push(name.clone());
        }
    }

    out.groups_changed = old.groups != new.groups;
    out.flags_changed = flags_eq(old, new).is_err();

    out
}

/// Compare everything outside the upstream table and groups
///
/// Returns which flag differs, for logging.
fn flags_eq(old: &Settings, new: &Settings) -> Result<(), &'static str> {
    use secrecy::ExposeSecret;

    if old.keep_alive_interval != new.keep_alive_interval {
        return Err("keep_alive_interval");
    }
    if old.call_timeout != new.call_timeout {
        return Err("call_timeout");
    }
    if old.idle_session_timeout != new.idle_session_timeout {
        return Err("idle_session_timeout");
    }
    if old.hide_degraded_upstreams_from_list != new.hide_degraded_upstreams_from_list {
        return Err("hide_degraded_upstreams_from_list");
    }
    if old.routing.allow_global != new.routing.allow_global
        || old.routing.default_group != new.routing.default_group
        || old.routing.admins != new.routing.admins
    {
        return Err("routing");
    }

    let (os, ns) = (&old.smart_routing, &new.smart_routing);
    if os.enabled != ns.enabled
        || os.embed_model != ns.embed_model
        || os.api_url != ns.api_url
        || os.vector_path != ns.vector_path
        || os.api_key.as_ref().map(ExposeSecret::expose_secret)
            != ns.api_key.as_ref().map(ExposeSecret::expose_secret)
    {
        return Err("smart_routing");
    }

    Ok(())
}
