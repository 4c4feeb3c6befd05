use http::HeaderMap;
use manifold_config::Settings;
use manifold_core::Principal;

/// Header carrying the principal id resolved by the auth collaborator
///
/// The hub does not validate credentials itself; whatever sits in front of
/// it (reverse proxy, auth middleware) establishes identity and forwards
/// the opaque principal id here.
pub const PRINCIPAL_HEADER: &str = "x-manifold-principal";

/// Resolve the request principal
///
/// A leading path segment wins over the header. With neither present the
/// anonymous principal (admin by policy) is used. Admin privilege comes
/// from `routing.admins`.
pub fn principal_from(
    headers: &HeaderMap,
    path_principal: Option<&str>,
    settings: &Settings,
) -> Principal {
    let id = path_principal
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| {
            headers
                .get(PRINCIPAL_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        });

    match id {
        None => Principal::anonymous(),
        Some(id) => Principal {
            is_admin: settings.routing.admins.contains(&id),
            display_name: id.clone(),
            id,
        },
    }
}
