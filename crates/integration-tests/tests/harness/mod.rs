//! Shared test harness: scripted upstreams, a mock embedder, and a hub
//! running on a random port

#![allow(dead_code)]

pub mod fake_upstream;
pub mod mock_embedder;
pub mod server;

use manifold_config::Settings;

/// Settings with stdio upstream declarations for the given names
///
/// The transport parameters are never exercised; the scripted connector
/// intercepts the connect.
pub fn settings_with_upstreams(names: &[&str]) -> Settings {
    let mut raw = String::new();
    for name in names {
        raw.push_str(&format!(
            "[upstreams.{name}]\ntransport = \"stdio\"\ncommand = \"/bin/cat\"\n\n"
        ));
    }
    toml::from_str(&raw).expect("test settings parse")
}
