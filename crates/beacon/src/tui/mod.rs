pub mod conversation;
pub mod core;
pub mod editor;
pub mod modal;
pub mod resource_config;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod view;

use std::time::Duration;

use beacon_core::paths::BeaconPaths;

pub use self::core::Settings;

pub async fn run(
    paths: &BeaconPaths,
    settings: Settings,
    request_timeout: Duration,
) -> anyhow::Result<()> {
    tracing::info!(server_url = %settings.server_url, "starting tui");
    runtime::run(paths, settings, request_timeout).await
}
