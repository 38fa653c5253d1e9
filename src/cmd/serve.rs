//! HTTP server command: `playctl serve`.

use anyhow::Result;

use playctl::config::ControlConfig;

pub async fn cmd_serve(config: ControlConfig, dev: bool) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }
    playctl::http::start_server(config, dev).await
}
