// Server lifecycle API (feature-gated). Non-API builds get no-op stubs.
#[cfg(feature = "api")]
pub mod server;

#[cfg(not(feature = "api"))]
pub mod server {
    use crate::persistence::gateway::SharedStore;
    use crate::persistence::settings::AppSettings;

    pub fn start_server(_cfg: &AppSettings, _store: SharedStore) -> anyhow::Result<()> { Ok(()) }
    pub fn stop_server() {}
    pub fn is_running() -> bool { false }
    pub fn run_blocking(_cfg: &AppSettings, _store: SharedStore) -> anyhow::Result<()> {
        anyhow::bail!("built without the `api` feature")
    }
}
