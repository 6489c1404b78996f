//! Process resource attributes reported with every span batch.

use crate::attr::Attrs;
use std::env;

pub const DEPLOY_ARCH: &str = "deploy.arch";
pub const DEPLOY_HOST: &str = "deploy.host";
pub const DEPLOY_PID: &str = "deploy.pid";
pub const SERVICE_NAME: &str = "service.name";
pub const SERVICE_VERSION: &str = "service.version";

/// Detects the resource of the current process.
///
/// The host name comes from `HOSTNAME` (or `COMPUTERNAME`) and is omitted
/// when neither is set.
pub fn detect(service_name: &str, service_version: &str) -> Attrs {
    let mut attrs = Attrs::new();
    attrs
        .set(DEPLOY_ARCH, format!("{}/{}", env::consts::OS, env::consts::ARCH))
        .set(DEPLOY_PID, std::process::id())
        .set(SERVICE_NAME, service_name)
        .set(SERVICE_VERSION, service_version);

    if let Some(host) = hostname() {
        attrs.set(DEPLOY_HOST, host);
    }
    attrs
}

fn hostname() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .filter_map(|key| env::var(key).ok())
        .find(|host| !host.is_empty())
}
