use std::fs;

const LOOPBACK: &str = "127.0.0.1";

/// Host on which a container's published ports are reachable.
///
/// An explicit override always wins. Natively on Linux the network gateway
/// routes to published ports; Docker Desktop and WSL only expose them on
/// loopback.
pub fn resolve_host(host_override: Option<&str>, gateway: Option<&str>) -> String {
    select_host(
        host_override,
        gateway,
        cfg!(target_os = "linux") && !is_wsl(),
    )
}

fn select_host(host_override: Option<&str>, gateway: Option<&str>, native_linux: bool) -> String {
    if let Some(host) = host_override.filter(|host| !host.is_empty()) {
        return host.to_owned();
    }

    match gateway.filter(|gateway| !gateway.is_empty()) {
        Some(gateway) if native_linux => gateway.to_owned(),
        _ => LOOPBACK.to_owned(),
    }
}

/// True when running under the Windows Subsystem for Linux.
pub fn is_wsl() -> bool {
    fs::read_to_string("/proc/version")
        .is_ok_and(|version| version.to_ascii_lowercase().contains("microsoft"))
}
