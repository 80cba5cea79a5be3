// src/system/host.rs

//! Host identity facts exposed to definition templates (`${host.os}`,
//! `${host.platform}`, `${host.arch}`). Definitions use the node-style
//! platform vocabulary, so the raw Rust constants are translated here.

/// Friendly operating-system name: `windows`, `linux` or `macos`.
pub fn os_name() -> &'static str {
    std::env::consts::OS
}

/// Node-style platform name: `win32`, `linux` or `darwin`.
pub fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "windows" => "win32",
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture in the definitions' vocabulary: `x64`, `arm64`, `x86`, ...
pub fn arch_name() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "x86" => "x86",
        other => other,
    }
}

/// The `PATH` entry delimiter for this host (`;` on Windows, `:` elsewhere).
pub fn path_delimiter() -> char {
    if cfg!(target_os = "windows") { ';' } else { ':' }
}
