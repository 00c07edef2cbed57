// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

/// Installs the global `tracing` subscriber. `RUST_LOG` wins when set, otherwise `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Reads a boolean-ish flag. Unset or empty means `default`; `0` and the
/// usual spellings of `false` turn it off; anything else, padded values
/// included, turns it on.
pub fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value {
        None | Some("") => default,
        Some("0" | "false" | "False" | "FALSE") => false,
        Some(_) => true,
    }
}

pub fn env_flag(name: &str, default: bool) -> bool {
    let raw = std::env::var(name).ok();
    let on = parse_flag(raw.as_deref(), default);
    tracing::debug!("env {name}={:?} → {on}", raw);
    on
}
