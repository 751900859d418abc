//! Tracing bootstrap
//!
//! One livegrid process hosts subsystems with very different log
//! economics. The cluster control plane (ring changes, discovery events,
//! session lifecycle) is low-volume and always worth keeping; the chunk
//! decoder and the SFU frame fan-out log per chunk and per frame, which
//! at a single publisher already outvolumes everything else combined.
//! The filter is therefore assembled in three layers: the configured base
//! level, a clamp over the media-path targets unless they are explicitly
//! being traced, and any operator-supplied directives (with `RUST_LOG`
//! merged on top for ad-hoc debugging).

use tracing_subscriber::filter::{Directive, EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogConfig, LogFormat};
use crate::{Error, Result};

/// Targets that emit per-chunk or per-frame events. Clamped to `info`
/// so raising the base level to `debug` does not flood the output with
/// media traffic.
const MEDIA_PATH_TARGETS: &[&str] = &[
    "livegrid_rtmp::chunk",
    "livegrid_rtmp::session",
    "livegrid_sfu::room",
];

/// Install the global subscriber. Fails if the level or a directive does
/// not parse, or if a subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_target(true))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
    }
    .map_err(|e| Error::Configuration(format!("logging init failed: {e}")))
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    // A bare string would also parse as a *target* directive, so the
    // base level is validated as a level on its own.
    let base: LevelFilter = config
        .level
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid log level '{}'", config.level)))?;

    let mut filter = EnvFilter::builder()
        .with_default_directive(base.into())
        .from_env_lossy();

    if !config.trace_media_path {
        for target in MEDIA_PATH_TARGETS {
            filter = filter.add_directive(parse_directive(&format!("{target}=info"))?);
        }
    }
    for directive in &config.directives {
        filter = filter.add_directive(parse_directive(directive)?);
    }

    Ok(filter)
}

fn parse_directive(directive: &str) -> Result<Directive> {
    directive
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid log directive '{directive}'")))
}
