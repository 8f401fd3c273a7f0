use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// How long a login session stays valid.
pub const SESSION_LIFETIME_DAYS: i64 = 7;

/// How often a mounted presence hook refreshes its row.
pub const PRESENCE_HEARTBEAT: Duration = Duration::from_secs(30);

/// Presence rows not refreshed within this window count as gone.
pub const PRESENCE_FRESHNESS: Duration = Duration::from_secs(60);

/// How often location monitoring re-checks the device position.
pub const LOCATION_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Collaborator avatars shown before collapsing the rest into a count.
pub const MAX_VISIBLE_AVATARS: usize = 5;

pub const DEFAULT_LIST_COLOR: &str = "#6366f1";
pub const DEFAULT_LIST_ICON: &str = "list";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub base_path: String,
    pub attachments_dir: PathBuf,
    /// Presence rows older than this are treated as gone.
    pub presence_ttl: Duration,
    pub proximity_radius_m: f64,
    pub seed: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = lookup("COLIST_PORT").ok_or(ConfigError::Missing("COLIST_PORT"))?;
        let port = parse("COLIST_PORT", port)?;

        let base_path = lookup("COLIST_BASE_PATH")
            .map(|path| normalize_base_path(&path))
            .unwrap_or_default();

        let presence_ttl = match lookup("COLIST_PRESENCE_TTL_SECS") {
            Some(secs) => Duration::from_secs(parse("COLIST_PRESENCE_TTL_SECS", secs)?),
            None => PRESENCE_FRESHNESS,
        };

        let proximity_radius_m = match lookup("COLIST_PROXIMITY_RADIUS_M") {
            Some(radius) => {
                let radius: f64 = parse("COLIST_PROXIMITY_RADIUS_M", radius.clone())?;
                if radius.is_nan() || radius <= 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "COLIST_PROXIMITY_RADIUS_M",
                        value: radius.to_string(),
                    });
                }
                radius
            }
            None => 200.0,
        };

        let seed = lookup("COLIST_SEED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            port,
            db_path: lookup("COLIST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("colist.db")),
            base_path,
            attachments_dir: lookup("COLIST_ATTACHMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("attachments")),
            presence_ttl,
            proximity_radius_m,
            seed,
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

/// `"app/"` and `"/app"` both become `"/app"`; `"/"` becomes empty.
fn normalize_base_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
