use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use url::Url;

use crate::{link::parse_base_url, token::DEFAULT_TTL_HOURS};

pub const CONFIG_FILE_NAME: &str = "invite-issuer.toml";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";

/// Longest invite lifetime accepted, one year.
pub const MAX_TTL_HOURS: i64 = 24 * 365;

pub const ENV_BASE_URL: &str = "FRONTEND_URL";
pub const ENV_DATA_DIR: &str = "INVITE_DATA_DIR";

// What can be written in invite-issuer.toml. Every key is optional.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ConfigFile {
    pub data_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub ttl_hours: Option<i64>,
}

/// Values given on the command line, which win over everything else.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub base_url: Option<String>,
    pub ttl_hours: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct IssuerConfig {
    pub data_dir: PathBuf,
    pub base_url: Url,
    pub ttl: chrono::Duration,
}

impl IssuerConfig {
    pub fn ttl_hours(&self) -> i64 {
        self.ttl.num_hours()
    }
}

/// Reads a TOML config file. A missing file is only an error when the
/// operator asked for it by path.
pub fn read_config_file(path: &Path, required: bool) -> Result<ConfigFile> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound && !required => {
            return Ok(ConfigFile::default())
        }
        Err(e) => return Err(e).context(format!("Can't read config file {:?}", path)),
    };

    let file: ConfigFile = toml::from_str(raw.as_str()).map_err(|e| {
        anyhow!(
            "Failed to parse {:?} as TOML. Got error: '{}'",
            path,
            e.to_string()
        )
    })?;

    Ok(file)
}

/// Layers defaults, the config file, the environment and the command line,
/// in that order.
pub fn resolve_config(
    file: ConfigFile,
    env_var: impl Fn(&str) -> Option<String>,
    overrides: Overrides,
) -> Result<IssuerConfig> {
    let data_dir = overrides
        .data_dir
        .or_else(|| env_var(ENV_DATA_DIR).map(PathBuf::from))
        .or(file.data_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let base_url = parse_base_url(
        &overrides
            .base_url
            .or_else(|| env_var(ENV_BASE_URL))
            .or(file.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    )?;

    let ttl = match overrides.ttl_hours.or(file.ttl_hours) {
        Some(hours) if hours <= 0 || hours > MAX_TTL_HOURS => {
            return Err(anyhow!(
                "ttl_hours must be between 1 and {} hours, got {}",
                MAX_TTL_HOURS,
                hours
            ))
        }
        Some(hours) => chrono::Duration::hours(hours),
        None => chrono::Duration::hours(DEFAULT_TTL_HOURS),
    };

    Ok(IssuerConfig {
        data_dir,
        base_url,
        ttl,
    })
}

/// Builds the config for this process: `config_path` if given, otherwise
/// `invite-issuer.toml` in the working directory when it exists.
pub fn load_config(config_path: Option<PathBuf>, overrides: Overrides) -> Result<IssuerConfig> {
    let file = match config_path {
        Some(path) => read_config_file(&path, true)?,
        None => read_config_file(
            &env::current_dir()
                .context("Failed to read current dir")?
                .join(CONFIG_FILE_NAME),
            false,
        )?,
    };

    resolve_config(file, |key| env::var(key).ok(), overrides)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs, path::PathBuf};

    use anyhow::Context;
    use tempdir::TempDir;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_match_parameterless_run() {
        let c = resolve_config(ConfigFile::default(), no_env, Overrides::default()).unwrap();

        assert_eq!(c.data_dir, PathBuf::from("data"));
        assert_eq!(c.base_url.as_str(), "http://localhost:5173/");
        assert_eq!(c.ttl_hours(), 72);
    }

    #[test]
    fn test_precedence_cli_then_env_then_file() {
        let file = ConfigFile {
            data_dir: Some(PathBuf::from("from-file")),
            base_url: Some("https://file.example.com".to_string()),
            ttl_hours: Some(24),
        };
        let env: HashMap<&str, &str> = vec![
            (ENV_BASE_URL, "https://env.example.com"),
            (ENV_DATA_DIR, "from-env"),
        ]
        .into_iter()
        .collect();
        let env_var = |k: &str| env.get(k).map(|v| v.to_string());

        let c = resolve_config(file.clone(), &env_var, Overrides::default()).unwrap();
        assert_eq!(c.data_dir, PathBuf::from("from-env"));
        assert_eq!(c.base_url.host_str(), Some("env.example.com"));
        assert_eq!(c.ttl_hours(), 24);

        let c = resolve_config(
            file,
            &env_var,
            Overrides {
                data_dir: Some(PathBuf::from("from-cli")),
                base_url: Some("https://cli.example.com".to_string()),
                ttl_hours: Some(1),
            },
        )
        .unwrap();
        assert_eq!(c.data_dir, PathBuf::from("from-cli"));
        assert_eq!(c.base_url.host_str(), Some("cli.example.com"));
        assert_eq!(c.ttl_hours(), 1);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_ttl = Overrides {
            ttl_hours: Some(0),
            ..Overrides::default()
        };
        assert!(resolve_config(ConfigFile::default(), no_env, bad_ttl).is_err());

        let huge_ttl = Overrides {
            ttl_hours: Some(3_000_000_000_000),
            ..Overrides::default()
        };
        assert!(resolve_config(ConfigFile::default(), no_env, huge_ttl).is_err());

        let from_file = ConfigFile {
            ttl_hours: Some(MAX_TTL_HOURS + 1),
            ..ConfigFile::default()
        };
        assert!(resolve_config(from_file, no_env, Overrides::default()).is_err());

        let a_year = Overrides {
            ttl_hours: Some(MAX_TTL_HOURS),
            ..Overrides::default()
        };
        assert_eq!(
            resolve_config(ConfigFile::default(), no_env, a_year)
                .unwrap()
                .ttl_hours(),
            MAX_TTL_HOURS
        );

        let bad_url = Overrides {
            base_url: Some("not a url".to_string()),
            ..Overrides::default()
        };
        assert!(resolve_config(ConfigFile::default(), no_env, bad_url).is_err());
    }

    #[test]
    fn test_read_config_file() {
        let tmp = TempDir::new(".invite-issuer")
            .context("Can't create a tmp dir")
            .unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);

        let absent = read_config_file(&path, false).unwrap();
        assert!(absent.base_url.is_none());
        assert!(read_config_file(&path, true).is_err());

        fs::write(&path, "base_url = \"https://agency.example.com\"\nttl_hours = 48\n").unwrap();
        let present = read_config_file(&path, true).unwrap();
        assert_eq!(present.base_url.as_deref(), Some("https://agency.example.com"));
        assert_eq!(present.ttl_hours, Some(48));
        assert!(present.data_dir.is_none());

        fs::write(&path, "ttl_hours = \"soon\"").unwrap();
        assert!(read_config_file(&path, false).is_err());
    }
}
