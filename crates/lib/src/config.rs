//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.texbot/config.json`) and environment.
//! The bot token is the only secret and is normally supplied via `DISCORD_TOKEN`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Discord connection settings.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Command prefix and command tokens.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// LaTeX toolchain and artifact directory.
    #[serde(default)]
    pub render: RenderConfig,

    /// Log file location.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discord gateway and REST endpoints plus the bot token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token. Overridden by DISCORD_TOKEN env when set.
    pub bot_token: Option<String>,

    /// REST API base (default "https://discord.com/api/v10").
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Gateway WebSocket URL (default "wss://gateway.discord.gg/?v=10&encoding=json").
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Activity name shown in the bot's presence.
    #[serde(default = "default_activity")]
    pub activity: String,
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_activity() -> String {
    "$Typesetting Time$".to_string()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
            activity: default_activity(),
        }
    }
}

/// Trigger syntax: `<prefix><command>`, e.g. `tex!c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Single-letter token for the render command.
    #[serde(default = "default_render_command")]
    pub render: char,

    /// Single-letter token for the version command.
    #[serde(default = "default_version_command")]
    pub version: char,
}

fn default_prefix() -> String {
    "tex!".to_string()
}

fn default_render_command() -> char {
    'c'
}

fn default_version_command() -> char {
    'v'
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            render: default_render_command(),
            version: default_version_command(),
        }
    }
}

/// LaTeX toolchain binaries, output resolution and the artifact working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Working directory for generated images (default ~/.texbot/renders). Created on first use.
    pub work_dir: Option<PathBuf>,

    #[serde(default = "default_latex_bin")]
    pub latex_bin: String,

    #[serde(default = "default_dvipng_bin")]
    pub dvipng_bin: String,

    /// Output resolution passed to dvipng (-D).
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Background passed to dvipng (-bg), e.g. "White" or "Transparent".
    #[serde(default = "default_background")]
    pub background: String,

    /// Keep rendered images after they were sent. Default: delete after delivery.
    #[serde(default)]
    pub keep_artifacts: bool,
}

fn default_latex_bin() -> String {
    "latex".to_string()
}

fn default_dvipng_bin() -> String {
    "dvipng".to_string()
}

fn default_dpi() -> u32 {
    300
}

fn default_background() -> String {
    "White".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            latex_bin: default_latex_bin(),
            dvipng_bin: default_dvipng_bin(),
            dpi: default_dpi(),
            background: default_background(),
            keep_artifacts: false,
        }
    }
}

/// Log file directory; relative paths are resolved against the current directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
        }
    }
}

/// Load `KEY=value` pairs from a `.env` file into the process environment, so DISCORD_TOKEN
/// can live next to the bot. Variables that are already set win. Without `path`, `.env` is
/// searched from the current directory upwards. Returns the file that was read, if any.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p).map(|()| p.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(p) => Ok(Some(p)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e).context("reading .env file"),
    }
}

/// Resolve the Discord bot token: env DISCORD_TOKEN overrides config.
pub fn resolve_discord_token(config: &Config) -> Option<String> {
    std::env::var("DISCORD_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .discord
                .bot_token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("TEXBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".texbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve the artifact working directory. Relative `render.workDir` is resolved against the
/// config file's parent; when unset, the `renders` subdirectory next to the config file is used.
pub fn resolve_work_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.render.work_dir {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => config_parent.join("renders"),
    }
}

/// Load config from the given path (or the default path). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_trigger_syntax() {
        let c = Config::default();
        assert_eq!(c.commands.prefix, "tex!");
        assert_eq!(c.commands.render, 'c');
        assert_eq!(c.commands.version, 'v');
        assert_eq!(c.render.dpi, 300);
        assert!(!c.render.keep_artifacts);
    }

    #[test]
    fn empty_json_object_uses_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.discord.api_base, "https://discord.com/api/v10");
        assert_eq!(c.render.latex_bin, "latex");
        assert_eq!(c.logging.directory, PathBuf::from("logs"));
    }

    #[test]
    fn camel_case_keys_parse() {
        let c: Config = serde_json::from_str(
            r#"{"commands":{"prefix":"!"},"render":{"workDir":"out","keepArtifacts":true,"dpi":200}}"#,
        )
        .unwrap();
        assert_eq!(c.commands.prefix, "!");
        assert_eq!(c.commands.render, 'c');
        assert!(c.render.keep_artifacts);
        assert_eq!(c.render.dpi, 200);
        assert_eq!(c.render.work_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn resolve_work_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.texbot/config.json");
        assert_eq!(
            resolve_work_dir(&config, path),
            PathBuf::from("/home/user/.texbot/renders")
        );
    }

    #[test]
    fn resolve_work_dir_override_relative() {
        let mut config = Config::default();
        config.render.work_dir = Some(PathBuf::from("custom/out"));
        let path = Path::new("/home/user/.texbot/config.json");
        assert_eq!(
            resolve_work_dir(&config, path),
            PathBuf::from("/home/user/.texbot/custom/out")
        );
    }

    #[test]
    fn resolve_work_dir_override_absolute() {
        let mut config = Config::default();
        config.render.work_dir = Some(PathBuf::from("/srv/renders"));
        let path = Path::new("/home/user/.texbot/config.json");
        assert_eq!(
            resolve_work_dir(&config, path),
            PathBuf::from("/srv/renders")
        );
    }

    #[test]
    fn env_file_sets_missing_variables_only() {
        let dir = std::env::temp_dir().join(format!("texbot-env-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        std::fs::write(
            &path,
            "TEXBOT_ENV_FILE_TOKEN=from-file\nTEXBOT_ENV_FILE_PRESET=from-file\n",
        )
        .unwrap();
        std::env::set_var("TEXBOT_ENV_FILE_PRESET", "from-env");

        let used = load_env_file(Some(&path)).unwrap();
        assert_eq!(used, Some(path.clone()));
        assert_eq!(std::env::var("TEXBOT_ENV_FILE_TOKEN").unwrap(), "from-file");
        assert_eq!(std::env::var("TEXBOT_ENV_FILE_PRESET").unwrap(), "from-env");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let path = std::env::temp_dir()
            .join(format!("texbot-env-{}", uuid::Uuid::new_v4()))
            .join(".env");
        assert_eq!(load_env_file(Some(&path)).unwrap(), None);
    }

    #[test]
    fn load_config_missing_file_is_default() {
        let path = std::env::temp_dir()
            .join(format!("texbot-missing-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.commands.prefix, "tex!");
    }
}
