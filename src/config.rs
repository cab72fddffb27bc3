use crate::git::{Credentials, DEFAULT_BRANCH};
use crate::identity::{GitHubUser, IdentityConfig, ManualUser};

use anyhow::{Context, Result};
use git2::Config as GitConfig;
use keyring::Entry;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PREFIX: &str = "shark";
pub const KEYRING_SERVICE: &str = "shark";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Get a configuration value with layered priority: env var > local git config > global git config
fn get_layered_value(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    env_var: Option<&str>,
    local_config: Option<&GitConfig>,
    global_config: Option<&GitConfig>,
) -> Option<String> {
    if let Some(val) = env_var.and_then(env) {
        return Some(val);
    }
    if let Some(val) = local_config.and_then(|local| read_string(local, key)) {
        return Some(val);
    }
    global_config.and_then(|global| read_string(global, key))
}

// `get_string` refuses live (non-snapshot) configs, entries do not.
fn read_string(config: &GitConfig, key: &str) -> Option<String> {
    let entry = config.get_entry(key).ok()?;
    entry.value().map(str::to_string)
}

fn get_layered_bool(
    key: &str,
    local_config: Option<&GitConfig>,
    global_config: Option<&GitConfig>,
) -> Option<bool> {
    local_config
        .and_then(|local| local.get_bool(key).ok())
        .or_else(|| global_config.and_then(|global| global.get_bool(key).ok()))
}

/// Engine settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Initial branch of repositories created with `init`
    pub default_branch: String,
    /// Per-operation deadline in seconds
    pub timeout_secs: u64,
    pub identity: IdentityConfig,
    /// Username offered to HTTPS and SSH remotes
    pub username: Option<String>,
    /// HTTPS token; never written to git config
    #[serde(skip)]
    pub token: Option<String>,
    pub ssh_key: Option<PathBuf>,
    /// Location of the repository registry file
    pub registry_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            identity: IdentityConfig::default(),
            username: None,
            token: None,
            ssh_key: None,
            registry_path: None,
        }
    }
}

fn key(name: &str) -> String {
    format!("{CONFIG_PREFIX}.{name}")
}

impl Config {
    /// Load the configuration with layered priority: env > local git > global git
    ///
    /// The token falls back to the OS keyring when `SHARK_GIT_TOKEN` is unset.
    pub fn load() -> Result<Self> {
        let global_config = GitConfig::open_default().ok();
        let local_config = git2::Repository::discover(".")
            .ok()
            .and_then(|repo| repo.config().ok());

        let mut config = Self::from_sources(
            &|var| std::env::var(var).ok(),
            local_config.as_ref(),
            global_config.as_ref(),
        )?;
        if config.token.is_none() {
            if let Some(username) = config.username.clone() {
                config.token = load_token(&username);
            }
        }
        debug!("Configuration loaded: {config:?}");
        Ok(config)
    }

    /// Builds a configuration from explicit sources.
    pub fn from_sources(
        env: &dyn Fn(&str) -> Option<String>,
        local: Option<&GitConfig>,
        global: Option<&GitConfig>,
    ) -> Result<Self> {
        let value = |name: &str, env_var: Option<&str>| {
            get_layered_value(env, &key(name), env_var, local, global)
        };

        let default_branch = value("defaultbranch", Some("SHARK_DEFAULT_BRANCH"))
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let timeout_secs = match value("timeout", Some("SHARK_TIMEOUT")) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid timeout '{raw}', expected whole seconds"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let github_user = match (value("github-name", None), value("github-email", None)) {
            (Some(name), Some(email)) => Some(GitHubUser {
                name,
                email,
                avatar_url: value("github-avatar", None).unwrap_or_default(),
            }),
            _ => None,
        };
        let manual_user = match (value("manual-name", None), value("manual-email", None)) {
            (Some(name), Some(email)) => Some(ManualUser { name, email }),
            _ => None,
        };
        let use_github = get_layered_bool(&key("usegithub"), local, global)
            .unwrap_or(github_user.is_some());

        Ok(Self {
            default_branch,
            timeout_secs,
            identity: IdentityConfig {
                use_github,
                github_user,
                manual_user,
            },
            username: value("username", Some("SHARK_GIT_USERNAME")),
            token: env("SHARK_GIT_TOKEN"),
            ssh_key: value("sshkey", Some("SHARK_SSH_KEY")).map(PathBuf::from),
            registry_path: value("registry", Some("SHARK_REGISTRY")).map(PathBuf::from),
        })
    }

    /// Save the configuration to global git config
    pub fn save(&self) -> Result<()> {
        let mut config = GitConfig::open_default().context("Failed to open global git config")?;
        self.save_to_config(&mut config)?;
        debug!("Configuration saved to global git config");
        Ok(())
    }

    /// Writes every setting except the token under the `shark.` prefix.
    pub fn save_to_config(&self, config: &mut GitConfig) -> Result<()> {
        config.set_str(&key("defaultbranch"), &self.default_branch)?;
        config.set_i64(
            &key("timeout"),
            i64::try_from(self.timeout_secs).context("Timeout exceeds i64 range")?,
        )?;
        config.set_bool(&key("usegithub"), self.identity.use_github)?;

        if let Some(user) = &self.identity.github_user {
            config.set_str(&key("github-name"), &user.name)?;
            config.set_str(&key("github-email"), &user.email)?;
            config.set_str(&key("github-avatar"), &user.avatar_url)?;
        }
        if let Some(user) = &self.identity.manual_user {
            config.set_str(&key("manual-name"), &user.name)?;
            config.set_str(&key("manual-email"), &user.email)?;
        }
        if let Some(username) = &self.username {
            config.set_str(&key("username"), username)?;
        }
        if let Some(ssh_key) = &self.ssh_key {
            config.set_str(&key("sshkey"), &ssh_key.to_string_lossy())?;
        }
        if let Some(registry) = &self.registry_path {
            config.set_str(&key("registry"), &registry.to_string_lossy())?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            token: self.token.clone(),
            ssh_key: self.ssh_key.clone(),
            ssh_passphrase: None,
        }
    }

    pub fn registry_path(&self) -> Option<&Path> {
        self.registry_path.as_deref()
    }
}

/// Reads the HTTPS token stored for `username` in the OS keyring.
pub fn load_token(username: &str) -> Option<String> {
    match Entry::new(KEYRING_SERVICE, username).and_then(|entry| entry.get_password()) {
        Ok(token) => Some(token),
        Err(e) => {
            debug!("No keyring token for {username}: {e}");
            None
        }
    }
}

pub fn store_token(username: &str, token: &str) -> Result<()> {
    Entry::new(KEYRING_SERVICE, username)
        .and_then(|entry| entry.set_password(token))
        .context("Failed to store token in keyring")
}

pub fn delete_token(username: &str) -> Result<()> {
    Entry::new(KEYRING_SERVICE, username)
        .and_then(|entry| entry.delete_credential())
        .context("Failed to delete token from keyring")
}
