//! Settings resolution and engine opening.
//!
//! Precedence for every setting: command-line flag, then environment, then
//! the config file, then the built-in default.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use dialoguer::Password;
use secrecy::{ExposeSecret, SecretString};
use stow_core::backend::{ExtensionApi, FileExtension, FileWebStorage, WebStorage};
use stow_core::{
    Host, SecureOptions, SecureStorage, Storage, StorageArea, StorageEngine, StorageOptions,
};
use tracing::debug;

use crate::cli::Cli;
use crate::config::{default_config_path, default_data_dir, load_config, SecuritySection};

pub const PASSWORD_ENV: &str = "STOW_PASSWORD";
pub const NEW_PASSWORD_ENV: &str = "STOW_NEW_PASSWORD";

/// Fully resolved settings for one invocation.
#[derive(Debug)]
pub struct Settings {
    pub dir: PathBuf,
    pub area: StorageArea,
    pub namespace: Option<String>,
    pub secure: bool,
    pub security: SecuritySection,
    pub web_app: bool,
    pub all_copied: bool,
    pub copied_keys: Vec<String>,
    pub interactive: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = match &cli.config {
            Some(path) => PathBuf::from(path),
            None => default_config_path()?,
        };
        let config = load_config(&config_path)?;
        debug!(path = %config_path.display(), "loaded config");

        let dir = match cli.dir.as_ref().or(config.storage.dir.as_ref()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let area = match &cli.area {
            Some(area) => area.parse::<StorageArea>()?,
            None => config.storage.area.unwrap_or_default(),
        };
        let mut copied_keys = config.storage.copied_keys;
        copied_keys.extend(cli.copied_keys.iter().cloned());

        Ok(Self {
            dir,
            area,
            namespace: cli.namespace.clone().or(config.storage.namespace),
            secure: cli.secure,
            security: config.security,
            web_app: config.mode.web_app,
            all_copied: cli.all_copied || config.storage.all_copied,
            copied_keys,
            interactive: std::io::stdin().is_terminal() && !cli.no_input,
        })
    }

    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            area: self.area,
            all_copied: self.all_copied,
            copied_keys: self.copied_keys.clone(),
        }
    }

    pub fn secure_options(&self, namespace: Option<String>) -> SecureOptions {
        SecureOptions {
            iterations: self.security.iterations,
            salt_size: self.security.salt_size,
            iv_size: self.security.iv_size,
            namespace,
            ns_size: self.security.ns_size,
            ..SecureOptions::default()
        }
    }
}

/// Read a password from `env_var`, or prompt for it.
pub fn read_password(
    env_var: &str,
    prompt: &str,
    interactive: bool,
    confirm: bool,
) -> anyhow::Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return Ok(SecretString::from(value));
        }
    }
    if !interactive {
        return Err(anyhow::anyhow!(
            "No password provided and no TTY available. Set {}.",
            env_var
        ));
    }

    let mut input = Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Confirm password", "Passwords do not match");
    }
    let password = input
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to read password: {}", e))?;
    Ok(SecretString::from(password))
}

/// File backends plus the engine built on them.
pub struct Session {
    pub settings: Settings,
    pub extension: Arc<FileExtension>,
    pub web: Arc<FileWebStorage>,
    pub engine: Arc<dyn StorageEngine>,
    pub secure: Option<Arc<SecureStorage>>,
}

impl Session {
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        let extension = Arc::new(FileExtension::open(&settings.dir)?);
        let web = Arc::new(FileWebStorage::open(&settings.dir)?);
        debug!(dir = %settings.dir.display(), area = %settings.area, "opened backends");

        let host = host_for(&settings, &extension, &web);
        let (engine, secure): (Arc<dyn StorageEngine>, Option<Arc<SecureStorage>>) =
            if settings.secure {
                let password = read_password(PASSWORD_ENV, "Password", settings.interactive, false)?;
                let secure = Arc::new(SecureStorage::new(host, settings.storage_options()));
                secure.set_password(
                    password.expose_secret(),
                    settings.secure_options(settings.namespace.clone()),
                )?;
                (secure.clone() as Arc<dyn StorageEngine>, Some(secure))
            } else {
                let storage = Storage::new(host, settings.storage_options());
                if let Some(namespace) = &settings.namespace {
                    storage.set_namespace(namespace.as_str());
                }
                (Arc::new(storage) as Arc<dyn StorageEngine>, None)
            };

        Ok(Self {
            settings,
            extension,
            web,
            engine,
            secure,
        })
    }

    /// A second secure engine over the same backends, for migration targets.
    pub fn open_secure(
        &self,
        password: &SecretString,
        namespace: Option<String>,
    ) -> anyhow::Result<SecureStorage> {
        let host = host_for(&self.settings, &self.extension, &self.web);
        let storage = SecureStorage::new(host, self.settings.storage_options());
        storage.set_password(password.expose_secret(), self.settings.secure_options(namespace))?;
        Ok(storage)
    }
}

fn host_for(settings: &Settings, extension: &Arc<FileExtension>, web: &Arc<FileWebStorage>) -> Host {
    let host = Host::new(
        Some(Arc::clone(extension) as Arc<dyn ExtensionApi>),
        Some(Arc::clone(web) as Arc<dyn WebStorage>),
    )
    .with_env();
    if settings.web_app {
        host.web_app(true)
    } else {
        host
    }
}
