//! Command implementations.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stow_core::diagnostics::{self, start_change_reporter, Printer, TablePrinter};
use stow_core::storage::{CallbackMap, WatchCallback};
use stow_core::StorageEngine;
use tokio::time::Instant;
use tracing::debug;

use crate::app::{read_password, Session, NEW_PASSWORD_ENV};
use crate::cli::{Commands, GetArgs, ListArgs, MigrateArgs, SetArgs, WatchArgs};
use crate::ui::{self, Badge};

/// Shortest allowed poll interval for `watch`.
const MIN_POLL_INTERVAL_MS: u64 = 50;

pub async fn run(command: &Commands, session: &Session, quiet: bool) -> anyhow::Result<()> {
    match command {
        Commands::Get(args) => get(session, args).await,
        Commands::Set(args) => set(session, args, quiet).await,
        Commands::Remove { key } => {
            session.engine.remove(key).await?;
            if !quiet {
                ui::status(Badge::Ok, &format!("Removed {}", key));
            }
            Ok(())
        }
        Commands::List(args) => list(session, args).await,
        Commands::Clear { include_copies } => {
            session.engine.clear(*include_copies).await?;
            if !quiet {
                ui::status(Badge::Ok, &format!("Cleared {} area", session.settings.area));
            }
            Ok(())
        }
        Commands::Copy { key } => {
            let changed = session.engine.copy(key.as_deref()).await?;
            if !quiet {
                let message = if changed {
                    "Secondary store updated"
                } else {
                    "Nothing copied"
                };
                ui::status(Badge::Ok, message);
            }
            Ok(())
        }
        Commands::Watch(args) => watch(session, args, quiet).await,
        Commands::Migrate(args) => migrate(session, args, quiet).await,
    }
}

/// Parse command-line input as JSON, falling back to a plain string.
pub fn parse_input(raw: &str, force_string: bool) -> Value {
    if force_string {
        return Value::String(raw.to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn get(session: &Session, args: &GetArgs) -> anyhow::Result<()> {
    let value = session
        .engine
        .get(&args.key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Key \"{}\" not found", args.key))?;
    let text = if args.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    println!("{}", text);
    Ok(())
}

async fn set(session: &Session, args: &SetArgs, quiet: bool) -> anyhow::Result<()> {
    let value = parse_input(&args.value, args.string);
    let warning = session.engine.set(&args.key, &value).await?;
    if !warning.is_empty() {
        ui::status(Badge::Warn, &warning);
    }
    if !quiet {
        ui::status(Badge::Ok, &format!("Stored {}", args.key));
    }
    Ok(())
}

async fn list(session: &Session, args: &ListArgs) -> anyhow::Result<()> {
    let engine = session.engine.as_ref();
    if args.raw {
        diagnostics::table(engine, &TablePrinter).await?;
        return Ok(());
    }

    let mut decoded = BTreeMap::new();
    for key in engine.get_all().await?.into_keys() {
        if let Some(value) = engine.get(&key).await? {
            decoded.insert(key, value);
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
    } else {
        TablePrinter.print(engine.area(), &decoded);
    }
    Ok(())
}

fn change_printer(key: String) -> WatchCallback {
    Arc::new(move |change, area| {
        let show = |value: &Option<Value>| {
            value
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "(none)".to_string())
        };
        println!(
            "{} {}/{}: {} -> {}",
            Badge::Change.render(ui::stderr_color()),
            area,
            key,
            show(&change.old_value),
            show(&change.new_value)
        );
    })
}

async fn watch(session: &Session, args: &WatchArgs, quiet: bool) -> anyhow::Result<()> {
    let engine = &session.engine;
    let mut reporter = None;
    if args.keys.is_empty() {
        reporter = Some(
            start_change_reporter(Arc::clone(engine), Arc::new(TablePrinter)).ok_or_else(
                || anyhow::anyhow!("Change reporting is not available in this mode"),
            )?,
        );
    } else {
        let callbacks: CallbackMap = args
            .keys
            .iter()
            .map(|key| (key.clone(), change_printer(key.clone())))
            .collect();
        if !engine.watch(&callbacks) {
            return Err(anyhow::anyhow!(
                "Watching is not supported for the {} area in this mode",
                session.settings.area
            ));
        }
    }

    if !quiet {
        ui::status(Badge::Ok, "Watching for changes (Ctrl-C to stop)");
    }

    let interval = Duration::from_millis(args.interval_ms.max(MIN_POLL_INTERVAL_MS));
    let deadline = args
        .timeout
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(interval) => {
                let changed = session.extension.reload()?;
                if changed > 0 {
                    debug!(changed, "picked up external changes");
                }
            }
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }

    engine.unwatch_all();
    if let Some(reporter) = reporter {
        reporter.stop();
    }
    Ok(())
}

async fn migrate(session: &Session, args: &MigrateArgs, quiet: bool) -> anyhow::Result<()> {
    let source = session
        .secure
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("migrate requires --secure"))?;
    let password = read_password(
        NEW_PASSWORD_ENV,
        "New password",
        session.settings.interactive,
        true,
    )?;
    let namespace = args
        .to_namespace
        .clone()
        .or_else(|| session.settings.namespace.clone());
    let target = session.open_secure(&password, namespace)?;

    let migrated = source.migrate(&target).await?;
    if !quiet {
        ui::status(Badge::Ok, &format!("Migrated {} entries", migrated));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stow_core::StorageEngineExt;

    #[test]
    fn test_parse_input_prefers_json() {
        assert_eq!(parse_input("42", false), json!(42));
        assert_eq!(parse_input("{\"a\":true}", false), json!({"a": true}));
        assert_eq!(parse_input("hello world", false), json!("hello world"));
        assert_eq!(parse_input("42", true), json!("42"));
    }

    #[tokio::test]
    async fn test_typed_round_trip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let extension = Arc::new(stow_core::backend::FileExtension::open(dir.path()).unwrap());
        let storage = stow_core::Storage::new(
            stow_core::Host::detached().with_extension(extension),
            stow_core::StorageOptions::default(),
        );
        storage.set_as("n", &7u32).await.unwrap();
        assert_eq!(storage.get_as::<u32>("n").await.unwrap(), Some(7));
    }
}
