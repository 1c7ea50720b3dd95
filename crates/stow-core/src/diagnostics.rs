//! Read-only dumps of an engine's contents.

use std::collections::BTreeMap;
use std::sync::Arc;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::warn;

use crate::backend::{ChangeListener, ChangeSource, ListenerId, StorageArea};
use crate::error::Result;
use crate::storage::StorageEngine;

/// Sink for a full dump of an area.
pub trait Printer: Send + Sync {
    fn print(&self, area: StorageArea, entries: &BTreeMap<String, Value>);
}

impl<F> Printer for F
where
    F: Fn(StorageArea, &BTreeMap<String, Value>) + Send + Sync,
{
    fn print(&self, area: StorageArea, entries: &BTreeMap<String, Value>) {
        self(area, entries)
    }
}

/// Prints a bordered table to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TablePrinter;

impl Printer for TablePrinter {
    fn print(&self, area: StorageArea, entries: &BTreeMap<String, Value>) {
        println!("{}", render_table(area, entries));
    }
}

/// Render entries as a two-column table titled with the area.
pub fn render_table(area: StorageArea, entries: &BTreeMap<String, Value>) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![format!("{} key", area), "value".to_string()]);

    for (key, value) in entries {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        table.add_row(vec![key.clone(), text]);
    }
    table.to_string()
}

/// Dump `storage.get_all()` through `printer`.
pub async fn table(storage: &dyn StorageEngine, printer: &dyn Printer) -> Result<()> {
    let entries = storage.get_all().await?;
    printer.print(storage.area(), &entries);
    Ok(())
}

/// Live reporter re-dumping the table on every change in the engine's area.
///
/// Stops when [`ChangeReporter::stop`] is called or the value is dropped.
pub struct ChangeReporter {
    source: Arc<dyn ChangeSource>,
    listener_id: Option<ListenerId>,
}

impl ChangeReporter {
    pub fn stop(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(id) = self.listener_id.take() {
            self.source.remove_listener(id);
        }
    }
}

impl Drop for ChangeReporter {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Start reporting changes; `None` when the engine has no change source
/// or no Tokio runtime is running.
pub fn start_change_reporter(
    storage: Arc<dyn StorageEngine>,
    printer: Arc<dyn Printer>,
) -> Option<ChangeReporter> {
    let source = storage.base().change_source()?;
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!("change reporter requires a running Tokio runtime");
            return None;
        }
    };

    let area = storage.area();
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let listener: ChangeListener = Arc::new(move |_, changed_area| {
        if changed_area == area {
            let _ = tx.send(());
        }
    });

    runtime.spawn(async move {
        while rx.recv().await.is_some() {
            if let Err(err) = table(storage.as_ref(), printer.as_ref()).await {
                warn!(error = %err, "change reporter failed to read storage");
            }
        }
    });

    let listener_id = source.add_listener(listener);
    Some(ChangeReporter {
        source,
        listener_id: Some(listener_id),
    })
}
