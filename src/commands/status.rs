use anyhow::Result;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use crate::runtime::Runtime;
use crate::state::{InstalledState, StateStore};

/// Print the components recorded in the state file.
#[tracing::instrument(skip(runtime))]
pub fn status<R: Runtime>(runtime: Arc<R>, state_path: &Path) -> Result<()> {
    let state = StateStore::new(runtime, state_path.to_path_buf()).read()?;
    print!("{}", render_status(&state));
    Ok(())
}

pub fn render_status(state: &InstalledState) -> String {
    if state.components.is_empty() {
        return "No components installed.\n".to_string();
    }

    let width = state.components.keys().map(|id| id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (id, entry) in &state.components {
        let _ = writeln!(
            out,
            "{:<width$}  {}  (installed {}, {} files)",
            id,
            entry.version,
            entry.installed_at.format("%Y-%m-%d %H:%M UTC"),
            entry.files,
            width = width
        );
    }
    out
}
