use anyhow::Result;
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

use super::state::UiState;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Save the digest to `--save` or the default download location.
pub fn save_digest(state: &UiState) -> Result<PathBuf> {
    let path = match state.save_path.clone() {
        Some(p) => p,
        None => crate::storage::default_digest_path()?,
    };
    crate::storage::export_digest(&path, &state.run.output_text)
}

/// Save the digest and update state.info with the outcome.
pub fn save_and_show_path(state: &mut UiState) {
    match save_digest(state) {
        Ok(path) => {
            state.info = format!("Saved: {}", path.display());
            state.last_saved_path = Some(path);
        }
        Err(e) => {
            state.info = format!("Save failed: {e:#}");
        }
    }
}

/// Initialize the clipboard manager thread if not already initialized.
/// This creates a background thread that processes clipboard operations sequentially,
/// keeping each clipboard instance alive for a sufficient duration.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        // Linux clipboard managers read lazily from the owning process.
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}

/// Copy the digest and update state.info with the outcome.
pub fn copy_digest(state: &mut UiState) {
    if state.run.output_text.is_empty() {
        state.info = "No digest to copy yet".into();
        return;
    }
    state.info = match copy_to_clipboard(&state.run.output_text) {
        Ok(()) => "Digest copied to clipboard".into(),
        Err(e) => format!("Copy failed: {e:#}"),
    };
}
