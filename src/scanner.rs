//! Barcode scanner line reader.
//!
//! Keyboard-wedge and serial scanners terminate every decoded code with a
//! newline. [`start`] spawns a background tokio task that reads such a
//! source line by line and forwards each plausible code as a [`ScanEvent`].
//! The returned [`ScannerHandle`] owns the task: `stop()` or dropping the
//! handle cancels it and releases the source.

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Codes outside this length range are line noise, not scans.
pub const MIN_CODE_LEN: usize = 3;
pub const MAX_CODE_LEN: usize = 50;

const EVENT_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Symbology
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Symbology {
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code128,
    Code39,
}

/// GS1 mod-10 check over a digit string whose last digit is the check digit.
pub fn gtin_check_digit_valid(code: &str) -> bool {
    if code.len() < 2 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<u32> = code.bytes().map(|b| u32::from(b - b'0')).collect();
    let (body, check) = digits.split_at(digits.len() - 1);
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| if i % 2 == 0 { d * 3 } else { *d })
        .sum();
    (10 - sum % 10) % 10 == check[0]
}

fn is_code39_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || " -.$/+%".contains(c)
}

/// Best guess at the symbology a scanner decoded `code` from.
pub fn classify(code: &str) -> Option<Symbology> {
    if code.is_empty() {
        return None;
    }
    if code.bytes().all(|b| b.is_ascii_digit()) {
        let gtin = gtin_check_digit_valid(code);
        return Some(match code.len() {
            13 if gtin => Symbology::Ean13,
            12 if gtin => Symbology::UpcA,
            8 if gtin => Symbology::Ean8,
            6 => Symbology::UpcE,
            7 | 8 if code.starts_with('0') || code.starts_with('1') => Symbology::UpcE,
            _ => Symbology::Code128,
        });
    }
    if code.chars().all(is_code39_char) {
        return Some(Symbology::Code39);
    }
    if code.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Some(Symbology::Code128);
    }
    None
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEvent {
    pub code: String,
    pub symbology: Option<Symbology>,
    pub source: String,
    pub timestamp: String,
}

/// Trimmed code from one raw line, `None` when it is not a plausible scan.
pub fn accept_line(line: &str) -> Option<String> {
    let code = line.trim();
    let len = code.chars().count();
    if (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&len) {
        Some(code.to_string())
    } else {
        None
    }
}

pub struct ScannerHandle {
    events: mpsc::Receiver<ScanEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Start reading `source` in the background.
pub fn start<R>(source: R, source_name: &str) -> ScannerHandle
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let name = source_name.to_string();

    let task = tokio::spawn(async move {
        info!(source = %name, "Scanner reader started");
        let mut source = source;
        let mut line = String::new();

        loop {
            line.clear();
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = source.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => {
                    debug!(source = %name, "Scanner source closed");
                    break;
                }
                Ok(_) => {
                    let Some(code) = accept_line(&line) else {
                        continue;
                    };
                    let symbology = classify(&code);
                    info!(barcode = %code, symbology = ?symbology, "Scanner: barcode detected");
                    let event = ScanEvent {
                        code,
                        symbology,
                        source: name.clone(),
                        timestamp: chrono::Utc::now().to_rfc3339(),
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "Scanner read error");
                    break;
                }
            }
        }

        info!(source = %name, "Scanner reader stopped");
    });

    ScannerHandle {
        events: rx,
        cancel,
        task: Some(task),
    }
}

impl ScannerHandle {
    /// Next scanned code; `None` once the reader has stopped.
    pub async fn next_scan(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the reader and wait for it to release its source.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Scanner task ended abnormally");
            }
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
