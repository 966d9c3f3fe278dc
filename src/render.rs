// src/render.rs

use crate::config::{MarkupMode, SlotConfig};
use crate::error::Result;
use anyhow::{anyhow, Context};
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};
use rustyline::ExternalPrinter;
use std::collections::HashMap;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Monotonic tag carried by every call of one dispatch.
pub type DispatchId = u64;

pub const TIMER_PLACEHOLDER: &str = "--";

#[derive(Debug, Clone, PartialEq)]
pub enum SlotContent {
    Idle,
    Loading { label: String },
    Unavailable { reason: String },
    Rendered { markup: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub label: String,
    pub content: SlotContent,
    pub timer: String,
    pub latest_dispatch: DispatchId,
}

impl Slot {
    fn idle(label: &str) -> Self {
        Slot {
            label: label.to_string(),
            content: SlotContent::Idle,
            timer: TIMER_PLACEHOLDER.to_string(),
            latest_dispatch: 0,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self.content {
            SlotContent::Idle => "idle",
            SlotContent::Loading { .. } => "loading",
            SlotContent::Unavailable { .. } => "unavailable",
            SlotContent::Rendered { .. } => "settled",
            SlotContent::Failed { .. } => "error",
        }
    }
}

// --- Markup conversion ---

pub trait MarkupConverter: Send + Sync {
    fn convert(&self, text: &str) -> Result<String>;
}

/// Renders Markdown through the `glow` CLI.
pub struct GlowMarkup;

impl MarkupConverter for GlowMarkup {
    fn convert(&self, text: &str) -> Result<String> {
        let mut glow_process = Command::new("glow")
            .args(["-s", "dark", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("glow is not available")?;

        if let Some(mut stdin) = glow_process.stdin.take() {
            stdin.write_all(text.as_bytes()).context("Error writing to glow's stdin")?;
        }
        let output = glow_process.wait_with_output().context("Error waiting for glow to finish")?;
        if !output.status.success() {
            return Err(anyhow!("glow exited with {}", output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Markdown to HTML. Raw HTML in the input is escaped, never passed through,
/// and link or image targets with a scheme other than http, https or mailto
/// are replaced by `#`.
pub struct HtmlMarkup;

const SAFE_URL_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

fn is_safe_destination(dest: &str) -> bool {
    // Browsers ignore embedded whitespace and control characters in schemes.
    let cleaned: String = dest.chars().filter(|c| !c.is_whitespace() && !c.is_control()).collect();
    match cleaned.find([':', '/', '?', '#']) {
        Some(idx) if cleaned[idx..].starts_with(':') => {
            SAFE_URL_SCHEMES.contains(&cleaned[..idx].to_ascii_lowercase().as_str())
        }
        _ => true,
    }
}

fn sanitize_destination(dest: CowStr<'_>) -> CowStr<'_> {
    if is_safe_destination(&dest) {
        dest
    } else {
        debug!(destination = %dest, "Dropping unsafe link target");
        CowStr::Borrowed("#")
    }
}

impl MarkupConverter for HtmlMarkup {
    fn convert(&self, text: &str) -> Result<String> {
        let parser = Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => Event::Start(Tag::Link {
                link_type,
                dest_url: sanitize_destination(dest_url),
                title,
                id,
            }),
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            }) => Event::Start(Tag::Image {
                link_type,
                dest_url: sanitize_destination(dest_url),
                title,
                id,
            }),
            other => other,
        });
        let mut out = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut out, parser);
        Ok(out)
    }
}

pub struct PlainMarkup;

impl MarkupConverter for PlainMarkup {
    fn convert(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

pub fn converter_for(mode: MarkupMode) -> Arc<dyn MarkupConverter> {
    match mode {
        MarkupMode::Glow => Arc::new(GlowMarkup),
        MarkupMode::Html => Arc::new(HtmlMarkup),
        MarkupMode::Plain => Arc::new(PlainMarkup),
    }
}

/// Converts `text`, falling back to the literal text on any error or panic.
pub fn to_display_markup(converter: &dyn MarkupConverter, text: &str) -> String {
    match catch_unwind(AssertUnwindSafe(|| converter.convert(text))) {
        Ok(Ok(markup)) => markup,
        Ok(Err(e)) => {
            debug!(error = %e, "Markup conversion failed, showing plain text");
            text.to_string()
        }
        Err(_) => {
            warn!("Markup converter panicked, showing plain text");
            text.to_string()
        }
    }
}

/// Upper bound on one markup conversion before the slot shows plain text.
const CONVERT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

// --- Slot board ---

#[derive(Debug, Default)]
struct Board {
    order: Vec<String>,
    slots: HashMap<String, Slot>,
}

/// Where slot transitions are printed as they happen.
pub enum Echo {
    Off,
    Stdout,
    /// Printed above the line editor's prompt without clobbering the input.
    Printer(Box<dyn ExternalPrinter + Send>),
}

/// Owns every slot's display state. Cheap to clone; clones share the board
/// and the echo target.
#[derive(Clone)]
pub struct Renderer {
    board: Arc<Mutex<Board>>,
    converter: Arc<dyn MarkupConverter>,
    discard_stale: bool,
    echo: Arc<Mutex<Echo>>,
}

impl Renderer {
    pub fn new(slots: &[SlotConfig], converter: Arc<dyn MarkupConverter>, discard_stale: bool) -> Self {
        let mut board = Board::default();
        for slot in slots {
            board.order.push(slot.id.clone());
            board.slots.insert(slot.id.clone(), Slot::idle(&slot.label));
        }
        Renderer {
            board: Arc::new(Mutex::new(board)),
            converter,
            discard_stale,
            echo: Arc::new(Mutex::new(Echo::Off)),
        }
    }

    /// Print every transition to stdout as it happens.
    pub fn with_echo(self, echo: bool) -> Self {
        self.set_echo(if echo { Echo::Stdout } else { Echo::Off });
        self
    }

    /// Swaps the echo target for this renderer and every clone of it.
    pub fn set_echo(&self, echo: Echo) {
        *self.echo.lock().unwrap_or_else(|p| p.into_inner()) = echo;
    }

    fn emit(&self, block: String) {
        let mut echo = self.echo.lock().unwrap_or_else(|p| p.into_inner());
        match &mut *echo {
            Echo::Off => {}
            Echo::Stdout => println!("{}", block),
            Echo::Printer(printer) => {
                if let Err(e) = printer.print(block.clone()) {
                    debug!(error = %e, "External printer failed, using stdout");
                    println!("{}", block);
                }
            }
        }
    }

    /// Runs the converter on the blocking pool so `glow` never stalls a
    /// runtime worker. Falls back to the literal text if it fails or hangs.
    async fn convert(&self, text: &str) -> String {
        let converter = Arc::clone(&self.converter);
        let owned = text.to_string();
        let job = tokio::task::spawn_blocking(move || to_display_markup(converter.as_ref(), &owned));
        match tokio::time::timeout(CONVERT_TIMEOUT, job).await {
            Ok(Ok(markup)) => markup,
            Ok(Err(e)) => {
                warn!(error = %e, "Markup task failed, showing plain text");
                text.to_string()
            }
            Err(_) => {
                warn!(timeout = ?CONVERT_TIMEOUT, "Markup conversion timed out, showing plain text");
                text.to_string()
            }
        }
    }

    /// Applies `update` unless the write is stale. Returns whether it was applied.
    fn update(&self, slot_id: &str, dispatch: DispatchId, opens_dispatch: bool, update: impl FnOnce(&mut Slot)) -> bool {
        let rendered = {
            let mut board = self.board.lock().unwrap_or_else(|p| p.into_inner());
            let Some(slot) = board.slots.get_mut(slot_id) else {
                warn!(slot = slot_id, "Write to unknown slot ignored");
                return false;
            };
            if opens_dispatch {
                slot.latest_dispatch = slot.latest_dispatch.max(dispatch);
            } else if self.discard_stale && dispatch < slot.latest_dispatch {
                debug!(slot = slot_id, dispatch, latest = slot.latest_dispatch, "Discarding stale result");
                return false;
            }
            update(slot);
            slot.clone()
        };
        self.emit(format_block(slot_id, &rendered));
        true
    }

    pub fn render_loading(&self, slot_id: &str, label: &str, dispatch: DispatchId) {
        self.update(slot_id, dispatch, true, |slot| {
            slot.content = SlotContent::Loading { label: label.to_string() };
            slot.timer = TIMER_PLACEHOLDER.to_string();
        });
    }

    pub fn render_unavailable(&self, slot_id: &str, reason: &str, dispatch: DispatchId) {
        self.update(slot_id, dispatch, true, |slot| {
            slot.content = SlotContent::Unavailable { reason: reason.to_string() };
            slot.timer = TIMER_PLACEHOLDER.to_string();
        });
    }

    /// The timer stops when the response arrives, before conversion.
    pub async fn render_success(&self, slot_id: &str, text: &str, started: Instant, dispatch: DispatchId) -> bool {
        let timer = format_elapsed(started.elapsed());
        let markup = self.convert(text).await;
        self.update(slot_id, dispatch, false, |slot| {
            slot.content = SlotContent::Rendered { markup };
            slot.timer = timer;
        })
    }

    /// Leaves the timer untouched.
    pub fn render_error(&self, slot_id: &str, message: &str, dispatch: DispatchId) -> bool {
        self.update(slot_id, dispatch, false, |slot| {
            slot.content = SlotContent::Failed { message: message.to_string() };
        })
    }

    pub fn snapshot(&self, slot_id: &str) -> Option<Slot> {
        let board = self.board.lock().unwrap_or_else(|p| p.into_inner());
        board.slots.get(slot_id).cloned()
    }

    /// All slots in configuration order.
    pub fn slots(&self) -> Vec<(String, Slot)> {
        let board = self.board.lock().unwrap_or_else(|p| p.into_inner());
        board
            .order
            .iter()
            .filter_map(|id| board.slots.get(id).map(|s| (id.clone(), s.clone())))
            .collect()
    }
}

pub fn format_block(slot_id: &str, slot: &Slot) -> String {
    match &slot.content {
        SlotContent::Idle => format!("[{}] {}: idle", slot_id, slot.label),
        SlotContent::Loading { label } => format!("⏳ [{}] Querying {}...", slot_id, label),
        SlotContent::Unavailable { reason } => format!("⛔ [{}] {}: {}", slot_id, slot.label, reason),
        SlotContent::Rendered { markup } => format!(
            "── {} [{}] · {} ──\n{}\n---",
            slot.label,
            slot_id,
            slot.timer,
            markup.trim_end()
        ),
        SlotContent::Failed { message } => {
            format!("── {} [{}] ──\n⚠️  Error: {}\n---", slot.label, slot_id, message)
        }
    }
}
