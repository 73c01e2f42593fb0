//! Fakes shared by the unit tests: a pass-through action whose outputs echo
//! its (substituted) settings, a manually fired trigger, a manual clock and
//! a log capture writer.

use crate::action::{ActionFactory, ActionResult, CollectionRuleAction};
use crate::clock::Clock;
use crate::definition::ActionDescriptor;
use crate::error::{Result, RuleError};
use crate::process::ProcessHandle;
use crate::settings::ActionSettings;
use crate::trigger::{CollectionRuleTrigger, TriggerFactory, TriggerNotifier};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const PASS_THROUGH: &str = "PassThrough";
pub const MANUAL: &str = "Manual";

/// Setting key: `"start"` or `"wait"` makes the action fail at that step.
pub const FAIL_AT: &str = "fail_at";
/// Setting key: milliseconds to sleep inside `wait_for_completion`.
pub const DELAY_MS: &str = "delay_ms";

pub fn test_process() -> ProcessHandle {
    ProcessHandle::new(
        4321,
        Uuid::parse_str("0b9f2d6e-3c1a-4f5e-9d7b-2a6c8e4f1b3d").unwrap(),
        "sample-app",
    )
    .with_command_line("/usr/share/dotnet/dotnet sample-app.dll")
}

pub fn passthrough(name: &str, values: &[(&str, &str)]) -> ActionDescriptor {
    let map = values
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    ActionDescriptor::new(name, PASS_THROUGH, ActionSettings::Custom(map))
}

pub fn custom_strings(settings: &ActionSettings) -> BTreeMap<String, String> {
    match settings {
        ActionSettings::Custom(map) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        other => panic!("expected Custom settings, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Created { name: String, settings: BTreeMap<String, String> },
    Started(String),
    Completed(String),
    Disposed(String),
    Callback,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<JournalEntry>>>);

impl Journal {
    pub fn push(&self, entry: JournalEntry) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.0.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::Started(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &JournalEntry) -> usize {
        self.entries().iter().filter(|e| *e == wanted).count()
    }

    pub fn position(&self, wanted: &JournalEntry) -> Option<usize> {
        self.entries().iter().position(|e| e == wanted)
    }

    pub fn created_settings(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.entries().into_iter().find_map(|e| match e {
            JournalEntry::Created { name: n, settings } if n == name => Some(settings),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// PassThrough action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PassThroughFactory {
    pub journal: Journal,
    pub wait: bool,
}

impl Default for PassThroughFactory {
    fn default() -> Self {
        Self {
            journal: Journal::default(),
            wait: true,
        }
    }
}

impl PassThroughFactory {
    pub fn new(journal: Journal, wait: bool) -> Self {
        Self { journal, wait }
    }
}

impl ActionFactory for PassThroughFactory {
    fn create(
        &self,
        _process: &ProcessHandle,
        settings: &ActionSettings,
    ) -> Result<Box<dyn CollectionRuleAction>> {
        let ActionSettings::Custom(_) = settings else {
            return Err(RuleError::UnsupportedSettings {
                action_type: PASS_THROUGH.into(),
                settings: settings.kind().into(),
            });
        };
        let values = custom_strings(settings);
        let label = values.get("label").cloned().unwrap_or_default();
        self.journal.push(JournalEntry::Created {
            name: label.clone(),
            settings: values.clone(),
        });
        Ok(Box::new(PassThroughAction {
            label,
            values,
            journal: self.journal.clone(),
        }))
    }

    fn wait_for_completion(&self) -> bool {
        self.wait
    }
}

struct PassThroughAction {
    label: String,
    values: BTreeMap<String, String>,
    journal: Journal,
}

#[async_trait]
impl CollectionRuleAction for PassThroughAction {
    async fn start(&mut self, _cancel: &CancellationToken) -> Result<()> {
        self.journal.push(JournalEntry::Started(self.label.clone()));
        if self.values.get(FAIL_AT).map(String::as_str) == Some("start") {
            return Err(RuleError::Action(format!("{} failed to start", self.label)));
        }
        Ok(())
    }

    async fn wait_for_completion(&mut self, cancel: &CancellationToken) -> Result<ActionResult> {
        if let Some(ms) = self.values.get(DELAY_MS).and_then(|v| v.parse().ok()) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RuleError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            }
        }
        if self.values.get(FAIL_AT).map(String::as_str) == Some("wait") {
            return Err(RuleError::Action(format!("{} exited with code 1", self.label)));
        }
        self.journal.push(JournalEntry::Completed(self.label.clone()));
        let mut result = ActionResult::new();
        result.output_values = self.values.clone();
        Ok(result)
    }

    async fn dispose(&mut self) {
        self.journal.push(JournalEntry::Disposed(self.label.clone()));
    }
}

/// Pass-through descriptor whose `label` setting equals its name, so the
/// journal can tell actions apart.
pub fn labelled(name: &str, values: &[(&str, &str)]) -> ActionDescriptor {
    let mut all = vec![("label", name)];
    all.extend_from_slice(values);
    passthrough(name, &all)
}

// ---------------------------------------------------------------------------
// Manual trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ManualTriggerState {
    notifier: Option<TriggerNotifier>,
    starts: usize,
    stops: usize,
}

/// Trigger whose firings are driven by the test through [`ManualTriggerFactory::fire`].
#[derive(Debug, Clone, Default)]
pub struct ManualTriggerFactory {
    state: Arc<Mutex<ManualTriggerState>>,
    /// Fire once from inside `start`.
    pub fire_on_start: bool,
    /// Make `start` fail.
    pub fail_start: bool,
    /// Block inside `start` for this long, ignoring cancellation.
    pub start_delay: Option<Duration>,
}

impl ManualTriggerFactory {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn slow_start(delay: Duration) -> Self {
        Self {
            start_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn firing_on_start() -> Self {
        Self {
            fire_on_start: true,
            ..Self::default()
        }
    }

    pub fn fire(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.notifier.as_ref().map(|n| n.notify()).unwrap_or(false)
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

impl TriggerFactory for ManualTriggerFactory {
    fn create(
        &self,
        _process: &ProcessHandle,
        _settings: &serde_json::Value,
        notifier: TriggerNotifier,
    ) -> Result<Box<dyn CollectionRuleTrigger>> {
        self.state.lock().unwrap().notifier = Some(notifier);
        Ok(Box::new(ManualTrigger {
            factory: self.clone(),
        }))
    }
}

struct ManualTrigger {
    factory: ManualTriggerFactory,
}

#[async_trait]
impl CollectionRuleTrigger for ManualTrigger {
    async fn start(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.factory.fail_start {
            return Err(RuleError::Trigger("counter session unavailable".into()));
        }
        self.factory.state.lock().unwrap().starts += 1;
        if let Some(delay) = self.factory.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.factory.fire_on_start {
            self.factory.fire();
        }
        Ok(())
    }

    async fn stop(&mut self, _cancel: &CancellationToken) -> Result<()> {
        self.factory.state.lock().unwrap().stops += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route WARN and above on the current thread into a buffer.
pub fn capture_warnings() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
