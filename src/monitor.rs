//! The poll loop: discover active sessions, read what was appended, turn it
//! into message events, hand them to the callback, persist offsets.
//!
//! One cycle runs at a time. [`SessionMonitor`] does the work of a cycle;
//! [`MonitorRunner`] drives it on a tokio task between `start` and `stop`.

use crate::config::MonitorConfig;
use crate::contexts::ActiveContexts;
use crate::error::{DeliveryError, Result};
use crate::paths::mtime_secs;
use crate::scanner::{SessionInfo, scan_projects};
use crate::state::{MonitorState, TrackedSession};
use crate::tail::{count_lines, read_new_records};
use crate::transcript::{ContentType, PendingTools, Role, SessionCarry, reconstruct_session};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PREVIEW_CHARS: usize = 80;

/// One message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub session_id: String,
    pub project_path: String,
    pub text: String,
    /// Always true: entries are only built from fully written lines.
    pub is_complete: bool,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl NewMessage {
    fn preview(&self) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Receives every new message, once, in file order.
pub type MessageCallback = Box<dyn FnMut(&NewMessage) -> std::result::Result<(), DeliveryError> + Send>;

pub struct SessionMonitor {
    config: MonitorConfig,
    state: MonitorState,
    /// Unresolved tool invocations and slash commands per session. Only
    /// non-idle entries are kept.
    pending: HashMap<String, SessionCarry>,
    contexts: Arc<dyn ActiveContexts>,
    callback: Option<MessageCallback>,
}

impl SessionMonitor {
    /// Build a monitor and load persisted offsets from `config.state_file`.
    pub fn new(config: MonitorConfig, contexts: impl ActiveContexts + 'static) -> Self {
        let mut state = MonitorState::new(&config.state_file);
        state.load();
        Self {
            config,
            state,
            pending: HashMap::new(),
            contexts: Arc::new(contexts),
            callback: None,
        }
    }

    pub fn set_message_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&NewMessage) -> std::result::Result<(), DeliveryError> + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Tool invocations still waiting for a result in `session_id`.
    pub fn pending(&self, session_id: &str) -> Option<&PendingTools> {
        self.pending
            .get(session_id)
            .map(|carry| &carry.tools)
            .filter(|tools| !tools.is_idle())
    }

    /// Read every active session that changed since the last cycle.
    ///
    /// A session seen for the first time starts at its current end of file;
    /// its history is not replayed.
    pub async fn check_for_updates(&mut self) -> Vec<NewMessage> {
        let mut messages = Vec::new();
        // Context lookups may shell out; keep them off the runtime workers.
        let contexts = Arc::clone(&self.contexts);
        let active = match tokio::task::spawn_blocking(move || contexts.active_cwds()).await {
            Ok(active) => active,
            Err(e) => {
                error!(error = %e, "active context lookup failed");
                return messages;
            }
        };
        let sessions = scan_projects(&self.config.projects_path, &active).await;

        for info in sessions {
            let actual_mtime = match tokio::fs::metadata(&info.file_path)
                .await
                .and_then(|m| m.modified())
            {
                Ok(modified) => mtime_secs(modified),
                Err(e) => {
                    debug!(session_id = %info.session_id, error = %e, "cannot stat transcript");
                    continue;
                }
            };

            let Some(tracked) = self.state.get(&info.session_id) else {
                self.start_tracking(&info, actual_mtime).await;
                continue;
            };
            if actual_mtime <= tracked.last_mtime {
                continue;
            }

            let mut tracked = tracked.clone();
            tracked.file_path = info.file_path.to_string_lossy().into_owned();
            let records = match read_new_records(&mut tracked).await {
                Ok(records) => records,
                Err(e) => {
                    error!(session_id = %info.session_id, error = %e, "failed to read transcript");
                    continue;
                }
            };
            if !records.is_empty() {
                debug!(session_id = %info.session_id, count = records.len(), "read new records");
            }

            let mut carry = self.pending.remove(&info.session_id).unwrap_or_default();
            let entries = reconstruct_session(&records, &mut carry);
            if !carry.is_idle() {
                self.pending.insert(info.session_id.clone(), carry);
            }

            messages.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.role == Role::Assistant && !entry.text.is_empty())
                    .map(|entry| NewMessage {
                        session_id: info.session_id.clone(),
                        project_path: info.project_path.clone(),
                        text: entry.text,
                        is_complete: true,
                        content_type: entry.content_type,
                        tool_use_id: entry.tool_use_id,
                    }),
            );

            tracked.last_mtime = actual_mtime;
            tracked.project_path = info.project_path;
            self.state.update(tracked);
        }

        messages
    }

    async fn start_tracking(&mut self, info: &SessionInfo, mtime: f64) {
        let line_count = match count_lines(&info.file_path).await {
            Ok(n) => n,
            Err(e) => {
                debug!(session_id = %info.session_id, error = %e, "cannot count transcript lines");
                return;
            }
        };
        self.state.update(TrackedSession {
            session_id: info.session_id.clone(),
            file_path: info.file_path.to_string_lossy().into_owned(),
            last_mtime: mtime,
            last_line_count: line_count,
            project_path: info.project_path.clone(),
        });
        info!(session_id = %info.session_id, lines = line_count, "started tracking session");
    }

    /// One full cycle: collect, deliver, persist if anything changed.
    ///
    /// Returns the number of messages collected. A failing or panicking
    /// callback only loses its own message.
    pub async fn run_cycle(&mut self) -> usize {
        let messages = self.check_for_updates().await;

        for msg in &messages {
            info!(session_id = %msg.session_id, content_type = msg.content_type.as_str(), "{}", msg.preview());
            let Some(callback) = self.callback.as_mut() else {
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| callback(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(session_id = %msg.session_id, error = %e, "message callback failed");
                }
                Err(panic) => {
                    error!(session_id = %msg.session_id, reason = panic_reason(&*panic), "message callback panicked");
                }
            }
        }

        if let Err(e) = self.state.save_if_dirty() {
            error!(error = %e, "failed to save monitor state");
        }
        messages.len()
    }

    /// Persist state unconditionally.
    pub fn save(&mut self) -> Result<()> {
        self.state.save()
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown")
}

struct RunningLoop {
    shutdown: Arc<Notify>,
    task: JoinHandle<SessionMonitor>,
}

/// Drives a [`SessionMonitor`] on a background task.
///
/// `stopped -> running -> stopped`; the monitor is handed back when the loop
/// exits, so a runner can be started again.
pub struct MonitorRunner {
    monitor: Option<SessionMonitor>,
    running: Option<RunningLoop>,
}

impl MonitorRunner {
    pub fn new(monitor: SessionMonitor) -> Self {
        Self {
            monitor: Some(monitor),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the poll loop; the first cycle runs immediately.
    ///
    /// Must be called from within a tokio runtime. Calling it while running
    /// does nothing.
    pub fn start(&mut self) {
        if self.running.is_some() {
            warn!("monitor already running");
            return;
        }
        let Some(monitor) = self.monitor.take() else {
            warn!("monitor is gone; cannot start");
            return;
        };

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_loop(monitor, Arc::clone(&shutdown)));
        self.running = Some(RunningLoop { shutdown, task });
    }

    /// Stop the loop, wait for an in-flight cycle, and save state.
    ///
    /// The idle sleep is interrupted immediately. Returns once the final
    /// save has been attempted.
    pub async fn stop(&mut self) {
        let Some(RunningLoop { shutdown, task }) = self.running.take() else {
            if let Some(monitor) = self.monitor.as_mut()
                && let Err(e) = monitor.save()
            {
                error!(error = %e, "failed to save monitor state");
            }
            return;
        };

        shutdown.notify_one();
        match task.await {
            Ok(monitor) => self.monitor = Some(monitor),
            Err(e) => error!(error = %e, "monitor task failed"),
        }
    }

    /// The monitor, while the loop is stopped.
    pub fn monitor(&self) -> Option<&SessionMonitor> {
        self.monitor.as_ref()
    }
}

async fn run_loop(mut monitor: SessionMonitor, shutdown: Arc<Notify>) -> SessionMonitor {
    info!(
        interval_secs = monitor.config.poll_interval.as_secs_f64(),
        "session monitor started"
    );

    loop {
        monitor.run_cycle().await;

        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = tokio::time::sleep(monitor.config.poll_interval) => {}
        }
    }

    if let Err(e) = monitor.save() {
        error!(error = %e, "failed to save monitor state");
    }
    info!("session monitor stopped and state saved");
    monitor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::FixedContexts;
    use filetime::{FileTime, set_file_mtime};
    use serde_json::{Value, json};
    use crate::paths::normalize_path;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        tmp: TempDir,
        work: PathBuf,
        transcript: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let work = std::fs::canonicalize(tmp.path()).unwrap().join("work");
            std::fs::create_dir_all(&work).unwrap();
            let project_dir = tmp.path().join("projects").join("proj");
            std::fs::create_dir_all(&project_dir).unwrap();
            let transcript = project_dir.join("s1.jsonl");
            let fx = Self {
                tmp,
                work,
                transcript,
            };
            fx.append(&[json!({ "type": "user", "cwd": fx.work.to_string_lossy() })]);
            fx
        }

        fn config(&self) -> MonitorConfig {
            MonitorConfig {
                projects_path: self.tmp.path().join("projects"),
                poll_interval: Duration::from_millis(20),
                state_file: self.tmp.path().join("state.json"),
            }
        }

        fn monitor(&self) -> SessionMonitor {
            SessionMonitor::new(self.config(), FixedContexts::new([self.work.to_string_lossy()]))
        }

        fn append(&self, lines: &[Value]) {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.transcript)
                .unwrap();
            for line in lines {
                writeln!(f, "{line}").unwrap();
            }
            bump_mtime(&self.transcript);
        }
    }

    /// Push the mtime forward so it strictly increases between writes.
    fn bump_mtime(path: &Path) {
        static TICK: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let n = TICK.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let at = SystemTime::now() + Duration::from_secs(n);
        set_file_mtime(path, FileTime::from_system_time(at)).unwrap();
    }

    fn assistant_text(text: &str) -> Value {
        json!({ "type": "assistant", "message": { "role": "assistant", "content": [{ "type": "text", "text": text }] } })
    }

    #[tokio::test]
    async fn first_sighting_does_not_replay_history() {
        let fx = Fixture::new();
        fx.append(&[assistant_text("old news")]);

        let mut monitor = fx.monitor();
        assert!(monitor.check_for_updates().await.is_empty());
        let tracked = monitor.state().get("s1").unwrap();
        assert_eq!(tracked.last_line_count, 2);
        assert_eq!(tracked.project_path, fx.work.to_string_lossy());
    }

    #[tokio::test]
    async fn appended_assistant_text_becomes_message() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor();
        monitor.check_for_updates().await;

        fx.append(&[
            json!({ "type": "user", "message": { "role": "user", "content": "do it" } }),
            assistant_text("Done."),
        ]);
        let messages = monitor.check_for_updates().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Done.");
        assert_eq!(messages[0].content_type, ContentType::Text);
        assert!(messages[0].is_complete);
        assert_eq!(messages[0].session_id, "s1");

        // Unchanged mtime: nothing is read again.
        assert!(monitor.check_for_updates().await.is_empty());
    }

    #[tokio::test]
    async fn pending_tool_is_carried_between_cycles() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor();
        monitor.check_for_updates().await;

        fx.append(&[json!({ "type": "assistant", "message": { "role": "assistant", "content": [
            { "type": "tool_use", "id": "t1", "name": "Bash", "input": { "command": "ls" } }
        ] } })]);
        assert!(monitor.check_for_updates().await.is_empty());
        assert!(monitor.pending("s1").is_some_and(|p| p.contains("t1")));

        fx.append(&[json!({ "type": "user", "message": { "role": "user", "content": [
            { "type": "tool_result", "tool_use_id": "t1", "content": "a.txt" }
        ] } })]);
        let messages = monitor.check_for_updates().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "🔧 **Bash** `ls`\n>a.txt||");
        assert_eq!(messages[0].tool_use_id.as_deref(), Some("t1"));
        assert!(monitor.pending("s1").is_none());
    }

    #[tokio::test]
    async fn callback_errors_do_not_stop_delivery() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.set_message_callback(move |msg| {
            sink.lock().unwrap().push(msg.text.clone());
            if msg.text == "first" {
                return Err(DeliveryError::new("transport down"));
            }
            Ok(())
        });

        monitor.run_cycle().await;
        fx.append(&[assistant_text("first"), assistant_text("second")]);
        assert_eq!(monitor.run_cycle().await, 2);
        assert_eq!(*seen.lock().unwrap(), ["first", "second"]);
        assert!(!monitor.state().is_dirty());
    }

    #[tokio::test]
    async fn command_output_in_later_cycle_keeps_name() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor();
        monitor.check_for_updates().await;

        fx.append(&[json!({ "type": "user", "message": { "role": "user",
            "content": "<command-name>/status</command-name>" } })]);
        assert!(monitor.check_for_updates().await.is_empty());
        assert!(monitor.pending("s1").is_none());

        fx.append(&[json!({ "type": "user", "message": { "role": "user",
            "content": "<local-command-stdout>ok</local-command-stdout>" } })]);
        let messages = monitor.check_for_updates().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "❯ `/status`\n`ok`");
        assert_eq!(messages[0].content_type, ContentType::LocalCommand);
    }

    #[tokio::test]
    async fn panicking_callback_keeps_runner_alive() {
        let fx = Fixture::new();
        let mut monitor = fx.monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.set_message_callback(move |msg| {
            if msg.text == "boom" {
                panic!("sink exploded");
            }
            sink.lock().unwrap().push(msg.text.clone());
            Ok(())
        });

        let mut runner = MonitorRunner::new(monitor);
        runner.start();
        let state_file = fx.tmp.path().join("state.json");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !state_file.exists() {
            assert!(tokio::time::Instant::now() < deadline, "session never tracked");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        fx.append(&[assistant_text("boom"), assistant_text("after")]);
        while seen.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "message never delivered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(runner.is_running());

        runner.stop().await;
        assert_eq!(*seen.lock().unwrap(), ["after"]);
        assert!(runner.monitor().is_some());
        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(&state_file).unwrap()).unwrap();
        assert_eq!(saved["s1"]["last_line_count"], 3);

        runner.start();
        assert!(runner.is_running());
        runner.stop().await;
    }

    /// Blocks its thread, then records whether other tasks ran meanwhile.
    struct SlowContexts {
        work: String,
        ticked: Arc<AtomicBool>,
        saw_tick: Arc<AtomicBool>,
    }

    impl ActiveContexts for SlowContexts {
        fn active_cwds(&self) -> HashSet<String> {
            std::thread::sleep(Duration::from_millis(200));
            self.saw_tick
                .store(self.ticked.load(Ordering::SeqCst), Ordering::SeqCst);
            HashSet::from([self.work.clone()])
        }
    }

    #[tokio::test]
    async fn slow_context_lookup_does_not_block_runtime() {
        let fx = Fixture::new();
        let ticked = Arc::new(AtomicBool::new(false));
        let saw_tick = Arc::new(AtomicBool::new(false));
        let contexts = SlowContexts {
            work: normalize_path(&fx.work.to_string_lossy()),
            ticked: Arc::clone(&ticked),
            saw_tick: Arc::clone(&saw_tick),
        };
        let mut monitor = SessionMonitor::new(fx.config(), contexts);

        let ticker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ticked.store(true, Ordering::SeqCst);
        });
        monitor.check_for_updates().await;
        ticker.await.unwrap();

        assert!(saw_tick.load(Ordering::SeqCst));
        assert!(monitor.state().get("s1").is_some());
    }

    #[tokio::test]
    async fn runner_stop_saves_state() {
        let fx = Fixture::new();
        let mut runner = MonitorRunner::new(fx.monitor());
        runner.start();
        runner.start();
        assert!(runner.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        runner.stop().await;
        assert!(!runner.is_running());

        let raw = std::fs::read_to_string(fx.tmp.path().join("state.json")).unwrap();
        let saved: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved["s1"]["last_line_count"], 1);

        // The monitor comes back and the loop can be started again.
        assert!(runner.monitor().is_some());
        runner.start();
        runner.stop().await;
        assert!(runner.monitor().is_some());
    }

    #[tokio::test]
    async fn stop_interrupts_long_sleep() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.poll_interval = Duration::from_secs(3600);
        let monitor = SessionMonitor::new(config, FixedContexts::new([fx.work.to_string_lossy()]));

        let mut runner = MonitorRunner::new(monitor);
        runner.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), runner.stop())
            .await
            .unwrap();
    }

    #[test]
    fn preview_is_truncated_on_char_boundary() {
        let msg = NewMessage {
            session_id: "s".into(),
            project_path: "/p".into(),
            text: "é".repeat(100),
            is_complete: true,
            content_type: ContentType::Text,
            tool_use_id: None,
        };
        let preview = msg.preview();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
    }
}
