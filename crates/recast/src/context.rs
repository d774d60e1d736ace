//! Build context for Recast operations
//!
//! A context is handed through one build. It keeps the messages emitted by
//! the build stages, accumulates per stage timings and tracks progress.
//! Every message is also forwarded to the `log` facade.

use std::collections::HashMap;
use std::time::Duration;

use web_time::Instant;

/// Log level for context messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Build stages that can be timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    Total,
    Rasterization,
    Filtering,
    CompactHeightfield,
    ErodeArea,
    MarkArea,
    DistanceField,
    Regions,
    Contours,
    PolyMesh,
    DetailMesh,
    Layers,
    NavMeshData,
    TileCache,
}

/// Progress of a multi step operation
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub current: usize,
    pub total: usize,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: Instant,
    pub message: String,
}

/// Accumulated timing of one category
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerEntry {
    pub total: Duration,
    pub count: usize,
}

/// Context for Recast operations providing logging, profiling, and progress tracking
#[derive(Debug)]
pub struct RecastContext {
    logs: Vec<LogEntry>,
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, TimerEntry>,
    progress: Option<ProgressInfo>,
    min_log_level: LogLevel,
    enable_timing: bool,
    max_log_entries: usize,
}

impl Default for RecastContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecastContext {
    pub fn new() -> Self {
        Self {
            logs: Vec::new(),
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            progress: None,
            min_log_level: LogLevel::Info,
            enable_timing: true,
            max_log_entries: 1000,
        }
    }

    /// Sets the minimum level of recorded messages
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.min_log_level = level;
    }

    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.enable_timing = enabled;
    }

    pub fn set_max_log_entries(&mut self, max_entries: usize) {
        self.max_log_entries = max_entries;
    }

    pub fn log_debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Records `message` and forwards it to the `log` facade
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: "recast", level.into(), "{}", message);

        if level < self.min_log_level {
            return;
        }
        self.logs.push(LogEntry {
            level,
            timestamp: Instant::now(),
            message,
        });
        if self.logs.len() > self.max_log_entries {
            let excess = self.logs.len() - self.max_log_entries;
            self.logs.drain(..excess);
        }
    }

    pub fn start_timer(&mut self, category: TimerCategory) {
        if self.enable_timing {
            self.active_timers.insert(category, Instant::now());
        }
    }

    /// Stops the timer of `category` and adds the elapsed time to its total
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if let Some(start) = self.active_timers.remove(&category) {
            let entry = self.timers.entry(category).or_default();
            entry.total += start.elapsed();
            entry.count += 1;
        }
    }

    /// Runs `f` while timing it under `category`
    pub fn timed<T>(&mut self, category: TimerCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        self.start_timer(category);
        let result = f(self);
        self.stop_timer(category);
        result
    }

    /// Accumulated time of `category`
    pub fn accumulated_time(&self, category: TimerCategory) -> Option<Duration> {
        self.timers.get(&category).map(|e| e.total)
    }

    pub fn timer_count(&self, category: TimerCategory) -> usize {
        self.timers.get(&category).map_or(0, |e| e.count)
    }

    pub fn timers(&self) -> &HashMap<TimerCategory, TimerEntry> {
        &self.timers
    }

    pub fn set_progress(&mut self, current: usize, total: usize, description: impl Into<String>) {
        self.progress = Some(ProgressInfo {
            current,
            total,
            description: description.into(),
        });
    }

    pub fn clear_progress(&mut self) {
        self.progress = None;
    }

    pub fn progress(&self) -> Option<&ProgressInfo> {
        self.progress.as_ref()
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Messages of exactly `level`
    pub fn logs_by_level(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter().filter(move |e| e.level == level)
    }

    /// Clears logs, timers and progress
    pub fn reset(&mut self) {
        self.logs.clear();
        self.active_timers.clear();
        self.timers.clear();
        self.progress = None;
    }

    /// Human readable timing summary, slowest stage first
    pub fn timer_summary(&self) -> String {
        let mut sorted: Vec<_> = self.timers.iter().collect();
        sorted.sort_by(|a, b| b.1.total.cmp(&a.1.total));

        let mut out = String::new();
        for (category, entry) in sorted {
            out.push_str(&format!(
                "{:20} {:8.2}ms ({} calls)\n",
                format!("{:?}", category),
                entry.total.as_secs_f64() * 1000.0,
                entry.count
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_log_level_filtering() {
        let mut context = RecastContext::new();
        context.set_log_level(LogLevel::Warning);

        context.log_debug("Debug message");
        context.log_info("Info message");
        context.log_warning("Warning message");
        context.log_error("Error message");

        assert_eq!(context.logs().len(), 2);
        assert_eq!(context.logs()[0].level, LogLevel::Warning);
        assert_eq!(context.logs_by_level(LogLevel::Error).count(), 1);
    }

    #[test]
    fn test_timer_accumulation() {
        let mut context = RecastContext::new();
        for _ in 0..3 {
            context.timed(TimerCategory::Filtering, |_| {
                thread::sleep(Duration::from_millis(5));
            });
        }

        assert_eq!(context.timer_count(TimerCategory::Filtering), 3);
        let total = context.accumulated_time(TimerCategory::Filtering).unwrap();
        assert!(total >= Duration::from_millis(15));
        assert!(context.timer_summary().contains("Filtering"));
    }

    #[test]
    fn test_disabled_timing_records_nothing() {
        let mut context = RecastContext::new();
        context.set_timing_enabled(false);
        context.timed(TimerCategory::Regions, |_| ());
        assert!(context.accumulated_time(TimerCategory::Regions).is_none());
    }

    #[test]
    fn test_max_log_entries() {
        let mut context = RecastContext::new();
        context.set_max_log_entries(3);
        for i in 0..5 {
            context.log_info(format!("Message {}", i));
        }
        assert_eq!(context.logs().len(), 3);
        assert_eq!(context.logs()[2].message, "Message 4");
    }

    #[test]
    fn test_progress_and_reset() {
        let mut context = RecastContext::new();
        context.set_progress(5, 10, "Rasterizing");
        assert_eq!(context.progress().unwrap().current, 5);

        context.log_info("Test message");
        context.reset();
        assert!(context.logs().is_empty());
        assert!(context.progress().is_none());
    }
}
