// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User-facing notices raised by the client SDK.

/// Sink for messages meant for the end user.
///
/// Applications plug their UI in here; the SDK picks one implementation at
/// construction time.
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes notices to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        tracing::info!(notice = "success", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(notice = "info", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(notice = "warn", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(notice = "error", "{message}");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::Notifier;

    /// Keeps every notice as `(level, message)`.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub notices: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn levels(&self) -> Vec<&'static str> {
            self.notices.lock().unwrap().iter().map(|(level, _)| *level).collect()
        }

        fn push(&self, level: &'static str, message: &str) {
            self.notices.lock().unwrap().push((level, message.to_string()));
        }
    }

    impl Notifier for RecordingNotifier {
        fn success(&self, message: &str) {
            self.push("success", message);
        }

        fn info(&self, message: &str) {
            self.push("info", message);
        }

        fn warn(&self, message: &str) {
            self.push("warn", message);
        }

        fn error(&self, message: &str) {
            self.push("error", message);
        }
    }
}
