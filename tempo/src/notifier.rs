//! Lifecycle notifications

use tracing::{info, warn};

use crate::session::{nice_time, Session};
use crate::settings::ChatId;
use crate::timer::{EndKind, SessionHooks};

/// Logs every lifecycle event and optionally raises desktop notifications.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    desktop: bool,
}

impl Notifier {
    pub fn new(desktop: bool) -> Self {
        Self { desktop }
    }

    fn send_notification(&self, title: &str, body: String) {
        if !self.desktop {
            return;
        }
        // Showing a notification can block on the session bus.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let title = title.to_string();
        runtime.spawn_blocking(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .appname("tempo")
                .show()
            {
                warn!("Failed to send notification: {}", e);
            }
        });
    }
}

impl SessionHooks for Notifier {
    fn on_rest_begin(&self, chat: ChatId, session: &Session) {
        let body = format!(
            "Pomodoro done! Have rest for {} now.",
            nice_time(session.rest_duration_secs())
        );
        info!(%chat, "{}", body);
        self.send_notification("Rest time", body);
    }

    fn on_rest_finish(&self, chat: ChatId, session: &Session) {
        let body = format!(
            "Pomodoro {} started.",
            nice_time(session.sprint_duration_secs())
        );
        info!(%chat, "{}", body);
        self.send_notification("Back to work", body);
    }

    fn on_session_end(&self, chat: ChatId, session: &Session, kind: EndKind) {
        let body = match kind {
            EndKind::Finished => format!("Pomodoro session is over!\n{}", session.template()),
            EndKind::Canceled => "Session canceled.".to_string(),
        };
        info!(%chat, ?kind, "{}", body);
        self.send_notification("Session ended", body);
    }

    fn on_session_pause(&self, chat: ChatId, session: &Session) {
        let left = if session.is_rest() {
            session.rest_remaining_at(chrono::Utc::now())
        } else {
            session.sprint_remaining_at(chrono::Utc::now())
        };
        let body = format!("Session paused with {} left.", nice_time(left));
        info!(%chat, "{}", body);
        self.send_notification("Session paused", body);
    }
}
