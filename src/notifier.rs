//! User-facing notices raised by the coordinator. Delivery is up to the
//! host; the default just logs them.

use log::info;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    WentOffline,
    BackOnline,
    /// A review was stored locally and will be sent once online.
    ReviewQueued { restaurant_id: u64 },
}

impl Notice {
    pub fn message(&self) -> &'static str {
        match self {
            Notice::WentOffline => "You are offline. Submitted reviews will be sent later.",
            Notice::BackOnline => "You are back online.",
            Notice::ReviewQueued { .. } => "You are offline. Your review will be sent when you reconnect.",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        info!("{}", notice.message());
    }
}
