//! Process-wide LISTEN/NOTIFY pub/sub fan-out (spec.md §4.3).
//!
//! The hub never writes to a session's socket directly — each session
//! registers an [`mpsc::UnboundedSender`] that its own protocol task drains
//! alongside socket reads, so fan-out never holds a lock across I/O (spec.md
//! §5 "the write may be scheduled to the target session's task").

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::Notifications;
use crate::errors::NotifyError;
use crate::messages::protocol::notification_response;
use crate::utils::dashmap::new_dashmap;

const MAX_CHANNELS: usize = 1000;
const MAX_LISTENERS_PER_CHANNEL: usize = 100;
const CHANNEL_NAME_MAX_LENGTH: usize = 63;
const PAYLOAD_MAX_LENGTH: usize = 8000;

/// A single (session, channel) registration (spec.md §3 "Listener").
struct Listener {
    connection_id: u64,
    sender: mpsc::UnboundedSender<Bytes>,
    active: bool,
}

/// A named subscription target (spec.md §3 "Channel").
struct Channel {
    listeners: Mutex<Vec<Listener>>,
    notification_count: AtomicU64,
}

impl Channel {
    fn new() -> Self {
        Channel {
            listeners: Mutex::new(Vec::new()),
            notification_count: AtomicU64::new(0),
        }
    }
}

/// Outcome of a [`NotificationHub::send_notification`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub total_active: usize,
}

/// Process-wide channel registry (spec.md §4.3).
pub struct NotificationHub {
    channels: DashMap<String, Arc<Channel>>,
    max_channels: AtomicUsize,
    max_listeners_per_channel: AtomicUsize,
    channel_name_max_length: AtomicUsize,
    payload_max_length: AtomicUsize,
}

impl NotificationHub {
    pub fn new() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        NotificationHub {
            channels: new_dashmap(worker_threads),
            max_channels: AtomicUsize::new(MAX_CHANNELS),
            max_listeners_per_channel: AtomicUsize::new(MAX_LISTENERS_PER_CHANNEL),
            channel_name_max_length: AtomicUsize::new(CHANNEL_NAME_MAX_LENGTH),
            payload_max_length: AtomicUsize::new(PAYLOAD_MAX_LENGTH),
        }
    }

    /// Apply the configured limits (spec.md §6 "notifications:"). Called
    /// once at startup before the listener accepts any connection; safe to
    /// call again on a SIGHUP config reload since every limit is read from
    /// these atomics on each operation.
    pub fn configure(&self, cfg: &Notifications) {
        self.max_channels.store(cfg.max_channels, Ordering::Relaxed);
        self.max_listeners_per_channel
            .store(cfg.max_listeners_per_channel, Ordering::Relaxed);
        self.channel_name_max_length
            .store(cfg.channel_name_max_length, Ordering::Relaxed);
        self.payload_max_length
            .store(cfg.payload_max_length, Ordering::Relaxed);
    }

    fn validate_channel_name(&self, name: &str) -> Result<(), NotifyError> {
        let max_len = self.channel_name_max_length.load(Ordering::Relaxed);
        if name.is_empty() || name.len() > max_len {
            return Err(NotifyError::InvalidChannelName(name.to_string()));
        }
        let mut chars = name.chars();
        let first = chars.next().unwrap();
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(NotifyError::InvalidChannelName(name.to_string()));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(NotifyError::InvalidChannelName(name.to_string()));
        }
        Ok(())
    }

    /// Register `connection_id` as a listener on `channel` (spec.md §4.3
    /// `addListener`). Duplicate registration is a no-op success.
    pub fn add_listener(
        &self,
        connection_id: u64,
        channel: &str,
        sender: mpsc::UnboundedSender<Bytes>,
    ) -> Result<(), NotifyError> {
        self.validate_channel_name(channel)?;
        let folded = channel.to_ascii_lowercase();
        let max_channels = self.max_channels.load(Ordering::Relaxed);
        let max_listeners = self.max_listeners_per_channel.load(Ordering::Relaxed);

        if !self.channels.contains_key(&folded) && self.channels.len() >= max_channels {
            return Err(NotifyError::TooManyChannels(max_channels));
        }
        let chan = self
            .channels
            .entry(folded.clone())
            .or_insert_with(|| Arc::new(Channel::new()))
            .clone();

        let mut listeners = chan.listeners.lock();
        if listeners.iter().any(|l| l.connection_id == connection_id) {
            return Ok(());
        }
        if listeners.len() >= max_listeners {
            return Err(NotifyError::TooManyListeners(max_listeners, folded));
        }
        listeners.push(Listener {
            connection_id,
            sender,
            active: true,
        });
        Ok(())
    }

    /// Unregister `connection_id` from `channel` (spec.md §4.3
    /// `removeListener`). Idempotent; absent registration is still `Ok`.
    pub fn remove_listener(&self, connection_id: u64, channel: &str) {
        let folded = channel.to_ascii_lowercase();
        if let Some(chan) = self.channels.get(&folded) {
            let mut listeners = chan.listeners.lock();
            listeners.retain(|l| l.connection_id != connection_id);
            let empty = listeners.is_empty();
            drop(listeners);
            if empty {
                self.channels.remove_if(&folded, |_, c| c.listeners.lock().is_empty());
            }
        }
    }

    /// Remove every listener registration held by `connection_id`, across all
    /// channels (spec.md §4.3 `removeAllListenersForConnection`, §8 invariant
    /// 9).
    pub fn remove_all_listeners_for_connection(&self, connection_id: u64) {
        let names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.remove_listener(connection_id, &name);
        }
    }

    /// Deliver `payload` on `channel` from `sender_pid` (spec.md §4.3
    /// `sendNotification`). A non-existent channel is a success with zero
    /// deliveries.
    pub fn send_notification(
        &self,
        channel: &str,
        payload: &str,
        sender_pid: i32,
    ) -> Result<DeliveryReport, NotifyError> {
        let max_payload = self.payload_max_length.load(Ordering::Relaxed);
        if payload.len() > max_payload {
            return Err(NotifyError::PayloadTooLarge(max_payload));
        }
        let folded = channel.to_ascii_lowercase();
        let Some(chan) = self.channels.get(&folded) else {
            return Ok(DeliveryReport::default());
        };
        let chan = chan.clone();

        let frame = notification_response(sender_pid, channel, payload).freeze();
        let mut delivered = 0usize;
        let mut failed = 0usize;
        {
            let mut listeners = chan.listeners.lock();
            for listener in listeners.iter_mut() {
                if !listener.active {
                    continue;
                }
                if listener.sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    listener.active = false;
                    failed += 1;
                }
            }
            if failed > 0 {
                listeners.retain(|l| l.active);
            }
        }
        chan.notification_count.fetch_add(1, Ordering::Relaxed);
        let total_active = chan.listeners.lock().len();
        Ok(DeliveryReport {
            delivered,
            failed,
            total_active,
        })
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide singleton, wired into the server at startup (spec.md §2
/// "Notification Hub ... Process-wide").
pub static HUB: Lazy<NotificationHub> = Lazy::new(NotificationHub::new);
