use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;

// Set to true to log every arm/disarm/expiry
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Which of the two timers noticed the expiry.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExpirySource {
    Poll,
    Deadline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub session_id: String,
    pub source: ExpirySource,
}

#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub poll_interval: Duration,
    /// Arm a one-shot deadline next to the poller.
    pub deadline_backup: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline_backup: true,
        }
    }
}

struct ArmedTimer {
    end_time: DateTime<Utc>,
    cancel: CancellationToken,
    poller: JoinHandle<()>,
    deadline: Option<JoinHandle<()>>,
}

impl ArmedTimer {
    fn stop(self) -> Vec<JoinHandle<()>> {
        self.cancel.cancel();
        let mut handles = vec![self.poller];
        handles.extend(self.deadline);
        handles
    }
}

/// Per-session countdowns.
///
/// Expiries are reported on the channel returned by [`TimerManager::new`];
/// the manager never completes anything itself. The poller keeps reporting on
/// every tick past the end time until the session is disarmed.
#[derive(Clone)]
pub struct TimerManager {
    timers: Arc<Mutex<HashMap<String, ArmedTimer>>>,
    clock: Arc<dyn Clock>,
    expired_tx: mpsc::UnboundedSender<Expiry>,
    config: TimerConfig,
}

impl TimerManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: TimerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let manager = Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            clock,
            expired_tx,
            config,
        };
        (manager, expired_rx)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, ArmedTimer>> {
        match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn arm(&self, session_id: &str, end_time: DateTime<Utc>) {
        let cancel = CancellationToken::new();

        let poller = tokio::spawn(poll_for_expiry(
            session_id.to_string(),
            end_time,
            self.clock.clone(),
            self.config.poll_interval,
            self.expired_tx.clone(),
            cancel.clone(),
        ));

        let deadline = self.config.deadline_backup.then(|| {
            tokio::spawn(fire_at_deadline(
                session_id.to_string(),
                end_time,
                self.clock.clone(),
                self.expired_tx.clone(),
                cancel.clone(),
            ))
        });

        let armed = ArmedTimer {
            end_time,
            cancel,
            poller,
            deadline,
        };

        let previous = self.timers().insert(session_id.to_string(), armed);
        if let Some(previous) = previous {
            previous.stop();
            log_info!("Re-armed timer for session {} to end at {}", session_id, end_time);
        } else {
            log_info!("Armed timer for session {} to end at {}", session_id, end_time);
        }
    }

    /// Returns false when nothing was armed for the session.
    pub fn disarm(&self, session_id: &str) -> bool {
        let removed = self.timers().remove(session_id);
        match removed {
            Some(armed) => {
                armed.stop();
                log_info!("Disarmed timer for session {}", session_id);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, session_id: &str) -> bool {
        self.timers().contains_key(session_id)
    }

    pub fn end_time(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.timers().get(session_id).map(|armed| armed.end_time)
    }

    pub fn remaining_ms(&self, session_id: &str) -> Option<i64> {
        let end_time = self.end_time(session_id)?;
        let remaining = (end_time - self.clock.now()).num_milliseconds();
        Some(remaining.max(0))
    }

    pub fn armed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn disarm_all(&self) {
        let drained: Vec<(String, ArmedTimer)> = self.timers().drain().collect();
        for (session_id, armed) in drained {
            for handle in armed.stop() {
                if let Err(err) = handle.await {
                    if !err.is_cancelled() {
                        log_warn!("Timer task for session {} failed: {}", session_id, err);
                    }
                }
            }
        }
    }
}

async fn poll_for_expiry(
    session_id: String,
    end_time: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    expired_tx: mpsc::UnboundedSender<Expiry>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if clock.now() < end_time {
                    continue;
                }
                let expiry = Expiry {
                    session_id: session_id.clone(),
                    source: ExpirySource::Poll,
                };
                log_debug!("Session {} is past its end; reporting expiry", session_id);
                if expired_tx.send(expiry).is_err() {
                    log_warn!("Expiry receiver dropped; stopping poller for {}", session_id);
                    break;
                }
            }
        }
    }
}

async fn fire_at_deadline(
    session_id: String,
    end_time: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    expired_tx: mpsc::UnboundedSender<Expiry>,
    cancel: CancellationToken,
) {
    let remaining = (end_time - clock.now())
        .to_std()
        .unwrap_or(Duration::ZERO);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = time::sleep(remaining) => {
            log_debug!("Deadline reached for session {}", session_id);
            let _ = expired_tx.send(Expiry {
                session_id,
                source: ExpirySource::Deadline,
            });
        }
    }
}
