//! Per-recipient rate limiting and abuse control.
//!
//! Tracks one state record per recipient address: admissions within the
//! current cooldown window, rapid-attempt counts, consecutive delivery
//! failures, and time-bounded bans. Every recipient of a send is checked
//! before any socket is opened. The tracked-recipient map is capped;
//! the least recently seen entry is evicted when the cap is reached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::RateLimitConfig;
use crate::errors::{MailError, MailResult};
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
struct RecipientState {
    count: u32,
    last_reset: Instant,
    banned: bool,
    ban_expiry: Option<Instant>,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    rapid_attempts: u32,
    last_attempt: Option<Instant>,
}

impl RecipientState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            last_reset: now,
            banned: false,
            ban_expiry: None,
            consecutive_failures: 0,
            last_failure: None,
            rapid_attempts: 0,
            last_attempt: None,
        }
    }
}

/// Per-recipient rate-limit controller.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    metrics: Arc<Metrics>,
    states: Mutex<HashMap<String, RecipientState>>,
}

impl RateLimiter {
    /// Creates a controller. Ban and rejection counters are reported
    /// through the shared metrics accumulator.
    pub fn new(config: RateLimitConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects a send to `recipient` at the current time.
    pub fn check(&self, recipient: &str) -> MailResult<()> {
        self.check_at(recipient, Instant::now())
    }

    /// Admits or rejects a send to `recipient` at time `now`.
    ///
    /// Checks run in a fixed order: rapid-attempt detection, active-ban
    /// enforcement (with expiry clearing), consecutive-failure
    /// escalation, cooldown-window reset, then the burst limit. The
    /// admission itself increments the window count, so `count` never
    /// exceeds the burst limit.
    pub fn check_at(&self, recipient: &str, now: Instant) -> MailResult<()> {
        let mut states = self.states.lock().unwrap();

        if states.len() >= self.config.max_tracked_recipients && !states.contains_key(recipient) {
            let oldest = states
                .iter()
                .min_by_key(|(_, state)| state.last_attempt)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                states.remove(&key);
            }
        }

        let state = states
            .entry(recipient.to_string())
            .or_insert_with(|| RecipientState::new(now));

        // Rapid-attempt detection.
        match state.last_attempt {
            Some(last) if now.duration_since(last) < self.config.rapid_period => {
                state.rapid_attempts += 1;
                if state.rapid_attempts >= self.config.max_rapid_attempts {
                    state.banned = true;
                    state.ban_expiry = Some(now + self.config.ban_duration);
                    state.last_attempt = Some(now);
                    self.metrics.record_ban();
                    self.metrics.record_rate_limit_exceeded();
                    return Err(MailError::rate_limit("Too many rapid sending attempts")
                        .with_context("recipient", recipient));
                }
            }
            _ => state.rapid_attempts = 1,
        }
        state.last_attempt = Some(now);

        // Active-ban enforcement. An expired ban clears the recipient's
        // whole abuse state in one step.
        if state.banned {
            match state.ban_expiry {
                Some(expiry) if now < expiry => {
                    self.metrics.record_rate_limit_exceeded();
                    return Err(MailError::rate_limit(format!(
                        "Recipient {} is temporarily banned",
                        recipient
                    ))
                    .with_context("recipient", recipient));
                }
                _ => {
                    state.banned = false;
                    state.ban_expiry = None;
                    state.count = 0;
                    state.last_reset = now;
                    state.consecutive_failures = 0;
                    state.rapid_attempts = 0;
                    self.metrics.record_ban_cleared();
                }
            }
        }

        // Consecutive-failure escalation.
        if state.consecutive_failures >= self.config.max_consecutive_failures {
            let within_cooldown = state
                .last_failure
                .map(|failed| now.duration_since(failed) < self.config.failure_cooldown)
                .unwrap_or(false);
            if within_cooldown {
                state.banned = true;
                state.ban_expiry = Some(now + self.config.ban_duration);
                self.metrics.record_ban();
                self.metrics.record_rate_limit_exceeded();
                return Err(MailError::rate_limit(format!(
                    "Recipient {} is temporarily banned",
                    recipient
                ))
                .with_context("recipient", recipient));
            }
            state.consecutive_failures = 0;
        }

        // Cooldown-window reset.
        if now.duration_since(state.last_reset) > self.config.cooldown_period {
            state.count = 0;
            state.last_reset = now;
        }

        // Burst limit.
        if state.count >= self.config.burst_limit {
            self.metrics.record_rate_limit_exceeded();
            return Err(MailError::rate_limit("Rate limit exceeded for recipient")
                .with_context("recipient", recipient));
        }

        state.count += 1;
        Ok(())
    }

    /// Clears consecutive-failure counts after a successful send.
    pub fn record_success(&self, recipients: &[String]) {
        let mut states = self.states.lock().unwrap();
        for recipient in recipients {
            if let Some(state) = states.get_mut(recipient) {
                state.consecutive_failures = 0;
            }
        }
    }

    /// Counts a failed send against each recipient.
    pub fn record_failure(&self, recipients: &[String]) {
        self.record_failure_at(recipients, Instant::now());
    }

    fn record_failure_at(&self, recipients: &[String], now: Instant) {
        let mut states = self.states.lock().unwrap();
        for recipient in recipients {
            let state = states
                .entry(recipient.clone())
                .or_insert_with(|| RecipientState::new(now));
            state.consecutive_failures += 1;
            state.last_failure = Some(now);
        }
    }

    /// Number of recipients currently tracked.
    pub fn tracked_recipients(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    #[cfg(test)]
    fn state_of(&self, recipient: &str) -> Option<RecipientState> {
        self.states.lock().unwrap().get(recipient).cloned()
    }
}
