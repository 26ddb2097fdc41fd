//! Alert state machine
//!
//! ```text
//! create ──(similar active alert, same source)──→ Suppressed (duplicate, kept in history)
//!    │
//!    └──→ Active ──acknowledge──→ Acknowledged ──resolve──→ Resolved (history)
//!           │                                                   ↑
//!           └──────────────────────resolve──────────────────────┘
//! ```
//!
//! The engine does no I/O and never reads the clock: every operation takes
//! `now` and returns the notifications the caller should dispatch. The
//! [`AlertActor`](super::actor::AlertActor) supplies the time and the sinks.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info};

use crate::config::{AlertConfig, EscalationPolicy, EscalationTier};
use crate::error::{WatchtowerError, WatchtowerResult};
use crate::ids::AlertId;

use super::model::{
    Alert, AlertOutcome, AlertStats, AlertStatus, NewAlert, Notification, NotificationKind,
};
use super::similarity::title_similarity;

#[derive(Debug)]
pub struct AlertEngine {
    similarity_threshold: f64,
    history_limit: usize,
    escalation: EscalationPolicy,
    active: HashMap<AlertId, Alert>,
    history: VecDeque<Alert>,
    suppressed_total: u64,
}

impl AlertEngine {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            history_limit: config.history_limit.max(1),
            escalation: config.escalation.clone(),
            active: HashMap::new(),
            history: VecDeque::new(),
            suppressed_total: 0,
        }
    }

    /// Create an alert unless a similar active one from the same source exists
    ///
    /// Critical and Emergency alerts come back with a `Raised` notification.
    pub fn create(
        &mut self,
        new: NewAlert,
        now: DateTime<Utc>,
    ) -> (AlertOutcome, Option<Notification>) {
        if let Some((existing_id, similarity)) = self.find_duplicate(&new)
            && let Some(existing) = self.active.get_mut(&existing_id)
        {
            self.suppressed_total += 1;
            existing.duplicates += 1;
            let existing = existing.clone();

            debug!(
                "suppressed '{}' from {} (similarity {similarity:.2} to {})",
                new.title, new.source, existing.id
            );

            let duplicate = Self::build(new, AlertStatus::Suppressed, now);
            self.push_history(duplicate);

            return (AlertOutcome::Suppressed { existing, similarity }, None);
        }

        let mut alert = Self::build(new, AlertStatus::Active, now);
        let notification = alert.severity.notifies_immediately().then(|| {
            alert.notified = true;
            Notification {
                kind: NotificationKind::Raised,
                alert: alert.clone(),
            }
        });

        info!("alert {} raised: [{}] {}", alert.id, alert.severity, alert.title);

        if self.active.contains_key(&alert.id) {
            error!("alert id {} already active, dropping new alert", alert.id);
            debug_assert!(false, "alert id collision");
            return (AlertOutcome::Created(alert), None);
        }
        self.active.insert(alert.id, alert.clone());

        (AlertOutcome::Created(alert), notification)
    }

    /// Active → Acknowledged (acknowledging twice is a no-op)
    pub fn acknowledge(
        &mut self,
        id: AlertId,
        by: Option<String>,
        now: DateTime<Utc>,
    ) -> WatchtowerResult<Alert> {
        let alert = self
            .active
            .get_mut(&id)
            .ok_or(WatchtowerError::UnknownAlert(id))?;

        if alert.status == AlertStatus::Active {
            alert.status = AlertStatus::Acknowledged;
            alert.acknowledged_at = Some(now);
            alert.acknowledged_by = by;
            info!("alert {id} acknowledged");
        }

        Ok(alert.clone())
    }

    /// Move an open alert to history as Resolved
    ///
    /// Returns a `Resolved` notification if the alert had been notified before.
    pub fn resolve(
        &mut self,
        id: AlertId,
        now: DateTime<Utc>,
    ) -> WatchtowerResult<(Alert, Option<Notification>)> {
        let mut alert = self
            .active
            .remove(&id)
            .ok_or(WatchtowerError::UnknownAlert(id))?;

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        info!("alert {id} resolved");

        let notification = alert.notified.then(|| Notification {
            kind: NotificationKind::Resolved,
            alert: alert.clone(),
        });

        self.push_history(alert.clone());
        Ok((alert, notification))
    }

    /// Resolve every open alert raised by `source`
    pub fn resolve_source(
        &mut self,
        source: &str,
        now: DateTime<Utc>,
    ) -> Vec<(Alert, Option<Notification>)> {
        let ids: Vec<AlertId> = self
            .active
            .values()
            .filter(|alert| alert.source == source)
            .map(|alert| alert.id)
            .collect();

        ids.into_iter()
            .filter_map(|id| self.resolve(id, now).ok())
            .collect()
    }

    /// Escalate every Active alert whose next escalation is due
    ///
    /// The n-th escalation is due once the alert is `n × escalate_after` old,
    /// up to the severity's `max_escalations`. Acknowledged alerts are not
    /// escalated.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Notification> {
        let mut notifications = Vec::new();

        for alert in self.active.values_mut() {
            if alert.status != AlertStatus::Active {
                continue;
            }

            let Some(tier) = self.escalation.tier(alert.severity) else {
                continue;
            };

            if alert.escalation_count >= tier.max_escalations {
                continue;
            }

            let Some(due) = next_escalation_due(&tier, alert.escalation_count) else {
                continue;
            };
            if now - alert.created_at < due {
                continue;
            }

            alert.escalation_count += 1;
            alert.last_escalated_at = Some(now);
            alert.notified = true;

            info!(
                "alert {} escalated to level {} ({})",
                alert.id, alert.escalation_count, alert.title
            );

            notifications.push(Notification {
                kind: NotificationKind::Escalated {
                    level: alert.escalation_count,
                },
                alert: alert.clone(),
            });
        }

        notifications
    }

    pub fn get(&self, id: AlertId) -> Option<&Alert> {
        self.active.get(&id)
    }

    /// Open alerts, oldest first
    pub fn active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.values().cloned().collect();
        alerts.sort_by_key(|alert| alert.created_at);
        alerts
    }

    /// Closed alerts, newest first
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> AlertStats {
        let day_ago = now - Duration::hours(24);

        let resolved: Vec<&Alert> = self
            .history
            .iter()
            .filter(|alert| alert.status == AlertStatus::Resolved)
            .collect();

        let created_last_24h = self
            .active
            .values()
            .chain(resolved.iter().copied())
            .filter(|alert| alert.created_at >= day_ago)
            .count();

        let resolved_last_24h = resolved
            .iter()
            .filter(|alert| alert.resolved_at.is_some_and(|at| at >= day_ago))
            .count();

        let resolution_secs: Vec<f64> = resolved
            .iter()
            .filter_map(|alert| alert.resolved_at.map(|at| at - alert.created_at))
            .map(|elapsed| elapsed.num_milliseconds() as f64 / 1000.0)
            .collect();

        let average_resolution_secs = (!resolution_secs.is_empty())
            .then(|| resolution_secs.iter().sum::<f64>() / resolution_secs.len() as f64);

        let considered = self.active.len() + resolved.len();
        let escalated = self
            .active
            .values()
            .chain(resolved.iter().copied())
            .filter(|alert| alert.escalation_count > 0)
            .count();

        AlertStats {
            active: self
                .active
                .values()
                .filter(|alert| alert.status == AlertStatus::Active)
                .count(),
            acknowledged: self
                .active
                .values()
                .filter(|alert| alert.status == AlertStatus::Acknowledged)
                .count(),
            created_last_24h,
            resolved_last_24h,
            suppressed_total: self.suppressed_total,
            average_resolution_secs,
            escalation_rate: if considered == 0 {
                0.0
            } else {
                escalated as f64 / considered as f64
            },
        }
    }

    fn find_duplicate(&self, new: &NewAlert) -> Option<(AlertId, f64)> {
        self.active
            .values()
            .filter(|alert| alert.status == AlertStatus::Active && alert.source == new.source)
            .map(|alert| (alert.id, title_similarity(&alert.title, &new.title)))
            .filter(|(_, similarity)| *similarity > self.similarity_threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    fn build(new: NewAlert, status: AlertStatus, now: DateTime<Utc>) -> Alert {
        Alert {
            id: AlertId::generate(),
            title: new.title,
            description: new.description,
            severity: new.severity,
            source: new.source,
            created_at: now,
            status,
            escalation_count: 0,
            last_escalated_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            duplicates: 0,
            notified: false,
            labels: new.labels,
        }
    }

    fn push_history(&mut self, alert: Alert) {
        self.history.push_back(alert);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }
}

/// Alert age at which the next escalation is due; `None` if it can never be reached
fn next_escalation_due(tier: &EscalationTier, escalations: u32) -> Option<Duration> {
    let level = i32::try_from(escalations).ok()?.checked_add(1)?;
    tier.escalate_after()?.checked_mul(level)
}
