//! Per-connection hazard alerting.

use std::collections::HashSet;

/// Emits an alert only when the hazard class differs from the last one
/// alerted on this connection. State never decays.
#[derive(Clone, Debug, Default)]
pub struct HazardTracker {
    hazard_classes: HashSet<String>,
    last_alert: Option<String>,
}

impl HazardTracker {
    pub fn new<I, S>(hazard_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hazard_classes: hazard_classes.into_iter().map(Into::into).collect(),
            last_alert: None,
        }
    }

    pub fn is_hazard(&self, class: &str) -> bool {
        self.hazard_classes.contains(class)
    }

    /// Feed one detected class; returns the alert text on a transition.
    pub fn observe(&mut self, class: &str) -> Option<String> {
        if !self.is_hazard(class) || self.last_alert.as_deref() == Some(class) {
            return None;
        }
        self.last_alert = Some(class.to_string());
        Some(alert_text(class))
    }

    pub fn last_alert(&self) -> Option<&str> {
        self.last_alert.as_deref()
    }
}

pub fn alert_text(class: &str) -> String {
    format!("Hazard: {} detected!", class)
}
