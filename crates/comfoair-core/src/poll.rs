//! Periodic polling
//!
//! Decides which command groups are due on each scheduler tick. It holds no
//! timer of its own; the host calls [`PollScheduler::due`] every
//! [`PollScheduler::base_interval`].

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::protocol::CommandCatalog;

/// One scheduled read command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollGroup {
    /// Catalog label
    pub label: String,
    /// Request id sent when due
    pub command: u16,
    /// Zero means never
    pub interval: Duration,
    /// Disabled groups keep their interval but are never due
    pub enabled: bool,
    /// When the group was last due
    pub last_run: Option<Instant>,
}

impl PollGroup {
    fn is_active(&self) -> bool {
        self.enabled && !self.interval.is_zero()
    }

    fn is_due(&self, now: Instant) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}

/// A group that should be polled now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuePoll {
    /// Catalog label
    pub label: String,
    /// Request id to send
    pub command: u16,
}

/// Per-group poll timing
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    enabled: bool,
    groups: Vec<PollGroup>,
}

impl PollScheduler {
    /// Build from configuration; groups that are not pollable reads are skipped
    pub fn new(config: &PollConfig, catalog: &CommandCatalog) -> Self {
        let groups = config
            .groups
            .iter()
            .filter_map(|group| match catalog.find_by_label(&group.label) {
                Some(desc) if desc.pollable => Some(PollGroup {
                    label: group.label.clone(),
                    command: desc.request_id,
                    interval: Duration::from_secs(group.interval_secs),
                    enabled: group.enabled,
                    last_run: None,
                }),
                _ => {
                    warn!("poll: skipping group '{}', not a pollable command", group.label);
                    None
                }
            })
            .collect();

        Self {
            enabled: config.enabled,
            groups,
        }
    }

    /// Groups whose interval elapsed; marks them as run at `now`
    pub fn due(&mut self, now: Instant) -> Vec<DuePoll> {
        if !self.enabled {
            return Vec::new();
        }

        let mut due = Vec::new();
        for group in self.groups.iter_mut().filter(|g| g.is_due(now)) {
            group.last_run = Some(now);
            debug!("poll: '{}' due", group.label);
            due.push(DuePoll {
                label: group.label.clone(),
                command: group.command,
            });
        }
        due
    }

    /// Period at which `due` should be called; `None` if nothing is active
    pub fn base_interval(&self) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.groups
            .iter()
            .filter(|g| g.is_active())
            .map(|g| g.interval)
            .min()
    }

    /// Change a group's interval; returns false for unknown labels
    pub fn set_interval(&mut self, label: &str, interval: Duration) -> bool {
        match self.groups.iter_mut().find(|g| g.label == label) {
            Some(group) => {
                group.interval = interval;
                true
            }
            None => false,
        }
    }

    /// Switch a group on or off; returns false for unknown labels
    pub fn set_enabled(&mut self, label: &str, enabled: bool) -> bool {
        match self.groups.iter_mut().find(|g| g.label == label) {
            Some(group) => {
                group.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Active groups in configuration order
    pub fn groups(&self) -> &[PollGroup] {
        &self.groups
    }

    /// False when polling is switched off as a whole
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
