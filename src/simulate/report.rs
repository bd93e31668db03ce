//! Run reports produced by scripted simulation

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

use crate::engine::EngineState;
use crate::guidance::GuidanceEvent;
use crate::program::Progress;
use crate::world::InteractionFramework;

/// One `set_interaction_enabled` call, by object path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnablementRecord {
    pub object: String,
    pub enabled: bool,
}

/// Everything observable during one engine tick (tick 0 is `start`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickRecord {
    pub tick: usize,
    pub events: Vec<GuidanceEvent>,
    pub enablement: Vec<EnablementRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub program: String,
    /// SHA-256 of the program definition that ran
    pub digest: String,
    pub framework: InteractionFramework,
    pub final_state: EngineState,
    pub progress: Progress,
    /// Blocking error at the end of the run, if the sequence stalled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker: Option<String>,
    pub ticks: Vec<TickRecord>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        self.final_state == EngineState::Completed
    }

    /// Every guidance event across all ticks, in order
    pub fn events(&self) -> impl Iterator<Item = &GuidanceEvent> {
        self.ticks.iter().flat_map(|t| t.events.iter())
    }

    /// Reasons of every completed step, in completion order
    pub fn completions(&self) -> Vec<String> {
        self.events()
            .filter_map(|e| match e {
                GuidanceEvent::StepCompleted { step, reason } => Some(format!("{step}: {reason}")),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write run report {}", path.display()))
    }

    /// Short human readable summary for the terminal
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Program:   {} ({})", self.program, &self.digest[..12.min(self.digest.len())]);
        let _ = writeln!(out, "Run:       {}", self.run_id);
        let _ = writeln!(out, "Framework: {}", self.framework);
        let _ = writeln!(out, "State:     {}", self.final_state);
        let _ = writeln!(
            out,
            "Progress:  {}/{} steps ({}/{} required)",
            self.progress.completed,
            self.progress.total,
            self.progress.required_completed,
            self.progress.required_total
        );
        let _ = writeln!(out, "Ticks:     {}", self.ticks.len().saturating_sub(1));
        if let Some(blocker) = &self.blocker {
            let _ = writeln!(out, "Blocked:   {blocker}");
        }
        let warnings = self
            .events()
            .filter(|e| matches!(e, GuidanceEvent::WaitWarning { .. }))
            .count();
        if warnings > 0 {
            let _ = writeln!(out, "Warnings:  {warnings} wait timeout(s)");
        }
        for completion in self.completions() {
            let _ = writeln!(out, "  done {completion}");
        }
        out
    }
}
