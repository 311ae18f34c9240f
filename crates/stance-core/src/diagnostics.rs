//! Operator-facing component inventory written when binding fails.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use contracts::EntityId;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("failed to write diagnostic report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInventory {
    pub path: String,
    pub type_name: String,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInventory {
    pub path: String,
    pub components: Vec<ComponentInventory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub entity: EntityId,
    pub roots: Vec<RootInventory>,
}

impl DiagnosticReport {
    pub fn component_count(&self) -> usize {
        self.roots.iter().map(|root| root.components.len()).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== VoidStance Component Dump ({}) ===", self.entity);
        for root in &self.roots {
            let _ = writeln!(out, "-- ROOT: {}", root.path);
            for component in &root.components {
                let _ = writeln!(out, "  {}  ::  {}", component.path, component.type_name);
                for matched in &component.matched {
                    let _ = writeln!(out, "    [*] {matched}");
                }
            }
        }
        out
    }
}

pub trait DiagnosticSink: Send {
    fn publish(&mut self, report: &DiagnosticReport) -> Result<(), DiagnosticsError>;
}

/// Writes the rendered report to a fixed file, replacing earlier dumps.
#[derive(Debug, Clone)]
pub struct FileDiagnosticSink {
    path: PathBuf,
}

impl FileDiagnosticSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for FileDiagnosticSink {
    fn publish(&mut self, report: &DiagnosticReport) -> Result<(), DiagnosticsError> {
        let io_err = |source| DiagnosticsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.path, report.render()).map_err(io_err)?;
        warn!(path = %self.path.display(), entity = %report.entity, "diagnostic dump written");
        Ok(())
    }
}

/// Keeps reports in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryDiagnosticSink {
    reports: Arc<Mutex<Vec<DiagnosticReport>>>,
}

impl MemoryDiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<DiagnosticReport> {
        self.reports
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl DiagnosticSink for MemoryDiagnosticSink {
    fn publish(&mut self, report: &DiagnosticReport) -> Result<(), DiagnosticsError> {
        let mut guard = self
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push(report.clone());
        Ok(())
    }
}
