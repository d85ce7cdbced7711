//! Organize plan model
//!
//! A plan is the immutable output of the external planner: an ordered list
//! of filesystem operations scoped to a target folder. Everything here is
//! pure data plus derivation helpers; nothing touches disk.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Kind of filesystem intent carried by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create a new folder (and any missing parents)
    CreateFolder,
    /// Move a file or folder to a new location
    Move,
    /// Rename a file or folder in place
    Rename,
    /// Send a file or folder to the trash
    Trash,
    /// Copy a file or folder to a new location
    Copy,
}

impl OperationKind {
    /// Risk level shown to the user during review
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            OperationKind::CreateFolder | OperationKind::Copy => RiskLevel::Low,
            OperationKind::Move | OperationKind::Rename => RiskLevel::Medium,
            OperationKind::Trash => RiskLevel::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateFolder => "create_folder",
            OperationKind::Move => "move",
            OperationKind::Rename => "rename",
            OperationKind::Trash => "trash",
            OperationKind::Copy => "copy",
        }
    }
}

/// How destructive an operation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Structural problems with a plan, detected without touching disk
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Operation '{operation_id}' ({kind}) missing required field '{field}'")]
    MissingField {
        operation_id: String,
        kind: &'static str,
        field: &'static str,
    },
    #[error("Duplicate operation id: {id}")]
    DuplicateOperation { id: String },
    #[error("Operation '{operation_id}' has an invalid name: {name:?}")]
    InvalidName { operation_id: String, name: String },
    #[error("Failed to parse plan: {0}")]
    Parse(String),
}

/// A single operation in the organize plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOperation {
    #[serde(alias = "opId")]
    pub id: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
}

impl PlanOperation {
    fn empty(id: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            source: None,
            destination: None,
            path: None,
            new_name: None,
        }
    }

    pub fn create_folder(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::empty(id, OperationKind::CreateFolder)
        }
    }

    pub fn move_item(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Self::empty(id, OperationKind::Move)
        }
    }

    pub fn rename(id: impl Into<String>, source: impl Into<PathBuf>, new_name: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            new_name: Some(new_name.into()),
            ..Self::empty(id, OperationKind::Rename)
        }
    }

    pub fn trash(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::empty(id, OperationKind::Trash)
        }
    }

    pub fn copy(
        id: impl Into<String>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Self::empty(id, OperationKind::Copy)
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.kind.risk_level()
    }

    fn missing(&self, field: &'static str) -> PlanError {
        PlanError::MissingField {
            operation_id: self.id.clone(),
            kind: self.kind.as_str(),
            field,
        }
    }

    /// The item being renamed. Planners send it as `source` or, historically, as `path`.
    pub fn rename_target(&self) -> Option<&Path> {
        self.source.as_deref().or(self.path.as_deref())
    }

    /// Verify the fields required by this operation's kind are present
    pub fn check_fields(&self) -> Result<(), PlanError> {
        let present = |p: &Option<PathBuf>| p.as_ref().is_some_and(|p| !p.as_os_str().is_empty());

        match self.kind {
            OperationKind::CreateFolder | OperationKind::Trash => {
                if !present(&self.path) {
                    return Err(self.missing("path"));
                }
            }
            OperationKind::Move | OperationKind::Copy => {
                if !present(&self.source) {
                    return Err(self.missing("source"));
                }
                if !present(&self.destination) {
                    return Err(self.missing("destination"));
                }
            }
            OperationKind::Rename => {
                if !present(&self.source) && !present(&self.path) {
                    return Err(self.missing("source"));
                }
                let name = self
                    .new_name
                    .as_deref()
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| self.missing("newName"))?;
                if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
                    return Err(PlanError::InvalidName {
                        operation_id: self.id.clone(),
                        name: name.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Path this operation brings into existence, if any
    pub fn produced_path(&self) -> Option<PathBuf> {
        match self.kind {
            OperationKind::CreateFolder => self.path.clone(),
            OperationKind::Move | OperationKind::Copy => self.destination.clone(),
            OperationKind::Rename => {
                let target = self.rename_target()?;
                let new_name = self.new_name.as_deref()?;
                Some(target.parent()?.join(new_name))
            }
            OperationKind::Trash => None,
        }
    }

    /// Path this operation removes from its current location, if any
    pub fn vacated_path(&self) -> Option<PathBuf> {
        match self.kind {
            OperationKind::Move => self.source.clone(),
            OperationKind::Rename => self.rename_target().map(Path::to_path_buf),
            OperationKind::Trash => self.path.clone(),
            OperationKind::CreateFolder | OperationKind::Copy => None,
        }
    }

    /// Path this operation reads from, if any
    pub fn read_path(&self) -> Option<PathBuf> {
        match self.kind {
            OperationKind::Move | OperationKind::Copy => self.source.clone(),
            OperationKind::Rename => self.rename_target().map(Path::to_path_buf),
            OperationKind::Trash => self.path.clone(),
            OperationKind::CreateFolder => None,
        }
    }

    /// Every path this operation references, including the one it produces
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = [&self.source, &self.destination, &self.path]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        if let Some(produced) = self.produced_path() {
            if !paths.contains(&produced) {
                paths.push(produced);
            }
        }
        paths
    }

    /// Human-readable description for review and recovery prompts
    pub fn description(&self) -> String {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "?".to_string())
        };

        match self.kind {
            OperationKind::CreateFolder => format!("Create folder: {}", show(&self.path)),
            OperationKind::Move => format!("Move {} -> {}", show(&self.source), show(&self.destination)),
            OperationKind::Copy => format!("Copy {} -> {}", show(&self.source), show(&self.destination)),
            OperationKind::Rename => format!(
                "Rename {} to {}",
                self.rename_target()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "?".to_string()),
                self.new_name.as_deref().unwrap_or("?")
            ),
            OperationKind::Trash => format!("Move to trash: {}", show(&self.path)),
        }
    }
}

/// The full organize plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(alias = "planId")]
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub target_folder: PathBuf,
    pub operations: Vec<PlanOperation>,
}

impl Plan {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        target_folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            target_folder: target_folder.into(),
            operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: PlanOperation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Parse a plan from the planner's JSON output
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        serde_json::from_str(json).map_err(|e| PlanError::Parse(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation(&self, id: &str) -> Option<&PlanOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Check ids are unique and every operation carries its required fields
    pub fn check_structure(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for op in &self.operations {
            if !seen.insert(op.id.as_str()) {
                return Err(PlanError::DuplicateOperation { id: op.id.clone() });
            }
            op.check_fields()?;
        }
        Ok(())
    }

    /// Paths the plan reads from, used to snapshot state at review time
    pub fn source_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for op in &self.operations {
            if let Some(p) = op.read_path() {
                if !paths.contains(&p) {
                    paths.push(p);
                }
            }
        }
        paths
    }

    /// Compute a content hash of the plan.
    /// Used to ensure the reviewed plan is the one being committed.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };
        let path_bytes = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        field(self.id.as_bytes());
        field(self.target_folder.to_string_lossy().as_bytes());
        for op in &self.operations {
            field(op.id.as_bytes());
            field(op.kind.as_str().as_bytes());
            field(path_bytes(&op.source).as_bytes());
            field(path_bytes(&op.destination).as_bytes());
            field(path_bytes(&op.path).as_bytes());
            field(op.new_name.as_deref().unwrap_or_default().as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}
