//! Artifacts and citations produced alongside model output.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    Table,
    Chart,
    Image,
    Html,
    Agent,
    FileSearch,
    DisplaySelection,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Code => "code",
            ArtifactKind::Table => "table",
            ArtifactKind::Chart => "chart",
            ArtifactKind::Image => "image",
            ArtifactKind::Html => "html",
            ArtifactKind::Agent => "agent",
            ArtifactKind::FileSearch => "file_search",
            ArtifactKind::DisplaySelection => "display_selection",
        }
    }
}

/// Whether an artifact describes what went into a tool or what came out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Input,
    #[default]
    Output,
}

/// A displayable side output. Immutable once built; refer to it by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub role: ArtifactRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Artifact {
    /// New output artifact with a fresh id.
    pub fn new(kind: ArtifactKind, data: Value) -> Self {
        Self {
            id: format!("art_{}", uuid::Uuid::new_v4().simple()),
            kind,
            title: None,
            data,
            mime_type: None,
            role: ArtifactRole::Output,
            tool_call_id: None,
        }
    }

    /// Artifact whose id is derived from a provider item id, so replays of the
    /// same item collapse to one artifact.
    pub fn with_stable_id(kind: ArtifactKind, item_id: &str, data: Value) -> Self {
        let mut artifact = Self::new(kind, data);
        if !item_id.is_empty() {
            artifact.id = format!("art_{item_id}");
        }
        artifact
    }

    #[must_use]
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn mime(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn input(mut self) -> Self {
        self.role = ArtifactRole::Input;
        self
    }

    /// Manifest entry sent back to the model in place of the full payload.
    pub fn manifest_entry(&self) -> Value {
        let mut entry = json!({
            "id": self.id,
            "type": self.kind.as_str(),
            "role": self.role,
        });
        if let Some(title) = &self.title {
            entry["title"] = Value::String(title.clone());
        }
        entry
    }
}

/// Appends `artifact` unless one with the same id is already present.
pub fn push_unique_artifact(list: &mut Vec<Artifact>, artifact: Artifact) -> bool {
    if list.iter().any(|a| a.id == artifact.id) {
        return false;
    }
    list.push(artifact);
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    Url,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub kind: CitationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Citation {
    pub fn url(url: impl Into<String>, title: Option<String>) -> Self {
        Self {
            kind: CitationKind::Url,
            title,
            url: Some(url.into()),
            file_id: None,
            filename: None,
            snippet: None,
            score: None,
        }
    }

    pub fn file(file_id: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            kind: CitationKind::File,
            title: filename.clone(),
            url: None,
            file_id: Some(file_id.into()),
            filename,
            snippet: None,
            score: None,
        }
    }

    fn key(&self) -> (CitationKind, Option<&str>, Option<&str>) {
        (self.kind, self.url.as_deref(), self.file_id.as_deref())
    }
}

/// Appends `citation` unless the same source is already cited.
pub fn push_unique_citation(list: &mut Vec<Citation>, citation: Citation) -> bool {
    if list.iter().any(|c| c.key() == citation.key()) {
        return false;
    }
    list.push(citation);
    true
}
