use serde::{Deserialize, Serialize};

/// Best-effort classification of a file's role in the project.
///
/// Never authoritative; downstream code must tolerate `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Core,
    Test,
    Config,
    Docs,
    Other,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Test => "test",
            Self::Config => "config",
            Self::Docs => "docs",
            Self::Other => "other",
        }
    }

    /// Parse a role string, defaulting to `Other` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "core" => Self::Core,
            "test" => Self::Test,
            "config" => Self::Config,
            "docs" => Self::Docs,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for FileRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Experimental,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Experimental => "experimental",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "stable" => Self::Stable,
            _ => Self::Experimental,
        }
    }
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Function,
    Class,
    Constant,
    Interface,
    Type,
    Variable,
}

impl SymbolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Constant => "constant",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Variable => "variable",
        }
    }
}

impl std::str::FromStr for SymbolType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "constant" => Ok(Self::Constant),
            "interface" => Ok(Self::Interface),
            "type" => Ok(Self::Type),
            "variable" => Ok(Self::Variable),
            _ => Err(anyhow::anyhow!("unknown symbol type: '{s}'")),
        }
    }
}

impl std::fmt::Display for SymbolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Protected => "protected",
            Self::Internal => "internal",
        }
    }

    /// Parse a visibility string, defaulting to `Public` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "private" => Self::Private,
            "protected" => Self::Protected,
            "internal" => Self::Internal,
            _ => Self::Public,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entities addressable by relations and embeddings.
///
/// `Standard` is valid only for embeddings; relations connect files and
/// symbols exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Symbol,
    Standard,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Symbol => "symbol",
            Self::Standard => "standard",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "symbol" => Ok(Self::Symbol),
            "standard" => Ok(Self::Standard),
            _ => Err(anyhow::anyhow!("unknown entity type: '{s}'")),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(type, id)` reference to a file, symbol, or standard row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: i64,
}

impl EntityRef {
    pub fn file(id: i64) -> Self {
        Self {
            entity_type: EntityType::File,
            entity_id: id,
        }
    }

    pub fn symbol(id: i64) -> Self {
        Self {
            entity_type: EntityType::Symbol,
            entity_id: id,
        }
    }

    pub fn standard(id: i64) -> Self {
        Self {
            entity_type: EntityType::Standard,
            entity_id: id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Imports,
    Calls,
    Mirrors,
    Extends,
    Implements,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::Mirrors => "mirrors",
            Self::Extends => "extends",
            Self::Implements => "implements",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "imports" => Ok(Self::Imports),
            "calls" => Ok(Self::Calls),
            "mirrors" => Ok(Self::Mirrors),
            "extends" => Ok(Self::Extends),
            "implements" => Ok(Self::Implements),
            _ => Err(anyhow::anyhow!("unknown relation type: '{s}'")),
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardCategory {
    Naming,
    ErrorHandling,
    Logging,
    Architecture,
    Testing,
    Other,
}

impl StandardCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naming => "naming",
            Self::ErrorHandling => "error_handling",
            Self::Logging => "logging",
            Self::Architecture => "architecture",
            Self::Testing => "testing",
            Self::Other => "other",
        }
    }

    /// Parse a category string, defaulting to `Other` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "naming" => Self::Naming,
            "error_handling" => Self::ErrorHandling,
            "logging" => Self::Logging,
            "architecture" => Self::Architecture,
            "testing" => Self::Testing,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for StandardCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Rows ──

/// A file row as stored. Ids are assigned by the store and stable across
/// re-indexing of the same path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub language: String,
    pub role: FileRole,
    pub summary: Option<String>,
    pub stability: Stability,
    pub hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolRecord {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub symbol_type: SymbolType,
    pub visibility: Visibility,
    pub summary: Option<String>,
    pub line_start: u32,
    pub line_end: u32,
}

/// A symbol fresh out of the extractor, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSymbol {
    pub name: String,
    pub symbol_type: SymbolType,
    pub visibility: Visibility,
    pub summary: Option<String>,
    pub line_start: u32,
    pub line_end: u32,
}

impl NewSymbol {
    pub fn new(
        name: impl Into<String>,
        symbol_type: SymbolType,
        line_start: u32,
        line_end: u32,
    ) -> Self {
        Self {
            name: name.into(),
            symbol_type,
            visibility: Visibility::Public,
            summary: None,
            line_start,
            line_end,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }
}

/// A directed, typed edge between two resolved entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    pub id: i64,
    pub source: EntityRef,
    pub target: EntityRef,
    pub relation_type: RelationType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standard {
    pub id: i64,
    pub category: StandardCategory,
    pub rule_text: String,
    pub examples: Option<String>,
}
