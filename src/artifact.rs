//! The candidate artifact: one or more named C/C++ source files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const C_SOURCE_EXTENSIONS: &[&str] = &["c"];
const CXX_SOURCE_EXTENSIONS: &[&str] = &["cc", "cpp", "cxx", "c++"];
const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx", "inl"];
const IGNORED_DIRS: &[&str] = &["build", "target", "node_modules", "cmake-build-debug"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cxx,
}

impl Language {
    pub fn compiler(self) -> &'static str {
        match self {
            Language::C => "clang",
            Language::Cxx => "clang++",
        }
    }

    pub fn harness_extension(self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cxx => "cpp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

/// Ordered mapping of file name to text content, as supplied by the
/// generation collaborator or read from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    files: Vec<SourceFile>,
}

impl Artifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut artifact = Self::new();
        artifact.insert(name, content);
        artifact
    }

    /// Insert or replace a file, keeping first-insertion order.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        let name = name.into();
        let content = content.into();
        if let Some(existing) = self.files.iter_mut().find(|f| f.name == name) {
            existing.content = content;
        } else {
            self.files.push(SourceFile { name, content });
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<SourceFile> {
        let index = self.files.iter().position(|f| f.name == name)?;
        Some(self.files.remove(index))
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.content.as_str())
    }

    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Translation units, in artifact order. Headers are excluded.
    pub fn source_files(&self) -> Vec<&SourceFile> {
        self.files.iter().filter(|f| is_source_file(&f.name)).collect()
    }

    /// C++ wins as soon as any translation unit is C++.
    pub fn language(&self) -> Language {
        let any_cxx = self.source_files().iter().any(|f| {
            extension(&f.name)
                .map(|ext| CXX_SOURCE_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
        });
        if any_cxx || self.source_files().is_empty() {
            Language::Cxx
        } else {
            Language::C
        }
    }

    /// Header search directories relative to the sandbox working directory.
    pub fn include_dirs(&self) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        dirs.insert(".".to_string());
        for file in &self.files {
            if let Some(parent) = Path::new(&file.name).parent() {
                let parent = parent.to_string_lossy().to_string();
                if !parent.is_empty() {
                    dirs.insert(parent);
                }
            }
        }
        dirs.into_iter().collect()
    }

    /// Concatenated text of every file, used by the text heuristics.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            out.push_str(&file.content);
            out.push('\n');
        }
        out
    }
}

pub fn is_source_file(name: &str) -> bool {
    extension(name)
        .map(|ext| {
            C_SOURCE_EXTENSIONS.contains(&ext.as_str())
                || CXX_SOURCE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn is_header_file(name: &str) -> bool {
    extension(name)
        .map(|ext| HEADER_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// One artifact read from disk, labeled by the path it came from.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub label: String,
    pub artifact: Artifact,
}

/// Read C/C++ inputs from files and directory trees.
///
/// With `together`, everything becomes one artifact. Otherwise every source
/// file is its own artifact, carrying the headers found under the same input
/// path so local includes still resolve.
pub fn load_artifacts(paths: &[PathBuf], together: bool) -> Result<Vec<LoadedArtifact>> {
    let mut combined = Artifact::new();
    let mut loaded = Vec::new();

    for path in paths {
        let files = collect_files(path)?;
        if files.is_empty() {
            tracing::warn!(path = %path.display(), "no C/C++ files found");
            continue;
        }
        if together {
            for (name, content) in files {
                combined.insert(name, content);
            }
            continue;
        }
        let headers = files
            .iter()
            .filter(|(name, _)| is_header_file(name))
            .collect::<Vec<_>>();
        for (name, content) in files.iter().filter(|(name, _)| is_source_file(name)) {
            let mut artifact = Artifact::single(name.clone(), content.clone());
            for (header, text) in &headers {
                artifact.insert(header.clone(), text.clone());
            }
            let label = if path.is_dir() {
                path.join(name).display().to_string()
            } else {
                path.display().to_string()
            };
            loaded.push(LoadedArtifact { label, artifact });
        }
    }

    if together && !combined.source_files().is_empty() {
        let label = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        loaded.push(LoadedArtifact {
            label,
            artifact: combined,
        });
    }
    Ok(loaded)
}

/// `(artifact name, content)` pairs. Names are relative to a directory
/// input, or the bare file name for a file input.
fn collect_files(path: &Path) -> Result<Vec<(String, String)>> {
    if path.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("'{}' has no file name", path.display()))?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(vec![(name, content)]);
    }
    if !path.is_dir() {
        anyhow::bail!("'{}' does not exist", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_ignore(e))
    {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(path) else {
            continue;
        };
        let name = relative.to_string_lossy().replace('\\', "/");
        if !is_source_file(&name) && !is_header_file(&name) {
            continue;
        }
        let content = fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        files.push((name, content));
    }
    Ok(files)
}

fn should_ignore(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.') || IGNORED_DIRS.contains(&name))
        .unwrap_or(false)
}
