use crate::artifact::Artifact;
use crate::error::InfraError;
use crate::util::safe_relative_path;
use std::path::Path;
use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "crucible-";

/// Private copy of one artifact, owned by a single gate invocation.
///
/// The directory is removed when the value drops, which covers normal
/// completion, early returns and a cancelled (dropped) future alike.
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn materialize(artifact: &Artifact) -> Result<Self, InfraError> {
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map_err(InfraError::Scratch)?;

        for file in artifact.files() {
            let relative =
                safe_relative_path(&file.name).map_err(|reason| InfraError::ArtifactPath {
                    name: file.name.clone(),
                    reason,
                })?;
            let target = dir.path().join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(InfraError::Scratch)?;
            }
            std::fs::write(&target, &file.content).map_err(InfraError::Scratch)?;
        }

        // The container user is not necessarily our uid; the mount is read-only anyway.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755))
                .map_err(InfraError::Scratch)?;
        }

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_lifecycle_writes_and_removes_files() {
        let mut artifact = Artifact::new();
        artifact.insert("main.cpp", "int main() { return 0; }\n");
        artifact.insert("include/util.hpp", "#pragma once\n");

        let scratch = ScratchDir::materialize(&artifact).unwrap();
        let root = scratch.path().to_path_buf();
        assert_eq!(
            std::fs::read_to_string(root.join("main.cpp")).unwrap(),
            "int main() { return 0; }\n"
        );
        assert!(root.join("include/util.hpp").exists());

        drop(scratch);
        assert!(!root.exists());
    }

    #[test]
    fn traversal_names_are_infrastructure_errors() {
        let artifact = Artifact::single("../escape.c", "int x;");
        let err = ScratchDir::materialize(&artifact).unwrap_err();
        assert!(matches!(err, InfraError::ArtifactPath { .. }));
    }
}
