// src/resource.rs

use std::path::{Path, PathBuf};

/// Maps a resource name plus extension to something decodable.
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, name: &str, extension: &str) -> Option<PathBuf>;
}

/// Looks resources up as `<root>/<name>.<extension>`.
#[derive(Clone, Debug)]
pub struct BundleResolver {
    root: PathBuf,
}

impl BundleResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceResolver for BundleResolver {
    fn resolve(&self, name: &str, extension: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return None;
        }
        let path = self.root.join(format!("{name}.{extension}"));
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rock_100.wav"), b"RIFF").unwrap();
        let resolver = BundleResolver::new(dir.path());
        assert_eq!(
            resolver.resolve("rock_100", "wav"),
            Some(dir.path().join("rock_100.wav"))
        );
    }

    #[test]
    fn missing_or_escaping_names_do_not_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BundleResolver::new(dir.path());
        assert!(resolver.resolve("nope", "wav").is_none());
        assert!(resolver.resolve("../etc/passwd", "wav").is_none());
        assert!(resolver.resolve("", "wav").is_none());
    }
}
