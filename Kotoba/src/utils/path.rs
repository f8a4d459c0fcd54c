//! Path utilities

use std::path::Path;

/// Normalize path separators to forward slashes (for manifests)
pub fn normalize_path<P: AsRef<Path>>(path: P) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// Get relative path and normalize separators
pub fn relative_path<P: AsRef<Path>>(path: P, base: P) -> Option<String> {
    path.as_ref()
        .strip_prefix(base.as_ref())
        .ok()
        .map(normalize_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/ws/story/main/1_script.json"), Path::new("/ws")),
            Some("story/main/1_script.json".to_string())
        );
        assert_eq!(relative_path(Path::new("/other"), Path::new("/ws")), None);
    }
}
