/// Languages recognized without downstream auto-detection.
const KNOWN_LANGUAGES: [&str; 12] = [
    "python",
    "rust",
    "javascript",
    "typescript",
    "go",
    "java",
    "c",
    "cpp",
    "csharp",
    "markdown",
    "yaml",
    "json",
];

/// Rejects traversal segments, NUL bytes, over-long paths, and absolute
/// paths outside the allowed roots.
pub fn is_safe_path(path: &str, allowed_base_paths: &[String]) -> bool {
    if path.is_empty() || path.len() > 4096 || path.contains('\0') {
        return false;
    }
    if path.split('/').any(|segment| segment == "..") {
        return false;
    }
    if path.starts_with('/') {
        return allowed_base_paths
            .iter()
            .any(|base| path.starts_with(base.as_str()));
    }
    true
}

/// Case-folds known languages; `None` hands the document to downstream
/// auto-detection.
pub fn normalize_language(raw: &str) -> Option<String> {
    let folded = raw.trim().to_ascii_lowercase();
    let canonical = match folded.as_str() {
        "py" => "python",
        "rs" => "rust",
        "js" => "javascript",
        "ts" => "typescript",
        "c++" => "cpp",
        "c#" => "csharp",
        "md" => "markdown",
        "yml" => "yaml",
        other => other,
    };
    KNOWN_LANGUAGES
        .contains(&canonical)
        .then(|| canonical.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_path_rules() {
        let allowed = vec!["/srv/repos".to_string()];
        assert!(is_safe_path("src/lib.rs", &allowed));
        assert!(is_safe_path("/srv/repos/demo/a.py", &allowed));
        assert!(!is_safe_path("../etc/passwd", &allowed));
        assert!(!is_safe_path("src/../../etc/passwd", &allowed));
        assert!(!is_safe_path("/etc/passwd", &allowed));
        assert!(!is_safe_path("bad\0path", &allowed));
        assert!(!is_safe_path("", &allowed));
        assert!(!is_safe_path("/srv/other/a.py", &allowed));
        assert!(!is_safe_path(&"a/".repeat(3000), &allowed));
    }

    #[test]
    fn language_normalization_folds_aliases() {
        assert_eq!(normalize_language("Python"), Some("python".into()));
        assert_eq!(normalize_language("rs"), Some("rust".into()));
        assert_eq!(normalize_language("C++"), Some("cpp".into()));
        assert_eq!(normalize_language(" TS "), Some("typescript".into()));
        assert_eq!(normalize_language("klingon"), None);
    }
}
