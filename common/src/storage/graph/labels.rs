//! Canonical graph label and relationship constants.
//!
//! Label case is exact and load-bearing: a query written against `Project`
//! silently matches nothing because the node label is `PROJECT`. Every
//! Cypher string in this workspace must be assembled from these constants;
//! a test in the graph module rejects raw label literals.

pub const FILE: &str = "File";
pub const DIRECTORY: &str = "Directory";
pub const PROJECT: &str = "PROJECT";
pub const ENTITY: &str = "Entity";
pub const CONCEPT: &str = "Concept";
pub const THEME: &str = "Theme";

pub const REL_CONTAINS: &str = "CONTAINS";
pub const REL_BELONGS_TO: &str = "BELONGS_TO";
pub const REL_HAS_CONCEPT: &str = "HAS_CONCEPT";
pub const REL_HAS_THEME: &str = "HAS_THEME";
pub const REL_IMPORTS: &str = "IMPORTS";
pub const REL_DEFINES: &str = "DEFINES";
pub const REL_CALLS: &str = "CALLS";

/// Relationship types the health validator expects to find in a populated
/// graph. `IMPORTS` and `CALLS` are data-dependent (only present when the
/// extractor reports such entities) and are deliberately not required.
pub const EXPECTED_RELATIONSHIPS: [&str; 5] = [
    REL_CONTAINS,
    REL_BELONGS_TO,
    REL_HAS_CONCEPT,
    REL_HAS_THEME,
    REL_DEFINES,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_label_case_is_canonical() {
        assert_eq!(FILE, "File");
        assert_eq!(DIRECTORY, "Directory");
        assert_eq!(PROJECT, "PROJECT");
        assert_eq!(ENTITY, "Entity");
        assert_eq!(CONCEPT, "Concept");
        assert_eq!(THEME, "Theme");
    }

    #[test]
    fn relationship_types_are_upper_snake() {
        for rel in [
            REL_CONTAINS,
            REL_BELONGS_TO,
            REL_HAS_CONCEPT,
            REL_HAS_THEME,
            REL_IMPORTS,
            REL_DEFINES,
            REL_CALLS,
        ] {
            assert!(rel
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}
