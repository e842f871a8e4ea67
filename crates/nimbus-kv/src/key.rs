//! Key path helpers: percent-encoding of individual components so that
//! user-provided identifiers (site names, package names) cannot
//! introduce spurious `/` separators, plus the lexicographic child
//! listing used by `listChildren`.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Escapes `/` (and the other characters that would otherwise be
/// ambiguous in a slash-joined path) within a single key component.
/// Callers join escaped components with `/` to build a full key.
const COMPONENT_ESCAPE: &AsciiSet = &CONTROLS.add(b'/').add(b'%');

pub fn escape_component(component: &str) -> String {
    utf8_percent_encode(component, COMPONENT_ESCAPE).to_string()
}

pub fn join(components: &[&str]) -> String {
    components
        .iter()
        .map(|c| escape_component(c))
        .collect::<Vec<_>>()
        .join("/")
}

/// Returns the immediate child key components under `prefix`, given the
/// full sorted list of keys in the store. A child is the first path
/// segment after `prefix/`; duplicates (multiple grandchildren under
/// the same child) are collapsed.
pub fn immediate_children<'a>(prefix: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let prefix_with_slash = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let mut children: Vec<String> = keys
        .filter_map(|key| key.strip_prefix(prefix_with_slash.as_str()))
        .filter(|rest| !rest.is_empty())
        .map(|rest| match rest.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => rest.to_string(),
        })
        .collect();
    children.sort();
    children.dedup();
    children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_slash_in_components() {
        let escaped = escape_component("a/b");
        assert!(!escaped.contains('/'));
        assert_eq!(join(&["sites", "a/b"]), format!("sites/{escaped}"));
    }

    #[test]
    fn lists_immediate_children_only() {
        let keys = vec!["sites/a", "sites/b/meta", "sites/b/status", "other/c"];
        let mut children = immediate_children("sites", keys.into_iter());
        children.sort();
        assert_eq!(children, vec!["a".to_string(), "b".to_string()]);
    }
}
