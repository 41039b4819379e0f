//! Component identity: path normalization, display names and namespaces.

use std::path::Path;

/// Lowercase, lexically clean and forward-slash a path. Every component is
/// keyed by the result.
pub fn normalize_path(path: &str) -> String {
    let lowered = path.to_lowercase().replace('\\', "/");
    clean(&lowered)
}

fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");

    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Resolve `relative` against the directory of `from`.
pub fn resolve_relative(from: &str, relative: &str) -> String {
    let directory = match from.rfind('/') {
        Some(index) => &from[..index],
        None => ".",
    };

    normalize_path(&format!("{}/{}", directory, relative))
}

fn extension_of(path: &str) -> &str {
    let base_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[base_start..].rfind('.') {
        Some(dot) => &path[base_start + dot..],
        None => "",
    }
}

/// File stem of a normalized path.
pub fn stem(path: &str) -> &str {
    let base_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let base = &path[base_start..];
    let ext = extension_of(path);
    &base[..base.len() - ext.len()]
}

/// Display name derived from a path: `templates/user-card.html` → `UserCard`.
/// Anything that is not a letter or digit separates words, so the name is
/// always a plain identifier.
pub fn component_name(path: &str) -> String {
    let ext = extension_of(path);
    let name = &path[..path.len() - ext.len()];

    let joined: String = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();

    joined
        .strip_prefix("Templates")
        .map(str::to_string)
        .unwrap_or(joined)
}

/// Variable namespace of a component: `$<Name>_`.
pub fn namespace_prefix(name: &str) -> String {
    format!("${}_", name)
}

/// Wrapper documents are files named `root`, `root_*` or `root-*`.
pub fn is_root_path(path: &str) -> bool {
    let name = stem(path);
    name == "root" || name.starts_with("root_") || name.starts_with("root-")
}

pub fn has_extension(path: &str, extensions: &[String]) -> bool {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    extensions.iter().any(|x| *x == ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Templates/./Card.HTML"), "templates/card.html");
        assert_eq!(normalize_path("a//b/../c.html"), "a/c.html");
        assert_eq!(normalize_path("../x.html"), "../x.html");
        assert_eq!(normalize_path("/a/../../b"), "/b");
        assert_eq!(normalize_path(""), ".");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve_relative("pages/index.html", "../components/card.html"), "components/card.html");
        assert_eq!(resolve_relative("index.html", "Card.html"), "card.html");
    }

    #[test]
    fn test_component_name() {
        assert_eq!(component_name("templates/user-card.html"), "UserCard");
        assert_eq!(component_name("components/nav_bar.html"), "ComponentsNavBar");
        assert_eq!(component_name("index.html"), "Index");
        assert_eq!(component_name("a.b/page"), "ABPage");
        assert_eq!(component_name("ui.v2/button.html"), "UiV2Button");
        assert_eq!(component_name("../lib/x.html"), "LibX");
        assert_eq!(namespace_prefix(&component_name("ui.v2/button.html")), "$UiV2Button_");
    }

    #[test]
    fn test_root_detection() {
        assert!(is_root_path("layouts/root.html"));
        assert!(is_root_path("root_admin.html"));
        assert!(is_root_path("root-public.html"));
        assert!(!is_root_path("rooted.html"));
    }

    #[test]
    fn test_has_extension() {
        let exts = vec![".html".to_string()];
        assert!(has_extension("a/b.html", &exts));
        assert!(!has_extension("a/b.scss", &exts));
    }
}
