//! Dependency extraction from command events
//!
//! Commands never touch files. Dependency-type commands and package-manager
//! install lines in shell commands are turned into `(name, version|url)`
//! pairs for the [`DependencyMap`]; every other command is recorded for the
//! caller and never executed here.

use crate::stream::CommandKind;
use crate::types::DependencyMap;

/// Version recorded when a declaration names no version.
pub const DEFAULT_VERSION: &str = "latest";

/// Package managers and the subcommands that install packages.
const INSTALLERS: &[(&str, &[&str])] = &[
    ("npm", &["install", "i", "add"]),
    ("yarn", &["add"]),
    ("pnpm", &["add", "install", "i"]),
    ("bun", &["add"]),
];

/// A command as recorded by a turn.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordedCommand {
    pub kind: CommandKind,
    pub body: String,
}

/// Dependencies declared by a command, in declaration order.
pub fn dependencies_from_command(kind: &CommandKind, body: &str) -> Vec<(String, String)> {
    match kind {
        CommandKind::Dependency => body.lines().filter_map(parse_declaration_line).collect(),
        CommandKind::Shell => body
            .lines()
            .flat_map(|line| line.split("&&"))
            .flat_map(|part| part.split(';'))
            .flat_map(parse_install)
            .collect(),
        CommandKind::Other(_) => Vec::new(),
    }
}

/// Merge a command's dependencies into `deps`, last write wins.
///
/// Returns how many entries were recorded.
pub fn record_dependencies(deps: &mut DependencyMap, kind: &CommandKind, body: &str) -> usize {
    let found = dependencies_from_command(kind, body);
    let count = found.len();
    for (name, spec) in found {
        if let Some(previous) = deps.insert(name.clone(), spec.clone()) {
            if previous != spec {
                tracing::debug!(dependency = %name, %previous, new = %spec, "Dependency overridden");
            }
        }
    }
    count
}

/// `name`, `name@version`, `name version` or `name https://...`
fn parse_declaration_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }

    let mut words = line.split_whitespace();
    let first = words.next()?;
    match words.next() {
        Some(spec) => {
            let (name, _) = parse_package_spec(first)?;
            Some((name, spec.to_string()))
        }
        None => parse_package_spec(first),
    }
}

/// Parse the packages named by one `npm install ...`-style invocation.
fn parse_install(command: &str) -> Vec<(String, String)> {
    let mut words = command.split_whitespace();
    let Some(manager) = words.next() else {
        return Vec::new();
    };
    let Some((_, subcommands)) = INSTALLERS.iter().find(|(m, _)| *m == manager) else {
        return Vec::new();
    };
    match words.next() {
        Some(sub) if subcommands.contains(&sub) => {}
        _ => return Vec::new(),
    }

    words
        .filter(|w| !w.starts_with('-'))
        .filter_map(parse_package_spec)
        .collect()
}

/// Split `name@version` (scoped names included) into name and version.
///
/// Returns `None` for words that cannot be package names.
pub fn parse_package_spec(spec: &str) -> Option<(String, String)> {
    let spec = spec.trim().trim_matches(|c| c == '"' || c == '\'');
    if spec.is_empty() {
        return None;
    }

    // A scoped package starts with '@'; its version separator is the
    // second '@'.
    let search_from = usize::from(spec.starts_with('@'));
    let (name, version) = match spec[search_from..].find('@') {
        Some(at) => {
            let at = at + search_from;
            (&spec[..at], &spec[at + 1..])
        }
        None => (spec, ""),
    };

    if !is_package_name(name) {
        return None;
    }
    let version = if version.is_empty() { DEFAULT_VERSION } else { version };
    Some((name.to_string(), version.to_string()))
}

fn is_package_name(name: &str) -> bool {
    let bare = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, pkg)) if !scope.is_empty() && !pkg.is_empty() => pkg,
            _ => return false,
        },
        None => name,
    };
    !bare.is_empty()
        && !bare.starts_with('.')
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(kind: CommandKind, body: &str) -> Vec<(String, String)> {
        dependencies_from_command(&kind, body)
    }

    fn pair(name: &str, version: &str) -> (String, String) {
        (name.to_string(), version.to_string())
    }

    #[test]
    fn test_dependency_lines() {
        let body = "react@18.2.0\nlodash\n\n# comment\nthree https://unpkg.com/three@0.160.0/build/three.min.js\nd3 7";
        assert_eq!(
            deps(CommandKind::Dependency, body),
            vec![
                pair("react", "18.2.0"),
                pair("lodash", "latest"),
                pair("three", "https://unpkg.com/three@0.160.0/build/three.min.js"),
                pair("d3", "7"),
            ]
        );
    }

    #[test]
    fn test_scoped_packages() {
        assert_eq!(
            parse_package_spec("@tanstack/react-query@5.0.0"),
            Some(pair("@tanstack/react-query", "5.0.0"))
        );
        assert_eq!(
            parse_package_spec("@types/node"),
            Some(pair("@types/node", "latest"))
        );
        assert_eq!(parse_package_spec("@broken"), None);
    }

    #[test]
    fn test_shell_install_lines() {
        let body = "cd app && npm install --save react@18 react-dom@18\nyarn add -D vite; ls -la";
        assert_eq!(
            deps(CommandKind::Shell, body),
            vec![
                pair("react", "18"),
                pair("react-dom", "18"),
                pair("vite", "latest"),
            ]
        );
    }

    #[test]
    fn test_non_install_shell_commands_declare_nothing() {
        assert!(deps(CommandKind::Shell, "npm run dev").is_empty());
        assert!(deps(CommandKind::Shell, "npm install").is_empty());
        assert!(deps(CommandKind::Shell, "rm -rf node_modules").is_empty());
        assert!(deps(CommandKind::Other("deploy".into()), "react").is_empty());
    }

    #[test]
    fn test_record_last_write_wins() {
        let mut map = DependencyMap::new();
        record_dependencies(&mut map, &CommandKind::Dependency, "react@17");
        let n = record_dependencies(&mut map, &CommandKind::Shell, "pnpm add react@18 zod");
        assert_eq!(n, 2);
        assert_eq!(map.get("react"), Some("18"));
        assert_eq!(map.get("zod"), Some("latest"));
        assert_eq!(map.len(), 2);
    }
}
