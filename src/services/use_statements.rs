use crate::services::imports::{ExistingUseMap, ImportKind, ImportOutcome, ResolvedImport};
use regex::Regex;

/// Line-oriented reader and printer of top-level `use` statements.
///
/// Stands in for a full syntax tree: it derives the [`ExistingUseMap`] of a
/// source file and renders resolved imports back into the text.
///
/// Only unindented statements count as imports, so trait uses inside class
/// bodies are ignored. Group uses (`use A\{B, C};`) are not recognized.
pub struct UseStatements {
    /// `use [function|const] Name\Space[ as Alias];`
    use_pattern: Regex,

    /// `namespace Name\Space;`
    namespace_pattern: Regex,
}

impl UseStatements {
    pub fn new() -> Self {
        Self {
            use_pattern: Regex::new(
                r"^use\s+(?:(function|const)\s+)?\\?([A-Za-z_][A-Za-z0-9_\\]*)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?\s*;",
            )
            .expect("Invalid use regex"),
            namespace_pattern: Regex::new(r"^namespace\s+[A-Za-z_][A-Za-z0-9_\\]*\s*;")
                .expect("Invalid namespace regex"),
        }
    }

    /// Collect the imports already declared in `source`
    pub fn extract(&self, source: &str) -> ExistingUseMap {
        let mut existing = ExistingUseMap::new();

        for line in source.lines() {
            let Some(captures) = self.use_pattern.captures(line) else {
                continue;
            };

            let kind = match captures.get(1).map(|m| m.as_str()) {
                Some("function") => ImportKind::Function,
                Some("const") => ImportKind::Constant,
                _ => ImportKind::Class,
            };
            let target = &captures[2];
            let alias = captures.get(3).map(|m| m.as_str());

            existing.insert(kind, target, alias);
        }

        existing
    }

    /// Apply resolved imports to `source`.
    ///
    /// Fully qualified references (`\App\Kernel`) of every shortable import are
    /// replaced with the short name, and a `use` line is inserted for each
    /// [`ImportOutcome::AddedAsUse`]. `KeepFullyQualified` entries are left alone.
    pub fn render(&self, source: &str, resolved: &[ResolvedImport]) -> String {
        let mut output = source.to_string();

        for import in resolved.iter().filter(|i| i.is_shortable()) {
            output = replace_qualified_references(&output, &import.target_name, import.short_name());
        }

        let new_lines: Vec<String> = resolved
            .iter()
            .filter(|i| i.outcome == ImportOutcome::AddedAsUse)
            .map(format_use_line)
            .collect();

        if new_lines.is_empty() {
            return output;
        }

        self.insert_use_lines(&output, &new_lines)
    }

    fn insert_use_lines(&self, source: &str, new_lines: &[String]) -> String {
        let lines: Vec<&str> = source.lines().collect();

        let last_use = lines.iter().rposition(|l| self.use_pattern.is_match(l));
        let namespace = lines.iter().position(|l| self.namespace_pattern.is_match(l));
        let open_tag = lines.iter().position(|l| l.trim_start().starts_with("<?php"));

        let mut result: Vec<String> = Vec::with_capacity(lines.len() + new_lines.len() + 1);

        match (last_use, namespace.or(open_tag)) {
            (Some(index), _) => {
                result.extend(lines[..=index].iter().map(|l| l.to_string()));
                result.extend(new_lines.iter().cloned());
                result.extend(lines[index + 1..].iter().map(|l| l.to_string()));
            }
            (None, Some(index)) => {
                result.extend(lines[..=index].iter().map(|l| l.to_string()));
                result.push(String::new());
                result.extend(new_lines.iter().cloned());
                if lines.get(index + 1).is_some_and(|l| !l.trim().is_empty()) {
                    result.push(String::new());
                }
                result.extend(lines[index + 1..].iter().map(|l| l.to_string()));
            }
            (None, None) => {
                result.extend(new_lines.iter().cloned());
                result.push(String::new());
                result.extend(lines.iter().map(|l| l.to_string()));
            }
        }

        let mut rendered = result.join("\n");
        if source.ends_with('\n') {
            rendered.push('\n');
        }
        rendered
    }
}

impl Default for UseStatements {
    fn default() -> Self {
        Self::new()
    }
}

fn format_use_line(import: &ResolvedImport) -> String {
    let keyword = import
        .kind
        .keyword()
        .map(|k| format!("{} ", k))
        .unwrap_or_default();

    match &import.alias {
        Some(alias) => format!("use {}{} as {};", keyword, import.target_name, alias),
        None => format!("use {}{};", keyword, import.target_name),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '\\'
}

/// Replace whole-name occurrences of `\target` with `replacement`
pub fn replace_qualified_references(source: &str, target: &str, replacement: &str) -> String {
    let needle = format!("\\{}", target);
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;

    for (start, _) in source.match_indices(&needle) {
        if start < cursor {
            continue;
        }
        let end = start + needle.len();

        let preceded = source[..start].chars().next_back().is_some_and(is_name_char);
        let followed = source[end..].chars().next().is_some_and(is_name_char);
        if preceded || followed {
            continue;
        }

        output.push_str(&source[cursor..start]);
        output.push_str(replacement);
        cursor = end;
    }

    output.push_str(&source[cursor..]);
    output
}
