//! Per-file reconciliation of import requests emitted by independent rules.
//!
//! Rules never write `use` statements themselves. They call
//! [`FileContext::request_import`](crate::services::processor::FileContext::request_import)
//! and reference the symbol by its fully qualified name. Once every rule has run
//! on a file, [`ImportReconciler::resolve`] decides, request by request, whether a
//! new `use` statement can be added or whether the name has to stay fully qualified.
//!
//! Resolution is first-come, first-served in rule invocation order. Two rules
//! asking for `App\Log\Logger` and `Vendor\Logger` get different answers depending
//! on which ran first.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// The three independent import namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ImportKind {
    Class,
    Constant,
    Function,
}

impl ImportKind {
    /// Resolution order of the pending sequences
    pub const ALL: [ImportKind; 3] = [ImportKind::Class, ImportKind::Constant, ImportKind::Function];

    /// Keyword following `use` in a statement of this kind
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            ImportKind::Class => None,
            ImportKind::Constant => Some("const"),
            ImportKind::Function => Some("function"),
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportKind::Class => write!(f, "class"),
            ImportKind::Constant => write!(f, "constant"),
            ImportKind::Function => write!(f, "function"),
        }
    }
}

/// Last `\`-separated segment of a fully qualified name
pub fn short_name_of(target_name: &str) -> &str {
    target_name.rsplit('\\').next().unwrap_or(target_name)
}

fn normalize_target(target_name: &str) -> String {
    target_name.trim().trim_start_matches('\\').to_string()
}

/// A single import requested by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub kind: ImportKind,
    pub target_name: String,
    pub alias: Option<String>,
}

impl ImportRequest {
    pub fn new(kind: ImportKind, target_name: &str, alias: Option<&str>) -> Self {
        Self {
            kind,
            target_name: normalize_target(target_name),
            alias: alias.map(str::to_string),
        }
    }

    /// Name the symbol would be referenced by once imported
    pub fn short_name(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or_else(|| short_name_of(&self.target_name))
    }
}

/// Pending requests of one file, one ordered sequence per kind
#[derive(Debug, Clone, Default)]
pub struct FileImportState {
    classes: Vec<ImportRequest>,
    constants: Vec<ImportRequest>,
    functions: Vec<ImportRequest>,
}

impl FileImportState {
    fn push(&mut self, request: ImportRequest) {
        match request.kind {
            ImportKind::Class => self.classes.push(request),
            ImportKind::Constant => self.constants.push(request),
            ImportKind::Function => self.functions.push(request),
        }
    }

    pub fn requests(&self, kind: ImportKind) -> &[ImportRequest] {
        match kind {
            ImportKind::Class => &self.classes,
            ImportKind::Constant => &self.constants,
            ImportKind::Function => &self.functions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.constants.is_empty() && self.functions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len() + self.constants.len() + self.functions.len()
    }
}

/// An import already present in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingUse {
    pub alias: Option<String>,
    pub target_name: String,
}

/// Imports already declared in a file, keyed by short name per kind.
///
/// Built read-only from the current source at the start of reconciliation,
/// see [`UseStatements::extract`](crate::services::use_statements::UseStatements::extract).
#[derive(Debug, Clone, Default)]
pub struct ExistingUseMap {
    classes: IndexMap<String, ExistingUse>,
    constants: IndexMap<String, ExistingUse>,
    functions: IndexMap<String, ExistingUse>,
}

impl ExistingUseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: ImportKind, target_name: &str, alias: Option<&str>) {
        let target_name = normalize_target(target_name);
        let short = alias
            .map(str::to_string)
            .unwrap_or_else(|| short_name_of(&target_name).to_string());

        self.by_kind_mut(kind).entry(short).or_insert(ExistingUse {
            alias: alias.map(str::to_string),
            target_name,
        });
    }

    pub fn get(&self, kind: ImportKind, short_name: &str) -> Option<&ExistingUse> {
        self.by_kind(kind).get(short_name)
    }

    pub fn iter(&self, kind: ImportKind) -> impl Iterator<Item = (&String, &ExistingUse)> {
        self.by_kind(kind).iter()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.constants.is_empty() && self.functions.is_empty()
    }

    fn by_kind(&self, kind: ImportKind) -> &IndexMap<String, ExistingUse> {
        match kind {
            ImportKind::Class => &self.classes,
            ImportKind::Constant => &self.constants,
            ImportKind::Function => &self.functions,
        }
    }

    fn by_kind_mut(&mut self, kind: ImportKind) -> &mut IndexMap<String, ExistingUse> {
        match kind {
            ImportKind::Class => &mut self.classes,
            ImportKind::Constant => &mut self.constants,
            ImportKind::Function => &mut self.functions,
        }
    }
}

/// How a request ended up after resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportOutcome {
    /// A new `use` statement is added; the short name can be used
    AddedAsUse,
    /// Same kind and target already imported; the short name can be used
    AlreadyImported,
    /// The short name belongs to another target; reference must stay fully qualified
    KeepFullyQualified,
}

/// One resolved request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedImport {
    pub kind: ImportKind,
    /// Alias in effect for the symbol (the existing one for `AlreadyImported`)
    pub alias: Option<String>,
    pub target_name: String,
    pub outcome: ImportOutcome,
}

impl ResolvedImport {
    pub fn short_name(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or_else(|| short_name_of(&self.target_name))
    }

    /// Whether references to the target may be rendered by short name
    pub fn is_shortable(&self) -> bool {
        self.outcome != ImportOutcome::KeepFullyQualified
    }
}

/// Accumulates import requests per file and resolves them.
///
/// A job owns one reconciler and calls [`reset`](Self::reset) at every file
/// boundary, so state can never leak from one file into the next.
#[derive(Debug, Default)]
pub struct ImportReconciler {
    pending: IndexMap<Utf8PathBuf, FileImportState>,
}

impl ImportReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an import for a file. Never fails.
    pub fn record_import(
        &mut self,
        file_path: &Utf8Path,
        kind: ImportKind,
        target_name: &str,
        alias: Option<&str>,
    ) {
        let request = ImportRequest::new(kind, target_name, alias);
        tracing::trace!("Import requested for {}: {} {}", file_path, kind, request.target_name);

        self.pending
            .entry(file_path.to_path_buf())
            .or_default()
            .push(request);
    }

    pub fn has_pending(&self, file_path: &Utf8Path) -> bool {
        self.pending
            .get(file_path)
            .is_some_and(|state| !state.is_empty())
    }

    pub fn pending(&self, file_path: &Utf8Path) -> Option<&FileImportState> {
        self.pending.get(file_path)
    }

    /// Resolve every pending request of a file against its existing imports.
    ///
    /// Returns one entry per request, kinds in [`ImportKind::ALL`] order and
    /// insertion order within a kind. Pure: the accumulated state is not consumed.
    pub fn resolve(&self, file_path: &Utf8Path, existing: &ExistingUseMap) -> Vec<ResolvedImport> {
        let Some(state) = self.pending.get(file_path) else {
            return Vec::new();
        };

        // short name -> target, across every kind
        let mut taken: HashMap<String, String> = HashMap::new();
        // (kind, target) -> alias in effect
        let mut imported: HashMap<(ImportKind, String), Option<String>> = HashMap::new();

        for kind in ImportKind::ALL {
            for (short, existing_use) in existing.iter(kind) {
                taken
                    .entry(short.clone())
                    .or_insert_with(|| existing_use.target_name.clone());
                imported
                    .entry((kind, existing_use.target_name.clone()))
                    .or_insert_with(|| existing_use.alias.clone());
            }
        }

        let mut resolved = Vec::with_capacity(state.len());

        for kind in ImportKind::ALL {
            for request in state.requests(kind) {
                let key = (kind, request.target_name.clone());

                if let Some(alias) = imported.get(&key) {
                    resolved.push(ResolvedImport {
                        kind,
                        alias: alias.clone(),
                        target_name: request.target_name.clone(),
                        outcome: ImportOutcome::AlreadyImported,
                    });
                    continue;
                }

                let short = request.short_name().to_string();
                let outcome = match taken.get(&short) {
                    Some(target) if *target != request.target_name => {
                        ImportOutcome::KeepFullyQualified
                    }
                    _ => ImportOutcome::AddedAsUse,
                };

                if outcome == ImportOutcome::AddedAsUse {
                    taken.insert(short, request.target_name.clone());
                    imported.insert(key, request.alias.clone());
                } else {
                    tracing::debug!(
                        "Short name '{}' already taken in {}, keeping {} fully qualified",
                        request.short_name(),
                        file_path,
                        request.target_name
                    );
                }

                resolved.push(ResolvedImport {
                    kind,
                    alias: request.alias.clone(),
                    target_name: request.target_name.clone(),
                    outcome,
                });
            }
        }

        resolved
    }

    /// Drop the pending state of one file
    pub fn reset(&mut self, file_path: &Utf8Path) {
        self.pending.shift_remove(file_path);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn path() -> Utf8PathBuf {
        Utf8PathBuf::from("/project/src/Service.php")
    }

    #[test]
    fn test_resolve_without_pending_is_empty() {
        let reconciler = ImportReconciler::new();
        assert!(!reconciler.has_pending(&path()));
        assert!(reconciler.resolve(&path(), &ExistingUseMap::new()).is_empty());
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name_of("App\\Log\\Logger"), "Logger");
        assert_eq!(short_name_of("Logger"), "Logger");

        let request = ImportRequest::new(ImportKind::Class, "\\App\\Log\\Logger", Some("AppLogger"));
        assert_eq!(request.target_name, "App\\Log\\Logger");
        assert_eq!(request.short_name(), "AppLogger");
    }

    #[test]
    fn test_new_import_added_as_use() {
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);

        let resolved = reconciler.resolve(&path(), &ExistingUseMap::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
        assert_eq!(resolved[0].short_name(), "Logger");
    }

    #[test]
    fn test_collision_with_existing_use_keeps_fully_qualified() {
        let mut existing = ExistingUseMap::new();
        existing.insert(ImportKind::Class, "Vendor\\Logger", None);

        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);

        let resolved = reconciler.resolve(&path(), &existing);
        assert_eq!(resolved[0].outcome, ImportOutcome::KeepFullyQualified);
    }

    #[test]
    fn test_collision_between_pending_requests_is_first_come_first_served() {
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);
        reconciler.record_import(&path(), ImportKind::Class, "Vendor\\Logger", None);

        let resolved = reconciler.resolve(&path(), &ExistingUseMap::new());
        assert_eq!(resolved[0].target_name, "App\\Log\\Logger");
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
        assert_eq!(resolved[1].target_name, "Vendor\\Logger");
        assert_eq!(resolved[1].outcome, ImportOutcome::KeepFullyQualified);
    }

    #[test]
    fn test_rule_order_changes_winner() {
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "Vendor\\Logger", None);
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);

        let resolved = reconciler.resolve(&path(), &ExistingUseMap::new());
        assert_eq!(resolved[0].target_name, "Vendor\\Logger");
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
        assert_eq!(resolved[1].outcome, ImportOutcome::KeepFullyQualified);
    }

    #[test]
    fn test_duplicate_request_is_already_imported() {
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);
        reconciler.record_import(&path(), ImportKind::Class, "\\App\\Log\\Logger", None);

        let resolved = reconciler.resolve(&path(), &ExistingUseMap::new());
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
        assert_eq!(resolved[1].outcome, ImportOutcome::AlreadyImported);
    }

    #[test]
    fn test_existing_aliased_import_reuses_alias() {
        let mut existing = ExistingUseMap::new();
        existing.insert(ImportKind::Class, "App\\Log\\Logger", Some("AppLogger"));

        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", None);

        let resolved = reconciler.resolve(&path(), &existing);
        assert_eq!(resolved[0].outcome, ImportOutcome::AlreadyImported);
        assert_eq!(resolved[0].short_name(), "AppLogger");
    }

    #[test]
    fn test_alias_avoids_collision() {
        let mut existing = ExistingUseMap::new();
        existing.insert(ImportKind::Class, "Vendor\\Logger", None);

        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Log\\Logger", Some("AppLogger"));

        let resolved = reconciler.resolve(&path(), &existing);
        assert_eq!(resolved[0].outcome, ImportOutcome::AddedAsUse);
    }

    #[test]
    fn test_short_names_collide_across_kinds() {
        let mut existing = ExistingUseMap::new();
        existing.insert(ImportKind::Function, "Vendor\\format", None);

        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Constant, "App\\format", None);

        let resolved = reconciler.resolve(&path(), &existing);
        assert_eq!(resolved[0].outcome, ImportOutcome::KeepFullyQualified);
    }

    #[test]
    fn test_kinds_resolve_class_constant_function() {
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Function, "App\\strlen_safe", None);
        reconciler.record_import(&path(), ImportKind::Constant, "App\\VERSION", None);
        reconciler.record_import(&path(), ImportKind::Class, "App\\Kernel", None);

        let kinds: Vec<ImportKind> = reconciler
            .resolve(&path(), &ExistingUseMap::new())
            .iter()
            .map(|r| r.kind)
            .collect();

        assert_eq!(kinds, ImportKind::ALL.to_vec());
    }

    #[test]
    fn test_state_is_per_file_and_reset() {
        let other = Utf8PathBuf::from("/project/src/Other.php");
        let mut reconciler = ImportReconciler::new();
        reconciler.record_import(&path(), ImportKind::Class, "App\\Kernel", None);

        assert!(reconciler.has_pending(&path()));
        assert!(!reconciler.has_pending(&other));

        reconciler.reset(&path());
        assert!(!reconciler.has_pending(&path()));
        assert!(reconciler.resolve(&path(), &ExistingUseMap::new()).is_empty());
    }

    fn arb_target() -> impl Strategy<Value = String> {
        (prop::sample::select(vec!["App", "Vendor", "Lib"]), prop::sample::select(vec!["Logger", "Cache", "Kernel"]))
            .prop_map(|(ns, name)| format!("{}\\{}", ns, name))
    }

    fn arb_kind() -> impl Strategy<Value = ImportKind> {
        prop::sample::select(ImportKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_resolve_is_idempotent(requests in prop::collection::vec((arb_kind(), arb_target()), 0..12)) {
            let mut reconciler = ImportReconciler::new();
            for (kind, target) in &requests {
                reconciler.record_import(&path(), *kind, target, None);
            }

            let first = reconciler.resolve(&path(), &ExistingUseMap::new());
            let second = reconciler.resolve(&path(), &ExistingUseMap::new());
            prop_assert_eq!(first.len(), requests.len());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_no_short_name_maps_to_two_targets(
            existing_targets in prop::collection::vec(arb_target(), 0..3),
            requests in prop::collection::vec((arb_kind(), arb_target()), 0..12),
        ) {
            let mut existing = ExistingUseMap::new();
            for target in &existing_targets {
                existing.insert(ImportKind::Class, target, None);
            }

            let mut reconciler = ImportReconciler::new();
            for (kind, target) in &requests {
                reconciler.record_import(&path(), *kind, target, None);
            }

            let mut short_to_target: HashMap<String, String> = HashMap::new();
            for kind in ImportKind::ALL {
                for (short, existing_use) in existing.iter(kind) {
                    short_to_target.entry(short.clone()).or_insert_with(|| existing_use.target_name.clone());
                }
            }

            let mut added: HashSet<(ImportKind, String)> = HashSet::new();
            for resolved in reconciler.resolve(&path(), &existing) {
                if resolved.outcome != ImportOutcome::AddedAsUse {
                    continue;
                }
                prop_assert!(added.insert((resolved.kind, resolved.target_name.clone())));

                let target = short_to_target
                    .entry(resolved.short_name().to_string())
                    .or_insert_with(|| resolved.target_name.clone());
                prop_assert_eq!(target.as_str(), resolved.target_name.as_str());
            }
        }
    }
}
