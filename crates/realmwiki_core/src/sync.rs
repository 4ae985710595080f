use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::cache::ExistenceCache;
use crate::config::DEFAULT_EDIT_SUMMARY;
use crate::error::RecordError;
use crate::existence::{BatchChecker, CheckOptions, Existence};
use crate::generate::{
    GeneratorOptions, MarkupGenerator, ResolvedMetadata, add_parent_realm_category,
};
use crate::metadata::MetadataResolver;
use crate::model::ObjectRecord;
use crate::parse::parse_detailed;
use crate::pool::{CancellationToken, run_bounded};
use crate::remote::{RemotePageStore, WikiSession};
use crate::title::{canonical_title, title_key, title_to_file_stem};

pub const DEFAULT_CONTENT_WORKERS: usize = 4;
pub const REVIEW_FILE_EXTENSION: &str = "wiki";
const DIFF_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Skipped,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub title: String,
    pub realm: String,
    pub action: SyncAction,
    /// What a publish would do: `Created` or `Updated`.
    pub planned: SyncAction,
    pub markup: String,
    pub content_hash: String,
    pub remote_state: Existence,
    /// The remote text already equals the regenerated markup.
    pub unchanged: bool,
    pub needs_manual_content: bool,
    pub diff: Option<String>,
    pub publish_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncFailure {
    pub title: String,
    pub realm: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
    pub failures: Vec<SyncFailure>,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub unchanged: usize,
    pub needs_manual_content: usize,
    pub publish_failures: usize,
    pub requests: usize,
    pub cancelled: bool,
}

impl SyncReport {
    fn record(&mut self, result: SyncResult) {
        match result.action {
            SyncAction::Created => self.created += 1,
            SyncAction::Updated => self.updated += 1,
            SyncAction::Skipped => self.skipped += 1,
        }
        if result.unchanged {
            self.unchanged += 1;
        }
        if result.needs_manual_content {
            self.needs_manual_content += 1;
        }
        if result.publish_error.is_some() {
            self.publish_failures += 1;
        }
        self.results.push(result);
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub generator: GeneratorOptions,
    pub check: CheckOptions,
    pub content_workers: usize,
    pub edit_summary: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            generator: GeneratorOptions::default(),
            check: CheckOptions::default(),
            content_workers: DEFAULT_CONTENT_WORKERS,
            edit_summary: DEFAULT_EDIT_SUMMARY.to_string(),
        }
    }
}

/// Per object: resolve, check, fetch, parse, generate, publish. The steps
/// for one object always run in that order; only the existence checks and
/// content fetches of `sync_all` fan out across workers.
pub struct SyncOrchestrator<'a, S: RemotePageStore + ?Sized> {
    store: &'a S,
    resolver: &'a MetadataResolver,
    cache: &'a ExistenceCache,
    session: Option<&'a WikiSession>,
    options: SyncOptions,
    generator: MarkupGenerator,
}

impl<'a, S: RemotePageStore + ?Sized> SyncOrchestrator<'a, S> {
    pub fn new(
        store: &'a S,
        resolver: &'a MetadataResolver,
        cache: &'a ExistenceCache,
        options: SyncOptions,
    ) -> Self {
        let generator = MarkupGenerator::new(options.generator);
        Self {
            store,
            resolver,
            cache,
            session: None,
            options,
            generator,
        }
    }

    pub fn with_session(mut self, session: &'a WikiSession) -> Self {
        self.session = Some(session);
        self
    }

    fn checker(&self) -> BatchChecker<'a, S> {
        BatchChecker::new(self.store, self.cache, self.options.check)
    }

    pub fn sync_one(
        &self,
        record: &ObjectRecord,
        force_publish: bool,
    ) -> Result<SyncResult, RecordError> {
        if record.name.trim().is_empty() {
            return Err(RecordError::EmptyName);
        }
        let title = canonical_title(&record.name);
        let state = self.checker().check_one(&title);
        let remote = if self.treat_as_existing(state) {
            self.fetch_remote(&title)
        } else {
            None
        };
        self.build_result(record, state, remote, force_publish)
    }

    pub fn sync_all(
        &self,
        records: &[ObjectRecord],
        force_publish: bool,
        cancel: &CancellationToken,
    ) -> SyncReport {
        let requests_before = self.store.request_count();
        let mut report = SyncReport::default();

        let titles: Vec<String> = records
            .iter()
            .filter(|record| !record.name.trim().is_empty())
            .map(|record| canonical_title(&record.name))
            .collect();
        let check = self.checker().check_all_detailed(&titles, cancel);
        let states: BTreeMap<String, Existence> = check
            .states
            .iter()
            .map(|(checked, state)| (title_key(checked), *state))
            .collect();
        let state_of = |title: &str| {
            states
                .get(&title_key(title))
                .copied()
                .unwrap_or(Existence::Unknown)
        };

        let mut queued: BTreeSet<String> = BTreeSet::new();
        let mut to_fetch: Vec<String> = Vec::new();
        for title in &titles {
            if self.treat_as_existing(state_of(title)) && queued.insert(title_key(title)) {
                to_fetch.push(title.clone());
            }
        }

        let mut contents: BTreeMap<String, Option<String>> = BTreeMap::new();
        if !to_fetch.is_empty() {
            info!(pages = to_fetch.len(), "fetching remote content");
            let fetched = run_bounded(
                &to_fetch,
                self.options.content_workers,
                cancel,
                |title| self.fetch_remote(title),
                |idx, text| {
                    contents.insert(title_key(&to_fetch[idx]), text);
                },
            );
            if let Err(error) = fetched {
                warn!(error = %error, "content fetch aborted");
            }
        }

        for record in records {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let title = canonical_title(&record.name);
            let state = state_of(&title);
            let remote = contents.get(&title_key(&title)).cloned().flatten();
            match self.build_result(record, state, remote, force_publish) {
                Ok(result) => report.record(result),
                Err(error) => {
                    warn!(realm = %record.realm_name, error = %error, "skipping invalid record");
                    report.failures.push(SyncFailure {
                        title,
                        realm: record.realm_name.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        if let Err(error) = self.cache.flush() {
            warn!(error = %error, "failed to flush existence cache");
        }
        report.cancelled |= check.cancelled;
        report.requests = self.store.request_count().saturating_sub(requests_before);
        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            unchanged = report.unchanged,
            failed = report.failures.len(),
            requests = report.requests,
            "sync finished"
        );
        report
    }

    fn treat_as_existing(&self, state: Existence) -> bool {
        self.options.check.unresolved.collapse(state) == Some(true)
    }

    fn fetch_remote(&self, title: &str) -> Option<String> {
        match self.store.fetch_content(title) {
            Ok(text) => text,
            Err(error) => {
                warn!(title = %title, error = %error, "failed to fetch remote content");
                None
            }
        }
    }

    fn build_result(
        &self,
        record: &ObjectRecord,
        state: Existence,
        remote: Option<String>,
        force_publish: bool,
    ) -> Result<SyncResult, RecordError> {
        if record.name.trim().is_empty() {
            return Err(RecordError::EmptyName);
        }
        let title = canonical_title(&record.name);
        let mut record = record.clone();

        if let Some(text) = &remote {
            let outcome = parse_detailed(text);
            if outcome.is_unrecognized() {
                warn!(title = %title, "remote page has no recognizable sections");
            }
            let recovered = outcome.sections;
            if !recovered.info.trim().is_empty() {
                record.sections.info = recovered.info;
            }
            if !recovered.obtaining.trim().is_empty() {
                record.sections.obtaining = recovered.obtaining;
            }
        }

        add_parent_realm_category(self.resolver, &mut record);

        let resolved = ResolvedMetadata::resolve(self.resolver, &record);
        let markup = self.generator.generate(&record, &resolved)?;
        let content_hash = compute_hash(&markup);

        let remote_exists = remote.is_some() || state == Existence::Exists;
        let planned = if remote_exists {
            SyncAction::Updated
        } else {
            SyncAction::Created
        };
        let unchanged = remote
            .as_deref()
            .is_some_and(|text| compute_hash(text.trim()) == compute_hash(markup.trim()));
        let diff = remote
            .as_deref()
            .filter(|_| !unchanged)
            .map(|text| unified_diff(&title, text, &markup));

        let mut result = SyncResult {
            title: title.clone(),
            realm: record.realm_name.clone(),
            action: SyncAction::Skipped,
            planned,
            markup,
            content_hash,
            remote_state: state,
            unchanged,
            needs_manual_content: record.sections.needs_manual_content(),
            diff,
            publish_error: None,
        };

        if unchanged || !force_publish {
            debug!(title = %title, unchanged, "not publishing");
            return Ok(result);
        }

        match self.publish(&title, &result.markup) {
            Ok(()) => {
                info!(title = %title, action = planned.as_str(), "published page");
                result.action = planned;
            }
            Err(error) => {
                warn!(title = %title, error = %error, "publish failed");
                result.publish_error = Some(format!("{error:#}"));
            }
        }
        Ok(result)
    }

    fn publish(&self, title: &str, markup: &str) -> Result<()> {
        let session = self
            .session
            .ok_or_else(|| anyhow::anyhow!("not logged in; publishing needs a wiki session"))?;
        let token = self
            .store
            .edit_token(session)
            .context("failed to get edit token")?;
        self.store
            .write_page(session, title, markup, &token, &self.options.edit_summary)
    }
}

/// Writes every changed page to `<review_dir>/<realm>/<title>.wiki`, with a
/// `.diff` next to it when the remote copy differs. Returns files written.
pub fn write_review_files(report: &SyncReport, review_dir: &Path) -> Result<usize> {
    let mut written = 0usize;
    for result in report.results.iter().filter(|result| !result.unchanged) {
        let realm_dir = review_dir.join(title_to_file_stem(&result.realm));
        fs::create_dir_all(&realm_dir)
            .with_context(|| format!("failed to create {}", realm_dir.display()))?;
        let stem = title_to_file_stem(&result.title);

        let page_path = realm_dir.join(format!("{stem}.{REVIEW_FILE_EXTENSION}"));
        fs::write(&page_path, &result.markup)
            .with_context(|| format!("failed to write {}", page_path.display()))?;
        written += 1;

        if let Some(diff) = &result.diff {
            let diff_path = realm_dir.join(format!("{stem}.diff"));
            fs::write(&diff_path, diff)
                .with_context(|| format!("failed to write {}", diff_path.display()))?;
            written += 1;
        }
    }
    Ok(written)
}

pub fn unified_diff(title: &str, remote: &str, generated: &str) -> String {
    TextDiff::from_lines(remote, generated)
        .unified_diff()
        .context_radius(DIFF_CONTEXT_LINES)
        .header(&format!("remote/{title}"), &format!("generated/{title}"))
        .to_string()
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use tempfile::tempdir;

    use super::*;
    use crate::metadata::{RealmThemeEntry, SubrealmEntry, ThemeTables};
    use crate::model::{DifficultyTier, Sections};
    use crate::remote::{ExistenceResponse, PageExistence};

    #[derive(Default)]
    struct MockStore {
        pages: BTreeMap<String, String>,
        failing_fetches: BTreeSet<String>,
        reject_writes: bool,
        writes: Mutex<Vec<(String, String, String)>>,
        request_count: AtomicUsize,
    }

    impl MockStore {
        fn with_page(title: &str, text: &str) -> Self {
            let mut store = Self::default();
            store.pages.insert(title.to_string(), text.to_string());
            store
        }

        fn writes(&self) -> Vec<(String, String, String)> {
            self.writes.lock().expect("writes").clone()
        }
    }

    impl RemotePageStore for MockStore {
        fn query_existence(&self, titles: &[String]) -> anyhow::Result<ExistenceResponse> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            Ok(ExistenceResponse {
                pages: titles
                    .iter()
                    .map(|title| PageExistence {
                        title: title.clone(),
                        missing: !self.pages.contains_key(title),
                    })
                    .collect(),
                normalized: Vec::new(),
            })
        }

        fn fetch_content(&self, title: &str) -> anyhow::Result<Option<String>> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            if self.failing_fetches.contains(title) {
                bail!("content request timed out");
            }
            Ok(self.pages.get(title).cloned())
        }

        fn edit_token(&self, _session: &WikiSession) -> anyhow::Result<String> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            Ok("token+\\".to_string())
        }

        fn write_page(
            &self,
            _session: &WikiSession,
            title: &str,
            text: &str,
            token: &str,
            summary: &str,
        ) -> anyhow::Result<()> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            assert_eq!(token, "token+\\");
            if self.reject_writes {
                bail!("MediaWiki API error [badtoken]: Invalid CSRF token.");
            }
            self.writes.lock().expect("writes").push((
                title.to_string(),
                text.to_string(),
                summary.to_string(),
            ));
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }
    }

    fn resolver() -> MetadataResolver {
        MetadataResolver::new(ThemeTables {
            difficulties: vec![
                DifficultyTier {
                    name: "Hard".to_string(),
                    icon_ref: "Hard.png".to_string(),
                    color_hex: "#FF7700".to_string(),
                    priority: 6,
                },
                DifficultyTier {
                    name: "Dreadful".to_string(),
                    icon_ref: "Dreadful.png".to_string(),
                    color_hex: "#db25ff".to_string(),
                    priority: 11,
                },
            ],
            realms: vec![RealmThemeEntry {
                label: "Main Realm".to_string(),
                image: "Goiky.png".to_string(),
                gradient: "-webkit-linear-gradient(#23bd1c,#188a13)".to_string(),
                accent: "#ffffff".to_string(),
            }],
            subrealms: vec![SubrealmEntry {
                label: "Meltdown".to_string(),
                parent: "Main Realm".to_string(),
                image: None,
                gradient: Some("-webkit-linear-gradient(#78ff78,#00ff00)".to_string()),
                accent: None,
            }],
            special_cases: BTreeMap::new(),
        })
    }

    fn dango() -> ObjectRecord {
        let mut record = ObjectRecord::new("Dango", "Hard", "Main Realm");
        record.description = "a sweet dumpling".to_string();
        record.sections = Sections::new("local info", "local obtaining");
        record.apply_image_default();
        record
    }

    fn remote_page(info: &str, obtaining: &str) -> String {
        format!(
            "{{{{CharacterInfo\n|name=Dango\n}}}}\n== Info ==\n{info}\n\n== Obtaining ==\n{obtaining}\n\n[[Category:Objects]]"
        )
    }

    #[test]
    fn new_page_is_planned_as_created_and_returned_for_review() {
        let store = MockStore::default();
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let result = orchestrator.sync_one(&dango(), false).expect("sync");
        assert_eq!(result.action, SyncAction::Skipped);
        assert_eq!(result.planned, SyncAction::Created);
        assert_eq!(result.remote_state, Existence::Absent);
        assert!(result.markup.contains("== Info ==\nlocal info"));
        assert!(!result.needs_manual_content);
        assert!(result.diff.is_none());
        assert_eq!(cache.get("Dango"), Some(false));
        assert!(store.writes().is_empty());
    }

    #[test]
    fn recovered_sections_win_over_record_values() {
        let store = MockStore::with_page("Dango", &remote_page("wiki info", "wiki obtaining"));
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let result = orchestrator.sync_one(&dango(), false).expect("sync");
        assert_eq!(result.planned, SyncAction::Updated);
        assert!(result.markup.contains("== Info ==\nwiki info"));
        assert!(result.markup.contains("== Obtaining ==\nwiki obtaining"));
        assert!(!result.markup.contains("local info"));
        assert!(result.diff.as_deref().is_some_and(|diff| diff.contains("+")));
    }

    #[test]
    fn empty_recovered_section_keeps_record_value() {
        let store = MockStore::with_page("Dango", &remote_page("wiki info", ""));
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let result = orchestrator.sync_one(&dango(), false).expect("sync");
        assert!(result.markup.contains("== Info ==\nwiki info"));
        assert!(result.markup.contains("== Obtaining ==\nlocal obtaining"));
    }

    #[test]
    fn publishing_writes_with_edit_summary() {
        let store = MockStore::default();
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let session = WikiSession::new("Spongybot");
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default())
            .with_session(&session);

        let result = orchestrator.sync_one(&dango(), true).expect("sync");
        assert_eq!(result.action, SyncAction::Created);
        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "Dango");
        assert_eq!(writes[0].1, result.markup);
        assert_eq!(writes[0].2, DEFAULT_EDIT_SUMMARY);
    }

    #[test]
    fn identical_remote_is_skipped_without_write() {
        let resolver = resolver();
        let generated = {
            let store = MockStore::default();
            let cache = ExistenceCache::in_memory();
            SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default())
                .sync_one(&dango(), false)
                .expect("sync")
                .markup
        };

        let store = MockStore::with_page("Dango", &format!("{generated}\n"));
        let cache = ExistenceCache::in_memory();
        let session = WikiSession::new("Spongybot");
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default())
            .with_session(&session);
        let result = orchestrator.sync_one(&dango(), true).expect("sync");
        assert!(result.unchanged);
        assert_eq!(result.action, SyncAction::Skipped);
        assert!(result.diff.is_none());
        assert!(store.writes().is_empty());
    }

    #[test]
    fn rejected_write_is_reported_not_raised() {
        let store = MockStore {
            reject_writes: true,
            ..MockStore::default()
        };
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let session = WikiSession::new("Spongybot");
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default())
            .with_session(&session);

        let result = orchestrator.sync_one(&dango(), true).expect("sync");
        assert_eq!(result.action, SyncAction::Skipped);
        assert!(
            result
                .publish_error
                .as_deref()
                .is_some_and(|error| error.contains("badtoken"))
        );
    }

    #[test]
    fn failed_fetch_degrades_to_no_content() {
        let mut store = MockStore::with_page("Dango", &remote_page("wiki info", "wiki obtaining"));
        store.failing_fetches.insert("Dango".to_string());
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let result = orchestrator.sync_one(&dango(), false).expect("sync");
        assert!(result.markup.contains("local info"));
        assert_eq!(result.planned, SyncAction::Updated);
    }

    #[test]
    fn subrealm_records_gain_parent_category() {
        let store = MockStore::default();
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());
        let mut record = dango();
        record.realm_name = "Meltdown".to_string();

        let result = orchestrator.sync_one(&record, false).expect("sync");
        assert!(result.markup.contains(
            "[[Category:Hard Objects]]\n[[Category:Objects]]\n[[Category:Meltdown Objects]]\n[[Category:Main Realm Objects]]\n"
        ));
        assert!(result.markup.contains("--theme-accent-color:-webkit-linear-gradient(#78ff78,#00ff00);"));
    }

    #[test]
    fn batch_continues_past_invalid_record() {
        let store = MockStore::with_page("Lamp", &remote_page("a lamp", "look up"));
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let mut lamp = ObjectRecord::new("Lamp", "Dreadful", "Main Realm");
        lamp.apply_image_default();
        let mut empty = ObjectRecord::new("  ", "Hard", "Main Realm");
        empty.description = "broken".to_string();
        let mut bare = ObjectRecord::new("Bare", "Hard", "Main Realm");
        bare.apply_image_default();

        let report =
            orchestrator.sync_all(&[dango(), empty, lamp, bare], false, &CancellationToken::new());
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error, "object record has an empty name");
        assert_eq!(report.skipped, 3);
        assert_eq!(report.needs_manual_content, 1);
        assert!(!report.cancelled);

        let lamp_result = report
            .results
            .iter()
            .find(|result| result.title == "Lamp")
            .expect("lamp result");
        assert_eq!(lamp_result.planned, SyncAction::Updated);
        assert!(lamp_result.markup.contains("mw-collapsible"));
        assert!(lamp_result.markup.contains("look up"));
    }

    #[test]
    fn publish_without_session_is_a_publish_failure() {
        let store = MockStore::default();
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());

        let report = orchestrator.sync_all(&[dango()], true, &CancellationToken::new());
        assert_eq!(report.publish_failures, 1);
        assert_eq!(report.created, 0);
        assert!(store.writes().is_empty());
    }

    #[test]
    fn cancelled_run_stops_before_generation() {
        let store = MockStore::default();
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator.sync_all(&[dango()], false, &cancel);
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(store.request_count(), 0);
    }

    #[test]
    fn case_variant_records_share_one_check_and_fetch() {
        let store = MockStore::with_page("Dango", &remote_page("wiki info", "wiki obtaining"));
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());
        let mut lowercase = dango();
        lowercase.name = "dango".to_string();

        let report =
            orchestrator.sync_all(&[dango(), lowercase], false, &CancellationToken::new());
        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert_eq!(result.remote_state, Existence::Exists);
            assert_eq!(result.planned, SyncAction::Updated);
            assert!(result.markup.contains("== Info ==\nwiki info"));
        }
        assert_eq!(report.requests, 2);
    }

    #[test]
    fn review_files_land_under_realm_directory() {
        let temp = tempdir().expect("tempdir");
        let store = MockStore::with_page("Dango", &remote_page("wiki info", "wiki obtaining"));
        let resolver = resolver();
        let cache = ExistenceCache::in_memory();
        let orchestrator = SyncOrchestrator::new(&store, &resolver, &cache, SyncOptions::default());
        let report = orchestrator.sync_all(&[dango()], false, &CancellationToken::new());

        let written = write_review_files(&report, temp.path()).expect("write review");
        assert_eq!(written, 2);
        let page = fs::read_to_string(temp.path().join("Main Realm").join("Dango.wiki"))
            .expect("read review page");
        assert_eq!(page, report.results[0].markup);
        assert!(temp.path().join("Main Realm").join("Dango.diff").exists());
    }
}
