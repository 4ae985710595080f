use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::ExistenceCache;
use crate::pool::{CancellationToken, run_bounded};
use crate::remote::{ExistenceResponse, RemotePageStore};
use crate::title::{canonical_title, loose_title_key, title_key};

pub const DEFAULT_BATCH_THRESHOLD: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_EXISTENCE_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    Exists,
    Absent,
    /// The query failed or the answer could not be matched to the title.
    Unknown,
}

impl Existence {
    pub fn from_bool(exists: bool) -> Self {
        if exists { Self::Exists } else { Self::Absent }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Exists => Some(true),
            Self::Absent => Some(false),
            Self::Unknown => None,
        }
    }
}

/// How `Unknown` is reported at the boolean boundary. Unknown answers are
/// never written to the cache, whatever the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    #[default]
    AssumeAbsent,
    AssumePresent,
    LeaveUnresolved,
}

impl UnresolvedPolicy {
    pub fn collapse(self, state: Existence) -> Option<bool> {
        match (state, self) {
            (Existence::Unknown, Self::AssumeAbsent) => Some(false),
            (Existence::Unknown, Self::AssumePresent) => Some(true),
            (Existence::Unknown, Self::LeaveUnresolved) => None,
            (known, _) => known.as_bool(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssumeAbsent => "absent",
            Self::AssumePresent => "present",
            Self::LeaveUnresolved => "leave",
        }
    }
}

impl FromStr for UnresolvedPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "absent" | "assume_absent" | "false" => Ok(Self::AssumeAbsent),
            "present" | "assume_present" | "true" => Ok(Self::AssumePresent),
            "leave" | "unknown" | "leave_unresolved" => Ok(Self::LeaveUnresolved),
            other => bail!("unsupported unresolved policy: {other} (expected absent|present|leave)"),
        }
    }
}

impl fmt::Display for UnresolvedPolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStrategy {
    PerTitle,
    Batched,
}

pub fn select_strategy(pending: usize, batch_threshold: usize) -> CheckStrategy {
    if pending < batch_threshold {
        CheckStrategy::PerTitle
    } else {
        CheckStrategy::Batched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    pub batch_threshold: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub unresolved: UnresolvedPolicy,
    /// Drop cached answers for the requested titles before checking.
    pub force_recheck: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            batch_threshold: DEFAULT_BATCH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_EXISTENCE_WORKERS,
            unresolved: UnresolvedPolicy::default(),
            force_recheck: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    /// Keyed by the titles as the caller spelled them. Titles left unresolved
    /// by policy, or never reached before cancellation, are absent.
    pub results: BTreeMap<String, bool>,
    /// Keyed by canonical title.
    pub states: BTreeMap<String, Existence>,
    pub from_cache: usize,
    pub queried: usize,
    pub unknown: usize,
    pub strategy: Option<CheckStrategy>,
    pub requests: usize,
    pub cancelled: bool,
}

pub struct BatchChecker<'a, S: RemotePageStore + ?Sized> {
    store: &'a S,
    cache: &'a ExistenceCache,
    options: CheckOptions,
}

impl<'a, S: RemotePageStore + ?Sized> BatchChecker<'a, S> {
    pub fn new(store: &'a S, cache: &'a ExistenceCache, options: CheckOptions) -> Self {
        Self {
            store,
            cache,
            options,
        }
    }

    pub fn options(&self) -> CheckOptions {
        self.options
    }

    pub fn check_all(&self, titles: &[String]) -> BTreeMap<String, bool> {
        self.check_all_detailed(titles, &CancellationToken::new())
            .results
    }

    /// Single-title form used by the per-record sync path.
    pub fn check_one(&self, title: &str) -> Existence {
        let report = self.check_all_detailed(&[title.to_string()], &CancellationToken::new());
        report
            .states
            .get(&canonical_title(title))
            .copied()
            .unwrap_or(Existence::Unknown)
    }

    pub fn check_all_detailed(
        &self,
        titles: &[String],
        cancel: &CancellationToken,
    ) -> CheckReport {
        let _guard = self.cache.lock_checks();
        let requests_before = self.store.request_count();
        let mut report = CheckReport::default();

        let mut unique: BTreeMap<String, String> = BTreeMap::new();
        for title in titles {
            let canonical = canonical_title(title);
            if canonical.is_empty() {
                continue;
            }
            unique.entry(title_key(&canonical)).or_insert(canonical);
        }

        let mut pending = Vec::new();
        for title in unique.values() {
            if self.options.force_recheck {
                self.cache.invalidate(title);
            }
            match self.cache.get(title) {
                Some(exists) => {
                    report.from_cache += 1;
                    report
                        .states
                        .insert(title.clone(), Existence::from_bool(exists));
                }
                None => pending.push(title.clone()),
            }
        }

        if !pending.is_empty() {
            let strategy = select_strategy(pending.len(), self.options.batch_threshold);
            let units: Vec<Vec<String>> = match strategy {
                CheckStrategy::PerTitle => pending.iter().map(|title| vec![title.clone()]).collect(),
                CheckStrategy::Batched => pending
                    .chunks(self.options.batch_size.max(1))
                    .map(<[String]>::to_vec)
                    .collect(),
            };
            info!(
                pending = pending.len(),
                cached = report.from_cache,
                strategy = ?strategy,
                units = units.len(),
                "checking page existence"
            );

            let store = self.store;
            let outcome = run_bounded(
                &units,
                self.options.workers,
                cancel,
                |unit| store.query_existence(unit),
                |idx, response| {
                    let unit = &units[idx];
                    let states = match response {
                        Ok(response) => match_response(unit, &response),
                        Err(error) => {
                            warn!(titles = unit.len(), error = %error, "existence query failed");
                            unit.iter()
                                .map(|title| (title.clone(), Existence::Unknown))
                                .collect()
                        }
                    };
                    for (title, state) in states {
                        if let Some(exists) = state.as_bool() {
                            self.cache.put(&title, exists);
                        } else {
                            report.unknown += 1;
                        }
                        debug!(title = %title, state = ?state, "existence resolved");
                        report.queried += 1;
                        report.states.insert(title, state);
                    }
                },
            );
            match outcome {
                Ok(outcome) => report.cancelled = outcome.cancelled,
                Err(error) => {
                    warn!(error = %error, "existence check aborted");
                    report.cancelled = true;
                }
            }
            report.strategy = Some(strategy);
        }

        for title in titles {
            let Some(state) = unique
                .get(&title_key(title))
                .and_then(|canonical| report.states.get(canonical))
            else {
                continue;
            };
            if let Some(exists) = self.options.unresolved.collapse(*state) {
                report.results.insert(title.clone(), exists);
            }
        }
        report.requests = self.store.request_count().saturating_sub(requests_before);
        report
    }
}

/// Maps every requested title to an answer. The wiki's normalization table
/// is applied first; pages are then matched case-insensitively, and finally
/// with apostrophes removed.
pub fn match_response(requested: &[String], response: &ExistenceResponse) -> Vec<(String, Existence)> {
    let normalized: BTreeMap<String, &str> = response
        .normalized
        .iter()
        .map(|(from, to)| (title_key(from), to.as_str()))
        .collect();

    requested
        .iter()
        .map(|title| {
            let target = normalized
                .get(&title_key(title))
                .copied()
                .unwrap_or(title.as_str());
            let target_key = title_key(target);
            let page = response
                .pages
                .iter()
                .find(|page| title_key(&page.title) == target_key)
                .or_else(|| {
                    let loose = loose_title_key(target);
                    response
                        .pages
                        .iter()
                        .find(|page| loose_title_key(&page.title) == loose)
                });
            let state = match page {
                Some(page) => Existence::from_bool(!page.missing),
                None => Existence::Unknown,
            };
            (title.clone(), state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    use super::*;
    use crate::remote::{PageExistence, WikiSession};

    #[derive(Default)]
    struct MockStore {
        existing: BTreeSet<String>,
        failing: BTreeSet<String>,
        request_count: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
    }

    impl MockStore {
        fn with_pages(pages: &[&str]) -> Self {
            Self {
                existing: pages.iter().map(|page| page.to_string()).collect(),
                ..Self::default()
            }
        }
    }

    impl RemotePageStore for MockStore {
        fn query_existence(&self, titles: &[String]) -> anyhow::Result<ExistenceResponse> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes
                .lock()
                .expect("batch sizes")
                .push(titles.len());
            if titles.iter().any(|title| self.failing.contains(title)) {
                bail!("request timed out");
            }
            let mut response = ExistenceResponse::default();
            for title in titles {
                let found = self
                    .existing
                    .iter()
                    .find(|page| loose_title_key(page) == loose_title_key(title));
                match found {
                    Some(page) => response.pages.push(PageExistence {
                        title: page.clone(),
                        missing: false,
                    }),
                    None => response.pages.push(PageExistence {
                        title: title.clone(),
                        missing: true,
                    }),
                }
            }
            Ok(response)
        }

        fn fetch_content(&self, _title: &str) -> anyhow::Result<Option<String>> {
            bail!("not used")
        }

        fn edit_token(&self, _session: &WikiSession) -> anyhow::Result<String> {
            bail!("not used")
        }

        fn write_page(
            &self,
            _session: &WikiSession,
            _title: &str,
            _text: &str,
            _token: &str,
            _summary: &str,
        ) -> anyhow::Result<()> {
            bail!("not used")
        }

        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }
    }

    fn titles(count: usize) -> Vec<String> {
        (0..count).map(|idx| format!("Object {idx}")).collect()
    }

    #[test]
    fn repeated_check_is_served_from_cache() {
        let store = MockStore::with_pages(&["Dango", "Lamp"]);
        let cache = ExistenceCache::in_memory();
        let checker = BatchChecker::new(&store, &cache, CheckOptions::default());
        let wanted = vec!["Dango".to_string(), "Lamp".to_string(), "Ghost".to_string()];

        let first = checker.check_all(&wanted);
        assert_eq!(first.get("Dango"), Some(&true));
        assert_eq!(first.get("Ghost"), Some(&false));
        for title in &wanted {
            assert!(cache.get(title).is_some(), "{title} must be cached");
        }

        let before = store.request_count();
        let second = checker.check_all(&wanted);
        assert_eq!(store.request_count(), before);
        assert_eq!(first, second);
    }

    #[test]
    fn batched_and_per_title_strategies_agree() {
        let wanted = titles(120);
        let existing: Vec<&str> = wanted.iter().step_by(3).map(String::as_str).collect();

        let batched_store = MockStore::with_pages(&existing);
        let batched_cache = ExistenceCache::in_memory();
        let batched = BatchChecker::new(&batched_store, &batched_cache, CheckOptions::default())
            .check_all_detailed(&wanted, &CancellationToken::new());

        let single_store = MockStore::with_pages(&existing);
        let single_cache = ExistenceCache::in_memory();
        let single = BatchChecker::new(
            &single_store,
            &single_cache,
            CheckOptions {
                batch_threshold: 1_000,
                ..CheckOptions::default()
            },
        )
        .check_all_detailed(&wanted, &CancellationToken::new());

        assert_eq!(batched.strategy, Some(CheckStrategy::Batched));
        assert_eq!(single.strategy, Some(CheckStrategy::PerTitle));
        assert_eq!(batched.results, single.results);
        assert_eq!(batched_store.request_count(), 3);
        assert_eq!(single_store.request_count(), 120);
        let mut sizes = batched_store.batch_sizes.lock().expect("sizes").clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![20, 50, 50]);
    }

    #[test]
    fn strategy_threshold_is_inclusive() {
        assert_eq!(select_strategy(99, 100), CheckStrategy::PerTitle);
        assert_eq!(select_strategy(100, 100), CheckStrategy::Batched);
    }

    #[test]
    fn apostrophe_encodings_still_match() {
        let store = MockStore::with_pages(&["Bob's Hat"]);
        let cache = ExistenceCache::in_memory();
        let checker = BatchChecker::new(&store, &cache, CheckOptions::default());
        let results = checker.check_all(&["Bob&#39;s Hat".to_string()]);
        assert_eq!(results.get("Bob&#39;s Hat"), Some(&true));
    }

    #[test]
    fn normalization_table_is_applied_before_matching() {
        let response = ExistenceResponse {
            pages: vec![PageExistence {
                title: "Golden Apple".to_string(),
                missing: false,
            }],
            normalized: vec![("golden_apple".to_string(), "Golden Apple".to_string())],
        };
        let matched = match_response(&["golden_apple".to_string()], &response);
        assert_eq!(matched, vec![("golden_apple".to_string(), Existence::Exists)]);

        let unmatched = match_response(&["Other".to_string()], &response);
        assert_eq!(unmatched[0].1, Existence::Unknown);
    }

    #[test]
    fn failed_queries_follow_unresolved_policy() {
        let mut store = MockStore::with_pages(&["Dango"]);
        store.failing.insert("Lamp".to_string());
        let wanted = vec!["Dango".to_string(), "Lamp".to_string()];

        let cache = ExistenceCache::in_memory();
        let report = BatchChecker::new(&store, &cache, CheckOptions::default())
            .check_all_detailed(&wanted, &CancellationToken::new());
        assert_eq!(report.results.get("Lamp"), Some(&false));
        assert_eq!(report.states.get("Lamp"), Some(&Existence::Unknown));
        assert_eq!(report.unknown, 1);
        assert_eq!(cache.get("Lamp"), None);
        assert_eq!(cache.get("Dango"), Some(true));

        let present = BatchChecker::new(
            &store,
            &cache,
            CheckOptions {
                unresolved: UnresolvedPolicy::AssumePresent,
                ..CheckOptions::default()
            },
        )
        .check_all(&wanted);
        assert_eq!(present.get("Lamp"), Some(&true));

        let leave = BatchChecker::new(
            &store,
            &cache,
            CheckOptions {
                unresolved: UnresolvedPolicy::LeaveUnresolved,
                ..CheckOptions::default()
            },
        )
        .check_all(&wanted);
        assert!(!leave.contains_key("Lamp"));
        assert_eq!(leave.get("Dango"), Some(&true));
    }

    #[test]
    fn duplicate_spellings_share_one_query() {
        let store = MockStore::with_pages(&["Dango"]);
        let cache = ExistenceCache::in_memory();
        let checker = BatchChecker::new(&store, &cache, CheckOptions::default());
        let results = checker.check_all(&["Dango".to_string(), "dango".to_string()]);
        assert_eq!(store.request_count(), 1);
        assert_eq!(results.get("dango"), Some(&true));
        assert_eq!(results.get("Dango"), Some(&true));
    }

    #[test]
    fn force_recheck_bypasses_cache() {
        let store = MockStore::with_pages(&["Dango"]);
        let cache = ExistenceCache::in_memory();
        cache.put("Dango", false);
        let checker = BatchChecker::new(
            &store,
            &cache,
            CheckOptions {
                force_recheck: true,
                ..CheckOptions::default()
            },
        );
        assert_eq!(checker.check_one("Dango"), Existence::Exists);
        assert_eq!(cache.get("Dango"), Some(true));
        assert_eq!(store.request_count(), 1);
    }

    #[test]
    fn policy_parses_config_spellings() {
        assert_eq!(
            "absent".parse::<UnresolvedPolicy>().expect("parse"),
            UnresolvedPolicy::AssumeAbsent
        );
        assert_eq!(
            "Leave".parse::<UnresolvedPolicy>().expect("parse"),
            UnresolvedPolicy::LeaveUnresolved
        );
        assert!("maybe".parse::<UnresolvedPolicy>().is_err());
        assert_eq!(UnresolvedPolicy::AssumePresent.to_string(), "present");
    }
}
