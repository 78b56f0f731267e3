//! Lexical pre-filter for tool selection.
//!
//! Narrows the full catalog down to the few tools most relevant to a query
//! before the multi-step tier calls the reasoning backend. Scoring is plain
//! token overlap between the query and each tool's name and description; no
//! model call is involved.
//!
//! Results are cached per normalized query in a small LRU with a TTL. Each
//! entry remembers the catalog revision it was computed against, so a
//! registration change turns every older entry into a miss.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::types::Query;
use crate::config::ToolSelectionConfig;
use crate::tools::registry::{ToolCatalog, ToolDescriptor};

/// Words too common to signal relevance.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "at", "for", "with", "by", "from",
    "my", "me", "i", "you", "your", "it", "is", "are", "be", "this", "that", "them", "all",
    "please", "can", "could", "would", "what", "how", "do", "does", "some", "any",
];

// ─── Types ──────────────────────────────────────────────────────────────────

/// A tool with its relevance score for one query.
#[derive(Debug, Clone)]
pub struct ScoredTool {
    pub descriptor: ToolDescriptor,
    pub score: f64,
}

/// Ranked subset of the catalog, best first.
#[derive(Debug, Clone, Default)]
pub struct ToolSelection {
    pub tools: Vec<ScoredTool>,
}

impl ToolSelection {
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| &t.descriptor)
            .find(|d| d.name == name)
    }
}

/// Cache counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

// ─── Cache ──────────────────────────────────────────────────────────────────

struct CacheEntry {
    revision: u64,
    inserted_at: Instant,
    selection: ToolSelection,
}

/// LRU keyed by `"{max_tools}:{normalized query}"`.
struct SelectionCache {
    capacity: usize,
    ttl: Duration,
    items: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl SelectionCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            items: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn get(&mut self, key: &str, revision: u64) -> Option<ToolSelection> {
        let fresh = match self.items.get(key) {
            Some(entry) => entry.revision == revision && entry.inserted_at.elapsed() < self.ttl,
            None => {
                self.misses += 1;
                return None;
            }
        };

        if !fresh {
            self.remove(key);
            self.misses += 1;
            return None;
        }

        self.touch(key);
        self.hits += 1;
        self.items.get(key).map(|e| e.selection.clone())
    }

    fn insert(&mut self, key: String, revision: u64, selection: ToolSelection) {
        if self.items.len() >= self.capacity && !self.items.contains_key(&key) {
            if let Some(oldest) = self.order.pop_front() {
                self.items.remove(&oldest);
            }
        }
        self.touch(&key);
        self.items.insert(
            key,
            CacheEntry {
                revision,
                inserted_at: Instant::now(),
                selection,
            },
        );
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.items.remove(key);
        self.order.retain(|k| k != key);
    }

    fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.items.len(),
        }
    }
}

// ─── ToolSelector ───────────────────────────────────────────────────────────

/// Ranks catalog tools against a query. Safe to share across tasks.
pub struct ToolSelector {
    config: ToolSelectionConfig,
    cache: Mutex<SelectionCache>,
}

impl ToolSelector {
    pub fn new(config: ToolSelectionConfig) -> Self {
        let cache = SelectionCache::new(
            config.cache_capacity.max(1),
            Duration::from_secs(config.cache_ttl_secs),
        );
        Self {
            config,
            cache: Mutex::new(cache),
        }
    }

    /// Default cap from configuration.
    pub fn max_tools(&self) -> usize {
        self.config.max_tools
    }

    /// Return the top `max_tools` tools for `query`.
    ///
    /// Always returns `min(max_tools, catalog.len())` entries: tools with no
    /// lexical overlap still fill remaining slots in declaration order.
    pub fn select(&self, query: &Query, catalog: &ToolCatalog, max_tools: usize) -> ToolSelection {
        if catalog.is_empty() || max_tools == 0 {
            return ToolSelection::default();
        }

        let key = format!("{max_tools}:{}", query.normalized());
        if let Some(hit) = self.lock_cache().get(&key, catalog.revision()) {
            tracing::debug!(
                query = %query.normalized(),
                tools = ?hit.names(),
                "tool selection cache hit"
            );
            return hit;
        }

        let selection = self.rank(query.normalized(), catalog, max_tools);
        tracing::debug!(
            query = %query.normalized(),
            selected = ?selection.names(),
            catalog_size = catalog.len(),
            "tool selection computed"
        );

        self.lock_cache()
            .insert(key, catalog.revision(), selection.clone());
        selection
    }

    fn rank(&self, normalized: &str, catalog: &ToolCatalog, max_tools: usize) -> ToolSelection {
        let query_tokens = unique_tokens(normalized);

        let mut scored: Vec<ScoredTool> = catalog
            .iter()
            .map(|descriptor| ScoredTool {
                score: self.score(&query_tokens, descriptor),
                descriptor: descriptor.clone(),
            })
            .collect();

        // Stable sort keeps declaration order among equal scores.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(max_tools);

        ToolSelection { tools: scored }
    }

    /// Per query token: a name hit, else a description hit, else a prefix hit
    /// on either. Normalized by the number of query tokens.
    fn score(&self, query_tokens: &[String], tool: &ToolDescriptor) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let name_tokens: HashSet<String> = tokenize(&tool.name).collect();
        let desc_tokens: HashSet<String> = tokenize(&tool.description).collect();

        let total: f64 = query_tokens
            .iter()
            .map(|qt| {
                if name_tokens.contains(qt) {
                    self.config.name_weight
                } else if desc_tokens.contains(qt) {
                    self.config.description_weight
                } else if name_tokens
                    .iter()
                    .chain(desc_tokens.iter())
                    .any(|t| shares_prefix(qt, t))
                {
                    self.config.prefix_weight
                } else {
                    0.0
                }
            })
            .sum();

        total / query_tokens.len() as f64
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, SelectionCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ─── Tokenization ───────────────────────────────────────────────────────────

/// Lowercase alphanumeric tokens, stopwords and single characters removed.
/// Splits on `.`, `_`, `-` so `filesystem.list_dir` yields `filesystem`,
/// `list`, `dir`.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn unique_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text).filter(|t| seen.insert(t.clone())).collect()
}

/// Loose morphological match: `files`/`file`, `summarize`/`summary`.
fn shares_prefix(a: &str, b: &str) -> bool {
    const MIN_PREFIX: usize = 4;
    if a.len() < MIN_PREFIX || b.len() < MIN_PREFIX {
        return false;
    }
    let common = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    common >= MIN_PREFIX
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::testing::FnTool;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            description,
            json!({"type": "object", "properties": {}}),
            FnTool::arc(|_| Ok(json!({}))),
        )
    }

    fn catalog(n: usize) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(tool("filesystem.list_dir", "List files in a directory")).unwrap();
        catalog.register(tool("filesystem.read_file", "Read a text file")).unwrap();
        catalog.register(tool("calendar.create_event", "Create a calendar event")).unwrap();
        catalog.register(tool("email.send", "Send an email message")).unwrap();
        for i in 0..n.saturating_sub(4) {
            catalog
                .register(tool(&format!("misc.tool_{i}"), "Unrelated utility"))
                .unwrap();
        }
        catalog
    }

    fn selector() -> ToolSelector {
        ToolSelector::new(ToolSelectionConfig::default())
    }

    #[test]
    fn test_relevant_tools_rank_first() {
        let s = selector();
        let selection = s.select(&Query::new("read the file notes.txt"), &catalog(4), 2);
        assert_eq!(selection.names()[0], "filesystem.read_file");
        assert!(selection.tools[0].score > selection.tools[1].score);
    }

    #[test]
    fn test_narrowing_bound_large_catalog() {
        let s = selector();
        let catalog = catalog(30);
        for max in [1, 3, 5, 30] {
            let selection = s.select(&Query::new("send an email"), &catalog, max);
            assert_eq!(selection.len(), max);
        }
    }

    #[test]
    fn test_narrowing_bound_small_catalog() {
        let selection = selector().select(&Query::new("anything"), &catalog(4), 10);
        assert_eq!(selection.len(), 4);
    }

    #[test]
    fn test_empty_catalog_yields_empty_selection() {
        let selection = selector().select(&Query::new("list files"), &ToolCatalog::new(), 5);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let selection = selector().select(&Query::new("zzz qqq"), &catalog(6), 6);
        assert_eq!(
            selection.names(),
            vec![
                "filesystem.list_dir",
                "filesystem.read_file",
                "calendar.create_event",
                "email.send",
                "misc.tool_0",
                "misc.tool_1",
            ]
        );
        assert!(selection.tools.iter().all(|t| t.score == 0.0));
    }

    #[test]
    fn test_prefix_match_scores_plural_forms() {
        let selection = selector().select(&Query::new("directories"), &catalog(4), 1);
        assert_eq!(selection.names(), vec!["filesystem.list_dir"]);
        assert!(selection.tools[0].score > 0.0);
    }

    #[test]
    fn test_cache_hit_matches_fresh_computation() {
        let s = selector();
        let catalog = catalog(8);
        let first = s.select(&Query::new("List   FILES"), &catalog, 3);
        let second = s.select(&Query::new("list files"), &catalog, 3);
        assert_eq!(first.names(), second.names());
        let stats = s.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_cache_keyed_by_max_tools() {
        let s = selector();
        let catalog = catalog(8);
        assert_eq!(s.select(&Query::new("list files"), &catalog, 2).len(), 2);
        assert_eq!(s.select(&Query::new("list files"), &catalog, 4).len(), 4);
        assert_eq!(s.cache_stats().hits, 0);
    }

    #[test]
    fn test_catalog_change_invalidates_cache() {
        let s = selector();
        let mut catalog = catalog(4);
        let before = s.select(&Query::new("take a screenshot"), &catalog, 1);
        assert_ne!(before.names(), vec!["screen.capture"]);

        catalog
            .register(tool("screen.capture", "Take a screenshot of the display"))
            .unwrap();
        let after = s.select(&Query::new("take a screenshot"), &catalog, 1);
        assert_eq!(after.names(), vec!["screen.capture"]);
        assert_eq!(s.cache_stats().hits, 0);
    }

    #[test]
    fn test_distinct_catalogs_with_same_history_do_not_share_entries() {
        let s = selector();
        let mut mail = ToolCatalog::new();
        mail.register(tool("email.send", "Send an email message")).unwrap();
        let mut weather = ToolCatalog::new();
        weather
            .register(tool("weather.forecast", "Get the weather forecast"))
            .unwrap();

        let query = Query::new("weather forecast");
        assert_eq!(s.select(&query, &mail, 1).names(), vec!["email.send"]);
        let selected = s.select(&query, &weather, 1);
        let fresh = selector().select(&query, &weather, 1);
        assert_eq!(selected.names(), fresh.names());
        assert_eq!(selected.names(), vec!["weather.forecast"]);
        assert_eq!(s.cache_stats().hits, 0);
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let s = ToolSelector::new(ToolSelectionConfig {
            cache_ttl_secs: 0,
            ..ToolSelectionConfig::default()
        });
        let catalog = catalog(4);
        s.select(&Query::new("list files"), &catalog, 2);
        s.select(&Query::new("list files"), &catalog, 2);
        assert_eq!(s.cache_stats().hits, 0);
        assert_eq!(s.cache_stats().misses, 2);
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let s = ToolSelector::new(ToolSelectionConfig {
            cache_capacity: 2,
            ..ToolSelectionConfig::default()
        });
        let catalog = catalog(4);
        s.select(&Query::new("one"), &catalog, 1);
        s.select(&Query::new("two"), &catalog, 1);
        s.select(&Query::new("one"), &catalog, 1); // refresh "one"
        s.select(&Query::new("three"), &catalog, 1); // evicts "two"
        assert_eq!(s.cache_stats().entries, 2);

        s.select(&Query::new("one"), &catalog, 1);
        assert_eq!(s.cache_stats().hits, 2);
        s.select(&Query::new("two"), &catalog, 1);
        assert_eq!(s.cache_stats().hits, 2, "evicted entry must miss");
    }

    #[test]
    fn test_clear_cache() {
        let s = selector();
        s.select(&Query::new("list files"), &catalog(4), 2);
        s.clear_cache();
        assert_eq!(s.cache_stats().entries, 0);
    }

    #[test]
    fn test_tokenize_splits_qualified_names() {
        let tokens: Vec<String> = tokenize("filesystem.list_dir").collect();
        assert_eq!(tokens, vec!["filesystem", "list", "dir"]);
    }
}
