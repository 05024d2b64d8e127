//! Identity resolution: app display name -> installed package -> launcher
//! entry point, backed by a 24 hour in-memory cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error_codes::IconError;
use crate::system::{parse_package_lines, PackageShell};

pub const RESOLVER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MIN_MATCH_SCORE: i32 = 2;
const EXACT_MATCH_SCORE: i32 = 100;
const CONTAINS_SEARCH_SCORE: i32 = 50;
const CONTAINED_BY_SEARCH_SCORE: i32 = 30;
const CHARACTER_HIT_SCORE: i32 = 5;

const COMPONENT_MARKER: &str = "Activity #";
const MAIN_ACTION: &str = "android.intent.action.MAIN";
const LAUNCHER_CATEGORY: &str = "android.intent.category.LAUNCHER";

#[derive(Debug, Clone)]
struct ResolvedEntry {
    value: String,
    resolved_at: Instant,
}

#[derive(Debug, Default)]
struct ResolverMaps {
    packages: HashMap<String, ResolvedEntry>,
    entry_points: HashMap<String, ResolvedEntry>,
}

/// Name -> package and package -> entry point mappings. Entries older than
/// `RESOLVER_TTL` are never served.
#[derive(Debug, Default)]
pub struct ResolverCache {
    maps: Mutex<ResolverMaps>,
}

impl ResolverCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package_at(&self, app_name: &str, now: Instant) -> Option<String> {
        let maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        fresh(maps.packages.get(app_name), now)
    }

    pub fn entry_point_at(&self, package: &str, now: Instant) -> Option<String> {
        let maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        fresh(maps.entry_points.get(package), now)
    }

    pub fn insert_package_at(&self, app_name: &str, package: &str, now: Instant) {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        maps.packages.insert(app_name.to_owned(), entry(package, now));
    }

    pub fn insert_entry_point_at(&self, package: &str, entry_point: &str, now: Instant) {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        maps.entry_points
            .insert(package.to_owned(), entry(entry_point, now));
    }

    pub fn clear(&self) {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        maps.packages.clear();
        maps.entry_points.clear();
    }
}

fn entry(value: &str, now: Instant) -> ResolvedEntry {
    ResolvedEntry {
        value: value.to_owned(),
        resolved_at: now,
    }
}

fn fresh(entry: Option<&ResolvedEntry>, now: Instant) -> Option<String> {
    let entry = entry?;
    let age = now.saturating_duration_since(entry.resolved_at);
    (age < RESOLVER_TTL).then(|| entry.value.clone())
}

#[derive(Clone)]
pub struct IdentityResolver {
    shell: Arc<dyn PackageShell>,
    cache: Arc<ResolverCache>,
}

impl IdentityResolver {
    pub fn new(shell: Arc<dyn PackageShell>, cache: Arc<ResolverCache>) -> Self {
        Self { shell, cache }
    }

    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    pub fn resolve_package(&self, app_name: &str) -> Result<String, IconError> {
        let now = Instant::now();
        if let Some(package) = self.cache.package_at(app_name, now) {
            return Ok(package);
        }

        let listing = self.shell.list_packages()?;
        let candidates = parse_package_lines(&listing);
        let package = best_match(app_name, &candidates).ok_or_else(|| {
            IconError::not_found(format!("no matching package found for '{app_name}'"))
        })?;

        info!(app = app_name, package = %package, "auto-detected package");
        self.cache.insert_package_at(app_name, &package, now);
        Ok(package)
    }

    pub fn resolve_entry_point(&self, package: &str) -> Result<String, IconError> {
        let now = Instant::now();
        if let Some(entry_point) = self.cache.entry_point_at(package, now) {
            return Ok(entry_point);
        }

        let dump = self.shell.dump_package(package)?;
        let entry_point = parse_main_activity(&dump, package).ok_or_else(|| {
            IconError::not_found(format!("no main activity found for package {package}"))
        })?;

        info!(package, activity = %entry_point, "auto-detected activity");
        self.cache.insert_entry_point_at(package, &entry_point, now);
        Ok(entry_point)
    }

    /// Resolves both the package and its launcher entry point.
    pub fn resolve_app(&self, app_name: &str) -> Result<(String, String), IconError> {
        let package = self.resolve_package(app_name)?;
        let entry_point = self.resolve_entry_point(&package)?;
        Ok((package, entry_point))
    }

    /// Cached `(package, entry point)` when both halves are still fresh.
    pub fn cached_app_info(&self, app_name: &str) -> Option<(String, String)> {
        let now = Instant::now();
        let package = self.cache.package_at(app_name, now)?;
        let entry_point = self.cache.entry_point_at(&package, now)?;
        Some((package, entry_point))
    }
}

pub fn normalize_search(app_name: &str) -> String {
    app_name
        .to_lowercase()
        .chars()
        .filter(|ch| *ch != ' ' && *ch != '-')
        .collect()
}

/// Highest-scoring candidate for `app_name`, first one wins on ties. `None`
/// when nothing reaches `MIN_MATCH_SCORE`.
pub fn best_match(app_name: &str, candidates: &[String]) -> Option<String> {
    let search = normalize_search(app_name);
    let mut best: Option<(&String, i32)> = None;

    for candidate in candidates {
        let score = match_score(&candidate.to_lowercase(), &search);
        if best.map_or(score > 0, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    match best {
        Some((candidate, score)) if score >= MIN_MATCH_SCORE => {
            debug!(app = app_name, candidate = %candidate, score, "best package match");
            Some(candidate.clone())
        }
        _ => None,
    }
}

/// Scores a lowercased package id against a normalized search string.
pub fn match_score(package: &str, search: &str) -> i32 {
    let compact = package.replace('.', "");
    if compact == search {
        return EXACT_MATCH_SCORE;
    }

    let mut score = 0;
    if compact.contains(search) {
        score += CONTAINS_SEARCH_SCORE;
    }
    if search.contains(compact.as_str()) {
        score += CONTAINED_BY_SEARCH_SCORE;
    }
    for ch in search.chars() {
        if ch.len_utf8() > 2 && compact.contains(ch) {
            score += CHARACTER_HIT_SCORE;
        }
    }

    score - (package.len() / 10) as i32
}

/// Finds the launcher component in a `pm dump` listing.
///
/// Blocks start at `Activity #` lines. A block is returned as soon as it has
/// seen both the MAIN action and the LAUNCHER category, or when the next
/// block starts after a MAIN-only block. A MAIN block still open at the end
/// of input is returned as well.
pub fn parse_main_activity(dump: &str, package: &str) -> Option<String> {
    let mut in_main_block = false;
    let mut current: Option<String> = None;

    for line in dump.lines().map(str::trim) {
        if line.starts_with(COMPONENT_MARKER) {
            if in_main_block && current.is_some() {
                return current;
            }
            in_main_block = false;
            current = component_name(line, package);
        }

        if line.contains(MAIN_ACTION) {
            in_main_block = true;
        }

        if line.contains(LAUNCHER_CATEGORY) && in_main_block && current.is_some() {
            return current;
        }
    }

    if in_main_block {
        current
    } else {
        None
    }
}

/// `Activity #0: com.pkg/.Main filter` -> `com.pkg.Main`;
/// `com.pkg/com.other.Main` -> `com.other.Main`.
fn component_name(line: &str, package: &str) -> Option<String> {
    let start = line.find(package)?;
    let token = line[start..].split(' ').next()?;
    let (owner, class) = token.split_once('/')?;
    if class.contains('/') {
        return None;
    }
    if class.starts_with('.') {
        Some(format!("{owner}{class}"))
    } else {
        Some(class.to_owned())
    }
}
