//! LRU cache for compiled wildcard patterns
//!
//! Patterns that cannot be answered by a prefix, suffix or substring check are
//! compiled to a regular expression once and reused. Each thread owns its own
//! cache, so simulations running on different workers never contend on it.

use lru::LruCache;
use regex::Regex;
use std::cell::RefCell;
use std::num::NonZeroUsize;

/// Entries kept per thread
pub const DEFAULT_PATTERN_CACHE_CAPACITY: usize = 512;

thread_local! {
    static PATTERNS: RefCell<PatternCache> =
        RefCell::new(PatternCache::new(DEFAULT_PATTERN_CACHE_CAPACITY));
}

/// LRU cache from wildcard pattern to its compiled form
///
/// A pattern that failed to compile is cached as `None` so it is not retried.
pub struct PatternCache {
    cache: LruCache<String, Option<Regex>>,
}

impl PatternCache {
    /// Create a new pattern cache with given capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        PatternCache {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get the compiled form of `pattern`, compiling it on a miss
    pub fn get_or_compile(&mut self, pattern: &str) -> Option<Regex> {
        if let Some(compiled) = self.cache.get(pattern) {
            return compiled.clone();
        }

        let compiled = Regex::new(&translate(pattern)).ok();
        self.cache.put(pattern.to_string(), compiled.clone());
        compiled
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Match `value` against the compiled form of `pattern` using this thread's cache
///
/// Returns false when the pattern does not compile.
pub(crate) fn regex_matches(pattern: &str, value: &str) -> bool {
    PATTERNS.with(|cache| {
        cache
            .borrow_mut()
            .get_or_compile(pattern)
            .map(|re| re.is_match(value))
            .unwrap_or(false)
    })
}

/// Translate a wildcard pattern into an anchored regular expression
///
/// `*` becomes a run of non-`:` characters and `?` exactly one non-`:`
/// character; everything else is matched literally.
pub(crate) fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 16);
    let mut literal = String::new();
    out.push('^');

    for c in pattern.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { "[^:]*" } else { "[^:]" });
            }
            _ => literal.push(c),
        }
    }

    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_escapes_literals() {
        assert_eq!(translate("a.b*"), r"^a\.b[^:]*$");
        assert_eq!(translate("?x"), "^[^:]x$");
        assert_eq!(translate("(1)+"), r"^\(1\)\+$");
    }

    #[test]
    fn test_cache_basic() {
        let mut cache = PatternCache::new(10);
        assert!(cache.is_empty());

        let re = cache.get_or_compile("foo*bar").unwrap();
        assert!(re.is_match("fooXbar"));
        assert_eq!(cache.len(), 1);

        // Second lookup is a hit
        cache.get_or_compile("foo*bar").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = PatternCache::new(2);

        cache.get_or_compile("a*b*");
        cache.get_or_compile("c*d*");
        cache.get_or_compile("e*f*"); // Should evict a*b*

        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = PatternCache::new(0);
        cache.get_or_compile("x?");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_regex_matches_is_anchored() {
        assert!(regex_matches("a?c", "abc"));
        assert!(!regex_matches("a?c", "xabcx"));
        assert!(!regex_matches("a*c", "ab:c"));
    }
}
