//! Wildcard matching for IAM actions, resources, ARNs and principals
//!
//! Supports the IAM wildcard grammar:
//! - `*` - Matches any run of characters within one `:` segment
//! - `?` - Matches exactly one character within one `:` segment
//!
//! Simple shapes (literal, `foo*`, `*foo`, `*foo*`) are answered with string
//! operations. Everything else goes through an anchored regular expression
//! cached per thread (see [`super::cache`]).

use super::cache::regex_matches;

/// Pattern matcher for IAM wildcard expressions
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if a `:`-delimited value matches a pattern segment by segment
    ///
    /// `*` on its own matches everything, an empty pattern matches nothing, and
    /// otherwise both sides must have the same number of segments.
    ///
    /// # Examples
    /// ```
    /// use iamsim::iam::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches("s3:Get*", "s3:GetObject"));
    /// assert!(PatternMatcher::matches("arn:aws:s3:::bucket/*", "arn:aws:s3:::bucket/key"));
    /// assert!(!PatternMatcher::matches("s3:Get*", "ec2:GetConsoleOutput"));
    /// ```
    pub fn matches(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if pattern.is_empty() {
            return false;
        }

        if pattern.matches(':').count() != value.matches(':').count() {
            return false;
        }

        pattern
            .split(':')
            .zip(value.split(':'))
            .all(|(p, v)| Self::matches_segment(p, v))
    }

    /// Segment matching after lowercasing both sides
    pub fn matches_ignore_case(pattern: &str, value: &str) -> bool {
        Self::matches(&pattern.to_lowercase(), &value.to_lowercase())
    }

    /// Match a single segment (no `:` splitting)
    pub fn matches_segment(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        let stars = pattern.matches('*').count();
        let has_single = pattern.contains('?');

        if stars == 0 && !has_single {
            return pattern == value;
        }

        if !has_single {
            if stars == 1 {
                if let Some(suffix) = pattern.strip_prefix('*') {
                    return value.ends_with(suffix);
                }
                if let Some(prefix) = pattern.strip_suffix('*') {
                    return value.starts_with(prefix);
                }
            } else if stars == 2 && pattern.starts_with('*') && pattern.ends_with('*') {
                return value.contains(&pattern[1..pattern.len() - 1]);
            }
        }

        regex_matches(pattern, value)
    }

    /// Structural ARN matching used by the `Arn*` condition operators
    ///
    /// Both sides must have six `:` parts. Partition, service, region and
    /// account are matched per segment. When the pattern's resource part has a
    /// `/`, the resource type before it must match and the value must carry a
    /// `/` too; otherwise the whole resource part is matched as one segment.
    pub fn matches_arn(pattern: &str, value: &str) -> bool {
        if pattern == "*" {
            return true;
        }

        let pat: Vec<&str> = pattern.splitn(6, ':').collect();
        let val: Vec<&str> = value.splitn(6, ':').collect();
        if pat.len() != 6 || val.len() != 6 {
            return false;
        }
        if pat[0] != "arn" || val[0] != "arn" {
            return false;
        }

        let header_matches = (1..5).all(|i| Self::matches_segment(pat[i], val[i]));
        if !header_matches {
            return false;
        }

        match (pat[5].split_once('/'), val[5].split_once('/')) {
            (Some((pat_type, pat_path)), Some((val_type, val_path))) => {
                Self::matches_segment(pat_type, val_type)
                    && Self::matches_segment(pat_path, val_path)
            }
            (Some(_), None) => false,
            (None, _) => Self::matches_segment(pat[5], val[5]),
        }
    }

    /// Principal identity matching: only `*` or exact equality
    ///
    /// Partial wildcards are never honored for principals.
    pub fn matches_all_or_nothing(pattern: &str, value: &str) -> bool {
        pattern == "*" || pattern == value
    }
}
