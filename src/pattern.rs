//! Gitignore-style pattern matching for watch exclusions.
//!
//! Rules are compiled once at watch start and evaluated in declaration
//! order with last-match-wins semantics: a later negated rule (`!pattern`)
//! can un-ignore a path matched by an earlier rule. Supported syntax:
//!
//! - `*` matches within a single path segment, `?` matches one character,
//!   neither crosses `/`
//! - `**` matches across segments; `**/` matches zero or more leading
//!   directories
//! - character classes `[...]` pass through with literal class semantics
//! - a trailing `/` marks the rule directory-only; a matched directory
//!   ignores everything nested under it
//! - a leading `/` anchors the rule to the matcher base; otherwise the
//!   rule may match at any path-segment boundary
//! - blank lines and `#` comments are skipped

use std::path::{Path, PathBuf};

use regex::Regex;

/// One compiled ignore/include rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Pattern text as supplied, including any `!` or trailing `/`.
    pub raw: String,
    /// `!pattern` rules un-ignore matching paths.
    pub negate: bool,
    /// Rule had a trailing `/`.
    pub dir_only: bool,
    /// Rule had a leading `/` and only matches at the base.
    pub anchored: bool,
    matcher: Regex,
}

impl Rule {
    /// Compile a single pattern line. Returns `None` for blanks, comments,
    /// and patterns that produce an invalid matcher.
    fn compile(line: &str) -> Option<Self> {
        let raw = line.to_string();
        let mut pattern = line.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            return None;
        }

        let negate = pattern.starts_with('!');
        if negate {
            pattern = &pattern[1..];
        }

        let dir_only = pattern.ends_with('/') && !pattern.ends_with("\\/");
        if dir_only {
            pattern = &pattern[..pattern.len() - 1];
        }

        let anchored = pattern.starts_with('/');
        if anchored {
            pattern = &pattern[1..];
        }

        if pattern.is_empty() {
            return None;
        }

        let source = translate(pattern, anchored, dir_only);
        match Regex::new(&source) {
            Ok(matcher) => Some(Self {
                raw,
                negate,
                dir_only,
                anchored,
                matcher,
            }),
            Err(e) => {
                tracing::warn!("[pattern] skipping unparsable rule {pattern:?}: {e}");
                None
            }
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

/// Translate one glob pattern body into an anchored regex.
///
/// The suffix `(/.*)?$` makes every matched path also cover its
/// descendants, so ignoring a directory ignores its contents. Dir-only
/// rules instead require a trailing `/`, so a plain file sharing the name
/// stays unmatched. Matching is case-insensitive.
fn translate(pattern: &str, anchored: bool, dir_only: bool) -> String {
    let mut re = String::from("(?i)");
    re.push_str(if anchored { "^" } else { "(^|/)" });

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        // `**/` spans zero or more whole directories
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                for n in chars.by_ref() {
                    class.push(n);
                    if n == ']' {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    re.push_str(&class);
                } else {
                    // unterminated class, treat as literal text
                    re.push_str(&regex::escape(&class));
                }
            }
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                } else {
                    re.push_str("\\\\");
                }
            }
            _ => {
                let mut buf = [0u8; 4];
                re.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }

    re.push_str(if dir_only { "/.*$" } else { "(/.*)?$" });
    re
}

/// Compiled, ordered rule set with a fixed base directory.
///
/// Pure: `ignored` is a function of the compiled rules and its arguments.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    base: PathBuf,
    rules: Vec<Rule>,
}

impl PatternMatcher {
    /// Compile an ordered list of pattern lines against a base directory.
    ///
    /// `base` is stripped from absolute candidate paths before matching;
    /// pass an empty path to match candidates as given.
    pub fn compile<S: AsRef<str>>(patterns: &[S], base: impl Into<PathBuf>) -> Self {
        let rules = patterns
            .iter()
            .filter_map(|p| Rule::compile(p.as_ref()))
            .collect();
        Self {
            base: base.into(),
            rules,
        }
    }

    /// Decide whether a path is ignored.
    ///
    /// Rules are walked in declaration order; every match overwrites the
    /// running verdict with `!negate`, so the last matching rule wins. A
    /// directory is tested both bare and with a trailing `/`. No match by
    /// any rule means not ignored.
    pub fn ignored(&self, path: &Path, is_directory: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let candidate = self.normalize(path);
        let slashed = if is_directory && !candidate.ends_with('/') {
            Some(format!("{candidate}/"))
        } else {
            None
        };

        let mut verdict = false;
        for rule in &self.rules {
            let hit = rule.matches(&candidate)
                || slashed.as_deref().is_some_and(|s| rule.matches(s));
            if hit {
                verdict = !rule.negate;
            }
        }
        verdict
    }

    /// Drop ignored paths from a list, preserving order.
    ///
    /// Directory-ness is resolved from the filesystem; paths that no
    /// longer exist are treated as files.
    pub fn filter_paths<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Vec<&'a Path> {
        paths
            .into_iter()
            .filter(|p| {
                let full = if p.is_absolute() {
                    (*p).to_path_buf()
                } else {
                    self.base.join(p)
                };
                !self.ignored(p, full.is_dir())
            })
            .collect()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Candidate form used for matching: relative to base, forward
    /// slashes, no leading `./`.
    fn normalize(&self, path: &Path) -> String {
        let relative = if path.is_absolute() && !self.base.as_os_str().is_empty() {
            path.strip_prefix(&self.base).unwrap_or(path)
        } else {
            path
        };
        crate::event::normalize_slashes(relative)
    }
}
