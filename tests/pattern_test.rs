//! Pattern matching against a realistic project layout.

use std::path::Path;
use watchcast::PatternMatcher;

fn matcher(patterns: &[&str]) -> PatternMatcher {
    PatternMatcher::compile(patterns, "/project")
}

#[test]
fn test_default_ignore_set_over_project_tree() {
    let m = matcher(&[
        "*.tmp",
        "*.log",
        "*.swp",
        ".git/",
        "node_modules/",
        "target/",
        "__pycache__/",
        ".DS_Store",
    ]);

    let ignored = [
        ("/project/build.log", false),
        ("/project/src/editor.swp", false),
        ("/project/.git", true),
        ("/project/.git/HEAD", false),
        ("/project/web/node_modules/left-pad/index.js", false),
        ("/project/target/debug/app", false),
        ("/project/tests/__pycache__/conftest.pyc", false),
        ("/project/docs/.DS_Store", false),
    ];
    for (path, is_dir) in ignored {
        assert!(m.ignored(Path::new(path), is_dir), "expected ignored: {path}");
    }

    let kept = [
        ("/project/src/main.rs", false),
        ("/project/Cargo.toml", false),
        ("/project/docs/targets.md", false),
        ("/project/logs", true),
    ];
    for (path, is_dir) in kept {
        assert!(!m.ignored(Path::new(path), is_dir), "expected kept: {path}");
    }
}

#[test]
fn test_negation_rescues_specific_file() {
    let m = matcher(&["*.log", "!important.log"]);
    assert!(m.ignored(Path::new("/project/debug.log"), false));
    assert!(!m.ignored(Path::new("/project/important.log"), false));
    assert!(!m.ignored(Path::new("/project/sub/important.log"), false));
}

#[test]
fn test_last_match_wins_when_reignored() {
    let m = matcher(&["*.log", "!important.log", "important.log"]);
    assert!(m.ignored(Path::new("/project/important.log"), false));
}

#[test]
fn test_directory_rule_covers_descendants() {
    let m = matcher(&["build/"]);
    assert!(m.ignored(Path::new("/project/build"), true));
    assert!(m.ignored(Path::new("/project/build/out.o"), false));
    assert!(m.ignored(Path::new("/project/sub/build/deep/x"), false));
    // a plain file named build is not a directory match
    assert!(!m.ignored(Path::new("/project/build"), false));
}

#[test]
fn test_anchored_pattern_matches_root_only() {
    let m = matcher(&["/secrets.env"]);
    assert!(m.ignored(Path::new("/project/secrets.env"), false));
    assert!(!m.ignored(Path::new("/project/deploy/secrets.env"), false));
}

#[test]
fn test_double_star_spans_directories() {
    let m = matcher(&["docs/**/draft.md"]);
    assert!(m.ignored(Path::new("/project/docs/draft.md"), false));
    assert!(m.ignored(Path::new("/project/docs/2024/q3/draft.md"), false));
    assert!(!m.ignored(Path::new("/project/docs/final.md"), false));
}

#[test]
fn test_single_star_stops_at_separator() {
    let m = matcher(&["src/*.rs"]);
    assert!(m.ignored(Path::new("/project/src/lib.rs"), false));
    assert!(!m.ignored(Path::new("/project/src/nested/lib.rs"), false));
}

#[test]
fn test_question_mark_single_char() {
    let m = matcher(&["file?.txt"]);
    assert!(m.ignored(Path::new("/project/file1.txt"), false));
    assert!(!m.ignored(Path::new("/project/file10.txt"), false));
}

#[test]
fn test_case_insensitive() {
    let m = matcher(&["*.TMP"]);
    assert!(m.ignored(Path::new("/project/scratch.tmp"), false));
}

#[test]
fn test_comments_and_blanks_skipped() {
    let m = matcher(&["# build artifacts", "", "   ", "*.o"]);
    assert_eq!(m.rules().len(), 1);
    assert!(m.ignored(Path::new("/project/a.o"), false));
    assert!(!m.ignored(Path::new("/project/# build artifacts"), false));
}

#[test]
fn test_filter_paths_keeps_order() {
    let m = matcher(&["*.tmp"]);
    let a = Path::new("/project/keep.rs");
    let b = Path::new("/project/drop.tmp");
    let c = Path::new("/project/also.rs");
    assert_eq!(m.filter_paths([a, b, c]), vec![a, c]);
}
