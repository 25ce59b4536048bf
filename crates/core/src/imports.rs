//! Heuristic extraction of import references from source text.
//!
//! The resolver oracle receives the modules a file depends on as extra
//! context. Extraction is a line-oriented regex scan chosen by file
//! extension, not a parser:
//!
//! | Language | Recognised forms |
//! |----------|------------------|
//! | JS / TS  | `import … from 'x'`, `import 'x'`, `export … from 'x'`, `require('x')` |
//! | Python   | `import x`, `import x, y`, `from x import …` |
//! | Rust     | `use x::…;` (path up to the first brace or glob) |
//! | Go       | single-line `import "x"` and `import alias "x"` |
//!
//! Known limits: multi-line Go `import ( … )` blocks and multi-line JS
//! import lists are missed, computed `require(name)` calls are ignored, and
//! matches inside comments or string literals are not filtered out.

use std::sync::LazyLock;

use regex_lite::Regex;

static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import|export)\s+(?:[^'";\n]*?\s+from\s+)?['"]([^'"]+)['"]"#)
        .expect("valid JS import pattern")
});
static JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid require pattern")
});
static PY_FROM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*from\s+([\w.]+)\s+import\b").expect("valid Python from pattern")
});
static PY_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*import\s+([\w.]+(?:\s*,\s*[\w.]+)*)").expect("valid Python import pattern")
});
static RUST_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:\w+::)*\w+)")
        .expect("valid Rust use pattern")
});
static GO_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[\w.]+\s+)?"([^"]+)""#).expect("valid Go import pattern")
});

/// Module references imported by `source`, in first-seen order without
/// duplicates. Unknown file types yield nothing.
pub fn extract_imports(filename: &str, source: &str) -> Vec<String> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let mut found: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        let name = name.trim();
        if !name.is_empty() && !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    };

    match ext.as_str() {
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => {
            let mut hits: Vec<(usize, &str)> = JS_IMPORT
                .captures_iter(source)
                .chain(JS_REQUIRE.captures_iter(source))
                .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str())))
                .collect();
            hits.sort_by_key(|(pos, _)| *pos);
            hits.into_iter().for_each(|(_, name)| push(name));
        }
        "py" => {
            let mut hits: Vec<(usize, &str)> = PY_FROM
                .captures_iter(source)
                .chain(PY_IMPORT.captures_iter(source))
                .filter_map(|c| c.get(1).map(|m| (m.start(), m.as_str())))
                .collect();
            hits.sort_by_key(|(pos, _)| *pos);
            for (_, names) in hits {
                names.split(',').for_each(&mut push);
            }
        }
        "rs" => RUST_USE
            .captures_iter(source)
            .filter_map(|c| c.get(1))
            .for_each(|m| push(m.as_str())),
        "go" => GO_IMPORT
            .captures_iter(source)
            .filter_map(|c| c.get(1))
            .for_each(|m| push(m.as_str())),
        _ => {}
    }
    found
}
