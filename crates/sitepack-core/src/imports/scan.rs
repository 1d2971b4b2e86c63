//! Import specifier scanner.
//!
//! Scans JavaScript/TypeScript source code for import/require specifiers
//! without full parsing.

use rustc_hash::FxHashSet as HashSet;
use serde::Serialize;

/// How a specifier was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// `import x from "..."` or `import "..."`.
    Static,
    /// `export ... from "..."`.
    ReExport,
    /// `import("...")`.
    Dynamic,
    /// `require("...")`.
    Require,
}

impl ImportKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "esm_import",
            Self::ReExport => "esm_export",
            Self::Dynamic => "dynamic_import",
            Self::Require => "cjs_require",
        }
    }
}

/// Import specifier found in source code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSpecCore {
    /// Specifier exactly as found.
    pub raw: String,
    /// Kind of import.
    pub kind: ImportKind,
    /// Line number (1-indexed, best-effort).
    pub line: Option<u32>,
}

impl ImportSpecCore {
    /// Create a new import spec.
    #[must_use]
    pub fn new(raw: impl Into<String>, kind: ImportKind, line: Option<u32>) -> Self {
        Self {
            raw: raw.into(),
            kind,
            line,
        }
    }
}

/// Scan source code for import/require specifiers.
///
/// Returns discovered imports in first-appearance order, deduplicated by `raw`.
/// Type-only imports (`import type ...`) are skipped since they never reach
/// the emitted bundle.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<ImportSpecCore> {
    let mut results = Vec::new();
    let mut seen = HashSet::default();
    let mut line_num: u32 = 1;
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;

    let mut push = |spec: String, kind: ImportKind, line: u32| {
        if !spec.is_empty() && seen.insert(spec.clone()) {
            results.push(ImportSpecCore::new(spec, kind, Some(line)));
        }
    };

    while i < len {
        if chars[i] == '\n' {
            line_num += 1;
            i += 1;
            continue;
        }

        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                if chars[i] == '\n' {
                    line_num += 1;
                }
                i += 1;
            }
            i += 2;
            continue;
        }

        // String literals can contain anything that looks like an import.
        if chars[i] == '"' || chars[i] == '\'' || chars[i] == '`' {
            i = skip_string(&chars, i, &mut line_num);
            continue;
        }

        if matches_keyword(&chars, i, "import") {
            let start_i = i;
            let start_line = line_num;
            i += 6;
            if let Some((spec, kind, end)) = scan_import_statement(&chars, i, &mut line_num) {
                if let Some(spec) = spec {
                    push(spec, kind, start_line);
                }
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        if matches_keyword(&chars, i, "export") {
            let start_i = i;
            let start_line = line_num;
            i += 6;
            if let Some((spec, end)) = scan_export_from(&chars, i, &mut line_num) {
                push(spec, ImportKind::ReExport, start_line);
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        if matches_keyword(&chars, i, "require") && !is_member_access(&chars, i) {
            let start_i = i;
            i += 7;
            if let Some((spec, end)) = scan_call_argument(&chars, i) {
                push(spec, ImportKind::Require, line_num);
                i = end;
                continue;
            }
            i = start_i + 1;
            continue;
        }

        i += 1;
    }

    results
}

/// Skip a string or template literal starting at `start`, returning the
/// position just past its closing quote.
fn skip_string(chars: &[char], start: usize, line_num: &mut u32) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() && chars[i] != quote {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == '\n' {
            if quote != '`' {
                // Unterminated string; resume scanning on the next line.
                return i;
            }
            *line_num += 1;
        }
        i += 1;
    }
    i + 1
}

/// Check if chars at position match a keyword (with word boundary).
fn matches_keyword(chars: &[char], pos: usize, keyword: &str) -> bool {
    let len = keyword.chars().count();

    if pos + len > chars.len() {
        return false;
    }

    if pos > 0 && is_ident_char(chars[pos - 1]) {
        return false;
    }

    if !keyword.chars().zip(&chars[pos..pos + len]).all(|(a, &b)| a == b) {
        return false;
    }

    !(pos + len < chars.len() && is_ident_char(chars[pos + len]))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// `foo.require(...)` is somebody else's function.
fn is_member_access(chars: &[char], pos: usize) -> bool {
    pos > 0 && chars[pos - 1] == '.'
}

fn skip_whitespace(chars: &[char], mut i: usize, line_num: &mut u32) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        if chars[i] == '\n' {
            *line_num += 1;
        }
        i += 1;
    }
    i
}

/// Read a quoted specifier at `i`. Template literals with substitutions are
/// not static specifiers and yield `None`.
fn read_quoted(chars: &[char], i: usize) -> Option<(String, usize)> {
    let quote = *chars.get(i)?;
    if quote != '"' && quote != '\'' && quote != '`' {
        return None;
    }
    let mut j = i + 1;
    let mut spec = String::new();
    while j < chars.len() && chars[j] != quote {
        if chars[j] == '\\' && j + 1 < chars.len() {
            spec.push(chars[j + 1]);
            j += 2;
            continue;
        }
        if chars[j] == '\n' && quote != '`' {
            return None;
        }
        if quote == '`' && chars[j] == '$' && chars.get(j + 1) == Some(&'{') {
            return None;
        }
        spec.push(chars[j]);
        j += 1;
    }
    if j >= chars.len() {
        return None;
    }
    Some((spec, j + 1))
}

/// Scan an import statement for the "from" specifier.
///
/// Returns `(specifier, kind, end position)`. The specifier is `None` for
/// type-only imports, which are consumed but not reported.
fn scan_import_statement(
    chars: &[char],
    start: usize,
    line_num: &mut u32,
) -> Option<(Option<String>, ImportKind, usize)> {
    let len = chars.len();
    // Newlines are only committed to `line_num` once a statement matched,
    // since the caller rescans on failure.
    let mut lines = 0;
    let mut i = skip_whitespace(chars, start, &mut lines);

    // import("...")
    if i < len && chars[i] == '(' {
        i = skip_whitespace(chars, i + 1, &mut lines);
        let (spec, end) = read_quoted(chars, i)?;
        *line_num += lines;
        return Some((Some(spec), ImportKind::Dynamic, end));
    }

    // import.meta
    if i < len && chars[i] == '.' {
        return None;
    }

    // import "./side-effect"
    if let Some((spec, end)) = read_quoted(chars, i) {
        *line_num += lines;
        return Some((Some(spec), ImportKind::Static, end));
    }

    let type_only = matches_keyword(chars, i, "type")
        && !matches!(chars.get(skip_whitespace(chars, i + 4, &mut 0)), Some(&',' | &'f'));

    let limit = (start + 2000).min(len);
    while i < limit {
        if chars[i] == '\n' {
            lines += 1;
        }

        if matches_keyword(chars, i, "from") {
            let mut from_lines = 0;
            let j = skip_whitespace(chars, i + 4, &mut from_lines);
            if let Some((spec, end)) = read_quoted(chars, j) {
                *line_num += lines + from_lines;
                let spec = if type_only { None } else { Some(spec) };
                return Some((spec, ImportKind::Static, end));
            }
        }

        if chars[i] == ';' {
            break;
        }

        i += 1;
    }

    None
}

/// Scan an `export ... from "..."` statement.
fn scan_export_from(chars: &[char], start: usize, line_num: &mut u32) -> Option<(String, usize)> {
    let len = chars.len();
    let i = skip_whitespace(chars, start, &mut 0);

    // Only `export {` and `export *` can re-export.
    if i >= len || (chars[i] != '{' && chars[i] != '*') {
        return None;
    }

    let mut lines = 0;
    let mut i = i;
    let limit = (start + 2000).min(len);
    while i < limit {
        if chars[i] == '\n' {
            lines += 1;
        }

        if matches_keyword(chars, i, "from") {
            let j = skip_whitespace(chars, i + 4, &mut lines);
            if let Some((spec, end)) = read_quoted(chars, j) {
                *line_num += lines;
                return Some((spec, end));
            }
        }

        // `export { a, b };` without a source.
        if chars[i] == ';' {
            return None;
        }

        i += 1;
    }

    None
}

/// Scan the `("...")` part of a `require` call.
fn scan_call_argument(chars: &[char], start: usize) -> Option<(String, usize)> {
    let len = chars.len();
    let mut i = start;

    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }

    if i >= len || chars[i] != '(' {
        return None;
    }
    i += 1;

    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }

    let (spec, mut i) = read_quoted(chars, i)?;

    while i < len && chars[i].is_whitespace() && chars[i] != '\n' {
        i += 1;
    }

    if i < len && chars[i] == ')' {
        i += 1;
    }

    Some((spec, i))
}

/// Whether `await` appears outside any function body.
///
/// Braces are classified as function bodies when they follow `=>`, a
/// parameter list, or a parameter list with a return type annotation.
/// Control-flow parameter lists (`if (..) {`) open plain blocks. An `await`
/// in an arrow expression body also counts, so the answer errs towards true.
#[must_use]
pub fn has_top_level_await(source: &str) -> bool {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut line_num = 1;
    // true for each open brace that starts a function body
    let mut braces: Vec<bool> = Vec::new();
    let mut parens: Vec<usize> = Vec::new();
    // (close position, open position) of the last closed parenthesis
    let mut last_paren: Option<(usize, usize)> = None;
    let mut i = 0;

    while i < len {
        let c = chars[i];

        if c == '/' && i + 1 < len && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && i + 1 < len && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                i += 1;
            }
            i += 2;
            continue;
        }
        if c == '"' || c == '\'' || c == '`' {
            i = skip_string(&chars, i, &mut line_num);
            continue;
        }

        match c {
            '(' => parens.push(i),
            ')' => {
                if let Some(open) = parens.pop() {
                    last_paren = Some((i, open));
                }
            }
            '{' => braces.push(opens_function_body(&chars, i, last_paren)),
            '}' => {
                braces.pop();
            }
            _ => {
                if matches_keyword(&chars, i, "await")
                    && !is_member_access(&chars, i)
                    && !braces.iter().any(|f| *f)
                {
                    return true;
                }
            }
        }
        i += 1;
    }
    false
}

fn opens_function_body(chars: &[char], brace: usize, last_paren: Option<(usize, usize)>) -> bool {
    let Some(prev) = (0..brace).rev().find(|&p| !chars[p].is_whitespace()) else {
        return false;
    };
    if chars[prev] == '>' && prev > 0 && chars[prev - 1] == '=' {
        return true;
    }
    let Some((close, open)) = last_paren else {
        return false;
    };
    if close != prev {
        // `(..): Type {`
        let between: String = chars[close + 1..brace].iter().collect();
        if !between.trim_start().starts_with(':') || between.contains([';', '}', '=']) {
            return false;
        }
    }
    let word_end = (0..open)
        .rev()
        .find(|&p| !chars[p].is_whitespace())
        .map_or(0, |p| p + 1);
    let word_start = (0..word_end)
        .rev()
        .find(|&p| !is_ident_char(chars[p]))
        .map_or(0, |p| p + 1);
    let word: String = chars[word_start..word_end].iter().collect();
    !matches!(word.as_str(), "if" | "for" | "while" | "switch" | "catch" | "with")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esm_import_from() {
        let imports = scan_imports(r#"import { foo } from "./dep";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dep");
        assert_eq!(imports[0].kind, ImportKind::Static);
    }

    #[test]
    fn test_esm_import_side_effect() {
        let imports = scan_imports(r#"import "./polyfill";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./polyfill");
    }

    #[test]
    fn test_worker_prefixed_import() {
        let imports = scan_imports(r#"import WORKER_URL from "worker:./workers/esbuild.ts";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "worker:./workers/esbuild.ts");
    }

    #[test]
    fn test_url_import() {
        let imports = scan_imports(r#"import { h } from "https://cdn.example/preact.ts";"#);
        assert_eq!(imports[0].raw, "https://cdn.example/preact.ts");
    }

    #[test]
    fn test_multiline_named_import() {
        let source = "import {\n  a,\n  b,\n} from './dep';\nimport c from './c';";
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].raw, "./dep");
        assert_eq!(imports[0].line, Some(1));
        assert_eq!(imports[1].raw, "./c");
        assert_eq!(imports[1].line, Some(5));
    }

    #[test]
    fn test_dynamic_import() {
        let imports = scan_imports(r#"const mod = await import("./dynamic");"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dynamic");
        assert_eq!(imports[0].kind, ImportKind::Dynamic);
    }

    #[test]
    fn test_dynamic_import_with_template_substitution_is_skipped() {
        let imports = scan_imports("const mod = await import(`./locale/${lang}.js`);");
        assert!(imports.is_empty());
    }

    #[test]
    fn test_import_meta_is_not_an_import() {
        let imports = scan_imports("const url = import.meta.url;");
        assert!(imports.is_empty());
    }

    #[test]
    fn test_type_only_import_skipped() {
        let imports = scan_imports("import type { Foo } from './types';\nimport bar from './bar';");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./bar");
    }

    #[test]
    fn test_default_named_type_is_not_type_only() {
        let imports = scan_imports("import type from './type';");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./type");
    }

    #[test]
    fn test_cjs_require() {
        let imports = scan_imports(r#"const dep = require("./dep");"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::Require);
    }

    #[test]
    fn test_member_require_ignored() {
        let imports = scan_imports(r#"const dep = loader.require("./dep");"#);
        assert!(imports.is_empty());
    }

    #[test]
    fn test_esm_export_from() {
        let imports = scan_imports(r#"export { foo } from "./dep";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].kind, ImportKind::ReExport);
    }

    #[test]
    fn test_export_star_from() {
        let imports = scan_imports(r#"export * from "./dep";"#);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./dep");
    }

    #[test]
    fn test_local_export_is_not_an_import() {
        let imports = scan_imports("const from = 1;\nexport { from };\nexport const x = 'from';");
        assert!(imports.is_empty());
    }

    #[test]
    fn test_ignores_comments() {
        let source = r#"
// import foo from "commented"
/*
import baz from "also-commented"
*/
import bar from "./real";
"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./real");
        assert_eq!(imports[0].line, Some(6));
    }

    #[test]
    fn test_ignores_string_contents() {
        let source = r#"const s = "import x from './nope'";
const t = `require("./nope-either")`;
import y from "./yes";"#;
        let imports = scan_imports(source);
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].raw, "./yes");
        assert_eq!(imports[0].line, Some(3));
    }

    #[test]
    fn test_deduplicates_imports() {
        let imports = scan_imports("import a from './dep';\nimport b from './dep';");
        assert_eq!(imports.len(), 1);
    }

    #[test]
    fn test_no_imports() {
        assert!(scan_imports("").is_empty());
        assert!(scan_imports("console.log('hello');").is_empty());
    }

    #[test]
    fn test_top_level_await_detected() {
        assert!(has_top_level_await("const v = await Promise.resolve(1);"));
        assert!(has_top_level_await("if (ready) {\n  await boot();\n}"));
        assert!(has_top_level_await("for await (const x of stream) {}"));
        assert!(has_top_level_await("const cfg = { data: await load() };"));
    }

    #[test]
    fn test_await_inside_functions_ignored() {
        let source = r#"async function main() {
  await run();
}
const go = async () => {
  await run();
};
class Worker {
  async start(): Promise<void> {
    if (x) { await run(); }
  }
}
const s = "await";
// await
obj.await;
"#;
        assert!(!has_top_level_await(source));
        assert!(!has_top_level_await(""));
    }
}
