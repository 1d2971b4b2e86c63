//! Bundle output emission.
//!
//! Generates the final bundled JavaScript from the module graph. Every module
//! becomes a function in a registry:
//!
//! ```text
//! __modules[3] = function(module, exports, require) {
//!   const { helper } = require(1);
//!   ...
//! };
//! ```
//!
//! When any module awaits at top level the registry is asynchronous: module
//! functions are `async`, static imports are awaited and the entry is awaited
//! by the bundle's top level.
//!
//! Import and export statements are rewritten line by line. Multi-line
//! statements are joined and padded with blank lines so that line `n` of a
//! module body is always line `n` of its source, which is what the line-level
//! source map relies on.

#![allow(clippy::cast_possible_truncation)]

use super::graph::{Dependency, Module, ModuleGraph, ModuleId};
use super::minify;
use super::plugin::Loader;
use super::{codes, BundleError, BundleOptions};
use crate::imports::has_top_level_await;
use rayon::prelude::*;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::str::FromStr;

/// Statements spanning more lines than this are left alone.
const MAX_STATEMENT_LINES: usize = 64;

// =============================================================================
// Source Map Support
// =============================================================================

/// VLQ-encode a signed integer and append to output string.
fn vlq_encode(value: i64, out: &mut String) {
    const B64: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    #[allow(clippy::cast_sign_loss)]
    let mut v = (if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    }) as u64;
    loop {
        let mut digit = (v & 0x1f) as u8;
        v >>= 5;
        if v > 0 {
            digit |= 0x20; // continuation bit
        }
        out.push(B64[digit as usize] as char);
        if v == 0 {
            break;
        }
    }
}

/// Serialized V3 source map.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u32,
    pub file: String,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub mappings: String,
}

/// Tracks line mappings during emission and generates a V3 source map.
#[derive(Default)]
struct SourceMapBuilder {
    sources: Vec<String>,
    sources_content: Vec<String>,
    /// (output_line, source_idx, source_line)
    mappings: Vec<(u32, u32, u32)>,
}

impl SourceMapBuilder {
    /// Register a source file and return its index.
    fn add_source(&mut self, path: &str, content: &str) -> u32 {
        let idx = self.sources.len() as u32;
        self.sources.push(path.to_string());
        self.sources_content.push(content.to_string());
        idx
    }

    fn add_line_mapping(&mut self, output_line: u32, source_idx: u32, source_line: u32) {
        self.mappings.push((output_line, source_idx, source_line));
    }

    /// Move every mapping to a new output line, dropping lines that vanished.
    fn remap_lines(&mut self, new_line: impl Fn(u32) -> Option<u32>) {
        self.mappings = self
            .mappings
            .iter()
            .filter_map(|&(line, src, src_line)| new_line(line).map(|l| (l, src, src_line)))
            .collect();
    }

    fn generate(&self, file: &str) -> Result<String, BundleError> {
        let mut mappings = String::new();
        let mut prev_output_line: u32 = 0;
        let mut prev_source: i64 = 0;
        let mut prev_source_line: i64 = 0;

        let mut sorted = self.mappings.clone();
        sorted.sort_unstable();
        sorted.dedup_by_key(|m| m.0);

        for (output_line, source_idx, source_line) in sorted {
            while prev_output_line < output_line {
                mappings.push(';');
                prev_output_line += 1;
            }

            // One segment per line: column 0 maps to column 0.
            vlq_encode(0, &mut mappings);
            vlq_encode(i64::from(source_idx) - prev_source, &mut mappings);
            vlq_encode(i64::from(source_line) - prev_source_line, &mut mappings);
            vlq_encode(0, &mut mappings);

            prev_source = i64::from(source_idx);
            prev_source_line = i64::from(source_line);
        }

        let map = SourceMap {
            version: 3,
            file: file.to_string(),
            sources: self.sources.clone(),
            sources_content: self.sources_content.clone(),
            mappings,
        };
        serde_json::to_string(&map).map_err(|e| BundleError {
            code: codes::BUNDLE_INTERNAL_ERROR,
            message: format!("Failed to serialize source map: {e}"),
            path: None,
        })
    }
}

/// Output format for the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleFormat {
    /// ES module: the entry's exports become the bundle's exports.
    #[default]
    Esm,
    /// CommonJS: the entry's exports become `module.exports`.
    Cjs,
    /// Immediately invoked function expression.
    Iife,
}

impl BundleFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Esm => "esm",
            Self::Cjs => "cjs",
            Self::Iife => "iife",
        }
    }
}

impl FromStr for BundleFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "esm" => Ok(Self::Esm),
            "cjs" => Ok(Self::Cjs),
            "iife" => Ok(Self::Iife),
            _ => Err(crate::Error::other(format!(
                "Unknown format '{s}' (expected esm, cjs or iife)"
            ))),
        }
    }
}

/// Bundle output.
#[derive(Debug)]
pub struct BundleOutput {
    /// The bundled code.
    pub code: String,
    /// Source map JSON (if enabled).
    pub map: Option<String>,
}

/// What to emit from a graph.
pub struct EmitPlan<'a> {
    pub graph: &'a ModuleGraph,
    pub entry: ModuleId,
    /// Modules executed, in order, before the entry.
    pub inject: &'a [ModuleId],
    /// Public names of `file`-loader modules.
    pub assets: &'a HashMap<ModuleId, String>,
    /// Output file name, used for the source map reference.
    pub file_name: &'a str,
}

/// A module body after rewriting.
#[derive(Debug, Default)]
struct Rendered {
    lines: Vec<String>,
    /// (exported name, local expression) bound with live getters.
    getters: Vec<(String, String)>,
    /// Names exported by this module, in first-appearance order.
    exports: Vec<String>,
    /// Specifiers of `export * from` statements.
    stars: Vec<String>,
}

impl Rendered {
    fn export(&mut self, name: &str) {
        if !self.exports.iter().any(|n| n == name) {
            self.exports.push(name.to_string());
        }
    }
}

/// Emit a bundle.
pub fn emit_bundle(plan: &EmitPlan<'_>, options: &BundleOptions) -> Result<BundleOutput, BundleError> {
    let graph = plan.graph;
    let order = graph.toposort();
    let externals = collect_externals(graph);

    let awaiting = order
        .iter()
        .filter_map(|&id| graph.get(id))
        .find(|m| m.loader.is_script() && has_top_level_await(&m.source));
    if let (Some(module), BundleFormat::Cjs) = (awaiting, options.format) {
        return Err(BundleError {
            code: codes::BUNDLE_PARSE_ERROR,
            message: "Top-level await is not supported with the cjs output format".to_string(),
            path: Some(module.key.to_string()),
        });
    }
    let is_async = awaiting.is_some();

    // Rewrite each module in parallel, then concatenate in order.
    let rendered: Vec<Rendered> = order
        .par_iter()
        .map(|&id| {
            let module = graph.get(id).ok_or_else(|| BundleError {
                code: codes::BUNDLE_INTERNAL_ERROR,
                message: format!("Module {id} not found in graph"),
                path: None,
            })?;
            render_module(id, module, graph, plan.assets, is_async)
        })
        .collect::<Result<_, _>>()?;

    let mut out = Output::default();
    let mut sourcemap = SourceMapBuilder::default();

    out.push_line(&format!(
        "// sitepack bundle (format: {}, target: {})",
        options.format.as_str(),
        options.target
    ));

    if options.format == BundleFormat::Iife {
        out.push_line(if is_async { "(async function() {" } else { "(function() {" });
        out.push_line("'use strict';");
    }
    if options.format == BundleFormat::Esm {
        for (i, spec) in externals.iter().enumerate() {
            out.push_line(&format!("import * as __ext_{i} from {};", js_string(spec)));
        }
    }
    out.push_block(if is_async { REGISTRY_ASYNC } else { REGISTRY });
    out.push_block(HELPERS);
    out.push_block(&external_runtime(options.format, &externals));

    let by_id: HashMap<ModuleId, &Rendered> = order.iter().copied().zip(&rendered).collect();
    let wrapper = if is_async { "async function" } else { "function" };
    for (&id, rendered) in order.iter().zip(&rendered) {
        let Some(module) = graph.get(id) else { continue };

        out.push_line(&format!("// Module {id}: {}", module.key));
        let mut head = format!("__modules[{id}] = {wrapper}(module, exports, require) {{");
        if !rendered.getters.is_empty() {
            let getters: Vec<String> = rendered
                .getters
                .iter()
                .map(|(name, local)| format!("{}: () => {local}", js_property(name)))
                .collect();
            let _ = write!(head, " __export(exports, {{ {} }});", getters.join(", "));
        }
        out.push_line(&head);

        let source_idx = (module.loader != Loader::File)
            .then(|| sourcemap.add_source(&module.key.to_string(), &module.source));
        let source_lines = module.source.lines().count().max(1);
        for (i, line) in rendered.lines.iter().enumerate() {
            if let Some(idx) = source_idx {
                if i < source_lines {
                    sourcemap.add_line_mapping(out.line, idx, i as u32);
                }
            }
            if line.is_empty() {
                out.push_line("");
            } else {
                out.push_line(&format!("  {line}"));
            }
        }
        out.push_line("};");
    }

    let run = if is_async { "await __require" } else { "__require" };
    for &id in plan.inject {
        out.push_line(&format!("{run}({id});"));
    }

    match options.format {
        BundleFormat::Esm => {
            let mut entry_exports = EntryExports::default();
            entry_exports.collect(plan.entry, true, graph, &by_id, &mut HashSet::default());
            out.push_line(&format!("const __entry = {run}({});", plan.entry));
            if entry_exports.names.iter().any(|n| n == "default") {
                out.push_line("export default __entry.default;");
            }
            let named: Vec<&str> = entry_exports
                .names
                .iter()
                .map(String::as_str)
                .filter(|n| *n != "default" && is_identifier(n))
                .collect();
            if !named.is_empty() {
                out.push_line(&format!("export const {{ {} }} = __entry;", named.join(", ")));
            }
            for spec in &entry_exports.external {
                out.push_line(&format!("export * from {};", js_string(spec)));
            }
        }
        BundleFormat::Cjs => {
            out.push_line(&format!("module.exports = __require({});", plan.entry));
        }
        BundleFormat::Iife => {
            out.push_line(&format!("{run}({});", plan.entry));
            out.push_line("})();");
        }
    }

    let mut code = out.text;

    if options.minify {
        let kept = minify::compact_lines(&code);
        let new_lines: HashMap<u32, u32> = kept
            .iter()
            .enumerate()
            .map(|(new, (old, _))| (*old as u32, new as u32))
            .collect();
        sourcemap.remap_lines(|line| new_lines.get(&line).copied());
        code = kept
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n");
        code.push('\n');
    }

    if let Some(banner) = options.banner.as_deref().filter(|b| !b.is_empty()) {
        let banner_lines = banner.lines().count().max(1) as u32;
        sourcemap.remap_lines(|line| Some(line + banner_lines));
        code = format!("{}\n{code}", banner.trim_end_matches('\n'));
    }

    let map = if options.sourcemap {
        let map_name = format!("{}.map", plan.file_name);
        let _ = writeln!(code, "//# sourceMappingURL={map_name}");
        Some(sourcemap.generate(plan.file_name)?)
    } else {
        None
    };

    Ok(BundleOutput { code, map })
}

/// Output text with a running line counter.
#[derive(Default)]
struct Output {
    text: String,
    line: u32,
}

impl Output {
    fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        self.line += 1;
    }

    fn push_block(&mut self, block: &str) {
        for line in block.lines() {
            self.push_line(line);
        }
    }
}

/// Names the ESM entry re-exports, following `export * from` chains.
#[derive(Debug, Default)]
struct EntryExports {
    names: Vec<String>,
    /// External star sources, re-exported with `export * from`.
    external: Vec<String>,
}

impl EntryExports {
    fn collect(
        &mut self,
        id: ModuleId,
        is_entry: bool,
        graph: &ModuleGraph,
        rendered: &HashMap<ModuleId, &Rendered>,
        seen: &mut HashSet<ModuleId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        let Some(module) = rendered.get(&id) else { return };
        for name in &module.exports {
            // `export *` never forwards `default`.
            if (is_entry || name != "default") && !self.names.contains(name) {
                self.names.push(name.clone());
            }
        }
        for spec in &module.stars {
            match graph.resolve_specifier(id, spec) {
                Some(Dependency::Module(target)) => self.collect(*target, false, graph, rendered, seen),
                Some(Dependency::External(name)) => {
                    if !self.external.contains(name) {
                        self.external.push(name.clone());
                    }
                }
                None => {}
            }
        }
    }
}

const REGISTRY: &str = r#"const __modules = {};
const __cache = {};
function __require(id) {
  if (typeof id === "string") return __external(id);
  const cached = __cache[id];
  if (cached) return cached.exports;
  const module = (__cache[id] = { exports: {} });
  __modules[id](module, module.exports, __require);
  return module.exports;
}
"#;

const REGISTRY_ASYNC: &str = r#"const __modules = {};
const __cache = {};
async function __require(id) {
  if (typeof id === "string") return __external(id);
  const cached = __cache[id];
  if (cached) return cached.exports;
  const module = (__cache[id] = { exports: {} });
  await __modules[id](module, module.exports, __require);
  return module.exports;
}
function __requireSync(id) {
  if (typeof id === "string") return __external(id);
  if (!__cache[id]) __require(id);
  return __cache[id].exports;
}
"#;

const HELPERS: &str = r#"function __export(target, getters) {
  for (const name in getters) Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
}
function __default(m) {
  return m && m.default !== undefined ? m.default : m;
}
function __reexport(target, source) {
  for (const key in source) if (key !== "default" && !(key in target)) target[key] = source[key];
}
"#;

fn external_runtime(format: BundleFormat, externals: &[String]) -> String {
    match format {
        BundleFormat::Esm => {
            let entries: Vec<String> = externals
                .iter()
                .enumerate()
                .map(|(i, spec)| format!("{}: __ext_{i}", js_string(spec)))
                .collect();
            format!(
                "const __externals = {{ {} }};\nfunction __external(id) {{\n  return __externals[id];\n}}\n",
                entries.join(", ")
            )
        }
        BundleFormat::Cjs => "function __external(id) {\n  return require(id);\n}\n".to_string(),
        BundleFormat::Iife => "function __external(id) {\n  throw new Error(\"External module is not available: \" + id);\n}\n".to_string(),
    }
}

fn collect_externals(graph: &ModuleGraph) -> Vec<String> {
    let mut set = BTreeSet::new();
    for (id, module) in graph.iter() {
        for import in &module.imports {
            if let Some(Dependency::External(spec)) = graph.resolve_specifier(id, &import.raw) {
                set.insert(spec.clone());
            }
        }
    }
    set.into_iter().collect()
}

/// Rewrite one module into registry form.
fn render_module(
    id: ModuleId,
    module: &Module,
    graph: &ModuleGraph,
    assets: &HashMap<ModuleId, String>,
    is_async: bool,
) -> Result<Rendered, BundleError> {
    let mut rendered = Rendered::default();
    match module.loader {
        Loader::Js | Loader::Jsx | Loader::Ts | Loader::Tsx => {
            transform_module(&module.source, id, graph, is_async, &mut rendered);
        }
        Loader::Json => {
            let value: serde_json::Value =
                serde_json::from_str(&module.source).map_err(|e| BundleError {
                    code: codes::BUNDLE_PARSE_ERROR,
                    message: format!("Invalid JSON: {e}"),
                    path: Some(module.key.to_string()),
                })?;
            rendered.lines.push(format!("exports.default = {value};"));
            rendered.export("default");
        }
        Loader::Text => {
            rendered
                .lines
                .push(format!("exports.default = {};", js_string(&module.source)));
            rendered.export("default");
        }
        Loader::File => {
            let name = assets.get(&id).ok_or_else(|| BundleError {
                code: codes::BUNDLE_INTERNAL_ERROR,
                message: "No output name for file asset".to_string(),
                path: Some(module.key.to_string()),
            })?;
            rendered
                .lines
                .push(format!("exports.default = {};", js_string(&format!("./{name}"))));
            rendered.export("default");
        }
    }
    Ok(rendered)
}

/// Rewrite imports and exports of a script module.
///
/// In an async registry static imports await `require`, and `require()`
/// calls go through `__requireSync`.
fn transform_module(source: &str, id: ModuleId, graph: &ModuleGraph, is_async: bool, out: &mut Rendered) {
    let target = |spec: &str, call: &str| -> Option<String> {
        match graph.resolve_specifier(id, spec)? {
            Dependency::Module(target) => Some(format!("{call}({target})")),
            Dependency::External(name) => Some(format!("{call}({})", js_string(name))),
        }
    };
    let resolve = |spec: &str| -> Option<String> {
        let req = target(spec, "require")?;
        Some(if is_async { format!("(await {req})") } else { req })
    };
    let resolve_dynamic = |spec: &str| target(spec, "require");
    let resolve_require = |spec: &str| target(spec, if is_async { "__requireSync" } else { "require" });

    let lines: Vec<&str> = source.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim_start();

        if is_import_statement(trimmed) || is_export_list(trimmed) {
            if let Some((stmt, consumed)) = join_statement(&lines, i) {
                let rewritten = if is_import_statement(trimmed) {
                    rewrite_import(&stmt, i, &resolve)
                } else {
                    rewrite_export(&stmt, i, &resolve, out)
                };
                out.lines.push(rewritten);
                out.lines.extend(std::iter::repeat(String::new()).take(consumed - 1));
                i += consumed;
                continue;
            }
        }

        let line = if trimmed.starts_with("export ") {
            rewrite_export(trimmed, i, &resolve, out)
        } else {
            lines[i].trim_end().to_string()
        };
        out.lines.push(rewrite_calls(&line, &resolve_dynamic, &resolve_require));
        i += 1;
    }
}

fn is_import_statement(trimmed: &str) -> bool {
    trimmed
        .strip_prefix("import")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_whitespace() || matches!(c, '{' | '*' | '"' | '\''))
}

fn is_export_list(trimmed: &str) -> bool {
    ["export {", "export{", "export *", "export type {"]
        .iter()
        .any(|p| trimmed.starts_with(p))
}

/// Join an import/export statement that may span lines.
///
/// Returns the joined statement and how many source lines it used.
fn join_statement(lines: &[&str], start: usize) -> Option<(String, usize)> {
    let mut stmt = String::new();
    for (offset, line) in lines[start..].iter().take(MAX_STATEMENT_LINES).enumerate() {
        if offset > 0 {
            stmt.push(' ');
        }
        stmt.push_str(line.trim());
        if statement_complete(&stmt) {
            return Some((stmt, offset + 1));
        }
    }
    None
}

fn statement_complete(stmt: &str) -> bool {
    let opens = stmt.matches('{').count();
    let closes = stmt.matches('}').count();
    if opens != closes {
        return false;
    }
    let tail = stmt.rfind('}').map_or(stmt, |i| &stmt[i..]);
    let is_import = stmt.starts_with("import");
    if is_import || stmt.contains(" from") || stmt.starts_with("export *") {
        return tail.contains('"') || tail.contains('\'');
    }
    true
}

/// Split `... from "spec"` into the clause and the unquoted specifier.
fn split_from(stmt: &str) -> Option<(&str, &str)> {
    let body = stmt.trim().trim_end_matches(';').trim_end();
    let quote = body.chars().last().filter(|c| *c == '"' || *c == '\'')?;
    let open = body[..body.len() - 1].rfind(quote)?;
    let spec = &body[open + 1..body.len() - 1];
    let clause = body[..open].trim_end().strip_suffix("from")?.trim_end();
    Some((clause, spec))
}

/// Rewrite an import statement.
///
/// `import foo from "./a"` becomes `const foo = __default(require(1));`.
fn rewrite_import(stmt: &str, line: usize, resolve: &impl Fn(&str) -> Option<String>) -> String {
    let body = stmt.trim().trim_end_matches(';').trim_end();
    let rest = body["import".len()..].trim_start();

    if rest.starts_with("type ") || rest.starts_with("type{") {
        return String::new();
    }

    // Side-effect import: import "./polyfill";
    if rest.starts_with('"') || rest.starts_with('\'') {
        let spec = rest.trim_matches(|c| c == '"' || c == '\'');
        return match resolve(spec) {
            Some(req) => format!("{req};"),
            None => stmt.to_string(),
        };
    }

    let Some((clause, spec)) = split_from(stmt) else {
        return stmt.to_string();
    };
    let Some(req) = resolve(spec) else {
        return stmt.to_string();
    };
    let clause = clause["import".len()..].trim();

    let mut default_name = None;
    let mut namespace = None;
    let mut named = None;
    let mut remaining = clause;
    while !remaining.is_empty() {
        remaining = remaining.trim_start_matches(',').trim_start();
        if let Some(after) = remaining.strip_prefix('{') {
            let end = after.find('}').unwrap_or(after.len());
            named = Some(destructure_list(&after[..end]));
            remaining = after.get(end + 1..).unwrap_or("");
        } else if let Some(after) = remaining.strip_prefix('*') {
            let after = after.trim_start().strip_prefix("as").unwrap_or(after);
            let end = after.find(',').unwrap_or(after.len());
            namespace = Some(after[..end].trim().to_string());
            remaining = &after[end..];
        } else {
            let end = remaining.find(',').unwrap_or(remaining.len());
            let name = remaining[..end].trim();
            if !name.is_empty() {
                default_name = Some(name.to_string());
            }
            remaining = &remaining[end..];
        }
    }
    let named = named.filter(|n| !n.is_empty());

    let bindings = usize::from(default_name.is_some())
        + usize::from(namespace.is_some())
        + usize::from(named.is_some());
    if bindings == 0 {
        // Only type imports inside the braces.
        return String::new();
    }

    let (source, mut stmts) = if bindings == 1 {
        (req, Vec::new())
    } else {
        let temp = format!("__import_{line}");
        (temp.clone(), vec![format!("const {temp} = {req};")])
    };
    if let Some(name) = default_name {
        stmts.push(format!("const {name} = __default({source});"));
    }
    if let Some(ns) = namespace {
        stmts.push(format!("const {ns} = {source};"));
    }
    if let Some(list) = named {
        stmts.push(format!("const {{ {} }} = {source};", list.join(", ")));
    }
    stmts.join(" ")
}

/// Turn `a, b as c, type T` into destructuring entries `a`, `b: c`.
fn destructure_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with("type "))
        .map(|entry| match entry.split_once(" as ") {
            Some((imported, local)) => format!("{}: {}", imported.trim(), local.trim()),
            None => entry.to_string(),
        })
        .collect()
}

/// `(local, exported)` pairs of an export list, skipping type-only entries.
fn export_pairs(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with("type "))
        .map(|entry| match entry.split_once(" as ") {
            Some((local, exported)) => (
                local.trim().to_string(),
                exported.trim().trim_matches('"').to_string(),
            ),
            None => (entry.to_string(), entry.to_string()),
        })
        .collect()
}

/// Rewrite an export statement.
///
/// Declarations keep their bodies; their names are bound on `exports` with
/// live getters installed when the module function starts.
fn rewrite_export(
    stmt: &str,
    line: usize,
    resolve: &impl Fn(&str) -> Option<String>,
    out: &mut Rendered,
) -> String {
    let trimmed = stmt.trim();
    let Some(rest) = trimmed.strip_prefix("export") else {
        return stmt.to_string();
    };
    let rest = rest.trim_start();

    // TypeScript-only exports.
    if rest.starts_with("type {") || rest.starts_with("type{") {
        return String::new();
    }
    if rest.starts_with("type ")
        || rest.starts_with("interface ")
        || rest.starts_with("declare ")
    {
        return rest.to_string();
    }

    if let Some(value) = rest.strip_prefix("default ") {
        let value = value.trim_start();
        out.export("default");
        if let Some(name) = declaration_name(value) {
            out.getters.push(("default".to_string(), name));
            return value.to_string();
        }
        return format!("exports.default = {value}");
    }

    if rest.starts_with('*') {
        let Some((clause, spec)) = split_from(trimmed) else {
            return stmt.to_string();
        };
        let Some(req) = resolve(spec) else {
            return stmt.to_string();
        };
        let clause = clause.trim_start_matches("export").trim_start();
        if let Some(ns) = clause
            .strip_prefix('*')
            .map(str::trim_start)
            .and_then(|c| c.strip_prefix("as "))
        {
            let ns = ns.trim();
            out.export(ns);
            return format!("exports.{ns} = {req};");
        }
        out.stars.push(spec.to_string());
        return format!("__reexport(exports, {req});");
    }

    if let Some(after) = rest.strip_prefix('{') {
        let end = after.find('}').unwrap_or(after.len());
        let pairs = export_pairs(&after[..end]);
        let tail = after.get(end + 1..).unwrap_or("").trim();

        if tail.starts_with("from") {
            let Some((_, spec)) = split_from(trimmed) else {
                return stmt.to_string();
            };
            let Some(req) = resolve(spec) else {
                return stmt.to_string();
            };
            let temp = format!("__reexport_{line}");
            let mut stmts = vec![format!("const {temp} = {req};")];
            for (local, exported) in pairs {
                out.export(&exported);
                stmts.push(format!("exports{} = {temp}.{local};", js_member(&exported)));
            }
            return stmts.join(" ");
        }

        for (local, exported) in pairs {
            out.export(&exported);
            out.getters.push((exported, local));
        }
        return String::new();
    }

    for keyword in ["const ", "let ", "var "] {
        if let Some(decl) = rest.strip_prefix(keyword) {
            for name in binding_names(decl) {
                out.export(&name);
                out.getters.push((name.clone(), name));
            }
            return rest.to_string();
        }
    }

    if let Some(name) = declaration_name(rest) {
        out.export(&name);
        out.getters.push((name.clone(), name));
        return rest.to_string();
    }

    stmt.to_string()
}

/// Name of a function, class or enum declaration.
fn declaration_name(decl: &str) -> Option<String> {
    let mut rest = decl;
    for prefix in ["async ", "abstract ", "const "] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest).trim_start();
    }
    let rest = if let Some(r) = rest.strip_prefix("function") {
        r.trim_start().trim_start_matches('*')
    } else if let Some(r) = rest.strip_prefix("class ") {
        r
    } else if let Some(r) = rest.strip_prefix("enum ") {
        r
    } else {
        return None;
    };
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| is_ident_char(*c))
        .collect();
    (!name.is_empty() && name != "extends").then_some(name)
}

/// Names bound by the first declarator of `const`/`let`/`var`.
fn binding_names(decl: &str) -> Vec<String> {
    let decl = decl.trim_start();
    let Some(open) = decl.chars().next().filter(|c| *c == '{' || *c == '[') else {
        let name: String = decl.chars().take_while(|c| is_ident_char(*c)).collect();
        return if name.is_empty() { Vec::new() } else { vec![name] };
    };
    let close = if open == '{' { '}' } else { ']' };
    let inner = &decl[1..decl.find(close).unwrap_or(decl.len())];
    inner
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim().trim_start_matches("...");
            let entry = entry.split('=').next().unwrap_or(entry);
            let entry = entry.rsplit(':').next().unwrap_or(entry).trim();
            (!entry.is_empty() && entry.chars().all(is_ident_char)).then(|| entry.to_string())
        })
        .collect()
}

/// Rewrite `import("x")` and `require("x")` calls whose target is known.
fn rewrite_calls(
    line: &str,
    resolve_dynamic: &impl Fn(&str) -> Option<String>,
    resolve_require: &impl Fn(&str) -> Option<String>,
) -> String {
    if !line.contains("import(") && !line.contains("require(") && !line.contains("import (") {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let next = ["import", "require"]
            .iter()
            .filter_map(|kw| find_call(rest, kw).map(|pos| (pos, *kw)))
            .min_by_key(|(pos, _)| *pos);
        let Some((pos, keyword)) = next else {
            out.push_str(rest);
            break;
        };

        let after_kw = &rest[pos + keyword.len()..];
        let resolve = |spec: &str| {
            if keyword == "import" {
                resolve_dynamic(spec)
            } else {
                resolve_require(spec)
            }
        };
        match parse_call_argument(after_kw).and_then(|(spec, len)| Some((resolve(spec)?, len))) {
            Some((req, len)) => {
                out.push_str(&rest[..pos]);
                if keyword == "import" {
                    let _ = write!(out, "Promise.resolve().then(() => {req})");
                } else {
                    out.push_str(&req);
                }
                rest = &after_kw[len..];
            }
            None => {
                out.push_str(&rest[..pos + keyword.len()]);
                rest = after_kw;
            }
        }
    }
    out
}

/// Position of `keyword` used as a call (not a member or longer identifier).
fn find_call(haystack: &str, keyword: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(found) = haystack[from..].find(keyword) {
        let pos = from + found;
        let before = haystack[..pos].chars().last();
        let after = haystack[pos + keyword.len()..].trim_start().chars().next();
        let standalone = before.map_or(true, |c| !is_ident_char(c) && c != '.');
        if standalone && after == Some('(') {
            return Some(pos);
        }
        from = pos + keyword.len();
    }
    None
}

/// Parse `("spec")` and return the spec and the consumed length.
fn parse_call_argument(s: &str) -> Option<(&str, usize)> {
    let open = s.find('(')?;
    let inner = &s[open + 1..];
    let lead = inner.len() - inner.trim_start().len();
    let inner = inner.trim_start();
    let quote = inner.chars().next().filter(|c| matches!(c, '"' | '\'' | '`'))?;
    let end = inner[1..].find(quote)? + 1;
    let spec = &inner[1..end];
    if quote == '`' && spec.contains("${") {
        return None;
    }
    let after = &inner[end + 1..];
    let trail = after.len() - after.trim_start().len();
    after.trim_start().starts_with(')').then_some((
        spec,
        open + 1 + lead + end + 1 + trail + 1,
    ))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_identifier(name: &str) -> bool {
    name.chars().next().is_some_and(|c| !c.is_ascii_digit()) && name.chars().all(is_ident_char)
}

fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

fn js_property(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        js_string(name)
    }
}

fn js_member(name: &str) -> String {
    if is_identifier(name) {
        format!(".{name}")
    } else {
        format!("[{}]", js_string(name))
    }
}
