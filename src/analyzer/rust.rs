//! Rust source scanning using syn for AST parsing
//!
//! Code Quality Principle: Specialized Analysis Services - The scanner turns a crate into a Snapshot
//! - Index pass: every file is parsed on its own (in parallel) into owned module and item records
//! - Link pass: paths are resolved against the whole crate index, sequentially and in file order
//! - Only crate-internal references survive; std, external crates and generics resolve to nothing

use crate::analyzer::{ScanOptions, ScanOutcome, SnapshotSource};
use crate::domain::units::{CodeUnit, Reference, ReferenceKind, Snapshot, UnitKind};
use crate::domain::violations::{CheckWarning, LayerError, LayerResult};
use crate::patterns::{is_identifier, PathFilter};
use proc_macro2::{TokenStream, TokenTree};
use quote::ToTokens;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use syn::punctuated::Punctuated;
use syn::visit::Visit;

/// Bound on alias and glob chains followed while resolving one path
const MAX_RESOLUTION_DEPTH: usize = 8;

/// Builds a Snapshot by statically scanning a crate's source tree
#[derive(Debug, Clone)]
pub struct RustSourceScanner {
    filter: PathFilter,
}

impl RustSourceScanner {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter }
    }

    /// Source files with the module path each one defines
    fn discover(&self, path: &Path) -> LayerResult<Vec<(PathBuf, Vec<String>)>> {
        if path.is_file() {
            return Ok(vec![(path.to_path_buf(), Vec::new())]);
        }

        let src_dir = source_dir(path);
        let files = self
            .filter
            .find_files(path, "rs")?
            .into_iter()
            .filter_map(|file| module_path_for(&src_dir, &file).map(|module| (file, module)))
            .collect();

        Ok(files)
    }

    /// Parse one file into owned index records
    fn index_file(file: &Path, module: Vec<String>) -> Result<FileIndex, String> {
        let content = fs::read_to_string(file).map_err(|e| format!("Failed to read file: {e}"))?;
        let syntax_tree = syn::parse_file(&content).map_err(|e| {
            let start = e.span().start();
            format!("{} at line {}", e, start.line)
        })?;

        let mut indexer = FileIndexer { file: file.to_path_buf(), index: FileIndex::default() };
        let module_idx = indexer.push_module(RawModule {
            path: module,
            file: file.to_path_buf(),
            line: 1,
            is_test: false,
            has_body: true,
            refs: Vec::new(),
            uses: Vec::new(),
        });
        indexer.index_items(&syntax_tree.items, module_idx, false);

        tracing::debug!(
            "Indexed {}: {} module(s), {} item(s)",
            file.display(),
            indexer.index.modules.len(),
            indexer.index.items.len()
        );
        Ok(indexer.index)
    }
}

impl SnapshotSource for RustSourceScanner {
    fn build_snapshot(
        &self,
        path: &Path,
        root: &str,
        options: &ScanOptions,
    ) -> LayerResult<ScanOutcome> {
        let files = self.discover(path)?;

        // syn trees stay on the worker thread; only owned records come back
        let parsed: Vec<(PathBuf, Result<FileIndex, String>)> = if options.parallel && files.len() > 1 {
            files
                .into_par_iter()
                .map(|(file, module)| {
                    let result = Self::index_file(&file, module);
                    (file, result)
                })
                .collect()
        } else {
            files
                .into_iter()
                .map(|(file, module)| {
                    let result = Self::index_file(&file, module);
                    (file, result)
                })
                .collect()
        };

        let mut warnings = Vec::new();
        let mut indexes = Vec::new();

        for (file, result) in parsed {
            match result {
                Ok(index) => indexes.push(index),
                Err(message) => {
                    if options.fail_fast {
                        return Err(LayerError::parse(file.display().to_string(), message));
                    }
                    tracing::warn!("Skipping {}: {}", file.display(), message);
                    warnings.push(CheckWarning::UnparsedFile { file, message });
                }
            }
        }

        let files_scanned = indexes.len();
        let snapshot = CrateLinker::new(root, indexes).link();

        tracing::info!(
            "Built snapshot for '{}': {} unit(s), {} reference(s) from {} file(s)",
            root,
            snapshot.len(),
            snapshot.reference_count(),
            files_scanned
        );

        Ok(ScanOutcome { snapshot, warnings, files_scanned })
    }

    fn handles_path(&self, path: &Path) -> bool {
        path.is_dir() || path.extension().and_then(|ext| ext.to_str()) == Some("rs")
    }
}

/// The crate's `src/` directory if there is one, else the path itself
fn source_dir(path: &Path) -> PathBuf {
    let src = path.join("src");
    if src.is_dir() {
        src
    } else {
        path.to_path_buf()
    }
}

/// Module path defined by a file, from its position under `src_dir`.
///
/// `lib.rs`/`main.rs` are the crate root, `a/mod.rs` and `a.rs` are `a`, `a/b.rs` is `a::b`.
/// Files outside `src_dir` and under `src/bin` belong to other crates.
fn module_path_for(src_dir: &Path, file: &Path) -> Option<Vec<String>> {
    let relative = file.strip_prefix(src_dir).ok()?;
    let mut segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let file_name = segments.pop()?;
    let stem = file_name.strip_suffix(".rs")?;

    if segments.first().map(String::as_str) == Some("bin") {
        return None;
    }

    match stem {
        "mod" => {}
        "lib" | "main" if segments.is_empty() => {}
        other => segments.push(other.to_string()),
    }

    segments.iter().all(|s| is_identifier(s)).then_some(segments)
}

/// Whether attributes mark an item as test-only code
fn has_test_marker(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let path = attr.path();
        if path.segments.last().is_some_and(|segment| segment.ident == "test") {
            return true;
        }

        match &attr.meta {
            syn::Meta::List(list) if path.is_ident("cfg") => cfg_mentions_test(list.tokens.clone()),
            _ => false,
        }
    })
}

/// `test` appears in a cfg predicate outside any `not(..)`
fn cfg_mentions_test(tokens: TokenStream) -> bool {
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match token {
            TokenTree::Ident(ident) if ident == "test" => return true,
            TokenTree::Ident(ident) if ident == "not" => {
                if matches!(iter.peek(), Some(TokenTree::Group(_))) {
                    iter.next();
                }
            }
            TokenTree::Group(group) => {
                if cfg_mentions_test(group.stream()) {
                    return true;
                }
            }
            _ => {}
        }
    }

    false
}

fn line_of(ident: &syn::Ident) -> u32 {
    ident.span().start().line as u32
}

/// A path found in source, not yet resolved
#[derive(Debug, Clone)]
struct RawRef {
    path: Vec<String>,
    kind: ReferenceKind,
    line: u32,
}

/// One leaf of a `use` tree
#[derive(Debug, Clone)]
struct UseEntry {
    /// Name the import binds, `None` for globs and `as _`
    alias: Option<String>,
    path: Vec<String>,
    glob: bool,
    line: u32,
}

#[derive(Debug, Clone)]
struct RawModule {
    /// Module path relative to the crate root
    path: Vec<String>,
    file: PathBuf,
    line: u32,
    is_test: bool,
    /// False for a bare `mod x;` declaration
    has_body: bool,
    refs: Vec<RawRef>,
    uses: Vec<UseEntry>,
}

#[derive(Debug, Clone)]
struct RawItem {
    module: Vec<String>,
    name: String,
    kind: UnitKind,
    file: PathBuf,
    line: u32,
    is_test: bool,
    refs: Vec<RawRef>,
}

/// Everything one file contributes to the crate index
#[derive(Debug, Default)]
struct FileIndex {
    modules: Vec<RawModule>,
    items: Vec<RawItem>,
}

/// Unit that receives the references of an impl block
#[derive(Clone, Copy)]
enum Owner {
    Module(usize),
    Item(usize),
}

struct FileIndexer {
    file: PathBuf,
    index: FileIndex,
}

impl FileIndexer {
    fn push_module(&mut self, module: RawModule) -> usize {
        self.index.modules.push(module);
        self.index.modules.len() - 1
    }

    fn module_path(&self, module_idx: usize) -> Vec<String> {
        self.index.modules[module_idx].path.clone()
    }

    /// Run a collector of `kind`; body-local `use` items join the module scope
    fn gather<F>(&mut self, module_idx: usize, kind: ReferenceKind, visit: F) -> Vec<RawRef>
    where
        F: FnOnce(&mut PathCollector),
    {
        let mut collector = PathCollector { kind, refs: Vec::new(), local_uses: Vec::new() };
        visit(&mut collector);
        self.index.modules[module_idx].uses.extend(collector.local_uses);
        collector.refs
    }

    fn add_refs(&mut self, owner: Owner, refs: Vec<RawRef>) {
        match owner {
            Owner::Module(idx) => self.index.modules[idx].refs.extend(refs),
            Owner::Item(idx) => self.index.items[idx].refs.extend(refs),
        }
    }

    fn signature_refs(&mut self, module_idx: usize, sig: &syn::Signature) -> Vec<RawRef> {
        let mut refs = self.gather(module_idx, ReferenceKind::Parameter, |c| {
            for input in &sig.inputs {
                if let syn::FnArg::Typed(pat_type) = input {
                    c.visit_type(&pat_type.ty);
                }
            }
        });
        refs.extend(self.gather(module_idx, ReferenceKind::ReturnType, |c| {
            if let syn::ReturnType::Type(_, ty) = &sig.output {
                c.visit_type(ty);
            }
        }));
        refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| {
            c.visit_generics(&sig.generics)
        }));
        refs
    }

    fn index_items(&mut self, items: &[syn::Item], module_idx: usize, module_is_test: bool) {
        // Types declared right here can own impl blocks
        let mut local_types: HashMap<String, usize> = HashMap::new();

        for item in items {
            if let syn::Item::Impl(_) = item {
                continue;
            }
            if let Some(item_idx) = self.index_item(item, module_idx, module_is_test) {
                let entry = &self.index.items[item_idx];
                if matches!(
                    entry.kind,
                    UnitKind::Struct | UnitKind::Enum | UnitKind::Union | UnitKind::Trait | UnitKind::TypeAlias
                ) {
                    local_types.entry(entry.name.clone()).or_insert(item_idx);
                }
            }
        }

        for item in items {
            if let syn::Item::Impl(imp) = item {
                self.index_impl(imp, module_idx, &local_types);
            }
        }
    }

    /// Index one non-impl item, returning its index when it became a unit
    fn index_item(&mut self, item: &syn::Item, module_idx: usize, module_is_test: bool) -> Option<usize> {
        let module = self.module_path(module_idx);

        match item {
            syn::Item::Mod(m) => {
                let mut path = module;
                path.push(m.ident.to_string());
                let is_test = module_is_test || has_test_marker(&m.attrs);

                let child_idx = self.push_module(RawModule {
                    path,
                    file: self.file.clone(),
                    line: line_of(&m.ident),
                    is_test,
                    has_body: m.content.is_some(),
                    refs: Vec::new(),
                    uses: Vec::new(),
                });

                if let Some((_, items)) = &m.content {
                    self.index_items(items, child_idx, is_test);
                }
                None
            }
            syn::Item::Use(u) => {
                if u.leading_colon.is_some() {
                    return None;
                }
                let mut entries = Vec::new();
                flatten_use(&u.tree, &mut Vec::new(), line_of_use(&u.tree), &mut entries);

                let imports = entries
                    .iter()
                    .map(|entry| RawRef { path: entry.path.clone(), kind: ReferenceKind::Import, line: entry.line })
                    .collect::<Vec<_>>();

                let target = &mut self.index.modules[module_idx];
                target.refs.extend(imports);
                target.uses.extend(entries);
                None
            }
            syn::Item::Macro(mac) if mac.ident.is_none() => {
                let refs = self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_macro(&mac.mac));
                self.index.modules[module_idx].refs.extend(refs);
                None
            }
            syn::Item::ForeignMod(foreign) => {
                for foreign_item in &foreign.items {
                    self.index_foreign_item(foreign_item, module_idx, module_is_test);
                }
                None
            }
            other => self.index_declared_item(other, module_idx, module_is_test),
        }
    }

    fn index_declared_item(
        &mut self,
        item: &syn::Item,
        module_idx: usize,
        module_is_test: bool,
    ) -> Option<usize> {
        let (ident, kind, attrs) = match item {
            syn::Item::Struct(s) => (&s.ident, UnitKind::Struct, &s.attrs),
            syn::Item::Enum(e) => (&e.ident, UnitKind::Enum, &e.attrs),
            syn::Item::Union(u) => (&u.ident, UnitKind::Union, &u.attrs),
            syn::Item::Trait(t) => (&t.ident, UnitKind::Trait, &t.attrs),
            syn::Item::TraitAlias(t) => (&t.ident, UnitKind::Trait, &t.attrs),
            syn::Item::Fn(f) => (&f.sig.ident, UnitKind::Function, &f.attrs),
            syn::Item::Type(t) => (&t.ident, UnitKind::TypeAlias, &t.attrs),
            syn::Item::Const(c) => (&c.ident, UnitKind::Const, &c.attrs),
            syn::Item::Static(s) => (&s.ident, UnitKind::Static, &s.attrs),
            syn::Item::Macro(m) => (m.ident.as_ref()?, UnitKind::Macro, &m.attrs),
            _ => return None,
        };

        if *ident == "_" {
            return None;
        }

        let mut refs = Vec::new();
        match item {
            syn::Item::Struct(s) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| {
                    for field in &s.fields {
                        c.visit_type(&field.ty);
                    }
                }));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_generics(&s.generics)));
            }
            syn::Item::Enum(e) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| {
                    for variant in &e.variants {
                        for field in &variant.fields {
                            c.visit_type(&field.ty);
                        }
                    }
                }));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| {
                    c.visit_generics(&e.generics);
                    for variant in &e.variants {
                        if let Some((_, discriminant)) = &variant.discriminant {
                            c.visit_expr(discriminant);
                        }
                    }
                }));
            }
            syn::Item::Union(u) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| {
                    for field in &u.fields.named {
                        c.visit_type(&field.ty);
                    }
                }));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_generics(&u.generics)));
            }
            syn::Item::Trait(t) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Supertype, |c| {
                    for bound in &t.supertraits {
                        c.visit_type_param_bound(bound);
                    }
                }));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_generics(&t.generics)));
                for trait_item in &t.items {
                    refs.extend(self.trait_item_refs(trait_item, module_idx));
                }
            }
            syn::Item::TraitAlias(t) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Supertype, |c| {
                    for bound in &t.bounds {
                        c.visit_type_param_bound(bound);
                    }
                }));
            }
            syn::Item::Fn(f) => {
                refs.extend(self.signature_refs(module_idx, &f.sig));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_block(&f.block)));
            }
            syn::Item::Type(t) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| {
                    c.visit_generics(&t.generics);
                    c.visit_type(&t.ty);
                }));
            }
            syn::Item::Const(item_const) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| c.visit_type(&item_const.ty)));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_expr(&item_const.expr)));
            }
            syn::Item::Static(item_static) => {
                refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| c.visit_type(&item_static.ty)));
                refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_expr(&item_static.expr)));
            }
            // macro_rules! bodies are token patterns, not paths
            _ => {}
        }

        let item = RawItem {
            module: self.module_path(module_idx),
            name: ident.to_string(),
            kind,
            file: self.file.clone(),
            line: line_of(ident),
            is_test: module_is_test || has_test_marker(attrs),
            refs,
        };
        self.index.items.push(item);
        Some(self.index.items.len() - 1)
    }

    fn trait_item_refs(&mut self, trait_item: &syn::TraitItem, module_idx: usize) -> Vec<RawRef> {
        match trait_item {
            syn::TraitItem::Fn(f) => {
                let mut refs = self.signature_refs(module_idx, &f.sig);
                if let Some(block) = &f.default {
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_block(block)));
                }
                refs
            }
            syn::TraitItem::Type(t) => self.gather(module_idx, ReferenceKind::Usage, |c| {
                for bound in &t.bounds {
                    c.visit_type_param_bound(bound);
                }
                if let Some((_, ty)) = &t.default {
                    c.visit_type(ty);
                }
            }),
            syn::TraitItem::Const(item_const) => {
                let mut refs =
                    self.gather(module_idx, ReferenceKind::Field, |c| c.visit_type(&item_const.ty));
                if let Some((_, expr)) = &item_const.default {
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_expr(expr)));
                }
                refs
            }
            syn::TraitItem::Macro(m) => {
                self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_macro(&m.mac))
            }
            _ => Vec::new(),
        }
    }

    /// An impl belongs to its self type when that type is declared in the same module
    fn index_impl(&mut self, imp: &syn::ItemImpl, module_idx: usize, local_types: &HashMap<String, usize>) {
        let local_owner = match &*imp.self_ty {
            syn::Type::Path(type_path) if type_path.qself.is_none() && type_path.path.segments.len() == 1 => {
                let ident = type_path.path.segments[0].ident.to_string();
                local_types.get(&ident).copied()
            }
            _ => None,
        };

        let owner = match local_owner {
            Some(item_idx) => Owner::Item(item_idx),
            None => {
                let refs = self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_type(&imp.self_ty));
                self.index.modules[module_idx].refs.extend(refs);
                Owner::Module(module_idx)
            }
        };

        let mut refs = Vec::new();
        if let Some((_, trait_path, _)) = &imp.trait_ {
            refs.extend(self.gather(module_idx, ReferenceKind::Supertype, |c| c.visit_path(trait_path)));
        }
        refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_generics(&imp.generics)));

        for impl_item in &imp.items {
            match impl_item {
                syn::ImplItem::Fn(f) => {
                    refs.extend(self.signature_refs(module_idx, &f.sig));
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_block(&f.block)));
                }
                syn::ImplItem::Const(item_const) => {
                    refs.extend(self.gather(module_idx, ReferenceKind::Field, |c| c.visit_type(&item_const.ty)));
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_expr(&item_const.expr)));
                }
                syn::ImplItem::Type(t) => {
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_type(&t.ty)));
                }
                syn::ImplItem::Macro(m) => {
                    refs.extend(self.gather(module_idx, ReferenceKind::Usage, |c| c.visit_macro(&m.mac)));
                }
                _ => {}
            }
        }

        self.add_refs(owner, refs);
    }

    fn index_foreign_item(&mut self, foreign_item: &syn::ForeignItem, module_idx: usize, module_is_test: bool) {
        let (ident, kind, attrs, refs) = match foreign_item {
            syn::ForeignItem::Fn(f) => {
                let refs = self.signature_refs(module_idx, &f.sig);
                (&f.sig.ident, UnitKind::Function, &f.attrs, refs)
            }
            syn::ForeignItem::Static(s) => {
                let refs = self.gather(module_idx, ReferenceKind::Field, |c| c.visit_type(&s.ty));
                (&s.ident, UnitKind::Static, &s.attrs, refs)
            }
            _ => return,
        };

        self.index.items.push(RawItem {
            module: self.module_path(module_idx),
            name: ident.to_string(),
            kind,
            file: self.file.clone(),
            line: line_of(ident),
            is_test: module_is_test || has_test_marker(attrs),
            refs,
        });
    }
}

fn line_of_use(tree: &syn::UseTree) -> u32 {
    match tree {
        syn::UseTree::Path(p) => line_of(&p.ident),
        syn::UseTree::Name(n) => line_of(&n.ident),
        syn::UseTree::Rename(r) => line_of(&r.ident),
        syn::UseTree::Glob(g) => g.star_token.spans[0].start().line as u32,
        syn::UseTree::Group(g) => g.brace_token.span.open().start().line as u32,
    }
}

/// Flatten a `use` tree into one entry per imported name or glob
fn flatten_use(tree: &syn::UseTree, prefix: &mut Vec<String>, line: u32, out: &mut Vec<UseEntry>) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            flatten_use(&p.tree, prefix, line_of(&p.ident), out);
            prefix.pop();
        }
        syn::UseTree::Name(n) => {
            let (path, alias) = if n.ident == "self" {
                (prefix.clone(), prefix.last().cloned())
            } else {
                let mut path = prefix.clone();
                path.push(n.ident.to_string());
                (path, Some(n.ident.to_string()))
            };
            out.push(UseEntry { alias, path, glob: false, line: line_of(&n.ident) });
        }
        syn::UseTree::Rename(r) => {
            let mut path = prefix.clone();
            if r.ident != "self" {
                path.push(r.ident.to_string());
            }
            let alias = (r.rename != "_").then(|| r.rename.to_string());
            out.push(UseEntry { alias, path, glob: false, line: line_of(&r.ident) });
        }
        syn::UseTree::Glob(_) => {
            out.push(UseEntry { alias: None, path: prefix.clone(), glob: true, line });
        }
        syn::UseTree::Group(g) => {
            for item in &g.items {
                flatten_use(item, prefix, line, out);
            }
        }
    }
}

/// Collects every path below a syntax node as a reference of one kind
struct PathCollector {
    kind: ReferenceKind,
    refs: Vec<RawRef>,
    local_uses: Vec<UseEntry>,
}

impl PathCollector {
    fn record(&mut self, path: &syn::Path) {
        // `::name` paths always leave the crate
        if path.leading_colon.is_some() {
            return;
        }
        let Some(first) = path.segments.first() else {
            return;
        };

        self.refs.push(RawRef {
            path: path.segments.iter().map(|s| s.ident.to_string()).collect(),
            kind: self.kind,
            line: line_of(&first.ident),
        });
    }
}

impl<'ast> Visit<'ast> for PathCollector {
    fn visit_path(&mut self, path: &'ast syn::Path) {
        self.record(path);
        syn::visit::visit_path(self, path);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        self.record(&mac.path);

        // Arguments that read as expressions, as in format!/assert! style macros
        match mac.parse_body_with(Punctuated::<syn::Expr, syn::Token![,]>::parse_terminated) {
            Ok(args) => {
                for arg in &args {
                    self.visit_expr(arg);
                }
            }
            Err(_) => tracing::debug!(
                "Macro {}! body is not an expression list, only its path is recorded",
                mac.path.to_token_stream()
            ),
        }
    }

    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        if item.leading_colon.is_some() {
            return;
        }

        let mut entries = Vec::new();
        flatten_use(&item.tree, &mut Vec::new(), line_of_use(&item.tree), &mut entries);
        for entry in &entries {
            self.refs.push(RawRef { path: entry.path.clone(), kind: self.kind, line: entry.line });
        }
        self.local_uses.extend(entries);
    }
}

/// Merged view of one module across its declaration and its body
#[derive(Debug, Default)]
struct ModuleEntry {
    file: Option<PathBuf>,
    line: Option<u32>,
    is_test: bool,
    has_body: bool,
    refs: Vec<RawRef>,
}

/// Names a module brings into scope through `use`
#[derive(Debug, Default)]
struct Scope {
    aliases: HashMap<String, Vec<String>>,
    globs: Vec<Vec<String>>,
}

/// Link pass: resolves raw paths against the crate-wide index
struct CrateLinker {
    root: String,
    root_segments: Vec<String>,
    modules: BTreeMap<Vec<String>, ModuleEntry>,
    items: Vec<RawItem>,
    scopes: HashMap<Vec<String>, Scope>,
    known: HashSet<Vec<String>>,
    children: HashMap<Vec<String>, BTreeSet<String>>,
}

impl CrateLinker {
    fn new(root: &str, indexes: Vec<FileIndex>) -> Self {
        let mut modules: BTreeMap<Vec<String>, ModuleEntry> = BTreeMap::new();
        let mut scopes: HashMap<Vec<String>, Scope> = HashMap::new();
        let mut items = Vec::new();

        for index in indexes {
            for raw in index.modules {
                let entry = modules.entry(raw.path.clone()).or_default();
                if raw.has_body || !entry.has_body {
                    entry.file = Some(raw.file);
                    entry.line = Some(raw.line);
                }
                entry.has_body |= raw.has_body;
                entry.is_test |= raw.is_test;
                entry.refs.extend(raw.refs);

                let scope = scopes.entry(raw.path).or_default();
                for use_entry in raw.uses {
                    if use_entry.glob {
                        scope.globs.push(use_entry.path);
                    } else if let Some(alias) = use_entry.alias {
                        scope.aliases.entry(alias).or_insert(use_entry.path);
                    }
                }
            }
            items.extend(index.items);
        }

        // Every ancestor of a known module is a module too
        let paths: Vec<Vec<String>> = modules.keys().cloned().collect();
        for path in paths {
            for len in 0..path.len() {
                modules.entry(path[..len].to_vec()).or_default();
            }
        }

        let mut known = HashSet::new();
        let mut children: HashMap<Vec<String>, BTreeSet<String>> = HashMap::new();

        for path in modules.keys() {
            known.insert(path.clone());
            if let Some((last, parent)) = path.split_last() {
                children.entry(parent.to_vec()).or_default().insert(last.clone());
            }
        }
        for item in &items {
            let mut path = item.module.clone();
            path.push(item.name.clone());
            known.insert(path);
            children.entry(item.module.clone()).or_default().insert(item.name.clone());
        }

        Self {
            root: root.to_string(),
            root_segments: root.split("::").map(str::to_string).collect(),
            modules,
            items,
            scopes,
            known,
            children,
        }
    }

    /// Whether `module` or any enclosing module is test-only
    fn module_is_test(&self, module: &[String]) -> bool {
        (0..=module.len()).any(|len| self.modules.get(&module[..len]).is_some_and(|m| m.is_test))
    }

    fn full_name(&self, path: &[String]) -> String {
        self.root_segments.iter().chain(path).cloned().collect::<Vec<_>>().join("::")
    }

    /// Resolve a path written inside `module` to a crate-relative path
    fn resolve(&self, module: &[String], path: &[String], depth: usize) -> Option<Vec<String>> {
        if depth > MAX_RESOLUTION_DEPTH {
            return None;
        }
        let first = path.first()?.as_str();

        match first {
            "crate" => return Some(path[1..].to_vec()),
            "self" | "super" => {
                let mut base = module.to_vec();
                let mut rest = path;
                while let Some(segment) = rest.first() {
                    match segment.as_str() {
                        "self" => {}
                        "super" => {
                            base.pop()?;
                        }
                        _ => break,
                    }
                    rest = &rest[1..];
                }
                base.extend_from_slice(rest);
                return Some(base);
            }
            "Self" => return None,
            _ => {}
        }

        if path.len() > self.root_segments.len() && path.starts_with(&self.root_segments) {
            return Some(path[self.root_segments.len()..].to_vec());
        }

        let scope = self.scopes.get(module);

        if let Some(target) = scope.and_then(|s| s.aliases.get(first)) {
            if !(target.len() == 1 && target[0] == first) {
                let mut full = target.clone();
                full.extend_from_slice(&path[1..]);
                return self.resolve(module, &full, depth + 1);
            }
        }

        if self.children.get(module).is_some_and(|names| names.contains(first)) {
            let mut full = module.to_vec();
            full.extend_from_slice(path);
            return Some(full);
        }

        for glob in scope.map(|s| s.globs.as_slice()).unwrap_or_default() {
            let Some(mut base) = self.resolve(module, glob, depth + 1) else {
                continue;
            };
            base.push(first.to_string());
            if self.known.contains(&base) {
                base.extend_from_slice(&path[1..]);
                return Some(base);
            }
        }

        None
    }

    /// Longest prefix of `path` naming a unit; the crate root itself does not count
    fn to_unit(&self, path: &[String]) -> Option<Vec<String>> {
        (1..=path.len())
            .rev()
            .map(|len| &path[..len])
            .find(|prefix| self.known.contains(*prefix))
            .map(<[String]>::to_vec)
    }

    fn link_refs(&self, unit: &mut CodeUnit, module: &[String], refs: &[RawRef]) {
        for raw in refs {
            let Some(resolved) = self.resolve(module, &raw.path, 0) else {
                continue;
            };
            match self.to_unit(&resolved) {
                Some(target) => unit.add_reference(
                    Reference::new(self.full_name(&target), raw.kind).at_line(raw.line),
                ),
                None => tracing::debug!(
                    "{}: '{}' does not name a unit",
                    unit.name,
                    raw.path.join("::")
                ),
            }
        }
    }

    fn link(self) -> Snapshot {
        let mut units: BTreeMap<String, CodeUnit> = BTreeMap::new();

        for (path, entry) in &self.modules {
            let name = self.full_name(path);
            let mut unit = CodeUnit::new(name.clone(), UnitKind::Module).marked_test(self.module_is_test(path));
            if let Some(file) = &entry.file {
                unit = unit.with_location(file.clone(), entry.line);
            }
            self.link_refs(&mut unit, path, &entry.refs);
            units.insert(name, unit);
        }

        for item in &self.items {
            let mut path = item.module.clone();
            path.push(item.name.clone());
            let name = self.full_name(&path);

            let is_test = item.is_test || self.module_is_test(&item.module);
            let unit = units.entry(name.clone()).or_insert_with(|| {
                CodeUnit::new(name, item.kind)
                    .with_location(item.file.clone(), Some(item.line))
                    .marked_test(is_test)
            });
            self.link_refs(unit, &item.module, &item.refs);
        }

        Snapshot::new(self.root.clone(), units.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn shop_crate() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write(root, "Cargo.toml", "[package]\nname = \"shop\"\n");
        write(root, "src/lib.rs", "pub mod repository;\npub mod service;\npub mod web;\n");
        write(
            root,
            "src/service.rs",
            r#"use crate::repository::OrderRepository;
use crate::web::controller::OrderController;

pub struct OrderService {
    repo: OrderRepository,
}

impl OrderService {
    pub fn render(&self) -> Option<OrderController> {
        None
    }
}

pub fn helper() -> crate::web::Session {
    crate::web::Session
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::Session;

    #[test]
    fn builds() {
        let _ = Session;
    }
}
"#,
        );
        write(
            root,
            "src/repository.rs",
            "pub struct OrderRepository;\n\n#[cfg(test)]\nmod tests;\n",
        );
        write(
            root,
            "src/repository/tests.rs",
            "use crate::web::Session;\n\n#[test]\nfn session() {\n    let _ = Session;\n}\n",
        );
        write(root, "src/web/mod.rs", "pub mod controller;\n\n#[derive(Default)]\npub struct Session;\n");
        write(
            root,
            "src/web/controller.rs",
            r#"use crate::service::OrderService;

pub struct OrderController {
    service: OrderService,
}

impl OrderController {
    pub fn new(service: OrderService) -> Self {
        Self { service }
    }
}
"#,
        );

        temp_dir
    }

    fn scan(path: &Path, options: &ScanOptions) -> ScanOutcome {
        let scanner = RustSourceScanner::new(PathFilter::with_defaults().unwrap());
        scanner.build_snapshot(path, "shop", options).unwrap()
    }

    fn has_ref(snapshot: &Snapshot, from: &str, to: &str, kind: ReferenceKind) -> bool {
        snapshot
            .find(from)
            .is_some_and(|unit| unit.references.iter().any(|r| r.target == to && r.kind == kind))
    }

    #[rstest]
    #[case("src/lib.rs", Some(vec![]))]
    #[case("src/main.rs", Some(vec![]))]
    #[case("src/web/mod.rs", Some(vec!["web"]))]
    #[case("src/web.rs", Some(vec!["web"]))]
    #[case("src/web/controller.rs", Some(vec!["web", "controller"]))]
    #[case("src/bin/tool.rs", None)]
    #[case("src/my-file.rs", None)]
    #[case("tests/it.rs", None)]
    fn test_module_path_for(#[case] file: &str, #[case] expected: Option<Vec<&str>>) {
        let root = Path::new("/crate");
        let expected = expected.map(|segments| segments.into_iter().map(str::to_string).collect());
        assert_eq!(module_path_for(&root.join("src"), &root.join(file)), expected);
    }

    #[test]
    fn test_test_markers() {
        let marked: Vec<syn::ItemFn> = vec![
            syn::parse_quote! { #[test] fn a() {} },
            syn::parse_quote! { #[tokio::test] async fn b() {} },
            syn::parse_quote! { #[cfg(test)] fn c() {} },
            syn::parse_quote! { #[cfg(all(test, feature = "slow"))] fn d() {} },
        ];
        for item in &marked {
            assert!(has_test_marker(&item.attrs), "{}", item.sig.ident);
        }

        let unmarked: Vec<syn::ItemFn> = vec![
            syn::parse_quote! { #[cfg(not(test))] fn e() {} },
            syn::parse_quote! { #[inline] fn f() {} },
        ];
        for item in &unmarked {
            assert!(!has_test_marker(&item.attrs), "{}", item.sig.ident);
        }
    }

    #[test]
    fn test_units_and_namespaces() {
        let temp_dir = shop_crate();
        let outcome = scan(temp_dir.path(), &ScanOptions::default());
        let snapshot = &outcome.snapshot;

        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.files_scanned, 6);

        for name in [
            "shop",
            "shop::repository",
            "shop::repository::OrderRepository",
            "shop::service",
            "shop::service::OrderService",
            "shop::service::helper",
            "shop::web",
            "shop::web::Session",
            "shop::web::controller",
            "shop::web::controller::OrderController",
        ] {
            assert!(snapshot.find(name).is_some(), "missing {name}");
        }

        let service = snapshot.find("shop::service::OrderService").unwrap();
        assert_eq!(service.kind, UnitKind::Struct);
        assert_eq!(service.namespace.to_string(), "shop::service");
        assert_eq!(service.line, Some(4));
        assert!(!service.is_test);
    }

    #[test]
    fn test_reference_kinds() {
        let temp_dir = shop_crate();
        let snapshot = scan(temp_dir.path(), &ScanOptions::default()).snapshot;

        assert!(has_ref(
            &snapshot,
            "shop::service",
            "shop::web::controller::OrderController",
            ReferenceKind::Import
        ));
        assert!(has_ref(
            &snapshot,
            "shop::service::OrderService",
            "shop::repository::OrderRepository",
            ReferenceKind::Field
        ));
        assert!(has_ref(
            &snapshot,
            "shop::service::OrderService",
            "shop::web::controller::OrderController",
            ReferenceKind::ReturnType
        ));
        assert!(has_ref(&snapshot, "shop::service::helper", "shop::web::Session", ReferenceKind::ReturnType));
        assert!(has_ref(&snapshot, "shop::service::helper", "shop::web::Session", ReferenceKind::Usage));
        assert!(has_ref(
            &snapshot,
            "shop::web::controller::OrderController",
            "shop::service::OrderService",
            ReferenceKind::Parameter
        ));

        let render = snapshot
            .find("shop::service::OrderService")
            .and_then(|unit| {
                unit.references
                    .iter()
                    .find(|r| r.kind == ReferenceKind::ReturnType)
                    .and_then(|r| r.line)
            });
        assert_eq!(render, Some(9));
    }

    #[test]
    fn test_test_code_is_marked() {
        let temp_dir = shop_crate();
        let snapshot = scan(temp_dir.path(), &ScanOptions::default()).snapshot;

        for name in [
            "shop::service::tests",
            "shop::service::tests::builds",
            "shop::repository::tests",
            "shop::repository::tests::session",
        ] {
            let unit = snapshot.find(name).unwrap_or_else(|| panic!("missing {name}"));
            assert!(unit.is_test, "{name} should be test code");
        }

        assert!(has_ref(
            &snapshot,
            "shop::service::tests::builds",
            "shop::web::Session",
            ReferenceKind::Usage
        ));
    }

    #[test]
    fn test_inline_modules_aliases_and_macros() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "lib.rs",
            r#"pub mod web {
    pub struct Page;
    pub trait Render {}
}

pub mod service {
    use super::web::{self, Render};

    pub struct Invoice;

    impl Render for Invoice {}

    pub fn log() {
        println!("{}", web::Page);
    }
}
"#,
        );

        let snapshot = scan(&temp_dir.path().join("lib.rs"), &ScanOptions::default()).snapshot;

        assert!(has_ref(&snapshot, "shop::service::Invoice", "shop::web::Render", ReferenceKind::Supertype));
        assert!(has_ref(&snapshot, "shop::service::log", "shop::web::Page", ReferenceKind::Usage));
        assert!(has_ref(&snapshot, "shop::service", "shop::web", ReferenceKind::Import));
        assert!(has_ref(&snapshot, "shop::service", "shop::web::Render", ReferenceKind::Import));
    }

    #[test]
    fn test_foreign_impl_owned_by_module() {
        let temp_dir = TempDir::new().unwrap();
        write(
            temp_dir.path(),
            "lib.rs",
            r#"pub mod web {
    pub struct Form;
}

pub mod service {
    impl crate::web::Form {
        pub fn validate(&self) -> bool {
            true
        }
    }
}
"#,
        );

        let snapshot = scan(&temp_dir.path().join("lib.rs"), &ScanOptions::default()).snapshot;
        assert!(has_ref(&snapshot, "shop::service", "shop::web::Form", ReferenceKind::Usage));
    }

    #[test]
    fn test_excluded_module_still_resolves_to_ancestor() {
        let temp_dir = shop_crate();
        let scanner = RustSourceScanner::new(
            PathFilter::new(vec!["src/web/controller.rs".to_string()], None).unwrap(),
        );
        let snapshot = scanner
            .build_snapshot(temp_dir.path(), "shop", &ScanOptions::default())
            .unwrap()
            .snapshot;

        assert!(snapshot.find("shop::web::controller::OrderController").is_none());
        // Declared in web/mod.rs, so the module unit still exists
        assert!(has_ref(
            &snapshot,
            "shop::service::OrderService",
            "shop::web::controller",
            ReferenceKind::ReturnType
        ));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let temp_dir = shop_crate();
        let parallel = scan(temp_dir.path(), &ScanOptions::default()).snapshot;
        let sequential =
            scan(temp_dir.path(), &ScanOptions { parallel: false, ..Default::default() }).snapshot;

        assert_eq!(parallel, sequential);
        assert_eq!(parallel.fingerprint(), sequential.fingerprint());
    }

    #[test]
    fn test_unparseable_file() {
        let temp_dir = shop_crate();
        write(temp_dir.path(), "src/broken.rs", "pub fn broken( {\n");

        let outcome = scan(temp_dir.path(), &ScanOptions::default());
        assert!(matches!(outcome.warnings.as_slice(), [CheckWarning::UnparsedFile { .. }]));
        assert!(outcome.snapshot.find("shop::service::OrderService").is_some());

        let scanner = RustSourceScanner::new(PathFilter::with_defaults().unwrap());
        let options = ScanOptions { fail_fast: true, ..Default::default() };
        let result = scanner.build_snapshot(temp_dir.path(), "shop", &options);
        assert!(matches!(result, Err(LayerError::Parse { .. })));
    }
}
