//! AST Index — Tree-sitter-based Rust symbol extraction.
//!
//! Parses Rust source files with tree-sitter-rust to extract structured
//! symbol information: function signatures, struct/enum/trait definitions,
//! impl blocks, and their byte/line ranges.
//!
//! Used by the ContextPacker to build smarter initial context that includes
//! complete signatures and type definitions instead of raw first-N-lines.

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

/// A symbol extracted from a Rust source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RustSymbol {
    /// Symbol name (e.g., "VerifierConfig", "run_pipeline")
    pub name: String,
    /// Symbol kind
    pub kind: SymbolKind,
    /// Whether the symbol has `pub` visibility
    pub is_public: bool,
    /// Starting line (0-indexed)
    pub start_line: usize,
    /// Ending line (0-indexed)
    pub end_line: usize,
    /// The signature or header text (first line of the symbol, for display)
    pub signature: String,
}

/// Categories of Rust symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Struct,
    Enum,
    Trait,
    Impl,
    TypeAlias,
    Const,
    Static,
    Mod,
    Macro,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function => write!(f, "fn"),
            Self::Struct => write!(f, "struct"),
            Self::Enum => write!(f, "enum"),
            Self::Trait => write!(f, "trait"),
            Self::Impl => write!(f, "impl"),
            Self::TypeAlias => write!(f, "type"),
            Self::Const => write!(f, "const"),
            Self::Static => write!(f, "static"),
            Self::Mod => write!(f, "mod"),
            Self::Macro => write!(f, "macro"),
        }
    }
}

/// Index of all symbols in a single Rust source file.
#[derive(Debug, Clone, Default)]
pub struct FileSymbolIndex {
    /// Source file path (relative)
    pub file: String,
    /// All extracted symbols
    pub symbols: Vec<RustSymbol>,
}

impl FileSymbolIndex {
    /// Parse a Rust source file and extract all top-level symbols.
    pub fn from_source(file: &str, source: &str) -> Self {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .expect("tree-sitter-rust language");

        let tree = match parser.parse(source, None) {
            Some(t) => t,
            None => {
                return Self {
                    file: file.to_string(),
                    symbols: Vec::new(),
                }
            }
        };

        let root = tree.root_node();
        let source_bytes = source.as_bytes();
        let mut symbols = Vec::new();

        Self::walk_node(root, source_bytes, &mut symbols);

        Self {
            file: file.to_string(),
            symbols,
        }
    }

    /// Recursively walk the AST to extract symbols.
    fn walk_node(node: Node, source: &[u8], symbols: &mut Vec<RustSymbol>) {
        let kind_str = node.kind();

        match kind_str {
            "function_item" => {
                if let Some(sym) = Self::extract_function(node, source) {
                    symbols.push(sym);
                }
            }
            "struct_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Struct) {
                    symbols.push(sym);
                }
            }
            "enum_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Enum) {
                    symbols.push(sym);
                }
            }
            "trait_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Trait) {
                    symbols.push(sym);
                }
            }
            "impl_item" => {
                if let Some(sym) = Self::extract_impl(node, source) {
                    symbols.push(sym);
                }
            }
            "type_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::TypeAlias) {
                    symbols.push(sym);
                }
            }
            "const_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Const) {
                    symbols.push(sym);
                }
            }
            "static_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Static) {
                    symbols.push(sym);
                }
            }
            "mod_item" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Mod) {
                    symbols.push(sym);
                }
            }
            "macro_definition" => {
                if let Some(sym) = Self::extract_named_item(node, source, SymbolKind::Macro) {
                    symbols.push(sym);
                }
            }
            _ => {}
        }

        // Walk children for top-level items
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            Self::walk_node(child, source, symbols);
        }
    }

    /// Extract a function symbol with its full signature.
    fn extract_function(node: Node, source: &[u8]) -> Option<RustSymbol> {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())?;

        let is_public = Self::is_public(node, source);
        let signature = Self::first_line(node, source);

        Some(RustSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            is_public,
            start_line: node.start_position().row,
            end_line: node.end_position().row,
            signature,
        })
    }

    /// Extract a named item (struct, enum, trait, type, const, static, mod, macro).
    fn extract_named_item(node: Node, source: &[u8], kind: SymbolKind) -> Option<RustSymbol> {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())?;

        let is_public = Self::is_public(node, source);
        let signature = Self::first_line(node, source);

        Some(RustSymbol {
            name: name.to_string(),
            kind,
            is_public,
            start_line: node.start_position().row,
            end_line: node.end_position().row,
            signature,
        })
    }

    /// Extract an impl block (e.g., `impl Foo for Bar`).
    fn extract_impl(node: Node, source: &[u8]) -> Option<RustSymbol> {
        let text = node.utf8_text(source).ok()?;
        // Extract the impl target: "impl<T> Foo for Bar { ... }" → "Foo for Bar"
        // Use the first line as the signature
        let signature = Self::first_line(node, source);

        // Extract a reasonable name from the impl header
        let name = text
            .lines()
            .next()
            .unwrap_or("")
            .trim_end_matches('{')
            .trim()
            .to_string();

        Some(RustSymbol {
            name,
            kind: SymbolKind::Impl,
            is_public: false, // impl blocks don't have visibility
            start_line: node.start_position().row,
            end_line: node.end_position().row,
            signature,
        })
    }

    /// Check if a node has `pub` visibility by looking at preceding siblings.
    fn is_public(node: Node, source: &[u8]) -> bool {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == "visibility_modifier" {
                if let Ok(text) = child.utf8_text(source) {
                    return text.starts_with("pub");
                }
            }
        }
        false
    }

    /// Get the first line of a node's text as a signature.
    fn first_line(node: Node, source: &[u8]) -> String {
        node.utf8_text(source)
            .ok()
            .and_then(|text| text.lines().next())
            .unwrap_or("")
            .to_string()
    }

    /// Get all public symbols.
    pub fn public_symbols(&self) -> Vec<&RustSymbol> {
        self.symbols.iter().filter(|s| s.is_public).collect()
    }

    /// Get symbols of a specific kind.
    pub fn symbols_of_kind(&self, kind: SymbolKind) -> Vec<&RustSymbol> {
        self.symbols.iter().filter(|s| s.kind == kind).collect()
    }

    /// Get a symbol by name.
    pub fn find_by_name(&self, name: &str) -> Option<&RustSymbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Build a compact summary of the file's symbols for context packing.
    ///
    /// Returns a string like:
    /// ```text
    /// pub struct VerifierConfig { ... }  (lines 17-41)
    /// pub fn run_pipeline(&self) -> VerifierReport  (lines 130-209)
    /// impl Verifier { ... }  (lines 120-640)
    /// ```
    pub fn compact_summary(&self) -> String {
        let mut lines = Vec::new();

        // Sort by kind priority: structs/enums/traits first, then fns, then impls
        let mut sorted: Vec<&RustSymbol> = self.symbols.iter().collect();
        sorted.sort_by_key(|s| match s.kind {
            SymbolKind::Struct | SymbolKind::Enum | SymbolKind::Trait => 0,
            SymbolKind::TypeAlias | SymbolKind::Const | SymbolKind::Static => 1,
            SymbolKind::Function => 2,
            SymbolKind::Impl => 3,
            SymbolKind::Mod | SymbolKind::Macro => 4,
        });

        for sym in &sorted {
            if !sym.is_public && sym.kind != SymbolKind::Impl {
                continue; // Skip private items except impl blocks
            }
            let vis = if sym.is_public { "pub " } else { "" };
            lines.push(format!(
                "{}{} {}  (lines {}-{})",
                vis,
                sym.kind,
                sym.name,
                sym.start_line + 1,
                sym.end_line + 1,
            ));
        }

        lines.join("\n")
    }
}
