//! The textual GIR reader.
//!
//! Parses the format emitted by [`crate::print`] back into a [`Module`],
//! reconstructing everything through the [`Builder`] so a parsed module
//! satisfies the same invariants as a built one.
//!
//! The reader runs in three phases so forward references resolve with
//! their final types:
//!
//! 1. **Declare**: split the input into top-level items (`data`, `record`,
//!    `@function`) and declare every name. A second item with the same
//!    name is a [`GirError::RedefinitionError`].
//! 2. **Headers**: define data constructors and record fields, then parse
//!    every function's block headers, creating continuations and
//!    parameters. A parameter type may reference parameters of earlier
//!    blocks, not later primop results.
//! 3. **Bodies**: parse instructions. `function_ref` targets and `apply`
//!    callees now carry their final function types.
//!
//! Policy: an error inside one item is recorded and the reader skips to
//! the next declaration boundary; all diagnostics are returned together.

use std::collections::HashMap;

use tracing::debug;

use crate::builder::Builder;
use crate::error::GirError;
use crate::id::ValueId;
use crate::module::Module;
use crate::primop::{AllocKind, LoadOwnership, Opcode};
use crate::value::Ownership;

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    /// `%k`
    Ssa(usize),
    /// `@name`
    Global(String),
    Int(u64),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Semi,
    Comma,
    Dot,
    Eq,
    Star,
    Arrow,
    Bottom,
}

#[derive(Debug, Clone)]
struct Lexed {
    tok: Tok,
    line: u32,
}

fn lex(text: &str) -> Result<Vec<Lexed>, GirError> {
    let mut out = Vec::new();
    let mut line: u32 = 1;
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '-' => {
                chars.next();
                match chars.peek() {
                    Some('-') => {
                        // Comment to end of line.
                        for c in chars.by_ref() {
                            if c == '\n' {
                                line += 1;
                                break;
                            }
                        }
                    }
                    Some('>') => {
                        chars.next();
                        out.push(Lexed { tok: Tok::Arrow, line });
                    }
                    _ => {
                        return Err(GirError::IllFormedInput {
                            line,
                            message: "stray '-'".into(),
                        })
                    }
                }
            }
            '⊥' => {
                chars.next();
                out.push(Lexed { tok: Tok::Bottom, line });
            }
            '→' => {
                chars.next();
                out.push(Lexed { tok: Tok::Arrow, line });
            }
            '%' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if digits.is_empty() {
                    return Err(GirError::IllFormedInput {
                        line,
                        message: "expected digits after '%'".into(),
                    });
                }
                out.push(Lexed { tok: Tok::Ssa(digits.parse().unwrap()), line });
            }
            '@' => {
                chars.next();
                let name = lex_ident(&mut chars);
                if name.is_empty() {
                    return Err(GirError::IllFormedInput {
                        line,
                        message: "expected name after '@'".into(),
                    });
                }
                out.push(Lexed { tok: Tok::Global(name), line });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Lexed { tok: Tok::Int(digits.parse().unwrap()), line });
            }
            c if c.is_alphabetic() || c == '_' => {
                let name = lex_ident(&mut chars);
                out.push(Lexed { tok: Tok::Ident(name), line });
            }
            _ => {
                chars.next();
                let tok = match c {
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    ':' => Tok::Colon,
                    ';' => Tok::Semi,
                    ',' => Tok::Comma,
                    '.' => Tok::Dot,
                    '=' => Tok::Eq,
                    '*' => Tok::Star,
                    other => {
                        return Err(GirError::IllFormedInput {
                            line,
                            message: format!("unexpected character '{}'", other),
                        })
                    }
                };
                out.push(Lexed { tok, line });
            }
        }
    }
    Ok(out)
}

fn lex_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }
    name
}

// ---------------------------------------------------------------------------
// Item splitting
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum ItemKind {
    Data,
    Record,
    Function,
}

#[derive(Debug)]
struct Item {
    kind: ItemKind,
    name: String,
    /// Token range of the braced body, excluding the braces.
    body: std::ops::Range<usize>,
    line: u32,
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct FunctionCtx {
    entry: ValueId,
    /// `bbN` index -> continuation.
    blocks: HashMap<usize, ValueId>,
    /// `%k` -> value.
    ssa: HashMap<usize, ValueId>,
}

/// Parses a textual GIR module. On failure returns every diagnostic
/// accumulated across items.
pub fn parse_module(text: &str) -> Result<Module, Vec<GirError>> {
    let tokens = lex(text).map_err(|e| vec![e])?;
    let mut reader = Reader { tokens, errors: Vec::new() };
    let module = reader.run();
    if reader.errors.is_empty() {
        Ok(module)
    } else {
        Err(reader.errors)
    }
}

struct Reader {
    tokens: Vec<Lexed>,
    errors: Vec<GirError>,
}

impl Reader {
    fn run(&mut self) -> Module {
        let mut pos = 0;
        let module_name = self.parse_module_header(&mut pos).unwrap_or_else(|e| {
            self.errors.push(e);
            "invalid".to_string()
        });
        let mut module = Module::new(&module_name);

        let items = match self.split_items(pos) {
            Ok(items) => items,
            Err(e) => {
                self.errors.push(e);
                return module;
            }
        };

        // Phase 1: declare every name.
        let mut functions: HashMap<String, FunctionCtx> = HashMap::new();
        for item in &items {
            let result = match item.kind {
                ItemKind::Data => {
                    if module.named_type(&item.name).is_some() {
                        Err(GirError::RedefinitionError { name: item.name.clone() })
                    } else {
                        module.declare_data(&item.name);
                        Ok(())
                    }
                }
                ItemKind::Record => {
                    if module.named_type(&item.name).is_some() {
                        Err(GirError::RedefinitionError { name: item.name.clone() })
                    } else {
                        module.declare_record(&item.name);
                        Ok(())
                    }
                }
                ItemKind::Function => {
                    if functions.contains_key(&item.name) {
                        Err(GirError::RedefinitionError { name: item.name.clone() })
                    } else {
                        let entry = module.new_continuation(&item.name, true);
                        functions.insert(
                            item.name.clone(),
                            FunctionCtx { entry, blocks: HashMap::new(), ssa: HashMap::new() },
                        );
                        Ok(())
                    }
                }
            };
            if let Err(e) = result {
                self.errors.push(e);
            }
        }

        // Phase 2: nominal type bodies, then block headers.
        for item in &items {
            let result = match item.kind {
                ItemKind::Data => self.parse_data_body(&mut module, item),
                ItemKind::Record => self.parse_record_body(&mut module, item),
                ItemKind::Function => {
                    let ctx = functions.get_mut(&item.name).expect("declared in phase 1");
                    self.parse_block_headers(&mut module, item, ctx)
                }
            };
            if let Err(e) = result {
                self.errors.push(e);
            }
        }

        // Phase 3: function bodies.
        let globals = functions_view(&functions);
        for item in &items {
            if let ItemKind::Function = item.kind {
                let ctx = functions.get_mut(&item.name).expect("declared in phase 1");
                if let Err(e) = self.parse_block_bodies(&mut module, item, ctx, &globals) {
                    self.errors.push(e);
                }
            }
        }

        debug!(module = %module.name, items = items.len(), errors = self.errors.len(), "parsed module");
        module
    }

    fn parse_module_header(&self, pos: &mut usize) -> Result<String, GirError> {
        self.expect_ident(pos, "module")?;
        let name = match self.tokens.get(*pos) {
            Some(Lexed { tok: Tok::Ident(n), .. }) => n.clone(),
            other => return Err(self.unexpected(other, "module name")),
        };
        *pos += 1;
        self.expect_ident(pos, "where")?;
        Ok(name)
    }

    /// Splits the token stream after the header into top-level items.
    fn split_items(&self, mut pos: usize) -> Result<Vec<Item>, GirError> {
        let mut items = Vec::new();
        while pos < self.tokens.len() {
            let lexed = &self.tokens[pos];
            let (kind, name) = match &lexed.tok {
                Tok::Ident(kw) if kw == "data" => {
                    let name = match self.tokens.get(pos + 1) {
                        Some(Lexed { tok: Tok::Ident(n), .. }) => n.clone(),
                        other => return Err(self.unexpected(other, "data type name")),
                    };
                    pos += 2;
                    (ItemKind::Data, name)
                }
                Tok::Ident(kw) if kw == "record" => {
                    let name = match self.tokens.get(pos + 1) {
                        Some(Lexed { tok: Tok::Ident(n), .. }) => n.clone(),
                        other => return Err(self.unexpected(other, "record type name")),
                    };
                    pos += 2;
                    (ItemKind::Record, name)
                }
                Tok::Global(name) => {
                    let name = name.clone();
                    pos += 1;
                    // Skim the declared type up to the body; it is
                    // re-derived from the entry block's parameters.
                    while pos < self.tokens.len() && self.tokens[pos].tok != Tok::LBrace {
                        pos += 1;
                    }
                    (ItemKind::Function, name)
                }
                _ => {
                    return Err(GirError::IllFormedInput {
                        line: lexed.line,
                        message: "expected 'data', 'record', or a function definition".into(),
                    })
                }
            };

            let line = lexed.line;
            if self.tokens.get(pos).map(|l| &l.tok) != Some(&Tok::LBrace) {
                return Err(GirError::IllFormedInput {
                    line,
                    message: format!("missing '{{' in definition of '{}'", name),
                });
            }
            pos += 1;
            let start = pos;
            while pos < self.tokens.len() && self.tokens[pos].tok != Tok::RBrace {
                pos += 1;
            }
            if pos == self.tokens.len() {
                return Err(GirError::IllFormedInput {
                    line,
                    message: format!("unterminated definition of '{}'", name),
                });
            }
            items.push(Item { kind, name, body: start..pos, line });
            pos += 1; // consume '}'
        }
        Ok(items)
    }

    // -- Phase 2: type bodies ------------------------------------------------

    fn parse_data_body(&mut self, module: &mut Module, item: &Item) -> Result<(), GirError> {
        let mut pos = item.body.start;
        let end = item.body.end;
        let mut ctors: Vec<(String, Option<ValueId>)> = Vec::new();

        while pos < end {
            let name = match &self.tokens[pos].tok {
                Tok::Ident(n) => n.clone(),
                _ => return Err(self.unexpected(self.tokens.get(pos), "constructor name")),
            };
            pos += 1;
            let payload = if pos < end && self.tokens[pos].tok != Tok::Semi {
                Some(self.parse_type(module, &mut pos, end, None)?)
            } else {
                None
            };
            ctors.push((name, payload));
            if pos < end {
                if self.tokens[pos].tok != Tok::Semi {
                    return Err(self.unexpected(self.tokens.get(pos), "';'"));
                }
                pos += 1;
            }
        }
        module.define_data(&item.name, ctors).map(|_| ())
    }

    fn parse_record_body(&mut self, module: &mut Module, item: &Item) -> Result<(), GirError> {
        let mut pos = item.body.start;
        let end = item.body.end;
        let mut fields: Vec<(String, ValueId)> = Vec::new();

        while pos < end {
            let name = match &self.tokens[pos].tok {
                Tok::Ident(n) => n.clone(),
                _ => return Err(self.unexpected(self.tokens.get(pos), "field name")),
            };
            pos += 1;
            self.expect_tok(&mut pos, Tok::Colon)?;
            let ty = self.parse_type(module, &mut pos, end, None)?;
            fields.push((name, ty));
            if pos < end {
                if self.tokens[pos].tok != Tok::Semi {
                    return Err(self.unexpected(self.tokens.get(pos), "';'"));
                }
                pos += 1;
            }
        }
        module.define_record(&item.name, fields).map(|_| ())
    }

    // -- Phase 2: block headers ----------------------------------------------

    /// `true` when the token at `pos` starts a block header (`bbN(`).
    fn at_block_header(&self, pos: usize, end: usize) -> Option<usize> {
        if pos >= end {
            return None;
        }
        let Tok::Ident(name) = &self.tokens[pos].tok else { return None };
        let index = name.strip_prefix("bb")?.parse::<usize>().ok()?;
        if self.tokens.get(pos + 1).map(|l| &l.tok) == Some(&Tok::LParen) {
            Some(index)
        } else {
            None
        }
    }

    fn parse_block_headers(
        &mut self,
        module: &mut Module,
        item: &Item,
        ctx: &mut FunctionCtx,
    ) -> Result<(), GirError> {
        let end = item.body.end;

        // Create every block continuation first so labels resolve.
        let mut pos = item.body.start;
        while pos < end {
            if let Some(index) = self.at_block_header(pos, end) {
                let cont = if index == 0 {
                    ctx.entry
                } else {
                    module.new_continuation(&format!("bb{}", index), false)
                };
                if ctx.blocks.insert(index, cont).is_some() {
                    return Err(GirError::RedefinitionError {
                        name: format!("{}.bb{}", item.name, index),
                    });
                }
            }
            pos += 1;
        }
        if !ctx.blocks.contains_key(&0) {
            return Err(GirError::IllFormedInput {
                line: item.line,
                message: format!("function '{}' has no bb0", item.name),
            });
        }

        // Now parse the headers in order, adding parameters.
        let mut pos = item.body.start;
        while pos < end {
            let Some(index) = self.at_block_header(pos, end) else {
                pos += 1;
                continue;
            };
            let cont = ctx.blocks[&index];
            pos += 2; // label and '('
            while pos < self.tokens.len() && self.tokens[pos].tok != Tok::RParen {
                let k = match &self.tokens[pos].tok {
                    Tok::Ssa(k) => *k,
                    _ => return Err(self.unexpected(self.tokens.get(pos), "parameter id")),
                };
                pos += 1;
                self.expect_tok(&mut pos, Tok::Colon)?;
                let ty = self.parse_type(module, &mut pos, end, Some(&ctx.ssa))?;
                let param = Builder::new(module)
                    .parameter(cont, &format!("p{}", k), ty, Ownership::Owned)
                    .map_err(|e| self.at_line(item.line, e))?;
                ctx.ssa.insert(k, param);
                if self.tokens.get(pos).map(|l| &l.tok) == Some(&Tok::Semi) {
                    pos += 1;
                }
            }
            pos += 1; // ')'
            self.expect_tok(&mut pos, Tok::Colon)?;
        }
        Ok(())
    }

    // -- Phase 3: instruction bodies -----------------------------------------

    fn parse_block_bodies(
        &mut self,
        module: &mut Module,
        item: &Item,
        ctx: &mut FunctionCtx,
        globals: &HashMap<String, ValueId>,
    ) -> Result<(), GirError> {
        let end = item.body.end;
        let mut pos = item.body.start;
        let mut current: Option<ValueId> = None;

        while pos < end {
            if let Some(index) = self.at_block_header(pos, end) {
                current = Some(ctx.blocks[&index]);
                // Skip over the already-parsed header.
                while pos < self.tokens.len() && self.tokens[pos].tok != Tok::RParen {
                    pos += 1;
                }
                pos += 2; // ')' and ':'
                continue;
            }
            let cont = current.ok_or_else(|| GirError::IllFormedInput {
                line: self.tokens[pos].line,
                message: "instruction outside of a block".into(),
            })?;
            self.parse_instruction(module, ctx, globals, cont, &mut pos, end)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_instruction(
        &mut self,
        module: &mut Module,
        ctx: &mut FunctionCtx,
        globals: &HashMap<String, ValueId>,
        cont: ValueId,
        pos: &mut usize,
        end: usize,
    ) -> Result<(), GirError> {
        let line = self.tokens[*pos].line;

        // Optional result binding.
        let result = match &self.tokens[*pos].tok {
            Tok::Ssa(k) => {
                let k = *k;
                *pos += 1;
                self.expect_tok(pos, Tok::Eq)?;
                Some(k)
            }
            _ => None,
        };

        let mnemonic = match &self.tokens[*pos].tok {
            Tok::Ident(m) => m.clone(),
            _ => return Err(self.unexpected(self.tokens.get(*pos), "an instruction")),
        };
        *pos += 1;

        let value = self
            .parse_instruction_body(module, ctx, globals, cont, &mnemonic, pos, end)
            .map_err(|e| self.at_line(line, e))?;

        match (result, value) {
            (Some(k), Some(v)) => {
                ctx.ssa.insert(k, v);
                Ok(())
            }
            (None, _) => Ok(()),
            (Some(_), None) => Err(GirError::IllFormedInput {
                line,
                message: format!("'{}' produces no result to bind", mnemonic),
            }),
        }
    }

    /// Parses one instruction body; returns the result value when the
    /// opcode produces one. `item` scoping has already routed us here.
    #[allow(clippy::too_many_arguments)]
    fn parse_instruction_body(
        &mut self,
        module: &mut Module,
        ctx: &mut FunctionCtx,
        globals: &HashMap<String, ValueId>,
        cont: ValueId,
        mnemonic: &str,
        pos: &mut usize,
        end: usize,
    ) -> Result<Option<ValueId>, GirError> {
        match mnemonic {
            "apply" => {
                let callee = self.parse_operand(ctx, globals, pos)?;
                self.expect_tok(pos, Tok::LParen)?;
                let mut args = Vec::new();
                while *pos < self.tokens.len() && self.tokens[*pos].tok != Tok::RParen {
                    args.push(self.parse_operand(ctx, globals, pos)?);
                    if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Comma) {
                        *pos += 1;
                    }
                }
                *pos += 1;
                Builder::new(module).apply(cont, callee, &args)?;
                Ok(None)
            }
            "switch_constr" => {
                let scrutinee = self.parse_operand(ctx, globals, pos)?;
                self.expect_tok(pos, Tok::LBracket)?;
                let mut cases = Vec::new();
                while *pos < self.tokens.len() && self.tokens[*pos].tok != Tok::RBracket {
                    let name = match &self.tokens[*pos].tok {
                        Tok::Ident(n) => n.clone(),
                        _ => return Err(self.unexpected(self.tokens.get(*pos), "constructor name")),
                    };
                    *pos += 1;
                    self.expect_tok(pos, Tok::Colon)?;
                    let dest = self.parse_operand(ctx, globals, pos)?;
                    cases.push((name, dest));
                    if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Comma) {
                        *pos += 1;
                    }
                }
                *pos += 1;
                let default = if matches!(&self.tokens.get(*pos), Some(Lexed { tok: Tok::Ident(kw), .. }) if kw == "default")
                {
                    *pos += 1;
                    Some(self.parse_operand(ctx, globals, pos)?)
                } else {
                    None
                };
                Builder::new(module).switch_constr(cont, scrutinee, &cases, default)?;
                Ok(None)
            }
            "unreachable" => {
                Builder::new(module).unreachable(cont)?;
                Ok(None)
            }
            "function_ref" => {
                let dest = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).function_ref(dest)?))
            }
            "data_init" => {
                let ty = self.parse_type(module, pos, end, Some(&ctx.ssa))?;
                self.expect_tok(pos, Tok::Dot)?;
                let ctor = match &self.tokens[*pos].tok {
                    Tok::Ident(n) => n.clone(),
                    _ => return Err(self.unexpected(self.tokens.get(*pos), "constructor name")),
                };
                *pos += 1;
                let payload = if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::LParen) {
                    *pos += 1;
                    let payload = self.parse_operand(ctx, globals, pos)?;
                    self.expect_tok(pos, Tok::RParen)?;
                    Some(payload)
                } else {
                    None
                };
                Ok(Some(Builder::new(module).data_init(ty, &ctor, payload)?))
            }
            "data_extract" => {
                let value = self.parse_operand(ctx, globals, pos)?;
                let ctor = match &self.tokens[*pos].tok {
                    Tok::Ident(n) => n.clone(),
                    _ => return Err(self.unexpected(self.tokens.get(*pos), "constructor name")),
                };
                *pos += 1;
                self.expect_tok(pos, Tok::Colon)?;
                let payload_ty = self.parse_type(module, pos, end, Some(&ctx.ssa))?;
                Ok(Some(Builder::new(module).data_extract(value, &ctor, payload_ty)?))
            }
            "tuple" => {
                self.expect_tok(pos, Tok::LParen)?;
                let mut elems = Vec::new();
                while *pos < self.tokens.len() && self.tokens[*pos].tok != Tok::RParen {
                    elems.push(self.parse_operand(ctx, globals, pos)?);
                    if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Comma) {
                        *pos += 1;
                    }
                }
                *pos += 1;
                Ok(Some(Builder::new(module).tuple(&elems)?))
            }
            "tuple_element_address" => {
                let addr = self.parse_operand(ctx, globals, pos)?;
                self.expect_tok(pos, Tok::Comma)?;
                let index = match &self.tokens[*pos].tok {
                    Tok::Int(i) => *i as u32,
                    _ => return Err(self.unexpected(self.tokens.get(*pos), "element index")),
                };
                *pos += 1;
                Ok(Some(Builder::new(module).tuple_element_address(addr, index)?))
            }
            "copy_value" => {
                let v = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).copy_value(v)?))
            }
            "destroy_value" | "destroy_address" | "dealloca" | "dealloc_box" => {
                // Destroy-family instructions in a block body are cleanups:
                // they have no results, so nothing else could schedule them.
                let v = self.parse_operand(ctx, globals, pos)?;
                let opcode = match mnemonic {
                    "destroy_value" => Opcode::DestroyValue,
                    "destroy_address" => Opcode::DestroyAddress,
                    "dealloca" => Opcode::Dealloca,
                    _ => Opcode::DeallocBox,
                };
                Builder::new(module).insert_cleanup(cont, opcode, v)?;
                Ok(None)
            }
            "load" => {
                let mode = match &self.tokens[*pos].tok {
                    Tok::Ident(m) if m == "copy" => LoadOwnership::Copy,
                    Tok::Ident(m) if m == "take" => LoadOwnership::Take,
                    _ => return Err(self.unexpected(self.tokens.get(*pos), "'copy' or 'take'")),
                };
                *pos += 1;
                let addr = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).load(addr, mode)?))
            }
            "store" => {
                let value = self.parse_operand(ctx, globals, pos)?;
                self.expect_ident(pos, "to")?;
                let addr = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).store(value, addr)?))
            }
            "alloca" => {
                let kind = if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::LBracket) {
                    *pos += 1;
                    let kind = match &self.tokens[*pos].tok {
                        Tok::Ident(k) if k == "heap" => AllocKind::Heap,
                        Tok::Ident(k) if k == "box" => AllocKind::Box,
                        _ => return Err(self.unexpected(self.tokens.get(*pos), "'heap' or 'box'")),
                    };
                    *pos += 1;
                    self.expect_tok(pos, Tok::RBracket)?;
                    kind
                } else {
                    AllocKind::Stack
                };
                let ty = self.parse_type(module, pos, end, Some(&ctx.ssa))?;
                Ok(Some(Builder::new(module).alloca(ty, kind)?))
            }
            "alloc_box" => {
                let ty = self.parse_type(module, pos, end, Some(&ctx.ssa))?;
                Ok(Some(Builder::new(module).alloc_box(ty)?))
            }
            "project_box" => {
                let v = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).project_box(v)?))
            }
            "copy_address" => {
                let src = self.parse_operand(ctx, globals, pos)?;
                self.expect_ident(pos, "to")?;
                let dst = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).copy_address(src, dst)?))
            }
            "thicken" => {
                let v = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).thicken(v)?))
            }
            "force_effects" => {
                let v = self.parse_operand(ctx, globals, pos)?;
                Ok(Some(Builder::new(module).force_effects(v)?))
            }
            other => Err(GirError::IllFormedInput {
                line: self.tokens[*pos - 1].line,
                message: format!("unknown instruction '{}'", other),
            }),
        }
    }

    /// Parses an operand: `%k`, `bbN`, or `@name`.
    fn parse_operand(
        &self,
        ctx: &FunctionCtx,
        globals: &HashMap<String, ValueId>,
        pos: &mut usize,
    ) -> Result<ValueId, GirError> {
        let lexed = self.tokens.get(*pos);
        let value = match lexed.map(|l| &l.tok) {
            Some(Tok::Ssa(k)) => ctx.ssa.get(k).copied().ok_or_else(|| GirError::IllFormedInput {
                line: lexed.unwrap().line,
                message: format!("%{} is not defined here", k),
            })?,
            Some(Tok::Ident(name)) if name.starts_with("bb") => {
                let index: usize =
                    name[2..].parse().map_err(|_| self.unexpected(lexed, "a block label"))?;
                ctx.blocks.get(&index).copied().ok_or_else(|| GirError::IllFormedInput {
                    line: lexed.unwrap().line,
                    message: format!("no block bb{}", index),
                })?
            }
            Some(Tok::Global(name)) => {
                globals.get(name).copied().ok_or_else(|| GirError::IllFormedInput {
                    line: lexed.unwrap().line,
                    message: format!("no function @{}", name),
                })?
            }
            _ => return Err(self.unexpected(lexed, "an operand")),
        };
        *pos += 1;
        Ok(value)
    }

    /// Parses a type. `ssa` carries the enclosing function's value
    /// numbering for dependent positions.
    fn parse_type(
        &self,
        module: &mut Module,
        pos: &mut usize,
        end: usize,
        ssa: Option<&HashMap<usize, ValueId>>,
    ) -> Result<ValueId, GirError> {
        if *pos >= end {
            return Err(GirError::IllFormedInput {
                line: self.tokens.last().map(|l| l.line).unwrap_or(0),
                message: "expected a type".into(),
            });
        }
        let lexed = self.tokens[*pos].clone();
        match &lexed.tok {
            Tok::Star => {
                *pos += 1;
                let pointee = self.parse_type(module, pos, end, ssa)?;
                Ok(module.address_type(pointee))
            }
            Tok::Bottom => {
                *pos += 1;
                Ok(module.bottom_type())
            }
            Tok::Ssa(k) => {
                *pos += 1;
                ssa.and_then(|map| map.get(k).copied()).ok_or_else(|| GirError::IllFormedInput {
                    line: lexed.line,
                    message: format!("%{} is not defined in this type position", k),
                })
            }
            Tok::Ident(name) => {
                *pos += 1;
                let base = match name.as_str() {
                    "Type" => return Ok(module.type_type()),
                    "TypeMetadata" => return Ok(module.type_metadata_type()),
                    _ => match module.named_type(name) {
                        Some(ty) => ty,
                        None => module.archetype(name),
                    },
                };
                if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::LParen) {
                    *pos += 1;
                    let mut args = Vec::new();
                    while *pos < self.tokens.len() && self.tokens[*pos].tok != Tok::RParen {
                        args.push(self.parse_type(module, pos, end, ssa)?);
                        if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Comma) {
                            *pos += 1;
                        }
                    }
                    *pos += 1;
                    Ok(module.substituted(base, args))
                } else {
                    Ok(base)
                }
            }
            Tok::LParen => {
                *pos += 1;
                if matches!(&self.tokens.get(*pos), Some(Lexed { tok: Tok::Ident(kw), .. }) if kw == "box")
                {
                    *pos += 1;
                    let inner = self.parse_type(module, pos, end, ssa)?;
                    self.expect_tok(pos, Tok::RParen)?;
                    return Ok(module.box_type(inner));
                }
                let mut elems = Vec::new();
                while *pos < self.tokens.len() && self.tokens[*pos].tok != Tok::RParen {
                    elems.push(self.parse_type(module, pos, end, ssa)?);
                    if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Comma) {
                        *pos += 1;
                    }
                }
                *pos += 1;
                if self.tokens.get(*pos).map(|l| &l.tok) == Some(&Tok::Arrow) {
                    *pos += 1;
                    self.expect_tok(pos, Tok::Bottom)?;
                    Ok(module.function_type(elems))
                } else {
                    Ok(module.tuple_type(elems))
                }
            }
            _ => Err(self.unexpected(Some(&lexed), "a type")),
        }
    }

    // -- Small helpers -------------------------------------------------------

    fn expect_ident(&self, pos: &mut usize, word: &str) -> Result<(), GirError> {
        match self.tokens.get(*pos) {
            Some(Lexed { tok: Tok::Ident(w), .. }) if w == word => {
                *pos += 1;
                Ok(())
            }
            other => Err(self.unexpected(other, &format!("'{}'", word))),
        }
    }

    fn expect_tok(&self, pos: &mut usize, want: Tok) -> Result<(), GirError> {
        match self.tokens.get(*pos) {
            Some(lexed) if lexed.tok == want => {
                *pos += 1;
                Ok(())
            }
            other => Err(self.unexpected(other, &format!("{:?}", want))),
        }
    }

    fn unexpected(&self, got: Option<&Lexed>, wanted: &str) -> GirError {
        match got {
            Some(lexed) => GirError::IllFormedInput {
                line: lexed.line,
                message: format!("expected {}, found {:?}", wanted, lexed.tok),
            },
            None => GirError::IllFormedInput {
                line: self.tokens.last().map(|l| l.line).unwrap_or(0),
                message: format!("expected {}, found end of input", wanted),
            },
        }
    }

    fn at_line(&self, line: u32, err: GirError) -> GirError {
        match err {
            GirError::IllTypedConstruction { reason } => {
                GirError::IllFormedInput { line, message: reason }
            }
            other => other,
        }
    }
}

fn functions_view(functions: &HashMap<String, FunctionCtx>) -> HashMap<String, ValueId> {
    functions.iter().map(|(name, ctx)| (name.clone(), ctx.entry)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::print_module;
    use crate::verify::verify;

    const IDENTITY: &str = "\
module m where

@id : (Type, %0, (%0) -> ⊥) -> ⊥ {
bb0(%0 : Type; %1 : %0; %2 : (%0) -> ⊥):
  %3 = copy_value %1
  destroy_value %1
  apply %2(%3)
}
";

    #[test]
    fn identity_roundtrip_is_stable() {
        let module = parse_module(IDENTITY).unwrap();
        assert!(verify(&module).is_ok());
        let printed = print_module(&module).unwrap();
        assert_eq!(printed, IDENTITY);
        // A second trip through the reader stays fixed.
        let again = print_module(&parse_module(&printed).unwrap()).unwrap();
        assert_eq!(again, printed);
    }

    #[test]
    fn nat_switch_roundtrip() {
        let text = "\
module arith where

data Nat { zero; succ Nat }

@pred : (Nat, (Nat) -> ⊥) -> ⊥ {
bb0(%0 : Nat; %1 : (Nat) -> ⊥):
  %2 = function_ref bb1
  %3 = function_ref bb2
  switch_constr %0 [zero: %2, succ: %3]
bb1():
  %4 = data_init Nat.zero
  apply %1(%4)
bb2():
  %5 = data_extract %0 succ : Nat
  apply %1(%5)
}
";
        let module = parse_module(text).unwrap();
        assert!(verify(&module).is_ok());
        let printed = print_module(&module).unwrap();
        let again = print_module(&parse_module(&printed).unwrap()).unwrap();
        assert_eq!(printed, again);
    }

    #[test]
    fn comments_are_trivia() {
        let text = "\
module m where
-- the simplest possible function
@f : () -> ⊥ {
bb0():
  unreachable -- never returns
}
";
        let module = parse_module(text).unwrap();
        assert!(verify(&module).is_ok());
    }

    #[test]
    fn duplicate_function_is_a_redefinition() {
        let text = "\
module m where
@f : () -> ⊥ {
bb0():
  unreachable
}
@f : () -> ⊥ {
bb0():
  unreachable
}
";
        let errors = parse_module(text).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, GirError::RedefinitionError { .. })));
    }

    #[test]
    fn unknown_instruction_reports_line() {
        let text = "\
module m where
@f : () -> ⊥ {
bb0():
  frobnicate %0
}
";
        let errors = parse_module(text).unwrap_err();
        match &errors[0] {
            GirError::IllFormedInput { line, message } => {
                assert_eq!(*line, 4);
                assert!(message.contains("frobnicate"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_recovery_continues_to_the_next_item() {
        let text = "\
module m where
@broken : () -> ⊥ {
bb0():
  frobnicate %0
}
@good : () -> ⊥ {
bb0():
  unreachable
}
";
        let errors = parse_module(text).unwrap_err();
        // The broken item is diagnosed; the good one parsed on its own.
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn memory_instructions_roundtrip() {
        let text = "\
module mem where

data Nat { zero; succ Nat }

@f : (((Nat, Nat)) -> ⊥) -> ⊥ {
bb0(%0 : ((Nat, Nat)) -> ⊥):
  %1 = data_init Nat.zero
  %2 = tuple(%1, %1)
  %3 = alloca (Nat, Nat)
  %4 = store %2 to %3
  %5 = load take %4
  dealloca %3
  apply %0(%5)
}
";
        let module = parse_module(text).unwrap();
        assert!(verify(&module).is_ok());
        let printed = print_module(&module).unwrap();
        assert_eq!(printed, text);
    }
}
