//! Recursive-descent parser.
//!
//! Statements are recognized line by line in content grammar; the parser
//! pushes the scanner into expression grammar inside braces, parentheses,
//! headers, and after `~`, and pops on the matching closer or end of line.
//! Braced blocks are disambiguated by speculation: an expression parse is
//! attempted first and the scanner is rewound when the block turns out to
//! be a sequence of content alternatives.
//!
//! Diagnostics are recorded rather than thrown; recovery advances to the
//! next newline and parsing continues with a best-effort tree.

use ink_core::SourceBuffer;

use crate::ast::{flags, Ast, AstNode, NodeId, NodeKind};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::scanner::{Grammar, Scanner};
use crate::token::{Token, TokenKind};

/// Maximum statement/expression recursion depth.
pub const PARSE_DEPTH_MAX: usize = 128;

/// Parse a source buffer into a syntax tree plus diagnostics.
pub fn parse(source: &SourceBuffer) -> Ast {
    let mut parser = Parser::new(source);

    parser.parse_file();
    parser.ast
}

struct Parser<'src> {
    scanner: Scanner<'src>,
    token: Token,
    ast: Ast,
    depth: usize,
    /// Nesting level of multiline braced bodies; content lines inside them
    /// stop at a closing brace instead of swallowing it as prose.
    brace_body: usize,
}

/// Saved lexer/diagnostic position for speculative parses.
#[derive(Clone, Copy)]
struct Snapshot {
    token: Token,
    error_count: usize,
}

impl<'src> Parser<'src> {
    fn new(source: &'src SourceBuffer) -> Parser<'src> {
        let mut scanner = Scanner::new(source);
        let mut ast = Ast::new(source.filename());
        let token = Self::lex_skipping_errors(&mut scanner, &mut ast.errors);

        Parser {
            scanner,
            token,
            ast,
            depth: 0,
            brace_body: 0,
        }
    }

    fn lex_skipping_errors(scanner: &mut Scanner<'src>, errors: &mut Vec<Diagnostic>) -> Token {
        loop {
            let token = scanner.next_token();

            if token.kind != TokenKind::Error {
                return token;
            }
            errors.push(Diagnostic::new(
                DiagnosticKind::InvalidToken,
                token.start,
                token.end,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) {
        self.token = Self::lex_skipping_errors(&mut self.scanner, &mut self.ast.errors);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.token.kind == kind
    }

    fn at_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.eat(kind) {
            return true;
        }

        self.error_here(DiagnosticKind::ExpectedToken(kind));
        false
    }

    fn error_here(&mut self, kind: DiagnosticKind) {
        self.ast
            .errors
            .push(Diagnostic::new(kind, self.token.start, self.token.end));
    }

    fn error_at(&mut self, kind: DiagnosticKind, start: usize, end: usize) {
        self.ast.errors.push(Diagnostic::new(kind, start, end));
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            token: self.token,
            error_count: self.ast.errors.len(),
        }
    }

    /// Rewind the scanner to a snapshot and re-lex its token under the
    /// current grammar mode.
    fn rewind(&mut self, snapshot: Snapshot) {
        self.ast.errors.truncate(snapshot.error_count);
        self.scanner.rewind(snapshot.token.start);
        self.advance();
    }

    fn skip_whitespace(&mut self) {
        while self.check(TokenKind::Whitespace) {
            self.advance();
        }
    }

    fn skip_blank(&mut self) {
        while matches!(self.token.kind, TokenKind::Newline | TokenKind::Whitespace) {
            self.advance();
        }
    }

    fn recover_to_newline(&mut self) {
        while !matches!(self.token.kind, TokenKind::Newline | TokenKind::Eof) {
            self.advance();
        }
        self.eat(TokenKind::Newline);
    }

    fn descend(&mut self) -> bool {
        if self.depth >= PARSE_DEPTH_MAX {
            self.error_here(DiagnosticKind::NestingTooDeep);
            return false;
        }

        self.depth += 1;
        true
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    // ------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------

    fn make(
        &mut self,
        kind: NodeKind,
        start: usize,
        end: usize,
        lhs: Option<NodeId>,
        rhs: Option<NodeId>,
        children: Vec<NodeId>,
    ) -> NodeId {
        self.ast.add(AstNode {
            kind,
            flags: 0,
            start,
            end,
            lhs,
            rhs,
            children,
        })
    }

    fn leaf(&mut self, kind: NodeKind, start: usize, end: usize) -> NodeId {
        self.make(kind, start, end, None, None, Vec::new())
    }

    fn invalid_here(&mut self) -> NodeId {
        let (start, end) = (self.token.start, self.token.end);
        self.leaf(NodeKind::Invalid, start, end)
    }

    fn node_end(&self, id: NodeId) -> usize {
        self.ast.node(id).end
    }

    // ------------------------------------------------------------------
    // File structure
    // ------------------------------------------------------------------

    fn parse_file(&mut self) {
        let mut children = Vec::new();
        let start = self.token.start;
        let root_stmts = self.parse_block(0);

        let root_end = root_stmts
            .last()
            .map(|&id| self.node_end(id))
            .unwrap_or(start);
        let root_block = self.make(NodeKind::Block, start, root_end, None, None, root_stmts);
        children.push(root_block);

        while !self.at_eof() {
            self.skip_blank();
            if self.at_eof() {
                break;
            }

            if self.check(TokenKind::Equal) {
                children.push(self.parse_declaration());
            } else {
                // Stray statement after declarations began; attach nothing
                // and resynchronize.
                self.error_here(DiagnosticKind::UnexpectedToken);
                self.recover_to_newline();
            }
        }

        let end = self.token.end;
        let root = self.make(NodeKind::File, 0, end, None, None, children);
        self.ast.root = Some(root);
    }

    /// Count the `=` run introducing a header. The tokens are consumed.
    fn consume_equal_run(&mut self) -> usize {
        let mut count = 0;

        while self.check(TokenKind::Equal) {
            count += 1;
            self.advance();
        }
        count
    }

    /// Parse a knot, function, or stitch declaration with its body and,
    /// for knots, any nested stitches.
    fn parse_declaration(&mut self) -> NodeId {
        let start = self.token.start;
        let rank = self.consume_equal_run();

        self.scanner.push_mode(Grammar::Expression, self.token.start);
        self.advance_in_place();

        let is_function = self.eat(TokenKind::KeywordFunction);
        let name = self.parse_identifier();
        let params = if self.check(TokenKind::LeftParen) {
            Some(self.parse_param_list())
        } else {
            None
        };

        // Trailing `=` decoration; in expression mode it lexes as either
        // Equal or DoubleEqual.
        while matches!(self.token.kind, TokenKind::Equal | TokenKind::EqualEqual) {
            self.advance();
        }

        self.scanner.pop_mode();
        self.eat_line_end();

        let proto_kind = if is_function {
            NodeKind::FuncProto
        } else if rank >= 2 {
            NodeKind::KnotProto
        } else {
            NodeKind::StitchProto
        };
        let proto_end = self.token.start;
        let proto = self.make(proto_kind, start, proto_end, Some(name), params, Vec::new());

        let body = self.parse_body_block();
        let mut children = vec![body];

        // Only knots own stitches; a function followed by a stitch header
        // is treated the same way for error tolerance.
        if rank >= 2 {
            loop {
                self.skip_blank();
                if !self.check(TokenKind::Equal) {
                    break;
                }

                let probe = self.snapshot();
                let nested_rank = self.consume_equal_run();

                if nested_rank >= 2 {
                    self.rewind(probe);
                    break;
                }

                self.rewind(probe);
                children.push(self.parse_declaration());
            }
        }

        let kind = if is_function {
            NodeKind::FuncDecl
        } else if rank >= 2 {
            NodeKind::KnotDecl
        } else {
            NodeKind::StitchDecl
        };
        let end = children
            .last()
            .map(|&id| self.node_end(id))
            .unwrap_or(proto_end);
        let decl = self.make(kind, start, end, Some(proto), None, children);

        if is_function {
            self.ast.node_mut(decl).flags |= flags::FUNCTION;
        }
        decl
    }

    /// Re-lex the current token after a mode change. Used immediately
    /// after pushing a mode when the lookahead token was produced under
    /// the previous grammar.
    fn advance_in_place(&mut self) {
        self.scanner.rewind(self.token.start);
        self.advance();
    }

    fn parse_body_block(&mut self) -> NodeId {
        let start = self.token.start;
        let stmts = self.parse_block(0);
        let end = stmts.last().map(|&id| self.node_end(id)).unwrap_or(start);

        self.make(NodeKind::Block, start, end, None, None, stmts)
    }

    fn parse_identifier(&mut self) -> NodeId {
        if !self.check(TokenKind::Identifier) {
            self.error_here(DiagnosticKind::ExpectedToken(TokenKind::Identifier));
            return self.invalid_here();
        }

        let start = self.token.start;
        let mut end = self.token.end;
        self.advance();

        // Dotted paths (`knot.stitch`) form one identifier node.
        while self.check(TokenKind::Dot) {
            self.advance();
            if self.check(TokenKind::Identifier) {
                end = self.token.end;
                self.advance();
            } else {
                self.error_here(DiagnosticKind::ExpectedToken(TokenKind::Identifier));
                break;
            }
        }
        self.leaf(NodeKind::Identifier, start, end)
    }

    fn parse_param_list(&mut self) -> NodeId {
        let start = self.token.start;
        let mut params = Vec::new();

        self.expect(TokenKind::LeftParen);

        while !self.check(TokenKind::RightParen) && !self.at_eof() {
            let by_ref = self.eat(TokenKind::KeywordRef);
            let name = self.parse_identifier();
            let kind = if by_ref {
                NodeKind::RefParamDecl
            } else {
                NodeKind::ParamDecl
            };
            let (name_start, name_end) = {
                let node = self.ast.node(name);
                (node.start, node.end)
            };

            params.push(self.make(kind, name_start, name_end, Some(name), None, Vec::new()));

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        let end = self.token.end;
        self.expect(TokenKind::RightParen);
        self.make(NodeKind::ParamList, start, end, None, None, params)
    }

    fn eat_line_end(&mut self) {
        self.skip_whitespace();
        if !self.eat(TokenKind::Newline) && !self.at_eof() {
            self.error_here(DiagnosticKind::ExpectedToken(TokenKind::Newline));
            self.recover_to_newline();
        }
    }

    // ------------------------------------------------------------------
    // Blocks, choices, gathers
    // ------------------------------------------------------------------

    /// Number of consecutive `*`/`+`/`-` markers starting the current
    /// line, without consuming anything.
    fn peek_marker(&mut self, kind: TokenKind) -> usize {
        if self.token.kind != kind {
            return 0;
        }

        let probe = self.snapshot();
        let mut count = 0;

        while self.token.kind == kind || self.check(TokenKind::Whitespace) {
            if self.token.kind == kind {
                count += 1;
            }
            self.advance();
        }

        self.rewind(probe);
        count
    }

    fn consume_markers(&mut self, kind: TokenKind) -> usize {
        let mut count = 0;

        loop {
            if self.token.kind == kind {
                count += 1;
                self.advance();
            } else if self.check(TokenKind::Whitespace) {
                self.advance();
            } else {
                break;
            }
        }
        count
    }

    /// Parse statements belonging to a block nested at `depth` choice
    /// levels. Stops at EOF, headers, and markers owned by callers.
    fn parse_block(&mut self, depth: usize) -> Vec<NodeId> {
        let mut stmts = Vec::new();

        loop {
            self.skip_blank();
            if self.at_eof() || self.check(TokenKind::Equal) {
                break;
            }

            let star = self.peek_marker(TokenKind::Star);
            let plus = self.peek_marker(TokenKind::Plus);
            if star > 0 || plus > 0 {
                let level = star.max(plus);

                if level <= depth {
                    break;
                }
                stmts.push(self.parse_choice_group(level));
                continue;
            }

            let dash = self.peek_marker(TokenKind::Minus);
            if dash > 0 {
                // A gather at or above this depth belongs to an enclosing
                // choice group.
                if dash <= depth {
                    break;
                }
                stmts.push(self.parse_gather(dash));
                continue;
            }

            stmts.push(self.parse_block_entry(depth));
        }
        stmts
    }

    fn parse_block_entry(&mut self, depth: usize) -> NodeId {
        if !self.descend() {
            self.recover_to_newline();
            return self.invalid_here();
        }

        let stmt = self.parse_stmt(depth);
        self.ascend();
        stmt
    }

    /// A run of choices at one level, with an optional trailing gather.
    fn parse_choice_group(&mut self, level: usize) -> NodeId {
        let start = self.token.start;
        let mut choices = Vec::new();

        loop {
            self.skip_blank();
            let star = self.peek_marker(TokenKind::Star);
            let plus = self.peek_marker(TokenKind::Plus);

            if star == level {
                choices.push(self.parse_choice(NodeKind::ChoiceStarStmt, TokenKind::Star, level));
            } else if plus == level {
                choices.push(self.parse_choice(NodeKind::ChoicePlusStmt, TokenKind::Plus, level));
            } else {
                break;
            }
        }

        let end = choices.last().map(|&id| self.node_end(id)).unwrap_or(start);
        let choice_stmt = self.make(NodeKind::ChoiceStmt, start, end, None, None, choices);

        self.skip_blank();
        if self.peek_marker(TokenKind::Minus) == level {
            let gather = self.parse_gather(level);
            let gather_end = self.node_end(gather);

            return self.make(
                NodeKind::GatheredChoiceStmt,
                start,
                gather_end,
                Some(choice_stmt),
                Some(gather),
                Vec::new(),
            );
        }
        choice_stmt
    }

    fn parse_choice(&mut self, kind: NodeKind, marker: TokenKind, level: usize) -> NodeId {
        let start = self.token.start;

        self.consume_markers(marker);
        self.skip_whitespace();

        let content = self.parse_choice_content();
        self.eat(TokenKind::Newline);

        let body = self.parse_block(level);
        let end = body
            .last()
            .map(|&id| self.node_end(id))
            .unwrap_or_else(|| self.node_end(content));

        self.make(kind, start, end, Some(content), None, body)
    }

    /// Start / `[option]` / inner parts of a choice line, plus an
    /// optional trailing divert.
    fn parse_choice_content(&mut self) -> NodeId {
        let start = self.token.start;
        let mut children = Vec::new();

        let (start_pieces, s0, s1) = self.parse_content_pieces(ContentStops {
            bracket: true,
            divert: true,
            ..ContentStops::default()
        });
        if !start_pieces.is_empty() {
            children.push(self.make(
                NodeKind::ChoiceStartExpr,
                s0,
                s1,
                None,
                None,
                start_pieces,
            ));
        }

        if self.eat(TokenKind::LeftBracket) {
            let (option_pieces, o0, o1) = self.parse_content_pieces(ContentStops {
                close_bracket: true,
                ..ContentStops::default()
            });
            self.expect(TokenKind::RightBracket);

            if !option_pieces.is_empty() {
                children.push(self.make(
                    NodeKind::ChoiceOptionExpr,
                    o0,
                    o1,
                    None,
                    None,
                    option_pieces,
                ));
            }

            let (inner_pieces, i0, i1) = self.parse_content_pieces(ContentStops {
                divert: true,
                ..ContentStops::default()
            });
            if !inner_pieces.is_empty() {
                children.push(self.make(
                    NodeKind::ChoiceInnerExpr,
                    i0,
                    i1,
                    None,
                    None,
                    inner_pieces,
                ));
            }
        }

        if self.check(TokenKind::RightArrow) {
            children.push(self.parse_divert_stmt());
        }

        let end = children
            .last()
            .map(|&id| self.node_end(id))
            .unwrap_or(start);
        self.make(NodeKind::ChoiceExpr, start, end, None, None, children)
    }

    fn parse_gather(&mut self, _level: usize) -> NodeId {
        let start = self.token.start;

        self.consume_markers(TokenKind::Minus);
        self.skip_whitespace();

        let inner = if matches!(self.token.kind, TokenKind::Newline | TokenKind::Eof) {
            self.eat(TokenKind::Newline);
            None
        } else {
            Some(self.parse_stmt(usize::MAX))
        };
        let end = inner.map(|id| self.node_end(id)).unwrap_or(start);

        self.make(NodeKind::GatherStmt, start, end, inner, None, Vec::new())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self, _depth: usize) -> NodeId {
        match self.token.kind {
            TokenKind::Tilde => self.parse_tilde_stmt(),
            TokenKind::RightArrow => {
                let divert = self.parse_divert_stmt();
                self.eat_line_end();
                divert
            }
            TokenKind::LeftArrow => {
                let thread = self.parse_thread_stmt();
                self.eat_line_end();
                thread
            }
            _ => {
                // VAR / CONST / LIST appear as plain words in content
                // grammar; probe before falling back to a content line.
                let mut token = self.token;

                if self.scanner.try_keyword(&mut token, TokenKind::KeywordVar) {
                    return self.parse_var_decl(NodeKind::VarDecl);
                }
                if self.scanner.try_keyword(&mut token, TokenKind::KeywordConst) {
                    return self.parse_var_decl(NodeKind::ConstDecl);
                }
                if self.scanner.try_keyword(&mut token, TokenKind::KeywordList) {
                    return self.parse_list_decl();
                }
                self.parse_content_stmt()
            }
        }
    }

    /// `~` introduces a logic line: temp declaration, return, assignment,
    /// or bare expression.
    fn parse_tilde_stmt(&mut self) -> NodeId {
        let start = self.token.start;

        self.scanner.push_mode(Grammar::Expression, self.token.start);
        self.advance(); // past '~'

        let stmt = if self.check(TokenKind::KeywordTemp) {
            self.advance();
            let name = self.parse_identifier();
            let value = if self.eat(TokenKind::Equal) {
                self.parse_expr()
            } else {
                None
            };
            let end = value
                .map(|id| self.node_end(id))
                .unwrap_or_else(|| self.node_end(name));

            self.make(NodeKind::TempDecl, start, end, Some(name), value, Vec::new())
        } else if self.check(TokenKind::KeywordReturn) {
            let return_start = self.token.start;
            self.advance();

            let value = if matches!(self.token.kind, TokenKind::Newline | TokenKind::Eof) {
                None
            } else {
                self.parse_expr()
            };
            let end = value
                .map(|id| self.node_end(id))
                .unwrap_or(self.token.start);

            self.make(NodeKind::ReturnStmt, return_start, end, value, None, Vec::new())
        } else if self.check(TokenKind::RightArrow) {
            self.parse_divert_target_stmt()
        } else {
            match self.parse_expr() {
                Some(expr) => {
                    if self.eat(TokenKind::Equal) {
                        match self.parse_expr() {
                            Some(value) => {
                                let end = self.node_end(value);
                                self.make(
                                    NodeKind::AssignStmt,
                                    start,
                                    end,
                                    Some(expr),
                                    Some(value),
                                    Vec::new(),
                                )
                            }
                            None => {
                                self.error_here(DiagnosticKind::UnexpectedToken);
                                self.invalid_here()
                            }
                        }
                    } else {
                        let end = self.node_end(expr);
                        self.make(NodeKind::ExprStmt, start, end, Some(expr), None, Vec::new())
                    }
                }
                None => {
                    self.error_here(DiagnosticKind::UnexpectedToken);
                    self.recover_to_newline();
                    self.invalid_here()
                }
            }
        };

        self.scanner.pop_mode();
        self.eat_line_end();
        stmt
    }

    /// `VAR name = expr` and `CONST name = expr`.
    fn parse_var_decl(&mut self, kind: NodeKind) -> NodeId {
        let start = self.token.start;

        self.scanner.push_mode(Grammar::Expression, self.token.start);
        self.advance_in_place(); // re-lex the keyword as a keyword
        self.advance(); // past it

        let name = self.parse_identifier();
        let value = if self.eat(TokenKind::Equal) {
            self.parse_expr()
        } else {
            None
        };
        let end = value
            .map(|id| self.node_end(id))
            .unwrap_or_else(|| self.node_end(name));

        self.scanner.pop_mode();
        self.eat_line_end();
        self.make(kind, start, end, Some(name), value, Vec::new())
    }

    /// `LIST name = a, b, c`.
    fn parse_list_decl(&mut self) -> NodeId {
        let start = self.token.start;

        self.scanner.push_mode(Grammar::Expression, self.token.start);
        self.advance_in_place();
        self.advance();

        let name = self.parse_identifier();
        let mut elements = Vec::new();

        if self.eat(TokenKind::Equal) {
            loop {
                elements.push(self.parse_identifier());
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }

        let end = elements
            .last()
            .map(|&id| self.node_end(id))
            .unwrap_or_else(|| self.node_end(name));

        self.scanner.pop_mode();
        self.eat_line_end();
        self.make(NodeKind::ListDecl, start, end, Some(name), None, elements)
    }

    /// `->` divert, `-> target ->` tunnel, or `->->` onwards; expression
    /// grammar is pushed for the target.
    fn parse_divert_stmt(&mut self) -> NodeId {
        self.scanner.push_mode(Grammar::Expression, self.token.start);
        let stmt = self.parse_divert_target_stmt();
        self.scanner.pop_mode();
        stmt
    }

    fn parse_divert_target_stmt(&mut self) -> NodeId {
        let start = self.token.start;

        self.advance(); // past '->'

        if self.check(TokenKind::RightArrow) {
            let end = self.token.end;
            self.advance();
            return self.leaf(NodeKind::TunnelOnwards, start, end);
        }

        let target = self.parse_call_target();
        let end = self.node_end(target);

        if self.check(TokenKind::RightArrow) {
            let arrow_end = self.token.end;
            self.advance();
            return self.make(
                NodeKind::TunnelStmt,
                start,
                arrow_end,
                Some(target),
                None,
                Vec::new(),
            );
        }
        self.make(NodeKind::DivertStmt, start, end, Some(target), None, Vec::new())
    }

    fn parse_thread_stmt(&mut self) -> NodeId {
        let start = self.token.start;

        self.scanner.push_mode(Grammar::Expression, self.token.start);
        self.advance(); // past '<-'

        let target = self.parse_call_target();
        let end = self.node_end(target);

        self.scanner.pop_mode();
        self.make(NodeKind::ThreadStmt, start, end, Some(target), None, Vec::new())
    }

    /// Identifier or call expression used as a divert/thread target.
    fn parse_call_target(&mut self) -> NodeId {
        let name = self.parse_identifier();

        if self.check(TokenKind::LeftParen) {
            return self.parse_call_tail(name);
        }
        name
    }

    // ------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------

    fn parse_content_stmt(&mut self) -> NodeId {
        let start = self.token.start;
        let mut pieces;
        let end;

        let (text_pieces, _, text_end) = self.parse_content_pieces(ContentStops {
            divert: true,
            close_brace: self.brace_body > 0,
            ..ContentStops::default()
        });
        pieces = text_pieces;

        if matches!(self.token.kind, TokenKind::RightArrow | TokenKind::LeftArrow) {
            let divert = if self.check(TokenKind::LeftArrow) {
                self.parse_thread_stmt()
            } else {
                self.parse_divert_stmt()
            };
            end = self.node_end(divert);
            pieces.push(divert);
        } else {
            end = text_end;
        }

        // Inside a multiline braced body the closer may share the last
        // content line; leave it for the enclosing parser.
        if !(self.brace_body > 0 && self.check(TokenKind::RightBrace)) {
            self.eat_line_end();
        }

        if pieces.is_empty() {
            let empty = self.leaf(NodeKind::EmptyContent, start, start);
            return self.make(NodeKind::ContentStmt, start, start, None, None, vec![empty]);
        }
        self.make(NodeKind::ContentStmt, start, end, None, None, pieces)
    }

    /// Accumulate content pieces until a stop token. Raw text tokens merge
    /// into single `Content` nodes; braces, glue, and diverts become their
    /// own pieces.
    fn parse_content_pieces(&mut self, stops: ContentStops) -> (Vec<NodeId>, usize, usize) {
        let start = self.token.start;
        let mut pieces: Vec<NodeId> = Vec::new();
        let mut text_start: Option<usize> = None;
        let mut text_end = start;
        let mut end = start;

        macro_rules! flush_text {
            () => {
                if let Some(ts) = text_start.take() {
                    let piece = self.leaf(NodeKind::Content, ts, text_end);
                    pieces.push(piece);
                }
            };
        }

        loop {
            match self.token.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                TokenKind::RightArrow | TokenKind::LeftArrow if stops.divert => break,
                TokenKind::LeftBracket if stops.bracket => break,
                TokenKind::RightBracket if stops.close_bracket => break,
                TokenKind::Pipe if stops.pipe => break,
                TokenKind::RightBrace if stops.close_brace => break,
                TokenKind::DoubleQuote if stops.quote => break,
                TokenKind::LeftBrace => {
                    flush_text!();
                    if !self.descend() {
                        self.recover_to_newline();
                        break;
                    }
                    let piece = self.parse_brace();
                    self.ascend();
                    end = self.node_end(piece);
                    pieces.push(piece);
                }
                TokenKind::Glue => {
                    flush_text!();
                    let piece = self.leaf(NodeKind::Glue, self.token.start, self.token.end);
                    end = self.token.end;
                    pieces.push(piece);
                    self.advance();
                }
                TokenKind::Whitespace => {
                    // Interior whitespace joins surrounding text but never
                    // starts or ends a piece.
                    self.advance();
                }
                _ => {
                    if text_start.is_none() {
                        text_start = Some(self.token.start);
                    }
                    text_end = self.token.end;
                    end = self.token.end;
                    self.advance();
                }
            }
        }

        flush_text!();
        (pieces, start, end)
    }

    // ------------------------------------------------------------------
    // Braced blocks: inline logic, conditionals, switches, sequences
    // ------------------------------------------------------------------

    /// Parse a `{…}` block from content position. The current token is the
    /// opening brace.
    fn parse_brace(&mut self) -> NodeId {
        let start = self.token.start;

        self.advance(); // past '{', still content grammar
        let after_brace = self.snapshot();

        self.scanner.push_mode(Grammar::Expression, start);
        self.advance_in_place();

        // Sequence mode markers directly after the brace.
        let seq_flag = match self.token.kind {
            TokenKind::Amp => Some(flags::SEQ_CYCLE),
            TokenKind::Tilde => Some(flags::SEQ_SHUFFLE),
            TokenKind::Bang => Some(flags::SEQ_ONCE),
            _ => None,
        };
        if let Some(flag) = seq_flag {
            self.advance();
            let marker_done = self.snapshot();

            self.scanner.pop_mode();
            self.rewind(marker_done);
            return self.parse_sequence(start, flag);
        }

        // Multi-branch conditional: `{` followed by a newline.
        if self.check(TokenKind::Newline) {
            return self.parse_multi_branch(start);
        }

        // Speculative expression parse.
        match self.parse_expr() {
            Some(expr) if self.check(TokenKind::Colon) => self.parse_conditional(start, expr),
            Some(expr) if self.check(TokenKind::RightBrace) => {
                let end = self.token.end;
                self.scanner.pop_mode();
                self.advance();
                self.make(NodeKind::InlineLogic, start, end, Some(expr), None, Vec::new())
            }
            _ => {
                // Not an expression block; it is a stopping sequence.
                self.scanner.pop_mode();
                self.rewind(after_brace);
                self.parse_sequence(start, flags::SEQ_STOPPING)
            }
        }
    }

    /// Content alternatives split on `|`, ending at `}`. Content grammar.
    fn parse_sequence(&mut self, start: usize, flag: u8) -> NodeId {
        let mut alternatives = Vec::new();

        loop {
            let (pieces, alt_start, alt_end) = self.parse_content_pieces(ContentStops {
                pipe: true,
                close_brace: true,
                ..ContentStops::default()
            });
            let alt = self.make(NodeKind::Block, alt_start, alt_end, None, None, pieces);

            alternatives.push(alt);
            if !self.eat(TokenKind::Pipe) {
                break;
            }
        }

        let end = self.token.end;
        self.expect(TokenKind::RightBrace);

        let node = self.make(NodeKind::SequenceExpr, start, end, None, None, alternatives);
        self.ast.node_mut(node).flags |= flag;
        node
    }

    /// Conditional after `expr :`. Either inline content on one line, or a
    /// multiline statement body with an optional `- else:` case list, or a
    /// switch when every case carries a value expression.
    ///
    /// Expression grammar is active; the colon is the current token.
    fn parse_conditional(&mut self, start: usize, condition: NodeId) -> NodeId {
        self.scanner.pop_mode(); // back to content for the branches
        self.advance(); // past ':'

        if self.check(TokenKind::Newline) {
            self.advance();
            return self.parse_block_conditional(start, Some(condition));
        }

        // Inline form: `{cond: then|else}`.
        self.skip_whitespace();
        let (then_pieces, t0, t1) = self.parse_content_pieces(ContentStops {
            pipe: true,
            close_brace: true,
            ..ContentStops::default()
        });
        let mut else_branch = None;

        if then_pieces.is_empty() {
            self.error_at(DiagnosticKind::ConditionalEmpty, start, self.token.end);
        }

        if self.eat(TokenKind::Pipe) {
            let (else_pieces, e0, e1) = self.parse_content_pieces(ContentStops {
                close_brace: true,
                ..ContentStops::default()
            });
            let branch = self.make(NodeKind::ElseBranch, e0, e1, None, None, else_pieces);

            self.ast.node_mut(branch).flags |= flags::INLINE;
            else_branch = Some(branch);
        }

        let end = self.token.end;
        self.expect(TokenKind::RightBrace);

        let node = self.make(
            NodeKind::IfStmt,
            start,
            end,
            Some(condition),
            else_branch,
            then_pieces,
        );
        self.ast.node_mut(node).flags |= flags::INLINE;
        node
    }

    /// `{` NEWLINE: a case list with no scrutinee (multi-branch if).
    fn parse_multi_branch(&mut self, start: usize) -> NodeId {
        self.scanner.pop_mode();
        self.advance(); // past the newline, content grammar

        self.brace_body += 1;
        let (cases, else_branch) = self.parse_branch_list(start);
        self.brace_body -= 1;
        let end = self.token.end;

        self.expect(TokenKind::RightBrace);

        if cases.is_empty() && else_branch.is_none() {
            self.error_at(DiagnosticKind::ConditionalEmpty, start, end);
        }
        self.make(NodeKind::MultiIfStmt, start, end, None, else_branch, cases)
    }

    /// Multiline conditional body for `{cond:` … `}`. Plain statements
    /// form the then-branch; `- else:` cases provide the alternative. A
    /// `- value:` case in this position is a misplaced switch case.
    fn parse_block_conditional(&mut self, start: usize, condition: Option<NodeId>) -> NodeId {
        let mut then_stmts = Vec::new();

        self.brace_body += 1;
        loop {
            self.skip_blank();
            if self.at_eof()
                || self.check(TokenKind::RightBrace)
                || self.check(TokenKind::Minus)
            {
                break;
            }
            then_stmts.push(self.parse_block_entry(usize::MAX));
        }

        if then_stmts.is_empty() && !self.check(TokenKind::Minus) {
            self.error_at(DiagnosticKind::ConditionalEmpty, start, self.token.end);
        }

        let node = if self.check(TokenKind::Minus) {
            let (cases, else_branch) = self.parse_branch_list(start);
            let mut switch = None;

            if !cases.is_empty() {
                // Extra conditions after a then-branch: only `- else:` is
                // allowed here.
                if !then_stmts.is_empty() {
                    let case = self.ast.node(cases[0]);
                    let (cs, ce) = (case.start, case.end);
                    self.error_at(DiagnosticKind::ExpectedElse, cs, ce);
                } else {
                    // No then-statements at all: this is a switch.
                    let end = self.token.end;
                    self.expect(TokenKind::RightBrace);
                    switch = Some(self.make(
                        NodeKind::SwitchStmt,
                        start,
                        end,
                        condition,
                        else_branch,
                        cases,
                    ));
                }
            }

            match switch {
                Some(node) => node,
                None => {
                    let end = self.token.end;
                    self.expect(TokenKind::RightBrace);
                    self.make(NodeKind::IfStmt, start, end, condition, else_branch, then_stmts)
                }
            }
        } else {
            let end = self.token.end;
            self.expect(TokenKind::RightBrace);
            self.make(NodeKind::IfStmt, start, end, condition, None, then_stmts)
        };

        self.brace_body -= 1;
        node
    }

    /// A list of `- expr:` / `- else:` cases inside a braced block.
    /// Returns the value cases and the else branch, recording diagnostics
    /// for duplicate or misplaced else cases.
    fn parse_branch_list(&mut self, _start: usize) -> (Vec<NodeId>, Option<NodeId>) {
        let mut cases = Vec::new();
        let mut else_branch: Option<NodeId> = None;

        loop {
            self.skip_blank();
            if !self.check(TokenKind::Minus) {
                break;
            }

            let case_start = self.token.start;
            self.advance(); // past '-'
            self.skip_whitespace();

            // `else` is a plain word in content grammar.
            let mut probe = self.token;
            let is_else = self.scanner.try_keyword(&mut probe, TokenKind::KeywordElse);

            if is_else {
                self.advance(); // past 'else'
                self.expect(TokenKind::Colon);
                self.eat(TokenKind::Newline);

                let stmts = self.parse_case_body();
                let end = stmts
                    .last()
                    .map(|&id| self.node_end(id))
                    .unwrap_or(case_start);
                let branch = self.make(NodeKind::ElseBranch, case_start, end, None, None, stmts);

                if else_branch.is_some() {
                    self.error_at(DiagnosticKind::MultipleElse, case_start, end);
                } else {
                    else_branch = Some(branch);
                }
            } else {
                self.scanner.push_mode(Grammar::Expression, case_start);
                self.advance_in_place();

                let value = self.parse_expr();

                self.scanner.pop_mode();
                if !self.check(TokenKind::Colon) {
                    self.error_here(DiagnosticKind::ExpectedToken(TokenKind::Colon));
                }
                self.advance(); // past ':' in content grammar
                self.eat(TokenKind::Newline);

                let stmts = self.parse_case_body();
                let end = stmts
                    .last()
                    .map(|&id| self.node_end(id))
                    .unwrap_or(case_start);
                let case =
                    self.make(NodeKind::SwitchCase, case_start, end, value, None, stmts);

                if else_branch.is_some() {
                    // A value case after `- else:`.
                    self.error_at(DiagnosticKind::FinalElseMisplaced, case_start, end);
                }
                cases.push(case);
            }
        }
        (cases, else_branch)
    }

    fn parse_case_body(&mut self) -> Vec<NodeId> {
        let mut stmts = Vec::new();

        loop {
            self.skip_blank();
            if self.at_eof()
                || self.check(TokenKind::RightBrace)
                || self.check(TokenKind::Minus)
            {
                break;
            }
            stmts.push(self.parse_block_entry(usize::MAX));
        }
        stmts
    }

    // ------------------------------------------------------------------
    // Expressions (Pratt)
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Option<NodeId> {
        if !self.descend() {
            return None;
        }

        let expr = self.parse_precedence(Precedence::Or);
        self.ascend();
        expr
    }

    fn parse_precedence(&mut self, min: Precedence) -> Option<NodeId> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some((kind, precedence)) = binary_operator(self.token.kind) else {
                break;
            };
            if (precedence as u8) < (min as u8) {
                break;
            }

            self.advance();
            let rhs = self.parse_precedence(precedence.next())?;
            let start = self.ast.node(lhs).start;
            let end = self.node_end(rhs);

            lhs = self.make(kind, start, end, Some(lhs), Some(rhs), Vec::new());
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<NodeId> {
        if !self.descend() {
            return None;
        }

        let result = match self.token.kind {
            TokenKind::Minus => {
                let start = self.token.start;
                self.advance();
                self.parse_unary().map(|operand| {
                    let end = self.node_end(operand);
                    self.make(NodeKind::NegateExpr, start, end, Some(operand), None, Vec::new())
                })
            }
            TokenKind::KeywordNot | TokenKind::Bang => {
                let start = self.token.start;
                self.advance();
                self.parse_unary().map(|operand| {
                    let end = self.node_end(operand);
                    self.make(NodeKind::NotExpr, start, end, Some(operand), None, Vec::new())
                })
            }
            _ => self.parse_postfix(),
        };

        self.ascend();
        result
    }

    fn parse_postfix(&mut self) -> Option<NodeId> {
        let mut expr = self.parse_primary()?;

        while self.check(TokenKind::LeftParen) {
            expr = self.parse_call_tail(expr);
        }
        Some(expr)
    }

    fn parse_call_tail(&mut self, callee: NodeId) -> NodeId {
        let args_start = self.token.start;
        let mut args = Vec::new();

        self.advance(); // past '('

        while !self.check(TokenKind::RightParen) && !self.at_eof() {
            match self.parse_expr() {
                Some(arg) => args.push(arg),
                None => break,
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        let end = self.token.end;
        self.expect(TokenKind::RightParen);

        let arg_list = self.make(NodeKind::ArgList, args_start, end, None, None, args);
        let start = self.ast.node(callee).start;

        self.make(
            NodeKind::CallExpr,
            start,
            end,
            Some(callee),
            Some(arg_list),
            Vec::new(),
        )
    }

    fn parse_primary(&mut self) -> Option<NodeId> {
        match self.token.kind {
            TokenKind::Number => {
                let id = self.leaf(NodeKind::Number, self.token.start, self.token.end);
                self.advance();
                Some(id)
            }
            TokenKind::KeywordTrue => {
                let id = self.leaf(NodeKind::True, self.token.start, self.token.end);
                self.advance();
                Some(id)
            }
            TokenKind::KeywordFalse => {
                let id = self.leaf(NodeKind::False, self.token.start, self.token.end);
                self.advance();
                Some(id)
            }
            TokenKind::Identifier => Some(self.parse_identifier()),
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expr();
                self.expect(TokenKind::RightParen);
                expr
            }
            TokenKind::DoubleQuote => Some(self.parse_string_expr()),
            _ => None,
        }
    }

    /// `"…"` string expression; the interior is content grammar.
    fn parse_string_expr(&mut self) -> NodeId {
        let start = self.token.start;

        self.scanner.push_mode(Grammar::Content, start);
        self.advance(); // past the opening quote

        let (pieces, _, _) = self.parse_content_pieces(ContentStops {
            quote: true,
            ..ContentStops::default()
        });

        self.scanner.pop_mode();
        let end = self.token.end;
        self.expect(TokenKind::DoubleQuote);
        self.make(NodeKind::StringExpr, start, end, None, None, pieces)
    }
}

/// Stop set for content accumulation.
#[derive(Default, Clone, Copy)]
struct ContentStops {
    divert: bool,
    bracket: bool,
    close_bracket: bool,
    pipe: bool,
    close_brace: bool,
    quote: bool,
}

/// Binary operator precedence, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Precedence {
    Or = 1,
    And,
    Equality,
    Comparison,
    Additive,
    Multiplicative,
    /// Bound above every binary level; forces left associativity.
    Unary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Additive,
            Precedence::Additive => Precedence::Multiplicative,
            Precedence::Multiplicative | Precedence::Unary => Precedence::Unary,
        }
    }
}

fn binary_operator(kind: TokenKind) -> Option<(NodeKind, Precedence)> {
    match kind {
        TokenKind::KeywordOr => Some((NodeKind::OrExpr, Precedence::Or)),
        TokenKind::KeywordAnd => Some((NodeKind::AndExpr, Precedence::And)),
        TokenKind::EqualEqual => Some((NodeKind::EqualExpr, Precedence::Equality)),
        TokenKind::BangEqual => Some((NodeKind::NotEqualExpr, Precedence::Equality)),
        TokenKind::LessThan => Some((NodeKind::LessExpr, Precedence::Comparison)),
        TokenKind::LessEqual => Some((NodeKind::LessEqualExpr, Precedence::Comparison)),
        TokenKind::GreaterThan => Some((NodeKind::GreaterExpr, Precedence::Comparison)),
        TokenKind::GreaterEqual => Some((NodeKind::GreaterEqualExpr, Precedence::Comparison)),
        TokenKind::Plus => Some((NodeKind::AddExpr, Precedence::Additive)),
        TokenKind::Minus => Some((NodeKind::SubExpr, Precedence::Additive)),
        TokenKind::Star => Some((NodeKind::MulExpr, Precedence::Multiplicative)),
        TokenKind::Slash => Some((NodeKind::DivExpr, Precedence::Multiplicative)),
        TokenKind::Percent | TokenKind::KeywordMod => {
            Some((NodeKind::ModExpr, Precedence::Multiplicative))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> Ast {
        let source = SourceBuffer::from_bytes("test.ink", text);
        parse(&source)
    }

    fn root_block<'a>(ast: &'a Ast) -> &'a AstNode {
        let file = ast.node(ast.root.expect("root"));
        ast.node(file.children[0])
    }

    #[test]
    fn content_line_parses_to_content_stmt() {
        let ast = parse_text("Hello, world!\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        assert_eq!(block.children.len(), 1);

        let stmt = ast.node(block.children[0]);
        assert_eq!(stmt.kind, NodeKind::ContentStmt);

        let piece = ast.node(stmt.children[0]);
        assert_eq!(piece.kind, NodeKind::Content);
        assert_eq!((piece.start, piece.end), (0, 13));
    }

    #[test]
    fn tilde_expression_statement() {
        let ast = parse_text("~ 1 + 2 * 3\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        assert_eq!(stmt.kind, NodeKind::ExprStmt);

        let add = ast.node(stmt.lhs.unwrap());
        assert_eq!(add.kind, NodeKind::AddExpr);

        let mul = ast.node(add.rhs.unwrap());
        assert_eq!(mul.kind, NodeKind::MulExpr);
    }

    #[test]
    fn var_and_assignment() {
        let ast = parse_text("VAR x = 2\n~ x = x + 1\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        assert_eq!(ast.node(block.children[0]).kind, NodeKind::VarDecl);
        assert_eq!(ast.node(block.children[1]).kind, NodeKind::AssignStmt);
    }

    #[test]
    fn choices_group_into_choice_stmt() {
        let ast = parse_text("* Go north\n* Go south\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        assert_eq!(block.children.len(), 1);

        let group = ast.node(block.children[0]);
        assert_eq!(group.kind, NodeKind::ChoiceStmt);
        assert_eq!(group.children.len(), 2);
        assert_eq!(
            ast.node(group.children[0]).kind,
            NodeKind::ChoiceStarStmt
        );
    }

    #[test]
    fn sticky_choice_and_option_brackets() {
        let ast = parse_text("+ Stay [here] a while\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let group = ast.node(block.children[0]);
        let choice = ast.node(group.children[0]);
        assert_eq!(choice.kind, NodeKind::ChoicePlusStmt);

        let content = ast.node(choice.lhs.unwrap());
        assert_eq!(content.kind, NodeKind::ChoiceExpr);

        let kinds: Vec<NodeKind> = content
            .children
            .iter()
            .map(|&id| ast.node(id).kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::ChoiceStartExpr,
                NodeKind::ChoiceOptionExpr,
                NodeKind::ChoiceInnerExpr,
            ]
        );
    }

    #[test]
    fn gathered_choices() {
        let ast = parse_text("* A\n* B\n- both\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let gathered = ast.node(block.children[0]);
        assert_eq!(gathered.kind, NodeKind::GatheredChoiceStmt);
        assert_eq!(ast.node(gathered.lhs.unwrap()).kind, NodeKind::ChoiceStmt);
        assert_eq!(ast.node(gathered.rhs.unwrap()).kind, NodeKind::GatherStmt);
    }

    #[test]
    fn nested_choice_levels() {
        let ast = parse_text("* Outer\n** Inner\n* Second\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let group = ast.node(block.children[0]);
        assert_eq!(group.children.len(), 2);

        let outer = ast.node(group.children[0]);
        assert_eq!(outer.children.len(), 1);
        assert_eq!(
            ast.node(outer.children[0]).kind,
            NodeKind::ChoiceStmt
        );
    }

    #[test]
    fn knot_declaration_with_body() {
        let ast = parse_text("Intro.\n== cave ==\nIt is dark.\n");
        assert!(!ast.has_errors());

        let file = ast.node(ast.root.unwrap());
        assert_eq!(file.children.len(), 2);

        let knot = ast.node(file.children[1]);
        assert_eq!(knot.kind, NodeKind::KnotDecl);

        let proto = ast.node(knot.lhs.unwrap());
        assert_eq!(proto.kind, NodeKind::KnotProto);
    }

    #[test]
    fn function_declaration_with_params() {
        let ast = parse_text("== function add(a, b)\n~ return a + b\n");
        assert!(!ast.has_errors());

        let file = ast.node(ast.root.unwrap());
        let func = ast.node(file.children[1]);
        assert_eq!(func.kind, NodeKind::FuncDecl);
        assert!(func.flags & flags::FUNCTION != 0);

        let proto = ast.node(func.lhs.unwrap());
        let params = ast.node(proto.rhs.unwrap());
        assert_eq!(params.kind, NodeKind::ParamList);
        assert_eq!(params.children.len(), 2);
    }

    #[test]
    fn stitch_nested_under_knot() {
        let ast = parse_text("== cave\n= entrance\nA door.\n");
        assert!(!ast.has_errors());

        let file = ast.node(ast.root.unwrap());
        let knot = ast.node(file.children[1]);
        assert_eq!(knot.children.len(), 2);
        assert_eq!(ast.node(knot.children[1]).kind, NodeKind::StitchDecl);
    }

    #[test]
    fn divert_statement() {
        let ast = parse_text("-> cave\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        assert_eq!(stmt.kind, NodeKind::DivertStmt);
        assert_eq!(ast.node(stmt.lhs.unwrap()).kind, NodeKind::Identifier);
    }

    #[test]
    fn tunnel_and_onwards() {
        let ast = parse_text("-> shop ->\n");
        assert!(!ast.has_errors());
        let block = root_block(&ast);
        assert_eq!(ast.node(block.children[0]).kind, NodeKind::TunnelStmt);

        let ast = parse_text("->->\n");
        assert!(!ast.has_errors());
        let block = root_block(&ast);
        assert_eq!(ast.node(block.children[0]).kind, NodeKind::TunnelOnwards);
    }

    #[test]
    fn inline_conditional_content() {
        let ast = parse_text("{true: yes|no}\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        assert_eq!(stmt.kind, NodeKind::ContentStmt);

        let cond = ast.node(stmt.children[0]);
        assert_eq!(cond.kind, NodeKind::IfStmt);
        assert!(cond.flags & flags::INLINE != 0);
        assert_eq!(ast.node(cond.lhs.unwrap()).kind, NodeKind::True);
        assert!(cond.rhs.is_some());
    }

    #[test]
    fn inline_logic_prints_variable() {
        let ast = parse_text("{x}\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let logic = ast.node(stmt.children[0]);
        assert_eq!(logic.kind, NodeKind::InlineLogic);
    }

    #[test]
    fn sequence_alternatives() {
        let ast = parse_text("{one|two|three}\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let seq = ast.node(stmt.children[0]);
        assert_eq!(seq.kind, NodeKind::SequenceExpr);
        assert_eq!(seq.children.len(), 3);
        assert!(seq.flags & flags::SEQ_STOPPING != 0);
    }

    #[test]
    fn cycle_shuffle_once_markers() {
        for (text, flag) in [
            ("{&a|b}\n", flags::SEQ_CYCLE),
            ("{~a|b}\n", flags::SEQ_SHUFFLE),
            ("{!a|b}\n", flags::SEQ_ONCE),
        ] {
            let ast = parse_text(text);
            assert!(!ast.has_errors(), "errors in {:?}", text);

            let block = root_block(&ast);
            let stmt = ast.node(block.children[0]);
            let seq = ast.node(stmt.children[0]);
            assert_eq!(seq.kind, NodeKind::SequenceExpr, "in {:?}", text);
            assert!(seq.flags & flag != 0, "in {:?}", text);
        }
    }

    #[test]
    fn switch_statement() {
        let ast = parse_text("{x:\n- 0: zero\n- 1: one\n- else: many\n}\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let switch = ast.node(stmt.children[0]);
        assert_eq!(switch.kind, NodeKind::SwitchStmt);
        assert_eq!(switch.children.len(), 2);
        assert!(switch.rhs.is_some());
    }

    #[test]
    fn multiline_conditional_with_else() {
        let ast = parse_text("{x > 1:\nbig\n- else:\nsmall\n}\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let cond = ast.node(stmt.children[0]);
        assert_eq!(cond.kind, NodeKind::IfStmt);
        assert!(cond.flags & flags::INLINE == 0);
        assert!(cond.rhs.is_some());
    }

    #[test]
    fn multiple_else_is_diagnosed() {
        let ast = parse_text("{x:\nbody\n- else:\na\n- else:\nb\n}\n");
        assert!(ast
            .errors
            .iter()
            .any(|e| e.kind == DiagnosticKind::MultipleElse));
    }

    #[test]
    fn empty_conditional_is_diagnosed() {
        let ast = parse_text("{\n}\n");
        assert!(ast
            .errors
            .iter()
            .any(|e| e.kind == DiagnosticKind::ConditionalEmpty));
    }

    #[test]
    fn glue_token_in_content() {
        let ast = parse_text("Hello <>\nworld\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let kinds: Vec<NodeKind> = stmt
            .children
            .iter()
            .map(|&id| ast.node(id).kind)
            .collect();
        assert!(kinds.contains(&NodeKind::Glue));
    }

    #[test]
    fn temp_and_return() {
        let ast = parse_text("== function f(x)\n~ temp y = x + 1\n~ return y\n");
        assert!(!ast.has_errors());

        let file = ast.node(ast.root.unwrap());
        let func = ast.node(file.children[1]);
        let body = ast.node(func.children[0]);
        assert_eq!(ast.node(body.children[0]).kind, NodeKind::TempDecl);
        assert_eq!(ast.node(body.children[1]).kind, NodeKind::ReturnStmt);
    }

    #[test]
    fn list_declaration() {
        let ast = parse_text("LIST moods = happy, sad, angry\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let list = ast.node(block.children[0]);
        assert_eq!(list.kind, NodeKind::ListDecl);
        assert_eq!(list.children.len(), 3);
    }

    #[test]
    fn content_line_with_trailing_divert() {
        let ast = parse_text("You leave. -> street\n");
        assert!(!ast.has_errors());

        let block = root_block(&ast);
        let stmt = ast.node(block.children[0]);
        let last = ast.node(*stmt.children.last().unwrap());
        assert_eq!(last.kind, NodeKind::DivertStmt);
    }

    #[test]
    fn node_offsets_are_ordered() {
        let ast = parse_text("== cave\nSome {x|y} text -> out\n* choice\n");

        for i in 0..ast.len() {
            let node = ast.node(NodeId(i as u32));
            assert!(node.start <= node.end);
        }
    }

    #[test]
    fn deep_nesting_is_capped() {
        let text = format!("{}x{}\n", "{".repeat(200), "}".repeat(200));
        let ast = parse_text(&text);
        assert!(ast
            .errors
            .iter()
            .any(|e| e.kind == DiagnosticKind::NestingTooDeep));
    }
}
