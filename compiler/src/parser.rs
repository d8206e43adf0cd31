use tracing::debug;

use crate::ast::*;
use crate::error::Diagnostic;
use crate::lexer::{Span, Token, TokenClass};
use crate::typing::SYSCALL;

// Grammar:
// P -> F* eof
// F -> builtin? T sym ( V , ... ) B | builtin T sym ( V , ... ) ;
// V -> sym : T
// T -> sym
// B -> { S* }
// S -> return E? ; | if ( E ) B I | while ( E ) B | var V (= E)? ; | E ;
// I -> else B | else if ... | <empty>
// E -> Pratt over: = (right) < == != < + - < * < prefix - ! ~
// U -> number | string | true | false | sym | sym ( E , ... ) | ( E )

type ParseResult<'a, T> = Result<(T, &'a [Token<'a>]), Diagnostic>;

const PREFIX_BINDING_POWER: u8 = 9;

fn error_at_token(token: &Token, msg: &str) -> Diagnostic {
    Diagnostic::at(token.span(), msg)
}

fn unexpected(ts: &[Token], expected: &str) -> Diagnostic {
    match ts.first() {
        Some(Token(TokenClass::Unknown, text, span)) if text.starts_with('"') =>
            Diagnostic::at(*span, "unterminated string literal"),
        Some(Token(TokenClass::Unknown, text, span)) =>
            Diagnostic::at(*span, format!("unknown character {:?}", text)),
        Some(token) =>
            error_at_token(token, &format!("expected {}, found {:?}", expected, token.text())),
        None =>
            Diagnostic::new(format!("expected {}, found end of input", expected)),
    }
}

fn expect_token_type<'a>(
    ts: &'a [Token<'a>],
    class: TokenClass,
    expected: &str
) -> ParseResult<'a, &'a Token<'a>> {
    match ts.first() {
        Some(token) if token.class() == class => Ok((token, &ts[1..])),
        _ => Err(unexpected(ts, expected)),
    }
}

fn expect_keyword<'a>(ts: &'a [Token<'a>], keyword: &str) -> ParseResult<'a, &'a Token<'a>> {
    match ts.first() {
        Some(token) if token.is(TokenClass::Keyword, keyword) => Ok((token, &ts[1..])),
        _ => Err(unexpected(ts, &format!("'{}'", keyword))),
    }
}

fn peek_class(ts: &[Token], class: TokenClass) -> bool {
    ts.first().map_or(false, |t| t.class() == class)
}

fn peek_keyword(ts: &[Token], keyword: &str) -> bool {
    ts.first().map_or(false, |t| t.is(TokenClass::Keyword, keyword))
}

fn parse_type<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, (Type, Span)> {
    let (name, rest) = expect_token_type(ts, TokenClass::Identifier, "a type name")?;
    if let Some(bracket) = rest.first().filter(|t| t.class() == TokenClass::LeftBracket) {
        return Err(error_at_token(bracket, "array types are not supported"));
    }
    Ok(((Type::named(name.text()), name.span()), rest))
}

pub fn parse_var_decl<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, (Variable, Span)> {
    let (name, rest) = expect_token_type(ts, TokenClass::Identifier, "a variable name")?;
    let (_, rest) = expect_token_type(rest, TokenClass::TypeIndicator, "':'")?;
    let ((ty, ty_span), rest) = parse_type(rest)?;
    Ok(((Variable::new(name.text(), ty), name.span().to(ty_span)), rest))
}

fn parse_block<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, (Vec<Stmt>, Span)> {
    let (_, mut rest) = expect_token_type(ts, TokenClass::LeftBrace, "'{'")?;
    let mut statements = Vec::new();
    loop {
        match rest.first() {
            Some(close) if close.class() == TokenClass::RightBrace =>
                return Ok(((statements, close.span()), &rest[1..])),
            None => return Err(unexpected(rest, "'}'")),
            Some(_) => {
                let (stmt, rest_) = parse_statement(rest)?;
                statements.push(stmt);
                rest = rest_;
            }
        }
    }
}

fn parse_if<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Stmt> {
    let (kw, rest) = expect_keyword(ts, "if")?;
    let (_, rest) = expect_token_type(rest, TokenClass::LeftParen, "'('")?;
    let (cond, rest) = parse_expression(rest, 0)?;
    let (_, rest) = expect_token_type(rest, TokenClass::RightParen, "')'")?;
    let ((body, mut end), mut rest) = parse_block(rest)?;

    let mut else_branch = None;
    if let Some(else_kw) = rest.first().filter(|t| t.is(TokenClass::Keyword, "else")) {
        let after = &rest[1..];
        let (branch, rest_) = if peek_keyword(after, "if") {
            let (nested, rest_) = parse_if(after)?;
            let span = else_kw.span().to(nested.span);
            (Stmt::new(StmtKind::Else(vec![nested]), span), rest_)
        } else {
            let ((stmts, close), rest_) = parse_block(after)?;
            (Stmt::new(StmtKind::Else(stmts), else_kw.span().to(close)), rest_)
        };
        end = branch.span;
        rest = rest_;
        else_branch = Some(Box::new(branch));
    }

    Ok((Stmt::new(StmtKind::If { cond, body, else_branch }, kw.span().to(end)), rest))
}

pub fn parse_statement<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Stmt> {
    let first = match ts.first() {
        Some(token) => token,
        None => return Err(unexpected(ts, "a statement")),
    };

    if first.class() == TokenClass::Keyword {
        match first.text() {
            "return" => {
                let rest = &ts[1..];
                let (value, rest) = if peek_class(rest, TokenClass::Semicolon) {
                    (None, rest)
                } else {
                    let (e, rest) = parse_expression(rest, 0)?;
                    (Some(e), rest)
                };
                let (semi, rest) = expect_token_type(rest, TokenClass::Semicolon, "';'")?;
                let span = first.span().to(semi.span());
                return Ok((Stmt::new(StmtKind::Return(value), span), rest));
            }
            "if" => return parse_if(ts),
            "while" => {
                let (_, rest) = expect_token_type(&ts[1..], TokenClass::LeftParen, "'('")?;
                let (cond, rest) = parse_expression(rest, 0)?;
                let (_, rest) = expect_token_type(rest, TokenClass::RightParen, "')'")?;
                let ((body, close), rest) = parse_block(rest)?;
                let span = first.span().to(close);
                return Ok((Stmt::new(StmtKind::While { cond, body }, span), rest));
            }
            "var" => {
                let ((var, decl_span), rest) = parse_var_decl(&ts[1..])?;
                let decl = Expr::new(ExprKind::Declaration(var), decl_span);
                let (expr, rest) = if peek_class(rest, TokenClass::Assign) {
                    let (value, rest) = parse_expression(&rest[1..], 0)?;
                    (Expr::assign(decl, value), rest)
                } else {
                    (decl, rest)
                };
                let (semi, rest) = expect_token_type(rest, TokenClass::Semicolon, "';'")?;
                let span = first.span().to(semi.span());
                return Ok((Stmt::new(StmtKind::Expression(expr), span), rest));
            }
            _ => {}
        }
    }

    let (expr, rest) = parse_expression(ts, 0)?;
    let (semi, rest) = expect_token_type(rest, TokenClass::Semicolon, "';'")?;
    let span = first.span().to(semi.span());
    Ok((Stmt::new(StmtKind::Expression(expr), span), rest))
}

fn infix_binding_power(token: &Token) -> Option<(u8, u8)> {
    match (token.class(), token.text()) {
        (TokenClass::Assign, _) => Some((2, 1)),
        (TokenClass::Operator, "==") | (TokenClass::Operator, "!=") => Some((3, 4)),
        (TokenClass::Operator, "+") | (TokenClass::Operator, "-") => Some((5, 6)),
        (TokenClass::Operator, "*") => Some((7, 8)),
        _ => None,
    }
}

fn binop(symbol: &str) -> BinOp {
    match symbol {
        "+" => BinOp::Plus,
        "-" => BinOp::Minus,
        "*" => BinOp::Times,
        "==" => BinOp::Eq,
        _ => BinOp::NotEq,
    }
}

fn parse_call<'a>(name: &Token, ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let mut args = Vec::new();
    let mut rest = ts;
    if !peek_class(rest, TokenClass::RightParen) {
        loop {
            let (arg, rest_) = parse_expression(rest, 0)?;
            args.push(arg);
            rest = rest_;
            if peek_class(rest, TokenClass::Comma) {
                rest = &rest[1..];
            } else {
                break;
            }
        }
    }
    let (close, rest) = expect_token_type(rest, TokenClass::RightParen, "')' or ','")?;
    let call = Expr::call(name.text(), args).with_span(name.span().to(close.span()));
    Ok((call, rest))
}

fn parse_prefix<'a>(ts: &'a [Token<'a>]) -> ParseResult<'a, Expr> {
    let token = match ts.first() {
        Some(token) => token,
        None => return Err(unexpected(ts, "an expression")),
    };
    let rest = &ts[1..];

    match (token.class(), token.text()) {
        (TokenClass::Operator, "-") | (TokenClass::Operator, "!") | (TokenClass::Operator, "~") => {
            let op = match token.text() {
                "-" => UnOp::Neg,
                "!" => UnOp::Not,
                _ => UnOp::BitNot,
            };
            let (operand, rest) = parse_expression(rest, PREFIX_BINDING_POWER)?;
            let span = token.span().to(operand.span);
            Ok((Expr::unop(op, operand).with_span(span), rest))
        }
        (TokenClass::Number, text) => {
            let value = text.parse::<i32>()
                .map_err(|_| error_at_token(token, "invalid integer literal"))?;
            Ok((Expr::number(value).with_span(token.span()), rest))
        }
        (TokenClass::String, text) => Ok((Expr::string(text).with_span(token.span()), rest)),
        (TokenClass::Keyword, "true") => Ok((Expr::boolean(true).with_span(token.span()), rest)),
        (TokenClass::Keyword, "false") => Ok((Expr::boolean(false).with_span(token.span()), rest)),
        (TokenClass::Identifier, name) => {
            if peek_class(rest, TokenClass::LeftParen) {
                parse_call(token, &rest[1..])
            } else {
                Ok((Expr::var(name).with_span(token.span()), rest))
            }
        }
        (TokenClass::LeftParen, _) => {
            let (expr, rest) = parse_expression(rest, 0)?;
            let (_, rest) = expect_token_type(rest, TokenClass::RightParen, "')'")?;
            Ok((expr, rest))
        }
        _ => Err(unexpected(ts, "an expression")),
    }
}

pub fn parse_expression<'a>(ts: &'a [Token<'a>], min_bp: u8) -> ParseResult<'a, Expr> {
    let (mut lhs, mut rest) = parse_prefix(ts)?;

    loop {
        let op = match rest.first() {
            Some(op) => op,
            None => break,
        };
        let (l_bp, r_bp) = match infix_binding_power(op) {
            Some(bp) => bp,
            None => break,
        };
        if l_bp < min_bp {
            break;
        }
        let (rhs, rest_) = parse_expression(&rest[1..], r_bp)?;
        rest = rest_;
        lhs = if op.class() == TokenClass::Assign {
            Expr::assign(lhs, rhs)
        } else {
            Expr::binop(binop(op.text()), lhs, rhs)
        };
    }

    Ok((lhs, rest))
}

pub struct Parser {
    functions: Vec<Function>,
    file_name: Option<String>,
}

impl Parser {
    pub fn new(file_name: Option<&str>) -> Parser {
        Parser { functions: Vec::new(), file_name: file_name.map(str::to_string) }
    }

    fn parse_function<'a>(&mut self, ts: &'a [Token<'a>]) -> ParseResult<'a, ()> {
        let builtin = peek_keyword(ts, "builtin");
        let rest = if builtin { &ts[1..] } else { ts };
        let start = ts.first().map(Token::span).unwrap_or_default();

        let ((return_type, _), rest) = parse_type(rest)?;
        let (name, rest) = expect_token_type(rest, TokenClass::Identifier, "a function name")?;
        if name.text() == SYSCALL {
            return Err(error_at_token(name, "syscall is a reserved name"));
        }
        if self.functions.iter().any(|f| f.name == name.text()) {
            return Err(error_at_token(name, "Function already defined"));
        }

        let (_, mut rest) = expect_token_type(rest, TokenClass::LeftParen, "'('")?;
        let mut arguments: Vec<Variable> = Vec::new();
        if !peek_class(rest, TokenClass::RightParen) {
            loop {
                let ((var, span), rest_) = parse_var_decl(rest)?;
                if arguments.iter().any(|a| a.name == var.name) {
                    return Err(Diagnostic::at(span, "Duplicate argument name"));
                }
                arguments.push(var);
                rest = rest_;
                if peek_class(rest, TokenClass::Comma) {
                    rest = &rest[1..];
                } else {
                    break;
                }
            }
        }
        let (close, rest) = expect_token_type(rest, TokenClass::RightParen, "')' or ','")?;

        let (statements, rest) = if builtin {
            if let Some(brace) = rest.first().filter(|t| t.class() == TokenClass::LeftBrace) {
                return Err(error_at_token(brace, "builtin functions cannot have a body"));
            }
            let (_, rest) = expect_token_type(rest, TokenClass::Semicolon, "';'")?;
            (Vec::new(), rest)
        } else {
            let ((statements, _), rest) = parse_block(rest)?;
            (statements, rest)
        };

        self.functions.push(Function {
            return_type,
            name: name.text().to_string(),
            arguments,
            scope: Scope::default(),
            statements,
            builtin,
            span: start.to(close.span()),
        });
        Ok(((), rest))
    }

    pub fn parse(mut self, tokens: &[Token]) -> Result<Program, Diagnostic> {
        let mut rest = tokens;
        while !rest.is_empty() {
            match self.parse_function(rest) {
                Ok((_, rest_)) => rest = rest_,
                Err(mut e) => {
                    if e.span.is_none() {
                        // ran out of input: point just past the last token
                        e.span = tokens.last().map(|t| Span::new(t.span().end, t.span().end));
                    }
                    return Err(e.in_file(self.file_name.as_deref()));
                }
            }
        }
        debug!(functions = self.functions.len(), "parsed program");
        Ok(Program { functions: self.functions, file_name: self.file_name })
    }
}

pub fn parse(tokens: &[Token], file_name: Option<&str>) -> Result<Program, Diagnostic> {
    Parser::new(file_name).parse(tokens)
}
