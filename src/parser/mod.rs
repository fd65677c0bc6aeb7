pub mod ast;

use crate::lexer::Token;
use crate::types::Span;
use ast::*;
use chumsky::Parser;
use chumsky::input::ValueInput;
use chumsky::prelude::*;
use std::rc::Rc;

pub use chumsky::span::SimpleSpan;

type RichTokenError<'a> = Rich<'a, Token>;

#[derive(Debug, Clone)]
enum PostfixOp {
    Dot(String),
    Call(Vec<ExprS>),
    Index(ExprS),
}

pub fn program_parser<'tokens, I>()
-> impl Parser<'tokens, I, Vec<StmtS>, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    let stmt = stmt_parser();
    let sep = choice((just(Token::Newline), just(Token::Semicolon))).ignored();
    let seps = sep.clone().repeated();

    seps.clone()
        .ignore_then(
            stmt.separated_by(sep.clone().repeated().at_least(1))
                .collect::<Vec<StmtS>>(),
        )
        .then_ignore(seps)
        .then_ignore(end())
        .boxed()
}

fn stmt_parser<'tokens, I>()
-> impl Parser<'tokens, I, StmtS, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
{
    recursive(|stmt| {
        let ident = select! { Token::Identifier(s) => s }.labelled("identifier");

        // Statements are separated by newlines or semicolons; runs of
        // separators collapse (blank lines, trailing semicolons)
        let sep = choice((just(Token::Newline), just(Token::Semicolon))).ignored();
        let seps = sep.clone().repeated();

        let stmts = seps
            .clone()
            .ignore_then(
                stmt.clone()
                    .separated_by(sep.clone().repeated().at_least(1))
                    .collect::<Vec<StmtS>>(),
            )
            .then_ignore(seps.clone());

        let block = stmts
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .labelled("block")
            .boxed();

        let params = ident
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<String>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .boxed();

        let expr = expr_parser(block.clone(), params.clone()).boxed();

        // ===== statements =====

        let return_stmt = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .map(Stmt::Return)
            .labelled("return statement");

        let using_stmt = just(Token::Using)
            .ignore_then(select! { Token::String(s) => s })
            .map(|path| Stmt::Using { path })
            .labelled("using declaration");

        let assign_stmt = expr
            .clone()
            .then_ignore(just(Token::Equal))
            .then(expr.clone())
            .map(|(target, value)| Stmt::Assign { target, value })
            .labelled("assignment");

        let expr_stmt = expr
            .clone()
            .map(Stmt::Expr)
            .labelled("expression statement");

        let def_stmt = just(Token::Def)
            .ignore_then(ident.clone())
            .then(params.clone())
            .then(block.clone())
            .map(|((name, params), body)| {
                Stmt::Def(Rc::new(FuncDecl::new(Some(name), params, body)))
            })
            .labelled("def statement");

        let method_def = just(Token::Def)
            .ignore_then(ident.clone())
            .then(params.clone())
            .then(block.clone())
            .map_with(|((name, params), body), e| {
                let s: I::Span = e.span();
                (
                    Rc::new(FuncDecl::new(Some(name), params, body)),
                    s.into_range(),
                )
            });

        let class_body = seps
            .clone()
            .ignore_then(
                method_def
                    .separated_by(sep.clone().repeated().at_least(1))
                    .collect::<Vec<(Rc<FuncDecl>, Span)>>(),
            )
            .then_ignore(seps.clone())
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let class_stmt = just(Token::Class)
            .ignore_then(ident.clone())
            .then(just(Token::Extends).ignore_then(ident.clone()).or_not())
            .then(class_body)
            .map(|((name, superclass), methods)| {
                Stmt::Class(Rc::new(ClassDecl {
                    name,
                    superclass,
                    methods,
                }))
            })
            .labelled("class statement");

        // `elif`/`else` may start on the line after the closing brace
        let if_stmt = just(Token::If)
            .ignore_then(expr.clone())
            .then(block.clone())
            .then(
                seps.clone()
                    .ignore_then(just(Token::Elif))
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated()
                    .collect::<Vec<(ExprS, Vec<StmtS>)>>(),
            )
            .then(
                seps.clone()
                    .ignore_then(just(Token::Else))
                    .ignore_then(block.clone())
                    .or_not(),
            )
            .map(
                |(((condition, then_block), elif_blocks), else_block)| Stmt::If {
                    condition,
                    then_block,
                    elif_blocks,
                    else_block,
                },
            )
            .labelled("if statement");

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map(|(condition, body)| Stmt::While { condition, body })
            .labelled("while statement");

        choice((
            class_stmt,
            def_stmt,
            if_stmt,
            while_stmt,
            using_stmt,
            return_stmt,
            assign_stmt,
            expr_stmt,
        ))
        .map_with(|node: Stmt, e| {
            let s: I::Span = e.span();
            (node, s.into_range())
        })
        .recover_with(skip_then_retry_until(
            any().ignored(),
            just(Token::Newline)
                .ignored()
                .or(just(Token::RBrace).ignored())
                .or(end().ignored()),
        ))
        .boxed()
    })
}

fn expr_parser<'tokens, I, B, P>(
    block: B,
    params: P,
) -> impl Parser<'tokens, I, ExprS, extra::Err<RichTokenError<'tokens>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan> + 'tokens,
    B: Parser<'tokens, I, Vec<StmtS>, extra::Err<RichTokenError<'tokens>>> + Clone + 'tokens,
    P: Parser<'tokens, I, Vec<String>, extra::Err<RichTokenError<'tokens>>> + Clone + 'tokens,
{
    recursive(|expr| {
        let ident = select! { Token::Identifier(s) => s }.labelled("identifier");

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<ExprS>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let literal = select! {
            Token::Int(i) => Expr::Literal(Literal::Int(i)),
            Token::Float(f) => Expr::Literal(Literal::Float(f)),
            Token::String(s) => Expr::Literal(Literal::Str(s)),
            Token::Bool(b) => Expr::Literal(Literal::Bool(b)),
            Token::None => Expr::Literal(Literal::None),
        }
        .labelled("literal");

        let array = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<ExprS>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Expr::Array);

        let lambda = just(Token::Lamb)
            .ignore_then(params)
            .then(block)
            .map(|(params, body)| Expr::Lambda(Rc::new(FuncDecl::new(None, params, body))));

        let new_expr = just(Token::New)
            .ignore_then(ident.clone())
            .then(args.clone())
            .map(|(name, args)| Expr::New {
                class: NameRef::new(name),
                args,
            });

        let primary = choice((
            literal,
            lambda,
            new_expr,
            array,
            ident.clone().map(|s| Expr::Name(NameRef::new(s))),
            expr.clone()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .map(|e: ExprS| e.0),
        ))
        .map_with(|node: Expr, e| {
            let s: I::Span = e.span();
            (node, s.into_range())
        });

        // Postfix: handles ., () and [] chaining
        // Example: p.norm2(), rows[i][j], obj.field
        let postfix_op = choice((
            just(Token::Dot)
                .ignore_then(ident.clone())
                .map(PostfixOp::Dot),
            args.clone().map(PostfixOp::Call),
            expr.clone()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map(PostfixOp::Index),
        ));

        let atom = primary.foldl(postfix_op.repeated(), |base: ExprS, op: PostfixOp| {
            let start = base.1.start;
            match op {
                PostfixOp::Dot(field) => {
                    let end = base.1.end + field.len() + 1;
                    (
                        Expr::Dot {
                            object: Box::new(base),
                            field,
                        },
                        start..end,
                    )
                }
                PostfixOp::Call(call_args) => {
                    let end = call_args
                        .last()
                        .map(|a| a.1.end + 1)
                        .unwrap_or(base.1.end + 2);
                    (
                        Expr::Call {
                            callee: Box::new(base),
                            args: call_args,
                        },
                        start..end,
                    )
                }
                PostfixOp::Index(index) => {
                    let end = index.1.end + 1;
                    (
                        Expr::Index {
                            object: Box::new(base),
                            index: Box::new(index),
                        },
                        start..end,
                    )
                }
            }
        });

        let op_unary = choice((
            just(Token::Not).to(UnaryOp::Not),
            just(Token::Minus).to(UnaryOp::Negate),
        ))
        .map_with(|op, e| {
            let s: I::Span = e.span();
            (op, s.into_range())
        });

        let unary = op_unary
            .repeated()
            .foldr(atom, |(op, op_span): (UnaryOp, Span), right: ExprS| {
                let span = op_span.start..right.1.end;
                (
                    Expr::Unary {
                        op,
                        expr: Box::new(right),
                    },
                    span,
                )
            });

        let op = |t| just(t).ignored();
        let binary = |left: ExprS, (op, right): (BinaryOp, ExprS)| {
            let span = left.1.start..right.1.end;
            (
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            )
        };

        let product = unary.clone().foldl(
            choice((
                op(Token::Star).to(BinaryOp::Multiply),
                op(Token::Slash).to(BinaryOp::Divide),
                op(Token::Percent).to(BinaryOp::Modulo),
            ))
            .then(unary)
            .repeated(),
            binary,
        );
        let sum = product.clone().foldl(
            choice((
                op(Token::Plus).to(BinaryOp::Add),
                op(Token::Minus).to(BinaryOp::Subtract),
            ))
            .then(product)
            .repeated(),
            binary,
        );
        let comparison = sum.clone().foldl(
            choice((
                op(Token::Less).to(BinaryOp::Less),
                op(Token::LessEqual).to(BinaryOp::LessEqual),
                op(Token::Greater).to(BinaryOp::Greater),
                op(Token::GreaterEqual).to(BinaryOp::GreaterEqual),
                op(Token::EqualEqual).to(BinaryOp::Equal),
                op(Token::NotEqual).to(BinaryOp::NotEqual),
            ))
            .then(sum)
            .repeated(),
            binary,
        );
        let and_expr = comparison.clone().foldl(
            op(Token::And).ignore_then(comparison).repeated(),
            |left: ExprS, right: ExprS| {
                let span = left.1.start..right.1.end;
                (
                    Expr::AndLogic {
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                )
            },
        );
        let or_expr = and_expr.clone().foldl(
            op(Token::Or).ignore_then(and_expr).repeated(),
            |left: ExprS, right: ExprS| {
                let span = left.1.start..right.1.end;
                (
                    Expr::OrLogic {
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                )
            },
        );

        or_expr.labelled("expression").boxed()
    })
}
