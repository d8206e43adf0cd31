use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ast::*;
use crate::error::Diagnostic;
use crate::lexer::Span;


pub const SYSCALL: &str = "syscall";
pub const SYSCALL_MAX_ARGS: usize = 6;

const VALUE_TYPES: &[&str] = &["i32", "bool", "string"];

struct Signature {
    arguments: Vec<Type>,
    return_type: Type,
}

/// The parts of the function being checked that statements may look at or grow.
struct FunctionEnv<'f> {
    return_type: &'f Type,
    arguments: &'f [Variable],
    scope: &'f mut Scope,
}

impl<'f> FunctionEnv<'f> {
    fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.scope.find(name)
            .or_else(|| self.arguments.iter().find(|v| v.name == name))
    }
}

pub struct TypeChecker {
    signatures: HashMap<String, Signature>,
}

fn error_at_exp(exp: &Expr, msg: &str) -> Diagnostic {
    Diagnostic::at(exp.span, msg)
}

fn check_value_type(var: &Variable, span: Span) -> Result<(), Diagnostic> {
    if VALUE_TYPES.contains(&var.ty.name.as_str()) {
        Ok(())
    } else {
        Err(Diagnostic::at(span, format!("Unknown type {} for variable {}", var.ty, var.name)))
    }
}

/// Wraps `expression` in a `Cast` to the value (non-reference) type.
fn replace_with_cast(expression: &mut Expr, ty: Type) {
    let span = expression.span;
    let placeholder = Expr::new(ExprKind::Literal(Literal::Bool(false)), span);
    let inner = std::mem::replace(expression, placeholder);
    *expression = Expr {
        kind: ExprKind::Cast(Box::new(inner)),
        value_type: Some(ty),
        span,
    };
}

fn decay(expression: &mut Expr, ty: &Type) -> Type {
    let value = ty.remove_reference();
    if ty.reference {
        replace_with_cast(expression, value.clone());
    }
    value
}

impl TypeChecker {
    pub fn new(program: &Program) -> TypeChecker {
        let signatures = program.functions.iter()
            .map(|f| {
                (
                    f.name.clone(),
                    Signature {
                        arguments: f.arguments.iter().map(|a| a.ty.clone()).collect(),
                        return_type: f.return_type.clone(),
                    }
                )
            })
            .collect();
        TypeChecker { signatures }
    }

    pub fn check_function(&self, function: &mut Function) -> Result<(), Diagnostic> {
        if !function.return_type.is_void() && !VALUE_TYPES.contains(&function.return_type.name.as_str()) {
            return Err(Diagnostic::at(
                function.span,
                format!("Unknown return type {}", function.return_type)));
        }
        if function.name == "main" && function.return_type != Type::i32() && function.return_type != Type::bool() {
            return Err(Diagnostic::at(function.span, "main must return i32 or bool"));
        }
        for arg in &function.arguments {
            check_value_type(arg, function.span)?;
        }
        if function.builtin {
            return Ok(());
        }

        let Function { return_type, arguments, scope, statements, .. } = function;
        scope.variables.clear();
        let mut env = FunctionEnv {
            return_type: &*return_type,
            arguments: arguments.as_slice(),
            scope,
        };
        for stmt in statements.iter_mut() {
            self.check_statement(stmt, &mut env)?;
        }
        trace!(function = %function.name, locals = function.scope.variables.len(), "checked function");
        Ok(())
    }

    fn check_block(&self, stmts: &mut [Stmt], env: &mut FunctionEnv) -> Result<(), Diagnostic> {
        for stmt in stmts {
            self.check_statement(stmt, env)?;
        }
        Ok(())
    }

    fn check_statement(&self, stmt: &mut Stmt, env: &mut FunctionEnv) -> Result<(), Diagnostic> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Return(value) => {
                if env.return_type.is_void() {
                    if value.is_some() {
                        return Err(Diagnostic::at(span, "void function cannot return a value"));
                    }
                } else {
                    let value = match value {
                        Some(value) => value,
                        None => return Err(Diagnostic::at(span, "Expected expression")),
                    };
                    let return_type = env.return_type;
                    let ty = self.check_expression(value, env)?;
                    if !ty.unref_eq(return_type) {
                        return Err(Diagnostic::at(
                            span,
                            format!("Type mismatch, expected {} got {}", return_type, ty)));
                    }
                    decay(value, &ty);
                }
            }
            StmtKind::Expression(e) => {
                self.check_expression(e, env)?;
            }
            StmtKind::If { cond, body, else_branch } => {
                self.check_condition(cond, env)?;
                // no block scoping: declarations in the body stay visible afterwards
                self.check_block(body, env)?;
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch, env)?;
                }
            }
            StmtKind::While { cond, body } => {
                self.check_condition(cond, env)?;
                self.check_block(body, env)?;
            }
            StmtKind::Else(children) => {
                self.check_block(children, env)?;
            }
        }
        Ok(())
    }

    fn check_condition(&self, cond: &mut Expr, env: &mut FunctionEnv) -> Result<(), Diagnostic> {
        let ty = self.check_expression(cond, env)?;
        if ty != Type::bool() {
            return Err(error_at_exp(cond, "Expected bool expression"));
        }
        Ok(())
    }

    fn check_operand(&self, operand: &mut Expr, env: &mut FunctionEnv) -> Result<Type, Diagnostic> {
        let ty = self.check_expression(operand, env)?;
        Ok(decay(operand, &ty))
    }

    /// Resolves the type of `expression`, records it in `value_type` and
    /// returns it.
    fn check_expression(&self, expression: &mut Expr, env: &mut FunctionEnv) -> Result<Type, Diagnostic> {
        let span = expression.span;
        let ty = match &mut expression.kind {
            ExprKind::Literal(Literal::Bool(_)) => Type::bool(),
            ExprKind::Literal(Literal::Int(_)) => Type::i32(),
            ExprKind::Literal(Literal::Str(_)) => Type::string(),

            ExprKind::BinOp(op, lhs, rhs) => {
                let lhs_type = self.check_expression(lhs, env)?;
                let rhs_type = self.check_expression(rhs, env)?;
                if !lhs_type.unref_eq(&rhs_type) {
                    return Err(Diagnostic::at(
                        span,
                        format!("Types didnt match {} {}", lhs_type, rhs_type)));
                }
                let operand_type = decay(lhs, &lhs_type);
                decay(rhs, &rhs_type);

                if op.is_comparison() {
                    if operand_type == Type::string() {
                        return Err(Diagnostic::at(span, "Cannot compare string values"));
                    }
                    if operand_type.is_void() {
                        return Err(Diagnostic::at(span, "Cannot compare void values"));
                    }
                    Type::bool()
                } else {
                    if operand_type != Type::i32() {
                        return Err(Diagnostic::at(
                            span,
                            format!("Operator {} expects i32 operands, got {}", op.symbol(), operand_type)));
                    }
                    operand_type
                }
            }

            ExprKind::UnOp(op, operand) => {
                let operand_type = self.check_operand(operand, env)?;
                let expected = match op {
                    UnOp::Neg | UnOp::BitNot => Type::i32(),
                    UnOp::Not => Type::bool(),
                };
                if operand_type != expected {
                    return Err(Diagnostic::at(
                        span,
                        format!("Operator {} expects a {} operand, got {}", op.symbol(), expected, operand_type)));
                }
                expected
            }

            ExprKind::Call(name, args) if name.as_str() == SYSCALL => {
                if args.len() > SYSCALL_MAX_ARGS {
                    return Err(Diagnostic::at(span, "syscall takes at most 6 arguments"));
                }
                for arg in args.iter_mut() {
                    self.check_operand(arg, env)?;
                }
                Type::i32()
            }

            ExprKind::Call(name, args) => {
                let signature = match self.signatures.get(name.as_str()) {
                    Some(signature) => signature,
                    None => return Err(Diagnostic::at(span, "Unknown function")),
                };
                if signature.arguments.len() != args.len() {
                    return Err(Diagnostic::at(
                        span,
                        format!(
                            "Incorrect number of arguments, {} requires {}, {} given",
                            name, signature.arguments.len(), args.len())));
                }
                for (arg, arg_type) in args.iter_mut().zip(signature.arguments.iter()) {
                    let ty = self.check_expression(arg, env)?;
                    decay(arg, &ty);
                    if !ty.unref_eq(arg_type) {
                        return Err(error_at_exp(
                            arg,
                            &format!("Type mismatch, expected {} got {}", arg_type, ty.remove_reference())));
                    }
                }
                signature.return_type.clone()
            }

            ExprKind::Variable(name) => {
                match env.find_variable(name) {
                    Some(var) => var.ty.add_reference(),
                    None => return Err(Diagnostic::at(span, "Unknown variable")),
                }
            }

            ExprKind::Declaration(var) => {
                check_value_type(var, span)?;
                // arguments share the function's namespace
                if env.find_variable(&var.name).is_some() {
                    return Err(Diagnostic::at(span, "Variable already declared"));
                }
                env.scope.variables.push(var.clone());
                var.ty.add_reference()
            }

            ExprKind::Assignment(lhs, rhs) => {
                let rhs_type = self.check_expression(rhs, env)?;
                let lhs_type = self.check_expression(lhs, env)?;
                if !lhs_type.reference {
                    return Err(error_at_exp(lhs, "Left hand side is not a reference"));
                }
                if !lhs_type.unref_eq(&rhs_type) {
                    return Err(Diagnostic::at(span, "Both sides are not the same type"));
                }
                decay(rhs, &rhs_type);
                lhs_type
            }

            ExprKind::Cast(inner) => {
                let inner_type = self.check_expression(inner, env)?;
                inner_type.remove_reference()
            }
        };

        expression.value_type = Some(ty.clone());
        Ok(ty)
    }
}

/// Type checks every function, filling in `value_type` on each expression,
/// collecting locals into each function's scope and inserting the casts that
/// turn references into values.
pub fn check(mut program: Program) -> Result<Program, Diagnostic> {
    let checker = TypeChecker::new(&program);
    let file_name = program.file_name.clone();
    for function in program.functions.iter_mut() {
        checker.check_function(function)
            .map_err(|e| e.in_file(file_name.as_deref()))?;
    }
    debug!(functions = program.functions.len(), "type checked program");
    Ok(program)
}
