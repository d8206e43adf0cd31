//! 32-bit x86 code generation, NASM syntax, Linux `int 0x80` ABI.
//!
//! Every expression leaves its result in `eax`. Booleans are kept as 0/1 in
//! the whole register so both `cmp al, 1` and full-width comparisons work.
//! Expressions of reference type leave an address in `eax` instead.

use std::collections::HashMap;
use std::io::prelude::Write;

use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::*;
use crate::typing::{SYSCALL, SYSCALL_MAX_ARGS};


#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("unknown builtin {0}")]
    UnknownBuiltin(String),
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("expression without a type: {0}")]
    UntypedExpression(String),
    #[error("unhandled cast between {to} and {from}")]
    UnhandledCast { from: Type, to: Type },
    #[error("syscall takes at most 6 arguments, {0} given")]
    TooManySyscallArgs(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, CodegenError>;

const SYSCALL_REGISTERS: [&str; SYSCALL_MAX_ARGS] = ["eax", "ebx", "ecx", "edx", "esi", "edi"];

const PRINT_BUILTIN: &str = "\
push ebp
mov ebp, esp
push ebx
push esi
push edi
sub esp, 16 ; digits, sign and newline
mov eax, [ebp + 8]
mov edi, eax ; keep the sign
lea ecx, [esp + 16]
dec ecx
mov byte [ecx], 10
mov ebx, 1 ; byte count
test eax, eax
jns .digit
neg eax
.digit:
xor edx, edx
mov esi, 10
div esi
add dl, '0'
dec ecx
mov [ecx], dl
inc ebx
test eax, eax
jnz .digit
test edi, edi
jns .write
dec ecx
mov byte [ecx], '-'
inc ebx
.write:
mov eax, 4 ; write
mov edx, ebx
mov ebx, 1 ; stdout
int 0x80
add esp, 16
pop edi
pop esi
pop ebx
pop ebp
ret
";

struct ProgramEnv {
    strings: Vec<String>,
}

struct FunctionEnv<'a> {
    program_env: &'a mut ProgramEnv,
    function: &'a Function,
    // ebp-relative offsets of arguments and of the locals declared so far
    offsets: HashMap<String, i32>,
    slot_counter: i32,
    label_counter: u32,
}

impl ProgramEnv {
    fn new() -> ProgramEnv {
        ProgramEnv { strings: Vec::new() }
    }

    fn frame<'a>(&'a mut self, function: &'a Function) -> FunctionEnv<'a> {
        let argc = function.arguments.len();
        let offsets = function.arguments.iter()
            .enumerate()
            .map(|(i, arg)| (arg.name.clone(), arg_offset_to_ebp(argc, i)))
            .collect();
        FunctionEnv {
            program_env: self,
            function,
            offsets,
            slot_counter: 0,
            label_counter: 0,
        }
    }
}

impl<'a> FunctionEnv<'a> {
    fn next_label(&mut self, construct: &str) -> String {
        let i = self.label_counter;
        self.label_counter += 1;
        format!("{}_{}_{}", self.function.name, construct, i)
    }

    /// Gives `name` the next free local slot and returns its offset.
    fn declare(&mut self, name: &str) -> i32 {
        self.slot_counter += 1;
        let offset = -4 * self.slot_counter;
        self.offsets.insert(name.to_string(), offset);
        offset
    }

    fn intern(&mut self, s: &str) -> usize {
        self.program_env.strings.push(s.to_string());
        self.program_env.strings.len() - 1
    }

    fn has_frame(&self) -> bool {
        !self.function.arguments.is_empty() || !self.function.scope.variables.is_empty()
    }
}

fn arg_offset_to_ebp(argc: usize, idx: usize) -> i32 {
    4 * (argc - idx - 1 + 2) as i32
}

fn address(offset: i32) -> String {
    if offset < 0 {
        format!("[ebp - {}]", -offset)
    } else {
        format!("[ebp + {}]", offset)
    }
}

fn value_type(e: &Expr) -> Result<&Type> {
    e.value_type.as_ref().ok_or_else(|| CodegenError::UntypedExpression(e.to_string()))
}

fn write_return_x86(env: &FunctionEnv, w: &mut dyn Write) -> Result<()> {
    if env.has_frame() {
        w.write_all(b"mov esp, ebp\n")?;
        w.write_all(b"pop ebp\n")?;
    }
    w.write_all(b"ret\n")?;
    Ok(())
}

fn write_call_x86(name: &str, args: &[Expr], env: &mut FunctionEnv, w: &mut dyn Write) -> Result<()> {
    if name == SYSCALL && args.len() > SYSCALL_MAX_ARGS {
        return Err(CodegenError::TooManySyscallArgs(args.len()));
    }
    for arg in args {
        write_expr_x86(arg, env, w)?;
        w.write_all(b"push eax\n")?;
    }

    if name == SYSCALL {
        for register in SYSCALL_REGISTERS[..args.len()].iter().rev() {
            writeln!(w, "pop {}", register)?;
        }
        w.write_all(b"int 0x80\n")?;
    } else {
        writeln!(w, "call {}", name)?;
        if !args.is_empty() {
            writeln!(w, "add esp, {}", 4 * args.len())?;
        }
    }
    Ok(())
}

fn write_binop_x86(op: BinOp, l: &Expr, r: &Expr, env: &mut FunctionEnv, w: &mut dyn Write) -> Result<()> {
    write_expr_x86(l, env, w)?;
    w.write_all(b"push eax\n")?;
    write_expr_x86(r, env, w)?;
    w.write_all(b"pop ecx\n")?;
    // lhs in ecx, rhs in eax
    match op {
        BinOp::Plus => w.write_all(b"add eax, ecx\n")?,
        BinOp::Minus => {
            w.write_all(b"sub ecx, eax\n")?;
            w.write_all(b"mov eax, ecx\n")?;
        }
        BinOp::Times => w.write_all(b"imul eax, ecx\n")?,
        BinOp::Eq | BinOp::NotEq => {
            w.write_all(b"cmp ecx, eax\n")?;
            let set = if op == BinOp::Eq { "sete" } else { "setne" };
            writeln!(w, "{} al", set)?;
            w.write_all(b"movzx eax, al\n")?;
        }
    }
    Ok(())
}

fn write_expr_x86(e: &Expr, env: &mut FunctionEnv, w: &mut dyn Write) -> Result<()> {
    let ty = value_type(e)?;
    match &e.kind {
        ExprKind::Literal(Literal::Int(i)) => writeln!(w, "mov eax, {}", i)?,
        ExprKind::Literal(Literal::Bool(b)) => writeln!(w, "mov eax, {}", *b as i32)?,
        ExprKind::Literal(Literal::Str(s)) => {
            let idx = env.intern(s);
            writeln!(w, "mov eax, data_{}", idx)?;
        }
        ExprKind::BinOp(op, l, r) => write_binop_x86(*op, l, r, env, w)?,
        ExprKind::UnOp(op, operand) => {
            write_expr_x86(operand, env, w)?;
            match op {
                UnOp::Neg => w.write_all(b"neg eax\n")?,
                UnOp::BitNot => w.write_all(b"not eax\n")?,
                UnOp::Not => {
                    w.write_all(b"cmp eax, 0\n")?;
                    w.write_all(b"sete al\n")?;
                    w.write_all(b"movzx eax, al\n")?;
                }
            }
        }
        ExprKind::Declaration(var) => {
            let slot = address(env.declare(&var.name));
            writeln!(w, "mov dword {}, 0", slot)?;
            writeln!(w, "lea eax, {}", slot)?;
        }
        ExprKind::Variable(name) => {
            let offset = match env.offsets.get(name) {
                Some(offset) => *offset,
                None => return Err(CodegenError::UnknownVariable(name.clone())),
            };
            writeln!(w, "lea eax, {}", address(offset))?;
        }
        ExprKind::Assignment(lhs, rhs) => {
            write_expr_x86(rhs, env, w)?;
            w.write_all(b"push eax\n")?;
            write_expr_x86(lhs, env, w)?;
            w.write_all(b"pop ecx\n")?;
            // eax keeps the address, the assignment is itself a reference
            w.write_all(b"mov [eax], ecx\n")?;
        }
        ExprKind::Call(name, args) => write_call_x86(name, args, env, w)?,
        ExprKind::Cast(inner) => {
            let from = value_type(inner)?;
            if ty.reference || !from.reference {
                return Err(CodegenError::UnhandledCast { from: from.clone(), to: ty.clone() });
            }
            write_expr_x86(inner, env, w)?;
            w.write_all(b"mov eax, [eax]\n")?;
        }
    }
    Ok(())
}

fn write_statement_x86(s: &Stmt, env: &mut FunctionEnv, w: &mut dyn Write) -> Result<()> {
    match &s.kind {
        StmtKind::Expression(e) => write_expr_x86(e, env, w)?,
        StmtKind::Return(value) => {
            if let Some(value) = value {
                write_expr_x86(value, env, w)?;
            }
            write_return_x86(env, w)?;
        }
        StmtKind::If { cond, body, else_branch } => {
            write_expr_x86(cond, env, w)?;
            let end_label = env.next_label("if_end");
            let else_label = env.next_label("if_else");
            w.write_all(b"cmp al, 1\n")?;
            let target = if else_branch.is_some() { &else_label } else { &end_label };
            writeln!(w, "jne {}", target)?;
            for child in body {
                write_statement_x86(child, env, w)?;
            }
            if let Some(else_branch) = else_branch {
                writeln!(w, "jmp {}", end_label)?;
                writeln!(w, "{}:", else_label)?;
                write_statement_x86(else_branch, env, w)?;
            }
            writeln!(w, "{}:", end_label)?;
        }
        StmtKind::While { cond, body } => {
            let start_label = env.next_label("while_start");
            let end_label = env.next_label("while_end");
            writeln!(w, "{}:", start_label)?;
            write_expr_x86(cond, env, w)?;
            w.write_all(b"cmp al, 1\n")?;
            writeln!(w, "jne {}", end_label)?;
            for child in body {
                write_statement_x86(child, env, w)?;
            }
            writeln!(w, "jmp {}", start_label)?;
            writeln!(w, "{}:", end_label)?;
        }
        StmtKind::Else(children) => {
            for child in children {
                write_statement_x86(child, env, w)?;
            }
        }
    }
    Ok(())
}

fn write_function_x86(f: &Function, env: &mut ProgramEnv, w: &mut dyn Write) -> Result<()> {
    writeln!(w, "\n{}:", f.name)?;
    if f.builtin {
        return match f.name.as_str() {
            "print" => Ok(w.write_all(PRINT_BUILTIN.as_bytes())?),
            _ => Err(CodegenError::UnknownBuiltin(f.name.clone())),
        };
    }

    let mut inner_env = env.frame(f);
    trace!(function = %f.name, locals = f.scope.variables.len(), "emitting function");
    if inner_env.has_frame() {
        w.write_all(b"push ebp\n")?;
        w.write_all(b"mov ebp, esp\n")?;
        if !f.scope.variables.is_empty() {
            writeln!(w, "sub esp, {}", 4 * f.scope.variables.len())?;
        }
    }
    for s in &f.statements {
        write_statement_x86(s, &mut inner_env, w)?;
    }
    match f.statements.last() {
        Some(Stmt { kind: StmtKind::Return(_), .. }) => Ok(()),
        _ => write_return_x86(&inner_env, w),
    }
}

fn write_data_x86(idx: usize, s: &str, w: &mut dyn Write) -> Result<()> {
    let printable = s.bytes().all(|b| (b' '..=b'~').contains(&b) && b != b'"');
    if s.is_empty() {
        writeln!(w, "data_{}: db 0", idx)?;
    } else if printable {
        writeln!(w, "data_{}: db \"{}\", 0", idx, s)?;
    } else {
        let bytes: Vec<String> = s.bytes().map(|b| b.to_string()).collect();
        writeln!(w, "data_{}: db {}, 0", idx, bytes.join(", "))?;
    }
    Ok(())
}

/// Writes the whole program as NASM source. When `main` is present an
/// `_start` entry point exits the process with its result.
pub fn write_x86(p: &Program, w: &mut dyn Write) -> Result<()> {
    if p.function("main").is_some() {
        w.write_all(b"global _start

section .text
_start:
call main
mov ebx, eax
mov eax, 1 ; exit
int 0x80
")?;
    } else {
        w.write_all(b"section .text\n")?;
    }

    let mut env = ProgramEnv::new();
    for f in &p.functions {
        write_function_x86(f, &mut env, w)?;
    }

    w.write_all(b"\nsection .data\n")?;
    for (idx, s) in env.strings.iter().enumerate() {
        write_data_x86(idx, s, w)?;
    }
    debug!(functions = p.functions.len(), strings = env.strings.len(), "generated assembly");
    Ok(())
}

pub fn compile_to_string(p: &Program) -> Result<String> {
    let mut buf = Vec::new();
    write_x86(p, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}


#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::ast::Program;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typing::check;
    use super::{CodegenError, compile_to_string};

    fn checked(source: &str) -> Program {
        check(parse(&lex(source), None).unwrap()).unwrap()
    }

    fn compile(source: &str) -> String {
        compile_to_string(&checked(source)).unwrap()
    }

    #[test]
    fn minimal_program() {
        assert_eq!(compile("i32 main() { return 2; }"), "\
global _start

section .text
_start:
call main
mov ebx, eax
mov eax, 1 ; exit
int 0x80

main:
mov eax, 2
ret

section .data
");
    }

    #[test]
    fn no_entry_without_main() {
        let asm = compile("i32 two() { return 2; }");
        assert!(asm.starts_with("section .text\n\ntwo:\n"));
        assert!(!asm.contains("_start"));
    }

    #[test]
    fn locals_and_arguments() {
        let asm = compile("i32 f(a: i32, b: i32) { var x: i32 = a; return x - b; }");
        assert_eq!(asm, "\
section .text

f:
push ebp
mov ebp, esp
sub esp, 4
lea eax, [ebp + 12]
mov eax, [eax]
push eax
mov dword [ebp - 4], 0
lea eax, [ebp - 4]
pop ecx
mov [eax], ecx
lea eax, [ebp - 4]
mov eax, [eax]
push eax
lea eax, [ebp + 8]
mov eax, [eax]
pop ecx
sub ecx, eax
mov eax, ecx
mov esp, ebp
pop ebp
ret

section .data
");
    }

    #[test]
    fn if_else_labels() {
        let asm = compile("i32 main() { if (false) { return 1; } else { return 3; } return 2; }");
        assert!(asm.contains("\
mov eax, 0
cmp al, 1
jne main_if_else_1
mov eax, 1
ret
jmp main_if_end_0
main_if_else_1:
mov eax, 3
ret
main_if_end_0:
mov eax, 2
ret
"));
    }

    #[test]
    fn while_labels() {
        let asm = compile("i32 main() { var x: i32 = 1; while (x != 5) { x = x + 1; } return x; }");
        assert!(asm.contains("main_while_start_0:\n"));
        assert!(asm.contains("setne al\nmovzx eax, al\ncmp al, 1\njne main_while_end_1\n"));
        assert!(asm.contains("jmp main_while_start_0\nmain_while_end_1:\n"));
    }

    #[test]
    fn calls_clean_up_arguments() {
        let asm = compile("i32 id(n: i32) { return n; } i32 main() { return id(7); }");
        assert!(asm.contains("mov eax, 7\npush eax\ncall id\nadd esp, 4\n"));
    }

    #[test]
    fn syscall_registers() {
        let asm = compile("i32 main() { return syscall(1, 42); }");
        assert!(asm.contains("\
mov eax, 1
push eax
mov eax, 42
push eax
pop ebx
pop eax
int 0x80
"));
    }

    #[test]
    fn strings_go_to_data() {
        let asm = compile("\
i32 main() {
    syscall(4, 1, \"hi\", 2);
    syscall(4, 1, \"tab\there\", 8);
    syscall(4, 1, \"\", 0);
    return 0;
}");
        assert!(asm.contains("mov eax, data_0\n"));
        assert!(asm.contains("mov eax, data_2\n"));
        assert!(asm.ends_with("\
section .data
data_0: db \"hi\", 0
data_1: db 116, 97, 98, 9, 104, 101, 114, 101, 0
data_2: db 0
"));
    }

    #[test]
    fn print_builtin() {
        let asm = compile("builtin void print(value: i32); i32 main() { print(-3); return 0; }");
        assert!(asm.contains("\nprint:\npush ebp\n"));
        assert!(asm.contains("mov eax, 3\nneg eax\npush eax\ncall print\nadd esp, 4\n"));
    }

    #[test]
    fn unknown_builtin() {
        let program = checked("builtin void launch(n: i32); i32 main() { return 0; }");
        match compile_to_string(&program) {
            Err(CodegenError::UnknownBuiltin(name)) => assert_eq!(name, "launch"),
            other => panic!("expected unknown builtin, got {:?}", other),
        }
    }

    #[test]
    fn unary_and_bool_operators() {
        let asm = compile("bool f(b: bool, n: i32) { return !b == (~n == -n); }");
        assert!(asm.contains("lea eax, [ebp + 12]\nmov eax, [eax]\ncmp eax, 0\nsete al\nmovzx eax, al\n"));
        assert!(asm.contains("lea eax, [ebp + 8]\nmov eax, [eax]\nnot eax\n"));
        assert!(asm.contains("mov eax, [eax]\nneg eax\n"));
    }

    #[test]
    fn untyped_tree_is_rejected() {
        let program = parse(&lex("i32 main() { return 1; }"), None).unwrap();
        assert!(matches!(compile_to_string(&program), Err(CodegenError::UntypedExpression(_))));
    }
}
