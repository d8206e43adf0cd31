//! Tree-walking evaluator over a type checked program.

use std::collections::HashMap;
use std::fmt;
use std::io::prelude::Write;
use std::thread;

use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::*;
use crate::typing::SYSCALL;


pub const MAX_CALL_DEPTH: usize = 512;
/// Stack given to the evaluator thread; room for `MAX_CALL_DEPTH` nested
/// calls in an unoptimised build.
pub const EVAL_STACK_SIZE: usize = MAX_CALL_DEPTH * 64 * 1024;

const SYS_EXIT: i32 = 1;
const SYS_WRITE: i32 = 4;
const STDOUT: i32 = 1;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("main not found")]
    NoMain,
    #[error("no return statement reached in {0}")]
    NoReturn(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("{name} takes {expected} arguments, {given} given")]
    ArgumentCount { name: String, expected: usize, given: usize },
    #[error("unknown variable {0}")]
    UnknownVariable(String),
    #[error("left hand side is not a reference")]
    NotAReference,
    #[error("dont know how to convert {from} to {to}")]
    InvalidCast { from: Type, to: Type },
    #[error("cannot compare {0} with {1}")]
    Incomparable(Value, Value),
    #[error("operator {op} is not defined for {lhs}")]
    UnsupportedOperands { op: &'static str, lhs: Value },
    #[error("unsupported syscall {0}")]
    UnsupportedSyscall(i32),
    #[error("write to unsupported file descriptor {0}")]
    UnsupportedDescriptor(i32),
    #[error("malformed arguments to syscall")]
    SyscallArguments,
    #[error("write of {len} bytes from a string of {size}")]
    WriteOutOfBounds { len: i32, size: usize },
    #[error("unknown builtin {0}")]
    UnknownBuiltin(String),
    #[error("call depth exceeded {}", MAX_CALL_DEPTH)]
    CallDepthExceeded,
    #[error("{0} is not a valid result")]
    InvalidResult(Value),
    #[error("expression without a type: {0}")]
    Untyped(String),
    #[error("evaluator thread panicked")]
    Panicked,
    #[error("program exited with status {0}")]
    Exit(i32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, EvalError>;

/// Index of a value in the arena of the frame that created it.
pub type Slot = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Bool(bool),
    Int(i32),
    Str(String),
    Ref(Slot),
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub ty: Type,
    pub data: Data,
}

impl Value {
    pub fn int(i: i32) -> Value {
        Value { ty: Type::i32(), data: Data::Int(i) }
    }

    pub fn boolean(b: bool) -> Value {
        Value { ty: Type::bool(), data: Data::Bool(b) }
    }

    pub fn string(s: &str) -> Value {
        Value { ty: Type::string(), data: Data::Str(s.to_string()) }
    }

    pub fn void() -> Value {
        Value { ty: Type::void(), data: Data::Void }
    }

    /// The value a fresh declaration of type `ty` holds.
    fn zero(ty: &Type) -> Value {
        let data = match ty.name.as_str() {
            "i32" => Data::Int(0),
            "bool" => Data::Bool(false),
            "string" => Data::Str(String::new()),
            _ => Data::Void,
        };
        Value { ty: ty.remove_reference(), data }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Data::Bool(b) => write!(f, "{}", b),
            Data::Int(i) => write!(f, "{}", i),
            Data::Str(s) => write!(f, "{:?}", s),
            Data::Ref(slot) => write!(f, "<{} at slot {}>", self.ty, slot),
            Data::Void => write!(f, "void"),
        }
    }
}

/// Storage of one function call. References handed out by declarations and
/// variable reads are slots into `values` and die with the frame.
#[derive(Default)]
struct Frame {
    values: Vec<Value>,
    names: HashMap<String, Slot>,
}

impl Frame {
    fn declare(&mut self, name: &str, value: Value) -> Slot {
        match self.names.get(name) {
            Some(&slot) => {
                self.values[slot] = value;
                slot
            }
            None => {
                self.values.push(value);
                let slot = self.values.len() - 1;
                self.names.insert(name.to_string(), slot);
                slot
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Slot> {
        self.names.get(name).copied().ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }

    fn load(&self, slot: Slot) -> &Value {
        &self.values[slot]
    }

    fn store(&mut self, slot: Slot, data: Data) {
        self.values[slot].data = data;
    }

    /// Loads through `value` if it is a reference.
    fn value_of(&self, value: Value) -> Value {
        match value.data {
            Data::Ref(slot) => self.load(slot).clone(),
            _ => value,
        }
    }
}

fn expect_bool(value: &Value) -> Result<bool> {
    match value.data {
        Data::Bool(b) => Ok(b),
        _ => Err(EvalError::InvalidCast { from: value.ty.clone(), to: Type::bool() }),
    }
}

fn int_arg(args: &[Value], idx: usize) -> Result<i32> {
    match args.get(idx).map(|v| &v.data) {
        Some(Data::Int(i)) => Ok(*i),
        _ => Err(EvalError::SyscallArguments),
    }
}

fn eval_binop(op: BinOp, lhs: Value, rhs: Value) -> Result<Value> {
    if op.is_comparison() {
        let equal = match (&lhs.data, &rhs.data) {
            (Data::Int(a), Data::Int(b)) => a == b,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Str(a), Data::Str(b)) => a == b,
            _ => return Err(EvalError::Incomparable(lhs, rhs)),
        };
        return Ok(Value::boolean(if op == BinOp::Eq { equal } else { !equal }));
    }

    match (&lhs.data, &rhs.data) {
        (Data::Int(a), Data::Int(b)) => Ok(Value::int(match op {
            BinOp::Plus => a.wrapping_add(*b),
            BinOp::Minus => a.wrapping_sub(*b),
            _ => a.wrapping_mul(*b),
        })),
        _ => Err(EvalError::UnsupportedOperands { op: op.symbol(), lhs }),
    }
}

fn eval_unop(op: UnOp, operand: Value) -> Result<Value> {
    match (op, &operand.data) {
        (UnOp::Neg, Data::Int(i)) => Ok(Value::int(i.wrapping_neg())),
        (UnOp::BitNot, Data::Int(i)) => Ok(Value::int(!i)),
        (UnOp::Not, Data::Bool(b)) => Ok(Value::boolean(!b)),
        _ => Err(EvalError::UnsupportedOperands { op: op.symbol(), lhs: operand }),
    }
}

pub struct Evaluator<'p, W: Write> {
    program: &'p Program,
    out: W,
    depth: usize,
}

impl<'p, W: Write> Evaluator<'p, W> {
    /// `out` receives everything the program prints.
    pub fn new(program: &'p Program, out: W) -> Evaluator<'p, W> {
        Evaluator { program, out, depth: 0 }
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Calls `main` and returns its result as a process status. An exit
    /// syscall ends the run early with its status.
    pub fn run(&mut self) -> Result<i32> {
        if self.program.function("main").is_none() {
            return Err(EvalError::NoMain);
        }
        let result = self.call("main", Vec::new());
        self.out.flush()?;
        let result = match result {
            Ok(value) => value,
            Err(EvalError::Exit(status)) => {
                debug!(status, "program exited");
                return Ok(status);
            }
            Err(e) => return Err(e),
        };
        debug!(result = %result, "evaluated main");
        match result.data {
            Data::Int(i) => Ok(i),
            Data::Bool(b) => Ok(b as i32),
            _ => Err(EvalError::InvalidResult(result)),
        }
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        if name == SYSCALL {
            return self.syscall(&args);
        }
        let program = self.program;
        let function = program.function(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if function.arguments.len() != args.len() {
            return Err(EvalError::ArgumentCount {
                name: name.to_string(),
                expected: function.arguments.len(),
                given: args.len(),
            });
        }
        if function.builtin {
            self.builtin(function, &args)
        } else {
            self.eval_function(function, args)
        }
    }

    pub fn eval_function(&mut self, function: &Function, args: Vec<Value>) -> Result<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::CallDepthExceeded);
        }
        self.depth += 1;
        trace!(function = %function.name, depth = self.depth, "call");
        let result = self.eval_body(function, args);
        self.depth -= 1;
        result
    }

    fn eval_body(&mut self, function: &Function, args: Vec<Value>) -> Result<Value> {
        let mut frame = Frame::default();
        for (arg, value) in function.arguments.iter().zip(args) {
            frame.declare(&arg.name, value);
        }
        if let Some(value) = self.eval_block(&function.statements, &mut frame)? {
            return Ok(value);
        }
        if function.return_type.is_void() {
            Ok(Value::void())
        } else {
            Err(EvalError::NoReturn(function.name.clone()))
        }
    }

    fn builtin(&mut self, function: &Function, args: &[Value]) -> Result<Value> {
        match (function.name.as_str(), args) {
            ("print", [value]) => {
                writeln!(self.out, "{}", value)?;
                Ok(Value::void())
            }
            _ => Err(EvalError::UnknownBuiltin(function.name.clone())),
        }
    }

    fn syscall(&mut self, args: &[Value]) -> Result<Value> {
        match int_arg(args, 0)? {
            SYS_EXIT => Err(EvalError::Exit(int_arg(args, 1)?)),
            SYS_WRITE => {
                let fd = int_arg(args, 1)?;
                let len = int_arg(args, 3)?;
                let buf = match args.get(2).map(|v| &v.data) {
                    Some(Data::Str(s)) => s.as_bytes(),
                    _ => return Err(EvalError::SyscallArguments),
                };
                if fd != STDOUT {
                    return Err(EvalError::UnsupportedDescriptor(fd));
                }
                if len < 0 || len as usize > buf.len() {
                    return Err(EvalError::WriteOutOfBounds { len, size: buf.len() });
                }
                self.out.write_all(&buf[..len as usize])?;
                Ok(Value::int(len))
            }
            number => Err(EvalError::UnsupportedSyscall(number)),
        }
    }

    fn eval_block(&mut self, stmts: &[Stmt], frame: &mut Frame) -> Result<Option<Value>> {
        for stmt in stmts {
            if let Some(value) = self.eval_statement(stmt, frame)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Returns `Some` once a `return` has been executed.
    fn eval_statement(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Option<Value>> {
        match &stmt.kind {
            StmtKind::Return(None) => Ok(Some(Value::void())),
            StmtKind::Return(Some(e)) => {
                let value = self.eval_expression(e, frame)?;
                Ok(Some(frame.value_of(value)))
            }
            StmtKind::Expression(e) => {
                self.eval_expression(e, frame)?;
                Ok(None)
            }
            StmtKind::If { cond, body, else_branch } => {
                let value = self.eval_expression(cond, frame)?;
                if expect_bool(&value)? {
                    self.eval_block(body, frame)
                } else if let Some(else_branch) = else_branch {
                    self.eval_statement(else_branch, frame)
                } else {
                    Ok(None)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    let value = self.eval_expression(cond, frame)?;
                    if !expect_bool(&value)? {
                        return Ok(None);
                    }
                    if let Some(value) = self.eval_block(body, frame)? {
                        return Ok(Some(value));
                    }
                }
            }
            StmtKind::Else(children) => self.eval_block(children, frame),
        }
    }

    fn eval_expression(&mut self, e: &Expr, frame: &mut Frame) -> Result<Value> {
        let ty = match &e.value_type {
            Some(ty) => ty.clone(),
            None => return Err(EvalError::Untyped(e.to_string())),
        };
        match &e.kind {
            ExprKind::Literal(literal) => {
                let data = match literal {
                    Literal::Bool(b) => Data::Bool(*b),
                    Literal::Int(i) => Data::Int(*i),
                    Literal::Str(s) => Data::Str(s.clone()),
                };
                Ok(Value { ty, data })
            }
            ExprKind::BinOp(op, l, r) => {
                let lhs = self.eval_expression(l, frame)?;
                let rhs = self.eval_expression(r, frame)?;
                eval_binop(*op, lhs, rhs)
            }
            ExprKind::UnOp(op, operand) => {
                let operand = self.eval_expression(operand, frame)?;
                eval_unop(*op, operand)
            }
            ExprKind::Declaration(var) => {
                let slot = frame.declare(&var.name, Value::zero(&var.ty));
                Ok(Value { ty, data: Data::Ref(slot) })
            }
            ExprKind::Variable(name) => {
                let slot = frame.lookup(name)?;
                Ok(Value { ty, data: Data::Ref(slot) })
            }
            ExprKind::Assignment(lhs, rhs) => {
                let rhs = self.eval_expression(rhs, frame)?;
                let rhs = frame.value_of(rhs);
                let lhs = self.eval_expression(lhs, frame)?;
                match lhs.data {
                    Data::Ref(slot) => {
                        frame.store(slot, rhs.data);
                        Ok(lhs)
                    }
                    _ => Err(EvalError::NotAReference),
                }
            }
            ExprKind::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.eval_expression(arg, frame)?;
                    values.push(frame.value_of(value));
                }
                self.call(name, values)
            }
            ExprKind::Cast(inner) => {
                let value = self.eval_expression(inner, frame)?;
                match value.data {
                    Data::Ref(slot) if !ty.reference && value.ty.unref_eq(&ty) => {
                        Ok(Value { ty, data: frame.load(slot).data.clone() })
                    }
                    _ => Err(EvalError::InvalidCast { from: value.ty, to: ty }),
                }
            }
        }
    }
}

/// Runs `main` of a checked program on a thread with `EVAL_STACK_SIZE` of
/// stack, so `MAX_CALL_DEPTH` is reached before the stack runs out.
pub fn eval<W: Write + Send + 'static>(program: Program, out: W) -> Result<i32> {
    let handle = thread::Builder::new()
        .name("slate-eval".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || Evaluator::new(&program, out).run())?;
    handle.join().unwrap_or(Err(EvalError::Panicked))
}


#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::ast::Program;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typing::check;
    use super::{Data, EvalError, Evaluator, Value, eval};

    fn checked(source: &str) -> Program {
        check(parse(&lex(source), None).unwrap()).unwrap()
    }

    fn run(source: &str) -> i32 {
        let program = checked(source);
        Evaluator::new(&program, Vec::new()).run().unwrap()
    }

    fn run_main(body: &str) -> i32 {
        run(&format!("i32 main() {{ {} }}", body))
    }

    fn output(source: &str) -> (i32, String) {
        let program = checked(source);
        let mut evaluator = Evaluator::new(&program, Vec::new());
        let status = evaluator.run().unwrap();
        (status, String::from_utf8(evaluator.into_output()).unwrap())
    }

    #[test]
    fn if_false() {
        assert_eq!(run_main("if (false) { return 1; } return 2;"), 2);
    }

    #[test]
    fn while_loop() {
        assert_eq!(run_main("var x: i32 = 1; while (x != 5) { x = x + 1; } return x;"), 5);
    }

    #[test]
    fn comparisons() {
        let program = checked("bool t() { return 1 == 1; } bool f() { return 1 == 2; }");
        let mut evaluator = Evaluator::new(&program, Vec::new());
        assert_eq!(evaluator.call("t", vec![]).unwrap(), Value::boolean(true));
        assert_eq!(evaluator.call("f", vec![]).unwrap(), Value::boolean(false));
        assert_eq!(run("bool main() { return 3 != 4; }"), 1);
    }

    #[test]
    fn else_if_chain() {
        let source = "\
i32 pick(n: i32) {
    if (n == 0) { return 10; } else if (n == 1) { return 11; } else { return 12; }
}
i32 main() { return pick(0) + pick(1) * 100 + pick(7) * 10000; }";
        assert_eq!(run(source), 10 + 1100 + 120000);
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(run_main("return 2147483647 + 1;"), i32::MIN);
        assert_eq!(run_main("return 3 - 10 * 2;"), -17);
        assert_eq!(run_main("return -(~5);"), 6);
        assert_eq!(run_main("var b: bool = !(1 == 2); if (b == true) { return 1; } return 0;"), 1);
    }

    #[test]
    fn recursion() {
        let source = "\
i32 fib(n: i32) {
    if (n == 0) { return 0; }
    if (n == 1) { return 1; }
    return fib(n - 1) + fib(n - 2);
}
i32 main() { return fib(15); }";
        assert_eq!(run(source), 610);
    }

    #[test]
    fn assignment_is_a_reference() {
        assert_eq!(run_main("var x: i32; var y: i32; x = y = 4; return x + y;"), 8);
    }

    #[test]
    fn loop_declaration_is_reset() {
        let source = "\
var i: i32 = 0;
var total: i32 = 0;
while (i != 3) {
    var fresh: i32;
    total = total + fresh;
    fresh = 5;
    i = i + 1;
}
return total;";
        assert_eq!(run_main(source), 0);
    }

    #[test]
    fn print_builtin() {
        let (status, out) = output("\
builtin void print(value: i32);
i32 main() { print(42); print(-7); return 0; }");
        assert_eq!(status, 0);
        assert_eq!(out, "42\n-7\n");
    }

    #[test]
    fn write_and_exit_syscalls() {
        let (status, out) = output("\
i32 main() {
    var s: string = \"hello world\";
    syscall(4, 1, s, 5);
    syscall(1, 3);
    return 0;
}");
        assert_eq!(status, 3);
        assert_eq!(out, "hello");
    }

    #[test]
    fn void_functions() {
        let source = "\
void nothing(n: i32) { if (n == 0) { return; } }
i32 main() { nothing(0); nothing(1); return 9; }";
        assert_eq!(run(source), 9);
    }

    #[test]
    fn missing_return() {
        let program = checked("i32 main() { if (false) { return 1; } }");
        let err = Evaluator::new(&program, Vec::new()).run().unwrap_err();
        assert_eq!(err.to_string(), "no return statement reached in main");
    }

    #[test]
    fn no_main() {
        let program = checked("i32 other() { return 1; }");
        assert!(matches!(Evaluator::new(&program, Vec::new()).run(), Err(EvalError::NoMain)));
    }

    #[test]
    fn unknown_builtin() {
        let program = checked("builtin i32 launch(); i32 main() { return launch(); }");
        let err = Evaluator::new(&program, Vec::new()).run().unwrap_err();
        assert_eq!(err.to_string(), "unknown builtin launch");
    }

    #[test]
    fn unsupported_syscall() {
        let program = checked("i32 main() { return syscall(20); }");
        assert!(matches!(
            Evaluator::new(&program, Vec::new()).run(),
            Err(EvalError::UnsupportedSyscall(20))));
    }

    #[test]
    fn call_depth_is_bounded() {
        let program = checked("i32 down(n: i32) { return down(n + 1); } i32 main() { return down(0); }");
        let err = eval(program, Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "call depth exceeded 512");
    }

    #[test]
    fn deep_recursion_below_the_bound() {
        let program = checked("\
i32 down(n: i32) { if (n == 0) { return 0; } return down(n - 1) + 1; }
i32 main() { return down(500); }");
        assert_eq!(eval(program, Vec::new()).unwrap(), 500);
    }

    #[test]
    fn write_past_the_string() {
        let program = checked("i32 main() { return syscall(4, 1, \"hi\", 10); }");
        assert!(matches!(
            Evaluator::new(&program, Vec::new()).run(),
            Err(EvalError::WriteOutOfBounds { len: 10, size: 2 })));
        let program = checked("i32 main() { return syscall(4, 1, \"hi\", -1); }");
        assert!(matches!(
            Evaluator::new(&program, Vec::new()).run(),
            Err(EvalError::WriteOutOfBounds { len: -1, size: 2 })));
    }

    #[test]
    fn call_with_arguments() {
        let program = checked("i32 add(a: i32, b: i32) { return a + b; }");
        let mut evaluator = Evaluator::new(&program, Vec::new());
        assert_eq!(evaluator.call("add", vec![Value::int(2), Value::int(3)]).unwrap().data, Data::Int(5));
        assert!(matches!(
            evaluator.call("add", vec![Value::int(2)]),
            Err(EvalError::ArgumentCount { expected: 2, given: 1, .. })));
        assert!(matches!(evaluator.call("sub", vec![]), Err(EvalError::UnknownFunction(_))));
    }
}
