//! LLVM-IR-emitting compiler backend.
//!
//! Lowers the AST to textual LLVM IR for an opaque-pointer, 64-bit
//! target. Scalars are `i64` / `double` / `i1`; lists are
//! `%list = type { i64, ptr }` pairs whose element slots are always
//! 64 bits wide, with floats bit-reinterpreted into the slot. List
//! operators lower to shared private helper functions that allocate a
//! fresh buffer per operation; buffers are never freed.
//!
//! The backend supports the statically-lowerable subset of the
//! language; everything else is a Lowering Error.

use std::collections::HashMap;

use crate::ast::{BinOp, Expr, ExprKind, FunctionDef, Program, Stmt, TypeName, UnaryOp};
use crate::builtins::Builtin;
use crate::error::{Diagnostic, ErrorKind};
use crate::span::Span;
use crate::token::LangConfig;

/// Lower a program to an LLVM IR module.
pub fn emit(file: &str, program: &Program, config: &LangConfig) -> Result<String, Diagnostic> {
    let mut cg = Codegen {
        file,
        config,
        globals: Vec::new(),
        interned: HashMap::new(),
        helpers: Vec::new(),
        functions: Vec::new(),
        fn_table: HashMap::new(),
    };

    let mut main = FnBuilder::new("main", Ty::Int);
    cg.lower_body(&program.body, &mut main)?;
    if !main.terminated {
        main.line("ret i64 0");
    }

    let mut module = String::new();
    module.push_str("; ModuleID = 'funlang'\n");
    module.push_str(&format!("source_filename = \"{file}\"\n\n"));
    module.push_str("%list = type { i64, ptr }\n\n");
    module.push_str("declare i32 @printf(ptr, ...)\n");
    module.push_str("declare double @pow(double, double)\n");
    module.push_str("declare ptr @malloc(i64)\n\n");
    for global in &cg.globals {
        module.push_str(global);
        module.push('\n');
    }
    if !cg.globals.is_empty() {
        module.push('\n');
    }
    for helper in &cg.helpers {
        module.push_str(helper);
        module.push('\n');
    }
    for function in &cg.functions {
        module.push_str(function);
        module.push('\n');
    }
    module.push_str(&main.finish());
    Ok(module)
}

/// Static type of a lowered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ty {
    Int,
    Float,
    Bool,
    Str,
    List(Elem),
}

/// Element kind of a lowered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Elem {
    Int,
    Float,
}

impl Ty {
    fn ll(self) -> &'static str {
        match self {
            Ty::Int => "i64",
            Ty::Float => "double",
            Ty::Bool => "i1",
            Ty::Str => "ptr",
            Ty::List(_) => "%list",
        }
    }

    /// The language-level type name used in diagnostics.
    fn label(self) -> &'static str {
        match self {
            Ty::Int | Ty::Bool => "int",
            Ty::Float => "float",
            Ty::Str => "string",
            Ty::List(_) => "list",
        }
    }

    fn zero(self) -> &'static str {
        match self {
            Ty::Int => "0",
            Ty::Float => "0x0000000000000000",
            Ty::Bool => "false",
            Ty::Str => "null",
            Ty::List(_) => "zeroinitializer",
        }
    }
}

/// A lowered value: an operand string (register or immediate) plus its
/// static type.
#[derive(Debug, Clone)]
struct Reg {
    name: String,
    ty: Ty,
}

impl Reg {
    fn new(name: impl Into<String>, ty: Ty) -> Reg {
        Reg {
            name: name.into(),
            ty,
        }
    }

    fn int(name: impl Into<String>) -> Reg {
        Reg::new(name, Ty::Int)
    }
}

#[derive(Debug, Clone)]
struct Slot {
    ptr: String,
    ty: Ty,
}

#[derive(Debug, Clone)]
struct FnInfo {
    params: usize,
    ret: Ty,
}

/// Per-function instruction builder: an insertion cursor, a register
/// counter, the variable-slot map and the loop-context stack.
struct FnBuilder {
    name: String,
    ret: Ty,
    lines: Vec<String>,
    tmp: usize,
    labels: usize,
    vars: HashMap<String, Slot>,
    /// (continue target, break target) per enclosing loop.
    loops: Vec<(String, String)>,
    terminated: bool,
}

impl FnBuilder {
    fn new(name: &str, ret: Ty) -> FnBuilder {
        FnBuilder {
            name: name.to_string(),
            ret,
            lines: Vec::new(),
            tmp: 0,
            labels: 0,
            vars: HashMap::new(),
            loops: Vec::new(),
            terminated: false,
        }
    }

    fn tmp(&mut self) -> String {
        self.tmp += 1;
        format!("%t{}", self.tmp)
    }

    fn label(&mut self, stem: &str) -> String {
        self.labels += 1;
        format!("{stem}.{}", self.labels)
    }

    fn line(&mut self, text: impl Into<String>) {
        self.lines.push(format!("  {}", text.into()));
    }

    /// Emit `text` into a fresh register and return it typed `ty`.
    fn emit(&mut self, ty: Ty, text: impl Into<String>) -> Reg {
        let reg = self.tmp();
        self.line(format!("{reg} = {}", text.into()));
        Reg::new(reg, ty)
    }

    fn br(&mut self, target: &str) {
        self.line(format!("br label %{target}"));
        self.terminated = true;
    }

    fn cbr(&mut self, cond: &str, then: &str, other: &str) {
        self.line(format!("br i1 {cond}, label %{then}, label %{other}"));
        self.terminated = true;
    }

    fn place(&mut self, label: &str) {
        self.lines.push(format!("{label}:"));
        self.terminated = false;
    }

    fn finish(&self) -> String {
        let params = String::new();
        let mut text = format!("define {} @{}({params}) {{\nentry:\n", self.ret.ll(), self.name);
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("}\n");
        text
    }

    fn finish_with_params(&self, params: &[String]) -> String {
        let mut text = format!(
            "define {} @{}({}) {{\nentry:\n",
            self.ret.ll(),
            self.name,
            params.join(", ")
        );
        for line in &self.lines {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("}\n");
        text
    }
}

struct Codegen<'a> {
    file: &'a str,
    config: &'a LangConfig,
    globals: Vec<String>,
    interned: HashMap<String, String>,
    helpers: Vec<String>,
    functions: Vec<String>,
    fn_table: HashMap<String, FnInfo>,
}

impl<'a> Codegen<'a> {
    fn lowering_error(&self, details: impl Into<String>, span: Span) -> Diagnostic {
        Diagnostic::new(ErrorKind::Lowering, details, span, self.file)
    }

    /// Intern a string constant, returning its global symbol.
    fn intern(&mut self, content: &str) -> String {
        if let Some(name) = self.interned.get(content) {
            return name.clone();
        }
        let name = format!("@.str.{}", self.interned.len());
        let mut encoded = String::new();
        for byte in content.bytes() {
            match byte {
                0x20..=0x7E if byte != b'"' && byte != b'\\' => encoded.push(byte as char),
                _ => encoded.push_str(&format!("\\{byte:02X}")),
            }
        }
        encoded.push_str("\\00");
        let len = content.len() + 1;
        self.globals.push(format!(
            "{name} = private unnamed_addr constant [{len} x i8] c\"{encoded}\""
        ));
        self.interned.insert(content.to_string(), name.clone());
        name
    }

    fn ensure_helper(&mut self, name: &str) {
        if self.helpers.iter().any(|h| h.contains(&format!("@{name}("))) {
            return;
        }
        let text = match name {
            "list.append" => self.helper_append(),
            "list.concat" => self.helper_concat(),
            "list.remove" => self.helper_remove(),
            "print.list.i" => self.helper_print_list(Elem::Int),
            "print.list.f" => self.helper_print_list(Elem::Float),
            _ => return,
        };
        self.helpers.push(text);
    }

    fn helper_append(&mut self) -> String {
        "define private %list @list.append(%list %l, i64 %v) {
entry:
  %len = extractvalue %list %l, 0
  %src = extractvalue %list %l, 1
  %newlen = add i64 %len, 1
  %bytes = mul i64 %newlen, 8
  %buf = call ptr @malloc(i64 %bytes)
  br label %copy
copy:
  %i = phi i64 [ 0, %entry ], [ %next, %body ]
  %more = icmp slt i64 %i, %len
  br i1 %more, label %body, label %done
body:
  %sp = getelementptr i64, ptr %src, i64 %i
  %e = load i64, ptr %sp
  %dp = getelementptr i64, ptr %buf, i64 %i
  store i64 %e, ptr %dp
  %next = add i64 %i, 1
  br label %copy
done:
  %tail = getelementptr i64, ptr %buf, i64 %len
  store i64 %v, ptr %tail
  %r0 = insertvalue %list undef, i64 %newlen, 0
  %r1 = insertvalue %list %r0, ptr %buf, 1
  ret %list %r1
}
"
        .to_string()
    }

    fn helper_concat(&mut self) -> String {
        "define private %list @list.concat(%list %a, %list %b) {
entry:
  %alen = extractvalue %list %a, 0
  %asrc = extractvalue %list %a, 1
  %blen = extractvalue %list %b, 0
  %bsrc = extractvalue %list %b, 1
  %len = add i64 %alen, %blen
  %bytes = mul i64 %len, 8
  %buf = call ptr @malloc(i64 %bytes)
  br label %copya
copya:
  %i = phi i64 [ 0, %entry ], [ %inext, %abody ]
  %amore = icmp slt i64 %i, %alen
  br i1 %amore, label %abody, label %copyb
abody:
  %ap = getelementptr i64, ptr %asrc, i64 %i
  %ae = load i64, ptr %ap
  %adp = getelementptr i64, ptr %buf, i64 %i
  store i64 %ae, ptr %adp
  %inext = add i64 %i, 1
  br label %copya
copyb:
  %j = phi i64 [ 0, %copya ], [ %jnext, %bbody ]
  %bmore = icmp slt i64 %j, %blen
  br i1 %bmore, label %bbody, label %done
bbody:
  %bp = getelementptr i64, ptr %bsrc, i64 %j
  %be = load i64, ptr %bp
  %at = add i64 %alen, %j
  %bdp = getelementptr i64, ptr %buf, i64 %at
  store i64 %be, ptr %bdp
  %jnext = add i64 %j, 1
  br label %copyb
done:
  %r0 = insertvalue %list undef, i64 %len, 0
  %r1 = insertvalue %list %r0, ptr %buf, 1
  ret %list %r1
}
"
        .to_string()
    }

    fn helper_remove(&mut self) -> String {
        "define private %list @list.remove(%list %l, i64 %at) {
entry:
  %len = extractvalue %list %l, 0
  %src = extractvalue %list %l, 1
  %newlen = add i64 %len, -1
  %bytes = mul i64 %newlen, 8
  %buf = call ptr @malloc(i64 %bytes)
  br label %loop
loop:
  %i = phi i64 [ 0, %entry ], [ %next, %cont ]
  %o = phi i64 [ 0, %entry ], [ %onext, %cont ]
  %more = icmp slt i64 %i, %len
  br i1 %more, label %check, label %done
check:
  %skip = icmp eq i64 %i, %at
  br i1 %skip, label %cont, label %keep
keep:
  %sp = getelementptr i64, ptr %src, i64 %i
  %e = load i64, ptr %sp
  %dp = getelementptr i64, ptr %buf, i64 %o
  store i64 %e, ptr %dp
  br label %cont
cont:
  %oinc = phi i64 [ 0, %check ], [ 1, %keep ]
  %onext = add i64 %o, %oinc
  %next = add i64 %i, 1
  br label %loop
done:
  %r0 = insertvalue %list undef, i64 %newlen, 0
  %r1 = insertvalue %list %r0, ptr %buf, 1
  ret %list %r1
}
"
        .to_string()
    }

    fn helper_print_list(&mut self, elem: Elem) -> String {
        let open = self.intern("[");
        let sep = self.intern(", ");
        let close = self.intern("]\n");
        let (suffix, elem_fmt, elem_code) = match elem {
            Elem::Int => (
                "i",
                self.intern("%ld"),
                "  %e = load i64, ptr %p\n".to_string(),
            ),
            Elem::Float => (
                "f",
                self.intern("%.6f"),
                "  %raw = load i64, ptr %p\n  %e = bitcast i64 %raw to double\n".to_string(),
            ),
        };
        let elem_ty = match elem {
            Elem::Int => "i64",
            Elem::Float => "double",
        };
        format!(
            "define private void @print.list.{suffix}(%list %l) {{
entry:
  %len = extractvalue %list %l, 0
  %src = extractvalue %list %l, 1
  %o = call i32 (ptr, ...) @printf(ptr {open})
  br label %loop
loop:
  %i = phi i64 [ 0, %entry ], [ %next, %elem ]
  %more = icmp slt i64 %i, %len
  br i1 %more, label %body, label %done
body:
  %first = icmp eq i64 %i, 0
  br i1 %first, label %elem, label %sep
sep:
  %s = call i32 (ptr, ...) @printf(ptr {sep})
  br label %elem
elem:
  %p = getelementptr i64, ptr %src, i64 %i
{elem_code}  %c = call i32 (ptr, ...) @printf(ptr {elem_fmt}, {elem_ty} %e)
  %next = add i64 %i, 1
  br label %loop
done:
  %d = call i32 (ptr, ...) @printf(ptr {close})
  ret void
}}
"
        )
    }

    /// Lower a statement sequence, dropping anything after a
    /// terminator.
    fn lower_body(&mut self, body: &[Stmt], b: &mut FnBuilder) -> Result<(), Diagnostic> {
        for stmt in body {
            if b.terminated {
                break;
            }
            self.lower_stmt(stmt, b)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt, b: &mut FnBuilder) -> Result<(), Diagnostic> {
        match stmt {
            Stmt::Expr(expr) => {
                self.lower_expr(expr, b)?;
                Ok(())
            }
            Stmt::Return { value, span } => {
                let reg = match value {
                    Some(expr) => self.lower_expr(expr, b)?,
                    None => Reg::new(b.ret.zero(), b.ret),
                };
                let reg = self.coerce_return(reg, b, *span)?;
                b.line(format!("ret {} {}", b.ret.ll(), reg.name));
                b.terminated = true;
                Ok(())
            }
            Stmt::Break { span } => {
                let Some((_, target)) = b.loops.last().cloned() else {
                    return Err(self.lowering_error("'break' used outside of a loop", *span));
                };
                b.br(&target);
                Ok(())
            }
            Stmt::Continue { span } => {
                let Some((target, _)) = b.loops.last().cloned() else {
                    return Err(self.lowering_error("'continue' used outside of a loop", *span));
                };
                b.br(&target);
                Ok(())
            }
        }
    }

    fn lower_expr(&mut self, expr: &Expr, b: &mut FnBuilder) -> Result<Reg, Diagnostic> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(n) => Ok(Reg::int(n.to_string())),
            ExprKind::Float(f) => Ok(Reg::new(format!("0x{:016X}", f.to_bits()), Ty::Float)),
            ExprKind::Str(s) => {
                let name = self.intern(s);
                Ok(Reg::new(name, Ty::Str))
            }
            ExprKind::Ident(name) => {
                let Some(slot) = b.vars.get(name).cloned() else {
                    return Err(
                        self.lowering_error(format!("Variable '{name}' not defined"), span)
                    );
                };
                Ok(b.emit(slot.ty, format!("load {}, ptr {}", slot.ty.ll(), slot.ptr)))
            }
            ExprKind::List(items) => self.lower_list_literal(items, b, span),
            ExprKind::VarDecl {
                declared,
                name,
                value,
            } => {
                let init = self.lower_expr(value, b)?;
                if let Some(expected) = declared {
                    let matches = matches!(
                        (*expected, init.ty),
                        (TypeName::Int, Ty::Int | Ty::Bool)
                            | (TypeName::Float, Ty::Float)
                            | (TypeName::String, Ty::Str)
                            | (TypeName::List, Ty::List(_))
                    );
                    if !matches {
                        return Err(self.lowering_error(
                            format!("Type mismatch: expected {expected}, got {}", init.ty.label()),
                            span,
                        ));
                    }
                }
                let init = self.widen_bool(init, b);
                let ptr = b.tmp();
                b.line(format!("{ptr} = alloca {}", init.ty.ll()));
                b.line(format!("store {} {}, ptr {ptr}", init.ty.ll(), init.name));
                b.vars.insert(name.clone(), Slot { ptr, ty: init.ty });
                Ok(init)
            }
            ExprKind::Assign { name, value } => {
                let value = self.lower_expr(value, b)?;
                let value = self.widen_bool(value, b);
                let Some(slot) = b.vars.get(name).cloned() else {
                    return Err(
                        self.lowering_error(format!("Variable '{name}' not defined"), span)
                    );
                };
                let got = value.ty;
                let value = self.coerce_scalar(value, slot.ty, b).ok_or_else(|| {
                    self.lowering_error(
                        format!(
                            "Type mismatch: expected {}, got {}",
                            slot.ty.label(),
                            got.label()
                        ),
                        span,
                    )
                })?;
                b.line(format!("store {} {}, ptr {}", slot.ty.ll(), value.name, slot.ptr));
                Ok(value)
            }
            ExprKind::Unary { op, operand } => self.lower_unary(*op, operand, b, span),
            ExprKind::Binary { op, lhs, rhs } => self.lower_binary(*op, lhs, rhs, b, span),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, b, span),
            ExprKind::If { cases, else_body } => {
                self.lower_if(cases, else_body.as_deref(), b)?;
                Ok(Reg::int("0"))
            }
            ExprKind::While { cond, body } => {
                self.lower_while(cond, body, b)?;
                Ok(Reg::int("0"))
            }
            ExprKind::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                self.lower_for(var, start, end, step.as_deref(), body, b, span)?;
                Ok(Reg::int("0"))
            }
            ExprKind::Function(def) => {
                self.lower_function(def, span)?;
                Ok(Reg::int("0"))
            }
        }
    }

    fn lower_list_literal(
        &mut self,
        items: &[Expr],
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        let mut lowered = Vec::with_capacity(items.len());
        let mut elem = Elem::Int;
        for item in items {
            let reg = self.lower_expr(item, b)?;
            let reg = self.widen_bool(reg, b);
            match reg.ty {
                Ty::Int => {}
                Ty::Float => elem = Elem::Float,
                other => {
                    return Err(self.lowering_error(
                        format!("Lists of {} are not supported in compiled code", other.label()),
                        span,
                    ));
                }
            }
            lowered.push(reg);
        }

        let buf = b.tmp();
        b.line(format!(
            "{buf} = call ptr @malloc(i64 {})",
            (lowered.len() * 8).max(8)
        ));
        for (i, reg) in lowered.into_iter().enumerate() {
            let slot_value = self.elem_bits(reg, elem, b);
            let ptr = b.tmp();
            b.line(format!("{ptr} = getelementptr i64, ptr {buf}, i64 {i}"));
            b.line(format!("store i64 {}, ptr {ptr}", slot_value));
        }
        let with_len = b.emit(
            Ty::List(elem),
            format!("insertvalue %list undef, i64 {}, 0", items.len()),
        );
        let full = b.emit(
            Ty::List(elem),
            format!("insertvalue %list {}, ptr {buf}, 1", with_len.name),
        );
        Ok(full)
    }

    /// Bit pattern of `reg` for a 64-bit list slot with element kind
    /// `elem`, promoting ints when the list holds floats.
    fn elem_bits(&mut self, reg: Reg, elem: Elem, b: &mut FnBuilder) -> String {
        match (elem, reg.ty) {
            (Elem::Int, Ty::Int) => reg.name,
            (Elem::Float, ty) => {
                let as_float = if ty == Ty::Int {
                    b.emit(Ty::Float, format!("sitofp i64 {} to double", reg.name))
                } else {
                    reg
                };
                b.emit(Ty::Int, format!("bitcast double {} to i64", as_float.name))
                    .name
            }
            _ => reg.name,
        }
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        let reg = self.lower_expr(operand, b)?;
        let reg = self.widen_bool(reg, b);
        match op {
            UnaryOp::Pos => match reg.ty {
                Ty::Int | Ty::Float => Ok(reg),
                _ => Err(self.lowering_error("Illegal operation", span)),
            },
            UnaryOp::Neg => match reg.ty {
                Ty::Int => Ok(b.emit(Ty::Int, format!("sub i64 0, {}", reg.name))),
                Ty::Float => Ok(b.emit(Ty::Float, format!("fneg double {}", reg.name))),
                _ => Err(self.lowering_error("Illegal operation", span)),
            },
            UnaryOp::Not => {
                let truth = self.truthy(reg, b, span)?;
                Ok(b.emit(Ty::Bool, format!("xor i1 {}, true", truth.name)))
            }
        }
    }

    fn lower_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        // A literal zero divisor fails the same way it does under the
        // interpreter.
        if op == BinOp::Div {
            if let ExprKind::Int(0) = rhs.kind {
                return Err(Diagnostic::new(
                    ErrorKind::Runtime,
                    "Division by zero",
                    span,
                    self.file,
                ));
            }
            if let ExprKind::Float(f) = rhs.kind {
                if f == 0.0 {
                    return Err(Diagnostic::new(
                        ErrorKind::Runtime,
                        "Division by zero",
                        span,
                        self.file,
                    ));
                }
            }
        }

        let lhs = self.lower_expr(lhs, b)?;
        let rhs = self.lower_expr(rhs, b)?;

        if let Ty::List(_) = lhs.ty {
            return self.lower_list_op(op, lhs, rhs, b, span);
        }

        match op {
            BinOp::And | BinOp::Or => {
                let l = self.truthy(lhs, b, span)?;
                let r = self.truthy(rhs, b, span)?;
                let instr = if op == BinOp::And { "and" } else { "or" };
                Ok(b.emit(Ty::Bool, format!("{instr} i1 {}, {}", l.name, r.name)))
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let lhs = self.widen_bool(lhs, b);
                let rhs = self.widen_bool(rhs, b);
                if !matches!(lhs.ty, Ty::Int | Ty::Float) || !matches!(rhs.ty, Ty::Int | Ty::Float)
                {
                    return Err(self.lowering_error("Illegal operation", span));
                }
                let (l, r, ty) = self.promote_pair(lhs, rhs, b);
                let instr = match (op, ty) {
                    (BinOp::Add, Ty::Int) => "add i64",
                    (BinOp::Sub, Ty::Int) => "sub i64",
                    (BinOp::Mul, Ty::Int) => "mul i64",
                    (BinOp::Div, Ty::Int) => "sdiv i64",
                    (BinOp::Add, _) => "fadd double",
                    (BinOp::Sub, _) => "fsub double",
                    (BinOp::Mul, _) => "fmul double",
                    (BinOp::Div, _) => "fdiv double",
                    _ => unreachable!(),
                };
                Ok(b.emit(ty, format!("{instr} {}, {}", l.name, r.name)))
            }
            BinOp::Pow => {
                let lhs = self.widen_bool(lhs, b);
                let rhs = self.widen_bool(rhs, b);
                if !matches!(lhs.ty, Ty::Int | Ty::Float) || !matches!(rhs.ty, Ty::Int | Ty::Float)
                {
                    return Err(self.lowering_error("Illegal operation", span));
                }
                let both_int = lhs.ty == Ty::Int && rhs.ty == Ty::Int;
                let l = self.to_float(lhs, b);
                let r = self.to_float(rhs, b);
                let result = b.emit(
                    Ty::Float,
                    format!("call double @pow(double {}, double {})", l.name, r.name),
                );
                if both_int {
                    Ok(b.emit(Ty::Int, format!("fptosi double {} to i64", result.name)))
                } else {
                    Ok(result)
                }
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let lhs = self.widen_bool(lhs, b);
                let rhs = self.widen_bool(rhs, b);
                if !matches!(lhs.ty, Ty::Int | Ty::Float) || !matches!(rhs.ty, Ty::Int | Ty::Float)
                {
                    return Err(self.lowering_error("Illegal operation", span));
                }
                let (l, r, ty) = self.promote_pair(lhs, rhs, b);
                let instr = match (op, ty) {
                    (BinOp::Eq, Ty::Int) => "icmp eq i64",
                    (BinOp::Ne, Ty::Int) => "icmp ne i64",
                    (BinOp::Lt, Ty::Int) => "icmp slt i64",
                    (BinOp::Gt, Ty::Int) => "icmp sgt i64",
                    (BinOp::Le, Ty::Int) => "icmp sle i64",
                    (BinOp::Ge, Ty::Int) => "icmp sge i64",
                    (BinOp::Eq, _) => "fcmp oeq double",
                    (BinOp::Ne, _) => "fcmp one double",
                    (BinOp::Lt, _) => "fcmp olt double",
                    (BinOp::Gt, _) => "fcmp ogt double",
                    (BinOp::Le, _) => "fcmp ole double",
                    (BinOp::Ge, _) => "fcmp oge double",
                    _ => unreachable!(),
                };
                Ok(b.emit(Ty::Bool, format!("{instr} {}, {}", l.name, r.name)))
            }
        }
    }

    fn lower_list_op(
        &mut self,
        op: BinOp,
        lhs: Reg,
        rhs: Reg,
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        let Ty::List(elem) = lhs.ty else {
            return Err(self.lowering_error("Illegal operation", span));
        };
        match op {
            // list + scalar appends.
            BinOp::Add => {
                let rhs = self.widen_bool(rhs, b);
                if !matches!(rhs.ty, Ty::Int | Ty::Float) {
                    return Err(self.lowering_error(
                        "Lists of mixed element types are not supported in compiled code",
                        span,
                    ));
                }
                let elem = if rhs.ty == Ty::Float { Elem::Float } else { elem };
                if elem == Elem::Float && matches!(lhs.ty, Ty::List(Elem::Int)) {
                    return Err(self.lowering_error(
                        "Lists of mixed element types are not supported in compiled code",
                        span,
                    ));
                }
                let bits = self.elem_bits(rhs, elem, b);
                self.ensure_helper("list.append");
                Ok(b.emit(
                    Ty::List(elem),
                    format!("call %list @list.append(%list {}, i64 {bits})", lhs.name),
                ))
            }
            // list * list concatenates.
            BinOp::Mul => {
                if rhs.ty != lhs.ty {
                    return Err(self.lowering_error("Illegal operation", span));
                }
                self.ensure_helper("list.concat");
                Ok(b.emit(
                    Ty::List(elem),
                    format!(
                        "call %list @list.concat(%list {}, %list {})",
                        lhs.name, rhs.name
                    ),
                ))
            }
            // list - index removes; no runtime bounds check.
            BinOp::Sub => {
                let idx = self
                    .coerce_scalar(rhs, Ty::Int, b)
                    .ok_or_else(|| self.lowering_error("Illegal operation", span))?;
                self.ensure_helper("list.remove");
                Ok(b.emit(
                    Ty::List(elem),
                    format!(
                        "call %list @list.remove(%list {}, i64 {})",
                        lhs.name, idx.name
                    ),
                ))
            }
            // list / index reads an element in place.
            BinOp::Div => {
                let idx = self
                    .coerce_scalar(rhs, Ty::Int, b)
                    .ok_or_else(|| self.lowering_error("Illegal operation", span))?;
                let data = b.emit(Ty::Str, format!("extractvalue %list {}, 1", lhs.name));
                let ptr = b.emit(
                    Ty::Str,
                    format!("getelementptr i64, ptr {}, i64 {}", data.name, idx.name),
                );
                let raw = b.emit(Ty::Int, format!("load i64, ptr {}", ptr.name));
                match elem {
                    Elem::Int => Ok(raw),
                    Elem::Float => {
                        Ok(b.emit(Ty::Float, format!("bitcast i64 {} to double", raw.name)))
                    }
                }
            }
            _ => Err(self.lowering_error("Illegal operation", span)),
        }
    }

    fn lower_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        let ExprKind::Ident(name) = &callee.kind else {
            return Err(self.lowering_error(
                "Only named functions can be called in compiled code",
                span,
            ));
        };

        if let Some(builtin) = self.config.builtin(name) {
            return self.lower_builtin_call(builtin, name, args, b, span);
        }

        let Some(info) = self.fn_table.get(name).cloned() else {
            return Err(self.lowering_error(format!("Function '{name}' is not defined"), span));
        };
        if args.len() > info.params {
            return Err(self.lowering_error(
                format!("{} too many args passed into '{name}'", args.len() - info.params),
                span,
            ));
        }
        if args.len() < info.params {
            return Err(self.lowering_error(
                format!("{} too few args passed into '{name}'", info.params - args.len()),
                span,
            ));
        }

        let mut lowered = Vec::with_capacity(args.len());
        for arg in args {
            let reg = self.lower_expr(arg, b)?;
            let reg = self
                .coerce_scalar(reg, Ty::Int, b)
                .ok_or_else(|| self.lowering_error("Illegal operation", arg.span))?;
            lowered.push(format!("i64 {}", reg.name));
        }
        Ok(b.emit(
            info.ret,
            format!("call {} @{name}({})", info.ret.ll(), lowered.join(", ")),
        ))
    }

    fn lower_builtin_call(
        &mut self,
        builtin: Builtin,
        name: &str,
        args: &[Expr],
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<Reg, Diagnostic> {
        let expected = builtin.arity();
        if args.len() > expected {
            return Err(self.lowering_error(
                format!("{} too many args passed into '{name}'", args.len() - expected),
                span,
            ));
        }
        if args.len() < expected {
            return Err(self.lowering_error(
                format!("{} too few args passed into '{name}'", expected - args.len()),
                span,
            ));
        }

        match builtin {
            Builtin::Print => {
                let reg = self.lower_expr(&args[0], b)?;
                self.lower_print(reg, b);
                Ok(Reg::int("0"))
            }
            Builtin::Len => {
                let reg = self.lower_expr(&args[0], b)?;
                let Ty::List(_) = reg.ty else {
                    return Err(self.lowering_error("Argument must be list", span));
                };
                Ok(b.emit(Ty::Int, format!("extractvalue %list {}, 0", reg.name)))
            }
            Builtin::Typeof => {
                let reg = self.lower_expr(&args[0], b)?;
                let global = self.intern(reg.ty.label());
                Ok(Reg::new(global, Ty::Str))
            }
            other => Err(self.lowering_error(
                format!("Builtin '{}' is not supported in compiled code", other.name()),
                span,
            )),
        }
    }

    fn lower_print(&mut self, reg: Reg, b: &mut FnBuilder) {
        match reg.ty {
            Ty::Int | Ty::Bool => {
                let reg = self.widen_bool(reg, b);
                let fmt = self.intern("%ld\n");
                b.emit(
                    Ty::Int,
                    format!("call i32 (ptr, ...) @printf(ptr {fmt}, i64 {})", reg.name),
                );
            }
            Ty::Float => {
                let fmt = self.intern("%.6f\n");
                b.emit(
                    Ty::Int,
                    format!("call i32 (ptr, ...) @printf(ptr {fmt}, double {})", reg.name),
                );
            }
            Ty::Str => {
                let fmt = self.intern("%s\n");
                b.emit(
                    Ty::Int,
                    format!("call i32 (ptr, ...) @printf(ptr {fmt}, ptr {})", reg.name),
                );
            }
            Ty::List(elem) => {
                let helper = match elem {
                    Elem::Int => "print.list.i",
                    Elem::Float => "print.list.f",
                };
                self.ensure_helper(helper);
                b.line(format!("call void @{helper}(%list {})", reg.name));
            }
        }
    }

    fn lower_if(
        &mut self,
        cases: &[(Expr, Vec<Stmt>)],
        else_body: Option<&[Stmt]>,
        b: &mut FnBuilder,
    ) -> Result<(), Diagnostic> {
        let merge = b.label("if.end");
        for (cond, body) in cases {
            let then = b.label("if.then");
            let next = b.label("if.else");
            let reg = self.lower_expr(cond, b)?;
            let truth = self.truthy(reg, b, cond.span)?;
            b.cbr(&truth.name, &then, &next);

            b.place(&then);
            self.lower_body(body, b)?;
            if !b.terminated {
                b.br(&merge);
            }
            b.place(&next);
        }
        if let Some(body) = else_body {
            self.lower_body(body, b)?;
        }
        if !b.terminated {
            b.br(&merge);
        }
        b.place(&merge);
        Ok(())
    }

    fn lower_while(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        b: &mut FnBuilder,
    ) -> Result<(), Diagnostic> {
        let cond_label = b.label("while.cond");
        let body_label = b.label("while.body");
        let end_label = b.label("while.end");

        b.br(&cond_label);
        b.place(&cond_label);
        let reg = self.lower_expr(cond, b)?;
        let truth = self.truthy(reg, b, cond.span)?;
        b.cbr(&truth.name, &body_label, &end_label);

        b.place(&body_label);
        b.loops.push((cond_label.clone(), end_label.clone()));
        let lowered = self.lower_body(body, b);
        b.loops.pop();
        lowered?;
        if !b.terminated {
            b.br(&cond_label);
        }

        b.place(&end_label);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
        b: &mut FnBuilder,
        span: Span,
    ) -> Result<(), Diagnostic> {
        let start = self.lower_expr(start, b)?;
        let start = self
            .coerce_scalar(start, Ty::Int, b)
            .ok_or_else(|| self.lowering_error("Illegal operation", span))?;
        let end = self.lower_expr(end, b)?;
        let end = self
            .coerce_scalar(end, Ty::Int, b)
            .ok_or_else(|| self.lowering_error("Illegal operation", span))?;
        let step = match step {
            Some(expr) => {
                let reg = self.lower_expr(expr, b)?;
                self.coerce_scalar(reg, Ty::Int, b)
                    .ok_or_else(|| self.lowering_error("Illegal operation", span))?
            }
            None => Reg::int("1"),
        };

        let ptr = b.tmp();
        b.line(format!("{ptr} = alloca i64"));
        b.line(format!("store i64 {}, ptr {ptr}", start.name));
        b.vars.insert(
            var.to_string(),
            Slot {
                ptr: ptr.clone(),
                ty: Ty::Int,
            },
        );

        let cond_label = b.label("for.cond");
        let body_label = b.label("for.body");
        let incr_label = b.label("for.incr");
        let end_label = b.label("for.end");

        b.br(&cond_label);
        b.place(&cond_label);
        let i = b.emit(Ty::Int, format!("load i64, ptr {ptr}"));
        // The step sign is tested at runtime, so counting down works
        // with a negative step expression.
        let ascending = b.emit(Ty::Bool, format!("icmp sgt i64 {}, 0", step.name));
        let up = b.emit(Ty::Bool, format!("icmp slt i64 {}, {}", i.name, end.name));
        let down = b.emit(Ty::Bool, format!("icmp sgt i64 {}, {}", i.name, end.name));
        let more = b.emit(
            Ty::Bool,
            format!(
                "select i1 {}, i1 {}, i1 {}",
                ascending.name, up.name, down.name
            ),
        );
        b.cbr(&more.name, &body_label, &end_label);

        b.place(&body_label);
        b.loops.push((incr_label.clone(), end_label.clone()));
        let lowered = self.lower_body(body, b);
        b.loops.pop();
        lowered?;
        if !b.terminated {
            b.br(&incr_label);
        }

        b.place(&incr_label);
        let i = b.emit(Ty::Int, format!("load i64, ptr {ptr}"));
        let next = b.emit(Ty::Int, format!("add i64 {}, {}", i.name, step.name));
        b.line(format!("store i64 {}, ptr {ptr}", next.name));
        b.br(&cond_label);

        b.place(&end_label);
        Ok(())
    }

    fn lower_function(&mut self, def: &FunctionDef, span: Span) -> Result<(), Diagnostic> {
        let Some(name) = &def.name else {
            return Err(self.lowering_error(
                "Anonymous functions are not supported in compiled code",
                span,
            ));
        };
        let ret = match def.return_type {
            Some(TypeName::Int) | None => Ty::Int,
            Some(TypeName::Float) => Ty::Float,
            Some(TypeName::String) => Ty::Str,
            Some(TypeName::List) => Ty::List(Elem::Int),
        };
        // Registered before the body is lowered so recursion resolves.
        self.fn_table.insert(
            name.clone(),
            FnInfo {
                params: def.params.len(),
                ret,
            },
        );

        let mut fb = FnBuilder::new(name, ret);
        let mut params = Vec::with_capacity(def.params.len());
        for param in &def.params {
            params.push(format!("i64 %{}", param.name));
            let ptr = fb.tmp();
            fb.line(format!("{ptr} = alloca i64"));
            fb.line(format!("store i64 %{}, ptr {ptr}", param.name));
            fb.vars.insert(param.name.clone(), Slot { ptr, ty: Ty::Int });
        }
        self.lower_body(&def.body, &mut fb)?;
        if !fb.terminated {
            fb.line(format!("ret {} {}", ret.ll(), ret.zero()));
        }
        self.functions.push(fb.finish_with_params(&params));
        Ok(())
    }

    /// Coerce a function-body return value to the declared return
    /// type: identical passes, int and float convert, anything else is
    /// a type mismatch.
    fn coerce_return(&mut self, reg: Reg, b: &mut FnBuilder, span: Span) -> Result<Reg, Diagnostic> {
        let reg = self.widen_bool(reg, b);
        if reg.ty == b.ret {
            return Ok(reg);
        }
        if let Some(reg) = self.coerce_scalar(reg.clone(), b.ret, b) {
            return Ok(reg);
        }
        Err(self.lowering_error(
            format!(
                "Type mismatch: function declared to return '{}' but trying to return '{}'",
                b.ret.label(),
                reg.ty.label()
            ),
            span,
        ))
    }

    /// int <-> float conversion toward `target`; `None` when the kinds
    /// are not interconvertible.
    fn coerce_scalar(&mut self, reg: Reg, target: Ty, b: &mut FnBuilder) -> Option<Reg> {
        let reg = self.widen_bool(reg, b);
        match (reg.ty, target) {
            (a, t) if a == t => Some(reg),
            (Ty::Int, Ty::Float) => {
                Some(b.emit(Ty::Float, format!("sitofp i64 {} to double", reg.name)))
            }
            (Ty::Float, Ty::Int) => {
                Some(b.emit(Ty::Int, format!("fptosi double {} to i64", reg.name)))
            }
            _ => None,
        }
    }

    /// Promote an int/float pair to a common type: both stay `i64`
    /// unless either side is a float, in which case ints `sitofp`.
    fn promote_pair(&mut self, lhs: Reg, rhs: Reg, b: &mut FnBuilder) -> (Reg, Reg, Ty) {
        if lhs.ty == Ty::Float || rhs.ty == Ty::Float {
            let l = self.to_float(lhs, b);
            let r = self.to_float(rhs, b);
            (l, r, Ty::Float)
        } else {
            (lhs, rhs, Ty::Int)
        }
    }

    fn to_float(&mut self, reg: Reg, b: &mut FnBuilder) -> Reg {
        if reg.ty == Ty::Int {
            b.emit(Ty::Float, format!("sitofp i64 {} to double", reg.name))
        } else {
            reg
        }
    }

    /// `i1` zero-extends to `i64` whenever it meets arithmetic.
    fn widen_bool(&mut self, reg: Reg, b: &mut FnBuilder) -> Reg {
        if reg.ty == Ty::Bool {
            b.emit(Ty::Int, format!("zext i1 {} to i64", reg.name))
        } else {
            reg
        }
    }

    fn truthy(&mut self, reg: Reg, b: &mut FnBuilder, span: Span) -> Result<Reg, Diagnostic> {
        match reg.ty {
            Ty::Bool => Ok(reg),
            Ty::Int => Ok(b.emit(Ty::Bool, format!("icmp ne i64 {}, 0", reg.name))),
            Ty::Float => Ok(b.emit(Ty::Bool, format!("fcmp one double {}, 0x0000000000000000", reg.name))),
            _ => Err(self.lowering_error("Illegal operation", span)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::token::LangConfig;

    fn lower(source: &str) -> Result<String, Diagnostic> {
        let config = LangConfig::new();
        let tokens = tokenize("<test>", source, &config)?;
        let program = parse("<test>", &tokens)?;
        emit("<test>", &program, &config)
    }

    fn ir(source: &str) -> String {
        lower(source).expect("program should lower")
    }

    #[test]
    fn module_has_prologue_and_main() {
        let text = ir("print(1)");
        assert!(text.starts_with("; ModuleID = 'funlang'"));
        assert!(text.contains("%list = type { i64, ptr }"));
        assert!(text.contains("declare i32 @printf(ptr, ...)"));
        assert!(text.contains("define i64 @main()"));
        assert!(text.contains("ret i64 0"));
    }

    #[test]
    fn print_selects_a_format_per_type() {
        let text = ir("print(1)");
        assert!(text.contains("c\"%ld\\0A\\00\""));
        let text = ir("print(1.5)");
        assert!(text.contains("c\"%.6f\\0A\\00\""));
        let text = ir("print(\"hi\")");
        assert!(text.contains("c\"%s\\0A\\00\""));
        assert!(text.contains("c\"hi\\00\""));
    }

    #[test]
    fn float_constants_are_emitted_as_bit_patterns() {
        let text = ir("print(1.5)");
        assert!(text.contains(&format!("0x{:016X}", 1.5f64.to_bits())));
    }

    #[test]
    fn mixed_arithmetic_promotes_with_sitofp() {
        let text = ir("print(1 + 2.0)");
        assert!(text.contains("sitofp i64 1 to double"));
        assert!(text.contains("fadd double"));
    }

    #[test]
    fn pow_calls_libm_and_narrows_for_ints() {
        let text = ir("print(2 ^ 10)");
        assert!(text.contains("call double @pow(double"));
        assert!(text.contains("fptosi double"));
        let text = ir("print(2.0 ^ 10)");
        assert!(!text.contains("fptosi double"));
    }

    #[test]
    fn comparisons_zext_when_meeting_arithmetic() {
        let text = ir("print((1 < 2) + 1)");
        assert!(text.contains("icmp slt i64 1, 2"));
        assert!(text.contains("zext i1"));
    }

    #[test]
    fn literal_zero_divisor_is_rejected() {
        let err = lower("print(1 / 0)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.details, "Division by zero");
        let err = lower("print(1.0 / 0.0)").unwrap_err();
        assert_eq!(err.details, "Division by zero");
    }

    #[test]
    fn while_lowers_to_cond_body_end_blocks() {
        let text = ir("var i = 0; while i < 3 { i = i + 1 }");
        assert!(text.contains("while.cond."));
        assert!(text.contains("while.body."));
        assert!(text.contains("while.end."));
    }

    #[test]
    fn for_steps_with_a_runtime_sign_test() {
        let text = ir("for i = 10, 0, -1 { print(i) }");
        assert!(text.contains("for.cond."));
        assert!(text.contains("for.incr."));
        assert!(text.contains("select i1"));
    }

    #[test]
    fn break_and_continue_need_a_loop() {
        let err = lower("break").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lowering);
        assert_eq!(err.details, "'break' used outside of a loop");
        let err = lower("continue").unwrap_err();
        assert_eq!(err.details, "'continue' used outside of a loop");
    }

    #[test]
    fn functions_lower_with_uniform_i64_params() {
        let text = ir("fun add(a, b) { return a + b }; print(add(1, 2))");
        assert!(text.contains("define i64 @add(i64 %a, i64 %b)"));
        assert!(text.contains("call i64 @add(i64 1, i64 2)"));
    }

    #[test]
    fn recursion_resolves_against_the_function_table() {
        let source = "fun fact(n) { if n == 0 { return 1 }; return n * fact(n - 1) }; \
                      print(fact(5))";
        let text = ir(source);
        assert!(text.contains("call i64 @fact("));
    }

    #[test]
    fn unknown_functions_are_reported() {
        let err = lower("g(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lowering);
        assert_eq!(err.details, "Function 'g' is not defined");
    }

    #[test]
    fn arity_mismatches_match_the_interpreter_message() {
        let err = lower("fun f(a) { return a }; f(1, 2)").unwrap_err();
        assert_eq!(err.details, "1 too many args passed into 'f'");
        let err = lower("fun f(a, b) { return a }; f()").unwrap_err();
        assert_eq!(err.details, "2 too few args passed into 'f'");
    }

    #[test]
    fn declared_return_types_are_checked_at_lowering() {
        let err = lower("fun int f() { return [1] }; f()").unwrap_err();
        assert_eq!(
            err.details,
            "Type mismatch: function declared to return 'int' but trying to return 'list'"
        );
    }

    #[test]
    fn list_literals_malloc_and_store_slots() {
        let text = ir("print([1, 2, 3])");
        assert!(text.contains("call ptr @malloc(i64 24)"));
        assert!(text.contains("insertvalue %list undef, i64 3, 0"));
        assert!(text.contains("define private void @print.list.i(%list %l)"));
    }

    #[test]
    fn float_list_slots_are_bitcast() {
        let text = ir("print([1.5, 2.5])");
        assert!(text.contains("bitcast double"));
        assert!(text.contains("@print.list.f"));
    }

    #[test]
    fn list_operators_call_shared_helpers() {
        let text = ir("var a = [1, 2]; print(a + 3)");
        assert!(text.contains("call %list @list.append(%list"));
        assert!(text.contains("define private %list @list.append"));

        let text = ir("print([1] * [2])");
        assert!(text.contains("call %list @list.concat(%list"));

        let text = ir("print([1, 2] - 0)");
        assert!(text.contains("call %list @list.remove(%list"));
    }

    #[test]
    fn list_access_is_an_inline_load() {
        let text = ir("print([10, 20] / 1)");
        assert!(text.contains("getelementptr i64, ptr"));
        assert!(!text.contains("@list.access"));
    }

    #[test]
    fn len_and_typeof_lower_statically() {
        let text = ir("print(len([1, 2]))");
        assert!(text.contains("extractvalue %list"));
        let text = ir("print(typeof(1))");
        assert!(text.contains("c\"int\\00\""));
    }

    #[test]
    fn unsupported_builtins_are_named() {
        let err = lower("to_int(\"3\")").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lowering);
        assert_eq!(err.details, "Builtin 'to_int' is not supported in compiled code");
    }

    #[test]
    fn anonymous_functions_do_not_lower() {
        let err = lower("var f = fun (x) { return x }").unwrap_err();
        assert_eq!(
            err.details,
            "Anonymous functions are not supported in compiled code"
        );
    }

    #[test]
    fn nested_lists_do_not_lower() {
        let err = lower("print([[1], [2]])").unwrap_err();
        assert_eq!(err.details, "Lists of list are not supported in compiled code");
    }

    #[test]
    fn assignment_coerces_between_numeric_kinds_only() {
        let text = ir("var x = 1; x = 2.5; print(x)");
        assert!(text.contains("fptosi double"));
        let err = lower("var x = 1; x = \"s\"").unwrap_err();
        assert_eq!(err.details, "Type mismatch: expected int, got string");
    }

    #[test]
    fn respelled_builtins_lower_under_the_new_spelling() {
        let mut config = LangConfig::new();
        config.respell_builtin("print", "say");
        let tokens = tokenize("<test>", "say(1)", &config).unwrap();
        let program = parse("<test>", &tokens).unwrap();
        let text = emit("<test>", &program, &config).unwrap();
        assert!(text.contains("@printf"));
    }
}
