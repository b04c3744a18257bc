//! C Rendering
//!
//! Prints a program as a C function over fixed-shape `float` arrays, and a
//! benchmark harness around it. The harness calls the kernel once to warm
//! up, times `repetitions` further calls with `gettimeofday`, and prints
//!
//! ```text
//! RUNTIME_MS: <average milliseconds per call>
//! ```
//!
//! Loops marked parallel get `#pragma omp parallel for` unless an enclosing
//! loop already carries one. Vectorized loops add `simd`.

use std::fmt::Write;

use crate::ir::{BinOp, Node, NodeId, Program};

const HELPERS: &str = "\
#define floord(n, d) (((n) < 0) ? -((-(n) + (d) - 1) / (d)) : (n) / (d))
#define min(a, b) ((a) < (b) ? (a) : (b))
#define max(a, b) ((a) > (b) ? (a) : (b))
";

/// Index and bound expressions are integers; tensor values are floats.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Index,
    Value,
}

struct Printer<'a> {
    program: &'a Program,
    out: String,
    depth: usize,
}

impl<'a> Printer<'a> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn expr(&self, id: NodeId, ctx: Context) -> String {
        match self.program.node(id) {
            Node::Int(v) => v.to_string(),
            Node::Var(v) => v.to_string(),
            Node::Const(c) => format!("{:?}", self.program.constant(*c).value),
            Node::Access { tensor, indices } => {
                let mut s = self.program.tensor(*tensor).name.clone();
                if indices.is_empty() {
                    s.push_str("[0]");
                }
                for &i in indices {
                    let _ = write!(s, "[{}]", self.expr(i, Context::Index));
                }
                s
            }
            Node::Binary { op, lhs, rhs } => {
                let (a, b) = (self.expr(*lhs, ctx), self.expr(*rhs, ctx));
                match (op, ctx) {
                    (BinOp::Div, Context::Index) => format!("floord({}, {})", a, b),
                    (BinOp::Mod, Context::Index) => format!("(({}) - ({}) * floord({}, {}))", a, b, a, b),
                    (BinOp::Mod, Context::Value) => format!("fmodf({}, {})", a, b),
                    (BinOp::Min, _) => format!("min({}, {})", a, b),
                    (BinOp::Max, _) => format!("max({}, {})", a, b),
                    _ => format!("({} {} {})", a, op.symbol(), b),
                }
            }
            _ => String::from("0"),
        }
    }

    fn stmt(&mut self, id: NodeId, in_parallel: bool) {
        let program = self.program;
        match program.node(id) {
            Node::Loop(l) => {
                let pragma = l.parallel && !in_parallel;
                match (pragma, l.vectorize) {
                    (true, true) => self.line("#pragma omp parallel for simd"),
                    (true, false) => self.line("#pragma omp parallel for"),
                    (false, true) => self.line("#pragma omp simd"),
                    (false, false) => {}
                }
                let header = format!(
                    "for (int {v} = {}; {v} < {}; {v} += {}) {{",
                    self.expr(l.min, Context::Index),
                    self.expr(l.max, Context::Index),
                    self.expr(l.step, Context::Index),
                    v = l.var,
                );
                self.line(&header);
                self.depth += 1;
                for &child in &l.body {
                    self.stmt(child, in_parallel || pragma);
                }
                self.depth -= 1;
                self.line("}");
            }
            Node::Assign { lhs, rhs, .. } => {
                let text = format!(
                    "{} = {};",
                    self.expr(*lhs, Context::Value),
                    self.expr(*rhs, Context::Value)
                );
                self.line(&text);
            }
            Node::Print { value, .. } => {
                let text = format!("printf(\"%f\\n\", (double)({}));", self.expr(*value, Context::Value));
                self.line(&text);
            }
            Node::Block(body) => {
                for &child in body {
                    self.stmt(child, in_parallel);
                }
            }
            _ => {}
        }
    }
}

fn dims(shape: &[i64]) -> String {
    if shape.is_empty() {
        return "[1]".into();
    }
    shape.iter().map(|d| format!("[{}]", d)).collect()
}

fn parameters(program: &Program) -> String {
    program
        .tensors()
        .iter()
        .map(|t| format!("float {}{}", t.name, dims(&t.shape)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The program as `void <name>(float A[..][..], ...)`.
pub fn render_kernel(program: &Program, name: &str) -> String {
    let mut p = Printer {
        program,
        out: String::new(),
        depth: 0,
    };
    p.line(&format!("void {}({}) {{", name, parameters(program)));
    p.depth = 1;
    p.stmt(program.root(), false);
    p.depth = 0;
    p.line("}");
    p.out
}

/// A complete translation unit: helpers, the kernel, static storage for
/// every tensor and a timing `main`.
pub fn render_harness(program: &Program, name: &str, repetitions: u32) -> String {
    let mut out = String::new();
    out.push_str("#include <math.h>\n#include <stdio.h>\n#include <sys/time.h>\n\n");
    out.push_str(HELPERS);
    out.push('\n');
    out.push_str(&render_kernel(program, name));
    out.push('\n');

    for t in program.tensors() {
        let _ = writeln!(out, "static float {}{};", t.name, dims(&t.shape));
    }
    let args: Vec<&str> = program.tensors().iter().map(|t| t.name.as_str()).collect();
    let call = format!("{}({});", name, args.join(", "));
    let reps = repetitions.max(1);

    out.push_str("\nint main(void) {\n");
    for t in program.tensors() {
        let len: i64 = t.shape.iter().product::<i64>().max(1);
        let _ = writeln!(
            out,
            "  for (long k = 0; k < {len}; k++) ((float *){name})[k] = (float)(k % 7) * 0.5f;",
            len = len,
            name = t.name
        );
    }
    let _ = writeln!(out, "  {}", call);
    out.push_str("  struct timeval start, end;\n  gettimeofday(&start, NULL);\n");
    let _ = writeln!(out, "  for (int r = 0; r < {}; r++) {{\n    {}\n  }}", reps, call);
    out.push_str("  gettimeofday(&end, NULL);\n");
    let _ = writeln!(
        out,
        "  double ms = ((end.tv_sec - start.tv_sec) * 1000.0 + (end.tv_usec - start.tv_usec) / 1000.0) / {};",
        reps
    );
    out.push_str("  printf(\"RUNTIME_MS: %.6f\\n\", ms);\n  return 0;\n}\n");
    out
}
