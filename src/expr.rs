//! Expression language: logos tokenizer, recursive-descent parser, evaluator and the
//! polynomial normal form used for symbolic equivalence.
//!
//! Supported syntax: numbers, identifiers, `+ - * / ^`, unary minus,
//! parentheses, implicit multiplication (`2x`, `3(x+1)`), postfix `°`,
//! constants `pi`/`e`, and the functions listed in [`Func`].
//!
//! Equivalence first tries the polynomial normal form (like terms collected,
//! commutative reordering for free). Expressions that leave the polynomial
//! fragment are compared by evaluating both sides at fixed sample points.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use logos::Logos;

use crate::error::{EngineError, EngineResult};
use crate::util::format_number;

const COEFF_EPS: f64 = 1e-9;
const MAX_POLY_POWER: u32 = 16;
const SAMPLE_POINTS: [f64; 6] = [0.37, 1.29, -0.83, 2.71, -1.57, 0.61];
const MAX_INPUT_LEN: usize = 1000;
const MAX_DEPTH: usize = 64;
const MAX_COMB_N: f64 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Pow,
}

impl BinOp {
  fn precedence(self) -> u8 {
    match self {
      BinOp::Add | BinOp::Sub => 1,
      BinOp::Mul | BinOp::Div => 2,
      BinOp::Pow => 3,
    }
  }

  fn symbol(self) -> &'static str {
    match self {
      BinOp::Add => "+",
      BinOp::Sub => "-",
      BinOp::Mul => "*",
      BinOp::Div => "/",
      BinOp::Pow => "^",
    }
  }

  pub fn apply(self, a: f64, b: f64) -> f64 {
    match self {
      BinOp::Add => a + b,
      BinOp::Sub => a - b,
      BinOp::Mul => a * b,
      BinOp::Div => a / b,
      BinOp::Pow => a.powf(b),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
  Sin,
  Cos,
  Tan,
  Sqrt,
  Abs,
  Ln,
  Log,
  Exp,
  Comb,
}

impl Func {
  fn from_name(name: &str) -> Option<Self> {
    Some(match name {
      "sin" => Func::Sin,
      "cos" => Func::Cos,
      "tan" => Func::Tan,
      "sqrt" => Func::Sqrt,
      "abs" => Func::Abs,
      "ln" => Func::Ln,
      "log" => Func::Log,
      "exp" => Func::Exp,
      "comb" => Func::Comb,
      _ => return None,
    })
  }

  pub fn name(self) -> &'static str {
    match self {
      Func::Sin => "sin",
      Func::Cos => "cos",
      Func::Tan => "tan",
      Func::Sqrt => "sqrt",
      Func::Abs => "abs",
      Func::Ln => "ln",
      Func::Log => "log",
      Func::Exp => "exp",
      Func::Comb => "comb",
    }
  }

  fn arity(self) -> usize {
    match self {
      Func::Comb => 2,
      _ => 1,
    }
  }

  fn apply(self, args: &[f64]) -> f64 {
    match self {
      Func::Sin => args[0].sin(),
      Func::Cos => args[0].cos(),
      Func::Tan => args[0].tan(),
      Func::Sqrt => args[0].sqrt(),
      Func::Abs => args[0].abs(),
      Func::Ln => args[0].ln(),
      Func::Log => args[0].log10(),
      Func::Exp => args[0].exp(),
      Func::Comb => binomial(args[0], args[1]),
    }
  }
}

/// `n choose k` for non-negative integral arguments up to `n = 1000`, NaN otherwise.
pub fn binomial(n: f64, k: f64) -> f64 {
  if n > MAX_COMB_N || n < 0.0 || k < 0.0 || n.fract() != 0.0 || k.fract() != 0.0 || k > n {
    return f64::NAN;
  }
  let k = k.min(n - k) as u64;
  let n = n as u64;
  let mut acc = 1.0_f64;
  for i in 0..k {
    acc = acc * (n - i) as f64 / (i + 1) as f64;
  }
  acc.round()
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
  Num(f64),
  Var(String),
  Neg(Box<Expr>),
  Degrees(Box<Expr>),
  Bin(BinOp, Box<Expr>, Box<Expr>),
  Call(Func, Vec<Expr>),
}

impl Expr {
  pub fn num(v: f64) -> Self {
    Expr::Num(v)
  }

  pub fn var(name: &str) -> Self {
    Expr::Var(name.to_string())
  }

  pub fn bin(op: BinOp, a: Expr, b: Expr) -> Self {
    Expr::Bin(op, Box::new(a), Box::new(b))
  }

  pub fn variables(&self) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    self.collect_vars(&mut out);
    out
  }

  fn collect_vars(&self, out: &mut BTreeSet<String>) {
    match self {
      Expr::Num(_) => {}
      Expr::Var(v) => {
        out.insert(v.clone());
      }
      Expr::Neg(e) | Expr::Degrees(e) => e.collect_vars(out),
      Expr::Bin(_, a, b) => {
        a.collect_vars(out);
        b.collect_vars(out);
      }
      Expr::Call(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
    }
  }

  pub fn is_constant(&self) -> bool {
    self.variables().is_empty()
  }

  /// Replace bound variables by their values, leaving the rest symbolic.
  pub fn substitute(&self, env: &BTreeMap<String, f64>) -> Expr {
    match self {
      Expr::Num(_) => self.clone(),
      Expr::Var(name) => env.get(name).map(|v| Expr::Num(*v)).unwrap_or_else(|| self.clone()),
      Expr::Neg(e) => Expr::Neg(Box::new(e.substitute(env))),
      Expr::Degrees(e) => Expr::Degrees(Box::new(e.substitute(env))),
      Expr::Bin(op, a, b) => Expr::bin(*op, a.substitute(env), b.substitute(env)),
      Expr::Call(f, args) => Expr::Call(*f, args.iter().map(|a| a.substitute(env)).collect()),
    }
  }

  /// Evaluate with the given variable bindings. Non-finite results are errors.
  pub fn eval(&self, env: &BTreeMap<String, f64>) -> EngineResult<f64> {
    let v = match self {
      Expr::Num(v) => *v,
      Expr::Var(name) => *env
        .get(name)
        .ok_or_else(|| EngineError::parse(format!("unbound variable '{name}'"), 0))?,
      Expr::Neg(e) => -e.eval(env)?,
      Expr::Degrees(e) => e.eval(env)?.to_radians(),
      Expr::Bin(op, a, b) => op.apply(a.eval(env)?, b.eval(env)?),
      Expr::Call(f, args) => {
        let vals = args.iter().map(|a| a.eval(env)).collect::<EngineResult<Vec<_>>>()?;
        f.apply(&vals)
      }
    };
    if v.is_finite() {
      Ok(v)
    } else {
      Err(EngineError::parse(format!("'{self}' has no finite value"), 0))
    }
  }

  pub fn eval_constant(&self) -> EngineResult<f64> {
    self.eval(&BTreeMap::new())
  }

  /// Reduce exactly one binary operation, the one a learner would do next:
  /// the leftmost innermost operation whose operands are both numbers.
  /// Returns `None` once the expression is a single number or cannot be reduced.
  pub fn reduce_once(&self) -> Option<(Expr, BinOp)> {
    match self {
      Expr::Bin(op, a, b) => {
        if let (Expr::Num(x), Expr::Num(y)) = (a.as_ref(), b.as_ref()) {
          return Some((Expr::Num(op.apply(*x, *y)), *op));
        }
        if let Some((ra, used)) = a.reduce_once() {
          return Some((Expr::Bin(*op, Box::new(ra), b.clone()), used));
        }
        b.reduce_once()
          .map(|(rb, used)| (Expr::Bin(*op, a.clone(), Box::new(rb)), used))
      }
      Expr::Neg(e) => match e.as_ref() {
        Expr::Num(x) => Some((Expr::Num(-x), BinOp::Sub)),
        _ => e.reduce_once().map(|(r, used)| (Expr::Neg(Box::new(r)), used)),
      },
      _ => None,
    }
  }

  /// Evaluate strictly left to right, ignoring precedence between `+ -` and `* /`.
  /// This is the classic order-of-operations slip and is used to recognise it.
  pub fn eval_left_to_right(&self) -> Option<f64> {
    let mut operands = Vec::new();
    let mut ops = Vec::new();
    flatten_arith(self, &mut operands, &mut ops)?;
    let mut acc = *operands.first()?;
    for (op, v) in ops.iter().zip(operands.iter().skip(1)) {
      acc = op.apply(acc, *v);
    }
    acc.is_finite().then_some(acc)
  }
}

fn flatten_arith(e: &Expr, operands: &mut Vec<f64>, ops: &mut Vec<BinOp>) -> Option<()> {
  match e {
    Expr::Num(v) => {
      operands.push(*v);
      Some(())
    }
    Expr::Neg(inner) => match inner.as_ref() {
      Expr::Num(v) => {
        operands.push(-v);
        Some(())
      }
      _ => None,
    },
    // In-order walk: grouping and precedence are both forgotten.
    Expr::Bin(op, a, b) if *op != BinOp::Pow => {
      flatten_arith(a, operands, ops)?;
      ops.push(*op);
      flatten_arith(b, operands, ops)
    }
    other => {
      operands.push(other.eval_constant().ok()?);
      Some(())
    }
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_expr(self, f, 0, false)
  }
}

fn write_expr(e: &Expr, f: &mut fmt::Formatter<'_>, parent_prec: u8, right_side: bool) -> fmt::Result {
  match e {
    Expr::Num(v) => {
      if *v < 0.0 && parent_prec > 0 {
        write!(f, "({})", format_number(*v))
      } else {
        write!(f, "{}", format_number(*v))
      }
    }
    Expr::Var(v) => write!(f, "{v}"),
    Expr::Neg(inner) => {
      if parent_prec > 1 {
        write!(f, "(-")?;
        write_expr(inner, f, 3, false)?;
        write!(f, ")")
      } else {
        write!(f, "-")?;
        write_expr(inner, f, 3, false)
      }
    }
    Expr::Degrees(inner) => {
      write_expr(inner, f, 4, false)?;
      write!(f, "°")
    }
    Expr::Bin(op, a, b) => {
      let prec = op.precedence();
      let needs_parens = prec < parent_prec
        || (prec == parent_prec && right_side && *op != BinOp::Pow)
        || (prec == parent_prec && !right_side && *op == BinOp::Pow);
      if needs_parens {
        write!(f, "(")?;
      }
      write_expr(a, f, prec, false)?;
      if *op == BinOp::Pow {
        write!(f, "^")?;
      } else {
        write!(f, " {} ", op.symbol())?;
      }
      write_expr(b, f, prec, true)?;
      if needs_parens {
        write!(f, ")")?;
      }
      Ok(())
    }
    Expr::Call(func, args) => {
      write!(f, "{}(", func.name())?;
      for (i, a) in args.iter().enumerate() {
        if i > 0 {
          write!(f, ", ")?;
        }
        write_expr(a, f, 0, false)?;
      }
      write!(f, ")")
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Equation {
  pub lhs: Expr,
  pub rhs: Expr,
}

impl Equation {
  /// `lhs - rhs`, the expression whose roots are the solutions.
  pub fn residual(&self) -> Expr {
    Expr::bin(BinOp::Sub, self.lhs.clone(), self.rhs.clone())
  }

  pub fn variables(&self) -> BTreeSet<String> {
    let mut vars = self.lhs.variables();
    vars.extend(self.rhs.variables());
    vars
  }

  /// `Some((var, value))` when the equation already reads `var = constant`
  /// (either way round).
  pub fn solved_form(&self) -> Option<(String, f64)> {
    match (&self.lhs, &self.rhs) {
      (Expr::Var(v), other) | (other, Expr::Var(v)) if other.is_constant() => {
        other.eval_constant().ok().map(|c| (v.clone(), c))
      }
      _ => None,
    }
  }
}

impl fmt::Display for Equation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} = {}", self.lhs, self.rhs)
  }
}

// ---------------- Tokenizer ----------------

#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"[ \t\n\r\f]+")]
enum Tok {
  #[regex(r"[0-9]+(\.[0-9]*)?|\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
  Num(f64),
  #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
  #[token("π", |_| "pi".to_string())]
  Ident(String),
  #[token("+")]
  Plus,
  #[token("-")]
  #[token("−")]
  Minus,
  #[token("*")]
  #[token("×")]
  #[token("·")]
  Star,
  #[token("/")]
  #[token("÷")]
  Slash,
  #[token("^")]
  Caret,
  #[token("(")]
  #[token("[")]
  LParen,
  #[token(")")]
  #[token("]")]
  RParen,
  #[token(",")]
  Comma,
  #[token("°")]
  Degree,
  #[token("=")]
  Eq,
}

fn tokenize(src: &str) -> EngineResult<Vec<(Tok, usize)>> {
  if src.len() > MAX_INPUT_LEN {
    return Err(EngineError::parse(format!("input longer than {MAX_INPUT_LEN} bytes"), MAX_INPUT_LEN));
  }
  let mut lex = Tok::lexer(src);
  let mut out = Vec::new();
  while let Some(tok) = lex.next() {
    let pos = lex.span().start;
    match tok {
      Ok(t) => out.push((t, pos)),
      Err(()) => return Err(EngineError::parse(format!("unexpected input '{}'", lex.slice()), pos)),
    }
  }
  Ok(out)
}

// ---------------- Parser ----------------

struct Parser {
  toks: Vec<(Tok, usize)>,
  idx: usize,
  end: usize,
  depth: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Tok> {
    self.toks.get(self.idx).map(|(t, _)| t)
  }

  fn pos(&self) -> usize {
    self.toks.get(self.idx).map(|(_, p)| *p).unwrap_or(self.end)
  }

  fn bump(&mut self) -> Option<Tok> {
    let t = self.toks.get(self.idx).map(|(t, _)| t.clone());
    self.idx += 1;
    t
  }

  fn expect(&mut self, want: Tok, what: &str) -> EngineResult<()> {
    let pos = self.pos();
    match self.bump() {
      Some(t) if t == want => Ok(()),
      _ => Err(EngineError::parse(format!("expected {what}"), pos)),
    }
  }

  fn expr(&mut self) -> EngineResult<Expr> {
    let mut lhs = self.term()?;
    loop {
      let op = match self.peek() {
        Some(Tok::Plus) => BinOp::Add,
        Some(Tok::Minus) => BinOp::Sub,
        _ => return Ok(lhs),
      };
      self.bump();
      let rhs = self.term()?;
      lhs = Expr::bin(op, lhs, rhs);
    }
  }

  fn term(&mut self) -> EngineResult<Expr> {
    let mut lhs = self.unary()?;
    loop {
      let op = match self.peek() {
        Some(Tok::Star) => {
          self.bump();
          BinOp::Mul
        }
        Some(Tok::Slash) => {
          self.bump();
          BinOp::Div
        }
        // implicit multiplication: 2x, 3(x + 1), x(x - 2)
        Some(Tok::Ident(_)) | Some(Tok::LParen) => BinOp::Mul,
        _ => return Ok(lhs),
      };
      let rhs = self.unary()?;
      lhs = Expr::bin(op, lhs, rhs);
    }
  }

  /// Every recursive path (parentheses, calls, signs, exponents) passes
  /// through here, so this is where nesting is bounded.
  fn unary(&mut self) -> EngineResult<Expr> {
    if self.depth >= MAX_DEPTH {
      return Err(EngineError::parse(format!("expression nested deeper than {MAX_DEPTH} levels"), self.pos()));
    }
    self.depth += 1;
    let out = self.signed();
    self.depth -= 1;
    out
  }

  fn signed(&mut self) -> EngineResult<Expr> {
    match self.peek() {
      Some(Tok::Minus) => {
        self.bump();
        let inner = self.unary()?;
        Ok(match inner {
          Expr::Num(v) => Expr::Num(-v),
          other => Expr::Neg(Box::new(other)),
        })
      }
      Some(Tok::Plus) => {
        self.bump();
        self.unary()
      }
      _ => self.power(),
    }
  }

  fn power(&mut self) -> EngineResult<Expr> {
    let base = self.postfix()?;
    if let Some(Tok::Caret) = self.peek() {
      self.bump();
      let exp = self.unary()?;
      return Ok(Expr::bin(BinOp::Pow, base, exp));
    }
    Ok(base)
  }

  fn postfix(&mut self) -> EngineResult<Expr> {
    let mut e = self.primary()?;
    while let Some(Tok::Degree) = self.peek() {
      self.bump();
      e = Expr::Degrees(Box::new(e));
    }
    Ok(e)
  }

  fn primary(&mut self) -> EngineResult<Expr> {
    let pos = self.pos();
    match self.bump() {
      Some(Tok::Num(v)) => Ok(Expr::Num(v)),
      Some(Tok::LParen) => {
        let e = self.expr()?;
        self.expect(Tok::RParen, "')'")?;
        Ok(e)
      }
      Some(Tok::Ident(name)) => {
        if let Some(func) = Func::from_name(&name) {
          self.expect(Tok::LParen, "'(' after function name")?;
          let mut args = vec![self.expr()?];
          while let Some(Tok::Comma) = self.peek() {
            self.bump();
            args.push(self.expr()?);
          }
          self.expect(Tok::RParen, "')'")?;
          if args.len() != func.arity() {
            return Err(EngineError::parse(
              format!("{} takes {} argument(s)", func.name(), func.arity()),
              pos,
            ));
          }
          return Ok(Expr::Call(func, args));
        }
        Ok(match name.as_str() {
          "pi" => Expr::Num(std::f64::consts::PI),
          "e" => Expr::Num(std::f64::consts::E),
          _ => Expr::Var(name),
        })
      }
      Some(_) => Err(EngineError::parse("unexpected token", pos)),
      None => Err(EngineError::parse("unexpected end of input", pos)),
    }
  }
}

fn parse_tokens(toks: Vec<(Tok, usize)>, end: usize) -> EngineResult<Expr> {
  if toks.is_empty() {
    return Err(EngineError::parse("empty expression", 0));
  }
  let mut p = Parser { toks, idx: 0, end, depth: 0 };
  let e = p.expr()?;
  if p.idx < p.toks.len() {
    return Err(EngineError::parse("trailing input", p.pos()));
  }
  Ok(e)
}

pub fn parse_expr(src: &str) -> EngineResult<Expr> {
  let toks = tokenize(src)?;
  if let Some((_, pos)) = toks.iter().find(|(t, _)| *t == Tok::Eq) {
    return Err(EngineError::parse("'=' is not allowed in an expression", *pos));
  }
  parse_tokens(toks, src.len())
}

pub fn parse_equation(src: &str) -> EngineResult<Equation> {
  let toks = tokenize(src)?;
  let eqs: Vec<usize> = toks
    .iter()
    .enumerate()
    .filter(|(_, (t, _))| *t == Tok::Eq)
    .map(|(i, _)| i)
    .collect();
  if eqs.len() != 1 {
    return Err(EngineError::parse("an equation needs exactly one '='", 0));
  }
  let split = eqs[0];
  let eq_pos = toks[split].1;
  let mut lhs_toks = toks;
  let rhs_toks = lhs_toks.split_off(split + 1);
  lhs_toks.pop();
  Ok(Equation {
    lhs: parse_tokens(lhs_toks, eq_pos)?,
    rhs: parse_tokens(rhs_toks, src.len())?,
  })
}

// ---------------- Polynomial normal form ----------------

/// Sorted `(variable, exponent)` pairs; empty means the constant term.
pub type Monomial = Vec<(String, u32)>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Poly {
  terms: BTreeMap<Monomial, f64>,
}

impl Poly {
  pub fn constant(c: f64) -> Self {
    let mut p = Poly::default();
    p.add_term(Vec::new(), c);
    p
  }

  pub fn variable(name: &str) -> Self {
    let mut p = Poly::default();
    p.add_term(vec![(name.to_string(), 1)], 1.0);
    p
  }

  fn add_term(&mut self, m: Monomial, c: f64) {
    let slot = self.terms.entry(m.clone()).or_insert(0.0);
    *slot += c;
    if slot.abs() < 1e-12 {
      self.terms.remove(&m);
    }
  }

  pub fn is_zero(&self) -> bool {
    self.terms.is_empty()
  }

  pub fn constant_value(&self) -> Option<f64> {
    match self.terms.len() {
      0 => Some(0.0),
      1 => self.terms.get(&Vec::new()).copied(),
      _ => None,
    }
  }

  pub fn coefficient(&self, m: &Monomial) -> f64 {
    self.terms.get(m).copied().unwrap_or(0.0)
  }

  pub fn degree_in(&self, var: &str) -> u32 {
    self.terms
      .keys()
      .flat_map(|m| m.iter().filter(|(v, _)| v == var).map(|(_, e)| *e))
      .max()
      .unwrap_or(0)
  }

  pub fn add(&self, other: &Poly) -> Poly {
    let mut out = self.clone();
    for (m, c) in &other.terms {
      out.add_term(m.clone(), *c);
    }
    out
  }

  pub fn scale(&self, k: f64) -> Poly {
    let mut out = Poly::default();
    for (m, c) in &self.terms {
      out.add_term(m.clone(), c * k);
    }
    out
  }

  pub fn sub(&self, other: &Poly) -> Poly {
    self.add(&other.scale(-1.0))
  }

  pub fn mul(&self, other: &Poly) -> Poly {
    let mut out = Poly::default();
    for (ma, ca) in &self.terms {
      for (mb, cb) in &other.terms {
        out.add_term(mul_monomials(ma, mb), ca * cb);
      }
    }
    out
  }

  pub fn pow(&self, n: u32) -> Poly {
    (0..n).fold(Poly::constant(1.0), |acc, _| acc.mul(self))
  }

  pub fn derivative(&self, var: &str) -> Poly {
    let mut out = Poly::default();
    for (m, c) in &self.terms {
      if let Some(idx) = m.iter().position(|(v, _)| v == var) {
        let e = m[idx].1;
        let mut nm = m.clone();
        if e == 1 {
          nm.remove(idx);
        } else {
          nm[idx].1 = e - 1;
        }
        out.add_term(nm, c * e as f64);
      }
    }
    out
  }

  pub fn antiderivative(&self, var: &str) -> Poly {
    let mut out = Poly::default();
    for (m, c) in &self.terms {
      let mut nm = m.clone();
      let e = match nm.iter().position(|(v, _)| v == var) {
        Some(idx) => {
          nm[idx].1 += 1;
          nm[idx].1
        }
        None => {
          nm.push((var.to_string(), 1));
          nm.sort();
          1
        }
      };
      out.add_term(nm, c / e as f64);
    }
    out
  }

  pub fn eval(&self, env: &BTreeMap<String, f64>) -> Option<f64> {
    let mut acc = 0.0;
    for (m, c) in &self.terms {
      let mut t = *c;
      for (v, e) in m {
        t *= env.get(v)?.powi(*e as i32);
      }
      acc += t;
    }
    Some(acc)
  }

  /// Divide through by the coefficient of the leading monomial, so that
  /// `k·p` and `p` normalize to the same polynomial.
  pub fn monic(&self) -> Poly {
    match self.terms.iter().next_back() {
      Some((_, lead)) => self.scale(1.0 / lead),
      None => Poly::default(),
    }
  }

  pub fn approx_eq(&self, other: &Poly) -> bool {
    let keys: BTreeSet<&Monomial> = self.terms.keys().chain(other.terms.keys()).collect();
    keys.into_iter().all(|m| {
      let a = self.coefficient(m);
      let b = other.coefficient(m);
      (a - b).abs() <= COEFF_EPS * 1f64.max(a.abs()).max(b.abs())
    })
  }

  /// Ordered by descending total degree for display.
  fn display_terms(&self) -> Vec<(&Monomial, f64)> {
    let mut terms: Vec<(&Monomial, f64)> = self.terms.iter().map(|(m, c)| (m, *c)).collect();
    terms.sort_by(|(ma, _), (mb, _)| {
      let da: u32 = ma.iter().map(|(_, e)| e).sum();
      let db: u32 = mb.iter().map(|(_, e)| e).sum();
      db.cmp(&da).then_with(|| ma.cmp(mb))
    });
    terms
  }
}

fn mul_monomials(a: &Monomial, b: &Monomial) -> Monomial {
  let mut map: BTreeMap<String, u32> = a.iter().cloned().collect();
  for (v, e) in b {
    *map.entry(v.clone()).or_insert(0) += e;
  }
  map.into_iter().collect()
}

impl fmt::Display for Poly {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let terms = self.display_terms();
    if terms.is_empty() {
      return write!(f, "0");
    }
    for (i, (m, c)) in terms.into_iter().enumerate() {
      let mag = c.abs();
      if i == 0 {
        if c < 0.0 {
          write!(f, "-")?;
        }
      } else {
        write!(f, " {} ", if c < 0.0 { "-" } else { "+" })?;
      }
      let vars: Vec<String> = m
        .iter()
        .map(|(v, e)| if *e == 1 { v.clone() } else { format!("{v}^{e}") })
        .collect();
      if m.is_empty() || (mag - 1.0).abs() > 1e-12 {
        write!(f, "{}", format_number(mag))?;
      }
      write!(f, "{}", vars.join(""))?;
    }
    Ok(())
  }
}

/// Polynomial normal form, or `None` when the expression leaves the polynomial fragment.
pub fn to_poly(e: &Expr) -> Option<Poly> {
  match e {
    Expr::Num(v) => Some(Poly::constant(*v)),
    Expr::Var(v) => Some(Poly::variable(v)),
    Expr::Neg(inner) => to_poly(inner).map(|p| p.scale(-1.0)),
    Expr::Degrees(_) | Expr::Call(..) => {
      if e.is_constant() {
        e.eval_constant().ok().map(Poly::constant)
      } else {
        None
      }
    }
    Expr::Bin(op, a, b) => {
      let pa = to_poly(a)?;
      let pb = to_poly(b)?;
      match op {
        BinOp::Add => Some(pa.add(&pb)),
        BinOp::Sub => Some(pa.sub(&pb)),
        BinOp::Mul => Some(pa.mul(&pb)),
        BinOp::Div => {
          let d = pb.constant_value()?;
          (d != 0.0).then(|| pa.scale(1.0 / d))
        }
        BinOp::Pow => {
          let n = pb.constant_value()?;
          if let Some(base) = pa.constant_value() {
            let v = base.powf(n);
            return v.is_finite().then(|| Poly::constant(v));
          }
          if n >= 0.0 && n.fract() == 0.0 && n <= MAX_POLY_POWER as f64 {
            Some(pa.pow(n as u32))
          } else {
            None
          }
        }
      }
    }
  }
}

fn sample_envs(vars: &BTreeSet<String>) -> Vec<BTreeMap<String, f64>> {
  SAMPLE_POINTS
    .iter()
    .enumerate()
    .map(|(i, base)| {
      vars.iter()
        .enumerate()
        .map(|(j, v)| (v.clone(), base + 0.113 * (j as f64) * (i as f64 + 1.0)))
        .collect()
    })
    .collect()
}

fn close(a: f64, b: f64) -> bool {
  (a - b).abs() <= 1e-9 * 1f64.max(a.abs()).max(b.abs())
}

/// Symbolic equivalence of two expressions.
pub fn expressions_equivalent(a: &Expr, b: &Expr) -> bool {
  if let (Some(pa), Some(pb)) = (to_poly(a), to_poly(b)) {
    return pa.approx_eq(&pb);
  }
  let mut vars = a.variables();
  vars.extend(b.variables());
  let mut compared = 0;
  for env in sample_envs(&vars) {
    match (a.eval(&env), b.eval(&env)) {
      (Ok(x), Ok(y)) => {
        if !close(x, y) {
          return false;
        }
        compared += 1;
      }
      (Err(_), Err(_)) => {}
      _ => return false,
    }
  }
  compared > 0
}

/// Equations are equivalent when their residuals agree up to a non-zero factor,
/// so `x = 5`, `5 = x` and `2x = 10` all coincide.
pub fn equations_equivalent(a: &Equation, b: &Equation) -> bool {
  let ra = a.residual();
  let rb = b.residual();
  if let (Some(pa), Some(pb)) = (to_poly(&ra), to_poly(&rb)) {
    return pa.monic().approx_eq(&pb.monic());
  }
  let mut vars = ra.variables();
  vars.extend(rb.variables());
  let mut ratio: Option<f64> = None;
  for env in sample_envs(&vars) {
    let (Ok(x), Ok(y)) = (ra.eval(&env), rb.eval(&env)) else {
      continue;
    };
    if y.abs() < 1e-12 {
      if x.abs() > 1e-9 {
        return false;
      }
      continue;
    }
    let r = x / y;
    match ratio {
      None if r.abs() < 1e-12 => return false,
      None => ratio = Some(r),
      Some(k) if !close(k, r) => return false,
      Some(_) => {}
    }
  }
  ratio.is_some()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn eval(s: &str) -> f64 {
    parse_expr(s).expect("parse").eval_constant().expect("eval")
  }

  #[test]
  fn precedence_and_implicit_multiplication() {
    assert_eq!(eval("2 + 3 * 4"), 14.0);
    assert_eq!(eval("(2 + 3) * 4"), 20.0);
    assert_eq!(eval("2^3^2"), 512.0);
    assert_eq!(eval("-2^2"), -4.0);
    assert_eq!(eval("2(3 + 1)"), 8.0);
    assert_eq!(eval("comb(5, 2)"), 10.0);
    assert!((eval("sin(30°)") - 0.5).abs() < 1e-12);
  }

  #[test]
  fn malformed_input_reports_position() {
    match parse_expr("2 + * 3") {
      Err(EngineError::Parse { position, .. }) => assert_eq!(position, 4),
      other => panic!("expected parse error, got {other:?}"),
    }
    assert!(parse_expr("").is_err());
    assert!(parse_expr("sin 3").is_err());
    assert!(parse_equation("x = 1 = 2").is_err());
  }

  #[test]
  fn deep_nesting_is_a_parse_error() {
    let parens = format!("{}1{}", "(".repeat(400), ")".repeat(400));
    assert!(matches!(parse_expr(&parens), Err(EngineError::Parse { .. })));
    let signs = format!("{}1", "-".repeat(400));
    assert!(matches!(parse_expr(&signs), Err(EngineError::Parse { .. })));
    let towers = vec!["2"; 300].join("^");
    assert!(matches!(parse_expr(&towers), Err(EngineError::Parse { .. })));
    assert_eq!(eval(&format!("{}1{}", "(".repeat(40), ")".repeat(40))), 1.0);
  }

  #[test]
  fn oversized_input_is_refused_before_lexing() {
    let long = vec!["1"; 200_000].join("+");
    match parse_expr(&long) {
      Err(EngineError::Parse { position, .. }) => assert_eq!(position, MAX_INPUT_LEN),
      other => panic!("expected parse error, got {other:?}"),
    }
  }

  #[test]
  fn huge_binomials_do_not_evaluate() {
    assert!(binomial(1e14, 5e13).is_nan());
    assert!(parse_expr("comb(100000000000000, 50000000000000)").unwrap().eval_constant().is_err());
    assert_eq!(binomial(1000.0, 1.0), 1000.0);
  }

  #[test]
  fn lexer_accepts_typeset_symbols() {
    assert_eq!(eval("6 × 2 − 3 ÷ 3"), 11.0);
    assert!((eval("π") - std::f64::consts::PI).abs() < 1e-15);
    assert_eq!(eval("[2 + 1] · 2"), 6.0);
    match parse_expr("2 $ 3") {
      Err(EngineError::Parse { position, .. }) => assert_eq!(position, 2),
      other => panic!("expected parse error, got {other:?}"),
    }
  }

  #[test]
  fn like_terms_collect() {
    let a = parse_expr("x + x + 3*y - y").unwrap();
    let b = parse_expr("2*y + 2x").unwrap();
    assert!(expressions_equivalent(&a, &b));
    let c = parse_expr("(x + 1)^2").unwrap();
    let d = parse_expr("x^2 + 2x + 1").unwrap();
    assert!(expressions_equivalent(&c, &d));
    assert!(!expressions_equivalent(&c, &parse_expr("x^2 + 1").unwrap()));
  }

  #[test]
  fn equation_sides_and_scaling() {
    let a = parse_equation("x = 5").unwrap();
    let b = parse_equation("5 = x").unwrap();
    let c = parse_equation("2x = 10").unwrap();
    let d = parse_equation("x = 6").unwrap();
    assert!(equations_equivalent(&a, &b));
    assert!(equations_equivalent(&b, &a));
    assert!(equations_equivalent(&a, &c));
    assert!(!equations_equivalent(&a, &d));
  }

  #[test]
  fn non_polynomial_falls_back_to_sampling() {
    let a = parse_expr("sin(x)^2 + cos(x)^2").unwrap();
    let b = parse_expr("1").unwrap();
    assert!(expressions_equivalent(&a, &b));
    let c = parse_expr("1/x + 1/x").unwrap();
    let d = parse_expr("2/x").unwrap();
    assert!(expressions_equivalent(&c, &d));
  }

  #[test]
  fn reduce_once_respects_precedence() {
    let e = parse_expr("2 + 3 * 4").unwrap();
    let (r, op) = e.reduce_once().unwrap();
    assert_eq!(op, BinOp::Mul);
    assert_eq!(r.to_string(), "2 + 12");
    let (r, _) = r.reduce_once().unwrap();
    assert_eq!(r, Expr::Num(14.0));
    assert!(r.reduce_once().is_none());
  }

  #[test]
  fn left_to_right_slip() {
    let e = parse_expr("2 + 3 * 4").unwrap();
    assert_eq!(e.eval_left_to_right(), Some(20.0));
  }

  #[test]
  fn calculus_on_polys() {
    let p = to_poly(&parse_expr("3x^2 + 2x - 5").unwrap()).unwrap();
    assert_eq!(p.to_string(), "3x^2 + 2x - 5");
    assert_eq!(p.derivative("x").to_string(), "6x + 2");
    assert_eq!(p.antiderivative("x").to_string(), "x^3 + x^2 - 5x");
  }

  #[test]
  fn display_round_trips_through_parser() {
    let e = parse_expr("(1 - 2) - (3 - 4) / 2^(1 + 1)").unwrap();
    let again = parse_expr(&e.to_string()).unwrap();
    assert_eq!(e.eval_constant().unwrap(), again.eval_constant().unwrap());
  }
}
