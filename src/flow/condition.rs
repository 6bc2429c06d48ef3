//! Restricted boolean expression language for flow step conditionals.
//!
//! Deliberately not a general-purpose evaluator: identifiers bind to a fixed
//! whitelist, there are no function calls, no arithmetic and no assignment,
//! so a hostile flow file cannot execute anything. Expressions are parsed
//! once at config load; evaluation failures (unknown identifier, type
//! mismatch) make the condition false and are logged by the caller.
//!
//! Grammar:
//! ```text
//! expr       := or
//! or         := and ("||" and)*
//! and        := unary ("&&" unary)*
//! unary      := "!" unary | comparison
//! comparison := primary (cmp_op primary)?
//! primary    := literal | identifier | "(" expr ")"
//! identifier := name | step_name "." ("quality_score" | "status")
//! literal    := string | number | "true" | "false"
//! ```

use std::fmt;

/// A value an expression term can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
        }
    }
}

/// Whitelisted identifier forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    /// `complexity` — session complexity string.
    Complexity,
    /// `quality_score` — the last recorded quality score.
    QualityScore,
    /// `step_count` — count of completed step rows.
    StepCount,
    /// `<step>.quality_score`
    StepQuality(String),
    /// `<step>.status`
    StepStatus(String),
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Complexity => write!(f, "complexity"),
            Ident::QualityScore => write!(f, "quality_score"),
            Ident::StepCount => write!(f, "step_count"),
            Ident::StepQuality(s) => write!(f, "{}.quality_score", s),
            Ident::StepStatus(s) => write!(f, "{}.status", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Ident(Ident),
    Cmp(Box<Expr>, CmpOp, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// Environment a condition is evaluated against. Implemented by the flow
/// engine over the current session snapshot.
pub trait Env {
    /// Resolve an identifier, or `None` when it has no value yet (unknown
    /// step, no score recorded).
    fn lookup(&self, ident: &Ident) -> Option<Value>;
}

/// Why an evaluation could not produce a boolean. The engine maps any of
/// these to `false` and logs the condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    UnknownIdentifier(String),
    TypeMismatch(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownIdentifier(id) => write!(f, "unknown identifier '{}'", id),
            EvalError::TypeMismatch(msg) => write!(f, "type mismatch: {}", msg),
        }
    }
}

/// A parsed conditional expression, retaining its source text for logs.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    expr: Expr,
    source: String,
}

impl Condition {
    /// Parse `src` into a condition. Errors are meant to surface as
    /// `ConfigInvalid` at load time.
    pub fn parse(src: &str) -> Result<Self, String> {
        let tokens = lex(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!(
                "unexpected trailing input at '{}'",
                parser.tokens[parser.pos]
            ));
        }
        Ok(Self {
            expr,
            source: src.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Step names referenced via `<step>.quality_score` / `<step>.status`,
    /// for load-time validation.
    pub fn referenced_steps(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_steps(&self.expr, &mut out);
        out
    }

    /// Evaluate against `env`.
    pub fn eval(&self, env: &dyn Env) -> Result<bool, EvalError> {
        match eval_expr(&self.expr, env)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::TypeMismatch(format!(
                "condition yields {}, expected boolean",
                other.type_name()
            ))),
        }
    }
}

fn collect_steps<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Ident(Ident::StepQuality(s)) | Expr::Ident(Ident::StepStatus(s)) => {
            if !out.contains(&s.as_str()) {
                out.push(s);
            }
        }
        Expr::Cmp(a, _, b) | Expr::And(a, b) | Expr::Or(a, b) => {
            collect_steps(a, out);
            collect_steps(b, out);
        }
        Expr::Not(a) => collect_steps(a, out),
        _ => {}
    }
}

fn eval_expr(expr: &Expr, env: &dyn Env) -> Result<Value, EvalError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(id) => env
            .lookup(id)
            .ok_or_else(|| EvalError::UnknownIdentifier(id.to_string())),
        Expr::Cmp(a, op, b) => {
            let left = eval_expr(a, env)?;
            let right = eval_expr(b, env)?;
            compare(&left, *op, &right).map(Value::Bool)
        }
        Expr::And(a, b) => {
            if !expect_bool(eval_expr(a, env)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(expect_bool(eval_expr(b, env)?)?))
        }
        Expr::Or(a, b) => {
            if expect_bool(eval_expr(a, env)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(expect_bool(eval_expr(b, env)?)?))
        }
        Expr::Not(a) => Ok(Value::Bool(!expect_bool(eval_expr(a, env)?)?)),
    }
}

fn expect_bool(v: Value) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::TypeMismatch(format!(
            "expected boolean, got {}",
            other.type_name()
        ))),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool, EvalError> {
    use CmpOp::*;
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => Ok(match op {
            Eq => a == b,
            Ne => a != b,
            Lt => a < b,
            Le => a <= b,
            Gt => a > b,
            Ge => a >= b,
        }),
        (Value::Str(a), Value::Str(b)) => match op {
            Eq => Ok(a == b),
            Ne => Ok(a != b),
            _ => Err(EvalError::TypeMismatch(
                "ordering comparison on strings".into(),
            )),
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            Eq => Ok(a == b),
            Ne => Ok(a != b),
            _ => Err(EvalError::TypeMismatch(
                "ordering comparison on booleans".into(),
            )),
        },
        (a, b) => Err(EvalError::TypeMismatch(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    True,
    False,
    Name(String),
    Dot,
    LParen,
    RParen,
    Not,
    AndAnd,
    OrOr,
    Cmp(CmpOp),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Num(n) => write!(f, "{}", n),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Name(n) => write!(f, "{}", n),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Not => write!(f, "!"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Cmp(op) => {
                let s = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                write!(f, "{}", s)
            }
        }
    }
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b'&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err("single '&' (expected '&&')".into());
                }
            }
            b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err("single '|' (expected '||')".into());
                }
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err("assignment is not supported (expected '==')".into());
                }
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Lt));
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Cmp(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Gt));
                    i += 1;
                }
            }
            b'\'' | b'"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                if end == bytes.len() {
                    return Err("unterminated string literal".into());
                }
                tokens.push(Token::Str(src[start..end].to_string()));
                i = end + 1;
            }
            b'0'..=b'9' => {
                let start = i;
                let mut end = i;
                while end < bytes.len()
                    && (bytes[end].is_ascii_digit() || bytes[end] == b'.')
                {
                    end += 1;
                }
                // A trailing '.' belongs to a dotted identifier, not the
                // number; numbers never end in '.'
                if end > start && bytes[end - 1] == b'.' {
                    end -= 1;
                }
                let text = &src[start..end];
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(n));
                i = end;
            }
            _ if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                let mut end = i;
                while end < bytes.len()
                    && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &src[start..end];
                tokens.push(match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Name(word.to_string()),
                });
                i = end;
            }
            other => return Err(format!("unexpected character '{}'", other as char)),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.primary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.bump();
            let right = self.primary()?;
            return Ok(Expr::Cmp(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Expr::Lit(Value::Num(n))),
            Some(Token::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".into()),
                }
            }
            Some(Token::Name(name)) => self.identifier(name),
            Some(other) => Err(format!("unexpected token {}", other)),
            None => Err("unexpected end of expression".into()),
        }
    }

    fn identifier(&mut self, first: String) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Dot) {
            self.bump();
            let prop = match self.bump() {
                Some(Token::Name(p)) => p,
                _ => return Err(format!("expected property after '{}.'", first)),
            };
            return match prop.as_str() {
                "quality_score" => Ok(Expr::Ident(Ident::StepQuality(first))),
                "status" => Ok(Expr::Ident(Ident::StepStatus(first))),
                other => Err(format!(
                    "unknown step property '{}' (expected quality_score or status)",
                    other
                )),
            };
        }
        match first.as_str() {
            "complexity" => Ok(Expr::Ident(Ident::Complexity)),
            "quality_score" => Ok(Expr::Ident(Ident::QualityScore)),
            "step_count" => Ok(Expr::Ident(Ident::StepCount)),
            other => Err(format!(
                "unknown identifier '{}' (bare identifiers: complexity, quality_score, step_count)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct TestEnv {
        complexity: Option<&'static str>,
        quality: Option<f64>,
        step_count: i64,
        scores: HashMap<&'static str, f64>,
        statuses: HashMap<&'static str, &'static str>,
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self {
                complexity: Some("moderate"),
                quality: Some(0.8),
                step_count: 2,
                scores: HashMap::new(),
                statuses: HashMap::new(),
            }
        }
    }

    impl Env for TestEnv {
        fn lookup(&self, ident: &Ident) -> Option<Value> {
            match ident {
                Ident::Complexity => self.complexity.map(|s| Value::Str(s.to_string())),
                Ident::QualityScore => self.quality.map(Value::Num),
                Ident::StepCount => Some(Value::Num(self.step_count as f64)),
                Ident::StepQuality(s) => self.scores.get(s.as_str()).copied().map(Value::Num),
                Ident::StepStatus(s) => self
                    .statuses
                    .get(s.as_str())
                    .map(|v| Value::Str(v.to_string())),
            }
        }
    }

    fn eval(src: &str, env: &TestEnv) -> Result<bool, EvalError> {
        Condition::parse(src).expect("parse").eval(env)
    }

    #[test]
    fn string_equality() {
        let env = TestEnv::default();
        assert_eq!(eval("complexity == 'moderate'", &env), Ok(true));
        assert_eq!(eval("complexity == 'complex'", &env), Ok(false));
        assert_eq!(eval("complexity != 'complex'", &env), Ok(true));
    }

    #[test]
    fn numeric_comparisons() {
        let env = TestEnv::default();
        assert_eq!(eval("quality_score >= 0.8", &env), Ok(true));
        assert_eq!(eval("quality_score > 0.8", &env), Ok(false));
        assert_eq!(eval("step_count < 3", &env), Ok(true));
    }

    #[test]
    fn boolean_combinators_and_parens() {
        let env = TestEnv::default();
        assert_eq!(
            eval("complexity == 'moderate' && quality_score >= 0.5", &env),
            Ok(true)
        );
        assert_eq!(
            eval("(complexity == 'complex' || step_count >= 2) && !false", &env),
            Ok(true)
        );
        assert_eq!(eval("!(quality_score >= 0.5)", &env), Ok(false));
    }

    #[test]
    fn step_scoped_identifiers() {
        let mut env = TestEnv::default();
        env.scores.insert("evaluate", 0.9);
        env.statuses.insert("decompose", "completed");
        assert_eq!(eval("evaluate.quality_score >= 0.8", &env), Ok(true));
        assert_eq!(eval("decompose.status == 'completed'", &env), Ok(true));
    }

    #[test]
    fn unknown_identifier_is_an_eval_error() {
        let env = TestEnv::default();
        let cond = Condition::parse("missing.quality_score > 0.5").unwrap();
        assert!(matches!(
            cond.eval(&env),
            Err(EvalError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn no_score_recorded_is_an_eval_error() {
        let env = TestEnv {
            quality: None,
            ..TestEnv::default()
        };
        let cond = Condition::parse("quality_score >= 0.5").unwrap();
        assert!(matches!(
            cond.eval(&env),
            Err(EvalError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn rejects_out_of_grammar_input() {
        assert!(Condition::parse("complexity = 'x'").is_err());
        assert!(Condition::parse("1 + 2 == 3").is_err());
        assert!(Condition::parse("foo == 'bar'").is_err());
        assert!(Condition::parse("decompose.result == 'x'").is_err());
        assert!(Condition::parse("complexity == 'a' extra").is_err());
        assert!(Condition::parse("(complexity == 'a'").is_err());
    }

    #[test]
    fn type_mismatch_is_an_eval_error() {
        let env = TestEnv::default();
        let cond = Condition::parse("complexity > 'abc'").unwrap();
        assert!(matches!(cond.eval(&env), Err(EvalError::TypeMismatch(_))));
    }

    #[test]
    fn referenced_steps_are_collected() {
        let cond =
            Condition::parse("evaluate.quality_score >= 0.8 && decompose.status == 'completed'")
                .unwrap();
        assert_eq!(cond.referenced_steps(), vec!["evaluate", "decompose"]);
    }

    #[test]
    fn non_boolean_condition_is_rejected_at_eval() {
        let env = TestEnv::default();
        let cond = Condition::parse("complexity").unwrap();
        assert!(matches!(cond.eval(&env), Err(EvalError::TypeMismatch(_))));
    }
}
