//! Path grammar: compilation into segments and evaluation over JSON values.

use serde_json::Value;

use crate::JsonPathError;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `.name` or `['name']`
    Field(String),
    /// `.*`, `[*]` or `[]`
    Wildcard,
    /// `[n]`, negative counts from the end
    Index(i64),
    /// `..name`
    Recursive(String),
    /// `[?(@.a.b)]` or `[?(@.a.b == lit)]`
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    path: Vec<String>,
    test: Option<(Op, Literal)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

pub(crate) fn compile(path: &str) -> Result<Vec<Segment>, JsonPathError> {
    let trimmed = path.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| syntax(path, "path must be enclosed in braces"))?;
    let mut p = Parser { src: path, chars: inner.chars().collect(), pos: 0 };
    p.skip_ws();
    if p.peek() == Some('$') {
        p.pos += 1;
    }
    let mut segments = Vec::new();
    loop {
        p.skip_ws();
        match p.peek() {
            None => break,
            Some('.') => {
                p.pos += 1;
                match p.peek() {
                    Some('.') => {
                        p.pos += 1;
                        segments.push(Segment::Recursive(p.ident()?));
                    }
                    Some('*') => {
                        p.pos += 1;
                        segments.push(Segment::Wildcard);
                    }
                    // `{.}` and `.[0]` address the current node.
                    None | Some('[') => {}
                    Some(c) if c.is_whitespace() => {}
                    Some(_) => segments.push(Segment::Field(p.ident()?)),
                }
            }
            Some('[') => {
                p.pos += 1;
                segments.push(p.bracket()?);
            }
            Some(c) => return Err(p.unrecognized(c)),
        }
    }
    Ok(segments)
}

fn syntax(path: &str, reason: &str) -> JsonPathError {
    JsonPathError::Syntax { path: path.to_string(), reason: reason.to_string() }
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> { self.chars.get(self.pos).copied() }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn unrecognized(&self, ch: char) -> JsonPathError {
        JsonPathError::Unrecognized { path: self.src.to_string(), pos: self.pos, ch }
    }

    fn expect(&mut self, want: char) -> Result<(), JsonPathError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.unrecognized(c)),
            None => Err(syntax(self.src, &format!("expected {:?} before end of path", want))),
        }
    }

    /// Field name, with `\.` escaping a literal dot.
    fn ident(&mut self) -> Result<String, JsonPathError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\\' if self.chars.get(self.pos + 1).is_some() => {
                    out.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                }
                c if c.is_alphanumeric() || matches!(c, '_' | '-' | '/') => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(match self.peek() {
                Some(c) => self.unrecognized(c),
                None => syntax(self.src, "expected a field name"),
            });
        }
        Ok(out)
    }

    fn quoted(&mut self) -> Result<String, JsonPathError> {
        let Some(quote) = self.peek() else { return Err(syntax(self.src, "expected a quoted string")) };
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(syntax(self.src, "unterminated string")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') if self.chars.get(self.pos + 1).is_some() => {
                    out.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn number(&mut self) -> Result<f64, JsonPathError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>().map_err(|_| syntax(self.src, &format!("invalid number {:?}", text)))
    }

    fn bracket(&mut self) -> Result<Segment, JsonPathError> {
        self.skip_ws();
        let seg = match self.peek() {
            Some(']') => Segment::Wildcard,
            Some('*') => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some('\'') | Some('"') => Segment::Field(self.quoted()?),
            Some('?') => {
                self.pos += 1;
                self.expect('(')?;
                let filter = self.filter()?;
                self.expect(')')?;
                Segment::Filter(filter)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let n = self.number()?;
                if n.fract() != 0.0 {
                    return Err(syntax(self.src, "array index must be an integer"));
                }
                Segment::Index(n as i64)
            }
            Some(c) => return Err(self.unrecognized(c)),
            None => return Err(syntax(self.src, "unterminated bracket")),
        };
        self.expect(']')?;
        Ok(seg)
    }

    fn filter(&mut self) -> Result<Filter, JsonPathError> {
        self.expect('@')?;
        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    path.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    path.push(self.quoted()?);
                    self.expect(']')?;
                }
                _ => break,
            }
        }
        self.skip_ws();
        if self.peek() == Some(')') {
            return Ok(Filter { path, test: None });
        }
        let op = self.op()?;
        self.skip_ws();
        let lit = match self.peek() {
            Some('\'') | Some('"') => Literal::Str(self.quoted()?),
            Some(c) if c == '-' || c.is_ascii_digit() => Literal::Num(self.number()?),
            Some(c) if c.is_alphabetic() => match self.ident()?.as_str() {
                "true" => Literal::Bool(true),
                "false" => Literal::Bool(false),
                other => return Err(syntax(self.src, &format!("unsupported literal {:?}", other))),
            },
            Some(c) => return Err(self.unrecognized(c)),
            None => return Err(syntax(self.src, "unterminated filter")),
        };
        Ok(Filter { path, test: Some((op, lit)) })
    }

    fn op(&mut self) -> Result<Op, JsonPathError> {
        let a = self.peek();
        let b = self.chars.get(self.pos + 1).copied();
        let (op, width) = match (a, b) {
            (Some('='), Some('=')) => (Op::Eq, 2),
            (Some('!'), Some('=')) => (Op::Ne, 2),
            (Some('<'), Some('=')) => (Op::Le, 2),
            (Some('>'), Some('=')) => (Op::Ge, 2),
            (Some('<'), _) => (Op::Lt, 1),
            (Some('>'), _) => (Op::Gt, 1),
            (Some(c), _) => return Err(self.unrecognized(c)),
            (None, _) => return Err(syntax(self.src, "unterminated filter")),
        };
        self.pos += width;
        Ok(op)
    }
}

pub(crate) fn evaluate<'a>(segments: &[Segment], root: &'a Value) -> Vec<&'a Value> {
    let mut cur = vec![root];
    for seg in segments {
        let mut next = Vec::new();
        for v in cur {
            step(seg, v, &mut next);
        }
        cur = next;
    }
    cur
}

fn step<'a>(seg: &Segment, v: &'a Value, out: &mut Vec<&'a Value>) {
    match seg {
        Segment::Field(name) => {
            if let Some(x) = v.as_object().and_then(|m| m.get(name)) {
                out.push(x);
            }
        }
        Segment::Wildcard => match v {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(map) => out.extend(map.values()),
            _ => {}
        },
        Segment::Index(i) => {
            if let Some(items) = v.as_array() {
                let len = items.len() as i64;
                let idx = if *i < 0 { len + i } else { *i };
                if (0..len).contains(&idx) {
                    out.push(&items[idx as usize]);
                }
            }
        }
        Segment::Recursive(name) => descend(name, v, out),
        Segment::Filter(f) => {
            if let Some(items) = v.as_array() {
                out.extend(items.iter().filter(|item| f.accepts(item)));
            }
        }
    }
}

fn descend<'a>(name: &str, v: &'a Value, out: &mut Vec<&'a Value>) {
    match v {
        Value::Object(map) => {
            if let Some(x) = map.get(name) {
                out.push(x);
            }
            for child in map.values() {
                descend(name, child, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                descend(name, child, out);
            }
        }
        _ => {}
    }
}

impl Filter {
    fn accepts(&self, item: &Value) -> bool {
        let mut cur = item;
        for key in &self.path {
            match cur.as_object().and_then(|m| m.get(key)) {
                Some(x) => cur = x,
                None => return false,
            }
        }
        let Some((op, lit)) = &self.test else { return !cur.is_null() };
        match (lit, cur) {
            (Literal::Num(want), Value::Number(n)) => match n.as_f64() {
                Some(have) => compare(*op, have.partial_cmp(want)),
                None => false,
            },
            (Literal::Bool(want), Value::Bool(have)) => match op {
                Op::Eq => have == want,
                Op::Ne => have != want,
                _ => false,
            },
            (Literal::Str(want), have) => match crate::render(have) {
                Some(s) => compare(*op, Some(s.as_str().cmp(want.as_str()))),
                None => false,
            },
            _ => matches!(op, Op::Ne),
        }
    }
}

fn compare(op: Op, ord: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    let Some(ord) = ord else { return false };
    match op {
        Op::Eq => ord == Equal,
        Op::Ne => ord != Equal,
        Op::Lt => ord == Less,
        Op::Le => ord != Greater,
        Op::Gt => ord == Greater,
        Op::Ge => ord != Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(path: &str, v: &Value) -> Vec<Value> {
        let segs = compile(path).expect("compiles");
        evaluate(&segs, v).into_iter().cloned().collect()
    }

    #[test]
    fn compiles_common_shapes() {
        assert_eq!(compile("{.a.b}").expect("ok"), vec![Segment::Field("a".into()), Segment::Field("b".into())]);
        assert_eq!(compile("{ .a[] }").expect("ok"), vec![Segment::Field("a".into()), Segment::Wildcard]);
        assert_eq!(compile("{.a[-1]}").expect("ok"), vec![Segment::Field("a".into()), Segment::Index(-1)]);
        assert_eq!(compile("{$['a.b']}").expect("ok"), vec![Segment::Field("a.b".into())]);
        assert_eq!(compile(r"{.metadata.annotations.example\.com/x}").expect("ok")[2], Segment::Field("example.com/x".into()));
        assert!(compile("{.}").expect("ok").is_empty());
        assert!(compile(".a").is_err());
        assert!(matches!(compile("{.a[0:2]}"), Err(JsonPathError::Unrecognized { ch: ':', .. })));
        assert!(matches!(compile("{.a[?(@.b==1 && @.c==2)]}"), Err(JsonPathError::Unrecognized { ch: '&', .. })));
    }

    #[test]
    fn filters_select_matching_elements() {
        let v = json!({"items": [
            {"name": "a", "ready": true, "n": 1},
            {"name": "b", "ready": false, "n": 5},
            {"name": "c", "n": 10}
        ]});
        assert_eq!(eval(r#"{.items[?(@.name=="b")].n}"#, &v), vec![json!(5)]);
        assert_eq!(eval("{.items[?(@.n>=5)].name}", &v), vec![json!("b"), json!("c")]);
        assert_eq!(eval("{.items[?(@.ready==true)].name}", &v), vec![json!("a")]);
        assert_eq!(eval("{.items[?(@.ready)].name}", &v), vec![json!("a"), json!("b")]);
        assert_eq!(eval("{.items[?(@.name!='a')].name}", &v), vec![json!("b"), json!("c")]);
    }

    #[test]
    fn recursive_descent_and_wildcards() {
        let v = json!({"a": {"x": 1, "b": {"x": 2}}, "c": [{"x": 3}]});
        assert_eq!(eval("{..x}", &v), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(eval("{.c[*].x}", &v), vec![json!(3)]);
        assert_eq!(eval("{.a.*}", &v).len(), 2);
        assert!(eval("{.c[4]}", &v).is_empty());
    }
}
