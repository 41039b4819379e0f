//! Template Functions
//!
//! Value helpers shared by the executor (truthiness, printing, comparison,
//! escaping), the builtin function table, and [`FuncMap`] for caller-supplied
//! functions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Number, Value};

/// Signature of a custom template function.
pub type FuncFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// A value flowing through a pipeline. `safe` values are written without
/// HTML escaping.
#[derive(Debug, Clone, PartialEq)]
pub struct Val {
    pub value: Value,
    pub safe: bool,
}

impl Val {
    pub fn plain(value: Value) -> Self {
        Self { value, safe: false }
    }

    pub fn safe(text: String) -> Self {
        Self {
            value: Value::String(text),
            safe: true,
        }
    }
}

#[derive(Clone)]
pub struct Func {
    call: FuncFn,
    safe: bool,
}

impl Func {
    pub fn call(&self, args: &[Value]) -> Result<Val, String> {
        let value = (self.call)(args)?;
        Ok(Val {
            value,
            safe: self.safe,
        })
    }
}

/// Caller-supplied template functions. These shadow builtins of the same name.
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: HashMap<String, Func>,
}

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name.into(), Arc::new(f), false)
    }

    /// Register a function whose output is trusted markup.
    pub fn insert_safe<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(name.into(), Arc::new(f), true)
    }

    fn register(&mut self, name: String, call: FuncFn, safe: bool) -> &mut Self {
        if is_builtin(&name) {
            tracing::debug!(%name, "custom function shadows builtin");
        }
        self.funcs.insert(name, Func { call, safe });
        self
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("FuncMap").field("funcs", &names).finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Text form of a value as it appears in template output.
pub fn print_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(print_value).collect();
            format!("[{}]", parts.join(" "))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, print_value(&map[k])))
                .collect();
            format!("map[{}]", parts.join(" "))
        }
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\0' => out.push('\u{FFFD}'),
            c => out.push(c),
        }
    }
    out
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).ok_or_else(|| "invalid number comparison".to_string())
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(format!(
            "incompatible types for comparison: {} and {}",
            type_name(a),
            type_name(b)
        )),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

fn as_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("expected integer; found {}", n)),
        other => Err(format!("expected integer; found {}", type_name(other))),
    }
}

/// Space between operands when neither side is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !args[i - 1].is_string() && !arg.is_string() {
            out.push(' ');
        }
        out.push_str(&print_value(arg));
    }
    out
}

fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse().ok();
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }

        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };

        match verb {
            'd' => match as_int(arg) {
                Ok(n) => out.push_str(&n.to_string()),
                Err(_) => out.push_str(&format!("%!d({})", print_value(arg))),
            },
            'f' => match arg.as_f64() {
                Some(f) => out.push_str(&format!("{:.*}", precision.unwrap_or(6), f)),
                None => out.push_str(&format!("%!f({})", print_value(arg))),
            },
            'q' => out.push_str(&format!("{:?}", print_value(arg))),
            't' => out.push_str(&truthy(arg).to_string()),
            _ => out.push_str(&print_value(arg)),
        }
    }

    let extra: Vec<String> = args.map(print_value).collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}

fn arity(name: &str, args: &[Val], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args for {}: want {} got {}",
            name,
            expected,
            args.len()
        ))
    }
}

fn index(args: &[Val]) -> Result<Value, String> {
    let Some((first, keys)) = args.split_first() else {
        return Err("wrong number of args for index: want at least 1 got 0".to_string());
    };

    let mut current = first.value.clone();
    for key in keys {
        current = match (&current, &key.value) {
            (Value::Array(items), k) => {
                let i = as_int(k)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| format!("index out of range: {}", i))?
            }
            (Value::String(s), k) => {
                let i = as_int(k)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| s.as_bytes().get(i))
                    .map(|b| Value::from(*b))
                    .ok_or_else(|| format!("index out of range: {}", i))?
            }
            (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
            (Value::Object(_), other) => {
                return Err(format!("cannot index map with {}", type_name(other)))
            }
            (Value::Null, _) => Value::Null,
            (other, _) => return Err(format!("can't index item of type {}", type_name(other))),
        };
    }
    Ok(current)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILTINS
// ═══════════════════════════════════════════════════════════════════════════════

/// Call a builtin. Returns `None` when `name` is not a builtin.
pub fn call_builtin(
    name: &str,
    args: &[Val],
    globals: Option<&HashMap<String, String>>,
) -> Option<Result<Val, String>> {
    let values: Vec<Value> = args.iter().map(|a| a.value.clone()).collect();

    let result = match name {
        "and" | "or" => {
            if args.is_empty() {
                return Some(Err(format!("wrong number of args for {}: want at least 1 got 0", name)));
            }
            let want = name == "or";
            let picked = args
                .iter()
                .find(|a| truthy(&a.value) == want)
                .unwrap_or(&args[args.len() - 1]);
            Ok(picked.clone())
        }
        "not" => arity(name, args, 1).map(|_| Val::plain(Value::Bool(!truthy(&values[0])))),
        "len" => arity(name, args, 1).and_then(|_| {
            let n = match &values[0] {
                Value::String(s) => s.len(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(format!("len of type {}", type_name(other))),
            };
            Ok(Val::plain(Value::from(n)))
        }),
        "index" => index(args).map(Val::plain),
        "eq" => {
            if args.len() < 2 {
                return Some(Err("missing argument for comparison".to_string()));
            }
            let equal = values[1..].iter().any(|v| values_equal(&values[0], v));
            Ok(Val::plain(Value::Bool(equal)))
        }
        "ne" => arity(name, args, 2).map(|_| Val::plain(Value::Bool(!values_equal(&values[0], &values[1])))),
        "lt" | "le" | "gt" | "ge" => arity(name, args, 2)
            .and_then(|_| compare(&values[0], &values[1]))
            .map(|ordering| {
                let result = match name {
                    "lt" => ordering == Ordering::Less,
                    "le" => ordering != Ordering::Greater,
                    "gt" => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Val::plain(Value::Bool(result))
            }),
        "print" => Ok(Val::plain(Value::String(sprint(&values)))),
        "println" => {
            let parts: Vec<String> = values.iter().map(print_value).collect();
            Ok(Val::plain(Value::String(parts.join(" ") + "\n")))
        }
        "printf" => match values.split_first() {
            Some((Value::String(format), rest)) => Ok(Val::plain(Value::String(sprintf(format, rest)))),
            _ => Err("printf expects a format string".to_string()),
        },
        "html" | "safe" => Ok(Val::safe(sprint(&values))),
        "comment" => Ok(Val::safe(format!("<!--{}-->", sprint(&values)))),
        "global" => arity(name, args, 1).map(|_| {
            let path = print_value(&values[0]);
            let rendered = globals.and_then(|g| g.get(&path)).cloned().unwrap_or_default();
            Val::safe(rendered)
        }),
        "for" => arity(name, args, 2).and_then(|_| {
            let (from, to) = (as_int(&values[0])?, as_int(&values[1])?);
            let items: Vec<Value> = (from..=to).map(|i| Value::Number(Number::from(i))).collect();
            Ok(Val::plain(Value::Array(items)))
        }),
        _ => return None,
    };

    Some(result)
}

pub fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "and"
            | "or"
            | "not"
            | "len"
            | "index"
            | "eq"
            | "ne"
            | "lt"
            | "le"
            | "gt"
            | "ge"
            | "print"
            | "println"
            | "printf"
            | "html"
            | "safe"
            | "comment"
            | "global"
            | "for"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Result<Val, String> {
        let args: Vec<Val> = args.into_iter().map(Val::plain).collect();
        call_builtin(name, &args, None).unwrap()
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!({"a": 1})));
        assert!(truthy(&json!(0.5)));
    }

    #[test]
    fn test_and_or_return_operands() {
        assert_eq!(call("and", vec![json!(1), json!(""), json!(2)]).unwrap().value, json!(""));
        assert_eq!(call("or", vec![json!(""), json!("x")]).unwrap().value, json!("x"));
        assert_eq!(call("or", vec![json!(""), json!(0)]).unwrap().value, json!(0));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call("eq", vec![json!(1), json!(2), json!(1.0)]).unwrap().value, json!(true));
        assert_eq!(call("lt", vec![json!("a"), json!("b")]).unwrap().value, json!(true));
        assert_eq!(call("ge", vec![json!(2), json!(2)]).unwrap().value, json!(true));
        assert!(call("lt", vec![json!(1), json!("b")]).is_err());
    }

    #[test]
    fn test_print_spacing() {
        assert_eq!(call("print", vec![json!(1), json!(2)]).unwrap().value, json!("1 2"));
        assert_eq!(call("print", vec![json!("a"), json!(2)]).unwrap().value, json!("a2"));
        assert_eq!(
            call("printf", vec![json!("%s has %d (%.2f) %%"), json!("x"), json!(3), json!(1.5)])
                .unwrap()
                .value,
            json!("x has 3 (1.50) %")
        );
    }

    #[test]
    fn test_index_and_len() {
        let data = json!({"items": ["a", "b"], "m": {"k": "v"}});
        assert_eq!(call("index", vec![data.clone(), json!("items"), json!(1)]).unwrap().value, json!("b"));
        assert_eq!(call("index", vec![data.clone(), json!("m"), json!("missing")]).unwrap().value, json!(null));
        assert!(call("index", vec![json!([1]), json!(4)]).is_err());
        assert_eq!(call("len", vec![json!("héllo")]).unwrap().value, json!(6));
    }

    #[test]
    fn test_safe_producers() {
        let comment = call("comment", vec![json!(" note ")]).unwrap();
        assert!(comment.safe);
        assert_eq!(comment.value, json!("<!-- note -->"));

        let mut table = HashMap::new();
        table.insert("nav.html".to_string(), "<nav></nav>".to_string());
        let global = call_builtin("global", &[Val::plain(json!("nav.html"))], Some(&table))
            .unwrap()
            .unwrap();
        assert_eq!(global, Val::safe("<nav></nav>".to_string()));
    }

    #[test]
    fn test_for_is_inclusive() {
        assert_eq!(call("for", vec![json!(1), json!(3)]).unwrap().value, json!([1, 2, 3]));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<a href="x">'&'</a>"#), "&lt;a href=&#34;x&#34;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }
}
