//! Template Executor
//!
//! Walks a parsed [`Tree`] against a `serde_json::Value`, writing to a string.
//! Variables live on a stack that is truncated at the end of each control
//! structure, so declarations are scoped to the enclosing `{{end}}`.

use serde_json::Value;

use super::funcs::{self, escape_html, print_value, truthy, Val};
use super::parse::{Command, Node, Operand, Pipeline, Tree};
use super::{ExecContext, TemplateError};

const MAX_DEPTH: usize = 256;

enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct State<'t, 'c> {
    tree: &'t Tree,
    ctx: ExecContext<'c>,
    vars: Vec<(String, Val)>,
    depth: usize,
    out: String,
}

impl<'t, 'c> State<'t, 'c> {
    pub fn new(tree: &'t Tree, ctx: ExecContext<'c>, data: &Value) -> Self {
        Self {
            tree,
            ctx,
            vars: vec![(String::new(), Val::plain(data.clone()))],
            depth: 0,
            out: String::new(),
        }
    }

    pub fn run(mut self, nodes: &'t [Node], dot: &Value) -> Result<String, TemplateError> {
        self.walk(nodes, dot)?;
        Ok(self.out)
    }

    fn walk(&mut self, nodes: &'t [Node], dot: &Value) -> Result<Flow, TemplateError> {
        for node in nodes {
            match self.node(node, dot)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run `nodes` in a fresh variable scope.
    fn scoped(&mut self, mark: usize, nodes: &'t [Node], dot: &Value) -> Result<Flow, TemplateError> {
        let flow = self.walk(nodes, dot);
        self.vars.truncate(mark);
        flow
    }

    fn node(&mut self, node: &'t Node, dot: &Value) -> Result<Flow, TemplateError> {
        match node {
            Node::Text(text) => self.out.push_str(text),
            Node::Action(pipe) => {
                let val = self.pipeline(pipe, dot)?;
                if pipe.vars.is_empty() {
                    self.emit(&val);
                }
            }
            Node::If { branches, otherwise } => {
                let mark = self.vars.len();
                for (condition, body) in branches {
                    let val = self.pipeline(condition, dot)?;
                    if truthy(&val.value) {
                        return self.scoped(mark, body, dot);
                    }
                }
                return self.scoped(mark, otherwise, dot);
            }
            Node::With { branches, otherwise } => {
                let mark = self.vars.len();
                for (condition, body) in branches {
                    let val = self.pipeline(condition, dot)?;
                    if truthy(&val.value) {
                        return self.scoped(mark, body, &val.value);
                    }
                }
                return self.scoped(mark, otherwise, dot);
            }
            Node::Range { pipe, body, otherwise } => return self.range(pipe, body, otherwise, dot),
            Node::Template { name, pipe } => {
                let data = match pipe {
                    Some(pipe) => self.pipeline(pipe, dot)?.value,
                    None => Value::Null,
                };
                let out = self.call_template(name, &data)?;
                self.out.push_str(&out);
            }
            Node::Break => return Ok(Flow::Break),
            Node::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn emit(&mut self, val: &Val) {
        let text = print_value(&val.value);
        if val.safe {
            self.out.push_str(&text);
        } else {
            self.out.push_str(&escape_html(&text));
        }
    }

    fn call_template(&self, name: &str, data: &Value) -> Result<String, TemplateError> {
        let body = self
            .tree
            .defines
            .get(name)
            .ok_or_else(|| TemplateError::UnknownTemplate(name.to_string()))?;

        if self.depth >= MAX_DEPTH {
            return Err(TemplateError::Depth(MAX_DEPTH));
        }

        let mut nested = State::new(self.tree, self.ctx, data);
        nested.depth = self.depth + 1;
        nested.run(body, data)
    }

    fn range(
        &mut self,
        pipe: &'t Pipeline,
        body: &'t [Node],
        otherwise: &'t [Node],
        dot: &Value,
    ) -> Result<Flow, TemplateError> {
        let mark = self.vars.len();
        let source = self.commands(&pipe.commands, dot)?.value;

        let entries: Vec<(Value, Value)> = match source {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => {
                let mut entries: Vec<(Value, Value)> =
                    map.into_iter().map(|(k, v)| (Value::String(k), v)).collect();
                entries.sort_by(|a, b| print_value(&a.0).cmp(&print_value(&b.0)));
                entries
            }
            Value::Number(n) => {
                let count = n
                    .as_i64()
                    .ok_or_else(|| TemplateError::Exec(format!("range can't iterate over {}", n)))?;
                (0..count.max(0)).map(|i| (Value::from(i), Value::from(i))).collect()
            }
            Value::Null | Value::Bool(false) => Vec::new(),
            other => {
                return Err(TemplateError::Exec(format!(
                    "range can't iterate over {}",
                    print_value(&other)
                )))
            }
        };

        if entries.is_empty() {
            return self.scoped(mark, otherwise, dot);
        }

        for (key, item) in entries {
            match pipe.vars.as_slice() {
                [element] => self.declare(element, Val::plain(item.clone()), pipe.assign)?,
                [index, element] => {
                    self.declare(index, Val::plain(key), pipe.assign)?;
                    self.declare(element, Val::plain(item.clone()), pipe.assign)?;
                }
                _ => {}
            }

            let flow = self.walk(body, &item);
            self.vars.truncate(mark);
            match flow? {
                Flow::Break => break,
                Flow::Normal | Flow::Continue => {}
            }
        }

        Ok(Flow::Normal)
    }

    fn declare(&mut self, name: &str, val: Val, assign: bool) -> Result<(), TemplateError> {
        if assign {
            match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = val,
                None => return Err(TemplateError::Exec(format!("undefined variable: ${}", name))),
            }
        } else {
            self.vars.push((name.to_string(), val));
        }
        Ok(())
    }

    fn pipeline(&mut self, pipe: &Pipeline, dot: &Value) -> Result<Val, TemplateError> {
        let val = self.commands(&pipe.commands, dot)?;
        for name in &pipe.vars {
            self.declare(name, val.clone(), pipe.assign)?;
        }
        Ok(val)
    }

    fn commands(&mut self, commands: &[Command], dot: &Value) -> Result<Val, TemplateError> {
        let mut piped: Option<Val> = None;
        for command in commands {
            piped = Some(self.command(command, dot, piped.take())?);
        }
        Ok(piped.unwrap_or_else(|| Val::plain(Value::Null)))
    }

    fn command(&mut self, command: &Command, dot: &Value, piped: Option<Val>) -> Result<Val, TemplateError> {
        let Some((first, rest)) = command.args.split_first() else {
            return Err(TemplateError::Exec("empty command".to_string()));
        };

        if let Operand::Function(name) = first {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for operand in rest {
                args.push(self.operand(operand, dot)?);
            }
            args.extend(piped);
            return self.call(name, &args);
        }

        if !rest.is_empty() {
            return Err(TemplateError::Exec(format!(
                "can't give argument to non-function {:?}",
                first
            )));
        }
        if piped.is_some() {
            return Err(TemplateError::Exec(format!(
                "can't pipe a value into non-function {:?}",
                first
            )));
        }
        self.operand(first, dot)
    }

    fn call(&self, name: &str, args: &[Val]) -> Result<Val, TemplateError> {
        if let Some(func) = self.ctx.funcs.and_then(|f| f.get(name)) {
            let values: Vec<Value> = args.iter().map(|a| a.value.clone()).collect();
            return func
                .call(&values)
                .map_err(|e| TemplateError::Exec(format!("error calling {}: {}", name, e)));
        }

        match funcs::call_builtin(name, args, self.ctx.globals) {
            Some(result) => result.map_err(|e| TemplateError::Exec(format!("error calling {}: {}", name, e))),
            None => Err(TemplateError::UnknownFunction(name.to_string())),
        }
    }

    fn operand(&mut self, operand: &Operand, dot: &Value) -> Result<Val, TemplateError> {
        match operand {
            Operand::Field(fields) => Ok(Val::plain(walk_fields(dot, fields)?)),
            Operand::Variable(name, fields) => {
                let found = self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v.clone());
                let val = found.unwrap_or_else(|| Val::plain(Value::Null));
                if fields.is_empty() {
                    Ok(val)
                } else {
                    Ok(Val::plain(walk_fields(&val.value, fields)?))
                }
            }
            Operand::Function(name) => self.call(name, &[]),
            Operand::Str(s) => Ok(Val::plain(Value::String(s.clone()))),
            Operand::Num(n) => Ok(Val::plain(Value::Number(n.clone()))),
            Operand::Bool(b) => Ok(Val::plain(Value::Bool(*b))),
            Operand::Nil => Ok(Val::plain(Value::Null)),
            Operand::Group(pipe, chain) => {
                let val = self.commands(&pipe.commands, dot)?;
                if chain.is_empty() {
                    Ok(val)
                } else {
                    Ok(Val::plain(walk_fields(&val.value, chain)?))
                }
            }
        }
    }
}

fn walk_fields(value: &Value, fields: &[String]) -> Result<Value, TemplateError> {
    let mut current = value;
    for field in fields {
        current = match current {
            Value::Object(map) => match map.get(field) {
                Some(next) => next,
                None => return Ok(Value::Null),
            },
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(TemplateError::Exec(format!(
                    "can't evaluate field {} in type {}",
                    field,
                    funcs::type_name(other)
                )))
            }
        };
    }
    Ok(current.clone())
}
