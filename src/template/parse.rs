//! Template Parser
//!
//! Builds the node tree from lexer items. Control structures (`if`, `with`,
//! `range`) collect their bodies recursively until the matching `end`.
//! `define` and `block` register named sub-templates on the side.

use std::collections::HashMap;

use serde_json::Number;

use super::lexer::{self, Item, Tok};
use super::TemplateError;

// ═══════════════════════════════════════════════════════════════════════════════
// AST
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `.A.B`, empty for dot itself.
    Field(Vec<String>),
    /// `$name.A`; empty name is the root variable `$`.
    Variable(String, Vec<String>),
    Function(String),
    Str(String),
    Num(Number),
    Bool(bool),
    Nil,
    /// Parenthesized pipeline with an optional field chain.
    Group(Box<Pipeline>, Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    /// Declared or assigned variable names, without the sigil.
    pub vars: Vec<String>,
    /// `=` rather than `:=`.
    pub assign: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    With {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Template {
        name: String,
        pipe: Option<Pipeline>,
    },
    Break,
    Continue,
}

/// Parsed template: the main body plus every `define`/`block` it declares.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub root: Vec<Node>,
    pub defines: HashMap<String, Vec<Node>>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARSER
// ═══════════════════════════════════════════════════════════════════════════════

/// How a list of nodes was terminated.
enum Terminator {
    Eof,
    End,
    /// `else` followed by the remaining tokens of the action.
    Else(Vec<Tok>),
}

struct Parser {
    items: std::vec::IntoIter<Item>,
    defines: HashMap<String, Vec<Node>>,
    line: usize,
    range_depth: usize,
}

pub fn parse(source: &str) -> Result<Tree, TemplateError> {
    let mut parser = Parser {
        items: lexer::split(source)?.into_iter(),
        defines: HashMap::new(),
        line: 1,
        range_depth: 0,
    };

    let (root, terminator) = parser.list()?;
    match terminator {
        Terminator::Eof => Ok(Tree {
            root,
            defines: parser.defines,
        }),
        Terminator::End => Err(parser.error("unexpected {{end}}")),
        Terminator::Else(_) => Err(parser.error("unexpected {{else}}")),
    }
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn list(&mut self) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();

        while let Some(item) = self.items.next() {
            let (tokens, line) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { tokens, line } => (tokens, line),
            };
            self.line = line;

            let keyword = match tokens.first() {
                Some(Tok::Ident(word)) => word.clone(),
                Some(_) => {
                    nodes.push(Node::Action(self.pipeline(&tokens, false)?));
                    continue;
                }
                None => return Err(self.error("missing value for command")),
            };
            let rest = &tokens[1..];

            match keyword.as_str() {
                "end" => return Ok((nodes, Terminator::End)),
                "else" => return Ok((nodes, Terminator::Else(rest.to_vec()))),
                "if" => nodes.push(self.conditional("if", rest)?),
                "with" => nodes.push(self.conditional("with", rest)?),
                "range" => nodes.push(self.range(rest)?),
                "template" => nodes.push(self.template_call(rest)?),
                "define" => self.define(rest)?,
                "block" => nodes.push(self.block(rest)?),
                "break" | "continue" => {
                    if self.range_depth == 0 {
                        return Err(self.error(format!("{{{{{}}}}} outside {{{{range}}}}", keyword)));
                    }
                    nodes.push(if keyword == "break" { Node::Break } else { Node::Continue });
                }
                _ => nodes.push(Node::Action(self.pipeline(&tokens, false)?)),
            }
        }

        Ok((nodes, Terminator::Eof))
    }

    fn body_until_end(&mut self, context: &str) -> Result<Vec<Node>, TemplateError> {
        match self.list()? {
            (nodes, Terminator::End) => Ok(nodes),
            (_, Terminator::Else(_)) => Err(self.error(format!("unexpected {{{{else}}}} in {}", context))),
            (_, Terminator::Eof) => Err(self.error(format!("unexpected EOF in {}", context))),
        }
    }

    fn conditional(&mut self, keyword: &str, tokens: &[Tok]) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut condition = self.pipeline(tokens, true)?;
        let otherwise = loop {
            let (body, terminator) = self.list()?;
            branches.push((condition, body));

            match terminator {
                Terminator::End => break Vec::new(),
                Terminator::Eof => return Err(self.error(format!("unexpected EOF in {}", keyword))),
                Terminator::Else(rest) if rest.is_empty() => break self.body_until_end(keyword)?,
                Terminator::Else(rest) => match rest.first() {
                    Some(Tok::Ident(word)) if word == keyword => {
                        condition = self.pipeline(&rest[1..], true)?;
                    }
                    _ => return Err(self.error(format!("unexpected tokens after {{{{else}}}} in {}", keyword))),
                },
            }
        };

        Ok(if keyword == "if" {
            Node::If { branches, otherwise }
        } else {
            Node::With { branches, otherwise }
        })
    }

    fn range(&mut self, tokens: &[Tok]) -> Result<Node, TemplateError> {
        let pipe = self.pipeline(tokens, true)?;
        if pipe.vars.len() > 2 {
            return Err(self.error("too many declarations in range"));
        }

        self.range_depth += 1;
        let (body, terminator) = self.list()?;
        self.range_depth -= 1;

        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Else(rest) if rest.is_empty() => self.body_until_end("range")?,
            Terminator::Else(_) => return Err(self.error("unexpected tokens after {{else}} in range")),
            Terminator::Eof => return Err(self.error("unexpected EOF in range")),
        };

        Ok(Node::Range { pipe, body, otherwise })
    }

    fn template_name(&self, tokens: &[Tok], keyword: &str) -> Result<String, TemplateError> {
        match tokens.first() {
            Some(Tok::Str(name)) => Ok(name.clone()),
            _ => Err(self.error(format!("missing name in {{{{{}}}}}", keyword))),
        }
    }

    fn template_call(&mut self, tokens: &[Tok]) -> Result<Node, TemplateError> {
        let name = self.template_name(tokens, "template")?;
        let pipe = if tokens.len() > 1 {
            Some(self.pipeline(&tokens[1..], false)?)
        } else {
            None
        };
        Ok(Node::Template { name, pipe })
    }

    fn define(&mut self, tokens: &[Tok]) -> Result<(), TemplateError> {
        let name = self.template_name(tokens, "define")?;
        if tokens.len() > 1 {
            return Err(self.error("unexpected tokens in {{define}}"));
        }
        let body = self.body_until_end("define")?;
        self.defines.insert(name, body);
        Ok(())
    }

    fn block(&mut self, tokens: &[Tok]) -> Result<Node, TemplateError> {
        let call = self.template_call(tokens)?;
        let body = self.body_until_end("block")?;
        if let Node::Template { name, .. } = &call {
            self.defines.insert(name.clone(), body);
        }
        Ok(call)
    }

    // --------------------------------------------------------- Pipelines

    fn pipeline(&self, tokens: &[Tok], allow_two_vars: bool) -> Result<Pipeline, TemplateError> {
        let mut pipe = Pipeline::default();
        let mut rest = tokens;

        // `$x :=`, `$x =`, or `$i, $e :=`
        let declared = match rest {
            [Tok::Variable(a, fa), Tok::Comma, Tok::Variable(b, fb), Tok::Declare | Tok::Assign, ..]
                if allow_two_vars && fa.is_empty() && fb.is_empty() =>
            {
                pipe.vars = vec![a.clone(), b.clone()];
                pipe.assign = matches!(rest[3], Tok::Assign);
                4
            }
            [Tok::Variable(a, fa), Tok::Declare | Tok::Assign, ..] if fa.is_empty() => {
                pipe.vars = vec![a.clone()];
                pipe.assign = matches!(rest[1], Tok::Assign);
                2
            }
            _ => 0,
        };
        rest = &rest[declared..];

        for segment in split_top_level(rest, &Tok::Pipe) {
            if segment.is_empty() {
                return Err(self.error("missing command in pipeline"));
            }
            pipe.commands.push(self.command(segment)?);
        }

        if pipe.commands.is_empty() {
            return Err(self.error("missing command in pipeline"));
        }

        Ok(pipe)
    }

    fn command(&self, tokens: &[Tok]) -> Result<Command, TemplateError> {
        let mut args = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let operand = match &tokens[i] {
                Tok::Field(fields) => Operand::Field(fields.clone()),
                Tok::Variable(name, fields) => Operand::Variable(name.clone(), fields.clone()),
                Tok::Str(s) => Operand::Str(s.clone()),
                Tok::Num(n) => Operand::Num(n.clone()),
                Tok::Ident(word) => match word.as_str() {
                    "true" => Operand::Bool(true),
                    "false" => Operand::Bool(false),
                    "nil" => Operand::Nil,
                    _ => Operand::Function(word.clone()),
                },
                Tok::LParen => {
                    let close = matching_paren(tokens, i).ok_or_else(|| self.error("unclosed left paren"))?;
                    let inner = self.pipeline(&tokens[i + 1..close], false)?;
                    i = close;
                    let chain = match tokens.get(close + 1) {
                        Some(Tok::Chain(fields)) => {
                            i += 1;
                            fields.clone()
                        }
                        _ => Vec::new(),
                    };
                    Operand::Group(Box::new(inner), chain)
                }
                other => return Err(self.error(format!("unexpected {:?} in command", other))),
            };
            args.push(operand);
            i += 1;
        }

        Ok(Command { args })
    }
}

fn matching_paren(tokens: &[Tok], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside parentheses. An empty input yields no segments.
fn split_top_level<'a>(tokens: &'a [Tok], sep: &Tok) -> Vec<&'a [Tok]> {
    if tokens.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && t == sep => {
                segments.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&tokens[start..]);
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Operand {
        Operand::Field(vec![name.to_string()])
    }

    #[test]
    fn test_parse_pipeline_with_declaration() {
        let tree = parse("{{ $x := .A | len }}").unwrap();
        assert_eq!(
            tree.root,
            vec![Node::Action(Pipeline {
                vars: vec!["x".to_string()],
                assign: false,
                commands: vec![
                    Command { args: vec![field("A")] },
                    Command {
                        args: vec![Operand::Function("len".to_string())]
                    },
                ],
            })]
        );
    }

    #[test]
    fn test_parse_else_if_chain() {
        let tree = parse("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").unwrap();
        match &tree.root[0] {
            Node::If { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise, &vec![Node::Text("c".to_string())]);
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_range_with_two_variables() {
        let tree = parse("{{range $i, $e := .Items}}{{$e}}{{else}}none{{end}}").unwrap();
        match &tree.root[0] {
            Node::Range { pipe, otherwise, .. } => {
                assert_eq!(pipe.vars, vec!["i".to_string(), "e".to_string()]);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn test_block_registers_define() {
        let tree = parse(r#"{{block "Card" .}}body{{end}}"#).unwrap();
        assert!(tree.defines.contains_key("Card"));
        assert!(matches!(&tree.root[0], Node::Template { name, pipe: Some(_) } if name == "Card"));
    }

    #[test]
    fn test_group_with_chain() {
        let tree = parse("{{ (index .Items 0).Name }}").unwrap();
        match &tree.root[0] {
            Node::Action(pipe) => match &pipe.commands[0].args[0] {
                Operand::Group(_, chain) => assert_eq!(chain, &vec!["Name".to_string()]),
                other => panic!("expected group, got {:?}", other),
            },
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_errors() {
        assert!(parse("{{if .A}}open").is_err());
        assert!(parse("{{end}}").is_err());
        assert!(parse("{{break}}").is_err());
        assert!(parse("{{ .A | }}").is_err());
        assert!(parse("{{ (len .A }}").is_err());
    }
}
