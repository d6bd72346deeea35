use im::{HashMap, HashSet};

use crate::ast::{Key, MetaMap, Symbol, Value};
use crate::error::EmberError;

/// Reads source text into data. Code is data: the evaluator walks the
/// `Value`s produced here.
pub struct Reader {
    chars: Vec<char>,
    index: usize,
    line: usize,
    col: usize,
}

pub fn read_source(source: &str) -> Result<Vec<Value>, EmberError> {
    Reader::new(source).read_all()
}

impl Reader {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<Value>, EmberError> {
        let mut forms = Vec::new();
        self.skip_ws_and_comments();
        while !self.eof() {
            forms.push(self.read_form()?);
            self.skip_ws_and_comments();
        }
        Ok(forms)
    }

    fn read_form(&mut self) -> Result<Value, EmberError> {
        self.skip_ws_and_comments();
        if self.eof() {
            return self.parse_err("unexpected end of input");
        }
        match self.current_char() {
            '\'' => self.read_prefixed("quote"),
            '`' => self.read_prefixed("quasiquote"),
            '~' => {
                if self.peek_char() == Some('@') {
                    self.advance();
                    self.read_prefixed("unquote-splicing")
                } else {
                    self.read_prefixed("unquote")
                }
            }
            '^' => self.read_meta(),
            '(' => Ok(Value::list(self.read_delimited(')')?)),
            '[' => Ok(Value::vector(self.read_delimited(']')?)),
            '{' => self.read_map(),
            '#' => self.read_dispatch(),
            '"' => self.read_string(),
            ':' => self.read_keyword(),
            ch @ (')' | ']' | '}') => {
                self.parse_err(format!("unexpected closing delimiter '{}'", ch))
            }
            _ => self.read_atom(),
        }
    }

    fn read_prefixed(&mut self, head: &str) -> Result<Value, EmberError> {
        self.advance();
        let inner = self.read_form()?;
        Ok(Value::list(vec![Value::symbol(head), inner]))
    }

    /// `^{:doc "x"} sym` or `^:private sym`; metadata attaches to symbols.
    fn read_meta(&mut self) -> Result<Value, EmberError> {
        self.advance();
        let meta = match self.read_form()? {
            Value::Map(map) => map,
            Value::Keyword(k) => {
                let mut map = MetaMap::new();
                map.insert(Key::Keyword(k), Value::Bool(true));
                map
            }
            Value::String(tag) => {
                let mut map = MetaMap::new();
                map.insert(Key::keyword("tag"), Value::String(tag));
                map
            }
            other => {
                return self.parse_err(format!("metadata must be a map, got {}", other));
            }
        };
        let target = self.read_form()?;
        match target {
            Value::Symbol(sym) => Ok(Value::Symbol(sym).merge_meta(&meta)),
            other => Ok(other),
        }
    }

    fn read_delimited(&mut self, close: char) -> Result<Vec<Value>, EmberError> {
        let (line, col) = (self.line, self.col);
        self.advance();
        let mut items = Vec::new();
        self.skip_ws_and_comments();
        while !self.eof() && self.current_char() != close {
            items.push(self.read_form()?);
            self.skip_ws_and_comments();
        }
        if self.eof() {
            return Err(EmberError::parse(format!(
                "unterminated form starting at {}:{}",
                line, col
            )));
        }
        self.advance();
        Ok(items)
    }

    fn read_map(&mut self) -> Result<Value, EmberError> {
        let items = self.read_delimited('}')?;
        if items.len() % 2 != 0 {
            return self.parse_err("map literal must contain an even number of forms");
        }
        let mut map = HashMap::new();
        for pair in items.chunks(2) {
            map.insert(Key::from_value(&pair[0])?, pair[1].clone());
        }
        Ok(Value::Map(map))
    }

    fn read_dispatch(&mut self) -> Result<Value, EmberError> {
        self.advance();
        if self.eof() || self.current_char() != '{' {
            return self.parse_err("unsupported dispatch macro");
        }
        let items = self.read_delimited('}')?;
        Ok(Value::Set(items.into_iter().collect::<HashSet<Value>>()))
    }

    fn read_string(&mut self) -> Result<Value, EmberError> {
        self.advance();
        let mut out = String::new();
        loop {
            if self.eof() {
                return self.parse_err("unterminated string");
            }
            let ch = self.current_char();
            self.advance();
            match ch {
                '"' => break,
                '\\' => {
                    if self.eof() {
                        return self.parse_err("unterminated string escape");
                    }
                    let esc = self.current_char();
                    self.advance();
                    out.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        '\\' => '\\',
                        '"' => '"',
                        other => {
                            return self.parse_err(format!("unknown escape \\{}", other));
                        }
                    });
                }
                other => out.push(other),
            }
        }
        Ok(Value::String(out))
    }

    fn read_keyword(&mut self) -> Result<Value, EmberError> {
        self.advance();
        let token = self.read_token();
        if token.is_empty() {
            return self.parse_err("empty keyword");
        }
        Ok(Value::Keyword(token))
    }

    fn read_atom(&mut self) -> Result<Value, EmberError> {
        let token = self.read_token();
        if token.is_empty() {
            return self.parse_err(format!("unexpected character '{}'", self.current_char()));
        }
        Ok(match token.as_str() {
            "nil" => Value::Nil,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => parse_number(&token).unwrap_or_else(|| Value::Symbol(Symbol::parse(&token))),
        })
    }

    fn read_token(&mut self) -> String {
        let mut token = String::new();
        while !self.eof() {
            let ch = self.current_char();
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | ',')
            {
                break;
            }
            token.push(ch);
            self.advance();
        }
        token
    }

    pub fn skip_ws_and_comments(&mut self) {
        while !self.eof() {
            let ch = self.current_char();
            if ch.is_whitespace() || ch == ',' {
                self.advance();
            } else if ch == ';' {
                while !self.eof() && self.current_char() != '\n' {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn current_char(&self) -> char {
        self.chars[self.index]
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if self.chars.get(self.index) == Some(&'\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.index += 1;
    }

    fn eof(&self) -> bool {
        self.index >= self.chars.len()
    }

    fn parse_err<T>(&self, message: impl Into<String>) -> Result<T, EmberError> {
        Err(EmberError::parse(format!(
            "{} at {}:{}",
            message.into(),
            self.line,
            self.col
        )))
    }
}

fn parse_number(token: &str) -> Option<Value> {
    let first = token.chars().next()?;
    let starts_numeric = first.is_ascii_digit()
        || ((first == '-' || first == '+') && token[1..].starts_with(|c: char| c.is_ascii_digit()));
    if !starts_numeric {
        return None;
    }
    if let Ok(n) = token.parse::<i64>() {
        return Some(Value::Int(n));
    }
    token.parse::<f64>().ok().map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_collections() {
        let forms = read_source("(def x [1 2.5 \"s\" :k]) {:a 1} #{1}").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(
            forms[0],
            Value::list(vec![
                Value::symbol("def"),
                Value::symbol("x"),
                Value::vector(vec![
                    Value::Int(1),
                    Value::Float(2.5),
                    Value::string("s"),
                    Value::keyword("k"),
                ]),
            ])
        );
    }

    #[test]
    fn reads_quote_family() {
        let forms = read_source("'a `(b ~c ~@d)").unwrap();
        assert_eq!(forms[0].to_string(), "(quote a)");
        assert_eq!(
            forms[1].to_string(),
            "(quasiquote (b (unquote c) (unquote-splicing d)))"
        );
    }

    #[test]
    fn qualified_symbols_and_division() {
        let forms = read_source("core/map / -1 -x").unwrap();
        let sym = forms[0].as_symbol().unwrap();
        assert_eq!(sym.ns.as_deref(), Some("core"));
        assert_eq!(sym.name, "map");
        assert_eq!(forms[1].as_simple_symbol(), Some("/"));
        assert_eq!(forms[2], Value::Int(-1));
        assert_eq!(forms[3].as_simple_symbol(), Some("-x"));
    }

    #[test]
    fn symbol_metadata() {
        let forms = read_source("^:private x").unwrap();
        let meta = forms[0].meta().unwrap();
        assert_eq!(meta.get(&Key::keyword("private")), Some(&Value::Bool(true)));
    }

    #[test]
    fn unterminated_list_is_an_error() {
        assert!(matches!(read_source("(1 2"), Err(EmberError::Parse(_))));
    }
}
