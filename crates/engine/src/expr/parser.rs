//! Pratt parser producing an [`Expr`] tree.

use serde_json::Value;

use super::{ExprError, MAX_EXPRESSION_DEPTH, eval::number_value, lexer::Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Undefined,
    Identifier(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

const TERNARY_BP: u8 = 1;
const UNARY_BP: u8 = 14;

fn binary_op(punct: &str) -> Option<(u8, BinaryOp)> {
    let entry = match punct {
        "??" => (3, BinaryOp::Coalesce),
        "||" => (3, BinaryOp::Or),
        "&&" => (4, BinaryOp::And),
        "==" => (8, BinaryOp::Eq),
        "!=" => (8, BinaryOp::Ne),
        "===" => (8, BinaryOp::StrictEq),
        "!==" => (8, BinaryOp::StrictNe),
        "<" => (9, BinaryOp::Lt),
        "<=" => (9, BinaryOp::Le),
        ">" => (9, BinaryOp::Gt),
        ">=" => (9, BinaryOp::Ge),
        "+" => (11, BinaryOp::Add),
        "-" => (11, BinaryOp::Sub),
        "*" => (12, BinaryOp::Mul),
        "/" => (12, BinaryOp::Div),
        "%" => (12, BinaryOp::Rem),
        _ => return None,
    };
    Some(entry)
}

pub(crate) struct Parser {
    tokens: Vec<(Token, usize)>,
    position: usize,
    depth: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<(Token, usize)>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, ExprError> {
        let expr = self.expression(0)?;
        match self.tokens.get(self.position) {
            Some((token, position)) => Err(ExprError::UnexpectedToken {
                found: token.describe(),
                position: *position,
            }),
            None => Ok(expr),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(token, _)| token)
    }

    fn next(&mut self) -> Result<(Token, usize), ExprError> {
        let entry = self.tokens.get(self.position).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.position += 1;
        Ok(entry)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(found)) if *found == punct) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, punct: &str) -> Result<(), ExprError> {
        let (token, position) = self.next()?;
        match token {
            Token::Punct(found) if found == punct => Ok(()),
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                position,
            }),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_DEPTH {
            return Err(ExprError::TooDeep);
        }

        let mut left = self.prefix()?;
        while let Some(Token::Punct(punct)) = self.peek() {
            let punct = *punct;
            if punct == "?" {
                if TERNARY_BP < min_bp {
                    break;
                }
                self.position += 1;
                let consequent = self.expression(0)?;
                self.expect(":")?;
                let alternate = self.expression(TERNARY_BP)?;
                left = Expr::Conditional {
                    test: Box::new(left),
                    consequent: Box::new(consequent),
                    alternate: Box::new(alternate),
                };
                continue;
            }
            let Some((bp, op)) = binary_op(punct) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.position += 1;
            let right = self.expression(bp + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        self.depth -= 1;
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        let (token, position) = self.next()?;
        let primary = match token {
            Token::Number(number) => Expr::Literal(number_value(number)),
            Token::Str(text) => Expr::Literal(Value::String(text)),
            Token::Ident(name) => match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Undefined,
                _ => Expr::Identifier(name),
            },
            Token::Punct("(") => {
                let inner = self.expression(0)?;
                self.expect(")")?;
                inner
            }
            Token::Punct("[") => Expr::Array(self.array_elements()?),
            Token::Punct("{") => Expr::Object(self.object_entries()?),
            Token::Punct("!") => self.unary(UnaryOp::Not)?,
            Token::Punct("-") => self.unary(UnaryOp::Negate)?,
            Token::Punct("+") => self.unary(UnaryOp::Plus)?,
            other => {
                return Err(ExprError::UnexpectedToken {
                    found: other.describe(),
                    position,
                });
            }
        };
        self.postfix(primary)
    }

    fn unary(&mut self, op: UnaryOp) -> Result<Expr, ExprError> {
        let operand = self.expression(UNARY_BP)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ExprError> {
        loop {
            if self.eat(".") {
                let (token, position) = self.next()?;
                let Token::Ident(property) = token else {
                    return Err(ExprError::UnexpectedToken {
                        found: token.describe(),
                        position,
                    });
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.expression(0)?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let mut args = Vec::new();
                if !self.eat(")") {
                    loop {
                        args.push(self.expression(0)?);
                        if self.eat(")") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn array_elements(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut elements = Vec::new();
        if self.eat("]") {
            return Ok(elements);
        }
        loop {
            elements.push(self.expression(0)?);
            if self.eat("]") {
                return Ok(elements);
            }
            self.expect(",")?;
            if self.eat("]") {
                return Ok(elements);
            }
        }
    }

    fn object_entries(&mut self) -> Result<Vec<(String, Expr)>, ExprError> {
        let mut entries = Vec::new();
        if self.eat("}") {
            return Ok(entries);
        }
        loop {
            let (token, position) = self.next()?;
            let (key, shorthand) = match token {
                Token::Ident(name) => (name.clone(), Some(Expr::Identifier(name))),
                Token::Str(text) => (text, None),
                Token::Number(number) => (number_value(number).to_string(), None),
                other => {
                    return Err(ExprError::UnexpectedToken {
                        found: other.describe(),
                        position,
                    });
                }
            };
            let value = if self.eat(":") {
                self.expression(0)?
            } else {
                shorthand.ok_or(ExprError::UnexpectedEnd)?
            };
            entries.push((key, value));
            if self.eat("}") {
                return Ok(entries);
            }
            self.expect(",")?;
            if self.eat("}") {
                return Ok(entries);
            }
        }
    }
}
