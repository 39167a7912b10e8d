use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(number) => number.to_string(),
            Token::Str(text) => format!("'{text}'"),
            Token::Ident(name) => name.clone(),
            Token::Punct(punct) => (*punct).to_string(),
        }
    }
}

/// Longest operators first so `===` wins over `==` and `=`.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", "{", "}", ",", ".", ":", "?", "!", "+", "-",
    "*", "/", "%", "<", ">",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        if ch.is_whitespace() {
            index += 1;
            continue;
        }
        let start = index;

        if ch.is_ascii_digit() || (ch == '.' && chars.get(index + 1).is_some_and(char::is_ascii_digit)) {
            while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.') {
                index += 1;
            }
            if index < chars.len() && (chars[index] == 'e' || chars[index] == 'E') {
                index += 1;
                if index < chars.len() && (chars[index] == '+' || chars[index] == '-') {
                    index += 1;
                }
                while index < chars.len() && chars[index].is_ascii_digit() {
                    index += 1;
                }
            }
            let literal: String = chars[start..index].iter().collect();
            let number = literal.parse::<f64>().map_err(|_| ExprError::InvalidNumber(literal.clone()))?;
            tokens.push((Token::Number(number), start));
            continue;
        }

        if ch == '\'' || ch == '"' {
            let quote = ch;
            index += 1;
            let mut text = String::new();
            loop {
                let Some(&next) = chars.get(index) else {
                    return Err(ExprError::UnterminatedString { position: start });
                };
                index += 1;
                match next {
                    '\\' => {
                        let Some(&escaped) = chars.get(index) else {
                            return Err(ExprError::UnterminatedString { position: start });
                        };
                        index += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    c if c == quote => break,
                    c => text.push(c),
                }
            }
            tokens.push((Token::Str(text), start));
            continue;
        }

        if ch.is_alphabetic() || ch == '_' || ch == '$' {
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_' || chars[index] == '$') {
                index += 1;
            }
            tokens.push((Token::Ident(chars[start..index].iter().collect()), start));
            continue;
        }

        let rest: String = chars[index..chars.len().min(index + 3)].iter().collect();
        match PUNCTUATION.iter().find(|punct| rest.starts_with(**punct)) {
            Some(punct) => {
                tokens.push((Token::Punct(*punct), start));
                index += punct.chars().count();
            }
            None => return Err(ExprError::UnexpectedChar { ch, position: start }),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|(token, _)| token).collect()
    }

    #[test]
    fn tokenizes_operators_greedily() {
        assert_eq!(
            kinds("a === b ?? !c"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("==="),
                Token::Ident("b".into()),
                Token::Punct("??"),
                Token::Punct("!"),
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn strings_and_numbers() {
        assert_eq!(kinds(r#"'it\'s' "x" 1.5e2"#), vec![Token::Str("it's".into()), Token::Str("x".into()), Token::Number(150.0)]);
    }

    #[test]
    fn rejects_assignment_and_unterminated_strings() {
        assert!(matches!(tokenize("a = 1"), Err(ExprError::UnexpectedChar { ch: '=', .. })));
        assert!(matches!(tokenize("'open"), Err(ExprError::UnterminatedString { position: 0 })));
    }
}
