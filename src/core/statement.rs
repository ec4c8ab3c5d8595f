//! Purpose: Parse extension statements (`INSTALL`, `UPDATE`, `LOAD`, `UNINSTALL`).
//! Exports: `Statement`, `parse_statement`, `parse_script`.
//! Role: Thin query-layer surface that turns text into install/load requests.
//! Invariants: Keywords are ASCII case-insensitive and only recognized unquoted.
//! Invariants: Arguments are bare words or single/double quoted strings (`\` escapes).
//! Invariants: Parse failures are usage errors; nothing executes on a parse error.

use super::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Statement {
    Install {
        name: String,
        repo: Option<String>,
        force: bool,
    },
    Load {
        path: String,
    },
    Uninstall {
        name: String,
    },
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        !self.quoted && self.text.eq_ignore_ascii_case(keyword)
    }
}

pub fn parse_script(input: &str) -> Result<Vec<Statement>, Error> {
    let mut statements = Vec::new();
    for tokens in tokenize(input)? {
        if tokens.is_empty() {
            continue;
        }
        statements.push(parse_tokens(&tokens)?);
    }
    Ok(statements)
}

pub fn parse_statement(input: &str) -> Result<Statement, Error> {
    let mut statements = parse_script(input)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(usage("empty statement")),
        _ => Err(usage("expected a single statement")
            .with_hint("Separate statements with `;` and run them as a script.")),
    }
}

fn parse_tokens(tokens: &[Token]) -> Result<Statement, Error> {
    let (head, rest) = tokens.split_first().ok_or_else(|| usage("empty statement"))?;

    if head.is_keyword("FORCE") {
        return match rest.split_first() {
            Some((install, args)) if install.is_keyword("INSTALL") => parse_install(args, true),
            _ => Err(usage("FORCE must be followed by INSTALL")),
        };
    }
    if head.is_keyword("INSTALL") {
        return parse_install(rest, false);
    }
    if head.is_keyword("UPDATE") {
        let (name, repo, force) = parse_install_args(rest, "UPDATE")?;
        if force {
            return Err(usage("UPDATE always forces; drop the FORCE keyword"));
        }
        return Ok(Statement::Install {
            name,
            repo,
            force: true,
        });
    }
    if head.is_keyword("LOAD") {
        let args = match rest.first() {
            Some(token) if token.is_keyword("EXTENSION") && rest.len() > 1 => &rest[1..],
            _ => rest,
        };
        return match args {
            [path] => Ok(Statement::Load {
                path: path.text.clone(),
            }),
            [] => Err(usage("LOAD requires an extension name or path")),
            _ => Err(usage("LOAD takes a single extension name or path")),
        };
    }
    if head.is_keyword("UNINSTALL") {
        return match rest {
            [name] => Ok(Statement::Uninstall {
                name: name.text.clone(),
            }),
            [] => Err(usage("UNINSTALL requires an extension name")),
            _ => Err(usage("UNINSTALL takes a single extension name")),
        };
    }

    Err(usage(format!("unknown statement `{}`", head.text))
        .with_hint("Supported: INSTALL, UPDATE, LOAD, UNINSTALL."))
}

fn parse_install(args: &[Token], leading_force: bool) -> Result<Statement, Error> {
    let (name, repo, trailing_force) = parse_install_args(args, "INSTALL")?;
    Ok(Statement::Install {
        name,
        repo,
        force: leading_force || trailing_force,
    })
}

fn parse_install_args(
    args: &[Token],
    keyword: &str,
) -> Result<(String, Option<String>, bool), Error> {
    let (name, mut rest) = args
        .split_first()
        .ok_or_else(|| usage(format!("{keyword} requires an extension name")))?;
    let mut repo = None;
    let mut force = false;

    while let Some((token, tail)) = rest.split_first() {
        if token.is_keyword("FROM") && repo.is_none() {
            let (value, tail) = tail
                .split_first()
                .ok_or_else(|| usage("FROM requires a repository"))?;
            repo = Some(value.text.clone());
            rest = tail;
        } else if token.is_keyword("FORCE") && !force {
            force = true;
            rest = tail;
        } else {
            return Err(usage(format!("unexpected `{}` in {keyword}", token.text))
                .with_hint(format!("Usage: {keyword} <name> [FROM <repo>]")));
        }
    }

    Ok((name.text.clone(), repo, force))
}

/// Splits input into statements of tokens; `;` separates statements outside quotes.
fn tokenize(input: &str) -> Result<Vec<Vec<Token>>, Error> {
    let mut statements = vec![Vec::new()];
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == ';' {
            chars.next();
            statements.push(Vec::new());
            continue;
        }

        let token = if ch == '\'' || ch == '"' {
            let quote = ch;
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(escaped) => text.push(escaped),
                        None => return Err(usage("unterminated escape in quoted string")),
                    },
                    Some(c) if c == quote => break,
                    Some(c) => text.push(c),
                    None => return Err(usage("unterminated quoted string")),
                }
            }
            Token { text, quoted: true }
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == ';' {
                    break;
                }
                text.push(c);
                chars.next();
            }
            Token {
                text,
                quoted: false,
            }
        };

        if let Some(current) = statements.last_mut() {
            current.push(token);
        }
    }

    Ok(statements)
}

fn usage(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Usage).with_message(message)
}
