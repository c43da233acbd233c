//! Structural sanity check for generated fragments.
//!
//! A fragment is appended inside a test body, so it must close every scope
//! it opens and must not bring its own module plumbing. This is a scanner,
//! not a parser: strings, template literals, regex literals and comments are
//! skipped and brackets are matched. A `/` starts a regex literal only where
//! an operand is expected; elsewhere it is division.
use crate::error::{ExecutionFailure, FailureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Single,
    Double,
    Template,
    Regex { in_class: bool },
    LineComment,
    BlockComment,
}

/// Characters after which a `/` begins an operand rather than dividing.
const REGEX_PRECEDERS: &str = "(,=:[!&|?{};+-*/%<>~^";

/// Reject fragments that cannot be appended to a test body as-is.
pub fn check_structure(code: &str) -> Result<(), ExecutionFailure> {
    if code.trim().is_empty() {
        return Err(malformed("fragment is empty"));
    }
    for (index, line) in code.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") || trimmed.contains("require(") {
            return Err(malformed(format!(
                "line {}: module imports are not allowed inside a step",
                index + 1
            )));
        }
        if trimmed.starts_with("test(") || trimmed.starts_with("test.describe(") {
            return Err(malformed(format!(
                "line {}: fragment must not declare its own test",
                index + 1
            )));
        }
    }
    check_balance(code)
}

fn check_balance(code: &str) -> Result<(), ExecutionFailure> {
    let mut modes = vec![Mode::Code];
    // Open brackets; '$' marks a `${` interpolation inside a template literal.
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    // Last significant code character; `None` at the start of a line.
    let mut previous: Option<char> = None;
    let mut chars = code.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
        }
        let mode = modes.last().copied().unwrap_or(Mode::Code);
        if mode == Mode::Code {
            if ch == '\n' {
                previous = None;
            } else if !ch.is_whitespace() && ch != '/' {
                previous = Some(ch);
            }
        }
        match mode {
            Mode::Code => match ch {
                '\'' => modes.push(Mode::Single),
                '"' => modes.push(Mode::Double),
                '`' => modes.push(Mode::Template),
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    modes.push(Mode::LineComment);
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    modes.push(Mode::BlockComment);
                }
                '/' if previous.map_or(true, |c| REGEX_PRECEDERS.contains(c)) => {
                    modes.push(Mode::Regex { in_class: false });
                }
                '/' => previous = Some('/'),
                '(' | '[' | '{' => open.push((ch, line)),
                ')' | ']' | '}' => match open.pop() {
                    Some(('$', _)) if ch == '}' => {
                        // End of a template interpolation.
                        modes.pop();
                    }
                    Some((opener, _)) if closes(opener) == ch => {}
                    Some((opener, opened_at)) => {
                        return Err(malformed(format!(
                            "line {line}: '{ch}' does not match '{opener}' opened on line {opened_at}"
                        )));
                    }
                    None => {
                        return Err(malformed(format!("line {line}: unmatched '{ch}'")));
                    }
                },
                _ => {}
            },
            Mode::Single | Mode::Double => match ch {
                '\\' => {
                    chars.next();
                }
                '\n' => return Err(malformed(format!("line {}: unterminated string", line - 1))),
                '\'' if mode == Mode::Single => {
                    modes.pop();
                }
                '"' if mode == Mode::Double => {
                    modes.pop();
                }
                _ => {}
            },
            Mode::Template => match ch {
                '\\' => {
                    chars.next();
                }
                '`' => {
                    modes.pop();
                }
                '$' if chars.peek() == Some(&'{') => {
                    chars.next();
                    open.push(('$', line));
                    modes.push(Mode::Code);
                }
                _ => {}
            },
            Mode::Regex { in_class } => match ch {
                '\\' => {
                    chars.next();
                }
                '\n' => {
                    return Err(malformed(format!(
                        "line {}: unterminated regex literal",
                        line - 1
                    )))
                }
                '[' if !in_class => set_top(&mut modes, Mode::Regex { in_class: true }),
                ']' if in_class => set_top(&mut modes, Mode::Regex { in_class: false }),
                '/' if !in_class => {
                    modes.pop();
                    // A closed regex is an operand, so a following `/` divides.
                    previous = Some('r');
                }
                _ => {}
            },
            Mode::LineComment => {
                if ch == '\n' {
                    modes.pop();
                }
            }
            Mode::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    modes.pop();
                }
            }
        }
    }

    match modes.last().copied().unwrap_or(Mode::Code) {
        Mode::Code | Mode::LineComment => {}
        Mode::Single | Mode::Double => return Err(malformed("unterminated string")),
        Mode::Template => return Err(malformed("unterminated template literal")),
        Mode::Regex { .. } => return Err(malformed("unterminated regex literal")),
        Mode::BlockComment => return Err(malformed("unterminated block comment")),
    }
    if let Some((opener, opened_at)) = open.last() {
        let opener = if *opener == '$' {
            "${".to_string()
        } else {
            opener.to_string()
        };
        return Err(malformed(format!(
            "'{opener}' opened on line {opened_at} is never closed"
        )));
    }
    Ok(())
}

fn set_top(modes: &mut [Mode], mode: Mode) {
    if let Some(top) = modes.last_mut() {
        *top = mode;
    }
}

fn closes(opener: char) -> char {
    match opener {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn malformed(detail: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::new(FailureKind::MalformedFragment, detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_balanced_statements() {
        let code = "await page.goto('/login');\n\
            await page.getByLabel('Username').fill(\"admin\");\n\
            for (const name of ['a', 'b']) {\n  await page.fill(`#${name}`, `{${name}}`);\n}\n\
            // trailing ) comment\n\
            /* { block */\n\
            await expect(page).toHaveURL(/dashboard/);";
        assert_eq!(check_structure(code), Ok(()));
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        assert_eq!(check_structure("await page.click('text=Save (draft)');"), Ok(()));
        assert_eq!(check_structure("await page.click(\"[data-id='{x']\");"), Ok(()));
    }

    #[test]
    fn rejects_unbalanced_or_mismatched_scopes() {
        let err = check_structure("if (ok) {\n  await page.click('#a');\n").expect_err("open");
        assert_eq!(err.kind, FailureKind::MalformedFragment);
        assert!(err.detail.contains("line 1"));

        let err = check_structure("await page.click('#a'));").expect_err("extra close");
        assert!(err.detail.contains("unmatched ')'"));

        let err = check_structure("foo(bar];").expect_err("mismatch");
        assert!(err.detail.contains("does not match"));
    }

    #[test]
    fn rejects_unterminated_literals() {
        assert!(check_structure("await page.fill('#a', 'oops);").is_err());
        assert!(check_structure("const s = `abc;").is_err());
        assert!(check_structure("/* never closed").is_err());
    }

    #[test]
    fn regex_literals_may_contain_slashes_and_quotes() {
        assert_eq!(
            check_structure("await expect(page).toHaveURL(/\\/dashboard\\//);"),
            Ok(())
        );
        assert_eq!(
            check_structure("await expect(page.locator('h1')).toHaveText(/it's \"done\" (now)/);"),
            Ok(())
        );
        assert_eq!(check_structure("const parts = path.split(/[/]/);"), Ok(()));
        assert_eq!(
            check_structure("if (ok)\n  /^\\/items\\/\\d+$/.test(url);"),
            Ok(())
        );
    }

    #[test]
    fn slash_after_an_operand_is_division() {
        assert_eq!(check_structure("const half = total / 2;"), Ok(()));
        assert_eq!(check_structure("const ratio = (a) / (b) / count;"), Ok(()));
        assert_eq!(check_structure("const n = items[0] / 2; // (half"), Ok(()));
    }

    #[test]
    fn rejects_unterminated_regex() {
        let err = check_structure("expect(url).toMatch(/abc);\nawait next();").expect_err("open regex");
        assert!(err.detail.contains("unterminated regex literal"));
        assert!(check_structure("expect(url).toMatch(/abc").is_err());
    }

    #[test]
    fn rejects_module_plumbing_and_empty_fragments() {
        assert!(check_structure("const { test } = require('@playwright/test');").is_err());
        assert!(check_structure("import { test } from '@playwright/test';").is_err());
        assert!(check_structure("test('x', async ({ page }) => {});").is_err());
        assert!(check_structure("   \n").is_err());
    }
}
