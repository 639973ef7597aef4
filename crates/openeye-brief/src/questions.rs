//! Numbered clarifying-question documents.
//!
//! Layout: a preamble paragraph, a numbered list whose items open with a bold
//! title (`1. **Title**: body`), then a closing paragraph. Item bodies may run
//! onto indented lines or nested bullets.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Continuation lines lose at most this much indentation; `render` puts it back.
const BODY_INDENT: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BriefError {
    #[error("document contains no numbered questions")]
    NoQuestions,
    #[error("question {0} has no bold title")]
    MissingTitle(u32),
    #[error("question {0} has an empty title")]
    EmptyTitle(u32),
    #[error("question {0} has no body text")]
    EmptyBody(u32),
    #[error("expected question {expected}, found {found}")]
    Numbering { expected: u32, found: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub number: u32,
    /// Title text inside the bold markers, inline markdown kept.
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Brief {
    pub preamble: String,
    pub questions: Vec<Question>,
    pub closing: String,
}

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)[.)]\s+(.*)$").expect("valid item regex"))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\*\*(.*?)\*\*\s*:?\s*(.*)$").expect("valid title regex"))
}

struct Draft {
    number: u32,
    head: String,
    lines: Vec<String>,
}

impl Draft {
    fn finish(self) -> Result<Question, BriefError> {
        let caps = title_re()
            .captures(&self.head)
            .ok_or(BriefError::MissingTitle(self.number))?;
        let title = caps[1].trim().trim_end_matches(':').trim_end().to_string();
        if title.is_empty() {
            return Err(BriefError::EmptyTitle(self.number));
        }

        let mut body: Vec<String> = Vec::with_capacity(self.lines.len() + 1);
        let first = caps[2].trim();
        if !first.is_empty() {
            body.push(first.to_string());
        }
        body.extend(self.lines);
        while body.last().is_some_and(|l| l.trim().is_empty()) {
            body.pop();
        }
        while body.first().is_some_and(|l| l.trim().is_empty()) {
            body.remove(0);
        }
        if body.is_empty() {
            return Err(BriefError::EmptyBody(self.number));
        }

        Ok(Question { number: self.number, title, body: body.join("\n") })
    }
}

fn strip_indent(line: &str) -> &str {
    let indent = line.len() - line.trim_start_matches(' ').len();
    &line[indent.min(BODY_INDENT)..]
}

fn join_paragraph(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Parse a brief. Questions must be numbered 1, 2, 3, … in order.
pub fn parse(text: &str) -> Result<Brief, BriefError> {
    let mut preamble: Vec<&str> = Vec::new();
    let mut drafts: Vec<Draft> = Vec::new();
    // Unindented text seen after a blank line inside the list: closing text,
    // unless another item follows.
    let mut trailing: Vec<&str> = Vec::new();
    let mut saw_blank = false;

    for raw in text.lines() {
        let line = raw.trim_end();

        if let Some(caps) = item_re().captures(line) {
            let found: u32 = caps[1].parse().unwrap_or(0);
            let expected = drafts.len() as u32 + 1;
            if found != expected {
                return Err(BriefError::Numbering { expected, found });
            }
            if let Some(prev) = drafts.last_mut() {
                if !trailing.is_empty() {
                    prev.lines.push(String::new());
                    prev.lines.extend(trailing.drain(..).map(str::to_string));
                }
            }
            drafts.push(Draft { number: found, head: caps[2].to_string(), lines: Vec::new() });
            saw_blank = false;
            continue;
        }

        let Some(current) = drafts.last_mut() else {
            preamble.push(line);
            continue;
        };

        if line.trim().is_empty() {
            saw_blank = true;
            if !trailing.is_empty() {
                trailing.push("");
            }
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if trailing.is_empty() && (indented || !saw_blank) {
            if saw_blank {
                current.lines.push(String::new());
            }
            current.lines.push(strip_indent(line).to_string());
            saw_blank = false;
        } else {
            trailing.push(line);
        }
    }

    if drafts.is_empty() {
        return Err(BriefError::NoQuestions);
    }

    let questions = drafts.into_iter().map(Draft::finish).collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(questions = questions.len(), "parsed brief");

    Ok(Brief {
        preamble: join_paragraph(&preamble),
        questions,
        closing: join_paragraph(&trailing),
    })
}

/// Serialize back to markdown; `parse(&render(b))` reproduces `b`.
pub fn render(brief: &Brief) -> String {
    let mut out = String::new();
    if !brief.preamble.is_empty() {
        out.push_str(&brief.preamble);
        out.push_str("\n\n");
    }
    for q in &brief.questions {
        let mut lines = q.body.lines().peekable();
        // An indented first line would lose its indent after the title.
        if lines.peek().is_some_and(|l| l.starts_with(char::is_whitespace)) {
            out.push_str(&format!("{}. **{}**\n", q.number, q.title));
        } else {
            out.push_str(&format!("{}. **{}**: {}\n", q.number, q.title, lines.next().unwrap_or_default()));
        }
        for line in lines {
            if !line.is_empty() {
                out.push_str(&" ".repeat(BODY_INDENT));
                out.push_str(line);
            }
            out.push('\n');
        }
    }
    if !brief.closing.is_empty() {
        out.push('\n');
        out.push_str(&brief.closing);
        out.push('\n');
    }
    out
}

impl Brief {
    pub fn titles(&self) -> Vec<&str> {
        self.questions.iter().map(|q| q.title.as_str()).collect()
    }

    /// Whether the closing text says the author waits for an answer.
    pub fn awaits_response(&self) -> bool {
        let closing = self.closing.to_lowercase();
        closing.contains("wait") && ["response", "reply", "answer", "hear"].iter().any(|w| closing.contains(w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = include_str!("../tests/fixtures/clarifying_questions.md");

    #[test]
    fn test_canonical_has_five_titles_in_order() {
        let brief = parse(CANONICAL).unwrap();
        assert_eq!(
            brief.titles(),
            vec![
                "Copyright Header",
                "`main.py` Replacement",
                "Frontend Integration",
                "CSS Filename",
                "Missing Modules",
            ]
        );
        let numbers: Vec<u32> = brief.questions.iter().map(|q| q.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_canonical_bodies_and_framing() {
        let brief = parse(CANONICAL).unwrap();
        assert!(brief.preamble.starts_with("I apologize"));
        assert!(brief.questions.iter().all(|q| !q.title.is_empty() && !q.body.is_empty()));
        assert!(brief.questions[2].body.contains("\n- Does it need to be restricted"));
        assert!(brief.questions[4].body.contains("backend.api.schemas.face"));
        assert!(brief.awaits_response());
        assert!(!brief.closing.contains("**"));
    }

    #[test]
    fn test_roundtrip_keeps_count_order_and_text() {
        let brief = parse(CANONICAL).unwrap();
        let again = parse(&render(&brief)).unwrap();
        assert_eq!(again, brief);
    }

    #[test]
    fn test_title_with_colon_inside_bold() {
        let brief = parse("Intro.\n\n1. **Scope:** what is in?\n\nThanks, I'll wait for your reply.\n").unwrap();
        assert_eq!(brief.questions[0].title, "Scope");
        assert_eq!(brief.questions[0].body, "what is in?");
        assert!(brief.awaits_response());
    }

    #[test]
    fn test_body_on_following_lines() {
        let text = "1. **Title**\n   first line\n   second line\n";
        let brief = parse(text).unwrap();
        assert_eq!(brief.questions[0].body, "first line\nsecond line");
        assert_eq!(brief.preamble, "");
        assert_eq!(brief.closing, "");
        assert!(!brief.awaits_response());
    }

    #[test]
    fn test_roundtrip_deeply_indented_body() {
        let text = "1. **Frontend**\n      - own route?\n      - admin only?\n";
        let brief = parse(text).unwrap();
        assert_eq!(brief.questions[0].body, "  - own route?\n  - admin only?");
        let again = parse(&render(&brief)).unwrap();
        assert_eq!(again, brief);
    }

    #[test]
    fn test_interstitial_text_belongs_to_previous_item() {
        let text = "1. **A**: one\n\nmore about one\n\n2. **B**: two\n\nBye.\n";
        let brief = parse(text).unwrap();
        assert_eq!(brief.questions[0].body, "one\n\nmore about one");
        assert_eq!(brief.closing, "Bye.");
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("just prose\n"), Err(BriefError::NoQuestions));
        assert_eq!(parse("1. no title here\n"), Err(BriefError::MissingTitle(1)));
        assert_eq!(parse("1. **  **: body\n"), Err(BriefError::EmptyTitle(1)));
        assert_eq!(parse("1. **Title**:\n"), Err(BriefError::EmptyBody(1)));
        assert_eq!(
            parse("1. **A**: a\n3. **C**: c\n"),
            Err(BriefError::Numbering { expected: 2, found: 3 })
        );
        assert_eq!(
            parse("2. **B**: b\n"),
            Err(BriefError::Numbering { expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_serializes_to_json() {
        let brief = parse(CANONICAL).unwrap();
        let json = serde_json::to_value(&brief).unwrap();
        assert_eq!(json["questions"].as_array().unwrap().len(), 5);
        assert_eq!(json["questions"][1]["title"], "`main.py` Replacement");
    }
}
