use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::license::spdx;
use crate::models::UNKNOWN_LICENSE;

/// Default number of distinct inputs remembered by a [`Normalizer`].
pub const DEFAULT_MEMO_CAPACITY: usize = 1024;

/// Trove classifiers that map to a single identifier.
const CLASSIFIERS: &[(&str, &str)] = &[
    ("License :: OSI Approved :: MIT License", "MIT"),
    ("License :: OSI Approved :: MIT No Attribution License (MIT-0)", "MIT-0"),
    ("License :: OSI Approved :: Apache Software License", "Apache-2.0"),
    ("License :: OSI Approved :: BSD License", "BSD-3-Clause"),
    ("License :: OSI Approved :: ISC License (ISCL)", "ISC"),
    ("License :: OSI Approved :: Python Software Foundation License", "PSF-2.0"),
    ("License :: OSI Approved :: Mozilla Public License 2.0 (MPL 2.0)", "MPL-2.0"),
    ("License :: OSI Approved :: Mozilla Public License 1.1 (MPL 1.1)", "MPL-1.1"),
    ("License :: OSI Approved :: GNU General Public License v2 (GPLv2)", "GPL-2.0"),
    ("License :: OSI Approved :: GNU General Public License v2 or later (GPLv2+)", "GPL-2.0-or-later"),
    ("License :: OSI Approved :: GNU General Public License v3 (GPLv3)", "GPL-3.0"),
    ("License :: OSI Approved :: GNU General Public License v3 or later (GPLv3+)", "GPL-3.0-or-later"),
    ("License :: OSI Approved :: GNU Lesser General Public License v2 (LGPLv2)", "LGPL-2.0"),
    ("License :: OSI Approved :: GNU Lesser General Public License v2 or later (LGPLv2+)", "LGPL-2.0-or-later"),
    ("License :: OSI Approved :: GNU Lesser General Public License v3 (LGPLv3)", "LGPL-3.0"),
    ("License :: OSI Approved :: GNU Lesser General Public License v3 or later (LGPLv3+)", "LGPL-3.0-or-later"),
    ("License :: OSI Approved :: GNU Library or Lesser General Public License (LGPL)", "LGPL-2.0-or-later"),
    ("License :: OSI Approved :: GNU Affero General Public License v3", "AGPL-3.0"),
    ("License :: OSI Approved :: GNU Affero General Public License v3 or later (AGPLv3+)", "AGPL-3.0-or-later"),
    ("License :: OSI Approved :: Eclipse Public License 2.0 (EPL-2.0)", "EPL-2.0"),
    ("License :: OSI Approved :: European Union Public Licence 1.2 (EUPL 1.2)", "EUPL-1.2"),
    ("License :: OSI Approved :: The Unlicense (Unlicense)", "Unlicense"),
    ("License :: OSI Approved :: zlib/libpng License", "Zlib"),
    ("License :: OSI Approved :: Boost Software License 1.0 (BSL-1.0)", "BSL-1.0"),
    ("License :: OSI Approved :: Historical Permission Notice and Disclaimer (HPND)", "HPND"),
    ("License :: OSI Approved :: Artistic License", "Artistic-2.0"),
    ("License :: CC0 1.0 Universal (CC0 1.0) Public Domain Dedication", "CC0-1.0"),
    ("License :: Public Domain", "CC0-1.0"),
];

/// Maps free-text license declarations and classifiers to canonical identifiers.
///
/// Output is a pure function of the input, so results are memoized. The memo
/// holds at most `capacity` entries and evicts the oldest insertion first.
pub struct Normalizer {
    capacity: usize,
    memo: Mutex<Memo>,
}

type MemoKey = (String, Vec<String>);

#[derive(Default)]
struct Memo {
    entries: HashMap<MemoKey, Vec<String>>,
    order: VecDeque<MemoKey>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            memo: Mutex::new(Memo::default()),
        }
    }

    /// Normalize a raw license declaration plus classifiers.
    ///
    /// Never returns an empty list: unrecognized input yields `["UNKNOWN"]`.
    pub fn normalize(&self, raw: &str, classifiers: &[String]) -> Vec<String> {
        let key: MemoKey = (raw.to_string(), classifiers.to_vec());

        {
            let memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = memo.entries.get(&key) {
                return hit.clone();
            }
        }

        let ids = normalize_uncached(raw, classifiers);

        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if !memo.entries.contains_key(&key) {
            if memo.order.len() >= self.capacity {
                if let Some(oldest) = memo.order.pop_front() {
                    memo.entries.remove(&oldest);
                }
            }
            memo.order.push_back(key.clone());
            memo.entries.insert(key, ids.clone());
        }
        ids
    }

    #[cfg(test)]
    pub fn memo_len(&self) -> usize {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_uncached(raw: &str, classifiers: &[String]) -> Vec<String> {
    // Registries often carry the whole license text; the first line is the
    // only part worth matching.
    let text = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");

    if !text.is_empty() && !text.eq_ignore_ascii_case(UNKNOWN_LICENSE) {
        if let Some(id) = spdx::lookup(text) {
            return vec![id.to_string()];
        }
        if let Some(ids) = parse_expression(text) {
            return ids;
        }
    }

    let from_classifiers = classifier_ids(classifiers);
    if !from_classifiers.is_empty() {
        return from_classifiers;
    }

    vec![UNKNOWN_LICENSE.to_string()]
}

/// Identifiers for every `License ::` classifier that can be recognized.
fn classifier_ids(classifiers: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for classifier in classifiers {
        let classifier = classifier.trim();
        if !classifier.starts_with("License ::") {
            continue;
        }
        let id = CLASSIFIERS
            .iter()
            .find(|(c, _)| *c == classifier)
            .map(|(_, id)| *id)
            .or_else(|| {
                classifier
                    .rsplit(" :: ")
                    .next()
                    .and_then(spdx::lookup)
            });
        if let Some(id) = id {
            push_unique(&mut ids, id.to_string());
        }
    }
    ids
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

// ---------------------------------------------------------------------------
// License expression parser
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Clone)]
enum Token {
    Word(String),
    And,
    Or,
    With,
    LParen,
    RParen,
}

/// Tokenize a license expression. `/` is read as `OR`.
fn tokenize(expr: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '/' => {
                tokens.push(Token::Or);
                chars.next();
            }
            _ => {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '/') {
                        break;
                    }
                    s.push(c);
                    chars.next();
                }
                // Lowercase "and"/"or" occur inside names ("or later"); "with" is safe.
                let token = match s.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    w if w.eq_ignore_ascii_case("WITH") => Token::With,
                    _ => Token::Word(s),
                };
                tokens.push(token);
            }
        }
    }
    tokens
}

/// Recursive descent parser collecting the individual licenses of an expression.
///
/// ```text
/// expr  := term ( ("AND" | "OR") term )*
/// term  := "(" expr ")" | words ( "WITH" words )?
/// words := Word+
/// ```
///
/// Consecutive words form one name, so `Apache License 2.0 OR MIT` yields two
/// licenses. The parser is lenient: stray operators and unbalanced parentheses
/// are skipped.
struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
    licenses: Vec<String>,
    resolved: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn parse_expr(&mut self) {
        while let Some(token) = self.peek() {
            match token {
                Token::RParen => return,
                Token::And | Token::Or | Token::With => self.bump(),
                _ => self.parse_term(),
            }
        }
    }

    fn parse_term(&mut self) {
        if matches!(self.peek(), Some(Token::LParen)) {
            self.bump();
            self.parse_expr();
            if matches!(self.peek(), Some(Token::RParen)) {
                self.bump();
            }
            return;
        }

        let base = self.words();
        let exception = if matches!(self.peek(), Some(Token::With)) {
            self.bump();
            Some(self.words())
        } else {
            None
        };

        let id = match spdx::lookup(&base) {
            Some(id) => {
                self.resolved += 1;
                match exception.filter(|e| !e.is_empty()) {
                    Some(exc) => {
                        let exc = spdx::exception_id(&exc).map_or(exc, str::to_string);
                        format!("{id} WITH {exc}")
                    }
                    None => id.to_string(),
                }
            }
            None => UNKNOWN_LICENSE.to_string(),
        };
        push_unique(&mut self.licenses, id);
    }

    fn words(&mut self) -> String {
        let mut words = Vec::new();
        while let Some(Token::Word(w)) = self.peek() {
            words.push(w.clone());
            self.bump();
        }
        words.join(" ")
    }
}

/// Split an `AND`/`OR`/`WITH` expression into its individual licenses.
///
/// Returns `None` when the text has no operators or when none of its parts
/// could be recognized.
fn parse_expression(text: &str) -> Option<Vec<String>> {
    let tokens = tokenize(text);
    let has_operator = tokens
        .iter()
        .any(|t| matches!(t, Token::And | Token::Or | Token::With));
    if !has_operator {
        return None;
    }

    let mut parser = ExprParser {
        tokens,
        pos: 0,
        licenses: Vec::new(),
        resolved: 0,
    };
    while parser.pos < parser.tokens.len() {
        parser.parse_expr();
        // Unbalanced ')' at the top level.
        if matches!(parser.peek(), Some(Token::RParen)) {
            parser.bump();
        }
    }

    (parser.resolved > 0).then_some(parser.licenses)
}
