//! BibTeX generation and parsing.
//!
//! Generated entries follow the usual conventions:
//!
//! - citation key `lastname` + `year` + first significant title word
//!   (`vaswani2017attention`)
//! - authors rendered `Last, First and Last, First`
//! - page ranges with `--`
//! - LaTeX special characters escaped in free-text fields

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0},
    combinator::{map, opt},
    error::ErrorKind,
    multi::{separated_list0, separated_list1},
    sequence::preceded,
    IResult,
};
use std::collections::HashMap;

use crate::models::{BibtexEntry, BibtexProvenance, PaperRecord};
use crate::sources::SourceError;

const STOP_WORDS: &[&str] = &["a", "an", "the", "on", "in", "of", "for", "to", "and", "with"];

const CONFERENCE_KEYWORDS: &[&str] = &[
    "proceedings",
    "proc",
    "conference",
    "symposium",
    "workshop",
    "meeting",
    "congress",
    "neurips",
    "nips",
    "icml",
    "iclr",
    "cvpr",
    "iccv",
    "eccv",
    "acl",
    "emnlp",
    "naacl",
    "aaai",
    "ijcai",
    "kdd",
    "sigir",
    "sigmod",
    "vldb",
    "chi",
];

const JOURNAL_KEYWORDS: &[&str] = &[
    "journal",
    "transactions",
    "letters",
    "review",
    "reviews",
    "magazine",
    "annals",
    "bulletin",
    "communications",
    "nature",
    "science",
];

/// Longest abstract copied into a generated entry
const MAX_ABSTRACT_CHARS: usize = 1000;

/// Escape LaTeX special characters
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

fn ascii_word(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Citation key: first author's last name, year and first significant title word
pub fn citation_key(paper: &PaperRecord) -> String {
    let author = paper
        .authors
        .first()
        .map(|a| ascii_word(a.last_name()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());

    let year = paper.year.map(|y| y.to_string()).unwrap_or_default();

    let word = paper
        .title
        .split_whitespace()
        .map(ascii_word)
        .find(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .unwrap_or_default();

    format!("{}{}{}", author, year, word)
}

fn has_keyword(venue: &str, keywords: &[&str]) -> bool {
    venue
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| keywords.contains(&word))
}

/// Pick an entry type from the record's venue and identifiers
pub fn detect_entry_type(paper: &PaperRecord) -> &'static str {
    let venue = paper.venue.as_deref().unwrap_or("");
    let is_preprint = venue.is_empty()
        || venue.to_lowercase().contains("arxiv")
        || venue.to_lowercase().contains("preprint");

    if is_preprint && paper.arxiv_id.is_some() {
        return "misc";
    }
    if has_keyword(venue, CONFERENCE_KEYWORDS) {
        return "inproceedings";
    }
    if has_keyword(venue, JOURNAL_KEYWORDS) || (paper.volume.is_some() && paper.pages.is_some()) {
        return "article";
    }
    "misc"
}

/// Normalize a page range to BibTeX's `--`
pub fn format_pages(pages: &str) -> String {
    let pages = pages.trim();
    if pages.contains("--") {
        return pages.to_string();
    }
    match pages.split_once(['-', '–', '—']) {
        Some((start, end)) => format!("{}--{}", start.trim(), end.trim()),
        None => pages.to_string(),
    }
}

fn format_authors(paper: &PaperRecord) -> Option<String> {
    if paper.authors.is_empty() {
        return None;
    }
    let names: Vec<String> = paper
        .authors
        .iter()
        .map(|a| {
            let last = a.last_name();
            let given = a.given_names();
            if given.is_empty() {
                escape_latex(last)
            } else {
                format!("{}, {}", escape_latex(last), escape_latex(&given))
            }
        })
        .collect();
    Some(names.join(" and "))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

/// Build a BibTeX entry from a paper record
pub fn generate_entry(paper: &PaperRecord) -> BibtexEntry {
    let entry_type = detect_entry_type(paper);
    let venue = paper.venue.as_deref().map(escape_latex);

    let (journal, booktitle, howpublished) = match entry_type {
        "article" => (venue, None, None),
        "inproceedings" => (None, venue, None),
        _ => {
            let howpublished = match (&paper.arxiv_id, &venue) {
                (Some(id), None) => Some(format!("arXiv preprint arXiv:{}", id)),
                (Some(id), Some(v)) if v.to_lowercase().contains("arxiv") => {
                    Some(format!("arXiv preprint arXiv:{}", id))
                }
                _ => venue,
            };
            (None, None, howpublished)
        }
    };

    BibtexEntry::new(entry_type, citation_key(paper), BibtexProvenance::Generated)
        .with_field("author", format_authors(paper))
        .with_field("title", Some(escape_latex(&paper.title)))
        .with_field("journal", journal)
        .with_field("booktitle", booktitle)
        .with_field("howpublished", howpublished)
        .with_field("year", paper.year.map(|y| y.to_string()))
        .with_field("volume", paper.volume.as_deref().map(escape_latex))
        .with_field("number", paper.issue.as_deref().map(escape_latex))
        .with_field("pages", paper.pages.as_deref().map(format_pages))
        .with_field("doi", paper.doi.clone())
        .with_field("eprint", paper.arxiv_id.clone())
        .with_field("archiveprefix", paper.arxiv_id.as_ref().map(|_| "arXiv"))
        .with_field("url", paper.url.clone())
        .with_field(
            "abstract",
            paper
                .r#abstract
                .as_deref()
                .map(|a| escape_latex(&truncate_chars(a, MAX_ABSTRACT_CHARS))),
        )
}

fn suffix(index: usize) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    loop {
        letters.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Suffix repeated citation keys with `a`, `b`, ... so a batch imports cleanly
pub fn disambiguate_keys<'a, I>(entries: I)
where
    I: IntoIterator<Item = &'a mut BibtexEntry>,
{
    let mut entries: Vec<&mut BibtexEntry> = entries.into_iter().collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in &entries {
        *counts.entry(entry.key.clone()).or_default() += 1;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    for entry in entries.iter_mut() {
        if counts.get(&entry.key).copied().unwrap_or(0) < 2 {
            continue;
        }
        let position = seen.entry(entry.key.clone()).or_default();
        let new_key = format!("{}{}", entry.key, suffix(*position));
        *position += 1;
        entry.rekey(new_key);
    }
}

/// Parse the first entry of a native BibTeX document
///
/// `@string` macros defined ahead of the entry are expanded, `#` concatenation
/// is joined and `@comment`/`@preamble` blocks are skipped. A stray `@` that
/// does not start a block is passed over.
pub fn parse_entry(text: &str, provenance: BibtexProvenance) -> Result<BibtexEntry, SourceError> {
    let mut strings: HashMap<String, String> = HashMap::new();
    let mut remaining = text;
    let mut first_error = None;

    while let Some(at) = remaining.find('@') {
        remaining = &remaining[at..];
        match at_block(remaining, &strings) {
            Ok((rest, Block::Entry { entry_type, key, fields })) => {
                let mut entry = BibtexEntry::new(entry_type, key, provenance);
                for (name, value) in fields {
                    entry.set_field(name, value.split_whitespace().collect::<Vec<_>>().join(" "));
                }
                // Macro references in the source text would not survive on their own
                if strings.is_empty() {
                    entry.raw = Some(remaining[..remaining.len() - rest.len()].trim().to_string());
                }
                return Ok(entry);
            }
            Ok((rest, Block::Macro(name, value))) => {
                strings.insert(name, value);
                remaining = rest;
            }
            Ok((rest, Block::Skipped)) => remaining = rest,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(describe_parse_error(text, e));
                }
                remaining = &remaining[1..];
            }
        }
    }

    Err(SourceError::Malformed(format!(
        "BibTeX: {}",
        first_error.unwrap_or_else(|| "no entry".to_string())
    )))
}

fn describe_parse_error(text: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => format!(
            "unexpected input at byte {} ({:?})",
            text.len() - e.input.len(),
            e.code
        ),
        nom::Err::Incomplete(_) => "truncated entry".to_string(),
    }
}

/// A top-level `@` block
enum Block {
    Entry {
        entry_type: String,
        key: String,
        fields: Vec<(String, String)>,
    },
    Macro(String, String),
    Skipped,
}

fn at_block<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, Block> {
    let (rest, _) = char('@')(input)?;
    let (rest, kind) = preceded(multispace0, take_while1(|c: char| c.is_ascii_alphanumeric()))(rest)?;

    match kind.to_ascii_lowercase().as_str() {
        "comment" => {
            let (rest, _) = multispace0(rest)?;
            if rest.starts_with('{') {
                let (rest, _) = braced(rest)?;
                Ok((rest, Block::Skipped))
            } else {
                let end = rest.find('\n').unwrap_or(rest.len());
                Ok((&rest[end..], Block::Skipped))
            }
        }
        "preamble" => {
            let (rest, close) = opening(rest)?;
            let (rest, _) = field_value(rest, strings)?;
            let (rest, _) = preceded(multispace0, char(close))(rest)?;
            Ok((rest, Block::Skipped))
        }
        "string" => {
            let (rest, close) = opening(rest)?;
            let (rest, (name, value)) = field(rest, strings)?;
            let (rest, _) = preceded(multispace0, char(close))(rest)?;
            Ok((rest, Block::Macro(name, value)))
        }
        _ => {
            let (rest, close) = opening(rest)?;
            let (rest, key) = preceded(multispace0, citation_key_token)(rest)?;
            let (rest, entry_fields) = opt(preceded(
                preceded(multispace0, char(',')),
                |i: &'a str| fields(i, strings),
            ))(rest)?;
            let (rest, _) = preceded(multispace0, char(close))(rest)?;
            Ok((
                rest,
                Block::Entry {
                    entry_type: kind.to_string(),
                    key: key.to_string(),
                    fields: entry_fields.unwrap_or_default(),
                },
            ))
        }
    }
}

/// `{` or `(`; returns the matching closer
fn opening(input: &str) -> IResult<&str, char> {
    map(preceded(multispace0, alt((char('{'), char('(')))), |open| {
        if open == '(' {
            ')'
        } else {
            '}'
        }
    })(input)
}

fn citation_key_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !matches!(c, ',' | '}' | ')' | '{' | '('))(input)
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '+'))(input)
}

fn fields<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Vec<(String, String)>> {
    let (rest, list) =
        separated_list0(preceded(multispace0, char(',')), |i: &'a str| field(i, strings))(input)?;
    let (rest, _) = opt(preceded(multispace0, char(',')))(rest)?;
    Ok((rest, list))
}

fn field<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, (String, String)> {
    let (rest, key) = preceded(multispace0, name)(input)?;
    let (rest, _) = preceded(multispace0, char('='))(rest)?;
    let (rest, value) = field_value(rest, strings)?;
    Ok((rest, (key.to_ascii_lowercase(), value)))
}

/// One or more `#`-joined pieces: braced, quoted, a number or a macro name
fn field_value<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, String> {
    let piece = |i: &'a str| -> IResult<&'a str, String> {
        preceded(
            multispace0,
            alt((
                map(braced, str::to_string),
                map(quoted, str::to_string),
                map(digit1, str::to_string),
                map(name, |macro_name: &str| {
                    strings
                        .get(&macro_name.to_ascii_lowercase())
                        .cloned()
                        .unwrap_or_else(|| macro_name.to_string())
                }),
            )),
        )(i)
    };
    map(separated_list1(preceded(multispace0, char('#')), piece), |parts: Vec<String>| {
        parts.concat()
    })(input)
}

fn unexpected(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, ErrorKind::Char))
}

/// Contents of a `{...}` group, nested braces kept
fn braced(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(unexpected(input));
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[i + 1..], &input[1..i]));
                }
            }
            _ => {}
        }
    }
    Err(unexpected(input))
}

/// Contents of a `"..."` string; quotes inside braces or after `\` do not close it
fn quoted(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('"') {
        return Err(unexpected(input));
    }
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in input.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            '"' if depth == 0 => return Ok((&input[i + 1..], &input[1..i])),
            _ => {}
        }
    }
    Err(unexpected(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaperBuilder, SourceKind};

    fn transformer() -> PaperRecord {
        PaperBuilder::new("Attention Is All You Need", SourceKind::Dblp, "conf/nips/VaswaniSPUJGKP17")
            .author_names(["Ashish Vaswani", "Noam Shazeer"])
            .year(Some(2017))
            .venue(Some("Advances in Neural Information Processing Systems 30 (NIPS 2017)"))
            .pages(Some("5998-6008"))
            .build()
    }

    #[test]
    fn test_escape_latex() {
        assert_eq!(escape_latex("R&D 100% $5 #1 a_b"), "R\\&D 100\\% \\$5 \\#1 a\\_b");
        assert_eq!(escape_latex("{x}~^\\"), "\\{x\\}\\textasciitilde{}\\textasciicircum{}\\textbackslash{}");
    }

    #[test]
    fn test_citation_key_skips_stop_words() {
        assert_eq!(citation_key(&transformer()), "vaswani2017attention");

        let paper = PaperBuilder::new("The Art of Computer Programming", SourceKind::OpenAlex, "W1")
            .author_names(["Donald E. Knuth"])
            .year(Some(1968))
            .build();
        assert_eq!(citation_key(&paper), "knuth1968art");

        let anonymous = PaperBuilder::new("On the Road", SourceKind::OpenAlex, "W2").build();
        assert_eq!(citation_key(&anonymous), "anonymousroad");
    }

    #[test]
    fn test_entry_type_detection() {
        assert_eq!(detect_entry_type(&transformer()), "inproceedings");

        let preprint = PaperBuilder::new("X", SourceKind::Arxiv, "2101.00001")
            .arxiv_id(Some("2101.00001"))
            .build();
        assert_eq!(detect_entry_type(&preprint), "misc");

        let journal = PaperBuilder::new("X", SourceKind::CrossRef, "10.1/x")
            .venue(Some("IEEE Transactions on Pattern Analysis"))
            .build();
        assert_eq!(detect_entry_type(&journal), "article");

        let numbered = PaperBuilder::new("X", SourceKind::CrossRef, "10.1/y")
            .venue(Some("Some Outlet"))
            .volume(Some("3"))
            .pages(Some("1-9"))
            .build();
        assert_eq!(detect_entry_type(&numbered), "article");

        let unknown = PaperBuilder::new("X", SourceKind::CrossRef, "10.1/z")
            .venue(Some("Some Outlet"))
            .build();
        assert_eq!(detect_entry_type(&unknown), "misc");
    }

    #[test]
    fn test_generate_entry_fields() {
        let entry = generate_entry(&transformer());

        assert_eq!(entry.provenance, BibtexProvenance::Generated);
        assert_eq!(entry.entry_type, "inproceedings");
        assert_eq!(entry.field("author"), Some("Vaswani, Ashish and Shazeer, Noam"));
        assert_eq!(entry.field("pages"), Some("5998--6008"));
        assert!(entry.field("booktitle").is_some());
        assert!(entry.field("journal").is_none());
        assert!(entry.render().starts_with("@inproceedings{vaswani2017attention,"));
    }

    #[test]
    fn test_generated_arxiv_entry() {
        let paper = PaperBuilder::new("Some Preprint", SourceKind::Arxiv, "2301.12345")
            .arxiv_id(Some("2301.12345v2"))
            .abstract_text(Some("x".repeat(1500)))
            .build();
        let entry = generate_entry(&paper);

        assert_eq!(entry.entry_type, "misc");
        assert_eq!(entry.field("eprint"), Some("2301.12345"));
        assert_eq!(entry.field("archiveprefix"), Some("arXiv"));
        assert_eq!(entry.field("howpublished"), Some("arXiv preprint arXiv:2301.12345"));
        assert_eq!(entry.field("abstract").map(|a| a.chars().count()), Some(1003));
    }

    #[test]
    fn test_disambiguate_keys() {
        let mut entries = vec![
            BibtexEntry::new("misc", "smith2020deep", BibtexProvenance::Generated),
            BibtexEntry::new("misc", "jones2019graph", BibtexProvenance::Generated),
            BibtexEntry::new("misc", "smith2020deep", BibtexProvenance::Generated),
        ];
        disambiguate_keys(entries.iter_mut());

        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["smith2020deepa", "jones2019graph", "smith2020deepb"]);
        assert_eq!(suffix(26), "aa");
    }

    #[test]
    fn test_parse_native_entry() {
        let text = r#"
@inproceedings{DBLP:conf/nips/VaswaniSPUJGKP17,
  author    = {Ashish Vaswani and
               Noam Shazeer},
  title     = {Attention is All you Need},
  booktitle = {Advances in Neural Information Processing Systems 30: {NIPS} 2017},
  pages     = {5998--6008},
  year      = 2017,
  note      = "with {nested} quotes"
}
"#;
        let entry = parse_entry(text, BibtexProvenance::Dblp).unwrap();

        assert_eq!(entry.entry_type, "inproceedings");
        assert_eq!(entry.key, "DBLP:conf/nips/VaswaniSPUJGKP17");
        assert_eq!(entry.field("author"), Some("Ashish Vaswani and Noam Shazeer"));
        assert_eq!(
            entry.field("booktitle"),
            Some("Advances in Neural Information Processing Systems 30: {NIPS} 2017")
        );
        assert_eq!(entry.field("year"), Some("2017"));
        assert_eq!(entry.field("note"), Some("with {nested} quotes"));
        assert!(entry.render().starts_with("@inproceedings{DBLP:conf/nips/VaswaniSPUJGKP17,"));
        assert!(entry.render().ends_with('}'));
    }

    #[test]
    fn test_parse_macros_and_concatenation() {
        let text = r#"
@comment{exported by a reference manager}
@string{ neurips = "Advances in Neural Information Processing Systems" }
@inproceedings{vaswani2017,
  title     = "Attention " # {Is All} # " You Need",
  booktitle = neurips # " 30",
  note      = "the \"transformer\" paper",
  month     = jun,
}
"#;
        let entry = parse_entry(text, BibtexProvenance::SemanticScholar).unwrap();

        assert_eq!(entry.key, "vaswani2017");
        assert_eq!(entry.field("title"), Some("Attention Is All You Need"));
        assert_eq!(
            entry.field("booktitle"),
            Some("Advances in Neural Information Processing Systems 30")
        );
        assert_eq!(entry.field("note"), Some(r#"the \"transformer\" paper"#));
        assert_eq!(entry.field("month"), Some("jun"));
        // Expanded fields are rendered instead of the macro-bearing source
        assert!(entry.raw.is_none());
        assert!(entry.render().contains("booktitle = {Advances in Neural Information Processing Systems 30}"));
    }

    #[test]
    fn test_parse_skips_stray_at_signs() {
        let text = "Contact: someone@example.org\n@article(Smith2020, title = {Deep Nets}, year = {2020})";
        let entry = parse_entry(text, BibtexProvenance::CrossRef).unwrap();

        assert_eq!(entry.entry_type, "article");
        assert_eq!(entry.key, "Smith2020");
        assert_eq!(entry.field("year"), Some("2020"));
        assert_eq!(
            entry.raw.as_deref(),
            Some("@article(Smith2020, title = {Deep Nets}, year = {2020})")
        );
    }

    #[test]
    fn test_parse_unicode_values() {
        let entry = parse_entry(
            "@article{erdos1959, author = {Paul Erdős and Alfréd Rényi}, title = \"Über Zufallsgraphen\"}",
            BibtexProvenance::CrossRef,
        )
        .unwrap();
        assert_eq!(entry.field("author"), Some("Paul Erdős and Alfréd Rényi"));
        assert_eq!(entry.field("title"), Some("Über Zufallsgraphen"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for text in [
            "no entry here",
            "@article{key, title = {open",
            "@article{key, title = \"unterminated}",
            "@article{key, title = }",
        ] {
            match parse_entry(text, BibtexProvenance::CrossRef) {
                Err(SourceError::Malformed(message)) => assert!(message.starts_with("BibTeX:")),
                other => panic!("expected malformed error for {:?}, got {:?}", text, other),
            }
        }
    }
}
