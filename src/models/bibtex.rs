//! BibTeX entries with provenance.

use serde::{Deserialize, Serialize};

/// Which tier of the BibTeX cascade produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BibtexProvenance {
    Dblp,
    CrossRef,
    SemanticScholar,
    Arxiv,
    /// Built locally from a paper record
    Generated,
}

impl std::fmt::Display for BibtexProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BibtexProvenance::Dblp => "DBLP",
            BibtexProvenance::CrossRef => "CrossRef",
            BibtexProvenance::SemanticScholar => "Semantic Scholar",
            BibtexProvenance::Arxiv => "arXiv",
            BibtexProvenance::Generated => "generated",
        };
        f.write_str(label)
    }
}

/// A single `name = {value}` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibtexField {
    pub name: String,
    pub value: String,
}

/// A BibTeX entry
///
/// Native entries keep the verbatim source text in `raw`; [`BibtexEntry::render`]
/// prefers it so publisher formatting survives untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibtexEntry {
    /// Entry type without the `@` (article, inproceedings, misc, ...)
    pub entry_type: String,

    /// Citation key
    pub key: String,

    /// Fields in output order
    pub fields: Vec<BibtexField>,

    pub provenance: BibtexProvenance,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl BibtexEntry {
    pub fn new(
        entry_type: impl Into<String>,
        key: impl Into<String>,
        provenance: BibtexProvenance,
    ) -> Self {
        Self {
            entry_type: entry_type.into().to_lowercase(),
            key: key.into(),
            fields: Vec::new(),
            provenance,
            raw: None,
        }
    }

    /// Look up a field value by case-insensitive name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Set a field, replacing an existing value of the same name
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.value = value,
            None => self.fields.push(BibtexField { name, value }),
        }
    }

    /// Builder-style [`BibtexEntry::set_field`] that skips empty values
    pub fn with_field(mut self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value.map(Into::into).filter(|v| !v.trim().is_empty()) {
            self.set_field(name, value);
        }
        self
    }

    /// Change the citation key, keeping the native text consistent
    pub fn rekey(&mut self, new_key: impl Into<String>) {
        let new_key = new_key.into();
        if let Some(ref raw) = self.raw {
            let old_head = format!("{{{},", self.key);
            if raw.contains(&old_head) {
                self.raw = Some(raw.replacen(&old_head, &format!("{{{},", new_key), 1));
            } else {
                self.raw = None;
            }
        }
        self.key = new_key;
    }

    /// Render as BibTeX text
    pub fn render(&self) -> String {
        if let Some(ref raw) = self.raw {
            return raw.trim().to_string();
        }

        let mut out = format!("@{}{{{}", self.entry_type, self.key);
        for field in &self.fields {
            out.push_str(&format!(",\n  {} = {{{}}}", field.name, field.value));
        }
        out.push_str("\n}");
        out
    }
}

impl std::fmt::Display for BibtexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}
