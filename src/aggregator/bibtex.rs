//! BibTeX cascade and batch export.
//!
//! Tiers are tried in [`BIBTEX_CASCADE`] order; a tier that does not apply to
//! the identifier is skipped, a tier that fails falls through to the next one.
//!
//! | tier            | applies when                                   |
//! |-----------------|------------------------------------------------|
//! | DBLP            | a DBLP key, DOI, arXiv id or title is known     |
//! | CrossRef        | a publisher DOI is known                        |
//! | owning source   | an arXiv id or an S2 id is known                |
//! | generated       | always, from the best available record          |

use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use super::{Aggregator, AggregatorError};
use crate::models::{BibtexEntry, PaperIdentifier, PaperRecord, SourceKind};
use crate::resolver;
use crate::sources::{Operation, Source, SourceError};
use crate::utils::bibtex::{disambiguate_keys, generate_entry};

/// Largest batch accepted by [`Aggregator::get_bibtex_batch`]
pub const MAX_BATCH: usize = 50;

/// One step of the BibTeX cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BibtexTier {
    Dblp,
    CrossRef,
    /// arXiv or Semantic Scholar, whichever issued the identifier
    OwningSource,
    Generated,
}

pub const BIBTEX_CASCADE: [BibtexTier; 4] = [
    BibtexTier::Dblp,
    BibtexTier::CrossRef,
    BibtexTier::OwningSource,
    BibtexTier::Generated,
];

/// One identifier's outcome in a batch, in input order
#[derive(Debug, Clone, PartialEq)]
pub struct BibtexSlot {
    pub input: String,
    pub result: Result<BibtexEntry, AggregatorError>,
}

/// What the cascade knows about the paper so far
#[derive(Debug)]
struct Subject {
    id: PaperIdentifier,
    doi: Option<String>,
    arxiv_id: Option<String>,
    record: Option<PaperRecord>,
}

impl Subject {
    fn new(id: PaperIdentifier) -> Self {
        let doi = id.doi().map(str::to_string);
        let arxiv_id = match &id {
            PaperIdentifier::Arxiv { value, .. } => Some(value.clone()),
            _ => doi.as_deref().and_then(resolver::arxiv_id_from_doi),
        };
        Self {
            id,
            doi,
            arxiv_id,
            record: None,
        }
    }

    fn absorb(&mut self, record: PaperRecord) {
        if self.doi.is_none() {
            self.doi = record.doi.clone();
        }
        if self.arxiv_id.is_none() {
            self.arxiv_id = record.arxiv_id.clone();
        }
        self.record = Some(record);
    }

    /// Identifiers DBLP can resolve, most specific first
    fn dblp_lookups(&self) -> Vec<PaperIdentifier> {
        if let PaperIdentifier::Dblp { .. } = self.id {
            return vec![self.id.clone()];
        }
        let mut lookups = Vec::new();
        if let Some(doi) = &self.doi {
            lookups.push(PaperIdentifier::doi_of(doi.clone()));
        } else if let Some(arxiv) = &self.arxiv_id {
            lookups.push(PaperIdentifier::Arxiv {
                value: arxiv.clone(),
                version: None,
            });
        }
        if let Some(title) = self.record.as_ref().map(|r| r.title.trim()).filter(|t| !t.is_empty()) {
            lookups.push(PaperIdentifier::RawQuery {
                value: title.to_string(),
            });
        }
        lookups
    }

    /// A DOI registered with CrossRef; arXiv DOIs are DataCite-issued
    fn publisher_doi(&self) -> Option<&str> {
        self.doi
            .as_deref()
            .filter(|doi| resolver::arxiv_id_from_doi(doi).is_none())
    }
}

impl Aggregator {
    /// BibTeX for one identifier, walking the cascade until a tier succeeds
    pub async fn get_bibtex(&self, id: &PaperIdentifier) -> Result<BibtexEntry, AggregatorError> {
        let id = resolver::normalize(id);
        if id.value().is_empty() {
            return Err(AggregatorError::InvalidInput("empty identifier".to_string()));
        }

        let mut subject = Subject::new(id.clone());
        // No catalog serves BibTeX for these directly; learn the DOI first
        if matches!(
            id,
            PaperIdentifier::OpenAlex { .. } | PaperIdentifier::RawQuery { .. }
        ) {
            let record = self.get_details(&id).await?;
            subject.absorb(record);
        }

        let mut last_error = None;
        for tier in BIBTEX_CASCADE {
            match self.run_tier(tier, &mut subject).await {
                Ok(Some(entry)) => {
                    tracing::debug!("BibTeX for {} from {:?} tier", id, tier);
                    return Ok(entry);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("BibTeX tier {:?} failed for {}: {}", tier, id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SourceError::NotFound(format!("BibTeX for {}", id)).into()))
    }

    /// BibTeX for up to [`MAX_BATCH`] identifiers, each resolved independently
    ///
    /// Failures stay in their own slot; repeated citation keys among the
    /// successful entries get `a`, `b`, ... suffixes.
    pub async fn get_bibtex_batch(
        &self,
        inputs: &[String],
    ) -> Result<Vec<BibtexSlot>, AggregatorError> {
        if inputs.is_empty() {
            return Err(AggregatorError::InvalidInput("no identifiers given".to_string()));
        }
        if inputs.len() > MAX_BATCH {
            return Err(AggregatorError::InvalidInput(format!(
                "at most {} identifiers per batch, got {}",
                MAX_BATCH,
                inputs.len()
            )));
        }

        let lookups = inputs.iter().map(|input| async move {
            let result = if input.trim().is_empty() {
                Err(AggregatorError::InvalidInput("empty identifier".to_string()))
            } else {
                self.get_bibtex(&resolver::classify(input)).await
            };
            if let Err(ref e) = result {
                tracing::warn!("BibTeX failed for '{}': {}", input, e);
            }
            BibtexSlot {
                input: input.clone(),
                result,
            }
        });

        let mut slots = join_all(lookups).await;
        disambiguate_keys(slots.iter_mut().filter_map(|slot| slot.result.as_mut().ok()));
        Ok(slots)
    }

    /// Run one tier; `Ok(None)` means the tier does not apply
    async fn run_tier(
        &self,
        tier: BibtexTier,
        subject: &mut Subject,
    ) -> Result<Option<BibtexEntry>, AggregatorError> {
        let (kind, lookup) = match tier {
            BibtexTier::Dblp => return self.dblp_tier(subject).await,
            BibtexTier::CrossRef => match subject.publisher_doi() {
                Some(doi) => (SourceKind::CrossRef, PaperIdentifier::doi_of(doi)),
                None => return Ok(None),
            },
            BibtexTier::OwningSource => match (&subject.id, &subject.arxiv_id) {
                (PaperIdentifier::SemanticScholar { .. }, _) => {
                    (SourceKind::SemanticScholar, subject.id.clone())
                }
                (_, Some(arxiv)) => (
                    SourceKind::Arxiv,
                    PaperIdentifier::Arxiv {
                        value: arxiv.clone(),
                        version: None,
                    },
                ),
                _ => return Ok(None),
            },
            BibtexTier::Generated => {
                let record = match subject.record.take() {
                    Some(record) => record,
                    None => self.get_details(&subject.id).await?,
                };
                let entry = generate_entry(&record);
                subject.record = Some(record);
                return Ok(Some(entry));
            }
        };

        let Some(source) = self.registry.get(kind) else {
            return Ok(None);
        };
        if !source.supports(Operation::Bibtex) {
            return Ok(None);
        }

        Ok(Some(self.source_bibtex(source, &lookup).await?))
    }

    /// DBLP by key, DOI or arXiv id; failing that, by title
    ///
    /// Without a publisher DOI the record is fetched to learn the title, and
    /// any DOI it carries is tried as well.
    async fn dblp_tier(&self, subject: &mut Subject) -> Result<Option<BibtexEntry>, AggregatorError> {
        let Some(source) = self.registry.get(SourceKind::Dblp) else {
            return Ok(None);
        };
        if !source.supports(Operation::Bibtex) {
            return Ok(None);
        }

        let mut tried = Vec::new();
        let mut last_error = None;
        for pass in 0..2 {
            if pass == 1 {
                let learn_title = subject.record.is_none()
                    && subject.publisher_doi().is_none()
                    && !matches!(subject.id, PaperIdentifier::Dblp { .. });
                if !learn_title {
                    break;
                }
                match self.get_details(&subject.id).await {
                    Ok(record) => subject.absorb(record),
                    Err(e) => {
                        tracing::debug!("No record for DBLP title lookup of {}: {}", subject.id, e);
                        break;
                    }
                }
            }

            for lookup in subject.dblp_lookups() {
                if tried.contains(&lookup) {
                    continue;
                }
                match self.source_bibtex(source, &lookup).await {
                    Ok(entry) => return Ok(Some(entry)),
                    Err(e) => {
                        tracing::debug!("DBLP has no BibTeX for {}: {}", lookup, e);
                        last_error = Some(e);
                    }
                }
                tried.push(lookup);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn source_bibtex(
        &self,
        source: &Arc<dyn Source>,
        lookup: &PaperIdentifier,
    ) -> Result<BibtexEntry, AggregatorError> {
        Ok(self
            .call_source(source, Operation::Bibtex, &lookup.key(), "", || {
                source.get_bibtex(lookup)
            })
            .await?)
    }
}
