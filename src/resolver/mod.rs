//! Identifier classification and normalization.
//!
//! [`classify`] turns any user-supplied string into a [`PaperIdentifier`]. It never
//! fails: strings that match no known scheme become [`PaperIdentifier::RawQuery`].
//!
//! Detection order matters because the formats overlap in character set:
//!
//! 1. DOI (`10.1145/3292500.3330701`, `doi:...`, `https://doi.org/...`)
//! 2. arXiv (`2301.12345v2`, `arXiv:hep-th/9901001`, `https://arxiv.org/abs/...`)
//! 3. OpenAlex (`W2741809807`, `https://openalex.org/W2741809807`)
//! 4. Semantic Scholar (40 hex chars, `https://www.semanticscholar.org/paper/...`)
//! 5. DBLP (`conf/nips/VaswaniSPUJGKP17`, `DBLP:...`, `https://dblp.org/rec/...`)
//! 6. Free-text query
//!
//! ```rust
//! use research_aggregator::resolver::classify;
//! use research_aggregator::models::PaperIdentifier;
//!
//! let id = classify("  DOI:10.1145/ABC.123 ");
//! assert_eq!(id, PaperIdentifier::Doi { value: "10.1145/abc.123".to_string() });
//! ```

use regex::Regex;
use std::sync::OnceLock;

use crate::models::PaperIdentifier;

const ARXIV_DOI_PREFIX: &str = "10.48550/arxiv.";

fn doi_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^10\.\d{4,9}/\S+$").expect("static DOI pattern"))
}

fn arxiv_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d{4}\.\d{4,5}|[a-z][a-z\-]*(?:\.[a-z]{2})?/\d{7})(v\d+)?$")
            .expect("static arXiv pattern")
    })
}

fn openalex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^w\d{4,}$").expect("static OpenAlex pattern"))
}

fn s2_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{40}$").expect("static S2 pattern"))
}

fn dblp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]+(?:/[A-Za-z0-9_\-.:'+]+){2,}$").expect("static DBLP pattern")
    })
}

/// Classify an arbitrary string into a typed, normalized identifier
pub fn classify(input: &str) -> PaperIdentifier {
    let trimmed = input.trim();
    let candidate = strip_known_url(trimmed).unwrap_or_else(|| trimmed.to_string());

    if let Some(doi) = detect_doi(&candidate) {
        return PaperIdentifier::Doi { value: doi };
    }

    if let Some((value, version)) = detect_arxiv(&candidate) {
        return PaperIdentifier::Arxiv { value, version };
    }

    if openalex_pattern().is_match(&candidate) {
        return PaperIdentifier::OpenAlex {
            value: format!("W{}", &candidate[1..]),
        };
    }

    if s2_pattern().is_match(&candidate) {
        return PaperIdentifier::SemanticScholar {
            value: candidate.to_lowercase(),
        };
    }

    if let Some(key) = detect_dblp(&candidate) {
        return PaperIdentifier::Dblp { value: key };
    }

    PaperIdentifier::RawQuery {
        value: trimmed.to_string(),
    }
}

/// Re-normalize an identifier; `normalize(normalize(x)) == normalize(x)`
///
/// The variant never changes: a value that no longer matches its own scheme is
/// only trimmed.
pub fn normalize(id: &PaperIdentifier) -> PaperIdentifier {
    let reclassified = match id {
        PaperIdentifier::RawQuery { value } => {
            return PaperIdentifier::RawQuery {
                value: value.trim().to_string(),
            }
        }
        PaperIdentifier::Arxiv { value, version } => classify(&format!(
            "{}{}",
            value.trim(),
            version.as_deref().unwrap_or("").trim()
        )),
        other => classify(other.value()),
    };

    if std::mem::discriminant(&reclassified) == std::mem::discriminant(id) {
        return reclassified;
    }

    match id {
        PaperIdentifier::Doi { value } => PaperIdentifier::Doi {
            value: value.trim().to_lowercase(),
        },
        PaperIdentifier::Arxiv { value, version } => PaperIdentifier::Arxiv {
            value: value.trim().to_string(),
            version: version.as_ref().map(|v| v.trim().to_lowercase()),
        },
        PaperIdentifier::OpenAlex { value } => PaperIdentifier::OpenAlex {
            value: value.trim().to_string(),
        },
        PaperIdentifier::SemanticScholar { value } => PaperIdentifier::SemanticScholar {
            value: value.trim().to_lowercase(),
        },
        PaperIdentifier::Dblp { value } => PaperIdentifier::Dblp {
            value: value.trim().to_string(),
        },
        PaperIdentifier::RawQuery { value } => PaperIdentifier::RawQuery {
            value: value.trim().to_string(),
        },
    }
}

/// Canonical DOI: no resolver prefix, lower-cased, trimmed
pub fn normalize_doi(doi: &str) -> String {
    let mut doi = doi.trim();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi.org/",
    ] {
        if let Some(rest) = strip_prefix_ignore_case(doi, prefix) {
            doi = rest;
            break;
        }
    }
    if let Some(rest) = strip_prefix_ignore_case(doi, "doi:") {
        doi = rest;
    }
    doi.to_lowercase()
}

/// Split an arXiv id into its versionless form and the optional `vN` suffix
pub fn strip_arxiv_version(id: &str) -> (String, Option<String>) {
    let id = id.trim();
    let id = strip_prefix_ignore_case(id, "arxiv:").unwrap_or(id);
    if let Some(pos) = id.rfind(['v', 'V']) {
        let (base, version) = id.split_at(pos);
        if version.len() > 1 && version[1..].chars().all(|c| c.is_ascii_digit()) && !base.is_empty() {
            return (base.to_string(), Some(version.to_lowercase()));
        }
    }
    (id.to_string(), None)
}

/// arXiv id embedded in an arXiv-issued DOI (`10.48550/arXiv.1706.03762`)
pub fn arxiv_id_from_doi(doi: &str) -> Option<String> {
    let doi = normalize_doi(doi);
    doi.strip_prefix(ARXIV_DOI_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| strip_arxiv_version(rest).0)
}

/// arXiv-issued DOI for an arXiv id
pub fn arxiv_doi(arxiv_id: &str) -> String {
    format!("{}{}", ARXIV_DOI_PREFIX, strip_arxiv_version(arxiv_id).0.to_lowercase())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        value.get(prefix.len()..).map(str::trim_start)
    } else {
        None
    }
}

fn detect_doi(candidate: &str) -> Option<String> {
    let doi = normalize_doi(candidate);
    if doi_pattern().is_match(&doi) {
        Some(doi)
    } else {
        None
    }
}

fn detect_arxiv(candidate: &str) -> Option<(String, Option<String>)> {
    let bare = strip_prefix_ignore_case(candidate, "arxiv:").unwrap_or(candidate);
    let bare = bare.strip_suffix(".pdf").unwrap_or(bare);
    let captures = arxiv_pattern().captures(bare)?;
    let base = captures.get(1)?.as_str();
    let version = captures.get(2).map(|v| v.as_str().to_lowercase());

    // Legacy ids: lower-case archive, upper-case subject class (math.GT/0309136)
    let value = match base.split_once('/') {
        Some((archive, number)) => match archive.split_once('.') {
            Some((name, class)) => format!(
                "{}.{}/{}",
                name.to_lowercase(),
                class.to_uppercase(),
                number
            ),
            None => format!("{}/{}", archive.to_lowercase(), number),
        },
        None => base.to_string(),
    };
    Some((value, version))
}

fn detect_dblp(candidate: &str) -> Option<String> {
    let key = strip_prefix_ignore_case(candidate, "dblp:").unwrap_or(candidate);
    let key = [".html", ".bib", ".xml"]
        .iter()
        .find_map(|ext| key.strip_suffix(ext))
        .unwrap_or(key);
    if dblp_pattern().is_match(key) {
        Some(key.to_string())
    } else {
        None
    }
}

/// Reduce a URL on a known catalog host to the identifier it embeds
fn strip_known_url(input: &str) -> Option<String> {
    let parsed = url::Url::parse(input).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = parsed.path().trim_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match host {
        "doi.org" | "dx.doi.org" => Some(urlencoding::decode(path).ok()?.into_owned()),
        "arxiv.org" | "export.arxiv.org" => match segments.split_first() {
            Some((kind, rest)) if matches!(*kind, "abs" | "pdf") && !rest.is_empty() => {
                Some(rest.join("/"))
            }
            _ => None,
        },
        "openalex.org" | "api.openalex.org" => segments.last().map(|s| s.to_string()),
        "semanticscholar.org" | "api.semanticscholar.org" => segments.last().map(|s| s.to_string()),
        "dblp.org" | "dblp.uni-trier.de" => match segments.split_first() {
            Some((&"rec", rest)) if !rest.is_empty() => Some(rest.join("/")),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doi(value: &str) -> PaperIdentifier {
        PaperIdentifier::Doi {
            value: value.to_string(),
        }
    }

    #[test]
    fn test_classify_doi_variants() {
        let expected = doi("10.1145/3292500.3330701");
        for input in [
            "10.1145/3292500.3330701",
            "  10.1145/3292500.3330701\n",
            "DOI:10.1145/3292500.3330701",
            "doi: 10.1145/3292500.3330701",
            "https://doi.org/10.1145/3292500.3330701",
            "HTTP://DX.DOI.ORG/10.1145/3292500.3330701",
            "10.1145/3292500.3330701".to_uppercase().as_str(),
        ] {
            assert_eq!(classify(input), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn test_arxiv_doi_is_classified_as_doi() {
        assert_eq!(
            classify("10.48550/arXiv.1706.03762"),
            doi("10.48550/arxiv.1706.03762")
        );
        assert_eq!(
            arxiv_id_from_doi("10.48550/arXiv.1706.03762"),
            Some("1706.03762".to_string())
        );
        assert_eq!(arxiv_id_from_doi("10.1145/123.456"), None);
        assert_eq!(arxiv_doi("1706.03762v5"), "10.48550/arxiv.1706.03762");
    }

    #[test]
    fn test_classify_arxiv() {
        assert_eq!(
            classify("arXiv:1706.03762v5"),
            PaperIdentifier::Arxiv {
                value: "1706.03762".to_string(),
                version: Some("v5".to_string())
            }
        );
        assert_eq!(
            classify("https://arxiv.org/abs/2301.12345"),
            PaperIdentifier::Arxiv {
                value: "2301.12345".to_string(),
                version: None
            }
        );
        assert_eq!(
            classify("https://arxiv.org/pdf/2301.12345v2.pdf"),
            PaperIdentifier::Arxiv {
                value: "2301.12345".to_string(),
                version: Some("v2".to_string())
            }
        );
        assert_eq!(
            classify("hep-th/9901001"),
            PaperIdentifier::Arxiv {
                value: "hep-th/9901001".to_string(),
                version: None
            }
        );
        assert_eq!(
            classify("MATH.gt/0309136V1"),
            PaperIdentifier::Arxiv {
                value: "math.GT/0309136".to_string(),
                version: Some("v1".to_string())
            }
        );
    }

    #[test]
    fn test_classify_openalex_and_s2() {
        assert_eq!(
            classify("https://openalex.org/W2741809807"),
            PaperIdentifier::OpenAlex {
                value: "W2741809807".to_string()
            }
        );
        assert_eq!(
            classify("w2741809807"),
            PaperIdentifier::OpenAlex {
                value: "W2741809807".to_string()
            }
        );

        let hash = "204E3073870FAE3D05BCBC2F6A8E263D9B72E776";
        assert_eq!(
            classify(hash),
            PaperIdentifier::SemanticScholar {
                value: hash.to_lowercase()
            }
        );
        assert_eq!(
            classify(&format!(
                "https://www.semanticscholar.org/paper/Attention-is-All-you-Need/{}",
                hash
            )),
            PaperIdentifier::SemanticScholar {
                value: hash.to_lowercase()
            }
        );
    }

    #[test]
    fn test_classify_dblp() {
        let expected = PaperIdentifier::Dblp {
            value: "conf/nips/VaswaniSPUJGKP17".to_string(),
        };
        assert_eq!(classify("conf/nips/VaswaniSPUJGKP17"), expected);
        assert_eq!(classify("DBLP:conf/nips/VaswaniSPUJGKP17"), expected);
        assert_eq!(
            classify("https://dblp.org/rec/conf/nips/VaswaniSPUJGKP17.html"),
            expected
        );
        assert_eq!(
            classify("journals/corr/abs-1706-03762"),
            PaperIdentifier::Dblp {
                value: "journals/corr/abs-1706-03762".to_string()
            }
        );
    }

    #[test]
    fn test_unrecognized_input_is_raw_query() {
        for input in [
            "attention is all you need",
            "W12",
            "a/b",
            "",
            "https://example.com/paper/1",
            "Erdős",
            "arxi€ papers",
            "dbl€ key",
            "do€ something",
            "https://doi.o€rg",
        ] {
            assert!(classify(input).is_raw_query(), "input: {:?}", input);
        }
        assert_eq!(
            classify("  graph neural networks  "),
            PaperIdentifier::RawQuery {
                value: "graph neural networks".to_string()
            }
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "10.1145/ABC.DEF",
            "arXiv:1706.03762v5",
            "cs/0112017",
            "W2741809807",
            "204e3073870fae3d05bcbc2f6a8e263d9b72e776",
            "conf/nips/VaswaniSPUJGKP17",
            "free text query",
        ];
        for input in inputs {
            let once = normalize(&classify(input));
            assert_eq!(normalize(&once), once, "input: {:?}", input);
            assert_eq!(once, classify(input));
        }

        let hand_built = PaperIdentifier::Doi {
            value: "  10.1000/XYZ ".to_string(),
        };
        let once = normalize(&hand_built);
        assert_eq!(once, doi("10.1000/xyz"));
        assert_eq!(normalize(&once), once);

        let mismatched = PaperIdentifier::Dblp {
            value: " not-a-key ".to_string(),
        };
        let once = normalize(&mismatched);
        assert_eq!(
            once,
            PaperIdentifier::Dblp {
                value: "not-a-key".to_string()
            }
        );
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_strip_arxiv_version() {
        assert_eq!(
            strip_arxiv_version("2301.12345v3"),
            ("2301.12345".to_string(), Some("v3".to_string()))
        );
        assert_eq!(strip_arxiv_version("2301.12345"), ("2301.12345".to_string(), None));
        assert_eq!(
            strip_arxiv_version("hep-th/9901001"),
            ("hep-th/9901001".to_string(), None)
        );
    }
}
