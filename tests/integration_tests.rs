//! Integration tests for Research Aggregator
//!
//! These tests drive the public API end to end with in-memory catalogs.

use research_aggregator::aggregator::{Aggregator, AggregatorError, NetworkOptions};
use research_aggregator::config::Config;
use research_aggregator::mcp::ToolRegistry;
use research_aggregator::models::{
    BibtexEntry, BibtexProvenance, NetworkDirection, PaperBuilder, PaperIdentifier, PaperRecord,
    SearchQuery, SourceKind,
};
use research_aggregator::resolver;
use research_aggregator::sources::mock::make_paper;
use research_aggregator::sources::{
    MockSource, Operation, SourceCapabilities, SourceError, SourceRegistry,
};
use research_aggregator::utils::{CacheKey, ResponseCache};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn aggregator_with(sources: Vec<Arc<MockSource>>) -> Aggregator {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source);
    }
    Aggregator::new(registry, ResponseCache::new(1000), Config::default())
}

fn paper_with_doi(kind: SourceKind, native_id: &str, title: &str, doi: &str) -> PaperRecord {
    PaperBuilder::new(title, kind, native_id)
        .doi(Some(doi))
        .year(Some(2019))
        .build()
}

#[test]
fn test_doi_spellings_resolve_to_one_identifier() {
    let expected = PaperIdentifier::Doi {
        value: "10.1145/3292500.3330701".to_string(),
    };
    for input in [
        "10.1145/3292500.3330701",
        "https://doi.org/10.1145/3292500.3330701",
        "http://dx.doi.org/10.1145/3292500.3330701",
        "doi:10.1145/3292500.3330701",
        "  10.1145/3292500.3330701  ",
    ] {
        assert_eq!(resolver::classify(input), expected, "input: {}", input);
    }
    assert_eq!(
        resolver::classify("10.1145/ABC.DEF"),
        resolver::classify("10.1145/abc.def")
    );
}

#[test]
fn test_normalization_is_idempotent() {
    for input in [
        "https://arxiv.org/abs/1706.03762v5",
        "10.48550/arXiv.1706.03762",
        "https://openalex.org/W2741809807",
        "conf/nips/VaswaniSPUJGKP17",
        "649def34f8be52c8b66281af98ae884c09aef38b",
        "Attention is all you need",
    ] {
        let once = resolver::normalize(&resolver::classify(input));
        let twice = resolver::normalize(&once);
        assert_eq!(once, twice, "input: {}", input);
    }
}

#[tokio::test]
async fn test_duplicate_records_are_merged_across_catalogs() {
    let doi = "10.1000/merged";
    let openalex = Arc::new(MockSource::new(SourceKind::OpenAlex).with_search_results(vec![
        paper_with_doi(SourceKind::OpenAlex, "W1234567", "A Shared Paper", doi),
    ]));
    let dblp = Arc::new(MockSource::new(SourceKind::Dblp).with_search_results(vec![
        paper_with_doi(SourceKind::Dblp, "conf/x/Shared19", "A shared paper.", doi),
        make_paper(SourceKind::Dblp, "conf/x/Other19", "Something Else Entirely", 2019),
    ]));
    let agg = aggregator_with(vec![openalex, dblp]);

    let results = agg.search(&SearchQuery::new("shared")).await.unwrap();

    assert_eq!(results.papers.len(), 2);
    let merged = results
        .papers
        .iter()
        .find(|p| p.doi.as_deref() == Some(doi))
        .unwrap();
    assert_eq!(merged.source_id(SourceKind::OpenAlex), Some("W1234567"));
    assert_eq!(merged.source_id(SourceKind::Dblp), Some("conf/x/Shared19"));
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let cache = Arc::new(ResponseCache::new(100));
    let fetches = Arc::new(AtomicUsize::new(0));

    let lookups = (0..8).map(|_| {
        let cache = cache.clone();
        let fetches = fetches.clone();
        tokio::spawn(async move {
            let key = CacheKey::new(SourceKind::OpenAlex, Operation::Details, "W1234567", "");
            cache
                .get_or_fetch(key, Duration::from_secs(60), || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, SourceError>("payload".to_string())
                })
                .await
        })
    });

    for handle in futures_util::future::join_all(lookups).await {
        assert_eq!(handle.unwrap().unwrap(), "payload");
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    let op = stats.get(SourceKind::OpenAlex, Operation::Details).unwrap();
    assert_eq!(op.misses, 1);
    assert_eq!(op.hits, 7);
}

#[tokio::test]
async fn test_expired_entries_are_refetched() {
    let cache = ResponseCache::new(100);
    let counter = AtomicUsize::new(0);
    let fetches = &counter;
    let key = || CacheKey::new(SourceKind::Dblp, Operation::Search, "transformers", "limit=10");
    let fetch = move || async move {
        fetches.fetch_add(1, Ordering::SeqCst);
        Ok::<_, SourceError>(vec![1u32, 2, 3])
    };

    cache
        .get_or_fetch(key(), Duration::from_millis(30), fetch)
        .await
        .unwrap();
    cache
        .get_or_fetch(key(), Duration::from_millis(30), fetch)
        .await
        .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    cache
        .get_or_fetch(key(), Duration::from_millis(30), fetch)
        .await
        .unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_search_survives_failing_sources() {
    let ok = |kind: SourceKind, id: &str, title: &str| {
        Arc::new(MockSource::new(kind).with_search_results(vec![make_paper(kind, id, title, 2021)]))
    };
    let agg = aggregator_with(vec![
        ok(SourceKind::OpenAlex, "W1000001", "Graph Attention Networks"),
        ok(SourceKind::Dblp, "conf/iclr/Velickovic18", "Inductive Representation Learning"),
        ok(SourceKind::CrossRef, "10.1000/gcn", "Semi-Supervised Classification with GCNs"),
        Arc::new(MockSource::new(SourceKind::SemanticScholar).failing(
            Operation::Search,
            SourceError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            },
        )),
        Arc::new(MockSource::new(SourceKind::Arxiv).failing(
            Operation::Search,
            SourceError::Transient("connection reset".to_string()),
        )),
    ]);

    let results = agg.search(&SearchQuery::new("graph networks")).await.unwrap();

    assert!(results.is_partial());
    assert_eq!(results.papers.len(), 3);
    assert_eq!(
        results.succeeded,
        vec![SourceKind::OpenAlex, SourceKind::Dblp, SourceKind::CrossRef]
    );
    let failed: Vec<_> = results.failures.iter().map(|f| f.source).collect();
    assert!(failed.contains(&SourceKind::SemanticScholar));
    assert!(failed.contains(&SourceKind::Arxiv));
}

const ALL_SOURCES: [SourceKind; 5] = [
    SourceKind::OpenAlex,
    SourceKind::Dblp,
    SourceKind::CrossRef,
    SourceKind::SemanticScholar,
    SourceKind::Arxiv,
];

fn failing_search(kind: SourceKind) -> Arc<MockSource> {
    Arc::new(MockSource::new(kind).failing(
        Operation::Search,
        SourceError::Transient(format!("{} unreachable", kind.name())),
    ))
}

#[tokio::test]
async fn test_search_fails_only_when_every_source_fails() {
    let agg = aggregator_with(ALL_SOURCES.iter().map(|&kind| failing_search(kind)).collect());

    let err = agg.search(&SearchQuery::new("graph networks")).await.unwrap_err();

    assert_eq!(err.kind(), "all_sources_failed");
    match err {
        AggregatorError::AllSourcesFailed { operation, failures } => {
            assert_eq!(operation, Operation::Search);
            assert_eq!(failures.len(), 5);
            for kind in ALL_SOURCES {
                assert!(failures.iter().any(|f| f.source == kind), "missing {:?}", kind);
            }
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_one_empty_answer_is_not_a_failure() {
    let mut sources: Vec<_> = ALL_SOURCES[..4].iter().map(|&kind| failing_search(kind)).collect();
    sources.push(Arc::new(MockSource::new(SourceKind::Arxiv)));
    let agg = aggregator_with(sources);

    let results = agg.search(&SearchQuery::new("graph networks")).await.unwrap();

    assert!(results.papers.is_empty());
    assert_eq!(results.succeeded, vec![SourceKind::Arxiv]);
    assert_eq!(results.failures.len(), 4);
}

#[tokio::test]
async fn test_bibtex_prefers_dblp() {
    let doi = "10.18653/v1/n19-1423";
    let dblp_entry = BibtexEntry::new(
        "inproceedings",
        "DBLP:conf/naacl/DevlinCLT19",
        BibtexProvenance::Dblp,
    )
    .with_field("title", Some("BERT"));
    let crossref_entry =
        BibtexEntry::new("inproceedings", "Devlin_2019", BibtexProvenance::CrossRef);

    let dblp = Arc::new(
        MockSource::new(SourceKind::Dblp)
            .with_capabilities(SourceCapabilities::BIBTEX)
            .with_bibtex(doi, dblp_entry),
    );
    let crossref = Arc::new(
        MockSource::new(SourceKind::CrossRef)
            .with_capabilities(SourceCapabilities::BIBTEX)
            .with_bibtex(doi, crossref_entry),
    );
    let agg = aggregator_with(vec![dblp, crossref.clone()]);

    let entry = agg.get_bibtex(&resolver::classify(doi)).await.unwrap();

    assert_eq!(entry.provenance, BibtexProvenance::Dblp);
    assert_eq!(entry.key, "DBLP:conf/naacl/DevlinCLT19");
    assert_eq!(crossref.calls(Operation::Bibtex), 0);
}

#[tokio::test]
async fn test_bibtex_batch_isolates_failures() {
    let mut dblp = MockSource::new(SourceKind::Dblp).with_capabilities(SourceCapabilities::BIBTEX);
    for (doi, key) in [
        ("10.1000/one", "DBLP:journals/x/One20"),
        ("10.1000/two", "DBLP:journals/x/Two20"),
        ("10.1000/three", "DBLP:journals/x/Three20"),
    ] {
        dblp = dblp.with_bibtex(
            doi,
            BibtexEntry::new("article", key, BibtexProvenance::Dblp),
        );
    }
    let agg = aggregator_with(vec![Arc::new(dblp)]);

    let inputs: Vec<String> = ["10.1000/one", "10.1000/missing", "10.1000/two", "10.1000/three"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let slots = agg.get_bibtex_batch(&inputs).await.unwrap();

    assert_eq!(slots.len(), 4);
    let inputs_back: Vec<_> = slots.iter().map(|s| s.input.as_str()).collect();
    assert_eq!(
        inputs_back,
        vec!["10.1000/one", "10.1000/missing", "10.1000/two", "10.1000/three"]
    );
    assert!(slots[0].result.is_ok());
    assert!(slots[1].result.is_err());
    assert!(slots[2].result.is_ok());
    assert!(slots[3].result.is_ok());
}

#[tokio::test]
async fn test_citation_network_handles_cycles() {
    let work = |id: &str| make_paper(SourceKind::OpenAlex, id, &format!("Paper {}", id), 2020);
    let openalex = Arc::new(
        MockSource::new(SourceKind::OpenAlex)
            .with_capabilities(
                SourceCapabilities::DETAILS
                    | SourceCapabilities::CITATIONS
                    | SourceCapabilities::REFERENCES,
            )
            .with_paper("W1000", work("W1000"))
            .with_citations("W1000", vec![work("W2000")])
            .with_citations("W2000", vec![work("W1000"), work("W3000")])
            .with_citations("W3000", vec![work("W1000"), work("W3000")]),
    );
    let agg = aggregator_with(vec![openalex.clone()]);

    let options = NetworkOptions {
        depth: 2,
        max_nodes: 50,
        direction: NetworkDirection::Citing,
    };
    let graph = agg
        .build_citation_network(&resolver::classify("W1000"), options)
        .await
        .unwrap();

    assert_eq!(graph.seed, "W1000");
    assert_eq!(graph.node_count(), 3);
    assert!(graph.edges.iter().all(|e| e.source != e.target));
    assert!(graph
        .edges
        .iter()
        .all(|e| graph.contains(&e.source) && graph.contains(&e.target)));
    // W1000 cites W2000 closes the cycle W1000 -> W2000 -> W1000
    assert!(graph
        .edges
        .iter()
        .any(|e| e.source == "W1000" && e.target == "W2000"));
    assert!(openalex.calls(Operation::Citations) <= graph.node_count());
}

#[tokio::test]
async fn test_tools_drive_the_aggregator() {
    let doi = "10.1038/nature14539";
    let openalex = Arc::new(
        MockSource::new(SourceKind::OpenAlex)
            .with_paper(doi, paper_with_doi(SourceKind::OpenAlex, "W1001001", "Deep learning", doi)),
    );
    let tools = ToolRegistry::from_aggregator(Arc::new(aggregator_with(vec![openalex])));

    let details = tools
        .execute("get_paper_details", json!({"paper_id": format!("https://doi.org/{}", doi)}))
        .await
        .unwrap();
    assert_eq!(details["identifier"]["type"], "doi");
    assert_eq!(details["paper"]["title"], "Deep learning");

    let stats = tools.execute("cache_stats", json!({})).await.unwrap();
    assert_eq!(stats["misses"], 1);
}
