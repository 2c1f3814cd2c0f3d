//! End-to-end tests for the search pipeline over a deterministic embedder.
//!
//! The model-backed test downloads weights and is marked #[ignore].
//! Run with: cargo test -- --ignored

use std::sync::Arc;

use super::fixtures::{self, MAMMALS_CORPUS};
use crate::config::SearchConfig;
use crate::semantic::{
    model_id_hash, project_field, vector_search, Corpus, Embedder, EmbeddingModel, FlatIndex,
    Metric, SearchError, SemanticResources, SemanticSearchError, SemanticSearchService,
    SimilarityIndex, VectorStorage, DEFAULT_MODEL,
};

const PHILOSOPHY_CORPUS: [(&str, &str); 5] = [
    ("Kritik.pdf", "reason knows its own limits"),
    ("Kritik.pdf", "space and time are forms of intuition"),
    ("Ethik.pdf", "act only on maxims you could will as law"),
    ("Ethik.pdf", "the good will shines like a jewel"),
    ("Aufklaerung.pdf", "have courage to use your own reason"),
];

fn positions(passages: &[crate::semantic::Passage]) -> Vec<usize> {
    passages.iter().map(|p| p.position).collect()
}

#[test]
fn test_mammals_ranking() {
    let service = fixtures::service(&MAMMALS_CORPUS);

    let results = service.search(&["felines are mammals"], 3).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(positions(&results[0]), vec![0, 2, 1]);
    assert_eq!(results[0][0].text, "cats are mammals");
    assert_eq!(results[0][1].title, "Biologie.pdf");
}

#[test]
fn test_batch_shape_and_ordering() {
    let service = fixtures::service(&PHILOSOPHY_CORPUS);
    let queries = ["own reason", "the will", "time and space", "nothing matches here"];

    let results = service.search(&queries, 4).unwrap();

    assert_eq!(results.len(), queries.len());
    for passages in &results {
        assert_eq!(passages.len(), 4);
        for pair in passages.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }
    assert_eq!(results[2][0].position, 1);
}

#[test]
fn test_indexed_text_finds_itself() {
    let service = fixtures::service(&PHILOSOPHY_CORPUS);
    let queries: Vec<&str> = PHILOSOPHY_CORPUS.iter().map(|(_, text)| *text).collect();

    let results = service.search(&queries, 1).unwrap();

    for (position, passages) in results.iter().enumerate() {
        assert_eq!(passages[0].position, position);
        assert!(passages[0].distance.abs() < 1e-6);
    }
}

#[test]
fn test_k_equal_to_index_size_returns_every_position_once() {
    let service = fixtures::service(&PHILOSOPHY_CORPUS);

    let results = service.search(&["reason"], PHILOSOPHY_CORPUS.len()).unwrap();

    let mut found = positions(&results[0]);
    found.sort();
    assert_eq!(found, (0..PHILOSOPHY_CORPUS.len()).collect::<Vec<_>>());
}

#[test]
fn test_search_is_idempotent() {
    let service = fixtures::service(&PHILOSOPHY_CORPUS);

    let first = service.search(&["courage and reason"], 3).unwrap();
    let second = service.search(&["courage and reason"], 3).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_one_embedding_call_per_batch() {
    let embedder = fixtures::embedder(&PHILOSOPHY_CORPUS);
    let index = fixtures::index(&embedder, &PHILOSOPHY_CORPUS);
    let queries = vec!["reason".to_string(), "will".to_string(), "law".to_string()];

    let results = vector_search(&queries, &embedder, &index, 2).unwrap();

    assert_eq!(embedder.calls(), 1);
    assert_eq!(results.len(), 3);
}

#[test]
fn test_projection_follows_rank_order() {
    let embedder = fixtures::embedder(&PHILOSOPHY_CORPUS);
    let index = fixtures::index(&embedder, &PHILOSOPHY_CORPUS);
    let corpus = fixtures::corpus(&PHILOSOPHY_CORPUS);
    let queries = vec!["the good will".to_string(), "own reason".to_string()];

    let results = vector_search(&queries, &embedder, &index, 3).unwrap();
    let texts = project_field(&results, &corpus, "Text").unwrap();

    assert_eq!(texts.len(), results.len());
    for (neighbors, texts) in results.iter().zip(&texts) {
        assert_eq!(neighbors.len(), texts.len());
        for (neighbor, text) in neighbors.iter().zip(texts) {
            let position = neighbor.position.unwrap();
            assert_eq!(*text, Some(PHILOSOPHY_CORPUS[position].1));
        }
    }
    assert_eq!(texts[0][0], Some("the good will shines like a jewel"));

    assert!(matches!(
        project_field(&results, &corpus, "Seite"),
        Err(SearchError::UnknownField(_))
    ));
}

#[test]
fn test_invalid_requests() {
    let service = fixtures::service(&MAMMALS_CORPUS);
    let empty: [&str; 0] = [];

    assert!(matches!(
        service.search(&empty, 1),
        Err(SemanticSearchError::Search(SearchError::EmptyQuery))
    ));
    assert!(matches!(
        service.search(&["cats"], 0),
        Err(SemanticSearchError::Search(SearchError::InvalidK { k: 0, len: 3 }))
    ));
    assert!(matches!(
        service.search(&["cats"], 4),
        Err(SemanticSearchError::Search(SearchError::InvalidK { k: 4, len: 3 }))
    ));
}

#[test]
fn test_search_from_persisted_index() {
    let dir = tempfile::tempdir().unwrap();
    let corpus_path = dir.path().join("sentences.csv");
    let index_path = dir.path().join("vectors.bin");

    std::fs::write(
        &corpus_path,
        "Title,Text\n\
         Tiere.pdf,cats are mammals\n\
         Tiere.pdf,dogs bark loudly\n\
         Biologie.pdf,mammals have fur\n",
    )
    .unwrap();

    let embedder = Arc::new(fixtures::embedder(&MAMMALS_CORPUS));
    let model_id = model_id_hash(embedder.name());
    let storage = VectorStorage::new(index_path);
    storage
        .save(&fixtures::index(&embedder, &MAMMALS_CORPUS), &model_id)
        .unwrap();

    let index = storage.load(&model_id, embedder.dimensions()).unwrap();
    let corpus = Corpus::load(&corpus_path).unwrap();
    let resources =
        SemanticResources::new(embedder, Arc::new(index), Arc::new(corpus), "Title", "Text")
            .unwrap();
    let service = SemanticSearchService::with_resources(SearchConfig::default(), resources);

    let results = service.search(&["felines are mammals"], 3).unwrap();
    assert_eq!(positions(&results[0]), vec![0, 2, 1]);
    assert_eq!(results[0][2].text, "dogs bark loudly");
}

/// German passages found with an English query.
#[test]
#[ignore = "requires model download (~1GB)"]
fn test_cross_lingual_search() {
    let dir = tempfile::tempdir().unwrap();
    let model = EmbeddingModel::new(DEFAULT_MODEL, dir.path().to_path_buf(), None).unwrap();

    let passages = [
        ("Tiere.pdf", "Katzen sind Säugetiere."),
        ("Wetter.pdf", "Morgen regnet es den ganzen Tag."),
        ("Technik.pdf", "Der Motor des Autos ist kaputt."),
    ];
    let texts: Vec<String> = passages.iter().map(|(_, t)| t.to_string()).collect();
    let index = FlatIndex::from_vectors(
        model.dimensions(),
        Metric::L2,
        model.embed(&texts).unwrap(),
    )
    .unwrap();
    assert_eq!(index.len(), 3);

    let resources = SemanticResources::new(
        Arc::new(model),
        Arc::new(index),
        Arc::new(fixtures::corpus(&passages)),
        "Title",
        "Text",
    )
    .unwrap();
    let service = SemanticSearchService::with_resources(SearchConfig::default(), resources);

    let results = service
        .search(&["cats are mammals", "it will rain tomorrow"], 1)
        .unwrap();
    assert_eq!(results[0][0].position, 0);
    assert_eq!(results[1][0].position, 1);
}
