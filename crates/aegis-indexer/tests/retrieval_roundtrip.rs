//! End-to-end checks over the pure retrieval core: hierarchical
//! chunking feeding the BM25 index, with the deterministic ids the
//! dual-index writer relies on.

use aegis_indexer::bm25::Bm25Index;
use aegis_indexer::chunker::chunk_hierarchical;
use aegis_indexer::writer::DualIndexWriter;
use tempfile::tempdir;
use uuid::Uuid;

fn document_text() -> String {
    let mut text = String::new();
    text.push_str("Wartungshandbuch für die Serverlandschaft\n\n");
    for section in 1..=8 {
        text.push_str(&format!(
            "\n§ {section} Abschnitt über Betrieb und Wartung\n\n"
        ));
        for sentence in 0..40 {
            text.push_str(&format!(
                "Satz {sentence} beschreibt die Wartung der Komponente {section} \
                 im laufenden Betrieb mit allen notwendigen Schritten. "
            ));
        }
    }
    text
}

#[test]
fn chunking_then_keyword_indexing_round_trip() {
    let text = document_text();
    let parents = chunk_hierarchical(&text, 300, 60, 10);
    assert!(parents.len() > 1, "expected multiple parents");

    // Spec invariants: children within parent spans, dense ordered
    // global indices.
    let mut expected_global = 0usize;
    for parent in &parents {
        for child in &parent.children {
            assert_eq!(child.global_index, expected_global);
            assert!(child.char_start >= parent.char_start);
            assert!(child.char_end <= parent.char_end);
            expected_global += 1;
        }
    }

    // Deterministic child ids for one document.
    let document_id = Uuid::new_v4();
    let ids: Vec<Uuid> = (0..expected_global)
        .map(|i| DualIndexWriter::child_id(document_id, i))
        .collect();
    let again: Vec<Uuid> = (0..expected_global)
        .map(|i| DualIndexWriter::child_id(document_id, i))
        .collect();
    assert_eq!(ids, again);

    // Rebuild the keyword index over the children and search it.
    let dir = tempdir().unwrap();
    let index = Bm25Index::load(dir.path());
    let chunks: Vec<(Uuid, String)> = parents
        .iter()
        .flat_map(|p| p.children.iter())
        .map(|c| (DualIndexWriter::child_id(document_id, c.global_index), c.text.clone()))
        .collect();
    index.rebuild(&chunks).unwrap();

    let results = index.search("Wartung Komponente", 5);
    assert!(!results.is_empty());
    assert!(chunks.iter().any(|(id, _)| *id == results[0].0));
}

#[test]
fn reindexing_the_same_text_yields_identical_chunks_and_ids() {
    let text = document_text();
    let document_id = Uuid::new_v4();

    let first = chunk_hierarchical(&text, 300, 60, 10);
    let second = chunk_hierarchical(&text, 300, 60, 10);
    assert_eq!(first.len(), second.len());

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.text, b.text);
        assert_eq!(a.children.len(), b.children.len());
        for (ca, cb) in a.children.iter().zip(b.children.iter()) {
            assert_eq!(
                DualIndexWriter::child_id(document_id, ca.global_index),
                DualIndexWriter::child_id(document_id, cb.global_index)
            );
            assert_eq!(ca.char_start, cb.char_start);
            assert_eq!(ca.char_end, cb.char_end);
        }
    }
}

#[test]
fn incremental_append_becomes_searchable_after_rebuild() {
    let dir = tempdir().unwrap();
    let index = Bm25Index::load(dir.path());

    let first = vec![(Uuid::new_v4(), "Protokoll der Netzwerkwartung".to_string())];
    index.rebuild(&first).unwrap();

    let late_id = Uuid::new_v4();
    index.append_ids(&[late_id]).unwrap();
    assert!(index.search("Sicherheitsunterweisung", 5).is_empty());

    // The rebuild brings the appended chunk into the snapshot.
    let mut all = first.clone();
    all.push((late_id, "Jährliche Sicherheitsunterweisung der Mitarbeiter".to_string()));
    index.rebuild(&all).unwrap();

    let results = index.search("Sicherheitsunterweisung", 5);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, late_id);
}
