#![allow(missing_docs)]

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sifter::{DocId, Engine, EngineOptions, MatchType, QueryId, Registration, Result, SifterError};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn ids(raw: &[u32]) -> Vec<QueryId> {
    raw.iter().copied().map(QueryId).collect()
}

fn drain(engine: &Engine) -> Result<BTreeMap<DocId, Vec<QueryId>>> {
    let mut results = BTreeMap::new();
    while let Some(result) = engine.next_result() {
        let result = result?;
        results.insert(result.doc_id, result.queries);
    }
    Ok(results)
}

#[test]
fn cat_and_dog_scenario() -> Result<()> {
    init_tracing();
    let engine = Engine::new(EngineOptions::default().workers(2))?;
    engine.start_query(QueryId(1), "cat", MatchType::Exact, 0)?;
    engine.start_query(QueryId(2), "cat dog", MatchType::Edit, 1)?;

    engine.match_document(DocId(1), "the cat chased a dog")?;
    engine.match_document(DocId(2), "bat")?;
    let results = drain(&engine)?;
    assert_eq!(results[&DocId(1)], ids(&[1, 2]));
    assert_eq!(results[&DocId(2)], ids(&[]));

    engine.start_query(QueryId(3), "cat", MatchType::Hamming, 1)?;
    assert_eq!(engine.match_now(DocId(3), "bat")?.queries, ids(&[3]));
    assert_eq!(engine.match_now(DocId(4), "bat dot")?.queries, ids(&[2, 3]));
    Ok(())
}

#[test]
fn alias_keeps_matching_after_canonical_removal() -> Result<()> {
    init_tracing();
    let engine = Engine::new(EngineOptions::default().workers(1))?;
    assert_eq!(
        engine.start_query(QueryId(5), "river stone", MatchType::Edit, 2)?,
        Registration::Canonical
    );
    assert_eq!(
        engine.start_query(QueryId(9), "stone river", MatchType::Edit, 2)?,
        Registration::Alias(QueryId(5))
    );
    assert_eq!(
        engine.start_query(QueryId(7), "stone river", MatchType::Edit, 2)?,
        Registration::Alias(QueryId(5))
    );

    engine.match_document(DocId(1), "rivers stoned")?;
    assert_eq!(drain(&engine)?[&DocId(1)], ids(&[5, 7, 9]));

    assert!(engine.end_query(QueryId(5))?);
    engine.match_document(DocId(2), "rivers stoned")?;
    assert_eq!(drain(&engine)?[&DocId(2)], ids(&[7, 9]));

    assert!(engine.end_query(QueryId(9))?);
    assert!(engine.end_query(QueryId(7))?);
    engine.match_document(DocId(3), "rivers stoned")?;
    assert_eq!(drain(&engine)?[&DocId(3)], ids(&[]));

    let catalogue = engine.catalogue();
    assert_eq!(catalogue.queries, 0);
    assert_eq!(catalogue.records, 0);
    assert_eq!(catalogue.operators, 0);
    Ok(())
}

#[test]
fn register_then_unregister_restores_counts() -> Result<()> {
    init_tracing();
    let engine = Engine::new(EngineOptions::default().workers(1))?;
    engine.start_query(QueryId(1), "one two", MatchType::Exact, 0)?;
    engine.match_now(DocId(0), "one")?;
    let before = engine.catalogue();

    engine.start_query(QueryId(2), "two three four", MatchType::Hamming, 2)?;
    assert!(engine.end_query(QueryId(2))?);
    engine.match_now(DocId(1), "one")?;
    assert_eq!(engine.catalogue(), before);
    Ok(())
}

#[test]
fn duplicate_ids_and_bad_queries_are_rejected() -> Result<()> {
    init_tracing();
    let engine = Engine::new(EngineOptions::default().workers(1))?;
    engine.start_query(QueryId(1), "alpha", MatchType::Exact, 0)?;
    assert!(matches!(
        engine.start_query(QueryId(1), "beta", MatchType::Exact, 0),
        Err(SifterError::DuplicateQuery(QueryId(1)))
    ));
    assert!(matches!(
        engine.start_query(QueryId(2), "gamma", MatchType::Edit, 4),
        Err(SifterError::Invalid(_))
    ));
    assert!(matches!(
        engine.start_query(QueryId(3), "a b c d e f", MatchType::Exact, 0),
        Err(SifterError::Invalid(_))
    ));
    assert!(!engine.end_query(QueryId(42))?);
    assert_eq!(engine.catalogue().queries, 1);
    Ok(())
}

#[test]
fn exhausted_slot_reports_failure_and_recovers() -> Result<()> {
    init_tracing();
    let options = EngineOptions::default()
        .workers(1)
        .block_size(168)
        .slot_arena_bytes(4 * 168);
    let engine = Engine::new(options)?;
    for qid in 0..1000u32 {
        engine.start_query(QueryId(qid), &format!("a{qid} b{qid}"), MatchType::Exact, 0)?;
    }
    engine.match_document(DocId(1), "nothing matches here")?;
    let failure = engine.next_result().expect("one result pending");
    assert!(matches!(
        failure,
        Err(SifterError::MatchFailed { doc: DocId(1), .. })
    ));
    assert!(engine.next_result().is_none());

    for qid in 2..1000u32 {
        assert!(engine.end_query(QueryId(qid))?);
    }
    engine.match_document(DocId(2), "a0 b0 a1")?;
    assert_eq!(drain(&engine)?[&DocId(2)], ids(&[0]));

    let stats = engine.stats();
    assert_eq!(stats.documents_failed, 1);
    assert_eq!(stats.documents_matched, 1);
    Ok(())
}

fn levenshtein(a: &[u8], b: &[u8]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, &ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cur = row[j + 1];
            row[j + 1] = if ca == cb {
                prev
            } else {
                1 + prev.min(cur).min(row[j])
            };
            prev = cur;
        }
    }
    row[b.len()]
}

fn satisfied(words: &[String], match_type: MatchType, threshold: u32, doc: &[String]) -> bool {
    let threshold = threshold as usize;
    words.iter().all(|word| {
        doc.iter().any(|candidate| match match_type {
            _ if threshold == 0 => candidate == word,
            MatchType::Exact => candidate == word,
            MatchType::Hamming => {
                candidate.len() == word.len()
                    && candidate
                        .bytes()
                        .zip(word.bytes())
                        .filter(|(a, b)| a != b)
                        .count()
                        <= threshold
            }
            MatchType::Edit => levenshtein(candidate.as_bytes(), word.as_bytes()) <= threshold,
        })
    })
}

fn random_word(rng: &mut ChaCha8Rng) -> String {
    let len = rng.gen_range(1..=6);
    (0..len).map(|_| rng.gen_range(b'a'..=b'd') as char).collect()
}

struct LiveQuery {
    words: Vec<String>,
    match_type: MatchType,
    threshold: u32,
}

#[test]
fn seeded_workload_matches_brute_force() -> Result<()> {
    init_tracing();
    let engine = Engine::new(EngineOptions::default().workers(3))?;
    let mut rng = ChaCha8Rng::seed_from_u64(0x51F7_E200);
    let mut live: BTreeMap<u32, LiveQuery> = BTreeMap::new();
    let mut next_qid = 0u32;

    for round in 0..20u32 {
        for _ in 0..rng.gen_range(5..15) {
            let words: Vec<String> = (0..rng.gen_range(1..=3)).map(|_| random_word(&mut rng)).collect();
            let match_type = *[MatchType::Exact, MatchType::Hamming, MatchType::Edit]
                .choose(&mut rng)
                .expect("non-empty");
            let threshold = rng.gen_range(0..=3);
            engine.start_query(QueryId(next_qid), &words.join(" "), match_type, threshold)?;
            live.insert(
                next_qid,
                LiveQuery {
                    words,
                    match_type,
                    threshold,
                },
            );
            next_qid += 1;
        }
        let retired: Vec<u32> = live.keys().copied().filter(|_| rng.gen_bool(0.2)).collect();
        for qid in retired {
            assert!(engine.end_query(QueryId(qid))?);
            live.remove(&qid);
        }

        let mut expected = BTreeMap::new();
        for n in 0..8u32 {
            let doc_id = DocId(round * 100 + n);
            let doc: Vec<String> = (0..rng.gen_range(0..12)).map(|_| random_word(&mut rng)).collect();
            engine.match_document(doc_id, doc.join(" "))?;
            let matched: Vec<QueryId> = live
                .iter()
                .filter(|(_, q)| satisfied(&q.words, q.match_type, q.threshold, &doc))
                .map(|(&qid, _)| QueryId(qid))
                .collect();
            expected.insert(doc_id, matched);
        }
        assert_eq!(drain(&engine)?, expected, "round {round}");
    }
    Ok(())
}
