//! Tantivy BM25 over the lexical layer of one query's candidates.
//!
//! Each query indexes exactly the admitted candidates in RAM, so document
//! frequencies and average document length are candidate-set statistics.
//! A candidate's document is its lexical signature, each term repeated by
//! its frequency, keyed by entry id.

use std::collections::HashMap;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::SimpleMemResult;
use crate::types::LexicalSignature;

// Smallest arena tantivy accepts for one indexing thread.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// BM25 searcher over a fixed candidate set.
pub struct CandidateIndex {
    reader: IndexReader,
    id_field: Field,
    terms_field: Field,
    /// Entry id to build position.
    positions: HashMap<String, usize>,
}

impl CandidateIndex {
    /// Index `(entry id, signature)` pairs. Scores come back in this order.
    pub fn build<'a, I>(docs: I) -> SimpleMemResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a LexicalSignature)>,
    {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let terms_field = schema_builder.add_text_field("terms", TEXT);
        let index = Index::create_in_ram(schema_builder.build());

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let mut positions = HashMap::new();
        for (id, signature) in docs {
            let mut doc = TantivyDocument::default();
            doc.add_text(id_field, id);
            doc.add_text(terms_field, signature_text(signature));
            writer.add_document(doc)?;
            let next = positions.len();
            positions.entry(id.to_string()).or_insert(next);
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            reader,
            id_field,
            terms_field,
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Raw BM25 of every candidate for `terms`; unmatched candidates score 0.
    pub fn scores(&self, terms: &[String]) -> SimpleMemResult<Vec<f32>> {
        let mut scores = vec![0.0f32; self.len()];
        if terms.is_empty() || self.is_empty() {
            return Ok(scores);
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|t| {
                let term = Term::from_field_text(self.terms_field, t);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let hits = searcher.search(&query, &TopDocs::with_limit(self.len()))?;
        for (score, address) in hits {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            let position = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .and_then(|id| self.positions.get(id));
            if let Some(&p) = position {
                scores[p] = score;
            }
        }
        Ok(scores)
    }

    /// BM25 divided by the best candidate's score, in `[0, 1]`.
    pub fn normalized_scores(&self, terms: &[String]) -> SimpleMemResult<Vec<f32>> {
        let mut scores = self.scores(terms)?;
        let max = scores.iter().copied().fold(0.0f32, f32::max);
        for s in &mut scores {
            *s = if max > 0.0 { *s / max } else { 0.0 };
        }
        Ok(scores)
    }
}

/// Signature terms, each repeated by its (rounded, at least one) frequency.
fn signature_text(signature: &LexicalSignature) -> String {
    let mut words: Vec<&str> = Vec::new();
    for (term, weight) in signature {
        let repeat = (weight.round() as usize).max(1);
        words.extend(std::iter::repeat(term.as_str()).take(repeat));
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::scoring::query_terms;
    use crate::text::lexical_signature;

    fn index(texts: &[&str]) -> (Vec<LexicalSignature>, Vec<String>) {
        let signatures = texts.iter().map(|t| lexical_signature(t)).collect();
        let ids = (0..texts.len()).map(|i| format!("e{}", i)).collect();
        (signatures, ids)
    }

    fn build(signatures: &[LexicalSignature], ids: &[String]) -> CandidateIndex {
        CandidateIndex::build(ids.iter().map(String::as_str).zip(signatures.iter())).unwrap()
    }

    #[test]
    fn test_matching_document_ranks_first() {
        let (signatures, ids) = index(&[
            "Alice will meet Bob for coffee",
            "Carol bought a new bike",
            "Alice likes tea",
        ]);
        let scores = build(&signatures, &ids)
            .normalized_scores(&query_terms("Alice meet Bob"))
            .unwrap();

        assert!((scores[0] - 1.0).abs() < 1e-6);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0 && scores[2] < 1.0);
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let (signatures, ids) = index(&["latte cafe", "latte cafe", "latte tram"]);
        let index = build(&signatures, &ids);
        let common = index.scores(&query_terms("latte")).unwrap();
        let rare = index.scores(&query_terms("tram")).unwrap();
        assert!(rare[2] > common[2]);
    }

    #[test]
    fn test_repeated_terms_score_higher() {
        let (signatures, ids) = index(&["latte latte latte cafe", "latte cafe tram bike"]);
        let scores = build(&signatures, &ids).scores(&query_terms("latte")).unwrap();
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_no_match_normalizes_to_zero() {
        let (signatures, ids) = index(&["latte"]);
        let index = build(&signatures, &ids);
        assert_eq!(index.normalized_scores(&query_terms("bicycle")).unwrap(), vec![0.0]);
        assert_eq!(index.normalized_scores(&[]).unwrap(), vec![0.0]);

        let empty = build(&[], &[]);
        assert!(empty.is_empty());
        assert!(empty.normalized_scores(&query_terms("latte")).unwrap().is_empty());
    }

    #[test]
    fn test_signature_text_repeats_by_frequency() {
        let signature = lexical_signature("latte latte cafe");
        assert_eq!(signature_text(&signature), "cafe latte latte");
    }
}
