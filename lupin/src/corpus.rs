//! Tokenized corpus: documents -> sentences -> token ids, plus an
//! optional response per document.

use crate::error::{Result, SamplerError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub sentences: Vec<Vec<usize>>,
    #[serde(default)]
    pub response: Option<f64>,
}

impl Document {
    pub fn num_tokens(&self) -> usize {
        self.sentences.iter().map(Vec::len).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    #[serde(default)]
    pub vocab: Option<Vec<String>>,
    pub vocab_size: usize,
    pub documents: Vec<Document>,
}

impl Corpus {
    pub fn new(vocab_size: usize, documents: Vec<Document>) -> Self {
        Self {
            vocab: None,
            vocab_size,
            documents,
        }
    }

    /// Read a corpus from JSON, gzipped if the name ends with `.gz`
    pub fn from_json_file(path: &str) -> Result<Self> {
        let reader = open_buf_reader(path)?;
        let corpus: Corpus = serde_json::from_reader(reader)
            .map_err(|e| SamplerError::Config(format!("{}: {}", path, e)))?;
        corpus.validate()?;
        Ok(corpus)
    }

    pub fn to_json_file(&self, path: &str) -> Result<()> {
        let mut writer = open_buf_writer(path)?;
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(SamplerError::Config("empty vocabulary".into()));
        }
        if let Some(vocab) = &self.vocab {
            if vocab.len() != self.vocab_size {
                return Err(SamplerError::Config(format!(
                    "{} vocabulary words for vocab_size {}",
                    vocab.len(),
                    self.vocab_size
                )));
            }
        }
        for (d, doc) in self.documents.iter().enumerate() {
            if doc.num_tokens() == 0 {
                return Err(SamplerError::Config(format!("document {} has no tokens", d)));
            }
            for (s, sent) in doc.sentences.iter().enumerate() {
                if let Some(&w) = sent.iter().find(|&&w| w >= self.vocab_size) {
                    return Err(SamplerError::Config(format!(
                        "token {} in document {} sentence {} exceeds vocab_size {}",
                        w, d, s, self.vocab_size
                    )));
                }
            }
            if let Some(r) = doc.response {
                if !r.is_finite() {
                    return Err(SamplerError::Config(format!("document {} has response {}", d, r)));
                }
            }
        }
        Ok(())
    }

    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    pub fn num_sentences(&self) -> usize {
        self.documents.iter().map(|d| d.sentences.len()).sum()
    }

    pub fn num_tokens(&self) -> usize {
        self.documents.iter().map(Document::num_tokens).sum()
    }

    pub fn token_counts(&self) -> Vec<usize> {
        self.documents.iter().map(Document::num_tokens).collect()
    }

    /// Every document's response; fails if any is missing
    pub fn responses(&self) -> Result<Vec<f64>> {
        self.documents
            .iter()
            .enumerate()
            .map(|(d, doc)| {
                doc.response
                    .ok_or_else(|| SamplerError::Config(format!("document {} has no response", d)))
            })
            .collect()
    }

    /// Mean of the observed responses, 0 if none
    pub fn mean_response(&self) -> f64 {
        let observed: Vec<f64> = self.documents.iter().filter_map(|d| d.response).collect();
        if observed.is_empty() {
            0.0
        } else {
            observed.iter().sum::<f64>() / observed.len() as f64
        }
    }

    /// Word string of a token id, the id itself without a vocabulary
    pub fn word(&self, v: usize) -> String {
        match &self.vocab {
            Some(vocab) => vocab[v].clone(),
            None => v.to_string(),
        }
    }

    /// Row-normalized document x word frequency matrix
    pub fn word_frequencies(&self) -> Vec<Vec<f64>> {
        self.documents
            .iter()
            .map(|doc| {
                let mut row = vec![0.0; self.vocab_size];
                for &w in doc.sentences.iter().flatten() {
                    row[w] += 1.0;
                }
                let n = doc.num_tokens() as f64;
                row.iter_mut().for_each(|x| *x /= n);
                row
            })
            .collect()
    }
}

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> Result<Box<dyn BufRead>> {
    let file = File::open(input_file)?;
    match Path::new(input_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> Result<Box<dyn Write>> {
    let file = File::create(output_file)?;
    match Path::new(output_file).extension().and_then(|x| x.to_str()) {
        Some("gz") => Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            flate2::Compression::default(),
        )))),
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(sentences: Vec<Vec<usize>>, response: Option<f64>) -> Document {
        Document { sentences, response }
    }

    #[test]
    fn test_validation() {
        let ok = Corpus::new(3, vec![doc(vec![vec![0, 2], vec![1]], Some(1.0))]);
        ok.validate().unwrap();
        assert_eq!(ok.token_counts(), vec![3]);

        let bad_token = Corpus::new(3, vec![doc(vec![vec![3]], None)]);
        assert!(matches!(bad_token.validate(), Err(SamplerError::Config(_))));

        let empty_doc = Corpus::new(3, vec![doc(vec![vec![]], None)]);
        assert!(empty_doc.validate().is_err());

        assert!(Corpus::new(3, vec![doc(vec![vec![1]], None)]).responses().is_err());
    }

    #[test]
    fn test_gz_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut corpus = Corpus::new(
            2,
            vec![
                doc(vec![vec![0, 1], vec![1, 1]], Some(-0.25)),
                doc(vec![vec![0]], None),
            ],
        );
        corpus.vocab = Some(vec!["alpha".into(), "beta".into()]);
        let path = dir.path().join("corpus.json.gz");
        let path = path.to_str().unwrap();
        corpus.to_json_file(path).unwrap();
        let loaded = Corpus::from_json_file(path).unwrap();
        assert_eq!(loaded, corpus);
        assert_eq!(loaded.word(1), "beta");
        assert_eq!(loaded.word_frequencies()[0], vec![0.25, 0.75]);
    }
}
