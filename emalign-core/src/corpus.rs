//! Streaming reader for ` ||| `-delimited sentence pairs, transparently
//! decompressing `.gz` inputs.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::error::{AlignError, Result};
use crate::types::{WordID, PAIR_DELIMITER};
use crate::vocab::Vocab;

/// One pass over a parallel corpus. Training reopens the file for every
/// iteration, so the reader holds no state beyond the stream position.
pub struct PairReader {
    input: Box<dyn BufRead>,
    path: PathBuf,
    line_no: u64,
    buf: String,
}

impl PairReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| AlignError::io(e, Some(path.clone())))?;
        let input: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(BufReader::with_capacity(1 << 20, MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::with_capacity(1 << 20, file))
        };
        Ok(PairReader {
            input,
            path,
            line_no: 0,
            buf: String::new(),
        })
    }

    /// Reads the next pair, interning both sides through `vocab`.
    /// Returns `Ok(None)` at end of input.
    pub fn next_pair(&mut self, vocab: &mut Vocab) -> Result<Option<(Vec<WordID>, Vec<WordID>)>> {
        self.buf.clear();
        let n = self
            .input
            .read_line(&mut self.buf)
            .map_err(|e| AlignError::io(e, Some(self.path.clone())))?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        let line = self.buf.trim_end_matches(['\n', '\r']);
        match parse_pair(line, vocab) {
            Ok(pair) => Ok(Some(pair)),
            Err(reason) => Err(AlignError::Corpus {
                line: self.line_no,
                reason,
                text: line.to_string(),
            }),
        }
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }
}

fn parse_pair(line: &str, vocab: &mut Vocab) -> std::result::Result<(Vec<WordID>, Vec<WordID>), String> {
    let mut fields = line.split(PAIR_DELIMITER);
    let src_field = fields.next().unwrap_or("");
    let trg_field = match fields.next() {
        Some(f) => f,
        None => return Err(format!("missing `{}` delimiter", PAIR_DELIMITER.trim())),
    };
    // A third field (per-pair annotations) is permitted and ignored.
    let src: Vec<WordID> = src_field.split_whitespace().map(|w| vocab.intern(w)).collect();
    let trg: Vec<WordID> = trg_field.split_whitespace().map(|w| vocab.intern(w)).collect();
    if src.is_empty() {
        return Err("empty source side".into());
    }
    if trg.is_empty() {
        return Err("empty target side".into());
    }
    Ok((src, trg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_corpus(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).expect("write corpus");
        path
    }

    #[test]
    fn reads_pairs_and_ignores_trailing_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(
            &dir,
            "corpus",
            "el gato ||| the cat ||| comment here\nla casa ||| the house\n",
        );
        let mut vocab = Vocab::new();
        let mut reader = PairReader::open(&path).expect("open");

        let (src, trg) = reader.next_pair(&mut vocab).expect("read").expect("pair");
        assert_eq!(src.len(), 2);
        assert_eq!(trg.len(), 2);
        assert_eq!(vocab.surface(&src), "el gato");
        assert_eq!(vocab.surface(&trg), "the cat");

        let (src, trg) = reader.next_pair(&mut vocab).expect("read").expect("pair");
        assert_eq!(vocab.surface(&src), "la casa");
        assert_eq!(vocab.surface(&trg), "the house");
        assert!(reader.next_pair(&mut vocab).expect("eof").is_none());
        assert_eq!(reader.line_no(), 2);
    }

    #[test]
    fn rejects_missing_delimiter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "corpus", "no delimiter at all\n");
        let mut vocab = Vocab::new();
        let mut reader = PairReader::open(&path).expect("open");
        let err = reader.next_pair(&mut vocab).expect_err("should fail");
        match err {
            AlignError::Corpus { line, reason, .. } => {
                assert_eq!(line, 1);
                assert!(reason.contains("delimiter"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_target_side() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_corpus(&dir, "corpus", "a ||| b\na b ||| \n");
        let mut vocab = Vocab::new();
        let mut reader = PairReader::open(&path).expect("open");
        reader.next_pair(&mut vocab).expect("first pair is fine");
        let err = reader.next_pair(&mut vocab).expect_err("empty side");
        match err {
            AlignError::Corpus { line, reason, text } => {
                assert_eq!(line, 2);
                assert!(reason.contains("empty target"));
                assert!(text.contains("a b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reads_gzipped_input() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corpus.gz");
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"uno dos ||| one two\n").expect("encode");
        std::fs::write(&path, enc.finish().expect("finish")).expect("write gz");

        let mut vocab = Vocab::new();
        let mut reader = PairReader::open(&path).expect("open");
        let (src, trg) = reader.next_pair(&mut vocab).expect("read").expect("pair");
        assert_eq!(vocab.surface(&src), "uno dos");
        assert_eq!(vocab.surface(&trg), "one two");
        assert!(reader.next_pair(&mut vocab).expect("eof").is_none());
    }
}
