//! SMAZ-compatible short-string dictionary compressor.
//!
//! Wire format (one control byte per token):
//!   0..=253  — index into [`CODEBOOK`]; the matched substring is emitted verbatim
//!   254      — next byte is a single literal byte
//!   255      — next byte is a literal run length `n` (1..=255), followed by `n`
//!              literal bytes
//!
//! This is the classic SMAZ encoding shape: a frozen table of the 254 most
//! common short substrings in ordinary text, plus two escape codes for bytes
//! the table does not cover. Matching is greedy and longest-match-first at
//! every position (entries up to 7 bytes long), which is cheap enough to run
//! inline on every block without a general-purpose compressor.
//!
//! The codebook below is this crate's own frozen table (analogous to the
//! codec UUID table in `codec.rs` of the teacher crate) — it is a dictionary
//! of common English fragments and is "compatible with the SMAZ algorithm"
//! in the sense of implementing the same compression scheme, not a
//! byte-for-byte reproduction of any external table.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Longest entry length present in [`CODEBOOK`]; bounds the greedy match window.
const MAX_ENTRY_LEN: usize = 7;

/// Frozen, version-pinned dictionary of common short substrings.
pub static CODEBOOK: [&str; 254] = [
    "the",
    "and",
    "that",
    "have",
    "for",
    "not",
    "with",
    "you",
    "this",
    "but",
    "his",
    "from",
    "they",
    "say",
    "her",
    "she",
    "will",
    "one",
    "all",
    "would",
    "there",
    "their",
    "what",
    "out",
    "about",
    "who",
    "get",
    "which",
    "when",
    "make",
    "can",
    "like",
    "time",
    "just",
    "him",
    "know",
    "take",
    "people",
    "into",
    "year",
    "your",
    "good",
    "some",
    "could",
    "them",
    "see",
    "other",
    "than",
    "then",
    "now",
    "look",
    "only",
    "come",
    "its",
    "over",
    "think",
    "also",
    "back",
    "after",
    "use",
    "two",
    "how",
    "our",
    "work",
    "first",
    "well",
    "way",
    "even",
    "new",
    "want",
    "because",
    "any",
    "these",
    "give",
    "day",
    "most",
    "us",
    " ",
    "  ",
    "\n",
    "\r\n",
    "\t",
    ", ",
    ". ",
    "? ",
    "! ",
    ": ",
    "; ",
    "'s",
    "'t",
    "'re",
    "'ve",
    "'ll",
    "'d",
    "n't",
    ", the",
    ". The",
    "\" ",
    " the",
    " a",
    " an",
    " of",
    " to",
    " in",
    " is",
    " it",
    " on",
    " at",
    " he",
    " be",
    " as",
    " by",
    " or",
    " we",
    " do",
    " if",
    " so",
    "ing",
    "ed",
    "tion",
    "ness",
    "ment",
    "able",
    "ible",
    "ful",
    "less",
    "ly",
    "er",
    "est",
    "s ",
    "es ",
    "ed ",
    "ing ",
    "th",
    "he",
    "in",
    "an",
    "re",
    "on",
    "at",
    "en",
    "nd",
    "ti",
    "es",
    "or",
    "te",
    "of",
    "is",
    "it",
    "al",
    "ar",
    "st",
    "to",
    "nt",
    "ng",
    "se",
    "ha",
    "as",
    "ou",
    "io",
    "le",
    "e",
    "t",
    "a",
    "o",
    "i",
    "n",
    "s",
    "h",
    "r",
    "d",
    "l",
    "u",
    "c",
    "m",
    "f",
    "w",
    "y",
    "p",
    "v",
    "b",
    "g",
    "k",
    "j",
    "q",
    "x",
    "z",
    "0",
    "1",
    "2",
    "3",
    "4",
    "5",
    "6",
    "7",
    "8",
    "9",
    "http://",
    "https://",
    "www.",
    ".com",
    "@",
    "#",
    "%",
    "&",
    "=",
    "+",
    "-",
    "_",
    "/",
    "(",
    ")",
    "[",
    "]",
    "{",
    "}",
    "<",
    ">",
    "aa",
    "ab",
    "ac",
    "ad",
    "ae",
    "af",
    "ag",
    "ah",
    "ai",
    "aj",
    "ak",
    "am",
    "ao",
    "ap",
    "aq",
    "au",
    "av",
    "aw",
    "ax",
    "ay",
    "az",
    "ba",
    "bb",
    "bc",
    "bd",
    "be",
    "bf",
    "bg",
    "bh",
    "bi",
    "bj",
    "bk",
    "bl",
    "bm",
    "bn",
    "bo",
];

fn index() -> &'static HashMap<&'static [u8], u8> {
    static INDEX: OnceLock<HashMap<&'static [u8], u8>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut map = HashMap::with_capacity(CODEBOOK.len());
        for (i, entry) in CODEBOOK.iter().enumerate() {
            map.insert(entry.as_bytes(), i as u8);
        }
        map
    })
}

/// Compress `data` using the dictionary scheme described above.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let idx = index();
    let mut out = Vec::with_capacity(data.len());
    let mut literal: Vec<u8> = Vec::new();
    let mut i = 0usize;

    let flush_literal = |literal: &mut Vec<u8>, out: &mut Vec<u8>| {
        if literal.is_empty() {
            return;
        }
        if literal.len() == 1 {
            out.push(254);
            out.push(literal[0]);
        } else {
            for chunk in literal.chunks(255) {
                out.push(255);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        literal.clear();
    };

    while i < data.len() {
        let max_len = MAX_ENTRY_LEN.min(data.len() - i);
        let mut matched = None;
        for len in (1..=max_len).rev() {
            if let Some(&code) = idx.get(&data[i..i + len]) {
                matched = Some((code, len));
                break;
            }
        }
        match matched {
            Some((code, len)) => {
                flush_literal(&mut literal, &mut out);
                out.push(code);
                i += len;
            }
            None => {
                literal.push(data[i]);
                i += 1;
            }
        }
    }
    flush_literal(&mut literal, &mut out);
    out
}

/// Decompress a buffer produced by [`compress`]. Returns `None` if the
/// control-byte stream is truncated or malformed.
pub fn decompress(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 3);
    let mut i = 0usize;
    while i < data.len() {
        let ctrl = data[i];
        i += 1;
        match ctrl {
            254 => {
                let byte = *data.get(i)?;
                out.push(byte);
                i += 1;
            }
            255 => {
                let len = *data.get(i)? as usize;
                i += 1;
                let end = i.checked_add(len)?;
                out.extend_from_slice(data.get(i..end)?);
                i = end;
            }
            code => {
                out.extend_from_slice(CODEBOOK.get(code as usize)?.as_bytes());
            }
        }
    }
    Some(out)
}
