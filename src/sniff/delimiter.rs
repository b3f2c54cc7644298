//! Delimiter detection over a decoded text sample.

pub const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'|', b'\t'];

const MAX_SNIFF_LINES: usize = 20;

/// Pick the most plausible delimiter: for each candidate, count occurrences
/// per line over the first sample lines and score how consistently the first
/// line's count repeats. Falls back to the most frequent candidate in the
/// first line, then to ','.
pub fn sniff_delimiter(sample: &str) -> u8 {
    let lines: Vec<&str> = sample
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(MAX_SNIFF_LINES)
        .collect();
    let first = match lines.first() {
        Some(l) => *l,
        None => return b',',
    };

    let mut best: Option<(usize, usize, u8)> = None; // (consistent lines, count, delim)
    for delim in DELIMITER_CANDIDATES {
        let count = count_in_line(first, delim);
        if count == 0 {
            continue;
        }
        let consistent = lines
            .iter()
            .filter(|l| count_in_line(l, delim) == count)
            .count();
        let candidate = (consistent, count, delim);
        // ties resolve in candidate order, comma first
        if best.map_or(true, |b| (candidate.0, candidate.1) > (b.0, b.1)) {
            best = Some(candidate);
        }
    }

    match best {
        // require agreement beyond the header line itself
        Some((consistent, _, delim)) if consistent >= 2 => delim,
        _ => most_frequent_in_first_line(first),
    }
}

fn count_in_line(line: &str, delim: u8) -> usize {
    line.bytes().filter(|&b| b == delim).count()
}

fn most_frequent_in_first_line(first: &str) -> u8 {
    DELIMITER_CANDIDATES
        .into_iter()
        .map(|d| (count_in_line(first, d), d))
        .max_by_key(|&(count, _)| count)
        .map(|(_, d)| d)
        .unwrap_or(b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_candidate() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n"), b';');
        assert_eq!(sniff_delimiter("a|b|c\n1|2|3\n"), b'|');
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), b'\t');
    }

    #[test]
    fn consistency_beats_raw_frequency() {
        // semicolons are more numerous in the first line but inconsistent
        let sample = "a;;;b,c\n1,2;3\n4,5,6\n7,8,9\n";
        assert_eq!(sniff_delimiter(sample), b',');
    }

    #[test]
    fn falls_back_to_first_line_frequency() {
        // single data line, no consistency signal beyond the header itself
        assert_eq!(sniff_delimiter("a|b|c"), b'|');
    }

    #[test]
    fn defaults_to_comma_when_nothing_matches() {
        assert_eq!(sniff_delimiter("singlecolumn"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }
}
