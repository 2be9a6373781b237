use crate::NumStat;

/// Separator between fields of the log extraction format.
pub const FIELD_SEPARATOR: char = '\0';

/// Number of fields per record: hash, author, committer, commit time, subject, body.
pub const FIELDS_PER_RECORD: usize = 6;

/// `git log --format` string producing the extraction format.
pub const LOG_FORMAT: &str = "%H%x00%an%x00%cn%x00%ct%x00%s%x00%b%x00";

/// Parse raw numstat output into one `NumStat` per changed path.
///
/// Lines look like `<added> <removed> <path>`, separated by tabs or spaces.
/// Blank lines are skipped. Binary files report `-` instead of counts; they are
/// recorded with zero counts so their paths still reach the scorer. Other
/// unparseable counts are also read as zero. Rename notation in the path is
/// kept verbatim.
pub fn parse_numstat(input: &str) -> Vec<NumStat> {
    input.lines().filter_map(parse_numstat_line).collect()
}

fn parse_numstat_line(line: &str) -> Option<NumStat> {
    // Paths may end in spaces; only a stray carriage return is noise.
    let line = line.trim_start().trim_end_matches('\r');
    if line.is_empty() {
        return None;
    }

    let (added, rest) = split_field(line)?;
    let (removed, path) = split_field(rest)?;
    if path.is_empty() {
        return None;
    }

    Some(NumStat {
        added: parse_count(added),
        removed: parse_count(removed),
        path: path.to_string(),
    })
}

/// Split off the first whitespace-delimited field, returning it and the trimmed rest.
fn split_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace)?;
    Some((&s[..end], s[end..].trim_start()))
}

fn parse_count(field: &str) -> u64 {
    field.parse().unwrap_or(0)
}

/// One decoded record of the log extraction format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub hash: String,
    pub author_name: String,
    pub committer_name: String,
    pub commit_time: i64,
    pub subject: String,
    pub body: String,
}

/// A record whose commit time is not a Unix timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTimestamp {
    pub hash: String,
    pub value: String,
}

/// Decode the null-delimited log stream produced with [`LOG_FORMAT`].
///
/// Empty output yields no records. A trailing fragment shorter than a full
/// record is discarded. An unparseable commit time fails the whole batch.
pub fn parse_log(input: &str) -> Result<Vec<LogRecord>, InvalidTimestamp> {
    let fields: Vec<&str> = input.split(FIELD_SEPARATOR).collect();
    let mut records = Vec::with_capacity(fields.len() / FIELDS_PER_RECORD);

    for chunk in fields.chunks(FIELDS_PER_RECORD) {
        if chunk.len() < FIELDS_PER_RECORD {
            break;
        }

        // git separates records with a newline, which lands in front of the next hash.
        let hash = chunk[0].trim();
        let raw_time = chunk[3].trim();
        let commit_time = raw_time.parse::<i64>().map_err(|_| InvalidTimestamp {
            hash: hash.to_string(),
            value: raw_time.to_string(),
        })?;

        records.push(LogRecord {
            hash: hash.to_string(),
            author_name: chunk[1].to_string(),
            committer_name: chunk[2].to_string(),
            commit_time,
            subject: chunk[4].to_string(),
            body: chunk[5].trim_end().to_string(),
        });
    }

    Ok(records)
}

/// Count the parents listed by `git log --format=%P`.
pub fn count_parents(input: &str) -> usize {
    input.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_numstat_returns_empty() {
        assert!(parse_numstat("").is_empty());
    }

    #[test]
    fn parse_small_numstat() {
        let stats = parse_numstat("14\t0\trepo.go\n1\t16\tslat.go");
        assert_eq!(
            stats,
            vec![NumStat::new(14, 0, "repo.go"), NumStat::new(1, 16, "slat.go")]
        );
    }

    #[test]
    fn parse_numstat_with_space_padding() {
        let stats = parse_numstat("14      0       repo.go\n1       16      slat.go");
        assert_eq!(
            stats,
            vec![NumStat::new(14, 0, "repo.go"), NumStat::new(1, 16, "slat.go")]
        );
    }

    #[test]
    fn trailing_newline_is_dropped() {
        let with = parse_numstat("14\t0\trepo.go\n1\t16\tslat.go\n");
        let without = parse_numstat("14\t0\trepo.go\n1\t16\tslat.go");
        assert_eq!(with, without);
    }

    #[test]
    fn rename_path_is_kept_verbatim() {
        let stats = parse_numstat(
            "0      0       services/{foo => echo}/Makefile\n1       16      slat.go",
        );
        assert_eq!(
            stats,
            vec![
                NumStat::new(0, 0, "services/{foo => echo}/Makefile"),
                NumStat::new(1, 16, "slat.go")
            ]
        );
    }

    #[test]
    fn whole_path_rename_is_kept_verbatim() {
        let stats = parse_numstat("3\t1\told.txt => new.txt\n");
        assert_eq!(stats, vec![NumStat::new(3, 1, "old.txt => new.txt")]);
    }

    #[test]
    fn trailing_spaces_in_path_are_kept() {
        let stats = parse_numstat("1\t2\tnotes.txt \n3\t0\tdir/ spaced  \n");
        assert_eq!(
            stats,
            vec![NumStat::new(1, 2, "notes.txt "), NumStat::new(3, 0, "dir/ spaced  ")]
        );
    }

    #[test]
    fn carriage_returns_are_stripped() {
        let stats = parse_numstat("1\t2\ta.txt\r\n4\t5\tb.txt\r");
        assert_eq!(stats, vec![NumStat::new(1, 2, "a.txt"), NumStat::new(4, 5, "b.txt")]);
    }

    #[test]
    fn binary_marker_counts_as_zero() {
        let stats = parse_numstat("-\t-\tlogo.png\n2\t0\tREADME.md\n");
        assert_eq!(
            stats,
            vec![NumStat::new(0, 0, "logo.png"), NumStat::new(2, 0, "README.md")]
        );
    }

    #[test]
    fn incomplete_lines_are_skipped() {
        let stats = parse_numstat("\n12\n3\t4\n5\t6\tkept.rs\n\n");
        assert_eq!(stats, vec![NumStat::new(5, 6, "kept.rs")]);
    }

    #[test]
    fn parse_empty_log_returns_empty() {
        assert_eq!(parse_log("").unwrap(), vec![]);
    }

    #[test]
    fn parse_log_records() {
        let out = "aaa\0Ada\0Grace\01700000000\0Fix parser\0Longer body\nline two\n\0\n\
                   bbb\0Linus\0Linus\01700000100\0Merge\0\0\n";
        let records = parse_log(out).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].hash, "aaa");
        assert_eq!(records[0].author_name, "Ada");
        assert_eq!(records[0].committer_name, "Grace");
        assert_eq!(records[0].commit_time, 1_700_000_000);
        assert_eq!(records[0].subject, "Fix parser");
        assert_eq!(records[0].body, "Longer body\nline two");

        assert_eq!(records[1].hash, "bbb");
        assert_eq!(records[1].commit_time, 1_700_000_100);
        assert_eq!(records[1].body, "");
    }

    #[test]
    fn trailing_fragment_is_discarded() {
        let out = "aaa\0Ada\0Ada\01700000000\0One\0\0\nbbb\0Bob\0";
        let records = parse_log(out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, "aaa");
    }

    #[test]
    fn bad_timestamp_fails_batch() {
        let out = "aaa\0Ada\0Ada\01700000000\0One\0\0\nbbb\0Bob\0Bob\0yesterday\0Two\0\0\n";
        let err = parse_log(out).unwrap_err();
        assert_eq!(
            err,
            InvalidTimestamp {
                hash: "bbb".to_string(),
                value: "yesterday".to_string()
            }
        );
    }

    #[test]
    fn count_parents_handles_roots_and_merges() {
        assert_eq!(count_parents(""), 0);
        assert_eq!(count_parents("abc\n"), 1);
        assert_eq!(count_parents("abc def\n"), 2);
    }
}
