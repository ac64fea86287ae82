//! Natural ordering for rom names

use std::cmp::Ordering;

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Compare rom names the way a person would sort them.
///
/// Unqualified names sort before folder-qualified ones; two qualified names
/// sharing their leading folder compare by the remainder. Digit runs compare
/// by numeric value.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_split = a.split_once(is_separator);
    let b_split = b.split_once(is_separator);

    match (a_split, b_split) {
        (None, None) => compare_chunks(a, b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some((a_dir, a_rest)), Some((b_dir, b_rest))) => {
            if a_dir == b_dir {
                natural_cmp(a_rest, b_rest)
            } else {
                compare_chunks(a_dir, b_dir).then_with(|| natural_cmp(a_rest, b_rest))
            }
        }
    }
}

/// Split into alternating digit and non-digit runs.
fn chunks(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        if in_digits.is_some_and(|d| d != digit) {
            out.push(&s[start..i]);
            start = i;
        }
        in_digits = Some(digit);
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        // "01" after "1"
        .then_with(|| a.len().cmp(&b.len()))
}

fn compare_chunks(a: &str, b: &str) -> Ordering {
    let a_chunks = chunks(a);
    let b_chunks = chunks(b);

    for (x, y) in a_chunks.iter().zip(b_chunks.iter()) {
        let x_digit = x.starts_with(|c: char| c.is_ascii_digit());
        let y_digit = y.starts_with(|c: char| c.is_ascii_digit());
        let ord = if x_digit && y_digit {
            compare_numeric(x, y)
        } else {
            x.to_lowercase()
                .cmp(&y.to_lowercase())
                .then_with(|| x.cmp(y))
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a_chunks.len().cmp(&b_chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut names: Vec<&str>) -> Vec<&str> {
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn test_numeric_runs_compare_by_value() {
        assert_eq!(
            sorted(vec!["rom10.bin", "rom2.bin", "rom1.bin"]),
            vec!["rom1.bin", "rom2.bin", "rom10.bin"]
        );
        assert_eq!(natural_cmp("a01", "a1"), Ordering::Greater);
        assert_eq!(natural_cmp("a1", "a1"), Ordering::Equal);
    }

    #[test]
    fn test_qualified_names_sort_after_unqualified() {
        assert_eq!(
            sorted(vec!["clone/a.bin", "z.bin", "a.bin"]),
            vec!["a.bin", "z.bin", "clone/a.bin"]
        );
    }

    #[test]
    fn test_shared_folder_compares_remainder() {
        assert_eq!(natural_cmp("disc/track10.bin", "disc/track9.bin"), Ordering::Greater);
        assert_eq!(natural_cmp("set2/x.bin", "set10/a.bin"), Ordering::Less);
    }

    #[test]
    fn test_case_insensitive_before_ordinal() {
        assert_eq!(sorted(vec!["b.bin", "A.bin"]), vec!["A.bin", "b.bin"]);
        assert_eq!(natural_cmp("A.bin", "a.bin"), Ordering::Less);
    }
}
