//! Generation-suffix key deduplication.
//!
//! Every key receives the suffix `_0`. While duplicates remain, each
//! non-first occurrence of a repeated value has its generation bumped, so
//! `a, a, a` settles to `a_0, a_1, a_2`.

use std::collections::HashSet;

/// Slot of one key during deduplication.
#[derive(Debug, Clone)]
struct Slot<'a> {
    base: &'a str,
    generation: usize,
}

impl Slot<'_> {
    fn render(&self) -> String {
        format!("{}_{}", self.base, self.generation)
    }
}

/// Deduplicate `keys`, preserving order.
///
/// The first occurrence of every input key keeps generation 0, and the
/// output values are pairwise distinct.
///
/// ```
/// use aurora::index::mark_as_duplicate;
///
/// let keys = ["a", "b", "a", "b", "c"].map(String::from);
/// assert_eq!(mark_as_duplicate(&keys), ["a_0", "b_0", "a_1", "b_1", "c_0"]);
/// ```
pub fn mark_as_duplicate<S: AsRef<str>>(keys: &[S]) -> Vec<String> {
    let mut slots: Vec<Slot<'_>> = keys
        .iter()
        .map(|k| Slot {
            base: k.as_ref(),
            generation: 0,
        })
        .collect();
    let mut rendered: Vec<String> = slots.iter().map(Slot::render).collect();

    loop {
        let repeats: Vec<usize> = {
            let mut seen = HashSet::with_capacity(rendered.len());
            rendered
                .iter()
                .enumerate()
                .filter(|(_, value)| !seen.insert(value.as_str()))
                .map(|(index, _)| index)
                .collect::<Vec<_>>()
        };

        if repeats.is_empty() {
            break;
        }

        for index in repeats {
            slots[index].generation += 1;
            rendered[index] = slots[index].render();
        }
    }

    debug_assert_eq!(
        rendered.iter().collect::<HashSet<_>>().len(),
        rendered.len(),
        "deduplicated keys must be distinct"
    );

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup(keys: &[&str]) -> Vec<String> {
        mark_as_duplicate(keys)
    }

    #[test]
    fn test_interleaved_duplicates() {
        assert_eq!(
            dedup(&["a", "b", "a", "b", "c"]),
            ["a_0", "b_0", "a_1", "b_1", "c_0"]
        );
    }

    #[test]
    fn test_triple_duplicate() {
        assert_eq!(dedup(&["a", "a", "a"]), ["a_0", "a_1", "a_2"]);
    }

    #[test]
    fn test_mixed_sequence() {
        assert_eq!(
            dedup(&["a", "b", "c", "a", "b", "b", "c"]),
            ["a_0", "b_0", "c_0", "a_1", "b_1", "b_2", "c_1"]
        );
    }

    #[test]
    fn test_no_duplicates_and_empty_input() {
        assert_eq!(dedup(&["x", "y"]), ["x_0", "y_0"]);
        assert!(dedup(&[]).is_empty());
    }

    #[test]
    fn test_suffix_collisions_with_other_keys() {
        // "a_1" already looks like a bumped "a", but the rendered values still differ.
        let out = dedup(&["a", "a_0", "a"]);
        assert_eq!(out, ["a_0", "a_0_0", "a_1"]);

        let out = dedup(&["a_0", "a", "a"]);
        let distinct: HashSet<_> = out.iter().collect();
        assert_eq!(distinct.len(), out.len());
        assert_eq!(out[0], "a_0_0");
        assert_eq!(out[1], "a_0");
    }

    #[test]
    fn test_first_occurrence_keeps_generation_zero() {
        let keys = ["k", "j", "k", "k", "j", "l", "k"];
        let out = dedup(&keys);
        let mut first_seen = HashSet::new();
        for (key, value) in keys.iter().zip(&out) {
            if first_seen.insert(*key) {
                assert_eq!(value, &format!("{key}_0"));
            }
        }
        let distinct: HashSet<_> = out.iter().collect();
        assert_eq!(distinct.len(), out.len());
    }
}
