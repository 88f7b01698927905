use super::component::{Component, Op};
use super::snippet::Snippet;
use similar::{capture_diff_slices, Algorithm, DiffOp};
use std::time::{Duration, Instant};

/// Wall-clock budget for a single `diff` call. Pathological inputs (huge
/// near-random rewrites) can make Myers diffing quadratic; once the budget
/// is spent we give up on a minimal diff and fall back to replacing the
/// whole snippet.
#[derive(Debug, Clone, Copy)]
pub struct DiffBudget {
    deadline: Instant,
}

impl DiffBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

impl Default for DiffBudget {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// Compute a minimal op turning `before` into `after`, using the default
/// diff budget.
pub fn diff(before: &Snippet, after: &Snippet) -> Op {
    diff_with_budget(before, after, DiffBudget::default())
}

/// Compute a minimal op turning `before` into `after`, falling back to a
/// whole-snippet delete+insert if `budget` is exhausted before or during
/// the diff.
pub fn diff_with_budget(before: &Snippet, after: &Snippet, budget: DiffBudget) -> Op {
    if before == after {
        return Vec::new();
    }
    if budget.expired() {
        return whole_snippet_fallback(before, after);
    }

    let old = before.as_chars();
    let new = after.as_chars();
    let ops = capture_diff_slices(Algorithm::Myers, old, new);

    if budget.expired() {
        return whole_snippet_fallback(before, after);
    }

    let mut components = Vec::new();
    let mut shift: isize = 0;
    for op in ops {
        match op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                let position = (old_index as isize + shift) as usize;
                let snippet = chars_to_snippet(&old[old_index..old_index + old_len]);
                components.push(Component::Deletion { position, snippet });
                shift -= old_len as isize;
            }
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => {
                let position = (old_index as isize + shift) as usize;
                let snippet = chars_to_snippet(&new[new_index..new_index + new_len]);
                components.push(Component::Insertion { position, snippet });
                shift += new_len as isize;
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let del_position = (old_index as isize + shift) as usize;
                let del_snippet = chars_to_snippet(&old[old_index..old_index + old_len]);
                components.push(Component::Deletion {
                    position: del_position,
                    snippet: del_snippet,
                });
                shift -= old_len as isize;

                let ins_position = (old_index as isize + shift) as usize;
                let ins_snippet = chars_to_snippet(&new[new_index..new_index + new_len]);
                components.push(Component::Insertion {
                    position: ins_position,
                    snippet: ins_snippet,
                });
                shift += new_len as isize;
            }
        }
    }
    components
}

fn chars_to_snippet(chars: &[char]) -> Snippet {
    Snippet::from(chars.iter().collect::<String>())
}

fn whole_snippet_fallback(before: &Snippet, after: &Snippet) -> Op {
    let mut out = Vec::with_capacity(2);
    if !before.is_empty() {
        out.push(Component::Deletion {
            position: 0,
            snippet: before.clone(),
        });
    }
    if !after.is_empty() {
        out.push(Component::Insertion {
            position: 0,
            snippet: after.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::apply;

    #[test]
    fn insertion_in_the_middle() {
        let before = Snippet::from("hello world");
        let after = Snippet::from("hello beautiful world");
        let op = diff(&before, &after);
        assert_eq!(
            op,
            vec![Component::Insertion {
                position: 6,
                snippet: Snippet::from("beautiful "),
            }]
        );
    }

    #[test]
    fn identical_snippets_produce_empty_op() {
        let s = Snippet::from("unchanged");
        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn result_of_diff_applies_cleanly() {
        let before = Snippet::from("the quick brown fox");
        let after = Snippet::from("the slow brown foxes");
        let op = diff(&before, &after);
        let result = apply(&before, &op).unwrap();
        assert_eq!(result, after);
    }

    #[test]
    fn exhausted_budget_falls_back_to_whole_snippet_replace() {
        let before = Snippet::from("abcdef");
        let after = Snippet::from("abXdef");
        let expired = DiffBudget::new(Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(1));
        let op = diff_with_budget(&before, &after, expired);
        assert_eq!(
            op,
            vec![
                Component::Deletion {
                    position: 0,
                    snippet: before.clone(),
                },
                Component::Insertion {
                    position: 0,
                    snippet: after.clone(),
                },
            ]
        );
    }
}
