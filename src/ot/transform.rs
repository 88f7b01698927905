use super::component::{Component, Op};
use super::snippet::Snippet;
use super::OtError;

/// Which side `op_left` occupies relative to the concurrent `op_right` when
/// two insertions land at the same position. `Side::Right` breaks ties by
/// placing `op_left`'s insertion after the other's (`insertAfter = side ==
/// right`); `Side::Left` keeps it before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Transform `op_left` against the concurrent `op_right`, returning the
/// version of `op_left` that can be applied after `op_right` has already
/// been applied.
pub fn transform(op_left: &Op, op_right: &Op, side: Side) -> Result<Op, OtError> {
    // Single-component fast path: skip the fold machinery.
    if op_left.len() == 1 && op_right.len() == 1 {
        let out = transform_single(&op_left[0], &op_right[0], side)?;
        return Ok(merge_adjacent(out));
    }

    let mut left_components = op_left.clone();
    for right_component in op_right {
        let mut next = Vec::with_capacity(left_components.len());
        for left_component in &left_components {
            next.extend(transform_single(left_component, right_component, side)?);
        }
        left_components = next;
    }
    Ok(merge_adjacent(left_components))
}

fn insert_after(side: Side) -> bool {
    matches!(side, Side::Right)
}

/// Shift `p` to account for `other` having already been applied.
fn transform_position(p: usize, other: &Component, insert_after: bool) -> usize {
    match other {
        Component::Insertion { position, snippet } => {
            let (op, l) = (*position, snippet.len());
            if p > op || (p == op && insert_after) {
                p + l
            } else {
                p
            }
        }
        Component::Deletion { position, snippet } => {
            let (op, l) = (*position, snippet.len());
            if p >= op + l {
                p - l
            } else if p <= op {
                p
            } else {
                op
            }
        }
        Component::Comment { .. } | Component::NoOp { .. } => p,
    }
}

fn chars_to_snippet(chars: &[char]) -> Snippet {
    Snippet::from(chars.iter().collect::<String>())
}

fn transform_single(
    left: &Component,
    right: &Component,
    side: Side,
) -> Result<Vec<Component>, OtError> {
    match (left, right) {
        (Component::Insertion { position, snippet }, other) => {
            let p = transform_position(*position, other, insert_after(side));
            Ok(vec![Component::Insertion {
                position: p,
                snippet: snippet.clone(),
            }])
        }

        (Component::NoOp { position }, other) => {
            let p = transform_position(*position, other, insert_after(side));
            Ok(vec![Component::NoOp { position: p }])
        }

        (
            Component::Deletion { position, snippet },
            Component::Insertion {
                position: rpos,
                snippet: rsnippet,
            },
        ) => {
            let (dpos, dlen) = (*position, snippet.len());
            let dend = dpos + dlen;
            let rpos = *rpos;
            if rpos <= dpos {
                Ok(vec![Component::Deletion {
                    position: dpos + rsnippet.len(),
                    snippet: snippet.clone(),
                }])
            } else if rpos >= dend {
                Ok(vec![left.clone()])
            } else {
                let split_at = rpos - dpos;
                let chars = snippet.as_chars();
                let mut out = Vec::with_capacity(2);
                let prefix = chars_to_snippet(&chars[..split_at]);
                if !prefix.is_empty() {
                    out.push(Component::Deletion {
                        position: dpos,
                        snippet: prefix,
                    });
                }
                let suffix = chars_to_snippet(&chars[split_at..]);
                if !suffix.is_empty() {
                    out.push(Component::Deletion {
                        position: rpos + rsnippet.len(),
                        snippet: suffix,
                    });
                }
                Ok(out)
            }
        }

        (
            Component::Deletion { position, snippet },
            Component::Deletion {
                position: rpos,
                snippet: rsnippet,
            },
        ) => {
            let (dpos, dlen) = (*position, snippet.len());
            let dend = dpos + dlen;
            let (rpos, rlen) = (*rpos, rsnippet.len());
            let rend = rpos + rlen;

            if rend <= dpos {
                Ok(vec![Component::Deletion {
                    position: dpos - rlen,
                    snippet: snippet.clone(),
                }])
            } else if rpos >= dend {
                Ok(vec![left.clone()])
            } else {
                let overlap_start = dpos.max(rpos);
                let overlap_end = dend.min(rend);
                let self_chars = snippet.as_chars();
                let other_chars = rsnippet.as_chars();
                let self_overlap = &self_chars[overlap_start - dpos..overlap_end - dpos];
                let other_overlap = &other_chars[overlap_start - rpos..overlap_end - rpos];
                if self_overlap != other_overlap {
                    return Err(OtError::DeleteOpsDeleteDifferentText);
                }

                let mut out = Vec::new();
                if dpos < rpos {
                    let prefix = chars_to_snippet(&self_chars[..rpos - dpos]);
                    if !prefix.is_empty() {
                        out.push(Component::Deletion {
                            position: dpos,
                            snippet: prefix,
                        });
                    }
                }
                if dend > rend {
                    let suffix = chars_to_snippet(&self_chars[rend - dpos..]);
                    if !suffix.is_empty() {
                        out.push(Component::Deletion {
                            position: rpos,
                            snippet: suffix,
                        });
                    }
                }
                Ok(out)
            }
        }

        (Component::Deletion { position, snippet }, other) => {
            let p = transform_position(*position, other, false);
            Ok(vec![Component::Deletion {
                position: p,
                snippet: snippet.clone(),
            }])
        }

        (
            Component::Comment {
                position,
                snippet,
                thread_id,
            },
            Component::Insertion {
                position: rpos,
                snippet: rsnippet,
            },
        ) => {
            let (cpos, clen) = (*position, snippet.len());
            let cend = cpos + clen;
            let rpos = *rpos;
            if rpos > cpos && rpos < cend {
                let offset = rpos - cpos;
                let chars = snippet.as_chars();
                let mut merged = chars[..offset].to_vec();
                merged.extend_from_slice(rsnippet.as_chars());
                merged.extend_from_slice(&chars[offset..]);
                Ok(vec![Component::Comment {
                    position: cpos,
                    snippet: chars_to_snippet(&merged),
                    thread_id: thread_id.clone(),
                }])
            } else {
                let p = transform_position(cpos, right, insert_after(side));
                Ok(vec![Component::Comment {
                    position: p,
                    snippet: snippet.clone(),
                    thread_id: thread_id.clone(),
                }])
            }
        }

        (
            Component::Comment {
                position,
                snippet,
                thread_id,
            },
            Component::Deletion {
                position: rpos,
                snippet: rsnippet,
            },
        ) => {
            let (cpos, clen) = (*position, snippet.len());
            let cend = cpos + clen;
            let (rpos, rlen) = (*rpos, rsnippet.len());
            let rend = rpos + rlen;

            if rend <= cpos {
                Ok(vec![Component::Comment {
                    position: cpos - rlen,
                    snippet: snippet.clone(),
                    thread_id: thread_id.clone(),
                }])
            } else if rpos >= cend {
                Ok(vec![left.clone()])
            } else {
                let overlap_start = cpos.max(rpos);
                let overlap_end = cend.min(rend);
                let self_chars = snippet.as_chars();
                let other_chars = rsnippet.as_chars();
                let self_overlap = &self_chars[overlap_start - cpos..overlap_end - cpos];
                let other_overlap = &other_chars[overlap_start - rpos..overlap_end - rpos];
                if self_overlap != other_overlap {
                    return Err(OtError::CommentMismatch {
                        position: overlap_start,
                    });
                }

                let mut merged = self_chars[..overlap_start - cpos].to_vec();
                merged.extend_from_slice(&self_chars[overlap_end - cpos..]);
                let new_pos = cpos.min(rpos);
                Ok(vec![Component::Comment {
                    position: new_pos,
                    snippet: chars_to_snippet(&merged),
                    thread_id: thread_id.clone(),
                }])
            }
        }

        (
            Component::Comment {
                position,
                snippet,
                thread_id,
            },
            other,
        ) => {
            let p = transform_position(*position, other, insert_after(side));
            Ok(vec![Component::Comment {
                position: p,
                snippet: snippet.clone(),
                thread_id: thread_id.clone(),
            }])
        }
    }
}

/// Merge a same-kind, adjacent component into the last appended one by
/// splicing the shorter into the longer.
fn merge_adjacent(components: Vec<Component>) -> Vec<Component> {
    let mut out: Vec<Component> = Vec::with_capacity(components.len());
    for c in components {
        let merged = match (out.last(), &c) {
            (
                Some(Component::Insertion {
                    position: lp,
                    snippet: ls,
                }),
                Component::Insertion {
                    position: rp,
                    snippet: rs,
                },
            ) if lp + ls.len() == *rp => {
                let mut chars = ls.as_chars().to_vec();
                chars.extend_from_slice(rs.as_chars());
                Some(Component::Insertion {
                    position: *lp,
                    snippet: chars_to_snippet(&chars),
                })
            }
            (
                Some(Component::Deletion {
                    position: lp,
                    snippet: ls,
                }),
                Component::Deletion {
                    position: rp,
                    snippet: rs,
                },
            ) if lp == rp => {
                let mut chars = ls.as_chars().to_vec();
                chars.extend_from_slice(rs.as_chars());
                Some(Component::Deletion {
                    position: *lp,
                    snippet: chars_to_snippet(&chars),
                })
            }
            _ => None,
        };
        match merged {
            Some(m) => {
                out.pop();
                out.push(m);
            }
            None => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(position: usize, text: &str) -> Component {
        Component::Insertion {
            position,
            snippet: Snippet::from(text),
        }
    }

    fn del(position: usize, text: &str) -> Component {
        Component::Deletion {
            position,
            snippet: Snippet::from(text),
        }
    }

    #[test]
    fn insertion_vs_insertion_no_tie() {
        let left = vec![ins(10, "foo")];
        let right = vec![ins(3, "foo")];
        let out = transform(&left, &right, Side::Left).unwrap();
        assert_eq!(out, vec![ins(13, "foo")]);
    }

    #[test]
    fn deletion_vs_deletion_code_points_not_bytes() {
        let left = vec![del(10, "foo")];
        let right = vec![del(3, "f\u{f6}\u{f6}")]; // "föö", 3 code points / 5 bytes
        let out = transform(&left, &right, Side::Left).unwrap();
        assert_eq!(out, vec![del(7, "foo")]);
    }

    #[test]
    fn deletion_vs_deletion_overlap_mismatch_errors() {
        let left = vec![del(0, "abc")];
        let right = vec![del(1, "xyz")];
        let err = transform(&left, &right, Side::Left).unwrap_err();
        assert_eq!(err, OtError::DeleteOpsDeleteDifferentText);
    }

    #[test]
    fn deletion_straddling_insertion_splits() {
        let left = vec![del(0, "hello")];
        let right = vec![ins(2, "XX")];
        let out = transform(&left, &right, Side::Left).unwrap();
        assert_eq!(out, vec![del(0, "he"), del(4, "llo")]);
    }

    #[test]
    fn insertion_ties_respect_side() {
        let left = vec![ins(5, "L")];
        let right = vec![ins(5, "R")];
        let left_wins = transform(&left, &right, Side::Left).unwrap();
        assert_eq!(left_wins, vec![ins(5, "L")]);
        let right_wins = transform(&left, &right, Side::Right).unwrap();
        assert_eq!(right_wins, vec![ins(6, "L")]);
    }
}

/// Convergence property: two clients who each apply their own insertion
/// against a shared snapshot, then transform-and-apply the other's, must
/// land on the same text regardless of who's "left" and who's "right".
#[cfg(test)]
mod convergence {
    use super::*;
    use crate::ot::apply::apply;
    use proptest::prelude::*;

    fn base_and_insertions() -> impl Strategy<Value = (String, usize, String, usize, String)> {
        "[a-z]{0,16}".prop_flat_map(|base| {
            let len = base.chars().count();
            (
                Just(base),
                0..=len,
                "[a-z]{1,4}",
                0..=len,
                "[a-z]{1,4}",
            )
        })
    }

    proptest! {
        #[test]
        fn concurrent_insertions_converge((base, left_pos, left_text, right_pos, right_text) in base_and_insertions()) {
            let snapshot = Snippet::from(base.as_str());
            let left_op = vec![Component::Insertion { position: left_pos, snippet: Snippet::from(left_text.as_str()) }];
            let right_op = vec![Component::Insertion { position: right_pos, snippet: Snippet::from(right_text.as_str()) }];

            let left_then_right = {
                let after_left = apply(&snapshot, &left_op).unwrap();
                let right_prime = transform(&right_op, &left_op, Side::Right).unwrap();
                apply(&after_left, &right_prime).unwrap()
            };
            let right_then_left = {
                let after_right = apply(&snapshot, &right_op).unwrap();
                let left_prime = transform(&left_op, &right_op, Side::Left).unwrap();
                apply(&after_right, &left_prime).unwrap()
            };

            prop_assert_eq!(left_then_right, right_then_left);
        }
    }
}
