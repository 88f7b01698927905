use super::component::{Component, Op};
use super::snippet::Snippet;
use super::OtError;

/// Apply `op` to `snapshot`, returning the resulting snippet. Components are
/// applied sequentially, so a later component sees prior components'
/// effects.
pub fn apply(snapshot: &Snippet, op: &Op) -> Result<Snippet, OtError> {
    let mut current = snapshot.clone();
    for component in op {
        apply_component(&mut current, component)?;
    }
    Ok(current)
}

fn apply_component(snapshot: &mut Snippet, component: &Component) -> Result<(), OtError> {
    let position = component.position();
    match component {
        Component::Insertion { snippet, .. } => {
            if position > snapshot.len() {
                return Err(OtError::InsertOutOfBounds {
                    position,
                    len: snapshot.len(),
                });
            }
            snapshot.splice_insert(position, snippet);
            Ok(())
        }
        Component::Deletion { snippet, .. } => {
            let end = position + snippet.len();
            let actual = snapshot
                .slice(position, end)
                .ok_or(OtError::DeleteMismatch { position })?;
            if actual != snippet.as_chars() {
                return Err(OtError::DeleteMismatch { position });
            }
            snapshot.splice_delete(position, snippet.len());
            Ok(())
        }
        Component::Comment { snippet, .. } => {
            let end = position + snippet.len();
            let actual = snapshot
                .slice(position, end)
                .ok_or(OtError::CommentMismatch { position })?;
            if actual != snippet.as_chars() {
                return Err(OtError::CommentMismatch { position });
            }
            // Comments never modify the snapshot.
            Ok(())
        }
        Component::NoOp { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::Component;

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
    fn insertion_scenario() {
        let s = Snippet::from("foo");
        let out = apply(&s, &vec![ins(3, "Bar")]).unwrap();
        assert_eq!(out.to_string(), "fooBar");
    }

    #[test]
    fn deletion_scenario() {
        let s = Snippet::from("fooBar");
        let out = apply(&s, &vec![del(3, "Bar")]).unwrap();
        assert_eq!(out.to_string(), "foo");
    }

    #[test]
    fn deletion_mismatch_errors() {
        let s = Snippet::from("fooBar");
        let err = apply(&s, &vec![del(3, "bar")]).unwrap_err();
        assert_eq!(err, OtError::DeleteMismatch { position: 3 });
    }

    #[test]
    fn insertion_out_of_bounds_errors() {
        let s = Snippet::from("foo");
        let err = apply(&s, &vec![ins(10, "x")]).unwrap_err();
        assert_eq!(err, OtError::InsertOutOfBounds { position: 10, len: 3 });
    }

    #[test]
    fn sequential_components_see_prior_effects() {
        let s = Snippet::from("abc");
        let op = vec![ins(3, "def"), del(3, "def")];
        let out = apply(&s, &op).unwrap();
        assert_eq!(out.to_string(), "abc");
    }

    #[test]
    fn comment_does_not_modify_snapshot() {
        let s = Snippet::from("hello world");
        let comment = Component::Comment {
            position: 6,
            snippet: Snippet::from("world"),
            thread_id: "t1".to_string(),
        };
        let out = apply(&s, &vec![comment]).unwrap();
        assert_eq!(out, s);
    }

    #[test]
    fn comment_mismatch_errors() {
        let s = Snippet::from("hello world");
        let comment = Component::Comment {
            position: 6,
            snippet: Snippet::from("earth"),
            thread_id: "t1".to_string(),
        };
        assert!(apply(&s, &vec![comment]).is_err());
    }
}
