use std::collections::HashMap;

use pathwatch_core::ids::SpanId;
use pathwatch_core::model::span::{SpanLinks, SpanNode};

/// First span without a parent, else the first span. `None` only for an
/// empty slice.
pub fn find_root<T: SpanLinks>(spans: &[T]) -> Option<&T> {
    spans
        .iter()
        .find(|s| s.parent_span_id().is_none())
        .or_else(|| spans.first())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Walking,
    Done,
}

/// Links spans into trees by `parent_span_id`.
///
/// Top-level entries are spans without a parent, spans whose parent is not in
/// the input, and spans on a parent cycle. Top-level entries and each child
/// list keep input order. Every input span appears exactly once.
pub fn build_forest<T: SpanLinks>(spans: Vec<T>) -> Vec<SpanNode<T>> {
    let n = spans.len();
    let mut parent_of = {
        let mut by_id: HashMap<&SpanId, usize> = HashMap::with_capacity(n);
        for (i, span) in spans.iter().enumerate() {
            by_id.entry(span.span_id()).or_insert(i);
        }
        spans
            .iter()
            .map(|s| s.parent_span_id().and_then(|p| by_id.get(p).copied()))
            .collect::<Vec<_>>()
    };

    break_cycles(&mut parent_of);

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut tops = Vec::new();
    for (i, parent) in parent_of.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => tops.push(i),
        }
    }

    // Post-order assembly so deep chains do not recurse.
    let mut slots: Vec<Option<T>> = spans.into_iter().map(Some).collect();
    let mut built: Vec<Option<SpanNode<T>>> = (0..n).map(|_| None).collect();
    for &top in &tops {
        let mut stack = vec![(top, false)];
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                let kids = children[i]
                    .iter()
                    .filter_map(|&c| built[c].take())
                    .collect();
                if let Some(span) = slots[i].take() {
                    built[i] = Some(SpanNode {
                        span,
                        children: kids,
                    });
                }
            } else {
                stack.push((i, true));
                stack.extend(children[i].iter().rev().map(|&c| (c, false)));
            }
        }
    }

    tops.into_iter().filter_map(|i| built[i].take()).collect()
}

/// Detaches every span that sits on a parent cycle, visiting in input order.
fn break_cycles(parent_of: &mut [Option<usize>]) {
    let mut state = vec![Visit::New; parent_of.len()];
    let mut path = Vec::new();

    for start in 0..parent_of.len() {
        let mut cur = Some(start);
        while let Some(i) = cur {
            match state[i] {
                Visit::Done => break,
                Visit::Walking => {
                    if let Some(pos) = path.iter().position(|&p| p == i) {
                        for &member in &path[pos..] {
                            parent_of[member] = None;
                        }
                    }
                    break;
                }
                Visit::New => {
                    state[i] = Visit::Walking;
                    path.push(i);
                    cur = parent_of[i];
                }
            }
        }
        for i in path.drain(..) {
            state[i] = Visit::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use pathwatch_core::model::span::{RawSpan, StatusCode};
    use testkit::raw_span;

    use super::*;

    fn shape(nodes: &[SpanNode<RawSpan>]) -> Vec<(String, Vec<String>)> {
        nodes
            .iter()
            .map(|n| {
                (
                    n.span.span_id.to_string(),
                    n.children
                        .iter()
                        .map(|c| c.span.span_id.to_string())
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn seed_trace_has_one_tree() {
        let forest = build_forest(testkit::seed_spans());
        assert_eq!(
            shape(&forest),
            vec![("a".to_string(), vec!["b".to_string(), "c".to_string()])]
        );
        assert_eq!(forest[0].subtree_size(), 3);
    }

    #[test]
    fn root_is_first_parentless_span() {
        let spans = vec![
            raw_span("t1", "b", Some("a"), 1, 2, StatusCode::Ok),
            raw_span("t1", "a", None, 0, 3, StatusCode::Ok),
            raw_span("t1", "z", None, 0, 3, StatusCode::Ok),
        ];
        assert_eq!(find_root(&spans).unwrap().span_id.as_str(), "a");
    }

    #[test]
    fn root_falls_back_to_first_span() {
        let spans = vec![
            raw_span("t1", "b", Some("x"), 1, 2, StatusCode::Ok),
            raw_span("t1", "c", Some("y"), 0, 3, StatusCode::Ok),
        ];
        assert_eq!(find_root(&spans).unwrap().span_id.as_str(), "b");
        let empty: Vec<RawSpan> = Vec::new();
        assert!(find_root(&empty).is_none());
    }

    #[test]
    fn orphans_become_top_level() {
        let spans = vec![
            raw_span("t1", "a", None, 0, 10, StatusCode::Ok),
            raw_span("t1", "o", Some("missing"), 1, 2, StatusCode::Ok),
            raw_span("t1", "b", Some("o"), 1, 2, StatusCode::Ok),
        ];
        let forest = build_forest(spans);
        assert_eq!(
            shape(&forest),
            vec![
                ("a".to_string(), vec![]),
                ("o".to_string(), vec!["b".to_string()]),
            ]
        );
    }

    #[test]
    fn cycles_are_promoted_without_losing_spans() {
        let spans = vec![
            raw_span("t1", "x", Some("y"), 0, 10, StatusCode::Ok),
            raw_span("t1", "y", Some("x"), 0, 10, StatusCode::Ok),
            raw_span("t1", "s", Some("s"), 0, 10, StatusCode::Ok),
            raw_span("t1", "k", Some("y"), 0, 10, StatusCode::Ok),
        ];
        let forest = build_forest(spans);
        let total: usize = forest.iter().map(SpanNode::subtree_size).sum();
        assert_eq!(total, 4);
        assert_eq!(
            shape(&forest),
            vec![
                ("x".to_string(), vec![]),
                ("y".to_string(), vec!["k".to_string()]),
                ("s".to_string(), vec![]),
            ]
        );
    }

    #[test]
    fn long_chain_builds_one_tree() {
        let mut spans = vec![raw_span("t1", "s0", None, 0, 1, StatusCode::Ok)];
        for i in 1..2_000 {
            let parent = format!("s{}", i - 1);
            spans.push(raw_span("t1", &format!("s{i}"), Some(&parent), 0, 1, StatusCode::Ok));
        }
        let forest = build_forest(spans);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].subtree_size(), 2_000);
    }

    #[test]
    fn empty_input_has_empty_forest() {
        assert!(build_forest(Vec::<RawSpan>::new()).is_empty());
    }
}
