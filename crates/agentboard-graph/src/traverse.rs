use std::collections::{HashSet, VecDeque};

/// Ids reachable from `center` within `max_depth` hops, `center` included.
///
/// `neighbors` yields the undirected neighbours of a node.
pub fn neighborhood<F, I>(center: &str, max_depth: usize, mut neighbors: F) -> HashSet<String>
where
    F: FnMut(&str) -> I,
    I: IntoIterator<Item = String>,
{
    let mut visited = HashSet::new();
    visited.insert(center.to_string());

    let mut queue = VecDeque::new();
    queue.push_back((center.to_string(), 0usize));

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for next in neighbors(&current) {
            if visited.insert(next.clone()) {
                queue.push_back((next, depth + 1));
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn chain() -> HashMap<&'static str, Vec<&'static str>> {
        HashMap::from([
            ("a", vec!["b"]),
            ("b", vec!["a", "c"]),
            ("c", vec!["b", "d"]),
            ("d", vec!["c"]),
            ("x", vec![]),
        ])
    }

    fn lookup<'a>(
        graph: &'a HashMap<&'static str, Vec<&'static str>>,
    ) -> impl FnMut(&str) -> Vec<String> + 'a {
        move |id| {
            graph
                .get(id)
                .map(|n| n.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default()
        }
    }

    #[test]
    fn bfs_respects_depth() {
        let graph = chain();
        let one = neighborhood("a", 1, lookup(&graph));
        assert_eq!(one.len(), 2);
        let two = neighborhood("b", 2, lookup(&graph));
        assert_eq!(two, HashSet::from(["a", "b", "c", "d"].map(String::from)));
        let isolated = neighborhood("x", 5, lookup(&graph));
        assert_eq!(isolated.len(), 1);
    }
}
