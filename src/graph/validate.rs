//! Structural checks on the inferred dependency edges
//!
//! `deps[i]` lists the nodes node `i` depends on (arena indices).

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Result, StackError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Fail with `CyclicDependency` (reporting one cycle path) if any exists
///
/// Roots are visited in `visit_order` so the reported cycle is stable.
pub(crate) fn detect_cycles(
    names: &[Arc<str>],
    deps: &[Vec<usize>],
    visit_order: &[usize],
) -> Result<()> {
    fn dfs(
        node: usize,
        names: &[Arc<str>],
        deps: &[Vec<usize>],
        colors: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> std::result::Result<(), String> {
        colors[node] = Color::Gray;
        stack.push(node);

        for &next in &deps[node] {
            match colors[next] {
                Color::Gray => {
                    // Gray means `next` is on the current path.
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let cycle: Vec<&str> = stack[start..].iter().map(|&n| names[n].as_ref()).collect();
                    return Err(format!("{} → {}", cycle.join(" → "), names[next]));
                }
                Color::White => dfs(next, names, deps, colors, stack)?,
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        Ok(())
    }

    let mut colors = vec![Color::White; names.len()];
    let mut stack = Vec::new();

    for &root in visit_order {
        if colors[root] == Color::White {
            dfs(root, names, deps, &mut colors, &mut stack)
                .map_err(|cycle| StackError::CyclicDependency { cycle })?;
        }
    }

    Ok(())
}

/// Kahn's algorithm; ties broken by `rank` (declaration order)
///
/// Must only be called on an acyclic graph.
pub(crate) fn topological_order(rank: &[usize], deps: &[Vec<usize>]) -> Vec<usize> {
    let len = deps.len();
    let mut remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); len];
    for (node, node_deps) in deps.iter().enumerate() {
        for &dep in node_deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = (0..len)
        .filter(|&n| remaining[n] == 0)
        .map(|n| (rank[n], n))
        .collect();
    let mut order = Vec::with_capacity(len);

    while let Some((rank_n, node)) = ready.iter().next().copied() {
        ready.remove(&(rank_n, node));
        order.push(node);
        for &next in &dependents[node] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.insert((rank[next], next));
            }
        }
    }

    order
}
