//! Depth-bounded CART tree over the single dryness feature.
//!
//! Splits minimise weighted Gini impurity; leaves store the weighted fire
//! fraction. Nodes live in a flat arena so the tree serialises as a plain list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf { fire_probability: f32 },
    /// `x <= threshold` goes left.
    Split { threshold: f32, left: usize, right: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self { max_depth: 4, min_samples_split: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

#[inline]
fn gini(w0: f64, w1: f64) -> f64 {
    let w = w0 + w1;
    if w <= 0.0 {
        0.0
    } else {
        1.0 - (w0 * w0 + w1 * w1) / (w * w)
    }
}

struct Builder<'a> {
    x: &'a [f32],
    y: &'a [u8],
    w: &'a [f64],
    params: TreeParams,
    nodes: Vec<Node>,
}

impl Builder<'_> {
    fn class_weights(&self, idx: &[usize]) -> (f64, f64) {
        idx.iter().fold((0.0, 0.0), |(w0, w1), &i| {
            if self.y[i] == 0 { (w0 + self.w[i], w1) } else { (w0, w1 + self.w[i]) }
        })
    }

    fn leaf(&mut self, w0: f64, w1: f64) -> usize {
        let total = w0 + w1;
        let p = if total > 0.0 { (w1 / total) as f32 } else { 0.0 };
        self.nodes.push(Node::Leaf { fire_probability: p });
        self.nodes.len() - 1
    }

    /// `idx` is sorted by feature value; both halves of a split stay sorted.
    fn build(&mut self, idx: &[usize], depth: usize) -> usize {
        let (w0, w1) = self.class_weights(idx);
        if depth >= self.params.max_depth || idx.len() < self.params.min_samples_split || w0 <= 0.0 || w1 <= 0.0 {
            return self.leaf(w0, w1);
        }

        let total = w0 + w1;
        let parent = gini(w0, w1);
        let mut best: Option<(f64, usize)> = None;
        let (mut l0, mut l1) = (0.0, 0.0);
        for k in 0..idx.len() - 1 {
            let i = idx[k];
            if self.y[i] == 0 { l0 += self.w[i] } else { l1 += self.w[i] }
            if self.x[i] == self.x[idx[k + 1]] {
                continue;
            }
            let (r0, r1) = (w0 - l0, w1 - l1);
            let impurity = ((l0 + l1) * gini(l0, l1) + (r0 + r1) * gini(r0, r1)) / total;
            if best.map_or(true, |(b, _)| impurity < b) {
                best = Some((impurity, k));
            }
        }

        match best {
            Some((impurity, k)) if impurity < parent - 1e-12 => {
                let threshold = 0.5 * (self.x[idx[k]] + self.x[idx[k + 1]]);
                let me = self.leaf(w0, w1);
                let left = self.build(&idx[..=k], depth + 1);
                let right = self.build(&idx[k + 1..], depth + 1);
                self.nodes[me] = Node::Split { threshold, left, right };
                me
            }
            _ => self.leaf(w0, w1),
        }
    }
}

impl DecisionTree {
    /// Fit on `(x, y)` with per-row `weights`; rows of zero weight are ignored.
    pub fn fit(x: &[f32], y: &[u8], weights: &[f64], params: TreeParams) -> Self {
        let mut idx: Vec<usize> = (0..x.len()).filter(|&i| weights[i] > 0.0 && x[i].is_finite()).collect();
        idx.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

        let mut builder = Builder { x, y, w: weights, params, nodes: Vec::new() };
        if idx.is_empty() {
            builder.leaf(0.0, 0.0);
        } else {
            builder.build(&idx, 0);
        }
        Self { nodes: builder.nodes }
    }

    /// Weighted fire fraction of the leaf `x` falls into.
    pub fn predict_proba(&self, x: f32) -> f32 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf { fire_probability } => return fire_probability,
                Node::Split { threshold, left, right } => {
                    at = if x <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], at: usize) -> usize {
            match nodes[at] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}
