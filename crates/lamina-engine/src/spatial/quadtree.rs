use std::collections::HashMap;
use std::hash::Hash;

use crate::coords::Aabb;
use crate::error::{RenderError, RenderResult};

/// Quadtree tuning.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadTreeConfig {
    /// Objects a leaf holds directly before it subdivides.
    pub node_capacity: usize,
    /// Nodes at this depth never subdivide; crowded boxes stay in the node.
    pub max_depth: u32,
    /// Root coverage before the first rebuild.
    pub initial_region: Aabb,
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self {
            node_capacity: 8,
            max_depth: 10,
            initial_region: Aabb::new(-2048.0, -2048.0, 2048.0, 2048.0),
        }
    }
}

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
struct Node<K> {
    region: Aabb,
    depth: u32,
    items: Vec<(K, Aabb)>,
    children: Option<[NodeId; 4]>,
}

impl<K> Node<K> {
    fn new(region: Aabb, depth: u32) -> Self {
        Self { region, depth, items: Vec::new(), children: None }
    }
}

/// Mutable spatial index over keyed bounding boxes.
///
/// Nodes live in an arena addressed by index. Each object sits in the deepest
/// node whose region fully contains its box; `locations` maps a key to that node
/// so removal never searches the tree.
///
/// Objects outside the root region are still stored (at the root) and still
/// returned by queries; the owner is expected to [`rebuild`](Self::rebuild)
/// with a larger region so they stop piling up there.
#[derive(Debug, Clone)]
pub struct QuadTree<K> {
    config: QuadTreeConfig,
    nodes: Vec<Node<K>>,
    locations: HashMap<K, NodeId>,
}

impl<K: Copy + Eq + Hash> QuadTree<K> {
    pub fn new(config: QuadTreeConfig) -> Self {
        let capacity = config.node_capacity.max(1);
        let config = QuadTreeConfig { node_capacity: capacity, ..config };
        Self {
            nodes: vec![Node::new(config.initial_region, 0)],
            locations: HashMap::new(),
            config,
        }
    }

    #[inline]
    pub fn region(&self) -> Aabb {
        self.nodes[ROOT].region
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    #[inline]
    pub fn contains_key(&self, key: K) -> bool {
        self.locations.contains_key(&key)
    }

    /// Deepest level currently allocated (root is 0).
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Box the index holds for `key`.
    pub fn bounds_of(&self, key: K) -> Option<Aabb> {
        let node = *self.locations.get(&key)?;
        self.nodes[node]
            .items
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, b)| *b)
    }

    /// `true` when `other` lies inside the root region.
    #[inline]
    pub fn contains_region(&self, other: Aabb) -> bool {
        self.region().contains_box(other)
    }

    /// Inserts (or re-inserts) `key` with `bounds`.
    ///
    /// Non-finite boxes are refused so they cannot poison later queries.
    pub fn insert(&mut self, key: K, bounds: Aabb) -> RenderResult<()> {
        if let Some(field) = bounds.first_non_finite_field() {
            return Err(RenderError::InvalidGeometry {
                what: "quadtree insert".to_owned(),
                detail: format!("bounding box field `{field}` is not finite: {bounds:?}"),
            });
        }

        self.remove(key);

        let mut node = ROOT;
        loop {
            if let Some(children) = self.nodes[node].children {
                match children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].region.contains_box(bounds))
                {
                    Some(child) => {
                        node = child;
                        continue;
                    }
                    None => break,
                }
            }

            let n = &self.nodes[node];
            let crowded = n.items.len() >= self.config.node_capacity;
            let can_split = n.depth < self.config.max_depth && n.region.is_valid();
            if crowded && can_split && node_region_fits_child(n.region, bounds) {
                self.subdivide(node);
                continue;
            }
            break;
        }

        self.nodes[node].items.push((key, bounds));
        self.locations.insert(key, node);
        Ok(())
    }

    /// Removes `key`. Returns `false` (and does nothing) if it is not indexed.
    pub fn remove(&mut self, key: K) -> bool {
        let Some(node) = self.locations.remove(&key) else {
            return false;
        };
        let items = &mut self.nodes[node].items;
        if let Some(pos) = items.iter().position(|(k, _)| *k == key) {
            items.swap_remove(pos);
        }
        true
    }

    /// Calls `visit` for every object whose box intersects `area`.
    ///
    /// Does not allocate.
    pub fn query<F: FnMut(K, Aabb)>(&self, area: Aabb, mut visit: F) {
        if area.is_empty() {
            return;
        }
        // Root items are always checked: they include anything outside coverage.
        self.visit_node(ROOT, area, &mut visit);
    }

    /// Keys of every object whose box intersects `area`.
    pub fn query_area(&self, area: Aabb) -> Vec<K> {
        let mut out = Vec::new();
        self.query(area, |k, _| out.push(k));
        out
    }

    /// Replaces the tree with a fresh one covering `region` and re-inserts every
    /// object. The old arena stays untouched until the new one is complete.
    pub fn rebuild(&mut self, region: Aabb) {
        let mut fresh = QuadTree::new(QuadTreeConfig { initial_region: region, ..self.config });
        for node in &self.nodes {
            for &(key, bounds) in &node.items {
                // Boxes were validated on their first insert.
                let _ = fresh.insert(key, bounds);
            }
        }
        log::debug!(
            "quadtree rebuilt: {} objects, region {:?} -> {:?}",
            fresh.len(),
            self.region(),
            region
        );
        *self = fresh;
    }

    pub fn clear(&mut self) {
        let region = self.region();
        self.nodes.clear();
        self.nodes.push(Node::new(region, 0));
        self.locations.clear();
    }

    fn visit_node<F: FnMut(K, Aabb)>(&self, node: NodeId, area: Aabb, visit: &mut F) {
        let n = &self.nodes[node];
        for &(key, bounds) in &n.items {
            if bounds.intersects(area) {
                visit(key, bounds);
            }
        }
        if let Some(children) = n.children {
            for child in children {
                // Child items are fully inside the child region, so this prune is exact.
                if self.nodes[child].region.intersects(area) {
                    self.visit_node(child, area, visit);
                }
            }
        }
    }

    fn subdivide(&mut self, node: NodeId) {
        let region = self.nodes[node].region;
        let depth = self.nodes[node].depth + 1;
        let c = region.center();

        let quads = [
            Aabb::new(region.min_x, region.min_y, c.x, c.y),
            Aabb::new(c.x, region.min_y, region.max_x, c.y),
            Aabb::new(region.min_x, c.y, c.x, region.max_y),
            Aabb::new(c.x, c.y, region.max_x, region.max_y),
        ];

        let first = self.nodes.len();
        for q in quads {
            self.nodes.push(Node::new(q, depth));
        }
        let children = [first, first + 1, first + 2, first + 3];
        self.nodes[node].children = Some(children);

        // Push existing items down where they fit; straddlers stay.
        let items = std::mem::take(&mut self.nodes[node].items);
        for (key, bounds) in items {
            let target = children
                .iter()
                .copied()
                .find(|&ch| self.nodes[ch].region.contains_box(bounds))
                .unwrap_or(node);
            self.nodes[target].items.push((key, bounds));
            self.locations.insert(key, target);
        }
    }
}

/// Splitting only helps when the box could land in one quadrant.
fn node_region_fits_child(region: Aabb, bounds: Aabb) -> bool {
    let half = region.size() * 0.5;
    region.contains_box(bounds) && bounds.width() <= half.x && bounds.height() <= half.y
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn tree() -> QuadTree<u32> {
        QuadTree::new(QuadTreeConfig {
            node_capacity: 4,
            max_depth: 8,
            initial_region: Aabb::new(0.0, 0.0, 1000.0, 1000.0),
        })
    }

    fn random_box(rng: &mut StdRng, extent: f32) -> Aabb {
        let x = rng.gen_range(-extent * 0.1..extent);
        let y = rng.gen_range(-extent * 0.1..extent);
        let w = rng.gen_range(0.5..extent * 0.1);
        let h = rng.gen_range(0.5..extent * 0.1);
        Aabb::new(x, y, x + w, y + h)
    }

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn query_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut qt = tree();
        let boxes: Vec<Aabb> = (0..500).map(|_| random_box(&mut rng, 1000.0)).collect();
        for (i, b) in boxes.iter().enumerate() {
            qt.insert(i as u32, *b).unwrap();
        }
        assert!(qt.depth() > 0, "500 objects with capacity 4 must subdivide");

        for _ in 0..200 {
            let area = random_box(&mut rng, 1000.0).scaled_about_center(3.0);
            let expected: Vec<u32> = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.intersects(area))
                .map(|(i, _)| i as u32)
                .collect();
            assert_eq!(sorted(qt.query_area(area)), expected);
        }
    }

    #[test]
    fn remove_then_reinsert_matches_never_removed() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut a = tree();
        let mut b = tree();
        let boxes: Vec<Aabb> = (0..120).map(|_| random_box(&mut rng, 1000.0)).collect();
        for (i, bx) in boxes.iter().enumerate() {
            a.insert(i as u32, *bx).unwrap();
            b.insert(i as u32, *bx).unwrap();
        }
        for i in (0..120).step_by(3) {
            assert!(b.remove(i));
        }
        for i in (0..120).step_by(3) {
            b.insert(i, boxes[i as usize]).unwrap();
        }
        for _ in 0..50 {
            let area = random_box(&mut rng, 1000.0).scaled_about_center(4.0);
            assert_eq!(sorted(a.query_area(area)), sorted(b.query_area(area)));
        }
    }

    #[test]
    fn removing_unknown_key_is_a_no_op() {
        let mut qt = tree();
        assert!(!qt.remove(42));
        qt.insert(1, Aabb::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert!(qt.remove(1));
        assert!(!qt.remove(1));
        assert!(qt.is_empty());
    }

    #[test]
    fn leaves_split_only_past_capacity() {
        let mut qt = tree();
        for i in 0..4 {
            qt.insert(i, Aabb::new(10.0 * i as f32, 0.0, 10.0 * i as f32 + 5.0, 5.0)).unwrap();
        }
        assert_eq!(qt.depth(), 0);
        qt.insert(4, Aabb::new(900.0, 900.0, 905.0, 905.0)).unwrap();
        assert!(qt.depth() >= 1);
    }

    #[test]
    fn straddling_boxes_stay_high() {
        let mut qt = tree();
        for i in 0..10 {
            // Crosses the root center on both axes.
            qt.insert(i, Aabb::new(490.0, 490.0, 510.0, 510.0)).unwrap();
        }
        assert_eq!(qt.query_area(Aabb::new(499.0, 499.0, 501.0, 501.0)).len(), 10);
    }

    #[test]
    fn non_finite_boxes_are_refused() {
        let mut qt = tree();
        let err = qt.insert(1, Aabb::new(f32::NAN, 0.0, 1.0, 1.0));
        assert!(matches!(err, Err(RenderError::InvalidGeometry { .. })));
        assert!(qt.is_empty());
    }

    #[test]
    fn objects_outside_region_are_still_found() {
        let mut qt = tree();
        qt.insert(9, Aabb::new(5000.0, 5000.0, 5010.0, 5010.0)).unwrap();
        assert!(!qt.contains_region(Aabb::new(5000.0, 5000.0, 5010.0, 5010.0)));
        assert_eq!(qt.query_area(Aabb::new(5005.0, 5005.0, 5006.0, 5006.0)), vec![9]);
    }

    #[test]
    fn rebuild_preserves_contents() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut qt = tree();
        for i in 0..200 {
            qt.insert(i, random_box(&mut rng, 1000.0)).unwrap();
        }
        let area = Aabb::new(100.0, 100.0, 600.0, 600.0);
        let before = sorted(qt.query_area(area));
        qt.rebuild(Aabb::new(-3000.0, -3000.0, 3000.0, 3000.0));
        assert_eq!(qt.len(), 200);
        assert_eq!(sorted(qt.query_area(area)), before);
    }

    #[test]
    fn reinserting_a_key_moves_it() {
        let mut qt = tree();
        qt.insert(1, Aabb::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        qt.insert(1, Aabb::new(500.0, 500.0, 510.0, 510.0)).unwrap();
        assert_eq!(qt.len(), 1);
        assert!(qt.query_area(Aabb::new(0.0, 0.0, 20.0, 20.0)).is_empty());
        assert_eq!(qt.bounds_of(1), Some(Aabb::new(500.0, 500.0, 510.0, 510.0)));
    }
}
