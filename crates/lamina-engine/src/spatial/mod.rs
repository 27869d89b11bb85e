//! Spatial index answering "what intersects this area".

mod quadtree;

pub use quadtree::{QuadTree, QuadTreeConfig};
