//!
//! # Nets21 Hierarchical Shape-Connectivity Engine
//!
//! Computes electrical nets from geometric shapes across a cell hierarchy,
//! without flattening. Given a [Layout] of cells carrying layer-tagged
//! shapes and a [Connectivity] relation describing which layers join where
//! they touch, [HierClusters::build] produces, per cell, the maximal sets of
//! connected shapes ([LocalClusters]) plus the connection edges that link a
//! parent cluster into its child instances' clusters
//! ([ConnectedClusters]): a shared, hierarchical representation of nets.
//!
//! Built trees are consumed read-only through the recursive iterators
//! ([RecursiveClusterShapeIterator], [RecursiveClusterIterator]), the
//! reverse index [IncomingClusterConnections], or exported back into the
//! layout as flat per-net layers via
//! [return_to_hierarchy](HierClusters::return_to_hierarchy).
//!
//! ## Usage
//!
//! ```
//! use nets21::{
//!     Connectivity, HierClusters, Instance, Layout, Point, Rect, Shape, ShapeFlags, Transform,
//! };
//!
//! // A leaf cell with one square, instantiated twice, overlapping
//! let mut layout = Layout::new("lib");
//! let leaf = layout.add_cell("leaf");
//! let top = layout.add_cell("top");
//! layout.add_shape(
//!     leaf,
//!     1,
//!     Shape::Rect(Rect::new(Point::new(0, 0), Point::new(10, 10))),
//! );
//! layout.add_inst(top, Instance::single(leaf, Transform::identity()));
//! layout.add_inst(top, Instance::single(leaf, Transform::translate(5., 0.)));
//!
//! // Shapes on layer 1 connect where they touch
//! let mut conn = Connectivity::new();
//! conn.connect_self(1);
//!
//! let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn).unwrap();
//! assert_eq!(tree.clusters_per_cell(top).all_ids().len(), 1);
//! ```
//!

pub mod bbox;
pub mod cluster;
pub mod connectivity;
pub mod error;
pub mod geom;
pub mod hier;
pub mod iter;
pub mod layout;
pub mod scan;

#[cfg(test)]
mod tests;

/// # Location Integer Type-Alias
///
/// Used for all layout spatial coordinates.
/// Designed for quickly swapping to other integer types, if we so desire.
///
pub type Int = isize;

// Re-exports
pub use bbox::{BoundBox, BoundBoxTrait};
pub use cluster::{ClusterId, LocalCluster, LocalClusters};
pub use connectivity::Connectivity;
pub use error::{NetsError, NetsResult};
pub use geom::{
    shapes_interact, Point, Polygon, Rect, Shape, ShapeTrait, Transform, TransformTrait,
};
pub use hier::{
    CellClustersBoxConverter, ClusterInstance, ConnectedClusters, HierClusters, NoProgress,
    ProgressSink, DEFAULT_AREA_RATIO,
};
pub use iter::{
    IncomingClusterConnections, IncomingClusterInstance, RecursiveClusterIterator,
    RecursiveClusterShapeIterator,
};
pub use layout::{
    ArrayIndex, AttrId, Cell, CellIndex, Element, InstElement, InstId, Instance, Layer, LayerId,
    LayerKey, Layers, Layout, ParentInst, ShapeFlags, Units,
};
pub use scan::{BoxScanner, BoxScanner2, ScanReceiver, ScanReceiver2};
