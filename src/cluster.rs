//!
//! # Local Shape Clusters
//!
//! A [LocalCluster] is a maximal set of connected shapes within one cell,
//! ignoring hierarchy. [LocalClusters] is the per-cell collection, with
//! stable one-based ids: slots are cleared on removal, never shifted, so ids
//! and references stay valid for the lifetime of a build.
//!
//! Clustering itself ([LocalClusters::build_clusters]) runs every selected
//! shape of a cell through a box scanner and unions touching, connected
//! shapes into clusters.
//!
//! Mutations mark a cluster dirty; [ensure_sorted](LocalCluster::ensure_sorted)
//! re-sorts the per-layer shape lists by bounding box and recomputes the
//! cached box. Callers sort at the end of every mutation batch, so the query
//! methods take `&self`.
//!

// Std-Lib
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::{
    bbox::{BoundBox, BoundBoxTrait},
    connectivity::Connectivity,
    layout::{AttrId, Cell, CellIndex, LayerId, Layout, ShapeFlags},
    geom::{Shape, Transform},
    scan::{BoxScanner, BoxScanner2, ScanReceiver, ScanReceiver2},
};

/// # Cluster Identifier Type-Alias
///
/// One-based within a cell; zero means "nil". Ids above a collection's slot
/// range are "dummy" connector ids with no shapes of their own.
pub type ClusterId = usize;

/// # Local Shape Cluster
///
/// Per-layer shape lists, the attribute ids carried over from the input
/// shapes, and a cached bounding box.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCluster {
    id: ClusterId,
    shapes: BTreeMap<LayerId, Vec<Shape>>,
    attrs: BTreeSet<AttrId>,
    bbox: BoundBox,
    size: usize,
    needs_update: bool,
}
impl LocalCluster {
    /// Create a new, empty cluster with identifier `id`
    pub fn new(id: ClusterId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
    /// Our identifier
    pub fn id(&self) -> ClusterId {
        self.id
    }
    pub(crate) fn set_id(&mut self, id: ClusterId) {
        self.id = id;
    }
    /// Total shape count
    pub fn size(&self) -> usize {
        self.size
    }
    /// The cached bounding box. Valid after [ensure_sorted](Self::ensure_sorted).
    pub fn bbox(&self) -> BoundBox {
        self.bbox
    }
    /// The attribute ids collected from our shapes
    pub fn attrs(&self) -> &BTreeSet<AttrId> {
        &self.attrs
    }
    /// Drop all shapes and attributes, keeping the identifier
    pub fn clear(&mut self) {
        self.shapes.clear();
        self.attrs.clear();
        self.bbox = BoundBox::empty();
        self.size = 0;
        self.needs_update = false;
    }
    /// Record a non-zero attribute id
    pub fn add_attr(&mut self, attr: AttrId) {
        if attr > 0 {
            self.attrs.insert(attr);
        }
    }
    /// Append a shape on `layer`
    pub fn add(&mut self, shape: Shape, layer: LayerId) {
        self.shapes.entry(layer).or_default().push(shape);
        self.needs_update = true;
        self.size += 1;
    }
    /// Merge `other`'s shapes, attributes, and size into ourselves
    pub fn join_with(&mut self, other: &LocalCluster) {
        for (layer, shapes) in &other.shapes {
            self.shapes
                .entry(*layer)
                .or_default()
                .extend(shapes.iter().cloned());
        }
        self.attrs.extend(other.attrs.iter().copied());
        self.size += other.size;
        self.needs_update = true;
    }
    /// Idempotently sort the per-layer shape lists by bounding box and
    /// recompute the cached bounding box
    pub fn ensure_sorted(&mut self) {
        if !self.needs_update {
            return;
        }
        for shapes in self.shapes.values_mut() {
            shapes.sort_by(|a, b| {
                let (ba, bb) = (a.bbox(), b.bbox());
                (ba.p0, ba.p1).cmp(&(bb.p0, bb.p1))
            });
        }
        let mut bbox = BoundBox::empty();
        for shapes in self.shapes.values() {
            for s in shapes {
                bbox = s.union(&bbox);
            }
        }
        self.bbox = bbox;
        self.needs_update = false;
    }
    /// The shapes on `layer`, empty if the layer is unpopulated
    pub fn begin(&self, layer: LayerId) -> &[Shape] {
        self.shapes.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }
    /// The populated layers, in increasing order
    pub fn layers(&self) -> Vec<LayerId> {
        self.shapes.keys().copied().collect()
    }
    /// The shapes on `layer` whose bounding box touches `region`
    pub fn shapes_touching<'a>(
        &'a self,
        layer: LayerId,
        region: &'a BoundBox,
    ) -> impl Iterator<Item = &'a Shape> + 'a {
        self.begin(layer).iter().filter(|s| s.bbox().touches(region))
    }

    /// # Cell-Level Interaction Probe
    ///
    /// A cheap test of whether any of our shapes can possibly interact with
    /// the (hierarchical) contents of `cell`, placed by `trans` relative to
    /// our own coordinates: per layer, our shapes are tested against the
    /// union of the cell's boxes over the connected layers.
    pub fn interacts_cell(
        &self,
        layout: &Layout,
        cell: CellIndex,
        trans: &Transform,
        conn: &Connectivity,
    ) -> bool {
        for layer in self.shapes.keys() {
            let mut bbox = BoundBox::empty();
            for other in conn.connected(*layer) {
                bbox = layout.cell_layer_bbox(cell, *other).union(&bbox);
            }
            if bbox.is_empty() {
                continue;
            }
            let region = bbox.transformed(trans);
            if self.shapes_touching(*layer, &region).next().is_some() {
                return true;
            }
        }
        false
    }

    /// # Detailed Cluster-Cluster Interaction Test
    ///
    /// Whether any of our shapes interacts, per `conn`, with any shape of
    /// `other` placed by `trans`. Both clusters must be sorted. The test
    /// narrows to the common region, prunes on per-side touched layers and
    /// their connectivity, and only then runs a two-set box scan that stops
    /// at the first interacting pair.
    pub fn interacts(
        &self,
        other: &LocalCluster,
        trans: &Transform,
        conn: &Connectivity,
    ) -> bool {
        let common = other.bbox().transformed(trans).intersection(&self.bbox());
        if common.is_empty() {
            return false;
        }
        let common_for_other = common.transformed(&trans.invert());

        // Shortcut evaluation for disjunct layers
        let ll1: BTreeSet<LayerId> = self
            .shapes
            .keys()
            .copied()
            .filter(|l| self.shapes_touching(*l, &common).next().is_some())
            .collect();
        if ll1.is_empty() {
            return false;
        }
        let ll2: BTreeSet<LayerId> = other
            .shapes
            .keys()
            .copied()
            .filter(|l| other.shapes_touching(*l, &common_for_other).next().is_some())
            .collect();
        if ll2.is_empty() {
            return false;
        }
        if !ll1
            .iter()
            .any(|l1| conn.connected(*l1).iter().any(|l2| ll2.contains(l2)))
        {
            return false;
        }

        // Detailed analysis
        let mut scanner: BoxScanner2<(&Shape, LayerId), (&Shape, LayerId)> = BoxScanner2::new();
        for l in &ll1 {
            for s in self.shapes_touching(*l, &common) {
                scanner.insert1(s.bbox(), (s, *l));
            }
        }
        for l in &ll2 {
            for s in other.shapes_touching(*l, &common_for_other) {
                scanner.insert2(s.bbox().transformed(trans), (s, *l));
            }
        }

        struct InteractionReceiver<'c> {
            conn: &'c Connectivity,
            trans: &'c Transform,
            any: bool,
        }
        impl<'c, 's> ScanReceiver2<(&'s Shape, LayerId), (&'s Shape, LayerId)>
            for InteractionReceiver<'c>
        {
            fn add(&mut self, a: &(&'s Shape, LayerId), b: &(&'s Shape, LayerId)) {
                if self.conn.interacts(a.0, a.1, b.0, b.1, self.trans) {
                    self.any = true;
                }
            }
            fn stop(&self) -> bool {
                self.any
            }
        }
        let mut rec = InteractionReceiver {
            conn,
            trans,
            any: false,
        };
        !scanner.process(&mut rec)
    }

    /// The ratio of our bounding-box area to the sum of our shapes' bounding
    /// box areas. Zero for empty clusters. A large ratio signals much dead
    /// space in the cluster's box, and drives [split](Self::split).
    pub fn area_ratio(&self) -> f64 {
        let bx = self.bbox();
        if bx.is_empty() {
            return 0.0;
        }
        let mut a: i128 = 0;
        for shapes in self.shapes.values() {
            for s in shapes {
                a += s.bbox().area();
            }
        }
        if a == 0 {
            0.0
        } else {
            bx.area() as f64 / a as f64
        }
    }

    /// # Area-Ratio Split
    ///
    /// If our area ratio reaches `max_area_ratio`, bisect along the longer
    /// box axis at the center, partition shapes by their box centers, recurse
    /// on both halves, and emit the resulting pieces into `out`. Every piece
    /// keeps our identifier; splits are transient query-side optimizations.
    /// Returns the number of pieces emitted; zero means "use the original".
    pub fn split(&self, max_area_ratio: f64, out: &mut Vec<LocalCluster>) -> usize {
        if self.area_ratio() < max_area_ratio {
            return 0;
        }

        let bx = self.bbox();
        // Split along the longer axis at the box center. The inactive axis
        // threshold sits at the box edge, where no shape center can fall below it.
        let (xthr, ythr) = if bx.width() > bx.height() {
            (bx.center().x, bx.p0.y)
        } else {
            (bx.p0.x, bx.center().y)
        };

        let mut a = LocalCluster::new(self.id);
        let mut b = LocalCluster::new(self.id);
        for layer in self.layers() {
            for s in self.begin(layer) {
                let sc = s.bbox().center();
                if sc.x < xthr || sc.y < ythr {
                    a.add(s.clone(), layer);
                } else {
                    b.add(s.clone(), layer);
                }
            }
        }

        if a.size() == 0 || b.size() == 0 {
            // Give up to prevent infinite recursion
            return 0;
        }
        a.ensure_sorted();
        b.ensure_sorted();

        // Split further if required
        let mut na = a.split(max_area_ratio, out);
        let mut nb = b.split(max_area_ratio, out);
        if na == 0 {
            out.push(a);
            na = 1;
        }
        if nb == 0 {
            out.push(b);
            nb = 1;
        }
        na + nb
    }
}

/// Shared empty cluster returned for dummy-id lookups
fn empty_cluster() -> &'static LocalCluster {
    static EMPTY: OnceLock<LocalCluster> = OnceLock::new();
    EMPTY.get_or_init(LocalCluster::default)
}

/// # Per-Cell Cluster Collection
///
/// An indexed container of [LocalCluster]s. A cluster's id equals its
/// one-based slot index and never changes: removal clears the slot in place.
/// A monotone counter allocates "dummy" ids above the slot range for
/// shape-less connector clusters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalClusters {
    clusters: Vec<LocalCluster>,
    bbox: BoundBox,
    needs_update: bool,
    next_dummy_id: usize,
}
impl LocalClusters {
    /// Create a new, empty collection
    pub fn new() -> Self {
        Self::default()
    }
    /// Drop everything, including the dummy-id counter
    pub fn clear(&mut self) {
        self.clusters.clear();
        self.bbox = BoundBox::empty();
        self.needs_update = false;
        self.next_dummy_id = 0;
    }
    /// Number of slots (live and cleared)
    pub fn len(&self) -> usize {
        self.clusters.len()
    }
    /// Boolean indication of a slot-less collection
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
    /// The collection's bounding box. Valid after [ensure_sorted](Self::ensure_sorted).
    pub fn bbox(&self) -> BoundBox {
        self.bbox
    }
    /// The cluster with identifier `id`. Dummy ids above the slot range
    /// resolve to a shared empty cluster. `id` must be non-zero.
    pub fn cluster_by_id(&self, id: ClusterId) -> &LocalCluster {
        assert!(id > 0, "cluster id 0 is nil");
        if id > self.clusters.len() {
            // Dummy connectors carry no shapes; treat them as empty
            empty_cluster()
        } else {
            // By convention the id is the slot index + 1, so 0 can be "nil"
            &self.clusters[id - 1]
        }
    }
    /// Clear the slot of `id` in place. Out-of-range and nil ids are no-ops.
    pub fn remove_cluster(&mut self, id: ClusterId) {
        if id == 0 || id > self.clusters.len() {
            return;
        }
        // Slots are cleared, not removed, so ids never shift
        self.clusters[id - 1].clear();
        self.needs_update = true;
    }
    /// Merge the shapes of `with_id` into `id` and clear `with_id`'s slot.
    /// No-op if either id is outside the slot range; `id` must be non-zero.
    pub fn join_cluster_with(&mut self, id: ClusterId, with_id: ClusterId) {
        assert!(id > 0, "cluster id 0 is nil");
        if with_id == 0 || with_id > self.clusters.len() || id > self.clusters.len() {
            return;
        }
        let other = std::mem::replace(&mut self.clusters[with_id - 1], LocalCluster::new(with_id));
        self.clusters[id - 1].join_with(&other);
        self.needs_update = true;
    }
    /// Insert a new, empty cluster; its id is its one-based slot index
    pub fn insert(&mut self) -> &mut LocalCluster {
        let id = self.clusters.len() + 1;
        self.clusters.push(LocalCluster::new(id));
        self.needs_update = true;
        self.clusters.last_mut().unwrap()
    }
    /// Allocate a fresh dummy id above the slot range. Dummy ids own no
    /// slot, but may own connections at the [ConnectedClusters] level.
    pub fn insert_dummy(&mut self) -> ClusterId {
        self.next_dummy_id += 1;
        self.clusters.len() + self.next_dummy_id
    }
    /// Sort every cluster and recompute the collection bounding box
    pub fn ensure_sorted(&mut self) {
        if !self.needs_update {
            return;
        }
        let mut bbox = BoundBox::empty();
        for c in self.clusters.iter_mut() {
            c.ensure_sorted();
            bbox = c.bbox().union(&bbox);
        }
        self.bbox = bbox;
        self.needs_update = false;
    }
    /// Every slot, cleared ones included
    pub fn iter(&self) -> impl Iterator<Item = &LocalCluster> {
        self.clusters.iter()
    }
    /// The clusters whose bounding box touches `region`
    pub fn clusters_touching<'a>(
        &'a self,
        region: &'a BoundBox,
    ) -> impl Iterator<Item = &'a LocalCluster> + 'a {
        self.clusters.iter().filter(|c| c.bbox().touches(region))
    }

    /// # Local Clustering
    ///
    /// Feed every selected shape on every registered layer of `cell` through
    /// a box scanner, union touching connected shapes, and emit the resulting
    /// clusters into this collection. Shapes that pair with nothing become
    /// singleton clusters. Attribute ids are carried onto their clusters.
    pub fn build_clusters(&mut self, cell: &Cell, shape_flags: ShapeFlags, conn: &Connectivity) {
        // Gather the selected shapes of all registered layers
        let mut entries: Vec<(LayerId, AttrId, &Shape)> = Vec::new();
        for layer in conn.layers() {
            for elem in cell.shapes(layer) {
                if shape_flags.matches(&elem.inner) {
                    entries.push((layer, elem.attr, &elem.inner));
                }
            }
        }

        let mut scanner: BoxScanner<usize> = BoxScanner::new();
        for (idx, (_, _, shape)) in entries.iter().enumerate() {
            scanner.insert(shape.bbox(), idx);
        }

        let mut rec = ClusterBuildingReceiver::new(conn, &entries);
        scanner.process(&mut rec);
        rec.generate_clusters(self);
        self.ensure_sorted();
    }
}

/// # Cluster-Building Receiver
///
/// Union-find over the shape indices reported by the clustering scan. Each
/// interacting pair creates a cluster, extends one, or merges two (the
/// larger absorbs the smaller). `finish` captures never-paired shapes as
/// singletons.
struct ClusterBuildingReceiver<'c, 'e> {
    conn: &'c Connectivity,
    entries: &'e [(LayerId, AttrId, &'e Shape)],
    // Shape index -> index into `clusters`
    shape_to_cluster: BTreeMap<usize, usize>,
    // Merged-away groups become None
    clusters: Vec<Option<Vec<usize>>>,
}
impl<'c, 'e> ClusterBuildingReceiver<'c, 'e> {
    fn new(conn: &'c Connectivity, entries: &'e [(LayerId, AttrId, &'e Shape)]) -> Self {
        Self {
            conn,
            entries,
            shape_to_cluster: BTreeMap::new(),
            clusters: Vec::new(),
        }
    }
    /// Emit the collected groups into `clusters`
    fn generate_clusters(&self, clusters: &mut LocalClusters) {
        for group in self.clusters.iter().flatten() {
            let cluster = clusters.insert();
            for &idx in group {
                let (layer, attr, shape) = self.entries[idx];
                cluster.add(shape.clone(), layer);
                cluster.add_attr(attr);
            }
        }
    }
}
impl<'c, 'e> ScanReceiver<usize> for ClusterBuildingReceiver<'c, 'e> {
    fn add(&mut self, s1: &usize, s2: &usize) {
        let (s1, s2) = (*s1, *s2);
        let (l1, _, a) = self.entries[s1];
        let (l2, _, b) = self.entries[s2];
        if !self.conn.interacts(a, l1, b, l2, &Transform::identity()) {
            return;
        }

        let c1 = self.shape_to_cluster.get(&s1).copied();
        let c2 = self.shape_to_cluster.get(&s2).copied();
        match (c1, c2) {
            (None, None) => {
                let c = self.clusters.len();
                self.clusters.push(Some(vec![s1, s2]));
                self.shape_to_cluster.insert(s1, c);
                self.shape_to_cluster.insert(s2, c);
            }
            (None, Some(c2)) => {
                self.clusters[c2].as_mut().unwrap().push(s1);
                self.shape_to_cluster.insert(s1, c2);
            }
            (Some(c1), None) => {
                self.clusters[c1].as_mut().unwrap().push(s2);
                self.shape_to_cluster.insert(s2, c1);
            }
            (Some(mut c1), Some(mut c2)) => {
                if c1 == c2 {
                    return;
                }
                // Join clusters: use the larger one as the target
                let len1 = self.clusters[c1].as_ref().unwrap().len();
                let len2 = self.clusters[c2].as_ref().unwrap().len();
                if len1 < len2 {
                    std::mem::swap(&mut c1, &mut c2);
                }
                let moved = self.clusters[c2].take().unwrap();
                for &idx in &moved {
                    self.shape_to_cluster.insert(idx, c1);
                }
                self.clusters[c1].as_mut().unwrap().extend(moved);
            }
        }
    }
    fn finish(&mut self, item: &usize) {
        // Shapes never paired with anything become singleton clusters
        if !self.shape_to_cluster.contains_key(item) {
            let c = self.clusters.len();
            self.clusters.push(Some(vec![*item]));
            self.shape_to_cluster.insert(*item, c);
        }
    }
}
