//!
//! # Hierarchical Cluster Tree
//!
//! [HierClusters] owns one [ConnectedClusters] per cell: the cell's local
//! clusters plus the connection edges into the cluster trees of its child
//! instances. The tree is built bottom-up: local clusters first, then per
//! cell a pass over two box scans (instance×instance and local×instance)
//! that records connections, promotes child roots, and finally executes the
//! joins deferred during the sweeps.
//!
//! Connections can only cross one level of hierarchy. Deeper links are
//! stitched through shape-less "dummy" connector clusters allocated above a
//! cell's slot range; the root-promotion protocol in `make_path` keeps the
//! invariant that every cluster instance has exactly one upward owner and a
//! root cluster has none.
//!

// Std-Lib
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

// Crates.io
use log::debug;
use serde::{Deserialize, Serialize};

// Local imports
use crate::{
    bbox::{BoundBox, BoundBoxTrait},
    cluster::{ClusterId, LocalCluster, LocalClusters},
    connectivity::Connectivity,
    error::NetsResult,
    geom::{Shape, Transform, TransformTrait},
    iter::RecursiveClusterShapeIterator,
    layout::{Cell, CellIndex, InstElement, InstId, LayerId, Layout, ShapeFlags},
    scan::{BoxScanner, BoxScanner2, ScanReceiver, ScanReceiver2},
};

/// Default area-ratio threshold for splitting local clusters ahead of the
/// local×instance scan
pub const DEFAULT_AREA_RATIO: f64 = 10.0;

/// # Reference Into a Child's Cluster Tree
///
/// Names "cluster `id` inside the child cell reached via `inst_elem`". The
/// cell owning `inst_elem` is the cell whose [ConnectedClusters] stores the
/// connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ClusterInstance {
    /// Cluster id within the child cell
    pub id: ClusterId,
    /// The instance placement leading to the child
    pub inst_elem: InstElement,
}
impl ClusterInstance {
    /// Create a new [ClusterInstance]
    pub fn new(id: ClusterId, inst_elem: InstElement) -> Self {
        Self { id, inst_elem }
    }
}

/// # Per-Cell Clusters With Connections
///
/// Extends [LocalClusters] with the connection edges into child-instance
/// clusters, their reverse index, and the root flags driven by promotion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectedClusters {
    local: LocalClusters,
    connections: BTreeMap<ClusterId, Vec<ClusterInstance>>,
    rev_connections: HashMap<ClusterInstance, ClusterId>,
    non_roots: BTreeSet<ClusterId>,
}
impl ConnectedClusters {
    /// Shared access to the shape-level cluster collection
    pub fn locals(&self) -> &LocalClusters {
        &self.local
    }
    /// Number of cluster slots
    pub fn len(&self) -> usize {
        self.local.len()
    }
    /// Boolean indication of a slot-less collection
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
    /// The collection's bounding box
    pub fn bbox(&self) -> BoundBox {
        self.local.bbox()
    }
    /// The cluster with identifier `id`; empty for dummy ids
    pub fn cluster_by_id(&self, id: ClusterId) -> &LocalCluster {
        self.local.cluster_by_id(id)
    }
    /// Every slot, cleared ones included
    pub fn iter(&self) -> impl Iterator<Item = &LocalCluster> {
        self.local.iter()
    }
    /// The clusters whose bounding box touches `region`
    pub fn clusters_touching<'a>(
        &'a self,
        region: &'a BoundBox,
    ) -> impl Iterator<Item = &'a LocalCluster> + 'a {
        self.local.clusters_touching(region)
    }
    /// Allocate a fresh dummy (connector) id above the slot range
    pub fn insert_dummy(&mut self) -> ClusterId {
        self.local.insert_dummy()
    }
    /// Clear the slot of `id` in place
    pub fn remove_cluster(&mut self, id: ClusterId) {
        self.local.remove_cluster(id)
    }
    /// Build the local clusters of `cell`; see [LocalClusters::build_clusters]
    pub fn build_clusters(&mut self, cell: &Cell, shape_flags: ShapeFlags, conn: &Connectivity) {
        self.local.build_clusters(cell, shape_flags, conn)
    }
    pub(crate) fn ensure_sorted(&mut self) {
        self.local.ensure_sorted()
    }

    /// The connections of cluster `id`, empty if it has none
    pub fn connections_for_cluster(&self, id: ClusterId) -> &[ClusterInstance] {
        self.connections
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
    /// Every (cluster id, connection list) pair, in increasing id order
    pub fn connections(&self) -> impl Iterator<Item = (&ClusterId, &Vec<ClusterInstance>)> {
        self.connections.iter()
    }
    /// Attach `inst` to cluster `id`'s connection list
    pub fn add_connection(&mut self, id: ClusterId, inst: ClusterInstance) {
        self.connections.entry(id).or_default().push(inst);
        self.rev_connections.insert(inst, id);
    }
    /// The cluster owning the connection `inst`, or 0 if unowned
    pub fn find_cluster_with_connection(&self, inst: &ClusterInstance) -> ClusterId {
        self.rev_connections.get(inst).copied().unwrap_or(0)
    }
    /// Merge cluster `with_id` into `id`: shapes, then connections. The
    /// reverse index is retargeted and `with_id`'s forward entry erased.
    pub fn join_cluster_with(&mut self, id: ClusterId, with_id: ClusterId) {
        if id == with_id {
            return;
        }
        // Join the shape clusters
        self.local.join_cluster_with(id, with_id);

        // Handle the connections by translating
        let to_join = self.connections.remove(&with_id).unwrap_or_default();
        if !to_join.is_empty() {
            for c in &to_join {
                self.rev_connections.insert(*c, id);
            }
            self.connections.entry(id).or_default().extend(to_join);
        }
    }
    /// Whether cluster `id` still awaits promotion to a parent: true until
    /// [reset_root](Self::reset_root) has been called for it
    pub fn is_root(&self, id: ClusterId) -> bool {
        !self.non_roots.contains(&id)
    }
    /// Mark cluster `id` as referenced from a parent cell
    pub fn reset_root(&mut self, id: ClusterId) {
        self.non_roots.insert(id);
    }
    /// Every id that may name a net in this cell: the slot ids plus the
    /// dummy ids owning connections, in increasing order
    pub fn all_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<ClusterId> = (1..=self.local.len()).collect();
        ids.extend(self.connections.keys().copied().filter(|id| *id > self.local.len()));
        ids
    }
}

/// Shared empty collection returned for never-built cells
fn empty_connected_clusters() -> &'static ConnectedClusters {
    static EMPTY: OnceLock<ConnectedClusters> = OnceLock::new();
    EMPTY.get_or_init(ConnectedClusters::default)
}

/// # Memoized Hierarchical Cluster-Box Provider
///
/// Maps a cell index to the union of the cell's local-cluster box with every
/// child instance's array-expanded footprint, recursively. The cache fills
/// lazily; the tree is passed per query so the provider holds no
/// back-reference into the structure under construction.
#[derive(Debug, Default)]
pub struct CellClustersBoxConverter {
    cache: RefCell<HashMap<CellIndex, BoundBox>>,
}
impl CellClustersBoxConverter {
    /// Create a new converter with an empty cache
    pub fn new() -> Self {
        Self::default()
    }
    /// The cluster-hierarchy bounding box of cell `ci`
    pub fn bbox(&self, ci: CellIndex, layout: &Layout, tree: &HierClusters) -> BoundBox {
        if let Some(b) = self.cache.borrow().get(&ci) {
            return *b;
        }
        let mut bbox = tree.clusters_per_cell(ci).bbox();
        for inst in layout.cell(ci).insts() {
            let child = self.bbox(inst.cell, layout, tree);
            bbox = inst.bbox_of(&child).union(&bbox);
        }
        self.cache.borrow_mut().insert(ci, bbox);
        bbox
    }
}

/// # Build Progress Sink
///
/// Receives coarse progress during a build. Returning an error from `tick`
/// cancels the build, which unwinds through the usual `?` propagation.
pub trait ProgressSink {
    /// One unit of work done. Err cancels the build.
    fn tick(&mut self) -> NetsResult<()> {
        Ok(())
    }
    /// A human-readable phase message
    fn message(&mut self, _msg: &str) {}
}
/// The no-op [ProgressSink]
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;
impl ProgressSink for NoProgress {}

/// # Hierarchical Cluster Tree
///
/// One [ConnectedClusters] per built cell. Once a cell's hierarchical pass
/// has run, its entry only changes through the dummy-insertion protocol of a
/// later ancestor pass.
#[derive(Debug, Clone, Default)]
pub struct HierClusters {
    per_cell: BTreeMap<CellIndex, ConnectedClusters>,
}
impl HierClusters {
    /// Drop all per-cell clusters
    pub fn clear(&mut self) {
        self.per_cell.clear();
    }
    /// The clusters of cell `ci`; a shared empty collection if never built
    pub fn clusters_per_cell(&self, ci: CellIndex) -> &ConnectedClusters {
        self.per_cell
            .get(&ci)
            .unwrap_or_else(|| empty_connected_clusters())
    }
    pub(crate) fn clusters_per_cell_mut(&mut self, ci: CellIndex) -> &mut ConnectedClusters {
        self.per_cell.entry(ci).or_default()
    }

    /// # Build the Hierarchical Cluster Tree
    ///
    /// Computes, for `root_cell` and every cell it calls, the local clusters
    /// and the parent↔child connections, with the default split ratio and no
    /// progress reporting.
    pub fn build(
        layout: &Layout,
        root_cell: CellIndex,
        shape_flags: ShapeFlags,
        conn: &Connectivity,
    ) -> NetsResult<Self> {
        Self::build_with_progress(
            layout,
            root_cell,
            shape_flags,
            conn,
            DEFAULT_AREA_RATIO,
            &mut NoProgress,
        )
    }
    /// [build](Self::build), with an explicit split `area_ratio` and progress sink
    pub fn build_with_progress(
        layout: &Layout,
        root_cell: CellIndex,
        shape_flags: ShapeFlags,
        conn: &Connectivity,
        area_ratio: f64,
        progress: &mut dyn ProgressSink,
    ) -> NetsResult<Self> {
        let mut tree = Self::default();
        let mut called = layout.collect_called_cells(root_cell);
        called.insert(root_cell);

        // First build all local clusters; order is immaterial
        progress.message("computing local clusters");
        for ci in &called {
            tree.build_local_cluster(layout, *ci, shape_flags, conn);
            progress.tick()?;
        }

        // Then the hierarchical connections, bottom-up: every cell is
        // processed after all of its called children
        progress.message("computing hierarchical clusters");
        let cbc = CellClustersBoxConverter::new();
        for ci in layout.bottom_up()? {
            if called.contains(&ci) {
                tree.build_hier_connections(&cbc, layout, ci, conn, area_ratio);
                progress.tick()?;
            }
        }
        Ok(tree)
    }

    /// Compute the local (flat) clusters of one cell
    fn build_local_cluster(
        &mut self,
        layout: &Layout,
        ci: CellIndex,
        shape_flags: ShapeFlags,
        conn: &Connectivity,
    ) {
        debug!(
            "computing local clusters for cell: {}",
            layout.cell(ci).name
        );
        self.clusters_per_cell_mut(ci)
            .build_clusters(layout.cell(ci), shape_flags, conn);
    }

    /// The per-cell hierarchical pass: the instance×instance scan (with the
    /// intra-array treatment), the local×instance scan over split pieces,
    /// then the deferred joins.
    fn build_hier_connections(
        &mut self,
        cbc: &CellClustersBoxConverter,
        layout: &Layout,
        ci: CellIndex,
        conn: &Connectivity,
        area_ratio: f64,
    ) {
        debug!(
            "computing hierarchical clusters for cell: {}",
            layout.cell(ci).name
        );

        let mut join = JoinSets::default();

        // Instance to instance treatment
        {
            let mut scanner: BoxScanner<InstId> = BoxScanner::new();
            for (iid, inst) in layout.cell(ci).insts().iter().enumerate() {
                scanner.insert(inst.bbox_with(&mut |c| cbc.bbox(c, layout, self)), iid);
            }
            let mut builder = HierConnBuilder {
                layout,
                conn,
                cbc,
                cell: ci,
                tree: self,
                join: &mut join,
                heap: &[],
            };
            scanner.process(&mut builder);
        }

        // Local to instance treatment. The original clusters are not needed
        // here: pieces split by area ratio scan better, and keep their id.
        {
            let mut heap: Vec<LocalCluster> = Vec::new();
            for c in self.clusters_per_cell(ci).iter() {
                if c.size() == 0 {
                    continue;
                }
                let n = c.split(area_ratio, &mut heap);
                if n == 0 {
                    heap.push(c.clone());
                }
            }

            let mut scanner: BoxScanner2<usize, InstId> = BoxScanner2::new();
            for (hi, piece) in heap.iter().enumerate() {
                scanner.insert1(piece.bbox(), hi);
            }
            for (iid, inst) in layout.cell(ci).insts().iter().enumerate() {
                scanner.insert2(inst.bbox_with(&mut |c| cbc.bbox(c, layout, self)), iid);
            }
            let mut builder = HierConnBuilder {
                layout,
                conn,
                cbc,
                cell: ci,
                tree: self,
                join: &mut join,
                heap: &heap,
            };
            scanner.process(&mut builder);
        }

        // Finally join the local clusters which got connected by child
        // clusters; deferred because joins invalidate the box trees the
        // scans iterate
        let cc = self.clusters_per_cell_mut(ci);
        for set in &join.sets {
            let mut ids = set.iter();
            if let Some(first) = ids.next() {
                for other in ids {
                    cc.join_cluster_with(*first, *other);
                }
            }
        }
        cc.ensure_sorted();
    }

    /// # Export Net Geometry Back Into the Layout
    ///
    /// For every cell bottom-up and every root cluster in it, walk the
    /// cluster's hierarchical shapes and insert them, transformed to cell
    /// coordinates, into the cell's target layer per `layer_mapping`
    /// (source layer to target layer). Net geometry thus lands flat per
    /// net, but still cell-local.
    pub fn return_to_hierarchy(
        &self,
        layout: &mut Layout,
        layer_mapping: &BTreeMap<LayerId, LayerId>,
    ) -> NetsResult<()> {
        let order = layout.bottom_up()?;
        for ci in order {
            let cc = self.clusters_per_cell(ci);
            let mut to_insert: Vec<(LayerId, Shape)> = Vec::new();
            for id in cc.all_ids() {
                if !cc.is_root(id) {
                    continue;
                }
                for (&src, &tgt) in layer_mapping {
                    let mut it = RecursiveClusterShapeIterator::new(self, layout, src, ci, id);
                    while !it.at_end() {
                        to_insert.push((tgt, it.shape().transform(&it.trans())));
                        it.advance();
                    }
                }
            }
            for (tgt, shape) in to_insert {
                layout.add_shape(ci, tgt, shape);
            }
        }
        Ok(())
    }
}

/// One step of an instantiation path: an [InstElement] plus the cell owning
/// the instance it names.
#[derive(Debug, Clone, Copy)]
struct PathElem {
    cell: CellIndex,
    elem: InstElement,
}

/// Pending intra-cell joins, discovered while the scans iterate. Disjoint
/// sets of local cluster ids; each set later merges into its smallest id.
#[derive(Debug, Default)]
struct JoinSets {
    map: HashMap<ClusterId, usize>,
    sets: Vec<BTreeSet<ClusterId>>,
}
impl JoinSets {
    /// Record that clusters `a` and `b` belong to the same net
    fn mark(&mut self, a: ClusterId, b: ClusterId) {
        match (self.map.get(&a).copied(), self.map.get(&b).copied()) {
            (None, None) => {
                let idx = self.sets.len();
                self.sets.push([a, b].into_iter().collect());
                self.map.insert(a, idx);
                self.map.insert(b, idx);
            }
            (None, Some(y)) => {
                self.sets[y].insert(a);
                self.map.insert(a, y);
            }
            (Some(x), None) => {
                self.sets[x].insert(b);
                self.map.insert(b, x);
            }
            (Some(x), Some(y)) if x != y => {
                // Join two supersets; the drained one stays behind, empty
                let moved = std::mem::take(&mut self.sets[y]);
                for id in &moved {
                    self.map.insert(*id, x);
                }
                self.sets[x].extend(moved);
            }
            _ => {}
        }
    }
}

/// # The Cross-Cell Interaction Handler
///
/// Receiver for both per-cell scans. Interaction *detection* runs over
/// shared borrows of the tree (the children's clusters are immutable during
/// a parent's pass); the connect/join *decisions* then run over mutable
/// borrows, per detected pair. Local clusters enter the local×instance scan
/// as owned split pieces in `heap`, so the receiver never borrows the
/// collection it mutates.
struct HierConnBuilder<'b> {
    layout: &'b Layout,
    conn: &'b Connectivity,
    cbc: &'b CellClustersBoxConverter,
    /// The cell whose pass this is
    cell: CellIndex,
    tree: &'b mut HierClusters,
    join: &'b mut JoinSets,
    heap: &'b [LocalCluster],
}

impl<'b> ScanReceiver<InstId> for HierConnBuilder<'b> {
    /// Receiver main event for instance-to-instance interactions
    fn add(&mut self, i1: &InstId, i2: &InstId) {
        let ident = Transform::identity();
        self.add_inst_pair(
            BoundBox::world(),
            self.cell,
            *i1,
            &[],
            &ident,
            self.cell,
            *i2,
            &[],
            &ident,
        );
    }
    /// Arrays may interact with themselves; single instances cannot
    fn finish(&mut self, item: &InstId) {
        if self.layout.cell(self.cell).inst(*item).size() > 1 {
            self.add_single_inst(*item);
        }
    }
}

impl<'b> ScanReceiver2<usize, InstId> for HierConnBuilder<'b> {
    /// Receiver main event for local-to-instance interactions
    fn add(&mut self, piece: &usize, i2: &InstId) {
        let heap = self.heap;
        let c1 = &heap[*piece];
        let ident = Transform::identity();
        self.add_local_pair(c1, self.cell, *i2, &[], &ident);
    }
}

impl<'b> HierConnBuilder<'b> {
    /// Cluster interactions between two instances or instance arrays:
    /// enumerate the touching member pairs, handle each directly, and dive
    /// into both child cells for every sub-instance chain that could overlap.
    ///
    /// `c1`/`i1` name the first instance and its owning cell, `p1`/`t1` the
    /// instantiation path and accumulated transform leading to (but not
    /// including) it; likewise for the second instance.
    #[allow(clippy::too_many_arguments)]
    fn add_inst_pair(
        &mut self,
        common: BoundBox,
        c1: CellIndex,
        i1: InstId,
        p1: &[PathElem],
        t1: &Transform,
        c2: CellIndex,
        i2: InstId,
        p2: &[PathElem],
        t2: &Transform,
    ) {
        let layout = self.layout;
        let inst1 = layout.cell(c1).inst(i1);
        let inst2 = layout.cell(c2).inst(i2);

        let bb1 = self.cbc.bbox(inst1.cell, layout, self.tree);
        let b1 = inst1.bbox_of(&bb1).transformed(t1);
        let bb2 = self.cbc.bbox(inst2.cell, layout, self.tree);
        let b2 = inst2.bbox_of(&bb2).transformed(t2);

        let common_all = common.intersection(&b1).intersection(&b2);
        if common_all.is_empty() {
            return;
        }

        let t1i = t1.invert();
        let t2i = t2.invert();
        let gb1 = layout.cell_bbox(inst1.cell);
        let gb2 = layout.cell_bbox(inst2.cell);

        for ii1 in inst1.members_touching(&common_all.transformed(&t1i), &gb1) {
            let tt1 = Transform::cascade(t1, &inst1.member_trans(ii1));
            let ib1 = bb1.transformed(&tt1);

            let mut pp1 = p1.to_vec();
            pp1.push(PathElem {
                cell: c1,
                elem: InstElement::new(i1, ii1),
            });

            for ii2 in inst2.members_touching(&ib1.transformed(&t2i), &gb2) {
                let tt2 = Transform::cascade(t2, &inst2.member_trans(ii2));
                let ib2 = bb2.transformed(&tt2);

                let common12 = ib1.intersection(&ib2).intersection(&common);
                if common12.is_empty() {
                    continue;
                }

                let mut pp2 = p2.to_vec();
                pp2.push(PathElem {
                    cell: c2,
                    elem: InstElement::new(i2, ii2),
                });

                self.add_single_pair(&common12, inst1.cell, &pp1, &tt1, inst2.cell, &pp2, &tt2);

                // Dive into the cell of ii2
                for jj2 in
                    layout.insts_touching(inst2.cell, &common12.transformed(&tt2.invert()))
                {
                    self.add_inst_pair(common12, c1, i1, p1, t1, inst2.cell, jj2, &pp2, &tt2);
                }
            }

            let common1 = ib1.intersection(&b2).intersection(&common);
            if !common1.is_empty() {
                // Dive into the cell of ii1
                for jj1 in
                    layout.insts_touching(inst1.cell, &common1.transformed(&tt1.invert()))
                {
                    self.add_inst_pair(common1, inst1.cell, jj1, &pp1, &tt1, c2, i2, p2, t2);
                }
            }
        }
    }

    /// Cluster interactions between two specific, fully-resolved instances:
    /// find the interacting cluster pairs, then record or merge their
    /// upward owners in the current cell per the decision table.
    fn add_single_pair(
        &mut self,
        common: &BoundBox,
        ci1: CellIndex,
        p1: &[PathElem],
        t1: &Transform,
        ci2: CellIndex,
        p2: &[PathElem],
        t2: &Transform,
    ) {
        let layout = self.layout;
        let t1i = t1.invert();
        let t2i = t2.invert();
        let t21 = Transform::cascade(&t1i, t2);

        // Detect the interacting cluster pairs over shared borrows
        let mut pairs: Vec<(ClusterId, ClusterId)> = Vec::new();
        {
            let cl1 = self.tree.clusters_per_cell(ci1);
            let cl2 = self.tree.clusters_per_cell(ci2);
            let region1 = common.transformed(&t1i);
            for i in cl1.clusters_touching(&region1) {
                // Skip the detailed tests if this cluster cannot interact
                // with the whole of cell 2
                if !i.interacts_cell(layout, ci2, &t21, self.conn) {
                    continue;
                }
                let bc1 = common.intersection(&i.bbox().transformed(t1));
                let region2 = bc1.transformed(&t2i);
                for j in cl2.clusters_touching(&region2) {
                    if i.interacts(j, &t21, self.conn) {
                        pairs.push((i.id(), j.id()));
                    }
                }
            }
        }

        // Record the connections
        for (id1, id2) in pairs {
            let k1 = self.make_path(id1, p1);
            let k2 = self.make_path(id2, p2);

            let cc = self.tree.clusters_per_cell_mut(self.cell);
            let x1 = cc.find_cluster_with_connection(&k1);
            let x2 = cc.find_cluster_with_connection(&k2);

            if x1 == 0 {
                if x2 == 0 {
                    let connector = cc.insert_dummy();
                    cc.add_connection(connector, k1);
                    cc.add_connection(connector, k2);
                } else {
                    cc.add_connection(x2, k1);
                }
            } else if x2 == 0 {
                cc.add_connection(x1, k2);
            } else if x1 != x2 {
                // The join cost is driven by the connection count: make the
                // owner with more connections the target
                let (x1, x2) = if cc.connections_for_cluster(x1).len()
                    < cc.connections_for_cluster(x2).len()
                {
                    (x2, x1)
                } else {
                    (x1, x2)
                };
                cc.join_cluster_with(x1, x2);
                cc.remove_cluster(x2);
            }
        }
    }

    /// Intra-array treatment of one arrayed instance: array members may
    /// touch their siblings.
    fn add_single_inst(&mut self, i: InstId) {
        let layout = self.layout;
        let inst = layout.cell(self.cell).inst(i);
        let bb = self.cbc.bbox(inst.cell, layout, self.tree);
        let gb = layout.cell_bbox(inst.cell);

        for ii in 0..inst.size() {
            let tt = inst.member_trans(ii);
            let ib = bb.transformed(&tt);

            let pp = vec![PathElem {
                cell: self.cell,
                elem: InstElement::new(i, ii),
            }];

            let mut any = false;
            let mut first = true;

            for ii2 in inst.members_touching(&ib, &gb) {
                let tt2 = inst.member_trans(ii2);
                if tt == tt2 {
                    // Skip the initial instance
                    continue;
                }
                let ib2 = bb.transformed(&tt2);
                if !ib.touches(&ib2) {
                    continue;
                }

                let pp2 = vec![PathElem {
                    cell: self.cell,
                    elem: InstElement::new(i, ii2),
                }];
                let common = ib.intersection(&ib2);
                self.add_single_pair(&common, inst.cell, &pp, &tt, inst.cell, &pp2, &tt2);

                // Dive into the sibling's cell. Regular arrays repeat the
                // same interactions, so only the first overlapping sibling
                // needs the descent.
                if first {
                    let ident = Transform::identity();
                    for jj2 in
                        layout.insts_touching(inst.cell, &common.transformed(&tt2.invert()))
                    {
                        self.add_inst_pair(
                            common, self.cell, i, &[], &ident, inst.cell, jj2, &pp2, &tt2,
                        );
                    }
                    first = false;
                }
                any = true;
            }

            // No overlapping sibling here means none on later members either
            if !any {
                break;
            }
        }
    }

    /// A local cluster against one child instance or instance array:
    /// enumerate the touching members, handle each, and dive into the
    /// child cells.
    fn add_local_pair(
        &mut self,
        c1: &LocalCluster,
        c2: CellIndex,
        i2: InstId,
        p2: &[PathElem],
        t2: &Transform,
    ) {
        let layout = self.layout;
        let inst2 = layout.cell(c2).inst(i2);

        let b1 = c1.bbox();
        let bb2 = self.cbc.bbox(inst2.cell, layout, self.tree);
        let gb2 = layout.cell_bbox(inst2.cell);
        let b2 = inst2.bbox_of(&gb2).transformed(t2);
        if !b1.touches(&b2) {
            return;
        }

        let region = b1.intersection(&b2).transformed(&t2.invert());
        for ii2 in inst2.members_touching(&region, &gb2) {
            let tt2 = Transform::cascade(t2, &inst2.member_trans(ii2));
            let ib2 = bb2.transformed(&tt2);

            if !b1.touches(&ib2) || !c1.interacts_cell(layout, inst2.cell, &tt2, self.conn) {
                continue;
            }

            let mut pp2 = p2.to_vec();
            pp2.push(PathElem {
                cell: c2,
                elem: InstElement::new(i2, ii2),
            });

            self.add_single_local_pair(c1, inst2.cell, &pp2, &tt2);

            // Dive into the cell of ii2
            for jj2 in layout.insts_touching(
                inst2.cell,
                &b1.intersection(&ib2).transformed(&tt2.invert()),
            ) {
                self.add_local_pair(c1, inst2.cell, jj2, &pp2, &tt2);
            }
        }
    }

    /// A local cluster against the clusters of one specific child instance:
    /// either record the connection, or defer a join when another local
    /// cluster already owns the child cluster.
    fn add_single_local_pair(
        &mut self,
        c1: &LocalCluster,
        ci2: CellIndex,
        p2: &[PathElem],
        t2: &Transform,
    ) {
        // Detect the interacting child clusters over shared borrows
        let mut hits: Vec<ClusterId> = Vec::new();
        {
            let cl2 = self.tree.clusters_per_cell(ci2);
            let region = c1.bbox().transformed(&t2.invert());
            for j in cl2.clusters_touching(&region) {
                if c1.interacts(j, t2, self.conn) {
                    hits.push(j.id());
                }
            }
        }

        for id2 in hits {
            let k2 = self.make_path(id2, p2);

            let cc = self.tree.clusters_per_cell_mut(self.cell);
            let other = cc.find_cluster_with_connection(&k2);
            if other > 0 {
                // This child cluster connects two clusters on our own level.
                // They must join, but not now: the scans still iterate the
                // box trees a join would invalidate.
                self.join.mark(other, c1.id());
            } else {
                cc.add_connection(c1.id(), k2);
            }
        }
    }

    /// # Root-Promotion Walk
    ///
    /// Makes a valid [ClusterInstance] in the current cell for a cluster
    /// reached through `path`. Connections cross exactly one hierarchy
    /// level, so each intermediate level reuses its existing connector or
    /// allocates a dummy one. Whenever the cluster being attached is still
    /// root in its cell, it is first promoted: every parent instance of
    /// that cell, layout-wide, receives a dummy connector to it, and the
    /// root flag is cleared. Later ascents then find the connectors in
    /// place.
    fn make_path(&mut self, id: ClusterId, path: &[PathElem]) -> ClusterInstance {
        assert!(!path.is_empty(), "make_path: empty instance path");
        let layout = self.layout;
        let mut id = id;
        let mut p = path.len();

        loop {
            p -= 1;
            let pe = &path[p];
            let child_ci = layout.cell(pe.cell).inst(pe.elem.inst).cell;
            let ci = ClusterInstance::new(id, pe.elem);

            if p == 0 {
                // Attaching to a child which is still root: promote the
                // cluster to every parent, except for the connection the
                // caller itself is about to record
                if self.tree.clusters_per_cell(child_ci).is_root(id) {
                    for pi in layout.parent_insts(child_ci) {
                        let members = layout.cell(pi.parent).inst(pi.inst).size();
                        for pii in 0..members {
                            let ci2 =
                                ClusterInstance::new(id, InstElement::new(pi.inst, pii));
                            if self.cell != pi.parent || ci != ci2 {
                                let parent_cc = self.tree.clusters_per_cell_mut(pi.parent);
                                let dummy = parent_cc.insert_dummy();
                                parent_cc.add_connection(dummy, ci2);
                            }
                        }
                    }
                    self.tree.clusters_per_cell_mut(child_ci).reset_root(id);
                }
                return ci;
            }

            // The cell holding this level's connection is the owner of the
            // current path element, i.e. the child of the previous one
            let pci = pe.cell;
            let parent_cluster = self
                .tree
                .clusters_per_cell(pci)
                .find_cluster_with_connection(&ci);

            if parent_cluster > 0 {
                // Taken parent
                id = parent_cluster;
            } else {
                let mut id_new = 0;

                // Promote a root child cluster to every parent; remember the
                // connector created at this level's own placement
                if self.tree.clusters_per_cell(child_ci).is_root(id) {
                    for pi in layout.parent_insts(child_ci) {
                        let members = layout.cell(pi.parent).inst(pi.inst).size();
                        for pii in 0..members {
                            let ci2 =
                                ClusterInstance::new(id, InstElement::new(pi.inst, pii));
                            let parent_cc = self.tree.clusters_per_cell_mut(pi.parent);
                            let dummy = parent_cc.insert_dummy();
                            parent_cc.add_connection(dummy, ci2);
                            if pci == pi.parent && ci == ci2 {
                                id_new = dummy;
                            }
                        }
                    }
                    self.tree.clusters_per_cell_mut(child_ci).reset_root(id);
                }

                // No taken parent: the vertical connector must exist now
                id = id_new;
                assert!(id != 0, "make_path: no connector for a non-root cluster");
            }
        }
    }
}
