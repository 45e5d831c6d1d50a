//!
//! # Recursive Cluster Traversals
//!
//! Read-only, lazy depth-first walks over a built [HierClusters] tree:
//! [RecursiveClusterShapeIterator] visits every shape of a hierarchical
//! cluster with its accumulated transform, [RecursiveClusterIterator] visits
//! every `(cell, cluster)` node, and [IncomingClusterConnections] is the
//! memoized reverse index answering "who points into this cluster".
//!
//! Both traversals are cursors in the flat-iterator protocol the engine's
//! collaborators use: `at_end`, `advance`, and accessors for the current
//! position.
//!

// Std-Lib
use std::collections::{BTreeSet, HashMap};

// Local imports
use crate::{
    cluster::ClusterId,
    geom::{Shape, Transform},
    hier::{ClusterInstance, HierClusters},
    layout::{CellIndex, InstElement, LayerId, Layout},
};

/// # Recursive Cluster Shape Iterator
///
/// Walks every shape on one layer of a hierarchical cluster, depth-first
/// through its connections, accumulating the instance transforms on the way
/// down. Shape-less connector clusters contribute nothing themselves but
/// their connections are followed.
pub struct RecursiveClusterShapeIterator<'a> {
    hc: &'a HierClusters,
    layout: &'a Layout,
    layer: LayerId,
    cell_stack: Vec<CellIndex>,
    id_stack: Vec<ClusterId>,
    trans_stack: Vec<Transform>,
    conn_stack: Vec<(&'a [ClusterInstance], usize)>,
    shapes: &'a [Shape],
    shape_pos: usize,
}
impl<'a> RecursiveClusterShapeIterator<'a> {
    /// Start a traversal at cluster `id` of cell `ci`, over `layer`
    pub fn new(
        hc: &'a HierClusters,
        layout: &'a Layout,
        layer: LayerId,
        ci: CellIndex,
        id: ClusterId,
    ) -> Self {
        let mut it = Self {
            hc,
            layout,
            layer,
            cell_stack: Vec::new(),
            id_stack: Vec::new(),
            trans_stack: Vec::new(),
            conn_stack: Vec::new(),
            shapes: &[],
            shape_pos: 0,
        };
        it.down(ci, id, Transform::identity());
        while it.shape_pos >= it.shapes.len() && !it.conn_stack.is_empty() {
            it.next_conn();
        }
        it
    }
    /// Whether the traversal is exhausted
    pub fn at_end(&self) -> bool {
        self.conn_stack.is_empty()
    }
    /// The current shape
    pub fn shape(&self) -> &'a Shape {
        &self.shapes[self.shape_pos]
    }
    /// The accumulated transform of the current shape's cell into the
    /// traversal's starting coordinates
    pub fn trans(&self) -> Transform {
        *self.trans_stack.last().unwrap()
    }
    /// The cell holding the current shape
    pub fn cell_index(&self) -> CellIndex {
        *self.cell_stack.last().unwrap()
    }
    /// The cluster holding the current shape
    pub fn cluster_id(&self) -> ClusterId {
        *self.id_stack.last().unwrap()
    }
    /// The chain of instance steps leading to the current cluster: every
    /// connection on the stack but the last
    pub fn inst_path(&self) -> Vec<ClusterInstance> {
        if self.conn_stack.is_empty() {
            return Vec::new();
        }
        self.conn_stack[..self.conn_stack.len() - 1]
            .iter()
            .map(|(list, pos)| list[*pos])
            .collect()
    }
    /// Step to the next shape
    pub fn advance(&mut self) {
        self.shape_pos += 1;
        while self.shape_pos >= self.shapes.len() && !self.conn_stack.is_empty() {
            self.next_conn();
        }
    }

    /// Follow the current level's next connection downward, or climb until
    /// a level with remaining connections is found
    fn next_conn(&mut self) {
        let (list, pos) = *self.conn_stack.last().unwrap();
        if pos < list.len() {
            let cli = list[pos];
            let cur = self.cell_index();
            let inst = self.layout.cell(cur).inst(cli.inst_elem.inst);
            self.down(inst.cell, cli.id, inst.member_trans(cli.inst_elem.index));
        } else {
            loop {
                let top = self.conn_stack.last().unwrap();
                if top.1 < top.0.len() {
                    break;
                }
                self.up();
                if self.conn_stack.is_empty() {
                    return;
                }
                self.conn_stack.last_mut().unwrap().1 += 1;
            }
        }
    }
    fn up(&mut self) {
        self.conn_stack.pop();
        self.trans_stack.pop();
        self.cell_stack.pop();
        self.id_stack.pop();
    }
    fn down(&mut self, ci: CellIndex, id: ClusterId, t: Transform) {
        let cc = self.hc.clusters_per_cell(ci);
        let conn = cc.connections_for_cluster(id);

        let trans = match self.trans_stack.last() {
            Some(prev) => Transform::cascade(prev, &t),
            None => t,
        };
        self.trans_stack.push(trans);
        self.cell_stack.push(ci);
        self.id_stack.push(id);
        self.conn_stack.push((conn, 0));

        self.shapes = cc.cluster_by_id(id).begin(self.layer);
        self.shape_pos = 0;
    }
}

/// # Recursive Cluster Iterator
///
/// Visits every `(cell, cluster)` node of a hierarchical cluster,
/// depth-first, starting with the node it was constructed on.
pub struct RecursiveClusterIterator<'a> {
    hc: &'a HierClusters,
    layout: &'a Layout,
    cell_stack: Vec<CellIndex>,
    id_stack: Vec<ClusterId>,
    conn_stack: Vec<(&'a [ClusterInstance], usize)>,
}
impl<'a> RecursiveClusterIterator<'a> {
    /// Start a traversal at cluster `id` of cell `ci`
    pub fn new(hc: &'a HierClusters, layout: &'a Layout, ci: CellIndex, id: ClusterId) -> Self {
        let mut it = Self {
            hc,
            layout,
            cell_stack: Vec::new(),
            id_stack: Vec::new(),
            conn_stack: Vec::new(),
        };
        it.down(ci, id);
        it
    }
    /// Whether the traversal is exhausted
    pub fn at_end(&self) -> bool {
        self.conn_stack.is_empty()
    }
    /// The current cell
    pub fn cell_index(&self) -> CellIndex {
        *self.cell_stack.last().unwrap()
    }
    /// The current cluster
    pub fn cluster_id(&self) -> ClusterId {
        *self.id_stack.last().unwrap()
    }
    /// The chain of instance steps leading to the current cluster
    pub fn inst_path(&self) -> Vec<ClusterInstance> {
        if self.conn_stack.is_empty() {
            return Vec::new();
        }
        self.conn_stack[..self.conn_stack.len() - 1]
            .iter()
            .map(|(list, pos)| list[*pos])
            .collect()
    }
    /// Step to the next cluster node
    pub fn advance(&mut self) {
        if self.at_end() {
            return;
        }
        self.next_conn();
    }

    fn next_conn(&mut self) {
        // Climb while the current level is exhausted
        loop {
            let top = self.conn_stack.last().unwrap();
            if top.1 < top.0.len() {
                break;
            }
            self.up();
            if self.conn_stack.is_empty() {
                return;
            }
            self.conn_stack.last_mut().unwrap().1 += 1;
        }
        // And descend into the current connection
        let (list, pos) = *self.conn_stack.last().unwrap();
        let cli = list[pos];
        let cur = self.cell_index();
        let inst = self.layout.cell(cur).inst(cli.inst_elem.inst);
        self.down(inst.cell, cli.id);
    }
    fn up(&mut self) {
        self.conn_stack.pop();
        self.cell_stack.pop();
        self.id_stack.pop();
    }
    fn down(&mut self, ci: CellIndex, id: ClusterId) {
        let cc = self.hc.clusters_per_cell(ci);
        let conn = cc.connections_for_cluster(id);
        self.cell_stack.push(ci);
        self.id_stack.push(id);
        self.conn_stack.push((conn, 0));
    }
}

/// One inbound reference into a cluster: the parent cell, the cluster there,
/// and the instance placement the connection crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingClusterInstance {
    /// The referencing cell
    pub cell: CellIndex,
    /// The referencing cluster within `cell`
    pub cluster_id: ClusterId,
    /// The instance placement crossed by the connection
    pub inst_elem: InstElement,
}

/// # Incoming Cluster Connections
///
/// Reverse index over a built [HierClusters]: for a `(cell, cluster)` pair,
/// every `(parent cell, parent cluster, instance)` that points into it.
/// Computed lazily per queried cell by scanning the parents inside the
/// called-cells closure, and memoized.
pub struct IncomingClusterConnections<'a> {
    layout: &'a Layout,
    hc: &'a HierClusters,
    // Cells still awaiting their connection scan
    called: BTreeSet<CellIndex>,
    incoming: HashMap<CellIndex, HashMap<ClusterId, Vec<IncomingClusterInstance>>>,
}
impl<'a> IncomingClusterConnections<'a> {
    /// Create the index for the hierarchy below (and including) `cell`
    pub fn new(layout: &'a Layout, cell: CellIndex, hc: &'a HierClusters) -> Self {
        let mut called = layout.collect_called_cells(cell);
        called.insert(cell);
        Self {
            layout,
            hc,
            called,
            incoming: HashMap::new(),
        }
    }
    /// Whether cluster `id` of cell `ci` has any inbound reference
    pub fn has_incoming(&mut self, ci: CellIndex, id: ClusterId) -> bool {
        if !self.incoming.contains_key(&ci) {
            self.ensure_computed(ci);
        }
        self.incoming
            .get(&ci)
            .map(|m| m.contains_key(&id))
            .unwrap_or(false)
    }
    /// The inbound references of cluster `id` of cell `ci`
    pub fn incoming(&mut self, ci: CellIndex, id: ClusterId) -> &[IncomingClusterInstance] {
        if !self.incoming.contains_key(&ci) {
            self.ensure_computed(ci);
        }
        self.incoming
            .get(&ci)
            .and_then(|m| m.get(&id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn ensure_computed(&mut self, ci: CellIndex) {
        self.incoming.entry(ci).or_default();
        for pc in self.layout.parent_cells(ci) {
            if self.called.contains(&pc) {
                self.ensure_computed_parent(pc);
            }
        }
        self.called.remove(&ci);
    }
    fn ensure_computed_parent(&mut self, ci: CellIndex) {
        self.ensure_computed(ci);

        let layout = self.layout;
        let cc = self.hc.clusters_per_cell(ci);
        for (id, conns) in cc.connections() {
            for c in conns {
                let child = layout.cell(ci).inst(c.inst_elem.inst).cell;
                self.incoming
                    .entry(child)
                    .or_default()
                    .entry(c.id)
                    .or_default()
                    .push(IncomingClusterInstance {
                        cell: ci,
                        cluster_id: *id,
                        inst_elem: c.inst_elem,
                    });
            }
        }
    }
}
