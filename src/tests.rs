//!
//! # nets21 integration tests
//!
//! End-to-end scenarios over small hand-built hierarchies: local clustering,
//! hierarchical stitching, array self-interaction, root promotion, deferred
//! joins, traversal, the reverse index, and geometry export.
//!

use std::collections::{BTreeMap, BTreeSet};

use super::*;

fn rect(x0: Int, y0: Int, x1: Int, y1: Int) -> Shape {
    Shape::Rect(Rect::new(Point::new(x0, y0), Point::new(x1, y1)))
}

/// The ids of clusters that carry shapes
fn live_ids(cc: &ConnectedClusters) -> Vec<ClusterId> {
    cc.iter().filter(|c| c.size() > 0).map(|c| c.id()).collect()
}

/// The ids owning at least one connection
fn connected_ids(cc: &ConnectedClusters) -> Vec<ClusterId> {
    cc.all_ids()
        .into_iter()
        .filter(|&id| !cc.connections_for_cluster(id).is_empty())
        .collect()
}

/// Check the connection invariants for the given cells: every cluster
/// instance has a single upward owner, and the reverse index is the exact
/// inverse of the forward lists.
fn check_consistency(tree: &HierClusters, cells: &[CellIndex]) {
    for &ci in cells {
        let cc = tree.clusters_per_cell(ci);
        let mut seen: BTreeSet<ClusterInstance> = BTreeSet::new();
        for (id, conns) in cc.connections() {
            for c in conns {
                assert!(
                    seen.insert(*c),
                    "cluster instance {:?} owned twice in cell {}",
                    c,
                    ci
                );
                assert_eq!(cc.find_cluster_with_connection(c), *id);
            }
        }
    }
}

#[test]
fn flat_same_layer() -> NetsResult<()> {
    // Two overlapping boxes on a self-connected layer: one cluster
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape(top, 1, rect(0, 0, 10, 10));
    layout.add_shape(top, 1, rect(5, 5, 15, 15));
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let cc = tree.clusters_per_cell(top);
    assert_eq!(live_ids(cc).len(), 1);
    assert_eq!(cc.cluster_by_id(live_ids(cc)[0]).size(), 2);
    Ok(())
}

#[test]
fn flat_unconnected_layers() -> NetsResult<()> {
    // Overlapping boxes on mutually unconnected layers: two clusters
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape(top, 1, rect(0, 0, 10, 10));
    layout.add_shape(top, 2, rect(5, 5, 15, 15));
    let mut conn = Connectivity::new();
    conn.connect_self(1);
    conn.connect_self(2);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    assert_eq!(live_ids(tree.clusters_per_cell(top)).len(), 2);
    Ok(())
}

#[test]
fn via_joins_metals() -> NetsResult<()> {
    // metal1 - via - metal2 stack: one cluster of three shapes
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape(top, 1, rect(0, 0, 10, 10));
    layout.add_shape(top, 2, rect(4, 4, 6, 6));
    layout.add_shape(top, 3, rect(0, 0, 10, 10));
    let mut conn = Connectivity::new();
    conn.connect(1, 2);
    conn.connect(2, 3);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let cc = tree.clusters_per_cell(top);
    assert_eq!(live_ids(cc).len(), 1);
    assert_eq!(cc.cluster_by_id(live_ids(cc)[0]).size(), 3);
    Ok(())
}

/// Cell `leaf` holds one square; `top` places it twice, overlapping
fn stitch_fixture() -> (Layout, CellIndex, CellIndex, Connectivity) {
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(top, Instance::single(leaf, Transform::identity()));
    layout.add_inst(top, Instance::single(leaf, Transform::translate(5., 0.)));
    let mut conn = Connectivity::new();
    conn.connect_self(1);
    (layout, leaf, top, conn)
}

#[test]
fn hierarchical_stitch() -> NetsResult<()> {
    let (layout, leaf, top, conn) = stitch_fixture();
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;

    // The leaf keeps one local cluster, no longer root
    let leaf_cc = tree.clusters_per_cell(leaf);
    assert_eq!(live_ids(leaf_cc), vec![1]);
    assert!(!leaf_cc.is_root(1));

    // The top gets exactly one (connector) cluster, with one connection into
    // each instance's leaf-cluster 1
    let top_cc = tree.clusters_per_cell(top);
    let heads = connected_ids(top_cc);
    assert_eq!(heads.len(), 1);
    let conns = top_cc.connections_for_cluster(heads[0]);
    assert_eq!(conns.len(), 2);
    assert!(conns.iter().all(|c| c.id == 1));
    let insts: BTreeSet<InstId> = conns.iter().map(|c| c.inst_elem.inst).collect();
    assert_eq!(insts, BTreeSet::from([0, 1]));
    assert!(top_cc.is_root(heads[0]));

    check_consistency(&tree, &[leaf, top]);
    Ok(())
}

#[test]
fn shape_traversal_with_transforms() -> NetsResult<()> {
    let (layout, _leaf, top, conn) = stitch_fixture();
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let head = connected_ids(tree.clusters_per_cell(top))[0];

    // The recursive shape iterator reaches both instances' squares, each
    // under its instance transform
    let mut boxes: Vec<BoundBox> = Vec::new();
    let mut it = RecursiveClusterShapeIterator::new(&tree, &layout, 1, top, head);
    while !it.at_end() {
        assert_eq!(it.inst_path().len(), 1);
        boxes.push(it.shape().transform(&it.trans()).bbox());
        it.advance();
    }
    boxes.sort_by_key(|b| b.p0);
    assert_eq!(
        boxes,
        vec![
            BoundBox::from_points(Point::new(0, 0), Point::new(10, 10)),
            BoundBox::from_points(Point::new(5, 0), Point::new(15, 10)),
        ]
    );
    Ok(())
}

#[test]
fn incoming_connections_index() -> NetsResult<()> {
    let (layout, leaf, top, conn) = stitch_fixture();
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let head = connected_ids(tree.clusters_per_cell(top))[0];

    let mut inc = IncomingClusterConnections::new(&layout, top, &tree);
    assert!(inc.has_incoming(leaf, 1));
    let refs = inc.incoming(leaf, 1);
    assert_eq!(refs.len(), 2);
    assert!(refs.iter().all(|r| r.cell == top && r.cluster_id == head));
    // The top cluster itself has no parents
    assert!(!inc.has_incoming(top, head));
    Ok(())
}

#[test]
fn array_self_interaction() -> NetsResult<()> {
    // A 1x2 array at pitch 5 of a 10-wide square: the two members connect
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(
        top,
        Instance::array(
            leaf,
            Transform::identity(),
            Point::new(5, 0),
            Point::new(0, 0),
            2,
            1,
        ),
    );
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let top_cc = tree.clusters_per_cell(top);
    let heads = connected_ids(top_cc);
    assert_eq!(heads.len(), 1);
    let conns = top_cc.connections_for_cluster(heads[0]);
    assert_eq!(conns.len(), 2);
    assert!(conns.iter().all(|c| c.id == 1 && c.inst_elem.inst == 0));
    let members: BTreeSet<ArrayIndex> = conns.iter().map(|c| c.inst_elem.index).collect();
    assert_eq!(members, BTreeSet::from([0, 1]));
    assert!(!tree.clusters_per_cell(leaf).is_root(1));

    check_consistency(&tree, &[leaf, top]);
    Ok(())
}

#[test]
fn root_promotion_via_two_parents() -> NetsResult<()> {
    // leaf.K is root; p1 and p2 each place leaf once; top overlaps them.
    // Promotion must hang a connector into every parent and merge at top.
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let p1 = layout.add_cell("p1");
    let p2 = layout.add_cell("p2");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(p1, Instance::single(leaf, Transform::identity()));
    layout.add_inst(p2, Instance::single(leaf, Transform::identity()));
    layout.add_inst(top, Instance::single(p1, Transform::identity()));
    layout.add_inst(top, Instance::single(p2, Transform::translate(5., 0.)));
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;

    // The leaf cluster lost its root status
    assert!(!tree.clusters_per_cell(leaf).is_root(1));

    // Each intermediate parent carries one dummy connector into leaf.K
    for pc in [p1, p2] {
        let cc = tree.clusters_per_cell(pc);
        let heads = connected_ids(cc);
        assert_eq!(heads.len(), 1, "one connector expected in cell {}", pc);
        assert!(heads[0] > cc.len(), "connector must be a dummy id");
        let conns = cc.connections_for_cluster(heads[0]);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].id, 1);
        assert!(!cc.is_root(heads[0]));
    }

    // The top merges both sides into a single cluster
    let top_cc = tree.clusters_per_cell(top);
    let heads = connected_ids(top_cc);
    assert_eq!(heads.len(), 1);
    let conns = top_cc.connections_for_cluster(heads[0]);
    assert_eq!(conns.len(), 2);
    let insts: BTreeSet<InstId> = conns.iter().map(|c| c.inst_elem.inst).collect();
    assert_eq!(insts, BTreeSet::from([0, 1]));
    assert!(top_cc.is_root(heads[0]));

    check_consistency(&tree, &[leaf, p1, p2, top]);
    Ok(())
}

#[test]
fn local_cluster_bridges_instances() -> NetsResult<()> {
    // A local strap in the top cell shorts two far-apart leaf instances:
    // the dummy connector from promotion must merge into the strap's
    // cluster through the deferred-join pass
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(top, Instance::single(leaf, Transform::identity()));
    layout.add_inst(top, Instance::single(leaf, Transform::translate(15., 0.)));
    layout.add_shape(top, 1, rect(0, 0, 25, 10));
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let top_cc = tree.clusters_per_cell(top);

    // One net head: the strap's own cluster, owning both child connections
    let heads = connected_ids(top_cc);
    assert_eq!(heads, vec![1]);
    let conns = top_cc.connections_for_cluster(1);
    assert_eq!(conns.len(), 2);
    let insts: BTreeSet<InstId> = conns.iter().map(|c| c.inst_elem.inst).collect();
    assert_eq!(insts, BTreeSet::from([0, 1]));

    check_consistency(&tree, &[leaf, top]);
    Ok(())
}

#[test]
fn connector_chain_through_empty_cell() -> NetsResult<()> {
    // top's strap reaches a leaf cluster through a shape-less mid cell;
    // the mid level gets a synthetic connector stitching the levels
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let mid = layout.add_cell("mid");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(mid, Instance::single(leaf, Transform::identity()));
    layout.add_inst(top, Instance::single(mid, Transform::identity()));
    layout.add_shape(top, 1, rect(5, 5, 20, 8));
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;

    // top: the strap cluster points into mid's connector
    let top_cc = tree.clusters_per_cell(top);
    assert_eq!(connected_ids(top_cc), vec![1]);
    let conns = top_cc.connections_for_cluster(1);
    assert_eq!(conns.len(), 1);
    let mid_connector = conns[0].id;

    // mid: a dummy connector, pointing into leaf cluster 1
    let mid_cc = tree.clusters_per_cell(mid);
    assert!(mid_connector > mid_cc.len());
    let mid_conns = mid_cc.connections_for_cluster(mid_connector);
    assert_eq!(mid_conns.len(), 1);
    assert_eq!(mid_conns[0].id, 1);
    assert!(!mid_cc.is_root(mid_connector));
    assert!(!tree.clusters_per_cell(leaf).is_root(1));

    // The whole chain is walkable from the top
    let mut count = 0;
    let mut it = RecursiveClusterShapeIterator::new(&tree, &layout, 1, top, 1);
    while !it.at_end() {
        count += 1;
        it.advance();
    }
    assert_eq!(count, 2); // the strap and the leaf square

    check_consistency(&tree, &[leaf, mid, top]);
    Ok(())
}

#[test]
fn cluster_node_traversal() -> NetsResult<()> {
    let mut layout = Layout::new("test");
    let leaf = layout.add_cell("leaf");
    let p1 = layout.add_cell("p1");
    let p2 = layout.add_cell("p2");
    let top = layout.add_cell("top");
    layout.add_shape(leaf, 1, rect(0, 0, 10, 10));
    layout.add_inst(p1, Instance::single(leaf, Transform::identity()));
    layout.add_inst(p2, Instance::single(leaf, Transform::identity()));
    layout.add_inst(top, Instance::single(p1, Transform::identity()));
    layout.add_inst(top, Instance::single(p2, Transform::translate(5., 0.)));
    let mut conn = Connectivity::new();
    conn.connect_self(1);
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let head = connected_ids(tree.clusters_per_cell(top))[0];

    // Every node of the hierarchical cluster, depth-first
    let mut cells: Vec<CellIndex> = Vec::new();
    let mut it = RecursiveClusterIterator::new(&tree, &layout, top, head);
    while !it.at_end() {
        cells.push(it.cell_index());
        it.advance();
    }
    assert_eq!(cells.len(), 5);
    assert_eq!(cells[0], top);
    assert_eq!(cells.iter().filter(|&&c| c == leaf).count(), 2);

    // At a leaf node, the instance path has both hierarchy steps
    let mut it = RecursiveClusterIterator::new(&tree, &layout, top, head);
    while !it.at_end() {
        if it.cell_index() == leaf {
            assert_eq!(it.cluster_id(), 1);
            assert_eq!(it.inst_path().len(), 2);
        }
        it.advance();
    }
    Ok(())
}

#[test]
fn export_round_trip() -> NetsResult<()> {
    // Flat via-stack, exported to fresh layers: three congruent shapes
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape(top, 1, rect(0, 0, 10, 10));
    layout.add_shape(top, 2, rect(4, 4, 6, 6));
    layout.add_shape(top, 3, rect(0, 0, 10, 10));
    let mut conn = Connectivity::new();
    conn.connect(1, 2);
    conn.connect(2, 3);
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;

    let mapping = BTreeMap::from([(1, 100), (2, 101), (3, 102)]);
    tree.return_to_hierarchy(&mut layout, &mapping)?;

    let cell = layout.cell(top);
    assert_eq!(cell.shapes(100).len(), 1);
    assert_eq!(cell.shapes(100)[0].inner, rect(0, 0, 10, 10));
    assert_eq!(cell.shapes(101).len(), 1);
    assert_eq!(cell.shapes(101)[0].inner, rect(4, 4, 6, 6));
    assert_eq!(cell.shapes(102).len(), 1);
    assert_eq!(cell.shapes(102)[0].inner, rect(0, 0, 10, 10));
    Ok(())
}

#[test]
fn export_flattens_only_roots() -> NetsResult<()> {
    // Hierarchical net: export lands in the root cluster's cell, with the
    // child geometry flattened in; the non-root leaf cluster exports nothing
    let (mut layout, leaf, top, conn) = stitch_fixture();
    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;

    let mapping = BTreeMap::from([(1, 100)]);
    tree.return_to_hierarchy(&mut layout, &mapping)?;

    let mut boxes: Vec<BoundBox> = layout
        .cell(top)
        .shapes(100)
        .iter()
        .map(|e| e.inner.bbox())
        .collect();
    boxes.sort_by_key(|b| b.p0);
    assert_eq!(
        boxes,
        vec![
            BoundBox::from_points(Point::new(0, 0), Point::new(10, 10)),
            BoundBox::from_points(Point::new(5, 0), Point::new(15, 10)),
        ]
    );
    assert!(layout.cell(leaf).shapes(100).is_empty());
    Ok(())
}

#[test]
fn cancellation_unwinds() {
    struct CancelNow;
    impl ProgressSink for CancelNow {
        fn tick(&mut self) -> NetsResult<()> {
            Err(NetsError::Cancelled)
        }
    }
    let (layout, _leaf, top, conn) = stitch_fixture();
    let res = HierClusters::build_with_progress(
        &layout,
        top,
        ShapeFlags::All,
        &conn,
        DEFAULT_AREA_RATIO,
        &mut CancelNow,
    );
    assert!(matches!(res, Err(NetsError::Cancelled)));
}

#[test]
fn shape_flags_filter() -> NetsResult<()> {
    // Polygon-only clustering ignores the rectangle bridge
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape(
        top,
        1,
        Shape::Polygon(Polygon {
            points: vec![
                Point::new(0, 0),
                Point::new(10, 0),
                Point::new(10, 10),
                Point::new(0, 10),
            ],
        }),
    );
    layout.add_shape(top, 1, rect(5, 5, 15, 15));
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let all = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    assert_eq!(live_ids(all.clusters_per_cell(top)).len(), 1);
    let polys = HierClusters::build(&layout, top, ShapeFlags::PolygonsOnly, &conn)?;
    assert_eq!(live_ids(polys.clusters_per_cell(top)).len(), 1);
    assert_eq!(
        polys.clusters_per_cell(top).cluster_by_id(1).size(),
        1
    );
    Ok(())
}

#[test]
fn attributes_carry_into_clusters() -> NetsResult<()> {
    let mut layout = Layout::new("test");
    let top = layout.add_cell("top");
    layout.add_shape_with_attr(top, 1, rect(0, 0, 10, 10), 7);
    layout.add_shape_with_attr(top, 1, rect(5, 5, 15, 15), 9);
    layout.add_shape_with_attr(top, 1, rect(100, 0, 110, 10), 0);
    let mut conn = Connectivity::new();
    conn.connect_self(1);

    let tree = HierClusters::build(&layout, top, ShapeFlags::All, &conn)?;
    let cc = tree.clusters_per_cell(top);
    let merged = live_ids(cc)
        .into_iter()
        .find(|&id| cc.cluster_by_id(id).size() == 2)
        .unwrap();
    assert_eq!(
        cc.cluster_by_id(merged).attrs(),
        &BTreeSet::from([7, 9])
    );
    let single = live_ids(cc)
        .into_iter()
        .find(|&id| cc.cluster_by_id(id).size() == 1)
        .unwrap();
    // Zero attribute ids are dropped
    assert!(cc.cluster_by_id(single).attrs().is_empty());
    Ok(())
}
