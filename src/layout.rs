//!
//! # Layout Data Model
//!
//! The minimal hierarchical layout database the connectivity engine consumes:
//! [Layout], [Cell], array-capable [Instance]s, layer-tagged [Element]s, and
//! the named-[Layers] manager.
//!
//! Cells reference each other strictly by [CellIndex]; there are no
//! back-pointers. Hierarchy navigation (bottom-up order, called-cell closure,
//! parent instances) and hierarchical bounding boxes are computed on demand
//! and memoized, with the caches invalidated on any mutation.
//!

// Std-Lib
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// Crates.io
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

// Local imports
use crate::{
    bbox::{BoundBox, BoundBoxTrait},
    error::{NetsError, NetsResult},
    geom::{Point, Shape, Transform},
};

/// # Cell Index Type-Alias
///
/// Stable index of a [Cell] within its [Layout]. Cells are never removed,
/// so an index stays valid for the lifetime of the layout.
pub type CellIndex = usize;
/// Index of an [Instance] within its parent [Cell]
pub type InstId = usize;
/// Linear index of a member within an [Instance] array
pub type ArrayIndex = usize;
/// # Layer Number Type-Alias
///
/// Shapes are tagged with plain layer numbers; the [Layers] manager
/// optionally associates names with them.
pub type LayerId = u32;
/// Opaque shape-attribute (property) identifier. Zero means "none".
pub type AttrId = usize;

/// Distance Units Enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Units {
    /// Micrometers, or microns for we olde folke
    Micro,
    /// Nanometers
    Nano,
    /// Angstroms
    Angstrom,
    /// Picometers
    Pico,
}
impl Default for Units {
    /// Default units are nanometers
    fn default() -> Units {
        Units::Nano
    }
}

// Create key-types for each internal type stored in [SlotMap]s
new_key_type! {
    /// Keys for [Layer] entries
    pub struct LayerKey;
}

/// # Layer Metadata
///
/// Associates an optional name with a layer number.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Layer {
    /// Layer Number
    pub num: LayerId,
    /// Layer Name
    pub name: Option<String>,
}
impl Layer {
    /// Create a new [Layer] with the given `num` and `name`
    pub fn new(num: LayerId, name: impl Into<String>) -> Self {
        Self {
            num,
            name: Some(name.into()),
        }
    }
    /// Create a new [Layer] with the given `num` and no name
    pub fn from_num(num: LayerId) -> Self {
        Self { num, name: None }
    }
}

/// # Layer Set & Manager
///
/// Keep track of registered layers, and index them by name and number.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Layers {
    pub slots: SlotMap<LayerKey, Layer>,
    pub nums: HashMap<LayerId, LayerKey>,
    pub names: HashMap<String, LayerKey>,
}
impl Layers {
    /// Add a [Layer] to our slot-map, number-map, and name-map
    pub fn add(&mut self, layer: Layer) -> LayerKey {
        let num = layer.num;
        let name = layer.name.clone();
        let key = self.slots.insert(layer);
        self.nums.insert(num, key);
        if let Some(s) = name {
            self.names.insert(s, key);
        }
        key
    }
    /// Get the [LayerKey] for layer-number `num`
    pub fn keynum(&self, num: LayerId) -> Option<LayerKey> {
        self.nums.get(&num).copied()
    }
    /// Get the [LayerKey] for layer-name `name`
    pub fn keyname(&self, name: impl Into<String>) -> Option<LayerKey> {
        self.names.get(&name.into()).copied()
    }
    /// Get a reference to [Layer] number `num`
    pub fn num(&self, num: LayerId) -> Option<&Layer> {
        let key = self.nums.get(&num)?;
        self.slots.get(*key)
    }
    /// Get a reference to [Layer] name `name`
    pub fn name(&self, name: &str) -> Option<&Layer> {
        let key = self.names.get(name)?;
        self.slots.get(*key)
    }
    /// Get a reference to [Layer] from [LayerKey] `key`
    pub fn get(&self, key: LayerKey) -> Option<&Layer> {
        self.slots.get(key)
    }
    /// Get the layer number registered under `name`
    pub fn numname(&self, name: &str) -> Option<LayerId> {
        self.name(name).map(|l| l.num)
    }
}

/// # Shape-Category Selection
///
/// Selects which shape categories a clustering pass reads from each cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeFlags {
    /// All shape categories
    All,
    /// Rectangles only
    RectsOnly,
    /// Polygons only
    PolygonsOnly,
}
impl ShapeFlags {
    /// Whether `shape` is selected by these flags
    pub fn matches(&self, shape: &Shape) -> bool {
        match (self, shape) {
            (ShapeFlags::All, _) => true,
            (ShapeFlags::RectsOnly, Shape::Rect(_)) => true,
            (ShapeFlags::PolygonsOnly, Shape::Polygon(_)) => true,
            _ => false,
        }
    }
}

/// # Layer-Resident Geometric Element
///
/// A [Shape] plus its optional attribute (property) id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Element {
    /// Attribute / property id; zero means "none"
    pub attr: AttrId,
    /// Shape
    pub inner: Shape,
}

/// # Cell Instance, Single or Arrayed
///
/// A placement of `cell` under a base [Transform], optionally repeated on a
/// regular grid: `na` × `nb` members displaced by integer multiples of the
/// `a` and `b` vectors. A single placement is an array with `na == nb == 1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    /// Instantiated cell
    pub cell: CellIndex,
    /// Base placement transform, shared by every member
    pub trans: Transform,
    /// First array displacement vector
    pub a: Point,
    /// Second array displacement vector
    pub b: Point,
    /// Member count along `a`
    pub na: usize,
    /// Member count along `b`
    pub nb: usize,
}
impl Instance {
    /// Create a single (non-arrayed) placement of `cell`
    pub fn single(cell: CellIndex, trans: Transform) -> Self {
        Self {
            cell,
            trans,
            a: Point::default(),
            b: Point::default(),
            na: 1,
            nb: 1,
        }
    }
    /// Create a regular `na` × `nb` array of `cell`
    pub fn array(
        cell: CellIndex,
        trans: Transform,
        a: Point,
        b: Point,
        na: usize,
        nb: usize,
    ) -> Self {
        Self {
            cell,
            trans,
            a,
            b,
            na: na.max(1),
            nb: nb.max(1),
        }
    }
    /// Total member count
    pub fn size(&self) -> usize {
        self.na * self.nb
    }
    /// The placement transform of array member `idx`
    pub fn member_trans(&self, idx: ArrayIndex) -> Transform {
        let ia = (idx / self.nb) as crate::Int;
        let ib = (idx % self.nb) as crate::Int;
        let d = self.a.scaled(ia) + self.b.scaled(ib);
        Transform::cascade(&Transform::shift(d), &self.trans)
    }
    /// The array-expanded bounding box, given the cell's own box `cell_box`
    pub fn bbox_of(&self, cell_box: &BoundBox) -> BoundBox {
        let mut bbox = BoundBox::empty();
        for idx in 0..self.size() {
            bbox = cell_box.transformed(&self.member_trans(idx)).union(&bbox);
        }
        bbox
    }
    /// The array-expanded bounding box, with the cell box provided by `f`
    pub fn bbox_with<F: FnMut(CellIndex) -> BoundBox>(&self, f: &mut F) -> BoundBox {
        let cell_box = f(self.cell);
        self.bbox_of(&cell_box)
    }
    /// Indices of the members whose footprint (per `cell_box`) touches `region`
    pub fn members_touching(&self, region: &BoundBox, cell_box: &BoundBox) -> Vec<ArrayIndex> {
        (0..self.size())
            .filter(|&idx| {
                cell_box
                    .transformed(&self.member_trans(idx))
                    .touches(region)
            })
            .collect()
    }
}

/// # One Array-Member of One Instance
///
/// Identifies a single placement: an instance within its parent cell, plus
/// the member index for arrays. Which cell owns `inst` is implied by where
/// the element is stored or passed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InstElement {
    /// Instance id within the owning cell
    pub inst: InstId,
    /// Array member index
    pub index: ArrayIndex,
}
impl InstElement {
    /// Create a new [InstElement]
    pub fn new(inst: InstId, index: ArrayIndex) -> Self {
        Self { inst, index }
    }
}

/// # A Parent's Instantiation of a Child Cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInst {
    /// The instantiating cell
    pub parent: CellIndex,
    /// The instance within `parent`
    pub inst: InstId,
}

/// # Layout Cell
///
/// Layer-tagged shape lists plus child instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    /// Cell Name
    pub name: String,
    index: CellIndex,
    shapes: BTreeMap<LayerId, Vec<Element>>,
    insts: Vec<Instance>,
}
impl Cell {
    /// Our index within the owning [Layout]
    pub fn index(&self) -> CellIndex {
        self.index
    }
    /// Shapes on `layer`, empty if the layer is unpopulated
    pub fn shapes(&self, layer: LayerId) -> &[Element] {
        self.shapes.get(&layer).map(Vec::as_slice).unwrap_or(&[])
    }
    /// The populated layers, in increasing order
    pub fn layers(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.shapes.keys().copied()
    }
    /// Our direct child instances
    pub fn insts(&self) -> &[Instance] {
        &self.insts
    }
    /// A single child instance by id
    pub fn inst(&self, id: InstId) -> &Instance {
        &self.insts[id]
    }
}

/// # Hierarchical Layout
///
/// Owns every [Cell]; all cross-references are by [CellIndex].
#[derive(Debug, Default)]
pub struct Layout {
    /// Layout Name
    pub name: String,
    /// Distance Units
    pub units: Units,
    /// Layer Definitions
    pub layers: Layers,
    cells: Vec<Cell>,
    names: HashMap<String, CellIndex>,
    // Hierarchical bbox memos, keyed by (cell, Some(layer)) for per-layer
    // boxes and (cell, None) for all-layer boxes. Single-threaded reads.
    bbox_cache: RefCell<HashMap<(CellIndex, Option<LayerId>), BoundBox>>,
    parents_cache: RefCell<Option<Vec<Vec<ParentInst>>>>,
}
impl Layout {
    /// Create a new and empty [Layout]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
    /// Add a new, empty [Cell]. Returns its index.
    pub fn add_cell(&mut self, name: impl Into<String>) -> CellIndex {
        let name = name.into();
        let index = self.cells.len();
        self.cells.push(Cell {
            name: name.clone(),
            index,
            ..Default::default()
        });
        self.names.insert(name, index);
        self.invalidate();
        index
    }
    /// Number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }
    /// Boolean indication of an empty (cell-less) layout
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
    /// All cells, in insertion order
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
    /// A single cell by index
    pub fn cell(&self, ci: CellIndex) -> &Cell {
        &self.cells[ci]
    }
    /// Look up a cell index by name
    pub fn cell_index(&self, name: &str) -> Option<CellIndex> {
        self.names.get(name).copied()
    }
    /// Add a [Shape] to cell `ci` on `layer`
    pub fn add_shape(&mut self, ci: CellIndex, layer: LayerId, shape: Shape) {
        self.add_shape_with_attr(ci, layer, shape, 0)
    }
    /// Add a [Shape] with attribute id `attr` to cell `ci` on `layer`
    pub fn add_shape_with_attr(
        &mut self,
        ci: CellIndex,
        layer: LayerId,
        shape: Shape,
        attr: AttrId,
    ) {
        self.cells[ci]
            .shapes
            .entry(layer)
            .or_default()
            .push(Element { attr, inner: shape });
        self.invalidate();
    }
    /// Add an [Instance] to cell `ci`. Returns its id.
    pub fn add_inst(&mut self, ci: CellIndex, inst: Instance) -> InstId {
        let id = self.cells[ci].insts.len();
        self.cells[ci].insts.push(inst);
        self.invalidate();
        id
    }
    /// Drop the hierarchy and bbox memos after a mutation
    fn invalidate(&mut self) {
        self.bbox_cache.borrow_mut().clear();
        *self.parents_cache.borrow_mut() = None;
    }

    /// Every cell in bottom-up (children-first) dependency order.
    /// Fails on recursive instantiation.
    pub fn bottom_up(&self) -> NetsResult<Vec<CellIndex>> {
        let n = self.cells.len();
        let mut order = Vec::with_capacity(n);
        let mut seen = vec![false; n];
        let mut pending = vec![false; n];
        for ci in 0..n {
            self.push_bottom_up(ci, &mut order, &mut seen, &mut pending)?;
        }
        Ok(order)
    }
    /// Depth-first post-order insertion of `ci` and its children
    fn push_bottom_up(
        &self,
        ci: CellIndex,
        order: &mut Vec<CellIndex>,
        seen: &mut Vec<bool>,
        pending: &mut Vec<bool>,
    ) -> NetsResult<()> {
        if seen[ci] {
            return Ok(());
        }
        if pending[ci] {
            return Err(NetsError::Hierarchy(format!(
                "recursive instantiation of cell {}",
                self.cells[ci].name
            )));
        }
        pending[ci] = true;
        for inst in &self.cells[ci].insts {
            self.push_bottom_up(inst.cell, order, seen, pending)?;
        }
        pending[ci] = false;
        seen[ci] = true;
        order.push(ci);
        Ok(())
    }
    /// The transitive closure of cells called from `ci`, excluding `ci` itself
    pub fn collect_called_cells(&self, ci: CellIndex) -> BTreeSet<CellIndex> {
        let mut called = BTreeSet::new();
        let mut stack: Vec<CellIndex> =
            self.cells[ci].insts.iter().map(|i| i.cell).collect();
        while let Some(c) = stack.pop() {
            if called.insert(c) {
                stack.extend(self.cells[c].insts.iter().map(|i| i.cell));
            }
        }
        called
    }
    /// Every instantiation of `ci` anywhere in the layout
    pub fn parent_insts(&self, ci: CellIndex) -> Vec<ParentInst> {
        self.ensure_parents();
        self.parents_cache.borrow().as_ref().unwrap()[ci].clone()
    }
    /// The distinct parent cells of `ci`, in increasing index order
    pub fn parent_cells(&self, ci: CellIndex) -> Vec<CellIndex> {
        let mut parents: Vec<CellIndex> =
            self.parent_insts(ci).iter().map(|p| p.parent).collect();
        parents.sort_unstable();
        parents.dedup();
        parents
    }
    fn ensure_parents(&self) {
        let mut cache = self.parents_cache.borrow_mut();
        if cache.is_some() {
            return;
        }
        let mut parents: Vec<Vec<ParentInst>> = vec![Vec::new(); self.cells.len()];
        for (pc, cell) in self.cells.iter().enumerate() {
            for (iid, inst) in cell.insts.iter().enumerate() {
                parents[inst.cell].push(ParentInst {
                    parent: pc,
                    inst: iid,
                });
            }
        }
        *cache = Some(parents);
    }

    /// The hierarchical bounding box of cell `ci` over all layers
    pub fn cell_bbox(&self, ci: CellIndex) -> BoundBox {
        self.bbox_impl(ci, None)
    }
    /// The hierarchical bounding box of cell `ci` on `layer`
    pub fn cell_layer_bbox(&self, ci: CellIndex, layer: LayerId) -> BoundBox {
        self.bbox_impl(ci, Some(layer))
    }
    fn bbox_impl(&self, ci: CellIndex, layer: Option<LayerId>) -> BoundBox {
        if let Some(b) = self.bbox_cache.borrow().get(&(ci, layer)) {
            return *b;
        }
        let cell = &self.cells[ci];
        let mut bbox = BoundBox::empty();
        match layer {
            Some(l) => {
                for e in cell.shapes(l) {
                    bbox = e.inner.union(&bbox);
                }
            }
            None => {
                for elems in cell.shapes.values() {
                    for e in elems {
                        bbox = e.inner.union(&bbox);
                    }
                }
            }
        }
        for inst in &cell.insts {
            let child = self.bbox_impl(inst.cell, layer);
            bbox = inst.bbox_of(&child).union(&bbox);
        }
        self.bbox_cache.borrow_mut().insert((ci, layer), bbox);
        bbox
    }
    /// Ids of the direct child instances of `ci` whose (geometric,
    /// array-expanded) footprint touches `region`
    pub fn insts_touching(&self, ci: CellIndex, region: &BoundBox) -> Vec<InstId> {
        self.cells[ci]
            .insts
            .iter()
            .enumerate()
            .filter(|(_, inst)| inst.bbox_of(&self.cell_bbox(inst.cell)).touches(region))
            .map(|(iid, _)| iid)
            .collect()
    }
}
