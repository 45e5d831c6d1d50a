//!
//! # Rectangular Bounding Boxes and Associated Trait
//!

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::{
    geom::{Point, Polygon, Rect, Shape, Transform},
    Int,
};

/// # Rectangular Bounding Box
///
/// Points `p0` and `p1` represent opposite corners of a bounding rectangle.
/// `p0` is always closest to negative-infinity, in both x and y,
/// and `p1` is always closest to positive-infinity.
///
/// The "empty" box has `p0 > p1`; it touches nothing, unions as a no-op,
/// and has zero area.
///
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct BoundBox {
    pub p0: Point,
    pub p1: Point,
}
impl BoundBox {
    /// Create a new [BoundBox] from two [Point]s.
    /// Callers are responsible for ensuring that p0.x <= p1.x, and p0.y <= p1.y.
    fn new(p0: Point, p1: Point) -> Self {
        Self { p0, p1 }
    }
    /// Create a new [BoundBox] from a single [Point].
    /// The resultant [BoundBox] comprises solely the point, having zero area.
    pub fn from_point(pt: Point) -> Self {
        Self { p0: pt, p1: pt }
    }
    /// Create a new [BoundBox] from two points
    pub fn from_points(p0: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(p0.x.min(p1.x), p0.y.min(p1.y)),
            p1: Point::new(p0.x.max(p1.x), p0.y.max(p1.y)),
        }
    }
    /// Create an empty, otherwise invalid [BoundBox]
    pub fn empty() -> Self {
        Self {
            p0: Point::new(Int::MAX, Int::MAX),
            p1: Point::new(Int::MIN, Int::MIN),
        }
    }
    /// Create the "world" [BoundBox], enclosing every representable shape
    pub fn world() -> Self {
        Self {
            p0: Point::new(Int::MIN / 2, Int::MIN / 2),
            p1: Point::new(Int::MAX / 2, Int::MAX / 2),
        }
    }
    /// Boolean indication of whether a box is empty
    pub fn is_empty(&self) -> bool {
        self.p0.x > self.p1.x || self.p0.y > self.p1.y
    }
    /// Boolean indication of whether [Point] `pt` lies inside our box.
    pub fn contains(&self, pt: &Point) -> bool {
        self.p0.x <= pt.x && self.p1.x >= pt.x && self.p0.y <= pt.y && self.p1.y >= pt.y
    }
    /// Boolean indication of whether we share any point with `other`.
    /// Edge and corner contact count as touching.
    pub fn touches(&self, other: &BoundBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.p0.x <= other.p1.x
            && other.p0.x <= self.p1.x
            && self.p0.y <= other.p1.y
            && other.p0.y <= self.p1.y
    }
    /// Get the box's width
    pub fn width(&self) -> Int {
        if self.is_empty() {
            return 0;
        }
        self.p1.x - self.p0.x
    }
    /// Get the box's height
    pub fn height(&self) -> Int {
        if self.is_empty() {
            return 0;
        }
        self.p1.y - self.p0.y
    }
    /// Calculate our area. Empty boxes have zero area.
    pub fn area(&self) -> i128 {
        if self.is_empty() {
            return 0;
        }
        (self.width() as i128) * (self.height() as i128)
    }
    /// Calculate our center-point
    pub fn center(&self) -> Point {
        Point::new((self.p0.x + self.p1.x) / 2, (self.p0.y + self.p1.y) / 2)
    }
    /// Create a new [BoundBox] surrounding our corners transformed by `trans`
    pub fn transformed(&self, trans: &Transform) -> BoundBox {
        if self.is_empty() {
            return BoundBox::empty();
        }
        let corners = [
            self.p0,
            Point::new(self.p1.x, self.p0.y),
            self.p1,
            Point::new(self.p0.x, self.p1.y),
        ];
        let mut bbox = BoundBox::empty();
        for c in &corners {
            bbox = c.transform(trans).union(&bbox);
        }
        bbox
    }
}
impl Default for BoundBox {
    /// Default boxes are empty
    fn default() -> Self {
        Self::empty()
    }
}

///
/// # Bounding Box Trait
///
/// Methods for interacting with [BoundBox]s.
/// Implementations for [Point]s, [Shape]s, and [BoundBox]s
/// enable geometric transformations such as union and intersection.
///
pub trait BoundBoxTrait {
    /// Compute the intersection with rectangular bounding box `bbox`.
    /// Creates and returns a new [BoundBox].
    fn intersection(&self, bbox: &BoundBox) -> BoundBox;
    /// Compute the union with rectangular bounding box `bbox`.
    /// Creates and returns a new [BoundBox].
    fn union(&self, bbox: &BoundBox) -> BoundBox;
    /// Compute a rectangular bounding box around the implementing type.
    fn bbox(&self) -> BoundBox;
}

impl BoundBoxTrait for BoundBox {
    fn intersection(&self, bbox: &BoundBox) -> BoundBox {
        let pmin = Point::new(self.p0.x.max(bbox.p0.x), self.p0.y.max(bbox.p0.y));
        let pmax = Point::new(self.p1.x.min(bbox.p1.x), self.p1.y.min(bbox.p1.y));
        if pmin.x > pmax.x || pmin.y > pmax.y {
            return BoundBox::empty();
        }
        BoundBox::new(pmin, pmax)
    }
    fn union(&self, bbox: &BoundBox) -> BoundBox {
        if self.is_empty() {
            return *bbox;
        }
        if bbox.is_empty() {
            return *self;
        }
        BoundBox::new(
            Point::new(self.p0.x.min(bbox.p0.x), self.p0.y.min(bbox.p0.y)),
            Point::new(self.p1.x.max(bbox.p1.x), self.p1.y.max(bbox.p1.y)),
        )
    }
    fn bbox(&self) -> BoundBox {
        *self
    }
}

impl BoundBoxTrait for Point {
    fn intersection(&self, bbox: &BoundBox) -> BoundBox {
        if !bbox.contains(self) {
            return BoundBox::empty();
        }
        BoundBox::from_point(*self)
    }
    fn union(&self, bbox: &BoundBox) -> BoundBox {
        BoundBox::from_point(*self).union(bbox)
    }
    fn bbox(&self) -> BoundBox {
        BoundBox::from_point(*self)
    }
}

impl BoundBoxTrait for Rect {
    fn intersection(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().intersection(bbox)
    }
    fn union(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().union(bbox)
    }
    fn bbox(&self) -> BoundBox {
        BoundBox::from_points(self.p0, self.p1)
    }
}

impl BoundBoxTrait for Polygon {
    fn intersection(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().intersection(bbox)
    }
    fn union(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().union(bbox)
    }
    fn bbox(&self) -> BoundBox {
        let mut bbox = BoundBox::empty();
        for pt in &self.points {
            bbox = pt.union(&bbox);
        }
        bbox
    }
}

impl BoundBoxTrait for Shape {
    fn intersection(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().intersection(bbox)
    }
    fn union(&self, bbox: &BoundBox) -> BoundBox {
        self.bbox().union(bbox)
    }
    fn bbox(&self) -> BoundBox {
        match self {
            Shape::Rect(ref r) => r.bbox(),
            Shape::Polygon(ref p) => p.bbox(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Rect;

    #[test]
    fn empty_boxes() {
        let e = BoundBox::empty();
        assert!(e.is_empty());
        assert_eq!(e.area(), 0);
        assert!(!e.touches(&e));
        let b = Shape::Rect(Rect::new(Point::new(0, 0), Point::new(10, 10))).bbox();
        assert!(!e.touches(&b));
        assert_eq!(e.union(&b), b);
        assert!(e.intersection(&b).is_empty());
    }
    #[test]
    fn touching() {
        let a = BoundBox::from_points(Point::new(0, 0), Point::new(10, 10));
        let b = BoundBox::from_points(Point::new(10, 10), Point::new(20, 20));
        let c = BoundBox::from_points(Point::new(11, 11), Point::new(20, 20));
        // Corner contact counts
        assert!(a.touches(&b));
        assert!(b.touches(&a));
        assert!(!a.touches(&c));
        assert_eq!(a.intersection(&b).area(), 0);
        assert_eq!(a.union(&c).area(), 400);
    }
    #[test]
    fn transformed() {
        let a = BoundBox::from_points(Point::new(0, 0), Point::new(10, 4));
        let t = Transform::rotate(90.);
        let at = a.transformed(&t);
        assert_eq!(at, BoundBox::from_points(Point::new(-4, 0), Point::new(0, 10)));
        let back = at.transformed(&t.invert());
        assert_eq!(back, a);
    }
}
