//!
//! # Geometry Module
//!
//! Defines the core geometric types including [Point], [Shape], and [Transform],
//! and the shape-to-shape interaction test ([shapes_interact]) that the
//! connectivity engine builds on. Interaction is "touching": two shapes
//! interact when they share at least one point, boundaries included.
//!

// Crates.io
use derive_more::{Add, AddAssign, Sub, SubAssign};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

// Local imports
use crate::{bbox::BoundBoxTrait, Int};

/// # Point in two-dimensional layout-space
#[derive(
    Debug,
    Copy,
    Clone,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Add,
    AddAssign,
    Sub,
    SubAssign,
)]
pub struct Point {
    pub x: Int,
    pub y: Int,
}
impl Point {
    /// Create a new [Point] from (x,y) coordinates
    pub fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }
    /// Create a new point scaled by the integer factor `f` in both dimensions
    pub fn scaled(&self, f: Int) -> Point {
        Point {
            x: self.x * f,
            y: self.y * f,
        }
    }
    /// Create a new [Point], transformed from our original location by `trans`.
    /// Coordinate transforms are applied in floating-point format,
    /// largely for rotations, and then rounded to the nearest integer.
    pub fn transform(&self, trans: &Transform) -> Point {
        let xf = self.x as f64;
        let yf = self.y as f64;
        let x = trans.a[0][0] * xf + trans.a[0][1] * yf + trans.b[0];
        let y = trans.a[1][0] * xf + trans.a[1][1] * yf + trans.b[1];
        Self {
            x: x.round() as Int,
            y: y.round() as Int,
        }
    }
}

/// # Rectangle
///
/// Axis-aligned rectangle, specified by two opposite corners.
///
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rect {
    pub p0: Point,
    pub p1: Point,
}
impl Rect {
    /// Create a new [Rect] from two corner [Point]s
    pub fn new(p0: Point, p1: Point) -> Self {
        Self { p0, p1 }
    }
    /// Calculate our center-point
    pub fn center(&self) -> Point {
        Point::new((self.p0.x + self.p1.x) / 2, (self.p0.y + self.p1.y) / 2)
    }
}

/// # Polygon
///
/// Closed n-sided polygon with arbitrary number of vertices.
/// Primarily consists of a series of ordered [Point]s.
///
/// Closure from the last point back to the first is implied;
/// the initial point need not be repeated at the end.
///
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Polygon {
    pub points: Vec<Point>,
}

/// # Shape
///
/// The primary geometric primitive of the connectivity engine.
/// Variants include [Rect] and [Polygon].
///
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[enum_dispatch(ShapeTrait)]
pub enum Shape {
    Rect(Rect),
    Polygon(Polygon),
}

impl Default for Shape {
    fn default() -> Self {
        Self::Rect(Rect::default())
    }
}

/// # ShapeTrait
///
/// Common shape operations, dispatched from the [Shape] enum to its variants by [enum_dispatch].
///
#[enum_dispatch]
pub trait ShapeTrait {
    /// Boolean indication of whether the [Shape] contains [Point] `pt`.
    /// Containment is *inclusive*: points on the shape's boundary are regarded as "inside".
    fn contains(&self, pt: &Point) -> bool;
    /// Convert to a [Polygon], our most general of shapes
    fn to_poly(&self) -> Polygon;
    /// Shift coordinates by the (x,y) values specified in `pt`
    fn shift(&mut self, pt: &Point);
}

impl ShapeTrait for Rect {
    fn contains(&self, pt: &Point) -> bool {
        let (p0, p1) = (&self.p0, &self.p1);
        p0.x.min(p1.x) <= pt.x
            && p0.x.max(p1.x) >= pt.x
            && p0.y.min(p1.y) <= pt.y
            && p0.y.max(p1.y) >= pt.y
    }
    fn to_poly(&self) -> Polygon {
        // Create a four-sided polygon, cloning our corners
        Polygon {
            points: vec![
                self.p0,
                Point::new(self.p1.x, self.p0.y),
                self.p1,
                Point::new(self.p0.x, self.p1.y),
            ],
        }
    }
    fn shift(&mut self, pt: &Point) {
        self.p0 += *pt;
        self.p1 += *pt;
    }
}
impl ShapeTrait for Polygon {
    fn contains(&self, pt: &Point) -> bool {
        // Fast way out: points outside the bounding box can't be in the polygon.
        if !self.bbox().contains(pt) {
            return false;
        }

        // Now do some real work, using the "winding number" algorithm.
        let mut winding_num: isize = 0;
        for idx in 0..self.points.len() {
            // Grab the segment's start and end points.
            // Note these accesses go one past `points.len`, closing the polygon back at its first point.
            let (past, next) = (
                &self.points[idx],
                &self.points[(idx + 1) % self.points.len()],
            );

            if past.y.min(next.y) <= pt.y && past.y.max(next.y) >= pt.y {
                // May have a hit here. Sort out whether the semi-infinite horizontal line at `y=pt.y` intersects the edge.
                if next.y == past.y {
                    // Horizontal segment on the same y-level as the point.
                    // If its x-range covers the point we have boundary contact.
                    if past.x.min(next.x) <= pt.x && past.x.max(next.x) >= pt.x {
                        return true;
                    }
                    // Hits against horizontal segments are not counted in `winding_num`.
                } else {
                    // Non-horizontal segment. Check for intersection.
                    let xsolve =
                        (next.x - past.x) * (pt.y - past.y) / (next.y - past.y) + past.x;
                    if xsolve == pt.x {
                        // The segment runs straight through the point.
                        return true;
                    } else if xsolve > pt.x {
                        // Hit on the semi-infinite horizontal line through `pt`.
                        if next.y > past.y {
                            winding_num += 1;
                        } else {
                            winding_num -= 1;
                        }
                    }
                }
            }
        }
        // Non-zero winding number means we're inside the polygon.
        winding_num != 0
    }
    fn to_poly(&self) -> Polygon {
        self.clone()
    }
    fn shift(&mut self, pt: &Point) {
        for p in self.points.iter_mut() {
            *p += *pt;
        }
    }
}

/// # Matrix-Vector Transformation
///
/// 2x2 rotation-matrix and two-entry translation vector,
/// used for relative movement of [Point]s and [Shape]s.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation / Transformation Matrix
    /// Represented in row-major order
    pub a: [[f64; 2]; 2],
    /// X-Y Translation
    pub b: [f64; 2],
}
impl Transform {
    /// The identity transform, leaving any transformed object unmodified
    pub fn identity() -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [0., 0.],
        }
    }
    /// Translation by (x,y)
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [x, y],
        }
    }
    /// Translation by the integer displacement `pt`
    pub fn shift(pt: Point) -> Self {
        Self::translate(pt.x as f64, pt.y as f64)
    }
    /// A transform to rotate by `angle` degrees
    pub fn rotate(angle: f64) -> Self {
        let sin = angle.to_radians().sin();
        let cos = angle.to_radians().cos();
        Self {
            a: [[cos, -sin], [sin, cos]],
            b: [0., 0.],
        }
    }
    /// A transform to reflect about the x-axis
    pub fn reflect_vert() -> Self {
        Self {
            a: [[1., 0.], [0., -1.]],
            b: [0., 0.],
        }
    }
    /// Boolean indication of whether this is the identity transform
    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
    /// Create a new [Transform] that is the cascade of `parent` and `child`.
    ///
    /// "Parents" and "children" refer to typical layout-instance hierarchies,
    /// in which each layer of instance has a nested set of transformations relative to its top-level parent.
    /// Points are transformed by `child` first, then by `parent`.
    ///
    /// Note this operation *is not* commutative.
    ///
    pub fn cascade(parent: &Transform, child: &Transform) -> Transform {
        // The result-transform's origin is the parent's origin,
        // plus the parent-transformed child's origin
        let mut b = matvec(&parent.a, &child.b);
        b[0] += parent.b[0];
        b[1] += parent.b[1];
        // And the cascade-matrix is the product of the parent's and child's
        let a = matmul(&parent.a, &child.a);
        Self { a, b }
    }
    /// Create the inverse of this [Transform].
    /// Layout transforms are always invertible (non-zero determinant).
    pub fn invert(&self) -> Transform {
        let det = self.a[0][0] * self.a[1][1] - self.a[0][1] * self.a[1][0];
        let ai = [
            [self.a[1][1] / det, -self.a[0][1] / det],
            [-self.a[1][0] / det, self.a[0][0] / det],
        ];
        let bi = matvec(&ai, &self.b);
        Self {
            a: ai,
            b: [-bi[0], -bi[1]],
        }
    }
}
impl Default for Transform {
    /// Default transforms are identity
    fn default() -> Self {
        Self::identity()
    }
}
/// Multiply 2x2 matrices, returning a new 2x2 matrix
fn matmul(a: &[[f64; 2]; 2], b: &[[f64; 2]; 2]) -> [[f64; 2]; 2] {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}
/// Multiply a 2x2 matrix by a 2-entry vector, returning a new 2-entry vector
fn matvec(a: &[[f64; 2]; 2], b: &[f64; 2]) -> [f64; 2] {
    [
        a[0][0] * b[0] + a[0][1] * b[1],
        a[1][0] * b[0] + a[1][1] * b[1],
    ]
}

pub trait TransformTrait {
    /// Apply matrix-vector [Transform] `trans`.
    /// Creates a new shape at a location equal to the transformation of our own.
    fn transform(&self, trans: &Transform) -> Self;
}
impl TransformTrait for Shape {
    fn transform(&self, trans: &Transform) -> Self {
        match self {
            Shape::Rect(r) => Shape::Rect(r.transform(trans)),
            Shape::Polygon(p) => Shape::Polygon(p.transform(trans)),
        }
    }
}
impl TransformTrait for Rect {
    fn transform(&self, trans: &Transform) -> Self {
        Rect {
            p0: self.p0.transform(trans),
            p1: self.p1.transform(trans),
        }
    }
}
impl TransformTrait for Polygon {
    fn transform(&self, trans: &Transform) -> Self {
        Polygon {
            points: self.points.iter().map(|p| p.transform(trans)).collect(),
        }
    }
}

/// Cross-product orientation of the triplet `(a, b, c)`.
/// Positive for counter-clockwise, negative for clockwise, zero for collinear.
/// Products are widened to avoid overflow on large coordinates.
fn orientation(a: &Point, b: &Point, c: &Point) -> i128 {
    let v1 = ((b.x - a.x) as i128) * ((c.y - a.y) as i128);
    let v2 = ((b.y - a.y) as i128) * ((c.x - a.x) as i128);
    v1 - v2
}

/// For collinear `(a, b, p)`, whether `p` lies within the closed segment `(a, b)`.
fn on_segment(a: &Point, b: &Point, p: &Point) -> bool {
    a.x.min(b.x) <= p.x && p.x <= a.x.max(b.x) && a.y.min(b.y) <= p.y && p.y <= a.y.max(b.y)
}

/// Boolean indication of whether closed segments `(a1, a2)` and `(b1, b2)`
/// share any point, endpoints and collinear overlap included.
pub(crate) fn segments_intersect(a1: &Point, a2: &Point, b1: &Point, b2: &Point) -> bool {
    let o1 = orientation(a1, a2, b1);
    let o2 = orientation(a1, a2, b2);
    let o3 = orientation(b1, b2, a1);
    let o4 = orientation(b1, b2, a2);

    if ((o1 > 0) != (o2 > 0) && o1 != 0 && o2 != 0) && ((o3 > 0) != (o4 > 0) && o3 != 0 && o4 != 0)
    {
        return true;
    }
    (o1 == 0 && on_segment(a1, a2, b1))
        || (o2 == 0 && on_segment(a1, a2, b2))
        || (o3 == 0 && on_segment(b1, b2, a1))
        || (o4 == 0 && on_segment(b1, b2, a2))
}

/// # Shape Interaction Test
///
/// Boolean indication of whether shapes `a` and `b` share at least one point.
/// Touching at a boundary or corner counts as interaction.
/// Axis-aligned rectangles take a bounding-box fast path; the general case
/// works on polygon edges and inclusive point containment.
pub fn shapes_interact(a: &Shape, b: &Shape) -> bool {
    let (ba, bb) = (a.bbox(), b.bbox());
    if !ba.touches(&bb) {
        return false;
    }
    if let (Shape::Rect(_), Shape::Rect(_)) = (a, b) {
        // For rectangles the bounding-box test is exact
        return true;
    }
    let pa = a.to_poly();
    let pb = b.to_poly();
    // Full containment, or a vertex on the other's boundary
    if pa.points.iter().any(|p| pb.contains(p)) || pb.points.iter().any(|p| pa.contains(p)) {
        return true;
    }
    // Crossing edges without vertex containment
    let na = pa.points.len();
    let nb = pb.points.len();
    for i in 0..na {
        let (a1, a2) = (&pa.points[i], &pa.points[(i + 1) % na]);
        for j in 0..nb {
            let (b1, b2) = (&pb.points[j], &pb.points[(j + 1) % nb]);
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn transform_identity() {
        let shape1 = Shape::Rect(Rect {
            p0: Point::new(0, 0),
            p1: Point::new(1, 1),
        });
        let trans = Transform::identity();
        let shape2 = shape1.transform(&trans);
        assert_eq!(shape2, shape1);
        assert!(trans.is_identity());
    }
    #[test]
    fn transform_invert() {
        let trans = Transform::cascade(
            &Transform::translate(3., -7.),
            &Transform::rotate(90.),
        );
        let p = Point::new(11, 2);
        let there_and_back = p.transform(&trans).transform(&trans.invert());
        assert_eq!(there_and_back, p);
    }
    #[test]
    fn test_cascade1() {
        let trans1 = Transform::reflect_vert();
        let trans2 = Transform::translate(1., 1.);

        let p = Point::new(1, 1);
        let cascade1 = Transform::cascade(&trans1, &trans2);
        let pc1 = p.transform(&cascade1);
        assert_eq!(pc1, Point::new(2, -2));

        let cascade2 = Transform::cascade(&trans2, &trans1);
        let pc1 = p.transform(&cascade2);
        assert_eq!(pc1, Point::new(2, 0));
    }
    #[test]
    fn test_polygon_contains() {
        // Create a right triangle at the origin
        let triangle = Polygon {
            points: vec![Point::new(0, 0), Point::new(2, 0), Point::new(0, 2)],
        };
        assert!(triangle.contains(&Point::new(0, 0)));
        assert!(triangle.contains(&Point::new(1, 0)));
        assert!(triangle.contains(&Point::new(2, 0)));
        assert!(triangle.contains(&Point::new(0, 1)));
        assert!(triangle.contains(&Point::new(1, 1)));
        assert!(!triangle.contains(&Point::new(2, 2)));
    }
    #[test]
    fn test_segments() {
        // Crossing
        assert!(segments_intersect(
            &Point::new(0, 0),
            &Point::new(10, 10),
            &Point::new(0, 10),
            &Point::new(10, 0),
        ));
        // Endpoint touch
        assert!(segments_intersect(
            &Point::new(0, 0),
            &Point::new(10, 0),
            &Point::new(10, 0),
            &Point::new(20, 0),
        ));
        // Collinear overlap
        assert!(segments_intersect(
            &Point::new(0, 0),
            &Point::new(10, 0),
            &Point::new(5, 0),
            &Point::new(15, 0),
        ));
        // Parallel, apart
        assert!(!segments_intersect(
            &Point::new(0, 0),
            &Point::new(10, 0),
            &Point::new(0, 1),
            &Point::new(10, 1),
        ));
    }
    #[test]
    fn test_shapes_interact() {
        let r1 = Shape::Rect(Rect::new(Point::new(0, 0), Point::new(10, 10)));
        let r2 = Shape::Rect(Rect::new(Point::new(5, 5), Point::new(15, 15)));
        let r3 = Shape::Rect(Rect::new(Point::new(10, 10), Point::new(20, 20)));
        let r4 = Shape::Rect(Rect::new(Point::new(11, 11), Point::new(20, 20)));
        assert!(shapes_interact(&r1, &r2));
        // Corner contact counts
        assert!(shapes_interact(&r1, &r3));
        assert!(!shapes_interact(&r1, &r4));

        // A triangle overlapping r1's corner region only
        let tri = Shape::Polygon(Polygon {
            points: vec![Point::new(8, 8), Point::new(20, 8), Point::new(8, 20)],
        });
        assert!(shapes_interact(&r1, &tri));
        assert!(!shapes_interact(&r4, &Shape::Polygon(Polygon {
            points: vec![Point::new(0, 0), Point::new(5, 0), Point::new(0, 5)],
        })));

        // Edge-crossing polygons whose vertices lie outside each other
        let plus = Shape::Polygon(Polygon {
            points: vec![
                Point::new(4, -2),
                Point::new(6, -2),
                Point::new(6, 12),
                Point::new(4, 12),
            ],
        });
        let dash = Shape::Polygon(Polygon {
            points: vec![
                Point::new(-2, 4),
                Point::new(12, 4),
                Point::new(12, 6),
                Point::new(-2, 6),
            ],
        });
        assert!(shapes_interact(&plus, &dash));
    }
}
