//!
//! # Box Scanners
//!
//! Sweep-based enumeration of touching box pairs. Items are inserted as
//! `(BoundBox, payload)` pairs; `process` reports every touching pair to a
//! receiver and fires a per-item `finish` callback afterwards. A receiver may
//! short-circuit the sweep through `stop`, in which case `process` returns
//! `false`.
//!
//! Two flavors exist: [BoxScanner] pairs items of a single set against each
//! other, [BoxScanner2] pairs items of a first set against items of a second.
//!

// Local imports
use crate::bbox::BoundBox;

/// Receiver for single-set scans: touching pairs plus a per-item `finish`.
pub trait ScanReceiver<P> {
    /// A touching pair of items
    fn add(&mut self, a: &P, b: &P);
    /// Called once per inserted item after all of its pairs have been reported
    fn finish(&mut self, _item: &P) {}
    /// Short-circuit indication, checked after every reported pair
    fn stop(&self) -> bool {
        false
    }
}

/// Receiver for two-set scans
pub trait ScanReceiver2<P1, P2> {
    /// A touching pair, one item from each set
    fn add(&mut self, a: &P1, b: &P2);
    /// Short-circuit indication, checked after every reported pair
    fn stop(&self) -> bool {
        false
    }
}

/// # Single-Set Box Scanner
pub struct BoxScanner<P> {
    items: Vec<(BoundBox, P)>,
}
impl<P> BoxScanner<P> {
    /// Create a new, empty scanner
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }
    /// Insert an item. Empty boxes are retained for `finish` but never pair.
    pub fn insert(&mut self, bbox: BoundBox, payload: P) {
        self.items.push((bbox, payload));
    }
    /// Run the sweep. Returns `false` if the receiver stopped it early.
    pub fn process<R: ScanReceiver<P>>(&mut self, rec: &mut R) -> bool {
        self.items
            .sort_by(|(b1, _), (b2, _)| (b1.p0.x, b1.p0.y).cmp(&(b2.p0.x, b2.p0.y)));
        for i in 0..self.items.len() {
            if self.items[i].0.is_empty() {
                continue;
            }
            for j in (i + 1)..self.items.len() {
                if self.items[j].0.p0.x > self.items[i].0.p1.x {
                    break;
                }
                if self.items[i].0.touches(&self.items[j].0) {
                    // Split the borrow so both payloads can be handed out
                    let (head, tail) = self.items.split_at(j);
                    rec.add(&head[i].1, &tail[0].1);
                    if rec.stop() {
                        return false;
                    }
                }
            }
        }
        for (_, p) in self.items.iter() {
            rec.finish(p);
        }
        true
    }
}
impl<P> Default for BoxScanner<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// # Two-Set Box Scanner
pub struct BoxScanner2<P1, P2> {
    set1: Vec<(BoundBox, P1)>,
    set2: Vec<(BoundBox, P2)>,
}
impl<P1, P2> BoxScanner2<P1, P2> {
    /// Create a new, empty scanner
    pub fn new() -> Self {
        Self {
            set1: Vec::new(),
            set2: Vec::new(),
        }
    }
    /// Insert into the first set
    pub fn insert1(&mut self, bbox: BoundBox, payload: P1) {
        self.set1.push((bbox, payload));
    }
    /// Insert into the second set
    pub fn insert2(&mut self, bbox: BoundBox, payload: P2) {
        self.set2.push((bbox, payload));
    }
    /// Run the sweep. Returns `false` if the receiver stopped it early.
    pub fn process<R: ScanReceiver2<P1, P2>>(&mut self, rec: &mut R) -> bool {
        self.set2
            .sort_by(|(b1, _), (b2, _)| (b1.p0.x, b1.p0.y).cmp(&(b2.p0.x, b2.p0.y)));
        // Widest second-set box bounds how far left of a first-set box a
        // touching partner's origin can lie
        let max_width = self
            .set2
            .iter()
            .filter(|(b, _)| !b.is_empty())
            .map(|(b, _)| b.width())
            .max()
            .unwrap_or(0);
        for (b1, p1) in self.set1.iter() {
            if b1.is_empty() {
                continue;
            }
            let lo = self
                .set2
                .partition_point(|(b2, _)| b2.p0.x < b1.p0.x.saturating_sub(max_width));
            for (b2, p2) in self.set2[lo..].iter() {
                if b2.p0.x > b1.p1.x {
                    break;
                }
                if b1.touches(b2) {
                    rec.add(p1, p2);
                    if rec.stop() {
                        return false;
                    }
                }
            }
        }
        true
    }
}
impl<P1, P2> Default for BoxScanner2<P1, P2> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Point;

    fn boxed(x0: crate::Int, y0: crate::Int, x1: crate::Int, y1: crate::Int) -> BoundBox {
        BoundBox::from_points(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[derive(Default)]
    struct Collect {
        pairs: Vec<(usize, usize)>,
        finished: Vec<usize>,
    }
    impl ScanReceiver<usize> for Collect {
        fn add(&mut self, a: &usize, b: &usize) {
            let (a, b) = (*a.min(b), *a.max(b));
            self.pairs.push((a, b));
        }
        fn finish(&mut self, item: &usize) {
            self.finished.push(*item);
        }
    }
    impl ScanReceiver2<usize, usize> for Collect {
        fn add(&mut self, a: &usize, b: &usize) {
            self.pairs.push((*a, *b));
        }
    }

    #[test]
    fn single_set_pairs() {
        let mut bs = BoxScanner::new();
        bs.insert(boxed(0, 0, 10, 10), 0);
        bs.insert(boxed(5, 5, 15, 15), 1);
        bs.insert(boxed(100, 100, 110, 110), 2);
        bs.insert(boxed(10, 10, 20, 20), 3); // corner-touches 0, overlaps 1
        let mut rec = Collect::default();
        assert!(bs.process(&mut rec));
        rec.pairs.sort();
        assert_eq!(rec.pairs, vec![(0, 1), (0, 3), (1, 3)]);
        assert_eq!(rec.finished.len(), 4);
    }
    #[test]
    fn two_set_pairs() {
        let mut bs = BoxScanner2::new();
        bs.insert1(boxed(0, 0, 10, 10), 0);
        bs.insert1(boxed(50, 0, 60, 10), 1);
        bs.insert2(boxed(-20, 0, 0, 4), 10); // wide box left of item 0
        bs.insert2(boxed(9, 9, 55, 12), 11); // overlaps both
        bs.insert2(boxed(200, 200, 201, 201), 12);
        let mut rec = Collect::default();
        assert!(bs.process(&mut rec));
        rec.pairs.sort();
        assert_eq!(rec.pairs, vec![(0, 10), (0, 11), (1, 11)]);
    }
    #[test]
    fn stopping() {
        struct StopFirst(usize);
        impl ScanReceiver<usize> for StopFirst {
            fn add(&mut self, _a: &usize, _b: &usize) {
                self.0 += 1;
            }
            fn stop(&self) -> bool {
                self.0 > 0
            }
        }
        let mut bs = BoxScanner::new();
        for i in 0..4 {
            bs.insert(boxed(0, 0, 10, 10), i);
        }
        let mut rec = StopFirst(0);
        assert!(!bs.process(&mut rec));
        assert_eq!(rec.0, 1);
    }
}
