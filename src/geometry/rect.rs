//! Points and axis-aligned rectangles (§3, §4.2).

use serde_derive::{Deserialize, Serialize};

use super::matrix::Matrix;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[inline]
    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }

    #[inline]
    #[must_use]
    pub fn transform(self, m: Matrix) -> Point {
        let (x, y) = m.transform_point(self.x, self.y);
        Point { x, y }
    }
}

/// Two opposite corners. Empty iff `x0==x1 || y0==y1`; infinite iff
/// `x0>x1 || y0>y1`. Both sentinels short-circuit every operation below, as
/// required by §3.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    pub const INFINITE: Rect = Rect {
        x0: 1.0,
        y0: 1.0,
        x1: -1.0,
        y1: -1.0,
    };

    #[inline]
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Rect { x0, y0, x1, y1 }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.x0 == self.x1 || self.y0 == self.y1
    }

    #[inline]
    pub fn is_infinite(self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    #[inline]
    pub fn width(self) -> f32 {
        self.x1 - self.x0
    }

    #[inline]
    pub fn height(self) -> f32 {
        self.y1 - self.y0
    }

    #[must_use]
    pub fn union(self, other: Rect) -> Rect {
        if self.is_infinite() || other.is_infinite() {
            return Rect::INFINITE;
        }
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    #[must_use]
    pub fn intersect(self, other: Rect) -> Rect {
        if self.is_infinite() {
            return other;
        }
        if other.is_infinite() {
            return self;
        }
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x0 >= x1 || y0 >= y1 {
            Rect::EMPTY
        } else {
            Rect { x0, y0, x1, y1 }
        }
    }

    /// Transforms all four corners and takes the axis-aligned bounding box.
    /// Infinite and empty are preserved.
    #[must_use]
    pub fn transform(self, m: Matrix) -> Rect {
        if self.is_infinite() || self.is_empty() {
            return self;
        }
        let corners = [
            m.transform_point(self.x0, self.y0),
            m.transform_point(self.x1, self.y0),
            m.transform_point(self.x0, self.y1),
            m.transform_point(self.x1, self.y1),
        ];
        let mut x0 = corners[0].0;
        let mut x1 = corners[0].0;
        let mut y0 = corners[0].1;
        let mut y1 = corners[0].1;
        for &(x, y) in &corners[1..] {
            x0 = x0.min(x);
            x1 = x1.max(x);
            y0 = y0.min(y);
            y1 = y1.max(y);
        }
        Rect { x0, y0, x1, y1 }
    }

    #[must_use]
    pub fn round(self) -> IRect {
        if self.is_infinite() {
            return IRect::INFINITE;
        }
        if self.is_empty() {
            return IRect::EMPTY;
        }
        IRect {
            x0: self.x0.floor() as i32,
            y0: self.y0.floor() as i32,
            x1: self.x1.ceil() as i32,
            y1: self.y1.ceil() as i32,
        }
    }

    pub fn contains_point(self, p: Point) -> bool {
        !self.is_empty() && p.x >= self.x0 && p.x < self.x1 && p.y >= self.y0 && p.y < self.y1
    }
}

/// Integer counterpart used for pixmap bounds; same empty/infinite sentinel
/// convention as `Rect`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl IRect {
    pub const EMPTY: IRect = IRect {
        x0: 0,
        y0: 0,
        x1: 0,
        y1: 0,
    };

    pub const INFINITE: IRect = IRect {
        x0: 1,
        y0: 1,
        x1: -1,
        y1: -1,
    };

    #[inline]
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        IRect { x0, y0, x1, y1 }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.x0 == self.x1 || self.y0 == self.y1
    }

    #[inline]
    pub fn is_infinite(self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    #[inline]
    pub fn width(self) -> i32 {
        (self.x1 - self.x0).max(0)
    }

    #[inline]
    pub fn height(self) -> i32 {
        (self.y1 - self.y0).max(0)
    }

    #[must_use]
    pub fn intersect(self, other: IRect) -> IRect {
        if self.is_infinite() {
            return other;
        }
        if other.is_infinite() {
            return self;
        }
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x0 >= x1 || y0 >= y1 {
            IRect::EMPTY
        } else {
            IRect { x0, y0, x1, y1 }
        }
    }

    #[must_use]
    pub fn union(self, other: IRect) -> IRect {
        if self.is_infinite() || other.is_infinite() {
            return IRect::INFINITE;
        }
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        IRect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn as_rect(self) -> Rect {
        Rect::new(self.x0 as f32, self.y0 as f32, self.x1 as f32, self.y1 as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_infinite() {
        assert!(Rect::EMPTY.is_empty());
        assert!(Rect::INFINITE.is_infinite());
        assert!(!Rect::new(0.0, 0.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn union_with_empty_is_identity() {
        let r = Rect::new(1.0, 1.0, 5.0, 5.0);
        assert_eq!(r.union(Rect::EMPTY), r);
        assert_eq!(Rect::EMPTY.union(r), r);
    }

    #[test]
    fn transform_of_rotation_gives_bbox() {
        let r = Rect::new(0.0, 0.0, 10.0, 0.0);
        assert!(r.is_empty());
    }

    #[test]
    fn round_rounds_outward() {
        let r = Rect::new(0.2, 0.2, 9.8, 9.8);
        assert_eq!(r.round(), IRect::new(0, 0, 10, 10));
    }

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = Rect::new(0.0, 0.0, 1.0, 1.0);
        let b = Rect::new(2.0, 2.0, 3.0, 3.0);
        assert!(a.intersect(b).is_empty());
    }
}
