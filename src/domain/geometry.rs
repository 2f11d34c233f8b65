//! Bounding-box geometry helpers

use crate::domain::types::{BBox, Point};

/// Center of a box
#[inline]
pub fn center(bbox: &BBox) -> Point {
    Point::new(bbox.x + 0.5 * bbox.w, bbox.y + 0.5 * bbox.h)
}

/// Whether `p` lies inside `bbox`, edges inclusive
#[inline]
pub fn contains(bbox: &BBox, p: Point) -> bool {
    bbox.left() <= p.x && p.x <= bbox.right() && bbox.top() <= p.y && p.y <= bbox.bottom()
}

/// Mutual center containment: each box holds the other's center.
///
/// This is the only association test used between detections and tracks.
#[inline]
pub fn mutually_centered(a: &BBox, b: &BBox) -> bool {
    contains(a, center(b)) && contains(b, center(a))
}

/// Euclidean distance between two points
#[inline]
pub fn distance(a: Point, b: Point) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Center-to-center displacement between two boxes, in pixels
#[inline]
pub fn center_displacement(prev: &BBox, curr: &BBox) -> f64 {
    distance(center(prev), center(curr))
}

/// Area of the intersection of two boxes (0 when disjoint)
pub fn intersection_area(a: &BBox, b: &BBox) -> f64 {
    let w = a.right().min(b.right()) - a.left().max(b.left());
    let h = a.bottom().min(b.bottom()) - a.top().max(b.top());
    if w <= 0.0 || h <= 0.0 {
        0.0
    } else {
        w * h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center() {
        let c = center(&BBox::new(100.0, 100.0, 50.0, 50.0));
        assert_eq!(c, Point::new(125.0, 125.0));
    }

    #[test]
    fn test_contains_is_edge_inclusive() {
        let b = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(contains(&b, Point::new(0.0, 0.0)));
        assert!(contains(&b, Point::new(10.0, 10.0)));
        assert!(!contains(&b, Point::new(10.01, 5.0)));
    }

    #[test]
    fn test_identical_boxes_are_mutually_centered() {
        let b = BBox::new(37.0, 12.0, 64.0, 48.0);
        assert!(mutually_centered(&b, &b));
    }

    #[test]
    fn test_small_box_inside_large_box_is_not_mutual() {
        // The small box holds no part of the large box's center
        let large = BBox::new(0.0, 0.0, 200.0, 200.0);
        let small = BBox::new(10.0, 10.0, 20.0, 20.0);
        assert!(contains(&large, center(&small)));
        assert!(!mutually_centered(&large, &small));
    }

    #[test]
    fn test_center_displacement() {
        let prev = BBox::new(100.0, 100.0, 50.0, 50.0);
        let curr = BBox::new(135.0, 100.0, 50.0, 50.0);
        assert!((center_displacement(&prev, &curr) - 35.0).abs() < 1e-9);

        let diag = BBox::new(103.0, 104.0, 50.0, 50.0);
        assert!((center_displacement(&prev, &diag) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_intersection_area() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 10.0, 10.0);
        assert_eq!(intersection_area(&a, &b), 25.0);
        assert_eq!(intersection_area(&a, &BBox::new(20.0, 20.0, 5.0, 5.0)), 0.0);
    }
}
