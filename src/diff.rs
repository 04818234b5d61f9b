//! Change Detector
//!
//! Positional comparison: `new[i]` is changed when it differs from `old[i]`
//! in any field, or when `old` has no course at `i`. A reordered course list
//! therefore reports every moved position.

use crate::types::{Course, Snapshot};

/// Courses of `new` that differ from `old` at the same position, in `new` order.
pub fn changed_courses(old: &Snapshot, new: &Snapshot) -> Vec<Course> {
    new.iter()
        .enumerate()
        .filter(|(i, course)| old.courses().get(*i) != Some(*course))
        .map(|(_, course)| course.clone())
        .collect()
}
