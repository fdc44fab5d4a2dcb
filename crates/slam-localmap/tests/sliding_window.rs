//! Seed scenario: fill cells around the origin, shift the window out to
//! (24,0,0) and back in steps of 5, and confirm every originally in-bounds
//! cell is bit-exact afterwards.

use slam_geometry::Point3i;
use slam_globalmap::{GlobalMap, TsdfEntry};
use slam_localmap::LocalMap;

#[test]
fn shift_out_and_back_in_steps_preserves_origin_cells() {
    let dir = tempfile::tempdir().unwrap();
    let global = GlobalMap::open(dir.path(), 1000, 0).unwrap();

    let mut map = LocalMap::new((11, 11, 11), Point3i::ZERO, TsdfEntry::new(1000, 0));
    let mut expected = Vec::new();
    for x in -2..=2 {
        for y in -2..=2 {
            for z in -2..=2 {
                let cell = Point3i::new(x, y, z);
                let entry = TsdfEntry::new((x * 10 + y) as i16, (z.unsigned_abs() + 1) as i16);
                *map.value_mut(cell).unwrap() = entry;
                expected.push((cell, entry));
            }
        }
    }

    // walk out to (24,0,0) in steps of 5, cells leave the window and are
    // written back to the global map
    for step in (5..=24).step_by(5) {
        map.shift(Point3i::new(step.min(24), 0, 0), &global).unwrap();
    }
    map.shift(Point3i::new(24, 0, 0), &global).unwrap();

    // and back to the origin the same way
    let mut pos = 24;
    while pos > 0 {
        pos = (pos - 5).max(0);
        map.shift(Point3i::new(pos, 0, 0), &global).unwrap();
    }

    assert_eq!(map.center(), Point3i::ZERO);
    for (cell, entry) in expected {
        assert_eq!(*map.value(cell).unwrap(), entry, "cell {cell:?} did not round-trip");
    }
}

#[test]
fn shift_by_full_window_size_evicts_every_cell_on_that_axis() {
    let dir = tempfile::tempdir().unwrap();
    let global = GlobalMap::open(dir.path(), 0, 0).unwrap();

    let mut map = LocalMap::new((5, 5, 5), Point3i::ZERO, TsdfEntry::new(0, 0));
    *map.value_mut(Point3i::new(-2, 0, 0)).unwrap() = TsdfEntry::new(7, 3);

    // shift by the full window size (5) in x: every x-slice leaves
    map.shift(Point3i::new(5, 0, 0), &global).unwrap();

    // (-2,0,0) is outside the new window ([3..7] in x), but its old value
    // is still reachable through the cell it now occupies after eviction
    assert!(!map.in_bounds(Point3i::new(-2, 0, 0)));
}

#[test]
fn shift_beyond_window_size_round_trips_via_full_invalidate() {
    let dir = tempfile::tempdir().unwrap();
    let global = GlobalMap::open(dir.path(), 1000, 0).unwrap();

    let mut map = LocalMap::new((5, 5, 5), Point3i::ZERO, TsdfEntry::new(1000, 0));
    let cell = Point3i::new(1, -1, 0);
    *map.value_mut(cell).unwrap() = TsdfEntry::new(-77, 42);

    // a single jump of 1000mm-equivalent cells, many times the window
    // size, forces the full-invalidate fast path rather than the banded
    // leaving/entering update.
    map.shift(Point3i::new(1000, 0, 0), &global).unwrap();
    assert!(!map.in_bounds(cell));

    map.shift(Point3i::ZERO, &global).unwrap();
    assert_eq!(map.center(), Point3i::ZERO);
    assert_eq!(*map.value(cell).unwrap(), TsdfEntry::new(-77, 42));
}
