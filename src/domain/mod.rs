// Domain layer - widget model, grid math and sync state, free of I/O
pub mod collision;
pub mod dashboard;
pub mod grid;
pub mod mutation_gate;
pub mod placement;
pub mod sync;
pub mod widget;
