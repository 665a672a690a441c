//! Frame codec test suite

mod frame_building;
