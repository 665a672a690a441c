//! HPACK codec test suite

mod decoding;
