//! Integration tests of `mpc-rounds` and `mpc-protocols`, see `tests/`
