use std::sync::Arc;

const FILLER: &str = "a";

/// Builds the argument list sent with every call:
/// `count` strings, each made of `size` filler characters.
pub fn build(size: usize, count: usize) -> Arc<[String]> {
    let arg = FILLER.repeat(size);
    vec![arg; count].into()
}
