//! Listing pagination, shared by every repository's `list` operation
//! (record store contract, spec.md 6.2).

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}

impl Pagination {
    pub fn new(skip: u32, limit: u32) -> Self {
        Self { skip, limit }
    }
}
