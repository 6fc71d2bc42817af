// ABOUTME: Offset pagination for management listings
// ABOUTME: Clamps caller-supplied limits and reports whether more rows remain
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound on page size
pub const MAX_PAGE_SIZE: u32 = 500;

/// Requested window of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Rows to skip
    pub offset: u32,
    /// Rows to return, clamped to `1..=MAX_PAGE_SIZE`
    pub limit: u32,
}

impl PageRequest {
    /// Build a request, clamping the limit
    #[must_use]
    pub fn new(offset: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows in this page
    pub items: Vec<T>,
    /// Total rows matching the filter
    pub total: u64,
    /// Offset this page starts at
    pub offset: u32,
    /// Requested limit
    pub limit: u32,
    /// Whether rows remain after this page
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Assemble a page from the fetched rows and the total count
    #[must_use]
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let consumed = u64::from(request.offset) + items.len() as u64;
        Self {
            has_more: consumed < total,
            items,
            total,
            offset: request.offset,
            limit: request.limit,
        }
    }

    /// Transform each row, keeping the page bookkeeping
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            offset: self.offset,
            limit: self.limit,
            has_more: self.has_more,
        }
    }
}
