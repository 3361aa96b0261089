//! Page cache for the practitioner list
//!
//! Pages are keyed by zero-based index. The FHIR server only hands out
//! continuation URLs, so a page is reachable only once a neighbour recorded
//! its URL.

use std::collections::HashMap;

use crate::models::Practitioner;

#[derive(Debug, Clone, Default)]
pub struct PageCache {
    page_size: usize,
    pages: HashMap<usize, Vec<Practitioner>>,
    urls: HashMap<usize, String>,
    total: Option<u64>,
}

impl PageCache {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Default::default()
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Last `total` reported by the server, adjusted for local mutations
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    /// Drop everything and start over with a new page size
    pub fn reset(&mut self, page_size: usize) {
        *self = Self::new(page_size);
    }

    pub fn page(&self, index: usize) -> Option<&[Practitioner]> {
        self.pages.get(&index).map(|p| p.as_slice())
    }

    /// Continuation URL recorded for `index`
    pub fn url_for(&self, index: usize) -> Option<&str> {
        self.urls.get(&index).map(|u| u.as_str())
    }

    /// Store a fetched page along with the links of its bundle
    pub fn store(
        &mut self,
        index: usize,
        practitioners: Vec<Practitioner>,
        next: Option<&str>,
        previous: Option<&str>,
        total: Option<u64>,
    ) {
        self.pages.insert(index, practitioners);
        if let Some(next) = next {
            self.urls.insert(index + 1, next.to_string());
        }
        if let (Some(previous), Some(before)) = (previous, index.checked_sub(1)) {
            self.urls.insert(before, previous.to_string());
        }
        if total.is_some() {
            self.total = total;
        }
    }

    /// Forget a practitioner deleted on the server.
    ///
    /// Drops it from every cached page and counts it once against the total,
    /// cached or not. Returns how many cached entries went away.
    pub fn remove_practitioner(&mut self, id: &str) -> usize {
        let mut removed = 0;
        for page in self.pages.values_mut() {
            let before = page.len();
            page.retain(|p| p.id.as_deref() != Some(id));
            removed += before - page.len();
        }
        self.total = self.total.map(|t| t.saturating_sub(1));
        removed
    }

    /// Replace every cached copy of `practitioner`, matched by id
    pub fn replace_practitioner(&mut self, practitioner: &Practitioner) -> bool {
        let Some(id) = practitioner.id.as_deref() else {
            return false;
        };
        let mut replaced = false;
        for page in self.pages.values_mut() {
            for cached in page.iter_mut().filter(|p| p.id.as_deref() == Some(id)) {
                *cached = practitioner.clone();
                replaced = true;
            }
        }
        replaced
    }

    pub fn contains_practitioner(&self, id: &str) -> bool {
        self.pages
            .values()
            .flatten()
            .any(|p| p.id.as_deref() == Some(id))
    }

    /// Account for a newly created practitioner.
    ///
    /// It is appended to the last cached page when that page has room and no
    /// recorded `next` link; otherwise only the total moves. Returns the page
    /// it landed on.
    pub fn fold_in(&mut self, practitioner: Practitioner) -> Option<usize> {
        self.total = self.total.map(|t| t + 1);

        let last = self.pages.keys().max().copied()?;
        if self.urls.contains_key(&(last + 1)) {
            return None;
        }
        let page = self.pages.get_mut(&last)?;
        if page.len() >= self.page_size {
            return None;
        }
        page.push(practitioner);
        Some(last)
    }
}
