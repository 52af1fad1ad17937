//! Mapping from the user-visible page sequence to document pages.

/// User-supplied page ordering. May reorder or repeat document pages.
///
/// An empty custom list means the identity order over the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOrder {
    user_pages: Vec<usize>,
    document_page_count: usize,
}

impl PageOrder {
    pub fn new(user_pages: Vec<usize>, document_page_count: usize) -> Self {
        Self {
            user_pages,
            document_page_count,
        }
    }

    pub fn identity(document_page_count: usize) -> Self {
        Self::new(Vec::new(), document_page_count)
    }

    pub fn document_page_count(&self) -> usize {
        self.document_page_count
    }

    pub fn is_custom(&self) -> bool {
        !self.user_pages.is_empty()
    }

    /// Number of entries in the visible sequence.
    pub fn len(&self) -> usize {
        if self.user_pages.is_empty() {
            self.document_page_count
        } else {
            self.user_pages.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a sequence index, or `None` if it falls outside the sequence
    /// or points past the end of the document.
    pub fn document_page(&self, sequence_index: usize) -> Option<usize> {
        let page = if self.user_pages.is_empty() {
            sequence_index
        } else {
            *self.user_pages.get(sequence_index)?
        };
        (page < self.document_page_count).then_some(page)
    }

    /// The sequence with runs of consecutive duplicates collapsed.
    pub fn distinct_pages(&self) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::with_capacity(self.len());
        for page in self.sequence() {
            if out.last() != Some(&page) {
                out.push(page);
            }
        }
        out
    }

    /// For every sequence entry, its index in [`Self::distinct_pages`].
    ///
    /// `[0, 4, 4, 6, 6, 6, 3]` gives `[0, 1, 1, 2, 2, 2, 3]`.
    pub fn group_indexes(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len());
        let mut previous = None;
        let mut group = 0usize;
        for (i, page) in self.sequence().enumerate() {
            if i > 0 && previous != Some(page) {
                group += 1;
            }
            out.push(group);
            previous = Some(page);
        }
        out
    }

    fn sequence(&self) -> impl Iterator<Item = usize> + '_ {
        let identity = if self.user_pages.is_empty() {
            0..self.document_page_count
        } else {
            0..0
        };
        self.user_pages.iter().copied().chain(identity)
    }
}
