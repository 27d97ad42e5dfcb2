//! Per-tab navigation history.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserHistory {
    entries: Vec<Url>,
    index: usize,
}

impl BrowserHistory {
    #[must_use]
    pub fn new(initial: Url) -> Self {
        Self {
            entries: vec![initial],
            index: 0,
        }
    }

    #[must_use]
    pub fn current(&self) -> &Url {
        &self.entries[self.index]
    }

    #[must_use]
    pub fn entries(&self) -> &[Url] {
        &self.entries
    }

    /// Add an entry, dropping anything forward of the current one.
    pub fn push(&mut self, url: Url) {
        self.entries.truncate(self.index + 1);
        self.entries.push(url);
        self.index = self.entries.len() - 1;
    }

    pub fn replace(&mut self, url: Url) {
        self.entries[self.index] = url;
    }

    /// Same-origin URL for `target`, a path optionally followed by a query
    /// and a fragment. Whatever the current entry carried is dropped.
    #[must_use]
    pub fn resolve(&self, target: &str) -> Url {
        let (rest, fragment) = target
            .split_once('#')
            .map_or((target, None), |(rest, fragment)| (rest, Some(fragment)));
        let (path, query) = rest
            .split_once('?')
            .map_or((rest, None), |(path, query)| (path, Some(query)));
        let mut url = self.current().clone();
        url.set_path(path);
        url.set_query(query);
        url.set_fragment(fragment);
        url
    }

    /// Returns `false` when already at the oldest entry.
    pub fn back(&mut self) -> bool {
        if self.index == 0 {
            return false;
        }
        self.index -= 1;
        true
    }

    pub fn forward(&mut self) -> bool {
        if self.index + 1 >= self.entries.len() {
            return false;
        }
        self.index += 1;
        true
    }
}
