use std::collections::HashMap;

/// Segment matching exactly one dot-delimited segment
pub const SINGLE_WILDCARD: &str = "*";
/// Segment matching zero or more trailing segments
pub const MULTI_WILDCARD: &str = "**";

/// Split a dotted name into its segments
pub fn segments(name: &str) -> Vec<&str> {
    name.split('.').collect()
}

/// Path trie for event pattern matching
///
/// INTENTION: Match an event name against every registered pattern by walking
/// the name one segment at a time, instead of re-parsing each pattern per
/// event. Patterns are inserted once at registration time; a lookup only
/// visits the branches that can still match.
///
/// Supported pattern segments:
/// - literal, equal segment only
/// - `*`, any single segment
/// - `**`, zero or more trailing segments (only valid as the last segment)
#[derive(Clone, Debug)]
pub struct PathTrie<T: Clone> {
    /// Handlers for patterns ending exactly at this node
    handlers: Vec<T>,

    /// Child nodes for literal segments
    children: HashMap<String, PathTrie<T>>,

    /// Child node for single wildcard (*)
    wildcard_child: Option<Box<PathTrie<T>>>,

    /// Handlers for multi-wildcard (**) at this level
    multi_wildcard_handlers: Vec<T>,
}

impl<T: Clone> Default for PathTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> PathTrie<T> {
    /// Create a new empty path trie
    pub fn new() -> Self {
        PathTrie {
            handlers: Vec::new(),
            children: HashMap::new(),
            wildcard_child: None,
            multi_wildcard_handlers: Vec::new(),
        }
    }

    /// Add a single handler for a pattern
    pub fn add_handler(&mut self, pattern: &str, handler: T) {
        self.add_internal(&segments(pattern), 0, handler);
    }

    fn add_internal(&mut self, segments: &[&str], index: usize, handler: T) {
        if index >= segments.len() {
            self.handlers.push(handler);
            return;
        }

        let segment = segments[index];

        if segment == MULTI_WILDCARD {
            // Anything after ** is rejected before it gets here
            self.multi_wildcard_handlers.push(handler);
        } else if segment == SINGLE_WILDCARD {
            self.wildcard_child
                .get_or_insert_with(|| Box::new(PathTrie::new()))
                .add_internal(segments, index + 1, handler);
        } else {
            self.children
                .entry(segment.to_string())
                .or_insert_with(PathTrie::new)
                .add_internal(segments, index + 1, handler);
        }
    }

    /// Find all handlers whose pattern matches the given event name
    pub fn find_matches(&self, name: &str) -> Vec<T> {
        let mut results = Vec::new();
        self.find_matches_internal(&segments(name), 0, &mut results);
        results
    }

    fn find_matches_internal(&self, segments: &[&str], index: usize, results: &mut Vec<T>) {
        // ** also matches zero remaining segments
        results.extend(self.multi_wildcard_handlers.iter().cloned());

        if index >= segments.len() {
            results.extend(self.handlers.iter().cloned());
            return;
        }

        let segment = segments[index];

        if let Some(child) = self.children.get(segment) {
            child.find_matches_internal(segments, index + 1, results);
        }

        if let Some(child) = &self.wildcard_child {
            child.find_matches_internal(segments, index + 1, results);
        }
    }

    /// Remove handlers registered under exactly this pattern that match a predicate
    pub fn remove_handler<F>(&mut self, pattern: &str, predicate: F) -> bool
    where
        F: Fn(&T) -> bool + Copy,
    {
        self.remove_handler_internal(&segments(pattern), 0, predicate)
    }

    fn remove_handler_internal<F>(&mut self, segments: &[&str], index: usize, predicate: F) -> bool
    where
        F: Fn(&T) -> bool + Copy,
    {
        if index >= segments.len() {
            let initial_len = self.handlers.len();
            self.handlers.retain(|h| !predicate(h));
            return initial_len > self.handlers.len();
        }

        let segment = segments[index];

        if segment == MULTI_WILDCARD {
            let initial_len = self.multi_wildcard_handlers.len();
            self.multi_wildcard_handlers.retain(|h| !predicate(h));
            initial_len > self.multi_wildcard_handlers.len()
        } else if segment == SINGLE_WILDCARD {
            let removed = match &mut self.wildcard_child {
                Some(child) => child.remove_handler_internal(segments, index + 1, predicate),
                None => false,
            };
            if self.wildcard_child.as_ref().is_some_and(|c| c.is_empty()) {
                self.wildcard_child = None;
            }
            removed
        } else {
            let removed = match self.children.get_mut(segment) {
                Some(child) => child.remove_handler_internal(segments, index + 1, predicate),
                None => false,
            };
            if self.children.get(segment).is_some_and(|c| c.is_empty()) {
                self.children.remove(segment);
            }
            removed
        }
    }

    /// Check if this trie is empty (has no handlers or children)
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
            && self.multi_wildcard_handlers.is_empty()
            && self.children.is_empty()
            && self.wildcard_child.is_none()
    }

    /// Get the count of handlers in this trie
    pub fn handler_count(&self) -> usize {
        let mut count = self.handlers.len() + self.multi_wildcard_handlers.len();

        for child in self.children.values() {
            count += child.handler_count();
        }

        if let Some(child) = &self.wildcard_child {
            count += child.handler_count();
        }

        count
    }
}
